//! Prints the version of the WinDivert driver the process would use.
//!
//! ```text
//! cargo run --example version_info -- --dll C:\Tools\WinDivert.dll
//! ```

use clap::Parser;
use divert::loader::ModuleSource;
use divert::platform;
use divert::settings::LoaderSettings;
use divert::DivertContext;
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(about = "Print the version of the WinDivert driver")]
struct Args {
    /// Load the library from this path instead of the configured source
    #[arg(long, conflicts_with = "resource")]
    dll: Option<PathBuf>,

    /// Load the library from an RT_RCDATA resource of this executable
    #[arg(long)]
    resource: Option<String>,
}

fn context(args: &Args) -> divert::Result<DivertContext> {
    if let Some(path) = &args.dll {
        return Ok(DivertContext::native(ModuleSource::File(path.clone())));
    }
    if let Some(name) = &args.resource {
        return Ok(DivertContext::native(ModuleSource::Resource(name.clone())));
    }
    DivertContext::from_settings(&LoaderSettings::load()?)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if !platform::is_elevated() {
        error!("Opening a WinDivert handle requires administrator privileges. Please run as administrator.");
        return ExitCode::FAILURE;
    }

    let result = context(&args).and_then(|ctx| ctx.version());
    match result {
        Ok(version) => {
            info!("WinDivert version: {}", version);
            println!("{}", version);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{} ({:?})", e, e.kind());
            ExitCode::FAILURE
        }
    }
}
