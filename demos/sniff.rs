//! Prints packets matching a filter until Ctrl-C.
//!
//! ```text
//! cargo run --example sniff -- --filter "tcp.DstPort == 443" --count 20
//! ```

use clap::{Parser, ValueEnum};
use divert::platform;
use divert::prelude::*;
use log::{error, info, warn};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LayerArg {
    Network,
    Forward,
    Flow,
    Socket,
    Reflect,
}

impl From<LayerArg> for Layer {
    fn from(arg: LayerArg) -> Self {
        match arg {
            LayerArg::Network => Layer::Network,
            LayerArg::Forward => Layer::NetworkForward,
            LayerArg::Flow => Layer::Flow,
            LayerArg::Socket => Layer::Socket,
            LayerArg::Reflect => Layer::Reflect,
        }
    }
}

#[derive(Parser, Debug)]
#[command(about = "Print packets or events matching a WinDivert filter")]
struct Args {
    /// WinDivert filter expression
    #[arg(short, long, default_value = "true")]
    filter: String,

    /// Layer to attach to
    #[arg(short, long, value_enum, default_value_t = LayerArg::Network)]
    layer: LayerArg,

    /// Handle priority, -3000 to 3000
    #[arg(short, long, default_value_t = Priority::default(), allow_hyphen_values = true)]
    priority: Priority,

    /// Stop after this many records (0 = until Ctrl-C)
    #[arg(short, long, default_value_t = 0)]
    count: u64,

    /// Divert packets instead of copying them; diverted packets are reinjected
    #[arg(long)]
    divert: bool,

    #[command(flatten)]
    queue: QueueOptions,
}

fn describe(addr: &Address) -> String {
    let Some(layer) = addr.known_layer() else {
        return format!("unknown layer tag {}", addr.raw_layer());
    };
    match layer {
        Layer::Network | Layer::NetworkForward => {
            let net = addr.network();
            format!(
                "{} if={}.{}",
                if addr.flags().is_outbound() { "out" } else { "in " },
                net.interface_index,
                net.sub_interface_index
            )
        }
        Layer::Flow | Layer::Socket => {
            let sock = addr.socket();
            format!(
                "{:?} pid={} {}:{} -> {}:{} proto={}",
                addr.event(),
                sock.process_id,
                sock.local_ip(),
                sock.local_port,
                sock.remote_ip(),
                sock.remote_port,
                sock.protocol
            )
        }
        Layer::Reflect => {
            let reflect = addr.reflect();
            format!(
                "{:?} pid={} layer={:?} priority={}",
                addr.event(),
                reflect.process_id,
                reflect.reflected_layer(),
                reflect.priority
            )
        }
    }
}

fn run(args: Args) -> divert::Result<()> {
    let layer = Layer::from(args.layer);
    let sniff = !args.divert || !layer.can_inject();
    let flags = match layer {
        Layer::Network | Layer::NetworkForward => OpenFlags::new().set_sniff(sniff),
        _ => OpenFlags::new().set_sniff(true).set_recv_only(true),
    };

    let context = divert::global()?;
    let config = HandleConfig::with_filter(args.filter.as_str())
        .layer(layer)
        .priority(args.priority)
        .flags(flags)
        .queue(args.queue.clone());
    let handle = Arc::new(context.open_with(&config)?);
    info!("Capturing on {:?} with filter {:?}", layer, args.filter);

    let stopper = Arc::downgrade(&handle);
    if let Err(e) = ctrlc::set_handler(move || {
        if let Some(handle) = stopper.upgrade() {
            if let Err(e) = handle.shutdown(Shutdown::Recv) {
                warn!("Failed to shut down receiving: {}", e);
            }
        }
    }) {
        warn!("Ctrl-C handler not installed: {}", e);
    }

    let mut packet = vec![0u8; MTU_MAX];
    let mut addr = Address::default();
    let mut seen = 0u64;

    while args.count == 0 || seen < args.count {
        let len = match handle.recv(&mut packet, &mut addr) {
            Ok(len) => len,
            // ERROR_NO_DATA: the queue drained after shutdown.
            Err(e) if e.os_code() == Some(232) => break,
            Err(e) => return Err(e),
        };
        seen += 1;
        println!("#{:<6} {:>5} bytes {}", seen, len, describe(&addr));

        if !sniff {
            context.calc_checksums(&mut packet[..len], Some(&mut addr), ChecksumFlags::all())?;
            handle.send(&packet[..len], &addr)?;
        }
    }

    info!("Captured {} records", seen);
    match Arc::try_unwrap(handle) {
        Ok(handle) => handle.close(),
        // The Ctrl-C handler is using it right now; the last drop closes it.
        Err(_) => Ok(()),
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if !platform::is_elevated() {
        error!("Capturing packets requires administrator privileges. Please run as administrator.");
        return ExitCode::FAILURE;
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
