use std::env;
use std::path::Path;

fn main() {
    // Compile a WinDivert.dll into the binary when DIVERT_EMBED_DLL points at one
    println!("cargo:rerun-if-env-changed=DIVERT_EMBED_DLL");
    println!("cargo:rustc-check-cfg=cfg(divert_embedded)");

    let Ok(path) = env::var("DIVERT_EMBED_DLL") else {
        return;
    };

    if !Path::new(&path).is_file() {
        println!("cargo:warning=DIVERT_EMBED_DLL={} is not a file, building without an embedded module", path);
        return;
    }

    println!("cargo:rerun-if-changed={}", path);
    println!("cargo:rustc-env=DIVERT_EMBED_DLL={}", path);
    println!("cargo:rustc-cfg=divert_embedded");
}
