use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = PathBuf::from(std::env::var("OUT_DIR")?);

    // Bus transport: server side is hosted by the data-access unit, client side
    // by the HTTP unit when the two run as separate processes.
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .file_descriptor_set_path(out_dir.join("bus_descriptor.bin"))
        .compile_protos(&["../proto/bus/v1/bus.proto"], &["../proto"])?;

    println!("cargo:rerun-if-changed=../proto/bus/v1/bus.proto");

    Ok(())
}
