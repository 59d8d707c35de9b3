fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = std::path::PathBuf::from(std::env::var("OUT_DIR")?);
    let descriptor_path = out_dir.join("estoque_descriptor.bin");

    const PROTOS: &[&str] = &[
        "proto/common.proto",
        "proto/auth.proto",
        "proto/items.proto",
        "proto/requests.proto",
        "proto/importer.proto",
        "proto/admin.proto",
        "proto/health.proto",
    ];

    // Compile proto files with file descriptor for reflection
    let configure = || {
        tonic_build::configure()
            .build_server(true)
            .build_client(true)
            .file_descriptor_set_path(&descriptor_path)
    };

    if let Err(err) = configure().compile_protos(PROTOS, &["proto"]) {
        // protoc is unavailable: fall back to the vendored file descriptor
        // set generated from these same proto files.
        let vendored = std::path::Path::new("proto/estoque_descriptor.bin");
        if vendored.exists() {
            std::fs::copy(vendored, &descriptor_path)?;
            configure()
                .skip_protoc_run()
                .compile_protos(PROTOS, &["proto"])?;
        } else {
            return Err(err.into());
        }
    }

    // Rerun if proto files change
    println!("cargo:rerun-if-changed=proto/");

    Ok(())
}
