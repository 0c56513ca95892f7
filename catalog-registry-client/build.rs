fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use bundled protoc so the build doesn't depend on one being on PATH.
    // SAFETY: build-script process, no concurrent readers of this var.
    unsafe {
        std::env::set_var("PROTOC", protobuf_src::protoc());
    }

    tonic_prost_build::configure()
        .build_server(false)
        .build_client(true)
        .compile_protos(&["proto/registry.proto"], &["proto/"])?;
    Ok(())
}
