// Compile service protos
// see https://docs.rs/tonic-build/latest/tonic_build/

fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    tonic_build::configure()
        .build_server(false)
        .compile_protos(&["proto/qjazz.proto"], &["proto"])?;
    Ok(())
}
