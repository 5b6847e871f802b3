fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Compile the relay wire protocol. This is node-to-node communication;
    // nothing here is exposed to end users directly.
    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .type_attribute(".", "#[derive(serde::Serialize, serde::Deserialize)]")
        .compile_protos(&["../proto/joblink.proto"], &["../proto"])?;

    Ok(())
}
