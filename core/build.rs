use std::io::Result;

fn main() -> Result<()> {
    let mut config = prost_build::Config::new();
    config.bytes(["."]);

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_with_config(config, &["protos/dfs.proto"], &["protos"])?;
    Ok(())
}
