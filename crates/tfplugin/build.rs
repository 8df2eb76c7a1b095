//! Build script for containerregistry-tfplugin
//!
//! Generates Rust bindings from the Terraform provider protocol v6 and the
//! go-plugin controller protobuf definitions. A vendored `protoc` is used so
//! the build does not depend on a system installation.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/tfplugin6.proto");
    println!("cargo:rerun-if-changed=proto/grpc_controller.proto");

    let mut config = prost_build::Config::new();
    config.protoc_executable(protoc_bin_vendored::protoc_bin_path()?);

    // Server side is what the provider answers; the client is used by the
    // integration tests to drive the server over a real socket.
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos_with_config(
            config,
            &["proto/tfplugin6.proto", "proto/grpc_controller.proto"],
            &["proto/"],
        )?;

    Ok(())
}
