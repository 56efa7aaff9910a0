/// Builds the gRPC client and server code for `scooter.proto` using
/// `tonic-prost-build`.
///
/// The generated module is exposed as `scooter_core::proto`. A file
/// descriptor set is written next to it so the hub can serve gRPC reflection.
///
/// ```rust
/// pub mod proto {
///     tonic::include_proto!("scooter");
/// }
/// ```
use std::env;
use std::path::PathBuf;
fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("scooter_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/scooter.proto"], &["proto"])
        .unwrap();

    println!("cargo:rerun-if-changed=proto/scooter.proto");
}
