/// Builds the gRPC client and server code for the `ocr.proto` definition using
/// `tonic-prost-build`.
///
/// # Byte Field Optimization
///
/// The `image` field in `RecognizeRequest` is generated as `Bytes` rather than
/// `Vec<u8>`. Request images can be tens of megabytes and are handed from the
/// RPC task to a worker, so sharing the decoded frame buffer avoids a copy.
///
/// # Files and Paths
///
/// - Proto file: `proto/ocr.proto`
/// - Includes: `proto/`
/// - Descriptor set: `$OUT_DIR/ocr_descriptor.bin` (served by reflection)
///
/// # Panics
///
/// Panics if code generation fails.
use std::env;
use std::path::PathBuf;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("ocr_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();

    config
        .bytes([".ocr.RecognizeRequest.image"])
        .file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/ocr.proto"], &["proto"])
        .unwrap();
}
