fn main() {
    let protoc_path =
        protoc_bin_vendored::protoc_bin_path().expect("failed to find bundled protoc");
    // SAFETY: build scripts are single-threaded.
    unsafe { std::env::set_var("PROTOC", protoc_path) };

    println!("cargo:rerun-if-changed=proto/ext_proc.proto");
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/ext_proc.proto"], &["proto"])
        .expect("failed to compile ext_proc definitions");
}
