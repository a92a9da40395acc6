fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/kv.proto");
    tonic_build::compile_protos("proto/kv.proto")?;
    Ok(())
}
