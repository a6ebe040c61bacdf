use std::{env, fs, io, path::PathBuf};

/// Bundles `schemas/` into `OUT_DIR` as the node's default network config.
fn main() -> io::Result<()> {
    println!("cargo:rerun-if-changed=schemas");

    let out_dir = env::var("OUT_DIR").map_err(|e| io::Error::new(io::ErrorKind::NotFound, e))?;
    let out_schemas = PathBuf::from(out_dir).join("schemas");
    println!("cargo:rustc-env=OUT_SCHEMAS={}", out_schemas.display());
    fs::create_dir_all(&out_schemas)?;

    for entry in fs::read_dir("schemas")? {
        let path = entry?.path();
        if let Some(file_name) = path.file_name() {
            fs::copy(&path, out_schemas.join(file_name))?;
        }
    }
    Ok(())
}
