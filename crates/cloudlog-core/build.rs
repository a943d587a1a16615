use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const ASSET_DIR: &str = "schemas";
const ASSET_EXTENSION: &str = "fbs";

/// Collect every schema file below `dir`, depth first.
fn collect_assets(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_assets(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some(ASSET_EXTENSION) {
            out.push(path);
        }
    }
    Ok(())
}

/// `schemas/foxglove/PointCloud.fbs` becomes `foxglove.PointCloud`
fn asset_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path).with_extension("");
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(".")
}

fn main() -> io::Result<()> {
    println!("cargo:rerun-if-changed={ASSET_DIR}");

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR"));
    let root = manifest_dir.join(ASSET_DIR);

    let mut files = Vec::new();
    if root.is_dir() {
        collect_assets(&root, &mut files)?;
    }
    files.sort();

    let mut generated = String::from("pub(crate) static ASSETS: &[(&str, &[u8])] = &[\n");
    for path in &files {
        println!("cargo:rerun-if-changed={}", path.display());
        generated.push_str(&format!(
            "    ({:?}, include_bytes!({:?})),\n",
            asset_name(&root, path),
            path.display().to_string()
        ));
    }
    generated.push_str("];\n");

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));
    fs::write(out_dir.join("schema_assets.rs"), generated)
}
