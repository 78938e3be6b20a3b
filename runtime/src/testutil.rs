//! Fixtures shared by unit tests.

use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::aci::{AcIdentifier, Dependency, Labels, Manifest};

/// Manifest named `name` with a `version` label.
pub fn manifest(name: &str, version: &str) -> Manifest {
    Manifest::placeholder()
        .unwrap()
        .with_name(name)
        .unwrap()
        .with_label("version", version)
        .unwrap()
}

pub fn dependency(name: &str, version: &str) -> Dependency {
    let mut dep = Dependency::new(AcIdentifier::new(name).unwrap());
    dep.labels = Labels::from_pairs([("version", version)]).unwrap();
    dep
}

/// gzip ACI bytes holding `manifest` and `rootfs/<path>` files.
pub fn aci_bytes(manifest: &Manifest, files: &[(&str, &[u8])]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let json = serde_json::to_vec(manifest).unwrap();
    append(&mut builder, "manifest", &json);
    let mut dir = tar::Header::new_gnu();
    dir.set_entry_type(tar::EntryType::Directory);
    dir.set_mode(0o755);
    dir.set_size(0);
    dir.set_cksum();
    builder.append_data(&mut dir, "rootfs/", std::io::empty()).unwrap();
    for (path, content) in files {
        append(&mut builder, &format!("rootfs/{path}"), content);
    }
    builder.into_inner().unwrap().finish().unwrap()
}

pub fn write_aci(path: &Path, manifest: &Manifest, files: &[(&str, &[u8])]) {
    std::fs::write(path, aci_bytes(manifest, files)).unwrap();
}

fn append<W: std::io::Write>(builder: &mut tar::Builder<W>, path: &str, content: &[u8]) {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, path, content).unwrap();
}
