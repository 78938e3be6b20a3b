//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use acb_core::error::Result;
use acb_core::BuildConfig;
use acb_runtime::{
    AppRef, BuildContext, Discovery, Endpoint, ImageStore, Manifest, RegistryClient, TarExtractor,
};
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Serves `example.com/<x>` from `<base>/<x>.aci`.
pub struct PathDiscovery {
    pub base: String,
}

#[async_trait]
impl Discovery for PathDiscovery {
    async fn discover(&self, app: &AppRef, _insecure: bool) -> Result<Vec<Endpoint>> {
        let short = app.name.as_str().trim_start_matches("example.com/");
        let aci = format!("{}/{short}.aci", self.base);
        Ok(vec![Endpoint {
            asc: format!("{aci}.asc"),
            aci,
        }])
    }
}

pub fn manifest(name: &str, version: &str) -> Manifest {
    Manifest::placeholder()
        .unwrap()
        .with_name(name)
        .unwrap()
        .with_label("version", version)
        .unwrap()
}

/// gzip ACI bytes holding `manifest` and `rootfs/<path>` files.
pub fn aci_bytes(manifest: &Manifest, files: &[(&str, &str)]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    append(&mut builder, "manifest", &serde_json::to_vec(manifest).unwrap());
    for (file, content) in files {
        append(&mut builder, &format!("rootfs/{file}"), content.as_bytes());
    }
    builder.into_inner().unwrap().finish().unwrap()
}

fn append<W: std::io::Write>(builder: &mut tar::Builder<W>, path: &str, content: &[u8]) {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, path, content).unwrap();
}

/// Serve `example.com/<name>` version 1 with the given rootfs files.
pub async fn serve_image(server: &MockServer, name: &str, files: &[(&str, &str)]) -> Vec<u8> {
    let bytes = aci_bytes(&manifest(&format!("example.com/{name}"), "1"), files);
    Mock::given(method("GET"))
        .and(path(format!("/{name}.aci")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes.clone()))
        .mount(server)
        .await;
    bytes
}

pub fn store(root: &Path, server: &MockServer) -> ImageStore {
    ImageStore::new(
        root,
        Arc::new(PathDiscovery { base: server.uri() }),
        RegistryClient::new(false).unwrap(),
        Arc::new(TarExtractor::new(false)),
        false,
    )
}

/// Build context in `work` whose dependencies come from `server`.
pub fn context(work: &Path, server: &MockServer) -> BuildContext {
    let config = BuildConfig::for_work_dir(work);
    let store = store(&config.store_dir, server);
    BuildContext::with_store(&config, store)
}

pub fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}
