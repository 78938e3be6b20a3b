//! Content-addressed image store.
//!
//! Blobs are keyed by the SHA-512 of their compressed bytes and written once;
//! after that every path under a key is read-only.
//!
//! ```text
//! <root>/
//! ├── tar/<key>              downloaded archives
//! ├── expanded/<key>/        rendered manifest + rootfs
//! ├── remote/<urlhash>.json  fetch records (origin URL, ETag, time)
//! └── tmp/                   in-flight downloads
//! ```

pub mod remote;

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use acb_core::error::{BuildError, Result};
use acb_core::BuildConfig;
use chrono::Utc;
use sha2::{Digest, Sha512};

use crate::aci::{read_entry, AppRef, ContentKey, Extractor, Labels, Manifest, TarExtractor};
use crate::registry::{Discovery, DownloadOutcome, MetaDiscovery, RegistryClient};
pub use remote::{RemoteIndex, RemoteRecord};

/// A stored image as shown by listings.
#[derive(Debug, Clone)]
pub struct StoreEntry {
    pub key: ContentKey,
    pub manifest: Manifest,
    pub size_bytes: u64,
    pub remote: Option<RemoteRecord>,
}

/// Image store rooted at one directory.
pub struct ImageStore {
    root: PathBuf,
    discovery: Arc<dyn Discovery>,
    client: RegistryClient,
    extractor: Arc<dyn Extractor>,
    insecure: bool,
}

impl ImageStore {
    pub fn new(
        root: impl Into<PathBuf>,
        discovery: Arc<dyn Discovery>,
        client: RegistryClient,
        extractor: Arc<dyn Extractor>,
        insecure: bool,
    ) -> Self {
        Self {
            root: root.into(),
            discovery,
            client,
            extractor,
            insecure,
        }
    }

    /// Store at `config.store_dir` with meta discovery and tar extraction.
    pub fn open(config: &BuildConfig) -> Result<Self> {
        let client = RegistryClient::new(config.insecure)?;
        Ok(Self::new(
            &config.store_dir,
            Arc::new(MetaDiscovery::new(client.clone())),
            client,
            Arc::new(TarExtractor::for_current_user()),
            config.insecure,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extractor(&self) -> &dyn Extractor {
        self.extractor.as_ref()
    }

    fn tar_dir(&self) -> PathBuf {
        self.root.join("tar")
    }

    fn expanded_dir(&self) -> PathBuf {
        self.root.join("expanded")
    }

    fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    fn remote(&self) -> RemoteIndex {
        RemoteIndex::new(self.root.join("remote"))
    }

    pub fn blob_path(&self, key: &ContentKey) -> PathBuf {
        self.tar_dir().join(key.as_str())
    }

    pub fn has_blob(&self, key: &ContentKey) -> bool {
        self.blob_path(key).is_file()
    }

    /// Make sure an image matching `app` is stored and return its key.
    ///
    /// A pinned version already fetched from the same URL is revalidated
    /// with its ETag instead of downloaded again; `latest` always downloads.
    pub async fn fetch(
        &self,
        app: &AppRef,
        expected_size: Option<u64>,
        force_refresh: bool,
    ) -> Result<ContentKey> {
        let endpoint = self
            .discovery
            .discover(app, self.insecure)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BuildError::Discovery {
                name: app.to_string(),
                message: "no endpoints discovered".to_string(),
            })?;
        let url = endpoint.aci;
        let remote = self.remote();

        if !force_refresh && !app.labels.is_latest() {
            if let Some(record) = remote.load(&url)? {
                if self.has_blob(&record.blob_key) {
                    let Some(etag) = record.etag.as_deref() else {
                        tracing::debug!(name = %app, key = %record.blob_key.short(), "Using cached image");
                        return Ok(record.blob_key);
                    };
                    if let Some(key) = self
                        .download(&url, app, Some(etag), expected_size)
                        .await?
                    {
                        return Ok(key);
                    }
                    tracing::debug!(name = %app, key = %record.blob_key.short(), "Cached image still fresh");
                    return Ok(record.blob_key);
                }
            }
        }

        self.download(&url, app, None, expected_size)
            .await?
            .ok_or_else(|| BuildError::Network {
                url: url.clone(),
                message: "server answered 304 to an unconditional request".to_string(),
            })
    }

    /// Download `url` into the store. `None` means the ETag was still valid.
    async fn download(
        &self,
        url: &str,
        app: &AppRef,
        etag: Option<&str>,
        expected_size: Option<u64>,
    ) -> Result<Option<ContentKey>> {
        std::fs::create_dir_all(self.tmp_dir())?;
        std::fs::create_dir_all(self.tar_dir())?;

        let staged = tempfile::NamedTempFile::new_in(self.tmp_dir())?;
        let mut writer = HashingWriter::new(staged.reopen()?);
        let label = format!("Downloading {}", app.name);

        let new_etag = match self.client.download(url, &mut writer, etag, &label).await? {
            DownloadOutcome::NotModified => return Ok(None),
            DownloadOutcome::Downloaded { etag, bytes } => {
                if let Some(expected) = expected_size {
                    if expected != bytes {
                        return Err(BuildError::Network {
                            url: url.to_string(),
                            message: format!("size mismatch: expected {expected} bytes, got {bytes}"),
                        });
                    }
                }
                etag
            }
        };

        let (file, key) = writer.finish();
        file.sync_all()?;
        drop(file);

        let blob = self.blob_path(&key);
        if blob.exists() {
            // Same key, same bytes.
            drop(staged);
        } else {
            staged
                .persist(&blob)
                .map_err(|e| BuildError::Io(e.error))?;
        }

        self.remote().save(&RemoteRecord {
            aci_url: url.to_string(),
            etag: new_etag,
            download_time: Utc::now(),
            blob_key: key.clone(),
        })?;

        tracing::info!(name = %app, url = %url, key = %key.short(), "Stored image");
        Ok(Some(key))
    }

    /// Render the blob for `key` and return the expanded image directory.
    pub fn expand(&self, key: &ContentKey) -> Result<PathBuf> {
        let dest = self.expanded_dir().join(key.as_str());
        if dest.is_dir() {
            return Ok(dest);
        }
        let blob = self.blob_path(key);
        if !blob.is_file() {
            return Err(BuildError::not_found("image", key.as_str()));
        }

        let scratch = self
            .root
            .join(format!(".expanded-{}-{}", key.as_str(), std::process::id()));
        if scratch.exists() {
            std::fs::remove_dir_all(&scratch)?;
        }
        if let Err(e) = self.extractor.extract(&blob, &scratch, None) {
            let _ = std::fs::remove_dir_all(&scratch);
            return Err(e);
        }

        std::fs::create_dir_all(self.expanded_dir())?;
        match std::fs::rename(&scratch, &dest) {
            Ok(()) => {
                tracing::debug!(key = %key.short(), path = %dest.display(), "Expanded image");
            }
            Err(_) if dest.is_dir() => {
                // Another process rendered it first.
                let _ = std::fs::remove_dir_all(&scratch);
            }
            Err(e) => {
                let _ = std::fs::remove_dir_all(&scratch);
                return Err(e.into());
            }
        }
        Ok(dest)
    }

    /// Root filesystem of the image stored under `key`.
    pub fn expanded_root(&self, key: &ContentKey) -> Result<PathBuf> {
        Ok(self.expand(key)?.join("rootfs"))
    }

    pub fn manifest(&self, key: &ContentKey) -> Result<Manifest> {
        let expanded = self.expanded_dir().join(key.as_str()).join("manifest");
        if expanded.is_file() {
            return Manifest::load(&expanded);
        }
        let blob = self.blob_path(key);
        if !blob.is_file() {
            return Err(BuildError::not_found("image", key.as_str()));
        }
        let bytes = read_entry(&blob, "manifest")?.ok_or_else(|| BuildError::Extract {
            path: blob.clone(),
            message: "archive has no manifest".to_string(),
        })?;
        Manifest::from_slice(&bytes)
    }

    /// Keys of every stored blob, sorted.
    pub fn list_keys(&self) -> Result<Vec<ContentKey>> {
        let entries = match std::fs::read_dir(self.tar_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut keys = Vec::new();
        for entry in entries {
            let name = entry?.file_name();
            if let Some(key) = name.to_str().and_then(|n| ContentKey::parse(n).ok()) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Stored images with their manifests and fetch records.
    pub fn entries(&self) -> Result<Vec<StoreEntry>> {
        let remote = self.remote().all()?;
        let mut entries = Vec::new();
        for key in self.list_keys()? {
            let manifest = match self.manifest(&key) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(key = %key.short(), error = %e, "Skipping unreadable image");
                    continue;
                }
            };
            let size_bytes = std::fs::metadata(self.blob_path(&key))?.len();
            let record = remote.iter().find(|r| r.blob_key == key).cloned();
            entries.push(StoreEntry {
                key,
                manifest,
                size_bytes,
                remote: record,
            });
        }
        Ok(entries)
    }

    /// Key of the stored image named `name` carrying every label in `labels`.
    pub fn find_key(&self, name: &str, labels: &Labels) -> Result<ContentKey> {
        for key in self.list_keys()? {
            let Ok(manifest) = self.manifest(&key) else {
                continue;
            };
            if manifest.name.as_str() == name && manifest.labels.contains_all(labels) {
                return Ok(key);
            }
        }
        Err(BuildError::not_found("image", name))
    }

    pub fn delete(&self, key: &ContentKey) -> Result<()> {
        let blob = self.blob_path(key);
        if !blob.is_file() {
            return Err(BuildError::not_found("image", key.as_str()));
        }
        self.remote().remove_for_key(key)?;
        let expanded = self.expanded_dir().join(key.as_str());
        if expanded.exists() {
            std::fs::remove_dir_all(&expanded)?;
        }
        std::fs::remove_file(&blob)?;
        tracing::info!(key = %key.short(), "Removed image");
        Ok(())
    }

    pub fn delete_all(&self) -> Result<()> {
        for dir in [
            self.tar_dir(),
            self.expanded_dir(),
            self.root.join("remote"),
            self.tmp_dir(),
        ] {
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        tracing::info!(root = %self.root.display(), "Cleared image store");
        Ok(())
    }
}

/// Writer that hashes everything passing through it.
struct HashingWriter {
    inner: File,
    hasher: Sha512,
}

impl HashingWriter {
    fn new(inner: File) -> Self {
        Self {
            inner,
            hasher: Sha512::new(),
        }
    }

    fn finish(self) -> (File, ContentKey) {
        (self.inner, ContentKey::from_digest(&self.hasher.finalize()))
    }
}

impl Write for HashingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StaticDiscovery;
    use crate::testutil;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn store_for(root: &Path, url: String) -> ImageStore {
        ImageStore::new(
            root,
            Arc::new(StaticDiscovery::single(url)),
            RegistryClient::new(false).unwrap(),
            Arc::new(TarExtractor::new(false)),
            false,
        )
    }

    fn serve_image(bytes: Vec<u8>, etag: &str) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("ETag", etag)
            .set_body_bytes(bytes)
    }

    #[tokio::test]
    async fn test_fetch_stores_blob_and_record() {
        let server = MockServer::start().await;
        let manifest = testutil::manifest("example.com/base", "1.0");
        let bytes = testutil::aci_bytes(&manifest, &[("etc/os-release", b"base")]);
        Mock::given(method("GET"))
            .and(path("/base.aci"))
            .respond_with(serve_image(bytes.clone(), "\"v1\""))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let url = format!("{}/base.aci", server.uri());
        let store = store_for(tmp.path(), url.clone());
        let app = AppRef::parse("example.com/base:1.0").unwrap();

        let key = store.fetch(&app, None, false).await.unwrap();
        assert_eq!(key, ContentKey::from_digest(&Sha512::digest(&bytes)));
        assert_eq!(std::fs::read(store.blob_path(&key)).unwrap(), bytes);

        let record = store.remote().load(&url).unwrap().unwrap();
        assert_eq!(record.etag.as_deref(), Some("\"v1\""));
        assert_eq!(record.blob_key, key);
        assert_eq!(std::fs::read_dir(tmp.path().join("tmp")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_pinned_fetch_revalidates_with_etag() {
        let server = MockServer::start().await;
        let bytes = testutil::aci_bytes(&testutil::manifest("example.com/base", "1.0"), &[]);
        Mock::given(method("GET"))
            .and(path("/base.aci"))
            .and(|req: &Request| !req.headers.contains_key("if-none-match"))
            .respond_with(serve_image(bytes, "\"v1\""))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/base.aci"))
            .and(wiremock::matchers::header("If-None-Match", "\"v1\""))
            .respond_with(ResponseTemplate::new(304))
            .expect(1)
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let store = store_for(tmp.path(), format!("{}/base.aci", server.uri()));
        let app = AppRef::parse("example.com/base:1.0").unwrap();

        let first = store.fetch(&app, None, false).await.unwrap();
        let second = store.fetch(&app, None, false).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_latest_always_downloads() {
        let server = MockServer::start().await;
        let bytes = testutil::aci_bytes(&testutil::manifest("example.com/base", "latest"), &[]);
        Mock::given(method("GET"))
            .and(path("/base.aci"))
            .respond_with(serve_image(bytes, "\"v1\""))
            .expect(2)
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let store = store_for(tmp.path(), format!("{}/base.aci", server.uri()));
        let app = AppRef::parse("example.com/base").unwrap();

        store.fetch(&app, None, false).await.unwrap();
        store.fetch(&app, None, false).await.unwrap();
        assert_eq!(store.list_keys().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_size_mismatch_discards_download() {
        let server = MockServer::start().await;
        let bytes = testutil::aci_bytes(&testutil::manifest("example.com/base", "1.0"), &[]);
        Mock::given(method("GET"))
            .respond_with(serve_image(bytes.clone(), "\"v1\""))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let store = store_for(tmp.path(), format!("{}/base.aci", server.uri()));
        let app = AppRef::parse("example.com/base:1.0").unwrap();

        let err = store
            .fetch(&app, Some(bytes.len() as u64 + 1), false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("size mismatch"));
        assert!(store.list_keys().unwrap().is_empty());
        assert_eq!(std::fs::read_dir(tmp.path().join("tmp")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_expand_manifest_and_delete() {
        let server = MockServer::start().await;
        let manifest = testutil::manifest("example.com/base", "1.0");
        let bytes = testutil::aci_bytes(&manifest, &[("bin/sh", b"sh")]);
        Mock::given(method("GET"))
            .respond_with(serve_image(bytes, "\"v1\""))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let store = store_for(tmp.path(), format!("{}/base.aci", server.uri()));
        let key = store
            .fetch(&AppRef::parse("example.com/base:1.0").unwrap(), None, false)
            .await
            .unwrap();

        assert_eq!(store.manifest(&key).unwrap().name.as_str(), "example.com/base");
        let root = store.expanded_root(&key).unwrap();
        assert_eq!(std::fs::read(root.join("bin/sh")).unwrap(), b"sh");
        // Second render is a no-op
        assert_eq!(store.expanded_root(&key).unwrap(), root);

        let labels = Labels::from_pairs([("version", "1.0")]).unwrap();
        assert_eq!(store.find_key("example.com/base", &labels).unwrap(), key);
        assert!(store.find_key("example.com/other", &Labels::new()).is_err());

        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].remote.is_some());

        store.delete(&key).unwrap();
        assert!(!store.has_blob(&key));
        assert!(!root.exists());
        assert_eq!(
            store.delete(&key).unwrap_err().kind(),
            acb_core::ErrorKind::NotFound
        );
    }

    #[test]
    fn test_missing_key_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = store_for(tmp.path(), "http://unused/".to_string());
        let key = ContentKey::from_digest(&Sha512::digest(b"nothing"));
        assert_eq!(
            store.expanded_root(&key).unwrap_err().kind(),
            acb_core::ErrorKind::NotFound
        );
        assert_eq!(store.manifest(&key).unwrap_err().kind(), acb_core::ErrorKind::NotFound);
        assert!(store.list_keys().unwrap().is_empty());
    }

    #[test]
    fn test_delete_all_clears_everything() {
        let tmp = TempDir::new().unwrap();
        let store = store_for(tmp.path(), "http://unused/".to_string());
        let manifest = testutil::manifest("example.com/base", "1.0");
        let bytes = testutil::aci_bytes(&manifest, &[]);
        let key = ContentKey::from_digest(&Sha512::digest(&bytes));
        std::fs::create_dir_all(store.tar_dir()).unwrap();
        std::fs::write(store.blob_path(&key), &bytes).unwrap();
        store.expand(&key).unwrap();

        store.delete_all().unwrap();
        assert!(store.list_keys().unwrap().is_empty());
        assert!(!tmp.path().join("expanded").exists());
        store.delete_all().unwrap();
    }
}
