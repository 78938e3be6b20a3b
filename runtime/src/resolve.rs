//! Transitive dependency resolution.
//!
//! Produces the root filesystems of every dependency, lowest layer first:
//! each dependency's own dependencies come before it, and siblings keep
//! manifest order.

use std::collections::HashSet;
use std::path::PathBuf;

use acb_core::error::{BuildError, Result};
use futures::future::BoxFuture;

use crate::aci::{AppRef, Dependency, Manifest};
use crate::store::ImageStore;

pub struct Resolver<'a> {
    store: &'a ImageStore,
}

#[derive(Default)]
struct Walk {
    /// Dependencies on the current path, outermost first.
    in_progress: Vec<String>,
    completed: HashSet<String>,
    roots: Vec<PathBuf>,
}

impl<'a> Resolver<'a> {
    pub fn new(store: &'a ImageStore) -> Self {
        Self { store }
    }

    /// Fetch every dependency of `manifest` and return their roots in layer order.
    pub async fn resolve(&self, manifest: &Manifest) -> Result<Vec<PathBuf>> {
        let mut walk = Walk::default();
        for dep in &manifest.dependencies {
            self.visit(dep, &mut walk).await?;
        }
        tracing::debug!(layers = walk.roots.len(), "Resolved dependencies");
        Ok(walk.roots)
    }

    fn visit<'b>(&'b self, dep: &'b Dependency, walk: &'b mut Walk) -> BoxFuture<'b, Result<()>> {
        Box::pin(async move {
            let app = AppRef::new(dep.image_name.clone(), dep.labels.clone());
            let id = match &dep.image_id {
                Some(image_id) => format!("{app}@{image_id}"),
                None => app.to_string(),
            };

            if walk.completed.contains(&id) {
                return Ok(());
            }
            if let Some(pos) = walk.in_progress.iter().position(|p| p == &id) {
                let mut chain = walk.in_progress[pos..].to_vec();
                chain.push(id);
                return Err(BuildError::DependencyCycle { chain });
            }
            walk.in_progress.push(id.clone());

            let key = self.store.fetch(&app, dep.size, false).await?;
            if let Some(expected) = &dep.image_id {
                if !expected.matches(&key) {
                    return Err(BuildError::validation(format!(
                        "image id mismatch for {app}: expected {expected}, got {key}"
                    )));
                }
            }

            let manifest = self.store.manifest(&key)?;
            for child in &manifest.dependencies {
                self.visit(child, walk).await?;
            }

            walk.roots.push(self.store.expanded_root(&key)?);
            walk.in_progress.pop();
            walk.completed.insert(id);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aci::{ContentKey, ImageId, TarExtractor};
    use crate::registry::{Discovery, Endpoint, RegistryClient};
    use crate::testutil;
    use async_trait::async_trait;
    use sha2::{Digest, Sha512};
    use std::sync::Arc;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Maps `example.com/<x>` to `<server>/<x>.aci`.
    struct PathDiscovery {
        base: String,
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

    async fn serve(server: &MockServer, name: &str, deps: &[&str]) -> Vec<u8> {
        let mut manifest = testutil::manifest(&format!("example.com/{name}"), "1");
        for dep in deps {
            manifest = manifest
                .with_dependency(testutil::dependency(&format!("example.com/{dep}"), "1"))
                .unwrap();
        }
        let marker = format!("{name}-marker");
        let bytes = testutil::aci_bytes(&manifest, &[(marker.as_str(), name.as_bytes())]);
        Mock::given(method("GET"))
            .and(path(format!("/{name}.aci")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes.clone()))
            .mount(server)
            .await;
        bytes
    }

    fn store(root: &std::path::Path, server: &MockServer) -> ImageStore {
        ImageStore::new(
            root,
            Arc::new(PathDiscovery { base: server.uri() }),
            RegistryClient::new(false).unwrap(),
            Arc::new(TarExtractor::new(false)),
            false,
        )
    }

    fn layer_names(roots: &[PathBuf]) -> Vec<String> {
        roots
            .iter()
            .map(|root| {
                let marker = std::fs::read_dir(root)
                    .unwrap()
                    .map(|e| e.unwrap().file_name().into_string().unwrap())
                    .find(|n| n.ends_with("-marker"))
                    .unwrap();
                marker.trim_end_matches("-marker").to_string()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_no_dependencies_is_empty() {
        let server = MockServer::start().await;
        let tmp = TempDir::new().unwrap();
        let store = store(tmp.path(), &server);
        let roots = Resolver::new(&store)
            .resolve(&Manifest::placeholder().unwrap())
            .await
            .unwrap();
        assert!(roots.is_empty());
    }

    #[tokio::test]
    async fn test_transitive_dependencies_come_first() {
        let server = MockServer::start().await;
        serve(&server, "libc", &[]).await;
        serve(&server, "python", &["libc"]).await;
        serve(&server, "tools", &[]).await;

        let tmp = TempDir::new().unwrap();
        let store = store(tmp.path(), &server);
        let manifest = Manifest::placeholder()
            .unwrap()
            .with_dependency(testutil::dependency("example.com/python", "1"))
            .unwrap()
            .with_dependency(testutil::dependency("example.com/tools", "1"))
            .unwrap();

        let roots = Resolver::new(&store).resolve(&manifest).await.unwrap();
        assert_eq!(layer_names(&roots), vec!["libc", "python", "tools"]);
    }

    #[tokio::test]
    async fn test_diamond_appears_once() {
        let server = MockServer::start().await;
        serve(&server, "base", &[]).await;
        serve(&server, "left", &["base"]).await;
        serve(&server, "right", &["base"]).await;

        let tmp = TempDir::new().unwrap();
        let store = store(tmp.path(), &server);
        let manifest = Manifest::placeholder()
            .unwrap()
            .with_dependency(testutil::dependency("example.com/left", "1"))
            .unwrap()
            .with_dependency(testutil::dependency("example.com/right", "1"))
            .unwrap();

        let roots = Resolver::new(&store).resolve(&manifest).await.unwrap();
        assert_eq!(layer_names(&roots), vec!["base", "left", "right"]);
    }

    #[tokio::test]
    async fn test_cycle_is_rejected() {
        let server = MockServer::start().await;
        serve(&server, "a", &["b"]).await;
        serve(&server, "b", &["a"]).await;

        let tmp = TempDir::new().unwrap();
        let store = store(tmp.path(), &server);
        let manifest = Manifest::placeholder()
            .unwrap()
            .with_dependency(testutil::dependency("example.com/a", "1"))
            .unwrap();

        let err = Resolver::new(&store).resolve(&manifest).await.unwrap_err();
        assert_eq!(err.kind(), acb_core::ErrorKind::DependencyCycle);
        assert!(err.to_string().contains("example.com/a:1 -> example.com/b:1 -> example.com/a:1"));
    }

    #[tokio::test]
    async fn test_image_id_is_verified() {
        let server = MockServer::start().await;
        let bytes = serve(&server, "base", &[]).await;

        let tmp = TempDir::new().unwrap();
        let store = store(tmp.path(), &server);

        let mut good = testutil::dependency("example.com/base", "1");
        let key = ContentKey::from_digest(&Sha512::digest(&bytes));
        good.image_id = Some(key.clone().into());
        let manifest = Manifest::placeholder().unwrap().with_dependency(good).unwrap();
        assert_eq!(Resolver::new(&store).resolve(&manifest).await.unwrap().len(), 1);

        let mut truncated = testutil::dependency("example.com/base", "1");
        truncated.image_id = Some(ImageId::parse(&key.as_str()[..23]).unwrap());
        let manifest = Manifest::placeholder().unwrap().with_dependency(truncated).unwrap();
        assert_eq!(Resolver::new(&store).resolve(&manifest).await.unwrap().len(), 1);

        let mut bad = testutil::dependency("example.com/base", "1");
        bad.image_id = Some(ContentKey::from_digest(&Sha512::digest(b"other")).into());
        let manifest = Manifest::placeholder().unwrap().with_dependency(bad).unwrap();
        let err = Resolver::new(&store).resolve(&manifest).await.unwrap_err();
        assert!(err.to_string().contains("image id mismatch"));
    }
}
