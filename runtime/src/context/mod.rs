//! The build context: one in-progress image and the operations that edit it.
//!
//! Every mutating operation holds the context lock for its whole duration.
//! Manifest edits go through [`BuildContext::modify_manifest`], which loads,
//! applies a pure edit and saves atomically under the lock.

pub mod layout;
pub mod lock;

use std::path::{Path, PathBuf};

use acb_core::error::{BuildError, Result};
use acb_core::BuildConfig;

use crate::aci::{
    write_aci, AcIdentifier, AcName, AppRef, Dependency, ImageId, Labels, Manifest,
};
use crate::compose::{flatten, is_mount_point, reset_dir, swap_into, LayerStack, OverlayMount};
use crate::exec::{find_in_root, mirror_localtime, NspawnCommand};
use crate::host_check::{ensure_overlay_support, require_root, systemd_version, NSPAWN_QUIET_MIN_VERSION};
use crate::resolve::Resolver;
use crate::sign::Signer;
use crate::store::ImageStore;
use crate::upload::Uploader;

pub use layout::ContextPaths;
pub use lock::ContextLock;

/// Squashed manifest written next to `manifest` before the rootfs swap.
const STAGED_MANIFEST: &str = "manifest.squashed";

pub struct BuildContext {
    config: BuildConfig,
    paths: ContextPaths,
    store: ImageStore,
}

impl BuildContext {
    /// Context for `config` using the default image store.
    pub fn open(config: &BuildConfig) -> Result<Self> {
        Ok(Self::with_store(config, ImageStore::open(config)?))
    }

    pub fn with_store(config: &BuildConfig, store: ImageStore) -> Self {
        Self {
            config: config.clone(),
            paths: ContextPaths::new(&config.context_dir),
            store,
        }
    }

    pub fn paths(&self) -> &ContextPaths {
        &self.paths
    }

    pub fn store(&self) -> &ImageStore {
        &self.store
    }

    fn require_build(&self) -> Result<()> {
        if self.paths.in_progress() {
            Ok(())
        } else {
            Err(BuildError::validation(format!(
                "build not in progress in {}, run `acb begin` first",
                self.config.work_dir.display()
            )))
        }
    }

    fn acquire(&self) -> Result<ContextLock> {
        ContextLock::acquire(&self.paths.lock())
    }

    /// Start a new build.
    ///
    /// `start` is empty (blank image), a local archive path beginning with
    /// `.` or `/`, or a remote image reference.
    pub async fn begin(&self, start: Option<&str>) -> Result<()> {
        let root = self.paths.root().to_path_buf();
        if self.paths.in_progress() {
            return Err(BuildError::AlreadyInProgress { path: root });
        }

        let created = !root.exists();
        std::fs::create_dir_all(&root)?;

        let lock = match self.acquire() {
            Ok(lock) => lock,
            Err(BuildError::LockHeld { .. }) => {
                return Err(BuildError::AlreadyInProgress { path: root });
            }
            Err(e) => {
                if created {
                    if let Err(e) = remove_path(&root) {
                        tracing::warn!(error = %e, "Failed to remove build context after failed begin");
                    }
                }
                return Err(e);
            }
        };

        // Another begin may have finished between the first check and the lock.
        if self.paths.in_progress() {
            return lock.finish(Err(BuildError::AlreadyInProgress { path: root }));
        }

        let result = self.begin_locked(start).await;
        if result.is_err() {
            self.discard_failed_begin(created);
        }
        lock.finish(result)
    }

    async fn begin_locked(&self, start: Option<&str>) -> Result<()> {
        let current = self.paths.current_aci();
        match start {
            None => {
                std::fs::create_dir_all(self.paths.rootfs())?;
                Manifest::placeholder()?.save(&self.paths.manifest())?;
            }
            Some(path) if path.starts_with('.') || path.starts_with('/') => {
                let archive = self.config.work_dir.join(path);
                let meta = std::fs::metadata(&archive).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        BuildError::not_found("start image", path)
                    } else {
                        e.into()
                    }
                })?;
                if meta.is_dir() {
                    return Err(BuildError::validation(format!(
                        "provided starting image is a directory: {path}"
                    )));
                }
                self.store.extractor().extract(&archive, &current, None)?;
            }
            Some(reference) => {
                let app = AppRef::parse(reference)?;
                let key = self.store.fetch(&app, None, false).await?;
                self.store
                    .extractor()
                    .extract(&self.store.blob_path(&key), &current, None)?;
            }
        }

        // Fail now on an unusable start image rather than on the first edit.
        Manifest::load(&self.paths.manifest())?;
        std::fs::create_dir_all(self.paths.rootfs())?;

        tracing::info!(path = %current.display(), start = ?start, "Began build");
        Ok(())
    }

    /// Remove what a failed begin left behind. Called with the lock held.
    ///
    /// `currentaci` did not exist when the lock was taken, so it is ours.
    /// The context directory goes too when this begin created it.
    fn discard_failed_begin(&self, created: bool) {
        let path = if created {
            self.paths.root().to_path_buf()
        } else {
            self.paths.current_aci()
        };
        if let Err(e) = remove_path(&path) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to clean up after begin");
        }
    }

    /// Remove the current build, keeping the dependency store.
    pub fn end(&self) -> Result<()> {
        self.require_build()?;
        let lock = self.acquire()?;
        let result = (|| -> Result<()> {
            remove_path(&self.paths.current_aci())?;
            remove_path(&self.paths.overlay_target())?;
            remove_path(&self.paths.overlay_work())?;
            tracing::info!(path = %self.paths.root().display(), "Ended build");
            Ok(())
        })();
        lock.finish(result)
    }

    /// Current manifest, read without locking.
    pub fn manifest(&self) -> Result<Manifest> {
        self.require_build()?;
        Manifest::load(&self.paths.manifest())
    }

    /// Lock, load, apply `edit`, save, unlock.
    ///
    /// Nothing is written if `edit` fails.
    pub fn modify_manifest<F>(&self, edit: F) -> Result<Manifest>
    where
        F: FnOnce(&Manifest) -> Result<Manifest>,
    {
        self.require_build()?;
        let lock = self.acquire()?;
        let result = (|| -> Result<Manifest> {
            let path = self.paths.manifest();
            let next = edit(&Manifest::load(&path)?)?;
            next.save(&path)?;
            Ok(next)
        })();
        lock.finish(result)
    }

    /// Add (or replace) a dependency, merging its path whitelist.
    pub async fn add_dependency(
        &self,
        name: &str,
        image_id: Option<&str>,
        labels: Labels,
        size: Option<u64>,
    ) -> Result<Manifest> {
        let mut dependency = Dependency::new(AcIdentifier::new(name)?);
        dependency.image_id = image_id.map(ImageId::parse).transpose()?;
        dependency.labels = labels;
        dependency.size = size;

        self.require_build()?;
        let lock = self.acquire()?;
        let result = self.add_dependency_locked(dependency).await;
        lock.finish(result)
    }

    async fn add_dependency_locked(&self, dependency: Dependency) -> Result<Manifest> {
        let app = AppRef::new(dependency.image_name.clone(), dependency.labels.clone());
        let key = self.store.fetch(&app, dependency.size, false).await?;
        if let Some(expected) = &dependency.image_id {
            if !expected.matches(&key) {
                return Err(BuildError::validation(format!(
                    "image id mismatch for {app}: expected {expected}, got {key}"
                )));
            }
        }
        let whitelist = self.store.manifest(&key)?.path_whitelist;

        let path = self.paths.manifest();
        let next = Manifest::load(&path)?
            .with_path_whitelist(whitelist)?
            .with_dependency(dependency)?;
        next.save(&path)?;
        tracing::info!(dependency = %app, key = %key.short(), "Added dependency");
        Ok(next)
    }

    pub fn remove_dependency(&self, name: &str) -> Result<Manifest> {
        AcIdentifier::new(name)?;
        self.modify_manifest(|m| m.without_dependency(name))
    }

    pub fn add_mount(&self, name: &str, path: &str, read_only: bool) -> Result<Manifest> {
        AcName::new(name)?;
        self.modify_manifest(|m| m.with_mount_point(name, path, read_only))
    }

    pub fn remove_mount(&self, name: &str) -> Result<Manifest> {
        self.modify_manifest(|m| m.without_mount_point(name))
    }

    pub fn set_name(&self, name: &str) -> Result<Manifest> {
        if name.is_empty() {
            return Err(BuildError::validation("name cannot be empty"));
        }
        AcIdentifier::new(name)?;
        self.modify_manifest(|m| m.with_name(name))
    }

    pub fn add_label(&self, name: &str, value: &str) -> Result<Manifest> {
        AcIdentifier::new(name)?;
        self.modify_manifest(|m| m.with_label(name, value))
    }

    pub fn remove_label(&self, name: &str) -> Result<Manifest> {
        self.modify_manifest(|m| m.without_label(name))
    }

    pub fn add_env(&self, name: &str, value: &str) -> Result<Manifest> {
        self.modify_manifest(|m| m.with_env(name, value))
    }

    pub fn remove_env(&self, name: &str) -> Result<Manifest> {
        self.modify_manifest(|m| m.without_env(name))
    }

    pub fn set_exec(&self, exec: Vec<String>) -> Result<Manifest> {
        self.modify_manifest(|m| m.with_exec(exec))
    }

    /// Pack the current build into `output`, optionally signing it.
    ///
    /// Returns the signature path when a signer was given.
    pub fn write(&self, output: &Path, signer: Option<&dyn Signer>) -> Result<Option<PathBuf>> {
        self.require_build()?;
        let lock = self.acquire()?;
        let result = (|| -> Result<Option<PathBuf>> {
            let manifest = Manifest::load(&self.paths.manifest())?;
            if manifest.is_placeholder_name() {
                tracing::warn!(
                    name = %manifest.name,
                    "Writing an image that still has the default name, set one with `acb set-name`"
                );
            }
            write_aci(&self.paths.current_aci(), output, self.config.overwrite)?;
            tracing::info!(output = %output.display(), name = %manifest.name, "Wrote image");
            signer.map(|s| s.sign(output)).transpose()
        })();
        lock.finish(result)
    }

    /// Write, optionally sign, then hand the result to `uploader`.
    pub async fn push(
        &self,
        output: &Path,
        signer: Option<&dyn Signer>,
        uploader: &dyn Uploader,
        destination: &str,
    ) -> Result<()> {
        let signature = self.write(output, signer)?;
        uploader
            .upload(output, signature.as_deref(), destination)
            .await?;
        tracing::info!(output = %output.display(), destination = %destination, "Pushed image");
        Ok(())
    }

    /// Merge every dependency into the rootfs and drop the dependency list.
    pub async fn squash(&self) -> Result<()> {
        self.require_build()?;
        require_root("squash")?;
        let lock = self.acquire()?;
        let result = self.squash_locked().await;
        lock.finish(result)
    }

    async fn squash_locked(&self) -> Result<()> {
        let manifest_path = self.paths.manifest();
        let manifest = Manifest::load(&manifest_path)?;
        if manifest.dependencies.is_empty() {
            tracing::info!("No dependencies to squash");
            return Ok(());
        }

        let roots = Resolver::new(&self.store).resolve(&manifest).await?;
        let stack = LayerStack::new(roots, self.paths.rootfs());
        let target = self.paths.overlay_target();
        let park = self.paths.overlay_work();
        let staged = self.paths.current_aci().join(STAGED_MANIFEST);
        let squashed = manifest.without_dependencies()?;

        // The manifest rename happens inside the swap so both land or neither does.
        let result = flatten(&stack, &target)
            .and_then(|_| squashed.save(&staged))
            .and_then(|_| {
                swap_into(&target, &self.paths.rootfs(), &park, || {
                    std::fs::rename(&staged, &manifest_path).map_err(Into::into)
                })
            });
        if result.is_err() {
            if let Err(e) = remove_path(&staged) {
                tracing::warn!(path = %staged.display(), error = %e, "Failed to remove staged manifest");
            }
        }
        self.clean_scratch();

        if result.is_ok() {
            tracing::info!(layers = stack.lower.len(), "Squashed dependencies into rootfs");
        }
        result
    }

    /// Run `command` inside the current build layered over its dependencies.
    pub async fn run(&self, command: Vec<String>) -> Result<()> {
        if command.is_empty() {
            return Err(BuildError::validation("command to run not set"));
        }
        self.require_build()?;
        require_root("run")?;
        let lock = self.acquire()?;
        let result = self.run_locked(command).await;
        self.clean_scratch();
        lock.finish(result)
    }

    async fn run_locked(&self, command: Vec<String>) -> Result<()> {
        let manifest = Manifest::load(&self.paths.manifest())?;
        let rootfs = self.paths.rootfs();
        let target = self.paths.overlay_target();
        let work = self.paths.overlay_work();
        reset_dir(&target)?;
        reset_dir(&work)?;

        if !manifest.dependencies.is_empty() {
            ensure_overlay_support()?;
        }
        let roots = Resolver::new(&self.store).resolve(&manifest).await?;
        let stack = LayerStack::new(roots, &rootfs);

        let quiet = systemd_version()? >= NSPAWN_QUIET_MIN_VERSION;
        mirror_localtime(&rootfs)?;

        let mount = if stack.is_single() {
            None
        } else {
            Some(OverlayMount::mount(&stack, &work, &target)?)
        };
        let root = mount
            .as_ref()
            .map(|m| m.target().to_path_buf())
            .unwrap_or_else(|| rootfs.clone());

        let mut argv = command;
        argv[0] = find_in_root(&argv[0], &root)?;
        let result = NspawnCommand::new(&root, argv)?
            .quiet(quiet)
            .environment(manifest.environment())
            .run()
            .await;

        let unmounted = match mount {
            Some(mount) => mount.unmount(),
            None => Ok(()),
        };
        result.and(unmounted)
    }

    /// Remove the overlay scratch directories.
    ///
    /// Both are left in place while an overlay is still attached to the
    /// target, since removing through the mount would delete the rootfs.
    fn clean_scratch(&self) {
        let target = self.paths.overlay_target();
        if is_mount_point(&target) {
            tracing::warn!(
                path = %target.display(),
                "Overlay still mounted, leaving scratch directories in place"
            );
            return;
        }
        for dir in [target, self.paths.overlay_work()] {
            if let Err(e) = remove_path(&dir) {
                tracing::warn!(path = %dir.display(), error = %e, "Failed to remove scratch directory");
            }
        }
    }
}

fn remove_path(path: &Path) -> Result<()> {
    crate::compose::flatten::remove_if_exists(path)
}
