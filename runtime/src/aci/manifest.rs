//! Image manifest model and its pure edit operations.
//!
//! Every `with_*`/`without_*` method validates its input and returns an
//! edited copy, leaving `self` untouched on error. Unknown JSON fields are
//! carried through `extra` so a load/save round trip loses nothing.

use std::path::Path;

use acb_core::error::{BuildError, Result};
use acb_core::{host_arch, host_os};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::types::{AcIdentifier, AcName, ImageId, Labels};

/// `acKind` of an image manifest.
pub const IMAGE_MANIFEST_KIND: &str = "ImageManifest";

/// Schema version written into new manifests.
pub const AC_VERSION: &str = "0.8.11";

/// Name given to a fresh build until `set_name` is called.
pub const PLACEHOLDER_NAME: &str = "acbuild-unnamed";

/// A dependency on another image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub image_name: AcIdentifier,
    #[serde(rename = "imageID", default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<ImageId>,
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl Dependency {
    pub fn new(image_name: AcIdentifier) -> Self {
        Self {
            image_name,
            image_id: None,
            labels: Labels::new(),
            size: None,
        }
    }
}

/// A named mount point inside the app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountPoint {
    pub name: AcName,
    pub path: String,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub name: AcIdentifier,
    pub value: String,
}

/// Process description of a runnable image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct App {
    #[serde(default)]
    pub exec: Vec<String>,
    pub user: String,
    pub group: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<EnvironmentVariable>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mount_points: Vec<MountPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for App {
    fn default() -> Self {
        Self {
            exec: Vec::new(),
            user: "0".to_string(),
            group: "0".to_string(),
            environment: Vec::new(),
            mount_points: Vec::new(),
            working_directory: None,
            extra: Map::new(),
        }
    }
}

/// appc image manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub ac_kind: String,
    pub ac_version: String,
    pub name: AcIdentifier,
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<App>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path_whitelist: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Manifest {
    /// Manifest for a fresh build: placeholder name, host `os`/`arch` labels.
    pub fn placeholder() -> Result<Self> {
        let labels = Labels::from_pairs([("arch", host_arch()), ("os", host_os())])?;
        Ok(Self {
            ac_kind: IMAGE_MANIFEST_KIND.to_string(),
            ac_version: AC_VERSION.to_string(),
            name: AcIdentifier::new(PLACEHOLDER_NAME)?,
            labels,
            app: None,
            dependencies: Vec::new(),
            path_whitelist: Vec::new(),
            annotations: Vec::new(),
            extra: Map::new(),
        })
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let manifest: Manifest = serde_json::from_slice(bytes)?;
        if manifest.ac_kind != IMAGE_MANIFEST_KIND {
            return Err(BuildError::Serialization(format!(
                "unexpected acKind {:?}, expected {IMAGE_MANIFEST_KIND}",
                manifest.ac_kind
            )));
        }
        Ok(manifest)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BuildError::not_found(
                    "manifest",
                    path.display().to_string(),
                ))
            }
            Err(e) => return Err(e.into()),
        };
        Self::from_slice(&bytes)
    }

    /// Write atomically: serialize to `<path>.tmp`, then rename over `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, &data)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    pub fn is_placeholder_name(&self) -> bool {
        self.name.as_str() == PLACEHOLDER_NAME
    }

    /// Add a dependency, dropping any earlier entry of the same name.
    ///
    /// The new entry always lands at the tail.
    pub fn with_dependency(&self, dependency: Dependency) -> Result<Self> {
        let mut next = self.clone();
        next.dependencies
            .retain(|d| d.image_name != dependency.image_name);
        next.dependencies.push(dependency);
        Ok(next)
    }

    pub fn without_dependency(&self, name: &str) -> Result<Self> {
        let mut next = self.clone();
        let before = next.dependencies.len();
        next.dependencies.retain(|d| d.image_name.as_str() != name);
        if next.dependencies.len() == before {
            return Err(BuildError::not_found("dependency", name));
        }
        Ok(next)
    }

    pub fn without_dependencies(&self) -> Result<Self> {
        let mut next = self.clone();
        next.dependencies.clear();
        Ok(next)
    }

    /// Merge paths into the whitelist, skipping ones already listed.
    pub fn with_path_whitelist<I, S>(&self, paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut next = self.clone();
        for path in paths {
            let path = path.into();
            if !next.path_whitelist.contains(&path) {
                next.path_whitelist.push(path);
            }
        }
        Ok(next)
    }

    /// Add a mount point, replacing one with the same name.
    pub fn with_mount_point(&self, name: &str, path: &str, read_only: bool) -> Result<Self> {
        let name = AcName::new(name)?;
        if path.is_empty() {
            return Err(BuildError::validation("mount point path cannot be empty"));
        }
        let mut next = self.clone();
        let app = next.app.get_or_insert_with(App::default);
        app.mount_points.retain(|m| m.name != name);
        app.mount_points.push(MountPoint {
            name,
            path: path.to_string(),
            read_only,
        });
        Ok(next)
    }

    pub fn without_mount_point(&self, name: &str) -> Result<Self> {
        let mut next = self.clone();
        let app = next
            .app
            .as_mut()
            .ok_or_else(|| BuildError::not_found("mount point", name))?;
        let before = app.mount_points.len();
        app.mount_points.retain(|m| m.name.as_str() != name);
        if app.mount_points.len() == before {
            return Err(BuildError::not_found("mount point", name));
        }
        Ok(next)
    }

    pub fn with_name(&self, name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(BuildError::validation("name cannot be empty"));
        }
        let mut next = self.clone();
        next.name = AcIdentifier::new(name)?;
        Ok(next)
    }

    pub fn with_label(&self, name: &str, value: &str) -> Result<Self> {
        let name = AcIdentifier::new(name)?;
        let mut next = self.clone();
        next.labels.set(name, value);
        Ok(next)
    }

    pub fn without_label(&self, name: &str) -> Result<Self> {
        let mut next = self.clone();
        if !next.labels.remove(name) {
            return Err(BuildError::not_found("label", name));
        }
        Ok(next)
    }

    /// Set an environment variable, keeping its position if already present.
    pub fn with_env(&self, name: &str, value: &str) -> Result<Self> {
        if name.is_empty() || name.contains('=') {
            return Err(BuildError::validation(format!(
                "invalid environment variable name {name:?}"
            )));
        }
        let mut next = self.clone();
        let app = next.app.get_or_insert_with(App::default);
        match app.environment.iter_mut().find(|e| e.name == name) {
            Some(existing) => existing.value = value.to_string(),
            None => app.environment.push(EnvironmentVariable {
                name: name.to_string(),
                value: value.to_string(),
            }),
        }
        Ok(next)
    }

    pub fn without_env(&self, name: &str) -> Result<Self> {
        let mut next = self.clone();
        let app = next
            .app
            .as_mut()
            .ok_or_else(|| BuildError::not_found("environment variable", name))?;
        let before = app.environment.len();
        app.environment.retain(|e| e.name != name);
        if app.environment.len() == before {
            return Err(BuildError::not_found("environment variable", name));
        }
        Ok(next)
    }

    pub fn with_exec(&self, exec: Vec<String>) -> Result<Self> {
        if exec.first().is_some_and(|cmd| cmd.is_empty()) {
            return Err(BuildError::validation("exec command cannot be empty"));
        }
        let mut next = self.clone();
        next.app.get_or_insert_with(App::default).exec = exec;
        Ok(next)
    }

    /// Environment of the app, empty when there is no app.
    pub fn environment(&self) -> &[EnvironmentVariable] {
        self.app
            .as_ref()
            .map(|a| a.environment.as_slice())
            .unwrap_or_default()
    }
}
