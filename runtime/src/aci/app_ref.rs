//! Remote image references: `name[:version][,label=value...]`.

use std::fmt;
use std::str::FromStr;

use acb_core::error::{BuildError, Result};

use super::types::{AcIdentifier, Labels, VERSION_LABEL};

/// An image name plus the labels that select one build of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppRef {
    pub name: AcIdentifier,
    pub labels: Labels,
}

impl AppRef {
    pub fn new(name: AcIdentifier, labels: Labels) -> Self {
        Self { name, labels }
    }

    /// Parse a textual reference.
    ///
    /// ```text
    /// example.com/app
    /// example.com/app:1.2.0
    /// example.com/app:1.2.0,os=linux,arch=amd64
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        if input.starts_with("docker://") {
            return Err(BuildError::validation(
                "docker images are not supported as dependencies or base images",
            ));
        }

        let mut parts = input.split(',');
        let head = parts.next().unwrap_or_default();
        let (name, version) = match head.split_once(':') {
            Some((name, version)) => (name, Some(version)),
            None => (head, None),
        };

        let name = AcIdentifier::new(name)?;
        let mut labels = Labels::new();

        for part in parts {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                BuildError::validation(format!("invalid label {part:?}: expected name=value"))
            })?;
            let key = AcIdentifier::new(key)?;
            if labels.get(key.as_str()).is_some() {
                return Err(BuildError::validation(format!("duplicate label {key}")));
            }
            labels.set(key, value);
        }

        if let Some(version) = version {
            if version.is_empty() {
                return Err(BuildError::validation(format!(
                    "invalid image reference {input:?}: empty version"
                )));
            }
            if labels.get(VERSION_LABEL).is_some() {
                return Err(BuildError::validation(format!(
                    "invalid image reference {input:?}: version given twice"
                )));
            }
            labels.set(AcIdentifier::new(VERSION_LABEL)?, version);
        }

        Ok(Self { name, labels })
    }
}

impl FromStr for AppRef {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for AppRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(version) = self.labels.get(VERSION_LABEL) {
            write!(f, ":{version}")?;
        }
        for label in self.labels.iter().filter(|l| l.name.as_str() != VERSION_LABEL) {
            write!(f, ",{}={}", label.name, label.value)?;
        }
        Ok(())
    }
}
