//! Validated identifier types and label sets used by image manifests.

use std::fmt;
use std::sync::LazyLock;

use acb_core::error::{BuildError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

static AC_IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+([-._~/][a-z0-9]+)*$").expect("valid regex"));

static AC_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").expect("valid regex"));

/// Label that carries the image version.
pub const VERSION_LABEL: &str = "version";

/// Version assumed when no version label is present.
pub const LATEST_VERSION: &str = "latest";

/// Image name or label name: lowercase segments joined by `-`, `.`, `_`, `~` or `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AcIdentifier(String);

impl AcIdentifier {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(BuildError::validation("identifier cannot be empty"));
        }
        if !AC_IDENTIFIER.is_match(&value) {
            return Err(BuildError::validation(format!(
                "invalid identifier {value:?}: must be lowercase alphanumeric segments separated by one of \"-._~/\""
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AcIdentifier {
    type Error = BuildError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<AcIdentifier> for String {
    fn from(id: AcIdentifier) -> Self {
        id.0
    }
}

impl fmt::Display for AcIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mount point name: lowercase alphanumeric segments joined by `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AcName(String);

impl AcName {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(BuildError::validation("name cannot be empty"));
        }
        if !AC_NAME.is_match(&value) {
            return Err(BuildError::validation(format!(
                "invalid name {value:?}: must be lowercase alphanumeric segments separated by \"-\""
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AcName {
    type Error = BuildError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<AcName> for String {
    fn from(name: AcName) -> Self {
        name.0
    }
}

impl fmt::Display for AcName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Digest of an image archive: `sha512-` followed by 128 lowercase hex digits.
///
/// Keys the image store. Manifests carry the looser [`ImageId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentKey(String);

impl ContentKey {
    pub const PREFIX: &'static str = "sha512-";

    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let hex = value.strip_prefix(Self::PREFIX).ok_or_else(|| {
            BuildError::validation(format!("invalid image id {value:?}: must start with sha512-"))
        })?;
        if hex.len() != 128 || !hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(BuildError::validation(format!(
                "invalid image id {value:?}: expected 128 lowercase hex digits"
            )));
        }
        Ok(Self(value))
    }

    /// Key for a finished SHA-512 digest.
    pub fn from_digest(digest: &[u8]) -> Self {
        Self(format!("{}{}", Self::PREFIX, hex::encode(digest)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for display.
    pub fn short(&self) -> &str {
        let end = (Self::PREFIX.len() + 12).min(self.0.len());
        &self.0[..end]
    }
}

impl TryFrom<String> for ContentKey {
    type Error = BuildError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<ContentKey> for String {
    fn from(key: ContentKey) -> Self {
        key.0
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A dependency's `imageID`: `sha512-` and a non-empty prefix of the digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageId(String);

impl ImageId {
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let hex = value.strip_prefix(ContentKey::PREFIX).ok_or_else(|| {
            BuildError::validation(format!("invalid image id {value:?}: must start with sha512-"))
        })?;
        if hex.is_empty()
            || hex.len() > 128
            || !hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return Err(BuildError::validation(format!(
                "invalid image id {value:?}: expected 1 to 128 lowercase hex digits"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `key` is the image this id names.
    pub fn matches(&self, key: &ContentKey) -> bool {
        key.as_str().starts_with(self.0.as_str())
    }
}

impl From<ContentKey> for ImageId {
    fn from(key: ContentKey) -> Self {
        Self(key.0)
    }
}

impl TryFrom<String> for ImageId {
    type Error = BuildError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<ImageId> for String {
    fn from(id: ImageId) -> Self {
        id.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single key/value label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: AcIdentifier,
    pub value: String,
}

/// Ordered label set with unique names.
///
/// Equality ignores order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<Label>", into = "Vec<Label>")]
pub struct Labels(Vec<Label>);

impl Labels {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Parse `name=value` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut labels = Labels::new();
        for (name, value) in pairs {
            let name = AcIdentifier::new(name)?;
            if labels.get(name.as_str()).is_some() {
                return Err(BuildError::validation(format!("duplicate label {name}")));
            }
            labels.set(name, value);
        }
        Ok(labels)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|l| l.name.as_str() == name)
            .map(|l| l.value.as_str())
    }

    /// Set a label, replacing the value in place if the name exists.
    pub fn set(&mut self, name: AcIdentifier, value: impl Into<String>) {
        let value = value.into();
        match self.0.iter_mut().find(|l| l.name == name) {
            Some(existing) => existing.value = value,
            None => self.0.push(Label { name, value }),
        }
    }

    /// Remove a label, returning whether it was present.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|l| l.name.as_str() != name);
        self.0.len() != before
    }

    /// Version label value, `latest` when absent.
    pub fn version(&self) -> &str {
        self.get(VERSION_LABEL).unwrap_or(LATEST_VERSION)
    }

    /// Whether the version is unpinned (absent or `latest`).
    pub fn is_latest(&self) -> bool {
        self.version() == LATEST_VERSION
    }

    /// Whether every label in `other` is present here with the same value.
    pub fn contains_all(&self, other: &Labels) -> bool {
        other.iter().all(|l| self.get(l.name.as_str()) == Some(l.value.as_str()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PartialEq for Labels {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.contains_all(other)
    }
}

impl Eq for Labels {}

impl TryFrom<Vec<Label>> for Labels {
    type Error = BuildError;

    fn try_from(labels: Vec<Label>) -> Result<Self> {
        let mut set = Labels::new();
        for label in labels {
            if set.get(label.name.as_str()).is_some() {
                return Err(BuildError::validation(format!(
                    "duplicate label {}",
                    label.name
                )));
            }
            set.0.push(label);
        }
        Ok(set)
    }
}

impl From<Labels> for Vec<Label> {
    fn from(labels: Labels) -> Self {
        labels.0
    }
}
