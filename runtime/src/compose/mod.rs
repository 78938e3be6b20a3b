//! Root filesystem composition.
//!
//! A [`LayerStack`] is an ordered list of read-only lower layers plus one
//! writable top. It is realised either as a live overlay mount for running
//! commands or by physically merging the layers for squashing; both give the
//! same precedence (top beats the last lower, which beats the one before).

pub mod flatten;
pub mod overlay;

use std::path::{Path, PathBuf};

pub use flatten::{flatten, reset_dir, swap_into};
pub use overlay::{is_mount_point, overlay_options, OverlayMount};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerStack {
    /// Read-only layers, lowest first.
    pub lower: Vec<PathBuf>,
    /// Writable top layer.
    pub top: PathBuf,
}

impl LayerStack {
    pub fn new(lower: Vec<PathBuf>, top: impl Into<PathBuf>) -> Self {
        Self {
            lower,
            top: top.into(),
        }
    }

    /// Whether there is nothing beneath the top.
    pub fn is_single(&self) -> bool {
        self.lower.is_empty()
    }

    /// Every layer, lowest first, ending with the top.
    pub fn lowest_first(&self) -> impl Iterator<Item = &Path> {
        self.lower
            .iter()
            .map(PathBuf::as_path)
            .chain(std::iter::once(self.top.as_path()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowest_first_ends_with_top() {
        let stack = LayerStack::new(vec!["/a".into(), "/b".into()], "/top");
        let order: Vec<_> = stack.lowest_first().collect();
        assert_eq!(order, vec![Path::new("/a"), Path::new("/b"), Path::new("/top")]);
        assert!(!stack.is_single());
        assert!(LayerStack::new(Vec::new(), "/top").is_single());
    }
}
