//! acb runtime - the image build engine.
//!
//! This crate provides the build context and its operations, the local image
//! store with discovery and download, transitive dependency resolution, and
//! rootfs composition for running commands and squashing layers.

#![allow(clippy::result_large_err)]

pub mod aci;
pub mod compose;
pub mod context;
pub mod exec;
pub mod host_check;
pub mod registry;
pub mod resolve;
pub mod sign;
pub mod store;
pub mod upload;

#[cfg(test)]
mod testutil;

// Re-export common types
pub use aci::{AcIdentifier, AcName, AppRef, ContentKey, Dependency, ImageId, Labels, Manifest};
pub use aci::{Extractor, TarExtractor};
pub use compose::{LayerStack, OverlayMount};
pub use context::{BuildContext, ContextLock, ContextPaths};
pub use registry::{Discovery, Endpoint, MetaDiscovery, RegistryClient, StaticDiscovery};
pub use resolve::Resolver;
pub use sign::{GpgSigner, Signer};
pub use store::{ImageStore, StoreEntry};
pub use upload::Uploader;

/// acb runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
