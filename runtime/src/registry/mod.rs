//! Remote image access: endpoint discovery and HTTP download.

pub mod discovery;
pub mod download;
pub mod progress;

pub use discovery::{Discovery, Endpoint, MetaDiscovery, StaticDiscovery};
pub use download::{DownloadOutcome, RegistryClient, MAX_REDIRECTS};
