//! ACI image format: identifiers, manifest, archive read and write.

pub mod app_ref;
pub mod archive;
pub mod extract;
pub mod manifest;
pub mod types;

pub use app_ref::AppRef;
pub use archive::write_aci;
pub use extract::{open_decompressed, read_entry, Extractor, TarExtractor};
pub use manifest::{
    Annotation, App, Dependency, EnvironmentVariable, Manifest, MountPoint, PLACEHOLDER_NAME,
};
pub use types::{AcIdentifier, AcName, ContentKey, ImageId, Label, Labels, LATEST_VERSION, VERSION_LABEL};
