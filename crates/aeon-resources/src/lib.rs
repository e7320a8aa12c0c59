//! Content-addressed resource packaging: pack a source tree into a `.pak` +
//! manifest, and load/verify one back.

pub mod loader;
pub mod manifest;
pub mod packer;

pub use loader::{LoadedFile, ResourcePack, ResourcePackLoader};
pub use manifest::{ArchiveMeta, FileMeta, Manifest, PackOptions, PackResult};
pub use packer::pack_resource;
