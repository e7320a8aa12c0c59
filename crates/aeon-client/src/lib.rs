//! Client-side network runtime — §4.1 (client perspective), §4.8, §4.9.5,
//! §4.10: the connection state machine, the resource downloader, and the
//! remote-player mirror that keep a connected client's world in sync with
//! the server.

pub mod connection;
pub mod downloader;
pub mod mirror;

pub use connection::{ClientConnection, ClientLink, ClientLinkEvent, ClientOutcome, ConnectionState};
pub use downloader::{DownloadProgress, DownloadState, DownloaderConfig, ResourceDescriptor, ResourceDownloader};
pub use mirror::{MirrorConfig, RemoteEntity, RemotePlayerMirror};
