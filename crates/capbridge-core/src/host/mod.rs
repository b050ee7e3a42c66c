//! Privileged side of the bridge
//!
//! This module provides:
//! - The host server answering a client's capability calls
//! - Collaborator traits for the dialog and the watch service
//! - Grants recorded from dialog selections and the watch policy
//! - A file watcher with content-digest change detection

mod collaborators;
pub mod deriver;
pub mod grants;
mod server;
mod watcher;

pub use collaborators::{FileDialog, UpdateSink, WatchService};
pub use deriver::{ChangeDeriver, DigestDeriver, ResourceChanged};
pub use grants::{normalize_path, Grant, GrantRegistry, WatchPolicy};
pub use server::HostServer;
pub use watcher::{FileChangeEvent, FileChangeKind, FileWatcher, FsWatchService};
