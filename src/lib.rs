pub mod archive;
pub mod cli;
pub mod config;
pub mod identity;
pub mod reconcile;
pub mod storage;

pub use archive::{ArchiveEntry, EXPORT_FILE_NAME, EXPORT_MIME_TYPE};
pub use config::{AppConfig, ConfigLoader, ConfigPaths, StorageOptions};
pub use identity::IdentityPolicy;
pub use reconcile::{import_archive, reconcile, ImportReport};
pub use storage::{DecodeWarning, Note, NoteStore, NoteSummary, StoreError};
