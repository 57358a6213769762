//! Upload pipeline for the seqdrop ingestion service.
//!
//! An [`UploadSession`] asks the service for single-use storage credentials,
//! streams the file into object storage as a multipart upload and confirms
//! the stored object with the service.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod progress;
pub mod service;
pub mod session;
pub mod storage;
pub mod transfer;
pub mod version;

pub use config::{Config, ConfigError};
pub use diagnostics::Diagnostics;
pub use error::{ServiceError, StorageError, UploadError};
pub use progress::ProgressTracker;
pub use service::ServiceClient;
pub use session::{SessionState, UploadEvent, UploadHandle, UploadResult, UploadSession};
pub use storage::{ObjectStore, S3Connector, StoreConnector, UploadedPart};
pub use transfer::TransferPlan;
pub use version::{ClientKind, VersionCheck};
