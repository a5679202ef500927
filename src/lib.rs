//! sharebox - per-tenant file storage with metadata and share links
//!
//! Each tenant gets an isolated item tree on local disk. Uploads are gzip
//! compressed on a bounded worker pool, items carry arbitrary JSON metadata,
//! and any item can be shared through a single-use, time-limited link
//! (folders are zipped on redemption).

pub mod config;
pub mod error;
pub mod logging;
pub mod metadata;
pub mod scratch;
pub mod service;
pub mod share;
pub mod shutdown;
pub mod stream;
pub mod tenant;
pub mod tree;
pub mod worker;

pub use config::Config;
pub use error::{ErrorKind, Result, StorageError};
pub use metadata::{JsonMetadataStore, MetadataStore};
pub use scratch::{ScratchDir, ScratchFile};
pub use service::StorageService;
pub use share::{LinkRegistry, MemoryLinkRegistry, ShareLink};
pub use stream::{ByteStream, Download};
pub use tenant::TenantId;
pub use tree::{Item, ItemKind, ItemPath, LocalTree, TreeBackend};
pub use worker::{Job, JobExecutor, JobReport, WorkerPool};
