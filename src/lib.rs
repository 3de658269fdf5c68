//! Resilient background file uploads.
//!
//! [`UploadManager`] starts uploads, retries failed attempts and delivers
//! exactly one terminal event per upload. Terminal events are kept in a
//! durable store until they are acknowledged.

pub mod config;
pub mod core;
pub mod uploaders;
pub mod utils;

/// Crate version, reported by [`UploadManager::version`]
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 重新导出核心类型
pub use crate::core::{
    ChannelListener,
    EventKind,
    EventListener,
    FileKeyValueStore,
    HttpMethod,
    KeyValueStore,
    MemoryKeyValueStore,
    Result,
    UploadError,
    UploadEvent,
    UploadId,
    UploadManager,
    UploadManagerBuilder,
    UploadManagerHandle,
    UploadOptions,
    UploadType,
};

pub use crate::config::{Config, ManagerConfig};

// 重新导出传输后端
pub use crate::uploaders::{
    BackendError,
    BackendHandle,
    BackendMessage,
    BackendSender,
    HttpBackend,
    Transfer,
    TransferBackend,
};

pub use crate::utils::{BlobStore, MemoryBlobStore, RetryStrategy};
