mod emitter;
mod errors;
mod manager;
mod manager_worker;
mod request;
mod store;
mod task;
mod types;

pub use emitter::{ChannelListener, EventEmitter, EventListener};
pub use errors::{Result, UploadError};
pub use manager::{UploadManager, UploadManagerBuilder, UploadManagerHandle};
pub use request::{build_request, parse_server_url, PreparedRequest, UploadRequest};
pub use store::{
    FileKeyValueStore,
    KeyValueStore,
    MemoryKeyValueStore,
    PendingEventStore,
    PENDING_EVENTS_KEY
};
pub use task::UploadTask;
pub use types::{
    EventKind,
    HttpMethod,
    UploadEvent,
    UploadId,
    UploadOptions,
    UploadType,
    DEFAULT_FILE_FIELD,
    DEFAULT_MAX_RETRIES,
    DEFAULT_NOTIFICATION_TITLE
};
