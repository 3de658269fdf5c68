pub mod mime;
pub mod multipart;
pub mod path;
pub mod progress;
pub mod retry;

pub use mime::{detect_mime_type, DEFAULT_MIME_TYPE};
pub use multipart::{stage_multipart, write_multipart, MultipartForm, StagedBody, DEFAULT_CHUNK_SIZE};
pub use path::{BlobStore, ByteSource, FileRef, MemoryBlobStore, PathResolver};
pub use progress::{percent, ProgressStream};
pub use retry::RetryStrategy;
