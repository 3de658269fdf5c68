use tempfile::TempPath;
use tokio::task::JoinHandle;
use crate::uploaders::BackendHandle;
use super::request::UploadRequest;
use super::types::UploadId;

/// 一个逻辑上传（跨多次重试）
///
/// Owned by the manager loop only. Dropping the task releases the staged
/// body and stops a pending retry timer.
#[derive(Debug)]
pub struct UploadTask {
    pub id: UploadId,
    pub request: UploadRequest,
    pub retries_remaining: u32,
    /// Current attempt number, starting at 1
    pub attempt: u32,
    pub backend_handle: Option<BackendHandle>,
    pub scratch: Option<TempPath>,
    pub retry_timer: Option<JoinHandle<()>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl UploadTask {
    pub fn new(id: UploadId, request: UploadRequest) -> Self {
        let retries_remaining = request.options.max_retries;
        Self {
            id,
            request,
            retries_remaining,
            attempt: 1,
            backend_handle: None,
            scratch: None,
            retry_timer: None,
            created_at: chrono::Utc::now(),
        }
    }

    pub fn is_current(&self, attempt: u32) -> bool {
        self.attempt == attempt
    }

    /// Replaces the staged body of the previous attempt
    pub fn replace_scratch(&mut self, scratch: Option<TempPath>) {
        self.release_scratch();
        self.scratch = scratch;
    }

    pub fn release_scratch(&mut self) {
        if let Some(path) = self.scratch.take() {
            // 删除失败只记录，不影响任务
            if let Err(err) = path.close() {
                tracing::warn!(upload_id = %self.id, "failed to remove staged body: {}", err);
            }
        }
    }

    /// Cancels the in-flight attempt and any scheduled retry
    pub fn cancel(&mut self) {
        if let Some(handle) = self.backend_handle.take() {
            handle.cancel();
        }
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
    }
}

impl Drop for UploadTask {
    fn drop(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
        self.release_scratch();
    }
}
