use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use crate::config::ManagerConfig;
use crate::uploaders::{BackendError, BackendMessage, BackendSender, TransferBackend};
use crate::utils::{percent, PathResolver};
use super::emitter::{EventEmitter, EventListener};
use super::errors::Result;
use super::request::{build_request, PreparedRequest, UploadRequest};
use super::store::PendingEventStore;
use super::task::UploadTask;
use super::types::{UploadEvent, UploadId};

/// 上传管理器命令
pub(crate) enum ManagerCommand {
    /// 注册并发起上传，请求体已在调用方构建好
    StartUpload {
        request: UploadRequest,
        prepared: PreparedRequest,
        reply: oneshot::Sender<Result<UploadId>>,
    },

    /// 取消并移除，未知 id 忽略
    RemoveUpload {
        upload_id: UploadId,
        reply: oneshot::Sender<()>,
    },

    AcknowledgeEvent {
        event_id: String,
        reply: oneshot::Sender<Result<()>>,
    },

    PendingEvents {
        reply: oneshot::Sender<Result<Vec<UploadEvent>>>,
    },

    /// 替换监听器，挂载时重放未确认的事件
    SetListener {
        listener: Option<Arc<dyn EventListener>>,
        reply: oneshot::Sender<()>,
    },

    ActiveUploads {
        reply: oneshot::Sender<Vec<UploadId>>,
    },

    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Rebuilt request for a scheduled retry
struct RebuiltRequest {
    upload_id: UploadId,
    attempt: u32,
    result: Result<PreparedRequest>,
}

/// Single writer of the task table.
///
/// Commands, backend messages and rebuilt retries are all processed on this
/// loop, one at a time.
pub(crate) struct ManagerWorker {
    backend: Arc<dyn TransferBackend>,
    resolver: PathResolver,
    config: Arc<ManagerConfig>,
    tasks: HashMap<UploadId, UploadTask>,
    events: PendingEventStore,
    emitter: EventEmitter,
    backend_tx: BackendSender,
    rebuild_tx: mpsc::UnboundedSender<RebuiltRequest>,
}

impl ManagerWorker {
    pub(crate) async fn run(
        backend: Arc<dyn TransferBackend>,
        resolver: PathResolver,
        config: Arc<ManagerConfig>,
        events: PendingEventStore,
        mut command_rx: mpsc::Receiver<ManagerCommand>,
    ) {
        let (backend_tx, mut backend_rx) = mpsc::unbounded_channel();
        let (rebuild_tx, mut rebuild_rx) = mpsc::unbounded_channel();
        let mut worker = Self {
            backend,
            resolver,
            config,
            tasks: HashMap::new(),
            events,
            emitter: EventEmitter::new(),
            backend_tx,
            rebuild_tx,
        };

        // 主事件循环
        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(ManagerCommand::Shutdown { reply }) => {
                        worker.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => worker.handle_command(command).await,
                    // 所有 manager 句柄都已释放
                    None => {
                        worker.shutdown();
                        break;
                    }
                },
                Some(message) = backend_rx.recv() => {
                    worker.handle_backend_message(message).await;
                }
                Some(rebuilt) = rebuild_rx.recv() => {
                    worker.handle_rebuilt(rebuilt).await;
                }
            }
        }

        debug!("upload manager worker stopped");
    }

    async fn handle_command(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::StartUpload { request, prepared, reply } => {
                let result = self.start_upload(request, prepared);
                let _ = reply.send(result);
            }
            ManagerCommand::RemoveUpload { upload_id, reply } => {
                self.remove_upload(upload_id);
                let _ = reply.send(());
            }
            ManagerCommand::AcknowledgeEvent { event_id, reply } => {
                let _ = reply.send(self.events.acknowledge(&event_id).await);
            }
            ManagerCommand::PendingEvents { reply } => {
                let _ = reply.send(self.events.replay_all().await);
            }
            ManagerCommand::SetListener { listener, reply } => {
                self.set_listener(listener).await;
                let _ = reply.send(());
            }
            ManagerCommand::ActiveUploads { reply } => {
                let _ = reply.send(self.tasks.keys().copied().collect());
            }
            ManagerCommand::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
            }
        }
    }

    fn start_upload(&mut self, request: UploadRequest, prepared: PreparedRequest) -> Result<UploadId> {
        let mut upload_id = UploadId::new();
        while self.tasks.contains_key(&upload_id) {
            upload_id = UploadId::new();
        }

        let mut task = UploadTask::new(upload_id, request);
        let (transfer, scratch) = prepared.into_transfer(upload_id, task.attempt);
        task.scratch = scratch;

        // 先登记再发起，回调总能找到任务
        self.tasks.insert(upload_id, task);

        match self.backend.issue(transfer, self.backend_tx.clone()) {
            Ok(handle) => {
                if let Some(task) = self.tasks.get_mut(&upload_id) {
                    task.backend_handle = Some(handle);
                }
                info!(upload_id = %upload_id, "upload started");
                Ok(upload_id)
            }
            Err(err) => {
                self.tasks.remove(&upload_id);
                Err(err)
            }
        }
    }

    fn remove_upload(&mut self, upload_id: UploadId) {
        let Some(mut task) = self.tasks.remove(&upload_id) else {
            debug!(upload_id = %upload_id, "remove for unknown upload ignored");
            return;
        };

        if let Some(handle) = task.backend_handle.take() {
            self.backend.cancel(&handle);
        }
        task.cancel();
        info!(upload_id = %upload_id, "upload removed");
    }

    async fn set_listener(&mut self, listener: Option<Arc<dyn EventListener>>) {
        let attached = listener.is_some();
        self.emitter.set_listener(listener);
        if !attached {
            return;
        }

        match self.events.replay_all().await {
            Ok(events) => {
                debug!(count = events.len(), "replaying pending events");
                for event in &events {
                    self.emitter.emit(event);
                }
            }
            Err(err) => error!("failed to load pending events: {}", err),
        }
    }

    async fn handle_backend_message(&mut self, message: BackendMessage) {
        match message {
            BackendMessage::Progress { id, attempt, bytes_sent, bytes_expected } => {
                if !self.is_current(id, attempt) {
                    return;
                }
                self.emitter.emit(&UploadEvent::uploading(id, percent(bytes_sent, bytes_expected)));
            }
            BackendMessage::Completion { id, attempt, status_code, error } => {
                if !self.is_current(id, attempt) {
                    debug!(upload_id = %id, attempt, "stale completion ignored");
                    return;
                }

                match error {
                    None => {
                        self.tasks.remove(&id);
                        info!(upload_id = %id, status_code, "upload completed");
                        self.deliver_terminal(UploadEvent::completed(id, status_code)).await;
                    }
                    Some(BackendError::Cancelled) => {
                        self.tasks.remove(&id);
                        debug!(upload_id = %id, "upload cancelled");
                    }
                    Some(BackendError::Transfer(message)) => {
                        self.on_attempt_failed(id, message, status_code).await;
                    }
                }
            }
        }
    }

    fn is_current(&self, upload_id: UploadId, attempt: u32) -> bool {
        self.tasks
            .get(&upload_id)
            .is_some_and(|task| task.is_current(attempt))
    }

    /// 失败后还有重试次数就重新构建请求，否则发出 failed
    async fn on_attempt_failed(&mut self, upload_id: UploadId, message: String, status_code: Option<u16>) {
        let Some(task) = self.tasks.get_mut(&upload_id) else {
            return;
        };
        task.backend_handle = None;

        if task.retries_remaining == 0 {
            self.tasks.remove(&upload_id);
            warn!(upload_id = %upload_id, status_code, "upload failed: {}", message);
            self.deliver_terminal(UploadEvent::failed(upload_id, message, status_code)).await;
            return;
        }

        let retry_index = task.request.options.max_retries - task.retries_remaining;
        task.retries_remaining -= 1;
        task.attempt += 1;
        task.release_scratch();

        let attempt = task.attempt;
        let delay = self.config.retry.get_delay(retry_index);
        warn!(
            upload_id = %upload_id,
            attempt,
            retries_remaining = task.retries_remaining,
            "attempt failed, retrying in {:?}: {}",
            delay,
            message
        );

        let request = task.request.clone();
        let resolver = self.resolver.clone();
        let config = self.config.clone();
        let rebuild_tx = self.rebuild_tx.clone();
        task.retry_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let result = build_request(&resolver, &request, &config).await;
            let _ = rebuild_tx.send(RebuiltRequest { upload_id, attempt, result });
        }));
    }

    async fn handle_rebuilt(&mut self, rebuilt: RebuiltRequest) {
        let RebuiltRequest { upload_id, attempt, result } = rebuilt;
        let Some(task) = self.tasks.get_mut(&upload_id) else {
            return;
        };
        if !task.is_current(attempt) {
            return;
        }
        task.retry_timer = None;

        let prepared = match result {
            Ok(prepared) => prepared,
            Err(err) => {
                self.on_attempt_failed(upload_id, err.to_string(), err.status_code()).await;
                return;
            }
        };

        let (transfer, scratch) = prepared.into_transfer(upload_id, attempt);
        task.replace_scratch(scratch);

        match self.backend.issue(transfer, self.backend_tx.clone()) {
            Ok(handle) => {
                debug!(upload_id = %upload_id, attempt, "retry issued");
                task.backend_handle = Some(handle);
            }
            Err(err) => {
                self.on_attempt_failed(upload_id, err.to_string(), err.status_code()).await;
            }
        }
    }

    /// 先持久化再发出，未挂载监听器时事件留在存储里等待重放
    async fn deliver_terminal(&mut self, mut event: UploadEvent) {
        if let Err(err) = self.events.persist(&mut event).await {
            error!(upload_id = %event.id, "failed to persist {} event: {}", event.name(), err);
            event.event_id = None;
        }
        self.emitter.emit(&event);
    }

    fn shutdown(&mut self) {
        for (upload_id, mut task) in self.tasks.drain() {
            if let Some(handle) = task.backend_handle.take() {
                self.backend.cancel(&handle);
            }
            task.cancel();
            debug!(upload_id = %upload_id, "upload cancelled on shutdown");
        }
    }
}
