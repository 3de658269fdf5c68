use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use crate::config::ManagerConfig;
use crate::uploaders::{HttpBackend, TransferBackend};
use crate::utils::{BlobStore, PathResolver};
use super::emitter::{ChannelListener, EventListener};
use super::errors::{Result, UploadError};
use super::manager_worker::{ManagerCommand, ManagerWorker};
use super::request::{build_request, UploadRequest};
use super::store::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, PendingEventStore};
use super::types::{UploadEvent, UploadId, UploadOptions};

/// Cheap, cloneable front end of the upload manager
#[derive(Clone)]
pub struct UploadManager {
    command_tx: mpsc::Sender<ManagerCommand>,
    resolver: PathResolver,
    config: Arc<ManagerConfig>,
}

/// 上传管理器句柄 - 包含管理器和工作线程
pub struct UploadManagerHandle {
    pub manager: UploadManager,
    pub worker_handle: JoinHandle<()>,
}

impl UploadManagerHandle {
    /// Cancels every active upload and waits for the worker to stop.
    /// Pending terminal events stay in the store.
    pub async fn shutdown(self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.manager.command_tx.send(ManagerCommand::Shutdown { reply: reply_tx }).await.is_ok() {
            let _ = reply_rx.await;
        }
        drop(self.manager);

        self.worker_handle
            .await
            .map_err(|err| UploadError::internal(format!("Worker panic: {}", err)))
    }
}

impl UploadManager {
    pub fn builder() -> UploadManagerBuilder {
        UploadManagerBuilder::default()
    }

    /// Manager with the HTTP backend and the store configured in `config`
    pub fn new(config: ManagerConfig) -> Result<UploadManagerHandle> {
        UploadManagerBuilder::default().config(config).build()
    }

    async fn send(&self, command: ManagerCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| UploadError::ManagerShutdown)
    }

    /// Starts an upload and returns its id without waiting for the transfer.
    ///
    /// The request is fully built before anything is registered, so a bad
    /// URL, an unreadable file or an encoding failure is returned here and
    /// leaves no task behind.
    pub async fn start_upload(&self, file_path: &str, server_url: &str, options: UploadOptions) -> Result<UploadId> {
        let request = UploadRequest::new(file_path, server_url, options)?;
        let prepared = build_request(&self.resolver, &request, &self.config).await?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(ManagerCommand::StartUpload {
            request,
            prepared,
            reply: reply_tx,
        })
        .await?;

        reply_rx.await.map_err(|_| UploadError::ManagerShutdown)?
    }

    /// Cancels and forgets an upload. Unknown ids are ignored.
    pub async fn remove_upload(&self, upload_id: UploadId) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(ManagerCommand::RemoveUpload { upload_id, reply: reply_tx }).await?;

        reply_rx.await.map_err(|_| UploadError::ManagerShutdown)
    }

    /// Drops a delivered terminal event from the store. Unknown ids are ignored.
    pub async fn acknowledge_event(&self, event_id: &str) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(ManagerCommand::AcknowledgeEvent {
            event_id: event_id.to_string(),
            reply: reply_tx,
        })
        .await?;

        reply_rx.await.map_err(|_| UploadError::ManagerShutdown)?
    }

    /// Terminal events not yet acknowledged
    pub async fn pending_events(&self) -> Result<Vec<UploadEvent>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(ManagerCommand::PendingEvents { reply: reply_tx }).await?;

        reply_rx.await.map_err(|_| UploadError::ManagerShutdown)?
    }

    /// Replaces the listener and replays every pending terminal event to it.
    pub async fn set_listener(&self, listener: impl EventListener + 'static) -> Result<()> {
        self.replace_listener(Some(Arc::new(listener))).await
    }

    pub async fn clear_listener(&self) -> Result<()> {
        self.replace_listener(None).await
    }

    /// 订阅事件
    ///
    /// 替换当前监听器，返回的接收端会先收到所有未确认的终态事件
    pub async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<UploadEvent>> {
        let (listener, event_rx) = ChannelListener::new();
        self.set_listener(listener).await?;
        Ok(event_rx)
    }

    async fn replace_listener(&self, listener: Option<Arc<dyn EventListener>>) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(ManagerCommand::SetListener { listener, reply: reply_tx }).await?;

        reply_rx.await.map_err(|_| UploadError::ManagerShutdown)
    }

    /// Ids of uploads that have not reached a terminal state
    pub async fn active_uploads(&self) -> Result<Vec<UploadId>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(ManagerCommand::ActiveUploads { reply: reply_tx }).await?;

        reply_rx.await.map_err(|_| UploadError::ManagerShutdown)
    }

    pub fn version(&self) -> &'static str {
        crate::VERSION
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }
}

#[derive(Default)]
pub struct UploadManagerBuilder {
    config: ManagerConfig,
    backend: Option<Arc<dyn TransferBackend>>,
    store: Option<Arc<dyn KeyValueStore>>,
    blob_store: Option<Arc<dyn BlobStore>>,
}

impl UploadManagerBuilder {
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn TransferBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn blob_store(mut self, blob_store: Arc<dyn BlobStore>) -> Self {
        self.blob_store = Some(blob_store);
        self
    }

    /// Spawns the worker; must be called inside a tokio runtime.
    pub fn build(self) -> Result<UploadManagerHandle> {
        let config = Arc::new(self.config);

        let backend: Arc<dyn TransferBackend> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(HttpBackend::new(&config)?),
        };

        // 没有配置路径时事件只保存在内存里
        let store: Arc<dyn KeyValueStore> = match (self.store, &config.store_path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(FileKeyValueStore::new(path)),
            (None, None) => Arc::new(MemoryKeyValueStore::new()),
        };

        let mut resolver = PathResolver::new();
        if let Some(blob_store) = self.blob_store {
            resolver = resolver.with_blob_store(blob_store);
        }

        let (command_tx, command_rx) = mpsc::channel(100);
        let worker_handle = tokio::spawn(ManagerWorker::run(
            backend,
            resolver.clone(),
            config.clone(),
            PendingEventStore::new(store),
            command_rx,
        ));

        let manager = UploadManager {
            command_tx,
            resolver,
            config,
        };

        Ok(UploadManagerHandle {
            manager,
            worker_handle,
        })
    }
}
