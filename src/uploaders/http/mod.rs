use std::io;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Body, Client};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use crate::config::ManagerConfig;
use crate::core::Result;
use crate::utils::ProgressStream;
use super::{BackendError, BackendHandle, BackendMessage, BackendSender, BodySource, Transfer, TransferBackend};

/// Foreground HTTP backend on top of reqwest.
///
/// Each attempt runs on its own tokio task; retries are scheduled by the
/// manager, not here.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    chunk_size: usize,
}

impl HttpBackend {
    pub fn new(config: &ManagerConfig) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            chunk_size: config.chunk_size.max(1),
        })
    }

    pub fn with_client(client: Client, chunk_size: usize) -> Self {
        Self {
            client,
            chunk_size: chunk_size.max(1),
        }
    }
}

impl TransferBackend for HttpBackend {
    fn issue(&self, transfer: Transfer, events: BackendSender) -> Result<BackendHandle> {
        let handle = BackendHandle::new(transfer.attempt);
        let token = handle.token().clone();
        let client = self.client.clone();
        let chunk_size = self.chunk_size;

        debug!(
            upload_id = %transfer.id,
            attempt = transfer.attempt,
            method = transfer.method.as_str(),
            url = %transfer.url,
            notification = %transfer.notification_title,
            "issuing transfer"
        );

        tokio::spawn(async move {
            let id = transfer.id;
            let attempt = transfer.attempt;

            let (status_code, error) = tokio::select! {
                outcome = send(client, transfer, events.clone(), chunk_size) => outcome,
                _ = token.cancelled() => (None, Some(BackendError::Cancelled)),
            };

            let _ = events.send(BackendMessage::Completion {
                id,
                attempt,
                status_code,
                error,
            });
        });

        Ok(handle)
    }
}

async fn send(
    client: Client,
    transfer: Transfer,
    events: BackendSender,
    chunk_size: usize,
) -> (Option<u16>, Option<BackendError>) {
    let Transfer { id, attempt, method, url, headers, body, .. } = transfer;
    let bytes_expected = body.len();

    let report = move |bytes_sent: u64| {
        let _ = events.send(BackendMessage::Progress {
            id,
            attempt,
            bytes_sent,
            bytes_expected,
        });
    };

    let body = match body {
        BodySource::File { path, .. } => match File::open(&path).await {
            Ok(file) => {
                let stream = ReaderStream::with_capacity(file, chunk_size);
                Body::wrap_stream(ProgressStream::new(stream, report))
            }
            Err(err) => {
                warn!(upload_id = %id, path = %path.display(), "cannot open request body: {}", err);
                return (None, Some(BackendError::Transfer(format!("Cannot open file: {}", err))));
            }
        },
        BodySource::Bytes(bytes) => {
            let stream = futures::stream::once(async move { Ok::<_, io::Error>(bytes) });
            Body::wrap_stream(ProgressStream::new(stream, report))
        }
    };

    let response = client
        .request(method.into(), url)
        .headers(headers)
        .header(CONTENT_LENGTH, bytes_expected)
        .body(body)
        .send()
        .await;

    match response {
        Ok(response) => {
            let status = response.status();
            if status.is_success() {
                (Some(status.as_u16()), None)
            } else {
                (
                    Some(status.as_u16()),
                    Some(BackendError::Transfer(format!("HTTP error! status: {}", status.as_u16()))),
                )
            }
        }
        Err(err) => (
            err.status().map(|status| status.as_u16()),
            Some(BackendError::Transfer(err.to_string())),
        ),
    }
}
