//! Transfer backends.
//!
//! A backend moves the bytes of one attempt and reports back on a channel;
//! it never touches the manager's task table.

pub mod http;

use std::path::PathBuf;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;
use crate::core::{HttpMethod, Result, UploadId};

pub use http::HttpBackend;

/// Request body of one attempt
#[derive(Debug, Clone)]
pub enum BodySource {
    File { path: PathBuf, len: u64 },
    Bytes(Bytes),
}

impl BodySource {
    pub fn len(&self) -> u64 {
        match self {
            BodySource::File { len, .. } => *len,
            BodySource::Bytes(bytes) => bytes.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One physical transfer attempt
#[derive(Debug, Clone)]
pub struct Transfer {
    pub id: UploadId,
    pub attempt: u32,
    pub method: HttpMethod,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: BodySource,
    pub notification_title: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackendError {
    /// The attempt was cancelled through its handle
    Cancelled,
    /// Network or HTTP failure
    Transfer(String),
}

/// Messages a backend sends for a running attempt
#[derive(Debug, Clone, PartialEq)]
pub enum BackendMessage {
    Progress {
        id: UploadId,
        attempt: u32,
        bytes_sent: u64,
        bytes_expected: u64,
    },
    Completion {
        id: UploadId,
        attempt: u32,
        status_code: Option<u16>,
        error: Option<BackendError>,
    },
}

pub type BackendSender = mpsc::UnboundedSender<BackendMessage>;

/// Handle to an issued attempt
#[derive(Debug, Clone)]
pub struct BackendHandle {
    attempt: u32,
    token: CancellationToken,
}

impl BackendHandle {
    pub fn new(attempt: u32) -> Self {
        Self {
            attempt,
            token: CancellationToken::new(),
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Capability to run HTTP transfers in the background.
///
/// `issue` must return as soon as the transfer is scheduled. Every issued
/// attempt ends with exactly one `Completion` message on `events`, including
/// cancelled ones.
pub trait TransferBackend: Send + Sync {
    fn issue(&self, transfer: Transfer, events: BackendSender) -> Result<BackendHandle>;

    fn cancel(&self, handle: &BackendHandle) {
        handle.cancel();
    }
}
