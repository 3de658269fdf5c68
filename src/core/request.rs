use std::collections::BTreeMap;
use std::str::FromStr;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use tempfile::TempPath;
use tracing::debug;
use url::Url;
use crate::config::ManagerConfig;
use crate::uploaders::{BodySource, Transfer};
use crate::utils::multipart::{self, MultipartForm};
use crate::utils::{detect_mime_type, ByteSource, PathResolver};
use super::errors::{Result, UploadError};
use super::types::{HttpMethod, UploadId, UploadOptions, UploadType};

/// Immutable description of an upload, kept for the lifetime of its task so
/// every retry can rebuild the request from scratch.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_path: String,
    pub server_url: Url,
    pub options: UploadOptions,
}

impl UploadRequest {
    pub fn new(file_path: &str, server_url: &str, options: UploadOptions) -> Result<Self> {
        Ok(Self {
            file_path: file_path.to_string(),
            server_url: parse_server_url(server_url)?,
            options,
        })
    }

    pub fn method(&self) -> HttpMethod {
        self.options.method
    }
}

/// Request ready to hand to a backend, plus the staged body it depends on
#[derive(Debug)]
pub struct PreparedRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: BodySource,
    pub scratch: Option<TempPath>,
    pub notification_title: String,
}

impl PreparedRequest {
    pub fn into_transfer(self, id: UploadId, attempt: u32) -> (Transfer, Option<TempPath>) {
        let transfer = Transfer {
            id,
            attempt,
            method: self.method,
            url: self.url,
            headers: self.headers,
            body: self.body,
            notification_title: self.notification_title,
        };
        (transfer, self.scratch)
    }
}

pub fn parse_server_url(server_url: &str) -> Result<Url> {
    let url = Url::parse(server_url)
        .map_err(|err| UploadError::InvalidUrl(format!("{}: {}", server_url, err)))?;

    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(url),
        _ => Err(UploadError::InvalidUrl(format!("{}: not an http(s) url", server_url))),
    }
}

/// Resolves the file and encodes the body.
///
/// Multipart bodies are staged under the configured staging dir; the staging
/// file is removed again if anything after it fails.
pub async fn build_request(
    resolver: &PathResolver,
    request: &UploadRequest,
    config: &ManagerConfig,
) -> Result<PreparedRequest> {
    let options = &request.options;
    let source = resolver.resolve(&request.file_path).await?;

    let mime_type = options
        .mime_type
        .clone()
        .filter(|mime| !mime.is_empty())
        .unwrap_or_else(|| detect_mime_type(source.name()).to_string());

    let mut headers = build_headers(options)?;

    let (body, scratch) = match options.framing() {
        UploadType::Binary => {
            headers.insert(CONTENT_TYPE, header_value(CONTENT_TYPE.as_str(), &mime_type)?);
            (body_from_source(source), None)
        }
        UploadType::Multipart => {
            let boundary = multipart::generate_boundary();
            let parameters: BTreeMap<String, String> = options
                .parameters
                .iter()
                .filter(|(_, value)| !value.is_empty())
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            let form = MultipartForm {
                boundary: &boundary,
                parameters: &parameters,
                file_field: &options.file_field,
                file_name: source.name(),
                mime_type: &mime_type,
            };

            let staged = multipart::stage_multipart(&config.staging_dir(), &form, &source, config.chunk_size)
                .await
                .map_err(|err| UploadError::Encoding(err.to_string()))?;
            debug!(path = %staged.path.display(), len = staged.len, "staged multipart body");

            headers.insert(
                CONTENT_TYPE,
                header_value(CONTENT_TYPE.as_str(), &multipart::content_type(&boundary))?,
            );
            let body = BodySource::File {
                path: staged.path.to_path_buf(),
                len: staged.len,
            };
            (body, Some(staged.path))
        }
    };

    Ok(PreparedRequest {
        method: options.method,
        url: request.server_url.clone(),
        headers,
        body,
        scratch,
        notification_title: options.notification_title.clone(),
    })
}

fn body_from_source(source: ByteSource) -> BodySource {
    match source {
        ByteSource::File { path, len, .. } => BodySource::File { path, len },
        ByteSource::Memory { bytes, .. } => BodySource::Bytes(bytes),
    }
}

/// Caller headers minus empty values. `Content-Type` is always set by the
/// encoder and overrides any caller value.
fn build_headers(options: &UploadOptions) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in &options.headers {
        if value.is_empty() {
            continue;
        }
        let header_name = HeaderName::from_str(name).map_err(|err| UploadError::InvalidHeader {
            name: name.clone(),
            reason: err.to_string(),
        })?;
        headers.insert(header_name, header_value(name, value)?);
    }
    Ok(headers)
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|err| UploadError::InvalidHeader {
        name: name.to_string(),
        reason: err.to_string(),
    })
}
