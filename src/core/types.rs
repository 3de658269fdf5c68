use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_FILE_FIELD: &str = "file";
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_NOTIFICATION_TITLE: &str = "File Upload";

/// Upload task id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct UploadId(Uuid);

impl UploadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UploadId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Post,
    Put,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
        }
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
        }
    }
}

/// Request body framing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadType {
    /// Raw file bytes as the request body
    #[default]
    Binary,
    /// multipart/form-data document with form parameters and the file part
    Multipart,
}

/// Options recognised by `start_upload`.
///
/// Deserialises from the camelCase object the host bridge hands over; every
/// field is optional on the wire.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadOptions {
    pub headers: HashMap<String, String>,
    pub method: HttpMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub upload_type: UploadType,
    pub file_field: String,
    pub parameters: BTreeMap<String, String>,
    pub max_retries: u32,
    pub notification_title: String,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            headers: HashMap::new(),
            method: HttpMethod::Post,
            mime_type: None,
            upload_type: UploadType::Binary,
            file_field: DEFAULT_FILE_FIELD.to_string(),
            parameters: BTreeMap::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            notification_title: DEFAULT_NOTIFICATION_TITLE.to_string(),
        }
    }
}

impl UploadOptions {
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_upload_type(mut self, upload_type: UploadType) -> Self {
        self.upload_type = upload_type;
        self
    }

    pub fn with_file_field(mut self, file_field: impl Into<String>) -> Self {
        self.file_field = file_field.into();
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Framing actually used on the wire. PUT targets (pre-signed storage
    /// URLs) always take the raw body.
    pub fn framing(&self) -> UploadType {
        match self.method {
            HttpMethod::Put => UploadType::Binary,
            HttpMethod::Post => self.upload_type,
        }
    }
}

/// Event payload, one variant per event name
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// `percent` is -1 when the total size is unknown
    Uploading { percent: f64 },
    Completed { status_code: Option<u16> },
    Failed { error: String, status_code: Option<u16> },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Uploading { .. } => "uploading",
            EventKind::Completed { .. } => "completed",
            EventKind::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, EventKind::Uploading { .. })
    }
}

/// Event delivered to the listener.
///
/// Serialises to `{ "name", "id", "payload", "eventId"? }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireEvent", try_from = "WireEvent")]
pub struct UploadEvent {
    pub id: UploadId,
    pub kind: EventKind,
    /// Set once a terminal event has been written to the pending event store
    pub event_id: Option<String>,
}

impl UploadEvent {
    pub fn uploading(id: UploadId, percent: f64) -> Self {
        Self { id, kind: EventKind::Uploading { percent }, event_id: None }
    }

    pub fn completed(id: UploadId, status_code: Option<u16>) -> Self {
        Self { id, kind: EventKind::Completed { status_code }, event_id: None }
    }

    pub fn failed(id: UploadId, error: impl Into<String>, status_code: Option<u16>) -> Self {
        Self {
            id,
            kind: EventKind::Failed { error: error.into(), status_code },
            event_id: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    name: String,
    id: UploadId,
    #[serde(default)]
    payload: WirePayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status_code: Option<u16>,
}

impl From<UploadEvent> for WireEvent {
    fn from(event: UploadEvent) -> Self {
        let name = event.name().to_string();
        let payload = match event.kind {
            EventKind::Uploading { percent } => WirePayload {
                percent: Some(percent),
                ..Default::default()
            },
            EventKind::Completed { status_code } => WirePayload {
                status_code,
                ..Default::default()
            },
            EventKind::Failed { error, status_code } => WirePayload {
                error: Some(error),
                status_code,
                ..Default::default()
            },
        };

        WireEvent {
            name,
            id: event.id,
            payload,
            event_id: event.event_id,
        }
    }
}

impl TryFrom<WireEvent> for UploadEvent {
    type Error = String;

    fn try_from(wire: WireEvent) -> Result<Self, Self::Error> {
        let WirePayload { percent, error, status_code } = wire.payload;
        let kind = match wire.name.as_str() {
            "uploading" => EventKind::Uploading {
                percent: percent.unwrap_or(-1.0),
            },
            "completed" => EventKind::Completed { status_code },
            "failed" => EventKind::Failed {
                error: error.unwrap_or_default(),
                status_code,
            },
            other => return Err(format!("unknown event name '{}'", other)),
        };

        Ok(UploadEvent {
            id: wire.id,
            kind,
            event_id: wire.event_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upload_id_generation() {
        let id1 = UploadId::new();
        let id2 = UploadId::new();

        assert_ne!(id1, id2);
        assert!(!id1.to_string().is_empty());
        assert_eq!(id1.to_string().parse::<UploadId>().unwrap(), id1);
    }

    #[test]
    fn test_options_defaults_from_empty_object() {
        let options: UploadOptions = serde_json::from_value(json!({})).unwrap();

        assert_eq!(options, UploadOptions::default());
        assert_eq!(options.method, HttpMethod::Post);
        assert_eq!(options.upload_type, UploadType::Binary);
        assert_eq!(options.file_field, "file");
        assert_eq!(options.max_retries, 3);
        assert!(options.mime_type.is_none());
    }

    #[test]
    fn test_options_from_bridge_json() {
        let options: UploadOptions = serde_json::from_value(json!({
            "headers": { "Authorization": "Bearer abc" },
            "method": "PUT",
            "mimeType": "video/mp4",
            "uploadType": "multipart",
            "fileField": "video",
            "parameters": { "a": "1" },
            "maxRetries": 5
        }))
        .unwrap();

        assert_eq!(options.method, HttpMethod::Put);
        assert_eq!(options.mime_type.as_deref(), Some("video/mp4"));
        assert_eq!(options.upload_type, UploadType::Multipart);
        assert_eq!(options.file_field, "video");
        assert_eq!(options.parameters.get("a").map(String::as_str), Some("1"));
        assert_eq!(options.max_retries, 5);
    }

    #[test]
    fn test_put_forces_binary_framing() {
        let options = UploadOptions::default().with_upload_type(UploadType::Multipart);
        assert_eq!(options.framing(), UploadType::Multipart);

        let options = options.with_method(HttpMethod::Put);
        assert_eq!(options.framing(), UploadType::Binary);
    }

    #[test]
    fn test_event_wire_shape() {
        let id = UploadId::new();

        let value = serde_json::to_value(UploadEvent::uploading(id, 42.5)).unwrap();
        assert_eq!(value, json!({ "name": "uploading", "id": id.to_string(), "payload": { "percent": 42.5 } }));

        let mut completed = UploadEvent::completed(id, Some(201));
        completed.event_id = Some("evt-1".to_string());
        let value = serde_json::to_value(&completed).unwrap();
        assert_eq!(
            value,
            json!({ "name": "completed", "id": id.to_string(), "payload": { "statusCode": 201 }, "eventId": "evt-1" })
        );

        let value = serde_json::to_value(UploadEvent::failed(id, "HTTP error! status: 500", Some(500))).unwrap();
        assert_eq!(value["payload"]["error"], "HTTP error! status: 500");
        assert_eq!(value["payload"]["statusCode"], 500);

        let back: UploadEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, UploadEvent::failed(id, "HTTP error! status: 500", Some(500)));
    }

    #[test]
    fn test_unknown_event_name_rejected() {
        let id = UploadId::new();
        let result = serde_json::from_value::<UploadEvent>(json!({ "name": "finished", "id": id.to_string() }));
        assert!(result.is_err());
    }
}
