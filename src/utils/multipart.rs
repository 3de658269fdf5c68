//! Streamed multipart/form-data encoding.
//!
//! The document is written section by section into a staging file so the
//! full body never has to sit in memory. The staging file is owned by the
//! returned [`StagedBody`] and removed when it is dropped.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use tempfile::TempPath;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use uuid::Uuid;
use super::path::ByteSource;

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

const CRLF: &str = "\r\n";

pub fn generate_boundary() -> String {
    format!("----UploaderBoundary{}", Uuid::new_v4().simple())
}

pub fn content_type(boundary: &str) -> String {
    format!("multipart/form-data; boundary={}", boundary)
}

/// Everything except the file bytes
#[derive(Debug, Clone)]
pub struct MultipartForm<'a> {
    pub boundary: &'a str,
    pub parameters: &'a BTreeMap<String, String>,
    pub file_field: &'a str,
    pub file_name: &'a str,
    pub mime_type: &'a str,
}

/// Multipart body staged on disk
#[derive(Debug)]
pub struct StagedBody {
    pub path: TempPath,
    pub len: u64,
}

/// Writes the complete document into a new staging file under `dir`.
pub async fn stage_multipart(
    dir: &Path,
    form: &MultipartForm<'_>,
    source: &ByteSource,
    chunk_size: usize,
) -> io::Result<StagedBody> {
    let (file, path) = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(".multipart")
        .tempfile_in(dir)?
        .into_parts();

    // `path` removes the file when dropped, including on the error paths below
    let mut writer = BufWriter::with_capacity(chunk_size.max(1), File::from_std(file));
    let len = write_multipart(&mut writer, form, source, chunk_size).await?;
    writer.flush().await?;

    Ok(StagedBody { path, len })
}

/// Writes the document to `writer`, returning the number of bytes written.
pub async fn write_multipart<W>(
    writer: &mut W,
    form: &MultipartForm<'_>,
    source: &ByteSource,
    chunk_size: usize,
) -> io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;

    for (key, value) in form.parameters {
        let head = format!(
            "--{}{CRLF}Content-Disposition: form-data; name=\"{}\"{CRLF}{CRLF}",
            form.boundary,
            escape_quoted(key),
        );
        written += write_str(writer, &head).await?;
        written += write_str(writer, value).await?;
        written += write_str(writer, CRLF).await?;
    }

    let head = format!(
        "--{}{CRLF}Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"{CRLF}Content-Type: {}{CRLF}{CRLF}",
        form.boundary,
        escape_quoted(form.file_field),
        escape_quoted(form.file_name),
        form.mime_type,
    );
    written += write_str(writer, &head).await?;

    written += match source {
        ByteSource::File { path, .. } => {
            let mut file = File::open(path).await?;
            copy_chunked(&mut file, writer, chunk_size).await?
        }
        ByteSource::Memory { bytes, .. } => {
            for chunk in bytes.chunks(chunk_size.max(1)) {
                writer.write_all(chunk).await?;
            }
            bytes.len() as u64
        }
    };

    written += write_str(writer, CRLF).await?;
    written += write_str(writer, &format!("--{}--{CRLF}", form.boundary)).await?;

    Ok(written)
}

async fn write_str<W>(writer: &mut W, s: &str) -> io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(s.as_bytes()).await?;
    Ok(s.len() as u64)
}

async fn copy_chunked<R, W>(reader: &mut R, writer: &mut W, chunk_size: usize) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }

    Ok(total)
}

/// Quoted-string values may not carry quotes or line breaks.
fn escape_quoted(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    /// Splits a multipart body into (headers, content) pairs.
    fn parse_sections(body: &[u8], boundary: &str) -> Vec<(String, Vec<u8>)> {
        let delimiter = format!("--{}", boundary);
        let text = body.to_vec();
        let mut sections = Vec::new();
        let mut rest = &text[..];

        // skip the first delimiter line
        assert!(rest.starts_with(format!("{}\r\n", delimiter).as_bytes()));
        rest = &rest[delimiter.len() + 2..];

        loop {
            let next = format!("\r\n{}", delimiter);
            let pos = find(rest, next.as_bytes()).expect("missing delimiter");
            let part = &rest[..pos];
            let header_end = find(part, b"\r\n\r\n").expect("missing header terminator");
            let headers = String::from_utf8(part[..header_end].to_vec()).unwrap();
            sections.push((headers, part[header_end + 4..].to_vec()));

            rest = &rest[pos + next.len()..];
            if rest.starts_with(b"--") {
                assert_eq!(&rest[2..], b"\r\n");
                break;
            }
            rest = &rest[2..];
        }

        sections
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|window| window == needle)
    }

    #[tokio::test]
    async fn test_sections_in_order() {
        let file_bytes: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        tokio::fs::write(&path, &file_bytes).await.unwrap();

        let source = ByteSource::File {
            path,
            name: "photo.jpg".to_string(),
            len: file_bytes.len() as u64,
        };
        let mut parameters = BTreeMap::new();
        parameters.insert("a".to_string(), "1".to_string());
        let boundary = generate_boundary();
        let form = MultipartForm {
            boundary: &boundary,
            parameters: &parameters,
            file_field: "file",
            file_name: source.name(),
            mime_type: "image/jpeg",
        };

        let mut body = Vec::new();
        // small chunks to exercise the streaming copy
        let written = write_multipart(&mut body, &form, &source, 7).await.unwrap();
        assert_eq!(written, body.len() as u64);

        let sections = parse_sections(&body, &boundary);
        assert_eq!(sections.len(), 2);

        assert_eq!(sections[0].0, "Content-Disposition: form-data; name=\"a\"");
        assert_eq!(sections[0].1, b"1");

        assert_eq!(
            sections[1].0,
            "Content-Disposition: form-data; name=\"file\"; filename=\"photo.jpg\"\r\nContent-Type: image/jpeg"
        );
        assert_eq!(sections[1].1, file_bytes);
        assert!(body.ends_with(format!("--{}--\r\n", boundary).as_bytes()));
    }

    #[tokio::test]
    async fn test_staged_body_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let source = ByteSource::Memory {
            name: "notes.txt".to_string(),
            bytes: Bytes::from_static(b"hello"),
        };
        let parameters = BTreeMap::new();
        let boundary = generate_boundary();
        let form = MultipartForm {
            boundary: &boundary,
            parameters: &parameters,
            file_field: "upload",
            file_name: source.name(),
            mime_type: "text/plain",
        };

        let staged = stage_multipart(dir.path(), &form, &source, DEFAULT_CHUNK_SIZE).await.unwrap();
        let staged_path = staged.path.to_path_buf();
        let body = tokio::fs::read(&staged_path).await.unwrap();
        assert_eq!(body.len() as u64, staged.len);

        let sections = parse_sections(&body, &boundary);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].1, b"hello");

        drop(staged);
        assert!(!staged_path.exists());
    }

    #[test]
    fn test_content_type_carries_boundary() {
        let boundary = generate_boundary();
        assert_eq!(content_type(&boundary), format!("multipart/form-data; boundary={}", boundary));
        assert_ne!(boundary, generate_boundary());
    }

    #[test]
    fn test_escape_quoted() {
        assert_eq!(escape_quoted("my \"file\".txt"), "my %22file%22.txt");
        assert_eq!(escape_quoted("a\r\nb"), "a%0D%0Ab");
    }
}
