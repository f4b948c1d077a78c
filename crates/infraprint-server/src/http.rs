// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// HTTP/1.1 framing for IPP (RFC 8010 SS4).
//
// Just enough of HTTP to carry `application/ipp` bodies: request line and
// headers, `Content-Length` and chunked bodies, `Expect: 100-continue`,
// persistent connections, and HTTP Basic credentials for output devices.

use base64::Engine;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use infraprint_core::error::{InfraError, Result};

/// Longest single header line accepted.
const MAX_LINE_BYTES: u64 = 8 * 1024;

/// Most header lines accepted in one request.
const MAX_HEADERS: usize = 100;

/// MIME type of IPP message bodies.
pub const IPP_CONTENT_TYPE: &str = "application/ipp";

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A request line plus headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    /// Request target with any query string removed.
    pub path: String,
    /// (major, minor) HTTP version.
    pub version: (u8, u8),
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the connection stays open after the response.
    pub fn keep_alive(&self) -> bool {
        let connection = self.header("Connection").map(str::to_ascii_lowercase);
        match connection.as_deref() {
            Some(value) if value.contains("close") => false,
            Some(value) if value.contains("keep-alive") => true,
            _ => self.version >= (1, 1),
        }
    }

    /// User name and password from an `Authorization: Basic` header.
    pub fn basic_credentials(&self) -> Option<(String, String)> {
        let value = self.header("Authorization")?;
        let (scheme, encoded) = value.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (user, pass) = decoded.split_once(':')?;
        Some((user.to_string(), pass.to_string()))
    }

    fn body_length(&self) -> Result<BodyLength> {
        if let Some(encoding) = self.header("Transfer-Encoding") {
            if encoding.to_ascii_lowercase().contains("chunked") {
                return Ok(BodyLength::Chunked);
            }
            return Err(InfraError::Http(format!("unsupported transfer encoding {encoding}")));
        }
        match self.header("Content-Length") {
            Some(value) => value
                .trim()
                .parse::<usize>()
                .map(BodyLength::Fixed)
                .map_err(|_| InfraError::Http(format!("bad Content-Length {value}"))),
            None => Ok(BodyLength::Fixed(0)),
        }
    }
}

/// A complete request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub head: RequestHead,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyLength {
    Fixed(usize),
    Chunked,
}

/// Parse the request line and header lines (without the blank terminator).
pub fn parse_head(lines: &[String]) -> Result<RequestHead> {
    let (request_line, header_lines) = lines
        .split_first()
        .ok_or_else(|| InfraError::Http("empty request".into()))?;

    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(InfraError::Http(format!("bad request line {request_line:?}")));
    };

    let version = version
        .strip_prefix("HTTP/")
        .and_then(|v| v.split_once('.'))
        .and_then(|(major, minor)| Some((major.parse::<u8>().ok()?, minor.parse::<u8>().ok()?)))
        .ok_or_else(|| InfraError::Http(format!("bad HTTP version {version}")))?;

    let path = target.split('?').next().unwrap_or(target).to_string();

    let mut headers = Vec::with_capacity(header_lines.len());
    for line in header_lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| InfraError::Http(format!("bad header line {line:?}")))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok(RequestHead {
        method: method.to_string(),
        path,
        version,
        headers,
    })
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<String>> {
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(MAX_LINE_BYTES)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') {
        return Err(InfraError::Http("header line too long or truncated".into()));
    }
    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

/// Read one request from a persistent connection.
///
/// Returns `Ok(None)` when the peer closed the connection between requests.
/// `Expect: 100-continue` is answered on `writer` before the body is read.
pub async fn read_request<R, W>(reader: &mut R, writer: &mut W, max_body: usize) -> Result<Option<HttpRequest>>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = Vec::new();
    loop {
        let Some(line) = read_line(reader).await? else {
            if lines.is_empty() {
                return Ok(None);
            }
            return Err(InfraError::Http("connection closed inside headers".into()));
        };
        if line.is_empty() {
            // Tolerate stray CRLFs between pipelined requests.
            if lines.is_empty() {
                continue;
            }
            break;
        }
        if lines.len() > MAX_HEADERS {
            return Err(InfraError::Http("too many header lines".into()));
        }
        lines.push(line);
    }

    let head = parse_head(&lines)?;
    let length = head.body_length()?;

    if let BodyLength::Fixed(len) = length {
        if len > max_body {
            return Err(InfraError::RequestTooLarge { limit: max_body });
        }
    }

    if head
        .header("Expect")
        .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"))
    {
        writer.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await?;
        writer.flush().await?;
    }

    let body = match length {
        BodyLength::Fixed(len) => {
            let mut body = vec![0u8; len];
            reader.read_exact(&mut body).await?;
            body
        }
        BodyLength::Chunked => read_chunked(reader, max_body).await?,
    };

    Ok(Some(HttpRequest { head, body }))
}

async fn read_chunked<R: AsyncBufRead + Unpin>(reader: &mut R, max_body: usize) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let line = read_line(reader)
            .await?
            .ok_or_else(|| InfraError::Http("connection closed inside chunked body".into()))?;
        let size_field = line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_field, 16)
            .map_err(|_| InfraError::Http(format!("bad chunk size {size_field:?}")))?;

        if size == 0 {
            // Trailer section, terminated by a blank line.
            while let Some(trailer) = read_line(reader).await? {
                if trailer.is_empty() {
                    break;
                }
            }
            return Ok(body);
        }

        if size > max_body.saturating_sub(body.len()) {
            return Err(InfraError::RequestTooLarge { limit: max_body });
        }
        let start = body.len();
        body.resize(start + size, 0);
        reader.read_exact(&mut body[start..]).await?;

        // CRLF after the chunk data.
        read_line(reader).await?;
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// Standard reason phrase for the status codes this server sends.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Request Entity Too Large",
        415 => "Unsupported Media Type",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// An outgoing response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<&'static str>,
    pub body: Vec<u8>,
    pub extra_headers: Vec<(&'static str, String)>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            content_type: None,
            body: Vec::new(),
            extra_headers: Vec::new(),
        }
    }

    pub fn ipp(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type: Some(IPP_CONTENT_TYPE),
            body,
            extra_headers: Vec::new(),
        }
    }

    pub fn html(body: String) -> Self {
        Self {
            status: 200,
            content_type: Some("text/html; charset=utf-8"),
            body: body.into_bytes(),
            extra_headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.extra_headers.push((name, value.into()));
        self
    }

    /// Serialize the status line, headers and (unless `head_only`) the body.
    pub fn to_bytes(&self, keep_alive: bool, head_only: bool) -> Vec<u8> {
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status, reason_phrase(self.status));
        if let Some(content_type) = self.content_type {
            out.push_str(&format!("Content-Type: {content_type}\r\n"));
        }
        out.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        for (name, value) in &self.extra_headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str(if keep_alive {
            "Connection: keep-alive\r\n\r\n"
        } else {
            "Connection: close\r\n\r\n"
        });

        let mut bytes = out.into_bytes();
        if !head_only {
            bytes.extend_from_slice(&self.body);
        }
        bytes
    }
}

/// Write a response and flush it.
pub async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &HttpResponse,
    keep_alive: bool,
    head_only: bool,
) -> Result<()> {
    writer.write_all(&response.to_bytes(keep_alive, head_only)).await?;
    writer.flush().await?;
    Ok(())
}
