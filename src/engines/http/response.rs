//! HTTP/1.1 response parsing.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::EngineError;

const MAX_HEADER_LINE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Whether the connection may carry another request.
    pub reusable: bool,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, EngineError> {
    let mut line = Vec::new();
    let read = (&mut *reader)
        .take(MAX_HEADER_LINE as u64 + 1)
        .read_until(b'\n', &mut line)
        .await?;
    if read == 0 {
        return Err(EngineError::MalformedResponse("unexpected end of response".to_string()));
    }
    if line.len() > MAX_HEADER_LINE {
        return Err(EngineError::MalformedResponse("header line too long".to_string()));
    }
    while matches!(line.last(), Some(b'\n' | b'\r')) {
        line.pop();
    }
    String::from_utf8(line).map_err(|_| EngineError::MalformedResponse("non UTF-8 header".to_string()))
}

fn parse_status_line(line: &str) -> Result<(u16, String), EngineError> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(EngineError::MalformedResponse(format!("bad status line: {line}")));
    }
    let status = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| EngineError::MalformedResponse(format!("bad status code: {line}")))?;
    let reason = parts.next().unwrap_or_default().to_string();
    Ok((status, reason))
}

async fn read_chunked<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, EngineError> {
    let mut body = Vec::new();
    loop {
        let line = read_line(reader).await?;
        let size_field = line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_field, 16)
            .map_err(|_| EngineError::MalformedResponse(format!("bad chunk size: {line}")))?;
        if size == 0 {
            // Trailer section ends with an empty line.
            loop {
                if read_line(reader).await?.is_empty() {
                    break;
                }
            }
            return Ok(body);
        }
        body.len()
            .checked_add(size)
            .ok_or_else(|| EngineError::MalformedResponse(format!("chunk size overflows: {line}")))?;
        read_exact_len(reader, size, &mut body).await?;
        let terminator = read_line(reader).await?;
        if !terminator.is_empty() {
            return Err(EngineError::MalformedResponse("missing chunk terminator".to_string()));
        }
    }
}

/// Appends exactly `len` bytes to `body`. The buffer grows with what the peer
/// actually sends, so a declared length is never allocated up front.
async fn read_exact_len<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    len: usize,
    body: &mut Vec<u8>,
) -> Result<(), EngineError> {
    let read = (&mut *reader).take(len as u64).read_to_end(body).await?;
    if read < len {
        return Err(EngineError::MalformedResponse(format!(
            "body truncated: expected {len} bytes, got {read}"
        )));
    }
    Ok(())
}

/// Reads one response. `head_request` suppresses the body as HEAD demands.
pub async fn read_response<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    head_request: bool,
) -> Result<HttpResponse, EngineError> {
    let buffered = reader
        .fill_buf()
        .await
        .map_err(|e| EngineError::ConnectionClosed(e.to_string()))?;
    if buffered.is_empty() {
        return Err(EngineError::ConnectionClosed("end of stream".to_string()));
    }
    let (mut status, mut reason) = parse_status_line(&read_line(reader).await?)?;
    let mut headers = read_headers(reader).await?;

    // Interim responses precede the final one.
    while (100..200).contains(&status) && status != 101 {
        (status, reason) = parse_status_line(&read_line(reader).await?)?;
        headers = read_headers(reader).await?;
    }

    let mut response = HttpResponse {
        status,
        reason,
        headers,
        body: Vec::new(),
        reusable: true,
    };
    if response
        .header("connection")
        .map(|v| v.eq_ignore_ascii_case("close"))
        .unwrap_or(false)
    {
        response.reusable = false;
    }

    let bodiless = head_request || status == 204 || status == 304 || (100..200).contains(&status);
    if bodiless {
        return Ok(response);
    }

    let chunked = response
        .header("transfer-encoding")
        .map(|v| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false);
    if chunked {
        response.body = read_chunked(reader).await?;
    } else if let Some(length) = response.header("content-length") {
        let length: usize = length
            .trim()
            .parse()
            .map_err(|_| EngineError::MalformedResponse(format!("bad content-length: {length}")))?;
        read_exact_len(reader, length, &mut response.body).await?;
    } else {
        reader.read_to_end(&mut response.body).await?;
        response.reusable = false;
    }
    Ok(response)
}

async fn read_headers<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<Vec<(String, String)>, EngineError> {
    let mut headers = Vec::new();
    loop {
        let line = read_line(reader).await?;
        if line.is_empty() {
            return Ok(headers);
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| EngineError::MalformedResponse(format!("bad header: {line}")))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::BufReader;

    use super::*;

    async fn parse(raw: &str) -> Result<HttpResponse, EngineError> {
        let mut reader = BufReader::new(raw.as_bytes());
        read_response(&mut reader, false).await
    }

    #[tokio::test]
    async fn test_content_length_body() {
        let response = parse("HTTP/1.1 200 OK\r\nContent-Length: 5\r\nX-Id: 1\r\n\r\nhello")
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.reason, "OK");
        assert_eq!(response.body, b"hello");
        assert_eq!(response.header("x-id"), Some("1"));
        assert!(response.reusable);
    }

    #[tokio::test]
    async fn test_chunked_body() {
        let raw = "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5;ext=1\r\npedia\r\n0\r\nX-Trailer: y\r\n\r\n";
        let response = parse(raw).await.unwrap();
        assert_eq!(response.body, b"Wikipedia");
        assert!(response.reusable);
    }

    #[tokio::test]
    async fn test_close_delimited_body() {
        let response = parse("HTTP/1.1 200 OK\r\n\r\nuntil close").await.unwrap();
        assert_eq!(response.body, b"until close");
        assert!(!response.reusable);
    }

    #[tokio::test]
    async fn test_interim_response_is_skipped() {
        let raw = "HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 201 Created\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
        let response = parse(raw).await.unwrap();
        assert_eq!(response.status, 201);
        assert!(!response.reusable);
    }

    #[tokio::test]
    async fn test_head_has_no_body() {
        let mut reader = BufReader::new("HTTP/1.1 200 OK\r\nContent-Length: 42\r\n\r\n".as_bytes());
        let response = read_response(&mut reader, true).await.unwrap();
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_status_line() {
        assert!(matches!(
            parse("SPDY/3 200 OK\r\n\r\n").await,
            Err(EngineError::MalformedResponse(_))
        ));
        assert!(matches!(parse("").await, Err(EngineError::ConnectionClosed(_))));
        assert!(matches!(
            parse("HTTP/1.1 200 OK\r\nContent-").await,
            Err(EngineError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_huge_content_length_is_rejected() {
        let raw = "HTTP/1.1 200 OK\r\nContent-Length: 18446744073709551615\r\n\r\nshort";
        match parse(raw).await {
            Err(EngineError::MalformedResponse(message)) => assert!(message.contains("truncated"), "{message}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_huge_chunk_size_is_rejected() {
        let raw = "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nffffffffffffffff\r\nabc\r\n0\r\n\r\n";
        assert!(matches!(parse(raw).await, Err(EngineError::MalformedResponse(_))));

        let overflow = "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n1\r\na\r\nffffffffffffffff\r\n";
        assert!(matches!(parse(overflow).await, Err(EngineError::MalformedResponse(_))));
    }

    #[tokio::test]
    async fn test_header_line_is_bounded() {
        let raw = format!("HTTP/1.1 200 OK\r\nX-Big: {}\r\n\r\n", "a".repeat(MAX_HEADER_LINE * 2));
        let mut reader = BufReader::new(raw.as_bytes());
        match read_response(&mut reader, false).await {
            Err(EngineError::MalformedResponse(message)) => assert_eq!(message, "header line too long"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_redirect_detection() {
        let response = parse("HTTP/1.1 302 Found\r\nLocation: /next\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();
        assert!(response.is_redirect());
        assert_eq!(response.header("location"), Some("/next"));
    }
}
