//! HTTP/1.1 request framing.

use bytes::{BufMut, BytesMut};
use url::Url;

use crate::engines::action::Action;
use crate::error::EngineError;

const USER_AGENT: &str = concat!("stampede/", env!("CARGO_PKG_VERSION"));

/// Host, port and request target of an `http://` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTarget {
    pub url: Url,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl HttpTarget {
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        let url = Url::parse(raw).map_err(|e| EngineError::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;
        Self::from_url(url)
    }

    pub fn from_url(url: Url) -> Result<Self, EngineError> {
        if url.scheme() != "http" {
            return Err(EngineError::UnsupportedScheme(url.scheme().to_string()));
        }
        let host = url
            .host_str()
            .ok_or_else(|| EngineError::InvalidUrl {
                url: url.to_string(),
                reason: "missing host".to_string(),
            })?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(80);
        let path = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };
        Ok(Self {
            url,
            host,
            port,
            path,
        })
    }

    /// Value of the `Host` header; the port is omitted when it is the default.
    pub fn authority(&self) -> String {
        if self.port == 80 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn same_origin(&self, other: &HttpTarget) -> bool {
        self.host.eq_ignore_ascii_case(&other.host) && self.port == other.port
    }
}

fn has_header(action: &Action, name: &str) -> bool {
    action.headers.keys().any(|k| k.eq_ignore_ascii_case(name))
}

/// Serializes `action` as an HTTP/1.1 request addressed to `target`.
pub fn encode_request(action: &Action, target: &HttpTarget) -> Vec<u8> {
    let body = action.body.as_deref().unwrap_or("");
    let mut buf = BytesMut::with_capacity(256 + body.len());

    buf.put_slice(action.method.as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(target.path.as_bytes());
    buf.put_slice(b" HTTP/1.1\r\n");

    if !has_header(action, "host") {
        put_header(&mut buf, "Host", &target.authority());
    }
    if !has_header(action, "user-agent") {
        put_header(&mut buf, "User-Agent", USER_AGENT);
    }
    for (name, value) in &action.headers {
        put_header(&mut buf, name, value);
    }
    let sends_body = !body.is_empty() || matches!(action.method.as_str(), "POST" | "PUT" | "PATCH");
    if sends_body && !has_header(action, "content-length") {
        put_header(&mut buf, "Content-Length", &body.len().to_string());
    }
    buf.put_slice(b"\r\n");
    buf.put_slice(body.as_bytes());
    buf.to_vec()
}

fn put_header(buf: &mut BytesMut, name: &str, value: &str) {
    buf.put_slice(name.as_bytes());
    buf.put_slice(b": ");
    buf.put_slice(value.as_bytes());
    buf.put_slice(b"\r\n");
}
