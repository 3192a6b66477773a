use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Protocol family an action is executed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineType {
    Http,
    Http2,
    Http3,
    Grpc,
    Graphql,
    GraphqlHttp2,
    Websocket,
    Udp,
    Playwright,
    Task,
}

impl EngineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineType::Http => "http",
            EngineType::Http2 => "http2",
            EngineType::Http3 => "http3",
            EngineType::Grpc => "grpc",
            EngineType::Graphql => "graphql",
            EngineType::GraphqlHttp2 => "graphql-http2",
            EngineType::Websocket => "websocket",
            EngineType::Udp => "udp",
            EngineType::Playwright => "playwright",
            EngineType::Task => "task",
        }
    }

    /// Whether the HTTP redirect policy applies.
    pub fn follows_redirects(&self) -> bool {
        matches!(
            self,
            EngineType::Http | EngineType::Http2 | EngineType::Graphql | EngineType::GraphqlHttp2
        )
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(EngineType::Http),
            "http2" => Ok(EngineType::Http2),
            "http3" => Ok(EngineType::Http3),
            "grpc" => Ok(EngineType::Grpc),
            "graphql" => Ok(EngineType::Graphql),
            "graphql-http2" => Ok(EngineType::GraphqlHttp2),
            "websocket" => Ok(EngineType::Websocket),
            "udp" => Ok(EngineType::Udp),
            "playwright" => Ok(EngineType::Playwright),
            "task" => Ok(EngineType::Task),
            other => Err(EngineError::Unsupported(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionTimeouts {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    #[serde(default = "default_total_timeout")]
    pub total_timeout: Duration,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_total_timeout() -> Duration {
    Duration::from_secs(60)
}

impl Default for ActionTimeouts {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            total_timeout: default_total_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionMetadata {
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub user: Option<String>,
}

/// Protocol-specific request description, reused for many attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    pub engine: EngineType,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub metadata: ActionMetadata,
    #[serde(default)]
    pub timeouts: ActionTimeouts,
    #[serde(default = "default_redirects")]
    pub redirects: u32,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_redirects() -> u32 {
    3
}

impl Action {
    pub fn new(name: impl Into<String>, engine: EngineType, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            engine,
            url: url.into(),
            method: default_method(),
            headers: BTreeMap::new(),
            body: None,
            metadata: ActionMetadata::default(),
            timeouts: ActionTimeouts::default(),
            redirects: default_redirects(),
        }
    }

    pub fn http(name: impl Into<String>, method: &str, url: impl Into<String>) -> Self {
        Self::new(name, EngineType::Http, url).with_method(method)
    }

    /// GraphQL over HTTP/1.1: a JSON POST carrying the query.
    pub fn graphql(
        name: impl Into<String>,
        url: impl Into<String>,
        query: &str,
        variables: Option<serde_json::Value>,
    ) -> Self {
        let body = serde_json::json!({ "query": query, "variables": variables });
        Self::new(name, EngineType::Graphql, url)
            .with_method("POST")
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.method = method.to_ascii_uppercase();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.metadata.weight = Some(weight);
        self
    }

    pub fn with_timeouts(mut self, connect: Duration, total: Duration) -> Self {
        self.timeouts = ActionTimeouts {
            connect_timeout: connect,
            total_timeout: total,
        };
        self
    }

    pub fn with_redirects(mut self, redirects: u32) -> Self {
        self.redirects = redirects;
        self
    }
}

/// Resolved socket configuration for an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketConfig {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub address: SocketAddr,
    pub path: String,
}

/// An action after `prepare()`: resolved address and materialized framing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedAction {
    pub action: Action,
    /// Stage that declared the action; used to bind its hooks elsewhere.
    pub owner: String,
    pub socket: SocketConfig,
    pub request: Vec<u8>,
}

impl PreparedAction {
    pub fn name(&self) -> &str {
        &self.action.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_type_roundtrip() {
        for engine in [
            EngineType::Http,
            EngineType::Http2,
            EngineType::Http3,
            EngineType::Grpc,
            EngineType::Graphql,
            EngineType::GraphqlHttp2,
            EngineType::Websocket,
            EngineType::Udp,
            EngineType::Playwright,
            EngineType::Task,
        ] {
            assert_eq!(engine.as_str().parse::<EngineType>().unwrap(), engine);
        }
        assert!("smtp".parse::<EngineType>().is_err());
        assert_eq!(
            serde_json::to_string(&EngineType::GraphqlHttp2).unwrap(),
            "\"graphql-http2\""
        );
    }

    #[test]
    fn test_action_builders() {
        let action = Action::http("login", "post", "http://example.test/login")
            .with_header("x-test", "1")
            .with_body("{}");
        assert_eq!(action.method, "POST");
        assert_eq!(action.headers["x-test"], "1");
        assert_eq!(action.redirects, 3);

        let gql = Action::graphql("q", "http://example.test/graphql", "{ users { id } }", None);
        assert_eq!(gql.engine, EngineType::Graphql);
        assert!(gql.body.unwrap().contains("users"));
    }

    #[test]
    fn test_action_deserialize_defaults() {
        let action: Action =
            serde_json::from_str(r#"{"name":"a","engine":"http","url":"http://h/"}"#).unwrap();
        assert_eq!(action.method, "GET");
        assert_eq!(action.timeouts, ActionTimeouts::default());
    }
}
