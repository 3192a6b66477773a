use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::Instant;

use super::framing::{encode_request, HttpTarget};
use super::response::{read_response, HttpResponse};
use crate::core::RuntimeContext;
use crate::engines::action::{Action, EngineType, PreparedAction, SocketConfig};
use crate::engines::dns::DnsCache;
use crate::engines::engine::{BeforeSend, Engine};
use crate::engines::pool::{ConnectionPool, PoolLease};
use crate::engines::result::{ActionResult, TimingRecorder, ERROR_STATUS, TIMEOUT_STATUS};
use crate::error::EngineError;

/// A pooled keep-alive connection.
pub struct HttpConnection {
    address: SocketAddr,
    stream: BufReader<TcpStream>,
}

struct Exchange {
    response: HttpResponse,
    url: String,
    redirects: u32,
}

enum AttemptError {
    Engine(EngineError),
    RedirectTimeout { url: String, redirects: u32 },
}

impl From<EngineError> for AttemptError {
    fn from(value: EngineError) -> Self {
        AttemptError::Engine(value)
    }
}

/// HTTP/1.1 client engine. GraphQL actions ride on it as JSON POSTs.
pub struct HttpEngine {
    engine_type: EngineType,
    dns: DnsCache,
    pool: ConnectionPool<HttpConnection>,
    actions: DashMap<String, PreparedAction>,
    runtime: RuntimeContext,
}

impl HttpEngine {
    pub fn new(engine_type: EngineType, pool_size: usize, runtime: RuntimeContext) -> Self {
        Self {
            engine_type,
            dns: DnsCache::new(),
            pool: ConnectionPool::new(pool_size),
            actions: DashMap::new(),
            runtime,
        }
    }

    pub fn http(pool_size: usize) -> Self {
        Self::new(EngineType::Http, pool_size, RuntimeContext::default())
    }

    async fn socket_for(&self, target: &HttpTarget) -> Result<SocketConfig, EngineError> {
        let address = self.dns.resolve(&target.host, target.port).await?;
        Ok(SocketConfig {
            scheme: target.url.scheme().to_string(),
            host: target.host.clone(),
            port: target.port,
            address,
            path: target.path.clone(),
        })
    }

    /// Request bytes and address for `action`, reusing the registered framing
    /// when the action is unchanged since `prepare`.
    async fn materialize(&self, action: &Action) -> Result<(SocketAddr, HttpTarget, Vec<u8>), EngineError> {
        let target = HttpTarget::parse(&action.url)?;
        if let Some(prepared) = self.actions.get(&action.name) {
            if prepared.action == *action {
                return Ok((prepared.socket.address, target, prepared.request.clone()));
            }
        }
        let socket = self.socket_for(&target).await?;
        let request = encode_request(action, &target);
        Ok((socket.address, target, request))
    }

    async fn connect(address: SocketAddr, timeout: Duration) -> Result<HttpConnection, EngineError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
            .await
            .map_err(|_| EngineError::ConnectTimeout {
                address: address.to_string(),
                timeout,
            })?
            .map_err(|e| EngineError::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true)?;
        Ok(HttpConnection {
            address,
            stream: BufReader::new(stream),
        })
    }

    /// Writes `request` and reads one response on `conn`.
    async fn exchange(
        conn: &mut HttpConnection,
        request: &[u8],
        head_request: bool,
        deadline: Instant,
        action: &Action,
        recorder: &mut TimingRecorder<'_>,
    ) -> Result<HttpResponse, EngineError> {
        let total = action.timeouts.total_timeout;
        let remaining = deadline.saturating_duration_since(Instant::now());
        let write = async {
            conn.stream.get_mut().write_all(request).await?;
            conn.stream.get_mut().flush().await
        };
        tokio::time::timeout(remaining, write)
            .await
            .map_err(|_| EngineError::Timeout(total))?
            .map_err(|e| EngineError::ConnectionClosed(e.to_string()))?;
        recorder.mark_write_end();

        let remaining = deadline.saturating_duration_since(Instant::now());
        tokio::time::timeout(remaining, read_response(&mut conn.stream, head_request))
            .await
            .map_err(|_| EngineError::Timeout(total))?
    }

    async fn attempt(
        &self,
        action: &Action,
        lease: &mut PoolLease<'_, HttpConnection>,
        recorder: &mut TimingRecorder<'_>,
    ) -> Result<(Exchange, Option<HttpConnection>), AttemptError> {
        let deadline = Instant::now() + action.timeouts.total_timeout;
        let (mut address, mut target, mut request) = self.materialize(action).await?;
        let mut connection = lease.take().filter(|c| c.address == address);
        let mut redirects_left = if self.engine_type.follows_redirects() {
            action.redirects
        } else {
            0
        };
        let mut redirects = 0;
        let head_request = action.method == "HEAD";

        loop {
            let (mut conn, mut reused) = match connection.take() {
                Some(conn) => (conn, true),
                None => (Self::connect(address, action.timeouts.connect_timeout).await?, false),
            };
            recorder.mark_connect_end();

            let response = loop {
                match Self::exchange(&mut conn, &request, head_request, deadline, action, recorder).await {
                    // The server may drop an idle keep-alive connection at any time.
                    Err(EngineError::ConnectionClosed(reason)) if reused => {
                        tracing::trace!(action = %action.name, %reason, "Reconnecting stale connection");
                        conn = Self::connect(address, action.timeouts.connect_timeout).await?;
                        reused = false;
                        recorder.mark_connect_end();
                    }
                    other => break other?,
                }
            };
            if response.reusable {
                connection = Some(conn);
            }

            let location = response.header("location").map(str::to_string);
            match location {
                Some(location) if response.is_redirect() && redirects_left > 0 => {
                    let next_url = target.url.join(&location).map_err(|e| EngineError::InvalidUrl {
                        url: location.clone(),
                        reason: e.to_string(),
                    })?;
                    let next = HttpTarget::from_url(next_url)?;
                    redirects_left -= 1;
                    redirects += 1;
                    if Instant::now() >= deadline {
                        return Err(AttemptError::RedirectTimeout {
                            url: next.url.to_string(),
                            redirects,
                        });
                    }
                    if !next.same_origin(&target) {
                        address = self.socket_for(&next).await?.address;
                        connection = None;
                    }
                    let mut redirected = action.clone();
                    redirected.url = next.url.to_string();
                    if response.status == 303 {
                        redirected.method = "GET".to_string();
                        redirected.body = None;
                    }
                    request = encode_request(&redirected, &next);
                    target = next;
                    tracing::trace!(action = %action.name, url = %target.url, "Following redirect");
                }
                _ => {
                    return Ok((
                        Exchange {
                            response,
                            url: target.url.to_string(),
                            redirects,
                        },
                        connection,
                    ))
                }
            }
        }
    }
}

#[async_trait]
impl Engine for HttpEngine {
    fn engine_type(&self) -> EngineType {
        self.engine_type
    }

    async fn prepare(&self, action: &Action, owner: &str) -> Result<PreparedAction, EngineError> {
        if let Some(existing) = self.actions.get(&action.name) {
            if existing.action == *action {
                return Ok(existing.clone());
            }
        }
        let target = HttpTarget::parse(&action.url)?;
        let socket = self.socket_for(&target).await?;
        let prepared = PreparedAction {
            action: action.clone(),
            owner: owner.to_string(),
            request: encode_request(action, &target),
            socket,
        };
        self.actions.insert(action.name.clone(), prepared.clone());
        Ok(prepared)
    }

    fn register(&self, prepared: PreparedAction) {
        self.actions.insert(prepared.name().to_string(), prepared);
    }

    fn prepared(&self, name: &str) -> Option<PreparedAction> {
        self.actions.get(name).map(|p| p.clone())
    }

    fn registered(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    async fn execute_with(&self, action: &Action, before: &dyn BeforeSend) -> ActionResult {
        let clock = Arc::clone(&self.runtime.clock);
        let mut recorder = TimingRecorder::start(clock.as_ref());
        let mut result = ActionResult::new(&action.name, self.engine_type);
        result.action_id = self.runtime.id_generator.next_id();
        result.url = action.url.clone();
        result.method = action.method.clone();

        let mut lease = match self.pool.acquire().await {
            Ok(lease) => lease,
            Err(err) => {
                result.error = Some(err.to_string());
                result.status = Some(ERROR_STATUS);
                result.timings = recorder.finish();
                return result;
            }
        };
        recorder.mark_start();

        let action = match before.apply(action.clone()).await {
            Ok(action) => action,
            Err(err) => {
                result.error = Some(err.to_string());
                result.status = Some(ERROR_STATUS);
                result.timings = recorder.finish();
                return result;
            }
        };
        let action = &action;
        result.url = action.url.clone();
        result.method = action.method.clone();

        match self.attempt(action, &mut lease, &mut recorder).await {
            Ok((exchange, connection)) => {
                if let Some(connection) = connection {
                    lease.release(connection);
                }
                let response = exchange.response;
                result.status = Some(response.status);
                for (name, value) in response.headers {
                    result
                        .headers
                        .entry(name.to_ascii_lowercase())
                        .and_modify(|v| {
                            v.push_str(", ");
                            v.push_str(&value);
                        })
                        .or_insert(value);
                }
                if !response.body.is_empty() {
                    result.body = Some(String::from_utf8_lossy(&response.body).into_owned());
                }
                result.url = exchange.url;
                result.redirects = exchange.redirects;
            }
            Err(AttemptError::RedirectTimeout { url, redirects }) => {
                result.status = Some(TIMEOUT_STATUS);
                result.error = Some(format!(
                    "Redirect to {url} exceeded total timeout of {:?}",
                    action.timeouts.total_timeout
                ));
                result.redirects = redirects;
            }
            Err(AttemptError::Engine(err)) => {
                let status = match err {
                    EngineError::Timeout(_) | EngineError::ConnectTimeout { .. } => TIMEOUT_STATUS,
                    _ => ERROR_STATUS,
                };
                tracing::debug!(action = %action.name, error = %err, "Request failed");
                result.status = Some(status);
                result.error = Some(err.to_string());
                drop(lease);
                self.pool.reset();
            }
        }
        result.timings = recorder.finish();
        result
    }

    async fn check_connection(&self, name: &str) -> Result<(), EngineError> {
        let prepared = self
            .prepared(name)
            .ok_or_else(|| EngineError::NotPrepared(name.to_string()))?;
        let connection =
            Self::connect(prepared.socket.address, prepared.action.timeouts.connect_timeout).await?;
        drop(connection);
        Ok(())
    }

    async fn close(&self) {
        if self.pool.is_closed() {
            return;
        }
        let size = self.pool.size();
        // Wait for in-flight attempts before closing.
        self.pool.shrink(size).await;
        self.pool.close();
    }

    fn pool_size(&self) -> usize {
        self.pool.size()
    }

    async fn extend_pool(&self, by: usize) {
        self.pool.extend(by);
    }

    async fn shrink_pool(&self, by: usize) {
        self.pool.shrink(by).await;
    }
}
