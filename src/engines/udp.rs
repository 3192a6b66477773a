//! Datagram engine: one request datagram, one response datagram.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::net::UdpSocket;
use url::Url;

use super::action::{Action, EngineType, PreparedAction, SocketConfig};
use super::dns::DnsCache;
use super::engine::{BeforeSend, Engine};
use super::pool::ConnectionPool;
use super::result::{ActionResult, TimingRecorder, ERROR_STATUS, TIMEOUT_STATUS};
use crate::core::RuntimeContext;
use crate::error::EngineError;

const MAX_DATAGRAM: usize = 65_507;

struct UdpConnection {
    address: SocketAddr,
    socket: UdpSocket,
}

pub struct UdpEngine {
    dns: DnsCache,
    pool: ConnectionPool<UdpConnection>,
    actions: DashMap<String, PreparedAction>,
    runtime: RuntimeContext,
}

impl UdpEngine {
    pub fn new(pool_size: usize, runtime: RuntimeContext) -> Self {
        Self {
            dns: DnsCache::new(),
            pool: ConnectionPool::new(pool_size),
            actions: DashMap::new(),
            runtime,
        }
    }

    async fn socket_for(&self, raw: &str) -> Result<SocketConfig, EngineError> {
        let url = Url::parse(raw).map_err(|e| EngineError::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;
        if url.scheme() != "udp" {
            return Err(EngineError::UnsupportedScheme(url.scheme().to_string()));
        }
        let host = url.host_str().ok_or_else(|| EngineError::InvalidUrl {
            url: raw.to_string(),
            reason: "missing host".to_string(),
        })?;
        let port = url.port().ok_or_else(|| EngineError::InvalidUrl {
            url: raw.to_string(),
            reason: "missing port".to_string(),
        })?;
        let address = self.dns.resolve(host, port).await?;
        Ok(SocketConfig {
            scheme: "udp".to_string(),
            host: host.to_string(),
            port,
            address,
            path: url.path().to_string(),
        })
    }

    async fn bind(address: SocketAddr) -> Result<UdpConnection, EngineError> {
        let local = if address.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(address).await.map_err(|e| EngineError::Connect {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
        Ok(UdpConnection { address, socket })
    }

    async fn exchange(
        &self,
        action: &Action,
        connection: &UdpConnection,
        recorder: &mut TimingRecorder<'_>,
    ) -> Result<Vec<u8>, EngineError> {
        let payload = action.body.as_deref().unwrap_or("").as_bytes();
        connection.socket.send(payload).await?;
        recorder.mark_write_end();

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let timeout = action.timeouts.total_timeout;
        let read = tokio::time::timeout(timeout, connection.socket.recv(&mut buf))
            .await
            .map_err(|_| EngineError::Timeout(timeout))??;
        buf.truncate(read);
        Ok(buf)
    }
}

#[async_trait]
impl Engine for UdpEngine {
    fn engine_type(&self) -> EngineType {
        EngineType::Udp
    }

    async fn prepare(&self, action: &Action, owner: &str) -> Result<PreparedAction, EngineError> {
        if let Some(existing) = self.actions.get(&action.name) {
            if existing.action == *action {
                return Ok(existing.clone());
            }
        }
        let socket = self.socket_for(&action.url).await?;
        let prepared = PreparedAction {
            action: action.clone(),
            owner: owner.to_string(),
            socket,
            request: action.body.clone().unwrap_or_default().into_bytes(),
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
        let mut result = ActionResult::new(&action.name, EngineType::Udp);
        result.action_id = self.runtime.id_generator.next_id();
        result.url = action.url.clone();

        let acquired = match self.pool.acquire().await {
            Ok(lease) => {
                recorder.mark_start();
                match before.apply(action.clone()).await {
                    Ok(action) => Ok((lease, action)),
                    Err(err) => Err(err.to_string()),
                }
            }
            Err(err) => Err(err.to_string()),
        };
        let (mut lease, action) = match acquired {
            Ok(acquired) => acquired,
            Err(message) => {
                result.status = Some(ERROR_STATUS);
                result.error = Some(message);
                result.timings = recorder.finish();
                return result;
            }
        };
        result.url = action.url.clone();

        let outcome = async {
            let address = match self.prepared(&action.name) {
                Some(prepared) if prepared.action.url == action.url => prepared.socket.address,
                _ => self.socket_for(&action.url).await?.address,
            };
            let connection = match lease.take().filter(|c| c.address == address) {
                Some(connection) => connection,
                None => Self::bind(address).await?,
            };
            recorder.mark_connect_end();
            let body = self.exchange(&action, &connection, &mut recorder).await?;
            lease.release(connection);
            Ok::<_, EngineError>(body)
        }
        .await;

        match outcome {
            Ok(body) => {
                if !body.is_empty() {
                    result.body = Some(String::from_utf8_lossy(&body).into_owned());
                }
            }
            Err(err) => {
                result.status = Some(match err {
                    EngineError::Timeout(_) => TIMEOUT_STATUS,
                    _ => ERROR_STATUS,
                });
                result.error = Some(err.to_string());
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
        Self::bind(prepared.socket.address).await.map(|_| ())
    }

    async fn close(&self) {
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

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_echo_round_trip() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let address = server.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let (n, peer) = server.recv_from(&mut buf).await.unwrap();
            server.send_to(&buf[..n], peer).await.unwrap();
        });

        let engine = UdpEngine::new(1, RuntimeContext::default());
        let action = Action::new("echo", EngineType::Udp, format!("udp://{address}"))
            .with_body("ping");
        engine.prepare(&action, "s").await.unwrap();
        let result = engine.execute(&action).await;
        assert!(result.success(), "{:?}", result.error);
        assert_eq!(result.body.as_deref(), Some("ping"));
        assert!(result.timings.is_monotone());
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let address = server.local_addr().unwrap();
        let engine = UdpEngine::new(1, RuntimeContext::default());
        let action = Action::new("void", EngineType::Udp, format!("udp://{address}"))
            .with_body("ping")
            .with_timeouts(Duration::from_millis(50), Duration::from_millis(50));
        let result = engine.execute(&action).await;
        assert_eq!(result.status, Some(TIMEOUT_STATUS));
        drop(server);
    }

    #[tokio::test]
    async fn test_requires_port() {
        let engine = UdpEngine::new(1, RuntimeContext::default());
        let action = Action::new("x", EngineType::Udp, "udp://localhost");
        assert!(matches!(
            engine.prepare(&action, "s").await,
            Err(EngineError::InvalidUrl { .. })
        ));
    }
}
