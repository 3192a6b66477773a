use std::net::SocketAddr;

use dashmap::DashMap;

use crate::error::EngineError;

/// Per-engine cache of resolved addresses, keyed by `(host, port)`.
#[derive(Debug, Default)]
pub struct DnsCache {
    entries: DashMap<(String, u16), SocketAddr>,
}

impl DnsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr, EngineError> {
        let key = (host.to_string(), port);
        if let Some(address) = self.entries.get(&key) {
            return Ok(*address);
        }

        let lookup_host = host.trim_start_matches('[').trim_end_matches(']');
        let address = tokio::net::lookup_host((lookup_host, port))
            .await
            .map_err(|e| EngineError::Dns {
                host: host.to_string(),
                reason: e.to_string(),
            })?
            .next()
            .ok_or_else(|| EngineError::Dns {
                host: host.to_string(),
                reason: "no addresses returned".to_string(),
            })?;
        tracing::debug!(host = %host, port, address = %address, "Resolved host");
        self.entries.insert(key, address);
        Ok(address)
    }

    pub fn invalidate(&self, host: &str) {
        self.entries.retain(|(h, _), _| h != host);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_caches_address() {
        let cache = DnsCache::new();
        let first = cache.resolve("127.0.0.1", 8080).await.unwrap();
        let second = cache.resolve("127.0.0.1", 8080).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.port(), 8080);
        assert_eq!(cache.len(), 1);

        cache.invalidate("127.0.0.1");
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_bracketed_ipv6() {
        let cache = DnsCache::new();
        let address = cache.resolve("[::1]", 80).await.unwrap();
        assert!(address.is_ipv6());
    }
}
