//! Host name resolution

use async_trait::async_trait;
use std::net::SocketAddr;

use crate::{Error, Result};

#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve `host` to every known address, each carrying `port`
    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>>;
}

/// Resolver backed by the system's name service
#[derive(Debug, Default, Clone)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| Error::resolve(format!("{}: {}", host, e)))?
            .collect();
        if addrs.is_empty() {
            return Err(Error::resolve(format!("{}: no addresses", host)));
        }
        Ok(addrs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_literal_addresses_resolve() {
        let resolver = SystemResolver;
        let v4 = resolver.resolve("192.0.2.1", 5060).await.unwrap();
        assert_eq!(v4, vec!["192.0.2.1:5060".parse().unwrap()]);
        let v6 = resolver.resolve("2001:db8::1", 5070).await.unwrap();
        assert_eq!(v6, vec!["[2001:db8::1]:5070".parse().unwrap()]);
    }
}
