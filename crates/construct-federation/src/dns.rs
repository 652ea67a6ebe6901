//! Matrix server discovery (§4.8, §6): SRV-first delegation with a
//! single-flight cache shared across callers, backed by the standard
//! RFC 1035 resolver stack rather than a hand-rolled UDP client.

use std::net::SocketAddr;
use std::time::Duration;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::Resolver;

use construct_cache::KeyedCache;

use crate::error::FedError;

/// Mirrors the original resolver's retry/timeout/rate-limit knobs (§2 of
/// the expanded spec), even though the underlying transport is a library
/// resolver rather than a bespoke UDP client.
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub timeout: Duration,
    pub retry_max: usize,
    pub send_rate: Duration,
    pub send_burst: usize,
    pub default_port: u16,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retry_max: 4,
            send_rate: Duration::from_millis(10),
            send_burst: 4,
            default_port: 8448,
        }
    }
}

/// Where a federation request to some host should actually connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPeer {
    pub target: String,
    pub addr: SocketAddr,
}

/// Resolves remote homeserver names to connectable addresses, caching
/// results and collapsing concurrent lookups of the same name into one
/// resolve (§4.8, §8 property 9).
pub struct FederationResolver {
    inner: Resolver<TokioConnectionProvider>,
    settings: ResolverSettings,
    cache: KeyedCache<String, ResolvedPeer, FedError>,
}

impl FederationResolver {
    pub fn new(settings: ResolverSettings) -> Self {
        let mut opts = ResolverOpts::default();
        opts.timeout = settings.timeout;
        opts.attempts = settings.retry_max;
        let inner = Resolver::builder_with_config(ResolverConfig::default(), TokioConnectionProvider::default())
            .with_options(opts)
            .build();
        Self {
            inner,
            settings,
            cache: KeyedCache::new(1024),
        }
    }

    /// SRV(`_matrix._tcp.<host>`) → target:port if present; else
    /// A/AAAA(`host`) on the configured default port (§4.8).
    pub async fn resolve(&self, host: &str) -> Result<ResolvedPeer, std::sync::Arc<FedError>> {
        self.cache
            .get_or_compute(host.to_owned(), || self.resolve_uncached(host))
            .await
    }

    async fn resolve_uncached(&self, host: &str) -> Result<ResolvedPeer, FedError> {
        let srv_name = format!("_matrix._tcp.{host}");
        if let Ok(srv) = self.inner.srv_lookup(&srv_name).await {
            if let Some(record) = srv.iter().next() {
                let target = record.target().to_utf8();
                let target = target.trim_end_matches('.').to_owned();
                if let Ok(lookup) = self.inner.lookup_ip(&target).await {
                    if let Some(ip) = lookup.iter().next() {
                        return Ok(ResolvedPeer {
                            target,
                            addr: SocketAddr::new(ip, record.port()),
                        });
                    }
                }
            }
        }

        let lookup = self
            .inner
            .lookup_ip(host)
            .await
            .map_err(|err| FedError::Network(err.to_string()))?;
        let ip = lookup
            .iter()
            .next()
            .ok_or_else(|| FedError::NotFound(host.to_owned()))?;
        Ok(ResolvedPeer {
            target: host.to_owned(),
            addr: SocketAddr::new(ip, self.settings.default_port),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_match_the_documented_defaults() {
        let settings = ResolverSettings::default();
        assert_eq!(settings.timeout, Duration::from_secs(10));
        assert_eq!(settings.retry_max, 4);
        assert_eq!(settings.default_port, 8448);
    }
}
