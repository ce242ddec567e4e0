//! Internet reachability probe and local-network URL detection
//!
//! Monitors skip remote sites while the machine is offline so a dead uplink
//! is not misreported as every site being down. The probe result is cached
//! briefly because many widgets may ask during a single refresh pass.

use reqwest::Client;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// How long a probe result stays valid before the endpoints are hit again.
pub const CONNECTIVITY_CACHE_TTL: Duration = Duration::from_secs(10);

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

const DEFAULT_PROBE_ENDPOINTS: [&str; 2] = ["https://1.1.1.1", "https://dns.quad9.net"];

#[derive(Debug, Clone, Copy)]
struct CachedResult {
    reachable: bool,
    checked_at: Option<Instant>,
}

impl CachedResult {
    fn is_fresh(&self, ttl: Duration) -> bool {
        match self.checked_at {
            Some(at) => at.elapsed() < ttl,
            None => false,
        }
    }
}

/// Cached internet reachability check.
#[derive(Debug)]
pub struct ConnectivityProbe {
    client: Client,
    endpoints: Vec<String>,
    ttl: Duration,
    cache: RwLock<CachedResult>,
}

impl ConnectivityProbe {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            endpoints: DEFAULT_PROBE_ENDPOINTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ttl: CONNECTIVITY_CACHE_TTL,
            cache: RwLock::new(CachedResult {
                reachable: true,
                checked_at: None,
            }),
        }
    }

    pub fn with_endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Whether the internet currently looks reachable.
    ///
    /// A fresh cached result is returned without any network traffic.
    /// Otherwise the probe endpoints are tried in order and the first one
    /// that answers at all, regardless of status code, counts as reachable.
    pub async fn is_reachable(&self) -> bool {
        {
            let cache = self.cache.read().await;
            if cache.is_fresh(self.ttl) {
                return cache.reachable;
            }
        }

        let mut cache = self.cache.write().await;
        // Another task may have finished the probe while we waited for
        // the write lock.
        if cache.is_fresh(self.ttl) {
            return cache.reachable;
        }

        let reachable = self.probe_endpoints().await;
        *cache = CachedResult {
            reachable,
            checked_at: Some(Instant::now()),
        };

        reachable
    }

    async fn probe_endpoints(&self) -> bool {
        for endpoint in &self.endpoints {
            match self
                .client
                .head(endpoint)
                .timeout(PROBE_TIMEOUT)
                .send()
                .await
            {
                Ok(_) => return true,
                Err(err) => {
                    debug!(endpoint = %endpoint, error = %err, "connectivity probe endpoint unreachable");
                }
            }
        }

        false
    }
}

/// Whether a URL points at this machine or the local network.
///
/// Hostnames are resolved so names that map to private ranges count as
/// local. Unparseable URLs and failed lookups are treated as remote, which
/// errs on the side of skipping them while offline.
pub async fn is_local_url(raw: &str) -> bool {
    let Ok(url) = reqwest::Url::parse(raw) else {
        return false;
    };

    let host = match url.host_str() {
        Some(host) if !host.is_empty() => host,
        _ => return true,
    };

    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }

    // IPv6 hosts come back bracketed from the URL parser.
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return is_local_ip(ip);
    }

    let port = url.port_or_known_default().unwrap_or(80);
    match tokio::net::lookup_host((bare, port)).await {
        Ok(mut addrs) => match addrs.next() {
            Some(addr) => is_local_ip(addr.ip()),
            None => false,
        },
        Err(_) => false,
    }
}

fn is_local_ip(ip: IpAddr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return true;
    }

    match ip {
        IpAddr::V4(v4) => v4.is_private(),
        // Unique local addresses, fc00::/7
        IpAddr::V6(v6) => (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}
