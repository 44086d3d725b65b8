//! Shared, keyed `reqwest::Client` pool.
//!
//! Every agent talks to many peers over the lifetime of a league (a Referee
//! calls back into dozens of Players; a League Manager calls out to every
//! registered Referee). Opening a fresh TCP connection per call wastes a
//! handshake on every single RPC. Instead we keep one pooled client per
//! remote host and let `reqwest`'s own idle-connection pool do the reuse.

use std::time::Duration;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use reqwest::Client;

static CLIENTS: Lazy<DashMap<String, Client>> = Lazy::new(DashMap::new);

/// Returns the pooled client for `base_url`, creating and caching one on
/// first use. `base_url` should be the scheme+host+port portion of the
/// peer's endpoint (e.g. `http://127.0.0.1:8101`) so that callers to the
/// same host share one pool regardless of path.
pub fn pooled_client(base_url: &str) -> Client {
    if let Some(existing) = CLIENTS.get(base_url) {
        return existing.clone();
    }
    let client = create_pooled_client();
    CLIENTS.insert(base_url.to_string(), client.clone());
    client
}

/// Builds a `reqwest::Client` tuned for many short-lived JSON-RPC calls to
/// a small, stable set of peers: keep idle connections warm, cap how many
/// pile up per host, and never let a single call hang past the RPC-level
/// deadline that callers layer on top with `tokio::time::timeout`.
fn create_pooled_client() -> Client {
    Client::builder()
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(8)
        .connect_timeout(Duration::from_secs(5))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .expect("reqwest client builder with only valid static settings")
}

/// Evicts the cached client for `base_url`, if any. Used when a peer is
/// known to have gone away (e.g. a Referee reassigns a Match after a Player
/// endpoint starts refusing connections) so a future retry does not reuse
/// a poisoned keep-alive connection.
pub fn evict(base_url: &str) {
    CLIENTS.remove(base_url);
}
