//! HTTP client pool for maintaining persistent connections.
//!
//! Provides a process-wide cache of [`reqwest::Client`]s keyed by base URL, so
//! repeated calls to the same provider endpoint reuse connections instead of
//! paying DNS/TLS setup cost on every chat call. Each base URL gets its own
//! configured client with connection pooling enabled.

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

lazy_static! {
    static ref CLIENT_POOL: Mutex<HashMap<String, reqwest::Client>> = Mutex::new(HashMap::new());
}

/// Creates or retrieves a shared HTTP client for the given base URL.
///
/// The client is configured with:
/// - Connection pooling with up to 100 idle connections per host
/// - 90-second idle timeout for persistent connections
/// - TCP keepalive to maintain long-lived connections
/// - 30-second connection timeout
pub fn get_or_create_client(base_url: &str) -> reqwest::Client {
    let mut pool = CLIENT_POOL.lock().expect("client pool mutex poisoned");
    pool.entry(base_url.to_string())
        .or_insert_with(create_pooled_client)
        .clone()
}

fn create_pooled_client() -> reqwest::Client {
    reqwest::ClientBuilder::new()
        .pool_max_idle_per_host(100)
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .expect("failed to build HTTP client")
}
