//! Shared HTTP client pool, carried over from the reference crate's
//! `http_client_pool.rs` near-verbatim: a `DashMap` cache of tuned `reqwest::Client`s
//! keyed by base URL, behind a `once_cell::sync::Lazy` static, so adapters never
//! construct a new client per call.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::time::Duration;

static CLIENT_POOL: Lazy<DashMap<String, reqwest::Client>> = Lazy::new(DashMap::new);

pub fn get_or_create_client(base_url: &str) -> reqwest::Client {
    CLIENT_POOL.entry(base_url.to_string()).or_insert_with(create_pooled_client).clone()
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_base_urls_get_distinct_pool_entries() {
        let a = "https://pool-test-a.example.com";
        let b = "https://pool-test-b.example.com";
        let _ = get_or_create_client(a);
        let _ = get_or_create_client(b);
        assert!(CLIENT_POOL.contains_key(a));
        assert!(CLIENT_POOL.contains_key(b));
    }

    #[test]
    fn repeated_calls_reuse_the_same_pool_entry() {
        let url = "https://pool-test-reuse.example.com";
        let _ = get_or_create_client(url);
        for _ in 0..5 {
            let _ = get_or_create_client(url);
        }
        assert!(CLIENT_POOL.contains_key(url));
    }
}
