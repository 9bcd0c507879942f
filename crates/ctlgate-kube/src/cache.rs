//! Response cache in front of an `ApiClient`
//!
//! `CachingClient` implements `ApiClient` by wrapping another implementation.
//! Identical requests (method, path, body, headers, query and the full
//! connection profile) within the TTL window are answered from memory,
//! failures included. A background sweep reclaims expired entries
//! independently of traffic.
//!
//! Two concurrent misses for the same fingerprint may both reach the inner
//! client; the later write wins.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::client::{ApiClient, ApiRequest, RawResponse};
use crate::discovery::ApiGroupDiscovery;
use crate::error::Result;
use crate::profile::ConnectionProfile;

/// Default lifetime of a cached response or error
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// Default period of the expiry sweep
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

type EntryMap<T> = DashMap<String, CacheEntry<T>>;

/// A cached outcome with its own expiry
struct CacheEntry<T> {
    value: Result<T>,
    expires_at: Instant,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// `ApiClient` decorator with TTL-based positive and negative caching
pub struct CachingClient {
    inner: Arc<dyn ApiClient>,
    ttl: Duration,
    responses: Arc<EntryMap<RawResponse>>,
    discoveries: Arc<EntryMap<Vec<ApiGroupDiscovery>>>,
}

impl CachingClient {
    /// Wrap `inner`, keeping entries for `ttl`
    pub fn new(inner: Arc<dyn ApiClient>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            responses: Arc::new(DashMap::new()),
            discoveries: Arc::new(DashMap::new()),
        }
    }

    /// Number of stored entries, expired or not
    pub fn len(&self) -> usize {
        self.responses.len() + self.discoveries.len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove expired entries, returning how many were dropped
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        sweep(&self.responses, now) + sweep(&self.discoveries, now)
    }

    /// Start the periodic expiry sweep
    ///
    /// The task ends on its own once the cache has been dropped.
    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let responses: Weak<EntryMap<RawResponse>> = Arc::downgrade(&self.responses);
        let discoveries: Weak<EntryMap<Vec<ApiGroupDiscovery>>> =
            Arc::downgrade(&self.discoveries);

        // Anchored at spawn time, not at the task's first poll
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);

        tokio::spawn(async move {
            loop {
                ticker.tick().await;
                let (Some(responses), Some(discoveries)) =
                    (responses.upgrade(), discoveries.upgrade())
                else {
                    break;
                };

                let now = Instant::now();
                let removed = sweep(&responses, now) + sweep(&discoveries, now);
                if removed > 0 {
                    debug!(removed, "Swept expired cache entries");
                }
            }
        })
    }

    fn store<T>(&self, map: &EntryMap<T>, key: String, value: Result<T>) {
        map.insert(
            key,
            CacheEntry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }
}

fn lookup<T: Clone>(map: &EntryMap<T>, key: &str) -> Option<Result<T>> {
    let now = Instant::now();
    map.get(key)
        .filter(|entry| !entry.is_expired(now))
        .map(|entry| entry.value.clone())
}

fn sweep<T>(map: &EntryMap<T>, now: Instant) -> usize {
    let before = map.len();
    map.retain(|_, entry| !entry.is_expired(now));
    before.saturating_sub(map.len())
}

#[derive(Serialize)]
struct RequestFingerprint<'a> {
    method: &'a str,
    path: &'a str,
    body: &'a [u8],
    headers: Vec<(&'a str, &'a [u8])>,
    query: &'a [(String, String)],
    profile: &'a ConnectionProfile,
}

#[derive(Serialize)]
struct DiscoveryFingerprint<'a> {
    profile: &'a ConnectionProfile,
    category: &'a str,
}

/// Cache key for a request sent with a profile
///
/// Header order does not affect the key; query order does.
pub fn request_fingerprint(request: &ApiRequest, profile: &ConnectionProfile) -> Result<String> {
    let mut headers: Vec<_> = request
        .headers
        .iter()
        .map(|(name, value)| (name.as_str(), value.as_bytes()))
        .collect();
    headers.sort();

    digest(&RequestFingerprint {
        method: request.method.as_str(),
        path: &request.path,
        body: &request.body,
        headers,
        query: &request.query,
        profile,
    })
}

/// Cache key for a category discovery with a profile
pub fn discovery_fingerprint(profile: &ConnectionProfile, category: &str) -> Result<String> {
    digest(&DiscoveryFingerprint { profile, category })
}

fn digest<T: Serialize>(value: &T) -> Result<String> {
    let encoded = serde_json::to_vec(value)?;
    Ok(hex::encode(Sha256::digest(&encoded)))
}

#[async_trait]
impl ApiClient for CachingClient {
    async fn send(
        &self,
        request: ApiRequest,
        profile: &ConnectionProfile,
    ) -> Result<RawResponse> {
        let key = request_fingerprint(&request, profile)?;

        if let Some(cached) = lookup(&self.responses, &key) {
            debug!(
                method = %request.method,
                path = %request.path,
                "Returning cached result"
            );
            return cached;
        }

        let result = self.inner.send(request, profile).await;
        self.store(&self.responses, key, result.clone());
        result
    }

    async fn discover_by_category(
        &self,
        profile: &ConnectionProfile,
        category: &str,
    ) -> Result<Vec<ApiGroupDiscovery>> {
        let key = discovery_fingerprint(profile, category)?;

        if let Some(cached) = lookup(&self.discoveries, &key) {
            debug!(category = %category, "Returning cached discovery");
            return cached;
        }

        let result = self.inner.discover_by_category(profile, category).await;
        self.store(&self.discoveries, key, result.clone());
        result
    }
}
