//! Response capture: write a successful payload into the cache exactly once,
//! then emit it unchanged.
//!
//! [`Interceptor`] is the per-request state machine
//! (`Idle → Captured → Emitted`). [`cache_through`] is the decorator that puts
//! it to work: it wraps a fetch handler into a router handler that serves hits
//! from the [`CacheStore`] and routes every successful miss through an
//! `Interceptor`. Failures bypass the interceptor entirely, so nothing is
//! cached on an error path.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{CacheKey, CacheStore};
use crate::context::Context;
use crate::error::{ErrorEnvelope, ProxyError};
use crate::router::IntoHandler;
use crate::{Response, StatusCode};

/// Response header reporting whether the body came from the cache.
pub const CACHE_STATUS_HEADER: &str = "X-Cache";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Captured,
    /// Terminal.
    Emitted,
}

/// Out-of-order use of an [`Interceptor`]. The cache is left untouched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InterceptError {
    #[error("payload for {key} was already captured")]
    AlreadyCaptured { key: String },

    #[error("response for {key} was already emitted")]
    AlreadyEmitted { key: String },

    #[error("payload emitted for {key} differs from the captured one")]
    PayloadMismatch { key: String },
}

/// Captures one payload per request into the cache before it is emitted.
///
/// # Examples
///
/// ```
/// use rttp_proxy::cache::{CacheKey, CacheStore};
/// use rttp_proxy::intercept::{Interceptor, Phase};
/// use serde_json::json;
///
/// let cache = CacheStore::default();
/// let key = CacheKey::new("/api/menu?lat=1");
/// let mut interceptor = Interceptor::new(cache.clone(), key.clone());
///
/// let response = interceptor.emit(json!({"x": 1})).unwrap();
/// assert_eq!(response.payload(), br#"{"x":1}"#);
/// assert_eq!(interceptor.phase(), Phase::Emitted);
/// assert_eq!(cache.get(&key), Some(json!({"x": 1})));
///
/// // A second emission is refused and stores nothing.
/// assert!(interceptor.emit(json!({"x": 2})).is_err());
/// assert_eq!(cache.get(&key), Some(json!({"x": 1})));
/// ```
#[derive(Debug)]
pub struct Interceptor {
    cache: CacheStore,
    key: CacheKey,
    phase: Phase,
    captured: Option<Value>,
}

impl Interceptor {
    pub fn new(cache: CacheStore, key: CacheKey) -> Self {
        Self {
            cache,
            key,
            phase: Phase::Idle,
            captured: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Stores a copy of `payload` under this request's key.
    ///
    /// # Errors
    ///
    /// [`InterceptError::AlreadyCaptured`] unless the interceptor is idle.
    pub fn capture(&mut self, payload: &Value) -> Result<(), InterceptError> {
        if self.phase != Phase::Idle {
            return Err(InterceptError::AlreadyCaptured {
                key: self.key.to_string(),
            });
        }
        self.cache.set(self.key.clone(), payload.clone());
        self.captured = Some(payload.clone());
        self.phase = Phase::Captured;
        debug!(key = %self.key, "captured upstream payload");
        Ok(())
    }

    /// Emits `payload` as a `200` JSON response, capturing it first if that
    /// has not happened yet. The emitted body is always the stored one.
    ///
    /// # Errors
    ///
    /// - [`InterceptError::AlreadyEmitted`] on any call after the first
    ///   successful one; nothing is stored or returned.
    /// - [`InterceptError::PayloadMismatch`] when `payload` is not the value
    ///   already captured; the interceptor stays in [`Phase::Captured`].
    pub fn emit(&mut self, payload: Value) -> Result<Response, InterceptError> {
        match self.phase {
            Phase::Emitted => {
                return Err(InterceptError::AlreadyEmitted {
                    key: self.key.to_string(),
                });
            }
            Phase::Idle => self.capture(&payload)?,
            Phase::Captured => {
                if self.captured.as_ref() != Some(&payload) {
                    return Err(InterceptError::PayloadMismatch {
                        key: self.key.to_string(),
                    });
                }
            }
        }
        self.phase = Phase::Emitted;
        Ok(Response::new(StatusCode::Ok)
            .json(&payload)
            .header(CACHE_STATUS_HEADER, "MISS"))
    }
}

/// Wraps `fetch` into a caching route handler.
///
/// For each request the key is the literal request target. A fresh cache
/// entry is served directly with `X-Cache: HIT`. On a miss `fetch` runs; its
/// payload goes through an [`Interceptor`] (stored, then emitted with
/// `X-Cache: MISS`), while its error is rendered by
/// [`ProxyError::into_response`] and nothing is stored.
///
/// Concurrent misses on the same key are not coalesced; each one calls
/// `fetch`.
pub fn cache_through<F, Fut>(cache: CacheStore, fetch: F) -> impl IntoHandler
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ProxyError>> + Send + 'static,
{
    let fetch = Arc::new(fetch);
    move |ctx: Context| {
        let cache = cache.clone();
        let fetch = Arc::clone(&fetch);
        async move {
            let key = CacheKey::from_request(ctx.request());

            if let Some(payload) = cache.get(&key) {
                debug!(%key, "cache hit");
                return Response::new(StatusCode::Ok)
                    .json(&payload)
                    .header(CACHE_STATUS_HEADER, "HIT");
            }

            debug!(%key, "cache miss");
            match fetch(ctx).await {
                Ok(payload) => {
                    let mut interceptor = Interceptor::new(cache, key);
                    match interceptor.emit(payload) {
                        Ok(response) => response,
                        // A fresh interceptor is always idle.
                        Err(e) => Response::new(StatusCode::InternalServerError).json(
                            &ErrorEnvelope {
                                error: e.to_string(),
                            },
                        ),
                    }
                }
                Err(e) => {
                    warn!(%key, status = e.status().as_u16(), error = %e, "upstream fetch failed");
                    e.into_response()
                }
            }
        }
    }
}
