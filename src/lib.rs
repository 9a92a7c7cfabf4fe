//! # rttp-proxy
//!
//! A caching reverse proxy for a single upstream JSON API, built on a
//! from-scratch async HTTP/1.1 server.
//!
//! Each proxied request is keyed by its literal target (path and raw query).
//! A fresh cached payload is served directly; otherwise the upstream is
//! fetched, and only a successful JSON reply is captured into the cache on its
//! way back to the caller. Upstream failures become `{"error": ...}` responses
//! and are never cached.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use clap::Parser;
//! use rttp_proxy::{config::Config, routes, server::Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::parse();
//!     let state = routes::ProxyState::from_config(&config)?;
//!     let pipeline = Arc::new(routes::pipeline(&state));
//!
//!     let server = Server::bind(config.bind_addr()).await?;
//!     server.run(move |req| {
//!         let pipeline = Arc::clone(&pipeline);
//!         async move { pipeline.handle(req).await }
//!     }).await?;
//!     Ok(())
//! }
//! ```

// ── HTTP substrate ────────────────────────────────────────────────────────────
pub mod context;
pub mod http;
pub mod middleware;
pub mod router;
pub mod server;

// ── Caching proxy engine ──────────────────────────────────────────────────────
pub mod cache;
pub mod error;
pub mod intercept;
pub mod routes;
pub mod upstream;

pub mod config;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{CacheKey, CacheStore};
pub use error::ProxyError;
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::Router;
pub use server::{Server, ServerError};
