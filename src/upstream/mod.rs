//! Outbound side of the proxy: the [`Upstream`] seam, its `reqwest`-backed
//! implementation, and the URL builders the routes use.
//!
//! The client never judges a status code. Whatever the upstream sends back is
//! returned as an [`UpstreamResponse`]; classification into success,
//! [`ProxyError::UpstreamNonOk`], or [`ProxyError::MalformedResponse`] happens in
//! [`UpstreamResponse::into_json`]. Only a missing response is an error at
//! fetch time ([`ProxyError::UpstreamUnreachable`]).

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ProxyError;
use crate::http::request::find_query_param;

/// Browser identity sent with every upstream request. The upstream serves
/// different (or no) content to clients without one.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Boxed future returned by [`Upstream::fetch`].
pub type FetchFuture<'a> =
    Pin<Box<dyn Future<Output = Result<UpstreamResponse, ProxyError>> + Send + 'a>>;

/// Anything that can GET a URL on behalf of the proxy.
pub trait Upstream: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a str) -> FetchFuture<'a>;
}

/// Raw status and body of an upstream reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decodes a successful reply as JSON. An empty 2xx body (e.g. `204`)
    /// decodes to `null`.
    ///
    /// # Errors
    ///
    /// - [`ProxyError::UpstreamNonOk`] for any non-2xx status.
    /// - [`ProxyError::MalformedResponse`] when a 2xx body is not valid JSON.
    pub fn into_json(self) -> Result<Value, ProxyError> {
        if !self.is_success() {
            return Err(ProxyError::UpstreamNonOk {
                status: self.status,
            });
        }
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// HTTP client for the upstream API.
///
/// Sends `Content-Type: application/json` and a browser `User-Agent` on every
/// request, with bounded connect and total timeouts.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: Client,
}

impl UpstreamClient {
    /// Builds a client with [`DEFAULT_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Fails only if the TLS backend cannot be initialised.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::builder().build()
    }

    pub fn builder() -> UpstreamClientBuilder {
        UpstreamClientBuilder::default()
    }
}

impl Upstream for UpstreamClient {
    fn fetch<'a>(&'a self, url: &'a str) -> FetchFuture<'a> {
        Box::pin(async move {
            debug!(%url, "fetching from upstream");
            let response = self.client.get(url).send().await.inspect_err(|e| {
                warn!(%url, error = %e, "upstream request failed");
            })?;

            let status = response.status().as_u16();
            let body = response.bytes().await.inspect_err(|e| {
                warn!(%url, status, error = %e, "upstream body read failed");
            })?;

            debug!(%url, status, bytes = body.len(), "upstream responded");
            Ok(UpstreamResponse { status, body })
        })
    }
}

/// Builder for [`UpstreamClient`].
#[derive(Debug)]
pub struct UpstreamClientBuilder {
    timeout: Duration,
    connect_timeout: Duration,
    headers: HeaderMap,
}

impl Default for UpstreamClientBuilder {
    fn default() -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        Self {
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            headers,
        }
    }
}

impl UpstreamClientBuilder {
    /// Upper bound on a whole request, body included.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Adds or replaces a default header sent on every request.
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn build(self) -> Result<UpstreamClient, reqwest::Error> {
        let client = Client::builder()
            .default_headers(self.headers)
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .build()?;
        Ok(UpstreamClient { client })
    }
}

/// Joins `path` and an optional raw query onto `base` without re-encoding.
pub fn passthrough_url(base: &str, path: &str, query: Option<&str>) -> String {
    let base = base.trim_end_matches('/');
    match query {
        Some(query) => format!("{base}{path}?{query}"),
        None => format!("{base}{path}"),
    }
}

/// Builds `base + path` with exactly the parameters in `names`, in that order,
/// taking each raw value from `query`. Absent parameters are sent empty.
///
/// # Examples
///
/// ```
/// use rttp_proxy::upstream::mapped_url;
///
/// let url = mapped_url(
///     "https://upstream.test",
///     "/dapi/restaurants/list/v5",
///     Some("page_type=DESKTOP_WEB_LISTING&lat=12.9&extra=1"),
///     &["lat", "lng", "page_type"],
/// );
/// assert_eq!(
///     url,
///     "https://upstream.test/dapi/restaurants/list/v5?lat=12.9&lng=&page_type=DESKTOP_WEB_LISTING"
/// );
/// ```
pub fn mapped_url(base: &str, path: &str, query: Option<&str>, names: &[&str]) -> String {
    let params = names
        .iter()
        .map(|name| {
            let value = query
                .and_then(|q| find_query_param(q, name))
                .unwrap_or_default();
            format!("{name}={value}")
        })
        .collect::<Vec<_>>()
        .join("&");
    passthrough_url(base, path, Some(&params))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_decodes_json() {
        let reply = UpstreamResponse::new(200, &br#"{"x":1}"#[..]);
        assert_eq!(reply.into_json().unwrap(), serde_json::json!({"x": 1}));
    }

    #[test]
    fn non_2xx_is_classified_before_decoding() {
        let reply = UpstreamResponse::new(404, &b"not json"[..]);
        assert!(matches!(
            reply.into_json(),
            Err(ProxyError::UpstreamNonOk { status: 404 })
        ));
    }

    #[test]
    fn empty_success_body_is_null() {
        for status in [200, 204] {
            let reply = UpstreamResponse::new(status, Bytes::new());
            assert_eq!(reply.into_json().unwrap(), Value::Null);
        }
        let reply = UpstreamResponse::new(200, &b"\r\n"[..]);
        assert_eq!(reply.into_json().unwrap(), Value::Null);
    }

    #[test]
    fn non_json_success_is_malformed() {
        let reply = UpstreamResponse::new(200, &b"<!doctype html>"[..]);
        assert!(matches!(
            reply.into_json(),
            Err(ProxyError::MalformedResponse(_))
        ));
    }

    #[test]
    fn passthrough_keeps_query_verbatim() {
        assert_eq!(
            passthrough_url("https://u.test/", "/dapi/x", Some("b=2&a=%20")),
            "https://u.test/dapi/x?b=2&a=%20"
        );
        assert_eq!(passthrough_url("https://u.test", "/", None), "https://u.test/");
    }

    #[test]
    fn mapped_url_orders_and_filters_params() {
        let url = mapped_url(
            "https://u.test",
            "/dapi/menu/pl",
            Some("restaurantId=7&lat=1&page-type=REGULAR_MENU&complete-menu=true&lng=2&submitAction=ENTER&junk=x"),
            &["page-type", "complete-menu", "lat", "lng", "submitAction", "restaurantId"],
        );
        assert_eq!(
            url,
            "https://u.test/dapi/menu/pl?page-type=REGULAR_MENU&complete-menu=true&lat=1&lng=2&submitAction=ENTER&restaurantId=7"
        );
    }

    #[test]
    fn default_headers_identify_as_browser() {
        let builder = UpstreamClient::builder();
        assert_eq!(
            builder.headers.get(USER_AGENT).unwrap(),
            BROWSER_USER_AGENT
        );
        assert_eq!(
            builder.headers.get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(builder.timeout, DEFAULT_TIMEOUT);
    }
}
