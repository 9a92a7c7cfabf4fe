//! The proxy's route table.
//!
//! | Path                        | Upstream                                         |
//! |-----------------------------|--------------------------------------------------|
//! | `/`                         | none, welcome message                            |
//! | `/api/restaurants`          | [`LISTING_PATH`] with [`LISTING_PARAMS`]         |
//! | `/api/menu`                 | [`MENU_PATH`] with [`MENU_PARAMS`]               |
//! | `/dapi/restaurants/list/v5` | [`LISTING_PATH`] with [`LISTING_PARAMS`]         |
//! | `/dapi/menu/pl`             | [`MENU_PATH`] with [`MENU_PARAMS`]               |
//! | `/api/*`                    | same path minus `/api`, query verbatim           |
//! | `/dapi/*`                   | same path, query verbatim                        |
//! | anything else               | single-page app shell                            |
//!
//! Every upstream-backed route is wrapped in [`cache_through`], keyed by the
//! inbound request target.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::debug;

use crate::cache::CacheStore;
use crate::config::Config;
use crate::context::Context;
use crate::error::ProxyError;
use crate::intercept::cache_through;
use crate::middleware::{AccessLog, Pipeline};
use crate::router::IntoHandler;
use crate::upstream::{Upstream, UpstreamClient, mapped_url, passthrough_url};
use crate::{Method, Response, Router, StatusCode};

pub const LISTING_PATH: &str = "/dapi/restaurants/list/v5";
pub const LISTING_PARAMS: &[&str] = &["lat", "lng", "page_type"];

pub const MENU_PATH: &str = "/dapi/menu/pl";
pub const MENU_PARAMS: &[&str] = &[
    "page-type",
    "complete-menu",
    "lat",
    "lng",
    "submitAction",
    "restaurantId",
];

pub const WELCOME_MESSAGE: &str = "Welcome to the rttp caching proxy";

/// Everything the routes share: one cache, one upstream, one static root.
#[derive(Clone)]
pub struct ProxyState {
    pub cache: CacheStore,
    pub upstream: Arc<dyn Upstream>,
    pub upstream_base: Arc<str>,
    pub static_dir: Arc<Path>,
}

impl ProxyState {
    pub fn new(
        cache: CacheStore,
        upstream: Arc<dyn Upstream>,
        upstream_base: impl Into<Arc<str>>,
        static_dir: impl Into<PathBuf>,
    ) -> Self {
        let static_dir: PathBuf = static_dir.into();
        Self {
            cache,
            upstream,
            upstream_base: upstream_base.into(),
            static_dir: Arc::from(static_dir),
        }
    }

    /// Builds the production state: a `reqwest` upstream client and an empty cache.
    ///
    /// # Errors
    ///
    /// Returns the client construction error if the TLS backend is unavailable.
    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        let client = UpstreamClient::builder()
            .timeout(config.upstream_timeout())
            .build()?;
        Ok(Self::new(
            CacheStore::new(config.ttl()),
            Arc::new(client),
            config.upstream.as_str(),
            config.static_dir.clone(),
        ))
    }
}

/// Registers every route; specific paths come before the wildcards.
pub fn router(state: &ProxyState) -> Router {
    let mut router = Router::new();

    router.get("/", |_ctx| async {
        Response::new(StatusCode::Ok).json(&json!({ "message": WELCOME_MESSAGE }))
    });

    router.get("/api/restaurants", mapped(state, LISTING_PATH, LISTING_PARAMS));
    router.get("/api/menu", mapped(state, MENU_PATH, MENU_PARAMS));
    router.get(LISTING_PATH, mapped(state, LISTING_PATH, LISTING_PARAMS));
    router.get(MENU_PATH, mapped(state, MENU_PATH, MENU_PARAMS));

    router.get(
        "/api/*",
        passthrough(state, |ctx| match ctx.params().get("wildcard") {
            Some(rest) if !rest.is_empty() => rest.to_owned(),
            _ => "/".to_owned(),
        }),
    );
    router.get(
        "/dapi/*",
        passthrough(state, |ctx| ctx.request().path().to_owned()),
    );

    router.fallback(spa_shell(Arc::clone(&state.static_dir)));
    router
}

/// The router behind the standard middleware stack.
pub fn pipeline(state: &ProxyState) -> Pipeline {
    Pipeline::new(router(state)).layer(AccessLog)
}

async fn fetch_json(upstream: Arc<dyn Upstream>, url: String) -> Result<Value, ProxyError> {
    upstream.fetch(&url).await?.into_json()
}

// Upstream URL from a fixed path and a fixed, ordered parameter list.
fn mapped(
    state: &ProxyState,
    path: &'static str,
    names: &'static [&'static str],
) -> impl IntoHandler {
    let upstream = Arc::clone(&state.upstream);
    let base = Arc::clone(&state.upstream_base);
    cache_through(state.cache.clone(), move |ctx: Context| {
        let url = mapped_url(&base, path, ctx.request().query_string(), names);
        fetch_json(Arc::clone(&upstream), url)
    })
}

// Upstream URL from a path derived from the request plus its raw query.
fn passthrough<P>(state: &ProxyState, upstream_path: P) -> impl IntoHandler
where
    P: Fn(&Context) -> String + Send + Sync + 'static,
{
    let upstream = Arc::clone(&state.upstream);
    let base = Arc::clone(&state.upstream_base);
    cache_through(state.cache.clone(), move |ctx: Context| {
        let url = passthrough_url(&base, &upstream_path(&ctx), ctx.request().query_string());
        fetch_json(Arc::clone(&upstream), url)
    })
}

fn spa_shell(static_dir: Arc<Path>) -> impl IntoHandler {
    move |ctx: Context| {
        let index = static_dir.join("index.html");
        async move {
            if ctx.request().method() != &Method::Get {
                return Response::new(StatusCode::MethodNotAllowed)
                    .json(&json!({ "error": "Method Not Allowed" }));
            }
            match tokio::fs::read(&index).await {
                Ok(html) => Response::new(StatusCode::Ok)
                    .header("Content-Type", "text/html; charset=utf-8")
                    .body_bytes(html),
                Err(e) => {
                    debug!(path = %index.display(), error = %e, "app shell unavailable");
                    Response::new(StatusCode::NotFound).json(&json!({ "error": "Not Found" }))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Request;
    use crate::upstream::{FetchFuture, UpstreamResponse};
    use std::sync::Mutex;

    /// Records every URL it is asked for and answers with a fixed reply.
    struct Recorder {
        urls: Mutex<Vec<String>>,
        reply: UpstreamResponse,
    }

    impl Recorder {
        fn new(status: u16, body: &'static str) -> Arc<Self> {
            Arc::new(Self {
                urls: Mutex::new(Vec::new()),
                reply: UpstreamResponse::new(status, body.as_bytes()),
            })
        }

        fn urls(&self) -> Vec<String> {
            self.urls.lock().unwrap().clone()
        }
    }

    impl Upstream for Recorder {
        fn fetch<'a>(&'a self, url: &'a str) -> FetchFuture<'a> {
            self.urls.lock().unwrap().push(url.to_owned());
            let reply = self.reply.clone();
            Box::pin(async move { Ok(reply) })
        }
    }

    fn state(upstream: Arc<Recorder>, static_dir: &Path) -> ProxyState {
        ProxyState::new(
            CacheStore::default(),
            upstream,
            "https://upstream.test",
            static_dir,
        )
    }

    fn request(method: &str, target: &str) -> Request {
        let raw = format!("{method} {target} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        Request::parse(raw.as_bytes()).unwrap().0
    }

    fn body(response: &Response) -> Value {
        serde_json::from_slice(response.payload()).unwrap()
    }

    #[tokio::test]
    async fn root_is_welcome_json() {
        let upstream = Recorder::new(200, "{}");
        let router = router(&state(upstream.clone(), Path::new("dist")));
        let res = router.route(request("GET", "/")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(body(&res), json!({ "message": WELCOME_MESSAGE }));
        assert!(upstream.urls().is_empty());
    }

    #[tokio::test]
    async fn api_restaurants_maps_to_listing() {
        let upstream = Recorder::new(200, r#"{"cards":[]}"#);
        let router = router(&state(upstream.clone(), Path::new("dist")));

        let res = router
            .route(request("GET", "/api/restaurants?page_type=DESKTOP_WEB_LISTING&lng=77.6&lat=12.9"))
            .await;

        assert_eq!(body(&res), json!({"cards": []}));
        assert_eq!(
            upstream.urls(),
            vec![
                "https://upstream.test/dapi/restaurants/list/v5?lat=12.9&lng=77.6&page_type=DESKTOP_WEB_LISTING"
                    .to_owned()
            ]
        );
    }

    #[tokio::test]
    async fn dapi_menu_maps_to_menu() {
        let upstream = Recorder::new(200, "{}");
        let router = router(&state(upstream.clone(), Path::new("dist")));

        router
            .route(request(
                "GET",
                "/dapi/menu/pl?restaurantId=42&lat=1&lng=2&page-type=REGULAR_MENU&complete-menu=true&submitAction=ENTER",
            ))
            .await;

        assert_eq!(
            upstream.urls(),
            vec![
                "https://upstream.test/dapi/menu/pl?page-type=REGULAR_MENU&complete-menu=true&lat=1&lng=2&submitAction=ENTER&restaurantId=42"
                    .to_owned()
            ]
        );
    }

    #[tokio::test]
    async fn api_and_menu_aliases_cache_separately() {
        let upstream = Recorder::new(200, "{}");
        let router = router(&state(upstream.clone(), Path::new("dist")));

        router.route(request("GET", "/api/menu?lat=1")).await;
        router.route(request("GET", "/dapi/menu/pl?lat=1")).await;
        let again = router.route(request("GET", "/api/menu?lat=1")).await;

        assert_eq!(again.headers().get("x-cache"), Some("HIT"));
        assert_eq!(upstream.urls().len(), 2);
    }

    #[tokio::test]
    async fn api_wildcard_strips_prefix() {
        let upstream = Recorder::new(200, "[]");
        let router = router(&state(upstream.clone(), Path::new("dist")));

        router
            .route(request("GET", "/api/dapi/landing/PRE_SEARCH?lat=1&lng=2"))
            .await;
        router.route(request("GET", "/api")).await;

        assert_eq!(
            upstream.urls(),
            vec![
                "https://upstream.test/dapi/landing/PRE_SEARCH?lat=1&lng=2".to_owned(),
                "https://upstream.test/".to_owned(),
            ]
        );
    }

    #[tokio::test]
    async fn dapi_wildcard_forwards_verbatim() {
        let upstream = Recorder::new(200, "{}");
        let router = router(&state(upstream.clone(), Path::new("dist")));

        router
            .route(request("GET", "/dapi/restaurants/search/v3?str=pizza%20hut"))
            .await;

        assert_eq!(
            upstream.urls(),
            vec!["https://upstream.test/dapi/restaurants/search/v3?str=pizza%20hut".to_owned()]
        );
    }

    #[tokio::test]
    async fn upstream_error_status_is_mirrored() {
        let upstream = Recorder::new(404, "gone");
        let st = state(upstream.clone(), Path::new("dist"));
        let router = router(&st);

        let res = router.route(request("GET", "/api/menu?lat=1")).await;

        assert_eq!(res.status(), StatusCode::NotFound);
        assert_eq!(
            body(&res),
            json!({"error": "Request failed with status code 404"})
        );
        assert!(st.cache.is_empty());
    }

    #[tokio::test]
    async fn spa_shell_served_for_unknown_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<div id=\"root\"></div>").unwrap();
        let upstream = Recorder::new(200, "{}");
        let router = router(&state(upstream.clone(), dir.path()));

        let res = router.route(request("GET", "/restaurants/42")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(
            res.headers().get("content-type"),
            Some("text/html; charset=utf-8")
        );
        assert_eq!(res.payload(), b"<div id=\"root\"></div>");
        assert!(upstream.urls().is_empty());
    }

    #[tokio::test]
    async fn missing_shell_is_404_and_non_get_is_405() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(&state(Recorder::new(200, "{}"), dir.path()));

        let missing = router.route(request("GET", "/about")).await;
        let posted = router.route(request("POST", "/api/menu")).await;

        assert_eq!(missing.status(), StatusCode::NotFound);
        assert_eq!(posted.status(), StatusCode::MethodNotAllowed);
    }
}
