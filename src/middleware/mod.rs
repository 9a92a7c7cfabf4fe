//! Middleware pipeline: composable logic wrapped around the router.
//!
//! - [`Middleware`]: trait implemented by all middleware.
//! - [`Next`]: cursor into the remaining chain; [`Next::run`] advances it.
//! - [`Pipeline`]: an ordered middleware stack terminated by a [`Router`].
//! - [`AccessLog`]: one structured log line per request.

use std::{future::Future, pin::Pin, sync::Arc};

use tokio::time::Instant;
use tracing::info;

use crate::{Request, Response, Router, StatusCode, context::Context};

/// A type-erased, reference-counted middleware function.
pub type MiddlewareHandler = Arc<
    dyn Fn(Context, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static,
>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed by [`run`](Self::run), so a middleware can forward a
/// request at most once.
pub struct Next {
    middlewares: Arc<[MiddlewareHandler]>,
    index: usize,
}

impl Next {
    pub fn new(middlewares: impl Into<Arc<[MiddlewareHandler]>>) -> Self {
        Self {
            middlewares: middlewares.into(),
            index: 0,
        }
    }

    /// Invokes the next middleware in the chain and returns its response.
    ///
    /// An exhausted chain yields `500 Internal Server Error`; a correctly built
    /// [`Pipeline`] always ends in its router, so this only shows up for
    /// hand-assembled chains.
    pub async fn run(mut self, ctx: Context) -> Response {
        match self.middlewares.get(self.index).cloned() {
            Some(handler) => {
                self.index += 1;
                handler(ctx, self).await
            }
            None => Response::new(StatusCode::InternalServerError)
                .body("No response generated by middleware pipeline"),
        }
    }
}

/// The core trait for all middleware.
///
/// Implementors may pass the request through (`next.run(ctx).await`),
/// short-circuit with their own [`Response`], or decorate the downstream
/// response. Implementations must not hold `&mut` state across an `.await`.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

/// An ordered middleware stack whose innermost layer dispatches to a [`Router`].
///
/// Layers run in the order they were added; the first added is outermost.
///
/// # Examples
///
/// ```rust,no_run
/// use rttp_proxy::{Router, Response, StatusCode};
/// use rttp_proxy::middleware::{AccessLog, Pipeline};
///
/// # async fn example(request: rttp_proxy::Request) {
/// let mut router = Router::new();
/// router.get("/", |_ctx| async { Response::new(StatusCode::Ok) });
///
/// let pipeline = Pipeline::new(router).layer(AccessLog);
/// let response = pipeline.handle(request).await;
/// # }
/// ```
pub struct Pipeline {
    layers: Vec<MiddlewareHandler>,
    router: Arc<Router>,
}

impl Pipeline {
    pub fn new(router: Router) -> Self {
        Self {
            layers: Vec::new(),
            router: Arc::new(router),
        }
    }

    /// Appends a middleware inside the ones already added.
    #[must_use]
    pub fn layer<M>(mut self, middleware: M) -> Self
    where
        M: Middleware + 'static,
    {
        self.layers.push(from_middleware(Arc::new(middleware)));
        self
    }

    /// Runs `request` through every layer and the router.
    pub async fn handle(&self, request: Request) -> Response {
        let router = Arc::clone(&self.router);
        let terminal: MiddlewareHandler = Arc::new(
            move |ctx: Context, _next: Next| -> Pin<Box<dyn Future<Output = Response> + Send>> {
                let router = Arc::clone(&router);
                Box::pin(async move { router.dispatch(ctx).await })
            },
        );

        let chain: Vec<MiddlewareHandler> = self
            .layers
            .iter()
            .cloned()
            .chain(std::iter::once(terminal))
            .collect();

        Next::new(chain).run(Context::new(request)).await
    }
}

/// Logs method, target, status, cache outcome, and latency for every request.
///
/// Never short-circuits and returns the downstream response untouched.
pub struct AccessLog;

impl Middleware for AccessLog {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().to_string();
            let target = ctx.request().target();

            let response = next.run(ctx).await;

            info!(
                %method,
                %target,
                status = response.status().as_u16(),
                cache = response.headers().get("x-cache").unwrap_or("-"),
                elapsed = ?start.elapsed(),
                "request handled"
            );

            response
        })
    }
}
