//! Event handlers: the business-logic boundary.
//!
//! Workers hand each claimed event to an [`EventHandler`]. `Ok(())` means the
//! event may be marked processed; any error leaves it claimed until the
//! stale guard releases it.

pub mod command;
pub mod delay;

pub use command::CommandHandler;
pub use delay::DelayHandler;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::config::HandlerSpec;
use crate::model::ClaimedEvent;

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &ClaimedEvent) -> anyhow::Result<()>;
}

type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type BoxedHandlerFn = dyn Fn(ClaimedEvent) -> HandlerFuture + Send + Sync;

/// Closure-backed handler. See [`handler_fn`].
pub struct FnHandler {
    f: Box<BoxedHandlerFn>,
}

/// Wrap an async closure as an [`EventHandler`].
///
/// ```ignore
/// let handler = handler_fn(|event| async move {
///     println!("{}", event.payload);
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler
where
    F: Fn(ClaimedEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHandler {
        f: Box::new(move |event| Box::pin(f(event))),
    }
}

#[async_trait]
impl EventHandler for FnHandler {
    async fn handle(&self, event: &ClaimedEvent) -> anyhow::Result<()> {
        (self.f)(event.clone()).await
    }
}

/// Dispatches on `event_type`. Types without a route go to the fallback,
/// or fail if there is none.
#[derive(Default)]
pub struct Router {
    routes: HashMap<String, Arc<dyn EventHandler>>,
    fallback: Option<Arc<dyn EventHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        self.routes.insert(event_type.into(), handler);
        self
    }

    pub fn fallback(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.fallback = Some(handler);
        self
    }

    /// One [`CommandHandler`] per `[handlers.<event_type>]` entry.
    ///
    /// With no entries and no fallback every event would fail, so unrouted
    /// events get [`DelayHandler::default`] instead.
    pub fn from_specs(
        specs: &HashMap<String, HandlerSpec>,
        fallback: Option<Arc<dyn EventHandler>>,
    ) -> Self {
        let mut router = Self::new();
        for (event_type, spec) in specs {
            let handler = CommandHandler::new(&spec.command).args(spec.args.iter().cloned());
            router = router.route(event_type.clone(), Arc::new(handler));
        }
        match fallback {
            Some(handler) => router.fallback(handler),
            None if specs.is_empty() => {
                warn!("no handlers configured, events will be logged and marked processed");
                router.fallback(Arc::new(DelayHandler::default()))
            }
            None => router,
        }
    }

    pub fn handles(&self, event_type: &str) -> bool {
        self.routes.contains_key(event_type) || self.fallback.is_some()
    }
}

#[async_trait]
impl EventHandler for Router {
    async fn handle(&self, event: &ClaimedEvent) -> anyhow::Result<()> {
        let handler = self
            .routes
            .get(&event.event_type)
            .or(self.fallback.as_ref())
            .ok_or_else(|| anyhow::anyhow!("no handler for event type '{}'", event.event_type))?;
        handler.handle(event).await
    }
}
