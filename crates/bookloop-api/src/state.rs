use std::sync::Arc;

use bookloop_core::{Core, CoreResult, IdentityResolver};
use bookloop_db::Store;
use bookloop_gateway::{Dispatcher, GatewayContext};

use crate::assistant::Assistant;
use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub core: Core,
    pub dispatcher: Dispatcher,
    pub assistant: Assistant,
    pub allow_anonymous_realtime: bool,
}

impl AppStateInner {
    /// Wires the core services to a fresh realtime dispatcher.
    pub fn new(
        store: Arc<dyn Store>,
        identity: IdentityResolver,
        assistant: Assistant,
        allow_anonymous_realtime: bool,
    ) -> AppState {
        let dispatcher = Dispatcher::new();
        let core = Core::new(store, Arc::new(dispatcher.clone()), identity);
        Arc::new(Self {
            core,
            dispatcher,
            assistant,
            allow_anonymous_realtime,
        })
    }

    pub fn gateway_context(&self) -> GatewayContext {
        GatewayContext {
            dispatcher: self.dispatcher.clone(),
            core: self.core.clone(),
            allow_anonymous: self.allow_anonymous_realtime,
        }
    }
}

/// Run blocking store work off the async runtime.
pub async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> CoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("spawn_blocking join error: {}", e)))?
        .map_err(ApiError::from)
}
