use sideflow_core::{Dispatcher, ScriptStore, SessionPool};
use std::sync::Arc;

/// Shared application state handed to every handler.
pub struct AppState {
    pub store: Arc<ScriptStore>,
    pub pool: Arc<SessionPool>,
    pub dispatcher: Arc<Dispatcher>,
}
