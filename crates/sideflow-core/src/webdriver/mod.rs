//! WebDriver abstraction.
//!
//! The rest of the crate only sees these traits; the wire protocol lives in
//! [`remote`]. Tests inject scripted implementations through the same seam.

mod remote;

pub use remote::{RemoteDriver, RemoteFactory};

use crate::error::{CoreError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// W3C element identifier key in wire payloads.
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Element location strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorStrategy {
    Css,
    XPath,
    Id,
    Name,
    LinkText,
    PartialLinkText,
    TagName,
    ClassName,
}

/// A parsed locator: strategy plus expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub strategy: LocatorStrategy,
    pub expr: String,
}

impl Locator {
    pub fn css(expr: impl Into<String>) -> Self {
        Self {
            strategy: LocatorStrategy::Css,
            expr: expr.into(),
        }
    }

    /// Wire-level `(using, value)` pair.
    ///
    /// Strategies without a W3C name are lowered to css selectors, the way
    /// mainstream client libraries do.
    pub fn to_wire(&self) -> (&'static str, String) {
        match self.strategy {
            LocatorStrategy::Css => ("css selector", self.expr.clone()),
            LocatorStrategy::XPath => ("xpath", self.expr.clone()),
            LocatorStrategy::Id => ("css selector", format!("[id=\"{}\"]", self.expr)),
            LocatorStrategy::Name => ("css selector", format!("[name=\"{}\"]", self.expr)),
            LocatorStrategy::LinkText => ("link text", self.expr.clone()),
            LocatorStrategy::PartialLinkText => ("partial link text", self.expr.clone()),
            LocatorStrategy::TagName => ("tag name", self.expr.clone()),
            LocatorStrategy::ClassName => ("css selector", format!(".{}", self.expr)),
        }
    }
}

/// Reference to a located element within one driver session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef(pub String);

/// A live remote-browser handle.
#[async_trait]
pub trait WebDriver: Send + Sync {
    /// Grid-assigned session identifier.
    fn session_id(&self) -> &str;

    async fn navigate(&self, url: &str) -> Result<()>;

    /// Cheap liveness probe.
    async fn current_url(&self) -> Result<String>;

    async fn find_element(&self, locator: &Locator) -> Result<ElementRef>;

    async fn click(&self, element: &ElementRef) -> Result<()>;

    async fn clear(&self, element: &ElementRef) -> Result<()>;

    async fn send_keys(&self, element: &ElementRef, text: &str) -> Result<()>;

    async fn element_text(&self, element: &ElementRef) -> Result<String>;

    /// Pointer move over the element.
    async fn move_to(&self, element: &ElementRef) -> Result<()>;

    /// Synchronous script evaluation in page context.
    async fn execute_script(&self, script: &str, args: Vec<Value>) -> Result<Value>;

    async fn page_source(&self) -> Result<String>;

    async fn set_window_size(&self, width: u32, height: u32) -> Result<()>;

    async fn quit(&self) -> Result<()>;
}

/// Aggregate slot availability reported by the grid.
#[derive(Debug, Clone, Default)]
pub struct GridStatus {
    pub ready: bool,
    pub total_slots: usize,
    pub free_slots: usize,
}

/// Opens sessions against the browser backend.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn status(&self) -> Result<GridStatus>;

    async fn new_session(&self) -> Result<Arc<dyn WebDriver>>;
}

/// Map a WebDriver error payload to the core taxonomy.
pub(crate) fn wire_error(error_code: &str, message: &str) -> CoreError {
    match error_code {
        "invalid session id" => CoreError::NoSuchSession(message.to_string()),
        _ => CoreError::driver(format!("{}: {}", error_code, message)),
    }
}
