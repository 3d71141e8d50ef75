//! Core runtime for executing recorded Selenium IDE `.side` scripts against
//! a remote pool of WebDriver browsers.
//!
//! The three load-bearing subsystems are the [`lock`] repository (durable
//! TTL-bounded mutual exclusion keyed by session), the [`pool`] of warm
//! browser sessions, and the [`dispatcher`] that wires session selection,
//! locking, script preparation, and command execution together. Scripts are
//! stored as opaque text ([`store`]), expanded as templates ([`template`]),
//! and parsed into the project model ([`model`], [`loader`]) just before a
//! run. The browser backend is reached through the [`webdriver`] trait seam.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod loader;
pub mod lock;
pub mod model;
pub mod pool;
pub mod store;
pub mod template;
pub mod webdriver;

pub use config::Config;
pub use dispatcher::{Dispatcher, ExecFailure, ExecResult, ExecuteRequest, StreamHandle};
pub use error::{CoreError, Result};
pub use loader::load_project;
pub use lock::{LockGuard, LockInfo, LockRepository};
pub use model::{SideCommand, SideProject, SideSuite, SideTest};
pub use pool::{SessionPool, SessionState};
pub use store::ScriptStore;
pub use template::TemplateEngine;
pub use webdriver::{DriverFactory, GridStatus, RemoteDriver, RemoteFactory, WebDriver};
