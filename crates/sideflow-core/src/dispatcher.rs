//! Execution policy: pick session → lock → render → load → run.
//!
//! Two entry styles: one-shot executions that hold a scoped lock for the
//! duration of a single run, and pinned streams that keep an owner-held lock
//! across many messages until the connection goes away (or the TTL reclaims
//! an orphan).

use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::executor::CommandExecutor;
use crate::loader::{load_project, suite_tests};
use crate::lock::{LockGuard, LockRepository};
use crate::model::SideProject;
use crate::pool::SessionPool;
use crate::store::ScriptStore;
use crate::template::TemplateEngine;
use crate::webdriver::WebDriver;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const EXECUTE_ON_WAIT: Duration = Duration::from_secs(30);

/// One execution request. At most one of `suite`/`test` should be set; when
/// both are present the test wins.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteRequest {
    pub script_id: String,
    #[serde(default)]
    pub suite: Option<String>,
    #[serde(default)]
    pub test: Option<String>,
    #[serde(default)]
    pub params: HashMap<String, String>,
}

/// An execution failure, carrying whatever page source the browser had
/// rendered when the run aborted.
#[derive(Debug)]
pub struct ExecFailure {
    pub error: CoreError,
    pub partial_source: Option<String>,
}

impl From<CoreError> for ExecFailure {
    fn from(error: CoreError) -> Self {
        Self {
            error,
            partial_source: None,
        }
    }
}

pub type ExecResult = std::result::Result<String, ExecFailure>;

/// Token-holding handle for a pinned connection.
#[derive(Debug)]
pub struct StreamHandle {
    pub stream_id: String,
    pub session_id: String,
    token: String,
}

pub struct Dispatcher {
    pool: Arc<SessionPool>,
    locks: Arc<LockRepository>,
    store: Arc<ScriptStore>,
    engine: TemplateEngine,
    default_lock_ttl_s: u64,
    stream_lock_ttl_s: u64,
    implicit_wait: Duration,
}

impl Dispatcher {
    pub fn new(
        pool: Arc<SessionPool>,
        locks: Arc<LockRepository>,
        store: Arc<ScriptStore>,
        engine: TemplateEngine,
        config: &Config,
    ) -> Self {
        Self {
            pool,
            locks,
            store,
            engine,
            default_lock_ttl_s: config.default_lock_ttl_s,
            stream_lock_ttl_s: config.stream_lock_ttl_s,
            implicit_wait: Duration::from_secs(config.implicit_wait_s),
        }
    }

    /// Fetch, render, and parse the requested script.
    fn prepare(&self, request: &ExecuteRequest) -> Result<SideProject> {
        let raw = self.store.get(&request.script_id)?;
        let rendered = self.engine.render(&raw, &request.params)?;
        load_project(&rendered)
    }

    /// Execute on the first idle session that accepts a lock.
    pub async fn execute_any(&self, request: &ExecuteRequest) -> ExecResult {
        let sessions = self.pool.list().await;
        if sessions.is_empty() {
            return Err(CoreError::NoCapacity.into());
        }

        let idle = self.locks.filter_idle(&sessions);
        if idle.is_empty() {
            return Err(CoreError::NoCapacity.into());
        }

        for session_id in &idle {
            // The idle scan is advisory; only a real acquisition reserves
            // the session. Losing the race moves on to the next candidate.
            match self
                .locks
                .acquire_scoped(session_id, self.default_lock_ttl_s, Duration::ZERO)
                .await
            {
                Ok(guard) => {
                    tracing::info!(%session_id, script_id = %request.script_id, "dispatching execution");
                    return self.run_locked(session_id, request, guard).await;
                }
                Err(CoreError::Timeout(_)) | Err(CoreError::AlreadyHeld(_)) => continue,
                Err(other) => return Err(other.into()),
            }
        }

        Err(CoreError::NoCapacity.into())
    }

    /// Execute on a caller-specified session, waiting up to 30 s for its
    /// lock.
    pub async fn execute_on(&self, session_id: &str, request: &ExecuteRequest) -> ExecResult {
        let guard = self
            .locks
            .acquire_scoped(session_id, self.default_lock_ttl_s, EXECUTE_ON_WAIT)
            .await
            .map_err(ExecFailure::from)?;
        tracing::info!(%session_id, script_id = %request.script_id, "dispatching execution");
        self.run_locked(session_id, request, guard).await
    }

    async fn run_locked(
        &self,
        session_id: &str,
        request: &ExecuteRequest,
        guard: LockGuard,
    ) -> ExecResult {
        let project = self.prepare(request).map_err(ExecFailure::from)?;
        let driver = self.pool.acquire(session_id).await.map_err(ExecFailure::from)?;
        let result = self.run_project(driver.as_ref(), &project, request).await;
        // Explicit release so a failure to clean up is surfaced; the guard
        // would otherwise release on drop.
        if let Err(err) = guard.release() {
            tracing::warn!(session_id, error = %err, "scoped lock release failed");
        }
        result
    }

    /// Drive the selected test (or suite) through the executor and return
    /// the final page source.
    async fn run_project(
        &self,
        driver: &dyn WebDriver,
        project: &SideProject,
        request: &ExecuteRequest,
    ) -> ExecResult {
        let mut executor =
            CommandExecutor::new(driver, project.url.clone(), self.implicit_wait);

        let run = async {
            if let Some(test_name) = &request.test {
                let test = project.get_test_by_name(test_name)?;
                executor.run_test(test).await?;
            } else {
                let suite = project.get_suite(request.suite.as_deref())?;
                let tests = suite_tests(project, suite);
                let total = tests.len();
                for (index, test) in tests.into_iter().enumerate() {
                    executor.run_test(test).await?;
                    // Without persistSession each test starts from a blank
                    // navigation context; the pool still owns the browser.
                    if !suite.persist_session && index + 1 < total {
                        driver.navigate("about:blank").await?;
                    }
                }
            }
            Ok::<(), CoreError>(())
        };

        match run.await {
            Ok(()) => driver.page_source().await.map_err(ExecFailure::from),
            Err(error) => {
                let partial_source = driver.page_source().await.ok();
                Err(ExecFailure {
                    error,
                    partial_source,
                })
            }
        }
    }

    /// Pin an idle session under an owner-held lock with the stream TTL.
    pub async fn open_stream(&self) -> Result<StreamHandle> {
        let sessions = self.pool.list().await;
        if sessions.is_empty() {
            return Err(CoreError::NoCapacity);
        }

        for session_id in self.locks.filter_idle(&sessions) {
            match self.locks.acquire(&session_id, self.stream_lock_ttl_s) {
                Ok((token, _info)) => {
                    let handle = StreamHandle {
                        stream_id: Uuid::new_v4().to_string(),
                        session_id,
                        token,
                    };
                    tracing::info!(
                        stream_id = %handle.stream_id,
                        session_id = %handle.session_id,
                        "stream pinned session"
                    );
                    return Ok(handle);
                }
                Err(CoreError::AlreadyHeld(_)) => continue,
                Err(other) => return Err(other),
            }
        }

        Err(CoreError::NoCapacity)
    }

    /// Run a script on the pinned session. The lock stays held whatever the
    /// outcome; errors go back on the stream.
    pub async fn stream_execute(
        &self,
        handle: &StreamHandle,
        request: &ExecuteRequest,
    ) -> ExecResult {
        let project = self.prepare(request).map_err(ExecFailure::from)?;
        let driver = self
            .pool
            .acquire(&handle.session_id)
            .await
            .map_err(ExecFailure::from)?;
        self.run_project(driver.as_ref(), &project, request).await
    }

    /// Evaluate JavaScript on the pinned session.
    pub async fn stream_js(&self, handle: &StreamHandle, code: &str) -> Result<Value> {
        let driver = self.pool.acquire(&handle.session_id).await?;
        driver.execute_script(code, Vec::new()).await
    }

    pub async fn stream_page_source(&self, handle: &StreamHandle) -> Result<String> {
        let driver = self.pool.acquire(&handle.session_id).await?;
        driver.page_source().await
    }

    /// Release the pinned lock on connection teardown. If the process dies
    /// before this runs, the TTL reclaims the lock.
    pub fn close_stream(&self, handle: &StreamHandle) -> Result<()> {
        tracing::info!(
            stream_id = %handle.stream_id,
            session_id = %handle.session_id,
            "stream closed"
        );
        self.locks.release(&handle.session_id, &handle.token)
    }
}
