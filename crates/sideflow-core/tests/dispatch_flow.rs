//! End-to-end dispatcher scenarios over a scripted driver backend.

use async_trait::async_trait;
use serde_json::Value;
use sideflow_core::error::{CoreError, Result};
use sideflow_core::lock::LockRepository;
use sideflow_core::pool::SessionPool;
use sideflow_core::store::ScriptStore;
use sideflow_core::template::TemplateEngine;
use sideflow_core::webdriver::{DriverFactory, ElementRef, GridStatus, Locator, WebDriver};
use sideflow_core::{Config, Dispatcher, ExecuteRequest};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ─── Scripted backend ───────────────────────────────────────────────────

struct MockDriver {
    id: String,
    alive: AtomicBool,
    fail_clicks: bool,
    log: Mutex<Vec<String>>,
}

impl MockDriver {
    fn new(id: String, fail_clicks: bool) -> Self {
        Self {
            id,
            alive: AtomicBool::new(true),
            fail_clicks,
            log: Mutex::new(Vec::new()),
        }
    }

    fn log(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl WebDriver for MockDriver {
    fn session_id(&self) -> &str {
        &self.id
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.log(format!("navigate {url}"));
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        if self.alive.load(Ordering::SeqCst) {
            Ok("about:blank".to_string())
        } else {
            Err(CoreError::GridUnreachable("browser gone".to_string()))
        }
    }

    async fn find_element(&self, locator: &Locator) -> Result<ElementRef> {
        Ok(ElementRef(locator.expr.clone()))
    }

    async fn click(&self, element: &ElementRef) -> Result<()> {
        if self.fail_clicks {
            return Err(CoreError::driver("click refused"));
        }
        self.log(format!("click {}", element.0));
        Ok(())
    }

    async fn clear(&self, element: &ElementRef) -> Result<()> {
        self.log(format!("clear {}", element.0));
        Ok(())
    }

    async fn send_keys(&self, element: &ElementRef, text: &str) -> Result<()> {
        self.log(format!("send_keys {} {}", element.0, text));
        Ok(())
    }

    async fn element_text(&self, _element: &ElementRef) -> Result<String> {
        Ok("stored text".to_string())
    }

    async fn move_to(&self, element: &ElementRef) -> Result<()> {
        self.log(format!("move_to {}", element.0));
        Ok(())
    }

    async fn execute_script(&self, script: &str, _args: Vec<Value>) -> Result<Value> {
        self.log(format!("script {script}"));
        if script.contains("readyState") {
            return Ok(Value::String("complete".to_string()));
        }
        Ok(Value::Null)
    }

    async fn page_source(&self) -> Result<String> {
        Ok(format!("<html data-session=\"{}\"></html>", self.id))
    }

    async fn set_window_size(&self, width: u32, height: u32) -> Result<()> {
        self.log(format!("window {width}x{height}"));
        Ok(())
    }

    async fn quit(&self) -> Result<()> {
        self.kill();
        Ok(())
    }
}

struct MockFactory {
    capacity: usize,
    fail_clicks: bool,
    counter: AtomicUsize,
    drivers: Mutex<Vec<Arc<MockDriver>>>,
}

impl MockFactory {
    fn new(capacity: usize) -> Self {
        Self::with_behavior(capacity, false)
    }

    fn with_behavior(capacity: usize, fail_clicks: bool) -> Self {
        Self {
            capacity,
            fail_clicks,
            counter: AtomicUsize::new(0),
            drivers: Mutex::new(Vec::new()),
        }
    }

    fn driver(&self, index: usize) -> Arc<MockDriver> {
        Arc::clone(&self.drivers.lock().unwrap()[index])
    }

    fn driver_by_id(&self, id: &str) -> Arc<MockDriver> {
        Arc::clone(
            self.drivers
                .lock()
                .unwrap()
                .iter()
                .find(|driver| driver.id == id)
                .expect("unknown driver id"),
        )
    }

    fn created(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DriverFactory for MockFactory {
    async fn status(&self) -> Result<GridStatus> {
        Ok(GridStatus {
            ready: true,
            total_slots: self.capacity,
            free_slots: self.capacity,
        })
    }

    async fn new_session(&self) -> Result<Arc<dyn WebDriver>> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let driver = Arc::new(MockDriver::new(format!("sess-{n}"), self.fail_clicks));
        self.drivers.lock().unwrap().push(Arc::clone(&driver));
        Ok(driver)
    }
}

// ─── Harness ────────────────────────────────────────────────────────────

struct Harness {
    _dir: TempDir,
    factory: Arc<MockFactory>,
    pool: Arc<SessionPool>,
    locks: Arc<LockRepository>,
    store: Arc<ScriptStore>,
    dispatcher: Dispatcher,
}

async fn harness_with(factory: MockFactory, config: Config) -> Harness {
    let dir = TempDir::new().unwrap();
    let factory = Arc::new(factory);
    let pool = Arc::new(SessionPool::new(
        Arc::clone(&factory) as Arc<dyn DriverFactory>,
        Duration::from_secs(5),
    ));
    pool.warm_up().await;

    let locks = Arc::new(LockRepository::new(dir.path().join("locks")).unwrap());
    let store = Arc::new(ScriptStore::new(dir.path().join("sides")).unwrap());
    let engine = TemplateEngine::new(dir.path().join("js"));
    let dispatcher = Dispatcher::new(
        Arc::clone(&pool),
        Arc::clone(&locks),
        Arc::clone(&store),
        engine,
        &config,
    );

    Harness {
        _dir: dir,
        factory,
        pool,
        locks,
        store,
        dispatcher,
    }
}

async fn harness(capacity: usize) -> Harness {
    let mut config = Config::default();
    config.implicit_wait_s = 1;
    harness_with(MockFactory::new(capacity), config).await
}

const LOGIN_SIDE: &str = r#"{
    "id": "proj-login",
    "name": "login",
    "url": "https://example.test/",
    "tests": [
        {"id": "t1", "name": "sign in", "commands": [
            {"id": "c1", "command": "open", "target": "/", "value": ""},
            {"id": "c2", "command": "type", "target": "id=u", "value": "alice"},
            {"id": "c3", "command": "click", "target": "id=go", "value": ""}
        ]}
    ],
    "suites": [
        {"id": "s1", "name": "Default", "tests": ["t1"]}
    ]
}"#;

fn request(script_id: &str) -> ExecuteRequest {
    ExecuteRequest {
        script_id: script_id.to_string(),
        suite: None,
        test: None,
        params: HashMap::new(),
    }
}

// ─── Scenarios ──────────────────────────────────────────────────────────

#[tokio::test]
async fn happy_path_returns_final_page_source_and_frees_the_lock() {
    let h = harness(1).await;
    h.store.save("login", LOGIN_SIDE).unwrap();

    assert!(!h.locks.is_held("sess-1"));
    let source = h.dispatcher.execute_any(&request("login")).await.unwrap();
    assert!(source.contains("<html"));
    assert!(!h.locks.is_held("sess-1"));

    let log = h.factory.driver(0).entries();
    assert_eq!(
        log,
        vec![
            "navigate https://example.test/",
            "clear u",
            "send_keys u alice",
            "click go",
        ]
    );
}

#[tokio::test]
async fn idle_scan_routes_around_a_held_session() {
    let h = harness(2).await;
    h.store.save("login", LOGIN_SIDE).unwrap();

    let sessions = h.pool.list().await;
    assert_eq!(sessions.len(), 2);

    let (token, _) = h.locks.acquire(&sessions[0], 600).unwrap();
    assert_eq!(h.locks.filter_idle(&sessions), vec![sessions[1].clone()]);

    h.dispatcher.execute_any(&request("login")).await.unwrap();

    // The held session saw no traffic; the idle one did.
    let busy_index = if sessions[0] == "sess-1" { 0 } else { 1 };
    assert!(h.factory.driver(busy_index).entries().is_empty());
    assert!(!h.factory.driver(1 - busy_index).entries().is_empty());

    h.locks.release(&sessions[0], &token).unwrap();
    assert_eq!(h.locks.filter_idle(&sessions), sessions);
}

#[tokio::test]
async fn empty_pool_is_no_capacity_without_touching_locks() {
    let mut config = Config::default();
    config.implicit_wait_s = 1;
    // Grid with zero slots: warm-up publishes nothing.
    let h = harness_with(MockFactory::new(0), config).await;
    h.store.save("login", LOGIN_SIDE).unwrap();

    let failure = h
        .dispatcher
        .execute_any(&request("login"))
        .await
        .unwrap_err();
    assert!(matches!(failure.error, CoreError::NoCapacity));

    let lock_files = std::fs::read_dir(h.locks.root()).unwrap().count();
    assert_eq!(lock_files, 0);
}

#[tokio::test]
async fn all_sessions_busy_is_no_capacity() {
    let h = harness(1).await;
    h.store.save("login", LOGIN_SIDE).unwrap();

    let (_token, _) = h.locks.acquire("sess-1", 600).unwrap();
    let failure = h
        .dispatcher
        .execute_any(&request("login"))
        .await
        .unwrap_err();
    assert!(matches!(failure.error, CoreError::NoCapacity));
}

#[tokio::test]
async fn template_params_flow_into_commands() {
    let h = harness(1).await;
    let templated = LOGIN_SIDE.replace("alice", "{{ param.name }}");
    h.store.save("greet", &templated).unwrap();

    let mut req = request("greet");
    req.params.insert("name".to_string(), "Bob".to_string());
    h.dispatcher.execute_any(&req).await.unwrap();

    let log = h.factory.driver(0).entries();
    assert!(log.contains(&"send_keys u Bob".to_string()));
}

#[tokio::test]
async fn missing_template_param_is_a_render_error() {
    let h = harness(1).await;
    let templated = LOGIN_SIDE.replace("alice", "{{ param.name }}");
    h.store.save("greet", &templated).unwrap();

    let failure = h
        .dispatcher
        .execute_any(&request("greet"))
        .await
        .unwrap_err();
    assert!(matches!(failure.error, CoreError::TemplateRender { .. }));
    // The lock was scoped; preparation failure still releases it.
    assert!(!h.locks.is_held("sess-1"));
}

#[tokio::test]
async fn unknown_script_is_not_found() {
    let h = harness(1).await;
    let failure = h
        .dispatcher
        .execute_any(&request("ghost"))
        .await
        .unwrap_err();
    assert!(matches!(failure.error, CoreError::NotFound(_)));
}

#[tokio::test]
async fn execute_on_targets_the_named_session() {
    let h = harness(2).await;
    h.store.save("login", LOGIN_SIDE).unwrap();

    h.dispatcher
        .execute_on("sess-2", &request("login"))
        .await
        .unwrap();

    assert!(h.factory.driver(0).entries().is_empty());
    assert!(!h.factory.driver(1).entries().is_empty());
    assert!(!h.locks.is_held("sess-2"));
}

#[tokio::test]
async fn command_failure_surfaces_partial_page_source() {
    let mut config = Config::default();
    config.implicit_wait_s = 1;
    let h = harness_with(MockFactory::with_behavior(1, true), config).await;
    h.store.save("login", LOGIN_SIDE).unwrap();

    let failure = h
        .dispatcher
        .execute_any(&request("login"))
        .await
        .unwrap_err();
    match &failure.error {
        CoreError::CommandFailed { command_id, .. } => assert_eq!(command_id, "c3"),
        other => panic!("expected CommandFailed, got {other:?}"),
    }
    assert!(failure
        .partial_source
        .as_deref()
        .unwrap()
        .contains("<html"));
    assert!(!h.locks.is_held("sess-1"));
}

#[tokio::test]
async fn dead_session_is_replaced_in_place() {
    let h = harness(2).await;

    let before = h.pool.list().await;
    assert_eq!(before.len(), 2);
    let victim = before[0].clone();

    h.factory.driver_by_id(&victim).kill();
    let replacement = h.pool.acquire(&victim).await.unwrap();
    assert_ne!(replacement.session_id(), victim);

    let after = h.pool.list().await;
    assert_eq!(after.len(), before.len());
    // Replacement inherits the slot position.
    assert_eq!(after[0], replacement.session_id());
    assert_eq!(after[1], before[1]);
    assert_eq!(h.factory.created(), 3);
}

#[tokio::test]
async fn stream_pins_a_session_until_closed() {
    let h = harness(2).await;
    h.store.save("login", LOGIN_SIDE).unwrap();

    let handle = h.dispatcher.open_stream().await.unwrap();
    assert!(h.locks.is_held(&handle.session_id));

    // Per-message calls reuse the pinned session; the lock stays held even
    // after an error.
    let source = h
        .dispatcher
        .stream_execute(&handle, &request("login"))
        .await
        .unwrap();
    assert!(source.contains("<html"));

    let err = h
        .dispatcher
        .stream_execute(&handle, &request("ghost"))
        .await
        .unwrap_err();
    assert!(matches!(err.error, CoreError::NotFound(_)));
    assert!(h.locks.is_held(&handle.session_id));

    let js = h.dispatcher.stream_js(&handle, "return 1 + 1").await.unwrap();
    assert_eq!(js, Value::Null);
    let page = h.dispatcher.stream_page_source(&handle).await.unwrap();
    assert!(page.contains("<html"));

    h.dispatcher.close_stream(&handle).unwrap();
    assert!(!h.locks.is_held(&handle.session_id));
}

#[tokio::test]
async fn two_streams_pin_distinct_sessions_and_a_third_finds_none() {
    let h = harness(2).await;

    let first = h.dispatcher.open_stream().await.unwrap();
    let second = h.dispatcher.open_stream().await.unwrap();
    assert_ne!(first.session_id, second.session_id);

    let err = h.dispatcher.open_stream().await.unwrap_err();
    assert!(matches!(err, CoreError::NoCapacity));

    h.dispatcher.close_stream(&first).unwrap();
    h.dispatcher.close_stream(&second).unwrap();
}

#[tokio::test]
async fn orphaned_stream_lock_is_reclaimed_by_ttl() {
    let mut config = Config::default();
    config.implicit_wait_s = 1;
    config.stream_lock_ttl_s = 2;
    let h = harness_with(MockFactory::new(1), config).await;
    h.store.save("login", LOGIN_SIDE).unwrap();

    let handle = h.dispatcher.open_stream().await.unwrap();
    let pinned = handle.session_id.clone();
    // Simulate a client that vanished without a clean close.
    drop(handle);
    assert!(h.locks.is_held(&pinned));

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!h.locks.is_held(&pinned));

    h.dispatcher.execute_any(&request("login")).await.unwrap();
}

#[tokio::test]
async fn suite_selection_by_name_and_test_override() {
    let h = harness(1).await;
    let script = r#"{
        "id": "p", "name": "p", "url": "https://example.test/",
        "tests": [
            {"id": "t1", "name": "first", "commands": [
                {"id": "c1", "command": "open", "target": "/one", "value": ""}
            ]},
            {"id": "t2", "name": "second", "commands": [
                {"id": "c2", "command": "open", "target": "/two", "value": ""}
            ]}
        ],
        "suites": [
            {"id": "s1", "name": "Default", "tests": ["t1"]},
            {"id": "s2", "name": "Alt", "tests": ["t2"]}
        ]
    }"#;
    h.store.save("multi", script).unwrap();

    let mut by_suite = request("multi");
    by_suite.suite = Some("Alt".to_string());
    h.dispatcher.execute_any(&by_suite).await.unwrap();
    assert_eq!(
        h.factory.driver(0).entries(),
        vec!["navigate https://example.test/two"]
    );

    let mut by_test = request("multi");
    by_test.test = Some("first".to_string());
    h.dispatcher.execute_any(&by_test).await.unwrap();
    assert!(h
        .factory
        .driver(0)
        .entries()
        .contains(&"navigate https://example.test/one".to_string()));
}
