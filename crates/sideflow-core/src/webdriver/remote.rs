//! W3C WebDriver wire client over HTTP.

use super::{wire_error, DriverFactory, ElementRef, GridStatus, Locator, WebDriver, ELEMENT_KEY};
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const WIRE_TIMEOUT: Duration = Duration::from_secs(120);

/// Opens sessions on a Selenium Grid hub.
#[derive(Debug, Clone)]
pub struct RemoteFactory {
    client: reqwest::Client,
    grid_url: String,
    implicit_wait: Duration,
}

impl RemoteFactory {
    pub fn new(grid_url: impl Into<String>, implicit_wait: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(WIRE_TIMEOUT)
            .build()
            .map_err(|err| CoreError::GridUnreachable(err.to_string()))?;
        Ok(Self {
            client,
            grid_url: grid_url.into().trim_end_matches('/').to_string(),
            implicit_wait,
        })
    }
}

#[async_trait]
impl DriverFactory for RemoteFactory {
    async fn status(&self) -> Result<GridStatus> {
        let value = execute_wire(
            &self.client,
            Method::GET,
            &format!("{}/status", self.grid_url),
            None,
        )
        .await?;

        let ready = value
            .get("ready")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut total_slots = 0;
        let mut free_slots = 0;
        if let Some(nodes) = value.get("nodes").and_then(Value::as_array) {
            for node in nodes {
                let Some(slots) = node.get("slots").and_then(Value::as_array) else {
                    continue;
                };
                for slot in slots {
                    total_slots += 1;
                    if slot.get("session").map(Value::is_null).unwrap_or(true) {
                        free_slots += 1;
                    }
                }
            }
        }

        Ok(GridStatus {
            ready,
            total_slots,
            free_slots,
        })
    }

    async fn new_session(&self) -> Result<Arc<dyn WebDriver>> {
        let body = json!({
            "capabilities": {
                "alwaysMatch": {"browserName": "chrome"}
            }
        });
        let value = execute_wire(
            &self.client,
            Method::POST,
            &format!("{}/session", self.grid_url),
            Some(body),
        )
        .await?;

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CoreError::GridUnreachable("grid did not return a session id".to_string())
            })?
            .to_string();

        let driver = RemoteDriver {
            client: self.client.clone(),
            grid_url: self.grid_url.clone(),
            session_id,
        };
        driver.set_implicit_wait(self.implicit_wait).await?;

        tracing::info!(session_id = %driver.session_id, "opened grid session");
        Ok(Arc::new(driver))
    }
}

/// One remote session, addressed by grid session id.
#[derive(Debug, Clone)]
pub struct RemoteDriver {
    client: reqwest::Client,
    grid_url: String,
    session_id: String,
}

impl RemoteDriver {
    fn session_url(&self, path: &str) -> String {
        if path.is_empty() {
            format!("{}/session/{}", self.grid_url, self.session_id)
        } else {
            format!("{}/session/{}/{}", self.grid_url, self.session_id, path)
        }
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        execute_wire(&self.client, method, &self.session_url(path), body).await
    }

    async fn set_implicit_wait(&self, implicit_wait: Duration) -> Result<()> {
        self.command(
            Method::POST,
            "timeouts",
            Some(json!({"implicit": implicit_wait.as_millis() as u64})),
        )
        .await?;
        Ok(())
    }
}

/// Issue one wire request and unwrap the W3C `value` envelope.
async fn execute_wire(
    client: &reqwest::Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value> {
    let mut request = client.request(method.clone(), url);
    if let Some(body) = body {
        request = request.json(&body);
    } else if method == Method::POST {
        // WebDriver requires a JSON body on every POST.
        request = request.json(&json!({}));
    }

    let response = request
        .send()
        .await
        .map_err(|err| CoreError::GridUnreachable(err.to_string()))?;

    let payload: Value = response
        .json()
        .await
        .map_err(|err| CoreError::GridUnreachable(err.to_string()))?;

    let value = payload.get("value").cloned().unwrap_or(Value::Null);
    if let Some(error_code) = value.get("error").and_then(Value::as_str) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown webdriver error");
        return Err(wire_error(error_code, message));
    }

    Ok(value)
}

#[async_trait]
impl WebDriver for RemoteDriver {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.command(Method::POST, "url", Some(json!({"url": url})))
            .await?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        let value = self.command(Method::GET, "url", None).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CoreError::driver("current url missing from response"))
    }

    async fn find_element(&self, locator: &Locator) -> Result<ElementRef> {
        let (using, expr) = locator.to_wire();
        let value = self
            .command(
                Method::POST,
                "element",
                Some(json!({"using": using, "value": expr})),
            )
            .await?;
        value
            .get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(|id| ElementRef(id.to_string()))
            .ok_or_else(|| CoreError::driver(format!("element not found: {}", locator.expr)))
    }

    async fn click(&self, element: &ElementRef) -> Result<()> {
        self.command(Method::POST, &format!("element/{}/click", element.0), None)
            .await?;
        Ok(())
    }

    async fn clear(&self, element: &ElementRef) -> Result<()> {
        self.command(Method::POST, &format!("element/{}/clear", element.0), None)
            .await?;
        Ok(())
    }

    async fn send_keys(&self, element: &ElementRef, text: &str) -> Result<()> {
        self.command(
            Method::POST,
            &format!("element/{}/value", element.0),
            Some(json!({"text": text})),
        )
        .await?;
        Ok(())
    }

    async fn element_text(&self, element: &ElementRef) -> Result<String> {
        let value = self
            .command(Method::GET, &format!("element/{}/text", element.0), None)
            .await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CoreError::driver("element text missing from response"))
    }

    async fn move_to(&self, element: &ElementRef) -> Result<()> {
        let actions = json!({
            "actions": [{
                "type": "pointer",
                "id": "mouse",
                "parameters": {"pointerType": "mouse"},
                "actions": [{
                    "type": "pointerMove",
                    "duration": 100,
                    "origin": {ELEMENT_KEY: element.0},
                    "x": 0,
                    "y": 0
                }]
            }]
        });
        self.command(Method::POST, "actions", Some(actions)).await?;
        Ok(())
    }

    async fn execute_script(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        self.command(
            Method::POST,
            "execute/sync",
            Some(json!({"script": script, "args": args})),
        )
        .await
    }

    async fn page_source(&self) -> Result<String> {
        let value = self.command(Method::GET, "source", None).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CoreError::driver("page source missing from response"))
    }

    async fn set_window_size(&self, width: u32, height: u32) -> Result<()> {
        self.command(
            Method::POST,
            "window/rect",
            Some(json!({"width": width, "height": height})),
        )
        .await?;
        Ok(())
    }

    async fn quit(&self) -> Result<()> {
        execute_wire(
            &self.client,
            Method::DELETE,
            &self.session_url(""),
            None,
        )
        .await?;
        Ok(())
    }
}
