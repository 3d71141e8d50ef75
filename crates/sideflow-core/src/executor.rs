//! Translate recorded commands into WebDriver actions.
//!
//! Interpretation happens here, not in the loader: command names, locators,
//! `${KEY_*}` tokens, and `${variable}` references are all resolved against a
//! per-run state at execution time, and the run aborts at the first failure.

use crate::error::{CoreError, Result};
use crate::model::{SideCommand, SideTest};
use crate::webdriver::{Locator, LocatorStrategy, WebDriver};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

const READY_STATE_POLL_INTERVAL: Duration = Duration::from_millis(100);

const LOCATOR_PREFIXES: &[(&str, LocatorStrategy)] = &[
    ("css=", LocatorStrategy::Css),
    ("xpath=", LocatorStrategy::XPath),
    ("id=", LocatorStrategy::Id),
    ("name=", LocatorStrategy::Name),
    ("linkText=", LocatorStrategy::LinkText),
    ("link=", LocatorStrategy::LinkText),
    ("partialLinkText=", LocatorStrategy::PartialLinkText),
    ("tagName=", LocatorStrategy::TagName),
    ("className=", LocatorStrategy::ClassName),
];

const KEY_TOKENS: &[(&str, char)] = &[
    ("${KEY_ENTER}", '\u{E006}'),
    ("${KEY_TAB}", '\u{E004}'),
    ("${KEY_ESCAPE}", '\u{E00C}'),
    ("${KEY_BACKSPACE}", '\u{E003}'),
    ("${KEY_DELETE}", '\u{E017}'),
    ("${KEY_UP}", '\u{E013}'),
    ("${KEY_DOWN}", '\u{E015}'),
    ("${KEY_LEFT}", '\u{E012}'),
    ("${KEY_RIGHT}", '\u{E014}'),
    ("${KEY_HOME}", '\u{E011}'),
    ("${KEY_END}", '\u{E010}'),
    ("${KEY_PAGEUP}", '\u{E00E}'),
    ("${KEY_PAGEDOWN}", '\u{E00F}'),
    ("${KEY_SPACE}", '\u{E00D}'),
    ("${KEY_F1}", '\u{E031}'),
    ("${KEY_F2}", '\u{E032}'),
    ("${KEY_F3}", '\u{E033}'),
    ("${KEY_F4}", '\u{E034}'),
    ("${KEY_F5}", '\u{E035}'),
    ("${KEY_F6}", '\u{E036}'),
    ("${KEY_F7}", '\u{E037}'),
    ("${KEY_F8}", '\u{E038}'),
    ("${KEY_F9}", '\u{E039}'),
    ("${KEY_F10}", '\u{E03A}'),
    ("${KEY_F11}", '\u{E03B}'),
    ("${KEY_F12}", '\u{E03C}'),
];

/// Parse a recorded target into a locator.
///
/// Known `prefix=` forms map to their strategy; bare `//…` targets are
/// xpath; other bare targets default to css. An unrecognized identifier
/// prefix is a `BadLocator`.
pub fn parse_locator(target: &str) -> Result<Locator> {
    for (prefix, strategy) in LOCATOR_PREFIXES {
        if let Some(expr) = target.strip_prefix(prefix) {
            return Ok(Locator {
                strategy: *strategy,
                expr: expr.to_string(),
            });
        }
    }

    if target.starts_with("//") {
        return Ok(Locator {
            strategy: LocatorStrategy::XPath,
            expr: target.to_string(),
        });
    }

    if let Some(eq) = target.find('=') {
        let prefix = &target[..eq];
        if !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(CoreError::BadLocator(target.to_string()));
        }
    }

    Ok(Locator::css(target))
}

/// Expand `${KEY_*}` tokens to their WebDriver codepoints. Unrecognized
/// tokens stay literal.
pub fn expand_keys(value: &str) -> String {
    let mut expanded = value.to_string();
    for (token, key) in KEY_TOKENS {
        if expanded.contains(token) {
            expanded = expanded.replace(token, &key.to_string());
        }
    }
    expanded
}

/// The closed command set. Adding a command means extending this enum and
/// the dispatch match below.
#[derive(Debug, Clone, PartialEq)]
enum Action {
    Open { url: String },
    Click { locator: Locator },
    ClickAndWait { locator: Locator },
    Type { locator: Locator, text: String },
    SendKeys { locator: Locator, keys: String },
    Pause { millis: u64 },
    MouseOver { locator: Locator },
    SetWindowSize { width: u32, height: u32 },
    AssertText { locator: Locator, expected: String },
    AssertElementPresent { locator: Locator },
    StoreText { locator: Locator, variable: String },
    ExecuteScript { script: String, variable: Option<String> },
}

impl Action {
    fn parse(command: &str, target: &str, value: &str) -> Result<Action> {
        match command {
            "open" => Ok(Action::Open {
                url: target.trim().to_string(),
            }),
            "click" => Ok(Action::Click {
                locator: parse_locator(target)?,
            }),
            "clickAndWait" => Ok(Action::ClickAndWait {
                locator: parse_locator(target)?,
            }),
            "type" => Ok(Action::Type {
                locator: parse_locator(target)?,
                text: value.to_string(),
            }),
            "sendKeys" => Ok(Action::SendKeys {
                locator: parse_locator(target)?,
                keys: expand_keys(value),
            }),
            "pause" => {
                let raw = if target.trim().is_empty() { value } else { target };
                let millis = raw.trim().parse::<u64>().map_err(|_| {
                    CoreError::driver(format!("invalid pause duration '{}'", raw))
                })?;
                Ok(Action::Pause { millis })
            }
            "mouseOver" => Ok(Action::MouseOver {
                locator: parse_locator(target)?,
            }),
            "setWindowSize" => {
                let (width, height) = parse_window_size(if target.trim().is_empty() {
                    value
                } else {
                    target
                })?;
                Ok(Action::SetWindowSize { width, height })
            }
            "assertText" => Ok(Action::AssertText {
                locator: parse_locator(target)?,
                expected: value.to_string(),
            }),
            "assertElementPresent" => Ok(Action::AssertElementPresent {
                locator: parse_locator(target)?,
            }),
            "storeText" => {
                if value.trim().is_empty() {
                    return Err(CoreError::driver("storeText requires a variable name"));
                }
                Ok(Action::StoreText {
                    locator: parse_locator(target)?,
                    variable: value.trim().to_string(),
                })
            }
            "executeScript" => Ok(Action::ExecuteScript {
                script: target.to_string(),
                variable: if value.trim().is_empty() {
                    None
                } else {
                    Some(value.trim().to_string())
                },
            }),
            other => Err(CoreError::driver(format!(
                "unsupported command '{}'",
                other
            ))),
        }
    }
}

fn parse_window_size(raw: &str) -> Result<(u32, u32)> {
    let normalized = raw.trim().to_ascii_lowercase().replace(' ', "");
    let delimiter = if normalized.contains('x') { 'x' } else { ',' };
    let mut parts = normalized.splitn(2, delimiter);
    let parse = |part: Option<&str>| {
        part.and_then(|p| p.parse::<u32>().ok())
            .ok_or_else(|| CoreError::driver(format!("invalid window size '{}'", raw)))
    };
    let width = parse(parts.next())?;
    let height = parse(parts.next())?;
    Ok((width, height))
}

/// Per-run command interpreter over one lent driver handle.
pub struct CommandExecutor<'a> {
    driver: &'a dyn WebDriver,
    base_url: Option<String>,
    implicit_wait: Duration,
    variables: HashMap<String, String>,
}

impl<'a> CommandExecutor<'a> {
    pub fn new(
        driver: &'a dyn WebDriver,
        base_url: Option<String>,
        implicit_wait: Duration,
    ) -> Self {
        Self {
            driver,
            base_url,
            implicit_wait,
            variables: HashMap::new(),
        }
    }

    /// Run every command of a test in order, stopping at the first failure.
    pub async fn run_test(&mut self, test: &SideTest) -> Result<()> {
        tracing::debug!(test = %test.name, commands = test.commands.len(), "running test");
        for command in &test.commands {
            self.execute(command)
                .await
                .map_err(|err| err.with_command(&command.id))?;
        }
        Ok(())
    }

    pub async fn execute(&mut self, command: &SideCommand) -> Result<()> {
        let target = self.substitute(&command.target)?;
        let value = self.substitute(&command.value)?;
        let action = Action::parse(&command.command, &target, &value)?;
        tracing::debug!(command = %command.command, target = %target, "executing command");

        match action {
            Action::Open { url } => {
                if url.is_empty() {
                    return Ok(());
                }
                let resolved = self.resolve_url(&url)?;
                self.driver.navigate(&resolved).await
            }
            Action::Click { locator } => {
                let element = self.driver.find_element(&locator).await?;
                self.driver.click(&element).await
            }
            Action::ClickAndWait { locator } => {
                let element = self.driver.find_element(&locator).await?;
                self.driver.click(&element).await?;
                self.wait_for_page_load().await
            }
            Action::Type { locator, text } => {
                let element = self.driver.find_element(&locator).await?;
                self.driver.clear(&element).await?;
                self.driver.send_keys(&element, &text).await
            }
            Action::SendKeys { locator, keys } => {
                let element = self.driver.find_element(&locator).await?;
                self.driver.send_keys(&element, &keys).await
            }
            Action::Pause { millis } => {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(())
            }
            Action::MouseOver { locator } => {
                let element = self.driver.find_element(&locator).await?;
                self.driver.move_to(&element).await
            }
            Action::SetWindowSize { width, height } => {
                self.driver.set_window_size(width, height).await
            }
            Action::AssertText { locator, expected } => {
                let element = self.driver.find_element(&locator).await?;
                let actual = self.driver.element_text(&element).await?;
                if actual.trim() != expected.trim() {
                    return Err(CoreError::AssertionFailed {
                        command_id: String::new(),
                        expected: expected.trim().to_string(),
                        actual: actual.trim().to_string(),
                    });
                }
                Ok(())
            }
            Action::AssertElementPresent { locator } => {
                // Presence participates in the driver's implicit wait.
                match self.driver.find_element(&locator).await {
                    Ok(_) => Ok(()),
                    Err(_) => Err(CoreError::AssertionFailed {
                        command_id: String::new(),
                        expected: format!("element present: {}", locator.expr),
                        actual: "element not found".to_string(),
                    }),
                }
            }
            Action::StoreText { locator, variable } => {
                let element = self.driver.find_element(&locator).await?;
                let text = self.driver.element_text(&element).await?;
                self.variables.insert(variable, text);
                Ok(())
            }
            Action::ExecuteScript { script, variable } => {
                let result = self.driver.execute_script(&script, Vec::new()).await?;
                if let Some(name) = variable {
                    self.variables.insert(name, stringify(&result));
                }
                Ok(())
            }
        }
    }

    /// Replace `${name}` references from the variable scope. `${KEY_*}`
    /// tokens are reserved for key expansion and pass through untouched.
    fn substitute(&self, input: &str) -> Result<String> {
        if !input.contains("${") {
            return Ok(input.to_string());
        }

        let mut output = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(start) = rest.find("${") {
            output.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                output.push_str(&rest[start..]);
                rest = "";
                break;
            };
            let name = &after[..end];
            if name.starts_with("KEY_") {
                output.push_str(&rest[start..start + 2 + end + 1]);
            } else {
                match self.variables.get(name) {
                    Some(value) => output.push_str(value),
                    None => {
                        return Err(CoreError::UnboundVariable {
                            command_id: String::new(),
                            name: name.to_string(),
                        })
                    }
                }
            }
            rest = &after[end + 1..];
        }
        output.push_str(rest);
        Ok(output)
    }

    fn resolve_url(&self, target: &str) -> Result<String> {
        if target.starts_with("http://") || target.starts_with("https://") {
            return Ok(target.to_string());
        }
        let Some(base) = &self.base_url else {
            return Ok(target.to_string());
        };
        let resolved = reqwest::Url::parse(base)
            .and_then(|base| base.join(target))
            .map_err(|err| CoreError::driver(format!("cannot resolve url '{}': {}", target, err)))?;
        Ok(resolved.to_string())
    }

    /// Poll `document.readyState` until the page reports `complete`.
    async fn wait_for_page_load(&self) -> Result<()> {
        let started = Instant::now();
        loop {
            let state = self
                .driver
                .execute_script("return document.readyState", Vec::new())
                .await
                .unwrap_or(Value::Null);
            if state.as_str() == Some("complete") {
                return Ok(());
            }
            if started.elapsed() >= self.implicit_wait {
                return Err(CoreError::driver("timed out waiting for page load"));
            }
            tokio::time::sleep(READY_STATE_POLL_INTERVAL).await;
        }
    }

    #[cfg(test)]
    fn set_variable(&mut self, name: &str, value: &str) {
        self.variables.insert(name.to_string(), value.to_string());
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
