//! Parse a rendered `.side` document into the project model.
//!
//! Parsing is total over the Selenium IDE schema: unknown top-level keys are
//! ignored and unknown command names pass through to fail at execution time.

use crate::error::{CoreError, Result};
use crate::model::{SideCommand, SideProject, SideSuite, SideTest};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Deserialize)]
struct RawProject {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    tests: Vec<SideTest>,
    #[serde(default)]
    suites: Vec<SideSuite>,
}

/// Build a [`SideProject`] from document text.
///
/// Structural failures map to `MalformedScript`; a suite citing a test id
/// that does not resolve inside the project maps to `InvalidReference`.
pub fn load_project(content: &str) -> Result<SideProject> {
    let raw: RawProject = serde_json::from_str(content)
        .map_err(|err| CoreError::MalformedScript(err.to_string()))?;

    if raw.suites.is_empty() {
        return Err(CoreError::MalformedScript(
            "project has no suites".to_string(),
        ));
    }

    let tests: HashMap<String, SideTest> = raw
        .tests
        .into_iter()
        .map(|test| (test.id.clone(), test))
        .collect();

    for suite in &raw.suites {
        for test_id in &suite.tests {
            if !tests.contains_key(test_id) {
                return Err(CoreError::InvalidReference {
                    suite: suite.name.clone(),
                    test_id: test_id.clone(),
                });
            }
        }
    }

    Ok(SideProject {
        id: raw.id,
        name: raw.name,
        url: raw.url,
        tests,
        suites: raw.suites,
    })
}

/// Resolve the tests of a suite, in suite order.
pub fn suite_tests<'a>(project: &'a SideProject, suite: &SideSuite) -> Vec<&'a SideTest> {
    suite
        .tests
        .iter()
        .filter_map(|test_id| project.tests.get(test_id))
        .collect()
}
