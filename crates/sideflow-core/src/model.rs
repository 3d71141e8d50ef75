//! Value types for recorded `.side` projects.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One recorded command. All fields are raw strings from the document;
/// interpretation happens at execution time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SideCommand {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub comment: Option<String>,
}

/// An ordered sequence of commands with a stable id and display name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SideTest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub commands: Vec<SideCommand>,
}

/// A named, ordered selection of the project's tests.
///
/// `parallel` is advisory metadata preserved from the document; suites
/// execute sequentially.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SideSuite {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tests: Vec<String>,
    #[serde(default, rename = "persistSession")]
    pub persist_session: bool,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// An immutable project tree: tests keyed by id plus ordered suites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideProject {
    pub id: String,
    pub name: String,
    pub url: Option<String>,
    pub tests: HashMap<String, SideTest>,
    pub suites: Vec<SideSuite>,
}

impl SideProject {
    /// Look up a suite by exact name, or fall back to the first suite.
    pub fn get_suite(&self, name: Option<&str>) -> Result<&SideSuite> {
        match name {
            None => self
                .suites
                .first()
                .ok_or_else(|| CoreError::NotFound("project has no suites".to_string())),
            Some(name) => self
                .suites
                .iter()
                .find(|suite| suite.name == name)
                .ok_or_else(|| CoreError::NotFound(format!("suite '{}'", name))),
        }
    }

    /// Look up a test by exact name.
    pub fn get_test_by_name(&self, name: &str) -> Result<&SideTest> {
        self.tests
            .values()
            .find(|test| test.name == name)
            .ok_or_else(|| CoreError::NotFound(format!("test '{}'", name)))
    }
}
