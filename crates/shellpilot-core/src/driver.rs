//! Accessibility driver trait for querying the running shell.
//!
//! This module defines the [`AccessibilityDriver`] trait, the seam between the
//! fixture and whatever introspection backend is attached to the launched
//! shell. Backends only need to provide the element tree; element lookup by
//! [`ElementQuery`] and property polling are implemented on top of it and may
//! be overridden by backends that can search server-side.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use shellpilot_core::driver::{wait_for_property, AccessibilityDriver, ElementQuery};
//!
//! # async fn example(driver: &dyn AccessibilityDriver) -> Result<(), Box<dyn std::error::Error>> {
//! let dash = ElementQuery::of_type("Dash");
//! wait_for_property(driver, &dash, "showScopeOnLoaded", "", Duration::from_secs(10)).await?;
//! let dash = driver.select_single(&dash).await?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

/// Interval between polls in [`wait_for_property`].
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Errors that can occur during accessibility driver operations.
#[derive(Error, Debug)]
pub enum DriverError {
    /// A query or operation failed with the given message.
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// The backend is not available or not connected.
    #[error("Not connected to accessibility backend")]
    NotConnected,

    /// More than one element matched a query that expects exactly one.
    #[error("Query {query} matched {count} elements, expected at most one")]
    Ambiguous { query: String, count: usize },

    /// An operation timed out.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse JSON data.
    #[error("JSON parse error: {0}")]
    JsonParse(String),
}

/// A node in the shell's introspection tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    /// The QML/Qt type name (e.g. "Dash", "Shell", "Launcher").
    #[serde(rename = "type")]
    pub type_name: String,

    /// The object name set on the item, if any.
    #[serde(rename = "objectName", default)]
    pub object_name: Option<String>,

    /// Exported properties, stringified by the backend.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,

    /// Child elements nested within this element.
    #[serde(default)]
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Default::default()
        }
    }

    pub fn named(mut self, object_name: impl Into<String>) -> Self {
        self.object_name = Some(object_name.into());
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }
}

/// Selects elements by type name and, optionally, object name.
///
/// The object name supports glob wildcards (`*` and `?`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementQuery {
    pub type_name: String,
    pub object_name: Option<String>,
}

impl ElementQuery {
    pub fn of_type(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            object_name: None,
        }
    }

    pub fn named(mut self, object_name: impl Into<String>) -> Self {
        self.object_name = Some(object_name.into());
        self
    }

    pub fn matches(&self, element: &Element) -> bool {
        if element.type_name != self.type_name {
            return false;
        }
        match &self.object_name {
            Some(pattern) => element
                .object_name
                .as_deref()
                .map_or(false, |name| glob_match(pattern, name)),
            None => true,
        }
    }
}

impl fmt::Display for ElementQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.object_name {
            Some(name) => write!(f, "{}[objectName={}]", self.type_name, name),
            None => f.write_str(&self.type_name),
        }
    }
}

/// Returns true if the pattern contains glob wildcard characters (`*` or `?`).
fn has_wildcard(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Matches a string against a glob pattern with `*` (any chars) and `?` (single char).
///
/// When the pattern has no wildcards, falls back to exact equality.
fn glob_match(pattern: &str, text: &str) -> bool {
    if !has_wildcard(pattern) {
        return pattern == text;
    }

    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();
    let (plen, tlen) = (pat.len(), txt.len());

    // dp[i][j] = pattern[..i] matches text[..j]
    let mut dp = vec![vec![false; tlen + 1]; plen + 1];
    dp[0][0] = true;

    for i in 1..=plen {
        if pat[i - 1] == '*' {
            dp[i][0] = dp[i - 1][0];
        }
    }

    for i in 1..=plen {
        for j in 1..=tlen {
            if pat[i - 1] == '*' {
                dp[i][j] = dp[i - 1][j] || dp[i][j - 1];
            } else if pat[i - 1] == '?' || pat[i - 1] == txt[j - 1] {
                dp[i][j] = dp[i - 1][j - 1];
            }
        }
    }

    dp[plen][tlen]
}

/// Collects every element in the tree matching `query`, depth-first.
pub fn search(elements: &[Element], query: &ElementQuery) -> Vec<Element> {
    let mut found = Vec::new();
    collect_matches(elements, query, &mut found);
    found
}

fn collect_matches(elements: &[Element], query: &ElementQuery, found: &mut Vec<Element>) {
    for element in elements {
        if query.matches(element) {
            found.push(element.clone());
        }
        collect_matches(&element.children, query, found);
    }
}

/// Trait for introspecting a launched shell.
///
/// Implementors provide [`dump_tree`](AccessibilityDriver::dump_tree) and
/// [`backend_name`](AccessibilityDriver::backend_name). Element selection
/// defaults to fetching the full tree and searching it locally.
#[async_trait]
pub trait AccessibilityDriver: Send + Sync {
    /// Human-readable backend name, for logging.
    fn backend_name(&self) -> &str;

    /// Get the full element tree of the application.
    async fn dump_tree(&self) -> Result<Vec<Element>, DriverError>;

    /// Find every element matching `query`.
    async fn select_many(&self, query: &ElementQuery) -> Result<Vec<Element>, DriverError> {
        let tree = self.dump_tree().await?;
        Ok(search(&tree, query))
    }

    /// Find the single element matching `query`.
    ///
    /// Returns `Ok(None)` when nothing matches and
    /// [`DriverError::Ambiguous`] when more than one element does.
    async fn select_single(&self, query: &ElementQuery) -> Result<Option<Element>, DriverError> {
        let mut found = self.select_many(query).await?;
        match found.len() {
            0 => Ok(None),
            1 => Ok(found.pop()),
            count => Err(DriverError::Ambiguous {
                query: query.to_string(),
                count,
            }),
        }
    }

    /// Read one property of the single element matching `query`.
    async fn property(&self, query: &ElementQuery, name: &str) -> Result<Option<String>, DriverError> {
        let element = self.select_single(query).await?;
        Ok(element.and_then(|e| e.properties.get(name).cloned()))
    }
}

/// Poll until the property `name` of the element matching `query` equals
/// `expected`.
///
/// Query errors while polling are treated like a missing element and retried
/// until the deadline.
///
/// # Errors
///
/// - [`DriverError::Timeout`] if the property does not reach `expected` in time
pub async fn wait_for_property(
    driver: &dyn AccessibilityDriver,
    query: &ElementQuery,
    name: &str,
    expected: &str,
    timeout: Duration,
) -> Result<(), DriverError> {
    let start = Instant::now();

    loop {
        match driver.property(query, name).await {
            Ok(Some(value)) if value == expected => return Ok(()),
            Ok(value) => debug!(%query, property = name, ?value, "Waiting for property"),
            Err(e) => debug!(%query, error = %e, "Query failed while waiting"),
        }

        if start.elapsed() >= timeout {
            return Err(DriverError::Timeout(timeout));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
