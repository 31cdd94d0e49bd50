//! Shared test helpers for shellpilot-core integration tests.
//!
//! This module provides a scripted accessibility driver and a launcher that
//! never spawns a process, so the fixture can be driven end to end without a
//! display.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use shellpilot_core::config::{ConfigKey, MemoryStore, PilotConfig};
use shellpilot_core::driver::{AccessibilityDriver, DriverError, Element};
use shellpilot_core::launcher::{AppHandle, LaunchError, LaunchRequest, ProcessLauncher};

// ---------------------------------------------------------------------------
// Scripted driver
// ---------------------------------------------------------------------------

/// Driver that returns a scripted sequence of trees, one per `dump_tree`
/// call. The last tree is repeated once the script is exhausted.
pub struct ScriptedDriver {
    trees: Mutex<Vec<Vec<Element>>>,
    dumps: Mutex<usize>,
}

impl ScriptedDriver {
    pub fn new(trees: Vec<Vec<Element>>) -> Self {
        assert!(!trees.is_empty(), "script needs at least one tree");
        Self {
            trees: Mutex::new(trees),
            dumps: Mutex::new(0),
        }
    }

    pub fn dumps(&self) -> usize {
        *self.dumps.lock().unwrap()
    }
}

#[async_trait]
impl AccessibilityDriver for ScriptedDriver {
    fn backend_name(&self) -> &str {
        "scripted"
    }

    async fn dump_tree(&self) -> Result<Vec<Element>, DriverError> {
        *self.dumps.lock().unwrap() += 1;
        let mut trees = self.trees.lock().unwrap();
        if trees.len() > 1 {
            Ok(trees.remove(0))
        } else {
            Ok(trees[0].clone())
        }
    }
}

/// A shell tree whose dash reports `show_scope` for `showScopeOnLoaded`.
pub fn shell_tree(show_scope: &str) -> Vec<Element> {
    vec![Element::new("Shell")
        .named("shell")
        .with_child(
            Element::new("Dash")
                .named("dash")
                .with_property("showScopeOnLoaded", show_scope),
        )
        .with_child(Element::new("Launcher").named("launcher"))]
}

/// A shell tree that has no dash at all.
pub fn shell_without_dash() -> Vec<Element> {
    vec![Element::new("Shell").named("shell")]
}

// ---------------------------------------------------------------------------
// Mock launcher
// ---------------------------------------------------------------------------

/// Launcher that records requests and hands out a fixed driver.
pub struct MockLauncher {
    driver: Arc<dyn AccessibilityDriver>,
    pub requests: Mutex<Vec<LaunchRequest>>,
}

impl MockLauncher {
    pub fn new(driver: Arc<dyn AccessibilityDriver>) -> Self {
        Self {
            driver,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn last_request(&self) -> LaunchRequest {
        self.requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no launch recorded")
    }
}

#[async_trait]
impl ProcessLauncher for MockLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<AppHandle, LaunchError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(AppHandle {
            pid: Some(4242),
            driver: self.driver.clone(),
        })
    }
}

/// Launcher whose launch always fails to spawn.
pub struct FailingLauncher;

#[async_trait]
impl ProcessLauncher for FailingLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<AppHandle, LaunchError> {
        Err(LaunchError::Spawn {
            binary: request.binary.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        })
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Settings pointing at an installed shell under a fake lib dir, with a short
/// dash timeout.
pub fn test_settings() -> PilotConfig {
    PilotConfig {
        lib_dir: Some("/usr/lib/test-arch/unity8".into()),
        dash_timeout_ms: 2_000,
        ..Default::default()
    }
}

/// A store seeded with an ambient grid unit of 18.
pub fn ambient_store() -> MemoryStore {
    MemoryStore::default().with(ConfigKey::GridUnitPx, "18")
}
