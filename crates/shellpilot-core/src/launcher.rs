//! Launching the shell under test.
//!
//! This module handles locating the shell binary and its mock libraries,
//! patching the launch environment, and starting the process through a
//! [`ProcessLauncher`]. The launcher hands back an [`AppHandle`] whose
//! accessibility driver is used for every later element query.
//!
//! # Overview
//!
//! 1. **Resolve paths** with [`ShellPaths::resolve`]: a local build wins over
//!    the installed package
//! 2. **Patch the environment** with [`patch_environment`] so the shell picks
//!    up the mock QML modules and native libraries
//! 3. **Launch** through a [`ProcessLauncher`], for example
//!    [`CommandLauncher`], which spawns the binary and attaches a driver via a
//!    [`DriverConnector`]

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ConfigKey, ConfigStore, PilotConfig};
use crate::driver::{AccessibilityDriver, DriverError};

/// Name of the shell binary.
pub const SHELL_BINARY: &str = "unity8";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors specific to launching the shell.
#[derive(Error, Debug)]
pub enum LaunchError {
    /// The binary could not be started.
    #[error("Failed to spawn {binary}: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The process started but no accessibility driver could be attached.
    #[error("Failed to connect to launched application: {0}")]
    Connect(#[from] DriverError),
}

// ---------------------------------------------------------------------------
// Requests and handles
// ---------------------------------------------------------------------------

/// The toolkit the launched application is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppType {
    Qt,
}

impl AppType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppType::Qt => "qt",
        }
    }
}

/// Everything needed to start the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub app_type: AppType,
    /// Extra environment for the child, on top of the inherited environment.
    pub env: Vec<(String, String)>,
}

impl LaunchRequest {
    pub fn new(binary: impl Into<PathBuf>, args: Vec<String>, app_type: AppType) -> Self {
        Self {
            binary: binary.into(),
            args,
            app_type,
            env: Vec::new(),
        }
    }

    /// Carry over every key patched in `store`.
    pub fn with_patches(mut self, store: &dyn ConfigStore) -> Self {
        self.env.extend(
            store
                .patches()
                .into_iter()
                .map(|(key, value)| (key.env_name().to_string(), value)),
        );
        self
    }

    /// Shell-style rendering of the request, for logs and dry runs.
    pub fn command_line(&self) -> String {
        let mut parts: Vec<String> = self
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, quote(v)))
            .collect();
        parts.push(quote(&self.binary.display().to_string()));
        parts.extend(self.args.iter().map(|a| quote(a)));
        parts.join(" ")
    }
}

fn quote(s: &str) -> String {
    if !s.is_empty() && !s.contains(|c: char| c.is_whitespace() || c == '\'' || c == '"') {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

/// A launched application: its process id (when known) and the driver used
/// to query it.
#[derive(Clone)]
pub struct AppHandle {
    pub pid: Option<u32>,
    pub driver: Arc<dyn AccessibilityDriver>,
}

impl fmt::Debug for AppHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppHandle")
            .field("pid", &self.pid)
            .field("backend", &self.driver.backend_name())
            .finish()
    }
}

/// Starts applications and returns a handle for querying them.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self, request: &LaunchRequest) -> Result<AppHandle, LaunchError>;
}

/// Attaches an accessibility driver to a freshly spawned process.
#[async_trait]
pub trait DriverConnector: Send + Sync {
    async fn connect(
        &self,
        pid: u32,
        request: &LaunchRequest,
    ) -> Result<Arc<dyn AccessibilityDriver>, DriverError>;
}

/// Spawn the process described by `request`.
///
/// # Errors
///
/// - [`LaunchError::Spawn`] if the binary cannot be executed
pub fn spawn(request: &LaunchRequest) -> Result<Child, LaunchError> {
    Command::new(&request.binary)
        .args(&request.args)
        .envs(request.env.iter().cloned())
        .spawn()
        .map_err(|source| LaunchError::Spawn {
            binary: request.binary.clone(),
            source,
        })
}

/// [`ProcessLauncher`] that spawns a real child process.
///
/// Children that have already exited are forgotten on the next launch; the
/// rest are killed when the launcher is dropped.
pub struct CommandLauncher<C> {
    connector: C,
    children: Mutex<Vec<Child>>,
}

impl<C: DriverConnector> CommandLauncher<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            children: Mutex::new(Vec::new()),
        }
    }

    fn children(&self) -> MutexGuard<'_, Vec<Child>> {
        match self.children.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn track(&self, child: Child) {
        let mut children = self.children();
        children.retain_mut(|c| match c.try_wait() {
            Ok(Some(status)) => {
                debug!(pid = c.id(), %status, "Child exited");
                false
            }
            _ => true,
        });
        children.push(child);
    }

    /// Number of children started by this launcher that were still running
    /// at the last launch.
    pub fn tracked(&self) -> usize {
        self.children().len()
    }

    /// Kill and reap every child started by this launcher.
    pub fn terminate_all(&self) {
        let mut children = self.children();
        for mut child in children.drain(..) {
            let pid = child.id();
            if let Err(e) = child.kill() {
                debug!(pid, error = %e, "Child already exited");
            }
            let _ = child.wait();
        }
    }
}

#[async_trait]
impl<C: DriverConnector> ProcessLauncher for CommandLauncher<C> {
    async fn launch(&self, request: &LaunchRequest) -> Result<AppHandle, LaunchError> {
        info!(
            binary = %request.binary.display(),
            app_type = request.app_type.as_str(),
            "Launching application"
        );
        let child = spawn(request)?;
        let pid = child.id();
        self.track(child);

        let driver = self.connector.connect(pid, request).await?;
        debug!(pid, backend = driver.backend_name(), "Attached driver");
        Ok(AppHandle {
            pid: Some(pid),
            driver,
        })
    }
}

impl<C> Drop for CommandLauncher<C> {
    fn drop(&mut self) {
        let children = match self.children.get_mut() {
            Ok(children) => children,
            Err(poisoned) => poisoned.into_inner(),
        };
        for child in children.iter_mut() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

// ---------------------------------------------------------------------------
// Path resolution
// ---------------------------------------------------------------------------

/// Where the shell binary and its mock libraries live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellPaths {
    /// The binary to launch. A bare name is looked up on `PATH`.
    pub binary: PathBuf,
    /// The shell's lib directory.
    pub lib_dir: PathBuf,
    /// Directory holding the mock QML modules and mock native libraries.
    pub mocks_dir: PathBuf,
    /// True when launching a local build rather than the installed package.
    pub local: bool,
}

impl ShellPaths {
    /// Resolve paths from `config`, checking the filesystem for a local build.
    pub fn resolve(config: &PilotConfig) -> Self {
        Self::resolve_with(config, Path::exists)
    }

    /// Resolve paths using `exists` to probe for a local build.
    ///
    /// A local build is used when `<build_dir>/unity8` exists; its mocks live
    /// in `<build_dir>/tests/mocks`. Otherwise the installed binary is
    /// launched from `PATH` and the mocks are taken from
    /// `<lib_dir>/qml/mocks`, where `lib_dir` defaults to
    /// `/usr/lib/<multiarch>/unity8`.
    pub fn resolve_with(config: &PilotConfig, exists: impl Fn(&Path) -> bool) -> Self {
        if let Some(build_dir) = &config.build_dir {
            let binary = build_dir.join(SHELL_BINARY);
            if exists(&binary) {
                return Self {
                    binary,
                    lib_dir: build_dir.clone(),
                    mocks_dir: build_dir.join("tests").join("mocks"),
                    local: true,
                };
            }
            warn!(build_dir = %build_dir.display(), "No local build found, using installed shell");
        }

        let lib_dir = config.lib_dir.clone().unwrap_or_else(|| {
            let multiarch = config.multiarch.clone().unwrap_or_else(default_multiarch);
            PathBuf::from("/usr/lib").join(multiarch).join(SHELL_BINARY)
        });
        Self {
            binary: PathBuf::from(SHELL_BINARY),
            mocks_dir: lib_dir.join("qml").join("mocks"),
            lib_dir,
            local: false,
        }
    }
}

/// The Debian multiarch triplet for the architecture this crate was built for.
pub fn default_multiarch() -> String {
    match std::env::consts::ARCH {
        "x86" => "i386-linux-gnu".to_string(),
        "arm" => "arm-linux-gnueabihf".to_string(),
        "powerpc64" => "powerpc64le-linux-gnu".to_string(),
        arch => format!("{}-linux-gnu", arch),
    }
}

/// Point the shell at its mock QML modules and mock native libraries.
pub fn patch_environment(store: &mut dyn ConfigStore, paths: &ShellPaths, lightdm_mock: &str) {
    let mocks = &paths.mocks_dir;
    store.set(ConfigKey::Qml2ImportPath, mocks.display().to_string());

    let ld_paths = [
        mocks.join("libusermetrics"),
        mocks.join("LightDM").join(lightdm_mock),
    ];
    let ld_library_path = ld_paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(":");
    store.set(ConfigKey::LdLibraryPath, ld_library_path);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryStore;

    #[test]
    fn local_build_wins() {
        let config = PilotConfig {
            build_dir: Some(PathBuf::from("/src/unity8/builddir")),
            ..Default::default()
        };
        let paths = ShellPaths::resolve_with(&config, |_| true);
        assert!(paths.local);
        assert_eq!(paths.binary, PathBuf::from("/src/unity8/builddir/unity8"));
        assert_eq!(paths.mocks_dir, PathBuf::from("/src/unity8/builddir/tests/mocks"));
    }

    #[test]
    fn missing_local_build_falls_back_to_installed() {
        let config = PilotConfig {
            build_dir: Some(PathBuf::from("/src/unity8/builddir")),
            multiarch: Some("x86_64-linux-gnu".to_string()),
            ..Default::default()
        };
        let paths = ShellPaths::resolve_with(&config, |_| false);
        assert!(!paths.local);
        assert_eq!(paths.binary, PathBuf::from("unity8"));
        assert_eq!(paths.lib_dir, PathBuf::from("/usr/lib/x86_64-linux-gnu/unity8"));
        assert_eq!(
            paths.mocks_dir,
            PathBuf::from("/usr/lib/x86_64-linux-gnu/unity8/qml/mocks")
        );
    }

    #[test]
    fn lib_dir_override() {
        let config = PilotConfig {
            lib_dir: Some(PathBuf::from("/opt/unity8/lib")),
            ..Default::default()
        };
        let paths = ShellPaths::resolve_with(&config, |_| true);
        assert_eq!(paths.mocks_dir, PathBuf::from("/opt/unity8/lib/qml/mocks"));
    }

    #[test]
    fn multiarch_has_linux_gnu_suffix() {
        assert!(default_multiarch().contains("-linux-gnu"));
    }

    #[test]
    fn patch_environment_sets_mock_paths() {
        let paths = ShellPaths {
            binary: PathBuf::from("unity8"),
            lib_dir: PathBuf::from("/usr/lib/x/unity8"),
            mocks_dir: PathBuf::from("/usr/lib/x/unity8/qml/mocks"),
            local: false,
        };
        let mut store = MemoryStore::default();
        patch_environment(&mut store, &paths, "full");

        assert_eq!(
            store.get(ConfigKey::Qml2ImportPath).as_deref(),
            Some("/usr/lib/x/unity8/qml/mocks")
        );
        assert_eq!(
            store.get(ConfigKey::LdLibraryPath).as_deref(),
            Some("/usr/lib/x/unity8/qml/mocks/libusermetrics:/usr/lib/x/unity8/qml/mocks/LightDM/full")
        );
    }

    #[test]
    fn request_carries_patches() {
        let mut store = MemoryStore::default();
        store.set(ConfigKey::GridUnitPx, "9".to_string());
        let request = LaunchRequest::new("unity8", vec!["-fullscreen".to_string()], AppType::Qt)
            .with_patches(&store);
        assert_eq!(request.env, vec![("GRID_UNIT_PX".to_string(), "9".to_string())]);
        assert_eq!(request.command_line(), "GRID_UNIT_PX=9 unity8 -fullscreen");
    }

    #[test]
    fn command_line_quotes() {
        let request = LaunchRequest::new(
            "/opt/my shell/unity8",
            vec!["-geometry".to_string(), "384x640".to_string(), String::new()],
            AppType::Qt,
        );
        assert_eq!(request.command_line(), "'/opt/my shell/unity8' -geometry 384x640 ''");
    }

    struct EmptyDriver;

    #[async_trait]
    impl AccessibilityDriver for EmptyDriver {
        fn backend_name(&self) -> &str {
            "empty"
        }

        async fn dump_tree(&self) -> Result<Vec<crate::driver::Element>, DriverError> {
            Ok(Vec::new())
        }
    }

    /// Connector that records the pid it was asked to attach to.
    #[derive(Default)]
    struct RecordingConnector {
        pids: Mutex<Vec<u32>>,
        fail: bool,
    }

    #[async_trait]
    impl DriverConnector for RecordingConnector {
        async fn connect(
            &self,
            pid: u32,
            _request: &LaunchRequest,
        ) -> Result<Arc<dyn AccessibilityDriver>, DriverError> {
            self.pids.lock().unwrap().push(pid);
            if self.fail {
                return Err(DriverError::NotConnected);
            }
            Ok(Arc::new(EmptyDriver))
        }
    }

    fn sleep_request(secs: &str) -> LaunchRequest {
        LaunchRequest::new("sleep", vec![secs.to_string()], AppType::Qt)
    }

    #[tokio::test]
    async fn command_launcher_attaches_driver_to_spawned_pid() {
        let launcher = CommandLauncher::new(RecordingConnector::default());
        let app = launcher.launch(&sleep_request("30")).await.unwrap();

        let pid = app.pid.unwrap();
        assert_eq!(app.driver.backend_name(), "empty");
        assert_eq!(*launcher.connector.pids.lock().unwrap(), vec![pid]);
        assert_eq!(launcher.tracked(), 1);

        launcher.terminate_all();
        assert_eq!(launcher.tracked(), 0);
    }

    #[tokio::test]
    async fn command_launcher_connect_failure_keeps_child_for_cleanup() {
        let connector = RecordingConnector {
            fail: true,
            ..Default::default()
        };
        let launcher = CommandLauncher::new(connector);
        let err = launcher.launch(&sleep_request("30")).await.unwrap_err();

        assert!(matches!(err, LaunchError::Connect(DriverError::NotConnected)));
        assert_eq!(launcher.tracked(), 1);
        launcher.terminate_all();
    }

    #[tokio::test]
    async fn command_launcher_forgets_exited_children() {
        let launcher = CommandLauncher::new(RecordingConnector::default());
        launcher.launch(&sleep_request("0")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;

        launcher.launch(&sleep_request("30")).await.unwrap();
        assert_eq!(launcher.tracked(), 1);
        launcher.terminate_all();
    }

    #[tokio::test]
    async fn command_launcher_spawn_failure() {
        let launcher = CommandLauncher::new(RecordingConnector::default());
        let request = LaunchRequest::new("/nonexistent/shellpilot/unity8", Vec::new(), AppType::Qt);
        let err = launcher.launch(&request).await.unwrap_err();

        assert!(matches!(err, LaunchError::Spawn { .. }));
        assert!(launcher.connector.pids.lock().unwrap().is_empty());
        assert_eq!(launcher.tracked(), 0);
    }

    #[test]
    fn spawn_missing_binary_fails() {
        let request = LaunchRequest::new(
            "/nonexistent/shellpilot/unity8",
            Vec::new(),
            AppType::Qt,
        );
        let err = spawn(&request).unwrap_err();
        assert!(matches!(err, LaunchError::Spawn { .. }));
        assert!(err.to_string().contains("/nonexistent/shellpilot/unity8"));
    }
}
