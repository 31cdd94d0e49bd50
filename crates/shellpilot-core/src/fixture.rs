//! The shell test fixture.
//!
//! A [`ShellFixture`] is created once per test case. Setup fits the scenario's
//! geometry onto the screen and resolves the grid unit; both are held for the
//! lifetime of the fixture. [`launch_shell`](ShellFixture::launch_shell) then
//! starts the shell with the computed arguments and waits for the dash to
//! finish loading, after which [`dash`](ShellFixture::dash) and
//! [`main_window`](ShellFixture::main_window) give tests access to the two
//! elements nearly every shell test starts from.
//!
//! # Example
//!
//! ```no_run
//! use shellpilot_core::config::{PilotConfig, ProcessEnv};
//! use shellpilot_core::display::Xrandr;
//! use shellpilot_core::fixture::ShellFixture;
//! use shellpilot_core::form_factor::DeviceScenario;
//! use shellpilot_core::launcher::ProcessLauncher;
//!
//! # async fn example(launcher: &dyn ProcessLauncher) -> Result<(), Box<dyn std::error::Error>> {
//! let scenario = DeviceScenario::new("Desktop Nexus 4", 768, 1280, 18);
//! let mut fixture = ShellFixture::setup(&scenario, &Xrandr, ProcessEnv::new(), PilotConfig::load())?;
//! fixture.launch_shell(launcher).await?;
//! let dash = fixture.dash().await?;
//! println!("dash: {:?}", dash.object_name);
//! fixture.cleanup();
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ConfigError, ConfigStore, PilotConfig};
use crate::display::{DisplayError, ScreenQuery};
use crate::driver::{wait_for_property, DriverError, Element, ElementQuery};
use crate::form_factor::{DeviceScenario, FormFactor, FormFactorSource};
use crate::geometry::{fit, FittedGeometry, GeometryRequest};
use crate::grid::{resolve_grid_unit, GridUnit};
use crate::launcher::{
    patch_environment, AppHandle, AppType, LaunchError, LaunchRequest, ProcessLauncher, ShellPaths,
};

/// Type name of the dash in the shell's element tree.
pub const DASH_TYPE: &str = "Dash";

/// Type name of the shell's top-level item.
pub const SHELL_TYPE: &str = "Shell";

/// Dash property that becomes empty once the initial scope has loaded.
pub const DASH_LOADED_PROPERTY: &str = "showScopeOnLoaded";

/// Errors that abort a shell test case.
#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("display error: {0}")]
    Display(#[from] DisplayError),

    #[error("launch failed: {0}")]
    Launch(#[from] LaunchError),

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// The dash did not finish loading within the configured timeout.
    #[error("dash did not load within {0:?}")]
    DashNotLoaded(Duration),

    /// A well-known element was not found.
    #[error("expected element {0} is missing")]
    ElementMissing(String),

    /// An element accessor was used before [`ShellFixture::launch_shell`].
    #[error("shell has not been launched")]
    NotLaunched,
}

/// The shell's top-level item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MainWindow {
    pub root: Element,
}

impl MainWindow {
    /// Find a direct or nested child of the main window.
    pub fn find(&self, query: &ElementQuery) -> Option<Element> {
        crate::driver::search(std::slice::from_ref(&self.root), query)
            .into_iter()
            .next()
    }
}

/// Per-test-case state for driving the shell.
pub struct ShellFixture<S: ConfigStore> {
    scenario: DeviceScenario,
    geometry: FittedGeometry,
    grid_unit: GridUnit,
    store: S,
    settings: PilotConfig,
    form_factor: FormFactor,
    app: Option<AppHandle>,
}

impl<S: ConfigStore> ShellFixture<S> {
    /// Fit the scenario's geometry onto `screen` and resolve the grid unit.
    ///
    /// The screen is only queried for windowed scenarios. The scaled grid
    /// unit is written to `store`.
    ///
    /// # Errors
    ///
    /// - [`FixtureError::Display`] if the screen size cannot be determined
    /// - [`FixtureError::Config`] for a zero screen dimension or a
    ///   missing/invalid ambient grid unit
    pub fn setup(
        scenario: &DeviceScenario,
        screen: &dyn ScreenQuery,
        mut store: S,
        settings: PilotConfig,
    ) -> Result<Self, FixtureError> {
        let request = GeometryRequest::new(scenario.app_width, scenario.app_height);
        let geometry = if request.is_fullscreen() {
            FittedGeometry::FULLSCREEN
        } else {
            fit(request, screen.screen_size()?)?
        };
        let grid_unit = resolve_grid_unit(scenario.grid_unit_px, geometry.divisor, &mut store)?;

        info!(
            scenario = %scenario.name,
            args = ?geometry.shell_args(),
            divisor = geometry.divisor.get(),
            grid_unit,
            "Fixture set up"
        );

        let form_factor = FormFactor::from_model(settings.model());
        Ok(Self {
            scenario: scenario.clone(),
            geometry,
            grid_unit,
            store,
            settings,
            form_factor,
            app: None,
        })
    }

    /// Override the form factor reported to the gatekeeper.
    pub fn with_form_factor(mut self, form_factor: FormFactor) -> Self {
        self.form_factor = form_factor;
        self
    }

    pub fn scenario(&self) -> &DeviceScenario {
        &self.scenario
    }

    pub fn geometry(&self) -> &FittedGeometry {
        &self.geometry
    }

    pub fn grid_unit(&self) -> GridUnit {
        self.grid_unit
    }

    /// Geometry-related arguments the shell will be launched with.
    pub fn shell_args(&self) -> Vec<String> {
        self.geometry.shell_args()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn is_launched(&self) -> bool {
        self.app.is_some()
    }

    /// Patch the environment and build the request for launching the shell.
    pub fn prepare_launch(&mut self) -> LaunchRequest {
        let paths = ShellPaths::resolve(&self.settings);
        info!(
            lib_path = %paths.lib_dir.display(),
            binary_path = %paths.binary.display(),
            local = paths.local,
            "Resolved shell paths"
        );
        patch_environment(&mut self.store, &paths, &self.settings.lightdm_mock);
        LaunchRequest::new(paths.binary, self.shell_args(), AppType::Qt).with_patches(&self.store)
    }

    /// Launch the shell and wait until the dash has loaded.
    ///
    /// # Errors
    ///
    /// - [`FixtureError::Launch`] if the process cannot be started
    /// - [`FixtureError::DashNotLoaded`] if the dash does not finish loading
    ///   within `dash_timeout_ms`
    pub async fn launch_shell(&mut self, launcher: &dyn ProcessLauncher) -> Result<&AppHandle, FixtureError> {
        let request = self.prepare_launch();
        let app = launcher.launch(&request).await?;
        debug!(pid = ?app.pid, backend = app.driver.backend_name(), "Started shell");

        info!("Waiting for the dash to load...");
        let timeout = Duration::from_millis(self.settings.dash_timeout_ms);
        let dash = ElementQuery::of_type(DASH_TYPE);
        let loaded = wait_for_property(app.driver.as_ref(), &dash, DASH_LOADED_PROPERTY, "", timeout).await;
        match loaded {
            Ok(()) => info!("dash loaded!"),
            Err(DriverError::Timeout(_)) => {
                self.app = Some(app);
                return Err(FixtureError::DashNotLoaded(timeout));
            }
            Err(e) => return Err(e.into()),
        }

        Ok(self.app.insert(app))
    }

    fn app(&self) -> Result<&AppHandle, FixtureError> {
        self.app.as_ref().ok_or(FixtureError::NotLaunched)
    }

    async fn require(&self, query: ElementQuery) -> Result<Element, FixtureError> {
        self.app()?
            .driver
            .select_single(&query)
            .await?
            .ok_or_else(|| FixtureError::ElementMissing(query.to_string()))
    }

    /// The dash. Fails if it is not present.
    pub async fn dash(&self) -> Result<Element, FixtureError> {
        self.require(ElementQuery::of_type(DASH_TYPE)).await
    }

    /// The shell's main window. Fails if it is not present.
    pub async fn main_window(&self) -> Result<MainWindow, FixtureError> {
        let root = self.require(ElementQuery::of_type(SHELL_TYPE)).await?;
        Ok(MainWindow { root })
    }

    /// Forget the launched application and undo every environment patch.
    pub fn cleanup(&mut self) {
        self.app = None;
        let patched = self.store.patches().len();
        self.store.restore();
        debug!(patched, "Restored environment");
    }
}

impl<S: ConfigStore> FormFactorSource for ShellFixture<S> {
    fn form_factor(&self) -> FormFactor {
        self.form_factor
    }
}
