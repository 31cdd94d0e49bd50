//! CLI for fitting geometry and launching the shell under test.
//!
//! # Usage
//!
//! ```bash
//! # Fit a Nexus 4 sized window onto the current screen (queried with xrandr)
//! shellpilot fit 768x1280
//!
//! # Fit onto a given screen and scale a grid unit of 18 along with it
//! shellpilot fit 768x1280 --screen 1366x768 --grid-unit 18
//!
//! # List the device emulation scenarios for this machine
//! shellpilot scenarios
//!
//! # Print the launch command without running it
//! shellpilot launch --dry-run
//!
//! # Launch the shell for the first scenario and wait for it to exit
//! shellpilot launch
//!
//! # Show the persistent settings
//! shellpilot -f json config
//!
//! # Prefer a local build from now on
//! shellpilot config --build-dir ~/src/unity8/builddir
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use shellpilot_core::config::{
    logs_dir, ConfigError, ConfigKey, ConfigStore, MemoryStore, PilotConfig, ProcessEnv,
};
use shellpilot_core::display::{DisplayError, FixedScreen, ScreenQuery, Xrandr};
use shellpilot_core::fixture::{FixtureError, ShellFixture};
use shellpilot_core::form_factor::{device_emulation_scenarios, DeviceScenario};
use shellpilot_core::geometry::{fit, FittedGeometry, GeometryRequest, ScreenSize};
use shellpilot_core::grid::resolve_grid_unit;
use shellpilot_core::launcher::{spawn, LaunchError};

/// Fit geometry and launch the shell under test.
#[derive(Parser)]
#[command(name = "shellpilot")]
#[command(about = "Fit geometry and launch the shell under test")]
#[command(version)]
struct Cli {
    /// Output format: text or json
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Also write logs to ~/.shellpilot/logs/shellpilot.log
    #[arg(long)]
    log_file: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Fit a requested geometry onto the screen
    Fit {
        /// Requested geometry, WIDTHxHEIGHT (0x0 for fullscreen)
        geometry: GeometryRequest,
        /// Screen size, WIDTHxHEIGHT (queried with xrandr if omitted)
        #[arg(long, env = "SHELLPILOT_SCREEN")]
        screen: Option<ScreenSize>,
        /// Grid unit in pixels to scale along with the geometry
        #[arg(short, long, default_value = "0")]
        grid_unit: u32,
    },

    /// List device emulation scenarios
    Scenarios {
        /// Platform model (defaults to the configured model, then "Desktop")
        #[arg(short, long, env = "SHELLPILOT_MODEL")]
        model: Option<String>,
    },

    /// Set up the environment and launch the shell
    Launch {
        /// Scenario name (defaults to the first scenario for the model)
        #[arg(long)]
        scenario: Option<String>,
        /// Platform model (defaults to the configured model, then "Desktop")
        #[arg(short, long, env = "SHELLPILOT_MODEL")]
        model: Option<String>,
        /// Screen size, WIDTHxHEIGHT (queried with xrandr if omitted)
        #[arg(long, env = "SHELLPILOT_SCREEN")]
        screen: Option<ScreenSize>,
        /// Print the command instead of running it
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the persistent settings, saving any values given
    Config {
        /// Platform model to record
        #[arg(long)]
        model: Option<String>,
        /// Local build directory to prefer over the installed shell
        #[arg(long)]
        build_dir: Option<PathBuf>,
        /// Installed lib directory override
        #[arg(long)]
        lib_dir: Option<PathBuf>,
    },
}

#[derive(Debug)]
enum CliError {
    Usage(String),
    Config(String),
    Launch(String),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Usage(_) | CliError::Config(_) => ExitCode::from(2),
            CliError::Launch(_) => ExitCode::from(3),
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Usage(msg) => write!(f, "{}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Launch(msg) => write!(f, "Launch failed: {}", msg),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<DisplayError> for CliError {
    fn from(e: DisplayError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<LaunchError> for CliError {
    fn from(e: LaunchError) -> Self {
        CliError::Launch(e.to_string())
    }
}

impl From<FixtureError> for CliError {
    fn from(e: FixtureError) -> Self {
        match e {
            FixtureError::Launch(e) => e.into(),
            other => CliError::Config(other.to_string()),
        }
    }
}

fn init_logging(log_file: bool) {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    if log_file {
        let file_appender = tracing_appender::rolling::never(logs_dir(), "shellpilot.log");
        tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(file_appender)
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_file);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

fn screen_query(screen: Option<ScreenSize>) -> Box<dyn ScreenQuery> {
    match screen {
        Some(size) => Box::new(FixedScreen(size)),
        None => Box::new(Xrandr),
    }
}

/// In-memory copy of the ambient grid unit, so dry runs leave the
/// environment untouched.
fn ambient_store() -> MemoryStore {
    let store = MemoryStore::default();
    match std::env::var(ConfigKey::GridUnitPx.env_name()) {
        Ok(value) => store.with(ConfigKey::GridUnitPx, value),
        Err(_) => store,
    }
}

fn pick_scenario(model: &str, name: Option<&str>) -> Result<DeviceScenario, CliError> {
    let scenarios = device_emulation_scenarios(model);
    match name {
        None => scenarios
            .into_iter()
            .next()
            .ok_or_else(|| CliError::Usage(format!("No scenarios for model '{}'", model))),
        Some(name) => scenarios
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| {
                CliError::Usage(format!("Unknown scenario '{}' for model '{}'", name, model))
            }),
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let mut settings = PilotConfig::load();

    match cli.command {
        Command::Fit {
            geometry,
            screen,
            grid_unit,
        } => {
            let fitted = if geometry.is_fullscreen() {
                FittedGeometry::FULLSCREEN
            } else {
                fit(geometry, screen_query(screen).screen_size()?)?
            };

            let mut store = ambient_store();
            let grid = match resolve_grid_unit(grid_unit, fitted.divisor, &mut store) {
                Ok(g) => Some(g),
                Err(ConfigError::MissingGridUnit) => None,
                Err(e) => return Err(e.into()),
            };

            if cli.format == OutputFormat::Json {
                let output = serde_json::json!({
                    "fullscreen": fitted.is_fullscreen(),
                    "width": fitted.size().map(|(w, _)| w),
                    "height": fitted.size().map(|(_, h)| h),
                    "divisor": fitted.divisor.get(),
                    "grid_unit": grid,
                    "args": fitted.shell_args(),
                });
                println!("{}", output);
            } else {
                match fitted.size() {
                    Some((w, h)) => println!("geometry: {}x{}", w, h),
                    None => println!("geometry: fullscreen"),
                }
                println!("divisor: {}", fitted.divisor);
                match grid {
                    Some(g) => println!("grid unit: {}", g),
                    None => println!("grid unit: unset"),
                }
                println!("args: {}", fitted.shell_args().join(" "));
            }
        }

        Command::Scenarios { model } => {
            let model = model.unwrap_or_else(|| settings.model().to_string());
            let scenarios = device_emulation_scenarios(&model);

            if cli.format == OutputFormat::Json {
                let json = serde_json::to_string_pretty(&scenarios)
                    .map_err(|e| CliError::Config(e.to_string()))?;
                println!("{}", json);
            } else {
                for s in &scenarios {
                    println!(
                        "{}: {}x{} grid unit {}",
                        s.name, s.app_width, s.app_height, s.grid_unit_px
                    );
                }
            }
        }

        Command::Launch {
            scenario,
            model,
            screen,
            dry_run,
        } => {
            let model = model.unwrap_or_else(|| settings.model().to_string());
            let scenario = pick_scenario(&model, scenario.as_deref())?;
            let screen = screen_query(screen);

            if dry_run {
                let mut fixture =
                    ShellFixture::setup(&scenario, screen.as_ref(), ambient_store(), settings)?;
                let request = fixture.prepare_launch();
                if cli.format == OutputFormat::Json {
                    let output = serde_json::json!({
                        "scenario": scenario.name,
                        "binary": request.binary,
                        "args": request.args,
                        "env": request.env.iter().cloned().collect::<std::collections::BTreeMap<_, _>>(),
                    });
                    println!("{}", output);
                } else {
                    println!("{}", request.command_line());
                }
                return Ok(());
            }

            let mut fixture =
                ShellFixture::setup(&scenario, screen.as_ref(), ProcessEnv::new(), settings)?;
            let request = fixture.prepare_launch();
            info!(command = %request.command_line(), "Launching shell");

            let status = spawn(&request)
                .map_err(CliError::from)
                .and_then(|mut child| child.wait().map_err(|e| CliError::Launch(e.to_string())));
            fixture.cleanup();

            let status = status?;
            debug!(?status, "Shell exited");
            if !status.success() {
                return Err(CliError::Launch(format!("shell exited with {}", status)));
            }
        }

        Command::Config {
            model,
            build_dir,
            lib_dir,
        } => {
            let path: PathBuf = PilotConfig::path();
            if model.is_some() || build_dir.is_some() || lib_dir.is_some() {
                settings.model = model.or(settings.model);
                settings.build_dir = build_dir.or(settings.build_dir);
                settings.lib_dir = lib_dir.or(settings.lib_dir);
                settings
                    .save()
                    .map_err(|e| CliError::Config(format!("cannot write {}: {}", path.display(), e)))?;
                info!(path = %path.display(), "Saved settings");
            }

            let env = ProcessEnv::new();
            if cli.format == OutputFormat::Json {
                let ambient: std::collections::BTreeMap<_, _> = ConfigKey::ALL
                    .iter()
                    .map(|k| (k.env_name(), env.get(*k)))
                    .collect();
                let output = serde_json::json!({
                    "path": path,
                    "settings": settings,
                    "environment": ambient,
                });
                println!("{}", output);
            } else {
                println!("path: {}", path.display());
                let json = serde_json::to_string_pretty(&settings)
                    .map_err(|e| CliError::Config(e.to_string()))?;
                println!("{}", json);
                for key in ConfigKey::ALL {
                    println!("{}={}", key, env.get(key).unwrap_or_default());
                }
            }
        }
    }

    Ok(())
}
