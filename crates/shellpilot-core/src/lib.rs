//! # shellpilot-core
//!
//! Fixture layer for driving the shell under test through an accessibility
//! driver.
//!
//! This crate provides the pieces a shell test case needs before its first
//! assertion: fitting the requested window geometry onto the real screen,
//! scaling the grid unit to match, patching the launch environment, launching
//! the shell binary and locating well-known UI elements once it is up.
//!
//! ## Modules
//!
//! - [`geometry`] - Fits a requested window size onto the screen by a power-of-two divisor
//! - [`grid`] - Resolves the grid unit and writes the scaled value back to the config store
//! - [`display`] - Screen size queries (`xrandr` or a fixed size)
//! - [`config`] - Narrowed configuration store and persistent settings
//! - [`form_factor`] - Device classes and device emulation scenarios
//! - [`gatekeeper`] - Per-form-factor test blacklisting at registration time
//! - [`driver`] - Accessibility driver trait and element queries
//! - [`launcher`] - Shell path resolution, environment patching and process launch
//! - [`fixture`] - The shell test fixture tying everything together
//!
//! ## External Dependencies
//!
//! Launching against a real display requires:
//!
//! - **unity8** - either a local build or the installed package
//! - **xrandr** - used by [`display::Xrandr`] to query the screen size
//!
//! ## Example
//!
//! ```no_run
//! use shellpilot_core::config::MemoryStore;
//! use shellpilot_core::display::{FixedScreen, ScreenQuery};
//! use shellpilot_core::geometry::{fit, GeometryRequest, ScreenSize};
//! use shellpilot_core::grid::resolve_grid_unit;
//!
//! let screen = FixedScreen(ScreenSize::new(1280, 720)).screen_size().unwrap();
//! let fitted = fit(GeometryRequest::new(768, 1280), screen).unwrap();
//!
//! let mut store = MemoryStore::default();
//! let grid_unit = resolve_grid_unit(18, fitted.divisor, &mut store).unwrap();
//! println!("{:?} grid unit {}", fitted.shell_args(), grid_unit);
//! ```

pub mod config;
pub mod display;
pub mod driver;
pub mod fixture;
pub mod form_factor;
pub mod gatekeeper;
pub mod geometry;
pub mod grid;
pub mod launcher;
