//! Screen size queries.
//!
//! The geometry fitter needs the real screen size. [`Xrandr`] asks the X
//! server through the `xrandr` command-line tool; [`FixedScreen`] returns a
//! known size and is what tests and `--screen` overrides use.

use std::process::Command;

use thiserror::Error;

use crate::geometry::ScreenSize;

/// Errors that can occur when querying the display.
#[derive(Error, Debug)]
pub enum DisplayError {
    /// The display tool exited unsuccessfully.
    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    /// The display tool's output did not contain a screen size.
    #[error("Could not parse screen size from: {0}")]
    Parse(String),

    /// An I/O error occurred while executing the command.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of the current screen size.
pub trait ScreenQuery {
    fn screen_size(&self) -> Result<ScreenSize, DisplayError>;
}

/// A screen of known size.
#[derive(Debug, Clone, Copy)]
pub struct FixedScreen(pub ScreenSize);

impl ScreenQuery for FixedScreen {
    fn screen_size(&self) -> Result<ScreenSize, DisplayError> {
        Ok(self.0)
    }
}

/// Wrapper for `xrandr --current`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Xrandr;

impl ScreenQuery for Xrandr {
    /// Runs `xrandr --current` and reads the `current W x H` clause of the
    /// first `Screen` line.
    ///
    /// # Errors
    ///
    /// - [`DisplayError::Io`] if `xrandr` cannot be executed
    /// - [`DisplayError::CommandFailed`] if `xrandr` exits with a failure
    /// - [`DisplayError::Parse`] if no screen size is found in the output
    fn screen_size(&self) -> Result<ScreenSize, DisplayError> {
        let output = Command::new("xrandr").arg("--current").output()?;

        if !output.status.success() {
            return Err(DisplayError::CommandFailed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }

        parse_xrandr(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Extract the current screen size from `xrandr` output.
fn parse_xrandr(output: &str) -> Result<ScreenSize, DisplayError> {
    let parse_err = || DisplayError::Parse(output.lines().next().unwrap_or_default().to_string());

    let line = output
        .lines()
        .find(|l| l.starts_with("Screen "))
        .ok_or_else(parse_err)?;

    // "Screen 0: minimum 8 x 8, current 1920 x 1080, maximum 32767 x 32767"
    let current = line
        .split(',')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("current "))
        .ok_or_else(parse_err)?;

    let (w, h) = current.split_once(" x ").ok_or_else(parse_err)?;
    let width = w.trim().parse().map_err(|_| parse_err())?;
    let height = h.trim().parse().map_err(|_| parse_err())?;
    Ok(ScreenSize::new(width, height))
}
