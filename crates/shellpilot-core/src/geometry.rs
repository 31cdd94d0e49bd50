//! Fitting a requested window geometry onto the real screen.
//!
//! A test scenario asks for a window of a given size (for example a phone
//! emulated on a desktop). When that window does not fit on the screen, both
//! dimensions are divided by the smallest power of two that makes it fit. The
//! same [`ScaleDivisor`] is later applied to the grid unit (see
//! [`crate::grid`]) so the shell's layout stays proportional.
//!
//! A request of `0x0` means "fullscreen": no scaling happens and the shell is
//! told to take the whole screen instead of receiving an explicit geometry.
//!
//! # Example
//!
//! ```
//! use shellpilot_core::geometry::{fit, GeometryMode, GeometryRequest, ScreenSize};
//!
//! let fitted = fit(GeometryRequest::new(2560, 1440), ScreenSize::new(1280, 720)).unwrap();
//! assert_eq!(fitted.divisor.get(), 2);
//! assert_eq!(fitted.mode, GeometryMode::Window { width: 1280, height: 720 });
//! assert_eq!(fitted.shell_args(), ["-geometry", "1280x720", "-frameless", "-mousetouch"]);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ConfigError;

/// Requested window size. `0x0` requests fullscreen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeometryRequest {
    pub width: u32,
    pub height: u32,
}

impl GeometryRequest {
    pub const FULLSCREEN: GeometryRequest = GeometryRequest { width: 0, height: 0 };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Fullscreen is requested only when both dimensions are zero.
    pub fn is_fullscreen(&self) -> bool {
        self.width == 0 && self.height == 0
    }
}

/// Actual screen size as reported by the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

impl ScreenSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    fn contains(&self, width: u32, height: u32) -> bool {
        width <= self.width && height <= self.height
    }
}

fn parse_size(s: &str) -> Result<(u32, u32), ConfigError> {
    let invalid = || ConfigError::InvalidSize(s.to_string());
    let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
    let w = w.trim().parse().map_err(|_| invalid())?;
    let h = h.trim().parse().map_err(|_| invalid())?;
    Ok((w, h))
}

impl FromStr for GeometryRequest {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_size(s).map(|(w, h)| Self::new(w, h))
    }
}

impl FromStr for ScreenSize {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_size(s).map(|(w, h)| Self::new(w, h))
    }
}

impl fmt::Display for GeometryRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl fmt::Display for ScreenSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Power-of-two factor by which geometry and grid unit are scaled down.
///
/// Always a power of two, so never 0. Deserializing any other value fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32")]
pub struct ScaleDivisor(u32);

impl ScaleDivisor {
    pub const ONE: ScaleDivisor = ScaleDivisor(1);

    /// The largest representable divisor, 2^31.
    pub const MAX: ScaleDivisor = ScaleDivisor(1 << 31);

    pub fn get(self) -> u32 {
        self.0
    }

    /// Twice this divisor, or `None` past [`ScaleDivisor::MAX`].
    pub fn doubled(self) -> Option<Self> {
        self.0.checked_mul(2).map(ScaleDivisor)
    }

    /// Divide `value` by this divisor, truncating.
    pub fn apply(self, value: u32) -> u32 {
        value / self.0
    }
}

impl TryFrom<u32> for ScaleDivisor {
    type Error = ConfigError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if value.is_power_of_two() {
            Ok(ScaleDivisor(value))
        } else {
            Err(ConfigError::InvalidDivisor(value))
        }
    }
}

impl Default for ScaleDivisor {
    fn default() -> Self {
        Self::ONE
    }
}

impl fmt::Display for ScaleDivisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the shell should size its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum GeometryMode {
    Fullscreen,
    Window { width: u32, height: u32 },
}

/// Result of [`fit`]: the window mode plus the divisor used to get there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FittedGeometry {
    pub mode: GeometryMode,
    pub divisor: ScaleDivisor,
}

impl FittedGeometry {
    pub const FULLSCREEN: FittedGeometry = FittedGeometry {
        mode: GeometryMode::Fullscreen,
        divisor: ScaleDivisor::ONE,
    };

    pub fn is_fullscreen(&self) -> bool {
        matches!(self.mode, GeometryMode::Fullscreen)
    }

    /// The effective window size, or `None` for fullscreen.
    pub fn size(&self) -> Option<(u32, u32)> {
        match self.mode {
            GeometryMode::Fullscreen => None,
            GeometryMode::Window { width, height } => Some((width, height)),
        }
    }

    /// Geometry-related command-line arguments for the shell binary.
    pub fn shell_args(&self) -> Vec<String> {
        match self.mode {
            GeometryMode::Fullscreen => vec!["-fullscreen".to_string()],
            GeometryMode::Window { width, height } => vec![
                "-geometry".to_string(),
                format!("{}x{}", width, height),
                "-frameless".to_string(),
                "-mousetouch".to_string(),
            ],
        }
    }
}

/// Fit `request` onto `screen`.
///
/// Returns fullscreen with a divisor of 1 when both requested dimensions are
/// zero. Otherwise returns the smallest power-of-two divisor for which
/// `width / divisor <= screen.width` and `height / divisor <= screen.height`,
/// together with the divided (truncated) window size.
///
/// # Errors
///
/// - [`ConfigError::InvalidScreen`] if either screen dimension is zero
pub fn fit(request: GeometryRequest, screen: ScreenSize) -> Result<FittedGeometry, ConfigError> {
    if request.is_fullscreen() {
        return Ok(FittedGeometry::FULLSCREEN);
    }

    if screen.width == 0 || screen.height == 0 {
        return Err(ConfigError::InvalidScreen {
            width: screen.width,
            height: screen.height,
        });
    }

    // At ScaleDivisor::MAX every u32 dimension divides down to at most 1,
    // which fits any screen of at least 1x1.
    let mut divisor = ScaleDivisor::ONE;
    while !screen.contains(divisor.apply(request.width), divisor.apply(request.height)) {
        match divisor.doubled() {
            Some(next) => divisor = next,
            None => break,
        }
    }

    let width = divisor.apply(request.width);
    let height = divisor.apply(request.height);
    if divisor > ScaleDivisor::ONE {
        info!(
            requested = %request,
            screen = %screen,
            divisor = divisor.get(),
            "Provided geometry larger than display, scaled down to: {}x{}",
            width,
            height
        );
    }

    Ok(FittedGeometry {
        mode: GeometryMode::Window { width, height },
        divisor,
    })
}
