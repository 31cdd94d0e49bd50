//! Device classes and the device emulation scenarios derived from them.
//!
//! A test case runs against exactly one [`FormFactor`]. On a desktop machine
//! the shell is launched in a window that emulates a phone-sized device; on a
//! real device it runs fullscreen with the native grid unit.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The platform model string reported by desktop machines.
pub const DESKTOP_MODEL: &str = "Desktop";

/// Device class affecting which tests apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormFactor {
    Phone,
    Tablet,
    Desktop,
}

impl FormFactor {
    /// All form factors, in declaration order.
    pub const ALL: [FormFactor; 3] = [FormFactor::Phone, FormFactor::Tablet, FormFactor::Desktop];

    /// Maps a platform model string to a form factor.
    ///
    /// Only the literal desktop model maps to [`FormFactor::Desktop`]; any
    /// other model is a device and is treated as a phone.
    pub fn from_model(model: &str) -> Self {
        if model == DESKTOP_MODEL {
            FormFactor::Desktop
        } else {
            FormFactor::Phone
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FormFactor::Phone => "phone",
            FormFactor::Tablet => "tablet",
            FormFactor::Desktop => "desktop",
        }
    }
}

impl fmt::Display for FormFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown form factor name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown form factor: '{0}' (expected phone, tablet or desktop)")]
pub struct UnknownFormFactor(pub String);

impl FromStr for FormFactor {
    type Err = UnknownFormFactor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "phone" => Ok(FormFactor::Phone),
            "tablet" => Ok(FormFactor::Tablet),
            "desktop" => Ok(FormFactor::Desktop),
            _ => Err(UnknownFormFactor(s.to_string())),
        }
    }
}

/// Anything that can report the form factor a test runs against.
///
/// Test contexts override [`form_factor`](FormFactorSource::form_factor) to
/// opt into phone or tablet behaviour; the default is desktop.
pub trait FormFactorSource {
    fn form_factor(&self) -> FormFactor {
        FormFactor::Desktop
    }
}

/// A named geometry/grid-unit combination a test case can be run under.
///
/// Zero width and height mean "fullscreen"; a zero grid unit means "use the
/// ambient `GRID_UNIT_PX`".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceScenario {
    pub name: String,
    pub app_width: u32,
    pub app_height: u32,
    pub grid_unit_px: u32,
}

impl DeviceScenario {
    pub fn new(name: impl Into<String>, app_width: u32, app_height: u32, grid_unit_px: u32) -> Self {
        Self {
            name: name.into(),
            app_width,
            app_height,
            grid_unit_px,
        }
    }

    /// The scenario used on real hardware: fullscreen, ambient grid unit.
    pub fn native() -> Self {
        Self::new("Native Device", 0, 0, 0)
    }
}

/// Returns the scenarios test cases should be multiplied over for `model`.
///
/// Desktops emulate a Nexus 4 in a window; devices run natively.
pub fn device_emulation_scenarios(model: &str) -> Vec<DeviceScenario> {
    if model == DESKTOP_MODEL {
        vec![DeviceScenario::new("Desktop Nexus 4", 768, 1280, 18)]
    } else {
        vec![DeviceScenario::native()]
    }
}
