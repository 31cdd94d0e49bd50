//! Grid unit resolution.
//!
//! The shell lays itself out in grid units (`GRID_UNIT_PX` pixels each). When
//! the window has been scaled down by a [`ScaleDivisor`], the grid unit is
//! divided by the same factor and written back to the [`ConfigStore`] so the
//! launched shell, and anything else reading the store, sees the adjusted
//! value.

use tracing::debug;

use crate::config::{ConfigError, ConfigKey, ConfigStore};
use crate::geometry::ScaleDivisor;

/// Pixels per grid unit.
pub type GridUnit = u32;

/// Resolve the grid unit for a test case.
///
/// - `requested == 0`: the ambient `GRID_UNIT_PX` is read from `store` and
///   used verbatim; the divisor is not applied and nothing is written.
/// - otherwise: `requested / divisor` (truncating) is returned and written
///   back to `store` under `GRID_UNIT_PX`.
///
/// A result of 0 is not rejected here.
///
/// # Errors
///
/// - [`ConfigError::MissingGridUnit`] if the ambient value is needed but unset
/// - [`ConfigError::InvalidGridUnit`] if the ambient value is not an integer
pub fn resolve_grid_unit(
    requested: GridUnit,
    divisor: ScaleDivisor,
    store: &mut dyn ConfigStore,
) -> Result<GridUnit, ConfigError> {
    if requested == 0 {
        let raw = store
            .get(ConfigKey::GridUnitPx)
            .ok_or(ConfigError::MissingGridUnit)?;
        let grid_unit = raw
            .trim()
            .parse::<GridUnit>()
            .map_err(|_| ConfigError::InvalidGridUnit(raw.clone()))?;
        debug!(grid_unit, "Using ambient grid unit");
        return Ok(grid_unit);
    }

    let grid_unit = divisor.apply(requested);
    store.set(ConfigKey::GridUnitPx, grid_unit.to_string());
    debug!(requested, divisor = divisor.get(), grid_unit, "Scaled grid unit");
    Ok(grid_unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryStore;
    use crate::geometry::{fit, GeometryRequest, ScreenSize};

    /// Store that records every write, to assert the ambient path never writes.
    #[derive(Default)]
    struct RecordingStore {
        ambient: Option<String>,
        writes: Vec<(ConfigKey, String)>,
    }

    impl ConfigStore for RecordingStore {
        fn get(&self, key: ConfigKey) -> Option<String> {
            match key {
                ConfigKey::GridUnitPx => self
                    .writes
                    .iter()
                    .rev()
                    .find(|(k, _)| *k == key)
                    .map(|(_, v)| v.clone())
                    .or_else(|| self.ambient.clone()),
                _ => None,
            }
        }

        fn set(&mut self, key: ConfigKey, value: String) {
            self.writes.push((key, value));
        }

        fn patches(&self) -> Vec<(ConfigKey, String)> {
            self.writes.clone()
        }

        fn restore(&mut self) {
            self.writes.clear();
        }
    }

    fn divisor(n: u32) -> ScaleDivisor {
        ScaleDivisor::try_from(n).unwrap()
    }

    #[test]
    fn ambient_value_used_verbatim_without_writing() {
        let mut store = RecordingStore {
            ambient: Some("18".to_string()),
            ..Default::default()
        };
        let grid_unit = resolve_grid_unit(0, divisor(4), &mut store).unwrap();
        assert_eq!(grid_unit, 18);
        assert!(store.writes.is_empty());
    }

    #[test]
    fn requested_value_is_scaled_and_written_back() {
        let mut store = RecordingStore::default();
        let grid_unit = resolve_grid_unit(36, divisor(2), &mut store).unwrap();
        assert_eq!(grid_unit, 18);
        assert_eq!(store.writes, vec![(ConfigKey::GridUnitPx, "18".to_string())]);
    }

    #[test]
    fn written_value_is_visible_to_later_reads() {
        let mut store = MemoryStore::default().with(ConfigKey::GridUnitPx, "10");
        resolve_grid_unit(18, divisor(2), &mut store).unwrap();
        assert_eq!(store.get(ConfigKey::GridUnitPx).as_deref(), Some("9"));
        assert_eq!(resolve_grid_unit(0, ScaleDivisor::ONE, &mut store).unwrap(), 9);
    }

    #[test]
    fn truncates_and_allows_zero() {
        let mut store = MemoryStore::default();
        assert_eq!(resolve_grid_unit(18, divisor(4), &mut store).unwrap(), 4);
        assert_eq!(resolve_grid_unit(3, divisor(8), &mut store).unwrap(), 0);
        assert_eq!(store.get(ConfigKey::GridUnitPx).as_deref(), Some("0"));
    }

    #[test]
    fn missing_ambient_value() {
        let mut store = MemoryStore::default();
        let err = resolve_grid_unit(0, ScaleDivisor::ONE, &mut store).unwrap_err();
        assert_eq!(err, ConfigError::MissingGridUnit);
    }

    #[test]
    fn unparsable_ambient_value() {
        let mut store = MemoryStore::default().with(ConfigKey::GridUnitPx, "eighteen");
        let err = resolve_grid_unit(0, ScaleDivisor::ONE, &mut store).unwrap_err();
        assert_eq!(err, ConfigError::InvalidGridUnit("eighteen".to_string()));
    }

    #[test]
    fn shares_divisor_with_geometry() {
        let fitted = fit(GeometryRequest::new(768, 1280), ScreenSize::new(1366, 768)).unwrap();
        assert_eq!(fitted.divisor.get(), 2);

        let mut store = MemoryStore::default();
        assert_eq!(resolve_grid_unit(18, fitted.divisor, &mut store).unwrap(), 9);
    }
}
