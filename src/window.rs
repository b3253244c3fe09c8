use std::{cmp::Ordering, fmt, ops::RangeInclusive};

use ndarray::{Array, ArrayBase, Data, Dimension, Zip};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::enums::DisplayTransform;

#[derive(Debug, Error, PartialEq)]
pub enum InvalidWindowError {
    #[error("window width must be positive, got {0}")]
    NonPositiveWidth(f64),

    #[error("window parameters must be finite (width {width}, center {center})")]
    NonFinite { width: f64, center: f64 },
}

/// Window width (WW) and center (WL) in raw intensity units.
///
/// The fields are public so that degenerate windows can be expressed;
/// [`WindowSpec::new`] is the checked constructor UI controls should use.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WindowSpec {
    pub width: f64,
    pub center: f64,
}

impl WindowSpec {
    pub fn new(width: f64, center: f64) -> Result<Self, InvalidWindowError> {
        let window = Self { width, center };
        window.validate()?;
        Ok(window)
    }

    /// Window spanning exactly `[min, max]`.
    pub fn from_range(range: IntensityRange) -> Self {
        let width = range.max - range.min;
        Self {
            width,
            center: range.min + width / 2.0,
        }
    }

    pub fn validate(&self) -> Result<(), InvalidWindowError> {
        if !self.width.is_finite() || !self.center.is_finite() {
            return Err(InvalidWindowError::NonFinite {
                width: self.width,
                center: self.center,
            });
        }
        if self.width <= 0.0 {
            return Err(InvalidWindowError::NonPositiveWidth(self.width));
        }
        Ok(())
    }

    pub fn low(&self) -> f64 {
        self.center - self.width / 2.0
    }

    pub fn high(&self) -> f64 {
        self.center + self.width / 2.0
    }
}

impl fmt::Display for WindowSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WW {} / WL {}", self.width, self.center)
    }
}

/// Minimum and maximum raw intensity of an array.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntensityRange {
    pub min: f64,
    pub max: f64,
}

impl IntensityRange {
    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    /// Ranges a UI should clamp custom width and center controls to.
    pub fn custom_bounds(&self) -> (RangeInclusive<f64>, RangeInclusive<f64>) {
        let span = self.span();
        let width = 1.0..=(2.0 * span).max(1.0);
        let center = (self.min - span)..=(self.max + span);
        (width, center)
    }

    /// Reduces an array to its range, ignoring NaN. `None` if nothing remains.
    pub fn of<S, D>(array: &ArrayBase<S, D>) -> Option<Self>
    where
        S: Data,
        S::Elem: Copy + Into<f64> + Sync,
        D: Dimension,
    {
        let (min, max) = array
            .view()
            .into_par_iter()
            .map(|&v| v.into())
            .filter(|v: &f64| !v.is_nan())
            .fold(
                || (f64::INFINITY, f64::NEG_INFINITY),
                |(lo, hi), v| (lo.min(v), hi.max(v)),
            )
            .reduce(
                || (f64::INFINITY, f64::NEG_INFINITY),
                |a, b| (a.0.min(b.0), a.1.max(b.1)),
            );
        (min <= max).then_some(Self { min, max })
    }
}

/// Named window presets offered to the user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WindowPreset {
    /// Full dynamic range of the loaded data.
    #[default]
    Default,
    CtAbdomen,
    CtBone,
    Custom(WindowSpec),
}

impl WindowPreset {
    pub fn name(&self) -> &'static str {
        match self {
            WindowPreset::Default => "Default",
            WindowPreset::CtAbdomen => "CT Abdomen",
            WindowPreset::CtBone => "CT Bone",
            WindowPreset::Custom(_) => "Custom",
        }
    }

    /// Resolves the preset against the range the default window is derived from.
    pub fn resolve(&self, range: IntensityRange) -> WindowSpec {
        match self {
            WindowPreset::Default => WindowSpec::from_range(range),
            WindowPreset::CtAbdomen => WindowSpec {
                width: 350.0,
                center: 50.0,
            },
            WindowPreset::CtBone => WindowSpec {
                width: 2000.0,
                center: 350.0,
            },
            WindowPreset::Custom(window) => *window,
        }
    }
}

/// Maps raw intensities into `[0, 1]` for grayscale display.
///
/// Values are clipped to `[low, high]` and rescaled linearly so that `low`
/// becomes `0.0` and `high` becomes `1.0`. A window with `high <= low`
/// yields an all-zero array of the same shape. NaN inputs map to `0.0`.
pub fn apply_window<S, D>(array: &ArrayBase<S, D>, window: WindowSpec) -> Array<f32, D>
where
    S: Data,
    S::Elem: Copy + Into<f64> + Sync,
    D: Dimension,
{
    let low = window.low();
    let high = window.high();
    if high.partial_cmp(&low) != Some(Ordering::Greater) {
        return Array::zeros(array.raw_dim());
    }
    let range = high - low;

    Zip::from(array).par_map_collect(|&value| {
        let value: f64 = value.into();
        if value.is_nan() {
            return 0.0;
        }
        ((value.clamp(low, high) - low) / range).clamp(0.0, 1.0) as f32
    })
}

/// Applies the post-window display stage to an already normalized array.
pub fn apply_display_transform<D: Dimension>(
    normalized: Array<f32, D>,
    transform: DisplayTransform,
) -> Array<f32, D> {
    match transform {
        DisplayTransform::Identity => normalized,
        DisplayTransform::Negative => normalized.mapv_into(|v| 1.0 - v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3, array};

    #[test]
    fn ct_abdomen_maps_reference_values() {
        let window = WindowPreset::CtAbdomen.resolve(IntensityRange {
            min: -1000.0,
            max: 2000.0,
        });
        assert_eq!(window.low(), -125.0);
        assert_eq!(window.high(), 225.0);

        let raw = array![[-1000.0_f32, 2000.0, 50.0]];
        let out = apply_window(&raw, window);
        assert_eq!(out, array![[0.0_f32, 1.0, 0.5]]);
    }

    #[test]
    fn window_bounds_map_to_unit_interval_edges() {
        let window = WindowSpec::new(400.0, 40.0).unwrap();
        let raw = array![-160.0_f32, 240.0, -3000.0, 3000.0];
        let out = apply_window(&raw, window);
        assert_eq!(out, array![0.0_f32, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn zero_width_window_yields_zeros() {
        let raw = Array3::from_shape_fn((2, 3, 4), |(z, y, x)| (z * 100 + y * 10 + x) as i16);
        for center in [-1000.0, 0.0, 12.0, 3.5e4] {
            let out = apply_window(&raw, WindowSpec { width: 0.0, center });
            assert_eq!(out.dim(), (2, 3, 4));
            assert!(out.iter().all(|&v| v == 0.0));
        }
    }

    #[test]
    fn inverted_window_yields_zeros() {
        let raw = array![[1.0_f32, 2.0], [3.0, 4.0]];
        let out = apply_window(&raw, WindowSpec { width: -10.0, center: 2.0 });
        assert!(out.iter().all(|&v| v == 0.0));
        let out = apply_window(&raw, WindowSpec { width: f64::NAN, center: 2.0 });
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn output_stays_in_range_and_keeps_shape() {
        let raw = Array2::from_shape_fn((17, 9), |(y, x)| (y as f32 - 8.0) * 311.0 + x as f32);
        let out = apply_window(&raw, WindowSpec::new(1234.5, -77.0).unwrap());
        assert_eq!(out.shape(), raw.shape());
        assert!(out.iter().all(|v| (0.0..=1.0).contains(v)));

        let raw = array![f32::NAN, f32::NEG_INFINITY, f32::INFINITY, 0.0];
        let out = apply_window(&raw, WindowSpec::new(100.0, 0.0).unwrap());
        assert_eq!(out, array![0.0_f32, 0.0, 1.0, 0.5]);
    }

    #[test]
    fn repeated_application_is_bit_identical() {
        let raw = Array3::from_shape_fn((4, 5, 6), |(z, y, x)| {
            ((z * 37 + y * 11 + x * 5) % 97) as f32 * 13.7 - 400.0
        });
        let window = WindowSpec::new(523.0, 61.0).unwrap();
        let first = apply_window(&raw, window);
        let second = apply_window(&raw, window);
        assert!(
            first
                .iter()
                .zip(second.iter())
                .all(|(a, b)| a.to_bits() == b.to_bits())
        );
    }

    #[test]
    fn unsigned_input_is_windowed_in_floating_point() {
        let raw = array![0_u16, 1000, 65535];
        let out = apply_window(&raw, WindowSpec::new(2000.0, 0.0).unwrap());
        assert_eq!(out, array![0.5_f32, 1.0, 1.0]);
    }

    #[test]
    fn rejects_non_positive_or_non_finite_windows() {
        assert_eq!(
            WindowSpec::new(0.0, 40.0),
            Err(InvalidWindowError::NonPositiveWidth(0.0))
        );
        assert!(WindowSpec::new(-1.0, 40.0).is_err());
        assert!(WindowSpec::new(f64::NAN, 40.0).is_err());
        assert!(WindowSpec::new(10.0, f64::INFINITY).is_err());
    }

    #[test]
    fn default_preset_spans_full_range() {
        let range = IntensityRange {
            min: -1000.0,
            max: 2000.0,
        };
        let window = WindowPreset::Default.resolve(range);
        assert_eq!(window.width, 3000.0);
        assert_eq!(window.center, 500.0);
        assert_eq!(window.low(), -1000.0);
        assert_eq!(window.high(), 2000.0);
    }

    #[test]
    fn negative_transform_inverts_after_windowing() {
        let raw = array![0.0_f32, 50.0, 100.0];
        let normalized = apply_window(&raw, WindowSpec::new(100.0, 50.0).unwrap());
        let inverted = apply_display_transform(normalized, DisplayTransform::Negative);
        assert_eq!(inverted, array![1.0_f32, 0.5, 0.0]);
    }

    #[test]
    fn range_ignores_nan_and_handles_empty() {
        let raw = array![3.0_f32, f32::NAN, -2.0];
        assert_eq!(
            IntensityRange::of(&raw),
            Some(IntensityRange { min: -2.0, max: 3.0 })
        );
        let empty = Array2::<f32>::zeros((0, 3));
        assert_eq!(IntensityRange::of(&empty), None);
    }

    #[test]
    fn custom_bounds_follow_span() {
        let (width, center) = IntensityRange {
            min: -1000.0,
            max: 2000.0,
        }
        .custom_bounds();
        assert_eq!(width, 1.0..=6000.0);
        assert_eq!(center, -4000.0..=5000.0);
    }
}
