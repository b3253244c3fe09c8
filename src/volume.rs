use std::sync::OnceLock;

use ndarray::{Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::enums::Orientation;
use crate::window::IntensityRange;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SliceError {
    #[error("{orientation:?} index {index} is outside 0..{len}")]
    OutOfBounds {
        orientation: Orientation,
        index: isize,
        len: usize,
    },
}

/// Physical voxel size in millimetres.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Spacing {
    /// Distance between slices (axis 0).
    pub slice: f32,
    /// Distance between rows (axis 1).
    pub row: f32,
    /// Distance between columns (axis 2).
    pub column: f32,
}

impl Spacing {
    /// `(image row spacing, image column spacing)` of a slice in `orientation`.
    pub fn in_plane(&self, orientation: Orientation) -> (f32, f32) {
        match orientation {
            Orientation::Axial => (self.row, self.column),
            Orientation::Coronal => (self.slice, self.column),
            Orientation::Sagittal => (self.slice, self.row),
        }
    }
}

/// A decoded series: raw intensities laid out as `(slice, row, column)`.
///
/// The volume is never mutated after construction. Every display transform
/// produces a new array.
#[derive(Debug)]
pub struct Volume {
    data: Array3<f32>,
    spacing: Option<Spacing>,
    range: OnceLock<IntensityRange>,
}

impl Volume {
    pub fn new(data: Array3<f32>, spacing: Option<Spacing>) -> Self {
        Self {
            data,
            spacing,
            range: OnceLock::new(),
        }
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn spacing(&self) -> Option<Spacing> {
        self.spacing
    }

    /// Number of slices available in `orientation`.
    pub fn len_along(&self, orientation: Orientation) -> usize {
        self.data.len_of(Axis(orientation.axis()))
    }

    /// Full-volume intensity range, computed once and cached.
    pub fn intensity_range(&self) -> IntensityRange {
        *self.range.get_or_init(|| {
            IntensityRange::of(&self.data).unwrap_or(IntensityRange { min: 0.0, max: 0.0 })
        })
    }

    pub fn is_valid_index(&self, index: isize, orientation: Orientation) -> bool {
        usize::try_from(index).is_ok_and(|index| index < self.len_along(orientation))
    }

    /// Fixes `orientation`'s axis at `index`, returning the remaining two axes
    /// in their volume order.
    pub fn get_slice_from_axis(
        &self,
        index: isize,
        orientation: Orientation,
    ) -> Result<ArrayView2<'_, f32>, SliceError> {
        if !self.is_valid_index(index, orientation) {
            return Err(SliceError::OutOfBounds {
                orientation,
                index,
                len: self.len_along(orientation),
            });
        }
        Ok(self
            .data
            .index_axis(Axis(orientation.axis()), index as usize))
    }

    /// Index of the middle slice in `orientation`.
    pub fn center_index(&self, orientation: Orientation) -> isize {
        (self.len_along(orientation).saturating_sub(1) / 2) as isize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(shape: (usize, usize, usize)) -> Volume {
        let data = Array3::from_shape_fn(shape, |(z, y, x)| (z * 10_000 + y * 100 + x) as f32);
        Volume::new(data, None)
    }

    #[test]
    fn slice_bounds_follow_shape() {
        let volume = ramp((10, 20, 30));
        assert!(volume.get_slice_from_axis(0, Orientation::Axial).is_ok());
        assert!(volume.get_slice_from_axis(9, Orientation::Axial).is_ok());
        assert_eq!(
            volume.get_slice_from_axis(10, Orientation::Axial),
            Err(SliceError::OutOfBounds {
                orientation: Orientation::Axial,
                index: 10,
                len: 10
            })
        );
        assert!(volume.get_slice_from_axis(-1, Orientation::Axial).is_err());
        assert!(volume.get_slice_from_axis(19, Orientation::Coronal).is_ok());
        assert!(volume.get_slice_from_axis(29, Orientation::Sagittal).is_ok());
        assert!(volume.get_slice_from_axis(30, Orientation::Sagittal).is_err());
    }

    #[test]
    fn slices_keep_remaining_axes() {
        let volume = ramp((10, 20, 30));
        let axial = volume.get_slice_from_axis(3, Orientation::Axial).unwrap();
        let coronal = volume.get_slice_from_axis(4, Orientation::Coronal).unwrap();
        let sagittal = volume.get_slice_from_axis(5, Orientation::Sagittal).unwrap();

        assert_eq!(axial.dim(), (20, 30));
        assert_eq!(coronal.dim(), (10, 30));
        assert_eq!(sagittal.dim(), (10, 20));

        assert_eq!(axial[[2, 1]], 30_201.0);
        assert_eq!(coronal[[2, 1]], 20_401.0);
        assert_eq!(sagittal[[2, 1]], 20_105.0);
    }

    #[test]
    fn intensity_range_is_cached() {
        let mut data = Array3::<f32>::zeros((2, 2, 2));
        data[[0, 0, 0]] = -1000.0;
        data[[1, 1, 1]] = 2000.0;
        let volume = Volume::new(data, None);

        let first = volume.intensity_range();
        assert_eq!(first, IntensityRange { min: -1000.0, max: 2000.0 });
        assert_eq!(volume.intensity_range(), first);
        assert!(volume.range.get().is_some());
    }

    #[test]
    fn in_plane_spacing_per_orientation() {
        let spacing = Spacing {
            slice: 3.0,
            row: 0.7,
            column: 0.8,
        };
        assert_eq!(spacing.in_plane(Orientation::Axial), (0.7, 0.8));
        assert_eq!(spacing.in_plane(Orientation::Coronal), (3.0, 0.8));
        assert_eq!(spacing.in_plane(Orientation::Sagittal), (3.0, 0.7));
    }
}
