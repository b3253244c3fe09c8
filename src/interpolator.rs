use std::cmp::Ordering;

use ndarray::{ArrayView2, ArrayView3};

pub(crate) struct Interpolator;

impl Interpolator {
    /// Output size of a `(rows, columns)` image whose pixels measure
    /// `(row_spacing, column_spacing)`, stretched so both become square.
    pub(crate) fn get_isotropic_dimensions(
        spacing: (f32, f32),
        dim: (usize, usize),
    ) -> (usize, usize) {
        let (row_spacing, column_spacing) = spacing;
        let min_spacing = row_spacing.min(column_spacing);
        if min_spacing.partial_cmp(&0.0) != Some(Ordering::Greater) {
            return dim;
        }
        let inv_min_spacing = 1.0 / min_spacing;

        let rows = (dim.0 as f32 * row_spacing * inv_min_spacing).round() as usize;
        let columns = (dim.1 as f32 * column_spacing * inv_min_spacing).round() as usize;

        (rows.max(1), columns.max(1))
    }

    /// Maps output pixel `i` of `output_len` onto the source axis of
    /// `source_len`, sampling pixel centers.
    #[inline]
    pub(crate) fn source_coordinate(i: usize, output_len: usize, source_len: usize) -> f32 {
        let norm = (i as f32 + 0.5) / output_len as f32;
        let src = norm * source_len as f32 - 0.5;
        src.max(0.0).min((source_len - 1) as f32)
    }

    #[inline]
    pub(crate) fn bilinear_interpolate(slice: &ArrayView2<f32>, y: f32, x: f32) -> f32 {
        let (height, width) = slice.dim();

        let y0 = y.floor() as usize;
        let x0 = x.floor() as usize;
        let y1 = (y0 + 1).min(height - 1);
        let x1 = (x0 + 1).min(width - 1);

        let dy = y - y0 as f32;
        let dx = x - x0 as f32;
        let one_minus_dx = 1.0 - dx;
        let one_minus_dy = 1.0 - dy;

        let v00 = slice[[y0, x0]];
        let v01 = slice[[y0, x1]];
        let v10 = slice[[y1, x0]];
        let v11 = slice[[y1, x1]];

        let v0 = v00.mul_add(one_minus_dx, v01 * dx);
        let v1 = v10.mul_add(one_minus_dx, v11 * dx);

        v0.mul_add(one_minus_dy, v1 * dy)
    }

    #[inline]
    pub(crate) fn trilinear_interpolate(volume: &ArrayView3<f32>, z: f32, y: f32, x: f32) -> f32 {
        let depth = volume.dim().0;

        let z0 = z.floor() as usize;
        let z1 = (z0 + 1).min(depth - 1);
        let dz = z - z0 as f32;

        let lower = volume.index_axis(ndarray::Axis(0), z0);
        let upper = volume.index_axis(ndarray::Axis(0), z1);

        let v0 = Self::bilinear_interpolate(&lower, y, x);
        let v1 = Self::bilinear_interpolate(&upper, y, x);

        v0.mul_add(1.0 - dz, v1 * dz)
    }
}
