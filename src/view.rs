use image::{GrayImage, ImageBuffer, Luma, imageops};
use ndarray::{Array2, ArrayView2, s};
use rayon::prelude::*;

use crate::{
    enums::{DisplayTransform, Interpolation, Orientation, ViewLayout},
    interpolator::Interpolator,
    volume::{SliceError, Volume},
    window::{WindowSpec, apply_display_transform, apply_window},
};

/// Gray level used for cells that have no slice, such as the 3-D preview
/// cell of [`ViewLayout::Grid`].
const PLACEHOLDER_LEVEL: u8 = 48;

/// One requested view: a plane, a position along it and the window to apply.
///
/// `index` is signed because it usually comes straight from a UI control;
/// negative values are rejected like any other out-of-range index.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SliceRequest {
    pub orientation: Orientation,
    pub index: isize,
    pub window: WindowSpec,
}

impl SliceRequest {
    pub fn new(orientation: Orientation, index: isize, window: WindowSpec) -> Self {
        Self {
            orientation,
            index,
            window,
        }
    }

    /// The three orthogonal planes through the center of `volume`.
    pub fn orthogonal(volume: &Volume, window: WindowSpec) -> [SliceRequest; 3] {
        Orientation::ALL.map(|orientation| {
            Self::new(orientation, volume.center_index(orientation), window)
        })
    }
}

/// A windowed slice ready for grayscale rendering, values in `[0, 1]`.
#[derive(Clone, Debug, PartialEq)]
pub struct DisplaySlice {
    pub orientation: Orientation,
    pub index: usize,
    pub pixels: Array2<f32>,
    /// `(row, column)` pixel size in millimetres, when known.
    pub pixel_spacing: Option<(f32, f32)>,
}

impl DisplaySlice {
    #[inline]
    fn to_u8(value: f32) -> u8 {
        (value * 255.0).round().clamp(0.0, 255.0) as u8
    }

    /// Renders with the origin in the lower-left corner: row 0 of
    /// [`DisplaySlice::pixels`] becomes the bottom row of the image.
    pub fn to_gray_image(&self, interpolation: Interpolation) -> GrayImage {
        let flipped = self.pixels.slice(s![..;-1, ..]);

        match (interpolation, self.pixel_spacing) {
            (Interpolation::Bilinear, Some(spacing))
                if !matches!(self.orientation, Orientation::Axial) =>
            {
                let (height, width) =
                    Interpolator::get_isotropic_dimensions(spacing, flipped.dim());
                Self::interpolate_slice(&flipped, width, height)
            }
            _ => Self::slice_to_image(&flipped),
        }
    }

    fn slice_to_image(slice: &ArrayView2<'_, f32>) -> GrayImage {
        let (height, width) = slice.dim();
        let mut image = GrayImage::new(width as u32, height as u32);
        for ((y, x), &v) in slice.indexed_iter() {
            image.put_pixel(x as u32, y as u32, Luma([Self::to_u8(v)]));
        }
        image
    }

    fn interpolate_slice(slice: &ArrayView2<'_, f32>, width: usize, height: usize) -> GrayImage {
        let (slice_height, slice_width) = slice.dim();

        let pixel_data: Vec<u8> = (0..height)
            .into_par_iter()
            .flat_map_iter(|y| {
                let src_y = Interpolator::source_coordinate(y, height, slice_height);
                (0..width).map(move |x| {
                    let src_x = Interpolator::source_coordinate(x, width, slice_width);
                    Self::to_u8(Interpolator::bilinear_interpolate(slice, src_y, src_x))
                })
            })
            .collect();

        ImageBuffer::from_raw(width as u32, height as u32, pixel_data)
            .unwrap_or_else(|| GrayImage::new(width as u32, height as u32))
    }
}

/// Turns slice requests into display slices. Each request is computed on
/// its own; nothing is shared between views.
#[derive(Clone, Copy, Debug, Default)]
pub struct ViewComposer {
    pub transform: DisplayTransform,
}

impl ViewComposer {
    pub fn new(transform: DisplayTransform) -> Self {
        Self { transform }
    }

    /// # Errors
    ///
    /// Returns [`SliceError::OutOfBounds`] if the index is not a valid
    /// position along the requested axis.
    pub fn render_slice(
        &self,
        volume: &Volume,
        request: &SliceRequest,
    ) -> Result<DisplaySlice, SliceError> {
        let slice = volume.get_slice_from_axis(request.index, request.orientation)?;
        let pixels = apply_display_transform(apply_window(&slice, request.window), self.transform);

        Ok(DisplaySlice {
            orientation: request.orientation,
            index: request.index as usize,
            pixels,
            pixel_spacing: volume
                .spacing()
                .map(|spacing| spacing.in_plane(request.orientation)),
        })
    }

    pub fn render(
        &self,
        volume: &Volume,
        requests: &[SliceRequest],
    ) -> Result<Vec<DisplaySlice>, SliceError> {
        requests
            .par_iter()
            .map(|request| self.render_slice(volume, request))
            .collect()
    }

    /// Tiles rendered views into one image following `layout`. Each tile is
    /// centered in a cell sized to the largest tile; cells without a tile are
    /// filled with a placeholder gray.
    pub fn compose(layout: ViewLayout, tiles: &[GrayImage]) -> GrayImage {
        let (columns, rows) = layout.tiles();
        let cell_width = tiles.iter().map(|t| t.width()).max().unwrap_or(1).max(1);
        let cell_height = tiles.iter().map(|t| t.height()).max().unwrap_or(1).max(1);

        let mut canvas = GrayImage::new(columns * cell_width, rows * cell_height);
        for cell in 0..columns * rows {
            let x0 = (cell % columns) * cell_width;
            let y0 = (cell / columns) * cell_height;
            match tiles.get(cell as usize) {
                Some(tile) => {
                    let x = x0 + (cell_width - tile.width()) / 2;
                    let y = y0 + (cell_height - tile.height()) / 2;
                    imageops::replace(&mut canvas, tile, i64::from(x), i64::from(y));
                }
                None => {
                    for y in y0..y0 + cell_height {
                        for x in x0..x0 + cell_width {
                            canvas.put_pixel(x, y, Luma([PLACEHOLDER_LEVEL]));
                        }
                    }
                }
            }
        }
        canvas
    }
}
