use std::{
    fs,
    io::{self, Write},
    path::Path,
};

use ndarray::{Array3, Zip, s};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use web_time::Instant;

use crate::{interpolator::Interpolator, volume::Volume, window::IntensityRange};

/// Fewest voxels a preview may keep along any axis.
pub const MIN_PREVIEW_EXTENT: usize = 2;

#[derive(Debug, Error)]
pub enum DownsampleError {
    #[error("decimation factor must be at least 1")]
    ZeroFactor,

    #[error(
        "reducing {source_shape:?} to {shape:?} leaves fewer than {} voxels on an axis",
        MIN_PREVIEW_EXTENT
    )]
    TooCoarse {
        source_shape: (usize, usize, usize),
        shape: (usize, usize, usize),
    },

    #[error("failed to write preview: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode preview descriptor: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "strategy")]
pub enum DownsampleStrategy {
    /// Every `factor`-th voxel along each axis.
    Decimate { factor: usize },
    /// Trilinear resampling to an explicit shape.
    Resize { shape: (usize, usize, usize) },
}

impl Default for DownsampleStrategy {
    fn default() -> Self {
        DownsampleStrategy::Decimate { factor: 4 }
    }
}

/// Display parameters passed through untouched to the volumetric renderer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewParams {
    pub opacity: f32,
    pub surface_count: u32,
    pub colorscale: String,
}

impl Default for PreviewParams {
    fn default() -> Self {
        Self {
            opacity: 0.05,
            surface_count: 20,
            colorscale: "Gray".to_string(),
        }
    }
}

/// A reduced copy of a volume together with how it was produced.
#[derive(Debug)]
pub struct PreviewVolume {
    pub data: Array3<f32>,
    pub source_shape: (usize, usize, usize),
    pub strategy: DownsampleStrategy,
    pub params: PreviewParams,
}

#[derive(Serialize)]
struct PreviewDescriptor<'a> {
    shape: (usize, usize, usize),
    source_shape: (usize, usize, usize),
    strategy: DownsampleStrategy,
    value_range: Option<IntensityRange>,
    params: &'a PreviewParams,
    data_file: &'a str,
    dtype: &'a str,
}

impl PreviewVolume {
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Writes `preview.json` and `preview.f32` (little-endian, C order)
    /// into `directory`.
    pub fn write_to(&self, directory: impl AsRef<Path>) -> Result<(), DownsampleError> {
        let directory = directory.as_ref();
        fs::create_dir_all(directory)?;

        let descriptor = PreviewDescriptor {
            shape: self.dim(),
            source_shape: self.source_shape,
            strategy: self.strategy,
            value_range: IntensityRange::of(&self.data),
            params: &self.params,
            data_file: "preview.f32",
            dtype: "<f4",
        };
        fs::write(
            directory.join("preview.json"),
            serde_json::to_vec_pretty(&descriptor)?,
        )?;

        let mut file = io::BufWriter::new(fs::File::create(directory.join("preview.f32"))?);
        match self.data.as_slice() {
            Some(values) if cfg!(target_endian = "little") => {
                file.write_all(bytemuck::cast_slice(values))?;
            }
            _ => {
                for value in self.data.iter() {
                    file.write_all(&value.to_le_bytes())?;
                }
            }
        }
        file.flush()?;
        Ok(())
    }
}

pub struct VolumePreviewDownsampler;

impl VolumePreviewDownsampler {
    /// Output shape of `strategy` applied to `source_shape`.
    pub fn target_shape(
        source_shape: (usize, usize, usize),
        strategy: DownsampleStrategy,
    ) -> Result<(usize, usize, usize), DownsampleError> {
        let shape = match strategy {
            DownsampleStrategy::Decimate { factor: 0 } => return Err(DownsampleError::ZeroFactor),
            DownsampleStrategy::Decimate { factor } => {
                let (d, h, w) = source_shape;
                (d.div_ceil(factor), h.div_ceil(factor), w.div_ceil(factor))
            }
            DownsampleStrategy::Resize { shape } => shape,
        };

        let (d, h, w) = shape;
        if d.min(h).min(w) < MIN_PREVIEW_EXTENT {
            return Err(DownsampleError::TooCoarse {
                source_shape,
                shape,
            });
        }
        Ok(shape)
    }

    /// Produces a smaller array for the 3-D preview. The source volume is
    /// left untouched.
    ///
    /// # Errors
    ///
    /// [`DownsampleError::ZeroFactor`] for a zero decimation factor and
    /// [`DownsampleError::TooCoarse`] when an axis would keep fewer than
    /// [`MIN_PREVIEW_EXTENT`] voxels.
    pub fn downsample(
        volume: &Volume,
        strategy: DownsampleStrategy,
        params: PreviewParams,
    ) -> Result<PreviewVolume, DownsampleError> {
        let started = Instant::now();
        let source_shape = volume.dim();
        let shape = Self::target_shape(source_shape, strategy)?;

        let data = match strategy {
            DownsampleStrategy::Decimate { factor } => {
                let step = factor as isize;
                volume
                    .data()
                    .slice(s![..;step, ..;step, ..;step])
                    .to_owned()
            }
            DownsampleStrategy::Resize { shape } => Self::resize(volume.data(), shape),
        };
        debug_assert_eq!(data.dim(), shape);

        info!(
            "downsampled {source_shape:?} to {:?} in {:?}",
            data.dim(),
            started.elapsed()
        );
        Ok(PreviewVolume {
            data,
            source_shape,
            strategy,
            params,
        })
    }

    fn resize(source: &Array3<f32>, shape: (usize, usize, usize)) -> Array3<f32> {
        let (depth, height, width) = source.dim();
        let view = source.view();
        let mut output = Array3::<f32>::zeros(shape);

        Zip::indexed(&mut output).par_for_each(|(z, y, x), value| {
            let src_z = Interpolator::source_coordinate(z, shape.0, depth);
            let src_y = Interpolator::source_coordinate(y, shape.1, height);
            let src_x = Interpolator::source_coordinate(x, shape.2, width);
            *value = Interpolator::trilinear_interpolate(&view, src_z, src_y, src_x);
        });

        output
    }
}
