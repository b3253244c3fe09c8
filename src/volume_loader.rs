use crate::volume::{Spacing, Volume};

use dicom::{
    core::{
        dictionary::{DataDictionary, DataDictionaryEntry},
        header::Header,
    },
    object::{DefaultDicomObject, OpenFileOptions, ReadError, open_file},
    pixeldata::{ConvertOptions, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::{StandardDataDictionary, tags};
use ndarray::{Array2, Array3, s};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use web_time::Instant;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("series has no files")]
    EmptySeries,

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: ReadError,
    },

    #[error("failed to decode pixel data of {}: {source}", path.display())]
    Pixels {
        path: PathBuf,
        #[source]
        source: dicom::pixeldata::Error,
    },

    #[error("{} has an empty image", path.display())]
    EmptyImage { path: PathBuf },

    #[error(
        "inconsistent image dimensions: {} is {found:?}, expected {expected:?}",
        path.display()
    )]
    InconsistentDimensions {
        path: PathBuf,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("slice {index} is outside a series of {len} files")]
    NoSuchSlice { index: usize, len: usize },
}

/// Raw output of a series decoder.
#[derive(Debug)]
pub struct DecodedSeries {
    pub data: Array3<f32>,
    pub spacing: Option<Spacing>,
}

/// Tag keyword and value pairs of one slice, in tag order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SliceMetadata {
    pub entries: Vec<(String, String)>,
}

impl SliceMetadata {
    pub fn get(&self, keyword: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key == keyword)
            .map(|(_, value)| value.as_str())
    }
}

/// Turns an ordered file list into a `(slice, row, column)` array.
pub trait SeriesDecoder {
    fn decode(&self, file_paths: &[PathBuf]) -> Result<DecodedSeries, DecodeError>;

    fn slice_metadata(
        &self,
        file_paths: &[PathBuf],
        index: usize,
    ) -> Result<SliceMetadata, DecodeError>;
}

/// Per-file geometry used to derive voxel spacing.
#[derive(Clone, Copy, Debug, Default)]
struct SliceGeometry {
    pixel_spacing: Option<(f32, f32)>,
    thickness: Option<f32>,
    position: Option<[f32; 3]>,
}

/// [`SeriesDecoder`] backed by dicom-rs. Files are decoded in parallel and
/// stacked in the order given; the modality LUT is applied so CT data comes
/// out in Hounsfield units.
#[derive(Clone, Copy, Debug, Default)]
pub struct DicomSeriesDecoder;

impl DicomSeriesDecoder {
    fn decode_file(path: &Path) -> Result<(Array2<f32>, SliceGeometry), DecodeError> {
        let dicom_object = open_file(path).map_err(|source| DecodeError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let image = Self::decode_image(path, &dicom_object)?;
        if image.is_empty() {
            return Err(DecodeError::EmptyImage {
                path: path.to_path_buf(),
            });
        }
        Ok((image, Self::get_geometry(&dicom_object)))
    }

    fn decode_image(
        path: &Path,
        dicom_object: &DefaultDicomObject,
    ) -> Result<Array2<f32>, DecodeError> {
        let pixel_error = |source| DecodeError::Pixels {
            path: path.to_path_buf(),
            source,
        };
        let pixel_data = dicom_object.decode_pixel_data().map_err(pixel_error)?;
        let options = ConvertOptions::new().with_voi_lut(VoiLutOption::Identity);
        let array = pixel_data
            .to_ndarray_with_options::<f32>(&options)
            .map_err(pixel_error)?;
        // Always the first frame and the first sample.
        Ok(array.slice_move(s![0, .., .., 0]))
    }

    fn get_geometry(dicom_object: &DefaultDicomObject) -> SliceGeometry {
        let pixel_spacing = dicom_object
            .element(tags::PIXEL_SPACING)
            .ok()
            .and_then(|element| element.to_multi_float32().ok())
            .and_then(|values| Some((*values.first()?, *values.get(1)?)));
        let thickness = dicom_object
            .element(tags::SLICE_THICKNESS)
            .ok()
            .and_then(|element| element.to_float32().ok());
        let position = dicom_object
            .element(tags::IMAGE_POSITION_PATIENT)
            .ok()
            .and_then(|element| element.to_multi_float32().ok())
            .and_then(|values| values.get(..3)?.try_into().ok());

        SliceGeometry {
            pixel_spacing,
            thickness,
            position,
        }
    }

    fn validate_dimensions(
        file_paths: &[PathBuf],
        images: &[Array2<f32>],
    ) -> Result<(), DecodeError> {
        let first_dim = images[0].dim();
        match images.iter().position(|img| img.dim() != first_dim) {
            Some(i) => Err(DecodeError::InconsistentDimensions {
                path: file_paths[i].clone(),
                expected: first_dim,
                found: images[i].dim(),
            }),
            None => Ok(()),
        }
    }

    fn build_volume_array(images: &[Array2<f32>]) -> Array3<f32> {
        let (height, width) = images[0].dim();
        let depth = images.len();
        let mut volume = Array3::<f32>::zeros((depth, height, width));

        for (i, image) in images.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(image);
        }

        volume
    }

    /// Slice distance comes from consecutive positions when present, then
    /// from Slice Thickness.
    fn get_spacing(geometry: &[SliceGeometry]) -> Option<Spacing> {
        let (row, column) = geometry.iter().find_map(|g| g.pixel_spacing)?;
        let from_positions = match geometry {
            [first, second, ..] => first.position.zip(second.position).map(|(a, b)| {
                let d: f32 = a.iter().zip(b).map(|(a, b)| (b - a) * (b - a)).sum();
                d.sqrt()
            }),
            _ => None,
        };
        let slice = from_positions
            .filter(|d| *d > 0.0)
            .or_else(|| geometry.iter().find_map(|g| g.thickness))
            .unwrap_or(1.0);

        Some(Spacing { slice, row, column })
    }
}

impl SeriesDecoder for DicomSeriesDecoder {
    fn decode(&self, file_paths: &[PathBuf]) -> Result<DecodedSeries, DecodeError> {
        if file_paths.is_empty() {
            return Err(DecodeError::EmptySeries);
        }

        let decoded: Vec<_> = file_paths
            .par_iter()
            .map(|path| Self::decode_file(path))
            .collect::<Result<_, _>>()?;
        let (images, geometry): (Vec<_>, Vec<_>) = decoded.into_iter().unzip();

        Self::validate_dimensions(file_paths, &images)?;

        Ok(DecodedSeries {
            data: Self::build_volume_array(&images),
            spacing: Self::get_spacing(&geometry),
        })
    }

    fn slice_metadata(
        &self,
        file_paths: &[PathBuf],
        index: usize,
    ) -> Result<SliceMetadata, DecodeError> {
        let path = file_paths.get(index).ok_or(DecodeError::NoSuchSlice {
            index,
            len: file_paths.len(),
        })?;
        let dicom_object = OpenFileOptions::new()
            .read_until(tags::PIXEL_DATA)
            .open_file(path)
            .map_err(|source| DecodeError::Read {
                path: path.clone(),
                source,
            })?;

        let entries = dicom_object
            .iter()
            .filter_map(|element| {
                let tag = element.tag();
                let value = element.to_str().ok()?;
                let keyword = StandardDataDictionary
                    .by_tag(tag)
                    .map(|entry| entry.alias().to_string())
                    .unwrap_or_else(|| format!("{tag}"));
                Some((keyword, value.trim_end_matches('\0').trim().to_string()))
            })
            .collect();

        Ok(SliceMetadata { entries })
    }
}

pub struct VolumeLoader<D = DicomSeriesDecoder> {
    decoder: D,
}

impl Default for VolumeLoader<DicomSeriesDecoder> {
    fn default() -> Self {
        Self::new(DicomSeriesDecoder)
    }
}

impl<D: SeriesDecoder> VolumeLoader<D> {
    pub fn new(decoder: D) -> Self {
        Self { decoder }
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    /// Load a volume from an ordered file list. The list order becomes the
    /// volume's first axis.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the decoder cannot build a consistent volume.
    pub fn load_volume(&self, file_paths: &[PathBuf]) -> Result<Volume, DecodeError> {
        let started = Instant::now();
        let DecodedSeries { data, spacing } = self.decoder.decode(file_paths)?;
        if data.is_empty() {
            return Err(DecodeError::EmptySeries);
        }
        debug!("decoded spacing {spacing:?}");
        info!(
            "loaded volume {:?} from {} files in {:?}",
            data.dim(),
            file_paths.len(),
            started.elapsed()
        );
        Ok(Volume::new(data, spacing))
    }

    pub fn slice_metadata(
        &self,
        file_paths: &[PathBuf],
        index: usize,
    ) -> Result<SliceMetadata, DecodeError> {
        self.decoder.slice_metadata(file_paths, index)
    }
}
