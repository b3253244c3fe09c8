//! # DICOM series viewer library
//!
//! This crate finds DICOM series inside an uploaded tree of files, loads one
//! of them as a volume and turns slices of it into display-ready grayscale
//! arrays.
//!
//! The pipeline builds on the dicom-rs ecosystem:
//!  - [`SeriesLocator`] walks a directory tree and lists every series per
//!    directory (by Series Instance UID), with its files in slice order.
//!  - [`VolumeLoader`] decodes an ordered file list into a `(slice, row,
//!    column)` [`Volume`] of raw intensities (Hounsfield units for CT).
//!  - [`apply_window`] maps raw intensities through a width/center window
//!    into `[0, 1]`.
//!  - [`ViewComposer`] windows axial, coronal and sagittal slices and tiles
//!    them into one image.
//!  - [`VolumePreviewDownsampler`] reduces a volume for interactive 3-D
//!    rendering.
//!
//! [`ViewerSession`] ties these together and keeps the state of one user
//! session. Decoding, windowing and resampling run in parallel with rayon
//! where the environment supports it; every call is still blocking.
//!
//! # Examples
//!
//! ## Windowing the center slice of the first series in a directory
//!
//! ```no_run
//! # use dicom_series_viewer::{
//! #     Orientation, SeriesLocator, SliceRequest, ViewComposer, VolumeLoader, WindowPreset,
//! # };
//! let series = SeriesLocator::default().locate_series("dicom");
//! let first = series.first().expect("should have found a series");
//! let volume = VolumeLoader::default()
//!     .load_volume(&first.file_paths)
//!     .expect("should have loaded the series");
//!
//! let window = WindowPreset::CtAbdomen.resolve(volume.intensity_range());
//! let request = SliceRequest::new(
//!     Orientation::Sagittal,
//!     volume.center_index(Orientation::Sagittal),
//!     window,
//! );
//! let slice = ViewComposer::default()
//!     .render_slice(&volume, &request)
//!     .expect("should have returned the center slice");
//! slice
//!     .to_gray_image(Default::default())
//!     .save("result.png")
//!     .expect("should have written the image");
//! ```

pub mod archive;
pub mod config;
pub mod downsampler;
pub mod enums;
mod interpolator;
pub mod series_locator;
pub mod session;
pub mod view;
pub mod volume;
pub mod volume_loader;
pub mod window;

pub use archive::{ArchiveError, ExtractedArchive, InputSource, extract_archive, open_input};
pub use config::{ConfigError, ViewerConfig};
pub use downsampler::{
    DownsampleError, DownsampleStrategy, PreviewParams, PreviewVolume, VolumePreviewDownsampler,
};
pub use enums::{AutoWindow, DisplayTransform, Interpolation, Orientation, SortBy, ViewLayout};
pub use series_locator::{
    DicomSeriesDescriptor, DicomSeriesSource, DirectoryOutcome, DirectoryScan, ScanError,
    ScanReport, SeriesLocator, SeriesSource,
};
pub use session::{SessionState, ViewerError, ViewerSession};
pub use view::{DisplaySlice, SliceRequest, ViewComposer};
pub use volume::{SliceError, Spacing, Volume};
pub use volume_loader::{
    DecodeError, DecodedSeries, DicomSeriesDecoder, SeriesDecoder, SliceMetadata, VolumeLoader,
};
pub use window::{
    IntensityRange, InvalidWindowError, WindowPreset, WindowSpec, apply_display_transform,
    apply_window,
};
