use std::{
    io::{Read, Seek},
    path::{Path, PathBuf},
};

use image::GrayImage;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    archive::{ArchiveError, InputSource, extract_archive, open_input},
    config::ViewerConfig,
    downsampler::{DownsampleError, DownsampleStrategy, PreviewVolume, VolumePreviewDownsampler},
    enums::{AutoWindow, DisplayTransform, Orientation, ViewLayout},
    series_locator::{
        DicomSeriesDescriptor, DicomSeriesSource, ScanReport, SeriesLocator, SeriesSource,
    },
    view::{DisplaySlice, SliceRequest, ViewComposer},
    volume::{SliceError, Volume},
    volume_loader::{DecodeError, DicomSeriesDecoder, SeriesDecoder, SliceMetadata, VolumeLoader},
    window::{IntensityRange, InvalidWindowError, WindowPreset, WindowSpec},
};

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("no DICOM series found under {}", .0.display())]
    NoSeriesFound(PathBuf),

    #[error("series {index} does not exist ({count} listed)")]
    NoSuchSeries { index: usize, count: usize },

    #[error("no volume is loaded")]
    NoVolume,

    #[error("no input has been opened")]
    NoInput,

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    InvalidWindow(#[from] InvalidWindowError),

    #[error(transparent)]
    Slice(#[from] SliceError),

    #[error(transparent)]
    Downsample(#[from] DownsampleError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    NoVolumeLoaded,
    SeriesListed,
    SeriesSelected,
    VolumeLoaded,
}

/// Everything one viewer session holds: the current input, its series, the
/// loaded volume and the display settings. Display arrays are always derived
/// from this state and never stored in it.
///
/// Operations that fail leave the previous state in place.
pub struct ViewerSession<S = DicomSeriesSource, D = DicomSeriesDecoder> {
    locator: SeriesLocator<S>,
    loader: VolumeLoader<D>,
    config: ViewerConfig,
    state: SessionState,
    input: Option<InputSource>,
    scan: Option<ScanReport>,
    selected: Option<usize>,
    volume: Option<Volume>,
    preset: WindowPreset,
    transform: DisplayTransform,
}

impl ViewerSession {
    pub fn new(config: ViewerConfig) -> Self {
        let source = DicomSeriesSource::new(config.sort_by);
        Self::with_collaborators(source, DicomSeriesDecoder, config)
    }
}

impl<S: SeriesSource, D: SeriesDecoder> ViewerSession<S, D> {
    pub fn with_collaborators(source: S, decoder: D, config: ViewerConfig) -> Self {
        Self {
            locator: SeriesLocator::new(source),
            loader: VolumeLoader::new(decoder),
            config,
            state: SessionState::NoVolumeLoaded,
            input: None,
            scan: None,
            selected: None,
            volume: None,
            preset: WindowPreset::Default,
            transform: DisplayTransform::Identity,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn series(&self) -> &[DicomSeriesDescriptor] {
        self.scan
            .as_ref()
            .map(|scan| scan.series.as_slice())
            .unwrap_or(&[])
    }

    pub fn last_scan(&self) -> Option<&ScanReport> {
        self.scan.as_ref()
    }

    pub fn selected(&self) -> Option<&DicomSeriesDescriptor> {
        self.selected.and_then(|index| self.series().get(index))
    }

    pub fn volume(&self) -> Option<&Volume> {
        self.volume.as_ref()
    }

    pub fn preset(&self) -> WindowPreset {
        self.preset
    }

    /// Opens a directory or `.zip` file and lists its series.
    pub fn open_path(&mut self, path: impl AsRef<Path>) -> Result<&ScanReport, ViewerError> {
        let input = open_input(path)?;
        self.open(input)
    }

    /// Extracts an uploaded archive and lists its series.
    pub fn open_archive<R: Read + Seek>(&mut self, reader: R) -> Result<&ScanReport, ViewerError> {
        let archive = extract_archive(reader)?;
        self.open(InputSource::Archive(archive))
    }

    /// Scans `input`. When series are found they replace the current list
    /// and any loaded volume; when none are found nothing changes.
    pub fn open(&mut self, input: InputSource) -> Result<&ScanReport, ViewerError> {
        let report = self.locator.scan(input.root());
        if report.series.is_empty() {
            warn!("no series under {}; keeping previous state", input.root().display());
            return Err(ViewerError::NoSeriesFound(input.root().to_path_buf()));
        }

        self.input = Some(input);
        self.selected = None;
        self.volume = None;
        self.state = SessionState::SeriesListed;
        Ok(self.scan.insert(report))
    }

    /// Scans the current input again.
    pub fn rescan(&mut self) -> Result<&ScanReport, ViewerError> {
        let Some(root) = self.input.as_ref().map(|input| input.root().to_path_buf()) else {
            return Err(ViewerError::NoInput);
        };
        let report = self.locator.scan(&root);
        if report.series.is_empty() {
            warn!("re-scan of {} found nothing; keeping previous state", root.display());
            return Err(ViewerError::NoSeriesFound(root));
        }

        self.selected = None;
        self.volume = None;
        self.state = SessionState::SeriesListed;
        Ok(self.scan.insert(report))
    }

    /// Loads the series at `index` of [`ViewerSession::series`]. On failure
    /// the previously loaded volume stays current.
    pub fn select_series(&mut self, index: usize) -> Result<&Volume, ViewerError> {
        let count = self.series().len();
        let descriptor = self
            .series()
            .get(index)
            .cloned()
            .ok_or(ViewerError::NoSuchSeries { index, count })?;

        let previous = self.state;
        self.state = SessionState::SeriesSelected;
        match self.loader.load_volume(&descriptor.file_paths) {
            Ok(volume) => {
                info!("selected series {}", descriptor.series_id);
                self.selected = Some(index);
                self.state = SessionState::VolumeLoaded;
                Ok(self.volume.insert(volume))
            }
            Err(err) => {
                warn!("series {} could not be loaded: {err}", descriptor.series_id);
                self.state = previous;
                Err(err.into())
            }
        }
    }

    pub fn apply_preset(&mut self, preset: WindowPreset) -> Result<(), ViewerError> {
        if let WindowPreset::Custom(window) = preset {
            window.validate()?;
        }
        self.preset = preset;
        Ok(())
    }

    pub fn set_window(&mut self, width: f64, center: f64) -> Result<(), ViewerError> {
        let window = WindowSpec::new(width, center)?;
        self.preset = WindowPreset::Custom(window);
        Ok(())
    }

    pub fn set_transform(&mut self, transform: DisplayTransform) {
        self.transform = transform;
    }

    fn loaded(&self) -> Result<&Volume, ViewerError> {
        self.volume.as_ref().ok_or(ViewerError::NoVolume)
    }

    /// The current window resolved against the full volume.
    pub fn window(&self) -> Result<WindowSpec, ViewerError> {
        Ok(self.preset.resolve(self.loaded()?.intensity_range()))
    }

    fn window_for(
        &self,
        volume: &Volume,
        orientation: Orientation,
        index: isize,
    ) -> Result<WindowSpec, ViewerError> {
        let range = match (self.preset, self.config.auto_window) {
            (WindowPreset::Default, AutoWindow::PerSlice) => {
                let slice = volume.get_slice_from_axis(index, orientation)?;
                IntensityRange::of(&slice).unwrap_or(volume.intensity_range())
            }
            _ => volume.intensity_range(),
        };
        Ok(self.preset.resolve(range))
    }

    /// Windowed slices for each `(orientation, index)` pair, in order.
    pub fn render_views(
        &self,
        views: &[(Orientation, isize)],
    ) -> Result<Vec<DisplaySlice>, ViewerError> {
        let volume = self.loaded()?;
        let requests = views
            .iter()
            .map(|&(orientation, index)| {
                Ok(SliceRequest::new(
                    orientation,
                    index,
                    self.window_for(volume, orientation, index)?,
                ))
            })
            .collect::<Result<Vec<_>, ViewerError>>()?;

        Ok(ViewComposer::new(self.transform).render(volume, &requests)?)
    }

    /// Views shown by `layout` when the user is looking at `orientation`
    /// at `index`. The other planes go through the volume center.
    pub fn layout_views(
        &self,
        layout: ViewLayout,
        orientation: Orientation,
        index: isize,
    ) -> Result<Vec<(Orientation, isize)>, ViewerError> {
        let volume = self.loaded()?;
        Ok(match layout {
            ViewLayout::Single => vec![(orientation, index)],
            ViewLayout::Row | ViewLayout::Grid => Orientation::ALL
                .iter()
                .map(|&o| {
                    if o == orientation {
                        (o, index)
                    } else {
                        (o, volume.center_index(o))
                    }
                })
                .collect(),
        })
    }

    /// Renders `layout` into one grayscale image.
    pub fn render_layout(
        &self,
        layout: ViewLayout,
        orientation: Orientation,
        index: isize,
    ) -> Result<GrayImage, ViewerError> {
        let views = self.layout_views(layout, orientation, index)?;
        let tiles: Vec<_> = self
            .render_views(&views)?
            .iter()
            .map(|slice| slice.to_gray_image(self.config.interpolation))
            .collect();
        Ok(ViewComposer::compose(layout, &tiles))
    }

    /// Reduced volume for the 3-D preview. Uses the configured strategy
    /// unless one is given. A failure only affects the preview.
    pub fn render_preview(
        &self,
        strategy: Option<DownsampleStrategy>,
    ) -> Result<PreviewVolume, ViewerError> {
        let volume = self.loaded()?;
        let strategy = strategy.unwrap_or(self.config.preview);
        VolumePreviewDownsampler::downsample(volume, strategy, self.config.preview_params.clone())
            .map_err(|err| {
                warn!("3-D preview disabled: {err}");
                err.into()
            })
    }

    pub fn slice_metadata(&self, index: usize) -> Result<SliceMetadata, ViewerError> {
        let descriptor = self.selected().ok_or(ViewerError::NoVolume)?;
        Ok(self.loader.slice_metadata(&descriptor.file_paths, index)?)
    }
}
