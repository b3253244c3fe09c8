use std::{
    cell::RefCell,
    cmp::Ordering,
    fmt, fs, io,
    path::{Path, PathBuf},
};

use dicom::object::{DefaultDicomObject, OpenFileOptions};
use dicom_dictionary_std::tags;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;
use web_time::Instant;

use crate::enums::SortBy;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to read directory {}: {source}", directory.display())]
    Io {
        directory: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no DICOM data in {}", directory.display())]
    NoDicomData { directory: PathBuf },

    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Enumerates the series stored directly inside one directory.
pub trait SeriesSource {
    /// Distinct Series Instance UIDs in `directory`, in discovery order.
    fn series_ids(&self, directory: &Path) -> Result<Vec<String>, ScanError>;

    /// Files of `series_id` in `directory`, in slice order.
    fn series_file_names(
        &self,
        directory: &Path,
        series_id: &str,
    ) -> Result<Vec<PathBuf>, ScanError>;
}

/// One series found during a scan. Only valid while its directory exists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DicomSeriesDescriptor {
    pub series_id: String,
    pub source_directory: PathBuf,
    pub file_paths: Vec<PathBuf>,
}

impl DicomSeriesDescriptor {
    /// Human facing entry for a selection list, `position` counting from 0.
    pub fn label(&self, position: usize) -> String {
        let prefix: String = self.series_id.chars().take(10).collect();
        format!(
            "Series {}: {}... ({} files)",
            position + 1,
            prefix,
            self.file_paths.len()
        )
    }
}

#[derive(Debug)]
pub enum DirectoryOutcome {
    Series(usize),
    NoSeries,
    Skipped(ScanError),
}

#[derive(Debug)]
pub struct DirectoryScan {
    pub directory: PathBuf,
    pub outcome: DirectoryOutcome,
}

/// Everything a scan found, plus what happened in each visited directory.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub series: Vec<DicomSeriesDescriptor>,
    pub directories: Vec<DirectoryScan>,
}

impl ScanReport {
    pub fn skipped(&self) -> impl Iterator<Item = (&Path, &ScanError)> {
        self.directories.iter().filter_map(|scan| match &scan.outcome {
            DirectoryOutcome::Skipped(err) => Some((scan.directory.as_path(), err)),
            _ => None,
        })
    }
}

impl fmt::Display for ScanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} series in {} directories ({} skipped)",
            self.series.len(),
            self.directories.len(),
            self.skipped().count()
        )
    }
}

pub struct SeriesLocator<S = DicomSeriesSource> {
    source: S,
}

impl Default for SeriesLocator<DicomSeriesSource> {
    fn default() -> Self {
        Self::new(DicomSeriesSource::default())
    }
}

impl<S: SeriesSource> SeriesLocator<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Descriptors for every series under `root`. Empty if none were found.
    pub fn locate_series(&self, root: impl AsRef<Path>) -> Vec<DicomSeriesDescriptor> {
        self.scan(root).series
    }

    /// Visits `root` and all of its subdirectories. Series are scoped to the
    /// directory holding their files; a directory that fails enumeration is
    /// recorded as skipped and the walk carries on.
    pub fn scan(&self, root: impl AsRef<Path>) -> ScanReport {
        let root = root.as_ref();
        let started = Instant::now();
        let mut report = ScanReport::default();

        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let directory = err.path().unwrap_or(root).to_path_buf();
                    debug!("skipping {}: {err}", directory.display());
                    report.directories.push(DirectoryScan {
                        directory,
                        outcome: DirectoryOutcome::Skipped(err.into()),
                    });
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }

            let directory = entry.into_path();
            let outcome = match self.scan_directory(&directory) {
                Ok(found) if found.is_empty() => DirectoryOutcome::NoSeries,
                Ok(found) => {
                    let count = found.len();
                    report.series.extend(found);
                    DirectoryOutcome::Series(count)
                }
                Err(err) => {
                    debug!("skipping {}: {err}", directory.display());
                    DirectoryOutcome::Skipped(err)
                }
            };
            report.directories.push(DirectoryScan { directory, outcome });
        }

        info!(
            "scanned {} in {:?}: {report}",
            root.display(),
            started.elapsed()
        );
        report
    }

    fn scan_directory(&self, directory: &Path) -> Result<Vec<DicomSeriesDescriptor>, ScanError> {
        let mut found = Vec::new();
        for series_id in self.source.series_ids(directory)? {
            let file_paths = self.source.series_file_names(directory, &series_id)?;
            if file_paths.is_empty() {
                continue;
            }
            found.push(DicomSeriesDescriptor {
                series_id,
                source_directory: directory.to_path_buf(),
                file_paths,
            });
        }
        Ok(found)
    }
}

#[derive(Clone, Debug)]
struct HeaderRecord {
    path: PathBuf,
    series_uid: String,
    position: Option<[f64; 3]>,
    orientation: Option<[f64; 6]>,
    instance_number: Option<i32>,
}

/// [`SeriesSource`] backed by dicom-rs header parsing.
///
/// [`SeriesSource::series_ids`] always reads the directory's headers; they are
/// kept so that the per-series lookups following it do not re-read the files.
#[derive(Debug, Default)]
pub struct DicomSeriesSource {
    sort_by: SortBy,
    last_directory: RefCell<Option<(PathBuf, Vec<HeaderRecord>)>>,
}

impl DicomSeriesSource {
    pub fn new(sort_by: SortBy) -> Self {
        Self {
            sort_by,
            last_directory: RefCell::new(None),
        }
    }

    fn with_headers<T>(
        &self,
        directory: &Path,
        refresh: bool,
        f: impl FnOnce(&[HeaderRecord]) -> T,
    ) -> Result<T, ScanError> {
        let mut cache = self.last_directory.borrow_mut();
        let cached = cache.as_ref().is_some_and(|(dir, _)| dir == directory);
        if refresh || !cached {
            *cache = Some((directory.to_path_buf(), Self::read_headers(directory)?));
        }
        let headers = cache.as_ref().map(|(_, headers)| headers.as_slice()).unwrap_or(&[]);
        Ok(f(headers))
    }

    fn read_headers(directory: &Path) -> Result<Vec<HeaderRecord>, ScanError> {
        let io_error = |source| ScanError::Io {
            directory: directory.to_path_buf(),
            source,
        };
        let mut files = Vec::new();
        for entry in fs::read_dir(directory).map_err(io_error)? {
            let entry = entry.map_err(io_error)?;
            if entry.file_type().map_err(io_error)?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();

        if files.is_empty() {
            return Ok(Vec::new());
        }

        let headers: Vec<_> = files
            .par_iter()
            .filter_map(|path| Self::read_header(path))
            .collect();

        if headers.is_empty() {
            return Err(ScanError::NoDicomData {
                directory: directory.to_path_buf(),
            });
        }
        Ok(headers)
    }

    fn read_header(path: &Path) -> Option<HeaderRecord> {
        let object = OpenFileOptions::new()
            .read_until(tags::PIXEL_DATA)
            .open_file(path)
            .ok()?;

        let series_uid = object
            .element(tags::SERIES_INSTANCE_UID)
            .ok()?
            .to_str()
            .ok()?
            .trim_end_matches('\0')
            .trim()
            .to_string();
        if series_uid.is_empty() {
            return None;
        }

        Some(HeaderRecord {
            path: path.to_path_buf(),
            series_uid,
            position: Self::float_array(&object, tags::IMAGE_POSITION_PATIENT),
            orientation: Self::float_array(&object, tags::IMAGE_ORIENTATION_PATIENT),
            instance_number: object
                .element(tags::INSTANCE_NUMBER)
                .ok()
                .and_then(|element| element.to_int::<i32>().ok()),
        })
    }

    fn float_array<const N: usize>(
        object: &DefaultDicomObject,
        tag: dicom::core::Tag,
    ) -> Option<[f64; N]> {
        let values = object.element(tag).ok()?.to_multi_float64().ok()?;
        values.get(..N)?.try_into().ok()
    }

    fn sort_records(records: &mut [&HeaderRecord], sort_by: SortBy) {
        let by_path = |a: &&HeaderRecord, b: &&HeaderRecord| a.path.cmp(&b.path);
        let sort_by = match sort_by {
            SortBy::ImagePositionPatient if records.iter().all(|r| r.position.is_some()) => {
                SortBy::ImagePositionPatient
            }
            SortBy::ImagePositionPatient | SortBy::InstanceNumber
                if records.iter().all(|r| r.instance_number.is_some()) =>
            {
                SortBy::InstanceNumber
            }
            _ => SortBy::None,
        };

        match sort_by {
            SortBy::ImagePositionPatient => {
                let normal = records
                    .iter()
                    .find_map(|r| r.orientation)
                    .map(slice_normal)
                    .unwrap_or([0.0, 0.0, 1.0]);
                let distance = |r: &HeaderRecord| {
                    let p = r.position.unwrap_or_default();
                    p[0] * normal[0] + p[1] * normal[1] + p[2] * normal[2]
                };
                records.sort_by(|a, b| {
                    distance(*a)
                        .partial_cmp(&distance(*b))
                        .unwrap_or(Ordering::Equal)
                        .then_with(|| by_path(a, b))
                });
            }
            SortBy::InstanceNumber => {
                records.sort_by(|a, b| {
                    a.instance_number
                        .cmp(&b.instance_number)
                        .then_with(|| by_path(a, b))
                });
            }
            SortBy::None => records.sort_by(by_path),
        }
    }
}

/// Cross product of the row and column direction cosines.
fn slice_normal(orientation: [f64; 6]) -> [f64; 3] {
    let [rx, ry, rz, cx, cy, cz] = orientation;
    [ry * cz - rz * cy, rz * cx - rx * cz, rx * cy - ry * cx]
}

impl SeriesSource for DicomSeriesSource {
    fn series_ids(&self, directory: &Path) -> Result<Vec<String>, ScanError> {
        self.with_headers(directory, true, |headers| {
            let mut ids: Vec<String> = Vec::new();
            for header in headers {
                if !ids.contains(&header.series_uid) {
                    ids.push(header.series_uid.clone());
                }
            }
            ids
        })
    }

    fn series_file_names(
        &self,
        directory: &Path,
        series_id: &str,
    ) -> Result<Vec<PathBuf>, ScanError> {
        self.with_headers(directory, false, |headers| {
            let mut records: Vec<_> = headers
                .iter()
                .filter(|header| header.series_uid == series_id)
                .collect();
            Self::sort_records(&mut records, self.sort_by);
            records.into_iter().map(|r| r.path.clone()).collect()
        })
    }
}
