use std::{
    fs::File,
    io::{self, BufReader, Read, Seek},
    path::{Path, PathBuf},
};

use tempfile::TempDir;
use thiserror::Error;
use tracing::info;
use zip::ZipArchive;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create extraction directory: {0}")]
    TempDir(#[source] io::Error),

    #[error("invalid ZIP archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("{} is neither a directory nor a .zip archive", .0.display())]
    UnsupportedInput(PathBuf),
}

/// A ZIP archive unpacked into a temporary directory, removed on drop.
#[derive(Debug)]
pub struct ExtractedArchive {
    dir: TempDir,
    entries: usize,
}

impl ExtractedArchive {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn entries(&self) -> usize {
        self.entries
    }
}

/// Unpacks a ZIP stream. Entry names escaping the target directory are
/// rejected by the zip reader.
pub fn extract_archive<R: Read + Seek>(reader: R) -> Result<ExtractedArchive, ArchiveError> {
    let mut archive = ZipArchive::new(reader)?;
    let dir = tempfile::Builder::new()
        .prefix("dicom-series-")
        .tempdir()
        .map_err(ArchiveError::TempDir)?;
    archive.extract(dir.path())?;

    info!(
        "extracted {} entries to {}",
        archive.len(),
        dir.path().display()
    );
    Ok(ExtractedArchive {
        entries: archive.len(),
        dir,
    })
}

/// Where the series of an input live: a directory used in place, or an
/// archive extracted for the lifetime of the value.
#[derive(Debug)]
pub enum InputSource {
    Directory(PathBuf),
    Archive(ExtractedArchive),
}

impl InputSource {
    pub fn root(&self) -> &Path {
        match self {
            InputSource::Directory(path) => path,
            InputSource::Archive(archive) => archive.path(),
        }
    }
}

pub fn is_zip_path(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}

/// Accepts a directory or a `.zip` file.
pub fn open_input(path: impl AsRef<Path>) -> Result<InputSource, ArchiveError> {
    let path = path.as_ref();
    if path.is_dir() {
        return Ok(InputSource::Directory(path.to_path_buf()));
    }
    if path.is_file() && is_zip_path(path) {
        let file = File::open(path).map_err(|source| ArchiveError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        return extract_archive(BufReader::new(file)).map(InputSource::Archive);
    }
    Err(ArchiveError::UnsupportedInput(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn extracts_nested_entries() {
        let bytes = zip_bytes(&[("study/a/1.dcm", b"one"), ("study/b/2.dcm", b"two")]);
        let archive = extract_archive(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.entries(), 2);
        let content = std::fs::read(archive.path().join("study/b/2.dcm")).unwrap();
        assert_eq!(content, b"two");
    }

    #[test]
    fn directory_is_removed_on_drop() {
        let archive = extract_archive(Cursor::new(zip_bytes(&[("x", b"1")]))).unwrap();
        let path = archive.path().to_path_buf();
        assert!(path.exists());
        drop(archive);
        assert!(!path.exists());
    }

    #[test]
    fn garbage_is_not_an_archive() {
        let err = extract_archive(Cursor::new(b"not a zip".to_vec())).unwrap_err();
        assert!(matches!(err, ArchiveError::Zip(_)));
    }

    #[test]
    fn open_input_dispatches_on_kind() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            open_input(tmp.path()).unwrap(),
            InputSource::Directory(_)
        ));

        let zip_path = tmp.path().join("upload.ZIP");
        std::fs::write(&zip_path, zip_bytes(&[("a/1.dcm", b"1")])).unwrap();
        let input = open_input(&zip_path).unwrap();
        assert!(input.root().join("a/1.dcm").is_file());

        let other = tmp.path().join("notes.txt");
        std::fs::write(&other, "x").unwrap();
        assert!(matches!(
            open_input(&other),
            Err(ArchiveError::UnsupportedInput(_))
        ));
    }
}
