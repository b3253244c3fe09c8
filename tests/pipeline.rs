use std::{
    fs,
    io::{Cursor, Write},
    path::{Path, PathBuf},
};

use dicom::{
    core::{DataElement, PrimitiveValue, VR},
    dictionary_std::tags,
    object::{FileMetaTableBuilder, InMemDicomObject},
};
use dicom_series_viewer::{
    DecodeError, DirectoryOutcome, DownsampleStrategy, Orientation, PreviewParams, ScanError,
    SeriesLocator, SessionState, ViewLayout, ViewerConfig, ViewerSession, VolumeLoader,
    VolumePreviewDownsampler, WindowPreset, apply_window,
};

const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";

const ROWS: usize = 4;
const COLUMNS: usize = 5;

/// Hounsfield value written at `(z, y, x)`.
fn hu(z: usize, y: usize, x: usize) -> f32 {
    (z * 100 + y * 10 + x) as f32 - 24.0
}

fn put_str(object: &mut InMemDicomObject, tag: dicom::core::Tag, vr: VR, value: &str) {
    object.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
}

fn put_u16(object: &mut InMemDicomObject, tag: dicom::core::Tag, value: u16) {
    object.put(DataElement::new(tag, VR::US, PrimitiveValue::from(value)));
}

/// Writes one CT slice at position `z` of a `ROWS`x`COLUMNS` series.
fn write_slice(path: &Path, series_uid: &str, z: usize, rows: usize) {
    let mut object = InMemDicomObject::new_empty();
    let instance_uid = format!("{series_uid}.{z}");

    put_str(&mut object, tags::SOP_CLASS_UID, VR::UI, CT_IMAGE_STORAGE);
    put_str(&mut object, tags::SOP_INSTANCE_UID, VR::UI, &instance_uid);
    put_str(&mut object, tags::MODALITY, VR::CS, "CT");
    put_str(&mut object, tags::SERIES_INSTANCE_UID, VR::UI, series_uid);
    put_str(&mut object, tags::INSTANCE_NUMBER, VR::IS, &(z + 1).to_string());
    put_str(
        &mut object,
        tags::IMAGE_POSITION_PATIENT,
        VR::DS,
        &format!("0\\0\\{}", z as f32 * 2.5),
    );
    put_str(
        &mut object,
        tags::IMAGE_ORIENTATION_PATIENT,
        VR::DS,
        "1\\0\\0\\0\\1\\0",
    );
    put_str(&mut object, tags::PIXEL_SPACING, VR::DS, "0.5\\0.5");
    put_str(&mut object, tags::RESCALE_INTERCEPT, VR::DS, "-1024");
    put_str(&mut object, tags::RESCALE_SLOPE, VR::DS, "1");
    put_str(&mut object, tags::PHOTOMETRIC_INTERPRETATION, VR::CS, "MONOCHROME2");
    put_u16(&mut object, tags::SAMPLES_PER_PIXEL, 1);
    put_u16(&mut object, tags::ROWS, rows as u16);
    put_u16(&mut object, tags::COLUMNS, COLUMNS as u16);
    put_u16(&mut object, tags::BITS_ALLOCATED, 16);
    put_u16(&mut object, tags::BITS_STORED, 16);
    put_u16(&mut object, tags::HIGH_BIT, 15);
    put_u16(&mut object, tags::PIXEL_REPRESENTATION, 0);

    let pixels: Vec<u16> = (0..rows)
        .flat_map(|y| (0..COLUMNS).map(move |x| (hu(z, y, x) + 1024.0) as u16))
        .collect();
    object.put(DataElement::new(
        tags::PIXEL_DATA,
        VR::OW,
        PrimitiveValue::U16(pixels.into()),
    ));

    object
        .with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN)
                .media_storage_sop_class_uid(CT_IMAGE_STORAGE)
                .media_storage_sop_instance_uid(instance_uid),
        )
        .unwrap()
        .write_to_file(path)
        .unwrap();
}

/// Writes `depth` slices into `directory`, named so that file name order is
/// the reverse of patient position order.
fn write_series(directory: &Path, series_uid: &str, depth: usize) {
    fs::create_dir_all(directory).unwrap();
    for z in 0..depth {
        let name = format!("slice-{}.dcm", depth - z);
        write_slice(&directory.join(name), series_uid, z, ROWS);
    }
}

fn file_names(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect()
}

#[test]
fn series_are_listed_per_directory() {
    let root = tempfile::tempdir().unwrap();
    write_series(&root.path().join("study/a"), "1.2.3.100", 3);
    write_series(&root.path().join("study/b"), "1.2.3.200", 2);
    fs::create_dir_all(root.path().join("study/empty")).unwrap();
    fs::write(root.path().join("study/README.txt"), "scanner export").unwrap();

    let series = SeriesLocator::default().locate_series(root.path());

    assert_eq!(series.len(), 2);
    assert_eq!(series[0].series_id, "1.2.3.100");
    assert_eq!(series[0].source_directory, root.path().join("study/a"));
    assert_eq!(series[0].file_paths.len(), 3);
    assert_eq!(series[1].series_id, "1.2.3.200");
    assert_eq!(series[1].file_paths.len(), 2);
    for descriptor in &series {
        assert!(
            descriptor
                .file_paths
                .iter()
                .all(|path| path.parent() == Some(descriptor.source_directory.as_path()))
        );
    }
}

#[test]
fn two_series_in_one_directory_stay_separate() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("mixed");
    fs::create_dir_all(&dir).unwrap();
    write_slice(&dir.join("x1.dcm"), "9.9.1", 0, ROWS);
    write_slice(&dir.join("x2.dcm"), "9.9.2", 0, ROWS);
    write_slice(&dir.join("x3.dcm"), "9.9.1", 1, ROWS);

    let series = SeriesLocator::default().locate_series(root.path());

    assert_eq!(series.len(), 2);
    let first = series.iter().find(|s| s.series_id == "9.9.1").unwrap();
    assert_eq!(file_names(&first.file_paths), ["x1.dcm", "x3.dcm"]);
    let second = series.iter().find(|s| s.series_id == "9.9.2").unwrap();
    assert_eq!(file_names(&second.file_paths), ["x2.dcm"]);
}

#[test]
fn files_are_ordered_by_patient_position() {
    let root = tempfile::tempdir().unwrap();
    write_series(root.path(), "1.2.3.100", 3);

    let series = SeriesLocator::default().locate_series(root.path());

    // Names count down while positions count up.
    assert_eq!(
        file_names(&series[0].file_paths),
        ["slice-3.dcm", "slice-2.dcm", "slice-1.dcm"]
    );
}

#[test]
fn directories_without_dicom_are_skipped() {
    let root = tempfile::tempdir().unwrap();
    fs::write(root.path().join("notes.txt"), "not an image").unwrap();
    fs::write(root.path().join("scan.dcm"), b"DICM but not really").unwrap();

    let report = SeriesLocator::default().scan(root.path());

    assert!(report.series.is_empty());
    let skipped: Vec<_> = report.skipped().collect();
    assert_eq!(skipped.len(), 1);
    assert!(matches!(skipped[0].1, ScanError::NoDicomData { .. }));
}

#[test]
fn empty_tree_yields_nothing() {
    let root = tempfile::tempdir().unwrap();
    fs::create_dir_all(root.path().join("a/b/c")).unwrap();

    let report = SeriesLocator::default().scan(root.path());

    assert!(report.series.is_empty());
    assert!(
        report
            .directories
            .iter()
            .all(|scan| matches!(scan.outcome, DirectoryOutcome::NoSeries))
    );
}

#[test]
fn loads_windows_and_slices_a_series() {
    let root = tempfile::tempdir().unwrap();
    write_series(root.path(), "1.2.3.100", 3);
    let series = SeriesLocator::default().locate_series(root.path());

    let volume = VolumeLoader::default()
        .load_volume(&series[0].file_paths)
        .unwrap();

    assert_eq!(volume.dim(), (3, ROWS, COLUMNS));
    for z in 0..3 {
        assert_eq!(volume.data()[[z, 2, 3]], hu(z, 2, 3));
    }
    let spacing = volume.spacing().unwrap();
    assert!((spacing.slice - 2.5).abs() < 1e-4);
    assert!((spacing.row - 0.5).abs() < 1e-6);

    let range = volume.intensity_range();
    assert_eq!(range.min, f64::from(hu(0, 0, 0)));
    assert_eq!(range.max, f64::from(hu(2, 3, 4)));

    let window = WindowPreset::CtAbdomen.resolve(range);
    let coronal = volume.get_slice_from_axis(1, Orientation::Coronal).unwrap();
    assert_eq!(coronal.dim(), (3, COLUMNS));
    let display = apply_window(&coronal, window);
    // -14 HU inside a [-125, 225] window.
    assert!((display[[0, 0]] - 111.0 / 350.0).abs() < 1e-5);
    assert!((display[[2, 4]] - 315.0 / 350.0).abs() < 1e-5);
    assert!(display.iter().all(|v| (0.0..=1.0).contains(v)));

    assert!(volume.get_slice_from_axis(3, Orientation::Axial).is_err());
    assert!(volume.get_slice_from_axis(-1, Orientation::Sagittal).is_err());
}

#[test]
fn mismatched_slice_sizes_are_rejected() {
    let root = tempfile::tempdir().unwrap();
    write_slice(&root.path().join("a.dcm"), "4.4", 0, ROWS);
    write_slice(&root.path().join("b.dcm"), "4.4", 1, ROWS + 1);
    let series = SeriesLocator::default().locate_series(root.path());

    let err = VolumeLoader::default()
        .load_volume(&series[0].file_paths)
        .unwrap_err();

    assert!(matches!(err, DecodeError::InconsistentDimensions { .. }));
}

#[test]
fn preview_keeps_the_volume_intact() {
    let root = tempfile::tempdir().unwrap();
    write_series(root.path(), "1.2.3.100", 3);
    let series = SeriesLocator::default().locate_series(root.path());
    let volume = VolumeLoader::default()
        .load_volume(&series[0].file_paths)
        .unwrap();

    let preview = VolumePreviewDownsampler::downsample(
        &volume,
        DownsampleStrategy::Decimate { factor: 2 },
        PreviewParams::default(),
    )
    .unwrap();

    assert_eq!(preview.dim(), (2, 2, 3));
    assert_eq!(preview.data[[1, 1, 2]], hu(2, 2, 4));
    assert_eq!(volume.dim(), (3, ROWS, COLUMNS));

    let out = tempfile::tempdir().unwrap();
    preview.write_to(out.path()).unwrap();
    assert!(out.path().join("preview.json").is_file());
    assert_eq!(
        fs::read(out.path().join("preview.f32")).unwrap().len(),
        2 * 2 * 3 * 4
    );
}

#[test]
fn session_from_uploaded_archive() {
    let staging = tempfile::tempdir().unwrap();
    write_series(&staging.path().join("upload/ct"), "1.2.3.100", 3);

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let dir = staging.path().join("upload/ct");
    let mut names: Vec<_> = fs::read_dir(&dir)
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    names.sort();
    for name in names {
        writer
            .start_file(
                format!("ct/{}", name.to_string_lossy()),
                zip::write::SimpleFileOptions::default(),
            )
            .unwrap();
        writer.write_all(&fs::read(dir.join(&name)).unwrap()).unwrap();
    }
    let bytes = writer.finish().unwrap().into_inner();

    let mut session = ViewerSession::new(ViewerConfig::default());
    assert_eq!(session.state(), SessionState::NoVolumeLoaded);

    let report = session.open_archive(Cursor::new(bytes)).unwrap();
    assert_eq!(report.series.len(), 1);
    assert_eq!(session.state(), SessionState::SeriesListed);

    session.select_series(0).unwrap();
    assert_eq!(session.state(), SessionState::VolumeLoaded);

    session.apply_preset(WindowPreset::CtBone).unwrap();
    let image = session
        .render_layout(ViewLayout::Row, Orientation::Axial, 1)
        .unwrap();
    // Axial 5x4, coronal 5x3 and sagittal 4x3 tiles in 5x4 cells.
    assert_eq!(image.dimensions(), (15, 4));

    let metadata = session.slice_metadata(0).unwrap();
    assert_eq!(metadata.get("SeriesInstanceUID"), Some("1.2.3.100"));
    assert_eq!(metadata.get("InstanceNumber"), Some("1"));
    assert_eq!(metadata.get("Modality"), Some("CT"));

    assert!(session.render_preview(None).is_err());
    assert!(
        session
            .render_preview(Some(DownsampleStrategy::Resize { shape: (2, 2, 2) }))
            .is_ok()
    );
}

#[test]
fn empty_reopen_keeps_the_session() {
    let root = tempfile::tempdir().unwrap();
    write_series(&root.path().join("ct"), "1.2.3.100", 2);

    let mut session = ViewerSession::new(ViewerConfig::default());
    session.open_path(root.path()).unwrap();
    session.select_series(0).unwrap();

    let empty = tempfile::tempdir().unwrap();
    assert!(session.open_path(empty.path()).is_err());
    assert_eq!(session.state(), SessionState::VolumeLoaded);
    assert_eq!(session.series().len(), 1);
    assert!(session.volume().is_some());
}
