#[allow(dead_code)]
mod common;

use std::fs;

use approx::assert_abs_diff_eq;
use ndarray::Array2;
use tempfile::TempDir;

use livestack_core::error::LiveStackError;
use livestack_core::frame::{BayerPattern, ColorLayout, Image, Pixels};
use livestack_core::io::{load_image, save_image, FolderScanner, OutputFormat};

use common::flat_frame;

#[test]
fn test_tiff_keeps_sixteen_bit_precision() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ramp.tif");
    let data = Array2::from_shape_fn((6, 9), |(r, c)| (r * 9 + c) as f32 / 53.0);
    save_image(&Image::mono(data.clone(), 16, "ramp"), &path, OutputFormat::Tiff).unwrap();

    let loaded = load_image(&path).unwrap();
    assert_eq!(loaded.info.bit_depth, 16);
    assert_eq!((loaded.width(), loaded.height()), (9, 6));
    let Pixels::Mono(frame) = &loaded.pixels else {
        panic!("expected mono");
    };
    for (a, b) in frame.data.iter().zip(data.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-4);
    }
}

#[test]
fn test_color_png_loads_as_three_planes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("color.png");
    let image = Image::color(
        Array2::from_elem((4, 4), 1.0),
        Array2::from_elem((4, 4), 0.5),
        Array2::zeros((4, 4)),
        8,
        "color",
    );
    save_image(&image, &path, OutputFormat::Png).unwrap();
    let loaded = load_image(&path).unwrap();
    assert!(loaded.is_color());
    assert_eq!(loaded.info.layout, ColorLayout::Rgb);
    assert_eq!(loaded.info.bit_depth, 8);
}

#[test]
fn test_scanner_ignores_existing_files_unless_asked() {
    let dir = TempDir::new().unwrap();
    save_image(&flat_frame(4, 4, 0.2), &dir.path().join("old.tif"), OutputFormat::Tiff).unwrap();

    let mut scanner = FolderScanner::new(dir.path(), false).unwrap();
    assert!(scanner.discover().unwrap().is_empty());

    save_image(&flat_frame(4, 4, 0.2), &dir.path().join("new.tif"), OutputFormat::Tiff).unwrap();
    fs::write(dir.path().join("notes.txt"), "not an image").unwrap();
    let found = scanner.discover().unwrap();
    assert_eq!(found, vec![dir.path().join("new.tif")]);
    assert!(scanner.discover().unwrap().is_empty());

    scanner.forget(&found[0]);
    assert_eq!(scanner.discover().unwrap(), found);

    let mut everything = FolderScanner::new(dir.path(), true).unwrap();
    assert_eq!(everything.discover().unwrap().len(), 2);
}

#[test]
fn test_handed_back_files_survive_a_folder_change() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    for name in ["a.tif", "b.tif"] {
        save_image(&flat_frame(4, 4, 0.2), &first.path().join(name), OutputFormat::Tiff).unwrap();
    }
    let mut scanner = FolderScanner::new(first.path(), true).unwrap();
    let found = scanner.discover().unwrap();
    assert_eq!(found.len(), 2);
    for path in &found {
        scanner.forget(path);
    }
    // A rescan of the same folder gives them back exactly once.
    assert_eq!(scanner.discover().unwrap(), found);
    assert!(scanner.discover().unwrap().is_empty());

    for path in &found {
        scanner.forget(path);
    }
    save_image(&flat_frame(4, 4, 0.2), &second.path().join("c.tif"), OutputFormat::Tiff).unwrap();
    let mut moved = FolderScanner::new(second.path(), false)
        .unwrap()
        .with_backlog(scanner.take_backlog());
    assert!(scanner.discover().unwrap().is_empty());
    assert_eq!(moved.discover().unwrap(), found);
    assert!(moved.discover().unwrap().is_empty());
    assert!(moved.read(&found[0]).is_ok());
}

#[test]
fn test_unreadable_file_does_not_stop_the_sequence() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("broken.tif"), b"definitely not a tiff").unwrap();
    save_image(&flat_frame(4, 4, 0.2), &dir.path().join("good.tif"), OutputFormat::Tiff).unwrap();

    let mut scanner = FolderScanner::new(dir.path(), true).unwrap();
    let results: Vec<_> = scanner.frames().unwrap().collect();
    assert_eq!(results.len(), 2);

    let broken = results
        .iter()
        .find(|(p, _)| p.ends_with("broken.tif"))
        .unwrap();
    assert!(matches!(broken.1, Err(LiveStackError::Read { .. })));
    let good = results.iter().find(|(p, _)| p.ends_with("good.tif")).unwrap();
    let image = good.1.as_ref().unwrap();
    assert!(image.info.captured_at.is_some());
}

#[test]
fn test_scanner_tags_raw_frames() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("raw.tif");
    save_image(&flat_frame(4, 4, 0.2), &path, OutputFormat::Tiff).unwrap();
    let scanner = FolderScanner::new(dir.path(), true)
        .unwrap()
        .with_bayer_pattern(Some(BayerPattern::Bggr));
    let image = scanner.read(&path).unwrap();
    assert_eq!(image.info.layout, ColorLayout::Bayer(BayerPattern::Bggr));
}

#[test]
fn test_missing_scan_folder_is_reported() {
    let dir = TempDir::new().unwrap();
    let err = FolderScanner::new(&dir.path().join("nope"), false).unwrap_err();
    assert!(matches!(err, LiveStackError::MissingFolder { role: "scan", .. }));
}
