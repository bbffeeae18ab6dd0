use std::sync::Arc;
use std::thread;

use approx::assert_abs_diff_eq;
use ndarray::Array2;

use livestack_core::error::LiveStackError;
use livestack_core::frame::{Image, Pixels};
use livestack_core::process::post::normalize;
use livestack_core::stack::{Normalization, StackMethod, Stacker};

fn mono_value(pixels: &Pixels, row: usize, col: usize) -> f32 {
    match pixels {
        Pixels::Mono(f) => f.data[[row, col]],
        Pixels::Color(_) => panic!("expected mono"),
    }
}

fn ramp(offset: f32) -> Image {
    let data = Array2::from_shape_fn((8, 10), |(r, c)| offset + (r * 10 + c) as f32 * 0.001);
    Image::mono(data, 16, "ramp")
}

#[test]
fn test_sum_equals_elementwise_sum() {
    let stacker = Stacker::new(StackMethod::Sum, Normalization::Global);
    let frames: Vec<Image> = [0.1, 0.2, 0.3, 0.05].iter().map(|&o| ramp(o)).collect();
    for frame in &frames {
        stacker.accumulate(frame).unwrap();
    }
    let snapshot = stacker.snapshot().unwrap();
    assert_eq!(snapshot.frame_count, 4);
    let expected: f32 = frames.iter().map(|f| mono_value(&f.pixels, 3, 7)).sum();
    assert_abs_diff_eq!(mono_value(&snapshot.pixels, 3, 7), expected, epsilon = 1e-5);
}

#[test]
fn test_mean_equals_elementwise_mean() {
    let stacker = Stacker::new(StackMethod::Mean, Normalization::Global);
    let offsets = [0.1, 0.4, 0.25, 0.7, 0.55];
    for &o in &offsets {
        stacker.accumulate(&ramp(o)).unwrap();
    }
    let snapshot = stacker.snapshot().unwrap();
    let mean_offset: f32 = offsets.iter().sum::<f32>() / offsets.len() as f32;
    assert_abs_diff_eq!(
        mono_value(&snapshot.pixels, 5, 2),
        mean_offset + 52.0 * 0.001,
        epsilon = 1e-5
    );
}

#[test]
fn test_concurrent_accumulation_matches_serial() {
    let stacker = Arc::new(Stacker::new(StackMethod::Sum, Normalization::Global));
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let stacker = Arc::clone(&stacker);
            thread::spawn(move || {
                stacker.accumulate(&ramp(i as f32 * 0.01)).unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    let snapshot = stacker.snapshot().unwrap();
    assert_eq!(snapshot.frame_count, 8);
    let expected: f32 = (0..8).map(|i| i as f32 * 0.01).sum::<f32>();
    assert_abs_diff_eq!(mono_value(&snapshot.pixels, 0, 0), expected, epsilon = 1e-5);
}

#[test]
fn test_mismatched_geometry_is_rejected() {
    let stacker = Stacker::new(StackMethod::Mean, Normalization::Global);
    stacker.accumulate(&ramp(0.1)).unwrap();
    let before = stacker.snapshot().unwrap();

    let other = Image::mono(Array2::zeros((10, 8)), 16, "rotated");
    let err = stacker.accumulate(&other).unwrap_err();
    assert!(matches!(err, LiveStackError::GeometryMismatch { .. }));

    let color = Image::color(
        Array2::zeros((8, 10)),
        Array2::zeros((8, 10)),
        Array2::zeros((8, 10)),
        16,
        "color",
    );
    assert!(stacker.accumulate(&color).is_err());

    let after = stacker.snapshot().unwrap();
    assert_eq!(after.frame_count, 1);
    assert_eq!(after.version, before.version);
}

#[test]
fn test_snapshot_is_not_affected_by_later_frames() {
    let stacker = Stacker::new(StackMethod::Sum, Normalization::Global);
    stacker.accumulate(&ramp(0.1)).unwrap();
    let snapshot = stacker.snapshot().unwrap();
    stacker.accumulate(&ramp(0.1)).unwrap();
    assert_abs_diff_eq!(mono_value(&snapshot.pixels, 0, 0), 0.1, epsilon = 1e-6);
    assert_eq!(stacker.frame_count(), 2);
}

#[test]
fn test_reset_starts_a_fresh_stack() {
    let stacker = Stacker::new(StackMethod::Sum, Normalization::Global);
    stacker.accumulate(&ramp(0.1)).unwrap();
    stacker.reset(StackMethod::Mean, Normalization::Local);
    assert_eq!(stacker.frame_count(), 0);
    assert!(stacker.snapshot().is_none());
    assert_eq!(stacker.method(), StackMethod::Mean);

    stacker
        .accumulate(&Image::mono(Array2::zeros((4, 4)), 16, "small"))
        .unwrap();
    assert_eq!(stacker.geometry().unwrap().width, 4);
}

#[test]
fn test_global_normalization_divides_sum_by_count() {
    let stacker = Stacker::new(StackMethod::Sum, Normalization::Global);
    for _ in 0..4 {
        stacker.accumulate(&ramp(0.2)).unwrap();
    }
    let pixels = normalize(&stacker.snapshot().unwrap());
    assert_abs_diff_eq!(mono_value(&pixels, 0, 0), 0.2, epsilon = 1e-5);
}

#[test]
fn test_local_normalization_spans_unit_range() {
    let stacker = Stacker::new(StackMethod::Sum, Normalization::Local);
    stacker.accumulate(&ramp(0.2)).unwrap();
    stacker.accumulate(&ramp(0.2)).unwrap();
    let pixels = normalize(&stacker.snapshot().unwrap());
    assert_abs_diff_eq!(mono_value(&pixels, 0, 0), 0.0, epsilon = 1e-6);
    assert_abs_diff_eq!(mono_value(&pixels, 7, 9), 1.0, epsilon = 1e-6);
}
