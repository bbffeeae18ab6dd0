#[allow(dead_code)]
mod common;

use approx::assert_abs_diff_eq;

use livestack_core::align::{
    detect_stars, match_stars, warp_image, FrameAligner, Similarity, StarAligner,
};
use livestack_core::color::luminance;
use livestack_core::config::AlignmentConfig;
use livestack_core::error::LiveStackError;
use livestack_core::frame::Image;

use common::{flat_frame, move_stars, random_stars, star_field};

const WIDTH: usize = 200;
const HEIGHT: usize = 160;

fn config() -> AlignmentConfig {
    AlignmentConfig {
        min_matches: 15,
        ..AlignmentConfig::default()
    }
}

fn field_image(seed: u64, transform: &Similarity, name: &str) -> Image {
    let stars = move_stars(&random_stars(40, WIDTH, HEIGHT, seed), transform);
    Image::mono(star_field(WIDTH, HEIGHT, &stars), 16, name)
}

#[test]
fn test_detects_most_synthetic_stars() {
    let image = field_image(7, &Similarity::identity(), "ref.tif");
    let stars = detect_stars(&luminance(&image.pixels), &config().detection);
    assert!(stars.len() >= 25, "only {} stars detected", stars.len());
    assert!(stars.windows(2).all(|w| w[0].flux >= w[1].flux));
}

#[test]
fn test_recovers_shift_and_rotation() {
    let truth = Similarity::from_parts(1.0, 0.02, 4.3, -2.7);
    let reference_image = field_image(7, &Similarity::identity(), "ref.tif");
    let frame = field_image(7, &truth, "frame.tif");

    let aligner = StarAligner;
    let reference = aligner.reference(&reference_image, &config()).unwrap();
    let result = aligner.register(&reference, &frame, &config()).unwrap();
    assert!(result.matches >= 15, "{} matches", result.matches);

    // The registered transform maps frame coordinates back onto the reference.
    let expected = truth.inverse().unwrap();
    for point in [(20.0, 20.0), (180.0, 30.0), (100.0, 140.0)] {
        let got = result.transform.apply(point);
        let want = expected.apply(point);
        assert_abs_diff_eq!(got.0, want.0, epsilon = 0.5);
        assert_abs_diff_eq!(got.1, want.1, epsilon = 0.5);
    }
}

#[test]
fn test_warped_frame_lines_up_with_reference() {
    let truth = Similarity::from_parts(1.0, -0.015, -3.0, 5.5);
    let reference_image = field_image(11, &Similarity::identity(), "ref.tif");
    let frame = field_image(11, &truth, "frame.tif");

    let aligner = StarAligner;
    let reference = aligner.reference(&reference_image, &config()).unwrap();
    let result = aligner.register(&reference, &frame, &config()).unwrap();
    let warped = warp_image(&frame, &result.transform);
    assert_eq!(warped.geometry(), reference_image.geometry());

    let warped_stars = detect_stars(&luminance(&warped.pixels), &config().detection);
    let matched = match_stars(&warped_stars, &reference.stars).unwrap();
    assert!(matched.pairs.len() >= 15);
    assert_abs_diff_eq!(matched.transform.tx, 0.0, epsilon = 0.5);
    assert_abs_diff_eq!(matched.transform.ty, 0.0, epsilon = 0.5);
}

#[test]
fn test_unrelated_field_is_rejected() {
    let aligner = StarAligner;
    let reference_image = field_image(3, &Similarity::identity(), "ref.tif");
    let other = field_image(99, &Similarity::identity(), "other.tif");
    let reference = aligner.reference(&reference_image, &config()).unwrap();
    match aligner.register(&reference, &other, &config()) {
        Err(LiveStackError::InsufficientMatches { found, required }) => {
            assert!(found < required);
            assert_eq!(required, 15);
        }
        other => panic!("expected insufficient matches, got {other:?}"),
    }
}

#[test]
fn test_starless_frame_cannot_be_reference() {
    let aligner = StarAligner;
    let err = aligner
        .reference(&flat_frame(WIDTH, HEIGHT, 0.2), &config())
        .unwrap_err();
    assert!(matches!(err, LiveStackError::NotEnoughStars { .. }));
}
