use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::{Rgb, RgbImage};
use watermark_transplant::{
    pair_directories, DetectionTensor, Error, FailureKind, ImagePair, InferenceAdapter, Outcome,
    PaddingPolicy, ProcessOptions, Repair, SharedAdapter, TransplantEngine,
};

/// Detector stand-in that always returns the same tensor.
struct FixedAdapter {
    tensor: DetectionTensor,
}

impl InferenceAdapter for FixedAdapter {
    fn input_size(&self) -> u32 {
        640
    }

    fn infer(&self, _image: &RgbImage) -> watermark_transplant::Result<DetectionTensor> {
        Ok(self.tensor.clone())
    }
}

/// `[1, N, 5]` tensor with one row per proposal.
fn transposed(rows: &[[f32; 5]]) -> DetectionTensor {
    let data = rows.iter().flatten().copied().collect();
    DetectionTensor::new(&[1, rows.len(), 5], data).unwrap()
}

fn proposals(n: usize, conf: f32, hit: Option<(usize, [f32; 5])>) -> Vec<[f32; 5]> {
    let mut rows: Vec<[f32; 5]> = (0..n).map(|_| [0.5, 0.5, 0.1, 0.1, conf]).collect();
    if let Some((i, row)) = hit {
        rows[i] = row;
    }
    rows
}

/// Lower-right watermark at the 450/640 model column.
const LOWER_RIGHT: [f32; 5] = [450.0 / 640.0, 1700.0 / 1920.0, 0.2, 0.05, 0.8];

fn engine(tensor: DetectionTensor) -> TransplantEngine<FixedAdapter> {
    TransplantEngine::new(SharedAdapter::ready(FixedAdapter { tensor }))
}

#[allow(clippy::cast_possible_truncation)]
fn write_pair(dir: &Path, name: &str, width: u32, height: u32) -> ImagePair {
    let target = RgbImage::from_pixel(width, height, Rgb([250, 250, 250]));
    let reference = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 7])
    });
    let wm = dir.join(format!("{name}.png"));
    let clean = dir.join(format!("{name}_clean.png"));
    target.save(&wm).unwrap();
    reference.save(&clean).unwrap();
    ImagePair::new(wm, clean)
}

#[test]
fn low_confidence_batch_reports_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let pair = write_pair(tmp.path(), "photo", 216, 384);
    let out_dir = tmp.path().join("out");

    let engine = engine(transposed(&proposals(200, 0.1, None)));
    let report = engine
        .process_batch(&[pair], &out_dir, &ProcessOptions::default())
        .unwrap();

    assert_eq!(report.success_count(), 0);
    assert_eq!(report.not_found_count(), 1);
    match &report.results[0].outcome {
        Outcome::NotFound { max_confidence } => {
            assert!((max_confidence.unwrap() - 0.1).abs() < 1e-6);
        }
        other => panic!("expected NotFound, got {other:?}"),
    }
    assert!(report.log().starts_with("[MISS] photo.png"));
    assert!(!out_dir.join("Fixed_photo.png").exists());
}

#[test]
fn detected_region_is_replaced_from_reference() {
    let tmp = tempfile::tempdir().unwrap();
    let pair = write_pair(tmp.path(), "photo", 216, 384);
    let out_dir = tmp.path().join("out");

    let engine = engine(transposed(&proposals(300, 0.05, Some((123, LOWER_RIGHT)))));
    let report = engine
        .process_batch(&[pair.clone()], &out_dir, &ProcessOptions::default())
        .unwrap();
    assert_eq!(report.success_count(), 1);

    let Outcome::Repaired {
        region,
        confidence,
        output,
    } = &report.results[0].outcome
    else {
        panic!("expected Repaired, got {:?}", report.results[0].outcome);
    };
    assert_eq!(output, &out_dir.join("Fixed_photo.png"));
    assert!((confidence - 0.8).abs() < 1e-6);
    assert_eq!(region.x + region.width, 216, "right edge extension");
    assert!(region.x > 108 && region.y > 192, "lower-right quadrant");

    let result = image::open(output).unwrap().to_rgb8();
    let target = image::open(&pair.watermarked).unwrap().to_rgb8();
    let reference = image::open(&pair.reference).unwrap().to_rgb8();
    for (x, y, px) in result.enumerate_pixels() {
        if region.contains(x, y) {
            assert_eq!(px, reference.get_pixel(x, y));
        } else {
            assert_eq!(px, target.get_pixel(x, y));
        }
    }
}

#[test]
fn layout_does_not_change_result() {
    let rows = proposals(300, 0.05, Some((42, LOWER_RIGHT)));
    let tensor = transposed(&rows);
    let target = RgbImage::from_pixel(216, 384, Rgb([0, 0, 0]));
    let reference = RgbImage::from_pixel(216, 384, Rgb([255, 255, 255]));
    let opts = ProcessOptions::default();

    let a = engine(tensor.clone())
        .locate(&target, &opts)
        .unwrap()
        .unwrap();
    let b = engine(tensor.transposed())
        .locate(&target, &opts)
        .unwrap()
        .unwrap();
    assert_eq!(a, b);

    let Repair::Repaired { region, .. } = engine(tensor.transposed())
        .repair(&target, &reference, &opts)
        .unwrap()
    else {
        panic!("expected a repair");
    };
    assert_eq!(region.x + region.width, 216);
}

#[test]
fn symmetric_policy_keeps_box_centered() {
    let rows = proposals(50, 0.05, Some((3, [0.5, 0.5, 0.25, 0.125, 0.9])));
    let target = RgbImage::new(640, 640);
    let opts = ProcessOptions {
        padding_ratio: 0.0,
        policy: PaddingPolicy::Symmetric,
        ..ProcessOptions::default()
    };

    let engine = engine(transposed(&rows));
    let detected = engine.detect(&target, &opts).unwrap().unwrap();
    let located = engine.locate(&target, &opts).unwrap().unwrap();
    assert_eq!(located.proposal, detected);
    assert_eq!(located.proposal.index, 3);
    assert_eq!(located.rect.x, 240);
    assert_eq!(located.rect.y, 280);
    assert_eq!(located.rect.width, 160);
    assert_eq!(located.rect.height, 80);
}

#[test]
fn failing_pair_does_not_abort_batch() {
    let tmp = tempfile::tempdir().unwrap();
    let broken = tmp.path().join("broken.png");
    std::fs::write(&broken, b"definitely not a png").unwrap();
    let good = write_pair(tmp.path(), "good", 216, 384);
    let pairs = [ImagePair::new(&broken, &good.reference), good];
    let out_dir = tmp.path().join("out");

    let engine = engine(transposed(&proposals(300, 0.05, Some((7, LOWER_RIGHT)))));
    let report = engine
        .process_batch(&pairs, &out_dir, &ProcessOptions::default())
        .unwrap();

    assert_eq!(report.results.len(), 2);
    assert!(matches!(
        report.results[0].outcome,
        Outcome::Failed {
            kind: FailureKind::Decode,
            ..
        }
    ));
    assert!(report.results[1].is_success());
    assert_eq!(report.success_count(), 1);
    assert!(report.log().contains("[FAIL] broken.png: decode"));
    assert!(out_dir.join("Fixed_good.png").exists());
}

#[test]
fn region_outside_image_is_a_geometry_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let pair = write_pair(tmp.path(), "photo", 64, 64);

    // Pixel-unit box far beyond the model input.
    let engine = engine(transposed(&proposals(
        20,
        0.05,
        Some((0, [5000.0, 5000.0, 10.0, 10.0, 0.9])),
    )));
    let result = engine.process_pair(&pair, tmp.path(), &ProcessOptions::default());
    assert!(matches!(
        result.outcome,
        Outcome::Failed {
            kind: FailureKind::Geometry,
            ..
        }
    ));
}

#[test]
fn degenerate_tensor_is_an_inference_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let pair = write_pair(tmp.path(), "photo", 64, 64);

    let empty = DetectionTensor::new(&[1, 5, 0], vec![]).unwrap();
    let result = engine(empty).process_pair(&pair, tmp.path(), &ProcessOptions::default());
    assert!(matches!(
        result.outcome,
        Outcome::Failed {
            kind: FailureKind::Inference,
            ..
        }
    ));
}

#[test]
fn adapter_init_failure_is_fatal_and_loads_once() {
    let tmp = tempfile::tempdir().unwrap();
    let pair = write_pair(tmp.path(), "photo", 64, 64);
    let out_dir = tmp.path().join("out");

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let engine: TransplantEngine<FixedAdapter> =
        TransplantEngine::new(SharedAdapter::lazy(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::ModelLoad("model file not found".into()))
        }));

    let err = engine
        .process_batch(&[pair.clone(), pair], &out_dir, &ProcessOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::AdapterInit(_)));
    assert_eq!(err.failure_kind(), FailureKind::Setup);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(!out_dir.exists());
}

#[test]
fn invalid_options_are_rejected_before_processing() {
    let tmp = tempfile::tempdir().unwrap();
    let pair = write_pair(tmp.path(), "photo", 64, 64);
    let opts = ProcessOptions {
        confidence_threshold: -0.2,
        ..ProcessOptions::default()
    };

    let err = engine(transposed(&proposals(10, 0.9, None)))
        .process_batch(&[pair], tmp.path(), &opts)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOption(_)));
}

#[test]
fn directories_pair_by_file_stem() {
    let tmp = tempfile::tempdir().unwrap();
    let wm_dir = tmp.path().join("wm");
    let ref_dir = tmp.path().join("ref");
    std::fs::create_dir_all(&wm_dir).unwrap();
    std::fs::create_dir_all(&ref_dir).unwrap();

    let img = RgbImage::new(4, 4);
    for name in ["b.png", "a.jpg", "lonely.png"] {
        img.save(wm_dir.join(name)).unwrap();
    }
    for name in ["a.png", "b.png", "other.png"] {
        img.save(ref_dir.join(name)).unwrap();
    }
    std::fs::write(wm_dir.join("notes.txt"), "skip me").unwrap();

    let pairs = pair_directories(&wm_dir, &ref_dir).unwrap();
    assert_eq!(
        pairs,
        vec![
            ImagePair::new(wm_dir.join("a.jpg"), ref_dir.join("a.png")),
            ImagePair::new(wm_dir.join("b.png"), ref_dir.join("b.png")),
        ]
    );
}

#[test]
fn same_output_name_fails_later_pair() {
    let tmp = tempfile::tempdir().unwrap();
    let (a, b) = (tmp.path().join("a"), tmp.path().join("b"));
    std::fs::create_dir_all(&a).unwrap();
    std::fs::create_dir_all(&b).unwrap();
    let pairs = [write_pair(&a, "x", 216, 384), write_pair(&b, "x", 216, 384)];
    let out_dir = tmp.path().join("out");

    let engine = engine(transposed(&proposals(300, 0.05, Some((9, LOWER_RIGHT)))));
    let report = engine
        .process_batch(&pairs, &out_dir, &ProcessOptions::default())
        .unwrap();

    assert!(report.results[0].is_success());
    assert!(matches!(
        report.results[1].outcome,
        Outcome::Failed {
            kind: FailureKind::Persistence,
            ..
        }
    ));
    assert_eq!(report.success_count(), 1);
    assert_eq!(std::fs::read_dir(&out_dir).unwrap().count(), 1);
}
