//! Contract Invariant Tests
//!
//! These tests verify the non-negotiable guarantees.

use base64::Engine;
use image::{Rgba, RgbaImage};

use printforge_core::{
    compose,
    config::{CropConfig, DecodeLimits, EngineConfig, RenderConfig},
    crop, compute_aspect_fit,
    hashing::canonical_json,
    pipeline::{RenderPipeline, RenderRequest, SlotPayload},
    projection::{cylindrical_wrap, max_wrap_angle, FALLBACK_WRAP_ANGLE},
    raster::{self, encode_png},
    AssignedImage, CropError, FitMode, ItemType, LayoutBase, LayoutRegistry, MaskShape, RenderOptions, SlotDef,
    SlotImageAssignment,
};

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

fn slot(id: &str, x: f64, y: f64, w: f64, h: f64) -> SlotDef {
    SlotDef {
        id: id.to_string(),
        x_pct: x,
        y_pct: y,
        width_pct: w,
        height_pct: h,
        rotation_deg: 0.0,
        z_index: 0,
        mask_shape: MaskShape::Rect,
        corner_radius_pct: 0.0,
    }
}

fn create_test_layout(slots: Vec<SlotDef>) -> LayoutBase {
    LayoutBase {
        id: "poster-square".to_string(),
        name: "Square Poster".to_string(),
        item_type: ItemType::Poster,
        print_area_width_px: 1000,
        print_area_height_px: 1000,
        base_artwork_ref: Some("poster-square/base.png".to_string()),
        slots,
        physical_width_m: None,
        physical_height_m: None,
        engine_min_version: "1.0.0".to_string(),
    }
}

/// White artwork with a transparent 300x300 window at (100, 100).
fn base_with_cutout() -> RgbaImage {
    let mut base = RgbaImage::from_pixel(1000, 1000, WHITE);
    for y in 100..400 {
        for x in 100..400 {
            base.put_pixel(x, y, raster::TRANSPARENT);
        }
    }
    base
}

/// 200x100: red left half, blue right half.
fn split_photo() -> RgbaImage {
    let mut photo = RgbaImage::from_pixel(200, 100, Rgba([255, 0, 0, 255]));
    for y in 0..100 {
        for x in 100..200 {
            photo.put_pixel(x, y, Rgba([0, 0, 255, 255]));
        }
    }
    photo
}

fn assignment(slot_id: &str) -> SlotImageAssignment {
    SlotImageAssignment {
        slot_id: slot_id.to_string(),
        source_image_ref: format!("uploads/{}.png", slot_id),
        natural_width: 200,
        natural_height: 100,
    }
}

fn create_pipeline(layout: LayoutBase) -> RenderPipeline {
    let mut registry = LayoutRegistry::new();
    registry.register(layout);
    RenderPipeline::new(registry, EngineConfig::default())
}

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[test]
fn invariant_photo_shows_through_cutout_only() {
    let layout = create_test_layout(vec![slot("photo", 10.0, 10.0, 30.0, 30.0)]);
    let base = base_with_cutout();
    let render = RenderConfig::default();
    let decode = DecodeLimits::default();
    let assigned = vec![AssignedImage::decoded(assignment("photo"), split_photo())];

    let out = compose(&layout, Some(&base), &assigned, &RenderOptions::preview(&render, &decode)).unwrap();
    assert_eq!(out.image.dimensions(), (1000, 1000));
    assert!(out.warnings.is_empty());

    // Outside the window: opaque white everywhere.
    for (x, y) in [(0, 0), (99, 250), (400, 250), (250, 99), (250, 400), (999, 999)] {
        assert_eq!(*out.image.get_pixel(x, y), WHITE, "pixel ({}, {})", x, y);
    }

    // Inside: the cover-fitted photo. Source crop is (50, 0, 100, 100), so
    // the red/blue seam lands in the middle of the window.
    let left = out.image.get_pixel(150, 250);
    assert!(left.0[0] > 250 && left.0[2] < 5 && left.0[3] == 255, "{:?}", left);
    let right = out.image.get_pixel(350, 250);
    assert!(right.0[2] > 250 && right.0[0] < 5 && right.0[3] == 255, "{:?}", right);
    for (x, y) in [(100, 100), (399, 399), (100, 399), (399, 100)] {
        assert_eq!(out.image.get_pixel(x, y).0[3], 255);
        assert_ne!(*out.image.get_pixel(x, y), WHITE);
    }

    assert_eq!(out.regions.len(), 1);
    assert_eq!(out.regions[0].asset_reference.as_deref(), Some("uploads/photo.png"));
}

#[test]
fn invariant_compose_deterministic() {
    let mut rotated = slot("tilted", 20.0, 30.0, 40.0, 25.0);
    rotated.rotation_deg = 17.5;
    rotated.mask_shape = MaskShape::Circle;
    let layout = create_test_layout(vec![slot("photo", 10.0, 10.0, 30.0, 30.0), rotated]);
    let base = base_with_cutout();
    let render = RenderConfig::default();
    let decode = DecodeLimits::default();
    let png = encode_png(&split_photo()).unwrap();
    let assigned = vec![
        AssignedImage::encoded(assignment("photo"), png.clone()),
        AssignedImage::encoded(assignment("tilted"), png),
    ];

    let first = compose(&layout, Some(&base), &assigned, &RenderOptions::export(&render, &decode)).unwrap();
    let second = compose(&layout, Some(&base), &assigned, &RenderOptions::export(&render, &decode)).unwrap();

    assert_eq!(first.image.as_raw(), second.image.as_raw());
    assert_eq!(encode_png(&first.image).unwrap(), encode_png(&second.image).unwrap());
    assert_eq!(first.regions, second.regions);
}

#[test]
fn invariant_empty_slot_is_placeholder_never_transparent() {
    let mut layout = create_test_layout(vec![slot("empty", 10.0, 10.0, 30.0, 30.0)]);
    layout.base_artwork_ref = None;
    let render = RenderConfig::default();
    let decode = DecodeLimits::default();

    let out = compose(&layout, None, &[], &RenderOptions::preview(&render, &decode)).unwrap();
    for y in 100..400 {
        for x in 100..400 {
            assert_eq!(out.image.get_pixel(x, y).0[3], 255, "pixel ({}, {})", x, y);
        }
    }
    assert_eq!(out.image.get_pixel(105, 105).0, render.placeholder_color);
    // Label mark at the center.
    assert_eq!(out.image.get_pixel(250, 250).0, render.label_color);
    assert_eq!(out.image.get_pixel(50, 50).0[3], 0);
    assert_eq!(out.regions[0].asset_reference, None);
}

#[test]
fn invariant_undecodable_slot_degrades() {
    let layout = create_test_layout(vec![slot("a", 0.0, 0.0, 50.0, 50.0), slot("b", 50.0, 50.0, 50.0, 50.0)]);
    let render = RenderConfig::default();
    let decode = DecodeLimits::default();
    let assigned = vec![
        AssignedImage::encoded(assignment("a"), b"not an image".to_vec()),
        AssignedImage::decoded(assignment("b"), split_photo()),
    ];

    let out = compose(&layout, None, &assigned, &RenderOptions::preview(&render, &decode)).unwrap();
    assert_eq!(out.warnings.len(), 2); // undecodable + missing base
    assert_eq!(out.image.get_pixel(10, 10).0, render.placeholder_color);
    assert_eq!(out.image.get_pixel(600, 750).0[3], 255);
    assert_eq!(out.regions[0].asset_reference, None);
    assert_eq!(out.regions[1].asset_reference.as_deref(), Some("uploads/b.png"));
}

/// Horizontal extent of pixels in the top-left 500x500 that differ from `fill`.
fn ink_width(image: &RgbaImage, fill: [u8; 4]) -> u32 {
    let xs: Vec<u32> = (0..500)
        .flat_map(|y| (0..500).map(move |x| (x, y)))
        .filter(|&(x, y)| image.get_pixel(x, y).0 != fill)
        .map(|(x, _)| x)
        .collect();
    match (xs.iter().min(), xs.iter().max()) {
        (Some(lo), Some(hi)) => hi - lo + 1,
        _ => 0,
    }
}

#[test]
fn invariant_placeholder_label_uses_font() {
    let layout = create_test_layout(vec![slot("a", 0.0, 0.0, 50.0, 50.0)]);
    let render = RenderConfig::default();
    let decode = DecodeLimits::default();
    let font = rusttype::Font::try_from_bytes(include_bytes!("fixtures/fonts/DejaVuSansMono.ttf")).unwrap();

    let mark = compose(&layout, None, &[], &RenderOptions::preview(&render, &decode)).unwrap();
    let label = compose(
        &layout,
        None,
        &[],
        &RenderOptions::preview(&render, &decode).with_label_font(Some(&font)),
    )
    .unwrap();

    // "+" arms span 4x the label height; "Add your photo" is far wider.
    let mark_width = ink_width(&mark.image, render.placeholder_color);
    let label_width = ink_width(&label.image, render.placeholder_color);
    assert!(mark_width > 0 && mark_width <= 170, "mark width {}", mark_width);
    assert!(label_width > 250 && label_width <= 450, "label width {}", label_width);
}

#[test]
fn invariant_fit_modes() {
    for (sw, sh, tw, th) in [(200.0, 100.0, 300.0, 300.0), (90.0, 400.0, 50.0, 20.0), (1.0, 1.0, 7.0, 3.0)] {
        let cover = compute_aspect_fit(sw, sh, tw, th, FitMode::Cover).unwrap();
        assert!(sw * cover.scale >= tw - 1e-9 && sh * cover.scale >= th - 1e-9);
        let contain = compute_aspect_fit(sw, sh, tw, th, FitMode::Contain).unwrap();
        assert!(sw * contain.scale <= tw + 1e-9 && sh * contain.scale <= th + 1e-9);
        assert_eq!(contain.source_crop.width, sw);
        assert_eq!(contain.source_crop.height, sh);
    }
}

#[test]
fn invariant_crop_respects_budget() {
    let mut state = 0x2545_f491_u32;
    let noise = RgbaImage::from_fn(256, 256, |_, _| {
        state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let b = state.to_be_bytes();
        Rgba([b[0], b[1], b[2], 255])
    });
    let config = CropConfig {
        max_bytes: 80_000,
        ..CropConfig::default()
    };

    let out = crop(&noise, None, Some(1.0), &config).unwrap();
    assert!(out.encoded.len() <= config.max_bytes);
    assert!(out.reductions >= 1 && out.reductions <= config.max_iterations);

    let impossible = CropConfig {
        max_bytes: 16,
        ..CropConfig::default()
    };
    assert!(matches!(
        crop(&noise, None, Some(1.0), &impossible),
        Err(CropError::SizeBudgetExceeded { iterations: 10, .. })
    ));
}

#[test]
fn invariant_wrap_angle_bounded() {
    let reference = cylindrical_wrap(800.0, 400.0, 0.95, 0.46, 0.35);
    assert!((reference.width_m - 1.9).abs() < 1e-9);
    assert!((reference.theta - 4.13).abs() < 0.01);

    let limit = max_wrap_angle(0.35);
    let mut previous = 0.0;
    for tenths in 1..=120 {
        let w = cylindrical_wrap(tenths as f64 * 40.0, 400.0, 0.95, 0.46, 0.35);
        assert!(w.theta < limit);
        assert!(w.theta >= previous);
        previous = w.theta;
    }

    assert_eq!(cylindrical_wrap(800.0, 0.0, 0.95, 0.46, 0.35).theta, FALLBACK_WRAP_ANGLE);
    assert_eq!(cylindrical_wrap(800.0, 400.0, 0.95, 0.0, 0.35).theta, FALLBACK_WRAP_ANGLE);
}

#[test]
fn invariant_render_calls_validate() {
    // A slot far outside the print area is a blocking violation.
    let layout = create_test_layout(vec![slot("photo", 10.0, 10.0, 150.0, 30.0)]);
    let pipeline = create_pipeline(layout);
    let request = RenderRequest {
        layout_id: "poster-square".to_string(),
        base_artwork: None,
        slots: vec![],
        project: false,
        physical_override: None,
    };

    let err = pipeline.render(&request).unwrap_err();
    assert!(err.to_string().contains("Validation failed"));
}

#[test]
fn invariant_job_hash_stable() {
    let pipeline = create_pipeline(create_test_layout(vec![slot("photo", 10.0, 10.0, 30.0, 30.0)]));
    let request = RenderRequest {
        layout_id: "poster-square".to_string(),
        base_artwork: Some(b64(&encode_png(&base_with_cutout()).unwrap())),
        slots: vec![SlotPayload {
            assignment: assignment("photo"),
            data_base64: b64(&encode_png(&split_photo()).unwrap()),
        }],
        project: true,
        physical_override: None,
    };

    let first = pipeline.render(&request).unwrap();
    let second = pipeline.render(&request).unwrap();

    // Same inputs, same job and same pixels.
    assert_eq!(first.job_hash, second.job_hash);
    assert_eq!(first.exports[0].hash, second.exports[0].hash);
    assert_eq!(first.exports[1].hash, second.exports[1].hash);
    assert_ne!(first.id, second.id);
    assert!(first.warnings.is_empty());
    assert_eq!(first.surfaces[0].projection.mapping, printforge_core::projection::MappingMode::Planar);
}

#[test]
fn invariant_opaque_base_flags_hidden_slot() {
    let pipeline = create_pipeline(create_test_layout(vec![slot("photo", 10.0, 10.0, 30.0, 30.0)]));
    let opaque = RgbaImage::from_pixel(1000, 1000, WHITE);

    let result = pipeline.validate_layout("poster-square", Some(&opaque)).unwrap();
    assert!(result.valid); // warning, not blocking
    assert!(result.violations.iter().any(|v| v.rule == "cutout_alignment"));

    let clean = pipeline.validate_layout("poster-square", Some(&base_with_cutout())).unwrap();
    assert!(clean.violations.is_empty());
}

#[test]
fn invariant_canonical_json_deterministic() {
    use serde_json::json;

    let obj1 = json!({"z": 1, "a": 2, "m": {"b": 1, "a": 2}});
    let obj2 = json!({"a": 2, "m": {"a": 2, "b": 1}, "z": 1});

    let c1 = canonical_json(&obj1).unwrap();
    let c2 = canonical_json(&obj2).unwrap();

    // Must be identical despite different input ordering
    assert_eq!(c1, c2);
}

#[test]
fn invariant_layout_not_found_error() {
    let pipeline = create_pipeline(create_test_layout(vec![]));
    let request = RenderRequest {
        layout_id: "nonexistent".to_string(),
        base_artwork: None,
        slots: vec![],
        project: false,
        physical_override: None,
    };

    let result = pipeline.render(&request);
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("Layout not found"));
}

#[cfg(feature = "test-hooks")]
#[test]
fn invariant_render_counts_validation() {
    use printforge_core::pipeline::{get_validation_call_count, reset_validation_call_count};

    reset_validation_call_count();
    let pipeline = create_pipeline(create_test_layout(vec![]));
    let request = RenderRequest {
        layout_id: "poster-square".to_string(),
        base_artwork: None,
        slots: vec![],
        project: false,
        physical_override: None,
    };
    pipeline.render(&request).unwrap();
    assert_eq!(get_validation_call_count(), 1);
}
