//! Scene Session Tests
//!
//! Load, edit, export and the run-id guard on asynchronous results.

use image::{Rgba, RgbaImage};
use std::time::Duration;

use printforge_core::{
    assets::{AssetLoader, LoadOutcome, MemoryAssetLoader, TaggedLoad},
    config::EngineConfig,
    layout::{MaskShape, SlotImageAssignment},
    raster::encode_png,
    scene::{
        LoadStatus, ObjectGeometry, ObjectKind, SceneError, SceneSession, SceneSnapshot, SceneState, SceneWarning,
        SnapshotObject, TextStyle, SNAPSHOT_VERSION,
    },
    AssetLoadError,
};

fn geometry(x: f64, y: f64, width: f64, height: f64, rotation_deg: f64) -> ObjectGeometry {
    ObjectGeometry {
        x,
        y,
        width,
        height,
        rotation_deg,
    }
}

fn object(id: &str, kind: ObjectKind, geometry: ObjectGeometry) -> SnapshotObject {
    SnapshotObject {
        id: id.to_string(),
        kind,
        geometry,
        mask_shape: None,
        corner_radius_pct: None,
        assignment: None,
        text_value: None,
        max_chars: None,
        asset_ref: None,
        fill: None,
        text_style: None,
    }
}

fn frame(id: &str, photo_ref: Option<&str>) -> SnapshotObject {
    SnapshotObject {
        mask_shape: Some(MaskShape::Circle),
        corner_radius_pct: Some(0.0),
        assignment: photo_ref.map(|r| SlotImageAssignment {
            slot_id: id.to_string(),
            source_image_ref: r.to_string(),
            natural_width: 30,
            natural_height: 20,
        }),
        ..object(id, ObjectKind::ImageFrame, geometry(10.0, 10.0, 60.0, 40.0, 12.5))
    }
}

fn card_snapshot() -> SceneSnapshot {
    SceneSnapshot {
        version: SNAPSHOT_VERSION.to_string(),
        layout_id: "greeting-card".to_string(),
        width_px: 120,
        height_px: 80,
        objects: vec![
            SnapshotObject {
                fill: Some([250, 240, 230, 255]),
                ..object("background", ObjectKind::Decoration, geometry(0.0, 0.0, 120.0, 80.0, 0.0))
            },
            frame("photo", Some("uploads/kid.png")),
            SnapshotObject {
                text_value: Some("Happy".to_string()),
                max_chars: Some(8),
                text_style: Some(TextStyle::default()),
                ..object("greeting", ObjectKind::TextField, geometry(10.0, 60.0, 100.0, 15.0, 0.0))
            },
        ],
    }
}

fn photo_png() -> Vec<u8> {
    encode_png(&RgbaImage::from_pixel(30, 20, Rgba([30, 140, 60, 255]))).unwrap()
}

const LABEL_FONT: &str = "fonts/DejaVuSansMono.ttf";

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.render.label_font_ref = Some(LABEL_FONT.to_string());
    config
}

fn fonts() -> MemoryAssetLoader {
    MemoryAssetLoader::new().with(LABEL_FONT, include_bytes!("fixtures/fonts/DejaVuSansMono.ttf").to_vec())
}

fn loader() -> MemoryAssetLoader {
    fonts().with("uploads/kid.png", photo_png())
}

/// Crop of the preview covering `(x, y, w, h)`.
fn region_pixels(session: &SceneSession, x: u32, y: u32, w: u32, h: u32) -> Vec<u8> {
    let preview = session.preview().unwrap();
    image::imageops::crop_imm(preview, x, y, w, h).to_image().into_raw()
}

struct NeverLoader;

impl AssetLoader for NeverLoader {
    async fn fetch(&self, _reference: &str) -> Result<Vec<u8>, String> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Err("unreachable".to_string())
    }
}

#[tokio::test]
async fn snapshot_round_trips_through_load() {
    let original = card_snapshot();
    let mut session = SceneSession::new(config());
    assert_eq!(session.load(&original, &loader()).await.unwrap(), LoadStatus::Applied);
    assert_eq!(session.state(), SceneState::Ready);
    assert!(session.warnings().is_empty());
    assert_eq!(session.cached_fonts(), 1);

    let round = session.snapshot().unwrap();
    assert_eq!(round, original);
    assert_eq!(round.digest().unwrap(), original.digest().unwrap());

    let reparsed = SceneSnapshot::from_json(&round.to_json().unwrap()).unwrap();
    for (a, b) in reparsed.objects.iter().zip(&original.objects) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.kind, b.kind);
        assert!(a.geometry.approx_eq(&b.geometry, 1e-9));
    }
}

#[tokio::test]
async fn late_results_from_torn_down_run_are_dropped() {
    let mut session = SceneSession::new(EngineConfig::default());
    let first = session.begin_load(&card_snapshot()).unwrap();

    // The user switches layouts before the first fetch returns.
    let mut replacement = card_snapshot();
    replacement.layout_id = "mug-classic".to_string();
    replacement.objects.truncate(1);
    let second = session.begin_load(&replacement).unwrap();
    assert_ne!(first.run_id, second.run_id);

    let late = vec![TaggedLoad {
        run_id: first.run_id,
        reference: "uploads/kid.png".to_string(),
        outcome: LoadOutcome::Loaded(photo_png()),
        timeout_ms: 1000,
    }];
    assert_eq!(session.complete_load(first.run_id, late.clone()).unwrap(), LoadStatus::Stale);
    assert_eq!(session.state(), SceneState::Loading);
    assert_eq!(session.layout_id(), "mug-classic");
    assert_eq!(session.cached_images(), 0);

    assert_eq!(session.complete_load(second.run_id, vec![]).unwrap(), LoadStatus::Applied);
    assert_eq!(session.objects().len(), 1);

    // A photo fetched for the old run cannot land in the new scene either.
    let stale_photo = late.into_iter().next().unwrap();
    assert_eq!(session.apply_image_load("photo", stale_photo).unwrap(), LoadStatus::Stale);
    assert_eq!(session.cached_images(), 0);
}

#[tokio::test]
async fn missing_photo_degrades_to_placeholder() {
    let mut session = SceneSession::new(config());
    let status = session.load(&card_snapshot(), &fonts()).await.unwrap();
    assert_eq!(status, LoadStatus::Applied);
    assert_eq!(session.state(), SceneState::Ready);
    assert!(matches!(
        &session.warnings()[0],
        SceneWarning::PhotoUnavailable { object_id, .. } if object_id == "photo"
    ));
    assert_eq!(session.regions()[0].asset_reference, None);

    // Assignment survives so the snapshot still names the photo.
    let snapshot = session.snapshot().unwrap();
    assert!(snapshot.objects[1].assignment.is_some());
}

#[tokio::test]
async fn decoration_failure_is_fatal_and_retryable() {
    let mut snapshot = card_snapshot();
    snapshot.objects[0].asset_ref = Some("art/background.png".to_string());

    let mut session = SceneSession::new(config());
    let err = session.load(&snapshot, &loader()).await.unwrap_err();
    assert!(matches!(err, SceneError::AssetLoad(AssetLoadError::Failed { .. })));
    assert_eq!(session.state(), SceneState::Error);
    assert!(session.set_text("greeting", "Hi").is_err());

    // Re-entering Loading retries.
    let art = encode_png(&RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255]))).unwrap();
    let fixed = loader().with("art/background.png", art);
    assert_eq!(session.load(&snapshot, &fixed).await.unwrap(), LoadStatus::Applied);
    assert_eq!(session.state(), SceneState::Ready);
}

#[tokio::test]
async fn font_timeout_moves_to_error() {
    let mut config = config();
    config.loading.timeout_ms = 20;
    let mut snapshot = card_snapshot();
    snapshot.objects[2].text_style = Some(TextStyle {
        font_ref: Some("fonts/script.ttf".to_string()),
        ..TextStyle::default()
    });

    let mut session = SceneSession::new(config);
    let err = session.load(&snapshot, &NeverLoader).await.unwrap_err();
    assert!(matches!(
        err,
        SceneError::AssetLoad(AssetLoadError::TimedOut { timeout_ms: 20, .. })
    ));
    assert_eq!(session.state(), SceneState::Error);
}

#[tokio::test]
async fn edits_rerender_and_respect_budgets() {
    let mut session = SceneSession::new(config());
    session.load(&card_snapshot(), &loader()).await.unwrap();

    let edit = session.set_text("greeting", "Happy birthday").unwrap();
    assert_eq!(edit.value, "Happy bi");
    assert!(edit.truncated);
    assert_eq!(session.state(), SceneState::Editing);

    assert!(matches!(
        session.set_text("photo", "x"),
        Err(SceneError::WrongKind { actual: ObjectKind::ImageFrame, .. })
    ));
    assert!(matches!(session.select(Some("background")), Err(SceneError::Locked(_))));
    session.select(Some("photo")).unwrap();
    assert_eq!(session.selection(), Some("photo"));
    assert!(session.snapshot().unwrap().to_json().unwrap().find("selection").is_none());
}

#[tokio::test]
async fn rejected_upload_leaves_scene_untouched() {
    let mut session = SceneSession::new(config());
    session.load(&card_snapshot(), &loader()).await.unwrap();
    let before = session.preview().unwrap().clone();
    let images_before = session.cached_images();
    let snapshot_before = session.snapshot().unwrap();

    let err = session.assign_upload("photo", "uploads/bad.gif", b"GIF89a garbage").unwrap_err();
    assert!(matches!(err, SceneError::Decode(_)));
    assert_eq!(session.preview().unwrap().as_raw(), before.as_raw());
    assert_eq!(session.cached_images(), images_before);
    assert_eq!(session.snapshot().unwrap(), snapshot_before);
    assert_eq!(session.state(), SceneState::Ready);
}

#[tokio::test]
async fn reassignment_releases_previous_bitmap() {
    let mut session = SceneSession::new(config());
    session.load(&card_snapshot(), &loader()).await.unwrap();
    assert_eq!(session.cached_images(), 1);

    let replacement = encode_png(&RgbaImage::from_pixel(10, 10, Rgba([200, 10, 10, 255]))).unwrap();
    session.assign_upload("photo", "uploads/new.png", &replacement).unwrap();
    assert_eq!(session.cached_images(), 1);
    assert_eq!(session.regions()[0].asset_reference.as_deref(), Some("uploads/new.png"));

    session.remove_image("photo").unwrap();
    assert_eq!(session.cached_images(), 0);
    assert_eq!(session.regions()[0].asset_reference, None);

    session.teardown();
    assert_eq!(session.state(), SceneState::Uninitialized);
    assert!(session.preview().is_none());
}

#[tokio::test]
async fn export_then_edit_returns_to_editing() {
    let mut session = SceneSession::new(config());
    session.load(&card_snapshot(), &loader()).await.unwrap();

    let export = session.export().unwrap();
    assert_eq!(session.state(), SceneState::Done);
    assert_eq!(export.preview.dimensions(), (120, 80));
    assert_eq!(export.high_res.dimensions(), (240, 160));
    assert_eq!(export.regions.len(), 1);
    assert_eq!(export.regions[0].asset_reference.as_deref(), Some("uploads/kid.png"));
    assert_eq!(export.snapshot, card_snapshot());

    // Background fill is locked artwork under everything else.
    assert_eq!(*export.preview.get_pixel(115, 2), Rgba([250, 240, 230, 255]));

    session.set_text("greeting", "Hey").unwrap();
    assert_eq!(session.state(), SceneState::Editing);
}

#[tokio::test]
async fn frames_sharing_a_photo_release_independently() {
    let mut snapshot = card_snapshot();
    let mut twin = frame("photo2", Some("uploads/kid.png"));
    twin.geometry = geometry(80.0, 10.0, 30.0, 30.0, 0.0);
    snapshot.objects.insert(2, twin);

    let mut session = SceneSession::new(config());
    session.load(&snapshot, &loader()).await.unwrap();
    assert_eq!(session.cached_images(), 2);

    session.remove_image("photo").unwrap();
    assert_eq!(session.cached_images(), 1);
    assert_eq!(*session.preview().unwrap().get_pixel(95, 25), Rgba([30, 140, 60, 255]));
    let regions: Vec<_> = session
        .regions()
        .iter()
        .map(|r| (r.id.as_str(), r.asset_reference.as_deref()))
        .collect();
    assert_eq!(regions, vec![("photo", None), ("photo2", Some("uploads/kid.png"))]);

    let replacement = encode_png(&RgbaImage::from_pixel(10, 10, Rgba([200, 10, 10, 255]))).unwrap();
    session.assign_upload("photo2", "uploads/new.png", &replacement).unwrap();
    assert_eq!(session.cached_images(), 1);
    assert_eq!(*session.preview().unwrap().get_pixel(95, 25), Rgba([200, 10, 10, 255]));
}

#[tokio::test]
async fn text_edit_redraws_the_field() {
    let mut session = SceneSession::new(config());
    session.load(&card_snapshot(), &loader()).await.unwrap();
    let before = region_pixels(&session, 10, 60, 100, 15);
    // The greeting sits on the background fill; the loaded font puts ink on it.
    assert!(before.chunks(4).any(|p| p != [250, 240, 230, 255]));

    session.set_text("greeting", "Hey").unwrap();
    let after = region_pixels(&session, 10, 60, 100, 15);
    assert_ne!(before, after);
    assert!(session.warnings().is_empty());

    // Pixels outside the field are untouched by the edit.
    assert_eq!(*session.preview().unwrap().get_pixel(115, 2), Rgba([250, 240, 230, 255]));
}

#[tokio::test]
async fn text_without_any_font_is_reported() {
    let mut session = SceneSession::new(EngineConfig::default());
    session.load(&card_snapshot(), &loader()).await.unwrap();
    assert_eq!(
        session.warnings(),
        &[SceneWarning::TextUnrendered {
            object_id: "greeting".to_string()
        }]
    );
}
