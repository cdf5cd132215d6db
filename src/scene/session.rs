//! Editing session: owns the live objects, the bitmap arena and the font
//! cache for one scene, and guards every async result with its run id.

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::assets::{self, AssetLoader, RunId, TaggedLoad};
use crate::compositor::{RegionDescriptor, RenderOptions};
use crate::config::EngineConfig;
use crate::error::AssetLoadError;
use crate::layout::SlotImageAssignment;
use crate::raster;

use super::cache::{FontCache, ImageCache};
use super::object::{Drawable, FrameImage, ImageFrame, ObjectKind, SceneObject, TextField};
use super::render::{self, SceneRender};
use super::snapshot::SceneSnapshot;
use super::SceneError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneState {
    Uninitialized,
    Loading,
    Ready,
    Editing,
    Exporting,
    Done,
    Error,
}

impl SceneState {
    fn accepts_edits(self) -> bool {
        matches!(self, Self::Ready | Self::Editing | Self::Done)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum AssetPurpose {
    Font,
    Decoration,
    Photo,
}

/// What the host must fetch before the scene can render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadPlan {
    pub run_id: RunId,
    pub references: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Applied,
    /// The results belonged to an earlier run and were dropped.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SceneWarning {
    PhotoUnavailable { object_id: String, reference: String, reason: String },
    TextTruncated { object_id: String, max_chars: usize },
    /// The field has a value but no font was loaded for it, so nothing is drawn.
    TextUnrendered { object_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    pub value: String,
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub struct SceneExport {
    pub preview: RgbaImage,
    pub high_res: RgbaImage,
    pub snapshot: SceneSnapshot,
    pub regions: Vec<RegionDescriptor>,
}

pub struct SceneSession {
    config: EngineConfig,
    state: SceneState,
    run_id: RunId,
    layout_id: String,
    width_px: u32,
    height_px: u32,
    objects: Vec<SceneObject>,
    images: ImageCache,
    fonts: FontCache,
    pending: Vec<(String, AssetPurpose)>,
    preview: Option<RgbaImage>,
    regions: Vec<RegionDescriptor>,
    warnings: Vec<SceneWarning>,
    selection: Option<String>,
}

impl SceneSession {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            state: SceneState::Uninitialized,
            run_id: 0,
            layout_id: String::new(),
            width_px: 0,
            height_px: 0,
            objects: Vec::new(),
            images: ImageCache::new(),
            fonts: FontCache::new(),
            pending: Vec::new(),
            preview: None,
            regions: Vec::new(),
            warnings: Vec::new(),
            selection: None,
        }
    }

    pub fn state(&self) -> SceneState {
        self.state
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn layout_id(&self) -> &str {
        &self.layout_id
    }

    pub fn objects(&self) -> &[SceneObject] {
        &self.objects
    }

    pub fn object(&self, id: &str) -> Option<&SceneObject> {
        self.objects.iter().find(|o| o.id == id)
    }

    pub fn preview(&self) -> Option<&RgbaImage> {
        self.preview.as_ref()
    }

    pub fn regions(&self) -> &[RegionDescriptor] {
        &self.regions
    }

    pub fn warnings(&self) -> &[SceneWarning] {
        &self.warnings
    }

    pub fn cached_images(&self) -> usize {
        self.images.len()
    }

    pub fn cached_fonts(&self) -> usize {
        self.fonts.len()
    }

    /// Release every session resource and invalidate in-flight loads.
    pub fn teardown(&mut self) {
        self.images.clear();
        self.fonts.clear();
        self.objects.clear();
        self.pending.clear();
        self.preview = None;
        self.regions.clear();
        self.warnings.clear();
        self.selection = None;
        self.run_id = self.run_id.wrapping_add(1);
        self.state = SceneState::Uninitialized;
        log::debug!("Scene torn down, run id now {}", self.run_id);
    }

    /// Replace the scene with `snapshot` and return the assets to fetch.
    /// Results must come back through [`complete_load`](Self::complete_load)
    /// tagged with the returned run id.
    pub fn begin_load(&mut self, snapshot: &SceneSnapshot) -> Result<LoadPlan, SceneError> {
        self.teardown();
        let (objects, truncations) = match snapshot.resolve() {
            Ok(resolved) => resolved,
            Err(e) => {
                self.state = SceneState::Error;
                return Err(e);
            }
        };

        self.layout_id = snapshot.layout_id.clone();
        self.width_px = snapshot.width_px;
        self.height_px = snapshot.height_px;
        self.objects = objects;
        self.warnings = truncations
            .into_iter()
            .map(|t| SceneWarning::TextTruncated {
                object_id: t.object_id,
                max_chars: t.max_chars,
            })
            .collect();

        let mut pending: Vec<(String, AssetPurpose)> = Vec::new();
        let mut want = |reference: &str, purpose: AssetPurpose| {
            if !pending.iter().any(|(r, p)| r == reference && *p == purpose) {
                pending.push((reference.to_string(), purpose));
            }
        };
        if let Some(font) = &self.config.render.label_font_ref {
            want(font.as_str(), AssetPurpose::Font);
        }
        for object in &self.objects {
            match &object.drawable {
                Drawable::Decoration(d) => {
                    if let Some(r) = &d.asset_ref {
                        want(r.as_str(), AssetPurpose::Decoration);
                    }
                }
                Drawable::ImageFrame(f) => {
                    if let Some(image) = &f.image {
                        want(image.assignment.source_image_ref.as_str(), AssetPurpose::Photo);
                    }
                }
                Drawable::TextField(t) => {
                    if let Some(r) = &t.style.font_ref {
                        want(r.as_str(), AssetPurpose::Font);
                    }
                }
            }
        }
        self.pending = pending;

        let mut references: Vec<String> = Vec::new();
        for (reference, _) in &self.pending {
            if !references.contains(reference) {
                references.push(reference.clone());
            }
        }

        self.state = SceneState::Loading;
        log::info!(
            "Loading scene for layout {} (run {}, {} objects, {} assets)",
            self.layout_id,
            self.run_id,
            self.objects.len(),
            references.len()
        );
        Ok(LoadPlan {
            run_id: self.run_id,
            references,
        })
    }

    /// Apply the results of a [`LoadPlan`]. Results from any other run are
    /// discarded without touching the scene.
    pub fn complete_load(&mut self, run_id: RunId, loads: Vec<TaggedLoad>) -> Result<LoadStatus, SceneError> {
        if self.state != SceneState::Loading || run_id != self.run_id {
            log::warn!(
                "Discarding {} load results from run {} (current run {}, state {:?})",
                loads.len(),
                run_id,
                self.run_id,
                self.state
            );
            return Ok(LoadStatus::Stale);
        }

        let mut arrived: HashMap<String, TaggedLoad> = HashMap::new();
        for load in loads {
            if load.is_current(self.run_id) {
                arrived.insert(load.reference.clone(), load);
            } else {
                log::warn!("Dropping stale result for {} from run {}", load.reference, load.run_id);
            }
        }

        let pending = std::mem::take(&mut self.pending);
        for (reference, purpose) in pending {
            let bytes = match arrived.get(&reference) {
                Some(load) => load.clone().into_bytes(),
                None => Err(AssetLoadError::Failed {
                    reference: reference.clone(),
                    reason: "no result delivered".into(),
                }),
            };
            if let Err(e) = self.apply_asset(&reference, purpose, bytes) {
                log::error!("Scene load for layout {} failed: {}", self.layout_id, e);
                self.state = SceneState::Error;
                return Err(e.into());
            }
        }

        self.state = SceneState::Ready;
        self.rerender()?;
        Ok(LoadStatus::Applied)
    }

    /// Fonts and decorations are required; a photo that fails degrades its
    /// frame to the placeholder.
    fn apply_asset(
        &mut self,
        reference: &str,
        purpose: AssetPurpose,
        bytes: Result<Vec<u8>, AssetLoadError>,
    ) -> Result<(), AssetLoadError> {
        match purpose {
            AssetPurpose::Font => self.fonts.insert_bytes(reference, bytes?),
            AssetPurpose::Decoration => {
                let image = raster::decode_image(&bytes?, &self.config.decode).map_err(|e| AssetLoadError::Failed {
                    reference: reference.to_string(),
                    reason: e.to_string(),
                })?;
                let image = Arc::new(image);
                for object in &mut self.objects {
                    if let Drawable::Decoration(d) = &mut object.drawable {
                        if d.asset_ref.as_deref() == Some(reference) {
                            d.handle = Some(self.images.insert(Arc::clone(&image)));
                        }
                    }
                }
                Ok(())
            }
            AssetPurpose::Photo => {
                let decoded = bytes.and_then(|b| {
                    raster::decode_image(&b, &self.config.decode).map_err(|e| AssetLoadError::Failed {
                        reference: reference.to_string(),
                        reason: e.to_string(),
                    })
                });
                match decoded {
                    Ok(image) => {
                        // One arena entry per frame; frames sharing a reference share pixels, not handles.
                        let image = Arc::new(image);
                        let images = &mut self.images;
                        for_each_frame_with(&mut self.objects, reference, |frame| {
                            frame.handle = Some(images.insert(Arc::clone(&image)));
                        });
                    }
                    Err(e) => {
                        log::warn!("Photo {} unavailable, frame shows placeholder: {}", reference, e);
                        let ids: Vec<String> = self
                            .objects
                            .iter()
                            .filter(|o| {
                                o.as_frame()
                                    .and_then(|f| f.image.as_ref())
                                    .is_some_and(|i| i.assignment.source_image_ref == reference)
                            })
                            .map(|o| o.id.clone())
                            .collect();
                        for object_id in ids {
                            self.warnings.push(SceneWarning::PhotoUnavailable {
                                object_id,
                                reference: reference.to_string(),
                                reason: e.to_string(),
                            });
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Fetch every asset of `snapshot` through `loader` and apply the results.
    pub async fn load<L: AssetLoader>(&mut self, snapshot: &SceneSnapshot, loader: &L) -> Result<LoadStatus, SceneError> {
        let plan = self.begin_load(snapshot)?;
        let timeout = Duration::from_millis(self.config.loading.timeout_ms);
        let results = assets::load_all(loader, &plan.references, plan.run_id, timeout).await;
        self.complete_load(plan.run_id, results)
    }

    pub fn select(&mut self, id: Option<&str>) -> Result<(), SceneError> {
        let Some(id) = id else {
            self.selection = None;
            return Ok(());
        };
        let object = self.find(id)?;
        if !object.is_editable() {
            return Err(SceneError::Locked(id.to_string()));
        }
        self.selection = Some(id.to_string());
        Ok(())
    }

    pub fn selection(&self) -> Option<&str> {
        self.selection.as_deref()
    }

    /// Replace a text field's value, cut to its character budget.
    pub fn set_text(&mut self, id: &str, value: &str) -> Result<TextEdit, SceneError> {
        self.require_editable("set_text")?;
        let field = self.text_mut(id)?;
        let (stored, truncated) = TextField::clip(value, field.max_chars);
        field.value = stored.clone();
        self.edited()?;
        Ok(TextEdit {
            value: stored,
            truncated,
        })
    }

    /// Bind already-decoded pixels to a frame, releasing any previous bitmap.
    pub fn assign_image(
        &mut self,
        id: &str,
        assignment: SlotImageAssignment,
        image: Arc<RgbaImage>,
    ) -> Result<(), SceneError> {
        self.require_editable("assign_image")?;
        self.index_of(id, ObjectKind::ImageFrame)?;
        let handle = self.images.insert(image);
        let previous = match self.frame_mut(id) {
            Ok(frame) => frame.image.replace(FrameImage {
                assignment,
                handle: Some(handle),
            }),
            Err(e) => {
                self.images.release(handle);
                return Err(e);
            }
        };
        if let Some(old) = previous.and_then(|p| p.handle) {
            self.images.release(old);
        }
        self.edited()
    }

    /// Decode an upload and bind it to a frame. Undecodable bytes leave the
    /// scene exactly as it was.
    pub fn assign_upload(&mut self, id: &str, source_image_ref: &str, bytes: &[u8]) -> Result<(), SceneError> {
        self.require_editable("assign_upload")?;
        self.index_of(id, ObjectKind::ImageFrame)?;
        let image = raster::decode_image(bytes, &self.config.decode)?;
        let assignment = SlotImageAssignment {
            slot_id: id.to_string(),
            source_image_ref: source_image_ref.to_string(),
            natural_width: image.width(),
            natural_height: image.height(),
        };
        self.assign_image(id, assignment, Arc::new(image))
    }

    /// Apply a photo fetched asynchronously for `id`, unless it belongs to a
    /// run that has since been torn down.
    pub fn apply_image_load(&mut self, id: &str, load: TaggedLoad) -> Result<LoadStatus, SceneError> {
        if !load.is_current(self.run_id) {
            log::warn!(
                "Discarding photo {} for {} from run {} (current run {})",
                load.reference,
                id,
                load.run_id,
                self.run_id
            );
            return Ok(LoadStatus::Stale);
        }
        let reference = load.reference.clone();
        let bytes = load.into_bytes()?;
        self.assign_upload(id, &reference, &bytes)?;
        Ok(LoadStatus::Applied)
    }

    pub fn remove_image(&mut self, id: &str) -> Result<(), SceneError> {
        self.require_editable("remove_image")?;
        let removed = self.frame_mut(id)?.image.take();
        if let Some(old) = removed.and_then(|i| i.handle) {
            self.images.release(old);
        }
        self.edited()
    }

    pub fn snapshot(&self) -> Result<SceneSnapshot, SceneError> {
        if matches!(self.state, SceneState::Uninitialized | SceneState::Error) {
            return Err(self.invalid_state("snapshot"));
        }
        Ok(SceneSnapshot::from_objects(
            &self.layout_id,
            self.width_px,
            self.height_px,
            &self.objects,
        ))
    }

    /// Render the preview and supersampled rasters and capture the snapshot.
    pub fn export(&mut self) -> Result<SceneExport, SceneError> {
        self.require_editable("export")?;
        let resume = self.state;
        self.state = SceneState::Exporting;

        let result = self.render_export();
        self.state = if result.is_ok() { SceneState::Done } else { resume };
        let (preview, high_res) = result?;

        log::info!(
            "Exported scene for layout {} ({}x{} preview, {}x{} high-res)",
            self.layout_id,
            preview.image.width(),
            preview.image.height(),
            high_res.image.width(),
            high_res.image.height()
        );
        Ok(SceneExport {
            regions: preview.regions,
            preview: preview.image,
            high_res: high_res.image,
            snapshot: SceneSnapshot::from_objects(&self.layout_id, self.width_px, self.height_px, &self.objects),
        })
    }

    fn render_export(&self) -> Result<(SceneRender, SceneRender), SceneError> {
        let preview = self.render_at(false)?;
        let high_res = self.render_at(true)?;
        Ok((preview, high_res))
    }

    fn render_at(&self, export: bool) -> Result<SceneRender, SceneError> {
        let render_config = &self.config.render;
        let label_font = render_config
            .label_font_ref
            .as_deref()
            .and_then(|r| self.fonts.get(r));
        let options = if export {
            RenderOptions::export(render_config, &self.config.decode)
        } else {
            RenderOptions::preview(render_config, &self.config.decode)
        }
        .with_label_font(label_font);
        render::render_scene(
            &self.objects,
            &self.images,
            &self.fonts,
            self.width_px,
            self.height_px,
            &options,
        )
    }

    fn rerender(&mut self) -> Result<(), SceneError> {
        let rendered = self.render_at(false)?;
        self.warnings
            .retain(|w| !matches!(w, SceneWarning::TextUnrendered { .. }));
        self.warnings.extend(
            rendered
                .unfonted
                .into_iter()
                .map(|object_id| SceneWarning::TextUnrendered { object_id }),
        );
        self.preview = Some(rendered.image);
        self.regions = rendered.regions;
        Ok(())
    }

    fn edited(&mut self) -> Result<(), SceneError> {
        self.state = SceneState::Editing;
        self.rerender()
    }

    fn require_editable(&self, operation: &'static str) -> Result<(), SceneError> {
        if self.state.accepts_edits() {
            Ok(())
        } else {
            Err(self.invalid_state(operation))
        }
    }

    fn invalid_state(&self, operation: &'static str) -> SceneError {
        SceneError::InvalidState {
            operation,
            state: self.state,
        }
    }

    fn find(&self, id: &str) -> Result<&SceneObject, SceneError> {
        self.object(id)
            .ok_or_else(|| SceneError::UnknownObject(id.to_string()))
    }

    fn index_of(&self, id: &str, expected: ObjectKind) -> Result<usize, SceneError> {
        let index = self
            .objects
            .iter()
            .position(|o| o.id == id)
            .ok_or_else(|| SceneError::UnknownObject(id.to_string()))?;
        let actual = self.objects[index].kind();
        if actual != expected {
            return Err(SceneError::WrongKind {
                id: id.to_string(),
                expected,
                actual,
            });
        }
        Ok(index)
    }

    fn drawable_mut(&mut self, id: &str, expected: ObjectKind) -> Result<&mut Drawable, SceneError> {
        let index = self.index_of(id, expected)?;
        Ok(&mut self.objects[index].drawable)
    }

    fn frame_mut(&mut self, id: &str) -> Result<&mut ImageFrame, SceneError> {
        match self.drawable_mut(id, ObjectKind::ImageFrame)? {
            Drawable::ImageFrame(frame) => Ok(frame),
            other => Err(SceneError::WrongKind {
                id: id.to_string(),
                expected: ObjectKind::ImageFrame,
                actual: other.kind(),
            }),
        }
    }

    fn text_mut(&mut self, id: &str) -> Result<&mut TextField, SceneError> {
        match self.drawable_mut(id, ObjectKind::TextField)? {
            Drawable::TextField(field) => Ok(field),
            other => Err(SceneError::WrongKind {
                id: id.to_string(),
                expected: ObjectKind::TextField,
                actual: other.kind(),
            }),
        }
    }
}

fn for_each_frame_with(objects: &mut [SceneObject], reference: &str, mut apply: impl FnMut(&mut FrameImage)) {
    for object in objects {
        if let Drawable::ImageFrame(frame) = &mut object.drawable {
            if let Some(image) = frame.image.as_mut() {
                if image.assignment.source_image_ref == reference {
                    apply(image);
                }
            }
        }
    }
}
