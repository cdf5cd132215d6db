//! Validation System - Rule/Policy Separation
//!
//! Rules produce structured violations about a layout (and, when supplied,
//! its base artwork). Policy maps violations to a verdict.

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::geometry::Point;
use crate::layout::{LayoutBase, SlotDef};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    #[default]
    Block,
    Warn,
    Log,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationViolation {
    pub rule: String,
    pub severity: ViolationSeverity,
    pub message: String,
    pub slot_id: Option<String>,
    pub expected: Option<String>,
    pub actual: Option<String>,
    pub remediation: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub violations: Vec<ValidationViolation>,
    pub layout_id: String,
}

impl ValidationResult {
    pub fn success(layout: &LayoutBase) -> Self {
        Self {
            valid: true,
            violations: vec![],
            layout_id: layout.id.clone(),
        }
    }

    pub fn failure(layout: &LayoutBase, violations: Vec<ValidationViolation>) -> Self {
        Self {
            valid: false,
            violations,
            layout_id: layout.id.clone(),
        }
    }

    pub fn has_errors(&self) -> bool {
        self.violations.iter().any(|v| v.severity == ViolationSeverity::Error)
    }
}

/// What a rule inspects.
pub struct LayoutInput<'a> {
    pub layout: &'a LayoutBase,
    pub base_artwork: Option<&'a RgbaImage>,
}

/// Validation rule trait - produces violations
pub trait ValidationRule {
    fn name(&self) -> &'static str;
    fn validate(&self, input: &LayoutInput<'_>) -> Vec<ValidationViolation>;
}

// --- Concrete Rules ---

pub struct DimensionsRule;

impl ValidationRule for DimensionsRule {
    fn name(&self) -> &'static str { "dimensions" }

    fn validate(&self, input: &LayoutInput<'_>) -> Vec<ValidationViolation> {
        let layout = input.layout;
        if layout.has_valid_dimensions() {
            return vec![];
        }
        vec![ValidationViolation {
            rule: self.name().to_string(),
            severity: ViolationSeverity::Error,
            message: "Print area must have positive width and height".to_string(),
            slot_id: None,
            expected: Some("> 0 x > 0".to_string()),
            actual: Some(format!(
                "{}x{}",
                layout.print_area_width_px, layout.print_area_height_px
            )),
            remediation: vec!["Fix printAreaWidthPx / printAreaHeightPx".to_string()],
        }]
    }
}

pub struct SlotBoundsRule;

impl ValidationRule for SlotBoundsRule {
    fn name(&self) -> &'static str { "slot_bounds" }

    fn validate(&self, input: &LayoutInput<'_>) -> Vec<ValidationViolation> {
        let mut violations = vec![];
        for slot in &input.layout.slots {
            let pct = slot.percentages();
            let in_range = pct.iter().all(|v| v.is_finite() && (0.0..=100.0).contains(v))
                && slot.rotation_deg.is_finite();
            if !in_range {
                violations.push(ValidationViolation {
                    rule: self.name().to_string(),
                    severity: ViolationSeverity::Error,
                    message: "Slot percentages must be within 0..=100".to_string(),
                    slot_id: Some(slot.id.clone()),
                    expected: Some("0..=100".to_string()),
                    actual: Some(format!("{:?}", pct)),
                    remediation: vec!["Re-author the slot geometry".to_string()],
                });
                continue;
            }
            if slot.x_pct + slot.width_pct > 100.0 || slot.y_pct + slot.height_pct > 100.0 {
                violations.push(ValidationViolation {
                    rule: self.name().to_string(),
                    severity: ViolationSeverity::Warning,
                    message: "Slot extends past the print area".to_string(),
                    slot_id: Some(slot.id.clone()),
                    expected: Some("x + width <= 100, y + height <= 100".to_string()),
                    actual: Some(format!(
                        "x + width = {}, y + height = {}",
                        slot.x_pct + slot.width_pct,
                        slot.y_pct + slot.height_pct
                    )),
                    remediation: vec!["Shrink or move the slot inside the print area".to_string()],
                });
            }
        }
        violations
    }
}

pub struct UniqueSlotIdsRule;

impl ValidationRule for UniqueSlotIdsRule {
    fn name(&self) -> &'static str { "unique_slot_ids" }

    fn validate(&self, input: &LayoutInput<'_>) -> Vec<ValidationViolation> {
        let mut seen = HashSet::new();
        input
            .layout
            .slots
            .iter()
            .filter(|s| !seen.insert(s.id.as_str()))
            .map(|s| ValidationViolation {
                rule: self.name().to_string(),
                severity: ViolationSeverity::Error,
                message: "Duplicate slot id".to_string(),
                slot_id: Some(s.id.clone()),
                expected: Some("unique ids".to_string()),
                actual: Some(s.id.clone()),
                remediation: vec!["Rename one of the slots".to_string()],
            })
            .collect()
    }
}

/// Base artwork must be (at least partly) transparent where slots sit,
/// otherwise the photo painted underneath is never visible.
pub struct CutoutAlignmentRule;

impl CutoutAlignmentRule {
    /// Alpha at or below which a base pixel counts as a cut-out.
    const CUTOUT_ALPHA: u8 = 16;

    fn sample_points(layout: &LayoutBase, slot: &SlotDef, base: &RgbaImage) -> Vec<Point> {
        let sx = base.width() as f64 / layout.width();
        let sy = base.height() as f64 / layout.height();
        let rect = slot.rect_on(layout.width(), layout.height());
        let c = rect.center();
        let (dx, dy) = (rect.width / 4.0, rect.height / 4.0);
        [
            c,
            Point::new(c.x - dx, c.y),
            Point::new(c.x + dx, c.y),
            Point::new(c.x, c.y - dy),
            Point::new(c.x, c.y + dy),
        ]
        .into_iter()
        .map(|p| Point::new(p.x * sx, p.y * sy))
        .collect()
    }
}

impl ValidationRule for CutoutAlignmentRule {
    fn name(&self) -> &'static str { "cutout_alignment" }

    fn validate(&self, input: &LayoutInput<'_>) -> Vec<ValidationViolation> {
        let Some(base) = input.base_artwork else {
            return vec![];
        };
        let layout = input.layout;
        if !layout.has_valid_dimensions() || base.width() == 0 || base.height() == 0 {
            return vec![];
        }

        let mut violations = vec![];
        for slot in &layout.slots {
            let points = Self::sample_points(layout, slot, base);
            let opaque = points
                .iter()
                .filter(|p| {
                    let x = (p.x.floor().max(0.0) as u32).min(base.width() - 1);
                    let y = (p.y.floor().max(0.0) as u32).min(base.height() - 1);
                    base.get_pixel(x, y).0[3] > Self::CUTOUT_ALPHA
                })
                .count();
            if opaque == points.len() {
                violations.push(ValidationViolation {
                    rule: self.name().to_string(),
                    severity: ViolationSeverity::Warning,
                    message: "Base artwork has no transparent cut-out over this slot".to_string(),
                    slot_id: Some(slot.id.clone()),
                    expected: Some("transparent pixels inside the slot".to_string()),
                    actual: Some(format!("{}/{} sample points opaque", opaque, points.len())),
                    remediation: vec![
                        "Export the base artwork with a transparent hole at the slot position".to_string(),
                    ],
                });
            }
        }
        violations
    }
}

/// Validator orchestrates rules and applies policy
pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(DimensionsRule),
                Box::new(SlotBoundsRule),
                Box::new(UniqueSlotIdsRule),
                Box::new(CutoutAlignmentRule),
            ],
        }
    }

    pub fn validate(&self, input: &LayoutInput<'_>, failure_mode: &FailureMode) -> ValidationResult {
        let mut all_violations = vec![];

        for rule in &self.rules {
            all_violations.extend(rule.validate(input));
        }

        for v in &all_violations {
            log::debug!("Layout {} {}: {} ({:?})", input.layout.id, v.rule, v.message, v.slot_id);
        }

        let has_errors = all_violations
            .iter()
            .any(|v| v.severity == ViolationSeverity::Error);

        match failure_mode {
            FailureMode::Block if has_errors => ValidationResult::failure(input.layout, all_violations),
            FailureMode::Block => {
                // Warnings don't block, but they are still reported
                ValidationResult {
                    valid: true,
                    violations: all_violations,
                    layout_id: input.layout.id.clone(),
                }
            }
            FailureMode::Warn | FailureMode::Log => {
                if has_errors && *failure_mode == FailureMode::Warn {
                    log::warn!("Layout {} has blocking violations, continuing", input.layout.id);
                }
                ValidationResult {
                    valid: true,
                    violations: all_violations,
                    layout_id: input.layout.id.clone(),
                }
            }
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}
