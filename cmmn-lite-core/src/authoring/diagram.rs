use std::fmt::Write;

use anyhow::Result;

use crate::model::{CaseModel, PlanItemDefinition, PlanItemDefinitionType};

// ── Layout constants ──

const ITEM_W: f64 = 170.0;
const ITEM_H: f64 = 50.0;
const GAP: f64 = 14.0;
const STAGE_PAD: f64 = 16.0;
const STAGE_HEADER: f64 = 26.0;
const CANVAS_PAD: f64 = 24.0;

/// Render a case model as an SVG diagram.
///
/// ## Shape policy
/// - Human task: rounded rectangle. Milestone: capsule. User event
///   listener: circle badge next to its label. Stage: plain rectangle
///   enclosing its children.
/// - Items with entry criteria get a diamond on the left border (the
///   sentry decorator).
///
/// ## Determinism
/// Layout follows declaration order and depends only on the model shape —
/// identical models produce byte-identical SVG.
pub fn model_to_svg(model: &CaseModel) -> Result<String> {
    let height = stack_height(model, None) + STAGE_HEADER + 2.0 * CANVAS_PAD;
    let width = ITEM_W + tree_depth(model, None) as f64 * 2.0 * STAGE_PAD + 2.0 * CANVAS_PAD;

    let mut svg = String::new();
    writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{:.0}" height="{:.0}" font-family="sans-serif" font-size="12">"#,
        width, height
    )?;
    let title = model.name.as_deref().unwrap_or(&model.key);
    writeln!(
        svg,
        r#"  <text x="{:.0}" y="{:.0}" font-weight="bold">{}</text>"#,
        CANVAS_PAD,
        CANVAS_PAD - 6.0,
        xml_escape(title)
    )?;
    // Case plan boundary
    writeln!(
        svg,
        r##"  <rect x="{:.0}" y="{:.0}" width="{:.0}" height="{:.0}" fill="none" stroke="#888" stroke-dasharray="6 3" />"##,
        CANVAS_PAD - 8.0,
        CANVAS_PAD,
        width - 2.0 * CANVAS_PAD + 16.0,
        height - 2.0 * CANVAS_PAD
    )?;

    let mut y = CANVAS_PAD + STAGE_HEADER;
    for item in model.direct_children(None) {
        y += write_item(&mut svg, model, item, CANVAS_PAD, y)? + GAP;
    }

    writeln!(svg, "</svg>")?;
    Ok(svg)
}

/// Renders one plan item at (x, y); returns the height consumed.
fn write_item(
    svg: &mut String,
    model: &CaseModel,
    def: &PlanItemDefinition,
    x: f64,
    y: f64,
) -> Result<f64> {
    let label = def.name.as_deref().unwrap_or(&def.id);
    let height = item_height(model, def);
    match def.definition_type {
        PlanItemDefinitionType::Stage => {
            let width = ITEM_W + (subtree_depth(model, &def.id) as f64 + 1.0) * 2.0 * STAGE_PAD;
            writeln!(
                svg,
                r##"  <rect x="{x:.0}" y="{y:.0}" width="{width:.0}" height="{height:.0}" fill="none" stroke="#444" />"##
            )?;
            writeln!(
                svg,
                r#"  <text x="{:.0}" y="{:.0}" font-style="italic">{}</text>"#,
                x + 8.0,
                y + 17.0,
                xml_escape(label)
            )?;
            let mut child_y = y + STAGE_HEADER;
            for child in model.direct_children(Some(&def.id)) {
                child_y += write_item(svg, model, child, x + STAGE_PAD, child_y)? + GAP;
            }
        }
        PlanItemDefinitionType::HumanTask => {
            writeln!(
                svg,
                r##"  <rect x="{x:.0}" y="{y:.0}" width="{ITEM_W:.0}" height="{ITEM_H:.0}" rx="8" fill="#fff" stroke="#333" />"##
            )?;
            write_label(svg, x, y, label)?;
        }
        PlanItemDefinitionType::Milestone => {
            writeln!(
                svg,
                r##"  <rect x="{x:.0}" y="{y:.0}" width="{ITEM_W:.0}" height="{ITEM_H:.0}" rx="24" fill="#fff" stroke="#333" />"##
            )?;
            write_label(svg, x, y, label)?;
        }
        PlanItemDefinitionType::UserEventListener => {
            writeln!(
                svg,
                r##"  <circle cx="{:.0}" cy="{:.0}" r="14" fill="#fff" stroke="#333" />"##,
                x + 18.0,
                y + ITEM_H / 2.0
            )?;
            writeln!(
                svg,
                r#"  <text x="{:.0}" y="{:.0}">{}</text>"#,
                x + 40.0,
                y + ITEM_H / 2.0 + 4.0,
                xml_escape(label)
            )?;
        }
    }
    if !def.entry_criteria.is_empty() {
        // Sentry decorator on the left border
        let cy = y + height / 2.0;
        writeln!(
            svg,
            r##"  <polygon points="{:.0},{:.0} {:.0},{:.0} {:.0},{:.0} {:.0},{:.0}" fill="#fff" stroke="#333" />"##,
            x - 6.0, cy, x, cy - 8.0, x + 6.0, cy, x, cy + 8.0
        )?;
    }
    Ok(height)
}

fn write_label(svg: &mut String, x: f64, y: f64, label: &str) -> Result<()> {
    writeln!(
        svg,
        r#"  <text x="{:.0}" y="{:.0}" text-anchor="middle">{}</text>"#,
        x + ITEM_W / 2.0,
        y + ITEM_H / 2.0 + 4.0,
        xml_escape(label)
    )?;
    Ok(())
}

fn item_height(model: &CaseModel, def: &PlanItemDefinition) -> f64 {
    if def.definition_type == PlanItemDefinitionType::Stage {
        STAGE_HEADER + stack_height(model, Some(&def.id)) + STAGE_PAD
    } else {
        ITEM_H
    }
}

/// Total stacked height of a stage's children (no trailing gap).
fn stack_height(model: &CaseModel, stage_id: Option<&str>) -> f64 {
    let children = model.direct_children(stage_id);
    if children.is_empty() {
        return ITEM_H;
    }
    let heights: f64 = children.iter().map(|c| item_height(model, c)).sum();
    heights + GAP * (children.len() as f64 - 1.0)
}

fn tree_depth(model: &CaseModel, stage_id: Option<&str>) -> usize {
    model
        .direct_children(stage_id)
        .iter()
        .map(|c| {
            if c.definition_type == PlanItemDefinitionType::Stage {
                1 + tree_depth(model, Some(&c.id))
            } else {
                0
            }
        })
        .max()
        .unwrap_or(0)
}

fn subtree_depth(model: &CaseModel, stage_id: &str) -> usize {
    tree_depth(model, Some(stage_id))
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
