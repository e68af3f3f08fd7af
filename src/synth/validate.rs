//! Authoring-time layout validation

use serde_json::Value;
use tracing::warn;

use super::unwrap_profile;
use super::widget::Placement;
use crate::error::{BridgeError, Result};

fn strict_int(v: Option<&Value>, default: i64) -> Option<i64> {
    match v {
        None => Some(default),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        Some(_) => None,
    }
}

fn field<'a>(w: &'a Value, key: &str, alias: &str) -> Option<&'a Value> {
    w.get(key).or_else(|| w.get(alias))
}

/// Pairs of widget ids whose rectangles overlap, in list order.
///
/// Widgets with unreadable coordinates are left out.
pub fn find_overlaps(profile: &Value) -> Vec<(String, String)> {
    let body = unwrap_profile(profile);
    let widgets = body
        .get("widgets")
        .and_then(Value::as_array)
        .or_else(|| body.get("ui").and_then(|ui| ui.get("widgets")).and_then(Value::as_array));
    let Some(widgets) = widgets else {
        return Vec::new();
    };

    let mut placed: Vec<(String, Placement)> = Vec::new();
    for w in widgets.iter().filter(|w| w.is_object()) {
        let (Some(x), Some(y), Some(wc), Some(hc)) = (
            strict_int(field(w, "x", "col"), 0),
            strict_int(field(w, "y", "row"), 0),
            strict_int(field(w, "w", "colspan"), 1),
            strict_int(field(w, "h", "rowspan"), 1),
        ) else {
            continue;
        };
        let id = ["id", "entity_id", "entity"]
            .iter()
            .filter_map(|k| w.get(*k).and_then(Value::as_str))
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(String::from)
            .unwrap_or_else(|| format!("idx:{}", placed.len()));
        placed.push((
            id,
            Placement::bounded(x, y, wc, hc),
        ));
    }

    let mut pairs = Vec::new();
    for (i, (a_id, a)) in placed.iter().enumerate() {
        for (b_id, b) in &placed[i + 1..] {
            if a.overlaps(b) {
                pairs.push((a_id.clone(), b_id.clone()));
            }
        }
    }
    pairs
}

/// Reject a profile whose widgets overlap
pub fn validate_layout(profile: &Value) -> Result<()> {
    let pairs = find_overlaps(profile);
    if pairs.is_empty() {
        return Ok(());
    }
    warn!("layout validation: overlapping widgets {:?}", pairs);
    Err(BridgeError::Overlap {
        pairs: pairs
            .into_iter()
            .map(|(a, b)| format!("{} ↔ {}", a, b))
            .collect(),
    })
}
