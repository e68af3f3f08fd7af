//! Legacy row/column dashboard layouts
//!
//! ```text
//! {"columns": 4, "layout": ["light.kitchen(2x1), sensor.temp", {"empty": 1}, "spacer, clock"]}
//! ```
//!
//! Each row is walked left to right with a column cursor. Tokens become raw
//! widget objects that go through the normal widget parser afterwards.

use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::OnceLock;
use tracing::debug;

const DEFAULT_DIMENSIONS: [i64; 2] = [120, 120];
const DEFAULT_MARGINS: [i64; 2] = [5, 5];
const DEFAULT_SIZE: [i64; 2] = [1, 1];

fn size_suffix() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(\s*(-?\d+)\s*x\s*(-?\d+)\s*\)").ok())
        .as_ref()
}

/// Result of expanding a dashboard layout
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedLayout {
    /// Grid metadata for `ui.grid`
    pub grid: Value,
    /// Raw widget objects in row-major order
    pub widgets: Vec<Value>,
}

fn lookup<'a>(dash: &'a Map<String, Value>, ui: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|k| dash.get(*k).filter(|v| !v.is_null()))
        .or_else(|| keys.iter().find_map(|k| ui.get(*k).filter(|v| !v.is_null())))
}

fn pair_or(v: Option<&Value>, default: [i64; 2]) -> Value {
    match v {
        Some(Value::Array(a)) if !a.is_empty() => Value::Array(a.clone()),
        _ => json!(default),
    }
}

fn default_size(v: &Value) -> (i64, i64) {
    let get = |i: usize| v.get(i).and_then(Value::as_i64).unwrap_or(1);
    (get(0), get(1))
}

/// Split `name(WxH)` into the trimmed name and its size
fn parse_token(token: &str, default: (i64, i64)) -> (String, (i64, i64)) {
    let size = size_suffix()
        .and_then(|re| re.captures(token))
        .and_then(|c| Some((c[1].parse().ok()?, c[2].parse().ok()?)))
        .unwrap_or(default);
    let name = match token.find('(') {
        Some(i) => &token[..i],
        None => token,
    };
    (name.trim().to_string(), size)
}

fn token_widget(name: &str, x: i64, y: i64, (w, h): (i64, i64)) -> Option<Value> {
    let id = format!("g:{},{}:{}", x, y, name);
    if name.eq_ignore_ascii_case("clock") {
        return Some(json!({"id": id, "type": "clock", "label": name, "x": x, "y": y, "w": w, "h": h}));
    }
    if !name.contains('.') {
        debug!("layout: dropping unknown token '{}'", name);
        return None;
    }
    Some(json!({"id": id, "entity_id": name, "label": name, "x": x, "y": y, "w": w, "h": h}))
}

/// Expand a dashboard layout found in `dash` (falling back to `ui` for each
/// key). Returns None when there is no positive column count or no row list.
pub fn expand(dash: &Map<String, Value>, ui: &Map<String, Value>) -> Option<ExpandedLayout> {
    let columns = lookup(dash, ui, &["columns", "cols"])
        .and_then(Value::as_i64)
        .filter(|c| *c > 0)?;
    let rows = lookup(dash, ui, &["layout"]).and_then(Value::as_array)?;

    let size = pair_or(lookup(dash, ui, &["widget_size"]), DEFAULT_SIZE);
    let grid = json!({
        "columns": columns,
        "widget_dimensions": pair_or(lookup(dash, ui, &["widget_dimensions"]), DEFAULT_DIMENSIONS),
        "widget_margins": pair_or(lookup(dash, ui, &["widget_margins"]), DEFAULT_MARGINS),
        "widget_size": size,
    });
    let default = default_size(&size);

    let mut widgets = Vec::new();
    let mut y = 0i64;
    for row in rows {
        let tokens: Vec<Option<&str>> = match row {
            Value::String(s) => s.split(',').map(|t| Some(t.trim())).collect(),
            Value::Array(items) => items.iter().map(|t| t.as_str().map(str::trim)).collect(),
            Value::Object(o) if o.contains_key("empty") => {
                let skip = o.get("empty").and_then(Value::as_i64).unwrap_or(1);
                y = y.saturating_add(skip.max(0));
                continue;
            }
            _ => {
                y += 1;
                continue;
            }
        };

        let mut x = 0i64;
        for token in tokens {
            let token = match token {
                Some(t) if !t.is_empty() && !t.eq_ignore_ascii_case("spacer") => t,
                _ => {
                    x += 1;
                    continue;
                }
            };
            let (name, (w, h)) = parse_token(token, default);
            if let Some(widget) = token_widget(&name, x, y, (w, h)) {
                widgets.push(widget);
            }
            x = x.saturating_add(w.max(1));
        }
        y += 1;
    }

    Some(ExpandedLayout { grid, widgets })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_cursor_walk() {
        let dash = obj(json!({
            "columns": 4,
            "layout": [
                "light.kitchen(2x1), sensor.temp",
                {"empty": 2},
                ["spacer", "", "clock"],
                "weather, switch.fan(1x2)"
            ]
        }));
        let out = expand(&dash, &Map::new()).unwrap();
        let coords: Vec<(String, i64, i64, i64, i64)> = out
            .widgets
            .iter()
            .map(|w| {
                (
                    w["id"].as_str().unwrap().to_string(),
                    w["x"].as_i64().unwrap(),
                    w["y"].as_i64().unwrap(),
                    w["w"].as_i64().unwrap(),
                    w["h"].as_i64().unwrap(),
                )
            })
            .collect();
        assert_eq!(
            coords,
            vec![
                ("g:0,0:light.kitchen".to_string(), 0, 0, 2, 1),
                ("g:2,0:sensor.temp".to_string(), 2, 0, 1, 1),
                ("g:2,3:clock".to_string(), 2, 3, 1, 1),
                ("g:1,4:switch.fan".to_string(), 1, 4, 1, 2),
            ]
        );
        assert_eq!(out.grid["columns"], json!(4));
        assert_eq!(out.grid["widget_dimensions"], json!([120, 120]));
    }

    #[test]
    fn test_requires_columns_and_rows() {
        assert!(expand(&obj(json!({"layout": ["light.a"]})), &Map::new()).is_none());
        assert!(expand(&obj(json!({"columns": 0, "layout": ["light.a"]})), &Map::new()).is_none());
        assert!(expand(&obj(json!({"columns": 2, "layout": "light.a"})), &Map::new()).is_none());
    }

    #[test]
    fn test_ui_fallback_and_custom_size() {
        let ui = obj(json!({"columns": 3, "widget_size": [2, 1]}));
        let dash = obj(json!({"layout": ["light.a, light.b"]}));
        let out = expand(&dash, &ui).unwrap();
        assert_eq!(out.widgets.len(), 2);
        assert_eq!(out.widgets[1]["x"], json!(2));
        assert_eq!(out.widgets[1]["w"], json!(2));
    }

    #[test]
    fn test_parse_token() {
        assert_eq!(
            parse_token("light.a (3x2)", (1, 1)),
            ("light.a".to_string(), (3, 2))
        );
        assert_eq!(parse_token("light.a", (1, 1)), ("light.a".to_string(), (1, 1)));
        assert_eq!(
            parse_token("light.a(bad)", (1, 1)),
            ("light.a".to_string(), (1, 1))
        );
    }
}
