//! Typed effect parameters.
//!
//! Every effect declares a static, ordered table of `(name, ParamSpec)`
//! entries; incoming JSON is validated against that table instead of being
//! poked into attributes at runtime. Live values are a [`ParamMap`] that the
//! render loop snapshots each tick.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::{Interpolation, Rgbw};

// ── Specification ──────────────────────────────────────────────────

/// The four parameter kinds the control surface understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    /// A float in [0,1]; meaning (speed, intensity, ...) is up to the effect.
    Float,
    /// An RGB triple; the white channel is implicit.
    Color,
    /// One of a closed, ordered list of labels.
    Enum(&'static [&'static str]),
    /// An ordered list of colors, length >= 1.
    ColorList,
}

impl ParamKind {
    fn type_name(self) -> &'static str {
        match self {
            ParamKind::Float => "float",
            ParamKind::Color => "color",
            ParamKind::Enum(_) => "enum",
            ParamKind::ColorList => "color_list",
        }
    }
}

/// Declaration of a single parameter: kind, UI description and default.
#[derive(Clone, Debug)]
pub struct ParamSpec {
    pub kind: ParamKind,
    pub description: &'static str,
    pub default: ParamValue,
}

impl ParamSpec {
    pub fn float(default: f64, description: &'static str) -> Self {
        Self {
            kind: ParamKind::Float,
            description,
            default: ParamValue::Float(default),
        }
    }

    pub fn color(default: Rgbw, description: &'static str) -> Self {
        Self {
            kind: ParamKind::Color,
            description,
            default: ParamValue::Color(default),
        }
    }

    pub fn labeled(
        values: &'static [&'static str],
        default: &str,
        description: &'static str,
    ) -> Self {
        Self {
            kind: ParamKind::Enum(values),
            description,
            default: ParamValue::Enum(default.to_string()),
        }
    }

    pub fn color_list(default: Vec<Rgbw>, description: &'static str) -> Self {
        Self {
            kind: ParamKind::ColorList,
            description,
            default: ParamValue::ColorList(default),
        }
    }
}

/// An ordered parameter table, as declared by an effect.
pub type ParamTable = Vec<(&'static str, ParamSpec)>;

// ── Values ─────────────────────────────────────────────────────────

/// A live parameter value. The untagged serde shape matches the wire and
/// blob formats: number, string, color object, or color array.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Float(f64),
    Enum(String),
    Color(Rgbw),
    ColorList(Vec<Rgbw>),
}

/// Problems found while validating incoming parameter values.
#[derive(Debug, PartialEq, Eq)]
pub struct ParamError {
    pub name: String,
    pub reason: String,
}

impl std::fmt::Display for ParamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "parameter \"{}\": {}", self.name, self.reason)
    }
}

impl std::error::Error for ParamError {}

impl ParamValue {
    /// Validate a raw JSON value against a declared kind.
    ///
    /// Floats are clamped to [0,1]; enums must be one of the declared
    /// labels; color lists must be non-empty. Returns the coerced value.
    fn coerce(kind: ParamKind, name: &str, raw: &Value) -> Result<ParamValue, ParamError> {
        let err = |reason: String| ParamError { name: name.to_string(), reason };
        match kind {
            ParamKind::Float => raw
                .as_f64()
                .map(|f| ParamValue::Float(f.clamp(0.0, 1.0)))
                .ok_or_else(|| err(format!("expected a number, got {raw}"))),
            ParamKind::Color => raw
                .as_object()
                .and_then(|_| serde_json::from_value::<Rgbw>(raw.clone()).ok())
                .map(ParamValue::Color)
                .ok_or_else(|| err(format!("expected a color object, got {raw}"))),
            ParamKind::Enum(values) => {
                let label = raw
                    .as_str()
                    .ok_or_else(|| err(format!("expected a string, got {raw}")))?;
                if values.contains(&label) {
                    Ok(ParamValue::Enum(label.to_string()))
                } else {
                    Err(err(format!("\"{label}\" is not one of {values:?}")))
                }
            }
            ParamKind::ColorList => {
                let colors = serde_json::from_value::<Vec<Rgbw>>(raw.clone())
                    .map_err(|_| err(format!("expected a list of colors, got {raw}")))?;
                if colors.is_empty() {
                    Err(err("color list must not be empty".to_string()))
                } else {
                    Ok(ParamValue::ColorList(colors))
                }
            }
        }
    }

    fn matches(&self, kind: ParamKind) -> bool {
        matches!(
            (self, kind),
            (ParamValue::Float(_), ParamKind::Float)
                | (ParamValue::Enum(_), ParamKind::Enum(_))
                | (ParamValue::Color(_), ParamKind::Color)
                | (ParamValue::ColorList(_), ParamKind::ColorList)
        )
    }
}

// ── Live parameter map ─────────────────────────────────────────────

/// The live values of one effect's parameters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamMap(pub BTreeMap<String, ParamValue>);

impl ParamMap {
    /// A fresh map holding every declared default.
    pub fn from_defaults(table: &ParamTable) -> Self {
        Self(
            table
                .iter()
                .map(|(name, spec)| (name.to_string(), spec.default.clone()))
                .collect(),
        )
    }

    /// Merge raw JSON updates into the map.
    ///
    /// Names not present in the table are ignored (the shipped UI sometimes
    /// sends a full snapshot); values of the wrong shape are rejected.
    pub fn merge(&mut self, table: &ParamTable, updates: &Map<String, Value>) -> Result<(), ParamError> {
        for (name, spec) in table {
            if let Some(raw) = updates.get(*name) {
                let value = ParamValue::coerce(spec.kind, name, raw)?;
                self.0.insert(name.to_string(), value);
            }
        }
        Ok(())
    }

    /// Re-validate a stored map (from the config blob or a preset) against
    /// the declared table: defaults fill gaps, mismatched kinds are dropped.
    pub fn sanitized(&self, table: &ParamTable) -> ParamMap {
        let mut out = ParamMap::from_defaults(table);
        for (name, spec) in table {
            if let Some(value) = self.0.get(*name) {
                if value.matches(spec.kind) {
                    out.0.insert(name.to_string(), value.clone());
                }
            }
        }
        out
    }

    pub fn float(&self, name: &str) -> f64 {
        match self.0.get(name) {
            Some(ParamValue::Float(f)) => *f,
            _ => 0.0,
        }
    }

    pub fn color(&self, name: &str) -> Rgbw {
        match self.0.get(name) {
            Some(ParamValue::Color(c)) => *c,
            _ => Rgbw::BLACK,
        }
    }

    pub fn colors(&self, name: &str) -> Vec<Rgbw> {
        match self.0.get(name) {
            Some(ParamValue::ColorList(c)) => c.clone(),
            _ => Vec::new(),
        }
    }

    pub fn label(&self, name: &str) -> &str {
        match self.0.get(name) {
            Some(ParamValue::Enum(s)) => s,
            _ => "",
        }
    }

    /// The `interpolation` enum shared by several effects.
    pub fn interpolation(&self) -> Interpolation {
        if self.label("interpolation") == "hsv" {
            Interpolation::Hsv
        } else {
            Interpolation::Linear
        }
    }

    /// Export `{name: {type, description, value, enum_values?}}` in
    /// declaration order, for `GET /effects`.
    pub fn export(&self, table: &ParamTable) -> Value {
        let mut out = Map::new();
        for (name, spec) in table {
            let value = self.0.get(*name).unwrap_or(&spec.default);
            let mut entry = Map::new();
            entry.insert("type".into(), json!(spec.kind.type_name()));
            entry.insert("description".into(), json!(spec.description));
            entry.insert("value".into(), serde_json::to_value(value).unwrap_or(Value::Null));
            if let ParamKind::Enum(values) = spec.kind {
                entry.insert("enum_values".into(), json!(values));
            }
            out.insert(name.to_string(), Value::Object(entry));
        }
        Value::Object(out)
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn table() -> ParamTable {
        vec![
            (
                "speed",
                ParamSpec {
                    kind: ParamKind::Float,
                    description: "Speed of the effect (0-1)",
                    default: ParamValue::Float(0.6),
                },
            ),
            (
                "color",
                ParamSpec {
                    kind: ParamKind::Color,
                    description: "Color of the effect",
                    default: ParamValue::Color(Rgbw::rgb(255, 0, 0)),
                },
            ),
            (
                "direction",
                ParamSpec {
                    kind: ParamKind::Enum(&["in", "out"]),
                    description: "Direction of the effect",
                    default: ParamValue::Enum(String::new()),
                },
            ),
            (
                "colors",
                ParamSpec {
                    kind: ParamKind::ColorList,
                    description: "Palette",
                    default: ParamValue::ColorList(vec![Rgbw::rgb(255, 0, 0)]),
                },
            ),
        ]
    }

    fn updates(raw: &str) -> Map<String, Value> {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn defaults_cover_every_declared_name() {
        let map = ParamMap::from_defaults(&table());
        assert_eq!(map.0.len(), 4);
        assert_eq!(map.float("speed"), 0.6);
        assert_eq!(map.color("color"), Rgbw::rgb(255, 0, 0));
    }

    #[test]
    fn merge_applies_known_names() {
        let table = table();
        let mut map = ParamMap::from_defaults(&table);
        map.merge(&table, &updates(r#"{"speed": 0.25, "direction": "out"}"#))
            .unwrap();
        assert_eq!(map.float("speed"), 0.25);
        assert_eq!(map.label("direction"), "out");
        // Untouched values keep their defaults.
        assert_eq!(map.color("color"), Rgbw::rgb(255, 0, 0));
    }

    #[test]
    fn merge_ignores_unknown_names() {
        let table = table();
        let mut map = ParamMap::from_defaults(&table);
        map.merge(&table, &updates(r#"{"sparkle": 1.0}"#)).unwrap();
        assert_eq!(map, ParamMap::from_defaults(&table));
    }

    #[rstest]
    #[case(r#"{"speed": 2.5}"#, 1.0)]
    #[case(r#"{"speed": -0.5}"#, 0.0)]
    fn merge_clamps_floats(#[case] raw: &str, #[case] expected: f64) {
        let table = table();
        let mut map = ParamMap::from_defaults(&table);
        map.merge(&table, &updates(raw)).unwrap();
        assert_eq!(map.float("speed"), expected);
    }

    #[test]
    fn merge_accepts_color_without_white() {
        let table = table();
        let mut map = ParamMap::from_defaults(&table);
        map.merge(&table, &updates(r#"{"color": {"r":10,"g":20,"b":30}}"#))
            .unwrap();
        assert_eq!(map.color("color"), Rgbw::rgb(10, 20, 30));
    }

    #[rstest]
    #[case(r#"{"speed": "fast"}"#)]
    #[case(r#"{"direction": "sideways"}"#)]
    #[case(r#"{"colors": []}"#)]
    #[case(r#"{"color": [255, 0, 0]}"#)]
    fn merge_rejects_bad_values(#[case] raw: &str) {
        let table = table();
        let mut map = ParamMap::from_defaults(&table);
        assert!(map.merge(&table, &updates(raw)).is_err());
    }

    #[test]
    fn sanitize_drops_mismatched_kinds() {
        let table = table();
        let mut stored = ParamMap::from_defaults(&table);
        stored
            .0
            .insert("speed".to_string(), ParamValue::Enum("oops".to_string()));
        let clean = stored.sanitized(&table);
        assert_eq!(clean.float("speed"), 0.6);
    }

    #[test]
    fn export_preserves_declaration_order_and_shape() {
        let table = table();
        let map = ParamMap::from_defaults(&table);
        let exported = map.export(&table);
        let keys: Vec<&String> = exported.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["speed", "color", "direction", "colors"]);
        assert_eq!(exported["speed"]["type"], "float");
        assert_eq!(exported["speed"]["value"], 0.6);
        assert_eq!(exported["direction"]["enum_values"], json!(["in", "out"]));
        assert_eq!(exported["color"]["value"]["r"], 255);
    }

    #[test]
    fn values_round_trip_through_json() {
        let original = ParamValue::ColorList(vec![Rgbw::rgb(1, 2, 3), Rgbw::new(4, 5, 6, 7)]);
        let text = serde_json::to_string(&original).unwrap();
        let back: ParamValue = serde_json::from_str(&text).unwrap();
        assert_eq!(back, original);
    }
}
