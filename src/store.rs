//! Persistence: one JSON blob holding everything worth keeping across
//! restarts.
//!
//! Loaded once at startup; every control-plane mutation rebuilds the blob
//! under the state lock and writes it outside the lock. Writes are atomic
//! (temp file + rename) so a crash mid-write never corrupts the config.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::effects::EffectKind;
use crate::layout::Layout;
use crate::params::ParamMap;
use crate::state::{GlobalState, Preset};

pub const CONFIG_FILE_NAME: &str = ".led_config.json";

/// The on-disk shape. Every field is optional so partial or older blobs
/// load cleanly with defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfigBlob {
    #[serde(default)]
    pub current_effect: Option<String>,
    #[serde(default)]
    pub parameters_by_effect: BTreeMap<String, ParamMap>,
    #[serde(default = "default_brightness")]
    pub brightness: f64,
    #[serde(default = "default_power")]
    pub power_state: bool,
    #[serde(default)]
    pub active_preset_id: Option<u64>,
    #[serde(default)]
    pub presets: Vec<Preset>,
}

fn default_brightness() -> f64 {
    1.0
}

fn default_power() -> bool {
    true
}

impl Default for ConfigBlob {
    fn default() -> Self {
        Self {
            current_effect: None,
            parameters_by_effect: BTreeMap::new(),
            brightness: default_brightness(),
            power_state: default_power(),
            active_preset_id: None,
            presets: Vec::new(),
        }
    }
}

/// `$HOME/.led_config.json`, or the working directory when HOME is unset.
pub fn default_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_FILE_NAME)
}

/// Read the blob; a missing or unreadable file falls back to defaults.
pub fn load(path: &Path) -> ConfigBlob {
    match fs::read_to_string(path) {
        Ok(text) => match serde_json::from_str(&text) {
            Ok(blob) => blob,
            Err(e) => {
                tracing::warn!("config at {} is invalid ({e}), using defaults", path.display());
                ConfigBlob::default()
            }
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => ConfigBlob::default(),
        Err(e) => {
            tracing::warn!("could not read {} ({e}), using defaults", path.display());
            ConfigBlob::default()
        }
    }
}

/// Write the blob atomically: serialize to a sibling temp file, then rename
/// over the target.
pub fn save(path: &Path, blob: &ConfigBlob) -> io::Result<()> {
    let text = serde_json::to_string_pretty(blob)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, text)?;
    fs::rename(&tmp, path)
}

impl ConfigBlob {
    /// Capture the persistable slice of the in-memory state. The *target*
    /// power state is saved so a restart mid-fade lands where the user
    /// asked.
    pub fn from_state(state: &GlobalState) -> Self {
        Self {
            current_effect: Some(state.current_effect.name().to_string()),
            parameters_by_effect: state.params_by_effect.clone(),
            brightness: state.brightness,
            power_state: state.target_power_state,
            active_preset_id: state.active_preset_id,
            presets: state.presets.clone(),
        }
    }

    /// Rebuild the in-memory state, validating everything against the
    /// effect registry and the active layout. Anything invalid silently
    /// takes its default.
    pub fn into_state(self, layout: &Layout) -> GlobalState {
        let mut state = GlobalState::default();

        for kind in EffectKind::ALL {
            if let Some(stored) = self.parameters_by_effect.get(kind.name()) {
                state
                    .params_by_effect
                    .insert(kind.name().to_string(), stored.sanitized(&kind.parameters()));
            }
        }

        if let Some(kind) = self.current_effect.as_deref().and_then(EffectKind::from_name) {
            if kind.supports(layout) {
                state.current_effect = kind;
            } else {
                tracing::warn!(
                    "persisted effect {} does not suit this layout, using {}",
                    kind.name(),
                    EffectKind::DEFAULT.name()
                );
            }
        }

        state.brightness = self.brightness.clamp(0.0, 1.0);
        state.power_state = self.power_state;
        state.target_power_state = self.power_state;
        state.presets = self.presets;
        state.active_preset_id = self
            .active_preset_id
            .filter(|id| state.presets.iter().any(|p| p.id == *id));
        state
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ScaleLayout;
    use crate::params::ParamValue;
    use crate::Rgbw;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn layout() -> Layout {
        Layout::Scale(ScaleLayout::default())
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let tmp = TempDir::new().unwrap();
        let blob = load(&tmp.path().join("nope.json"));
        assert_eq!(blob.brightness, 1.0);
        assert!(blob.power_state);
        assert!(blob.presets.is_empty());
    }

    #[test]
    fn load_garbage_returns_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, "not json{").unwrap();
        let blob = load(&path);
        assert_eq!(blob.current_effect, None);
    }

    #[test]
    fn save_then_load_round_trips_state() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");

        let mut state = GlobalState::default();
        state
            .set_effect(
                EffectKind::SingleColor,
                Some(
                    serde_json::json!({"color": {"r": 9, "g": 8, "b": 7}})
                        .as_object()
                        .unwrap(),
                ),
            )
            .unwrap();
        state.set_brightness(0.4);
        state.upsert_preset(
            Some(1234),
            "warm".into(),
            "SingleColor".into(),
            0.6,
            ParamMap::default(),
        );

        save(&path, &ConfigBlob::from_state(&state)).unwrap();
        let restored = load(&path).into_state(&layout());

        assert_eq!(restored.effect(), EffectKind::SingleColor);
        assert_eq!(
            restored.params_for(EffectKind::SingleColor).color("color"),
            Rgbw::rgb(9, 8, 7)
        );
        assert_eq!(restored.brightness(), 0.4);
        assert_eq!(restored.presets().len(), 1);
        assert_eq!(restored.presets()[0].id, 1234);
    }

    #[test]
    fn save_leaves_no_temp_file_behind() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        save(&path, &ConfigBlob::default()).unwrap();
        let names: Vec<String> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["config.json"]);
    }

    #[test]
    fn unknown_effect_falls_back_to_default() {
        let blob = ConfigBlob {
            current_effect: Some("DiscoInferno".into()),
            ..ConfigBlob::default()
        };
        assert_eq!(blob.into_state(&layout()).effect(), EffectKind::DEFAULT);
    }

    #[test]
    fn hex_only_effect_falls_back_on_scale_layout() {
        let blob = ConfigBlob {
            current_effect: Some("RandomColorHex".into()),
            ..ConfigBlob::default()
        };
        assert_eq!(blob.into_state(&layout()).effect(), EffectKind::DEFAULT);
    }

    #[test]
    fn invalid_stored_params_take_defaults() {
        let mut parameters_by_effect = BTreeMap::new();
        let mut map = ParamMap::default();
        map.0
            .insert("speed".into(), ParamValue::Enum("warp".into()));
        parameters_by_effect.insert("RainbowRadial".into(), map);
        let blob = ConfigBlob {
            parameters_by_effect,
            ..ConfigBlob::default()
        };
        let state = blob.into_state(&layout());
        assert_eq!(state.params_for(EffectKind::RainbowRadial).float("speed"), 0.6);
    }

    #[test]
    fn out_of_range_brightness_is_clamped() {
        let blob = ConfigBlob {
            brightness: 7.5,
            ..ConfigBlob::default()
        };
        assert_eq!(blob.into_state(&layout()).brightness(), 1.0);
    }

    #[test]
    fn dangling_active_preset_is_dropped() {
        let blob = ConfigBlob {
            active_preset_id: Some(99),
            ..ConfigBlob::default()
        };
        assert_eq!(blob.into_state(&layout()).active_preset_id(), None);
    }
}
