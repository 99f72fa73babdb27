//! Global mutable state shared between the control plane and the render
//! loop.
//!
//! Everything lives behind one `Arc<Mutex<GlobalState>>`. HTTP handlers
//! mutate in place under a short lock and bump the generation counter; the
//! render loop takes a [`RenderSnapshot`] at the top of every tick. Nothing
//! holds the lock across I/O.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::effects::EffectKind;
use crate::params::{ParamError, ParamMap};

/// Power fades take this long, linearly.
pub const FADE_DURATION_MS: u64 = 300;

pub type SharedState = Arc<Mutex<GlobalState>>;

// ── Presets ────────────────────────────────────────────────────────

/// A named bundle of effect, parameters and brightness.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    /// Unix milliseconds at creation; unique within the store.
    pub id: u64,
    pub name: String,
    pub effect: String,
    pub brightness: f64,
    #[serde(default)]
    pub parameters: ParamMap,
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ── Global state ───────────────────────────────────────────────────

/// What the render loop reads at the top of each tick.
#[derive(Clone, Debug)]
pub struct RenderSnapshot {
    pub effect: EffectKind,
    pub params: ParamMap,
    pub brightness: f32,
    pub power_state: bool,
    pub target_power_state: bool,
    pub fade_start: Option<Instant>,
    pub generation: u64,
}

#[derive(Debug)]
pub struct GlobalState {
    pub(crate) current_effect: EffectKind,
    pub(crate) params_by_effect: BTreeMap<String, ParamMap>,
    pub(crate) brightness: f64,
    pub(crate) power_state: bool,
    pub(crate) target_power_state: bool,
    pub(crate) fade_start: Option<Instant>,
    pub(crate) active_preset_id: Option<u64>,
    pub(crate) presets: Vec<Preset>,
    pub(crate) effect_fault: bool,
    pub(crate) generation: u64,
}

impl Default for GlobalState {
    fn default() -> Self {
        let params_by_effect = EffectKind::ALL
            .into_iter()
            .map(|kind| {
                (
                    kind.name().to_string(),
                    ParamMap::from_defaults(&kind.parameters()),
                )
            })
            .collect();
        Self {
            current_effect: EffectKind::DEFAULT,
            params_by_effect,
            brightness: 1.0,
            power_state: true,
            target_power_state: true,
            fade_start: None,
            active_preset_id: None,
            presets: Vec::new(),
            effect_fault: false,
            generation: 0,
        }
    }
}

impl GlobalState {
    pub fn shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    pub fn effect(&self) -> EffectKind {
        self.current_effect
    }

    pub fn brightness(&self) -> f64 {
        self.brightness
    }

    pub fn active_preset_id(&self) -> Option<u64> {
        self.active_preset_id
    }

    pub fn presets(&self) -> &[Preset] {
        &self.presets
    }

    /// Live parameter values for an effect, defaults where nothing is set.
    pub fn params_for(&self, kind: EffectKind) -> ParamMap {
        self.params_by_effect
            .get(kind.name())
            .cloned()
            .unwrap_or_else(|| ParamMap::from_defaults(&kind.parameters()))
    }

    /// Switch to (or update) an effect, overlaying any supplied parameter
    /// values.
    ///
    /// Switching initializes the parameter map from declared defaults before
    /// the overlay; updating the active effect merges into the live values.
    /// Either way this counts as a manual mutation: the active preset handle
    /// and any effect fault are cleared.
    pub fn set_effect(
        &mut self,
        kind: EffectKind,
        overlay: Option<&Map<String, Value>>,
    ) -> Result<(), ParamError> {
        let table = kind.parameters();
        let mut params = if kind == self.current_effect {
            self.params_for(kind)
        } else {
            ParamMap::from_defaults(&table)
        };
        if let Some(updates) = overlay {
            params.merge(&table, updates)?;
        }
        self.params_by_effect.insert(kind.name().to_string(), params);
        self.current_effect = kind;
        self.active_preset_id = None;
        self.effect_fault = false;
        self.generation += 1;
        Ok(())
    }

    /// Clamp and set the global brightness. Clears the active preset.
    pub fn set_brightness(&mut self, value: f64) {
        self.brightness = value.clamp(0.0, 1.0);
        self.active_preset_id = None;
    }

    /// Request a power transition; records the fade start only when the
    /// target actually changes.
    pub fn set_power(&mut self, on: bool) {
        if on != self.target_power_state {
            self.target_power_state = on;
            self.fade_start = Some(Instant::now());
        }
    }

    /// Called by the render loop when a fade completes.
    pub fn commit_power(&mut self, on: bool) {
        self.power_state = on;
        self.fade_start = None;
    }

    /// Raised by the render loop after repeated effect failures; cleared by
    /// the next effect mutation.
    pub fn set_effect_fault(&mut self, fault: bool) {
        self.effect_fault = fault;
    }

    pub fn snapshot(&self) -> RenderSnapshot {
        RenderSnapshot {
            effect: self.current_effect,
            params: self.params_for(self.current_effect),
            brightness: self.brightness as f32,
            power_state: self.power_state,
            target_power_state: self.target_power_state,
            fade_start: self.fade_start,
            generation: self.generation,
        }
    }

    // ── Presets ────────────────────────────────────────────────────

    /// Create or update a preset. A new preset gets a fresh Unix-ms id
    /// (nudged forward on collision); an existing id updates in place.
    pub fn upsert_preset(
        &mut self,
        id: Option<u64>,
        name: String,
        effect: String,
        brightness: f64,
        parameters: ParamMap,
    ) -> Preset {
        let id = id.unwrap_or_else(|| {
            let mut candidate = unix_ms();
            while self.presets.iter().any(|p| p.id == candidate) {
                candidate += 1;
            }
            candidate
        });
        let preset = Preset { id, name, effect, brightness, parameters };
        match self.presets.iter_mut().find(|p| p.id == id) {
            Some(existing) => *existing = preset.clone(),
            None => self.presets.push(preset.clone()),
        }
        preset
    }

    /// Remove a preset by id. Returns whether anything was removed.
    pub fn delete_preset(&mut self, id: u64) -> bool {
        let before = self.presets.len();
        self.presets.retain(|p| p.id != id);
        if self.active_preset_id == Some(id) {
            self.active_preset_id = None;
        }
        self.presets.len() != before
    }

    /// Apply effect, parameters and brightness in one batch and record the
    /// preset as active.
    pub fn apply_preset(
        &mut self,
        id: Option<u64>,
        effect: EffectKind,
        brightness: Option<f64>,
        parameters: Option<&Map<String, Value>>,
    ) -> Result<(), ParamError> {
        self.set_effect(effect, parameters)?;
        if let Some(value) = brightness {
            self.brightness = value.clamp(0.0, 1.0);
        }
        self.active_preset_id = id;
        Ok(())
    }

    // ── Wire shapes ────────────────────────────────────────────────

    pub fn state_json(&self) -> Value {
        json!({
            "power_state": self.power_state,
            "target_power_state": self.target_power_state,
            "brightness": self.brightness,
            "active_preset_id": self.active_preset_id,
            "effect_fault": self.effect_fault,
        })
    }

    pub fn effects_json(&self) -> Value {
        let mut effect_parameters = Map::new();
        let mut effect_names = Map::new();
        for kind in EffectKind::ALL {
            let table = kind.parameters();
            effect_parameters.insert(
                kind.name().to_string(),
                self.params_for(kind).export(&table),
            );
            effect_names.insert(kind.name().to_string(), json!(kind.display_name()));
        }
        json!({
            "effect_parameters": effect_parameters,
            "effect_names": effect_names,
            "current_effect": self.current_effect.name(),
        })
    }

    pub fn presets_json(&self) -> Value {
        serde_json::to_value(&self.presets).unwrap_or_else(|_| json!([]))
    }
}

// ── Tests ──────────────────────────────────────────────────────────
