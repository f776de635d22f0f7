//! Ground-model registry - named surface property records.
//!
//! A ground model bundles the friction, fluid and particle parameters of one
//! surface type. Models are declared (typically deserialized from a config
//! file), may inherit from a named base, and are flattened into a read-only
//! registry before the simulation starts. The registry always contains a
//! `"default"` entry so lookups can degrade gracefully.

use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::error::GroundLookupMiss;

/// Index of a ground model inside the registry. Stable after `finish()`.
pub type GroundModelId = u32;

/// Particle effect hint published with contacts. Opaque to the physics core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SurfaceFx {
    #[default]
    None,
    /// Dust clouds (dirt, sand).
    Dusty,
    /// Sparks and tyre smoke (asphalt, concrete).
    Hard,
    /// Clumps of matter (mud, snow).
    Clumpy,
}

/// Surface physics parameters for one named ground type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundModel {
    pub name: String,
    /// Adhesion velocity: below this slip speed static friction engages.
    pub va: f32,
    /// Static friction coefficient.
    pub ms: f32,
    /// Sliding friction coefficient.
    pub mc: f32,
    /// Hydrodynamic friction term, multiplied by slip speed.
    pub t2: f32,
    /// Stribeck velocity of the friction curve.
    pub vs: f32,
    /// Exponent of the Stribeck curve.
    pub alpha: f32,
    /// Surface strength, scales the moderated reaction force.
    pub strength: f32,
    /// Fluid density in kg/m^3 for the fluid layer above solid ground.
    pub fluid_density: f32,
    /// Power-law fluid consistency index.
    pub flow_consistency_index: f32,
    /// Power-law fluid behavior index (< 1 = pseudoplastic).
    pub flow_behavior_index: f32,
    /// Drag anisotropy factor in [0, 1]; 1 = isotropic drag.
    pub drag_anisotropy: f32,
    /// Depth of the fluid layer; 0 means the surface is solid at contact.
    pub solid_ground_level: f32,
    /// Particle effect hint, forwarded in snapshots.
    pub fx: SurfaceFx,
}

impl Default for GroundModel {
    fn default() -> Self {
        Self {
            name: String::new(),
            va: 0.5,
            ms: 0.8,
            mc: 0.6,
            t2: 0.0,
            vs: 1.0,
            alpha: 2.0,
            strength: 1.0,
            fluid_density: 0.0,
            flow_consistency_index: 0.0,
            flow_behavior_index: 1.0,
            drag_anisotropy: 1.0,
            solid_ground_level: 0.0,
            fx: SurfaceFx::None,
        }
    }
}

/// Declarative form of a ground model: every field optional, with an
/// optional named base. Fields left unset fall through to the base.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroundModelDef {
    pub name: String,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub va: Option<f32>,
    #[serde(default)]
    pub ms: Option<f32>,
    #[serde(default)]
    pub mc: Option<f32>,
    #[serde(default)]
    pub t2: Option<f32>,
    #[serde(default)]
    pub vs: Option<f32>,
    #[serde(default)]
    pub alpha: Option<f32>,
    #[serde(default)]
    pub strength: Option<f32>,
    #[serde(default)]
    pub fluid_density: Option<f32>,
    #[serde(default)]
    pub flow_consistency_index: Option<f32>,
    #[serde(default)]
    pub flow_behavior_index: Option<f32>,
    #[serde(default)]
    pub drag_anisotropy: Option<f32>,
    #[serde(default)]
    pub solid_ground_level: Option<f32>,
    #[serde(default)]
    pub fx: Option<SurfaceFx>,
}

impl GroundModelDef {
    fn apply_over(&self, mut base: GroundModel) -> GroundModel {
        base.name = self.name.clone();
        if let Some(v) = self.va {
            base.va = v;
        }
        if let Some(v) = self.ms {
            base.ms = v;
        }
        if let Some(v) = self.mc {
            base.mc = v;
        }
        if let Some(v) = self.t2 {
            base.t2 = v;
        }
        if let Some(v) = self.vs {
            base.vs = v;
        }
        if let Some(v) = self.alpha {
            base.alpha = v;
        }
        if let Some(v) = self.strength {
            base.strength = v;
        }
        if let Some(v) = self.fluid_density {
            base.fluid_density = v;
        }
        if let Some(v) = self.flow_consistency_index {
            base.flow_consistency_index = v;
        }
        if let Some(v) = self.flow_behavior_index {
            base.flow_behavior_index = v;
        }
        if let Some(v) = self.drag_anisotropy {
            base.drag_anisotropy = v;
        }
        if let Some(v) = self.solid_ground_level {
            base.solid_ground_level = v;
        }
        if let Some(v) = self.fx {
            base.fx = v;
        }
        base
    }
}

/// Read-only table of resolved ground models.
///
/// Built once at startup from a set of `GroundModelDef`s; `finish()` flattens
/// inheritance and guarantees a `"default"` entry at index 0.
#[derive(Resource, Debug, Default)]
pub struct GroundModelRegistry {
    defs: Vec<GroundModelDef>,
    models: Vec<GroundModel>,
    by_name: HashMap<String, GroundModelId>,
}

impl GroundModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a model definition for resolution.
    pub fn insert(&mut self, def: GroundModelDef) {
        self.defs.push(def);
    }

    /// Flatten inheritance and freeze the registry. Unresolvable bases fall
    /// back to the built-in defaults; inheritance cycles are cut at the first
    /// repeated name.
    pub fn finish(mut self) -> Self {
        let by_def_name: HashMap<String, usize> = self
            .defs
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.clone(), i))
            .collect();

        let defs = std::mem::take(&mut self.defs);
        for def in &defs {
            let mut chain = vec![def];
            let mut seen = vec![def.name.as_str()];
            let mut cursor = def.base.as_deref();
            while let Some(base_name) = cursor {
                if seen.contains(&base_name) {
                    warn!(model = %def.name, base = %base_name, "ground model inheritance cycle, cutting");
                    break;
                }
                match by_def_name.get(base_name) {
                    Some(&idx) => {
                        let base = &defs[idx];
                        chain.push(base);
                        seen.push(base.name.as_str());
                        cursor = base.base.as_deref();
                    }
                    None => {
                        warn!(model = %def.name, base = %base_name, "ground model base not found");
                        break;
                    }
                }
            }

            // Apply base-most first.
            let mut resolved = GroundModel::default();
            for link in chain.iter().rev() {
                resolved = link.apply_over(resolved);
            }
            resolved.name = def.name.clone();

            let id = self.models.len() as GroundModelId;
            self.models.push(resolved);
            self.by_name.insert(def.name.clone(), id);
        }

        if !self.by_name.contains_key("default") {
            let id = self.models.len() as GroundModelId;
            self.models.push(GroundModel {
                name: "default".to_string(),
                ..GroundModel::default()
            });
            self.by_name.insert("default".to_string(), id);
        }
        self
    }

    /// Look up a model by name.
    pub fn lookup(&self, name: &str) -> Result<&GroundModel, GroundLookupMiss> {
        self.by_name
            .get(name)
            .map(|&id| &self.models[id as usize])
            .ok_or_else(|| GroundLookupMiss {
                name: name.to_string(),
            })
    }

    /// Look up a model by name, falling back to the default entry.
    pub fn lookup_or_default(&self, name: &str) -> &GroundModel {
        match self.lookup(name) {
            Ok(gm) => gm,
            Err(_) => self.default_model(),
        }
    }

    pub fn id_of(&self, name: &str) -> Option<GroundModelId> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, id: GroundModelId) -> &GroundModel {
        &self.models[id as usize]
    }

    pub fn default_id(&self) -> GroundModelId {
        self.by_name["default"]
    }

    pub fn default_model(&self) -> &GroundModel {
        self.get(self.default_id())
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
