//! Runtime-tunable flocking parameters.
//!
//! [`Params`] is a plain value read by the kernels once per tick. External
//! control surfaces (the viewer's keyboard bindings, a UI panel) hold a
//! [`SharedParams`] handle and may write at any time; the simulation takes a
//! snapshot at the start of each tick so a tick never sees a half-applied
//! change.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Flocking parameters.
///
/// No validation is applied: out-of-range values are absorbed by the kernels
/// (negative speeds and radii behave as zero).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Params {
    /// Weight of the push away from crowded neighbors.
    pub separation_weight: f32,
    /// Weight of the steer toward the neighbors' average heading.
    pub alignment_weight: f32,
    /// Weight of the steer toward the neighbors' center (also scales the centroid pull).
    pub cohesion_weight: f32,
    /// Upper bound on agent speed. Moving agents never drop below 20% of it.
    pub max_speed: f32,
    /// Neighbors closer than this contribute to alignment and cohesion.
    pub perception_radius: f32,
    /// Neighbors closer than this contribute to separation.
    pub separation_radius: f32,
    /// Nominal radius of the soft containment sphere around the origin.
    pub boundary_radius: f32,
    /// Strength of the curl-noise turbulence.
    pub turbulence: f32,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            separation_weight: 20.0,
            alignment_weight: 20.0,
            cohesion_weight: 20.0,
            max_speed: 40.0,
            perception_radius: 40.0,
            separation_radius: 25.0,
            boundary_radius: 400.0,
            turbulence: 5.0,
        }
    }
}

impl Params {
    /// Parameters with every force disabled: agents drift on their current velocity.
    pub fn drift(max_speed: f32, boundary_radius: f32) -> Self {
        Self {
            separation_weight: 0.0,
            alignment_weight: 0.0,
            cohesion_weight: 0.0,
            turbulence: 0.0,
            max_speed,
            boundary_radius,
            ..Self::default()
        }
    }

    /// Read one field.
    pub fn get(&self, field: ParamField) -> f32 {
        match field {
            ParamField::SeparationWeight => self.separation_weight,
            ParamField::AlignmentWeight => self.alignment_weight,
            ParamField::CohesionWeight => self.cohesion_weight,
            ParamField::MaxSpeed => self.max_speed,
            ParamField::PerceptionRadius => self.perception_radius,
            ParamField::SeparationRadius => self.separation_radius,
            ParamField::BoundaryRadius => self.boundary_radius,
            ParamField::Turbulence => self.turbulence,
        }
    }

    /// Write one field.
    pub fn set(&mut self, field: ParamField, value: f32) {
        let slot = match field {
            ParamField::SeparationWeight => &mut self.separation_weight,
            ParamField::AlignmentWeight => &mut self.alignment_weight,
            ParamField::CohesionWeight => &mut self.cohesion_weight,
            ParamField::MaxSpeed => &mut self.max_speed,
            ParamField::PerceptionRadius => &mut self.perception_radius,
            ParamField::SeparationRadius => &mut self.separation_radius,
            ParamField::BoundaryRadius => &mut self.boundary_radius,
            ParamField::Turbulence => &mut self.turbulence,
        };
        *slot = value;
    }
}

/// Identifies a single [`Params`] field for runtime control.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParamField {
    SeparationWeight,
    AlignmentWeight,
    CohesionWeight,
    MaxSpeed,
    PerceptionRadius,
    SeparationRadius,
    BoundaryRadius,
    Turbulence,
}

impl ParamField {
    /// All fields, in control-surface order.
    pub const ALL: [ParamField; 8] = [
        ParamField::SeparationWeight,
        ParamField::AlignmentWeight,
        ParamField::CohesionWeight,
        ParamField::MaxSpeed,
        ParamField::PerceptionRadius,
        ParamField::SeparationRadius,
        ParamField::BoundaryRadius,
        ParamField::Turbulence,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ParamField::SeparationWeight => "separation",
            ParamField::AlignmentWeight => "alignment",
            ParamField::CohesionWeight => "cohesion",
            ParamField::MaxSpeed => "max speed",
            ParamField::PerceptionRadius => "perception radius",
            ParamField::SeparationRadius => "separation radius",
            ParamField::BoundaryRadius => "boundary radius",
            ParamField::Turbulence => "turbulence",
        }
    }
}

impl fmt::Display for ParamField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Cloneable handle to parameters shared with a control surface.
///
/// Writers may update fields at any time; [`SharedParams::snapshot`] returns a
/// consistent copy. A poisoned lock is recovered since `Params` has no
/// invariants a panicking writer could break.
#[derive(Clone, Debug, Default)]
pub struct SharedParams {
    inner: Arc<RwLock<Params>>,
}

impl SharedParams {
    pub fn new(params: Params) -> Self {
        Self {
            inner: Arc::new(RwLock::new(params)),
        }
    }

    /// Consistent copy of the current parameters.
    pub fn snapshot(&self) -> Params {
        *self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace all parameters.
    pub fn replace(&self, params: Params) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = params;
    }

    /// Set one field, returning the previous value.
    pub fn set(&self, field: ParamField, value: f32) -> f32 {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let previous = guard.get(field);
        guard.set(field, value);
        previous
    }

    /// Apply an arbitrary edit under the write lock.
    pub fn update(&self, edit: impl FnOnce(&mut Params)) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        edit(&mut guard);
    }
}
