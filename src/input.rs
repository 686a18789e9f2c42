//! Keyboard control surface for the viewer.
//!
//! | key        | action                               |
//! |------------|--------------------------------------|
//! | `1`..`8`   | select a parameter                   |
//! | `=` / `-`  | scale the selected parameter up/down |
//! | `]` / `[`  | double / halve the drawn agent count |
//! | `Space`    | pause / resume                       |
//! | `R`        | restore default parameters           |
//!
//! Parameter edits go through [`SharedParams`], so they land on the next tick
//! of whichever substrate holds the handle.

use log::info;
use winit::keyboard::KeyCode;

use crate::params::{ParamField, Params, SharedParams};

/// Multiplicative step for one key press.
pub const PARAM_STEP: f32 = 1.1;

/// Value a zeroed parameter jumps to when increased.
const PARAM_NUDGE: f32 = 0.5;
/// Decreasing below this snaps the parameter to zero.
const PARAM_FLOOR: f32 = 0.01;

/// A viewer command bound to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Select(ParamField),
    Increase,
    Decrease,
    GrowActive,
    ShrinkActive,
    TogglePause,
    ResetParams,
}

impl ControlAction {
    pub fn from_key(key: KeyCode) -> Option<Self> {
        let select = |i: usize| Some(ControlAction::Select(ParamField::ALL[i]));
        match key {
            KeyCode::Digit1 => select(0),
            KeyCode::Digit2 => select(1),
            KeyCode::Digit3 => select(2),
            KeyCode::Digit4 => select(3),
            KeyCode::Digit5 => select(4),
            KeyCode::Digit6 => select(5),
            KeyCode::Digit7 => select(6),
            KeyCode::Digit8 => select(7),
            KeyCode::Equal | KeyCode::NumpadAdd => Some(ControlAction::Increase),
            KeyCode::Minus | KeyCode::NumpadSubtract => Some(ControlAction::Decrease),
            KeyCode::BracketRight => Some(ControlAction::GrowActive),
            KeyCode::BracketLeft => Some(ControlAction::ShrinkActive),
            KeyCode::Space => Some(ControlAction::TogglePause),
            KeyCode::KeyR => Some(ControlAction::ResetParams),
            _ => None,
        }
    }
}

/// Parameter editor driven by [`ControlAction`]s.
pub struct ParamControl {
    params: SharedParams,
    selected: ParamField,
}

impl ParamControl {
    pub fn new(params: SharedParams) -> Self {
        Self {
            params,
            selected: ParamField::SeparationWeight,
        }
    }

    pub fn selected(&self) -> ParamField {
        self.selected
    }

    /// Apply a parameter action. Returns `false` for actions that are not
    /// about parameters (active count, pause), leaving them to the caller.
    pub fn apply(&mut self, action: ControlAction) -> bool {
        match action {
            ControlAction::Select(field) => {
                self.selected = field;
                info!("Selected {} = {:.3}", field, self.params.snapshot().get(field));
            }
            ControlAction::Increase => self.adjust(scale_up),
            ControlAction::Decrease => self.adjust(scale_down),
            ControlAction::ResetParams => {
                self.params.replace(Params::default());
                info!("Parameters restored to defaults");
            }
            ControlAction::GrowActive | ControlAction::ShrinkActive | ControlAction::TogglePause => {
                return false;
            }
        }
        true
    }

    fn adjust(&self, step: fn(f32) -> f32) {
        let field = self.selected;
        let current = self.params.snapshot().get(field);
        let next = step(current);
        self.params.set(field, next);
        info!("{}: {:.3} -> {:.3}", field, current, next);
    }
}

fn scale_up(value: f32) -> f32 {
    if value.abs() < PARAM_FLOOR {
        PARAM_NUDGE
    } else {
        value * PARAM_STEP
    }
}

fn scale_down(value: f32) -> f32 {
    let next = value / PARAM_STEP;
    if next.abs() < PARAM_FLOOR {
        0.0
    } else {
        next
    }
}

/// Next drawn agent count for a grow/shrink action: doubles or halves,
/// staying within `1..=agent_count`.
pub fn step_active_count(current: u32, agent_count: u32, action: ControlAction) -> u32 {
    match action {
        ControlAction::GrowActive => current.saturating_mul(2).clamp(1, agent_count),
        ControlAction::ShrinkActive => (current / 2).clamp(1, agent_count),
        _ => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_bindings() {
        assert_eq!(
            ControlAction::from_key(KeyCode::Digit4),
            Some(ControlAction::Select(ParamField::MaxSpeed))
        );
        assert_eq!(
            ControlAction::from_key(KeyCode::Digit8),
            Some(ControlAction::Select(ParamField::Turbulence))
        );
        assert_eq!(ControlAction::from_key(KeyCode::Equal), Some(ControlAction::Increase));
        assert_eq!(ControlAction::from_key(KeyCode::Space), Some(ControlAction::TogglePause));
        assert_eq!(ControlAction::from_key(KeyCode::KeyQ), None);
    }

    #[test]
    fn test_adjust_selected_param() {
        let shared = SharedParams::new(Params::default());
        let mut control = ParamControl::new(shared.clone());

        assert!(control.apply(ControlAction::Select(ParamField::MaxSpeed)));
        assert!(control.apply(ControlAction::Increase));
        assert!((shared.snapshot().max_speed - 44.0).abs() < 1e-4);

        assert!(control.apply(ControlAction::Decrease));
        assert!((shared.snapshot().max_speed - 40.0).abs() < 1e-4);

        assert!(control.apply(ControlAction::ResetParams));
        assert_eq!(shared.snapshot(), Params::default());

        assert!(!control.apply(ControlAction::TogglePause));
    }

    #[test]
    fn test_zero_param_can_be_raised() {
        assert_eq!(scale_up(0.0), PARAM_NUDGE);
        assert_eq!(scale_down(0.005), 0.0);
    }

    #[test]
    fn test_step_active_count() {
        assert_eq!(step_active_count(100, 150, ControlAction::GrowActive), 150);
        assert_eq!(step_active_count(100, 150, ControlAction::ShrinkActive), 50);
        assert_eq!(step_active_count(1, 150, ControlAction::ShrinkActive), 1);
        assert_eq!(step_active_count(7, 150, ControlAction::TogglePause), 7);
    }
}
