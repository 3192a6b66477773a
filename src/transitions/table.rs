//! The static `(StageType × StageType)` transition table.

use crate::stages::StageType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransitionRule {
    pub valid: bool,
    /// Whether one source may fan out to several destinations of this type.
    pub allow_multiple: bool,
}

impl TransitionRule {
    const INVALID: TransitionRule = TransitionRule {
        valid: false,
        allow_multiple: false,
    };
    const SINGLE: TransitionRule = TransitionRule {
        valid: true,
        allow_multiple: false,
    };
    const MULTIPLE: TransitionRule = TransitionRule {
        valid: true,
        allow_multiple: true,
    };
}

/// Looks up the rule for an edge `from -> to`.
pub fn transition_rule(from: StageType, to: StageType) -> TransitionRule {
    use StageType::*;

    if from == Error || to == Error || (to == Idle && !matches!(from, Idle | Complete)) {
        return TransitionRule::INVALID;
    }
    if from.is_pass_through() || to.is_pass_through() {
        return TransitionRule::MULTIPLE;
    }
    match (from, to) {
        (Idle, Idle) | (Complete, Complete) => TransitionRule::SINGLE,
        (Idle, Setup)
        | (Setup, Optimize | Execute)
        | (Optimize, Execute)
        | (Execute, Execute | Setup | Optimize | Analyze)
        | (Analyze, Submit)
        | (Submit, Submit | Setup | Optimize | Execute | Complete)
        | (Complete, Idle | Setup | Optimize | Execute | Analyze | Submit) => TransitionRule::MULTIPLE,
        _ => TransitionRule::INVALID,
    }
}

pub fn is_valid_transition(from: StageType, to: StageType) -> bool {
    transition_rule(from, to).valid
}
