// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # TDD Phase Cycle
//!
//! Red → Green → Refactor → Red. Workflow steps may be tagged with a phase;
//! a definition whose tagged steps skip or reverse a phase is rejected.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TddPhase {
    /// Write a failing test
    Red,
    /// Make it pass
    Green,
    /// Clean up with tests green
    Refactor,
}

impl TddPhase {
    pub fn next(self) -> Self {
        match self {
            Self::Red => Self::Green,
            Self::Green => Self::Refactor,
            Self::Refactor => Self::Red,
        }
    }

    /// Staying in a phase is allowed; otherwise only the successor is legal.
    pub fn can_transition_to(self, to: TddPhase) -> bool {
        self == to || self.next() == to
    }
}

impl fmt::Display for TddPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Red => f.write_str("red"),
            Self::Green => f.write_str("green"),
            Self::Refactor => f.write_str("refactor"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_order() {
        assert_eq!(TddPhase::Red.next(), TddPhase::Green);
        assert_eq!(TddPhase::Green.next(), TddPhase::Refactor);
        assert_eq!(TddPhase::Refactor.next(), TddPhase::Red);
    }

    #[test]
    fn test_skipping_a_phase_is_illegal() {
        assert!(TddPhase::Red.can_transition_to(TddPhase::Green));
        assert!(TddPhase::Green.can_transition_to(TddPhase::Green));
        assert!(!TddPhase::Red.can_transition_to(TddPhase::Refactor));
        assert!(!TddPhase::Green.can_transition_to(TddPhase::Red));
    }
}
