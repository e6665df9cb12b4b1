//! Case and plan-item lifecycle states.
//!
//! Plan items move through a fixed directed graph of states. Transitions are
//! labeled (`PlanItemTransition`); each label has a fixed target state and a
//! fixed set of legal source states, so an illegal move is rejected before
//! any entity is touched. `Completed` and `Terminated` are absorbing: no
//! transition accepts them as a source.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CmmnError;

// ─── Case state ───────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseState {
    Active,
    Completed,
    Terminated,
    Suspended,
}

impl CaseState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CaseState::Completed | CaseState::Terminated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CaseState::Active => "active",
            CaseState::Completed => "completed",
            CaseState::Terminated => "terminated",
            CaseState::Suspended => "suspended",
        }
    }
}

impl fmt::Display for CaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaseState {
    type Err = CmmnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(CaseState::Active),
            "completed" => Ok(CaseState::Completed),
            "terminated" => Ok(CaseState::Terminated),
            "suspended" => Ok(CaseState::Suspended),
            other => Err(CmmnError::IllegalArgument(format!(
                "unknown case state '{other}'"
            ))),
        }
    }
}

// ─── Plan item state ──────────────────────────────────────────

/// The runtime-visible plan item states. Closed set: queries, listener
/// filters and tests all match against these seven.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanItemState {
    Available,
    Enabled,
    Active,
    Disabled,
    Completed,
    Terminated,
    Suspended,
}

impl PlanItemState {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlanItemState::Completed | PlanItemState::Terminated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanItemState::Available => "available",
            PlanItemState::Enabled => "enabled",
            PlanItemState::Active => "active",
            PlanItemState::Disabled => "disabled",
            PlanItemState::Completed => "completed",
            PlanItemState::Terminated => "terminated",
            PlanItemState::Suspended => "suspended",
        }
    }
}

impl fmt::Display for PlanItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanItemState {
    type Err = CmmnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(PlanItemState::Available),
            "enabled" => Ok(PlanItemState::Enabled),
            "active" => Ok(PlanItemState::Active),
            "disabled" => Ok(PlanItemState::Disabled),
            "completed" => Ok(PlanItemState::Completed),
            "terminated" => Ok(PlanItemState::Terminated),
            "suspended" => Ok(PlanItemState::Suspended),
            other => Err(CmmnError::IllegalArgument(format!(
                "unknown plan item state '{other}'"
            ))),
        }
    }
}

// ─── Transitions ──────────────────────────────────────────────

/// Labeled edges of the plan-item lifecycle graph. The label doubles as the
/// standard event name sentries listen for (`on: { plan_item, event }`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanItemTransition {
    /// Instantiation into `Available`. Never valid from an existing state.
    Create,
    Enable,
    Disable,
    Reenable,
    Start,
    ManualStart,
    Complete,
    /// Milestones and user event listeners fire directly from `Available`.
    Occur,
    Terminate,
    /// Exit-criterion / parent-driven termination. Same target as
    /// `Terminate` but a distinct event for sentries and listeners.
    Exit,
    Suspend,
    Resume,
    /// Dynamic revert of an active instance. Only state-change operations
    /// produce this edge; sentry evaluation never does.
    MakeAvailable,
}

impl PlanItemTransition {
    /// The state this transition lands in. Every label has exactly one.
    pub fn target(&self) -> PlanItemState {
        match self {
            PlanItemTransition::Create => PlanItemState::Available,
            PlanItemTransition::Enable => PlanItemState::Enabled,
            PlanItemTransition::Disable => PlanItemState::Disabled,
            PlanItemTransition::Reenable => PlanItemState::Enabled,
            PlanItemTransition::Start => PlanItemState::Active,
            PlanItemTransition::ManualStart => PlanItemState::Active,
            PlanItemTransition::Complete => PlanItemState::Completed,
            PlanItemTransition::Occur => PlanItemState::Completed,
            PlanItemTransition::Terminate => PlanItemState::Terminated,
            PlanItemTransition::Exit => PlanItemState::Terminated,
            PlanItemTransition::Suspend => PlanItemState::Suspended,
            PlanItemTransition::Resume => PlanItemState::Active,
            PlanItemTransition::MakeAvailable => PlanItemState::Available,
        }
    }

    /// Whether `from` is a legal source for this transition.
    pub fn is_valid_from(&self, from: PlanItemState) -> bool {
        use PlanItemState::*;
        match (self, from) {
            (PlanItemTransition::Create, _) => false,
            (PlanItemTransition::Enable, Available) => true,
            (PlanItemTransition::Disable, Enabled) => true,
            (PlanItemTransition::Reenable, Disabled) => true,
            (PlanItemTransition::Start, Available) => true,
            (PlanItemTransition::ManualStart, Enabled) => true,
            (PlanItemTransition::Complete, Active) => true,
            (PlanItemTransition::Occur, Available) => true,
            (PlanItemTransition::Terminate, s) | (PlanItemTransition::Exit, s) => !s.is_terminal(),
            (PlanItemTransition::Suspend, Active) => true,
            (PlanItemTransition::Resume, Suspended) => true,
            (PlanItemTransition::MakeAvailable, Active) => true,
            _ => false,
        }
    }

    /// Validates and returns the target state, or the typed rejection.
    pub fn apply(
        &self,
        plan_item_id: &str,
        from: PlanItemState,
    ) -> Result<PlanItemState, CmmnError> {
        if !self.is_valid_from(from) {
            return Err(CmmnError::InvalidTransition {
                plan_item_id: plan_item_id.to_string(),
                from: from.as_str().to_string(),
                transition: self.as_str().to_string(),
            });
        }
        Ok(self.target())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanItemTransition::Create => "create",
            PlanItemTransition::Enable => "enable",
            PlanItemTransition::Disable => "disable",
            PlanItemTransition::Reenable => "reenable",
            PlanItemTransition::Start => "start",
            PlanItemTransition::ManualStart => "manual_start",
            PlanItemTransition::Complete => "complete",
            PlanItemTransition::Occur => "occur",
            PlanItemTransition::Terminate => "terminate",
            PlanItemTransition::Exit => "exit",
            PlanItemTransition::Suspend => "suspend",
            PlanItemTransition::Resume => "resume",
            PlanItemTransition::MakeAvailable => "make_available",
        }
    }
}

impl fmt::Display for PlanItemTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
