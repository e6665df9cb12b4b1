use serde::{Deserialize, Serialize};

use crate::model::{CaseLifecycleListenerDef, PlanItemLifecycleListenerDef, VariableCondition};
use crate::state::PlanItemTransition;

// ── Helper defaults for serde ──

fn default_complete() -> PlanItemTransition {
    PlanItemTransition::Complete
}

fn is_false(v: &bool) -> bool {
    !v
}

// ── Top-level DTO ──

/// The YAML-facing shape of one case model resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseModelDto {
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_form_key: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub autocomplete: bool,
    /// Case lifecycle listeners, declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listeners: Vec<CaseLifecycleListenerDef>,
    pub plan_items: Vec<PlanItemDto>,
}

// ── Sentry ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentryDto {
    #[serde(default)]
    pub on: Vec<OnPartDto>,
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub if_part: Option<VariableCondition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnPartDto {
    pub plan_item: String,
    #[serde(default = "default_complete")]
    pub event: PlanItemTransition,
}

// ── Plan item (tagged enum) ──

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum PlanItemDto {
    HumanTask {
        id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        assignee: Option<String>,
        #[serde(default, skip_serializing_if = "is_false")]
        required: bool,
        #[serde(default, skip_serializing_if = "is_false")]
        manual_activation: bool,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        entry: Vec<SentryDto>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        exit: Vec<SentryDto>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        listeners: Vec<PlanItemLifecycleListenerDef>,
    },
    Milestone {
        id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "is_false")]
        required: bool,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        entry: Vec<SentryDto>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        exit: Vec<SentryDto>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        listeners: Vec<PlanItemLifecycleListenerDef>,
    },
    UserEventListener {
        id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        exit: Vec<SentryDto>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        listeners: Vec<PlanItemLifecycleListenerDef>,
    },
    Stage {
        id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "is_false")]
        required: bool,
        #[serde(default, skip_serializing_if = "is_false")]
        manual_activation: bool,
        #[serde(default, skip_serializing_if = "is_false")]
        autocomplete: bool,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        entry: Vec<SentryDto>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        exit: Vec<SentryDto>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        listeners: Vec<PlanItemLifecycleListenerDef>,
        /// Nested children, declaration order.
        plan_items: Vec<PlanItemDto>,
    },
}

// ── PlanItemDto helpers ──

impl PlanItemDto {
    /// Returns the id regardless of variant.
    pub fn id(&self) -> &str {
        match self {
            PlanItemDto::HumanTask { id, .. } => id,
            PlanItemDto::Milestone { id, .. } => id,
            PlanItemDto::UserEventListener { id, .. } => id,
            PlanItemDto::Stage { id, .. } => id,
        }
    }

    pub fn entry_sentries(&self) -> &[SentryDto] {
        match self {
            PlanItemDto::HumanTask { entry, .. }
            | PlanItemDto::Milestone { entry, .. }
            | PlanItemDto::Stage { entry, .. } => entry,
            PlanItemDto::UserEventListener { .. } => &[],
        }
    }

    pub fn exit_sentries(&self) -> &[SentryDto] {
        match self {
            PlanItemDto::HumanTask { exit, .. }
            | PlanItemDto::Milestone { exit, .. }
            | PlanItemDto::UserEventListener { exit, .. }
            | PlanItemDto::Stage { exit, .. } => exit,
        }
    }

    pub fn children(&self) -> &[PlanItemDto] {
        match self {
            PlanItemDto::Stage { plan_items, .. } => plan_items,
            _ => &[],
        }
    }
}
