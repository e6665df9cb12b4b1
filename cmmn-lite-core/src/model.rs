//! Resolved case model.
//!
//! Built from the authoring DTOs at deploy time: every plan item indexed by
//! id, parent links resolved, sentry references checked. The runtime only
//! ever sees this form.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CmmnError;
use crate::state::{CaseState, PlanItemState, PlanItemTransition};

// ─── Plan item kinds ──────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanItemDefinitionType {
    HumanTask,
    Stage,
    Milestone,
    UserEventListener,
}

impl PlanItemDefinitionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanItemDefinitionType::HumanTask => "human_task",
            PlanItemDefinitionType::Stage => "stage",
            PlanItemDefinitionType::Milestone => "milestone",
            PlanItemDefinitionType::UserEventListener => "user_event_listener",
        }
    }
}

// ─── Sentries ─────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Neq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
}

/// If-part condition over case variables. A missing variable makes the
/// condition false for every operator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariableCondition {
    pub variable: String,
    pub op: ConditionOp,
    pub value: Value,
}

impl VariableCondition {
    pub fn evaluate(&self, variables: &BTreeMap<String, Value>) -> bool {
        let Some(actual) = variables.get(&self.variable) else {
            return false;
        };
        match self.op {
            ConditionOp::Eq => actual == &self.value,
            ConditionOp::Neq => actual != &self.value,
            ConditionOp::Gt => compare_values(actual, &self.value) == Some(std::cmp::Ordering::Greater),
            ConditionOp::Lt => compare_values(actual, &self.value) == Some(std::cmp::Ordering::Less),
        }
    }
}

/// Ordered comparison for the value kinds conditions use. Mixed or
/// unordered kinds compare as incomparable (None).
fn compare_values(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64().partial_cmp(&y.as_f64()),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// One on-part: "source item made this transition".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OnPartDef {
    pub source_plan_item_id: String,
    pub standard_event: PlanItemTransition,
}

/// A sentry fires when every on-part has been observed and the if-part
/// (when present) holds. No parts at all means the sentry never gates
/// anything — the converter rejects that shape during validation.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct SentryDef {
    pub on_parts: Vec<OnPartDef>,
    pub if_part: Option<VariableCondition>,
}

// ─── Lifecycle listener declarations ──────────────────────────

/// How a declared listener is realized at dispatch time. Resolution goes
/// through the engine's listener registry; nothing is instantiated from
/// names outside it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ListenerImplementation {
    /// Registered factory invoked per dispatch with the declared fields.
    ClassDelegate {
        class_name: String,
        #[serde(default)]
        fields: BTreeMap<String, Value>,
    },
    /// Registered one-shot callback, `${name}` form.
    Expression { expression: String },
    /// Registered listener bean, `${name}` form; must expose the expected
    /// listener capability or resolution fails. Beans are registered
    /// pre-configured, so `fields` here are declaration data only; class
    /// factories are the injection point that consumes fields.
    DelegateExpression {
        expression: String,
        #[serde(default)]
        fields: BTreeMap<String, Value>,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CaseLifecycleListenerDef {
    /// Exact source-state filter; `None` matches any.
    pub source_state: Option<CaseState>,
    /// Exact target-state filter; `None` matches any.
    pub target_state: Option<CaseState>,
    pub implementation: ListenerImplementation,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanItemLifecycleListenerDef {
    pub source_state: Option<PlanItemState>,
    pub target_state: Option<PlanItemState>,
    /// Restricts dispatch to these definition types; empty = all types.
    #[serde(default)]
    pub item_types: Vec<PlanItemDefinitionType>,
    pub implementation: ListenerImplementation,
}

// ─── Plan item definition ─────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanItemDefinition {
    pub id: String,
    pub name: Option<String>,
    pub definition_type: PlanItemDefinitionType,
    /// Enclosing stage plan item id; `None` = direct child of the case plan.
    pub parent_stage_id: Option<String>,
    /// Child plan item ids in declaration order. Only stages have children.
    pub children: Vec<String>,
    /// A required item blocks its stage (and the case plan) from completing
    /// while still Available.
    pub required: bool,
    /// Manual activation: entry produces Enabled instead of Active.
    pub manual_activation: bool,
    /// Stage-only: complete as soon as nothing blocks, even with
    /// non-required Available children.
    pub autocomplete: bool,
    pub entry_criteria: Vec<SentryDef>,
    pub exit_criteria: Vec<SentryDef>,
    pub listeners: Vec<PlanItemLifecycleListenerDef>,
    /// Human-task only: initial assignee for the task artifact.
    pub assignee: Option<String>,
}

// ─── Case model ───────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaseModel {
    pub key: String,
    pub name: Option<String>,
    pub start_form_key: Option<String>,
    /// Case-plan completion mode, same meaning as on a stage.
    pub autocomplete: bool,
    pub listeners: Vec<CaseLifecycleListenerDef>,
    /// Direct children of the case plan, declaration order.
    pub root_items: Vec<String>,
    /// Every plan item in the model, depth-first declaration order.
    pub declaration_order: Vec<String>,
    pub plan_items: HashMap<String, PlanItemDefinition>,
}

impl CaseModel {
    pub fn plan_item(&self, id: &str) -> Option<&PlanItemDefinition> {
        self.plan_items.get(id)
    }

    pub fn require_plan_item(&self, id: &str) -> Result<&PlanItemDefinition, CmmnError> {
        self.plan_items
            .get(id)
            .ok_or_else(|| CmmnError::not_found("plan item definition", id))
    }

    /// Direct children of a stage (`None` = the case plan), declared order.
    pub fn direct_children(&self, stage_id: Option<&str>) -> Vec<&PlanItemDefinition> {
        let ids: &[String] = match stage_id {
            None => &self.root_items,
            Some(s) => self
                .plan_items
                .get(s)
                .map(|d| d.children.as_slice())
                .unwrap_or(&[]),
        };
        ids.iter().filter_map(|id| self.plan_items.get(id)).collect()
    }

    /// Enclosing stage ids of an item, nearest first.
    pub fn ancestor_stages(&self, item_id: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = self
            .plan_items
            .get(item_id)
            .and_then(|d| d.parent_stage_id.clone());
        while let Some(stage_id) = current {
            current = self
                .plan_items
                .get(&stage_id)
                .and_then(|d| d.parent_stage_id.clone());
            chain.push(stage_id);
        }
        chain
    }

    /// Whether `stage_id` encloses `item_id` (at any depth).
    pub fn is_ancestor_stage(&self, stage_id: &str, item_id: &str) -> bool {
        self.ancestor_stages(item_id).iter().any(|s| s == stage_id)
    }
}
