//! Repository and runtime entity types.
//!
//! Repository entities (`CaseDeployment`, `CaseDefinition`) are immutable
//! once persisted. Runtime entities (`CaseInstance`, `PlanItemInstance`,
//! `TaskInstance`) carry a revision bumped on every update and live only as
//! long as their case runs.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::PlanItemDefinitionType;
use crate::state::{CaseState, PlanItemState};
use crate::store::Entity;

// ─── Scalar aliases ───────────────────────────────────────────

/// Generated entity id (UUIDv7 text under the default generator).
pub type EntityId = String;

/// Case definition key — stable across versions of the same model.
pub type DefinitionKey = String;

// ─── Tenancy ──────────────────────────────────────────────────

/// Sentinel for "no tenant". Stored instead of an absent value so that
/// tenant equality is a plain string compare everywhere.
pub const NO_TENANT_ID: &str = "";

/// Collapses an optional tenant onto the sentinel.
pub fn tenant_or_default(tenant_id: Option<&str>) -> String {
    match tenant_id {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => NO_TENANT_ID.to_string(),
    }
}

// ─── Deployment ───────────────────────────────────────────────

/// One deployment batch: named resources plus the definitions they produced.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaseDeployment {
    pub id: EntityId,
    pub name: String,
    pub tenant_id: String,
    /// SHA-256 over the name-sorted resource list — the duplicate filter key.
    pub content_hash: [u8; 32],
    /// Resource name → text content (models and synthesized diagrams).
    pub resources: BTreeMap<String, String>,
    /// Ids of the definitions persisted from this deployment.
    pub definition_ids: Vec<EntityId>,
    pub deploy_time: DateTime<Utc>,
    /// True for a first-time deployment; false when the deployer re-runs to
    /// repopulate the cache and must reuse persisted ids and versions.
    #[serde(default)]
    pub is_new: bool,
    #[serde(default)]
    pub deleted: bool,
}

// ─── Case definition ──────────────────────────────────────────

/// One versioned case model. Version is per (key, tenant) and assigned at
/// deploy time; the entity never changes afterwards.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaseDefinition {
    pub id: EntityId,
    pub key: DefinitionKey,
    pub version: i32,
    pub name: Option<String>,
    pub deployment_id: EntityId,
    pub resource_name: String,
    pub diagram_resource_name: Option<String>,
    pub tenant_id: String,
    pub has_start_form_key: bool,
    pub has_graphical_notation: bool,
    pub create_time: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
}

// ─── Case instance ────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaseInstance {
    pub id: EntityId,
    pub case_definition_id: EntityId,
    pub business_key: Option<String>,
    pub tenant_id: String,
    pub state: CaseState,
    /// Case variables — read by sentry if-parts and listener callbacks.
    pub variables: BTreeMap<String, Value>,
    pub start_time: DateTime<Utc>,
    pub revision: i32,
    #[serde(default)]
    pub deleted: bool,
}

impl CaseInstance {
    pub fn new(case_definition_id: EntityId, tenant_id: String) -> Self {
        Self {
            id: String::new(),
            case_definition_id,
            business_key: None,
            tenant_id,
            state: CaseState::Active,
            variables: BTreeMap::new(),
            start_time: Utc::now(),
            revision: 0,
            deleted: false,
        }
    }
}

// ─── Plan item instance ───────────────────────────────────────

/// Runtime instance of one plan item. Forms a tree via `stage_instance_id`
/// (None = direct child of the case plan).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanItemInstance {
    pub id: EntityId,
    pub case_instance_id: EntityId,
    pub case_definition_id: EntityId,
    /// Plan item id in the model this instance was stamped from.
    pub plan_item_id: String,
    pub definition_type: PlanItemDefinitionType,
    pub name: Option<String>,
    pub state: PlanItemState,
    pub stage_instance_id: Option<EntityId>,
    /// (entry criterion index, on-part index) pairs already observed.
    /// Cleared when the instance is dynamically reverted to Available.
    pub satisfied_entry_parts: BTreeSet<(u32, u32)>,
    /// Same bookkeeping for exit criteria.
    pub satisfied_exit_parts: BTreeSet<(u32, u32)>,
    pub create_time: DateTime<Utc>,
    pub revision: i32,
    #[serde(default)]
    pub deleted: bool,
}

impl PlanItemInstance {
    pub fn new(
        case_instance_id: EntityId,
        case_definition_id: EntityId,
        plan_item_id: String,
        definition_type: PlanItemDefinitionType,
        name: Option<String>,
        stage_instance_id: Option<EntityId>,
    ) -> Self {
        Self {
            id: String::new(),
            case_instance_id,
            case_definition_id,
            plan_item_id,
            definition_type,
            name,
            state: PlanItemState::Available,
            stage_instance_id,
            satisfied_entry_parts: BTreeSet::new(),
            satisfied_exit_parts: BTreeSet::new(),
            create_time: Utc::now(),
            revision: 0,
            deleted: false,
        }
    }
}

// ─── Task instance ────────────────────────────────────────────

/// The concrete work artifact behind an active human-task plan item.
/// Created on activation, deleted on completion/termination/revert.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskInstance {
    pub id: EntityId,
    pub case_instance_id: EntityId,
    pub plan_item_instance_id: EntityId,
    pub name: Option<String>,
    pub assignee: Option<String>,
    pub create_time: DateTime<Utc>,
    pub revision: i32,
    #[serde(default)]
    pub deleted: bool,
}

impl TaskInstance {
    pub fn new(
        case_instance_id: EntityId,
        plan_item_instance_id: EntityId,
        name: Option<String>,
        assignee: Option<String>,
    ) -> Self {
        Self {
            id: String::new(),
            case_instance_id,
            plan_item_instance_id,
            name,
            assignee,
            create_time: Utc::now(),
            revision: 0,
            deleted: false,
        }
    }
}

// ─── Entity impls ─────────────────────────────────────────────

impl Entity for CaseDeployment {
    fn id(&self) -> &str {
        &self.id
    }
    fn set_id(&mut self, id: String) {
        self.id = id;
    }
    fn is_deleted(&self) -> bool {
        self.deleted
    }
    fn set_deleted(&mut self, deleted: bool) {
        self.deleted = deleted;
    }
}

impl Entity for CaseDefinition {
    fn id(&self) -> &str {
        &self.id
    }
    fn set_id(&mut self, id: String) {
        self.id = id;
    }
    fn is_deleted(&self) -> bool {
        self.deleted
    }
    fn set_deleted(&mut self, deleted: bool) {
        self.deleted = deleted;
    }
}

impl Entity for CaseInstance {
    fn id(&self) -> &str {
        &self.id
    }
    fn set_id(&mut self, id: String) {
        self.id = id;
    }
    fn is_deleted(&self) -> bool {
        self.deleted
    }
    fn set_deleted(&mut self, deleted: bool) {
        self.deleted = deleted;
    }
    fn revision(&self) -> i32 {
        self.revision
    }
    fn bump_revision(&mut self) {
        self.revision += 1;
    }
}

impl Entity for PlanItemInstance {
    fn id(&self) -> &str {
        &self.id
    }
    fn set_id(&mut self, id: String) {
        self.id = id;
    }
    fn is_deleted(&self) -> bool {
        self.deleted
    }
    fn set_deleted(&mut self, deleted: bool) {
        self.deleted = deleted;
    }
    fn revision(&self) -> i32 {
        self.revision
    }
    fn bump_revision(&mut self) {
        self.revision += 1;
    }
}

impl Entity for TaskInstance {
    fn id(&self) -> &str {
        &self.id
    }
    fn set_id(&mut self, id: String) {
        self.id = id;
    }
    fn is_deleted(&self) -> bool {
        self.deleted
    }
    fn set_deleted(&mut self, deleted: bool) {
        self.deleted = deleted;
    }
    fn revision(&self) -> i32 {
        self.revision
    }
    fn bump_revision(&mut self) {
        self.revision += 1;
    }
}
