//! The engine facade.
//!
//! `CmmnLiteEngine` ties the pieces together: the definition registry for
//! deployments, the in-memory stores for runtime state, the listener
//! registry for lifecycle callbacks, and the command executor that makes
//! every public operation atomic. Each operation runs as one command;
//! inside it, plan item transitions feed sentry bookkeeping and the
//! evaluation loop drives the model to a fixed point before the command
//! closes.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::deploy::{CaseDefinitionCacheEntry, CmmnDeployer, DeploymentBuilder};
use crate::error::CmmnError;
use crate::listener::{
    notify_case_state_change, notify_plan_item_state_change, CaseLifecycleListener,
    ListenerRegistry, PlanItemLifecycleListener,
};
use crate::model::{CaseModel, PlanItemDefinition, PlanItemDefinitionType, SentryDef};
use crate::query::{
    order_case_instances, order_plan_item_instances, order_tasks, parse_order_by,
    CaseInstanceQuery, PlanItemInstanceQuery, TaskQuery,
};
use crate::registry::DefinitionRegistry;
use crate::state::{CaseState, PlanItemState, PlanItemTransition};
use crate::store::{CommandContext, CommandExecutor, IdGenerator, UuidV7IdGenerator};
use crate::store_memory::{sort_and_paginate, MemoryDataManager};
use crate::types::{CaseDefinition, CaseDeployment, CaseInstance, PlanItemInstance, TaskInstance};

/// Evaluation rounds per command before giving up. Each round is a full
/// pass, so this bounds the longest sentry dependency chain, not the item
/// count.
const MAX_EVALUATION_ROUNDS: usize = 50;

// ─── Builder ──────────────────────────────────────────────────

/// Configures and assembles an engine. Everything has a default: UUIDv7
/// ids, an empty listener registry, no global listeners.
pub struct CmmnLiteEngineBuilder {
    id_generator: Arc<dyn IdGenerator>,
    listener_registry: ListenerRegistry,
    case_listeners: Vec<Arc<dyn CaseLifecycleListener>>,
    plan_item_listeners: Vec<Arc<dyn PlanItemLifecycleListener>>,
}

impl CmmnLiteEngineBuilder {
    pub fn new() -> Self {
        Self {
            id_generator: Arc::new(UuidV7IdGenerator),
            listener_registry: ListenerRegistry::default(),
            case_listeners: Vec::new(),
            plan_item_listeners: Vec::new(),
        }
    }

    pub fn id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = id_generator;
        self
    }

    /// Replaces the listener registry (class factories, beans, expressions
    /// that model-declared listeners resolve against).
    pub fn listener_registry(mut self, registry: ListenerRegistry) -> Self {
        self.listener_registry = registry;
        self
    }

    /// Global case listener, invoked after model-declared ones.
    pub fn add_case_listener(mut self, listener: Arc<dyn CaseLifecycleListener>) -> Self {
        self.case_listeners.push(listener);
        self
    }

    /// Global plan item listener, invoked after model-declared ones.
    pub fn add_plan_item_listener(mut self, listener: Arc<dyn PlanItemLifecycleListener>) -> Self {
        self.plan_item_listeners.push(listener);
        self
    }

    pub fn build(self) -> CmmnLiteEngine {
        let deployments = MemoryDataManager::new("case deployment", self.id_generator.clone());
        let definitions = MemoryDataManager::new("case definition", self.id_generator.clone());
        let deployer = CmmnDeployer::new(deployments.clone(), definitions.clone());
        CmmnLiteEngine {
            executor: CommandExecutor::new(),
            registry: DefinitionRegistry::new(deployer, deployments, definitions),
            case_instances: MemoryDataManager::new("case instance", self.id_generator.clone()),
            plan_item_instances: MemoryDataManager::new(
                "plan item instance",
                self.id_generator.clone(),
            ),
            tasks: MemoryDataManager::new("task", self.id_generator),
            listener_registry: self.listener_registry,
            case_listeners: self.case_listeners,
            plan_item_listeners: self.plan_item_listeners,
        }
    }
}

impl Default for CmmnLiteEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Start builder ────────────────────────────────────────────

/// Parameters for starting a case. Either a definition id or a key is
/// required; when both are set the id wins. The instance always takes its
/// tenant from the resolved definition.
#[derive(Debug, Default)]
pub struct StartCaseBuilder {
    definition_id: Option<String>,
    definition_key: Option<String>,
    tenant_id: Option<String>,
    business_key: Option<String>,
    variables: BTreeMap<String, Value>,
}

impl StartCaseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_definition_id(mut self, definition_id: impl Into<String>) -> Self {
        self.definition_id = Some(definition_id.into());
        self
    }

    /// Resolves the latest version of the key at start time.
    pub fn by_key(mut self, key: impl Into<String>) -> Self {
        self.definition_key = Some(key.into());
        self
    }

    /// Tenant to resolve the key in. Ignored when starting by id.
    pub fn tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn business_key(mut self, business_key: impl Into<String>) -> Self {
        self.business_key = Some(business_key.into());
        self
    }

    pub fn variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn variables(mut self, variables: BTreeMap<String, Value>) -> Self {
        self.variables.extend(variables);
        self
    }
}

// ─── Engine ───────────────────────────────────────────────────

pub struct CmmnLiteEngine {
    pub(crate) executor: CommandExecutor,
    pub(crate) registry: DefinitionRegistry,
    pub(crate) case_instances: MemoryDataManager<CaseInstance>,
    pub(crate) plan_item_instances: MemoryDataManager<PlanItemInstance>,
    pub(crate) tasks: MemoryDataManager<TaskInstance>,
    pub(crate) listener_registry: ListenerRegistry,
    pub(crate) case_listeners: Vec<Arc<dyn CaseLifecycleListener>>,
    pub(crate) plan_item_listeners: Vec<Arc<dyn PlanItemLifecycleListener>>,
}

impl Default for CmmnLiteEngine {
    fn default() -> Self {
        CmmnLiteEngineBuilder::new().build()
    }
}

impl CmmnLiteEngine {
    pub fn builder() -> CmmnLiteEngineBuilder {
        CmmnLiteEngineBuilder::new()
    }

    /// The definition registry: cache lookups, latest-by-key resolution,
    /// eviction.
    pub fn registry(&self) -> &DefinitionRegistry {
        &self.registry
    }

    // ── Deployment ──

    /// Runs a deployment batch. Duplicate content against the latest
    /// deployment of the same name and tenant short-circuits to the
    /// already-persisted records.
    pub fn deploy(&self, builder: DeploymentBuilder) -> Result<CaseDeployment, CmmnError> {
        let (deployment, settings) = builder.build();
        self.executor.execute(|ctx| {
            self.registry
                .deploy(ctx, deployment, &settings)
                .map(|outcome| outcome.deployment)
        })
    }

    pub fn find_latest_definition_by_key(
        &self,
        key: &str,
        tenant_id: Option<&str>,
    ) -> Result<CaseDefinition, CmmnError> {
        self.registry.find_latest_by_key(key, tenant_id)
    }

    /// Cascades: definitions of the deployment, the deployment record, and
    /// the cache entries.
    pub fn remove_deployment(&self, deployment_id: &str) -> Result<(), CmmnError> {
        self.executor
            .execute(|ctx| self.registry.remove_deployment(ctx, deployment_id))
    }

    // ── Case lifecycle ──

    /// Starts a case: resolves the definition, creates the instance,
    /// stamps out the root plan items and evaluates to a fixed point.
    ///
    /// A model that has nothing blocking completes immediately; the
    /// returned snapshot is then already `Completed` and flagged deleted,
    /// because the runtime rows were removed before the command closed.
    pub fn start_case(&self, builder: StartCaseBuilder) -> Result<CaseInstance, CmmnError> {
        self.executor.execute(|ctx| {
            let entry = self.resolve_start_definition(ctx, &builder)?;
            let mut case = CaseInstance::new(
                entry.definition.id.clone(),
                entry.definition.tenant_id.clone(),
            );
            case.business_key = builder.business_key.clone();
            case.variables = builder.variables.clone();
            let case = self.case_instances.insert(ctx, case)?;
            info!(
                case_instance_id = %case.id,
                case_definition_key = %entry.definition.key,
                case_definition_version = entry.definition.version,
                "case started"
            );
            notify_case_state_change(
                &self.listener_registry,
                &entry.model.listeners,
                &self.case_listeners,
                &case,
                None,
                CaseState::Active,
            )?;
            for def_id in &entry.model.root_items {
                let def = entry.model.require_plan_item(def_id)?;
                self.instantiate_plan_item(ctx, &entry.model, &case, def, None)?;
            }
            self.evaluate(ctx, &case.id)?;
            self.case_instances.get_by_id(ctx, &case.id)
        })
    }

    fn resolve_start_definition(
        &self,
        ctx: &CommandContext,
        builder: &StartCaseBuilder,
    ) -> Result<Arc<CaseDefinitionCacheEntry>, CmmnError> {
        let definition_id = match (&builder.definition_id, &builder.definition_key) {
            (Some(id), _) => id.clone(),
            (None, Some(key)) => {
                self.registry
                    .find_latest_by_key(key, builder.tenant_id.as_deref())?
                    .id
            }
            (None, None) => {
                return Err(CmmnError::IllegalArgument(
                    "starting a case requires a definition id or a definition key".into(),
                ))
            }
        };
        self.registry.ensure_loaded(ctx, &definition_id)
    }

    /// Terminates a running case: every plan item instance is exited
    /// (innermost first), the case record moves to `Terminated`, and the
    /// runtime rows are removed.
    pub fn terminate_case(&self, case_instance_id: &str) -> Result<(), CmmnError> {
        self.executor.execute(|ctx| {
            let case = self.case_instances.get_by_id(ctx, case_instance_id)?;
            let entry = self.registry.ensure_loaded(ctx, &case.case_definition_id)?;
            for item in self.root_plan_items(&case.id) {
                self.exit_plan_item(ctx, &entry.model, &case, item)?;
            }
            self.finish_case(ctx, &entry.model, case, CaseState::Terminated)
        })
    }

    // ── Variables ──

    pub fn set_variable(
        &self,
        case_instance_id: &str,
        name: impl Into<String>,
        value: Value,
    ) -> Result<(), CmmnError> {
        self.set_variables(case_instance_id, BTreeMap::from([(name.into(), value)]))
    }

    /// Merges the variables into the case and re-evaluates sentries, so a
    /// condition that just turned true fires in the same command.
    pub fn set_variables(
        &self,
        case_instance_id: &str,
        variables: BTreeMap<String, Value>,
    ) -> Result<(), CmmnError> {
        self.executor.execute(|ctx| {
            let mut case = self.require_active_case(ctx, case_instance_id)?;
            case.variables.extend(variables);
            let case = self.case_instances.update(ctx, case)?;
            self.evaluate(ctx, &case.id)
        })
    }

    pub fn remove_variable(&self, case_instance_id: &str, name: &str) -> Result<(), CmmnError> {
        self.executor.execute(|ctx| {
            let mut case = self.require_active_case(ctx, case_instance_id)?;
            case.variables.remove(name);
            let case = self.case_instances.update(ctx, case)?;
            self.evaluate(ctx, &case.id)
        })
    }

    fn require_active_case(
        &self,
        ctx: &CommandContext,
        case_instance_id: &str,
    ) -> Result<CaseInstance, CmmnError> {
        let case = self.case_instances.get_by_id(ctx, case_instance_id)?;
        if case.state != CaseState::Active {
            return Err(CmmnError::IllegalState(format!(
                "case instance '{}' is {} and no longer accepts changes",
                case.id, case.state
            )));
        }
        Ok(case)
    }

    // ── Task and event operations ──

    /// Completes the task and its plan item, then evaluates whatever that
    /// unblocks.
    pub fn complete_task(&self, task_id: &str) -> Result<(), CmmnError> {
        self.executor.execute(|ctx| {
            let task = self.tasks.get_by_id(ctx, task_id)?;
            let item = self
                .plan_item_instances
                .get_by_id(ctx, &task.plan_item_instance_id)?;
            let case = self.case_instances.get_by_id(ctx, &item.case_instance_id)?;
            let entry = self.registry.ensure_loaded(ctx, &case.case_definition_id)?;
            self.transition_plan_item(ctx, &entry.model, &case, item, PlanItemTransition::Complete)?;
            self.evaluate(ctx, &case.id)
        })
    }

    /// Fires an available user event listener. The instance must actually
    /// be one; anything else is rejected before any state changes.
    pub fn trigger_user_event_listener(
        &self,
        plan_item_instance_id: &str,
    ) -> Result<(), CmmnError> {
        self.executor.execute(|ctx| {
            let item = self
                .plan_item_instances
                .get_by_id(ctx, plan_item_instance_id)?;
            if item.definition_type != PlanItemDefinitionType::UserEventListener {
                return Err(CmmnError::IllegalArgument(format!(
                    "plan item instance '{}' is a {}, not a user event listener",
                    item.id,
                    item.definition_type.as_str()
                )));
            }
            let case = self.case_instances.get_by_id(ctx, &item.case_instance_id)?;
            let entry = self.registry.ensure_loaded(ctx, &case.case_definition_id)?;
            self.transition_plan_item(ctx, &entry.model, &case, item, PlanItemTransition::Occur)?;
            self.evaluate(ctx, &case.id)
        })
    }

    // ── Manual planning-table operations ──

    /// `Enabled` → `Active` for an item waiting on manual activation.
    pub fn start_plan_item(&self, plan_item_instance_id: &str) -> Result<(), CmmnError> {
        self.apply_manual_transition(plan_item_instance_id, PlanItemTransition::ManualStart)
    }

    /// `Enabled` → `Disabled`; the item stops blocking its container.
    pub fn disable_plan_item(&self, plan_item_instance_id: &str) -> Result<(), CmmnError> {
        self.apply_manual_transition(plan_item_instance_id, PlanItemTransition::Disable)
    }

    /// `Disabled` → `Enabled`, putting the item back on the table.
    pub fn enable_plan_item(&self, plan_item_instance_id: &str) -> Result<(), CmmnError> {
        self.apply_manual_transition(plan_item_instance_id, PlanItemTransition::Reenable)
    }

    fn apply_manual_transition(
        &self,
        plan_item_instance_id: &str,
        transition: PlanItemTransition,
    ) -> Result<(), CmmnError> {
        self.executor.execute(|ctx| {
            let item = self
                .plan_item_instances
                .get_by_id(ctx, plan_item_instance_id)?;
            let case = self.case_instances.get_by_id(ctx, &item.case_instance_id)?;
            let entry = self.registry.ensure_loaded(ctx, &case.case_definition_id)?;
            self.transition_plan_item(ctx, &entry.model, &case, item, transition)?;
            self.evaluate(ctx, &case.id)
        })
    }

    // ── Queries ──

    pub fn get_case_instance(&self, case_instance_id: &str) -> Option<CaseInstance> {
        self.case_instances
            .find_by(|c| c.id == case_instance_id)
            .pop()
    }

    pub fn get_plan_item_instance(&self, plan_item_instance_id: &str) -> Option<PlanItemInstance> {
        self.plan_item_instances
            .find_by(|i| i.id == plan_item_instance_id)
            .pop()
    }

    pub fn get_task(&self, task_id: &str) -> Option<TaskInstance> {
        self.tasks.find_by(|t| t.id == task_id).pop()
    }

    pub fn query_case_instances(
        &self,
        query: &CaseInstanceQuery,
    ) -> Result<Vec<CaseInstance>, CmmnError> {
        let mut items = self.case_instances.find_by(|c| query.matches(c));
        match &query.order_by {
            Some(text) => order_case_instances(&mut items, &parse_order_by(text)?)?,
            None => items.sort_by(|a, b| a.id.cmp(&b.id)),
        }
        Ok(sort_and_paginate(items, None, query.offset, query.limit))
    }

    pub fn query_plan_item_instances(
        &self,
        query: &PlanItemInstanceQuery,
    ) -> Result<Vec<PlanItemInstance>, CmmnError> {
        let mut items = self.plan_item_instances.find_by(|i| query.matches(i));
        match &query.order_by {
            Some(text) => order_plan_item_instances(&mut items, &parse_order_by(text)?)?,
            None => items.sort_by(|a, b| a.id.cmp(&b.id)),
        }
        Ok(sort_and_paginate(items, None, query.offset, query.limit))
    }

    pub fn query_tasks(&self, query: &TaskQuery) -> Result<Vec<TaskInstance>, CmmnError> {
        let mut items = self.tasks.find_by(|t| query.matches(t));
        match &query.order_by {
            Some(text) => order_tasks(&mut items, &parse_order_by(text)?)?,
            None => items.sort_by(|a, b| a.id.cmp(&b.id)),
        }
        Ok(sort_and_paginate(items, None, query.offset, query.limit))
    }

    // ── Transition core ──

    /// Creates an instance in `Available`, dispatches the creation event
    /// and records `create` on-parts for sentries listening on it.
    pub(crate) fn instantiate_plan_item(
        &self,
        ctx: &CommandContext,
        model: &CaseModel,
        case: &CaseInstance,
        def: &PlanItemDefinition,
        stage_instance_id: Option<String>,
    ) -> Result<PlanItemInstance, CmmnError> {
        let item = PlanItemInstance::new(
            case.id.clone(),
            case.case_definition_id.clone(),
            def.id.clone(),
            def.definition_type,
            def.name.clone(),
            stage_instance_id,
        );
        let item = self.plan_item_instances.insert(ctx, item)?;
        debug!(
            plan_item_instance_id = %item.id,
            plan_item_id = %item.plan_item_id,
            "plan item instantiated"
        );
        self.dispatch_plan_item_listeners(model, &item, None, PlanItemState::Available)?;
        self.record_on_part_event(ctx, model, case, &item, PlanItemTransition::Create)?;
        Ok(item)
    }

    /// Applies one lifecycle transition: validates it against the state
    /// machine, persists the new state, dispatches listeners, records the
    /// standard event for dependent sentries and runs the side effects
    /// (task artifacts, stage child instantiation).
    pub(crate) fn transition_plan_item(
        &self,
        ctx: &CommandContext,
        model: &CaseModel,
        case: &CaseInstance,
        mut item: PlanItemInstance,
        transition: PlanItemTransition,
    ) -> Result<PlanItemInstance, CmmnError> {
        let old = item.state;
        let new = transition.apply(&item.plan_item_id, old)?;
        item.state = new;
        let item = self.plan_item_instances.update(ctx, item)?;
        debug!(
            plan_item_instance_id = %item.id,
            plan_item_id = %item.plan_item_id,
            from = %old,
            transition = %transition,
            "plan item transitioned"
        );
        self.dispatch_plan_item_listeners(model, &item, Some(old), new)?;
        self.record_on_part_event(ctx, model, case, &item, transition)?;
        self.apply_transition_side_effects(ctx, model, case, &item, old, new)?;
        Ok(item)
    }

    /// Exits an instance, children before their stage so listeners see the
    /// tree come down innermost first.
    pub(crate) fn exit_plan_item(
        &self,
        ctx: &CommandContext,
        model: &CaseModel,
        case: &CaseInstance,
        item: PlanItemInstance,
    ) -> Result<(), CmmnError> {
        if item.state.is_terminal() {
            return Ok(());
        }
        if item.definition_type == PlanItemDefinitionType::Stage {
            for child in self.stage_children(&item.id, |i| !i.state.is_terminal()) {
                self.exit_plan_item(ctx, model, case, child)?;
            }
        }
        self.transition_plan_item(ctx, model, case, item, PlanItemTransition::Exit)?;
        Ok(())
    }

    fn dispatch_plan_item_listeners(
        &self,
        model: &CaseModel,
        item: &PlanItemInstance,
        old: Option<PlanItemState>,
        new: PlanItemState,
    ) -> Result<(), CmmnError> {
        let declared = model
            .plan_item(&item.plan_item_id)
            .map(|d| d.listeners.as_slice())
            .unwrap_or(&[]);
        notify_plan_item_state_change(
            &self.listener_registry,
            declared,
            &self.plan_item_listeners,
            item,
            old,
            new,
        )
    }

    /// Marks `(criterion, part)` pairs as observed on every live instance
    /// whose sentries listen for this transition of the source item.
    fn record_on_part_event(
        &self,
        ctx: &CommandContext,
        model: &CaseModel,
        case: &CaseInstance,
        source: &PlanItemInstance,
        transition: PlanItemTransition,
    ) -> Result<(), CmmnError> {
        for def_id in &model.declaration_order {
            let Some(def) = model.plan_item(def_id) else {
                continue;
            };
            let entry_hits = matching_parts(&def.entry_criteria, &source.plan_item_id, transition);
            let exit_hits = matching_parts(&def.exit_criteria, &source.plan_item_id, transition);
            if entry_hits.is_empty() && exit_hits.is_empty() {
                continue;
            }
            let observers = self.plan_item_instances.find_by(|i| {
                i.case_instance_id == case.id
                    && &i.plan_item_id == def_id
                    && !i.state.is_terminal()
            });
            for mut observer in observers {
                let before =
                    observer.satisfied_entry_parts.len() + observer.satisfied_exit_parts.len();
                observer.satisfied_entry_parts.extend(entry_hits.iter().copied());
                observer.satisfied_exit_parts.extend(exit_hits.iter().copied());
                if observer.satisfied_entry_parts.len() + observer.satisfied_exit_parts.len()
                    > before
                {
                    self.plan_item_instances.update(ctx, observer)?;
                }
            }
        }
        Ok(())
    }

    fn apply_transition_side_effects(
        &self,
        ctx: &CommandContext,
        model: &CaseModel,
        case: &CaseInstance,
        item: &PlanItemInstance,
        old: PlanItemState,
        new: PlanItemState,
    ) -> Result<(), CmmnError> {
        if old != PlanItemState::Active && new == PlanItemState::Active {
            match item.definition_type {
                PlanItemDefinitionType::HumanTask => {
                    let def = model.require_plan_item(&item.plan_item_id)?;
                    let task = TaskInstance::new(
                        case.id.clone(),
                        item.id.clone(),
                        item.name.clone(),
                        def.assignee.clone(),
                    );
                    let task = self.tasks.insert(ctx, task)?;
                    debug!(task_id = %task.id, plan_item_instance_id = %item.id, "task created");
                }
                PlanItemDefinitionType::Stage => {
                    for child in model.direct_children(Some(&item.plan_item_id)) {
                        self.instantiate_plan_item(ctx, model, case, child, Some(item.id.clone()))?;
                    }
                }
                _ => {}
            }
        }
        if old == PlanItemState::Active
            && new != PlanItemState::Active
            && item.definition_type == PlanItemDefinitionType::HumanTask
        {
            for task in self.tasks.find_by(|t| t.plan_item_instance_id == item.id) {
                self.tasks.delete_entity(ctx, &task)?;
                debug!(task_id = %task.id, plan_item_instance_id = %item.id, "task removed");
            }
        }
        Ok(())
    }

    // ── Evaluation loop ──

    /// Drives the case to a fixed point: entry criteria, exit criteria,
    /// then container completion, repeated until a full pass changes
    /// nothing. A pass count past the bound means the model cycles.
    pub(crate) fn evaluate(
        &self,
        ctx: &CommandContext,
        case_instance_id: &str,
    ) -> Result<(), CmmnError> {
        for _ in 0..MAX_EVALUATION_ROUNDS {
            let Some(case) = self.case_instances.find_by_id(ctx, case_instance_id) else {
                return Ok(());
            };
            if case.deleted || case.state != CaseState::Active {
                return Ok(());
            }
            let entry = self.registry.ensure_loaded(ctx, &case.case_definition_id)?;
            if !self.evaluate_once(ctx, &entry.model, &case)? {
                return Ok(());
            }
        }
        Err(CmmnError::IllegalState(format!(
            "sentry evaluation for case instance '{case_instance_id}' did not settle \
             after {MAX_EVALUATION_ROUNDS} rounds"
        )))
    }

    fn evaluate_once(
        &self,
        ctx: &CommandContext,
        model: &CaseModel,
        case: &CaseInstance,
    ) -> Result<bool, CmmnError> {
        let mut fired = false;

        // Entry criteria of waiting items. User event listeners only move
        // on an explicit trigger, never here.
        for snapshot in self.ordered_plan_items(model, &case.id, |i| {
            i.state == PlanItemState::Available
        }) {
            let Some(item) = self.live_plan_item(ctx, &snapshot.id) else {
                continue;
            };
            if item.state != PlanItemState::Available {
                continue;
            }
            let def = model.require_plan_item(&item.plan_item_id)?;
            if def.definition_type == PlanItemDefinitionType::UserEventListener {
                continue;
            }
            let ready = def.entry_criteria.is_empty()
                || criteria_satisfied(
                    &def.entry_criteria,
                    &item.satisfied_entry_parts,
                    &case.variables,
                );
            if !ready {
                continue;
            }
            let transition = match def.definition_type {
                PlanItemDefinitionType::Milestone => PlanItemTransition::Occur,
                _ if def.manual_activation => PlanItemTransition::Enable,
                _ => PlanItemTransition::Start,
            };
            self.transition_plan_item(ctx, model, case, item, transition)?;
            fired = true;
        }

        // Exit criteria of anything still live.
        for snapshot in self.ordered_plan_items(model, &case.id, |i| !i.state.is_terminal()) {
            let Some(item) = self.live_plan_item(ctx, &snapshot.id) else {
                continue;
            };
            if item.state.is_terminal() {
                continue;
            }
            let def = model.require_plan_item(&item.plan_item_id)?;
            if def.exit_criteria.is_empty() {
                continue;
            }
            if criteria_satisfied(&def.exit_criteria, &item.satisfied_exit_parts, &case.variables) {
                self.exit_plan_item(ctx, model, case, item)?;
                fired = true;
            }
        }

        // Stage completion, innermost first so a finished inner stage can
        // finish its parent in the same pass.
        let mut stages = self.ordered_plan_items(model, &case.id, |i| {
            i.state == PlanItemState::Active
                && i.definition_type == PlanItemDefinitionType::Stage
        });
        stages.sort_by_key(|s| std::cmp::Reverse(model.ancestor_stages(&s.plan_item_id).len()));
        for snapshot in stages {
            let Some(stage) = self.live_plan_item(ctx, &snapshot.id) else {
                continue;
            };
            if stage.state != PlanItemState::Active {
                continue;
            }
            let def = model.require_plan_item(&stage.plan_item_id)?;
            if self.container_completable(model, &case.id, Some(&stage.id), def.autocomplete)? {
                self.complete_stage(ctx, model, case, stage)?;
                fired = true;
            }
        }

        // The case plan completes the same way, with the model-level flag.
        if self.container_completable(model, &case.id, None, model.autocomplete)? {
            let current = self.case_instances.get_by_id(ctx, &case.id)?;
            self.complete_case(ctx, model, current)?;
            fired = true;
        }

        Ok(fired)
    }

    /// Whether a stage instance (or the case plan, `None`) can complete.
    /// Active, enabled and suspended children always hold it open, as do
    /// required available ones. A non-required available child holds it
    /// open only without autocomplete. Disabled children and un-triggered
    /// user event listeners never do.
    fn container_completable(
        &self,
        model: &CaseModel,
        case_instance_id: &str,
        stage_instance_id: Option<&str>,
        autocomplete: bool,
    ) -> Result<bool, CmmnError> {
        let children = self.plan_item_instances.find_by(|i| {
            i.case_instance_id == case_instance_id
                && i.stage_instance_id.as_deref() == stage_instance_id
        });
        for child in children {
            let blocked = match child.state {
                PlanItemState::Active | PlanItemState::Enabled | PlanItemState::Suspended => true,
                PlanItemState::Available => {
                    if child.definition_type == PlanItemDefinitionType::UserEventListener {
                        false
                    } else {
                        let def = model.require_plan_item(&child.plan_item_id)?;
                        def.required || !autocomplete
                    }
                }
                PlanItemState::Disabled
                | PlanItemState::Completed
                | PlanItemState::Terminated => false,
            };
            if blocked {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Completes a stage: whatever is still waiting inside (disabled items,
    /// optional available ones) is exited first, then the stage itself
    /// completes.
    fn complete_stage(
        &self,
        ctx: &CommandContext,
        model: &CaseModel,
        case: &CaseInstance,
        stage: PlanItemInstance,
    ) -> Result<(), CmmnError> {
        for child in self.stage_children(&stage.id, |i| !i.state.is_terminal()) {
            self.exit_plan_item(ctx, model, case, child)?;
        }
        self.transition_plan_item(ctx, model, case, stage, PlanItemTransition::Complete)?;
        Ok(())
    }

    fn complete_case(
        &self,
        ctx: &CommandContext,
        model: &CaseModel,
        case: CaseInstance,
    ) -> Result<(), CmmnError> {
        for item in self.root_plan_items(&case.id) {
            self.exit_plan_item(ctx, model, &case, item)?;
        }
        self.finish_case(ctx, model, case, CaseState::Completed)
    }

    /// Moves the case record to its terminal state, dispatches case
    /// listeners while the runtime is still visible, then removes the
    /// tasks, the plan item instances and finally the case itself.
    fn finish_case(
        &self,
        ctx: &CommandContext,
        model: &CaseModel,
        mut case: CaseInstance,
        target: CaseState,
    ) -> Result<(), CmmnError> {
        let old = case.state;
        case.state = target;
        let case = self.case_instances.update(ctx, case)?;
        info!(case_instance_id = %case.id, state = %target, "case finished");
        notify_case_state_change(
            &self.listener_registry,
            &model.listeners,
            &self.case_listeners,
            &case,
            Some(old),
            target,
        )?;
        for task in self.tasks.find_by(|t| t.case_instance_id == case.id) {
            self.tasks.delete_entity(ctx, &task)?;
        }
        for item in self.plan_item_instances.find_by(|i| i.case_instance_id == case.id) {
            self.plan_item_instances.delete_entity(ctx, &item)?;
        }
        self.case_instances.delete_entity(ctx, &case)?;
        Ok(())
    }

    // ── Instance lookups ──

    fn live_plan_item(&self, ctx: &CommandContext, id: &str) -> Option<PlanItemInstance> {
        self.plan_item_instances
            .find_by_id(ctx, id)
            .filter(|i| !i.deleted)
    }

    fn root_plan_items(&self, case_instance_id: &str) -> Vec<PlanItemInstance> {
        self.plan_item_instances.find_by(|i| {
            i.case_instance_id == case_instance_id
                && i.stage_instance_id.is_none()
                && !i.state.is_terminal()
        })
    }

    fn stage_children(
        &self,
        stage_instance_id: &str,
        filter: impl Fn(&PlanItemInstance) -> bool,
    ) -> Vec<PlanItemInstance> {
        self.plan_item_instances.find_by(|i| {
            i.stage_instance_id.as_deref() == Some(stage_instance_id) && filter(i)
        })
    }

    /// Instances of a case in model declaration order, ties broken by
    /// creation time and id. Keeps evaluation deterministic even though
    /// the live map is a hash map.
    pub(crate) fn ordered_plan_items(
        &self,
        model: &CaseModel,
        case_instance_id: &str,
        filter: impl Fn(&PlanItemInstance) -> bool,
    ) -> Vec<PlanItemInstance> {
        let mut items = self
            .plan_item_instances
            .find_by(|i| i.case_instance_id == case_instance_id && filter(i));
        let position = |plan_item_id: &str| {
            model
                .declaration_order
                .iter()
                .position(|d| d == plan_item_id)
                .unwrap_or(usize::MAX)
        };
        items.sort_by(|a, b| {
            position(&a.plan_item_id)
                .cmp(&position(&b.plan_item_id))
                .then_with(|| a.create_time.cmp(&b.create_time))
                .then_with(|| a.id.cmp(&b.id))
        });
        items
    }
}

/// `(criterion, part)` pairs of `criteria` that listen for `transition` of
/// `source_plan_item_id`.
fn matching_parts(
    criteria: &[SentryDef],
    source_plan_item_id: &str,
    transition: PlanItemTransition,
) -> Vec<(u32, u32)> {
    let mut hits = Vec::new();
    for (ci, criterion) in criteria.iter().enumerate() {
        for (pi, part) in criterion.on_parts.iter().enumerate() {
            if part.source_plan_item_id == source_plan_item_id && part.standard_event == transition
            {
                hits.push((ci as u32, pi as u32));
            }
        }
    }
    hits
}

/// A sentry is satisfied when any single criterion is: all of its on-parts
/// observed and its if-part (if any) true against the current variables.
fn criteria_satisfied(
    criteria: &[SentryDef],
    observed: &std::collections::BTreeSet<(u32, u32)>,
    variables: &BTreeMap<String, Value>,
) -> bool {
    criteria.iter().enumerate().any(|(ci, criterion)| {
        let on_parts_done = criterion
            .on_parts
            .iter()
            .enumerate()
            .all(|(pi, _)| observed.contains(&(ci as u32, pi as u32)));
        let if_part_true = criterion
            .if_part
            .as_ref()
            .map_or(true, |cond| cond.evaluate(variables));
        on_parts_done && if_part_true
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use serde_json::json;

    const REVIEW_YAML: &str = r#"
key: review
name: Document review
plan_items:
  - kind: HumanTask
    id: draft
    name: Draft document
    assignee: alice
  - kind: HumanTask
    id: approve
    name: Approve document
    entry:
      - on:
          - plan_item: draft
  - kind: Milestone
    id: published
    name: Published
    entry:
      - on:
          - plan_item: approve
"#;

    const GATED_YAML: &str = r#"
key: gated
plan_items:
  - kind: HumanTask
    id: fill
    name: Fill in form
  - kind: Milestone
    id: accepted
    entry:
      - on:
          - plan_item: fill
        if:
          variable: approved
          op: "=="
          value: true
"#;

    const MANUAL_YAML: &str = r#"
key: manual
plan_items:
  - kind: HumanTask
    id: side_quest
    name: Side quest
    manual_activation: true
"#;

    const STAGED_YAML: &str = r#"
key: staged
plan_items:
  - kind: HumanTask
    id: intake
    name: Intake
  - kind: Stage
    id: processing
    entry:
      - on:
          - plan_item: intake
    plan_items:
      - kind: HumanTask
        id: assess
        name: Assess
  - kind: Milestone
    id: closed
    entry:
      - on:
          - plan_item: processing
"#;

    const ESCALATION_YAML: &str = r#"
key: escalation
plan_items:
  - kind: HumanTask
    id: work
    name: Work
    exit:
      - on:
          - plan_item: cancel
            event: occur
  - kind: UserEventListener
    id: cancel
"#;

    const OPTIONAL_AUTO_YAML: &str = r#"
key: optional_auto
autocomplete: true
plan_items:
  - kind: HumanTask
    id: main
  - kind: HumanTask
    id: extra
    entry:
      - on:
          - plan_item: nudge
            event: occur
  - kind: UserEventListener
    id: nudge
"#;

    const OPTIONAL_STRICT_YAML: &str = r#"
key: optional_strict
plan_items:
  - kind: HumanTask
    id: main
  - kind: HumanTask
    id: extra
    entry:
      - on:
          - plan_item: nudge
            event: occur
  - kind: UserEventListener
    id: nudge
"#;

    fn engine() -> CmmnLiteEngine {
        CmmnLiteEngine::default()
    }

    fn deploy_yaml(engine: &CmmnLiteEngine, yaml: &str) {
        engine
            .deploy(
                DeploymentBuilder::new("engine test")
                    .add_resource("case.cmmn.yaml", yaml)
                    .disable_diagram_generation(),
            )
            .unwrap();
    }

    fn start(engine: &CmmnLiteEngine, key: &str) -> CaseInstance {
        engine
            .start_case(StartCaseBuilder::new().by_key(key))
            .unwrap()
    }

    fn states(engine: &CmmnLiteEngine, case_id: &str) -> BTreeMap<String, PlanItemState> {
        engine
            .query_plan_item_instances(&PlanItemInstanceQuery {
                case_instance_id: Some(case_id.to_string()),
                ..Default::default()
            })
            .unwrap()
            .into_iter()
            .map(|i| (i.plan_item_id, i.state))
            .collect()
    }

    fn case_tasks(engine: &CmmnLiteEngine, case_id: &str) -> Vec<TaskInstance> {
        engine
            .query_tasks(&TaskQuery {
                case_instance_id: Some(case_id.to_string()),
                order_by: Some("name asc".into()),
                ..Default::default()
            })
            .unwrap()
    }

    #[derive(Default)]
    struct RecordingCaseListener {
        events: Mutex<Vec<(Option<CaseState>, CaseState)>>,
    }

    impl CaseLifecycleListener for RecordingCaseListener {
        fn state_changed(
            &self,
            _case: &CaseInstance,
            old: Option<CaseState>,
            new: CaseState,
        ) -> anyhow::Result<()> {
            self.events.lock().unwrap().push((old, new));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingPlanItemListener {
        events: Mutex<Vec<(String, Option<PlanItemState>, PlanItemState)>>,
    }

    impl PlanItemLifecycleListener for RecordingPlanItemListener {
        fn state_changed(
            &self,
            item: &PlanItemInstance,
            old: Option<PlanItemState>,
            new: PlanItemState,
        ) -> anyhow::Result<()> {
            self.events
                .lock()
                .unwrap()
                .push((item.plan_item_id.clone(), old, new));
            Ok(())
        }
    }

    /// T-ENG-1: starting a case instantiates the root plan items, activates
    /// what has no entry criteria and creates the task artifact.
    #[test]
    fn t_eng_1_start_activates_unguarded_items() {
        let engine = engine();
        deploy_yaml(&engine, REVIEW_YAML);

        let case = start(&engine, "review");
        assert_eq!(case.state, CaseState::Active);

        let states = states(&engine, &case.id);
        assert_eq!(states["draft"], PlanItemState::Active);
        assert_eq!(states["approve"], PlanItemState::Available);
        assert_eq!(states["published"], PlanItemState::Available);

        let tasks = case_tasks(&engine, &case.id);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name.as_deref(), Some("Draft document"));
        assert_eq!(tasks[0].assignee.as_deref(), Some("alice"));
    }

    /// T-ENG-2: completing tasks walks the entry-sentry chain; once nothing
    /// blocks, the case completes and the runtime rows disappear.
    #[test]
    fn t_eng_2_completion_chain_finishes_case() {
        let engine = engine();
        deploy_yaml(&engine, REVIEW_YAML);
        let case = start(&engine, "review");

        // Draft completes; approval becomes active with its own task.
        let draft = &case_tasks(&engine, &case.id)[0];
        engine.complete_task(&draft.id).unwrap();
        let mid = states(&engine, &case.id);
        assert_eq!(mid["draft"], PlanItemState::Completed);
        assert_eq!(mid["approve"], PlanItemState::Active);
        assert_eq!(mid["published"], PlanItemState::Available);

        // Approval completes; the milestone occurs and the case finishes.
        let approve = &case_tasks(&engine, &case.id)[0];
        engine.complete_task(&approve.id).unwrap();
        assert!(engine.get_case_instance(&case.id).is_none());
        assert!(states(&engine, &case.id).is_empty());
        assert!(case_tasks(&engine, &case.id).is_empty());
    }

    /// T-ENG-3: an if-part holds a satisfied on-part back until the
    /// variable flips; setting it re-evaluates in the same command.
    #[test]
    fn t_eng_3_if_part_gates_until_variable_set() {
        let engine = engine();
        deploy_yaml(&engine, GATED_YAML);
        let case = start(&engine, "gated");

        let fill = &case_tasks(&engine, &case.id)[0];
        engine.complete_task(&fill.id).unwrap();
        // On-part observed but the condition is false (variable missing).
        let mid = states(&engine, &case.id);
        assert_eq!(mid["accepted"], PlanItemState::Available);

        engine.set_variable(&case.id, "approved", json!(true)).unwrap();
        // The milestone occurred and nothing blocked: case done.
        assert!(engine.get_case_instance(&case.id).is_none());
    }

    /// T-ENG-4: manual activation parks the item in Enabled; disable and
    /// re-enable cycle it; a manual start activates it.
    #[test]
    fn t_eng_4_manual_activation_cycle() {
        let engine = engine();
        deploy_yaml(&engine, MANUAL_YAML);
        let case = start(&engine, "manual");

        let item_id = {
            let items = engine
                .query_plan_item_instances(&PlanItemInstanceQuery {
                    case_instance_id: Some(case.id.clone()),
                    plan_item_id: Some("side_quest".into()),
                    ..Default::default()
                })
                .unwrap();
            assert_eq!(items[0].state, PlanItemState::Enabled);
            assert!(case_tasks(&engine, &case.id).is_empty());
            items[0].id.clone()
        };

        engine.disable_plan_item(&item_id).unwrap();
        assert_eq!(
            engine.get_plan_item_instance(&item_id).unwrap().state,
            PlanItemState::Disabled
        );
        engine.enable_plan_item(&item_id).unwrap();
        assert_eq!(
            engine.get_plan_item_instance(&item_id).unwrap().state,
            PlanItemState::Enabled
        );

        engine.start_plan_item(&item_id).unwrap();
        assert_eq!(
            engine.get_plan_item_instance(&item_id).unwrap().state,
            PlanItemState::Active
        );
        let tasks = case_tasks(&engine, &case.id);
        assert_eq!(tasks.len(), 1);

        // Completing the only task leaves nothing blocking: case done.
        engine.complete_task(&tasks[0].id).unwrap();
        assert!(engine.get_case_instance(&case.id).is_none());
    }

    /// T-ENG-5: activating a stage stamps out its children; when the last
    /// child completes, the stage completes and downstream sentries fire.
    #[test]
    fn t_eng_5_stage_activation_and_completion() {
        let engine = engine();
        deploy_yaml(&engine, STAGED_YAML);
        let case = start(&engine, "staged");

        let intake = &case_tasks(&engine, &case.id)[0];
        engine.complete_task(&intake.id).unwrap();

        let mid = states(&engine, &case.id);
        assert_eq!(mid["processing"], PlanItemState::Active);
        assert_eq!(mid["assess"], PlanItemState::Active);
        let assess_task = &case_tasks(&engine, &case.id)[0];
        assert_eq!(assess_task.name.as_deref(), Some("Assess"));

        // Child instance hangs off the stage instance, not the case plan.
        let assess = engine
            .query_plan_item_instances(&PlanItemInstanceQuery {
                case_instance_id: Some(case.id.clone()),
                plan_item_id: Some("assess".into()),
                ..Default::default()
            })
            .unwrap();
        assert!(assess[0].stage_instance_id.is_some());

        engine.complete_task(&assess_task.id).unwrap();
        // Stage completed, milestone occurred, case finished.
        assert!(engine.get_case_instance(&case.id).is_none());
    }

    /// T-ENG-6: terminating a case exits every live item, reports the
    /// terminal transition to case listeners and wipes the runtime.
    #[test]
    fn t_eng_6_terminate_case_wipes_runtime() {
        let recorder = Arc::new(RecordingCaseListener::default());
        let engine = CmmnLiteEngine::builder()
            .add_case_listener(recorder.clone())
            .build();
        deploy_yaml(&engine, REVIEW_YAML);
        let case = start(&engine, "review");

        engine.terminate_case(&case.id).unwrap();
        assert!(engine.get_case_instance(&case.id).is_none());
        assert!(states(&engine, &case.id).is_empty());
        assert!(case_tasks(&engine, &case.id).is_empty());

        let events = recorder.events.lock().unwrap();
        assert_eq!(events[0], (None, CaseState::Active));
        assert_eq!(
            events[1],
            (Some(CaseState::Active), CaseState::Terminated)
        );

        // A second terminate has nothing to find.
        assert!(matches!(
            engine.terminate_case(&case.id),
            Err(CmmnError::ObjectNotFound { .. })
        ));
    }

    /// T-ENG-7: a user event listener never fires on its own; triggering
    /// it drives the exit sentry of the task listening on it.
    #[test]
    fn t_eng_7_user_event_listener_drives_exit() {
        let engine = engine();
        deploy_yaml(&engine, ESCALATION_YAML);
        let case = start(&engine, "escalation");

        let initial = states(&engine, &case.id);
        assert_eq!(initial["work"], PlanItemState::Active);
        assert_eq!(initial["cancel"], PlanItemState::Available);

        let cancel = engine
            .query_plan_item_instances(&PlanItemInstanceQuery {
                case_instance_id: Some(case.id.clone()),
                plan_item_id: Some("cancel".into()),
                ..Default::default()
            })
            .unwrap()
            .remove(0);
        engine.trigger_user_event_listener(&cancel.id).unwrap();

        // Work was exited, nothing blocks, the case completed.
        assert!(engine.get_case_instance(&case.id).is_none());
        assert!(case_tasks(&engine, &case.id).is_empty());
    }

    /// T-ENG-8: triggering something that is not a user event listener is
    /// rejected without touching any state.
    #[test]
    fn t_eng_8_trigger_rejects_wrong_item_type() {
        let engine = engine();
        deploy_yaml(&engine, ESCALATION_YAML);
        let case = start(&engine, "escalation");

        let work = engine
            .query_plan_item_instances(&PlanItemInstanceQuery {
                case_instance_id: Some(case.id.clone()),
                plan_item_id: Some("work".into()),
                ..Default::default()
            })
            .unwrap()
            .remove(0);
        let err = engine.trigger_user_event_listener(&work.id).unwrap_err();
        assert!(matches!(err, CmmnError::IllegalArgument(_)));
        assert!(err.to_string().contains("human_task"));
        assert_eq!(
            engine.get_plan_item_instance(&work.id).unwrap().state,
            PlanItemState::Active
        );
    }

    /// T-ENG-9: a non-required available item blocks completion without
    /// autocomplete and does not block with it; an un-triggered user event
    /// listener never blocks.
    #[test]
    fn t_eng_9_autocomplete_and_optional_items() {
        let engine = engine();
        deploy_yaml(&engine, OPTIONAL_AUTO_YAML);
        deploy_yaml(&engine, OPTIONAL_STRICT_YAML);

        // Autocomplete: completing the main task finishes the case even
        // though `extra` is still available.
        let auto_case = start(&engine, "optional_auto");
        let main_task = &case_tasks(&engine, &auto_case.id)[0];
        engine.complete_task(&main_task.id).unwrap();
        assert!(engine.get_case_instance(&auto_case.id).is_none());

        // Without autocomplete the available item holds the case open.
        let strict_case = start(&engine, "optional_strict");
        let main_task = &case_tasks(&engine, &strict_case.id)[0];
        engine.complete_task(&main_task.id).unwrap();
        let open = engine.get_case_instance(&strict_case.id).unwrap();
        assert_eq!(open.state, CaseState::Active);
        assert_eq!(
            states(&engine, &strict_case.id)["extra"],
            PlanItemState::Available
        );
    }

    /// T-ENG-10: the global plan item listener sees every transition in
    /// order, from instantiation through the terminal states.
    #[test]
    fn t_eng_10_global_listener_sees_lifecycle() {
        let recorder = Arc::new(RecordingPlanItemListener::default());
        let engine = CmmnLiteEngine::builder()
            .add_plan_item_listener(recorder.clone())
            .build();
        deploy_yaml(&engine, GATED_YAML);
        let case = start(&engine, "gated");

        let fill = &case_tasks(&engine, &case.id)[0];
        engine.complete_task(&fill.id).unwrap();
        engine.set_variable(&case.id, "approved", json!(true)).unwrap();

        let events = recorder.events.lock().unwrap();
        let fill_events: Vec<_> = events.iter().filter(|(id, _, _)| id == "fill").collect();
        assert_eq!(
            fill_events[0],
            &("fill".to_string(), None, PlanItemState::Available)
        );
        assert_eq!(
            fill_events[1],
            &(
                "fill".to_string(),
                Some(PlanItemState::Available),
                PlanItemState::Active
            )
        );
        assert_eq!(
            fill_events[2],
            &(
                "fill".to_string(),
                Some(PlanItemState::Active),
                PlanItemState::Completed
            )
        );
        let accepted_final = events
            .iter()
            .filter(|(id, _, _)| id == "accepted")
            .last()
            .unwrap();
        assert_eq!(accepted_final.2, PlanItemState::Completed);
    }

    /// T-ENG-11: starting needs an id or a key; unknown references surface
    /// as not-found.
    #[test]
    fn t_eng_11_start_resolution_errors() {
        let engine = engine();
        deploy_yaml(&engine, REVIEW_YAML);

        assert!(matches!(
            engine.start_case(StartCaseBuilder::new()),
            Err(CmmnError::IllegalArgument(_))
        ));
        assert!(matches!(
            engine.start_case(StartCaseBuilder::new().by_key("ghost")),
            Err(CmmnError::ObjectNotFound { .. })
        ));
        assert!(matches!(
            engine.complete_task("no-such-task"),
            Err(CmmnError::ObjectNotFound { object_type: "task", .. })
        ));
    }

    /// T-ENG-12: query filtering, ordering and pagination compose; an
    /// offset past the result size yields an empty page.
    #[test]
    fn t_eng_12_case_queries_order_and_paginate() {
        let engine = engine();
        deploy_yaml(&engine, MANUAL_YAML);
        for key in ["b-2", "a-1", "c-3"] {
            engine
                .start_case(
                    StartCaseBuilder::new()
                        .by_key("manual")
                        .business_key(key),
                )
                .unwrap();
        }

        let all = engine
            .query_case_instances(&CaseInstanceQuery {
                order_by: Some("business_key desc".into()),
                ..Default::default()
            })
            .unwrap();
        let keys: Vec<_> = all.iter().map(|c| c.business_key.clone().unwrap()).collect();
        assert_eq!(keys, vec!["c-3", "b-2", "a-1"]);

        let page = engine
            .query_case_instances(&CaseInstanceQuery {
                order_by: Some("business_key asc".into()),
                offset: 1,
                limit: 1,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].business_key.as_deref(), Some("b-2"));

        let beyond = engine
            .query_case_instances(&CaseInstanceQuery {
                offset: 10,
                limit: 5,
                ..Default::default()
            })
            .unwrap();
        assert!(beyond.is_empty());

        let filtered = engine
            .query_case_instances(&CaseInstanceQuery {
                business_key: Some("a-1".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(filtered.len(), 1);
    }

    /// T-ENG-13: variable changes on a finished case are rejected; the
    /// record is simply gone.
    #[test]
    fn t_eng_13_variables_require_live_case() {
        let engine = engine();
        deploy_yaml(&engine, MANUAL_YAML);
        let case = start(&engine, "manual");
        engine.terminate_case(&case.id).unwrap();

        assert!(matches!(
            engine.set_variable(&case.id, "x", json!(1)),
            Err(CmmnError::ObjectNotFound { .. })
        ));
    }
}
