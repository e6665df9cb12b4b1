//! Dynamic state changes: imperative overrides of the sentry-driven flow.
//!
//! A `ChangeStateBuilder` collects operations addressed by plan item
//! *definition* id — activate bypassing the sentry, move one definition's
//! active instances onto another, revert an active instance to Available —
//! and applies them as one command. Definition ids are validated up front,
//! the operations run in order, and a single evaluation pass at the end
//! lets the model react to the new shape.

use tracing::{debug, info};

use crate::engine::CmmnLiteEngine;
use crate::error::CmmnError;
use crate::model::{CaseModel, PlanItemDefinition, PlanItemDefinitionType};
use crate::state::{PlanItemState, PlanItemTransition};
use crate::store::CommandContext;
use crate::types::{CaseInstance, PlanItemInstance};

enum ChangeStateOperation {
    Activate {
        plan_item_definition_id: String,
    },
    Move {
        from_plan_item_definition_id: String,
        to_plan_item_definition_id: String,
    },
    MakeAvailable {
        plan_item_definition_id: String,
    },
}

impl ChangeStateOperation {
    fn referenced_definitions(&self) -> Vec<&str> {
        match self {
            ChangeStateOperation::Activate {
                plan_item_definition_id,
            }
            | ChangeStateOperation::MakeAvailable {
                plan_item_definition_id,
            } => vec![plan_item_definition_id],
            ChangeStateOperation::Move {
                from_plan_item_definition_id,
                to_plan_item_definition_id,
            } => vec![from_plan_item_definition_id, to_plan_item_definition_id],
        }
    }
}

impl CmmnLiteEngine {
    /// Entry point for dynamic state changes on one case instance.
    pub fn create_change_state_builder(
        &self,
        case_instance_id: impl Into<String>,
    ) -> ChangeStateBuilder<'_> {
        ChangeStateBuilder {
            engine: self,
            case_instance_id: case_instance_id.into(),
            operations: Vec::new(),
        }
    }
}

pub struct ChangeStateBuilder<'a> {
    engine: &'a CmmnLiteEngine,
    case_instance_id: String,
    operations: Vec<ChangeStateOperation>,
}

impl ChangeStateBuilder<'_> {
    /// Activates the definition directly, bypassing its entry sentry. An
    /// Available instance is advanced when one exists; otherwise a new
    /// instance is created, activating enclosing stages as needed.
    pub fn activate(mut self, plan_item_definition_id: impl Into<String>) -> Self {
        self.operations.push(ChangeStateOperation::Activate {
            plan_item_definition_id: plan_item_definition_id.into(),
        });
        self
    }

    /// Terminates the active instances of `from` and activates `to` in the
    /// same step. A source stage left without live children is terminated;
    /// stages enclosing the target are created or activated.
    pub fn move_plan_item(
        mut self,
        from_plan_item_definition_id: impl Into<String>,
        to_plan_item_definition_id: impl Into<String>,
    ) -> Self {
        self.operations.push(ChangeStateOperation::Move {
            from_plan_item_definition_id: from_plan_item_definition_id.into(),
            to_plan_item_definition_id: to_plan_item_definition_id.into(),
        });
        self
    }

    /// Reverts the active instances of the definition to Available: the
    /// record keeps its id, the task artifact is removed and the sentry
    /// bookkeeping starts over.
    pub fn make_available(mut self, plan_item_definition_id: impl Into<String>) -> Self {
        self.operations.push(ChangeStateOperation::MakeAvailable {
            plan_item_definition_id: plan_item_definition_id.into(),
        });
        self
    }

    /// Applies the collected operations as one command. Every referenced
    /// definition id is checked against the model before anything changes.
    pub fn change_state(self) -> Result<(), CmmnError> {
        if self.operations.is_empty() {
            return Err(CmmnError::IllegalArgument(
                "a state change needs at least one operation".into(),
            ));
        }
        let engine = self.engine;
        engine.executor.execute(|ctx| {
            let case = engine.case_instances.get_by_id(ctx, &self.case_instance_id)?;
            let entry = engine.registry.ensure_loaded(ctx, &case.case_definition_id)?;
            let model = &entry.model;
            for operation in &self.operations {
                for def_id in operation.referenced_definitions() {
                    model.require_plan_item(def_id)?;
                }
            }
            for operation in &self.operations {
                match operation {
                    ChangeStateOperation::Activate {
                        plan_item_definition_id,
                    } => {
                        activate_definition(engine, ctx, model, &case, plan_item_definition_id)?;
                    }
                    ChangeStateOperation::Move {
                        from_plan_item_definition_id,
                        to_plan_item_definition_id,
                    } => {
                        move_definition(
                            engine,
                            ctx,
                            model,
                            &case,
                            from_plan_item_definition_id,
                            to_plan_item_definition_id,
                        )?;
                    }
                    ChangeStateOperation::MakeAvailable {
                        plan_item_definition_id,
                    } => {
                        revert_definition(engine, ctx, model, &case, plan_item_definition_id)?;
                    }
                }
            }
            info!(
                case_instance_id = %case.id,
                operations = self.operations.len(),
                "dynamic state change applied"
            );
            engine.evaluate(ctx, &case.id)
        })
    }
}

// ─── Operation handlers ───────────────────────────────────────

fn activate_definition(
    engine: &CmmnLiteEngine,
    ctx: &CommandContext,
    model: &CaseModel,
    case: &CaseInstance,
    plan_item_definition_id: &str,
) -> Result<PlanItemInstance, CmmnError> {
    let def = model.require_plan_item(plan_item_definition_id)?;
    let item = match find_available(engine, model, case, plan_item_definition_id) {
        Some(item) => item,
        None => {
            let stage_instance_id = ensure_stage_chain_active(engine, ctx, model, case, def)?;
            // activating the chain may have stamped the item out already
            match find_available(engine, model, case, plan_item_definition_id) {
                Some(item) => item,
                None => engine.instantiate_plan_item(ctx, model, case, def, stage_instance_id)?,
            }
        }
    };
    debug!(
        plan_item_instance_id = %item.id,
        plan_item_id = %item.plan_item_id,
        "activating by definition id"
    );
    engine.transition_plan_item(ctx, model, case, item, PlanItemTransition::Start)
}

fn move_definition(
    engine: &CmmnLiteEngine,
    ctx: &CommandContext,
    model: &CaseModel,
    case: &CaseInstance,
    from_plan_item_definition_id: &str,
    to_plan_item_definition_id: &str,
) -> Result<(), CmmnError> {
    let active = engine.ordered_plan_items(model, &case.id, |i| {
        i.plan_item_id == from_plan_item_definition_id && i.state == PlanItemState::Active
    });
    if active.is_empty() {
        return Err(CmmnError::not_found(
            "active plan item instance",
            from_plan_item_definition_id,
        ));
    }
    let mut vacated_stages = Vec::new();
    for instance in active {
        vacated_stages.push(instance.stage_instance_id.clone());
        terminate_instance_tree(engine, ctx, model, case, instance)?;
    }
    activate_definition(engine, ctx, model, case, to_plan_item_definition_id)?;
    for stage_instance_id in vacated_stages {
        collapse_vacated_stages(
            engine,
            ctx,
            model,
            case,
            stage_instance_id,
            to_plan_item_definition_id,
        )?;
    }
    Ok(())
}

fn revert_definition(
    engine: &CmmnLiteEngine,
    ctx: &CommandContext,
    model: &CaseModel,
    case: &CaseInstance,
    plan_item_definition_id: &str,
) -> Result<(), CmmnError> {
    let active = engine.ordered_plan_items(model, &case.id, |i| {
        i.plan_item_id == plan_item_definition_id && i.state == PlanItemState::Active
    });
    if active.is_empty() {
        return Err(CmmnError::not_found(
            "active plan item instance",
            plan_item_definition_id,
        ));
    }
    for instance in active {
        if instance.definition_type == PlanItemDefinitionType::Stage {
            for child in live_children(engine, &instance.id) {
                engine.exit_plan_item(ctx, model, case, child)?;
            }
        }
        let mut reverted =
            engine.transition_plan_item(ctx, model, case, instance, PlanItemTransition::MakeAvailable)?;
        reverted.satisfied_entry_parts.clear();
        reverted.satisfied_exit_parts.clear();
        engine.plan_item_instances.update(ctx, reverted)?;
    }
    Ok(())
}

// ─── Stage plumbing ───────────────────────────────────────────

/// Activates the stages enclosing `def`, outermost first, creating stage
/// instances that were never stamped out. Returns the instance id of the
/// direct parent stage, if any.
fn ensure_stage_chain_active(
    engine: &CmmnLiteEngine,
    ctx: &CommandContext,
    model: &CaseModel,
    case: &CaseInstance,
    def: &PlanItemDefinition,
) -> Result<Option<String>, CmmnError> {
    let chain = model.ancestor_stages(&def.id);
    let mut parent: Option<String> = None;
    for stage_def_id in chain.iter().rev() {
        let live = engine
            .ordered_plan_items(model, &case.id, |i| {
                i.plan_item_id == *stage_def_id && !i.state.is_terminal()
            })
            .into_iter()
            .next();
        let stage = match live {
            Some(instance) if instance.state == PlanItemState::Active => instance,
            Some(instance) if instance.state == PlanItemState::Available => {
                engine.transition_plan_item(ctx, model, case, instance, PlanItemTransition::Start)?
            }
            Some(instance) if instance.state == PlanItemState::Enabled => engine
                .transition_plan_item(ctx, model, case, instance, PlanItemTransition::ManualStart)?,
            Some(instance) => {
                return Err(CmmnError::IllegalState(format!(
                    "stage '{}' is {} and cannot host an activation",
                    instance.plan_item_id, instance.state
                )))
            }
            None => {
                let stage_def = model.require_plan_item(stage_def_id)?;
                let created =
                    engine.instantiate_plan_item(ctx, model, case, stage_def, parent.clone())?;
                engine.transition_plan_item(ctx, model, case, created, PlanItemTransition::Start)?
            }
        };
        parent = Some(stage.id);
    }
    Ok(parent)
}

/// Terminates one instance; a stage takes its children down first.
fn terminate_instance_tree(
    engine: &CmmnLiteEngine,
    ctx: &CommandContext,
    model: &CaseModel,
    case: &CaseInstance,
    instance: PlanItemInstance,
) -> Result<(), CmmnError> {
    if instance.state.is_terminal() {
        return Ok(());
    }
    if instance.definition_type == PlanItemDefinitionType::Stage {
        for child in live_children(engine, &instance.id) {
            engine.exit_plan_item(ctx, model, case, child)?;
        }
    }
    engine.transition_plan_item(ctx, model, case, instance, PlanItemTransition::Terminate)?;
    Ok(())
}

/// Walks up from a vacated stage instance, terminating every stage left
/// without live children — stopping at a stage that encloses the move
/// target. The case plan itself is never terminated here.
fn collapse_vacated_stages(
    engine: &CmmnLiteEngine,
    ctx: &CommandContext,
    model: &CaseModel,
    case: &CaseInstance,
    mut stage_instance_id: Option<String>,
    to_plan_item_definition_id: &str,
) -> Result<(), CmmnError> {
    while let Some(current) = stage_instance_id {
        let Some(stage) = engine
            .plan_item_instances
            .find_by(|i| i.id == current)
            .pop()
        else {
            break;
        };
        if stage.state.is_terminal() {
            break;
        }
        if stage.plan_item_id == to_plan_item_definition_id
            || model.is_ancestor_stage(&stage.plan_item_id, to_plan_item_definition_id)
        {
            break;
        }
        if !live_children(engine, &stage.id).is_empty() {
            break;
        }
        let parent = stage.stage_instance_id.clone();
        debug!(
            stage_instance_id = %stage.id,
            plan_item_id = %stage.plan_item_id,
            "terminating vacated stage"
        );
        engine.transition_plan_item(ctx, model, case, stage, PlanItemTransition::Terminate)?;
        stage_instance_id = parent;
    }
    Ok(())
}

fn live_children(engine: &CmmnLiteEngine, stage_instance_id: &str) -> Vec<PlanItemInstance> {
    engine.plan_item_instances.find_by(|i| {
        i.stage_instance_id.as_deref() == Some(stage_instance_id) && !i.state.is_terminal()
    })
}

fn find_available(
    engine: &CmmnLiteEngine,
    model: &CaseModel,
    case: &CaseInstance,
    plan_item_definition_id: &str,
) -> Option<PlanItemInstance> {
    engine
        .ordered_plan_items(model, &case.id, |i| {
            i.plan_item_id == plan_item_definition_id && i.state == PlanItemState::Available
        })
        .into_iter()
        .next()
}
