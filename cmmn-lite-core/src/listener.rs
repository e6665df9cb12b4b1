//! Lifecycle listener dispatch.
//!
//! Case and plan item state changes fan out synchronously to the listeners
//! declared on the model plus any listeners registered on the engine.
//! Declared implementations resolve through a [`ListenerRegistry`]: class
//! names and expression names only mean something the host has registered,
//! nothing is ever instantiated from a bare string.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::CmmnError;
use crate::model::{CaseLifecycleListenerDef, ListenerImplementation, PlanItemLifecycleListenerDef};
use crate::state::{CaseState, PlanItemState};
use crate::types::{CaseInstance, PlanItemInstance};

// ─── Runtime traits ───────────────────────────────────────────

/// Callback for case instance state changes. `old` is `None` exactly once,
/// when the instance is created.
pub trait CaseLifecycleListener: Send + Sync {
    fn state_changed(
        &self,
        case: &CaseInstance,
        old: Option<CaseState>,
        new: CaseState,
    ) -> anyhow::Result<()>;
}

/// Callback for plan item instance state changes. `old` is `None` exactly
/// once, when the instance is created.
pub trait PlanItemLifecycleListener: Send + Sync {
    fn state_changed(
        &self,
        item: &PlanItemInstance,
        old: Option<PlanItemState>,
        new: PlanItemState,
    ) -> anyhow::Result<()>;
}

/// State change handed to expression callbacks, which are capability-neutral
/// and can be declared on either a case or a plan item.
pub enum ListenerEvent<'a> {
    Case {
        case: &'a CaseInstance,
        old: Option<CaseState>,
        new: CaseState,
    },
    PlanItem {
        item: &'a PlanItemInstance,
        old: Option<PlanItemState>,
        new: PlanItemState,
    },
}

/// A listener object held by the registry: what class factories produce and
/// what delegate expressions resolve to.
#[derive(Clone)]
pub enum ListenerBean {
    Case(Arc<dyn CaseLifecycleListener>),
    PlanItem(Arc<dyn PlanItemLifecycleListener>),
}

impl ListenerBean {
    fn capability(&self) -> &'static str {
        match self {
            ListenerBean::Case(_) => "CaseLifecycleListener",
            ListenerBean::PlanItem(_) => "PlanItemLifecycleListener",
        }
    }
}

// ─── Registry ─────────────────────────────────────────────────

/// Builds a fresh listener from the declared injection fields. Invoked once
/// per matching dispatch, so listener state never leaks across events.
pub type ListenerFactory =
    dyn Fn(&BTreeMap<String, Value>) -> anyhow::Result<ListenerBean> + Send + Sync;

/// Side-effect callback bound to an `expression` listener.
pub type ExpressionCallback = dyn Fn(&ListenerEvent<'_>) -> anyhow::Result<()> + Send + Sync;

/// Resolution table for declared listener implementations.
///
/// Three namespaces, one per implementation kind: class names map to
/// factories, expression names map to callbacks, delegate-expression names
/// map to shared beans. Lookup happens at every dispatch, so re-registering
/// a name rebinds future events.
#[derive(Default)]
pub struct ListenerRegistry {
    class_factories: HashMap<String, Arc<ListenerFactory>>,
    beans: HashMap<String, ListenerBean>,
    expressions: HashMap<String, Arc<ExpressionCallback>>,
}

/// A declared implementation resolved against the registry, ready to invoke
/// for one event.
enum Resolved {
    Bean(ListenerBean),
    Expression(Arc<ExpressionCallback>),
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_class<F>(&mut self, class_name: impl Into<String>, factory: F)
    where
        F: Fn(&BTreeMap<String, Value>) -> anyhow::Result<ListenerBean> + Send + Sync + 'static,
    {
        self.class_factories
            .insert(class_name.into(), Arc::new(factory));
    }

    pub fn register_bean(&mut self, name: impl Into<String>, bean: ListenerBean) {
        self.beans.insert(name.into(), bean);
    }

    pub fn register_expression<F>(&mut self, name: impl Into<String>, callback: F)
    where
        F: Fn(&ListenerEvent<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.expressions.insert(name.into(), Arc::new(callback));
    }

    fn resolve(&self, implementation: &ListenerImplementation) -> Result<Resolved, CmmnError> {
        match implementation {
            ListenerImplementation::ClassDelegate { class_name, fields } => {
                let factory = self.class_factories.get(class_name).ok_or_else(|| {
                    CmmnError::IllegalArgument(format!(
                        "no listener class registered under '{class_name}'"
                    ))
                })?;
                let bean = factory(fields).map_err(|e| {
                    CmmnError::IllegalArgument(format!(
                        "listener class '{class_name}' could not be built: {e}"
                    ))
                })?;
                Ok(Resolved::Bean(bean))
            }
            ListenerImplementation::Expression { expression } => {
                let name = expression_name(expression);
                let callback = self.expressions.get(name).ok_or_else(|| {
                    CmmnError::IllegalArgument(format!("no expression registered under '{name}'"))
                })?;
                Ok(Resolved::Expression(Arc::clone(callback)))
            }
            ListenerImplementation::DelegateExpression { expression, .. } => {
                let name = expression_name(expression);
                let bean = self.beans.get(name).ok_or_else(|| {
                    CmmnError::IllegalArgument(format!(
                        "no listener bean registered under '{name}'"
                    ))
                })?;
                Ok(Resolved::Bean(bean.clone()))
            }
        }
    }

    fn invoke_for_case(
        &self,
        implementation: &ListenerImplementation,
        case: &CaseInstance,
        old: Option<CaseState>,
        new: CaseState,
    ) -> Result<(), CmmnError> {
        let label = || case_transition_label(old, new);
        match self.resolve(implementation)? {
            Resolved::Bean(ListenerBean::Case(listener)) => listener
                .state_changed(case, old, new)
                .map_err(|source| listener_failure(label(), source)),
            Resolved::Bean(other) => Err(CmmnError::IllegalArgument(format!(
                "listener for case state changes must implement CaseLifecycleListener, \
                 resolved bean is a {}",
                other.capability()
            ))),
            Resolved::Expression(callback) => callback(&ListenerEvent::Case { case, old, new })
                .map_err(|source| listener_failure(label(), source)),
        }
    }

    fn invoke_for_plan_item(
        &self,
        implementation: &ListenerImplementation,
        item: &PlanItemInstance,
        old: Option<PlanItemState>,
        new: PlanItemState,
    ) -> Result<(), CmmnError> {
        let label = || item_transition_label(&item.plan_item_id, old, new);
        match self.resolve(implementation)? {
            Resolved::Bean(ListenerBean::PlanItem(listener)) => listener
                .state_changed(item, old, new)
                .map_err(|source| listener_failure(label(), source)),
            Resolved::Bean(other) => Err(CmmnError::IllegalArgument(format!(
                "listener for plan item state changes must implement PlanItemLifecycleListener, \
                 resolved bean is a {}",
                other.capability()
            ))),
            Resolved::Expression(callback) => {
                callback(&ListenerEvent::PlanItem { item, old, new })
                    .map_err(|source| listener_failure(label(), source))
            }
        }
    }
}

// ─── Dispatch ─────────────────────────────────────────────────

/// Dispatches one case state change: model-declared listeners first, in
/// declaration order, then engine-global listeners.
///
/// A transition that does not change the state is not an event and
/// dispatches nothing. The first listener error aborts the remaining
/// listeners and surfaces as [`CmmnError::ListenerFailure`].
pub fn notify_case_state_change(
    registry: &ListenerRegistry,
    declared: &[CaseLifecycleListenerDef],
    global: &[Arc<dyn CaseLifecycleListener>],
    case: &CaseInstance,
    old: Option<CaseState>,
    new: CaseState,
) -> Result<(), CmmnError> {
    if old == Some(new) {
        return Ok(());
    }
    debug!(case_instance_id = %case.id, from = ?old, to = %new, "case state change");
    for def in declared {
        if !state_filter_matches(def.source_state, old)
            || !state_filter_matches(def.target_state, Some(new))
        {
            continue;
        }
        registry.invoke_for_case(&def.implementation, case, old, new)?;
    }
    for listener in global {
        listener
            .state_changed(case, old, new)
            .map_err(|source| listener_failure(case_transition_label(old, new), source))?;
    }
    Ok(())
}

/// Plan item counterpart of [`notify_case_state_change`]. Declared listeners
/// additionally filter on the item's definition type (empty list = all).
pub fn notify_plan_item_state_change(
    registry: &ListenerRegistry,
    declared: &[PlanItemLifecycleListenerDef],
    global: &[Arc<dyn PlanItemLifecycleListener>],
    item: &PlanItemInstance,
    old: Option<PlanItemState>,
    new: PlanItemState,
) -> Result<(), CmmnError> {
    if old == Some(new) {
        return Ok(());
    }
    debug!(
        plan_item_instance_id = %item.id,
        plan_item_id = %item.plan_item_id,
        from = ?old,
        to = %new,
        "plan item state change"
    );
    for def in declared {
        if !state_filter_matches(def.source_state, old)
            || !state_filter_matches(def.target_state, Some(new))
        {
            continue;
        }
        if !def.item_types.is_empty() && !def.item_types.contains(&item.definition_type) {
            continue;
        }
        registry.invoke_for_plan_item(&def.implementation, item, old, new)?;
    }
    for listener in global {
        listener
            .state_changed(item, old, new)
            .map_err(|source| {
                listener_failure(item_transition_label(&item.plan_item_id, old, new), source)
            })?;
    }
    Ok(())
}

/// Unset filter = wildcard. A set filter needs exact equality, so it never
/// matches the creation event (old = None).
fn state_filter_matches<S: PartialEq + Copy>(filter: Option<S>, actual: Option<S>) -> bool {
    match filter {
        None => true,
        Some(want) => actual == Some(want),
    }
}

fn listener_failure(transition: String, source: anyhow::Error) -> CmmnError {
    CmmnError::ListenerFailure { transition, source }
}

fn case_transition_label(old: Option<CaseState>, new: CaseState) -> String {
    match old {
        Some(from) => format!("case {from} -> {new}"),
        None => format!("case creation -> {new}"),
    }
}

fn item_transition_label(
    plan_item_id: &str,
    old: Option<PlanItemState>,
    new: PlanItemState,
) -> String {
    match old {
        Some(from) => format!("plan item '{plan_item_id}' {from} -> {new}"),
        None => format!("plan item '{plan_item_id}' creation -> {new}"),
    }
}

/// `${name}` and bare `name` both resolve to `name`.
fn expression_name(text: &str) -> &str {
    text.strip_prefix("${")
        .and_then(|t| t.strip_suffix('}'))
        .unwrap_or(text)
        .trim()
}
