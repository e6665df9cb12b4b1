//! Query parameters, null-aware comparison and `order by` parsing.
//!
//! Result ordering is expressed the SQL way (`"name asc, create_time desc
//! nulls last"`), parsed into clauses and applied in memory. The comparison
//! primitive handles absent values explicitly: the null policy decides which
//! end they sort to, and the sort direction only affects present values.

use std::cmp::Ordering;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CmmnError;
use crate::state::{CaseState, PlanItemState};
use crate::types::{CaseInstance, PlanItemInstance, TaskInstance};

// ─── Direction and null policy ────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl FromStr for SortDirection {
    type Err = CmmnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Ascending),
            "desc" => Ok(SortDirection::Descending),
            other => Err(CmmnError::IllegalArgument(format!(
                "invalid sort direction '{other}' (expected asc or desc)"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullHandling {
    NullsFirst,
    NullsLast,
}

/// Null-aware, direction-aware comparison. Two absent values are equal; one
/// absent value is placed by the null policy regardless of direction;
/// present values compare naturally, reversed for descending.
pub fn compare_nullable<V: Ord + ?Sized>(
    a: Option<&V>,
    b: Option<&V>,
    direction: SortDirection,
    nulls: NullHandling,
) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => match nulls {
            NullHandling::NullsFirst => Ordering::Less,
            NullHandling::NullsLast => Ordering::Greater,
        },
        (Some(_), None) => match nulls {
            NullHandling::NullsFirst => Ordering::Greater,
            NullHandling::NullsLast => Ordering::Less,
        },
        (Some(a), Some(b)) => match direction {
            SortDirection::Ascending => a.cmp(b),
            SortDirection::Descending => b.cmp(a),
        },
    }
}

// ─── Order-by text ────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderByClause {
    pub column: String,
    pub direction: SortDirection,
    pub nulls: NullHandling,
}

/// Parses `"col asc|desc[, ...]"` with an optional `nulls first|last` per
/// clause. Each comma-separated clause must have exactly two or four
/// whitespace-separated tokens; anything else is rejected.
pub fn parse_order_by(text: &str) -> Result<Vec<OrderByClause>, CmmnError> {
    if text.trim().is_empty() {
        return Err(CmmnError::IllegalArgument(
            "order by text must not be empty".into(),
        ));
    }
    let mut clauses = Vec::new();
    for raw in text.split(',') {
        let tokens: Vec<&str> = raw.split_whitespace().collect();
        match tokens.len() {
            2 => clauses.push(OrderByClause {
                column: tokens[0].to_string(),
                direction: tokens[1].parse()?,
                nulls: NullHandling::NullsLast,
            }),
            4 => {
                if !tokens[2].eq_ignore_ascii_case("nulls") {
                    return Err(CmmnError::IllegalArgument(format!(
                        "invalid order by clause '{}': expected 'nulls first' or 'nulls last'",
                        raw.trim()
                    )));
                }
                let nulls = match tokens[3].to_ascii_lowercase().as_str() {
                    "first" => NullHandling::NullsFirst,
                    "last" => NullHandling::NullsLast,
                    other => {
                        return Err(CmmnError::IllegalArgument(format!(
                            "invalid null handling '{other}' (expected first or last)"
                        )))
                    }
                };
                clauses.push(OrderByClause {
                    column: tokens[0].to_string(),
                    direction: tokens[1].parse()?,
                    nulls,
                });
            }
            n => {
                return Err(CmmnError::IllegalArgument(format!(
                    "invalid order by clause '{}': expected 2 or 4 tokens, got {n}",
                    raw.trim()
                )))
            }
        }
    }
    Ok(clauses)
}

// ─── Query parameter structs ──────────────────────────────────

#[derive(Clone, Debug)]
pub struct CaseInstanceQuery {
    pub case_definition_id: Option<String>,
    pub business_key: Option<String>,
    pub state: Option<CaseState>,
    pub tenant_id: Option<String>,
    /// SQL-style ordering text, e.g. `"start_time desc, business_key asc"`.
    pub order_by: Option<String>,
    pub offset: i32,
    pub limit: i32,
}

impl Default for CaseInstanceQuery {
    fn default() -> Self {
        Self {
            case_definition_id: None,
            business_key: None,
            state: None,
            tenant_id: None,
            order_by: None,
            offset: -1,
            limit: -1,
        }
    }
}

impl CaseInstanceQuery {
    pub fn matches(&self, instance: &CaseInstance) -> bool {
        if let Some(def) = &self.case_definition_id {
            if &instance.case_definition_id != def {
                return false;
            }
        }
        if let Some(key) = &self.business_key {
            if instance.business_key.as_deref() != Some(key.as_str()) {
                return false;
            }
        }
        if let Some(state) = self.state {
            if instance.state != state {
                return false;
            }
        }
        if let Some(tenant) = &self.tenant_id {
            if &instance.tenant_id != tenant {
                return false;
            }
        }
        true
    }
}

#[derive(Clone, Debug)]
pub struct PlanItemInstanceQuery {
    pub case_instance_id: Option<String>,
    pub plan_item_id: Option<String>,
    /// Empty = all states.
    pub states: Vec<PlanItemState>,
    pub stage_instance_id: Option<String>,
    pub order_by: Option<String>,
    pub offset: i32,
    pub limit: i32,
}

impl Default for PlanItemInstanceQuery {
    fn default() -> Self {
        Self {
            case_instance_id: None,
            plan_item_id: None,
            states: Vec::new(),
            stage_instance_id: None,
            order_by: None,
            offset: -1,
            limit: -1,
        }
    }
}

impl PlanItemInstanceQuery {
    pub fn matches(&self, item: &PlanItemInstance) -> bool {
        if let Some(case_id) = &self.case_instance_id {
            if &item.case_instance_id != case_id {
                return false;
            }
        }
        if let Some(plan_item_id) = &self.plan_item_id {
            if &item.plan_item_id != plan_item_id {
                return false;
            }
        }
        if !self.states.is_empty() && !self.states.contains(&item.state) {
            return false;
        }
        if let Some(stage) = &self.stage_instance_id {
            if item.stage_instance_id.as_deref() != Some(stage.as_str()) {
                return false;
            }
        }
        true
    }
}

#[derive(Clone, Debug)]
pub struct TaskQuery {
    pub case_instance_id: Option<String>,
    pub name: Option<String>,
    pub assignee: Option<String>,
    pub order_by: Option<String>,
    pub offset: i32,
    pub limit: i32,
}

impl Default for TaskQuery {
    fn default() -> Self {
        Self {
            case_instance_id: None,
            name: None,
            assignee: None,
            order_by: None,
            offset: -1,
            limit: -1,
        }
    }
}

impl TaskQuery {
    pub fn matches(&self, task: &TaskInstance) -> bool {
        if let Some(case_id) = &self.case_instance_id {
            if &task.case_instance_id != case_id {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if task.name.as_deref() != Some(name.as_str()) {
                return false;
            }
        }
        if let Some(assignee) = &self.assignee {
            if task.assignee.as_deref() != Some(assignee.as_str()) {
                return false;
            }
        }
        true
    }
}

// ─── Per-entity ordering ──────────────────────────────────────

/// Applies order-by clauses to case instances. Known columns: `id`,
/// `business_key`, `start_time`.
pub fn order_case_instances(
    instances: &mut [CaseInstance],
    clauses: &[OrderByClause],
) -> Result<(), CmmnError> {
    for clause in clauses {
        if !matches!(clause.column.as_str(), "id" | "business_key" | "start_time") {
            return Err(unknown_column("case instance", &clause.column));
        }
    }
    instances.sort_by(|a, b| {
        ordered_by(clauses, |clause| match clause.column.as_str() {
            "id" => compare_nullable(Some(&a.id), Some(&b.id), clause.direction, clause.nulls),
            "business_key" => compare_nullable(
                a.business_key.as_deref(),
                b.business_key.as_deref(),
                clause.direction,
                clause.nulls,
            ),
            _ => compare_nullable(
                Some(&a.start_time),
                Some(&b.start_time),
                clause.direction,
                clause.nulls,
            ),
        })
    });
    Ok(())
}

/// Applies order-by clauses to plan item instances. Known columns: `id`,
/// `name`, `create_time`.
pub fn order_plan_item_instances(
    items: &mut [PlanItemInstance],
    clauses: &[OrderByClause],
) -> Result<(), CmmnError> {
    for clause in clauses {
        if !matches!(clause.column.as_str(), "id" | "name" | "create_time") {
            return Err(unknown_column("plan item instance", &clause.column));
        }
    }
    items.sort_by(|a, b| {
        ordered_by(clauses, |clause| match clause.column.as_str() {
            "id" => compare_nullable(Some(&a.id), Some(&b.id), clause.direction, clause.nulls),
            "name" => compare_nullable(
                a.name.as_deref(),
                b.name.as_deref(),
                clause.direction,
                clause.nulls,
            ),
            _ => compare_nullable(
                Some(&a.create_time),
                Some(&b.create_time),
                clause.direction,
                clause.nulls,
            ),
        })
    });
    Ok(())
}

/// Applies order-by clauses to tasks. Known columns: `id`, `name`,
/// `create_time`.
pub fn order_tasks(tasks: &mut [TaskInstance], clauses: &[OrderByClause]) -> Result<(), CmmnError> {
    for clause in clauses {
        if !matches!(clause.column.as_str(), "id" | "name" | "create_time") {
            return Err(unknown_column("task", &clause.column));
        }
    }
    tasks.sort_by(|a, b| {
        ordered_by(clauses, |clause| match clause.column.as_str() {
            "id" => compare_nullable(Some(&a.id), Some(&b.id), clause.direction, clause.nulls),
            "name" => compare_nullable(
                a.name.as_deref(),
                b.name.as_deref(),
                clause.direction,
                clause.nulls,
            ),
            _ => compare_nullable(
                Some(&a.create_time),
                Some(&b.create_time),
                clause.direction,
                clause.nulls,
            ),
        })
    });
    Ok(())
}

fn unknown_column(entity: &str, column: &str) -> CmmnError {
    CmmnError::IllegalArgument(format!("unknown {entity} sort column '{column}'"))
}

/// First non-equal clause decides.
fn ordered_by(
    clauses: &[OrderByClause],
    compare: impl Fn(&OrderByClause) -> Ordering,
) -> Ordering {
    for clause in clauses {
        let ord = compare(clause);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}
