//! Engine error type.
//!
//! One public enum covering the three caller-distinguishable failure classes
//! (not-found, bad argument, bad state) plus the deployment- and
//! listener-specific failures that callers match on.

use thiserror::Error;

use crate::authoring::validate::ValidationError;

#[derive(Debug, Error)]
pub enum CmmnError {
    /// A lookup found nothing. Carries the expected object type so the
    /// message names what was being looked for; `id` is the id or key text
    /// the lookup used.
    #[error("no {object_type} found for '{id}'")]
    ObjectNotFound { object_type: &'static str, id: String },

    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A plan item was asked to make a transition its current state does not
    /// permit. Terminal states permit nothing.
    #[error("plan item '{plan_item_id}' cannot make transition {transition} from state {from}")]
    InvalidTransition {
        plan_item_id: String,
        from: String,
        transition: String,
    },

    /// Two resources in one deployment batch produced the same definition key.
    /// Nothing from the batch is persisted.
    #[error("duplicate case definition key '{key}' in deployment")]
    DuplicateDefinitionKey { key: String },

    #[error("failed to parse resource '{resource}': {message}")]
    ResourceParse { resource: String, message: String },

    /// Structural validation of a parsed model failed. All rule violations
    /// are collected before reporting.
    #[error("model validation failed for '{resource}': {}", format_rules(.errors))]
    ModelValidation {
        resource: String,
        errors: Vec<ValidationError>,
    },

    /// A lifecycle listener returned an error. Dispatch stops at the first
    /// failure and the triggering operation is aborted; the original error
    /// is preserved as the source.
    #[error("lifecycle listener failed during {transition}: {source}")]
    ListenerFailure {
        transition: String,
        #[source]
        source: anyhow::Error,
    },
}

impl CmmnError {
    /// Shorthand for the not-found case, which nearly every lookup needs.
    pub fn not_found(object_type: &'static str, id: impl Into<String>) -> Self {
        CmmnError::ObjectNotFound {
            object_type,
            id: id.into(),
        }
    }
}

fn format_rules(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("[{}] {}", e.rule, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}
