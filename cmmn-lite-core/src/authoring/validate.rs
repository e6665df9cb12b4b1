use std::collections::HashSet;

use super::dto::{CaseModelDto, PlanItemDto, SentryDto};

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub rule: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.rule, self.message)
    }
}

/// Validate a CaseModelDto before model conversion. Returns all errors found.
pub fn validate_dto(dto: &CaseModelDto) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    // V1: case key must be non-empty
    if dto.key.trim().is_empty() {
        errors.push(ValidationError {
            rule: "V1".to_string(),
            message: "Case key must not be empty".to_string(),
        });
    }

    let items = flatten(&dto.plan_items);

    // V2: plan item ids must be unique across the whole tree
    let mut seen: HashSet<&str> = HashSet::new();
    for item in &items {
        if !seen.insert(item.id()) {
            errors.push(ValidationError {
                rule: "V2".to_string(),
                message: format!("Duplicate plan item id: {}", item.id()),
            });
        }
    }

    // V3 + V4 + V5 per sentry
    for item in &items {
        for sentry in item.entry_sentries().iter().chain(item.exit_sentries()) {
            validate_sentry(item.id(), sentry, &seen, &mut errors);
        }
    }

    errors
}

fn validate_sentry(
    owner_id: &str,
    sentry: &SentryDto,
    known_ids: &HashSet<&str>,
    errors: &mut Vec<ValidationError>,
) {
    // V3: a sentry must have at least one on-part or an if-part
    if sentry.on.is_empty() && sentry.if_part.is_none() {
        errors.push(ValidationError {
            rule: "V3".to_string(),
            message: format!("Plan item {owner_id}: sentry has neither on-parts nor an if-part"),
        });
    }
    for part in &sentry.on {
        // V4: on-part references must resolve to a plan item in the model
        if !known_ids.contains(part.plan_item.as_str()) {
            errors.push(ValidationError {
                rule: "V4".to_string(),
                message: format!(
                    "Plan item {owner_id}: sentry references unknown plan item '{}'",
                    part.plan_item
                ),
            });
        }
        // V5: an item cannot listen for its own transitions
        if part.plan_item == owner_id {
            errors.push(ValidationError {
                rule: "V5".to_string(),
                message: format!("Plan item {owner_id}: sentry references itself"),
            });
        }
    }
}

fn flatten(items: &[PlanItemDto]) -> Vec<&PlanItemDto> {
    let mut all = Vec::new();
    for item in items {
        all.push(item);
        all.extend(flatten(item.children()));
    }
    all
}
