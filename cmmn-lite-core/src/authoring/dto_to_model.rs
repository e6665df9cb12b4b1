use std::collections::HashMap;

use super::dto::{CaseModelDto, PlanItemDto, SentryDto};
use crate::model::{CaseModel, OnPartDef, PlanItemDefinition, PlanItemDefinitionType, SentryDef};

/// Convert a validated DTO into the resolved model. Runs after
/// `validate_dto`, so references are known to resolve; the conversion
/// itself cannot fail.
pub fn dto_to_model(dto: &CaseModelDto) -> CaseModel {
    let mut model = CaseModel {
        key: dto.key.clone(),
        name: dto.name.clone(),
        start_form_key: dto.start_form_key.clone(),
        autocomplete: dto.autocomplete,
        listeners: dto.listeners.clone(),
        root_items: dto.plan_items.iter().map(|i| i.id().to_string()).collect(),
        declaration_order: Vec::new(),
        plan_items: HashMap::new(),
    };
    convert_level(&dto.plan_items, None, &mut model);
    model
}

fn convert_level(items: &[PlanItemDto], parent_stage: Option<&str>, model: &mut CaseModel) {
    for item in items {
        let definition = convert_item(item, parent_stage);
        model.declaration_order.push(definition.id.clone());
        model.plan_items.insert(definition.id.clone(), definition);
        convert_level(item.children(), Some(item.id()), model);
    }
}

fn convert_item(item: &PlanItemDto, parent_stage: Option<&str>) -> PlanItemDefinition {
    let mut def = PlanItemDefinition {
        id: item.id().to_string(),
        name: None,
        definition_type: PlanItemDefinitionType::HumanTask,
        parent_stage_id: parent_stage.map(str::to_string),
        children: Vec::new(),
        required: false,
        manual_activation: false,
        autocomplete: false,
        entry_criteria: convert_sentries(item.entry_sentries()),
        exit_criteria: convert_sentries(item.exit_sentries()),
        listeners: Vec::new(),
        assignee: None,
    };
    match item {
        PlanItemDto::HumanTask {
            name,
            assignee,
            required,
            manual_activation,
            listeners,
            ..
        } => {
            def.definition_type = PlanItemDefinitionType::HumanTask;
            def.name = name.clone();
            def.assignee = assignee.clone();
            def.required = *required;
            def.manual_activation = *manual_activation;
            def.listeners = listeners.clone();
        }
        PlanItemDto::Milestone {
            name,
            required,
            listeners,
            ..
        } => {
            def.definition_type = PlanItemDefinitionType::Milestone;
            def.name = name.clone();
            def.required = *required;
            def.listeners = listeners.clone();
        }
        PlanItemDto::UserEventListener {
            name, listeners, ..
        } => {
            def.definition_type = PlanItemDefinitionType::UserEventListener;
            def.name = name.clone();
            def.listeners = listeners.clone();
        }
        PlanItemDto::Stage {
            name,
            required,
            manual_activation,
            autocomplete,
            listeners,
            plan_items,
            ..
        } => {
            def.definition_type = PlanItemDefinitionType::Stage;
            def.name = name.clone();
            def.required = *required;
            def.manual_activation = *manual_activation;
            def.autocomplete = *autocomplete;
            def.listeners = listeners.clone();
            def.children = plan_items.iter().map(|c| c.id().to_string()).collect();
        }
    }
    def
}

fn convert_sentries(sentries: &[SentryDto]) -> Vec<SentryDef> {
    sentries
        .iter()
        .map(|s| SentryDef {
            on_parts: s
                .on
                .iter()
                .map(|p| OnPartDef {
                    source_plan_item_id: p.plan_item.clone(),
                    standard_event: p.event,
                })
                .collect(),
            if_part: s.if_part.clone(),
        })
        .collect()
}
