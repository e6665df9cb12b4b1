//! Case runtime — end-to-end lifecycle choreography
//!
//! Drives one service-desk model through its whole life: sentry-gated
//! stage entry, a deferred if-part, manual activation and disabling,
//! milestone and user-event-listener plumbing, dynamic operator
//! overrides, and the listener seam watching every hop.

use std::sync::{Arc, Mutex};

use serde_json::json;

use cmmn_lite_core::{
    CaseState, CmmnError, CmmnLiteEngine, DeploymentBuilder, PlanItemInstance,
    PlanItemInstanceQuery, PlanItemLifecycleListener, PlanItemState, StartCaseBuilder,
    TaskInstance, TaskQuery,
};

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

const SERVICE_DESK_YAML: &str = r#"
key: service_desk
name: Service desk
plan_items:
  - kind: HumanTask
    id: intake
    name: Intake
    assignee: front-desk
  - kind: Stage
    id: handling
    name: Handling
    entry:
      - on:
          - plan_item: intake
    plan_items:
      - kind: HumanTask
        id: diagnose
        name: Diagnose
      - kind: HumanTask
        id: fix
        name: Fix
        entry:
          - on:
              - plan_item: diagnose
            if:
              variable: severity
              op: ">"
              value: 0
      - kind: HumanTask
        id: escalate
        name: Escalate
        manual_activation: true
  - kind: Milestone
    id: resolved
    name: Resolved
    entry:
      - on:
          - plan_item: handling
  - kind: UserEventListener
    id: abort
    name: Abort
  - kind: HumanTask
    id: survey
    name: Survey
    entry:
      - on:
          - plan_item: resolved
            event: occur
    exit:
      - on:
          - plan_item: abort
            event: occur
"#;

// ---------------------------------------------------------------------------
// Test rig
// ---------------------------------------------------------------------------

struct Desk {
    engine: CmmnLiteEngine,
    case_id: String,
}

impl Desk {
    fn open() -> Self {
        Self::open_with(CmmnLiteEngine::default())
    }

    fn open_with(engine: CmmnLiteEngine) -> Self {
        // Initialize logging for tests
        let _ = tracing_subscriber::fmt()
            .with_env_filter("cmmn_lite_core=debug")
            .try_init();

        engine
            .deploy(
                DeploymentBuilder::new("service-desk")
                    .add_resource("service_desk.cmmn.yaml", SERVICE_DESK_YAML),
            )
            .unwrap();
        let case = engine
            .start_case(
                StartCaseBuilder::new()
                    .by_key("service_desk")
                    .business_key("ticket-4711"),
            )
            .unwrap();
        Desk {
            engine,
            case_id: case.id,
        }
    }

    /// Latest instance row of one definition (UUIDv7 ids sort by time).
    fn instance_of(&self, plan_item_id: &str) -> PlanItemInstance {
        self.engine
            .query_plan_item_instances(&PlanItemInstanceQuery {
                case_instance_id: Some(self.case_id.clone()),
                plan_item_id: Some(plan_item_id.to_string()),
                order_by: Some("id asc".into()),
                ..Default::default()
            })
            .unwrap()
            .pop()
            .unwrap_or_else(|| panic!("no instance of '{plan_item_id}'"))
    }

    fn state_of(&self, plan_item_id: &str) -> PlanItemState {
        self.instance_of(plan_item_id).state
    }

    fn tasks_named(&self, name: &str) -> Vec<TaskInstance> {
        self.engine
            .query_tasks(&TaskQuery {
                case_instance_id: Some(self.case_id.clone()),
                name: Some(name.to_string()),
                ..Default::default()
            })
            .unwrap()
    }

    fn complete_named(&self, name: &str) {
        let task = self.tasks_named(name).remove(0);
        self.engine.complete_task(&task.id).unwrap();
    }

    fn case_is_gone(&self) -> bool {
        self.engine.get_case_instance(&self.case_id).is_none()
            && self
                .engine
                .query_plan_item_instances(&PlanItemInstanceQuery {
                    case_instance_id: Some(self.case_id.clone()),
                    ..Default::default()
                })
                .unwrap()
                .is_empty()
    }
}

/// Collects every plan item state change, in dispatch order.
#[derive(Default)]
struct RecordingListener {
    events: Mutex<Vec<(String, Option<PlanItemState>, PlanItemState)>>,
}

impl PlanItemLifecycleListener for RecordingListener {
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

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn service_desk_runs_to_completion() {
    let recording = Arc::new(RecordingListener::default());
    let engine = CmmnLiteEngine::builder()
        .add_plan_item_listener(recording.clone())
        .build();
    let desk = Desk::open_with(engine);

    // Step 1: only the criteria-less intake is live.
    assert_eq!(desk.state_of("intake"), PlanItemState::Active);
    assert_eq!(desk.state_of("handling"), PlanItemState::Available);
    assert_eq!(desk.tasks_named("Intake")[0].assignee.as_deref(), Some("front-desk"));

    // Step 2: finishing intake opens the stage and stamps its children.
    desk.complete_named("Intake");
    assert_eq!(desk.state_of("handling"), PlanItemState::Active);
    assert_eq!(desk.state_of("diagnose"), PlanItemState::Active);
    assert_eq!(desk.state_of("fix"), PlanItemState::Available);
    assert_eq!(desk.state_of("escalate"), PlanItemState::Enabled);
    assert_eq!(
        desk.engine.get_case_instance(&desk.case_id).unwrap().state,
        CaseState::Active
    );

    // Step 3: diagnose completes but the if-part still gates fix.
    desk.complete_named("Diagnose");
    assert_eq!(desk.state_of("fix"), PlanItemState::Available);
    assert!(desk.tasks_named("Fix").is_empty());

    // Step 4: the guard flips; the recorded on-part plus the now-true
    // if-part fire the sentry.
    desk.engine
        .set_variable(&desk.case_id, "severity", json!(2))
        .unwrap();
    assert_eq!(desk.state_of("fix"), PlanItemState::Active);
    assert_eq!(desk.tasks_named("Fix").len(), 1);

    // Step 5: the enabled escalate item keeps the stage open.
    desk.complete_named("Fix");
    assert_eq!(desk.state_of("handling"), PlanItemState::Active);

    // Step 6: disabling it lets the stage finish, which occurs the
    // milestone, which activates the survey.
    let escalate = desk.instance_of("escalate");
    desk.engine.disable_plan_item(&escalate.id).unwrap();
    assert_eq!(desk.state_of("handling"), PlanItemState::Completed);
    assert_eq!(desk.state_of("resolved"), PlanItemState::Completed);
    assert_eq!(desk.state_of("survey"), PlanItemState::Active);

    // Step 7: the last task completes the case and the runtime rows go.
    desk.complete_named("Survey");
    assert!(desk.case_is_gone());
    assert!(desk.tasks_named("Survey").is_empty());

    // The listener saw the milestone's whole life.
    let events = recording.events.lock().unwrap();
    let resolved: Vec<_> = events
        .iter()
        .filter(|(id, _, _)| id == "resolved")
        .map(|(_, old, new)| (*old, *new))
        .collect();
    assert_eq!(
        resolved,
        vec![
            (None, PlanItemState::Available),
            (Some(PlanItemState::Available), PlanItemState::Completed),
        ]
    );
}

#[test]
fn early_abort_terminates_the_survey_tail() {
    let desk = Desk::open();

    // The user event fires before the survey ever becomes active.
    let abort = desk.instance_of("abort");
    desk.engine.trigger_user_event_listener(&abort.id).unwrap();
    assert_eq!(desk.state_of("abort"), PlanItemState::Completed);
    assert_eq!(desk.state_of("survey"), PlanItemState::Terminated);

    // The rest of the case is unimpressed and still completes.
    desk.complete_named("Intake");
    desk.engine
        .set_variable(&desk.case_id, "severity", json!(1))
        .unwrap();
    desk.complete_named("Diagnose");
    desk.complete_named("Fix");
    let escalate = desk.instance_of("escalate");
    desk.engine.disable_plan_item(&escalate.id).unwrap();
    assert!(desk.case_is_gone());
}

#[test]
fn terminate_wipes_the_runtime_but_not_the_definitions() {
    let desk = Desk::open();
    desk.complete_named("Intake");

    desk.engine.terminate_case(&desk.case_id).unwrap();
    assert!(desk.case_is_gone());
    assert!(desk
        .engine
        .query_tasks(&TaskQuery {
            case_instance_id: Some(desk.case_id.clone()),
            ..Default::default()
        })
        .unwrap()
        .is_empty());

    // Definitions survive; a second terminate has nothing to address.
    assert!(desk
        .engine
        .find_latest_definition_by_key("service_desk", None)
        .is_ok());
    assert!(matches!(
        desk.engine.terminate_case(&desk.case_id),
        Err(CmmnError::ObjectNotFound { .. })
    ));
}

#[test]
fn operator_overrides_reroute_a_running_case() {
    let desk = Desk::open();

    // Step 1: activating fix by definition id opens the whole stage chain
    // and skips both the on-part and the severity guard.
    desk.engine
        .create_change_state_builder(&desk.case_id)
        .activate("fix")
        .change_state()
        .unwrap();
    assert_eq!(desk.state_of("handling"), PlanItemState::Active);
    assert_eq!(desk.state_of("fix"), PlanItemState::Active);
    assert_eq!(desk.tasks_named("Fix").len(), 1);
    // The end-of-step evaluation ran the stamped siblings as usual.
    assert_eq!(desk.state_of("diagnose"), PlanItemState::Active);
    assert_eq!(desk.state_of("escalate"), PlanItemState::Enabled);
    assert_eq!(desk.state_of("intake"), PlanItemState::Active);

    // Step 2: reverting a criteria-less item keeps the record; ordinary
    // evaluation re-activates the very same instance straight away.
    let before = desk.instance_of("diagnose");
    desk.engine
        .create_change_state_builder(&desk.case_id)
        .make_available("diagnose")
        .change_state()
        .unwrap();
    let after = desk.instance_of("diagnose");
    assert_eq!(after.id, before.id);
    assert_eq!(after.state, PlanItemState::Active);
    assert_eq!(desk.tasks_named("Diagnose").len(), 1);

    // Step 3: moving fix out of the stage leaves the occupied stage alone.
    desk.engine
        .create_change_state_builder(&desk.case_id)
        .move_plan_item("fix", "survey")
        .change_state()
        .unwrap();
    assert_eq!(desk.state_of("fix"), PlanItemState::Terminated);
    assert_eq!(desk.state_of("survey"), PlanItemState::Active);
    assert_eq!(desk.state_of("handling"), PlanItemState::Active);
    assert!(desk.tasks_named("Fix").is_empty());
    assert_eq!(desk.tasks_named("Survey").len(), 1);
}
