//! cmmn-lite - a small case management engine
//!
//! This crate implements a CMMN-flavoured case runtime around one call
//! chain: YAML Source -> Case Model -> Deployment -> Case Instance ->
//! Sentry Evaluation.
//!
//! Plan items move through the CMMN lifecycle states; sentries with
//! on-parts and if-parts decide when they move; dynamic state changes let
//! an operator override the sentry-driven flow without forking instance
//! records.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cmmn_lite_core::{CmmnLiteEngine, DeploymentBuilder, StartCaseBuilder};
//!
//! let engine = CmmnLiteEngine::default();
//! engine
//!     .deploy(DeploymentBuilder::new("demo").add_file("cases/review.cmmn.yaml").unwrap())
//!     .unwrap();
//! let case = engine
//!     .start_case(StartCaseBuilder::new().by_key("review"))
//!     .unwrap();
//! assert!(!case.id.is_empty());
//! ```

// Core error handling
pub mod error;

// The plan item lifecycle state machine
pub mod state;

// Case models: plan item definitions, sentries, listener declarations
pub mod model;

// YAML authoring: DTOs, validation, model building, SVG diagrams
pub mod authoring;

// Command scope, in-memory data managers and queries
pub mod query;
pub mod store;
pub mod store_memory;

// Runtime entities
pub mod types;

// Deployment pipeline, versioning and the definition cache
pub mod deploy;
pub mod registry;

// Lifecycle listener dispatch
pub mod listener;

// The engine - case runtime, sentry evaluation, dynamic state changes
pub mod change_state;
pub mod engine;

// Public re-exports for the common call chain
pub use change_state::ChangeStateBuilder;
pub use deploy::{CaseDefinitionCacheEntry, DeployOutcome, DeploymentBuilder};
pub use engine::{CmmnLiteEngine, CmmnLiteEngineBuilder, StartCaseBuilder};
pub use error::CmmnError;
pub use model::CaseModel;
pub use query::{CaseInstanceQuery, PlanItemInstanceQuery, TaskQuery};
pub use state::{CaseState, PlanItemState, PlanItemTransition};
pub use types::{
    CaseDefinition, CaseDeployment, CaseInstance, PlanItemInstance, TaskInstance, NO_TENANT_ID,
};

// Listener seam re-exports
pub use listener::{CaseLifecycleListener, ListenerRegistry, PlanItemLifecycleListener};
