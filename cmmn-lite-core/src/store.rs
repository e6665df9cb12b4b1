//! Store contracts and the command (unit of work) machinery.
//!
//! Every public engine operation runs inside a command. Data managers that
//! mutate state during the command enlist themselves on the context; when
//! the command closes they receive the outcome and either keep their changes
//! (`Complete`) or compensate them (`Failure`). The compensation bookkeeping
//! itself lives in the managers, keyed by command id — there is no ambient
//! or thread-local state anywhere in this path.

use std::sync::{Arc, Mutex};

use tracing::debug;
use uuid::Uuid;

use crate::error::CmmnError;

// ─── Entity contract ──────────────────────────────────────────

/// Anything a data manager can store. Entities are kept and returned by
/// value; the manager clones on the way in and out.
pub trait Entity: Clone + Send + Sync + 'static {
    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);
    fn is_deleted(&self) -> bool;
    fn set_deleted(&mut self, deleted: bool);

    /// Optimistic revision. Immutable entities keep the no-op defaults.
    fn revision(&self) -> i32 {
        0
    }
    fn bump_revision(&mut self) {}
}

// ─── Id generation ────────────────────────────────────────────

/// Id source for inserts. Injected so tests can use predictable ids.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Default generator: time-ordered UUIDv7, so insertion order and id order
/// agree without extra sequence counters.
#[derive(Debug, Default)]
pub struct UuidV7IdGenerator;

impl IdGenerator for UuidV7IdGenerator {
    fn next_id(&self) -> String {
        Uuid::now_v7().to_string()
    }
}

// ─── Command context ──────────────────────────────────────────

/// How a command ended. Managers compensate on `Failure` and simply drop
/// their bookkeeping on `Complete`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    Complete,
    Failure,
}

/// A party interested in command close events. Data managers implement this.
pub trait CommandParticipant: Send + Sync {
    fn command_closed(&self, command_id: Uuid, outcome: CommandOutcome);
}

/// Handle for one unit of work. Store calls take it explicitly; managers
/// enlist on first mutation so only touched stores see the close event.
pub struct CommandContext {
    command_id: Uuid,
    participants: Mutex<Vec<Arc<dyn CommandParticipant>>>,
}

impl CommandContext {
    pub fn new() -> Self {
        Self {
            command_id: Uuid::now_v7(),
            participants: Mutex::new(Vec::new()),
        }
    }

    pub fn command_id(&self) -> Uuid {
        self.command_id
    }

    /// Registers a participant for the close event. Enlisting the same
    /// participant twice is fine; it is recorded once.
    pub fn enlist(&self, participant: Arc<dyn CommandParticipant>) {
        let mut participants = match self.participants.lock() {
            Ok(p) => p,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !participants.iter().any(|p| Arc::ptr_eq(p, &participant)) {
            participants.push(participant);
        }
    }

    /// Closes the command, delivering the outcome to every enlisted
    /// participant in enlistment order.
    pub fn close(self, outcome: CommandOutcome) {
        let participants = match self.participants.into_inner() {
            Ok(p) => p,
            Err(poisoned) => poisoned.into_inner(),
        };
        debug!(command_id = %self.command_id, ?outcome, participants = participants.len(), "command closed");
        for participant in participants {
            participant.command_closed(self.command_id, outcome);
        }
    }
}

impl Default for CommandContext {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Command executor ─────────────────────────────────────────

/// Runs a closure as one command on the calling thread. `Ok` closes with
/// `Complete`, `Err` with `Failure`; either way the result passes through.
#[derive(Debug, Default)]
pub struct CommandExecutor;

impl CommandExecutor {
    pub fn new() -> Self {
        Self
    }

    pub fn execute<R>(
        &self,
        work: impl FnOnce(&CommandContext) -> Result<R, CmmnError>,
    ) -> Result<R, CmmnError> {
        let ctx = CommandContext::new();
        debug!(command_id = %ctx.command_id(), "command opened");
        let result = work(&ctx);
        let outcome = match &result {
            Ok(_) => CommandOutcome::Complete,
            Err(_) => CommandOutcome::Failure,
        };
        ctx.close(outcome);
        result
    }
}
