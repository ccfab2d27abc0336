//! Ownership of the call's current migration

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use super::machine::{CompletionCallback, MigrationEnvironment, MigrationHandle, MigrationMachine, MigrationSignal};
use super::stage::MigrationStage;

/// Keeps at most one migration alive. A new trigger abandons the previous
/// attempt before the next one starts.
pub struct MigrationCoordinator {
    environment: MigrationEnvironment,
    current: Mutex<Option<MigrationHandle>>,
}

impl MigrationCoordinator {
    pub fn new(environment: MigrationEnvironment) -> Self {
        Self {
            environment,
            current: Mutex::new(None),
        }
    }

    pub fn trigger(&self, signal: MigrationSignal, on_completed: CompletionCallback) -> Uuid {
        let machine = MigrationMachine::new(self.environment.clone(), signal);
        let id = machine.id();

        let mut current = self.current.lock();
        if let Some(previous) = current.take() {
            if !previous.stage().is_terminal() {
                info!(id = %previous.id(), stage = %previous.stage(), "Abandoning previous migration");
            }
            previous.abandon();
        }
        *current = Some(machine.start(on_completed));
        id
    }

    pub fn current_id(&self) -> Option<Uuid> {
        self.current.lock().as_ref().map(MigrationHandle::id)
    }

    pub fn current_stage(&self) -> Option<MigrationStage> {
        self.current.lock().as_ref().map(MigrationHandle::stage)
    }

    pub fn stages(&self) -> Option<watch::Receiver<MigrationStage>> {
        self.current.lock().as_ref().map(MigrationHandle::stages)
    }

    pub fn is_migrating(&self) -> bool {
        self.current_stage()
            .map(|stage| !stage.is_terminal())
            .unwrap_or(false)
    }

    /// Drop the current migration, abandoning it if still running
    pub fn clear(&self) {
        self.current.lock().take();
    }
}
