use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use crate::config::AnalysisConfig;
use crate::host::Uploader;
use crate::registry::{FileRegistry, ProcessRegistry};

/// All state shared between the IPC server, the command handler and the
/// supervisor. A single value the supervisor owns and hands out by `Arc`,
/// rather than process-wide globals.
pub struct Session {
    pub config: Arc<AnalysisConfig>,
    pub processes: ProcessRegistry,
    pub files: FileRegistry,
    /// Serializes the injection policy's decision window. An async mutex,
    /// not `std::sync::Mutex`: the supervisor's deferral check (`try_lock`)
    /// must run from async context without blocking.
    pub injection_lock: AsyncMutex<()>,
    pub supervisor_pid: u32,
    pub supervisor_ppid: u32,
    pub protected_names: Vec<String>,
}

impl Session {
    pub fn new(
        config: Arc<AnalysisConfig>,
        uploader: Arc<dyn Uploader>,
        supervisor_pid: u32,
        supervisor_ppid: u32,
        protected_names: Vec<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            processes: ProcessRegistry::new(),
            files: FileRegistry::new(uploader),
            injection_lock: AsyncMutex::new(()),
            supervisor_pid,
            supervisor_ppid,
            protected_names,
        })
    }

    /// Polled by the supervisor's monitor loop: while the injection lock is
    /// held, the registry must not be treated as a stable snapshot.
    pub fn injection_in_progress(&self) -> bool {
        self.injection_lock.try_lock().is_err()
    }
}
