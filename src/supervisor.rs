use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::AnalysisConfig;
use crate::errors::FatalError;
use crate::host::{HostClient, Uploader};
use crate::injection::{Injector, ProcessInfo};
use crate::ipc::handler::HandlerContext;
use crate::ipc::{self, StopFlag};
use crate::liveness::LivenessChecker;
use crate::package::{
    choose_package, instantiate_all_auxiliaries, instantiate_package, Auxiliary, Package,
    PackageOptions, Target,
};
use crate::session::Session;
use crate::shutdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Init,
    Prepared,
    Running,
    DrainRequested,
    Finalizing,
    Complete,
}

pub struct SupervisorOutcome {
    pub success: bool,
    pub error: String,
    pub results_dir: PathBuf,
}

/// Orchestrates prepare → launch → monitor → terminate → finalize. Every
/// external collaborator (`Injector`, `ProcessInfo`, `LivenessChecker`,
/// `Uploader`) is injected so the whole lifecycle can run against test
/// doubles.
pub struct Supervisor {
    pub config: Arc<AnalysisConfig>,
    pub session: Arc<Session>,
    pub results_dir: PathBuf,
    pub injector: Arc<dyn Injector>,
    pub process_info: Arc<dyn ProcessInfo>,
    pub liveness: Arc<dyn LivenessChecker>,
    pub uploader: Arc<dyn Uploader>,
    pub host: Arc<HostClient>,

    state: LifecycleState,
    package_name: String,
    package: Option<Box<dyn Package>>,
    auxiliaries: Vec<(&'static str, Box<dyn Auxiliary>)>,
    started_auxiliaries: Vec<usize>,
    polling_enabled: bool,
    stop_flag: Arc<StopFlag>,
    listeners: Vec<tokio::task::JoinHandle<()>>,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<AnalysisConfig>,
        session: Arc<Session>,
        results_dir: PathBuf,
        injector: Arc<dyn Injector>,
        process_info: Arc<dyn ProcessInfo>,
        liveness: Arc<dyn LivenessChecker>,
        uploader: Arc<dyn Uploader>,
        host: Arc<HostClient>,
    ) -> Self {
        Self {
            config,
            session,
            results_dir,
            injector,
            process_info,
            liveness,
            uploader,
            host,
            state: LifecycleState::Init,
            package_name: String::new(),
            package: None,
            auxiliaries: Vec::new(),
            started_auxiliaries: Vec::new(),
            polling_enabled: false,
            stop_flag: Arc::new(StopFlag::new()),
            listeners: Vec::new(),
        }
    }

    fn transition(&mut self, to: LifecycleState) {
        debug_assert!(
            to >= self.state,
            "lifecycle went backwards: {:?} -> {:?}",
            self.state,
            to
        );
        self.state = to;
    }

    /// Privilege acquisition, logging and clock adjustment are assumed
    /// already run by the caller (`main`), since they're process-global
    /// side effects this struct shouldn't repeat across retries; this
    /// method starts the IPC listeners.
    pub fn prepare(&mut self) {
        let ctx = HandlerContext {
            session: self.session.clone(),
            injector: self.injector.clone(),
            process_info: self.process_info.clone(),
            default_dll: self.config.default_dll().unwrap_or_default().to_string(),
        };
        self.listeners = ipc::spawn_listeners(ctx, self.stop_flag.clone());
        self.transition(LifecycleState::Prepared);
    }

    /// Selects and starts the analysis package and its auxiliaries. Returns
    /// a `FatalError` only when the package can't be found or its `start`
    /// hook fails; everything else is caught and logged at the call site.
    pub fn launch(&mut self) -> Result<(), FatalError> {
        let package_name = match &self.config.package {
            Some(name) => name.clone(),
            None => {
                let chosen = choose_package(
                    self.config.category,
                    self.config.file_type.as_deref(),
                    self.config.file_name.as_deref(),
                )
                .ok_or_else(|| {
                    FatalError::NoPackageForFileType(
                        self.config.file_type.clone().unwrap_or_default(),
                    )
                })?;
                info!(package = chosen, "automatically selected analysis package");
                chosen.to_string()
            }
        };

        let options: PackageOptions = self.config.options.clone();
        let mut pack = instantiate_package(&package_name, options.clone())
            .ok_or_else(|| FatalError::PackageNotFound(package_name.clone()))?;

        self.auxiliaries = instantiate_all_auxiliaries(&options);
        for (i, (name, aux)) in self.auxiliaries.iter_mut().enumerate() {
            match aux.start() {
                Ok(()) => self.started_auxiliaries.push(i),
                Err(e) => warn!(auxiliary = *name, error = %e, "auxiliary module failed to start"),
            }
        }

        let target = Target(self.config.target.clone());
        let pids = pack
            .start(&target)
            .map_err(|e| FatalError::PackageStartFailed(package_name.clone(), e))?;

        if pids.is_empty() {
            info!("no process ids returned by the package, running for the full timeout");
            self.polling_enabled = false;
        } else {
            self.session.processes.add_many(pids);
            self.polling_enabled = true;
        }

        if self.config.enforce_timeout {
            info!("enforce_timeout set, running for the full timeout");
            self.polling_enabled = false;
        }

        self.package_name = package_name;
        self.package = Some(pack);
        self.transition(LifecycleState::Running);
        Ok(())
    }

    /// The 1 Hz monitor loop: ticks the timeout, polls liveness, and checks
    /// in with the analysis package until one of them asks to stop.
    pub async fn run_monitor_loop(&mut self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        // first tick fires immediately; skip it so the first real tick is
        // one second in, matching a counter that starts at 1 after +1s
        ticker.tick().await;

        let mut seconds = 0u64;
        loop {
            ticker.tick().await;
            seconds += 1;

            if seconds == self.config.timeout {
                info!("analysis timeout hit, terminating analysis");
                break;
            }

            if self.session.injection_in_progress() {
                continue;
            }

            if self.polling_enabled {
                let snapshot = self.session.processes.snapshot();
                for pid in snapshot {
                    if !self.liveness.is_alive(pid) {
                        info!(pid, "process has terminated");
                        let _ = self.session.processes.remove(pid);
                    }
                }

                if self.session.processes.is_empty() {
                    info!("process list is empty, terminating analysis");
                    break;
                }

                let pids = self.session.processes.snapshot();
                if let Some(pack) = self.package.as_mut() {
                    pack.set_pids(&pids);
                }
            }

            let should_stop = match self.package.as_mut() {
                Some(pack) => match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| pack.check())) {
                    Ok(keep_going) => !keep_going,
                    Err(_) => {
                        warn!(package = %self.package_name, "check() panicked, continuing analysis");
                        false
                    }
                },
                None => false,
            };

            if should_stop {
                info!("the analysis package requested termination");
                break;
            }
        }

        self.transition(LifecycleState::DrainRequested);
    }

    /// The fixed, strictly-ordered shutdown sequence: signal monitors to
    /// detach, tear down the package and its auxiliaries, terminate any
    /// still-live tracked processes, stop the IPC listeners, then flush the
    /// file registry.
    pub async fn shutdown(&mut self) {
        self.transition(LifecycleState::Finalizing);

        // Listeners must stop taking new connections no matter which step
        // below panics first; scope this independently of step 7's ordered
        // position in the happy path.
        let stop_flag = self.stop_flag.clone();
        scopeguard::defer! {
            stop_flag.stop();
        }

        // 1. raise the shutdown mutex
        if let Err(e) = shutdown::raise(shutdown::SHUTDOWN_MUTEX_NAME) {
            warn!(error = %e, "failed to raise shutdown mutex");
        }

        // 2. package.finish()
        if let Some(pack) = self.package.as_mut() {
            if let Err(_e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| pack.finish())) {
                warn!(package = %self.package_name, "finish() panicked");
            }
        }

        // 3. upload package_files()
        if let Some(pack) = self.package.as_mut() {
            let files = pack.package_files();
            for (path, name) in files {
                let remote = format!("package_files/{name}");
                if let Err(e) = self.uploader.upload(&path, &remote).await {
                    warn!(error = %e, "failed to upload package file");
                }
            }
        }

        // 4. stop() on each successfully-started auxiliary, in start order
        for &i in &self.started_auxiliaries {
            let (name, aux) = &mut self.auxiliaries[i];
            if let Err(e) = aux.stop() {
                warn!(auxiliary = *name, error = %e, "auxiliary module failed to stop");
            }
        }

        // 5. terminate remaining tracked processes if configured
        if self.config.terminate_processes {
            info!("terminating remaining processes before shutdown");
            for pid in self.session.processes.snapshot() {
                if self.liveness.is_alive(pid) {
                    self.liveness.terminate(pid);
                }
            }
        }

        // 6. finish() on every discovered auxiliary, in discovery order
        for (_, aux) in self.auxiliaries.iter_mut() {
            aux.finish();
        }

        // 7. stop pipe listeners (the stop flag itself is already raised by
        // the scope guard above; this step aborts the listener tasks)
        for handle in self.listeners.drain(..) {
            handle.abort();
        }

        // 8. flush the file registry
        self.session.files.dump_all().await;

        self.transition(LifecycleState::Complete);
    }

    /// Runs `prepare` → `launch` → monitor → `shutdown` and returns the
    /// outcome the caller reports to the host exactly once. Fatal errors
    /// during `launch` still run `shutdown` (so listeners stop and any
    /// partial file registry is flushed) before being reported.
    pub async fn run(&mut self) -> SupervisorOutcome {
        self.prepare();

        let error = match self.launch() {
            Ok(()) => {
                self.run_monitor_loop().await;
                String::new()
            }
            Err(e) => e.to_string(),
        };

        self.shutdown().await;

        SupervisorOutcome {
            success: error.is_empty(),
            error,
            results_dir: self.results_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetCategory;
    use crate::errors::PackageError;
    use crate::host::NullUploader;
    use crate::injection::{NullInjector, StaticProcessInfo};
    use crate::liveness::FakeLiveness;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(timeout: u64, enforce_timeout: bool) -> Arc<AnalysisConfig> {
        Arc::new(AnalysisConfig {
            category: TargetCategory::File,
            target: "x.exe".into(),
            file_name: Some("x.exe".into()),
            file_type: Some("pe32".into()),
            package: Some("test".into()),
            timeout,
            clock: time::PrimitiveDateTime::MIN,
            enforce_timeout,
            terminate_processes: false,
            options: Default::default(),
        })
    }

    struct CountingPackage {
        pids: Vec<u32>,
        checks: Arc<AtomicU32>,
        fail_after: Option<u32>,
    }

    impl Package for CountingPackage {
        fn start(&mut self, _target: &Target) -> Result<Vec<u32>, PackageError> {
            Ok(self.pids.clone())
        }

        fn check(&mut self) -> bool {
            let n = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
            match self.fail_after {
                Some(limit) => n < limit,
                None => true,
            }
        }
    }

    fn build_supervisor(cfg: Arc<AnalysisConfig>, liveness: Arc<FakeLiveness>) -> (Supervisor, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(
            cfg.clone(),
            Arc::new(NullUploader::default()),
            std::process::id(),
            1,
            vec![],
        );
        let sup = Supervisor::new(
            cfg,
            session,
            dir.path().to_path_buf(),
            Arc::new(NullInjector::default()),
            Arc::new(StaticProcessInfo::default()),
            liveness,
            Arc::new(NullUploader::default()),
            Arc::new(HostClient::new()),
        );
        (sup, dir)
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_with_no_pids_runs_full_duration_without_polling() {
        let cfg = config(3, false);
        let liveness = Arc::new(FakeLiveness::default());
        let (mut sup, _dir) = build_supervisor(cfg, liveness);
        sup.package = Some(Box::new(CountingPackage {
            pids: vec![],
            checks: Arc::new(AtomicU32::new(0)),
            fail_after: None,
        }));
        sup.polling_enabled = false; // as launch() would leave it for a package with no pids

        sup.prepare();
        sup.run_monitor_loop().await;

        assert!(!sup.polling_enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn check_returning_false_ends_the_loop() {
        let cfg = config(60, false);
        let liveness = Arc::new(FakeLiveness::default());
        let (mut sup, _dir) = build_supervisor(cfg, liveness);
        let checks = Arc::new(AtomicU32::new(0));
        sup.package = Some(Box::new(CountingPackage {
            pids: vec![],
            checks: checks.clone(),
            fail_after: Some(5),
        }));
        sup.polling_enabled = false;

        sup.prepare();
        sup.run_monitor_loop().await;

        assert_eq!(checks.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_registry_ends_the_loop_when_polling() {
        let cfg = config(60, false);
        let liveness = Arc::new(FakeLiveness::default());
        let (mut sup, _dir) = build_supervisor(cfg, liveness.clone());
        sup.session.processes.add(1234);
        sup.package = Some(Box::new(CountingPackage {
            pids: vec![1234],
            checks: Arc::new(AtomicU32::new(0)),
            fail_after: None,
        }));
        sup.polling_enabled = true;

        liveness.kill(1234);
        sup.prepare();
        sup.run_monitor_loop().await;

        assert!(sup.session.processes.is_empty());
    }

    #[tokio::test]
    async fn unknown_package_is_a_fatal_error() {
        let cfg = Arc::new(AnalysisConfig {
            package: Some("does-not-exist".into()),
            ..(*config(10, false)).clone()
        });
        let liveness = Arc::new(FakeLiveness::default());
        let (mut sup, _dir) = build_supervisor(cfg, liveness);
        sup.prepare();
        assert!(sup.launch().is_err());
    }

    #[tokio::test]
    async fn terminate_processes_kills_remaining_live_pids_at_shutdown() {
        let mut cfg = (*config(10, false)).clone();
        cfg.terminate_processes = true;
        let cfg = Arc::new(cfg);
        let liveness = Arc::new(FakeLiveness::default());
        let (mut sup, _dir) = build_supervisor(cfg, liveness.clone());
        sup.session.processes.add(777);
        sup.package = Some(Box::new(CountingPackage {
            pids: vec![],
            checks: Arc::new(AtomicU32::new(0)),
            fail_after: None,
        }));

        sup.prepare();
        sup.shutdown().await;

        assert_eq!(liveness.terminated_pids(), vec![777]);
    }
}
