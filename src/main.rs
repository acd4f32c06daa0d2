mod auxiliary;
mod clock;
mod config;
mod errors;
mod host;
mod injection;
mod ipc;
mod liveness;
mod logging;
mod package;
mod packages;
mod privileges;
mod registry;
mod session;
mod shutdown;
mod supervisor;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{error, info, warn};

use config::AnalysisConfig;
use host::HostClient;
use injection::ProcessInfo;
use session::Session;
use supervisor::Supervisor;

const CONFIG_PATH: &str = "analysis.conf";
const RESULTS_DIR: &str = "results";
const TEMP_DIR: &str = ".";

#[cfg(windows)]
struct Win32ProcessInfo;

#[cfg(windows)]
impl ProcessInfo for Win32ProcessInfo {
    fn executable_basename(&self, pid: u32) -> Option<String> {
        use std::ffi::OsString;
        use std::os::windows::ffi::OsStringExt;
        use windows_sys::Win32::Foundation::{CloseHandle, MAX_PATH};
        use windows_sys::Win32::System::Threading::{
            OpenProcess, QueryFullProcessImageNameW, PROCESS_QUERY_LIMITED_INFORMATION,
        };

        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
            if handle == 0 {
                return None;
            }

            let mut buf = [0u16; MAX_PATH as usize];
            let mut size = buf.len() as u32;
            let ok = QueryFullProcessImageNameW(handle, 0, buf.as_mut_ptr(), &mut size);
            CloseHandle(handle);

            if ok == 0 {
                return None;
            }

            let full_path = OsString::from_wide(&buf[..size as usize]);
            Path::new(&full_path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        }
    }
}

#[cfg(not(windows))]
struct Win32ProcessInfo;

#[cfg(not(windows))]
impl ProcessInfo for Win32ProcessInfo {
    fn executable_basename(&self, _pid: u32) -> Option<String> {
        None
    }
}

/// Builds the fixed, non-configurable set of pid basenames the injection
/// policy never touches, in addition to the analyzer's own process tree
/// (already excluded by `supervisor_pid`/`supervisor_ppid`).
fn protected_process_names() -> Vec<String> {
    vec!["explorer.exe".to_string()]
}

#[tokio::main]
async fn main() -> ExitCode {
    let host_client = Arc::new(HostClient::new());
    let results_dir = PathBuf::from(RESULTS_DIR);

    let (success, error_message) = match run(&results_dir, host_client.clone()).await {
        Ok(()) => (true, String::new()),
        Err(e) => (false, e),
    };

    match host_client
        .report_complete(success, &error_message, &results_dir)
        .await
    {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "failed to report completion to the host, nothing left to do");
            ExitCode::FAILURE
        }
    }
}

/// Everything between process start and the guaranteed host report: set up,
/// then race the supervisor's full lifecycle against Ctrl+C, catching any
/// panic along the way so the caller always gets a `(success, error)` pair
/// instead of an aborted process.
async fn run(results_dir: &Path, host_client: Arc<HostClient>) -> Result<(), String> {
    if let Err(e) = privileges::acquire_debug_privilege() {
        warn!(error = %e, "failed to acquire debug privilege, continuing anyway");
    }

    if let Err(e) = logging::init(results_dir) {
        eprintln!("failed to initialize logging: {e}");
    }

    let mut config = AnalysisConfig::load(Path::new(CONFIG_PATH)).map_err(|e| e.to_string())?;
    config.target = config.resolve_target(Path::new(TEMP_DIR));
    let config = Arc::new(config);

    if let Err(e) = clock::set_guest_clock(config.clock) {
        warn!(error = %e, "failed to set guest wall clock, continuing anyway");
    }

    let supervisor_pid = std::process::id();
    let supervisor_ppid = parent_pid();

    let session = Session::new(
        config.clone(),
        host_client.clone(),
        supervisor_pid,
        supervisor_ppid,
        protected_process_names(),
    );

    let injector: Arc<dyn injection::Injector> = real_injector();
    let process_info: Arc<dyn ProcessInfo> = Arc::new(Win32ProcessInfo);

    let mut supervisor = Supervisor::new(
        config,
        session,
        results_dir.to_path_buf(),
        injector,
        process_info,
        real_liveness(),
        host_client.clone(),
        host_client,
    );

    let run_future = std::panic::AssertUnwindSafe(supervisor.run()).catch_unwind();
    tokio::select! {
        outcome = run_future => {
            match outcome {
                Ok(outcome) => {
                    if outcome.success {
                        info!("analysis completed normally");
                        Ok(())
                    } else {
                        Err(outcome.error)
                    }
                }
                Err(panic) => {
                    let message = panic_message(&panic);
                    error!(%message, "analyzer panicked");
                    Err(message)
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("received interrupt, aborting analysis");
            Err("Keyboard Interrupt".to_string())
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "analyzer panicked with a non-string payload".to_string()
    }
}

#[cfg(windows)]
fn real_injector() -> Arc<dyn injection::Injector> {
    Arc::new(injection::Win32Injector::new())
}

#[cfg(not(windows))]
fn real_injector() -> Arc<dyn injection::Injector> {
    Arc::new(injection::NullInjector::default())
}

#[cfg(windows)]
fn real_liveness() -> Arc<dyn liveness::LivenessChecker> {
    Arc::new(liveness::Win32Liveness)
}

#[cfg(not(windows))]
fn real_liveness() -> Arc<dyn liveness::LivenessChecker> {
    Arc::new(liveness::FakeLiveness::default())
}

#[cfg(windows)]
fn parent_pid() -> u32 {
    use windows_sys::Win32::Foundation::{CloseHandle, INVALID_HANDLE_VALUE};
    use windows_sys::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
        TH32CS_SNAPPROCESS,
    };

    let current = std::process::id();
    unsafe {
        let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0);
        if snapshot == INVALID_HANDLE_VALUE {
            return 0;
        }

        let mut entry: PROCESSENTRY32W = std::mem::zeroed();
        entry.dwSize = std::mem::size_of::<PROCESSENTRY32W>() as u32;

        let mut found = 0;
        if Process32FirstW(snapshot, &mut entry) != 0 {
            loop {
                if entry.th32ProcessID == current {
                    found = entry.th32ParentProcessID;
                    break;
                }
                if Process32NextW(snapshot, &mut entry) == 0 {
                    break;
                }
            }
        }

        CloseHandle(snapshot);
        found
    }
}

#[cfg(not(windows))]
fn parent_pid() -> u32 {
    1
}
