/// Whether a tracked process is still alive. Split out as its own trait
/// (rather than bundled into `Injector`) so the supervisor's monitor loop
/// can be exercised in tests without touching a real OS handle.
pub trait LivenessChecker: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
    fn terminate(&self, pid: u32);
}

#[cfg(windows)]
pub use win32::Win32Liveness;

#[cfg(windows)]
mod win32 {
    use super::LivenessChecker;
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::System::Threading::{
        GetExitCodeProcess, OpenProcess, TerminateProcess, PROCESS_QUERY_LIMITED_INFORMATION,
        PROCESS_TERMINATE, STILL_ACTIVE,
    };

    #[derive(Default)]
    pub struct Win32Liveness;

    impl LivenessChecker for Win32Liveness {
        fn is_alive(&self, pid: u32) -> bool {
            unsafe {
                let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
                if handle == 0 {
                    return false;
                }
                let mut exit_code: u32 = 0;
                let ok = GetExitCodeProcess(handle, &mut exit_code);
                CloseHandle(handle);
                ok != 0 && exit_code == STILL_ACTIVE as u32
            }
        }

        fn terminate(&self, pid: u32) {
            unsafe {
                let handle = OpenProcess(PROCESS_TERMINATE, 0, pid);
                if handle == 0 {
                    return;
                }
                TerminateProcess(handle, 1);
                CloseHandle(handle);
            }
        }
    }
}

/// Test double: processes stay alive until explicitly marked dead.
#[derive(Default)]
pub struct FakeLiveness {
    dead: std::sync::Mutex<std::collections::HashSet<u32>>,
    terminated: std::sync::Mutex<Vec<u32>>,
}

impl FakeLiveness {
    pub fn kill(&self, pid: u32) {
        self.dead.lock().unwrap().insert(pid);
    }

    pub fn terminated_pids(&self) -> Vec<u32> {
        self.terminated.lock().unwrap().clone()
    }
}

impl LivenessChecker for FakeLiveness {
    fn is_alive(&self, pid: u32) -> bool {
        !self.dead.lock().unwrap().contains(&pid)
    }

    fn terminate(&self, pid: u32) {
        self.dead.lock().unwrap().insert(pid);
        self.terminated.lock().unwrap().push(pid);
    }
}
