/// The shutdown synchronization object: a named OS mutex whose *creation*,
/// not its acquisition, tells monitors to detach.
pub const SHUTDOWN_MUTEX_NAME: &str = "analyzer-shutdown";

#[cfg(windows)]
pub fn raise(name: &str) -> std::io::Result<()> {
    use windows_sys::Win32::System::Threading::CreateMutexW;

    let wide_name: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();
    unsafe {
        let handle = CreateMutexW(std::ptr::null(), 0, wide_name.as_ptr());
        if handle == 0 {
            return Err(std::io::Error::last_os_error());
        }
        // Intentionally leaked: the mutex's existence for the remainder of
        // the process lifetime is the signal; closing it early would
        // un-signal monitors still polling for it.
    }
    Ok(())
}

#[cfg(not(windows))]
pub fn raise(_name: &str) -> std::io::Result<()> {
    Ok(())
}
