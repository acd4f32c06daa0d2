use time::PrimitiveDateTime;
use tracing::info;

/// Sets the guest wall clock via `SetLocalTime` rather than shelling out to
/// a locale-dependent `date`/`time` command.
#[cfg(windows)]
pub fn set_guest_clock(clock: PrimitiveDateTime) -> std::io::Result<()> {
    use windows_sys::Win32::Foundation::SYSTEMTIME;
    use windows_sys::Win32::System::SystemInformation::SetLocalTime;

    let st = SYSTEMTIME {
        wYear: clock.year() as u16,
        wMonth: clock.month() as u16,
        wDayOfWeek: 0,
        wDay: clock.day() as u16,
        wHour: clock.hour() as u16,
        wMinute: clock.minute() as u16,
        wSecond: clock.second() as u16,
        wMilliseconds: 0,
    };

    info!(%clock, "setting guest wall clock");
    let ok = unsafe { SetLocalTime(&st) };
    if ok == 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(windows))]
pub fn set_guest_clock(clock: PrimitiveDateTime) -> std::io::Result<()> {
    info!(%clock, "(non-windows build) skipping guest clock adjustment");
    Ok(())
}
