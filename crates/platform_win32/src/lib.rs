//! Vitrine Platform Win32
//!
//! Windows-specific host integration for the Vitrine kiosk controller.
//!
//! This crate handles:
//! - Display enumeration via `EnumDisplayMonitors` / `GetMonitorInfoW`
//! - Process-wide DPI normalization (the host must never rescale the surface
//!   behind the controller's back)
//! - The kiosk window itself ([`window::KioskWindow`]): a borderless,
//!   topmost popup on a dedicated message-loop thread that swallows close
//!   requests and forwards host notifications to the control loop

pub mod window;

pub use window::KioskWindow;

use std::sync::mpsc;
use std::sync::Mutex;

use thiserror::Error;
use vitrine_core_surface::{DisplayInfo, Rect};
use windows::Win32::Foundation::{BOOL, LPARAM, RECT};
use windows::Win32::Graphics::Gdi::{
    EnumDisplayMonitors, GetMonitorInfoW, HDC, HMONITOR, MONITORINFO, MONITORINFOEXW,
};
use windows::Win32::UI::HiDpi::{
    GetDpiForMonitor, SetProcessDpiAwarenessContext, DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2,
    MDT_EFFECTIVE_DPI,
};

/// Baseline DPI at which the host applies no scaling.
const BASE_DPI: f64 = 96.0;

/// Primary-monitor flag in `MONITORINFO::dwFlags`.
const MONITORINFOF_PRIMARY: u32 = 1;

/// Errors from Win32 host operations.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("failed to enumerate displays: {0}")]
    EnumerationFailed(String),

    #[error("failed to create kiosk window: {0}")]
    WindowCreateFailed(String),
}

/// Notifications the host window forwards to the control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// The window exists and can paint; safe to show without a blank flash.
    ReadyToShow,
    /// Something asked the window to close.
    CloseRequested,
    /// The window was destroyed from outside the controller.
    AllSurfacesClosed,
    /// The window's on-screen bounds changed (our own moves included).
    GeometryChanged(Rect),
    /// The display configuration or its metrics changed.
    DisplayMetricsChanged,
}

/// Channel the window procedure forwards events through.
///
/// Exactly one surface exists per process, so a process-wide slot mirrors the
/// window's own lifetime. Installed by [`window::KioskWindow::create`].
static SURFACE_EVENTS: Mutex<Option<mpsc::Sender<SurfaceEvent>>> = Mutex::new(None);

pub(crate) fn install_event_sender(sender: mpsc::Sender<SurfaceEvent>) {
    let mut slot = match SURFACE_EVENTS.lock() {
        Ok(slot) => slot,
        Err(poisoned) => poisoned.into_inner(),
    };
    if slot.is_some() {
        tracing::warn!("Replacing surface event sender; superseding a previous surface");
    }
    *slot = Some(sender);
}

pub(crate) fn forward_event(event: SurfaceEvent) {
    let slot = match SURFACE_EVENTS.lock() {
        Ok(slot) => slot,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(sender) = slot.as_ref() {
        if sender.send(event).is_err() {
            tracing::debug!("Surface event dropped; control loop has gone away");
        }
    }
}

/// Opt this process out of DWM scaling before any window or GDI call.
///
/// Returns false when the context was already set (e.g. by a manifest), which
/// is harmless.
pub fn set_dpi_awareness() -> bool {
    unsafe { SetProcessDpiAwarenessContext(DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2).is_ok() }
}

/// Enumerate all attached displays with their usable work areas.
///
/// Returns displays in host enumeration order; the primary flag comes from
/// `MONITORINFO`. An empty result is reported as-is; the caller decides
/// whether a headless host is fatal.
pub fn enumerate_displays() -> Result<Vec<DisplayInfo>, PlatformError> {
    let mut displays: Vec<DisplayInfo> = Vec::new();

    let ok = unsafe {
        EnumDisplayMonitors(
            None,
            None,
            Some(monitor_enum_proc),
            LPARAM(&mut displays as *mut Vec<DisplayInfo> as isize),
        )
    };

    if !ok.as_bool() {
        return Err(PlatformError::EnumerationFailed(
            "EnumDisplayMonitors returned FALSE".to_string(),
        ));
    }

    tracing::debug!("Enumerated {} display(s)", displays.len());
    Ok(displays)
}

unsafe extern "system" fn monitor_enum_proc(
    hmonitor: HMONITOR,
    _hdc: HDC,
    _clip: *mut RECT,
    lparam: LPARAM,
) -> BOOL {
    let displays = &mut *(lparam.0 as *mut Vec<DisplayInfo>);

    let mut info = MONITORINFOEXW::default();
    info.monitorInfo.cbSize = std::mem::size_of::<MONITORINFOEXW>() as u32;

    if GetMonitorInfoW(hmonitor, &mut info.monitorInfo as *mut MONITORINFO).as_bool() {
        let mi = &info.monitorInfo;
        displays.push(DisplayInfo {
            id: hmonitor.0 as usize as u64,
            bounds: rect_from_win32(&mi.rcMonitor),
            work_area: rect_from_win32(&mi.rcWork),
            scale_factor: monitor_scale_factor(hmonitor),
            is_primary: mi.dwFlags & MONITORINFOF_PRIMARY != 0,
            device_name: wide_to_string(&info.szDevice),
        });
    }

    BOOL(1) // keep enumerating
}

/// Effective scale factor the host would apply on this monitor.
fn monitor_scale_factor(hmonitor: HMONITOR) -> f64 {
    let mut dpi_x: u32 = 0;
    let mut dpi_y: u32 = 0;
    match unsafe { GetDpiForMonitor(hmonitor, MDT_EFFECTIVE_DPI, &mut dpi_x, &mut dpi_y) } {
        Ok(()) if dpi_x > 0 => dpi_x as f64 / BASE_DPI,
        _ => 1.0,
    }
}

pub(crate) fn rect_from_win32(rect: &RECT) -> Rect {
    Rect::new(
        rect.left,
        rect.top,
        rect.right - rect.left,
        rect.bottom - rect.top,
    )
}

/// Convert a fixed-size UTF-16 device-name buffer to a `String`.
fn wide_to_string(buffer: &[u16]) -> String {
    let len = buffer.iter().position(|&c| c == 0).unwrap_or(buffer.len());
    String::from_utf16_lossy(&buffer[..len])
}
