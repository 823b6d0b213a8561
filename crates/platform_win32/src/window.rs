//! The kiosk window: the single on-screen surface the controller owns.
//!
//! # Architecture
//!
//! The window lives on a dedicated background thread with its own message
//! loop, so host messages are pumped even while the control loop is busy.
//! Placement calls (`SetWindowPos`, `ShowWindow`) are issued from the control
//! thread; Win32 routes them through the owning thread's queue.
//!
//! # Kiosk behavior
//!
//! - `WS_POPUP` without any frame styles: no chrome, no resize affordances
//! - `WS_EX_TOPMOST`: nothing covers the surface
//! - `WM_CLOSE` and the close/move/size/minimize system commands are
//!   swallowed in the window procedure; a close request is forwarded to the
//!   control loop as an event instead of reaching `DefWindowProcW`
//! - DWM transition animations are force-disabled so repeated repositioning
//!   never flickers
//! - The window is created hidden and only shown once the control loop has
//!   applied the target geometry

use std::ffi::c_void;
use std::sync::mpsc;

use vitrine_core_surface::{HostError, Rect, SurfaceHost};
use windows::Win32::Foundation::{COLORREF, HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::Graphics::Dwm::{DwmSetWindowAttribute, DWMWA_TRANSITIONS_FORCEDISABLED};
use windows::Win32::Graphics::Gdi::{
    BeginPaint, CreateSolidBrush, EndPaint, FillRect, PAINTSTRUCT,
};
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DispatchMessageW, GetMessageW, GetWindowRect, PostMessageW,
    RegisterClassW, SetForegroundWindow, SetWindowPos, ShowWindow, HWND_TOPMOST, MSG, SC_CLOSE,
    SC_MAXIMIZE, SC_MINIMIZE, SC_MOVE, SC_SIZE, SWP_FRAMECHANGED, SWP_NOACTIVATE, SWP_NOMOVE,
    SWP_NOSIZE, SW_SHOW, WM_CLOSE, WM_DESTROY, WM_DISPLAYCHANGE, WM_PAINT, WM_SYSCOMMAND,
    WM_USER, WM_WINDOWPOSCHANGED, WNDCLASSW, WS_EX_TOPMOST, WS_POPUP,
};

use crate::{forward_event, install_event_sender, rect_from_win32, PlatformError, SurfaceEvent};

/// Custom message to quit the window thread on daemon shutdown.
const WM_QUIT_SURFACE: u32 = WM_USER + 41;

/// Background fill while no content covers the surface. Black, so a content
/// gap reads as a dark panel rather than leaked desktop.
const SURFACE_BACKGROUND: u32 = 0x0000_0000;

/// The live kiosk surface.
///
/// Created hidden; the control loop shows it once geometry is applied and
/// the window has reported [`SurfaceEvent::ReadyToShow`]. Nothing in this
/// type destroys the window; it outlives every close request and is only
/// torn down when the process itself exits.
pub struct KioskWindow {
    /// HWND stored as isize so the handle moves freely between threads.
    hwnd_raw: isize,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl KioskWindow {
    /// Create the hidden kiosk window at the given initial bounds.
    ///
    /// Host notifications are forwarded over `events`; a
    /// [`SurfaceEvent::ReadyToShow`] is emitted once the window can paint.
    pub fn create(
        initial: Rect,
        events: mpsc::Sender<SurfaceEvent>,
    ) -> Result<Self, PlatformError> {
        install_event_sender(events);

        let (init_tx, init_rx) = mpsc::channel::<Result<isize, PlatformError>>();

        let thread = std::thread::Builder::new()
            .name("kiosk-window".to_string())
            .spawn(move || unsafe {
                let class_name: Vec<u16> = "VitrineSurfaceClass\0".encode_utf16().collect();
                let wc = WNDCLASSW {
                    lpfnWndProc: Some(surface_window_proc),
                    lpszClassName: windows::core::PCWSTR(class_name.as_ptr()),
                    hbrBackground: CreateSolidBrush(COLORREF(SURFACE_BACKGROUND)),
                    ..Default::default()
                };
                RegisterClassW(&wc);

                let hwnd = CreateWindowExW(
                    WS_EX_TOPMOST,
                    windows::core::PCWSTR(class_name.as_ptr()),
                    None,
                    WS_POPUP,
                    initial.x,
                    initial.y,
                    initial.width,
                    initial.height,
                    None,
                    None,
                    None,
                    None,
                );

                let hwnd = match hwnd {
                    Ok(h) => h,
                    Err(e) => {
                        let _ = init_tx.send(Err(PlatformError::WindowCreateFailed(e.to_string())));
                        return;
                    }
                };

                // No DWM open/move animations: repositioning must be
                // invisible when the geometry is already correct.
                let disable = windows::Win32::Foundation::BOOL(1);
                if let Err(e) = DwmSetWindowAttribute(
                    hwnd,
                    DWMWA_TRANSITIONS_FORCEDISABLED,
                    &disable as *const _ as *const c_void,
                    std::mem::size_of_val(&disable) as u32,
                ) {
                    tracing::debug!("DWM transition disable unavailable: {}", e);
                }

                let _ = init_tx.send(Ok(hwnd.0 as isize));

                // The window can paint from here on.
                forward_event(SurfaceEvent::ReadyToShow);

                let mut msg = MSG::default();
                loop {
                    let result = GetMessageW(&mut msg, None, 0, 0);
                    if !result.as_bool() {
                        break;
                    }
                    if msg.message == WM_QUIT_SURFACE {
                        break;
                    }
                    let _ = DispatchMessageW(&msg);
                }
            })
            .map_err(|e| PlatformError::WindowCreateFailed(e.to_string()))?;

        let hwnd_raw = init_rx
            .recv()
            .map_err(|_| PlatformError::WindowCreateFailed("window thread died".to_string()))??;

        tracing::debug!("Kiosk window created (hidden) at {:?}", initial);

        Ok(Self {
            hwnd_raw,
            thread: Some(thread),
        })
    }

    fn hwnd(&self) -> HWND {
        HWND(self.hwnd_raw as *mut c_void)
    }

    /// Raw window handle for collaborators that embed into the surface.
    pub fn raw_handle(&self) -> isize {
        self.hwnd_raw
    }

    /// Bounds the host currently reports for the surface.
    pub fn current_bounds(&self) -> Option<Rect> {
        let mut rect = windows::Win32::Foundation::RECT::default();
        unsafe { GetWindowRect(self.hwnd(), &mut rect) }
            .ok()
            .map(|()| rect_from_win32(&rect))
    }
}

impl SurfaceHost for KioskWindow {
    fn set_bounds(&mut self, bounds: Rect) -> Result<(), HostError> {
        unsafe {
            SetWindowPos(
                self.hwnd(),
                Some(HWND_TOPMOST),
                bounds.x,
                bounds.y,
                bounds.width,
                bounds.height,
                SWP_NOACTIVATE | SWP_FRAMECHANGED,
            )
        }
        .map_err(|e| HostError::Failed(e.to_string()))
    }

    fn set_fullscreen(&mut self, fullscreen: bool) -> Result<(), HostError> {
        // The popup has no frame to drop; fullscreen re-asserts z-order and
        // forces the frame state to be re-evaluated.
        if !fullscreen {
            return Ok(());
        }
        unsafe {
            SetWindowPos(
                self.hwnd(),
                Some(HWND_TOPMOST),
                0,
                0,
                0,
                0,
                SWP_NOMOVE | SWP_NOSIZE | SWP_NOACTIVATE | SWP_FRAMECHANGED,
            )
        }
        .map_err(|e| HostError::Failed(e.to_string()))
    }

    fn set_always_on_top(&mut self, on_top: bool) -> Result<(), HostError> {
        if !on_top {
            return Ok(());
        }
        unsafe {
            SetWindowPos(
                self.hwnd(),
                Some(HWND_TOPMOST),
                0,
                0,
                0,
                0,
                SWP_NOMOVE | SWP_NOSIZE | SWP_NOACTIVATE,
            )
        }
        .map_err(|e| HostError::Failed(e.to_string()))
    }

    fn set_zoom(&mut self, factor: f64) -> Result<(), HostError> {
        // Scale is normalized process-wide through DPI awareness; there is
        // no per-window zoom to push. Recorded for the attribute contract.
        tracing::debug!("Zoom pinned at {} via process DPI awareness", factor);
        Ok(())
    }

    fn show(&mut self) -> Result<(), HostError> {
        unsafe {
            let _ = ShowWindow(self.hwnd(), SW_SHOW);
        }
        Ok(())
    }

    fn focus(&mut self) -> Result<(), HostError> {
        let ok = unsafe { SetForegroundWindow(self.hwnd()) };
        if ok.as_bool() {
            Ok(())
        } else {
            // Foreground lock can deny this; the surface is topmost anyway.
            Err(HostError::Unsupported {
                attribute: "focus",
                detail: "SetForegroundWindow denied".to_string(),
            })
        }
    }
}

impl Drop for KioskWindow {
    fn drop(&mut self) {
        unsafe {
            let _ = PostMessageW(Some(self.hwnd()), WM_QUIT_SURFACE, WPARAM(0), LPARAM(0));
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        tracing::debug!("Kiosk window thread stopped");
    }
}

/// Window procedure for the kiosk surface.
///
/// Wrapped with catch_unwind so a panic never unwinds across the FFI
/// boundary.
unsafe extern "system" fn surface_window_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        surface_window_proc_inner(hwnd, msg, wparam, lparam)
    }));

    match result {
        Ok(lresult) => lresult,
        Err(e) => {
            tracing::error!("Panic in surface_window_proc: {:?}", e);
            DefWindowProcW(hwnd, msg, wparam, lparam)
        }
    }
}

fn surface_window_proc_inner(hwnd: HWND, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    match msg {
        WM_CLOSE => {
            // Never reaches DefWindowProcW, so the window survives. The
            // control loop decides what to log about the attempt.
            forward_event(SurfaceEvent::CloseRequested);
            LRESULT(0)
        }
        WM_SYSCOMMAND => {
            // System-menu commands are the other path to move, resize,
            // minimize or close a window. All of them are swallowed.
            let command = (wparam.0 & 0xFFF0) as u32;
            if command == SC_CLOSE {
                forward_event(SurfaceEvent::CloseRequested);
                return LRESULT(0);
            }
            if command == SC_MINIMIZE
                || command == SC_MAXIMIZE
                || command == SC_MOVE
                || command == SC_SIZE
            {
                return LRESULT(0);
            }
            unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) }
        }
        WM_WINDOWPOSCHANGED => {
            let mut rect = windows::Win32::Foundation::RECT::default();
            if unsafe { GetWindowRect(hwnd, &mut rect) }.is_ok() {
                forward_event(SurfaceEvent::GeometryChanged(rect_from_win32(&rect)));
            }
            unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) }
        }
        WM_DISPLAYCHANGE => {
            forward_event(SurfaceEvent::DisplayMetricsChanged);
            unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) }
        }
        WM_DESTROY => {
            // Only reachable from outside the controller; the control loop
            // treats it as a suppressible termination event.
            forward_event(SurfaceEvent::AllSurfacesClosed);
            LRESULT(0)
        }
        WM_PAINT => {
            let mut ps = PAINTSTRUCT::default();
            let hdc = unsafe { BeginPaint(hwnd, &mut ps) };
            let brush = unsafe { CreateSolidBrush(COLORREF(SURFACE_BACKGROUND)) };
            let _ = unsafe { FillRect(hdc, &ps.rcPaint, brush) };
            let _ = unsafe { EndPaint(hwnd, &ps) };
            LRESULT(0)
        }
        _ => unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) },
    }
}
