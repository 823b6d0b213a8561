//! Vitrine Core Surface
//!
//! Platform-agnostic core of the Vitrine kiosk display controller.
//!
//! This crate implements the decision logic the daemon runs on every host
//! notification:
//! - Display selection and target-geometry resolution (probed work area or a
//!   fixed override, scale always pinned to native pixels)
//! - The surface state machine: readiness, showing, drift detection and
//!   idempotent re-application of the target geometry
//! - Close suppression: the capability object that vetoes every
//!   termination-causing event for the lifetime of the process
//!
//! Nothing in here touches the OS. The live window sits behind the
//! [`SurfaceHost`] trait so the state machine can be driven against a
//! recording double in tests.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unique identifier for a physical display, assigned by the platform layer.
pub type DisplayId = u64;

/// Scale factor every surface is pinned to. Embedded panels render at native
/// pixel resolution; host auto-scaling heuristics vary across hardware
/// revisions and must never decide how large a pixel is.
pub const NATIVE_SCALE: f64 = 1.0;

/// Errors from display selection and geometry resolution.
#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("no display available: host reported zero screens")]
    NoDisplayAvailable,
}

/// A rectangle in screen coordinates (pixels).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    /// Create a new rectangle.
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }
}

/// Read-only snapshot of one physical display as reported by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayInfo {
    /// Platform-assigned display identifier.
    pub id: DisplayId,
    /// Full panel bounds.
    pub bounds: Rect,
    /// Usable area (panel minus OS-reserved regions such as taskbars).
    pub work_area: Rect,
    /// Scale factor the host would apply to content on this display.
    pub scale_factor: f64,
    /// Whether the host considers this the primary display.
    pub is_primary: bool,
    /// Stable device name (e.g. `\\.\DISPLAY1`).
    pub device_name: String,
}

/// Fixed geometry supplied by configuration for devices with known panel
/// dimensions. When present it wins over whatever the host reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeometryOverride {
    pub width: i32,
    pub height: i32,
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
}

/// The single source of truth for what a correct surface looks like.
///
/// Computed once per session (or per explicit re-probe) and immutable
/// thereafter; every correction pass converges the live surface back to it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetGeometry {
    pub bounds: Rect,
    pub fullscreen: bool,
    pub scale_factor: f64,
}

/// Pick the display the surface is bound to.
///
/// Deterministic across runs: the host-designated primary display, falling
/// back to the first enumerated one. Never the focused or last-used display.
pub fn select_display(displays: &[DisplayInfo]) -> Result<&DisplayInfo, GeometryError> {
    displays
        .iter()
        .find(|d| d.is_primary)
        .or_else(|| displays.first())
        .ok_or(GeometryError::NoDisplayAvailable)
}

/// Resolve the target geometry for a session.
///
/// A fixed override wins entirely; otherwise the target is the display's
/// usable area, 1:1. The scale factor is pinned to [`NATIVE_SCALE`] in both
/// branches, regardless of what the host reports, and `fullscreen` is always
/// asserted: an override pins bounds, it does not opt out of kiosk mode.
pub fn resolve_geometry(display: &DisplayInfo, fixed: Option<&GeometryOverride>) -> TargetGeometry {
    let bounds = match fixed {
        Some(f) => Rect::new(f.x, f.y, f.width, f.height),
        None => display.work_area,
    };
    TargetGeometry {
        bounds,
        fullscreen: true,
        scale_factor: NATIVE_SCALE,
    }
}

/// Error from a host call the controller treats as best-effort.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("host does not support {attribute}: {detail}")]
    Unsupported {
        attribute: &'static str,
        detail: String,
    },
    #[error("host call failed: {0}")]
    Failed(String),
}

/// The live on-screen window, as seen by the state machine.
///
/// The platform layer implements this for the real window; tests implement
/// it with a recorder. Every method is best-effort from the controller's
/// point of view: a host that cannot honor an attribute degrades that
/// attribute, it does not take the surface down.
pub trait SurfaceHost {
    fn set_bounds(&mut self, bounds: Rect) -> Result<(), HostError>;
    fn set_fullscreen(&mut self, fullscreen: bool) -> Result<(), HostError>;
    fn set_always_on_top(&mut self, on_top: bool) -> Result<(), HostError>;
    fn set_zoom(&mut self, factor: f64) -> Result<(), HostError>;
    fn show(&mut self) -> Result<(), HostError>;
    fn focus(&mut self) -> Result<(), HostError>;
}

/// Lifecycle phase of the surface.
///
/// There is deliberately no `Destroyed` variant: no transition inside the
/// controller ends the surface's life. Only forced external termination does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SurfacePhase {
    /// Window exists but has not reported it can paint.
    Created,
    /// Ready to paint; not yet visible.
    Ready,
    /// Visible and geometry-correct as far as the controller knows.
    Shown,
    /// Visible, but the host moved or resized it away from the target.
    Drifted,
}

impl SurfacePhase {
    /// Lowercase name for status reporting.
    pub fn as_str(&self) -> &'static str {
        match self {
            SurfacePhase::Created => "created",
            SurfacePhase::Ready => "ready",
            SurfacePhase::Shown => "shown",
            SurfacePhase::Drifted => "drifted",
        }
    }
}

/// Outcome of a geometry application pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Surface not ready yet; the intent is queued, never dropped.
    Queued,
    /// Everything already matches the target; no host call was made.
    Unchanged,
    /// The target was pushed to the host.
    Applied,
}

/// State of the delegated content load. Orthogonal to surface geometry:
/// a failed load leaves the surface shown with no content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentState {
    Idle,
    Loading,
    Ready,
    Failed,
}

impl ContentState {
    /// Lowercase name for status reporting.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentState::Idle => "idle",
            ContentState::Loading => "loading",
            ContentState::Ready => "ready",
            ContentState::Failed => "failed",
        }
    }
}

/// The external collaborator that actually renders content. The controller
/// hands it a location reference and hears back success or failure, nothing
/// more.
pub trait ContentSink {
    fn load(&mut self, source: &str) -> Result<(), ContentError>;
}

/// Error reported by the content collaborator. Never fatal to the surface.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("content collaborator failed: {0}")]
    Collaborator(String),
}

/// Owns the live surface and converges it onto an immutable target.
///
/// All mutation happens on the single control thread; the controller holds
/// the host exclusively, so no locking is involved.
#[derive(Debug)]
pub struct SurfaceController<H: SurfaceHost> {
    host: H,
    target: TargetGeometry,
    phase: SurfacePhase,
    /// Geometry intent that arrived before the surface was ready.
    pending_apply: bool,
    /// What we last pushed to the host, for idempotency.
    pushed: Option<TargetGeometry>,
    /// Bounds the host last reported, for drift detection.
    observed_bounds: Option<Rect>,
    /// Deviation we already corrected once and the host immediately
    /// reasserted. Pushing again would ping-pong with the host, so this
    /// deviation is not auto-corrected again until something changes.
    futile_correction: Option<Rect>,
    /// Attributes the host rejected on the last push.
    degraded: Vec<&'static str>,
    content: ContentState,
    corrections: u64,
}

impl<H: SurfaceHost> SurfaceController<H> {
    /// Take ownership of a freshly created (hidden) surface.
    pub fn new(host: H, target: TargetGeometry) -> Self {
        Self {
            host,
            target,
            phase: SurfacePhase::Created,
            pending_apply: false,
            pushed: None,
            observed_bounds: None,
            futile_correction: None,
            degraded: Vec::new(),
            content: ContentState::Idle,
            corrections: 0,
        }
    }

    pub fn phase(&self) -> SurfacePhase {
        self.phase
    }

    pub fn target(&self) -> &TargetGeometry {
        &self.target
    }

    pub fn content_state(&self) -> ContentState {
        self.content
    }

    /// Number of times the target has been pushed to the host.
    pub fn corrections(&self) -> u64 {
        self.corrections
    }

    /// Attributes the host rejected on the most recent push.
    pub fn degraded_attributes(&self) -> &[&'static str] {
        &self.degraded
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Apply the target geometry to the host.
    ///
    /// Idempotent: when the pushed state and the observed bounds already
    /// match the target, no host call is made, so repeated invocations cause
    /// no relayout. Before the surface is ready the intent is queued and
    /// flushed by [`mark_ready`](Self::mark_ready); a race between policy
    /// computation and surface readiness must never lose the intent.
    pub fn apply_geometry(&mut self) -> ApplyOutcome {
        if self.phase == SurfacePhase::Created {
            self.pending_apply = true;
            return ApplyOutcome::Queued;
        }
        if self.pushed == Some(self.target) && self.observed_matches_target() {
            return ApplyOutcome::Unchanged;
        }
        if self.phase == SurfacePhase::Drifted {
            self.futile_correction = self.observed_bounds;
        }
        self.push_to_host();
        if self.phase == SurfacePhase::Drifted {
            self.phase = SurfacePhase::Shown;
        }
        ApplyOutcome::Applied
    }

    /// The surface reported it can paint. Flushes any queued geometry
    /// intent; returns true if one was flushed.
    pub fn mark_ready(&mut self) -> bool {
        if self.phase != SurfacePhase::Created {
            return false;
        }
        self.phase = SurfacePhase::Ready;
        if self.pending_apply {
            self.pending_apply = false;
            self.apply_geometry();
            return true;
        }
        false
    }

    /// Show the surface, force focus and re-assert kiosk attributes.
    ///
    /// A no-op before readiness (showing an unready surface flashes an
    /// unpainted frame). Safe to repeat once shown.
    pub fn show(&mut self) -> bool {
        if self.phase == SurfacePhase::Created {
            return false;
        }
        let _ = self.host.show();
        let _ = self.host.focus();
        let _ = self.host.set_fullscreen(self.target.fullscreen);
        let _ = self.host.set_always_on_top(true);
        if self.phase == SurfacePhase::Ready {
            self.phase = SurfacePhase::Shown;
        }
        true
    }

    /// Feed a host geometry notification into drift detection.
    ///
    /// Returns true when the surface has drifted and needs a correction
    /// pass.
    pub fn observe_geometry(&mut self, bounds: Rect) -> bool {
        self.observed_bounds = Some(bounds);
        match self.phase {
            SurfacePhase::Shown | SurfacePhase::Drifted => {
                if bounds == self.target.bounds {
                    // Host settled back on its own.
                    self.phase = SurfacePhase::Shown;
                    self.futile_correction = None;
                    false
                } else if self.futile_correction == Some(bounds) {
                    // The host reasserted a deviation we already corrected
                    // once. Pushing again would loop; hold until the
                    // observation changes or an explicit apply forces it.
                    self.phase = SurfacePhase::Drifted;
                    false
                } else {
                    self.phase = SurfacePhase::Drifted;
                    true
                }
            }
            _ => false,
        }
    }

    /// Whether the live surface deviates from the target.
    pub fn needs_correction(&self) -> bool {
        self.phase == SurfacePhase::Drifted
            || (self.phase == SurfacePhase::Shown
                && (self.pushed != Some(self.target) || !self.observed_matches_target()))
    }

    /// Replace the target after an explicit re-probe. The new target is
    /// applied (or queued) immediately.
    pub fn retarget(&mut self, target: TargetGeometry) -> ApplyOutcome {
        self.target = target;
        self.pushed = None;
        self.futile_correction = None;
        self.apply_geometry()
    }

    /// Delegate content loading to the collaborator.
    ///
    /// Failure is reported to the caller and recorded, but the surface's
    /// geometry and visibility are unaffected: a kiosk showing nothing beats
    /// a kiosk showing the desktop.
    pub fn load_content<C: ContentSink>(
        &mut self,
        sink: &mut C,
        source: &str,
    ) -> Result<(), ContentError> {
        self.content = ContentState::Loading;
        match sink.load(source) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.content = ContentState::Failed;
                Err(e)
            }
        }
    }

    /// The content collaborator reported its load finished.
    pub fn content_ready(&mut self) {
        self.content = ContentState::Ready;
    }

    fn observed_matches_target(&self) -> bool {
        self.observed_bounds.map_or(true, |o| o == self.target.bounds)
    }

    fn push_to_host(&mut self) {
        let t = self.target;
        let mut degraded = Vec::new();
        if self.host.set_bounds(t.bounds).is_err() {
            degraded.push("bounds");
        }
        if self.host.set_fullscreen(t.fullscreen).is_err() {
            degraded.push("fullscreen");
        }
        if self.host.set_always_on_top(true).is_err() {
            degraded.push("always-on-top");
        }
        if self.host.set_zoom(t.scale_factor).is_err() {
            degraded.push("zoom");
        }
        self.degraded = degraded;
        self.pushed = Some(t);
        self.corrections += 1;
    }
}

/// Termination-causing events the gate intercepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationEvent {
    /// The surface received a close request.
    CloseRequested,
    /// The host reported the last surface gone.
    AllSurfacesClosed,
}

/// The gate's answer. There is deliberately no pass-through variant: for the
/// operating lifetime of the kiosk, every termination event is suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "the handler must actually prevent the default action"]
pub enum Veto {
    Suppress,
}

/// Process-wide close suppression, constructed once at startup.
///
/// Modeled as an immutable capability: any code holding a reference can ask
/// it to intercept an event and read the suppression count, but there is no
/// API to disable it. The only exits from the process are a forced external
/// termination signal and the operator tooling outside this crate.
#[derive(Debug, Default)]
pub struct CloseGuard {
    suppressed: std::sync::atomic::AtomicU64,
}

impl CloseGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intercept a termination event. Always vetoes.
    pub fn intercept(&self, _event: TerminationEvent) -> Veto {
        self.suppressed
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Veto::Suppress
    }

    /// How many termination events have been suppressed so far.
    pub fn suppressed(&self) -> u64 {
        self.suppressed.load(std::sync::atomic::Ordering::Relaxed)
    }
}
