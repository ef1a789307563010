//! Capture backends: one polymorphic capability behind the waterfall.
//!
//! Each backend wraps a mutually incompatible capture mechanism (portal
//! D-Bus, desktop-specific D-Bus, Wayland CLI tools, X11, legacy CLI tools)
//! and reports a uniform [`Outcome`]. No backend lets an error escape: every
//! internal failure is downgraded so the orchestrator can keep walking the
//! stage list.

pub(crate) mod cli_tools;
pub(crate) mod gnome_shell;
pub(crate) mod kwin;
pub(crate) mod portal;
pub(crate) mod wayland_tools;
pub(crate) mod x11;

use async_trait::async_trait;

use crate::session::SessionContext;
use crate::types::{Bitmap, CaptureError, CaptureKind, CaptureOptions};

/// Result of one backend attempt.
#[derive(Debug)]
pub(crate) enum Outcome {
    /// A complete decoded bitmap.
    Captured(Bitmap),
    /// The user dismissed an interactive capture UI. Terminal for the whole
    /// waterfall; later stages must not run.
    Cancelled,
    /// A prerequisite is absent (tool not installed, service not registered,
    /// display not openable). The waterfall advances silently.
    Unavailable(String),
    /// The backend ran but produced an error, timeout, or malformed
    /// response. The waterfall advances and logs diagnostics.
    Failed(String),
}

impl Outcome {
    /// Downgrades a backend error into a non-terminal outcome, preserving
    /// the cancellation signal.
    pub(crate) fn from_error(error: CaptureError) -> Self {
        match error {
            CaptureError::Cancelled(reason) => {
                log::info!("Capture cancelled: {reason}");
                Outcome::Cancelled
            }
            CaptureError::Unavailable(reason) => Outcome::Unavailable(reason),
            other => Outcome::Failed(other.to_string()),
        }
    }

    pub(crate) fn from_result(result: Result<Bitmap, CaptureError>) -> Self {
        match result {
            Ok(bitmap) => Outcome::Captured(bitmap),
            Err(error) => Outcome::from_error(error),
        }
    }
}

/// One stage of the acquisition waterfall.
#[async_trait]
pub(crate) trait CaptureBackend: Send + Sync {
    /// Short name used in log messages.
    fn name(&self) -> &'static str;

    /// Whether this backend can serve `kind` in the given session. A `false`
    /// here is an automatic skip, not a failure.
    fn supports(&self, kind: CaptureKind, options: &CaptureOptions, ctx: &SessionContext) -> bool;

    /// Attempts the capture. Must never panic or propagate an error.
    async fn try_capture(
        &self,
        kind: CaptureKind,
        options: &CaptureOptions,
        ctx: &SessionContext,
    ) -> Outcome;
}
