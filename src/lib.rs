//! Screen capture acquisition for Linux desktops.
//!
//! One entry point, [`CaptureWaterfall`], walks a fixed ladder of capture
//! mechanisms (xdg-desktop-portal, desktop-specific D-Bus protocols, Wayland
//! CLI tools, direct X11 reads, legacy CLI tools) until one yields a bitmap.
//! Callers see decoded RGBA pixels or `None`; a user cancelling an
//! interactive capture ends the walk without error.

mod backend;
pub mod config;
pub mod cursor;
mod pixels;
pub mod session;
mod tool_runner;
pub mod types;
mod waterfall;
pub mod window;

pub use config::WaterfallConfig;
pub use session::{DesktopEnvironment, SessionContext};
pub use types::{Bitmap, CaptureError, CaptureKind, CaptureOptions, CursorInfo, Region};
pub use waterfall::CaptureWaterfall;
pub use window::{HyprlandWindowService, WindowHandle, WindowService};
