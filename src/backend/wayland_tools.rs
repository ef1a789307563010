//! Wayland CLI capture tools: grimblast, hyprshot, grim, slurp.
//!
//! Compositor-agnostic fallback for Wayland sessions where neither the portal
//! nor a desktop-specific protocol produced an image. Hyprland gets its
//! native wrappers first; everything else goes straight to grim, with slurp
//! supplying interactive geometry.

use async_trait::async_trait;
use log::{debug, warn};

use crate::backend::{CaptureBackend, Outcome};
use crate::config::WaterfallConfig;
use crate::session::{DesktopEnvironment, SessionContext};
use crate::tool_runner::{
    TempArtifact, run_capture_tool, run_process, run_process_capture_stdout, unique_temp_path,
};
use crate::types::{Bitmap, CaptureError, CaptureKind, CaptureOptions, Region};

pub(crate) struct WaylandToolsBackend {
    config: WaterfallConfig,
}

impl WaylandToolsBackend {
    pub(crate) fn new(config: WaterfallConfig) -> Self {
        Self { config }
    }

    /// Runs slurp and parses its geometry output. A nonzero exit means the
    /// user dismissed the selection overlay.
    pub(crate) async fn select_region_slurp(&self) -> Result<Region, CaptureError> {
        let output = run_process_capture_stdout(
            "slurp",
            &["-f", "%x %y %w %h"],
            self.config.interactive_tool_timeout(),
        )
        .await
        .map_err(|e| match e {
            CaptureError::Tool(_) => {
                CaptureError::Cancelled("region selection dismissed".into())
            }
            other => other,
        })?;
        parse_slurp_geometry(&output)
    }

    async fn capture(
        &self,
        kind: CaptureKind,
        options: &CaptureOptions,
        ctx: &SessionContext,
    ) -> Result<Bitmap, CaptureError> {
        let mut last_failure: Option<CaptureError> = None;

        for attempt in tool_plan(kind, ctx.desktop) {
            let result = self.run_attempt(attempt, kind, options).await;
            match result {
                Ok(bitmap) => return Ok(bitmap),
                Err(CaptureError::Cancelled(reason)) => {
                    return Err(CaptureError::Cancelled(reason));
                }
                Err(CaptureError::Unavailable(reason)) => {
                    debug!("Wayland tool skipped: {reason}");
                }
                Err(e) => {
                    warn!("Wayland tool failed: {e}");
                    last_failure = Some(e);
                }
            }
        }

        Err(last_failure.unwrap_or_else(|| {
            CaptureError::Unavailable("no Wayland capture tool is installed".into())
        }))
    }

    async fn run_attempt(
        &self,
        tool: WaylandTool,
        kind: CaptureKind,
        options: &CaptureOptions,
    ) -> Result<Bitmap, CaptureError> {
        let timeout = if presents_picker(tool, kind) {
            self.config.interactive_tool_timeout()
        } else {
            self.config.tool_timeout()
        };

        match tool {
            WaylandTool::Grimblast => {
                let mode = match kind {
                    CaptureKind::FullScreen => "screen",
                    CaptureKind::Region => "area",
                    CaptureKind::ActiveWindow => "active",
                };
                let mut args = vec!["save", mode];
                if options.show_cursor && kind != CaptureKind::Region {
                    args.insert(0, "--cursor");
                }
                let result = run_capture_tool("grimblast", &args, timeout).await;
                // grimblast drives slurp itself for area captures and exits
                // nonzero when the overlay is dismissed.
                if kind == CaptureKind::Region {
                    if let Err(CaptureError::Tool(_)) = result {
                        return Err(CaptureError::Cancelled(
                            "grimblast selection dismissed".into(),
                        ));
                    }
                }
                result
            }
            WaylandTool::Hyprshot => self.run_hyprshot(kind, timeout).await,
            WaylandTool::Grim => match kind {
                CaptureKind::FullScreen => {
                    let mut args = Vec::new();
                    if options.show_cursor {
                        args.push("-c");
                    }
                    run_capture_tool("grim", &args, timeout).await
                }
                CaptureKind::Region => {
                    let region = self.select_region_slurp().await?;
                    self.capture_rect_grim(region, options).await
                }
                CaptureKind::ActiveWindow => Err(CaptureError::Unavailable(
                    "grim has no active-window mode".into(),
                )),
            },
        }
    }

    /// hyprshot picks its own file name inside the directory we give it, so
    /// it cannot share the common run_capture_tool path.
    async fn run_hyprshot(
        &self,
        kind: CaptureKind,
        timeout: std::time::Duration,
    ) -> Result<Bitmap, CaptureError> {
        let mode = match kind {
            CaptureKind::FullScreen => "output",
            CaptureKind::Region => "region",
            CaptureKind::ActiveWindow => "window",
        };
        let artifact = TempArtifact::new(unique_temp_path("hyprshot", "png"));
        let dir = artifact
            .path()
            .parent()
            .unwrap_or_else(|| std::path::Path::new("/tmp"))
            .to_string_lossy()
            .into_owned();
        let file = artifact
            .path()
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();

        let status = run_process(
            "hyprshot",
            &["-m", mode, "-s", "-o", dir.as_str(), "-f", file.as_str()],
            timeout,
        )
        .await?;
        if !status.success() {
            // hyprshot exits nonzero when its region or window picker is
            // dismissed.
            if presents_picker(WaylandTool::Hyprshot, kind) {
                return Err(CaptureError::Cancelled("hyprshot selection dismissed".into()));
            }
            return Err(CaptureError::Tool(format!("hyprshot exited with {status}")));
        }
        if !artifact.path().exists() {
            return Err(CaptureError::Tool(
                "hyprshot exited cleanly but wrote no output file".into(),
            ));
        }
        let path = artifact.path().to_path_buf();
        tokio::task::spawn_blocking(move || crate::pixels::decode_image_file(&path))
            .await
            .map_err(|e| CaptureError::Tool(format!("hyprshot decode task failed: {e}")))?
    }

    /// Captures an explicit rectangle with grim's geometry argument.
    async fn capture_rect_grim(
        &self,
        region: Region,
        options: &CaptureOptions,
    ) -> Result<Bitmap, CaptureError> {
        if !region.is_valid() {
            return Err(CaptureError::InvalidResponse(format!(
                "degenerate capture rectangle {}x{}",
                region.width, region.height
            )));
        }
        let geometry = format!(
            "{},{} {}x{}",
            region.x, region.y, region.width, region.height
        );
        let mut args = vec!["-g", geometry.as_str()];
        if options.show_cursor {
            args.insert(0, "-c");
        }
        run_capture_tool("grim", &args, self.config.tool_timeout()).await
    }
}

#[async_trait]
impl CaptureBackend for WaylandToolsBackend {
    fn name(&self) -> &'static str {
        "wayland-cli-tools"
    }

    fn supports(
        &self,
        _kind: CaptureKind,
        _options: &CaptureOptions,
        ctx: &SessionContext,
    ) -> bool {
        ctx.is_wayland
    }

    async fn try_capture(
        &self,
        kind: CaptureKind,
        options: &CaptureOptions,
        ctx: &SessionContext,
    ) -> Outcome {
        Outcome::from_result(self.capture(kind, options, ctx).await)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaylandTool {
    Grimblast,
    Hyprshot,
    Grim,
}

/// Whether an invocation presents its own picker and therefore gets the
/// interactive timeout tier. hyprshot's window mode is click-to-select;
/// grimblast and grim capture the active window or output without user
/// input.
fn presents_picker(tool: WaylandTool, kind: CaptureKind) -> bool {
    match tool {
        WaylandTool::Hyprshot => kind != CaptureKind::FullScreen,
        WaylandTool::Grimblast | WaylandTool::Grim => kind == CaptureKind::Region,
    }
}

/// Hyprland's wrappers understand its window geometry, so they come first on
/// that desktop. Everywhere else grim is the only candidate.
fn tool_plan(kind: CaptureKind, desktop: DesktopEnvironment) -> Vec<WaylandTool> {
    let mut plan = Vec::new();
    if desktop == DesktopEnvironment::Hyprland {
        plan.push(WaylandTool::Grimblast);
        plan.push(WaylandTool::Hyprshot);
    }
    // grim alone cannot target a window.
    if kind != CaptureKind::ActiveWindow || desktop == DesktopEnvironment::Hyprland {
        plan.push(WaylandTool::Grim);
    }
    plan
}

/// Parses slurp's "%x %y %w %h" output format.
fn parse_slurp_geometry(output: &str) -> Result<Region, CaptureError> {
    let parts: Vec<&str> = output.split_whitespace().collect();
    if parts.len() != 4 {
        return Err(CaptureError::InvalidResponse(format!(
            "unexpected slurp output '{output}'"
        )));
    }
    let parse = |s: &str| {
        s.parse::<i32>().map_err(|_| {
            CaptureError::InvalidResponse(format!("non-numeric slurp field '{s}'"))
        })
    };
    let region = Region {
        x: parse(parts[0])?,
        y: parse(parts[1])?,
        width: parse(parts[2])?,
        height: parse(parts[3])?,
    };
    if !region.is_valid() {
        return Err(CaptureError::InvalidResponse(format!(
            "degenerate slurp selection '{output}'"
        )));
    }
    Ok(region)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slurp_geometry_parses() {
        let region = parse_slurp_geometry("10 20 300 400").unwrap();
        assert_eq!(region, Region { x: 10, y: 20, width: 300, height: 400 });
    }

    #[test]
    fn slurp_geometry_rejects_garbage() {
        assert!(parse_slurp_geometry("").is_err());
        assert!(parse_slurp_geometry("10 20 300").is_err());
        assert!(parse_slurp_geometry("a b c d").is_err());
    }

    #[test]
    fn slurp_geometry_rejects_zero_size() {
        assert!(parse_slurp_geometry("10 20 0 400").is_err());
    }

    #[test]
    fn picker_invocations_get_the_interactive_tier() {
        assert!(presents_picker(WaylandTool::Hyprshot, CaptureKind::ActiveWindow));
        assert!(presents_picker(WaylandTool::Hyprshot, CaptureKind::Region));
        assert!(!presents_picker(WaylandTool::Hyprshot, CaptureKind::FullScreen));
        assert!(presents_picker(WaylandTool::Grimblast, CaptureKind::Region));
        assert!(!presents_picker(WaylandTool::Grimblast, CaptureKind::ActiveWindow));
        assert!(presents_picker(WaylandTool::Grim, CaptureKind::Region));
        assert!(!presents_picker(WaylandTool::Grim, CaptureKind::FullScreen));
    }

    #[tokio::test]
    async fn dismissed_grimblast_selection_ends_the_walk() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("hyprshot_ran");
        let write_stub = |name: &str, body: String| {
            let path = dir.path().join(name);
            std::fs::write(&path, body).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        };
        write_stub("grimblast", "#!/bin/sh\nexit 1\n".to_string());
        write_stub(
            "hyprshot",
            format!("#!/bin/sh\ntouch {}\nexit 0\n", marker.display()),
        );

        let old_path = std::env::var("PATH").unwrap_or_default();
        unsafe {
            std::env::set_var("PATH", format!("{}:{old_path}", dir.path().display()));
        }

        let backend = WaylandToolsBackend::new(WaterfallConfig::default());
        let ctx = SessionContext {
            is_wayland: true,
            desktop: DesktopEnvironment::Hyprland,
            is_sandboxed: false,
        };
        let outcome = backend
            .try_capture(CaptureKind::Region, &CaptureOptions::default(), &ctx)
            .await;

        unsafe {
            std::env::set_var("PATH", old_path);
        }

        assert!(matches!(outcome, Outcome::Cancelled));
        assert!(
            !marker.exists(),
            "a later tool ran after the user dismissed the selection"
        );
    }

    #[test]
    fn hyprland_prefers_native_wrappers() {
        let plan = tool_plan(CaptureKind::Region, DesktopEnvironment::Hyprland);
        assert_eq!(
            plan,
            vec![WaylandTool::Grimblast, WaylandTool::Hyprshot, WaylandTool::Grim]
        );
    }

    #[test]
    fn other_desktops_use_grim_only() {
        let plan = tool_plan(CaptureKind::FullScreen, DesktopEnvironment::Sway);
        assert_eq!(plan, vec![WaylandTool::Grim]);
    }

    #[test]
    fn grim_is_skipped_for_windows_outside_hyprland() {
        let plan = tool_plan(CaptureKind::ActiveWindow, DesktopEnvironment::Sway);
        assert!(plan.is_empty());
    }
}
