//! Legacy X11 screenshot CLI tools.
//!
//! Last resort on X11 sessions: the desktop's own screenshot utility first,
//! then the generic veterans (scrot, ImageMagick import). Also the only X11
//! path that offers interactive region selection.

use std::collections::HashSet;

use async_trait::async_trait;
use log::{debug, warn};

use crate::backend::{CaptureBackend, Outcome};
use crate::config::WaterfallConfig;
use crate::session::{DesktopEnvironment, SessionContext};
use crate::tool_runner::run_capture_tool;
use crate::types::{Bitmap, CaptureError, CaptureKind, CaptureOptions};

pub(crate) struct CliToolsBackend {
    config: WaterfallConfig,
}

/// One candidate invocation; the output path is appended to `args`.
#[derive(Debug, PartialEq, Eq)]
struct ToolInvocation {
    program: &'static str,
    args: Vec<&'static str>,
}

impl CliToolsBackend {
    pub(crate) fn new(config: WaterfallConfig) -> Self {
        Self { config }
    }

    async fn capture(
        &self,
        kind: CaptureKind,
        options: &CaptureOptions,
        ctx: &SessionContext,
    ) -> Result<Bitmap, CaptureError> {
        let interactive = kind == CaptureKind::Region;
        let timeout = if interactive {
            self.config.interactive_tool_timeout()
        } else {
            self.config.tool_timeout()
        };

        let mut last_failure: Option<CaptureError> = None;
        for invocation in tool_plan(kind, options, ctx.desktop) {
            match run_capture_tool(invocation.program, &invocation.args, timeout).await {
                Ok(bitmap) => {
                    debug!("CLI tool {} produced the capture", invocation.program);
                    return Ok(bitmap);
                }
                Err(CaptureError::Unavailable(reason)) => {
                    debug!("CLI tool skipped: {reason}");
                }
                Err(CaptureError::Tool(reason)) if interactive => {
                    // Interactive selectors exit nonzero when dismissed.
                    debug!("Treating nonzero interactive exit as cancel: {reason}");
                    return Err(CaptureError::Cancelled(
                        "region selection dismissed".into(),
                    ));
                }
                Err(e) => {
                    warn!("CLI tool {} failed: {e}", invocation.program);
                    last_failure = Some(e);
                }
            }
        }

        Err(last_failure.unwrap_or_else(|| {
            CaptureError::Unavailable("no X11 screenshot tool is installed".into())
        }))
    }
}

#[async_trait]
impl CaptureBackend for CliToolsBackend {
    fn name(&self) -> &'static str {
        "x11-cli-tools"
    }

    fn supports(
        &self,
        _kind: CaptureKind,
        _options: &CaptureOptions,
        ctx: &SessionContext,
    ) -> bool {
        !ctx.is_wayland
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

/// Native tool for the running desktop, followed by the generic fallbacks,
/// with duplicate programs filtered out.
fn tool_plan(
    kind: CaptureKind,
    options: &CaptureOptions,
    desktop: DesktopEnvironment,
) -> Vec<ToolInvocation> {
    let mut plan = Vec::new();
    if let Some(native) = native_tool(kind, options, desktop) {
        plan.push(native);
    }
    plan.extend(generic_tools(kind, options));

    let mut seen = HashSet::new();
    plan.retain(|invocation| seen.insert(invocation.program));
    plan
}

fn native_tool(
    kind: CaptureKind,
    options: &CaptureOptions,
    desktop: DesktopEnvironment,
) -> Option<ToolInvocation> {
    match desktop {
        DesktopEnvironment::Gnome | DesktopEnvironment::Cinnamon | DesktopEnvironment::Mate => {
            let mut args = match kind {
                CaptureKind::FullScreen => vec![],
                CaptureKind::Region => vec!["-a"],
                CaptureKind::ActiveWindow => vec!["-w", "-b"],
            };
            if options.show_cursor && kind != CaptureKind::Region {
                args.push("-p");
            }
            args.push("-f");
            Some(ToolInvocation { program: "gnome-screenshot", args })
        }
        DesktopEnvironment::Kde | DesktopEnvironment::Lxqt => {
            let mut args = match kind {
                CaptureKind::FullScreen => vec!["-f", "-b", "-n"],
                CaptureKind::Region => vec!["-r", "-b", "-n"],
                CaptureKind::ActiveWindow => vec!["-a", "-b", "-n"],
            };
            if options.show_cursor && kind != CaptureKind::Region {
                args.push("-p");
            }
            args.push("-o");
            Some(ToolInvocation { program: "spectacle", args })
        }
        DesktopEnvironment::Xfce => {
            let args = match kind {
                CaptureKind::FullScreen => vec!["-f", "-s"],
                CaptureKind::Region => vec!["-r", "-s"],
                CaptureKind::ActiveWindow => vec!["-w", "-s"],
            };
            Some(ToolInvocation { program: "xfce4-screenshooter", args })
        }
        _ => None,
    }
}

/// Generic fallback ladder: the other desktops' screenshot utilities may be
/// installed regardless of session, then scrot, then ImageMagick import.
fn generic_tools(kind: CaptureKind, options: &CaptureOptions) -> Vec<ToolInvocation> {
    let mut plan = vec![
        native_tool(kind, options, DesktopEnvironment::Gnome),
        native_tool(kind, options, DesktopEnvironment::Kde),
        native_tool(kind, options, DesktopEnvironment::Xfce),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>();

    match kind {
        CaptureKind::FullScreen => {
            let mut scrot_args = vec![];
            if options.show_cursor {
                scrot_args.push("-p");
            }
            plan.push(ToolInvocation { program: "scrot", args: scrot_args });
            plan.push(ToolInvocation { program: "import", args: vec!["-window", "root"] });
        }
        CaptureKind::Region => {
            plan.push(ToolInvocation { program: "scrot", args: vec!["-s"] });
            // bare import is an interactive rubber-band selection
            plan.push(ToolInvocation { program: "import", args: vec![] });
        }
        CaptureKind::ActiveWindow => {
            plan.push(ToolInvocation { program: "scrot", args: vec!["-u", "-b"] });
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> CaptureOptions {
        CaptureOptions::default()
    }

    #[test]
    fn gnome_desktop_leads_with_its_native_tool() {
        let plan = tool_plan(CaptureKind::FullScreen, &options(), DesktopEnvironment::Gnome);
        assert_eq!(plan[0].program, "gnome-screenshot");
        assert!(plan.iter().any(|t| t.program == "scrot"));
    }

    #[test]
    fn unknown_desktop_walks_the_full_generic_ladder() {
        let plan = tool_plan(CaptureKind::FullScreen, &options(), DesktopEnvironment::Unknown);
        let programs: Vec<&str> = plan.iter().map(|t| t.program).collect();
        assert_eq!(
            programs,
            vec!["gnome-screenshot", "spectacle", "xfce4-screenshooter", "scrot", "import"]
        );
    }

    #[test]
    fn region_plan_uses_interactive_flags() {
        let plan = tool_plan(CaptureKind::Region, &options(), DesktopEnvironment::Kde);
        assert_eq!(plan[0].program, "spectacle");
        assert!(plan[0].args.contains(&"-r"));
        let scrot = plan.iter().find(|t| t.program == "scrot").unwrap();
        assert_eq!(scrot.args, vec!["-s"]);
    }

    #[test]
    fn duplicate_programs_are_filtered() {
        let plan = tool_plan(CaptureKind::Region, &options(), DesktopEnvironment::Xfce);
        let mut seen = HashSet::new();
        assert!(plan.iter().all(|t| seen.insert(t.program)));
    }

    #[test]
    fn cursor_flag_only_applies_outside_region_captures(){
        let mut opts = options();
        opts.show_cursor = true;
        let full = tool_plan(CaptureKind::FullScreen, &opts, DesktopEnvironment::Gnome);
        assert!(full[0].args.contains(&"-p"));
        let region = tool_plan(CaptureKind::Region, &opts, DesktopEnvironment::Gnome);
        assert!(!region[0].args.contains(&"-p"));
    }

    #[test]
    fn spectacle_honors_the_cursor_flag_before_its_output_option() {
        let mut opts = options();
        opts.show_cursor = true;
        let plan = tool_plan(CaptureKind::FullScreen, &opts, DesktopEnvironment::Kde);
        assert_eq!(plan[0].program, "spectacle");
        assert_eq!(plan[0].args, vec!["-f", "-b", "-n", "-p", "-o"]);

        let region = tool_plan(CaptureKind::Region, &opts, DesktopEnvironment::Kde);
        assert_eq!(region[0].args, vec!["-r", "-b", "-n", "-o"]);
    }
}
