//! Capture orchestration: walk the backend stages until one produces a
//! bitmap.
//!
//! The stage order is fixed: portal, desktop-specific D-Bus, Wayland CLI
//! tools, then direct X11 reads and legacy CLI tools. Backends that do not
//! apply to the session or capture kind are skipped outright. A user
//! cancellation anywhere ends the walk; everything else advances to the next
//! stage, and exhaustion yields `None` rather than an error.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::backend::cli_tools::CliToolsBackend;
use crate::backend::gnome_shell::GnomeShellBackend;
use crate::backend::kwin::KwinBackend;
use crate::backend::portal::PortalBackend;
use crate::backend::wayland_tools::WaylandToolsBackend;
use crate::backend::x11::X11Backend;
use crate::backend::{CaptureBackend, Outcome};
use crate::config::WaterfallConfig;
use crate::session::SessionContext;
use crate::types::{Bitmap, CaptureError, CaptureKind, CaptureOptions, CursorInfo, Region};
use crate::window::{WindowHandle, WindowService};

enum RunResult {
    Captured(Bitmap),
    Cancelled,
    Exhausted,
}

/// The capture service. One instance can serve any number of capture calls;
/// session detection happens at construction and configuration is loaded
/// once.
pub struct CaptureWaterfall {
    ctx: SessionContext,
    config: WaterfallConfig,
    backends: Vec<Arc<dyn CaptureBackend>>,
    window_service: Option<Arc<dyn WindowService>>,
}

impl CaptureWaterfall {
    /// Detects the session and loads configuration from disk.
    pub fn new() -> Self {
        Self::with_context(SessionContext::detect(), WaterfallConfig::load())
    }

    pub fn with_context(ctx: SessionContext, config: WaterfallConfig) -> Self {
        let backends = default_backends(&config);
        Self {
            ctx,
            config,
            backends,
            window_service: None,
        }
    }

    /// Installs a window geometry provider, enabling handle-addressed window
    /// captures and the bounds fallback for active-window captures.
    pub fn with_window_service(mut self, service: Arc<dyn WindowService>) -> Self {
        self.window_service = Some(service);
        self
    }

    #[cfg(test)]
    fn with_backends(
        ctx: SessionContext,
        config: WaterfallConfig,
        backends: Vec<Arc<dyn CaptureBackend>>,
    ) -> Self {
        Self {
            ctx,
            config,
            backends,
            window_service: None,
        }
    }

    /// Captures all monitors as one bitmap.
    pub async fn capture_full_screen(&self, options: &CaptureOptions) -> Option<Bitmap> {
        self.run(CaptureKind::FullScreen, options).await.into_option()
    }

    /// Interactive region capture: the chosen backend presents its own
    /// selection UI. `None` means cancelled or no capable backend.
    pub async fn capture_region(&self, options: &CaptureOptions) -> Option<Bitmap> {
        self.run(CaptureKind::Region, options).await.into_option()
    }

    /// Captures the currently focused window.
    pub async fn capture_active_window(&self, options: &CaptureOptions) -> Option<Bitmap> {
        match self.run(CaptureKind::ActiveWindow, options).await {
            RunResult::Captured(bitmap) => Some(bitmap),
            RunResult::Cancelled => None,
            RunResult::Exhausted => {
                // Coordinate fallback: resolve the focused window's bounds
                // and read that rectangle. With no resolvable window the
                // capture degrades to full screen rather than nothing.
                let bounds = self
                    .window_service
                    .as_ref()
                    .and_then(|service| service.foreground_window().map(|h| (service, h)))
                    .and_then(|(service, handle)| service.window_bounds(handle));
                match bounds {
                    Some(bounds) => {
                        debug!("Active-window fallback through window bounds {bounds:?}");
                        self.capture_rect(bounds, options).await
                    }
                    None => {
                        debug!("No foreground window bounds, falling back to full screen");
                        self.capture_full_screen(options).await
                    }
                }
            }
        }
    }

    /// Captures a specific window by handle, using the installed window
    /// service for geometry.
    pub async fn capture_window(
        &self,
        handle: WindowHandle,
        options: &CaptureOptions,
    ) -> Option<Bitmap> {
        let service = self.window_service.as_ref()?;
        let bounds = service.window_bounds(handle)?;
        self.capture_rect(bounds, options).await
    }

    /// Captures an explicit screen rectangle. Prefers a direct X11 read;
    /// otherwise captures the full screen and crops.
    pub async fn capture_rect(&self, region: Region, options: &CaptureOptions) -> Option<Bitmap> {
        if !region.is_valid() {
            warn!(
                "Rejecting degenerate capture rectangle {}x{}",
                region.width, region.height
            );
            return None;
        }

        if !self.ctx.is_wayland {
            match X11Backend::new().capture_rect(region).await {
                Ok(bitmap) => return Some(bitmap),
                Err(CaptureError::Unavailable(reason)) => {
                    debug!("Direct X11 rectangle read unavailable: {reason}");
                }
                Err(e) => warn!("Direct X11 rectangle read failed: {e}"),
            }
        }

        let full = self.capture_full_screen(options).await?;
        let cropped = full.crop(region);
        if cropped.is_none() {
            warn!("Capture rectangle {region:?} does not intersect the screen");
        }
        cropped
    }

    /// Presents an interactive region selector and returns the chosen
    /// geometry without capturing. `None` when dismissed or unsupported.
    pub async fn select_region(&self) -> Option<Region> {
        if !self.ctx.is_wayland {
            debug!("Standalone region selection requires a Wayland selector");
            return None;
        }
        let tools = WaylandToolsBackend::new(self.config.clone());
        match tools.select_region_slurp().await {
            Ok(region) => Some(region),
            Err(CaptureError::Cancelled(_)) => {
                info!("Region selection cancelled");
                None
            }
            Err(e) => {
                warn!("Region selection failed: {e}");
                None
            }
        }
    }

    /// Captures the cursor image and position where the session exposes it.
    pub async fn capture_cursor(&self) -> Option<CursorInfo> {
        match crate::cursor::capture_cursor(self.ctx.is_wayland).await {
            Ok(info) => info,
            Err(e) => {
                debug!("Cursor capture failed: {e}");
                None
            }
        }
    }

    async fn run(&self, kind: CaptureKind, options: &CaptureOptions) -> RunResult {
        match &options.workflow_id {
            Some(id) => debug!("Starting {kind:?} capture for workflow '{id}'"),
            None => debug!("Starting {kind:?} capture"),
        }
        if let Some(delay) = self.config.pre_capture_delay() {
            debug!("Pre-capture delay of {}ms", delay.as_millis());
            tokio::time::sleep(delay).await;
        }

        for backend in &self.backends {
            if !backend.supports(kind, options, &self.ctx) {
                continue;
            }
            debug!("Trying capture backend '{}'", backend.name());
            match backend.try_capture(kind, options, &self.ctx).await {
                Outcome::Captured(bitmap) => {
                    info!("Capture succeeded via '{}'", backend.name());
                    return RunResult::Captured(bitmap);
                }
                Outcome::Cancelled => {
                    info!("Capture cancelled by the user in '{}'", backend.name());
                    return RunResult::Cancelled;
                }
                Outcome::Unavailable(reason) => {
                    debug!("Backend '{}' unavailable: {reason}", backend.name());
                }
                Outcome::Failed(reason) => {
                    warn!("Backend '{}' failed: {reason}", backend.name());
                }
            }
        }

        info!("All capture backends exhausted for {kind:?}");
        RunResult::Exhausted
    }
}

impl Default for CaptureWaterfall {
    fn default() -> Self {
        Self::new()
    }
}

impl RunResult {
    fn into_option(self) -> Option<Bitmap> {
        match self {
            RunResult::Captured(bitmap) => Some(bitmap),
            RunResult::Cancelled | RunResult::Exhausted => None,
        }
    }
}

fn default_backends(config: &WaterfallConfig) -> Vec<Arc<dyn CaptureBackend>> {
    vec![
        Arc::new(PortalBackend::new(config.clone())),
        Arc::new(KwinBackend::new(config.clone())),
        Arc::new(GnomeShellBackend::new()),
        Arc::new(WaylandToolsBackend::new(config.clone())),
        Arc::new(X11Backend::new()),
        Arc::new(CliToolsBackend::new(config.clone())),
    ]
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::session::DesktopEnvironment;

    fn pixel_bitmap() -> Bitmap {
        Bitmap::new(1, 1, vec![1, 2, 3, 255]).unwrap()
    }

    enum MockResult {
        Captured,
        Cancelled,
        Unavailable,
        Failed,
    }

    struct MockBackend {
        result: MockResult,
        supported: bool,
        calls: Mutex<usize>,
    }

    impl MockBackend {
        fn new(result: MockResult) -> Arc<Self> {
            Arc::new(Self {
                result,
                supported: true,
                calls: Mutex::new(0),
            })
        }

        fn unsupported() -> Arc<Self> {
            Arc::new(Self {
                result: MockResult::Captured,
                supported: false,
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl CaptureBackend for MockBackend {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn supports(
            &self,
            _kind: CaptureKind,
            _options: &CaptureOptions,
            _ctx: &SessionContext,
        ) -> bool {
            self.supported
        }

        async fn try_capture(
            &self,
            _kind: CaptureKind,
            _options: &CaptureOptions,
            _ctx: &SessionContext,
        ) -> Outcome {
            *self.calls.lock().unwrap() += 1;
            match self.result {
                MockResult::Captured => Outcome::Captured(pixel_bitmap()),
                MockResult::Cancelled => Outcome::Cancelled,
                MockResult::Unavailable => Outcome::Unavailable("not here".into()),
                MockResult::Failed => Outcome::Failed("broke".into()),
            }
        }
    }

    fn wayland_ctx() -> SessionContext {
        SessionContext {
            is_wayland: true,
            desktop: DesktopEnvironment::Sway,
            is_sandboxed: false,
        }
    }

    fn waterfall(backends: Vec<Arc<dyn CaptureBackend>>) -> CaptureWaterfall {
        CaptureWaterfall::with_backends(wayland_ctx(), WaterfallConfig::default(), backends)
    }

    #[tokio::test]
    async fn first_successful_backend_wins() {
        let first = MockBackend::new(MockResult::Captured);
        let second = MockBackend::new(MockResult::Captured);
        let service = waterfall(vec![first.clone(), second.clone()]);

        let bitmap = service
            .capture_full_screen(&CaptureOptions::default())
            .await
            .unwrap();
        assert_eq!(bitmap.width, 1);
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 0);
    }

    #[tokio::test]
    async fn cancellation_stops_the_walk() {
        let first = MockBackend::new(MockResult::Cancelled);
        let second = MockBackend::new(MockResult::Captured);
        let service = waterfall(vec![first.clone(), second.clone()]);

        let result = service.capture_region(&CaptureOptions::default()).await;
        assert!(result.is_none());
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 0);
    }

    #[tokio::test]
    async fn unavailable_and_failed_backends_are_skipped() {
        let first = MockBackend::new(MockResult::Unavailable);
        let second = MockBackend::new(MockResult::Failed);
        let third = MockBackend::new(MockResult::Captured);
        let service = waterfall(vec![first.clone(), second.clone(), third.clone()]);

        let result = service.capture_full_screen(&CaptureOptions::default()).await;
        assert!(result.is_some());
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 1);
        assert_eq!(third.calls(), 1);
    }

    #[tokio::test]
    async fn exhaustion_returns_none_without_error() {
        let first = MockBackend::new(MockResult::Failed);
        let service = waterfall(vec![first.clone()]);

        let result = service.capture_full_screen(&CaptureOptions::default()).await;
        assert!(result.is_none());
        assert_eq!(first.calls(), 1);
    }

    #[tokio::test]
    async fn unsupported_backends_are_never_called() {
        let skipped = MockBackend::unsupported();
        let used = MockBackend::new(MockResult::Captured);
        let service = waterfall(vec![skipped.clone(), used.clone()]);

        let result = service.capture_full_screen(&CaptureOptions::default()).await;
        assert!(result.is_some());
        assert_eq!(skipped.calls(), 0);
        assert_eq!(used.calls(), 1);
    }

    #[tokio::test]
    async fn degenerate_rectangles_never_reach_a_backend() {
        let backend = MockBackend::new(MockResult::Captured);
        let service = waterfall(vec![backend.clone()]);

        let region = Region { x: 0, y: 0, width: 0, height: 10 };
        let result = service.capture_rect(region, &CaptureOptions::default()).await;
        assert!(result.is_none());
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn rect_capture_crops_the_full_screen_on_wayland() {
        struct BigBackend;

        #[async_trait]
        impl CaptureBackend for BigBackend {
            fn name(&self) -> &'static str {
                "big"
            }
            fn supports(
                &self,
                _kind: CaptureKind,
                _options: &CaptureOptions,
                _ctx: &SessionContext,
            ) -> bool {
                true
            }
            async fn try_capture(
                &self,
                _kind: CaptureKind,
                _options: &CaptureOptions,
                _ctx: &SessionContext,
            ) -> Outcome {
                Outcome::Captured(Bitmap::new(4, 4, vec![7; 4 * 4 * 4]).unwrap())
            }
        }

        let service = waterfall(vec![Arc::new(BigBackend)]);
        let region = Region { x: 1, y: 1, width: 2, height: 2 };
        let bitmap = service
            .capture_rect(region, &CaptureOptions::default())
            .await
            .unwrap();
        assert_eq!((bitmap.width, bitmap.height), (2, 2));
    }

    #[test]
    fn wayland_context_never_plans_the_x11_stages() {
        let ctx = wayland_ctx();
        let opts = CaptureOptions::default();
        let config = WaterfallConfig::default();

        assert!(!X11Backend::new().supports(CaptureKind::FullScreen, &opts, &ctx));
        assert!(!CliToolsBackend::new(config.clone()).supports(CaptureKind::Region, &opts, &ctx));
        assert!(WaylandToolsBackend::new(config).supports(CaptureKind::FullScreen, &opts, &ctx));
    }

    #[test]
    fn x11_context_never_plans_the_wayland_tool_stage() {
        let ctx = SessionContext {
            is_wayland: false,
            desktop: DesktopEnvironment::Unknown,
            is_sandboxed: false,
        };
        let opts = CaptureOptions::default();
        let config = WaterfallConfig::default();

        assert!(!WaylandToolsBackend::new(config.clone()).supports(
            CaptureKind::FullScreen,
            &opts,
            &ctx
        ));
        assert!(X11Backend::new().supports(CaptureKind::FullScreen, &opts, &ctx));
        assert!(CliToolsBackend::new(config).supports(CaptureKind::Region, &opts, &ctx));
    }

    #[tokio::test]
    async fn window_capture_uses_service_bounds() {
        struct FixedWindows;
        impl WindowService for FixedWindows {
            fn foreground_window(&self) -> Option<WindowHandle> {
                Some(42)
            }
            fn window_bounds(&self, handle: WindowHandle) -> Option<Region> {
                (handle == 42).then_some(Region { x: 0, y: 0, width: 1, height: 1 })
            }
        }

        let backend = MockBackend::new(MockResult::Captured);
        let service = waterfall(vec![backend.clone()])
            .with_window_service(Arc::new(FixedWindows));

        let result = service
            .capture_window(42, &CaptureOptions::default())
            .await;
        assert!(result.is_some());

        let missing = service.capture_window(7, &CaptureOptions::default()).await;
        assert!(missing.is_none());
    }
}
