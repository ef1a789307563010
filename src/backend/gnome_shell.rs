//! GNOME Shell screenshot client (GNOME, MATE, Cinnamon sessions).
//!
//! The simpler of the two desktop-specific protocols: one method call that
//! writes a PNG to a path we choose and answers with a success flag plus the
//! filename it actually used. The shell occasionally substitutes its own
//! path, so both candidates are checked and cleaned up.

use async_trait::async_trait;
use log::{debug, warn};
use zbus::{Connection, proxy};

use crate::backend::{CaptureBackend, Outcome};
use crate::pixels::decode_image_file;
use crate::session::SessionContext;
use crate::tool_runner::{TempArtifact, unique_temp_path};
use crate::types::{Bitmap, CaptureError, CaptureKind, CaptureOptions};

#[proxy(
    interface = "org.gnome.Shell.Screenshot",
    default_service = "org.gnome.Shell.Screenshot",
    default_path = "/org/gnome/Shell/Screenshot"
)]
trait GnomeShellScreenshot {
    async fn screenshot(
        &self,
        include_cursor: bool,
        flash: bool,
        filename: &str,
    ) -> zbus::Result<(bool, String)>;

    async fn screenshot_window(
        &self,
        include_frame: bool,
        include_cursor: bool,
        flash: bool,
        filename: &str,
    ) -> zbus::Result<(bool, String)>;
}

pub(crate) struct GnomeShellBackend;

impl GnomeShellBackend {
    pub(crate) fn new() -> Self {
        Self
    }

    async fn capture(
        &self,
        kind: CaptureKind,
        options: &CaptureOptions,
    ) -> Result<Bitmap, CaptureError> {
        let artifact = TempArtifact::new(unique_temp_path("gnome", "png"));
        let requested_path = artifact.path().to_string_lossy().into_owned();

        let connection = Connection::session()
            .await
            .map_err(|e| CaptureError::Unavailable(format!("no session bus: {e}")))?;
        let shell = GnomeShellScreenshotProxy::new(&connection)
            .await
            .map_err(CaptureError::DBus)?;

        let (success, filename_used) = match kind {
            CaptureKind::FullScreen => {
                shell
                    .screenshot(options.show_cursor, false, &requested_path)
                    .await?
            }
            CaptureKind::ActiveWindow => {
                shell
                    .screenshot_window(true, options.show_cursor, false, &requested_path)
                    .await?
            }
            CaptureKind::Region => {
                return Err(CaptureError::Unavailable(
                    "GNOME Shell stage has no free-form region selector".into(),
                ));
            }
        };

        if !success {
            return Err(CaptureError::Tool(
                "GNOME Shell screenshot reported failure".into(),
            ));
        }
        debug!("GNOME Shell wrote screenshot to '{filename_used}'");
        self.load_confirmed_file(&requested_path, &filename_used)
            .await
    }

    /// Decodes whichever confirmed path exists, preferring the one the shell
    /// reported. Both paths are deleted afterwards.
    async fn load_confirmed_file(
        &self,
        requested: &str,
        reported: &str,
    ) -> Result<Bitmap, CaptureError> {
        let mut candidates = vec![reported.to_string()];
        if requested != reported {
            candidates.push(requested.to_string());
        }

        for candidate in candidates {
            let path = std::path::PathBuf::from(&candidate);
            if !path.exists() {
                continue;
            }
            let guard = TempArtifact::new(path);
            let decode_path = guard.path().to_path_buf();
            return tokio::task::spawn_blocking(move || decode_image_file(&decode_path))
                .await
                .map_err(|e| CaptureError::Decode(format!("GNOME decode task failed: {e}")))?;
        }
        Err(CaptureError::InvalidResponse(
            "GNOME Shell confirmed a file that does not exist".into(),
        ))
    }
}

#[async_trait]
impl CaptureBackend for GnomeShellBackend {
    fn name(&self) -> &'static str {
        "gnome-shell-screenshot"
    }

    fn supports(
        &self,
        kind: CaptureKind,
        _options: &CaptureOptions,
        ctx: &SessionContext,
    ) -> bool {
        ctx.has_gnome_shell_screenshot() && kind != CaptureKind::Region
    }

    async fn try_capture(
        &self,
        kind: CaptureKind,
        options: &CaptureOptions,
        _ctx: &SessionContext,
    ) -> Outcome {
        let outcome = Outcome::from_result(self.capture(kind, options).await);
        if let Outcome::Failed(reason) = &outcome {
            warn!("GNOME Shell capture failed: {reason}");
        }
        outcome
    }
}
