//! KWin ScreenShot2 client (KDE and LXQt sessions).
//!
//! This protocol streams a raw pixel buffer through a file descriptor we
//! supply, then returns a metadata map (`type`, `width`, `height`, `stride`,
//! `format`). The compositor may still be writing when the method returns, so
//! the reader waits (bounded) for the file to reach `stride * height` bytes
//! before decoding.

use std::collections::HashMap;
use std::os::fd::AsFd;
use std::time::Instant;

use async_trait::async_trait;
use log::{debug, warn};
use zbus::zvariant::{Fd, OwnedValue, Value};
use zbus::{Connection, proxy};

use crate::backend::{CaptureBackend, Outcome};
use crate::config::WaterfallConfig;
use crate::pixels::{RawImageDescriptor, decode_raw_image};
use crate::session::SessionContext;
use crate::tool_runner::{TempArtifact, unique_temp_path};
use crate::types::{Bitmap, CaptureError, CaptureKind, CaptureOptions};

const CANCELLED_ERROR_NAME: &str = "org.kde.KWin.ScreenShot2.Error.Cancelled";
const SERVICE_UNKNOWN_ERROR_NAME: &str = "org.freedesktop.DBus.Error.ServiceUnknown";

#[proxy(
    interface = "org.kde.KWin.ScreenShot2",
    default_service = "org.kde.KWin.ScreenShot2",
    default_path = "/org/kde/KWin/ScreenShot2"
)]
trait KwinScreenShot2 {
    async fn capture_workspace(
        &self,
        options: HashMap<String, Value<'_>>,
        pipe: Fd<'_>,
    ) -> zbus::Result<HashMap<String, OwnedValue>>;

    async fn capture_active_window(
        &self,
        options: HashMap<String, Value<'_>>,
        pipe: Fd<'_>,
    ) -> zbus::Result<HashMap<String, OwnedValue>>;
}

pub(crate) struct KwinBackend {
    config: WaterfallConfig,
}

impl KwinBackend {
    pub(crate) fn new(config: WaterfallConfig) -> Self {
        Self { config }
    }

    async fn capture(
        &self,
        kind: CaptureKind,
        options: &CaptureOptions,
    ) -> Result<Bitmap, CaptureError> {
        let artifact = TempArtifact::new(unique_temp_path("kwin_raw", "bin"));
        let file = std::fs::File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(artifact.path())?;

        let connection = Connection::session()
            .await
            .map_err(|e| CaptureError::Unavailable(format!("no session bus: {e}")))?;
        let kwin = KwinScreenShot2Proxy::new(&connection).await?;

        let mut dbus_options: HashMap<String, Value<'_>> = HashMap::new();
        dbus_options.insert("include-cursor".to_string(), options.show_cursor.into());
        dbus_options.insert("native-resolution".to_string(), true.into());
        if kind == CaptureKind::ActiveWindow {
            dbus_options.insert("include-decoration".to_string(), true.into());
            dbus_options.insert(
                "include-shadow".to_string(),
                options.capture_transparent_background.into(),
            );
        }

        let pipe = Fd::from(file.as_fd());
        let results = match kind {
            CaptureKind::FullScreen => kwin.capture_workspace(dbus_options, pipe).await,
            CaptureKind::ActiveWindow => kwin.capture_active_window(dbus_options, pipe).await,
            CaptureKind::Region => {
                return Err(CaptureError::Unavailable(
                    "KWin stage has no free-form region selector".into(),
                ));
            }
        };
        let results = results.map_err(map_kwin_error)?;

        let descriptor = parse_descriptor(&results)?;
        debug!(
            "KWin raw capture: {}x{} stride={} format={}",
            descriptor.width, descriptor.height, descriptor.stride, descriptor.format
        );

        let expected = descriptor.stride as u64 * descriptor.height as u64;
        if expected == 0 {
            return Err(CaptureError::InvalidResponse(
                "KWin reported an empty raw image".into(),
            ));
        }
        self.wait_for_length(artifact.path(), expected).await?;

        let raw = tokio::fs::read(artifact.path()).await?;
        decode_raw_image(&descriptor, &raw)
    }

    /// Polls until the raw output file holds at least `expected` bytes. The
    /// bound is configurable because slow storage can stretch the lag between
    /// the method return and the final write.
    async fn wait_for_length(
        &self,
        path: &std::path::Path,
        expected: u64,
    ) -> Result<(), CaptureError> {
        let deadline = Instant::now() + self.config.raw_ready_wait();
        loop {
            match tokio::fs::metadata(path).await {
                Ok(meta) if meta.len() >= expected => return Ok(()),
                Ok(_) | Err(_) => {}
            }
            if Instant::now() >= deadline {
                return Err(CaptureError::Timeout(format!(
                    "KWin raw output to reach {expected} bytes"
                )));
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
    }
}

#[async_trait]
impl CaptureBackend for KwinBackend {
    fn name(&self) -> &'static str {
        "kwin-screenshot2"
    }

    fn supports(
        &self,
        kind: CaptureKind,
        _options: &CaptureOptions,
        ctx: &SessionContext,
    ) -> bool {
        // No free-form region selector in this protocol; that skip is
        // automatic and must not count as a failure.
        ctx.has_kwin_screenshot() && kind != CaptureKind::Region
    }

    async fn try_capture(
        &self,
        kind: CaptureKind,
        options: &CaptureOptions,
        _ctx: &SessionContext,
    ) -> Outcome {
        let outcome = Outcome::from_result(self.capture(kind, options).await);
        if let Outcome::Failed(reason) = &outcome {
            warn!("KWin ScreenShot2 capture failed: {reason}");
        }
        outcome
    }
}

/// The compositor distinguishes user cancellation from every other error by
/// name; only that one name maps to the waterfall's terminal outcome.
fn map_kwin_error(error: zbus::Error) -> CaptureError {
    if let zbus::Error::MethodError(ref name, ref message, _) = error {
        if name.as_str() == CANCELLED_ERROR_NAME {
            return CaptureError::Cancelled("KWin interactive capture dismissed".into());
        }
        if name.as_str() == SERVICE_UNKNOWN_ERROR_NAME {
            return CaptureError::Unavailable("KWin ScreenShot2 service not registered".into());
        }
        return CaptureError::InvalidResponse(format!(
            "KWin error {}: {}",
            name,
            message.as_deref().unwrap_or("")
        ));
    }
    CaptureError::DBus(error)
}

fn parse_descriptor(results: &HashMap<String, OwnedValue>) -> Result<RawImageDescriptor, CaptureError> {
    let image_type = get_str(results, "type")?;
    if !image_type.eq_ignore_ascii_case("raw") {
        return Err(CaptureError::InvalidResponse(format!(
            "unsupported KWin image type '{image_type}'"
        )));
    }
    Ok(RawImageDescriptor {
        width: get_u32(results, "width")?,
        height: get_u32(results, "height")?,
        stride: get_u32(results, "stride")?,
        format: get_u32(results, "format")?,
    })
}

fn get_str<'m>(
    results: &'m HashMap<String, OwnedValue>,
    key: &str,
) -> Result<&'m str, CaptureError> {
    let value = results
        .get(key)
        .ok_or_else(|| CaptureError::InvalidResponse(format!("KWin results missing '{key}'")))?;
    value
        .downcast_ref()
        .map_err(|e| CaptureError::InvalidResponse(format!("KWin '{key}' is not a string: {e}")))
}

fn get_u32(results: &HashMap<String, OwnedValue>, key: &str) -> Result<u32, CaptureError> {
    let value = results
        .get(key)
        .ok_or_else(|| CaptureError::InvalidResponse(format!("KWin results missing '{key}'")))?;
    value
        .downcast_ref::<u32>()
        .map_err(|e| CaptureError::InvalidResponse(format!("KWin '{key}' is not a u32: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_complete_descriptor() {
        let mut results = HashMap::new();
        results.insert("type".to_string(), OwnedValue::try_from(Value::from("raw")).unwrap());
        results.insert("width".to_string(), OwnedValue::try_from(Value::from(10u32)).unwrap());
        results.insert("height".to_string(), OwnedValue::try_from(Value::from(10u32)).unwrap());
        results.insert("stride".to_string(), OwnedValue::try_from(Value::from(44u32)).unwrap());
        results.insert("format".to_string(), OwnedValue::try_from(Value::from(16u32)).unwrap());

        let descriptor = parse_descriptor(&results).unwrap();
        assert_eq!(descriptor.width, 10);
        assert_eq!(descriptor.stride, 44);
        assert_eq!(descriptor.format, 16);
    }

    #[test]
    fn rejects_non_raw_type() {
        let mut results = HashMap::new();
        results.insert("type".to_string(), OwnedValue::try_from(Value::from("png")).unwrap());
        let err = parse_descriptor(&results).unwrap_err();
        assert!(matches!(err, CaptureError::InvalidResponse(_)));
    }

    #[test]
    fn rejects_incomplete_metadata() {
        let mut results = HashMap::new();
        results.insert("type".to_string(), OwnedValue::try_from(Value::from("raw")).unwrap());
        results.insert("width".to_string(), OwnedValue::try_from(Value::from(10u32)).unwrap());
        assert!(parse_descriptor(&results).is_err());
    }

    #[test]
    fn cancellation_error_name_maps_to_cancelled() {
        let name = zbus::names::OwnedErrorName::try_from(CANCELLED_ERROR_NAME).unwrap();
        let error = zbus::Error::MethodError(name, Some("dismissed".into()), create_message());
        assert!(matches!(map_kwin_error(error), CaptureError::Cancelled(_)));
    }

    #[test]
    fn other_error_names_map_to_failure() {
        let name = zbus::names::OwnedErrorName::try_from("org.kde.KWin.ScreenShot2.Error.Fifo")
            .unwrap();
        let error = zbus::Error::MethodError(name, None, create_message());
        assert!(matches!(
            map_kwin_error(error),
            CaptureError::InvalidResponse(_)
        ));
    }

    fn create_message() -> zbus::Message {
        zbus::Message::method("/org/kde/KWin/ScreenShot2", "CaptureWorkspace")
            .unwrap()
            .build(&())
            .unwrap()
    }
}
