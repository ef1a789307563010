//! Cursor snapshot via the XFixes extension.
//!
//! X11 only. Wayland compositors do not expose the cursor image to clients,
//! so those sessions report no cursor rather than an error.

use log::debug;
use x11rb::protocol::xfixes::ConnectionExt as XfixesConnectionExt;

use crate::types::{Bitmap, CaptureError, CursorInfo};

/// Captures the current cursor image, position, and hotspot. Returns `None`
/// on Wayland and when no cursor is currently set.
pub async fn capture_cursor(is_wayland: bool) -> Result<Option<CursorInfo>, CaptureError> {
    if is_wayland {
        debug!("Cursor capture skipped: Wayland session");
        return Ok(None);
    }
    tokio::task::spawn_blocking(read_cursor)
        .await
        .map_err(|e| CaptureError::Decode(format!("cursor capture task failed: {e}")))?
}

fn read_cursor() -> Result<Option<CursorInfo>, CaptureError> {
    let (conn, _screen_num) = x11rb::connect(None)
        .map_err(|e| CaptureError::Unavailable(format!("cannot open X display: {e}")))?;

    // Version negotiation is mandatory before any other XFixes request.
    conn.xfixes_query_version(5, 0)
        .map_err(|e| CaptureError::Unavailable(format!("XFixes not available: {e}")))?
        .reply()
        .map_err(|e| CaptureError::Unavailable(format!("XFixes not available: {e}")))?;

    let image = match conn.xfixes_get_cursor_image() {
        Ok(cookie) => match cookie.reply() {
            Ok(reply) => reply,
            Err(_) => return Ok(None),
        },
        Err(e) => return Err(CaptureError::Tool(format!("cursor image request: {e}"))),
    };

    let width = u32::from(image.width);
    let height = u32::from(image.height);
    if width == 0 || height == 0 {
        return Ok(None);
    }

    // The reply carries one u32 per pixel in ARGB order, non-premultiplied
    // enough for screenshot annotation purposes.
    let mut rgba = Vec::with_capacity((width * height * 4) as usize);
    for pixel in &image.cursor_image {
        let [b, g, r, a] = pixel.to_le_bytes();
        rgba.extend_from_slice(&[r, g, b, a]);
    }
    let bitmap = Bitmap::new(width, height, rgba)
        .ok_or_else(|| CaptureError::Decode("cursor image size mismatch".into()))?;

    Ok(Some(CursorInfo {
        position: (i32::from(image.x), i32::from(image.y)),
        hotspot: (i32::from(image.xhot), i32::from(image.yhot)),
        image: Some(bitmap),
    }))
}
