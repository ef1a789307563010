//! Direct X11 framebuffer reads.
//!
//! Final programmatic stage on X11 sessions: GetImage against the root
//! window, with the channel layout decoded from the visual's RGB masks and
//! the server's pixmap formats instead of assuming BGRA. All protocol work is
//! blocking and runs on the blocking pool.

use async_trait::async_trait;
use log::debug;
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{AtomEnum, ConnectionExt, ImageFormat, Screen, Visualtype};
use x11rb::rust_connection::RustConnection;

use crate::backend::{CaptureBackend, Outcome};
use crate::pixels::decode_masked_image;
use crate::session::SessionContext;
use crate::types::{Bitmap, CaptureError, CaptureKind, CaptureOptions, Region};

pub(crate) struct X11Backend;

impl X11Backend {
    pub(crate) fn new() -> Self {
        Self
    }

    /// Reads an exact rectangle of the root window. Used both as a waterfall
    /// stage and directly for coordinate-addressed captures.
    pub(crate) async fn capture_rect(&self, region: Region) -> Result<Bitmap, CaptureError> {
        if !region.is_valid() {
            return Err(CaptureError::InvalidResponse(format!(
                "degenerate capture rectangle {}x{}",
                region.width, region.height
            )));
        }
        tokio::task::spawn_blocking(move || capture_root_rect(region))
            .await
            .map_err(|e| CaptureError::Decode(format!("X11 capture task failed: {e}")))?
    }

    async fn capture(&self, kind: CaptureKind) -> Result<Bitmap, CaptureError> {
        let result = tokio::task::spawn_blocking(move || match kind {
            CaptureKind::FullScreen => capture_full_root(),
            CaptureKind::ActiveWindow => capture_active_window(),
            CaptureKind::Region => Err(CaptureError::Unavailable(
                "raw X11 reads have no region selector".into(),
            )),
        })
        .await
        .map_err(|e| CaptureError::Decode(format!("X11 capture task failed: {e}")))?;
        result
    }
}

#[async_trait]
impl CaptureBackend for X11Backend {
    fn name(&self) -> &'static str {
        "x11-raw"
    }

    fn supports(
        &self,
        kind: CaptureKind,
        _options: &CaptureOptions,
        ctx: &SessionContext,
    ) -> bool {
        !ctx.is_wayland && kind != CaptureKind::Region
    }

    async fn try_capture(
        &self,
        kind: CaptureKind,
        _options: &CaptureOptions,
        _ctx: &SessionContext,
    ) -> Outcome {
        Outcome::from_result(self.capture(kind).await)
    }
}

fn connect() -> Result<(RustConnection, usize), CaptureError> {
    x11rb::connect(None)
        .map_err(|e| CaptureError::Unavailable(format!("cannot open X display: {e}")))
}

fn capture_full_root() -> Result<Bitmap, CaptureError> {
    let (conn, screen_num) = connect()?;
    let screen = conn.setup().roots[screen_num].clone();
    let region = Region {
        x: 0,
        y: 0,
        width: i32::from(screen.width_in_pixels),
        height: i32::from(screen.height_in_pixels),
    };
    read_root_image(&conn, &screen, region)
}

fn capture_root_rect(region: Region) -> Result<Bitmap, CaptureError> {
    let (conn, screen_num) = connect()?;
    let screen = conn.setup().roots[screen_num].clone();
    read_root_image(&conn, &screen, region)
}

/// Resolves _NET_ACTIVE_WINDOW, translates its geometry into root
/// coordinates, and reads that rectangle.
fn capture_active_window() -> Result<Bitmap, CaptureError> {
    let (conn, screen_num) = connect()?;
    let screen = conn.setup().roots[screen_num].clone();

    let atom = conn
        .intern_atom(false, b"_NET_ACTIVE_WINDOW")
        .map_err(x11_error)?
        .reply()
        .map_err(x11_error)?
        .atom;
    let reply = conn
        .get_property(false, screen.root, atom, AtomEnum::WINDOW, 0, 1)
        .map_err(x11_error)?
        .reply()
        .map_err(x11_error)?;
    if reply.value.len() < 4 {
        return Err(CaptureError::Tool("no active window reported".into()));
    }
    let window = u32::from_ne_bytes(
        reply.value[0..4]
            .try_into()
            .map_err(|_| CaptureError::InvalidResponse("short _NET_ACTIVE_WINDOW".into()))?,
    );
    if window == 0 {
        return Err(CaptureError::Tool("no active window reported".into()));
    }

    let geometry = conn.get_geometry(window).map_err(x11_error)?.reply().map_err(x11_error)?;
    let translated = conn
        .translate_coordinates(window, screen.root, 0, 0)
        .map_err(x11_error)?
        .reply()
        .map_err(x11_error)?;

    let region = Region {
        x: i32::from(translated.dst_x),
        y: i32::from(translated.dst_y),
        width: i32::from(geometry.width),
        height: i32::from(geometry.height),
    };
    read_root_image(&conn, &screen, region)
}

fn read_root_image(
    conn: &RustConnection,
    screen: &Screen,
    region: Region,
) -> Result<Bitmap, CaptureError> {
    let depth = screen.root_depth;
    if depth < 24 {
        return Err(CaptureError::Unavailable(format!(
            "root depth {depth} is too shallow for direct reads"
        )));
    }
    let visual = find_visual(screen, screen.root_visual).ok_or_else(|| {
        CaptureError::InvalidResponse("root visual not listed in allowed depths".into())
    })?;
    let (bits_per_pixel, scanline_pad) = pixmap_format(conn, depth)?;

    let width = u16::try_from(region.width)
        .map_err(|_| CaptureError::InvalidResponse("capture width exceeds X11 limits".into()))?;
    let height = u16::try_from(region.height)
        .map_err(|_| CaptureError::InvalidResponse("capture height exceeds X11 limits".into()))?;
    let x = i16::try_from(region.x)
        .map_err(|_| CaptureError::InvalidResponse("capture origin exceeds X11 limits".into()))?;
    let y = i16::try_from(region.y)
        .map_err(|_| CaptureError::InvalidResponse("capture origin exceeds X11 limits".into()))?;

    let reply = conn
        .get_image(ImageFormat::Z_PIXMAP, screen.root, x, y, width, height, !0)
        .map_err(x11_error)?
        .reply()
        .map_err(x11_error)?;

    if bits_per_pixel % 8 != 0 {
        return Err(CaptureError::InvalidResponse(format!(
            "fractional pixel size {bits_per_pixel} bits"
        )));
    }
    let stride = row_stride(u32::from(width), bits_per_pixel, scanline_pad);
    debug!(
        "X11 read {}x{} depth={} bpp={} stride={}",
        width, height, depth, bits_per_pixel, stride
    );
    decode_masked_image(
        &reply.data,
        u32::from(width),
        u32::from(height),
        stride as usize,
        usize::from(bits_per_pixel / 8),
        visual.red_mask,
        visual.green_mask,
        visual.blue_mask,
    )
}

fn find_visual(screen: &Screen, visual_id: u32) -> Option<Visualtype> {
    screen
        .allowed_depths
        .iter()
        .flat_map(|d| d.visuals.iter())
        .find(|v| v.visual_id == visual_id)
        .copied()
}

/// Looks up the server's pixmap format for a depth; the scanline pad decides
/// the row stride of GetImage replies.
fn pixmap_format(conn: &RustConnection, depth: u8) -> Result<(u8, u8), CaptureError> {
    conn.setup()
        .pixmap_formats
        .iter()
        .find(|f| f.depth == depth)
        .map(|f| (f.bits_per_pixel, f.scanline_pad))
        .ok_or_else(|| {
            CaptureError::InvalidResponse(format!("no pixmap format for depth {depth}"))
        })
}

fn row_stride(width: u32, bits_per_pixel: u8, scanline_pad: u8) -> u32 {
    let row_bits = width * u32::from(bits_per_pixel);
    let pad = u32::from(scanline_pad).max(8);
    row_bits.div_ceil(pad) * pad / 8
}

fn x11_error(error: impl std::fmt::Display) -> CaptureError {
    CaptureError::Tool(format!("X11 request failed: {error}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_honors_scanline_pad() {
        // 10 pixels at 32bpp pad 32: exactly 40 bytes.
        assert_eq!(row_stride(10, 32, 32), 40);
        // 10 pixels at 24bpp pad 32: 240 bits rounds to 256 bits.
        assert_eq!(row_stride(10, 24, 32), 32);
        // 3 pixels at 16bpp pad 16: 48 bits, 6 bytes.
        assert_eq!(row_stride(3, 16, 16), 6);
    }
}
