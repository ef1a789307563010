//! Data types shared across the capture waterfall.

use thiserror::Error;

/// Kind of capture a caller requested.
///
/// Free-form region capture is interactive: the selection is performed by
/// whichever backend serves the request (portal dialog, slurp, or a CLI
/// tool's own picker). Exact-coordinate capture goes through
/// [`crate::CaptureWaterfall::capture_rect`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    /// Capture the entire virtual screen.
    FullScreen,
    /// Capture a user-selected rectangular region.
    Region,
    /// Capture the currently focused window.
    ActiveWindow,
}

/// Caller-supplied capture flags. Immutable per request; the waterfall never
/// mutates them.
#[derive(Debug, Clone, Default)]
pub struct CaptureOptions {
    /// Include the pointer cursor in the captured image where the backend
    /// supports it.
    pub show_cursor: bool,
    /// Prefer the portal stage even outside Wayland/sandbox sessions.
    pub use_modern_capture: bool,
    /// Keep per-window transparency (drop shadows, rounded corners) where the
    /// backend supports it.
    pub capture_transparent_background: bool,
    /// Opaque caller correlation id, used only for log messages.
    pub workflow_id: Option<String>,
}

/// A rectangle in absolute virtual-screen coordinates.
///
/// Coordinates can be negative on multi-monitor setups with monitors placed
/// left of or above the primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A request is valid only with strictly positive dimensions. Degenerate
    /// regions are rejected before any backend is attempted.
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// A decoded capture: tightly packed 8-bit RGBA rows, no padding.
///
/// A bitmap is never partially populated; captures either produce a complete
/// bitmap or nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    /// `width * height * 4` bytes, row-major RGBA.
    pub data: Vec<u8>,
}

impl Bitmap {
    /// Builds a bitmap, rejecting buffers that do not match the dimensions.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        if data.len() != width as usize * height as usize * 4 {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
        })
    }

    /// Copies out the sub-rectangle of this bitmap covered by `region`,
    /// clamped to the bitmap bounds. Returns `None` when nothing overlaps.
    pub fn crop(&self, region: Region) -> Option<Bitmap> {
        let left = region.x.max(0);
        let top = region.y.max(0);
        let right = region.x.saturating_add(region.width).min(self.width as i32);
        let bottom = region.y.saturating_add(region.height).min(self.height as i32);
        if right <= left || bottom <= top {
            return None;
        }
        let (left, top, right, bottom) = (left as u32, top as u32, right as u32, bottom as u32);
        let width = right - left;
        let height = bottom - top;

        let src_stride = self.width as usize * 4;
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for row in top..bottom {
            let start = row as usize * src_stride + left as usize * 4;
            data.extend_from_slice(&self.data[start..start + width as usize * 4]);
        }
        Bitmap::new(width, height, data)
    }
}

/// Pointer cursor state captured alongside or independently of a screenshot.
#[derive(Debug, Clone)]
pub struct CursorInfo {
    /// Cursor position in absolute screen coordinates.
    pub position: (i32, i32),
    /// Hotspot offset within the cursor image.
    pub hotspot: (i32, i32),
    /// The cursor image, when the session exposes one.
    pub image: Option<Bitmap>,
}

/// Errors raised inside capture backends.
///
/// None of these ever escape the orchestrator: the waterfall downgrades every
/// backend error to a non-terminal outcome and callers only observe an absent
/// result.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// A backend prerequisite is missing (tool not installed, display not
    /// openable, D-Bus service not registered).
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The user dismissed an interactive capture UI. Terminal for the whole
    /// waterfall.
    #[error("capture cancelled: {0}")]
    Cancelled(String),

    #[error("D-Bus communication error: {0}")]
    DBus(#[from] zbus::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image decode failed: {0}")]
    Decode(String),

    #[error("backend returned invalid response: {0}")]
    InvalidResponse(String),

    #[error("external tool failed: {0}")]
    Tool(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degenerate_regions_are_invalid() {
        assert!(!Region::new(0, 0, 0, 10).is_valid());
        assert!(!Region::new(0, 0, 10, 0).is_valid());
        assert!(!Region::new(5, 5, -3, 10).is_valid());
        assert!(Region::new(-100, -50, 10, 10).is_valid());
    }

    #[test]
    fn bitmap_rejects_mismatched_buffer() {
        assert!(Bitmap::new(2, 2, vec![0; 16]).is_some());
        assert!(Bitmap::new(2, 2, vec![0; 15]).is_none());
        assert!(Bitmap::new(0, 2, Vec::new()).is_none());
    }

    #[test]
    fn crop_clamps_to_bounds() {
        let mut data = Vec::new();
        for i in 0..16u8 {
            data.extend_from_slice(&[i, i, i, 255]);
        }
        let bitmap = Bitmap::new(4, 4, data).unwrap();

        let cropped = bitmap.crop(Region::new(2, 2, 10, 10)).unwrap();
        assert_eq!(cropped.width, 2);
        assert_eq!(cropped.height, 2);
        // Bottom-right 2x2 block of a row-major 4x4 ramp.
        assert_eq!(cropped.data[0], 10);
        assert_eq!(cropped.data[4], 11);
        assert_eq!(cropped.data[8], 14);

        assert!(bitmap.crop(Region::new(10, 10, 5, 5)).is_none());
    }

    #[test]
    fn crop_accepts_negative_origin() {
        let bitmap = Bitmap::new(2, 2, vec![7; 16]).unwrap();
        let cropped = bitmap.crop(Region::new(-5, -5, 6, 6)).unwrap();
        assert_eq!(cropped.width, 1);
        assert_eq!(cropped.height, 1);
    }
}
