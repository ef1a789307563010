//! Pixel decoding: raw compositor buffers and arbitrary X visual masks.
//!
//! Kept free of any pipe/file/D-Bus plumbing so the conversion rules are
//! unit-testable on synthetic buffers.

use crate::types::{Bitmap, CaptureError};

/// Raw-image metadata returned by the KWin ScreenShot2 raw-pixel protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawImageDescriptor {
    pub width: u32,
    pub height: u32,
    /// Row stride in bytes; may exceed `width * 4` due to padding.
    pub stride: u32,
    /// QImage format code.
    pub format: u32,
}

// QImage format codes the raw protocol can hand us.
const QIMAGE_RGB32: u32 = 4;
const QIMAGE_ARGB32: u32 = 5;
const QIMAGE_ARGB32_PREMULTIPLIED: u32 = 6;
const QIMAGE_RGBX8888: u32 = 16;
const QIMAGE_RGBA8888: u32 = 17;
const QIMAGE_RGBA8888_PREMULTIPLIED: u32 = 18;

/// How the bytes of one supported raw format map onto RGBA output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RawLayout {
    /// Little-endian 0xAARRGGBB, i.e. B,G,R,A byte order.
    Bgra { opaque: bool },
    /// R,G,B,A byte order, optionally with an ignored alpha byte.
    Rgba { opaque: bool },
}

fn layout_for(format: u32) -> Option<RawLayout> {
    match format {
        QIMAGE_RGB32 => Some(RawLayout::Bgra { opaque: true }),
        QIMAGE_ARGB32 | QIMAGE_ARGB32_PREMULTIPLIED => Some(RawLayout::Bgra { opaque: false }),
        QIMAGE_RGBX8888 => Some(RawLayout::Rgba { opaque: true }),
        QIMAGE_RGBA8888 | QIMAGE_RGBA8888_PREMULTIPLIED => Some(RawLayout::Rgba { opaque: false }),
        _ => None,
    }
}

/// Converts one raw row into tightly packed RGBA bytes.
fn convert_raw_row(layout: RawLayout, row: &[u8], out: &mut Vec<u8>) {
    for px in row.chunks_exact(4) {
        match layout {
            RawLayout::Bgra { opaque } => {
                out.push(px[2]);
                out.push(px[1]);
                out.push(px[0]);
                out.push(if opaque { 255 } else { px[3] });
            }
            RawLayout::Rgba { opaque } => {
                out.push(px[0]);
                out.push(px[1]);
                out.push(px[2]);
                out.push(if opaque { 255 } else { px[3] });
            }
        }
    }
}

/// Decodes a raw compositor buffer into a bitmap.
///
/// Rejects unknown format codes and buffers shorter than `stride * height`;
/// row copies honor the stride and never read past the buffer.
pub fn decode_raw_image(desc: &RawImageDescriptor, data: &[u8]) -> Result<Bitmap, CaptureError> {
    if desc.width == 0 || desc.height == 0 || desc.stride == 0 {
        return Err(CaptureError::InvalidResponse(format!(
            "degenerate raw image metadata: {desc:?}"
        )));
    }
    let row_bytes = desc.width as usize * 4;
    if (desc.stride as usize) < row_bytes {
        return Err(CaptureError::InvalidResponse(format!(
            "stride {} shorter than row of {} pixels",
            desc.stride, desc.width
        )));
    }
    let required = desc.stride as usize * desc.height as usize;
    if data.len() < required {
        return Err(CaptureError::InvalidResponse(format!(
            "raw buffer holds {} bytes, need {}",
            data.len(),
            required
        )));
    }
    let layout = layout_for(desc.format).ok_or_else(|| {
        CaptureError::Decode(format!("unsupported raw image format code {}", desc.format))
    })?;

    let mut out = Vec::with_capacity(row_bytes * desc.height as usize);
    for y in 0..desc.height as usize {
        let start = y * desc.stride as usize;
        convert_raw_row(layout, &data[start..start + row_bytes], &mut out);
    }
    Bitmap::new(desc.width, desc.height, out)
        .ok_or_else(|| CaptureError::Decode("raw conversion produced short buffer".into()))
}

/// Channel extraction parameters for one X visual color mask.
#[derive(Debug, Clone, Copy)]
pub struct ChannelMask {
    mask: u32,
    shift: u32,
    bits: u32,
}

impl ChannelMask {
    /// Derives shift and width from an arbitrary contiguous bitmask.
    pub fn from_mask(mask: u32) -> Self {
        let shift = if mask == 0 { 0 } else { mask.trailing_zeros() };
        let bits = contiguous_ones(mask >> shift);
        Self { mask, shift, bits }
    }

    /// Extracts this channel from a pixel and normalizes it to 8 bits.
    ///
    /// Channels wider than 8 bits keep their top 8; narrower channels scale
    /// linearly so a maximal 5-bit value becomes 255, not 248.
    pub fn extract(&self, pixel: u32) -> u8 {
        let value = (pixel & self.mask) >> self.shift;
        if self.bits == 0 {
            return 0;
        }
        if self.bits >= 8 {
            (value >> (self.bits - 8)) as u8
        } else {
            let max = (1u32 << self.bits) - 1;
            ((value * 255) / max) as u8
        }
    }
}

fn contiguous_ones(mut value: u32) -> u32 {
    let mut count = 0;
    while value & 1 == 1 {
        count += 1;
        value >>= 1;
    }
    count
}

/// Decodes an X server image with arbitrary channel masks into RGBA.
///
/// `bytes_per_pixel` comes from the server's pixmap format for the reported
/// depth; `stride` is the padded scanline length in bytes.
pub fn decode_masked_image(
    data: &[u8],
    width: u32,
    height: u32,
    stride: usize,
    bytes_per_pixel: usize,
    red_mask: u32,
    green_mask: u32,
    blue_mask: u32,
) -> Result<Bitmap, CaptureError> {
    if bytes_per_pixel == 0 || bytes_per_pixel > 4 {
        return Err(CaptureError::Decode(format!(
            "unsupported bytes-per-pixel {bytes_per_pixel}"
        )));
    }
    if stride < width as usize * bytes_per_pixel {
        return Err(CaptureError::Decode(format!(
            "stride {stride} shorter than {width} pixels of {bytes_per_pixel} bytes"
        )));
    }
    if data.len() < stride * height as usize {
        return Err(CaptureError::Decode(format!(
            "image buffer holds {} bytes, need {}",
            data.len(),
            stride * height as usize
        )));
    }

    let red = ChannelMask::from_mask(red_mask);
    let green = ChannelMask::from_mask(green_mask);
    let blue = ChannelMask::from_mask(blue_mask);

    let mut out = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height as usize {
        let row = &data[y * stride..];
        for x in 0..width as usize {
            let offset = x * bytes_per_pixel;
            let mut pixel = 0u32;
            for (i, byte) in row[offset..offset + bytes_per_pixel].iter().enumerate() {
                pixel |= (*byte as u32) << (8 * i);
            }
            out.push(red.extract(pixel));
            out.push(green.extract(pixel));
            out.push(blue.extract(pixel));
            out.push(255);
        }
    }
    Bitmap::new(width, height, out)
        .ok_or_else(|| CaptureError::Decode("mask conversion produced short buffer".into()))
}

/// Decodes an image file (PNG from a tool, the portal, or GNOME Shell) into
/// a bitmap.
pub fn decode_image_file(path: &std::path::Path) -> Result<Bitmap, CaptureError> {
    let decoded = image::open(path)
        .map_err(|e| CaptureError::Decode(format!("{}: {}", path.display(), e)))?
        .to_rgba8();
    let (width, height) = decoded.dimensions();
    Bitmap::new(width, height, decoded.into_raw())
        .ok_or_else(|| CaptureError::Decode(format!("{}: empty image", path.display())))
}
