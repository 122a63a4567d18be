//! ICO frame selection and the two bit-exact ICO header blocks.
//!
//! # ICO directory format
//! An ICO file starts with a 6-byte `ICONDIR` header, followed by one
//! 16-byte `ICONDIRENTRY` per frame:
//!
//! | Offset | Field | Type | Notes |
//! |--------|-------|------|-------|
//! | 0x0 | Reserved | u16 LE | Always 0 |
//! | 0x2 | Type | u16 LE | 1 for icons |
//! | 0x4 | Count | u16 LE | Number of frames |
//!
//! Each entry:
//!
//! | Offset | Field | Type | Notes |
//! |--------|-------|------|-------|
//! | 0x0 | Width | u8 | 0 means 256 |
//! | 0x1 | Height | u8 | 0 means 256 |
//! | 0x2 | ColorCount | u8 | |
//! | 0x3 | Reserved | u8 | |
//! | 0x4 | Planes | u16 LE | |
//! | 0x6 | BitCount | u16 LE | |
//! | 0x8 | BytesInRes | u32 LE | Size of the frame's data |
//! | 0xC | ImageOffset | u32 LE | Absolute offset of the frame's data |

use snafu::prelude::*;

/// Error conditions for reading an ICO file.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// Thrown if the selected frame's pixel data could not be decoded.
    #[snafu(display("Unable to decode ICO frame: {source}"))]
    DecodeFailed { source: image::ImageError },
}

pub type Result<T> = core::result::Result<T, Error>;

/// A decoded ICO frame, re-encoded as a lossless PNG.
///
/// `width_px`/`height_px` are the frame's true dimensions (already resolved
/// from the ICO convention where 0 denotes 256).
pub struct PngImage {
    pub bytes: Vec<u8>,
    pub width_px: u32,
    pub height_px: u32,
}

/// Selects the largest frame of an ICO file by `width * height`, ties broken
/// by the lowest index, and returns it re-encoded as a lossless PNG.
///
/// Directory parsing and frame selection are delegated entirely to the
/// `image` crate's own ICO decoder, which already walks the directory and
/// picks the largest entry (ties keeping the first occurrence).
///
/// # Errors
/// Returns [`DecodeFailed`](Error::DecodeFailed) if no frame is decodable.
pub fn extract_best_frame(data: &[u8]) -> Result<PngImage> {
    let image = image::load_from_memory_with_format(data, image::ImageFormat::Ico)
        .context(DecodeFailedSnafu)?
        .into_rgba8();
    let (width_px, height_px) = image.dimensions();

    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .context(DecodeFailedSnafu)?;

    Ok(PngImage { bytes, width_px, height_px })
}

/// Emits the 22-byte plain ICO header block, used when the ICO is the first
/// region of the output file. The PNG must immediately follow these bytes.
#[must_use]
pub fn build_plain_header(png_size: u32, width_px: u32, height_px: u32) -> [u8; 22] {
    let mut block = [0u8; 22];
    block[2..4].copy_from_slice(&1u16.to_le_bytes()); // Type = icon
    block[4..6].copy_from_slice(&1u16.to_le_bytes()); // Count = 1
    block[6] = width_byte(width_px);
    block[7] = height_byte(height_px);
    block[10..12].copy_from_slice(&1u16.to_le_bytes()); // Planes
    block[12..14].copy_from_slice(&32u16.to_le_bytes()); // BitCount
    block[14..18].copy_from_slice(&png_size.to_le_bytes()); // BytesInRes
    block[18..22].copy_from_slice(&22u32.to_le_bytes()); // ImageOffset
    block
}

/// Emits the 256-byte overlay block: an MP4 box size at offset 0 that also
/// reads as a valid single-entry ICO directory starting at offset 4, with
/// `ImageOffset` pointing at the absolute file offset `png_offset_abs`.
///
/// See the [module docs](self) and [`crate::mp4`] for why this overlaps two
/// formats; the exact byte layout here must not change.
#[must_use]
pub fn build_overlay_header(png_size: u32, png_offset_abs: u32, width_px: u32, height_px: u32) -> [u8; 256] {
    let mut block = [0u8; 256];
    block[0..4].copy_from_slice(&256u32.to_be_bytes()); // also a valid MP4 box size
    block[4..6].copy_from_slice(&1u16.to_le_bytes()); // ICO count = 1
    block[6] = width_byte(width_px);
    block[7] = height_byte(height_px);
    block[10..12].copy_from_slice(&1u16.to_le_bytes()); // Planes
    block[12..14].copy_from_slice(&32u16.to_le_bytes()); // BitCount
    block[14..18].copy_from_slice(&png_size.to_le_bytes()); // BytesInRes
    block[18..22].copy_from_slice(&png_offset_abs.to_le_bytes()); // ImageOffset (absolute)
    block
}

#[inline]
fn width_byte(width_px: u32) -> u8 {
    if width_px >= 256 { 0 } else { (width_px & 0xFF) as u8 }
}

#[inline]
fn height_byte(height_px: u32) -> u8 {
    if height_px >= 256 { 0 } else { (height_px & 0xFF) as u8 }
}
