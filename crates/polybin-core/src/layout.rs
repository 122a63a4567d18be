//! The byte-layout planner: given which inputs are present, picks one of
//! four concatenation orders and drives the MP4 reheader / ZIP patcher with
//! the deltas each order implies.

use crate::{ico, mp4, zip};

/// Which of the four supported byte layouts a build resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutMode {
    /// `mp4_part ++ zip_patched? ++ png`
    OverlayMp4First,
    /// `mp4 ++ zip_patched?`
    Mp4First,
    /// `ico_22 ++ png ++ zip_patched?`
    IcoFirst,
    /// `zip_merged`
    ZipOnly,
}

impl LayoutMode {
    /// Chooses a mode from input presence, per the precondition table.
    #[must_use]
    pub fn select(want_ico: bool, want_mp4: bool, want_zip: bool) -> Option<Self> {
        match (want_ico, want_mp4, want_zip) {
            (true, true, _) => Some(Self::OverlayMp4First),
            (false, true, _) => Some(Self::Mp4First),
            (true, false, _) => Some(Self::IcoFirst),
            (false, false, true) => Some(Self::ZipOnly),
            (false, false, false) => None,
        }
    }
}

/// Already-available canonical byte streams the planner assembles into a
/// final layout. `zip_merged` is `None` when no ZIP input was given.
pub struct Inputs {
    pub ico_png: Option<ico::PngImage>,
    pub mp4_bytes: Option<Vec<u8>>,
    pub zip_merged: Option<Vec<u8>>,
}

/// Assembles the final output buffer for `mode` from `inputs`.
///
/// # Errors
/// Propagates [`mp4::Error`] from reheading or [`zip::Error`] from patching.
pub fn assemble(mode: LayoutMode, inputs: Inputs) -> Result<Vec<u8>, super::Error> {
    match mode {
        LayoutMode::OverlayMp4First => assemble_overlay_mp4_first(inputs),
        LayoutMode::Mp4First => assemble_mp4_first(inputs),
        LayoutMode::IcoFirst => assemble_ico_first(inputs),
        LayoutMode::ZipOnly => Ok(inputs.zip_merged.unwrap_or_default()),
    }
}

fn assemble_overlay_mp4_first(inputs: Inputs) -> Result<Vec<u8>, super::Error> {
    let mp4_bytes = inputs.mp4_bytes.expect("OverlayMp4First requires mp4 input");
    let png = inputs.ico_png.expect("OverlayMp4First requires ico input");

    let first_box = mp4::read_box(&mp4_bytes, 0).ok_or(mp4::Error::InvalidMp4)?;
    let mp4_part_size = mp4::reheaded_size(&mp4_bytes, first_box.total_size);

    let zip_patched = match inputs.zip_merged {
        Some(merged) => Some(zip::patch_for_prepend(&merged, mp4_part_size as u64)?),
        None => None,
    };
    let zip_len = zip_patched.as_ref().map_or(0, Vec::len);

    let png_offset_abs = (mp4_part_size + zip_len) as u32;
    let mp4_part = mp4::rehead_with_overlay(
        &mp4_bytes,
        png.bytes.len() as u32,
        (png.width_px, png.height_px),
        png_offset_abs,
    )?;
    debug_assert_eq!(mp4_part.len(), mp4_part_size);

    let mut out = Vec::with_capacity(mp4_part.len() + zip_len + png.bytes.len());
    out.extend_from_slice(&mp4_part);
    if let Some(zip_patched) = &zip_patched {
        out.extend_from_slice(zip_patched);
    }
    out.extend_from_slice(&png.bytes);

    Ok(out)
}

fn assemble_mp4_first(inputs: Inputs) -> Result<Vec<u8>, super::Error> {
    let mp4_bytes = inputs.mp4_bytes.expect("Mp4First requires mp4 input");

    let mut out = mp4_bytes.clone();
    if let Some(merged) = inputs.zip_merged {
        let patched = zip::patch_for_prepend(&merged, mp4_bytes.len() as u64)?;
        out.extend_from_slice(&patched);
    }

    Ok(out)
}

fn assemble_ico_first(inputs: Inputs) -> Result<Vec<u8>, super::Error> {
    let png = inputs.ico_png.expect("IcoFirst requires ico input");
    let header = ico::build_plain_header(png.bytes.len() as u32, png.width_px, png.height_px);

    let mut out = Vec::with_capacity(header.len() + png.bytes.len());
    out.extend_from_slice(&header);
    out.extend_from_slice(&png.bytes);

    if let Some(merged) = inputs.zip_merged {
        let delta = (header.len() + png.bytes.len()) as u64;
        let patched = zip::patch_for_prepend(&merged, delta)?;
        out.extend_from_slice(&patched);
    }

    Ok(out)
}
