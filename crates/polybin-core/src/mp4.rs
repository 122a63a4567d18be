//! ISO-BMFF box parsing, the `moov`/`stco`/`co64` chunk-offset walk, and the
//! reheading operation that overlays an ICO directory on the first top-level
//! box.
//!
//! # Box format
//! Every ISO-BMFF box is `[size:u32 BE][type:4 bytes][payload...]`, with a
//! 64-bit extension when `size == 1` (the real size follows as a `u64 BE`
//! immediately after the type) and `size == 0` meaning "extends to end of
//! file".

use snafu::prelude::*;

use crate::data::{be_u32_at, be_u64_at, set_be_u32_at, set_be_u64_at};
use crate::ico;

/// Error conditions for reading or reheading an MP4 file.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// Thrown if there is no parseable box at offset 0, or its declared size is smaller than its
    /// own header.
    #[snafu(display("No parseable top-level box found in MP4 file"))]
    InvalidMp4,
}

pub type Result<T> = core::result::Result<T, Error>;

/// A single top-level or child ISO-BMFF box.
#[derive(Debug, Clone, Copy)]
pub struct Mp4Box {
    pub start_offset: usize,
    pub total_size: usize,
    pub kind: [u8; 4],
    pub header_size: usize,
}

/// Parses the box starting at `off`, returning `None` on any malformed input
/// (short buffer, header bigger than the declared size, or a size that runs
/// past the end of `buf`) rather than an error — callers treat absence as
/// "stop iterating", per spec.
#[must_use]
pub fn read_box(buf: &[u8], off: usize) -> Option<Mp4Box> {
    if off.checked_add(8)? > buf.len() {
        return None;
    }

    let mut size = be_u32_at(buf, off).ok()? as u64;
    let kind: [u8; 4] = buf[off + 4..off + 8].try_into().ok()?;
    let mut header_size = 8usize;

    if size == 1 {
        if off.checked_add(16)? > buf.len() {
            return None;
        }
        size = be_u64_at(buf, off + 8).ok()?;
        header_size = 16;
    } else if size == 0 {
        size = (buf.len() - off) as u64;
    }

    let total_size = usize::try_from(size).ok()?;
    if total_size < header_size || off.checked_add(total_size)? > buf.len() {
        return None;
    }

    Some(Mp4Box { start_offset: off, total_size, kind, header_size })
}

/// Containers whose descendants may themselves carry `stco`/`co64` tables.
const CONTAINERS: [&[u8; 4]; 5] = [b"moov", b"trak", b"mdia", b"minf", b"stbl"];

#[inline]
fn is_container(kind: &[u8; 4]) -> bool {
    CONTAINERS.contains(&kind)
}

/// Yields the immediate children of the container box at `parent_off`, in
/// order, stopping silently at the first malformed or out-of-bounds child.
fn iterate_children(buf: &[u8], parent_off: usize) -> Vec<Mp4Box> {
    let Some(parent) = read_box(buf, parent_off) else {
        return Vec::new();
    };

    let end = parent.start_offset + parent.total_size;
    let mut pos = parent.start_offset + parent.header_size;
    let mut children = Vec::new();

    while pos + 8 <= end {
        let Some(child) = read_box(buf, pos) else {
            break;
        };
        if child.start_offset + child.total_size > end {
            break;
        }
        pos = child.start_offset + child.total_size;
        children.push(child);
    }

    children
}

/// Walks top-level boxes from offset 0 and returns the first one whose type
/// matches `fourcc`.
#[must_use]
pub fn locate_top(buf: &[u8], fourcc: &[u8; 4]) -> Option<Mp4Box> {
    let mut pos = 0;
    loop {
        let candidate = read_box(buf, pos)?;
        if &candidate.kind == fourcc {
            return Some(candidate);
        }
        pos = candidate.start_offset + candidate.total_size;
    }
}

/// Recursively descends into `container_off` and shifts every `stco`/`co64`
/// chunk offset it finds by `delta`. Malformed tables stop that table's loop
/// at the first out-of-range index rather than failing the whole walk.
pub fn adjust_chunk_offsets(buf: &mut [u8], container_off: usize, delta: i64) {
    for child in iterate_children(buf, container_off) {
        if is_container(&child.kind) {
            adjust_chunk_offsets(buf, child.start_offset, delta);
            continue;
        }

        let base = child.start_offset + child.header_size;
        if &child.kind == b"stco" {
            adjust_stco(buf, base, delta);
        } else if &child.kind == b"co64" {
            adjust_co64(buf, base, delta);
        }
    }
}

/// Shifts every 32-bit chunk offset in an `stco` table by `delta`. `base`
/// points at the box's version/flags word; the entry count follows at
/// `base+4`, and the table of offsets starts at `base+8`.
fn adjust_stco(buf: &mut [u8], base: usize, delta: i64) {
    if base + 8 > buf.len() {
        log::debug!("stco box too short for its header at offset {base:#x}, skipping");
        return;
    }
    let Ok(count) = be_u32_at(buf, base + 4) else { return };

    let table = base + 8;
    for i in 0..count as usize {
        let entry_offset = table + i * 4;
        let Ok(value) = be_u32_at(buf, entry_offset) else {
            log::debug!("truncated stco table at entry {i}, stopping early");
            break;
        };
        let shifted = (i64::from(value) + delta).max(0) as u32;
        if set_be_u32_at(buf, entry_offset, shifted).is_err() {
            break;
        }
    }
}

/// Shifts every 64-bit chunk offset in a `co64` table by `delta`.
fn adjust_co64(buf: &mut [u8], base: usize, delta: i64) {
    if base + 8 > buf.len() {
        log::debug!("co64 box too short for its header at offset {base:#x}, skipping");
        return;
    }
    let Ok(count) = be_u32_at(buf, base + 4) else { return };

    let table = base + 8;
    for i in 0..count as usize {
        let entry_offset = table + i * 8;
        let Ok(value) = be_u64_at(buf, entry_offset) else {
            log::debug!("truncated co64 table at entry {i}, stopping early");
            break;
        };
        let shifted = (value as i64 + delta).max(0) as u64;
        if set_be_u64_at(buf, entry_offset, shifted).is_err() {
            break;
        }
    }
}

/// The synthesized `ftyp` box: major brand `isom`, minor version `0x200`,
/// compatible brands `isom iso2 avc1 mp41`. Exactly 32 bytes.
const FTYP: [u8; 32] = {
    let mut b = [0u8; 32];
    b[0] = 0;
    b[1] = 0;
    b[2] = 0;
    b[3] = 32;
    b[4] = b'f';
    b[5] = b't';
    b[6] = b'y';
    b[7] = b'p';
    b[8] = b'i';
    b[9] = b's';
    b[10] = b'o';
    b[11] = b'm';
    b[12] = 0;
    b[13] = 0;
    b[14] = 2;
    b[15] = 0;
    b[16] = b'i';
    b[17] = b's';
    b[18] = b'o';
    b[19] = b'm';
    b[20] = b'i';
    b[21] = b's';
    b[22] = b'o';
    b[23] = b'2';
    b[24] = b'a';
    b[25] = b'v';
    b[26] = b'c';
    b[27] = b'1';
    b[28] = b'm';
    b[29] = b'p';
    b[30] = b'4';
    b[31] = b'1';
    b
};

/// Replaces the MP4's first top-level box with `[256-byte overlay][32-byte
/// ftyp][rest of file]`, then shifts every `stco`/`co64` chunk offset inside
/// `moov` by the resulting delta.
///
/// # Errors
/// Returns [`InvalidMp4`](Error::InvalidMp4) if there is no parseable box at
/// offset 0.
pub fn rehead_with_overlay(
    mp4_bytes: &[u8],
    png_size: u32,
    png_dimensions: (u32, u32),
    png_offset_abs: u32,
) -> Result<Vec<u8>> {
    let first_box = read_box(mp4_bytes, 0).context(InvalidMp4Snafu)?;
    let orig_first_size = first_box.total_size;

    let overlay = ico::build_overlay_header(png_size, png_offset_abs, png_dimensions.0, png_dimensions.1);

    let mut new_mp4 = Vec::with_capacity(overlay.len() + FTYP.len() + mp4_bytes.len() - orig_first_size);
    new_mp4.extend_from_slice(&overlay);
    new_mp4.extend_from_slice(&FTYP);
    new_mp4.extend_from_slice(&mp4_bytes[orig_first_size..]);

    let delta = (overlay.len() + FTYP.len()) as i64 - orig_first_size as i64;

    if let Some(moov) = locate_top(&new_mp4, b"moov") {
        adjust_chunk_offsets(&mut new_mp4, moov.start_offset, delta);
    } else {
        log::warn!("no moov box found after reheading; sample offsets left untouched");
    }

    Ok(new_mp4)
}

/// Size the reheaded MP4 will occupy, computable before the PNG's final
/// absolute offset is known (the overlay+ftyp replace the first box
/// one-for-one, independent of where the PNG ends up).
#[must_use]
pub fn reheaded_size(mp4_bytes: &[u8], orig_first_size: usize) -> usize {
    256 + 32 + (mp4_bytes.len() - orig_first_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_box(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&((8 + payload.len()) as u32).to_be_bytes());
        out.extend_from_slice(kind);
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn read_box_handles_extended_size() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_be_bytes());
        buf.extend_from_slice(b"mdat");
        buf.extend_from_slice(&24u64.to_be_bytes());
        buf.extend_from_slice(&[0u8; 8]);

        let b = read_box(&buf, 0).unwrap();
        assert_eq!(b.header_size, 16);
        assert_eq!(b.total_size, 24);
        assert_eq!(&b.kind, b"mdat");
    }

    #[test]
    fn read_box_rejects_truncated_header() {
        assert!(read_box(&[0, 0, 0, 8, b'f'], 0).is_none());
    }

    #[test]
    fn locate_top_finds_moov_after_ftyp() {
        let ftyp = make_box(b"ftyp", b"isom");
        let moov = make_box(b"moov", b"");
        let mut buf = ftyp.clone();
        buf.extend_from_slice(&moov);

        let found = locate_top(&buf, b"moov").unwrap();
        assert_eq!(found.start_offset, ftyp.len());
    }

    #[test]
    fn adjust_chunk_offsets_shifts_stco_entries() {
        let mut stco_payload = vec![0u8; 4]; // version/flags
        stco_payload.extend_from_slice(&2u32.to_be_bytes()); // count
        stco_payload.extend_from_slice(&100u32.to_be_bytes());
        stco_payload.extend_from_slice(&200u32.to_be_bytes());
        let stco = make_box(b"stco", &stco_payload);

        let stbl = make_box(b"stbl", &stco);
        let minf = make_box(b"minf", &stbl);
        let mdia = make_box(b"mdia", &minf);
        let trak = make_box(b"trak", &mdia);
        let moov = make_box(b"moov", &trak);

        let mut buf = moov.clone();
        adjust_chunk_offsets(&mut buf, 0, 50);

        // Walk down to the stco payload to check both entries shifted.
        let stco_offset = buf.len() - stco.len();
        let table = stco_offset + 8 + 4;
        assert_eq!(be_u32_at(&buf, table).unwrap(), 150);
        assert_eq!(be_u32_at(&buf, table + 4).unwrap(), 250);
    }

    #[test]
    fn rehead_replaces_first_box_and_shifts_offsets() {
        let mut stco_payload = vec![0u8; 4];
        stco_payload.extend_from_slice(&1u32.to_be_bytes());
        stco_payload.extend_from_slice(&40u32.to_be_bytes()); // points right after ftyp(32)+8=40
        let stco = make_box(b"stco", &stco_payload);
        let stbl = make_box(b"stbl", &stco);
        let minf = make_box(b"minf", &stbl);
        let mdia = make_box(b"mdia", &minf);
        let trak = make_box(b"trak", &mdia);
        let moov = make_box(b"moov", &trak);

        let orig_ftyp = make_box(b"ftyp", b"isom");
        let mut mp4 = orig_ftyp.clone();
        mp4.extend_from_slice(&moov);
        mp4.extend_from_slice(b"mediadatahere");

        let reheaded = rehead_with_overlay(&mp4, 1000, (32, 32), 9999).unwrap();

        assert_eq!(&reheaded[256..256 + 4], b"ftyp");
        let new_moov = locate_top(&reheaded, b"moov").unwrap();
        assert_eq!(new_moov.start_offset, 256 + 32);

        let delta = (256 + 32) as i64 - orig_ftyp.len() as i64;
        let stco_offset = new_moov.start_offset + new_moov.total_size - stco.len();
        let table = stco_offset + 8 + 4;
        assert_eq!(be_u32_at(&reheaded, table).unwrap() as i64, 40 + delta);
    }
}
