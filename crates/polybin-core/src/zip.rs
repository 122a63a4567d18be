//! ZIP merging (a thin wrapper over the `zip` crate) and the prepend patcher
//! that keeps a ZIP's central directory self-consistent after the archive is
//! relocated by an arbitrary byte delta.

use std::collections::BTreeMap;
use std::io::{Cursor as IoCursor, Read, Write};
use std::path::Path;

use snafu::prelude::*;

use crate::data::{self, le_u16_at, le_u32_at, le_u64_at, set_le_u32_at, set_le_u64_at};

/// Error conditions for reading, merging, or patching ZIP archives.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Filesystem error: {source}"))]
    Io { source: std::io::Error },
    #[snafu(display("Unable to read ZIP archive: {source}"))]
    ZipRead { source: ::zip::result::ZipError },
    #[snafu(display("Unable to write merged ZIP archive: {source}"))]
    ZipWrite { source: ::zip::result::ZipError },
    /// Thrown if the End-of-Central-Directory record can't be found in the scan window.
    #[snafu(display("End-of-Central-Directory record not found in ZIP archive"))]
    InvalidZip,
    #[snafu(display("Unexpected end-of-file encountered while patching ZIP offsets"))]
    EndOfFile,
}

pub type Result<T> = core::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    #[inline]
    fn from(source: std::io::Error) -> Self {
        Self::Io { source }
    }
}

impl From<data::Error> for Error {
    #[inline]
    fn from(_error: data::Error) -> Self {
        Self::EndOfFile
    }
}

/// Decompresses entries from each input ZIP in order, last-write-wins on name
/// collisions, and re-emits them into a fresh, standalone ZIP (DEFLATE,
/// beginning at byte 0).
pub fn merge_archives<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<u8>> {
    let mut store: BTreeMap<String, Vec<u8>> = BTreeMap::new();

    for path in paths {
        let file = std::fs::File::open(path)?;
        let mut archive = ::zip::ZipArchive::new(file).context(ZipReadSnafu)?;
        for index in 0..archive.len() {
            let mut entry = archive.by_index(index).context(ZipReadSnafu)?;
            let name = entry.name().to_string();
            let mut payload = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut payload)?;
            store.insert(name, payload);
        }
    }

    let mut out = IoCursor::new(Vec::new());
    {
        let mut writer = ::zip::ZipWriter::new(&mut out);
        let options = ::zip::write::FileOptions::default().compression_method(::zip::CompressionMethod::Deflated);
        for (name, payload) in &store {
            writer.start_file(name, options).context(ZipWriteSnafu)?;
            writer.write_all(payload)?;
        }
        writer.finish().context(ZipWriteSnafu)?;
    }

    Ok(out.into_inner())
}

const EOCD_SIG: u32 = 0x0605_4B50;
const CD_FILE_SIG: u32 = 0x0201_4B50;
const ZIP64_EOCD_LOCATOR_SIG: u32 = 0x0706_4B50;
const ZIP64_EXTRA_ID: u16 = 0x0001;
const ZIP64_SENTINEL: u32 = 0xFFFF_FFFF;
const EOCD_SCAN_WINDOW: usize = 66_000;

/// Searches backward in the last `min(len, 66_000)` bytes for the EOCD
/// signature and returns its absolute offset, or `None` if not found.
fn find_eocd_offset(buf: &[u8]) -> Option<usize> {
    let scan_start = buf.len().saturating_sub(EOCD_SCAN_WINDOW);
    let window = &buf[scan_start..];
    let signature = EOCD_SIG.to_le_bytes();

    window
        .windows(4)
        .rposition(|candidate| candidate == signature)
        .map(|relative| scan_start + relative)
}

/// Shifts every central-directory "relative offset of local header", the
/// EOCD CD offset, the Zip64 EOCD CD offset, and the Zip64 EOCD locator
/// offset by `delta`, so the archive stays self-consistent when placed at
/// byte `delta` of a larger file.
///
/// # Errors
/// Returns [`InvalidZip`](Error::InvalidZip) if no EOCD record is found.
pub fn patch_for_prepend(zip_bytes: &[u8], delta: u64) -> Result<Vec<u8>> {
    let mut buf = zip_bytes.to_vec();
    let eocd_off = find_eocd_offset(&buf).context(InvalidZipSnafu)?;

    let cd_offset = le_u32_at(&buf, eocd_off + 16)?;

    let locator_off = eocd_off.checked_sub(20);
    let has_zip64 = locator_off
        .map(|off| le_u32_at(&buf, off).map(|sig| sig == ZIP64_EOCD_LOCATOR_SIG).unwrap_or(false))
        .unwrap_or(false);

    if has_zip64 {
        let locator_off = locator_off.unwrap();
        let old_zip64_eocd_off = le_u64_at(&buf, locator_off + 8)?;
        let new_zip64_eocd_off = old_zip64_eocd_off + delta;
        set_le_u64_at(&mut buf, locator_off + 8, new_zip64_eocd_off)?;

        let zip64_eocd_off = old_zip64_eocd_off as usize;
        if zip64_eocd_off + 56 <= buf.len() {
            let old_cd64 = le_u64_at(&buf, zip64_eocd_off + 48)?;
            set_le_u64_at(&mut buf, zip64_eocd_off + 48, old_cd64 + delta)?;
        } else {
            log::warn!("Zip64 EOCD record offset out of bounds; leaving CD offset untouched");
        }
    }

    set_le_u32_at(&mut buf, eocd_off + 16, (u64::from(cd_offset) + delta) as u32)?;

    walk_and_patch_central_directory(&mut buf, cd_offset as usize, eocd_off, delta);

    Ok(buf)
}

/// Walks central-directory entries starting at `cd_offset`, stopping at
/// `eocd_off`, patching each entry's relative local-header offset (or its
/// Zip64 extra field, for the `0xFFFFFFFF` sentinel case). Stops cleanly at
/// the first entry that doesn't carry the central-directory signature.
fn walk_and_patch_central_directory(buf: &mut [u8], cd_offset: usize, eocd_off: usize, delta: u64) {
    let mut pos = cd_offset;

    while pos + 46 <= eocd_off {
        match le_u32_at(buf, pos) {
            Ok(sig) if sig == CD_FILE_SIG => {}
            _ => {
                log::debug!("central directory walk stopped at offset {pos:#x}: not a valid entry");
                break;
            }
        }

        let Ok(filename_len) = le_u16_at(buf, pos + 28) else { break };
        let Ok(extra_len) = le_u16_at(buf, pos + 30) else { break };
        let Ok(comment_len) = le_u16_at(buf, pos + 32) else { break };
        let Ok(rel_off) = le_u32_at(buf, pos + 42) else { break };

        if rel_off != ZIP64_SENTINEL {
            if set_le_u32_at(buf, pos + 42, (u64::from(rel_off) + delta) as u32).is_err() {
                break;
            }
        } else {
            patch_zip64_extra(buf, pos + 46 + filename_len as usize, extra_len as usize, delta);
        }

        pos += 46 + filename_len as usize + extra_len as usize + comment_len as usize;
    }
}

/// Scans the extra-field region `[extra_off, extra_off+extra_len)` for a
/// Zip64 extra (header id `0x0001`) and adds `delta` to every consecutive
/// `u64` slot inside it. Duplicate Zip64 extras aren't valid in a single
/// entry, so the first one found is patched and the scan stops.
fn patch_zip64_extra(buf: &mut [u8], extra_off: usize, extra_len: usize, delta: u64) {
    let end_extra = extra_off + extra_len;
    let mut p = extra_off;

    while p + 4 <= end_extra {
        let Ok(header_id) = le_u16_at(buf, p) else { return };
        let Ok(data_len) = le_u16_at(buf, p + 2) else { return };
        let data_start = p + 4;
        let data_end = data_start + data_len as usize;
        if data_end > end_extra {
            return;
        }

        if header_id == ZIP64_EXTRA_ID && data_len >= 8 {
            let mut q = data_start;
            while q + 8 <= data_end {
                if let Ok(value) = le_u64_at(buf, q) {
                    let _ = set_le_u64_at(buf, q, value + delta);
                }
                q += 8;
            }
            return;
        }

        p = data_end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn build_test_zip() -> Vec<u8> {
        let mut out = IoCursor::new(Vec::new());
        let mut writer = ::zip::ZipWriter::new(&mut out);
        let options = ::zip::write::FileOptions::default().compression_method(::zip::CompressionMethod::Deflated);
        writer.start_file("hello.txt", options).unwrap();
        writer.write_all(b"hello world").unwrap();
        writer.start_file("dir/nested.txt", options).unwrap();
        writer.write_all(b"nested contents").unwrap();
        writer.finish().unwrap();
        out.into_inner()
    }

    #[test]
    fn find_eocd_locates_signature() {
        let zip = build_test_zip();
        let off = find_eocd_offset(&zip).unwrap();
        assert_eq!(le_u32_at(&zip, off).unwrap(), EOCD_SIG);
    }

    #[test]
    fn patching_by_zero_is_idempotent() {
        let zip = build_test_zip();
        let patched = patch_for_prepend(&zip, 0).unwrap();
        assert_eq!(zip, patched);
    }

    #[test]
    fn patch_shifts_local_header_offsets_and_cd_offset() {
        let zip = build_test_zip();
        let eocd_off = find_eocd_offset(&zip).unwrap();
        let cd_offset = le_u32_at(&zip, eocd_off + 16).unwrap();

        let delta = 1000u64;
        let patched = patch_for_prepend(&zip, delta).unwrap();

        let new_eocd_off = find_eocd_offset(&patched).unwrap();
        assert_eq!(new_eocd_off, eocd_off);
        let new_cd_offset = le_u32_at(&patched, new_eocd_off + 16).unwrap();
        assert_eq!(new_cd_offset as u64, cd_offset as u64 + delta);

        // First central-directory entry's local header offset should have shifted too.
        let first_rel_off = le_u32_at(&patched, cd_offset as usize + 42).unwrap();
        assert_eq!(first_rel_off, delta as u32);
    }

    /// Hand-builds a minimal Zip64 archive: one stored entry whose central
    /// directory record carries the `0xFFFFFFFF` relative-offset sentinel and
    /// a matching Zip64 extra field, followed by a Zip64 EOCD record, a Zip64
    /// EOCD locator, and a plain EOCD. The `zip` crate's own writer only
    /// emits these structures once an archive crosses the 4 GiB / 65535-entry
    /// thresholds, so there's no way to get one out of it for a unit test.
    fn build_zip64_test_zip() -> Vec<u8> {
        let mut out = Vec::new();

        // Local file header + data for "x.txt" at offset 0.
        let local_header_off = out.len() as u64;
        out.extend_from_slice(&0x0403_4B50u32.to_le_bytes());
        out.extend_from_slice(&20u16.to_le_bytes()); // version needed
        out.extend_from_slice(&0u16.to_le_bytes()); // flags
        out.extend_from_slice(&0u16.to_le_bytes()); // method: stored
        out.extend_from_slice(&0u16.to_le_bytes()); // mod time
        out.extend_from_slice(&0u16.to_le_bytes()); // mod date
        out.extend_from_slice(&0u32.to_le_bytes()); // crc32
        out.extend_from_slice(&2u32.to_le_bytes()); // compressed size
        out.extend_from_slice(&2u32.to_le_bytes()); // uncompressed size
        out.extend_from_slice(&5u16.to_le_bytes()); // filename length
        out.extend_from_slice(&0u16.to_le_bytes()); // extra length
        out.extend_from_slice(b"x.txt");
        out.extend_from_slice(b"hi");

        // Central directory entry: relative offset is the Zip64 sentinel,
        // the real value lives in the Zip64 extra field below.
        let cd_off = out.len() as u64;
        out.extend_from_slice(&CD_FILE_SIG.to_le_bytes());
        out.extend_from_slice(&45u16.to_le_bytes()); // version made by
        out.extend_from_slice(&45u16.to_le_bytes()); // version needed
        out.extend_from_slice(&0u16.to_le_bytes()); // flags
        out.extend_from_slice(&0u16.to_le_bytes()); // method
        out.extend_from_slice(&0u16.to_le_bytes()); // mod time
        out.extend_from_slice(&0u16.to_le_bytes()); // mod date
        out.extend_from_slice(&0u32.to_le_bytes()); // crc32
        out.extend_from_slice(&2u32.to_le_bytes()); // compressed size
        out.extend_from_slice(&2u32.to_le_bytes()); // uncompressed size
        out.extend_from_slice(&5u16.to_le_bytes()); // filename length
        out.extend_from_slice(&12u16.to_le_bytes()); // extra length: one Zip64 extra
        out.extend_from_slice(&0u16.to_le_bytes()); // comment length
        out.extend_from_slice(&0u16.to_le_bytes()); // disk number start
        out.extend_from_slice(&0u16.to_le_bytes()); // internal attributes
        out.extend_from_slice(&0u32.to_le_bytes()); // external attributes
        out.extend_from_slice(&ZIP64_SENTINEL.to_le_bytes()); // relative offset of local header
        out.extend_from_slice(b"x.txt");
        out.extend_from_slice(&ZIP64_EXTRA_ID.to_le_bytes()); // extra header id
        out.extend_from_slice(&8u16.to_le_bytes()); // extra data size
        out.extend_from_slice(&local_header_off.to_le_bytes()); // real relative offset

        let cd_size = out.len() as u64 - cd_off;

        // Zip64 end of central directory record.
        let zip64_eocd_off = out.len() as u64;
        out.extend_from_slice(&0x0606_4B50u32.to_le_bytes());
        out.extend_from_slice(&44u64.to_le_bytes()); // size of this record, after this field
        out.extend_from_slice(&45u16.to_le_bytes()); // version made by
        out.extend_from_slice(&45u16.to_le_bytes()); // version needed
        out.extend_from_slice(&0u32.to_le_bytes()); // disk number
        out.extend_from_slice(&0u32.to_le_bytes()); // disk with start of cd
        out.extend_from_slice(&1u64.to_le_bytes()); // entries on this disk
        out.extend_from_slice(&1u64.to_le_bytes()); // total entries
        out.extend_from_slice(&cd_size.to_le_bytes()); // size of central directory
        out.extend_from_slice(&cd_off.to_le_bytes()); // offset of start of central directory

        // Zip64 end of central directory locator.
        out.extend_from_slice(&ZIP64_EOCD_LOCATOR_SIG.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // disk with start of zip64 eocd
        out.extend_from_slice(&zip64_eocd_off.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes()); // total disks

        // Plain end of central directory record.
        out.extend_from_slice(&EOCD_SIG.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // disk number
        out.extend_from_slice(&0u16.to_le_bytes()); // disk with start of cd
        out.extend_from_slice(&1u16.to_le_bytes()); // entries on this disk
        out.extend_from_slice(&1u16.to_le_bytes()); // total entries
        out.extend_from_slice(&(cd_size as u32).to_le_bytes()); // size of cd
        out.extend_from_slice(&(cd_off as u32).to_le_bytes()); // offset of start of cd
        out.extend_from_slice(&0u16.to_le_bytes()); // comment length

        out
    }

    #[test]
    fn patches_zip64_locator_eocd_and_extra_field_offset() {
        let zip = build_zip64_test_zip();
        let eocd_off = find_eocd_offset(&zip).unwrap();
        let cd_off = le_u32_at(&zip, eocd_off + 16).unwrap() as u64;
        let locator_off = eocd_off - 20;
        let zip64_eocd_off = le_u64_at(&zip, locator_off + 8).unwrap();

        let delta = 1000u64;
        let patched = patch_for_prepend(&zip, delta).unwrap();

        // Plain EOCD's CD offset shifted.
        assert_eq!(le_u32_at(&patched, eocd_off + 16).unwrap() as u64, cd_off + delta);

        // Zip64 EOCD locator's pointer to the Zip64 EOCD record shifted.
        assert_eq!(le_u64_at(&patched, locator_off + 8).unwrap(), zip64_eocd_off + delta);

        // Zip64 EOCD record's own CD offset field shifted.
        assert_eq!(le_u64_at(&patched, zip64_eocd_off as usize + 48).unwrap(), cd_off + delta);

        // The central directory entry's relative offset is still the sentinel...
        let cd_entry_rel_off = le_u32_at(&patched, cd_off as usize + 42).unwrap();
        assert_eq!(cd_entry_rel_off, ZIP64_SENTINEL);

        // ...and the real offset, in its Zip64 extra field, shifted instead.
        let filename_len = le_u16_at(&patched, cd_off as usize + 28).unwrap() as u64;
        let extra_off = cd_off + 46 + filename_len;
        let patched_local_header_off = le_u64_at(&patched, extra_off as usize + 4).unwrap();
        assert_eq!(patched_local_header_off, delta);
    }

    #[test]
    fn merge_last_write_wins() {
        let dir = std::env::temp_dir().join(format!("polybin-zip-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let path_a = dir.join("a.zip");
        let path_b = dir.join("b.zip");

        for (path, contents) in [(&path_a, b"AAA" as &[u8]), (&path_b, b"BBB")] {
            let mut out = IoCursor::new(Vec::new());
            let mut writer = ::zip::ZipWriter::new(&mut out);
            let options = ::zip::write::FileOptions::default().compression_method(::zip::CompressionMethod::Deflated);
            writer.start_file("shared.txt", options).unwrap();
            writer.write_all(contents).unwrap();
            writer.finish().unwrap();
            std::fs::write(path, out.into_inner()).unwrap();
        }

        let merged = merge_archives(&[path_a, path_b]).unwrap();
        let mut archive = ::zip::ZipArchive::new(IoCursor::new(merged)).unwrap();
        let mut file = archive.by_name("shared.txt").unwrap();
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"BBB");

        std::fs::remove_dir_all(&dir).ok();
    }
}
