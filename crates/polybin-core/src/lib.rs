//! Binary layout planner and format-surgery engine behind `polybin`.
//!
//! Builds polyglot files that are simultaneously valid under two or more of
//! ICO, MP4, and ZIP. Consumes already-extracted PNG bytes (via [`ico`]) and
//! already-merged ZIP bytes (via [`zip`]); never decodes pixels or deflates
//! streams beyond what those thin wrappers do.

pub mod data;
pub mod ico;
pub mod layout;
pub mod mp4;
pub mod zip;

use std::path::Path;

use snafu::prelude::*;

use layout::{Inputs, LayoutMode};

/// Errors that can abort a [`build`] call. All are fatal; none are retried internally.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Input path does not exist: {}", path.display()))]
    NotFound { path: std::path::PathBuf },
    #[snafu(display("At least two inputs are required, unless multiple --zip paths are given"))]
    InsufficientInputs,
    #[snafu(display("ICO error: {source}"))]
    Ico { source: ico::Error },
    #[snafu(display("MP4 error: {source}"))]
    Mp4 { source: mp4::Error },
    #[snafu(display("ZIP error: {source}"))]
    Zip { source: zip::Error },
    #[snafu(display("Filesystem error: {source}"))]
    IoError { source: std::io::Error },
}

pub type Result<T> = core::result::Result<T, Error>;

impl From<ico::Error> for Error {
    #[inline]
    fn from(source: ico::Error) -> Self {
        Self::Ico { source }
    }
}

impl From<mp4::Error> for Error {
    #[inline]
    fn from(source: mp4::Error) -> Self {
        Self::Mp4 { source }
    }
}

impl From<zip::Error> for Error {
    #[inline]
    fn from(source: zip::Error) -> Self {
        Self::Zip { source }
    }
}

impl From<std::io::Error> for Error {
    #[inline]
    fn from(source: std::io::Error) -> Self {
        Self::IoError { source }
    }
}

/// Builds a polyglot file at `output_path` from whichever of `ico_path`,
/// `mp4_path`, and `zip_paths` are given.
///
/// Validation: any provided path that is missing on disk fails with
/// [`Error::NotFound`]. Multiple `zip_paths` alone satisfy the "at least two
/// inputs" rule (merging archives is itself a legitimate single-format job);
/// otherwise at least two of `{ico, mp4, zip}` must be present, or the call
/// fails with [`Error::InsufficientInputs`].
///
/// # Errors
/// See [`Error`] for the full set of failure kinds.
pub fn build<P: AsRef<Path>>(
    output_path: P,
    ico_path: Option<&Path>,
    mp4_path: Option<&Path>,
    zip_paths: &[impl AsRef<Path>],
) -> Result<()> {
    for path in ico_path.into_iter().chain(mp4_path).chain(zip_paths.iter().map(AsRef::as_ref)) {
        ensure!(path.exists(), NotFoundSnafu { path: path.to_path_buf() });
    }

    let present_count =
        usize::from(ico_path.is_some()) + usize::from(mp4_path.is_some()) + usize::from(!zip_paths.is_empty());
    ensure!(zip_paths.len() > 1 || present_count >= 2, InsufficientInputsSnafu);

    let ico_png = ico_path.map(|path| read_ico(path)).transpose()?;
    let mp4_bytes = mp4_path.map(std::fs::read).transpose()?;
    let zip_merged = if zip_paths.is_empty() { None } else { Some(zip::merge_archives(zip_paths)?) };

    let mode = LayoutMode::select(ico_png.is_some(), mp4_bytes.is_some(), zip_merged.is_some())
        .expect("input validation above guarantees at least one of ico/mp4/zip is present");

    log::debug!("selected layout mode {mode:?}");

    let output = layout::assemble(mode, Inputs { ico_png, mp4_bytes, zip_merged })?;

    std::fs::write(output_path, output)?;
    Ok(())
}

fn read_ico(path: &Path) -> Result<ico::PngImage> {
    let bytes = std::fs::read(path)?;
    Ok(ico::extract_best_frame(&bytes)?)
}
