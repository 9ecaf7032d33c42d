//! Staging of local images into the server's input directory.
//!
//! Any image a graph references must already exist in the ComfyUI
//! `input/` directory under its original filename. Staging copies a
//! source file there, skipping copies that are already up to date.

use std::path::{Path, PathBuf};

/// Errors while staging an input file.
#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("Input file not found: {0}")]
    MissingSource(PathBuf),

    #[error("Input file has no usable filename: {0}")]
    BadFilename(PathBuf),

    #[error("Failed to stage input: {0}")]
    Io(#[from] std::io::Error),
}

/// Copy `src` into `input_dir` under its own filename and return that
/// filename.
///
/// The copy is skipped when the staged file already exists and is at
/// least as new as the source.
pub async fn stage_input(src: &Path, input_dir: &Path) -> Result<String, StagingError> {
    if !tokio::fs::try_exists(src).await? {
        return Err(StagingError::MissingSource(src.to_path_buf()));
    }
    let filename = src
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| StagingError::BadFilename(src.to_path_buf()))?
        .to_string();

    let dest = input_dir.join(&filename);
    if is_up_to_date(src, &dest).await? {
        tracing::debug!(%filename, "Input already staged");
        return Ok(filename);
    }

    tokio::fs::create_dir_all(input_dir).await?;
    tokio::fs::copy(src, &dest).await?;
    tracing::info!(%filename, input_dir = %input_dir.display(), "Staged input");
    Ok(filename)
}

/// Whether `dest` exists and is at least as new as `src`.
async fn is_up_to_date(src: &Path, dest: &Path) -> Result<bool, std::io::Error> {
    if !tokio::fs::try_exists(dest).await? {
        return Ok(false);
    }
    let src_mtime = tokio::fs::metadata(src).await?.modified()?;
    let dest_mtime = tokio::fs::metadata(dest).await?.modified()?;
    Ok(dest_mtime >= src_mtime)
}
