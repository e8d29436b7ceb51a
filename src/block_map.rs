//! Persisted block-map cache.
//!
//! Discovery and per-block attribute queries dominate startup time on a
//! large DSP configuration. The block map file captures the discovered
//! topology keyed by device identity, so the next session can skip both —
//! but only when nothing that defines that identity has moved: hostname,
//! the sorted alias set, and the library version must all match exactly.
//! Any mismatch discards the cache wholesale and discovery runs again.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::block::InitHelper;

/// Required extension for block map files.
const BLOCK_MAP_EXTENSION: &str = "bmap";

// ---------------------------------------------------------------------------
// File format
// ---------------------------------------------------------------------------

/// One block in the map: its discovered type plus the versioned attribute
/// helper exported by the block in a prior session (absent right after
/// discovery).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockEntry {
    #[serde(rename = "type")]
    pub block_type: String,
    pub attributes: Option<InitHelper>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BlockMapFile {
    hostname: String,
    aliases: Vec<String>,
    blocks: BTreeMap<String, BlockEntry>,
    library_version: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum BlockMapError {
    #[error("block map IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("block map JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("hostname mismatch (cache '{cached}', device '{live}')")]
    HostnameMismatch { cached: String, live: String },
    #[error("alias set mismatch")]
    AliasesMismatch,
    #[error("library version mismatch (cache '{cached}', running '{running}')")]
    VersionMismatch { cached: String, running: String },
    #[error("no active block map to save")]
    NoActiveMap,
    #[error("output path must not be empty")]
    EmptyPath,
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load a block map file and validate it against the live device identity.
pub(crate) fn load_block_map(
    path: &Path,
    hostname: &str,
    aliases: &[String],
    library_version: &str,
) -> Result<BTreeMap<String, BlockEntry>, BlockMapError> {
    let text = std::fs::read_to_string(path)?;
    let file: BlockMapFile = serde_json::from_str(&text)?;

    if file.hostname != hostname {
        return Err(BlockMapError::HostnameMismatch {
            cached: file.hostname,
            live: hostname.to_owned(),
        });
    }
    if file.aliases != sorted(aliases) {
        return Err(BlockMapError::AliasesMismatch);
    }
    if file.library_version != library_version {
        return Err(BlockMapError::VersionMismatch {
            cached: file.library_version,
            running: library_version.to_owned(),
        });
    }

    info!(path = %path.display(), blocks = file.blocks.len(), "block map loaded");
    Ok(file.blocks)
}

/// Persist the current block map. The output name always ends in `.bmap`
/// (appended when missing); the final path is returned.
pub(crate) fn save_block_map(
    path: &Path,
    hostname: &str,
    aliases: &[String],
    blocks: &BTreeMap<String, BlockEntry>,
    library_version: &str,
) -> Result<PathBuf, BlockMapError> {
    if path.as_os_str().is_empty() {
        return Err(BlockMapError::EmptyPath);
    }
    if blocks.is_empty() {
        return Err(BlockMapError::NoActiveMap);
    }

    let path = if path.extension().and_then(|e| e.to_str()) == Some(BLOCK_MAP_EXTENSION) {
        path.to_path_buf()
    } else {
        let mut name = path.as_os_str().to_owned();
        name.push(".");
        name.push(BLOCK_MAP_EXTENSION);
        PathBuf::from(name)
    };

    let file = BlockMapFile {
        hostname: hostname.to_owned(),
        aliases: sorted(aliases),
        blocks: blocks.clone(),
        library_version: library_version.to_owned(),
    };
    std::fs::write(&path, serde_json::to_string_pretty(&file)?)?;
    info!(path = %path.display(), "block map saved");
    Ok(path)
}

fn sorted(aliases: &[String]) -> Vec<String> {
    let mut out = aliases.to_vec();
    out.sort();
    out
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
