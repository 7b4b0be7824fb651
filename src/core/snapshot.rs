use std::{
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::core::{block::BlockHeader, utxo::UtxoSet};

const HEADERS_FILE: &str = "headers.dat";
const UNSPENT_FILE: &str = "unspent.dat";

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to encode snapshot: {0}")]
    Encode(String),

    #[error("Failed to decode snapshot: {0}")]
    Decode(String),
}

/// Serialize the header list for persistence. Kept separate from the write
/// so callers can encode under the state lock and write after releasing it.
pub fn encode_headers(headers: &[BlockHeader]) -> Result<Vec<u8>, SnapshotError> {
    bincode::encode_to_vec(headers.to_vec(), bincode::config::standard())
        .map_err(|e| SnapshotError::Encode(e.to_string()))
}

/// Serialize the unspent set for persistence
pub fn encode_unspent(utxos: &UtxoSet) -> Result<Vec<u8>, SnapshotError> {
    bincode::encode_to_vec(utxos, bincode::config::standard())
        .map_err(|e| SnapshotError::Encode(e.to_string()))
}

/// Best effort persistence of the header list and the unspent set. Files are
/// overwritten in place; a torn write is recovered by re-syncing from peers.
pub struct SnapshotStore {
    folder: PathBuf,
}

impl SnapshotStore {
    pub fn new(folder: &Path) -> Result<SnapshotStore, SnapshotError> {
        fs::create_dir_all(folder)?;

        Ok(SnapshotStore {
            folder: folder.to_path_buf(),
        })
    }

    pub fn write_headers(&self, buf: &[u8]) -> Result<(), SnapshotError> {
        fs::write(self.folder.join(HEADERS_FILE), buf)?;
        Ok(())
    }

    pub fn write_unspent(&self, buf: &[u8]) -> Result<(), SnapshotError> {
        fs::write(self.folder.join(UNSPENT_FILE), buf)?;
        Ok(())
    }

    /// Stored header list, or None when no snapshot exists yet
    pub fn load_headers(&self) -> Result<Option<Vec<BlockHeader>>, SnapshotError> {
        let path = self.folder.join(HEADERS_FILE);
        if !path.exists() {
            return Ok(None);
        }

        let raw = fs::read(path)?;
        let (headers, _) = bincode::decode_from_slice(&raw, bincode::config::standard())
            .map_err(|e| SnapshotError::Decode(e.to_string()))?;

        Ok(Some(headers))
    }

    /// Stored unspent set, or None when no snapshot exists yet
    pub fn load_unspent(&self) -> Result<Option<UtxoSet>, SnapshotError> {
        let path = self.folder.join(UNSPENT_FILE);
        if !path.exists() {
            return Ok(None);
        }

        let raw = fs::read(path)?;
        let (utxos, _) = bincode::decode_from_slice(&raw, bincode::config::standard())
            .map_err(|e| SnapshotError::Decode(e.to_string()))?;

        Ok(Some(utxos))
    }
}
