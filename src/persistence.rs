//! Versioned save files.
//!
//! A save is `{"version": 1, "data": <SimulationState>}` serialized as JSON and
//! zlib compressed. Files on disk hold the raw compressed bytes; exports wrap
//! them in standard Base64 so players can paste them around.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::SaveError;
use crate::state::SimulationState;

pub const SAVE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SaveGameData {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub data: Option<SimulationState>,
}

fn encode(state: &SimulationState) -> Result<Vec<u8>, SaveError> {
    let json = serde_json::to_vec(&SaveGameData {
        version: SAVE_VERSION,
        data: Some(state.clone()),
    })?;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

fn decode(bytes: &[u8]) -> Result<SimulationState, SaveError> {
    if bytes.is_empty() {
        return Err(SaveError::Empty);
    }
    let mut json = Vec::new();
    ZlibDecoder::new(bytes)
        .read_to_end(&mut json)
        .map_err(SaveError::Decompress)?;
    let save: SaveGameData = serde_json::from_slice(&json)?;
    let (version, Some(data)) = (save.version, save.data) else {
        return Err(SaveError::MissingData);
    };
    if version == 0 {
        return Err(SaveError::MissingData);
    }
    upgrade_save(data, version)
}

/// Brings a save written by an older version up to date.
fn upgrade_save(data: SimulationState, version: u32) -> Result<SimulationState, SaveError> {
    if version == SAVE_VERSION {
        return Ok(data);
    }
    Err(SaveError::UnsupportedVersion {
        found: version,
        current: SAVE_VERSION,
    })
}

pub fn export_save(state: &SimulationState) -> Result<String, SaveError> {
    Ok(STANDARD.encode(encode(state)?))
}

/// Decodes an exported save. Does not touch any live state.
pub fn import_save(text: &str) -> Result<SimulationState, SaveError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(SaveError::Empty);
    }
    decode(&STANDARD.decode(text)?)
}

/// Save slot backed by a single file.
#[derive(Clone, Debug)]
pub struct SaveStore {
    path: PathBuf,
}

impl SaveStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, state: &SimulationState) -> Result<(), SaveError> {
        let bytes = encode(state)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Returns `Ok(None)` when no save exists yet.
    pub fn load(&self) -> Result<Option<SimulationState>, SaveError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => decode(&bytes).map(Some),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn hard_reset(&self) -> Result<(), SaveError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!("[scriptidle save] Deleted {}", self.path.display());
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
