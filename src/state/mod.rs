// src/state/mod.rs

//! Iteration state storage.
//!
//! The state blob is opaque to the compiler. What it does define is how a
//! blob is keyed, `(concurrency key, loop, invocation id)`, and how it is
//! wrapped so that `hydrate` can tell a missing blob from a damaged one:
//!
//! ```text
//! "LDST" | version: u8 | iteration: u32 LE | blake3(payload): 32 bytes | len: u64 LE | payload
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, info};

use crate::errors::{LoopdagError, Result};

/// Relative path (from the store root) of the state directory.
pub const STATE_DIR_PATH: &str = ".loopdag/state";

const MAGIC: &[u8; 4] = b"LDST";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 4 + 1 + 4 + 32 + 8;

/// Result of a download: a missing object is not the same as an empty one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateDownload {
    NotFound,
    Found(Vec<u8>),
}

/// Abstract storage for iteration state blobs.
pub trait StateStore: Send + Sync {
    fn upload(&mut self, key: &str, invocation: &str, blob: &[u8]) -> anyhow::Result<()>;
    fn download(&self, key: &str, invocation: &str) -> anyhow::Result<StateDownload>;
}

/// Decoded state blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEnvelope {
    /// Counter of the invocation that wrote the blob.
    pub iteration: u32,
    pub payload: Vec<u8>,
}

impl StateEnvelope {
    pub fn new(iteration: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            iteration,
            payload: payload.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(MAGIC);
        out.push(VERSION);
        out.extend_from_slice(&self.iteration.to_le_bytes());
        out.extend_from_slice(blake3::hash(&self.payload).as_bytes());
        out.extend_from_slice(&(self.payload.len() as u64).to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decode a blob, returning a human-readable reason on failure.
    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, String> {
        if bytes.len() < HEADER_LEN {
            return Err(format!(
                "blob is {} bytes, shorter than the {HEADER_LEN}-byte header",
                bytes.len()
            ));
        }
        let (header, payload) = bytes.split_at(HEADER_LEN);
        if &header[0..4] != MAGIC {
            return Err("bad magic".to_string());
        }
        if header[4] != VERSION {
            return Err(format!("unsupported version {}", header[4]));
        }

        let mut iteration = [0u8; 4];
        iteration.copy_from_slice(&header[5..9]);
        let mut checksum = [0u8; 32];
        checksum.copy_from_slice(&header[9..41]);
        let mut len = [0u8; 8];
        len.copy_from_slice(&header[41..49]);

        if u64::from_le_bytes(len) != payload.len() as u64 {
            return Err(format!(
                "payload length mismatch (header says {}, found {})",
                u64::from_le_bytes(len),
                payload.len()
            ));
        }
        if blake3::hash(payload).as_bytes() != &checksum {
            return Err("checksum mismatch".to_string());
        }

        Ok(Self {
            iteration: u32::from_le_bytes(iteration),
            payload: payload.to_vec(),
        })
    }
}

/// Store key for one loop's state under a concurrency key.
///
/// Loop names never contain `/`, so the last segment always identifies the
/// loop even when the concurrency key itself contains slashes.
pub fn object_key(key: &str, loop_name: &str) -> String {
    format!("{key}/{loop_name}")
}

/// Write the state for `(key, invocation)`. This is what `decide` does on
/// every invocation, whatever it decided.
pub fn persist(
    store: &mut dyn StateStore,
    key: &str,
    invocation: &str,
    envelope: &StateEnvelope,
) -> Result<()> {
    store.upload(key, invocation, &envelope.encode())?;
    Ok(())
}

/// Read the state a previous invocation persisted. This is what `hydrate`
/// does on every invocation after the first.
///
/// A missing blob or one that fails to decode is an error; there is no
/// fallback to empty state, since that would hide a lost iteration.
pub fn hydrate(store: &dyn StateStore, key: &str, previous_invocation: &str) -> Result<StateEnvelope> {
    match store.download(key, previous_invocation)? {
        StateDownload::NotFound => Err(LoopdagError::StateNotFound {
            key: key.to_string(),
            invocation: previous_invocation.to_string(),
        }),
        StateDownload::Found(bytes) => {
            StateEnvelope::decode(&bytes).map_err(|reason| LoopdagError::StateCorrupted {
                key: key.to_string(),
                invocation: previous_invocation.to_string(),
                reason,
            })
        }
    }
}

/// Stores blobs in memory only.
#[derive(Debug, Default, Clone)]
pub struct MemoryStateStore {
    map: HashMap<(String, String), Vec<u8>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Overwrite a stored blob in place. Used to simulate corruption.
    pub fn tamper(&mut self, key: &str, invocation: &str, f: impl FnOnce(&mut Vec<u8>)) -> bool {
        match self.map.get_mut(&(key.to_string(), invocation.to_string())) {
            Some(blob) => {
                f(blob);
                true
            }
            None => false,
        }
    }
}

impl StateStore for MemoryStateStore {
    fn upload(&mut self, key: &str, invocation: &str, blob: &[u8]) -> anyhow::Result<()> {
        self.map
            .insert((key.to_string(), invocation.to_string()), blob.to_vec());
        debug!(key, invocation, bytes = blob.len(), "stored iteration state (memory)");
        Ok(())
    }

    fn download(&self, key: &str, invocation: &str) -> anyhow::Result<StateDownload> {
        Ok(self
            .map
            .get(&(key.to_string(), invocation.to_string()))
            .map(|b| StateDownload::Found(b.clone()))
            .unwrap_or(StateDownload::NotFound))
    }
}

/// Stores blobs under `<root>/.loopdag/state/`.
///
/// Keys may contain arbitrary text (runtime expressions, slashes), so both
/// path components are blake3 digests:
/// `<root>/.loopdag/state/<blake3(key)>/<blake3(invocation)>.bin`.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, key: &str, invocation: &str) -> PathBuf {
        let key_dir = blake3::hash(key.as_bytes()).to_hex();
        let file = blake3::hash(invocation.as_bytes()).to_hex();
        self.root
            .join(STATE_DIR_PATH)
            .join(key_dir.as_str())
            .join(format!("{}.bin", file.as_str()))
    }
}

impl StateStore for FileStateStore {
    fn upload(&mut self, key: &str, invocation: &str, blob: &[u8]) -> anyhow::Result<()> {
        let path = self.blob_path(key, invocation);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating state directory at {:?}", parent))?;
        }

        // Write then rename so a reader never sees a half-written blob.
        let tmp = path.with_extension("bin.tmp");
        fs::write(&tmp, blob).with_context(|| format!("writing state blob {:?}", tmp))?;
        fs::rename(&tmp, &path).with_context(|| format!("renaming state blob to {:?}", path))?;

        info!(key, invocation, bytes = blob.len(), "stored iteration state (file)");
        Ok(())
    }

    fn download(&self, key: &str, invocation: &str) -> anyhow::Result<StateDownload> {
        let path = self.blob_path(key, invocation);
        if !path.exists() {
            return Ok(StateDownload::NotFound);
        }
        let bytes = fs::read(&path).with_context(|| format!("reading state blob {:?}", path))?;
        Ok(StateDownload::Found(bytes))
    }
}
