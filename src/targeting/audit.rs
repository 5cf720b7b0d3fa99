//! Fire attempt audit trail.
//!
//! Every attempt, fired or not, is kept in a bounded in-memory ring. When a
//! path is configured the attempts are also appended to a JSON-lines file in
//! which each record carries the hash of its predecessor, so removing or
//! editing a line breaks the chain.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use super::interlock::{InterlockResult, RejectReason};

pub const GENESIS_HASH: [u8; 32] = [0u8; 32];
pub const DEFAULT_RECENT_EVENTS: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum FireOutcome {
    Fired,
    Rejected { reason: RejectReason },
    ActuationFailed { error: String },
}

impl FireOutcome {
    pub fn fired(&self) -> bool {
        matches!(self, Self::Fired)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FireEvent {
    pub timestamp_ms: u64,
    pub track_id: u64,
    pub confidence: f32,
    pub distance_m: f32,
    pub velocity_ms: f32,
    pub outcome: FireOutcome,
    pub checklist: Vec<InterlockResult>,
}

/// Hash of a chain entry: `sha256(prev_hash || payload)`.
pub fn hash_entry(prev_hash: &[u8; 32], payload: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash);
    hasher.update(payload);
    hasher.finalize().into()
}

/// One line of the on-disk log.
#[derive(Serialize, Deserialize)]
struct ChainRecord {
    seq: u64,
    prev_hash: String,
    entry_hash: String,
    event: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainSummary {
    pub entries: u64,
    pub head: [u8; 32],
}

/// Walk a fire log and check every link.
pub fn verify_chain(path: &Path) -> Result<ChainSummary> {
    let file = File::open(path).with_context(|| format!("open fire log {}", path.display()))?;
    let mut prev = GENESIS_HASH;
    let mut entries = 0u64;
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line_no = index + 1;
        let line = line.with_context(|| format!("read line {line_no}"))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: ChainRecord = serde_json::from_str(&line)
            .with_context(|| format!("line {line_no}: malformed record"))?;
        if record.seq != entries {
            return Err(anyhow!(
                "line {line_no}: sequence {} where {entries} was expected",
                record.seq
            ));
        }
        if record.prev_hash != hex::encode(prev) {
            return Err(anyhow!("line {line_no}: previous hash does not match chain"));
        }
        let payload = serde_json::to_vec(&record.event)?;
        let expected = hash_entry(&prev, &payload);
        if record.entry_hash != hex::encode(expected) {
            return Err(anyhow!("line {line_no}: entry hash mismatch"));
        }
        prev = expected;
        entries += 1;
    }
    Ok(ChainSummary {
        entries,
        head: prev,
    })
}

/// Append target for the chain. Truncation rolls back a torn write.
trait ChainFile: Write + Send {
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl ChainFile for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

struct ChainWriter {
    path: PathBuf,
    file: Box<dyn ChainFile>,
    /// Length of the file up to the last complete record.
    len: u64,
    head: [u8; 32],
    seq: u64,
    /// Set once a torn write could not be rolled back. No further writes.
    broken: bool,
}

impl ChainWriter {
    fn open(path: &Path) -> Result<Self> {
        let summary = if path.exists() {
            verify_chain(path)
                .with_context(|| format!("refusing to extend fire log {}", path.display()))?
        } else {
            ChainSummary {
                entries: 0,
                head: GENESIS_HASH,
            }
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open fire log {}", path.display()))?;
        let len = file
            .metadata()
            .with_context(|| format!("stat fire log {}", path.display()))?
            .len();
        Ok(Self {
            path: path.to_path_buf(),
            file: Box::new(file),
            len,
            head: summary.head,
            seq: summary.entries,
            broken: false,
        })
    }

    fn append(&mut self, event: &FireEvent) -> Result<()> {
        if self.broken {
            return Err(anyhow!("writes disabled after an unrecoverable failure"));
        }
        let event = serde_json::to_value(event)?;
        let payload = serde_json::to_vec(&event)?;
        let entry_hash = hash_entry(&self.head, &payload);
        let record = ChainRecord {
            seq: self.seq,
            prev_hash: hex::encode(self.head),
            entry_hash: hex::encode(entry_hash),
            event,
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        if let Err(e) = self.file.write_all(&line).and_then(|()| self.file.flush()) {
            self.roll_back();
            return Err(e).context("append record");
        }
        self.len += line.len() as u64;
        self.head = entry_hash;
        self.seq += 1;
        Ok(())
    }

    /// Cut the file back to the last complete record.
    fn roll_back(&mut self) {
        if let Err(e) = self.file.truncate(self.len) {
            log::error!(
                "fire log {}: cannot remove partial record ({e}); further writes disabled",
                self.path.display()
            );
            self.broken = true;
        }
    }
}

pub struct FireLog {
    recent: VecDeque<FireEvent>,
    capacity: usize,
    writer: Option<ChainWriter>,
    write_failures: u64,
}

impl FireLog {
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            recent: VecDeque::with_capacity(capacity.min(DEFAULT_RECENT_EVENTS)),
            capacity: capacity.max(1),
            writer: None,
            write_failures: 0,
        }
    }

    /// Ring plus an append-only chain file. An existing file is verified
    /// first and extended from its head.
    pub fn with_file(path: &Path, capacity: usize) -> Result<Self> {
        let writer = ChainWriter::open(path)?;
        log::info!(
            "fire log {} opened at entry {}",
            writer.path.display(),
            writer.seq
        );
        Ok(Self {
            writer: Some(writer),
            ..Self::in_memory(capacity)
        })
    }

    pub fn append(&mut self, event: FireEvent) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.append(&event) {
                self.write_failures += 1;
                log::error!("fire log {} write failed: {e:#}", writer.path.display());
            }
        }
        if self.recent.len() == self.capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(event);
    }

    pub fn last(&self) -> Option<&FireEvent> {
        self.recent.back()
    }

    pub fn events(&self) -> impl Iterator<Item = &FireEvent> {
        self.recent.iter()
    }

    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }

    /// Attempts that reached the ring but not the chain file.
    pub fn write_failures(&self) -> u64 {
        self.write_failures
    }

    /// False once the chain file can no longer be extended.
    pub fn is_writable(&self) -> bool {
        self.writer.as_ref().map_or(true, |w| !w.broken)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
