// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Write-ahead log for durable storage

use kw_core::Operation;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur in WAL operations
#[derive(Debug, Error)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error at entry {line}: {error}")]
    Json {
        line: usize,
        #[source]
        error: serde_json::Error,
    },
    #[error("JSON error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] crate::snapshot::SnapshotError),
}

/// Write-ahead log for durable operation storage
pub struct Wal {
    file: File,
    sequence: u64,
    /// Entries in the file since it was last truncated
    entries: u64,
}

impl Wal {
    /// Open or create a WAL at the given path
    pub fn open(path: &Path) -> Result<Self, WalError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?;

        // Drop a torn final entry so new appends start on their own line
        let contents = std::fs::read(path)?;
        let complete = contents
            .iter()
            .rposition(|b| *b == b'\n')
            .map_or(0, |i| i + 1);
        if complete < contents.len() {
            tracing::warn!(
                bytes = contents.len() - complete,
                "truncating torn trailing WAL entry"
            );
            file.set_len(complete as u64)?;
        }

        let lines: Vec<&[u8]> = contents[..complete]
            .split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .collect();
        let entries = lines.len() as u64;
        // Sequence numbers run on across truncation
        let sequence = lines
            .last()
            .and_then(|line| serde_json::from_slice::<WalEntry>(line).ok())
            .map_or(entries, |entry| entry.seq.max(entries));

        Ok(Self {
            file,
            sequence,
            entries,
        })
    }

    /// Append an operation to the log
    pub fn append(&mut self, op: &Operation) -> Result<u64, WalError> {
        let entry = WalEntry {
            seq: self.sequence + 1,
            op: op.clone(),
        };
        let line = serde_json::to_string(&entry)?;
        writeln!(self.file, "{}", line)?;
        self.file.sync_all()?;
        self.sequence += 1;
        self.entries += 1;
        Ok(self.sequence)
    }

    /// Get the current sequence number
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Entries written since the log was last truncated
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Never let the sequence fall behind a snapshot already taken
    pub fn advance_to(&mut self, sequence: u64) {
        self.sequence = self.sequence.max(sequence);
    }

    /// Drop every entry; the sequence keeps counting
    pub fn truncate(&mut self) -> Result<(), WalError> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        self.entries = 0;
        Ok(())
    }

    /// Replay all operations from the log
    ///
    /// A final line that fails to parse is a write torn by a crash and is
    /// dropped; a bad line anywhere else is corruption.
    pub fn replay(path: &Path) -> Result<Vec<Operation>, WalError> {
        Self::replay_after(path, 0)
    }

    /// Replay the operations sequenced after `after`
    ///
    /// Entries a snapshot already covers are skipped, so a crash between
    /// writing the snapshot and truncating the log applies nothing twice.
    pub fn replay_after(path: &Path, after: u64) -> Result<Vec<Operation>, WalError> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let lines: Vec<String> = BufReader::new(file)
            .lines()
            .collect::<Result<_, _>>()?;
        let last = lines.iter().rposition(|l| !l.is_empty());
        let mut ops = Vec::new();

        for (index, line) in lines.iter().enumerate() {
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<WalEntry>(line) {
                Ok(entry) if entry.seq > after => ops.push(entry.op),
                Ok(_) => {}
                Err(error) if Some(index) == last => {
                    tracing::warn!(line = index + 1, %error, "dropping torn trailing WAL entry");
                }
                Err(error) => {
                    return Err(WalError::Json {
                        line: index + 1,
                        error,
                    })
                }
            }
        }

        Ok(ops)
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct WalEntry {
    seq: u64,
    op: Operation,
}

#[cfg(test)]
#[path = "wal_tests.rs"]
mod tests;
