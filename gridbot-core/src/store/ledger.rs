//! Append-only trade-ledger dedup index (`trade_ledger.jsonl`).
//!
//! Gives at-most-once trade application across restarts without unbounded
//! growth: keys are loaded into memory on startup, new keys are appended,
//! and the file is rewritten (atomic replace) once the in-memory set grows
//! past `max_entries`.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::error::StoreError;

const DEFAULT_MAX_ENTRIES: usize = 100_000;
const DEFAULT_RETAIN_FLOOR: usize = 50_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerLine {
    key: String,
    seen_at: i64,
}

pub struct TradeLedger {
    path: PathBuf,
    max_entries: usize,
    retain_floor: usize,
    index: HashMap<String, i64>,
    order: VecDeque<String>,
}

impl TradeLedger {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::open_with_limits(path, DEFAULT_MAX_ENTRIES, DEFAULT_RETAIN_FLOOR)
    }

    pub fn open_with_limits(
        path: impl Into<PathBuf>,
        max_entries: usize,
        retain_floor: usize,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let mut index = HashMap::new();
        let mut order = VecDeque::new();

        if path.exists() {
            let f = OpenOptions::new().read(true).open(&path)?;
            for line in BufReader::new(f).lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                if let Ok(rec) = serde_json::from_str::<LedgerLine>(&line) {
                    if !index.contains_key(&rec.key) {
                        order.push_back(rec.key.clone());
                    }
                    index.insert(rec.key, rec.seen_at);
                }
            }
        }

        Ok(Self { path, max_entries, retain_floor, index, order })
    }

    pub fn has(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn record(&mut self, key: &str, seen_at: i64) -> Result<(), StoreError> {
        if self.index.contains_key(key) {
            return Ok(());
        }
        self.append_line(key, seen_at)?;
        self.index.insert(key.to_string(), seen_at);
        self.order.push_back(key.to_string());

        if self.index.len() > self.max_entries {
            self.trim()?;
        }
        Ok(())
    }

    fn append_line(&self, key: &str, seen_at: i64) -> Result<(), StoreError> {
        let mut f = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let line = serde_json::to_string(&LedgerLine { key: key.to_string(), seen_at })?;
        writeln!(f, "{line}")?;
        f.sync_all()?;
        Ok(())
    }

    /// Drops the oldest entries down to `retain_floor` and rewrites the file
    /// via the same tmp+rename discipline the snapshot files use.
    fn trim(&mut self) -> Result<(), StoreError> {
        while self.order.len() > self.retain_floor {
            if let Some(oldest) = self.order.pop_front() {
                self.index.remove(&oldest);
            }
        }
        let lines: Vec<LedgerLine> = self
            .order
            .iter()
            .filter_map(|k| self.index.get(k).map(|&seen_at| LedgerLine { key: k.clone(), seen_at }))
            .collect();
        write_ledger_atomic(&self.path, &lines)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }
}

fn write_ledger_atomic(path: &Path, lines: &[LedgerLine]) -> Result<(), StoreError> {
    // Reuse the snapshot atomic-write helper by serializing the whole file
    // body ourselves and writing it through a tmp file in the same dir.
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp_path = dir.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("trade_ledger.jsonl")
    ));
    let mut body = String::new();
    for line in lines {
        body.push_str(&serde_json::to_string(line)?);
        body.push('\n');
    }
    std::fs::write(&tmp_path, body.as_bytes())?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_checks_membership() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trade_ledger.jsonl");
        let mut ledger = TradeLedger::open(&path).unwrap();

        assert!(!ledger.has("order:1|trade:1"));
        ledger.record("order:1|trade:1", 100).unwrap();
        assert!(ledger.has("order:1|trade:1"));
    }

    #[test]
    fn reload_from_disk_preserves_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trade_ledger.jsonl");
        {
            let mut ledger = TradeLedger::open(&path).unwrap();
            ledger.record("order:1|trade:1", 100).unwrap();
            ledger.record("order:2|trade:2", 101).unwrap();
        }
        let ledger = TradeLedger::open(&path).unwrap();
        assert_eq!(ledger.len(), 2);
        assert!(ledger.has("order:1|trade:1"));
        assert!(ledger.has("order:2|trade:2"));
    }

    #[test]
    fn trims_to_retain_floor_once_over_max() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trade_ledger.jsonl");
        let mut ledger = TradeLedger::open_with_limits(&path, 4, 2).unwrap();
        for i in 0..5 {
            ledger.record(&format!("order:{i}|trade:{i}"), i as i64).unwrap();
        }
        assert_eq!(ledger.len(), 2);
        assert!(ledger.has("order:4|trade:4"));
        assert!(!ledger.has("order:0|trade:0"));
    }
}
