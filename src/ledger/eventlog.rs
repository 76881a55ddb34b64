//! Append-only JSONL ledger log: paths, durable appends, replay.

use crate::core::error::{DeployError, Result};
use crate::core::types::{LedgerEvent, LedgerRecord};
use chrono::Utc;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Generate a run ID.
pub fn generate_run_id() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
    format!("r-{:012x}", nanos & 0xFFFF_FFFF_FFFF)
}

/// Derive the ledger path for a campaign.
pub fn ledger_path(state_dir: &Path, campaign: &str) -> PathBuf {
    state_dir.join(campaign).join("ledger.jsonl")
}

/// Stamp an event with the current time.
pub fn stamp(event: LedgerEvent) -> LedgerRecord {
    LedgerRecord {
        ts: Utc::now(),
        event,
    }
}

/// Append one record and flush it to stable storage before returning.
/// The record and its newline go out in a single write.
pub fn append_record(path: &Path, record: &LedgerRecord) -> Result<()> {
    let io_err = |source| DeployError::LedgerIo {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let mut line = serde_json::to_vec(record).map_err(|e| io_err(std::io::Error::other(e)))?;
    line.push(b'\n');

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_err)?;
    file.write_all(&line).map_err(io_err)?;
    file.sync_data().map_err(io_err)?;
    Ok(())
}

/// Records read back from a ledger file.
#[derive(Debug, Default)]
pub struct ReplayedLog {
    /// Records paired with their 1-based line number
    pub records: Vec<(usize, LedgerRecord)>,
    /// Byte length of the intact prefix when the last line was torn
    pub torn_at: Option<u64>,
    /// The last record is complete but its newline never reached the disk
    pub unterminated: bool,
}

/// Read every record in order. An unterminated final chunk that fails to
/// parse is a torn append from a crash and is reported, not fatal. Lines are
/// parsed as bytes so a torn multi-byte character cannot fail the read.
pub fn read_records(path: &Path) -> Result<ReplayedLog> {
    let content = std::fs::read(path).map_err(|source| DeployError::LedgerIo {
        path: path.to_path_buf(),
        source,
    })?;

    let mut log = ReplayedLog::default();
    let mut offset = 0usize;
    let mut line_no = 0usize;
    while offset < content.len() {
        line_no += 1;
        let line_start = offset;
        let rest = &content[offset..];
        let (line, terminated) = match rest.iter().position(|&b| b == b'\n') {
            Some(n) => (&rest[..n], true),
            None => (rest, false),
        };
        offset += line.len() + usize::from(terminated);

        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<LedgerRecord>(line) {
            Ok(record) => {
                log.records.push((line_no, record));
                log.unterminated = !terminated;
            }
            Err(_) if !terminated => log.torn_at = Some(line_start as u64),
            Err(e) => {
                return Err(DeployError::LedgerCorrupt {
                    path: path.to_path_buf(),
                    line: line_no,
                    detail: e.to_string(),
                })
            }
        }
    }
    Ok(log)
}

/// Drop a torn tail so the next append starts on a fresh line.
pub fn truncate_torn(path: &Path, len: u64) -> Result<()> {
    let io_err = |source| DeployError::LedgerIo {
        path: path.to_path_buf(),
        source,
    };
    let file = std::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(io_err)?;
    file.set_len(len).map_err(io_err)?;
    file.sync_data().map_err(io_err)
}

/// Finish a complete final record whose newline was lost.
pub fn terminate_line(path: &Path) -> Result<()> {
    let io_err = |source| DeployError::LedgerIo {
        path: path.to_path_buf(),
        source,
    };
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(io_err)?;
    file.write_all(b"\n").map_err(io_err)?;
    file.sync_data().map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(run: &str) -> LedgerRecord {
        stamp(LedgerEvent::CampaignStarted {
            campaign: "c".to_string(),
            run_id: run.to_string(),
            chainplan_version: "0.1.0".to_string(),
        })
    }

    #[test]
    fn test_eventlog_generate_run_id() {
        let id = generate_run_id();
        assert!(id.starts_with("r-"));
        assert_eq!(id.len(), 14);
    }

    #[test]
    fn test_eventlog_ledger_path() {
        let p = ledger_path(Path::new("/state"), "fixed-yield");
        assert_eq!(p, PathBuf::from("/state/fixed-yield/ledger.jsonl"));
    }

    #[test]
    fn test_eventlog_append_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = ledger_path(dir.path(), "c");
        append_record(&path, &started("r-1")).unwrap();
        append_record(&path, &started("r-2")).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("campaign_started"));
        assert_eq!(content.lines().count(), 2);

        let log = read_records(&path).unwrap();
        assert_eq!(log.records.len(), 2);
        assert_eq!(log.records[1].0, 2);
        assert!(log.torn_at.is_none());
    }

    #[test]
    fn test_eventlog_torn_tail_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = ledger_path(dir.path(), "c");
        append_record(&path, &started("r-1")).unwrap();
        let intact = std::fs::metadata(&path).unwrap().len();
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        write!(f, "{{\"ts\":\"2026-").unwrap();
        drop(f);

        let log = read_records(&path).unwrap();
        assert_eq!(log.records.len(), 1);
        assert_eq!(log.torn_at, Some(intact));

        truncate_torn(&path, intact).unwrap();
        append_record(&path, &started("r-2")).unwrap();
        assert_eq!(read_records(&path).unwrap().records.len(), 2);
    }

    #[test]
    fn test_eventlog_append_is_newline_terminated() {
        let dir = tempfile::tempdir().unwrap();
        let path = ledger_path(dir.path(), "c");
        append_record(&path, &started("r-1")).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));
        assert_eq!(bytes.iter().filter(|&&b| b == b'\n').count(), 1);
    }

    #[test]
    fn test_eventlog_unterminated_complete_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = ledger_path(dir.path(), "c");
        append_record(&path, &started("r-1")).unwrap();
        let json = serde_json::to_string(&started("r-2")).unwrap();
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        write!(f, "{}", json).unwrap();
        drop(f);

        let log = read_records(&path).unwrap();
        assert_eq!(log.records.len(), 2);
        assert!(log.unterminated);
        assert!(log.torn_at.is_none());

        terminate_line(&path).unwrap();
        append_record(&path, &started("r-3")).unwrap();
        let log = read_records(&path).unwrap();
        assert_eq!(log.records.len(), 3);
        assert!(!log.unterminated);
    }

    #[test]
    fn test_eventlog_torn_multibyte_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = ledger_path(dir.path(), "c");
        append_record(&path, &started("r-1")).unwrap();
        let intact = std::fs::metadata(&path).unwrap().len();
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{\"ts\":\"2026\",\"error\":\"caf\xC3").unwrap();
        drop(f);

        let log = read_records(&path).unwrap();
        assert_eq!(log.records.len(), 1);
        assert_eq!(log.torn_at, Some(intact));
    }

    #[test]
    fn test_eventlog_corrupt_middle_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = ledger_path(dir.path(), "c");
        append_record(&path, &started("r-1")).unwrap();
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "not json").unwrap();
        drop(f);
        append_record(&path, &started("r-2")).unwrap();

        match read_records(&path).unwrap_err() {
            DeployError::LedgerCorrupt { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_eventlog_read_missing_file() {
        let err = read_records(Path::new("/nonexistent/ledger.jsonl")).unwrap_err();
        assert!(matches!(err, DeployError::LedgerIo { .. }));
    }
}
