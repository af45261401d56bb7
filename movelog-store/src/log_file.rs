//! Append-only row log.
//!
//! Every accepted batch is rendered into one buffer and written with a single
//! `write_all` while holding the writer lock, so rows from concurrent requests
//! never interleave and each request's rows stay contiguous and in order.
//!
//! If a write fails part-way, the file is cut back to its length before the
//! batch so a half-written line never prefixes the next batch. The file is
//! never truncated below that point and never rotated.

use movelog_core::config::LogConfig;
use movelog_core::row::RowBatch;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

// ── Configuration ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LogFileConfig {
    /// Log file path, e.g. `game_log.csv`.
    pub path: PathBuf,
    /// `sync_data` after every batch.
    pub sync_writes: bool,
}

impl Default for LogFileConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("game_log.csv"),
            sync_writes: false,
        }
    }
}

impl From<&LogConfig> for LogFileConfig {
    fn from(cfg: &LogConfig) -> Self {
        Self {
            path: cfg.path.clone(),
            sync_writes: cfg.sync_writes,
        }
    }
}

/// Counters since the file was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogFileStats {
    pub rows_written: u64,
    pub bytes_written: u64,
}

// ── Writer ───────────────────────────────────────────────────────────────────

/// The shared append-only log file.
///
/// `None` inside the mutex means the file has been closed; later appends fail.
pub struct LogFile {
    config: LogFileConfig,
    inner: Mutex<Option<WriterState>>,
}

struct WriterState {
    file: File,
    /// File length as of the last successful batch.
    current_size: u64,
    stats: LogFileStats,
}

impl LogFile {
    /// Open (or create) the log file for appending.
    pub fn open(config: LogFileConfig) -> io::Result<Self> {
        if let Some(parent) = config.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.path)?;

        let current_size = file.metadata()?.len();

        info!(
            path = %config.path.display(),
            size_bytes = current_size,
            "Log file opened for append"
        );

        Ok(Self {
            config,
            inner: Mutex::new(Some(WriterState {
                file,
                current_size,
                stats: LogFileStats::default(),
            })),
        })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Append every row of `batch`. Returns the number of rows written.
    pub fn append(&self, batch: &RowBatch) -> io::Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        let buf = batch.render();

        let mut guard = self.lock()?;
        let state = guard
            .as_mut()
            .ok_or_else(|| io::Error::other("log file is closed"))?;

        if let Err(e) = write_batch(&mut state.file, &buf, self.config.sync_writes) {
            state.roll_back(&self.config.path);
            return Err(e);
        }

        state.current_size += buf.len() as u64;
        state.stats.rows_written += batch.len() as u64;
        state.stats.bytes_written += buf.len() as u64;
        debug!(rows = batch.len(), bytes = buf.len(), "Batch appended");
        Ok(batch.len())
    }

    pub fn stats(&self) -> LogFileStats {
        match self.inner.lock() {
            Ok(guard) => guard.as_ref().map(|s| s.stats).unwrap_or_default(),
            Err(_) => LogFileStats::default(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().map(|g| g.is_none()).unwrap_or(true)
    }

    /// Flush and fsync, then release the handle. Idempotent.
    pub fn close(&self) -> io::Result<()> {
        let mut guard = self.lock()?;
        let Some(mut state) = guard.take() else {
            return Ok(());
        };
        state.file.flush()?;
        state.file.sync_all()?;
        info!(
            path = %self.config.path.display(),
            rows = state.stats.rows_written,
            bytes = state.stats.bytes_written,
            "Log file closed"
        );
        Ok(())
    }

    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, Option<WriterState>>> {
        self.inner
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))
    }
}

impl WriterState {
    /// Cut the file back to the last committed length. If that fails the
    /// partial bytes stay, and the committed length moves past them so a
    /// later rollback never cuts into rows that were already acknowledged.
    fn roll_back(&mut self, path: &Path) {
        let Err(e) = self.file.set_len(self.current_size) else {
            return;
        };
        warn!(error = %e, path = %path.display(), "Failed to roll back partial batch");
        match self.file.metadata() {
            Ok(meta) => self.current_size = meta.len(),
            Err(e) => warn!(error = %e, path = %path.display(), "Failed to read log length"),
        }
    }
}

fn write_batch(file: &mut File, buf: &[u8], sync: bool) -> io::Result<()> {
    file.write_all(buf)?;
    file.flush()?;
    if sync {
        file.sync_data()?;
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use movelog_core::row::LogRow;
    use std::sync::Arc;

    fn batch(rows: &[&[&str]]) -> RowBatch {
        rows.iter()
            .map(|r| LogRow::new(r.iter().map(|s| s.to_string()).collect()))
            .collect::<Vec<_>>()
            .into()
    }

    fn open_in(dir: &tempfile::TempDir) -> (LogFile, PathBuf) {
        let path = dir.path().join("game_log.csv");
        let log = LogFile::open(LogFileConfig {
            path: path.clone(),
            sync_writes: false,
        })
        .unwrap();
        (log, path)
    }

    #[test]
    fn append_writes_lines_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let (log, path) = open_in(&dir);
        let n = log.append(&batch(&[&["UP", "1", "2"], &["DOWN", "3", "4"]])).unwrap();
        assert_eq!(n, 2);
        assert_eq!(fs::read_to_string(&path).unwrap(), "UP,1,2\nDOWN,3,4\n");
    }

    #[test]
    fn reopen_appends_after_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game_log.csv");
        fs::write(&path, "old,row\n").unwrap();

        let log = LogFile::open(LogFileConfig { path: path.clone(), sync_writes: true }).unwrap();
        log.append(&batch(&[&["new", "row"]])).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "old,row\nnew,row\n");
    }

    #[test]
    fn empty_batch_does_not_touch_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let (log, path) = open_in(&dir);
        assert_eq!(log.append(&RowBatch::default()).unwrap(), 0);
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
        assert_eq!(log.stats(), LogFileStats::default());
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep").join("nested").join("moves.csv");
        let log = LogFile::open(LogFileConfig { path: path.clone(), sync_writes: false }).unwrap();
        log.append(&batch(&[&["x"]])).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn stats_track_rows_and_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let (log, _) = open_in(&dir);
        log.append(&batch(&[&["a", "b"], &["c"]])).unwrap();
        let stats = log.stats();
        assert_eq!(stats.rows_written, 2);
        assert_eq!(stats.bytes_written, "a,b\nc\n".len() as u64);
    }

    #[test]
    fn append_after_close_fails_and_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (log, path) = open_in(&dir);
        log.append(&batch(&[&["before"]])).unwrap();
        log.close().unwrap();
        assert!(log.is_closed());
        assert!(log.append(&batch(&[&["after"]])).is_err());
        log.close().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "before\n");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_write_is_reported_and_writer_stays_usable() {
        let log = LogFile::open(LogFileConfig {
            path: PathBuf::from("/dev/full"),
            sync_writes: false,
        })
        .unwrap();

        let err = log.append(&batch(&[&["UP", "1", "2"]])).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(28), "expected ENOSPC, got {err}");

        // A second failure is reported the same way, nothing is counted.
        assert!(log.append(&batch(&[&["DOWN", "3", "4"]])).is_err());
        assert!(!log.is_closed());
        assert_eq!(log.stats(), LogFileStats::default());
    }

    #[test]
    fn failed_rollback_moves_committed_length_past_partial_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game_log.csv");
        fs::write(&path, "committed\npart").unwrap();

        // Read-only handle: set_len fails, the partial tail stays on disk.
        let mut state = WriterState {
            file: File::open(&path).unwrap(),
            current_size: "committed\n".len() as u64,
            stats: LogFileStats::default(),
        };
        state.roll_back(&path);

        assert_eq!(state.current_size, "committed\npart".len() as u64);
        assert_eq!(fs::read_to_string(&path).unwrap(), "committed\npart");
    }

    #[test]
    fn successful_rollback_restores_committed_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game_log.csv");
        fs::write(&path, "committed\npart").unwrap();

        let mut state = WriterState {
            file: OpenOptions::new().write(true).open(&path).unwrap(),
            current_size: "committed\n".len() as u64,
            stats: LogFileStats::default(),
        };
        state.roll_back(&path);

        assert_eq!(state.current_size, "committed\n".len() as u64);
        assert_eq!(fs::read_to_string(&path).unwrap(), "committed\n");
    }

    #[test]
    fn concurrent_appends_never_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let (log, path) = open_in(&dir);
        let log = Arc::new(log);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let a = format!("t{t}");
                        let b = format!("{i}");
                        let c = "x".repeat(64);
                        log.append(&batch(&[
                            &[a.as_str(), b.as_str(), c.as_str()],
                            &[a.as_str(), b.as_str(), "second"],
                        ]))
                        .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 8 * 50 * 2);
        for pair in lines.chunks(2) {
            let first: Vec<&str> = pair[0].split(',').collect();
            let second: Vec<&str> = pair[1].split(',').collect();
            assert_eq!(first.len(), 3);
            assert_eq!(first[2].len(), 64);
            // Rows of one batch stay adjacent.
            assert_eq!(&first[..2], &second[..2]);
            assert_eq!(second[2], "second");
        }
    }
}
