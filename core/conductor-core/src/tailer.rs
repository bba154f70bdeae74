//! Incremental reader for the append-only activity log.
//!
//! Each watched log file has one [`LogCursor`] that remembers how far it has
//! been read. Polling returns only complete lines written since the last poll:
//!
//! - The offset only advances past the last `\n`, so a line that is still being
//!   written is returned once, after it is finished.
//! - If the file shrinks (truncation or an in-place rewrite) or, on Unix, is replaced
//!   by a different inode (rotation), the cursor restarts at byte 0 and the
//!   whole file counts as new.
//! - A missing file yields nothing and leaves the cursor untouched.
//!
//! Reads are bounded by [`MAX_READ_BYTES`]; a bigger backlog is drained over
//! several polls, with [`TailBatch::more`] telling the caller to come back.

use std::collections::HashMap;
use std::fs::Metadata;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{ConductorError, Result};

/// Upper bound on bytes read by one poll.
pub const MAX_READ_BYTES: u64 = 4 * 1024 * 1024;

const SCAN_BLOCK_BYTES: u64 = 64 * 1024;

/// Lines returned by one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TailBatch {
    pub lines: Vec<String>,
    /// True when unread complete data remains beyond the read bound.
    pub more: bool,
}

/// Read position within one log file. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogCursor {
    path: PathBuf,
    offset: u64,
    size: u64,
    file_id: Option<u64>,
}

impl LogCursor {
    /// A cursor at byte 0: the whole current file is unread.
    pub fn new(path: &Path) -> Self {
        LogCursor {
            path: path.to_path_buf(),
            offset: 0,
            size: 0,
            file_id: None,
        }
    }

    /// A cursor just past the last complete line, so only later appends are
    /// reported. A missing file starts at 0.
    pub fn at_end(path: &Path) -> Self {
        let mut cursor = LogCursor::new(path);
        let Ok(metadata) = fs_err::metadata(path) else {
            return cursor;
        };
        let size = metadata.len();
        let offset = match last_line_end(path, size) {
            Ok(offset) => offset,
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "Could not scan log end");
                0
            }
        };
        cursor.offset = offset;
        cursor.size = size;
        cursor.file_id = file_id(&metadata);
        cursor
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns complete lines appended since the previous poll.
    pub fn poll(&mut self) -> TailBatch {
        self.poll_bounded(MAX_READ_BYTES)
    }

    pub(crate) fn poll_bounded(&mut self, limit: u64) -> TailBatch {
        let Ok(metadata) = fs_err::metadata(&self.path) else {
            return TailBatch::default();
        };
        let size = metadata.len();
        let id = file_id(&metadata);

        let replaced = matches!((self.file_id, id), (Some(old), Some(new)) if old != new);
        if size < self.size || size < self.offset || replaced {
            tracing::info!(
                path = %self.path.display(),
                previous_offset = self.offset,
                size,
                replaced,
                "Log truncated or rotated, reading from start"
            );
            self.offset = 0;
        }
        self.size = size;
        self.file_id = id;

        if size == self.offset {
            return TailBatch::default();
        }

        let wanted = (size - self.offset).min(limit.max(1));
        let buf = match read_range(&self.path, self.offset, wanted) {
            Ok(buf) => buf,
            Err(err) => {
                tracing::debug!(path = %self.path.display(), error = %err, "Log read failed");
                return TailBatch::default();
            }
        };
        let hit_limit = buf.len() as u64 == limit;

        let consumed = match buf.iter().rposition(|b| *b == b'\n') {
            Some(pos) => pos + 1,
            None if hit_limit => {
                tracing::warn!(
                    path = %self.path.display(),
                    bytes = buf.len(),
                    "Log line exceeds read bound, emitting it in pieces"
                );
                buf.len()
            }
            // Partial final line: wait for its newline.
            None => return TailBatch::default(),
        };

        self.offset += consumed as u64;
        TailBatch {
            lines: split_lines(&buf[..consumed]),
            more: hit_limit && self.offset < size,
        }
    }
}

/// Owns every cursor in the process, keyed by log path.
#[derive(Debug, Default)]
pub struct LogTailer {
    cursors: HashMap<PathBuf, LogCursor>,
}

impl LogTailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an at-end cursor for `path` unless one already exists.
    /// Existing cursors survive so switching back to a project resumes where
    /// it left off.
    pub fn prime(&mut self, path: &Path) {
        self.cursors
            .entry(path.to_path_buf())
            .or_insert_with(|| LogCursor::at_end(path));
    }

    /// One bounded poll. Unknown paths are read from the start.
    pub fn poll(&mut self, path: &Path) -> TailBatch {
        self.cursors
            .entry(path.to_path_buf())
            .or_insert_with(|| LogCursor::new(path))
            .poll()
    }

    /// Polls until no bounded read is pending.
    pub fn drain(&mut self, path: &Path) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let batch = self.poll(path);
            lines.extend(batch.lines);
            if !batch.more {
                return lines;
            }
        }
    }

    pub fn cursor(&self, path: &Path) -> Option<&LogCursor> {
        self.cursors.get(path)
    }

    pub fn forget(&mut self, path: &Path) {
        self.cursors.remove(path);
    }
}

/// Returns the last `n` complete, non-blank lines of a file.
pub fn read_tail(path: &Path, n: usize) -> Result<Vec<String>> {
    if n == 0 {
        return Ok(Vec::new());
    }
    let size = match fs_err::metadata(path) {
        Ok(metadata) => metadata.len(),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(ConductorError::io("Failed to stat log", err)),
    };
    let end = last_line_end(path, size).map_err(|e| ConductorError::io("Failed to scan log", e))?;

    // Walk backwards one block at a time. `carry` holds the bytes before the
    // first newline seen so far, which may continue into the previous block.
    let mut start = end;
    let mut carry: Vec<u8> = Vec::new();
    let mut newest_first: Vec<String> = Vec::new();
    while newest_first.len() < n {
        let block_start = start.saturating_sub(SCAN_BLOCK_BYTES);
        let mut data = read_range(path, block_start, start - block_start)
            .map_err(|e| ConductorError::io("Failed to read log", e))?;
        data.append(&mut carry);
        start = block_start;

        let complete = if start == 0 {
            &data[..]
        } else {
            match data.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    carry = data[..pos].to_vec();
                    &data[pos + 1..]
                }
                None => {
                    carry = data;
                    continue;
                }
            }
        };
        newest_first.extend(split_lines(complete).into_iter().rev());
        if start == 0 {
            break;
        }
    }
    newest_first.truncate(n);
    newest_first.reverse();
    Ok(newest_first)
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}

fn read_range(path: &Path, offset: u64, len: u64) -> std::io::Result<Vec<u8>> {
    let mut file = fs_err::File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::with_capacity(len as usize);
    // `take` tolerates the file shrinking between stat and read.
    file.take(len).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Offset just after the last `\n` within the first `size` bytes, or 0.
fn last_line_end(path: &Path, size: u64) -> std::io::Result<u64> {
    let mut end = size;
    while end > 0 {
        let start = end.saturating_sub(SCAN_BLOCK_BYTES);
        let block = read_range(path, start, end - start)?;
        if let Some(pos) = block.iter().rposition(|b| *b == b'\n') {
            return Ok(start + pos as u64 + 1);
        }
        end = start;
    }
    Ok(0)
}

#[cfg(unix)]
fn file_id(metadata: &Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.ino())
}

#[cfg(not(unix))]
fn file_id(_metadata: &Metadata) -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use tempfile::tempdir;

    fn append(path: &Path, text: &str) {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn test_missing_file_leaves_cursor_unchanged() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("activity.log");
        let mut cursor = LogCursor::new(&path);
        let before = cursor.clone();

        assert_eq!(cursor.poll(), TailBatch::default());
        assert_eq!(cursor, before);
    }

    #[test]
    fn test_partial_line_held_back_until_newline() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("activity.log");
        let mut cursor = LogCursor::new(&path);

        append(&path, "first\nsecond-par");
        assert_eq!(cursor.poll().lines, vec!["first".to_string()]);
        assert_eq!(cursor.offset(), 6);

        assert!(cursor.poll().lines.is_empty());

        append(&path, "tial\n");
        assert_eq!(cursor.poll().lines, vec!["second-partial".to_string()]);
    }

    #[test]
    fn test_blank_lines_and_carriage_returns_dropped() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("activity.log");
        append(&path, "a\r\n\n   \nb\n");

        let mut cursor = LogCursor::new(&path);
        assert_eq!(cursor.poll().lines, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_shrink_resets_cursor_to_start() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("activity.log");
        append(&path, "one\ntwo\nthree\n");
        let mut cursor = LogCursor::new(&path);
        assert_eq!(cursor.poll().lines.len(), 3);

        fs::write(&path, "fresh\n").unwrap();
        assert_eq!(cursor.poll().lines, vec!["fresh".to_string()]);
        assert_eq!(cursor.offset(), 6);
    }

    #[test]
    fn test_rewrite_past_held_back_partial_resets() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("activity.log");
        append(&path, "aaaa\nbbbbbbbbbb");
        let mut cursor = LogCursor::new(&path);
        assert_eq!(cursor.poll().lines, vec!["aaaa".to_string()]);
        assert_eq!(cursor.offset(), 5);

        // Still longer than the offset, but shorter than what was seen.
        fs::write(&path, "fresh-1\nf2\n").unwrap();
        assert_eq!(
            cursor.poll().lines,
            vec!["fresh-1".to_string(), "f2".to_string()]
        );
        assert_eq!(cursor.offset(), 11);
    }

    #[cfg(unix)]
    #[test]
    fn test_rotation_to_larger_file_detected() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("activity.log");
        append(&path, "old\n");
        let mut cursor = LogCursor::new(&path);
        assert_eq!(cursor.poll().lines, vec!["old".to_string()]);

        let rotated = temp.path().join("activity.log.new");
        fs::write(&rotated, "new-1\nnew-2\nnew-3\n").unwrap();
        fs::rename(&rotated, &path).unwrap();

        assert_eq!(
            cursor.poll().lines,
            vec!["new-1".to_string(), "new-2".to_string(), "new-3".to_string()]
        );
    }

    #[test]
    fn test_incremental_polls_concatenate_to_whole_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("activity.log");
        let mut cursor = LogCursor::new(&path);

        let content: String = (0..200)
            .map(|i| format!("[2025-01-01T00:00:{:02}Z] [worker-{}] [STEP] n={}\n", i % 60, i % 4, i))
            .collect();

        // Append in uneven slices that regularly split lines mid-way.
        let mut collected = Vec::new();
        let bytes = content.as_bytes();
        let mut pos = 0;
        let mut step = 1;
        while pos < bytes.len() {
            let end = (pos + step).min(bytes.len());
            append(&path, std::str::from_utf8(&bytes[pos..end]).unwrap());
            collected.extend(cursor.poll().lines);
            pos = end;
            step = step * 7 % 97 + 3;
        }
        collected.extend(cursor.poll().lines);

        let whole: Vec<String> = content.lines().map(str::to_string).collect();
        assert_eq!(collected, whole);
    }

    #[test]
    fn test_bounded_poll_reports_more() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("activity.log");
        append(&path, "aaaa\nbbbb\ncccc\n");

        let mut cursor = LogCursor::new(&path);
        let first = cursor.poll_bounded(12);
        assert_eq!(first.lines, vec!["aaaa".to_string(), "bbbb".to_string()]);
        assert!(first.more);

        let second = cursor.poll_bounded(12);
        assert_eq!(second.lines, vec!["cccc".to_string()]);
        assert!(!second.more);
    }

    #[test]
    fn test_overlong_line_emitted_in_pieces() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("activity.log");
        append(&path, "abcdefghij\n");

        let mut cursor = LogCursor::new(&path);
        let first = cursor.poll_bounded(4);
        assert_eq!(first.lines, vec!["abcd".to_string()]);
        assert!(first.more);
    }

    #[test]
    fn test_at_end_skips_existing_content() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("activity.log");
        append(&path, "old-1\nold-2\npartial");

        let mut cursor = LogCursor::at_end(&path);
        assert_eq!(cursor.offset(), 12);

        append(&path, "-done\nnew\n");
        assert_eq!(
            cursor.poll().lines,
            vec!["partial-done".to_string(), "new".to_string()]
        );
    }

    #[test]
    fn test_tailer_keeps_cursor_across_prime() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("activity.log");
        append(&path, "before\n");

        let mut tailer = LogTailer::new();
        tailer.prime(&path);
        append(&path, "after\n");
        assert_eq!(tailer.drain(&path), vec!["after".to_string()]);

        append(&path, "while-away\n");
        tailer.prime(&path);
        assert_eq!(tailer.drain(&path), vec!["while-away".to_string()]);
    }

    #[test]
    fn test_read_tail_returns_last_complete_lines() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("activity.log");
        let content: String = (0..5000).map(|i| format!("line-{i}\n")).collect();
        append(&path, &content);
        append(&path, "unfinished");

        let tail = read_tail(&path, 3).unwrap();
        assert_eq!(
            tail,
            vec!["line-4997".to_string(), "line-4998".to_string(), "line-4999".to_string()]
        );

        let all = read_tail(&path, 10_000).unwrap();
        assert_eq!(all.len(), 5000);
        assert_eq!(all[0], "line-0");

        assert!(read_tail(&temp.path().join("missing.log"), 5).unwrap().is_empty());
    }

    #[test]
    fn test_read_tail_across_scan_blocks() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("activity.log");
        // 64-byte lines so block edges fall exactly on line starts.
        let content: String = (0..1100).map(|i| format!("{i:063}\n")).collect();
        append(&path, &content);
        assert!(content.len() as u64 > SCAN_BLOCK_BYTES);

        let all = read_tail(&path, 5000).unwrap();
        assert_eq!(all.len(), 1100);
        assert!(all.iter().enumerate().all(|(i, line)| *line == format!("{i:063}")));

        let block = read_tail(&path, 1024).unwrap();
        assert_eq!(block.len(), 1024);
        assert_eq!(block[0], format!("{:063}", 76));
        assert_eq!(block[1023], format!("{:063}", 1099));
    }
}
