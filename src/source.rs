//! Follows a growing log file, `tail -f` style.
//!
//! Polling-based: no inotify dependency, which keeps behavior identical
//! across local disks, bind mounts, and network filesystems. The follower
//! survives the file being rotated (inode change), truncated, or missing
//! entirely; it simply reopens and keeps going.

use std::path::PathBuf;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

/// Follows a single file and yields complete lines as they are appended.
pub struct LogFollower {
    path: PathBuf,
    poll_interval: Duration,
    reader: Option<BufReader<File>>,
    /// Identity of the currently open file, for rotation detection.
    file_id: Option<u64>,
    /// Bytes consumed from the current file, for truncation detection.
    offset: u64,
    /// Partial line data read before its terminating newline arrived.
    carry: Vec<u8>,
}

impl LogFollower {
    /// Create a follower for `path`. The file does not need to exist yet.
    pub fn new(path: PathBuf, poll_interval: Duration) -> Self {
        Self {
            path,
            poll_interval,
            reader: None,
            file_id: None,
            offset: 0,
            carry: Vec::new(),
        }
    }

    /// Wait for and return the next complete line, without its newline.
    ///
    /// Suspends indefinitely while no new data arrives. All I/O failures
    /// are handled by reopening and polling; none are surfaced to the
    /// caller.
    pub async fn next_line(&mut self) -> String {
        loop {
            if self.reader.is_none() {
                if !self.open().await {
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
            }

            match self.read_line().await {
                ReadStep::Line(line) => return line,
                ReadStep::Eof => {
                    if self.rotation_pending().await {
                        self.close_current();
                    } else {
                        tokio::time::sleep(self.poll_interval).await;
                    }
                }
                ReadStep::Failed => self.close_current(),
            }
        }
    }

    /// Try to open the followed file from the beginning.
    async fn open(&mut self) -> bool {
        match File::open(&self.path).await {
            Ok(file) => {
                self.file_id = match file.metadata().await {
                    Ok(meta) => file_id(&meta),
                    Err(_) => None,
                };
                self.reader = Some(BufReader::new(file));
                self.offset = 0;
                self.carry.clear();
                info!(path = %self.path.display(), "following file");
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "waiting for file to appear");
                false
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "could not open file");
                false
            }
        }
    }

    /// Read toward the next newline, accumulating partial data in
    /// `carry` so a line written in several chunks is emitted exactly
    /// once, whole.
    ///
    /// Buffers through `fill_buf`/`consume` rather than `read_line`:
    /// `fill_buf` consumes nothing until we copy the data out, so
    /// cancelling this future (shutdown racing the next line) can never
    /// lose buffered bytes.
    async fn read_line(&mut self) -> ReadStep {
        let Some(reader) = self.reader.as_mut() else {
            return ReadStep::Failed;
        };

        loop {
            let available = match reader.fill_buf().await {
                Ok(buf) => buf,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "read failed, reopening");
                    return ReadStep::Failed;
                }
            };

            if available.is_empty() {
                // True EOF; any partial line stays in carry.
                return ReadStep::Eof;
            }

            match available.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    self.carry.extend_from_slice(&available[..pos]);
                    reader.consume(pos + 1);
                    self.offset += (pos + 1) as u64;

                    let mut line = std::mem::take(&mut self.carry);
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    return ReadStep::Line(String::from_utf8_lossy(&line).into_owned());
                }
                None => {
                    let n = available.len();
                    self.carry.extend_from_slice(available);
                    reader.consume(n);
                    self.offset += n as u64;
                }
            }
        }
    }

    /// At EOF, decide whether the path now refers to different content
    /// than what we have been reading.
    async fn rotation_pending(&self) -> bool {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => {
                let current = file_id(&meta);
                if self.file_id.is_some() && current != self.file_id {
                    info!(path = %self.path.display(), "file was rotated, reopening");
                    return true;
                }
                if meta.len() < self.offset {
                    info!(path = %self.path.display(), "file was truncated, reopening");
                    return true;
                }
                false
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "file disappeared, waiting for it to return");
                true
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "could not stat file");
                false
            }
        }
    }

    fn close_current(&mut self) {
        if !self.carry.is_empty() {
            debug!(
                path = %self.path.display(),
                bytes = self.carry.len(),
                "dropping partial line from closed file"
            );
            self.carry.clear();
        }
        self.reader = None;
        self.file_id = None;
        self.offset = 0;
    }
}

/// One attempt to produce a line from the open reader.
enum ReadStep {
    Line(String),
    Eof,
    Failed,
}

#[cfg(unix)]
fn file_id(meta: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ino())
}

#[cfg(not(unix))]
fn file_id(_meta: &std::fs::Metadata) -> Option<u64> {
    None
}
