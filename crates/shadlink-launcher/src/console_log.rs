use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::Arc,
};

use shadlink_proto::Channel;
use tokio::{
    io::AsyncWriteExt,
    sync::{Mutex, mpsc},
};
use tracing::Level;

use crate::log_relay::{LogColor, LogEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Worker(Channel),
    /// Messages the launcher itself adds about the session.
    Launcher,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub seq: u64,
    pub origin: Origin,
    pub level: Level,
    pub color: LogColor,
    pub text: String,
}

#[derive(Debug)]
struct LogBuffer {
    next_seq: u64,
    max_lines: usize,
    lines: VecDeque<Record>,
}

impl LogBuffer {
    fn new(max_lines: usize) -> Self {
        Self {
            next_seq: 1,
            max_lines: max_lines.max(1),
            lines: VecDeque::new(),
        }
    }

    fn push(&mut self, origin: Origin, level: Level, color: LogColor, text: String) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);
        self.lines.push_back(Record {
            seq,
            origin,
            level,
            color,
            text,
        });
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
        }
    }

    fn tail_after(&self, cursor: u64, limit: usize) -> (Vec<Record>, u64) {
        // Cursor 0 means "the most recent lines".
        if cursor == 0 {
            let start = self.lines.len().saturating_sub(limit);
            let out: Vec<Record> = self.lines.iter().skip(start).cloned().collect();
            let last = out.last().map(|r| r.seq).unwrap_or(0);
            return (out, last);
        }

        let out: Vec<Record> = self
            .lines
            .iter()
            .filter(|r| r.seq > cursor)
            .take(limit)
            .cloned()
            .collect();
        let last = out.last().map(|r| r.seq).unwrap_or(cursor);
        (out, last)
    }
}

struct FileLogWriter {
    path: PathBuf,
    max_bytes: u64,
    max_files: usize,
    bytes: u64,
    file: tokio::fs::File,
}

async fn open_append(path: &Path) -> std::io::Result<tokio::fs::File> {
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
}

impl FileLogWriter {
    async fn open(path: PathBuf, max_bytes: u64, max_files: usize) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = match tokio::fs::metadata(&path).await {
            Ok(m) => m.len(),
            Err(_) => 0,
        };
        let file = open_append(&path).await?;
        Ok(Self {
            path,
            max_bytes,
            max_files,
            bytes,
            file,
        })
    }

    fn rotated(&self, i: usize) -> PathBuf {
        PathBuf::from(format!("{}.{}", self.path.display(), i))
    }

    /// Shifts `console.log.N` up by one, dropping whatever falls past
    /// `max_files`, and starts a fresh current file.
    async fn rotate(&mut self) -> std::io::Result<()> {
        let _ = self.file.flush().await;

        let _ = tokio::fs::remove_file(self.rotated(self.max_files)).await;
        for i in (1..self.max_files).rev() {
            let _ = tokio::fs::rename(self.rotated(i), self.rotated(i + 1)).await;
        }
        let _ = tokio::fs::rename(&self.path, self.rotated(1)).await;

        self.file = open_append(&self.path).await?;
        self.bytes = 0;
        Ok(())
    }

    async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        let len = line.len() as u64 + 1;
        if self.max_bytes > 0 && self.bytes + len > self.max_bytes {
            if let Err(err) = self.rotate().await {
                tracing::debug!(%err, path = %self.path.display(), "console log rotation failed");
            }
        }
        self.file.write_all(line.as_bytes()).await?;
        self.file.write_all(b"\n").await?;
        self.bytes += len;
        Ok(())
    }
}

/// Log sink for everything relayed from the worker, plus the launcher's own
/// notes about the session.
///
/// Lines are kept in a bounded in-memory buffer, mirrored as `tracing` events
/// and, when configured, appended to a size-rotated file by a writer task.
#[derive(Clone)]
pub struct ConsoleLog {
    buffer: Arc<Mutex<LogBuffer>>,
    file_tx: Option<mpsc::UnboundedSender<String>>,
}

impl ConsoleLog {
    pub fn new(max_lines: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(LogBuffer::new(max_lines))),
            file_tx: None,
        }
    }

    /// Like [`ConsoleLog::new`], also writing every line to `path`.
    pub async fn with_file(
        max_lines: usize,
        path: PathBuf,
        max_bytes: u64,
        max_files: usize,
    ) -> std::io::Result<Self> {
        let mut writer = FileLogWriter::open(path, max_bytes, max_files.max(1)).await?;
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                let _ = writer.write_line(&line).await;
            }
            let _ = writer.file.flush().await;
        });

        Ok(Self {
            buffer: Arc::new(Mutex::new(LogBuffer::new(max_lines))),
            file_tx: Some(tx),
        })
    }

    pub async fn emit(&self, entry: LogEntry) {
        let level = entry.level();
        self.push(Origin::Worker(entry.channel), level, entry.color, entry.text)
            .await;
    }

    pub async fn note(&self, level: Level, text: impl Into<String>) {
        let color = match level {
            Level::ERROR => LogColor::Red,
            Level::WARN => LogColor::Yellow,
            _ => LogColor::Default,
        };
        self.push(Origin::Launcher, level, color, text.into()).await;
    }

    pub async fn tail_after(&self, cursor: u64, limit: usize) -> (Vec<Record>, u64) {
        self.buffer.lock().await.tail_after(cursor, limit)
    }

    async fn push(&self, origin: Origin, level: Level, color: LogColor, text: String) {
        mirror(origin, level, &text);
        if let Some(tx) = &self.file_tx {
            let _ = tx.send(format!("{:<5} {:<8} {text}", level.as_str(), source(origin)));
        }
        self.buffer.lock().await.push(origin, level, color, text);
    }
}

fn source(origin: Origin) -> &'static str {
    match origin {
        Origin::Worker(Channel::Stdout) => "stdout",
        Origin::Worker(Channel::Stderr) => "stderr",
        Origin::Launcher => "launcher",
    }
}

fn mirror(origin: Origin, level: Level, text: &str) {
    let source = source(origin);
    match level {
        Level::ERROR => tracing::error!(target: "shadlink::worker", source, "{text}"),
        Level::WARN => tracing::warn!(target: "shadlink::worker", source, "{text}"),
        Level::INFO => tracing::info!(target: "shadlink::worker", source, "{text}"),
        Level::DEBUG => tracing::debug!(target: "shadlink::worker", source, "{text}"),
        _ => tracing::trace!(target: "shadlink::worker", source, "{text}"),
    }
}
