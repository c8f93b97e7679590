//! Per-chat JSON logs for messages and feedback.
//!
//! Each file is a pretty-printed JSON array. Appending never reads or
//! rewrites the whole file: the closing `]` is found in the tail and the new
//! element is written over it, followed by a fresh `]`.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::chatbot::message::{FeedbackRecord, MessageRecord};

/// How far back from the end we look for the closing bracket.
const TAIL_WINDOW: u64 = 256;

#[derive(Debug)]
pub enum LogError {
    Io { path: PathBuf, source: std::io::Error },
    Json { path: PathBuf, source: serde_json::Error },
    /// The file exists but does not end in a JSON array.
    Malformed { path: PathBuf },
}

impl std::fmt::Display for LogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "I/O error on '{}': {}", path.display(), source),
            Self::Json { path, source } => write!(f, "JSON error in '{}': {}", path.display(), source),
            Self::Malformed { path } => write!(f, "'{}' is not a JSON array", path.display()),
        }
    }
}

impl std::error::Error for LogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Json { source, .. } => Some(source),
            Self::Malformed { .. } => None,
        }
    }
}

/// Message and feedback logs rooted at a data directory.
pub struct ChatLogs {
    messages_dir: PathBuf,
    feedback_dir: PathBuf,
    /// Serializes appends so two handlers never interleave bytes.
    write_lock: Mutex<()>,
}

impl ChatLogs {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            messages_dir: data_dir.join("chat_logs"),
            feedback_dir: data_dir.join("feedback_logs"),
            write_lock: Mutex::new(()),
        }
    }

    pub fn message_log_path(&self, chat_id: i64) -> PathBuf {
        self.messages_dir.join(format!("chat_{chat_id}.json"))
    }

    pub fn feedback_log_path(&self, chat_id: i64) -> PathBuf {
        self.feedback_dir.join(format!("chat_{chat_id}_feedback.json"))
    }

    pub fn log_message(&self, record: &MessageRecord) -> Result<(), LogError> {
        self.append(&self.message_log_path(record.chat_id), record)
    }

    pub fn log_feedback(&self, record: &FeedbackRecord) -> Result<(), LogError> {
        self.append(&self.feedback_log_path(record.chat_id), record)
    }

    pub fn read_messages(&self, chat_id: i64) -> Result<Vec<MessageRecord>, LogError> {
        read_all(&self.message_log_path(chat_id))
    }

    pub fn read_feedback(&self, chat_id: i64) -> Result<Vec<FeedbackRecord>, LogError> {
        read_all(&self.feedback_log_path(chat_id))
    }

    fn append<T: Serialize>(&self, path: &Path, record: &T) -> Result<(), LogError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        append_record(path, record)
    }
}

/// Append one element to the JSON array stored at `path`.
pub fn append_record<T: Serialize>(path: &Path, record: &T) -> Result<(), LogError> {
    let io_err = |source| LogError::Io { path: path.to_path_buf(), source };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let element = indent(&to_pretty_json(record).map_err(|source| LogError::Json {
        path: path.to_path_buf(),
        source,
    })?);

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(io_err)?;

    let len = file.metadata().map_err(io_err)?.len();
    if len == 0 {
        file.write_all(format!("[\n{element}\n]").as_bytes()).map_err(io_err)?;
        debug!("Started log {:?}", path);
        return Ok(());
    }

    let tail = find_array_tail(&mut file, len).map_err(io_err)?.ok_or_else(|| LogError::Malformed {
        path: path.to_path_buf(),
    })?;

    let separator = if tail.is_empty_array { "\n" } else { ",\n" };
    let bytes = format!("{separator}{element}\n]");
    if let Err(source) = write_tail(&mut file, tail.close_offset, len, bytes.as_bytes()) {
        // Put the array close back so later appends still find it.
        if let Err(e) = restore_close(&mut file, tail.close_offset) {
            warn!("Could not restore {:?} after failed append: {}", path, e);
        }
        return Err(io_err(source));
    }
    Ok(())
}

/// Overwrite everything from `offset` with `bytes`, trimming only if the
/// old tail was longer.
fn write_tail(file: &mut File, offset: u64, old_len: u64, bytes: &[u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(bytes)?;
    let new_len = offset + bytes.len() as u64;
    if new_len < old_len {
        file.set_len(new_len)?;
    }
    Ok(())
}

/// Truncate to `offset` and re-terminate the array there.
fn restore_close(file: &mut File, offset: u64) -> std::io::Result<()> {
    file.set_len(offset)?;
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(b"\n]")
}

/// Read every element of the JSON array at `path`. A missing file is empty.
pub fn read_all<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, LogError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(LogError::Io { path: path.to_path_buf(), source }),
    };
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&content).map_err(|source| LogError::Json {
        path: path.to_path_buf(),
        source,
    })
}

struct ArrayTail {
    /// Byte offset where the content after the last element begins.
    close_offset: u64,
    is_empty_array: bool,
}

/// Locate the closing `]` near the end of the file.
///
/// Returns `None` when the tail does not look like the end of an array.
fn find_array_tail(file: &mut File, len: u64) -> std::io::Result<Option<ArrayTail>> {
    let start = len.saturating_sub(TAIL_WINDOW);
    file.seek(SeekFrom::Start(start))?;
    let mut tail = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut tail)?;

    let Some(close) = tail.iter().rposition(|b| !b.is_ascii_whitespace()) else {
        return Ok(None);
    };
    if tail[close] != b']' {
        return Ok(None);
    }

    let Some(prev) = tail[..close].iter().rposition(|b| !b.is_ascii_whitespace()) else {
        return Ok(None);
    };
    let is_empty_array = tail[prev] == b'[';

    // Keep everything up to and including the last element (or the `[`).
    Ok(Some(ArrayTail {
        close_offset: start + prev as u64 + 1,
        is_empty_array,
    }))
}

fn to_pretty_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    // serde_json only emits valid UTF-8
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn indent(json: &str) -> String {
    json.lines()
        .map(|line| format!("    {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chatbot::message::ChatType;
    use tempfile::TempDir;

    fn make_record(chat_id: i64, n: usize) -> MessageRecord {
        MessageRecord {
            chat_id,
            user_id: 100 + n as i64,
            username: Some(format!("user{n}")),
            message: format!("message {n}"),
            timestamp: format!("2024-05-01T12:00:{:02}.000000", n % 60),
            chat_type: ChatType::Private,
        }
    }

    #[test]
    fn test_paths() {
        let logs = ChatLogs::new(Path::new("/data"));
        assert_eq!(logs.message_log_path(42), PathBuf::from("/data/chat_logs/chat_42.json"));
        assert_eq!(
            logs.feedback_log_path(-7),
            PathBuf::from("/data/feedback_logs/chat_-7_feedback.json")
        );
    }

    #[test]
    fn test_append_keeps_order() {
        let dir = TempDir::new().unwrap();
        let logs = ChatLogs::new(dir.path());

        let records: Vec<_> = (0..5).map(|n| make_record(1, n)).collect();
        for record in &records {
            logs.log_message(record).unwrap();
        }

        assert_eq!(logs.read_messages(1).unwrap(), records);
    }

    #[test]
    fn test_chats_are_partitioned() {
        let dir = TempDir::new().unwrap();
        let logs = ChatLogs::new(dir.path());

        logs.log_message(&make_record(1, 0)).unwrap();
        logs.log_message(&make_record(2, 1)).unwrap();
        logs.log_message(&make_record(1, 2)).unwrap();

        assert_eq!(logs.read_messages(1).unwrap().len(), 2);
        assert_eq!(logs.read_messages(2).unwrap().len(), 1);
        assert!(logs.read_messages(3).unwrap().is_empty());
    }

    #[test]
    fn test_file_is_pretty_json_array() {
        let dir = TempDir::new().unwrap();
        let logs = ChatLogs::new(dir.path());
        logs.log_message(&make_record(1, 0)).unwrap();
        logs.log_message(&make_record(1, 1)).unwrap();

        let content = std::fs::read_to_string(logs.message_log_path(1)).unwrap();
        assert!(content.starts_with("[\n    {\n        \"chat_id\": 1,"));
        assert!(content.ends_with("}\n]"));

        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_appends_to_existing_compact_array() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.json");
        std::fs::write(&path, "[{\"a\": 1}]\n").unwrap();

        append_record(&path, &serde_json::json!({"a": 2})).unwrap();

        let values: Vec<serde_json::Value> = read_all(&path).unwrap();
        assert_eq!(values, vec![serde_json::json!({"a": 1}), serde_json::json!({"a": 2})]);
    }

    #[test]
    fn test_appends_to_empty_array() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.json");
        std::fs::write(&path, "[]").unwrap();

        append_record(&path, &serde_json::json!({"a": 1})).unwrap();

        let values: Vec<serde_json::Value> = read_all(&path).unwrap();
        assert_eq!(values, vec![serde_json::json!({"a": 1})]);
    }

    #[test]
    fn test_malformed_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.json");
        std::fs::write(&path, "{\"not\": \"an array\"}").unwrap();

        let err = append_record(&path, &serde_json::json!({"a": 1})).unwrap_err();
        assert!(matches!(err, LogError::Malformed { .. }));
        // Existing content is left untouched
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"not\": \"an array\"}");
    }

    #[test]
    fn test_long_trailing_whitespace_is_trimmed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.json");
        std::fs::write(&path, format!("[{{\"a\": 1}}]{}", " ".repeat(200))).unwrap();

        append_record(&path, &serde_json::json!({"a": 2})).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.ends_with("}\n]"));
        let values: Vec<serde_json::Value> = read_all(&path).unwrap();
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_restore_close_after_partial_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.json");
        std::fs::write(&path, "[{\"a\": 1}]").unwrap();

        let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        let len = file.metadata().unwrap().len();
        let tail = find_array_tail(&mut file, len).unwrap().unwrap();

        // A write that died halfway through the new element
        file.seek(SeekFrom::Start(tail.close_offset)).unwrap();
        file.write_all(b",\n    {\"a\": ").unwrap();
        restore_close(&mut file, tail.close_offset).unwrap();
        drop(file);

        let values: Vec<serde_json::Value> = read_all(&path).unwrap();
        assert_eq!(values, vec![serde_json::json!({"a": 1})]);

        // And the log keeps accepting appends
        append_record(&path, &serde_json::json!({"a": 2})).unwrap();
        let values: Vec<serde_json::Value> = read_all(&path).unwrap();
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_unparseable_file_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.json");
        std::fs::write(&path, "[{broken").unwrap();

        let err = read_all::<serde_json::Value>(&path).unwrap_err();
        assert!(matches!(err, LogError::Json { .. }));
    }

    #[test]
    fn test_feedback_round_trip() {
        let dir = TempDir::new().unwrap();
        let logs = ChatLogs::new(dir.path());
        let record = FeedbackRecord {
            user_id: 5,
            username: None,
            chat_id: -100,
            user_message: "hello".to_string(),
            bot_response: "hi".to_string(),
            feedback: "Good".to_string(),
            timestamp: "2024-05-01T12:00:00.000000".to_string(),
        };

        logs.log_feedback(&record).unwrap();
        assert_eq!(logs.read_feedback(-100).unwrap(), vec![record]);
        assert!(logs.read_messages(-100).unwrap().is_empty());
    }
}
