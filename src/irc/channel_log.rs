/// Append-only per-channel message log.
///
/// One file per channel, named after the lowercased channel name, holding
/// one JSON object per line. Every write opens, appends, and closes the
/// file; failures are logged and swallowed.
///
/// The registry only builds a [`PendingWrite`]; the disk I/O happens in
/// [`PendingWrite::write`], after the caller has given the registry back.
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{warn, Span};

/// One logged channel message.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChannelLogEntry {
    pub nick: String,
    pub message: String,
    /// Unix seconds, serialized as a string.
    #[serde(serialize_with = "as_string")]
    pub timestamp: i64,
}

fn as_string<S: serde::Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

impl ChannelLogEntry {
    /// The newline-terminated JSON record.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// A record bound for one channel's log file.
#[derive(Debug)]
#[must_use = "nothing is logged until `write` is called"]
pub struct PendingWrite {
    span: Span,
    dir: PathBuf,
    channel_key: String,
    entry: ChannelLogEntry,
}

impl PendingWrite {
    pub fn new(span: Span, dir: PathBuf, channel_key: String, entry: ChannelLogEntry) -> Self {
        Self {
            span,
            dir,
            channel_key,
            entry,
        }
    }

    pub fn entry(&self) -> &ChannelLogEntry {
        &self.entry
    }

    /// Where the record will land.
    pub fn path(&self) -> PathBuf {
        self.dir.join(file_name(&self.channel_key))
    }

    pub fn write(self) {
        append(&self.span, &self.dir, &self.channel_key, &self.entry);
    }
}

/// File name for a channel. Path separators, `%` and control characters
/// are percent-escaped so every channel maps to one file inside the log
/// directory.
pub fn file_name(channel_key: &str) -> String {
    let mut name = String::with_capacity(channel_key.len());
    for c in channel_key.chars() {
        match c {
            c if matches!(c, '/' | '\\' | '%') || c.is_control() => {
                name.push_str(&format!("%{:02X}", c as u32));
            }
            c => name.push(c),
        }
    }
    name
}

/// Append `entry` to the channel's file in `dir`. The handle is closed when
/// this returns, whichever way it returns.
pub fn append(span: &Span, dir: &Path, channel_key: &str, entry: &ChannelLogEntry) {
    let path = dir.join(file_name(channel_key));

    let line = match entry.to_line() {
        Ok(line) => line,
        Err(e) => {
            warn!(parent: span, path = %path.display(), "unable to encode channel log line: {e}");
            return;
        }
    };

    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!(parent: span, dir = %dir.display(), "unable to create channel log directory: {e}");
        return;
    }

    let mut file = match OpenOptions::new().append(true).create(true).open(&path) {
        Ok(file) => file,
        Err(e) => {
            warn!(parent: span, path = %path.display(), "unable to open channel log for writing: {e}");
            return;
        }
    };

    if let Err(e) = file.write_all(line.as_bytes()) {
        warn!(parent: span, path = %path.display(), "unable to write channel log line: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scratch_dir() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("cove-log-test-{}", rand::random::<u64>()))
    }

    fn entry(nick: &str, message: &str, timestamp: i64) -> ChannelLogEntry {
        ChannelLogEntry {
            nick: nick.into(),
            message: message.into(),
            timestamp,
        }
    }

    #[test]
    fn entry_serializes_timestamp_as_string() {
        assert_eq!(
            entry("alice", "hi \"there\"", 1_700_000_000).to_line().unwrap(),
            "{\"nick\":\"alice\",\"message\":\"hi \\\"there\\\"\",\"timestamp\":\"1700000000\"}\n"
        );
    }

    #[test]
    fn append_creates_then_appends() {
        let dir = scratch_dir();
        let span = Span::none();
        for (i, text) in ["first", "second"].into_iter().enumerate() {
            append(&span, &dir, "#cove", &entry("bob", text, i as i64));
        }

        let contents = std::fs::read_to_string(dir.join("#cove")).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["message"], "first");
        assert_eq!(lines[1]["timestamp"], "1");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn append_failure_is_swallowed() {
        // A regular file where the directory should be.
        let blocker = scratch_dir();
        std::fs::write(&blocker, b"not a dir").unwrap();
        append(&Span::none(), &blocker, "#cove", &entry("bob", "lost", 0));
        let _ = std::fs::remove_file(&blocker);
    }

    #[test]
    fn file_name_escapes_separators() {
        assert_eq!(file_name("#cove"), "#cove");
        assert_eq!(file_name("#a/b"), "#a%2Fb");
        assert_eq!(file_name("&..\\x"), "&..%5Cx");
        assert_eq!(file_name("#100%"), "#100%25");
        assert_eq!(file_name("#bell\u{7}"), "#bell%07");
    }

    #[test]
    fn channel_with_slash_stays_in_log_dir() {
        let dir = scratch_dir();
        append(&Span::none(), &dir, "#a/b", &entry("bob", "sub", 0));

        let contents = std::fs::read_to_string(dir.join("#a%2Fb")).unwrap();
        assert!(contents.contains("\"message\":\"sub\""));
        assert!(!dir.join("#a").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn pending_write_touches_disk_only_on_write() {
        let dir = scratch_dir();
        let pending = PendingWrite::new(Span::none(), dir.clone(), "#cove".into(), entry("bob", "later", 5));
        assert_eq!(pending.path(), dir.join("#cove"));
        assert!(!dir.exists());

        pending.write();

        assert!(dir.join("#cove").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
