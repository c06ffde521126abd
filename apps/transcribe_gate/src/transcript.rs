//! whisper-cli output parsing and the append-only transcript log.

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;

fn segment_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\[\d{2}:\d{2}:\d{2}(?:\.\d+)?\s*-->\s*\d{2}:\d{2}:\d{2}(?:\.\d+)?\]\s*(.*)")
            .expect("segment pattern compiles")
    })
}

/// Keep the text of `[hh:mm:ss.mmm --> hh:mm:ss.mmm] text` lines, joined by spaces.
pub fn extract_text(raw: &str) -> String {
    raw.lines()
        .filter_map(|line| segment_line().captures(line))
        .filter_map(|caps| caps.get(1))
        .map(|m| {
            let text = m.as_str();
            text.strip_prefix('♪').unwrap_or(text).trim()
        })
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// First four characters, the rest hidden.
pub fn mask_key(key: &str) -> String {
    let shown: String = key.chars().take(4).collect();
    if shown.chars().count() < key.chars().count() {
        format!("{shown}***")
    } else {
        "***".to_string()
    }
}

pub fn log_entry(at: OffsetDateTime, client: &str, api_key: &str, file_name: &str, transcript: &str) -> String {
    let stamp = at.format(&Rfc3339).unwrap_or_else(|_| at.unix_timestamp().to_string());
    format!(
        "[{stamp}] IP: {client} | Key: {} | File: {file_name}\nTranscription: {transcript}\n\n",
        mask_key(api_key)
    )
}

pub async fn append_entry(path: &Path, entry: &str) -> std::io::Result<()> {
    let mut f = tokio::fs::OpenOptions::new().create(true).append(true).open(path).await?;
    f.write_all(entry.as_bytes()).await?;
    f.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn extracts_segment_text() {
        let raw = "\
whisper_init_from_file: loading model
[00:00:00.000 --> 00:00:02.500]   Hello there.
[00:00:02.500 --> 00:00:05.000]  ♪ General Kenobi ♪
not a segment [00:00:01.000 --> 00:00:02.000] skipped
[00:00:05 --> 00:00:06]
";
        assert_eq!(extract_text(raw), "Hello there. General Kenobi ♪");
    }

    #[test]
    fn no_segments_is_empty() {
        assert_eq!(extract_text("system_info: n_threads = 4\n"), "");
    }

    #[test]
    fn masks_keys() {
        assert_eq!(mask_key("sk-live-123"), "sk-l***");
        assert_eq!(mask_key("abcd"), "***");
        assert_eq!(mask_key(""), "***");
    }

    #[test]
    fn formats_entry() {
        let at = datetime!(2024-03-01 12:30:00 UTC);
        let entry = log_entry(at, "10.0.0.7:5123", "sk-live-123", "talk.mp3", "hi there");
        assert_eq!(
            entry,
            "[2024-03-01T12:30:00Z] IP: 10.0.0.7:5123 | Key: sk-l*** | File: talk.mp3\nTranscription: hi there\n\n"
        );
    }

    #[tokio::test]
    async fn appends_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tra.txt");
        append_entry(&path, "one\n").await.unwrap();
        append_entry(&path, "two\n").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }
}
