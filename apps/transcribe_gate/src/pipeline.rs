use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::transcript::extract_text;

/// External programs the gateway shells out to.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub ffmpeg: PathBuf,
    pub whisper: PathBuf,
    pub model: PathBuf,
    pub segment_secs: u32,
}

impl Toolchain {
    /// Cut `input` into `chunk_%03d.wav` segments inside `chunk_dir`; returns them in name order.
    pub async fn split(&self, input: &Path, chunk_dir: &Path) -> Result<Vec<PathBuf>> {
        let pattern = chunk_dir.join("chunk_%03d.wav");
        let out = Command::new(&self.ffmpeg)
            .arg("-i")
            .arg(input)
            .args(["-f", "segment", "-segment_time"])
            .arg(self.segment_secs.to_string())
            .args(["-c", "copy"])
            .arg(&pattern)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("spawn {}", self.ffmpeg.display()))?;
        if !out.status.success() {
            return Err(anyhow!(
                "ffmpeg exited with {}: {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            ));
        }

        let mut chunks = Vec::new();
        let mut rd = tokio::fs::read_dir(chunk_dir).await?;
        while let Some(entry) = rd.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "wav") {
                chunks.push(path);
            }
        }
        chunks.sort();
        debug!(input = %input.display(), chunks = chunks.len(), "audio split");
        Ok(chunks)
    }

    /// Run whisper-cli on one chunk and return the extracted text.
    pub async fn transcribe(&self, chunk: &Path) -> Result<String> {
        let out = Command::new(&self.whisper)
            .arg("-f")
            .arg(chunk)
            .arg("--model")
            .arg(&self.model)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("spawn {}", self.whisper.display()))?;
        let mut raw = String::from_utf8_lossy(&out.stdout).into_owned();
        raw.push_str(&String::from_utf8_lossy(&out.stderr));
        if !out.status.success() {
            return Err(anyhow!("whisper exited with {} on {}", out.status, chunk.display()));
        }
        Ok(extract_text(&raw))
    }
}

/// Upload file and chunk directory of one request.
///
/// `cleanup` removes both without blocking the runtime. Drop only removes
/// what `cleanup` never got to, e.g. when the task is cancelled.
pub struct Scratch {
    pub upload: PathBuf,
    pub chunks: PathBuf,
    cleaned: bool,
}

impl Scratch {
    pub fn new(upload: PathBuf, chunks: PathBuf) -> Self {
        Self { upload, chunks, cleaned: false }
    }

    pub async fn cleanup(mut self) {
        if let Err(e) = tokio::fs::remove_file(&self.upload).await {
            debug!(path = %self.upload.display(), "remove upload: {e}");
        }
        if let Err(e) = tokio::fs::remove_dir_all(&self.chunks).await {
            debug!(path = %self.chunks.display(), "remove chunks: {e}");
        }
        self.cleaned = true;
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        if self.cleaned {
            return;
        }
        let _ = std::fs::remove_file(&self.upload);
        let _ = std::fs::remove_dir_all(&self.chunks);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn scratch_in(dir: &Path) -> Scratch {
        let upload = dir.join("1.mp3");
        let chunks = dir.join("1_chunks");
        std::fs::write(&upload, b"x").unwrap();
        std::fs::create_dir_all(&chunks).unwrap();
        std::fs::write(chunks.join("chunk_000.wav"), b"y").unwrap();
        Scratch::new(upload, chunks)
    }

    #[tokio::test]
    async fn cleanup_removes_upload_and_chunks() {
        let dir = tempdir().unwrap();
        let scratch = scratch_in(dir.path());
        let (upload, chunks) = (scratch.upload.clone(), scratch.chunks.clone());

        scratch.cleanup().await;
        assert!(!upload.exists());
        assert!(!chunks.exists());
    }

    #[tokio::test]
    async fn cleanup_tolerates_missing_paths() {
        let dir = tempdir().unwrap();
        Scratch::new(dir.path().join("gone.mp3"), dir.path().join("gone_chunks")).cleanup().await;
    }

    #[test]
    fn drop_without_cleanup_still_removes() {
        let dir = tempdir().unwrap();
        let scratch = scratch_in(dir.path());
        let (upload, chunks) = (scratch.upload.clone(), scratch.chunks.clone());

        drop(scratch);
        assert!(!upload.exists());
        assert!(!chunks.exists());
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let dir = tempdir().unwrap();
        let tools = Toolchain {
            ffmpeg: dir.path().join("no-ffmpeg"),
            whisper: dir.path().join("no-whisper"),
            model: dir.path().join("model.bin"),
            segment_secs: 5,
        };
        assert!(tools.split(&dir.path().join("in.wav"), dir.path()).await.is_err());
        assert!(tools.transcribe(&dir.path().join("chunk_000.wav")).await.is_err());
    }
}
