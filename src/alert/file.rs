use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{Alert, AlertHandler};
use crate::error::AlertError;

/// Appends alerts as JSON lines, flushing every `buffer_size` alerts.
pub struct FileAlertHandler {
    path: PathBuf,
    writer: BufWriter<File>,
    buffer_size: usize,
    pending: usize,
}

impl FileAlertHandler {
    pub fn open(path: &Path, buffer_size: usize) -> Result<Self, AlertError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            buffer_size: buffer_size.max(1),
            pending: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AlertHandler for FileAlertHandler {
    fn name(&self) -> &'static str {
        "file"
    }

    fn send_alert(&mut self, alert: &Alert) -> Result<bool, AlertError> {
        serde_json::to_writer(&mut self.writer, alert)?;
        self.writer.write_all(b"\n")?;
        self.pending += 1;
        if self.pending >= self.buffer_size {
            self.flush()?;
        }
        Ok(true)
    }

    fn flush(&mut self) -> Result<(), AlertError> {
        self.writer.flush()?;
        self.pending = 0;
        Ok(())
    }
}

impl Drop for FileAlertHandler {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::warn!("alert file {} flush on drop failed: {e}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(track_id: u64) -> Alert {
        Alert {
            track_id,
            confidence: 0.9,
            score: 0.8,
            bbox: [1.0, 2.0, 3.0, 4.0],
            class_id: 0,
            timestamp: 42,
            frame_sequence: 1,
        }
    }

    #[test]
    fn writes_json_lines_in_batches() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("alerts/alerts.jsonl");
        let mut handler = FileAlertHandler::open(&path, 2).expect("open");
        handler.send_alert(&alert(1)).expect("send");
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "");
        handler.send_alert(&alert(2)).expect("send");
        let text = std::fs::read_to_string(&path).expect("read");
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).expect("json"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["track_id"], 2);
        assert_eq!(lines[0]["timestamp"], 42);
    }

    #[test]
    fn drop_flushes_partial_batch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("alerts.jsonl");
        {
            let mut handler = FileAlertHandler::open(&path, 10).expect("open");
            handler.send_alert(&alert(5)).expect("send");
        }
        assert_eq!(std::fs::read_to_string(&path).expect("read").lines().count(), 1);
    }
}
