//! JSON-lines page output
//!
//! Writes one object per crawled page:
//!
//! ```text
//! {"url":"https://example.com/a","depth":1,"crawled_at":"2024-01-01T00:00:00Z","data":{...}}
//! ```

use crate::output::traits::{OutputError, OutputResult, PageSink};
use chrono::Utc;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Serialize)]
struct PageRecord<'a> {
    url: &'a str,
    depth: u32,
    crawled_at: String,
    data: &'a serde_json::Value,
}

/// `PageSink` writing to a JSON-lines file
pub struct JsonLinesSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesSink {
    /// Opens the output file
    ///
    /// # Arguments
    ///
    /// * `path` - Output file, created if missing
    /// * `append` - Keep existing lines (resumed crawls) instead of truncating
    pub fn open(path: &Path, append: bool) -> OutputResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PageSink for JsonLinesSink {
    fn record_page(&self, url: &str, depth: u32, payload: &serde_json::Value) -> OutputResult<()> {
        let record = PageRecord {
            url,
            depth,
            crawled_at: Utc::now().to_rfc3339(),
            data: payload,
        };
        let line = serde_json::to_string(&record)?;

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| OutputError::Write("page writer lock poisoned".to_string()))?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&self) -> OutputResult<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| OutputError::Write("page writer lock poisoned".to_string()))?;
        writer.flush()?;
        writer.get_ref().sync_data()?;
        Ok(())
    }
}
