use std::fs::{File, OpenOptions};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

const LOG_FILENAME: &str = "scalars.csv";

#[derive(Debug, Serialize)]
struct ScalarRecord<'a> {
    epoch: usize,
    batch: usize,
    tag: &'a str,
    value: f64,
}

/// Append-only CSV time series of training scalars (`epoch,batch,tag,value`)
pub struct ScalarLog {
    writer: csv::Writer<File>,
}

impl ScalarLog {
    /// Open `<dir>/scalars.csv` for appending; the header is written only
    /// when the file is new, so resumed runs extend the same series.
    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join(LOG_FILENAME);
        let is_new = !path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open scalar log {}", path.display()))?;
        let writer = csv::WriterBuilder::new().has_headers(is_new).from_writer(file);
        Ok(Self { writer })
    }

    /// Write one value and flush, so the file can be tailed while training.
    pub fn record(&mut self, epoch: usize, batch: usize, tag: &str, value: f64) -> Result<()> {
        self.writer
            .serialize(ScalarRecord {
                epoch,
                batch,
                tag,
                value,
            })
            .context("Failed to write scalar")?;
        self.writer.flush().context("Failed to flush scalar log")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_rows_under_header() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = ScalarLog::create(&dir.path().join("logs")).unwrap();
        log.record(0, 3, "g_loss", 1.5).unwrap();
        log.record(0, 3, "d_loss", 0.25).unwrap();

        let text = std::fs::read_to_string(dir.path().join("logs/scalars.csv")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["epoch,batch,tag,value", "0,3,g_loss,1.5", "0,3,d_loss,0.25"]);
    }

    #[test]
    fn test_reopening_appends_without_second_header() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut log = ScalarLog::create(dir.path()).unwrap();
            log.record(0, 0, "g_loss", 2.0).unwrap();
        }
        let mut log = ScalarLog::create(dir.path()).unwrap();
        log.record(1, 0, "g_loss", 1.0).unwrap();

        let text = std::fs::read_to_string(dir.path().join(LOG_FILENAME)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["epoch,batch,tag,value", "0,0,g_loss,2.0", "1,0,g_loss,1.0"]);
    }
}
