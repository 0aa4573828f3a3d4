use crate::sample::{SAMPLE_COLUMNS, Sample};
use crate::utils::errors::MonitoringError;
use csv::Writer;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Append-only CSV log of samples. The header is written once, on creation; every row is
/// flushed before `append` returns.
pub struct SampleLog {
    path: PathBuf,
    writer: Writer<File>,
    rows: usize,
}

impl SampleLog {
    pub fn create(path: &Path) -> Result<Self, MonitoringError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        let mut writer = Writer::from_writer(file);
        writer.write_record(SAMPLE_COLUMNS)?;
        writer.flush()?;

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            rows: 0,
        })
    }

    pub fn append(&mut self, sample: &Sample) -> Result<(), MonitoringError> {
        self.writer.write_record(sample.to_record())?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> usize {
        self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use tempfile::TempDir;

    fn read_rows(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
        let mut reader = csv::Reader::from_path(path).unwrap();
        let header = reader
            .headers()
            .unwrap()
            .iter()
            .map(str::to_string)
            .collect();
        let rows = reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect();
        (header, rows)
    }

    #[test]
    fn test_header_written_without_samples() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.csv");
        let log = SampleLog::create(&path).unwrap();
        assert_eq!(log.rows(), 0);
        drop(log);

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, format!("{}\n", SAMPLE_COLUMNS.join(",")));
    }

    #[test]
    fn test_rows_are_visible_after_each_append() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("run.csv");
        let mut log = SampleLog::create(&path).unwrap();

        let mut sample = Sample::empty(Local::now(), 0.5);
        sample.gpu_name = Some("Board, rev 2".to_string());
        log.append(&sample).unwrap();

        // Still open: the row must already be on disk.
        let (header, rows) = read_rows(&path);
        assert_eq!(header, SAMPLE_COLUMNS.to_vec());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][4], "Board, rev 2");
        assert_eq!(rows[0][2], "");

        log.append(&Sample::empty(Local::now(), 1.0)).unwrap();
        let (_, rows) = read_rows(&path);
        assert_eq!(rows.len(), 2);
        assert_eq!(log.rows(), 2);
        assert_eq!(log.path(), path.as_path());
    }
}
