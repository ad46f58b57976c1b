//! CSV Sink — deterministic per-(date, operating_system, region) files.
//!
//! Path: `<root>/<data_type>/<date>/<operating_system>/<region>.csv`. Any
//! pre-existing file at the target path is deleted before write so a retried
//! write never leaves a partial overwrite mixed with old content (§4.2).

use crate::error::EngineError;
use crate::record::{Record, FIELD_ORDER};
use std::path::{Path, PathBuf};

pub trait CsvSink: Send + Sync {
    fn write(
        &self,
        data_type: &str,
        date: &str,
        operating_system: &str,
        region: &str,
        records: &[Record],
    ) -> Result<PathBuf, EngineError>;
}

pub struct FsCsvSink {
    root: PathBuf,
}

impl FsCsvSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsCsvSink { root: root.into() }
    }

    pub fn path_for(&self, data_type: &str, date: &str, operating_system: &str, region: &str) -> PathBuf {
        self.root
            .join(data_type)
            .join(date)
            .join(operating_system)
            .join(format!("{region}.csv"))
    }
}

impl CsvSink for FsCsvSink {
    fn write(
        &self,
        data_type: &str,
        date: &str,
        operating_system: &str,
        region: &str,
        records: &[Record],
    ) -> Result<PathBuf, EngineError> {
        let path = self.path_for(data_type, date, operating_system, region);
        let dir = path.parent().expect("csv path always has a parent");
        std::fs::create_dir_all(dir)
            .map_err(|e| EngineError::Sink(format!("creating {}: {e}", dir.display())))?;

        if path.exists() {
            std::fs::remove_file(&path)
                .map_err(|e| EngineError::Sink(format!("removing stale {}: {e}", path.display())))?;
        }

        let mut body = String::new();
        body.push_str(&FIELD_ORDER.join(","));
        body.push('\n');
        for record in records {
            let fields = record.csv_fields();
            body.push_str(&fields.iter().map(|f| escape_field(f)).collect::<Vec<_>>().join(","));
            body.push('\n');
        }

        std::fs::write(&path, body).map_err(|e| EngineError::Sink(format!("writing {}: {e}", path.display())))?;
        Ok(path)
    }
}

/// Quote a field if it contains a comma, quote, or newline, doubling any
/// internal quotes — plain RFC 4180 escaping.
fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

pub fn read_back(path: &Path) -> Result<Vec<Vec<String>>, EngineError> {
    let body = std::fs::read_to_string(path)
        .map_err(|e| EngineError::Sink(format!("reading {}: {e}", path.display())))?;
    Ok(body
        .lines()
        .skip(1)
        .filter(|l| !l.is_empty())
        .map(|line| line.split(',').map(|s| s.to_string()).collect())
        .collect())
}
