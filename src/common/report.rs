//! Report files.
//!
//! Every report type has a fixed header row and is written either as
//! RFC4180 CSV (quoted where needed, embedded quotes doubled) or as a JSON
//! array. File names embed the run id so runs never overwrite each other.

use crate::config::ReportFormat;
use crate::error::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// A record type that is written as one report file.
pub trait Report: Serialize + DeserializeOwned {
    /// File stem, e.g. `inventory`
    const NAME: &'static str;
    /// Header row, in field order
    const HEADERS: &'static [&'static str];
}

/// A report written during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputFile {
    pub report: String,
    pub path: PathBuf,
    pub records: usize,
}

/// Writes the reports of one run into one directory.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    dir: PathBuf,
    run_id: String,
    format: ReportFormat,
}

impl ReportWriter {
    pub fn new(dir: impl Into<PathBuf>, run_id: impl Into<String>, format: ReportFormat) -> Self {
        Self {
            dir: dir.into(),
            run_id: run_id.into(),
            format,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn format(&self) -> ReportFormat {
        self.format
    }

    /// Path of the report for `T` in this run.
    pub fn path_for<T: Report>(&self) -> PathBuf {
        report_path(&self.dir, T::NAME, &self.run_id, self.format)
    }

    /// Path of a non-tabular artifact (script, summary) in this run.
    pub fn artifact_path(&self, stem: &str, extension: &str) -> PathBuf {
        self.dir
            .join(format!("{}-{}.{}", stem, self.run_id, extension))
    }

    pub fn write<T: Report>(&self, records: &[T]) -> Result<OutputFile> {
        let path = self.path_for::<T>();
        write_report_to(&path, self.format, records)
    }
}

/// Conventional path of a report file.
pub fn report_path(dir: &Path, name: &str, run_id: &str, format: ReportFormat) -> PathBuf {
    dir.join(format!("{}-{}.{}", name, run_id, format.extension()))
}

/// `<stem>-<suffix>.<ext>` next to `primary`, for reports that accompany it.
pub fn sibling_path(primary: &Path, suffix: &str) -> PathBuf {
    let stem = primary
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match primary.extension() {
        Some(ext) => format!("{}-{}.{}", stem, suffix, ext.to_string_lossy()),
        None => format!("{}-{}", stem, suffix),
    };
    primary.with_file_name(name)
}

/// Format implied by a path's extension, CSV unless it ends in `.json`.
pub fn format_for_path(path: &Path) -> ReportFormat {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => ReportFormat::Json,
        _ => ReportFormat::Csv,
    }
}

/// Write `records` to `path`, creating parent directories.
pub fn write_report_to<T: Report>(
    path: &Path,
    format: ReportFormat,
    records: &[T],
) -> Result<OutputFile> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    match format {
        ReportFormat::Csv => {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_path(path)?;
            writer.write_record(T::HEADERS)?;
            for record in records {
                writer.serialize(record)?;
            }
            writer.flush()?;
        }
        ReportFormat::Json => {
            let file = File::create(path)?;
            serde_json::to_writer_pretty(file, records)?;
        }
    }

    log::debug!("Wrote {} {} records to {}", records.len(), T::NAME, path.display());
    Ok(OutputFile {
        report: T::NAME.to_string(),
        path: path.to_path_buf(),
        records: records.len(),
    })
}

/// Read a report written by [`write_report_to`]. Columns are matched by header name.
pub fn read_report<T: Report>(path: &Path) -> Result<Vec<T>> {
    match format_for_path(path) {
        ReportFormat::Csv => {
            let mut reader = csv::Reader::from_path(path)?;
            let mut records = Vec::new();
            for row in reader.deserialize() {
                records.push(row?);
            }
            Ok(records)
        }
        ReportFormat::Json => {
            let file = File::open(path)?;
            Ok(serde_json::from_reader(BufReader::new(file))?)
        }
    }
}

/// Serde adapter storing a list of strings as one `a; b; c` field.
pub mod list_field {
    use serde::{Deserialize, Deserializer, Serializer};

    const SEPARATOR: &str = "; ";

    pub fn serialize<S: Serializer>(items: &[String], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&items.join(SEPARATOR))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(raw
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct Row {
        name: String,
        note: Option<String>,
        #[serde(with = "list_field")]
        checks: Vec<String>,
    }

    impl Report for Row {
        const NAME: &'static str = "rows";
        const HEADERS: &'static [&'static str] = &["Name", "Note", "Checks"];
    }

    #[test]
    fn test_csv_quotes_special_characters() {
        let dir = TempDir::new().unwrap();
        let writer = ReportWriter::new(dir.path(), "20240101-000000", ReportFormat::Csv);
        let rows = vec![Row {
            name: "disk, \"big\"".to_string(),
            note: Some("line1\nline2".to_string()),
            checks: vec!["snapshot".to_string(), "confirm owner".to_string()],
        }];
        let out = writer.write(&rows).unwrap();
        assert_eq!(out.records, 1);
        assert!(out.path.ends_with("rows-20240101-000000.csv"));

        let content = fs::read_to_string(&out.path).unwrap();
        assert!(content.starts_with("Name,Note,Checks\n"));
        assert!(content.contains("\"disk, \"\"big\"\"\""));
        assert!(content.contains("\"line1\nline2\""));

        let back: Vec<Row> = read_report(&out.path).unwrap();
        assert_eq!(back, rows);
    }

    #[test]
    fn test_empty_report_still_has_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/rows.csv");
        let out = write_report_to::<Row>(&path, ReportFormat::Csv, &[]).unwrap();
        assert_eq!(out.records, 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), "Name,Note,Checks\n");
        let back: Vec<Row> = read_report(&path).unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn test_json_format() {
        let dir = TempDir::new().unwrap();
        let writer = ReportWriter::new(dir.path(), "r1", ReportFormat::Json);
        let rows = vec![Row {
            name: "a".to_string(),
            note: None,
            checks: vec![],
        }];
        let out = writer.write(&rows).unwrap();
        assert!(out.path.ends_with("rows-r1.json"));
        let back: Vec<Row> = read_report(&out.path).unwrap();
        assert_eq!(back, rows);
    }

    #[test]
    fn test_sibling_path() {
        assert_eq!(
            sibling_path(Path::new("/tmp/out/costs.csv"), "aggregate"),
            PathBuf::from("/tmp/out/costs-aggregate.csv")
        );
        assert_eq!(
            sibling_path(Path::new("activity"), "creators"),
            PathBuf::from("activity-creators")
        );
    }

    #[test]
    fn test_artifact_path() {
        let writer = ReportWriter::new("/tmp/out", "r9", ReportFormat::Csv);
        assert_eq!(
            writer.artifact_path("cleanup-script", "sh"),
            PathBuf::from("/tmp/out/cleanup-script-r9.sh")
        );
    }
}
