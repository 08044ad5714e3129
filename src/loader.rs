use crate::errors::LoadError;
use crate::models::{parse_flag, Record, ResponseStatus, VisitType};
use calamine::{open_workbook_auto, Data, Reader, Sheets};
use log::{info, warn};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

const FACILITY_COLUMN: &str = "Source.Name";
const IDENTITY_COLUMN: &str = "National ID";
const RESPONSE_COLUMN: &str = "Response";
const SCHEDULED_COLUMN: &str = "Scheduled";
const ARRIVED_COLUMN: &str = "Arrived";
const ENROLLMENT_COLUMN: &str = "Enrollment";

/// Source of sector tables consumed by the pipeline.
pub trait DatasetLoader {
    /// Rows of one sector table, or `DataUnavailable` when the table is
    /// missing or malformed.
    fn load(&mut self, sector: &str) -> Result<Vec<Record>, LoadError>;
}

/// Pick a loader for a local path: a directory holds `<sector>.csv` files,
/// anything else is opened as a spreadsheet workbook.
pub fn open_loader(path: &Path) -> Result<Box<dyn DatasetLoader>, LoadError> {
    if path.is_dir() {
        info!("📂 Reading sector CSV files from: {}", path.display());
        Ok(Box::new(CsvDirectoryLoader::new(path)))
    } else {
        info!("📂 Opening workbook: {}", path.display());
        Ok(Box::new(WorkbookLoader::open(path)?))
    }
}

/// Column positions resolved from a table's header row.
#[derive(Debug, Clone)]
struct ColumnMap {
    facility: usize,
    identity: Option<usize>,
    response: Option<usize>,
    scheduled: Option<usize>,
    arrived: Option<usize>,
    enrollment: Option<usize>,
}

impl ColumnMap {
    fn from_headers<I, S>(sector: &str, headers: I) -> Result<Self, LoadError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let headers: Vec<String> = headers
            .into_iter()
            .map(|h| h.as_ref().trim().to_lowercase())
            .collect();
        let find = |name: &str| headers.iter().position(|h| h == &name.to_lowercase());

        let facility = find(FACILITY_COLUMN).ok_or_else(|| {
            LoadError::unavailable(sector, format!("missing '{}' column", FACILITY_COLUMN))
        })?;

        let identity = find(IDENTITY_COLUMN);
        if identity.is_none() {
            warn!(
                "⚠️  Sector {} has no '{}' column - every row is treated as a distinct person",
                sector, IDENTITY_COLUMN
            );
        }

        Ok(Self {
            facility,
            identity,
            response: find(RESPONSE_COLUMN),
            scheduled: find(SCHEDULED_COLUMN),
            arrived: find(ARRIVED_COLUMN),
            enrollment: find(ENROLLMENT_COLUMN),
        })
    }

    /// Build a record from a row; `cell` returns trimmed non-blank text.
    fn record(&self, cell: impl Fn(usize) -> Option<String>) -> Record {
        let optional = |column: Option<usize>| column.and_then(&cell);

        Record {
            facility_source_name: cell(self.facility),
            identity_key: optional(self.identity),
            response: optional(self.response).and_then(|v| ResponseStatus::parse(&v)),
            visit_type: optional(self.scheduled).and_then(|v| VisitType::parse(&v)),
            arrived: optional(self.arrived).map(|v| parse_flag(&v)).unwrap_or(false),
            enrolled: optional(self.enrollment)
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
        }
    }
}

fn non_blank(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Reads one worksheet per sector from an XLSX/XLS/ODS workbook.
pub struct WorkbookLoader {
    workbook: Sheets<BufReader<File>>,
    sheet_names: Vec<String>,
}

impl WorkbookLoader {
    pub fn open(path: &Path) -> Result<Self, LoadError> {
        let workbook = open_workbook_auto(path)
            .map_err(|e| LoadError::Workbook(format!("{}: {}", path.display(), e)))?;
        let sheet_names = workbook.sheet_names().to_vec();
        info!("   ✅ Workbook opened. Available sheets: {}", sheet_names.join(", "));
        Ok(Self {
            workbook,
            sheet_names,
        })
    }
}

impl DatasetLoader for WorkbookLoader {
    fn load(&mut self, sector: &str) -> Result<Vec<Record>, LoadError> {
        if !self.sheet_names.iter().any(|name| name == sector) {
            return Err(LoadError::unavailable(
                sector,
                format!("sheet not found (available: {})", self.sheet_names.join(", ")),
            ));
        }

        let range = self
            .workbook
            .worksheet_range(sector)
            .map_err(|e| LoadError::unavailable(sector, e.to_string()))?;

        let mut rows = range.rows();
        let header = rows
            .next()
            .ok_or_else(|| LoadError::unavailable(sector, "sheet is empty"))?;
        let columns = ColumnMap::from_headers(
            sector,
            header.iter().map(|c| cell_text(c).unwrap_or_default()),
        )?;

        let records = rows
            .filter(|row| row.iter().any(|c| cell_text(c).is_some()))
            .map(|row| columns.record(|i| row.get(i).and_then(cell_text)))
            .collect();
        Ok(records)
    }
}

/// Render a cell as trimmed text. Whole-number floats lose their `.0` so
/// numeric national IDs compare equal to their text form.
fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty => None,
        Data::String(s) => non_blank(s),
        Data::Int(i) => Some(i.to_string()),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => Some(format!("{}", *f as i64)),
        other => non_blank(&other.to_string()),
    }
}

/// Reads `<dir>/<sector>.csv` for each sector.
pub struct CsvDirectoryLoader {
    dir: PathBuf,
}

impl CsvDirectoryLoader {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }
}

impl DatasetLoader for CsvDirectoryLoader {
    fn load(&mut self, sector: &str) -> Result<Vec<Record>, LoadError> {
        let path = self.dir.join(format!("{}.csv", sector));
        if !path.is_file() {
            return Err(LoadError::unavailable(
                sector,
                format!("file not found: {}", path.display()),
            ));
        }

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&path)
            .map_err(|e| LoadError::unavailable(sector, e.to_string()))?;

        let headers = reader
            .byte_headers()
            .map_err(|e| LoadError::unavailable(sector, e.to_string()))?
            .clone();
        let columns = ColumnMap::from_headers(sector, headers.iter().map(String::from_utf8_lossy))?;

        // Cells that are not valid UTF-8 read as empty, so a garbled ID
        // leaves its row unkeyed
        let mut undecodable = 0;
        let mut records = Vec::new();
        for row in reader.byte_records() {
            let row = row.map_err(|e| LoadError::unavailable(sector, e.to_string()))?;
            let fields: Vec<Option<&str>> = row.iter().map(|f| std::str::from_utf8(f).ok()).collect();
            undecodable += fields.iter().filter(|f| f.is_none()).count();
            if fields.iter().all(|f| f.map_or(false, |text| text.trim().is_empty())) {
                continue;
            }
            records.push(columns.record(|i| fields.get(i).copied().flatten().and_then(non_blank)));
        }

        if undecodable > 0 {
            warn!(
                "⚠️  Sector {}: {} cells are not valid UTF-8 and were read as empty",
                sector, undecodable
            );
        }
        Ok(records)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// In-memory sector tables for pipeline tests.
    pub(crate) struct StaticLoader {
        pub sectors: HashMap<String, Vec<Record>>,
    }

    impl DatasetLoader for StaticLoader {
        fn load(&mut self, sector: &str) -> Result<Vec<Record>, LoadError> {
            self.sectors
                .get(sector)
                .cloned()
                .ok_or_else(|| LoadError::unavailable(sector, "not present"))
        }
    }

    pub(crate) fn write_sector_csv(dir: &Path, sector: &str, rows: &[[&str; 6]]) {
        let mut writer = csv::Writer::from_path(dir.join(format!("{}.csv", sector))).unwrap();
        writer
            .write_record([
                "Source.Name",
                "National ID",
                "Response",
                "Scheduled",
                "Arrived",
                "Enrollment",
            ])
            .unwrap();
        for row in rows {
            writer.write_record(row).unwrap();
        }
        writer.flush().unwrap();
    }

    #[test]
    fn csv_loader_maps_columns_into_records() {
        let dir = tempfile::tempdir().unwrap();
        write_sector_csv(
            dir.path(),
            "western_sector",
            &[
                ["PHC Al-Noor.xlsx", "1001", "Accepted", "In-Person", "Yes", "yes"],
                ["PHC Al-Noor.xlsx", " ", "", "", "No", ""],
                ["", "", "", "", "", ""],
            ],
        );

        let mut loader = CsvDirectoryLoader::new(dir.path());
        let records = loader.load("western_sector").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].identity_key.as_deref(), Some("1001"));
        assert_eq!(records[0].response, Some(ResponseStatus::Accepted));
        assert_eq!(records[0].visit_type, Some(VisitType::InPerson));
        assert!(records[0].arrived && records[0].enrolled);
        assert_eq!(records[1].identity_key, None);
        assert_eq!(records[1].response, None);
        assert!(!records[1].arrived);
    }

    #[test]
    fn missing_sector_file_is_data_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = CsvDirectoryLoader::new(dir.path());
        let err = loader.load("eastern_sector").unwrap_err();
        assert!(matches!(err, LoadError::DataUnavailable { ref sector, .. } if sector == "eastern_sector"));
    }

    #[test]
    fn table_without_facility_column_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("northern_sector.csv"), "Name,National ID\nA,1\n").unwrap();
        let mut loader = CsvDirectoryLoader::new(dir.path());
        assert!(matches!(
            loader.load("northern_sector"),
            Err(LoadError::DataUnavailable { .. })
        ));
    }

    #[test]
    fn missing_identity_column_leaves_rows_unkeyed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("southern_sector.csv"),
            "source.name,Response\nPHC A,Refused\nPHC A,Accepted\n",
        )
        .unwrap();
        let mut loader = CsvDirectoryLoader::new(dir.path());
        let records = loader.load("southern_sector").unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.identity_key.is_none()));
    }

    #[test]
    fn undecodable_id_cell_leaves_row_unkeyed() {
        let dir = tempfile::tempdir().unwrap();
        let mut content = b"Source.Name,National ID,Response\nPHC A,1001,Accepted\nPHC A,".to_vec();
        content.extend_from_slice(&[0xff, 0xfe]);
        content.extend_from_slice(b",Refused\nPHC B,1002,\n");
        std::fs::write(dir.path().join("western_sector.csv"), content).unwrap();

        let mut loader = CsvDirectoryLoader::new(dir.path());
        let records = loader.load("western_sector").unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].identity_key.as_deref(), Some("1001"));
        assert_eq!(records[1].identity_key, None);
        assert_eq!(records[1].facility_source_name.as_deref(), Some("PHC A"));
        assert_eq!(records[1].response, Some(ResponseStatus::Refused));
        assert_eq!(records[2].identity_key.as_deref(), Some("1002"));
    }

    #[test]
    fn workbook_loader_reads_each_sector_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outreach.xlsx");
        let mut workbook = rust_xlsxwriter::Workbook::new();

        // Columns out of order; row 2 left blank
        let western = workbook.add_worksheet().set_name("western_sector").unwrap();
        let headers = ["National ID", "Source.Name", "Response", "Scheduled", "Arrived", "Enrollment"];
        for (col, header) in headers.iter().enumerate() {
            western.write_string(0, col as u16, *header).unwrap();
        }
        western.write_number(1, 0, 1029384756.0).unwrap();
        western.write_string(1, 1, "PHC Al-Noor.xlsx").unwrap();
        western.write_string(1, 2, "Accepted").unwrap();
        western.write_string(1, 3, "Virtual").unwrap();
        western.write_string(1, 4, "Yes").unwrap();
        western.write_string(3, 1, "PHC Al-Noor.xlsx").unwrap();
        western.write_string(3, 2, "Refused").unwrap();

        let eastern = workbook.add_worksheet().set_name("eastern_sector").unwrap();
        eastern.write_string(0, 0, "Source.Name").unwrap();
        eastern.write_string(0, 1, "National ID").unwrap();
        eastern.write_string(1, 0, "PHC Al-Shifa").unwrap();
        eastern.write_string(1, 1, "2002").unwrap();
        workbook.save(&path).unwrap();

        let mut loader = open_loader(&path).unwrap();

        let western = loader.load("western_sector").unwrap();
        assert_eq!(western.len(), 2);
        assert_eq!(western[0].identity_key.as_deref(), Some("1029384756"));
        assert_eq!(western[0].facility_source_name.as_deref(), Some("PHC Al-Noor.xlsx"));
        assert_eq!(western[0].response, Some(ResponseStatus::Accepted));
        assert_eq!(western[0].visit_type, Some(VisitType::Virtual));
        assert!(western[0].arrived && !western[0].enrolled);
        assert_eq!(western[1].identity_key, None);
        assert_eq!(western[1].response, Some(ResponseStatus::Refused));

        let eastern = loader.load("eastern_sector").unwrap();
        assert_eq!(eastern.len(), 1);
        assert_eq!(eastern[0].identity_key.as_deref(), Some("2002"));
        assert_eq!(eastern[0].response, None);

        let err = loader.load("northern_sector").unwrap_err();
        assert!(matches!(err, LoadError::DataUnavailable { ref sector, .. } if sector == "northern_sector"));
    }

    #[test]
    fn numeric_cells_render_without_fraction() {
        assert_eq!(cell_text(&Data::Float(1029384756.0)).as_deref(), Some("1029384756"));
        assert_eq!(cell_text(&Data::Int(42)).as_deref(), Some("42"));
        assert_eq!(cell_text(&Data::String("  ".to_string())), None);
        assert_eq!(cell_text(&Data::Empty), None);
    }

    #[test]
    fn unreadable_workbook_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.xlsx");
        std::fs::write(&path, b"not a zip archive").unwrap();
        assert!(matches!(WorkbookLoader::open(&path), Err(LoadError::Workbook(_))));
    }
}
