//! Tabular parser: uploaded CSV/XLSX bytes -> ordered raw row records.
//!
//! Pure transformation. Headers come from the first row and are trimmed;
//! columns with an empty header are dropped from every record.

use crate::error::{IngestError, ParseFailure};
use crate::model::{RawRow, RawValue};
use calamine::{Data, Range, Reader, Xlsx};
use encoding_rs::{Encoding, WINDOWS_1252};
use std::borrow::Cow;
use std::io::Cursor;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Csv,
    Xlsx,
}

impl ReportFormat {
    /// Detect format from the file extension (case-insensitive).
    pub fn detect(filename: &str) -> Option<Self> {
        let ext = Path::new(filename)
            .extension()?
            .to_str()?
            .to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(ReportFormat::Csv),
            "xlsx" => Some(ReportFormat::Xlsx),
            _ => None,
        }
    }
}

/// Parse an uploaded report into raw rows.
pub fn parse_report(filename: &str, bytes: &[u8]) -> Result<Vec<RawRow>, IngestError> {
    let format = ReportFormat::detect(filename).ok_or_else(|| IngestError::UnsupportedFormat {
        filename: filename.to_string(),
    })?;

    let parsed = match format {
        ReportFormat::Csv => parse_csv(&decode_text(bytes)),
        ReportFormat::Xlsx => parse_xlsx(bytes),
    };

    parsed.map_err(|source| IngestError::Parse {
        filename: filename.to_string(),
        source,
    })
}

/// Decode CSV bytes: honour a BOM, accept UTF-8, fall back to Windows-1252
/// for legacy Excel exports.
fn decode_text(bytes: &[u8]) -> Cow<'_, str> {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        return encoding.decode_without_bom_handling(&bytes[bom_len..]).0;
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => WINDOWS_1252.decode_without_bom_handling(bytes).0,
    }
}

fn parse_csv(content: &str) -> Result<Vec<RawRow>, ParseFailure> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;

        // Lines like ",,," carry no data at all
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }

        let mut row = RawRow::new();
        for (header, field) in headers.iter().zip(record.iter()) {
            if header.is_empty() {
                continue;
            }
            let value = if field.is_empty() {
                RawValue::Empty
            } else {
                RawValue::Text(field.to_string())
            };
            row.insert(header.clone(), value);
        }
        rows.push(row);
    }

    Ok(rows)
}

fn parse_xlsx(bytes: &[u8]) -> Result<Vec<RawRow>, ParseFailure> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(ParseFailure::NoSheets)??;
    Ok(rows_from_range(&range))
}

/// Project a worksheet range into row records. Row 1 of the sheet is the
/// header row, even when the used range starts further down.
fn rows_from_range(range: &Range<Data>) -> Vec<RawRow> {
    let Some((start_row, _)) = range.start() else {
        return Vec::new();
    };

    let mut rows_iter = range.rows();
    let headers: Vec<String> = if start_row == 0 {
        rows_iter
            .next()
            .map(|cells| cells.iter().map(header_text).collect())
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    rows_iter
        .map(|cells| {
            let mut row = RawRow::new();
            for (header, cell) in headers.iter().zip(cells.iter()) {
                if header.is_empty() {
                    continue;
                }
                row.insert(header.clone(), cell_value(cell));
            }
            row
        })
        .collect()
}

fn header_text(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Empty | Data::Error(_) => String::new(),
        other => other.to_string().trim().to_string(),
    }
}

fn cell_value(cell: &Data) -> RawValue {
    match cell {
        Data::Int(i) => RawValue::Number(*i as f64),
        Data::Float(f) => RawValue::Number(*f),
        Data::Bool(b) => RawValue::Bool(*b),
        Data::String(s) if s.is_empty() => RawValue::Empty,
        Data::String(s) => RawValue::Text(s.clone()),
        Data::Empty | Data::Error(_) => RawValue::Empty,
        other => RawValue::Text(other.to_string()),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> RawValue {
        RawValue::Text(s.to_string())
    }

    // -------------------------------------------------------------------------
    // FORMAT DETECTION
    // -------------------------------------------------------------------------

    #[test]
    fn test_detect_format_by_extension() {
        assert_eq!(ReportFormat::detect("report.csv"), Some(ReportFormat::Csv));
        assert_eq!(ReportFormat::detect("1700000000000-May.XLSX"), Some(ReportFormat::Xlsx));
        assert_eq!(ReportFormat::detect("incoming_reports/a.b.csv"), Some(ReportFormat::Csv));
        assert_eq!(ReportFormat::detect("report.pdf"), None);
        assert_eq!(ReportFormat::detect("report.xls"), None);
        assert_eq!(ReportFormat::detect("report"), None);
    }

    #[test]
    fn test_unsupported_format_carries_filename() {
        let err = parse_report("summary.pdf", b"%PDF-1.4").unwrap_err();
        match err {
            IngestError::UnsupportedFormat { filename } => assert_eq!(filename, "summary.pdf"),
            other => panic!("unexpected error: {other}"),
        }
    }

    // -------------------------------------------------------------------------
    // CSV
    // -------------------------------------------------------------------------

    #[test]
    fn test_csv_basic_rows() {
        let csv = "District,hps_score,zone\nCuttack,88.5,Central\nPuri,71,Coastal\n";
        let rows = parse_report("r.csv", csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["District"], text("Cuttack"));
        assert_eq!(rows[0]["hps_score"], text("88.5"));
        assert_eq!(rows[1]["zone"], text("Coastal"));
    }

    #[test]
    fn test_csv_header_only_yields_no_rows() {
        let rows = parse_report("r.csv", b"name,hps_score\n").unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_csv_empty_file_yields_no_rows() {
        let rows = parse_report("r.csv", b"").unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_csv_skips_blank_lines() {
        let csv = "name,hps_score\n\nPuri,10\n,\n\nKhordha,20\n";
        let rows = parse_report("r.csv", csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["name"], text("Khordha"));
    }

    #[test]
    fn test_csv_trims_headers_and_drops_empty_header_columns() {
        let csv = " name , ,hps_score\nPuri,ignored,10\n";
        let rows = parse_report("r.csv", csv.as_bytes()).unwrap();
        assert_eq!(rows[0].len(), 2);
        assert_eq!(rows[0]["name"], text("Puri"));
        assert!(!rows[0].contains_key(""));
    }

    #[test]
    fn test_csv_empty_cells_are_empty_values() {
        let csv = "name,hps_score,zone\nPuri,,\n";
        let rows = parse_report("r.csv", csv.as_bytes()).unwrap();
        assert_eq!(rows[0]["hps_score"], RawValue::Empty);
        assert_eq!(rows[0]["zone"], RawValue::Empty);
    }

    #[test]
    fn test_csv_short_rows_are_tolerated() {
        let csv = "name,hps_score,zone\nPuri,10\n";
        let rows = parse_report("r.csv", csv.as_bytes()).unwrap();
        assert_eq!(rows[0].len(), 2);
        assert!(!rows[0].contains_key("zone"));
    }

    #[test]
    fn test_csv_strips_utf8_bom() {
        let csv = "\u{feff}name,hps_score\nPuri,10\n";
        let rows = parse_report("r.csv", csv.as_bytes()).unwrap();
        assert_eq!(rows[0]["name"], text("Puri"));
    }

    #[test]
    fn test_csv_windows_1252_fallback() {
        // "Baleswar\xE9" is not valid UTF-8; 0xE9 is 'é' in Windows-1252
        let mut bytes = b"name,hps_score\nBaleswar".to_vec();
        bytes.push(0xE9);
        bytes.extend_from_slice(b",10\n");
        let rows = parse_report("r.csv", &bytes).unwrap();
        assert_eq!(rows[0]["name"], text("Baleswaré"));
    }

    #[test]
    fn test_csv_quoted_fields() {
        let csv = "name,zone\n\"Cuttack, Urban\",\"Central\"\n";
        let rows = parse_report("r.csv", csv.as_bytes()).unwrap();
        assert_eq!(rows[0]["name"], text("Cuttack, Urban"));
    }

    #[test]
    fn test_csv_parse_is_deterministic() {
        let csv = "name,hps_score\nA,1\nB,2\nC,3\n";
        let baseline = parse_report("r.csv", csv.as_bytes()).unwrap();
        for _ in 0..5 {
            assert_eq!(baseline, parse_report("r.csv", csv.as_bytes()).unwrap());
        }
    }

    // -------------------------------------------------------------------------
    // XLSX
    // -------------------------------------------------------------------------

    #[test]
    fn test_xlsx_garbage_is_parse_error() {
        let err = parse_report("report.xlsx", b"definitely not a zip archive").unwrap_err();
        match err {
            IngestError::Parse { filename, .. } => assert_eq!(filename, "report.xlsx"),
            other => panic!("unexpected error: {other}"),
        }
    }

    // Sheet "March": " District " | hps_score | (blank) | zone, then
    // Cuttack/91.5/dropped/Central, a blank row, and Puri alone.
    // Sheet "Notes" must never be read.
    const DISTRICT_WORKBOOK: &[u8] = include_bytes!("../fixtures/district_report.xlsx");

    #[test]
    fn test_xlsx_workbook_reads_first_sheet_only() {
        let rows = parse_report("1718000000000-march.xlsx", DISTRICT_WORKBOOK).unwrap();

        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| !r.contains_key("name")));

        assert_eq!(rows[0]["District"], text("Cuttack"));
        assert_eq!(rows[0]["hps_score"], RawValue::Number(91.5));
        assert_eq!(rows[0]["zone"], text("Central"));
        assert_eq!(rows[0].len(), 3);

        assert!(rows[1].values().all(RawValue::is_empty));

        assert_eq!(rows[2]["District"], text("Puri"));
        assert!(rows[2]["hps_score"].is_empty());
    }

    #[test]
    fn test_xlsx_extension_is_case_insensitive() {
        let rows = parse_report("MARCH.XLSX", DISTRICT_WORKBOOK).unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn test_range_rows_use_trimmed_headers() {
        let mut range: Range<Data> = Range::new((0, 0), (2, 2));
        range.set_value((0, 0), Data::String(" District ".into()));
        range.set_value((0, 1), Data::String("hps_score".into()));
        range.set_value((0, 2), Data::Empty);
        range.set_value((1, 0), Data::String("Cuttack".into()));
        range.set_value((1, 1), Data::Float(91.5));
        range.set_value((1, 2), Data::String("dropped".into()));
        range.set_value((2, 0), Data::String("Puri".into()));
        range.set_value((2, 1), Data::Int(70));

        let rows = rows_from_range(&range);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["District"], text("Cuttack"));
        assert_eq!(rows[0]["hps_score"], RawValue::Number(91.5));
        assert_eq!(rows[0].len(), 2);
        assert_eq!(rows[1]["hps_score"], RawValue::Number(70.0));
    }

    #[test]
    fn test_range_empty_data_row_still_emitted() {
        let mut range: Range<Data> = Range::new((0, 0), (2, 1));
        range.set_value((0, 0), Data::String("name".into()));
        range.set_value((0, 1), Data::String("hps_score".into()));
        range.set_value((2, 0), Data::String("Puri".into()));

        let rows = rows_from_range(&range);
        assert_eq!(rows.len(), 2);
        assert!(rows[0].values().all(RawValue::is_empty));
        assert_eq!(rows[1]["name"], text("Puri"));
    }

    #[test]
    fn test_range_without_header_row_yields_empty_records() {
        // Used range starts on sheet row 2, so row 1 (the header row) is blank
        let mut range: Range<Data> = Range::new((1, 0), (2, 0));
        range.set_value((1, 0), Data::String("name".into()));
        range.set_value((2, 0), Data::String("Puri".into()));

        let rows = rows_from_range(&range);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.is_empty()));
    }

    #[test]
    fn test_range_empty_sheet() {
        let range: Range<Data> = Range::empty();
        assert!(rows_from_range(&range).is_empty());
    }
}
