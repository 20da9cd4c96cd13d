use crate::models::{MarketRecord, MarketSnapshot};
use log::{debug, info};
use rust_xlsxwriter::{
    Chart, ChartType, Color, ColNum, Format, FormatAlign, RowNum, Workbook, Worksheet, XlsxError,
};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SHEET_NAME: &str = "Crypto Data";
pub const HEADERS: [&str; 6] = [
    "Name",
    "Symbol",
    "Current Price",
    "Market Cap",
    "Total Volume",
    "24h % Change",
];
const COLUMN_WIDTHS: [f64; 6] = [20.0, 10.0, 15.0, 20.0, 20.0, 30.0];

const NAME_COL: ColNum = 0;
const MARKET_CAP_COL: ColNum = 3;
const CHANGE_COL: ColNum = 5;
// H2
const CHART_ANCHOR: (RowNum, ColNum) = (1, 7);

const POSITIVE_FILL: u32 = 0xC6EFCE;
const NEGATIVE_FILL: u32 = 0xFFC7CE;

const ASIDE_SUFFIX: &str = ".lock-check";
const MAX_ASIDE_NAMES: usize = 16;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("{} is open in another program; close it and the next cycle will retry", .path.display())]
    FileLocked { path: PathBuf },
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to build workbook: {0}")]
    Xlsx(#[from] XlsxError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeFill {
    Positive,
    Negative,
}

impl ChangeFill {
    fn color(self) -> Color {
        match self {
            ChangeFill::Positive => Color::RGB(POSITIVE_FILL),
            ChangeFill::Negative => Color::RGB(NEGATIVE_FILL),
        }
    }
}

/// Fill for a 24h change cell. Zero and missing values stay unstyled.
pub fn change_fill(change: Option<f64>) -> Option<ChangeFill> {
    match change {
        Some(value) if value > 0.0 => Some(ChangeFill::Positive),
        Some(value) if value < 0.0 => Some(ChangeFill::Negative),
        _ => None,
    }
}

/// Writes the snapshot to `path` as a single-sheet workbook with a market cap
/// chart. The previous file is replaced only once the new one is complete.
pub fn render(snapshot: &MarketSnapshot, path: &Path) -> Result<(), WriteError> {
    check_file_availability(path)?;

    let bytes = build_workbook(&snapshot.records)?;
    debug!("Workbook serialized to {} bytes", bytes.len());

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| WriteError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    replace_file(path, &bytes)?;
    info!(
        "Report with {} rows written to {}",
        snapshot.len(),
        path.display()
    );
    Ok(())
}

/// Best-effort check that nothing holds the existing report open: rename it
/// aside and straight back. Racy by nature; a file opened after the check is
/// not detected.
pub fn check_file_availability(path: &Path) -> Result<(), WriteError> {
    if fs::symlink_metadata(path).is_err() {
        return Ok(());
    }

    let aside = free_aside_path(path)?;
    if let Err(err) = fs::rename(path, &aside) {
        debug!("Lock check on {} failed: {}", path.display(), err);
        return Err(WriteError::FileLocked {
            path: path.to_path_buf(),
        });
    }
    fs::rename(&aside, path).map_err(|source| WriteError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// Never rename onto an existing sibling: on Unix that would replace it.
fn free_aside_path(path: &Path) -> Result<PathBuf, WriteError> {
    for attempt in 0..MAX_ASIDE_NAMES {
        let suffix = match attempt {
            0 => ASIDE_SUFFIX.to_string(),
            n => format!("{}-{}", ASIDE_SUFFIX, n),
        };
        let candidate = sibling_path(path, "", &suffix)?;
        if fs::symlink_metadata(&candidate).is_err() {
            return Ok(candidate);
        }
    }
    Err(WriteError::Io {
        path: path.to_path_buf(),
        source: io::Error::new(
            io::ErrorKind::AlreadyExists,
            "every rename-aside name next to the report is taken",
        ),
    })
}

fn build_workbook(records: &[MarketRecord]) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(SHEET_NAME)?;

    write_header(worksheet)?;
    for (index, record) in records.iter().enumerate() {
        write_record(worksheet, index as RowNum + 1, record)?;
    }

    if !records.is_empty() {
        let chart = market_cap_chart(records.len() as RowNum);
        worksheet.insert_chart(CHART_ANCHOR.0, CHART_ANCHOR.1, &chart)?;
    }

    workbook.save_to_buffer()
}

fn write_header(worksheet: &mut Worksheet) -> Result<(), XlsxError> {
    let header_format = Format::new()
        .set_bold()
        .set_align(FormatAlign::Center)
        .set_align(FormatAlign::VerticalCenter);

    for (col, header) in HEADERS.iter().enumerate() {
        worksheet.write_string_with_format(0, col as ColNum, *header, &header_format)?;
    }
    for (col, width) in COLUMN_WIDTHS.iter().enumerate() {
        worksheet.set_column_width(col as ColNum, *width)?;
    }
    Ok(())
}

fn write_record(
    worksheet: &mut Worksheet,
    row: RowNum,
    record: &MarketRecord,
) -> Result<(), XlsxError> {
    worksheet.write_string(row, NAME_COL, &record.name)?;
    worksheet.write_string(row, 1, &record.symbol)?;
    worksheet.write_number(row, 2, record.current_price)?;
    worksheet.write_number(row, MARKET_CAP_COL, record.market_cap as f64)?;
    worksheet.write_number(row, 4, record.total_volume as f64)?;

    let Some(change) = record.price_change_percentage_24h else {
        return Ok(());
    };
    match change_fill(Some(change)) {
        Some(fill) => {
            let format = Format::new().set_background_color(fill.color());
            worksheet.write_number_with_format(row, CHANGE_COL, change, &format)?;
        }
        None => {
            worksheet.write_number(row, CHANGE_COL, change)?;
        }
    }
    Ok(())
}

fn market_cap_chart(last_row: RowNum) -> Chart {
    let mut chart = Chart::new(ChartType::Column);
    chart.title().set_name("Market Cap Distribution");
    chart.x_axis().set_name("Cryptocurrency");
    chart.y_axis().set_name("Market Cap (USD)");
    chart
        .add_series()
        .set_name((SHEET_NAME, 0, MARKET_CAP_COL))
        .set_categories((SHEET_NAME, 1, NAME_COL, last_row, NAME_COL))
        .set_values((SHEET_NAME, 1, MARKET_CAP_COL, last_row, MARKET_CAP_COL));
    chart
}

fn replace_file(path: &Path, bytes: &[u8]) -> Result<(), WriteError> {
    let staging = sibling_path(path, ".", ".tmp")?;
    if let Err(source) = write_and_rename(&staging, path, bytes) {
        let _ = fs::remove_file(&staging);
        return Err(WriteError::Io {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

fn write_and_rename(staging: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(staging)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(staging, path)
}

fn sibling_path(path: &Path, prefix: &str, suffix: &str) -> Result<PathBuf, WriteError> {
    let Some(file_name) = path.file_name() else {
        return Err(WriteError::Io {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "output path has no file name"),
        });
    };
    let mut name = std::ffi::OsString::from(prefix);
    name.push(file_name);
    name.push(suffix);
    Ok(path.with_file_name(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    fn record(name: &str, change: Option<f64>) -> MarketRecord {
        MarketRecord {
            name: name.to_string(),
            symbol: name.to_lowercase(),
            current_price: 1.5,
            market_cap: 1_000_000,
            total_volume: 50_000,
            price_change_percentage_24h: change,
        }
    }

    // A name this long leaves no room for the rename-aside suffix, so the
    // rename fails even for privileged users.
    fn unrenamable_report(dir: &Path) -> PathBuf {
        dir.join(format!("{}.xlsx", "r".repeat(245)))
    }

    fn xlsx_part(bytes: &[u8], name: &str) -> String {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut part = archive.by_name(name).unwrap();
        let mut xml = String::new();
        part.read_to_string(&mut xml).unwrap();
        xml
    }

    fn section<'a>(xml: &'a str, open: &str, close: &str) -> &'a str {
        let start = xml.find(open).unwrap_or_else(|| panic!("{open} missing"));
        let end = start + xml[start..].find(close).unwrap_or_else(|| panic!("{close} missing"));
        &xml[start..end]
    }

    fn attr<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
        let key = format!(r#" {name}=""#);
        let start = tag.find(&key)? + key.len();
        let len = tag[start..].find('"')?;
        Some(&tag[start..start + len])
    }

    fn cell_tag<'a>(sheet: &'a str, cell: &str) -> Option<&'a str> {
        let start = sheet.find(&format!(r#"<c r="{cell}""#))?;
        let len = sheet[start..].find('>')?;
        Some(&sheet[start..start + len])
    }

    fn cell_xf<'a>(styles: &'a str, sheet: &str, cell: &str) -> Option<&'a str> {
        let index: usize = attr(cell_tag(sheet, cell)?, "s")?.parse().ok()?;
        section(styles, "<cellXfs", "</cellXfs>").split("<xf ").nth(index + 1)
    }

    fn fill_of(styles: &str, xf: &str) -> String {
        let fill_id: usize = attr(&format!(" {xf}"), "fillId").unwrap().parse().unwrap();
        section(styles, "<fills", "</fills>")
            .split("<fill>")
            .nth(fill_id + 1)
            .unwrap()
            .to_string()
    }

    #[test]
    fn fill_follows_sign_of_change() {
        assert_eq!(change_fill(Some(0.01)), Some(ChangeFill::Positive));
        assert_eq!(change_fill(Some(-0.01)), Some(ChangeFill::Negative));
        assert_eq!(change_fill(Some(0.0)), None);
        assert_eq!(change_fill(None), None);
    }

    #[test]
    fn workbook_colors_change_cells_by_sign() {
        let bytes = build_workbook(&[
            record("Up", Some(0.01)),
            record("Down", Some(-0.01)),
            record("Flat", Some(0.0)),
            record("Unknown", None),
        ])
        .unwrap();
        let sheet = xlsx_part(&bytes, "xl/worksheets/sheet1.xml");
        let styles = xlsx_part(&bytes, "xl/styles.xml");

        let up = cell_xf(&styles, &sheet, "F2").expect("F2 unstyled");
        assert!(fill_of(&styles, up).contains("C6EFCE"), "{up}");
        let down = cell_xf(&styles, &sheet, "F3").expect("F3 unstyled");
        assert!(fill_of(&styles, down).contains("FFC7CE"), "{down}");

        assert!(cell_tag(&sheet, "F4").is_some());
        assert!(cell_xf(&styles, &sheet, "F4").is_none());
        assert!(cell_tag(&sheet, "F5").is_none());
    }

    #[test]
    fn header_is_bold_and_centered() {
        let bytes = build_workbook(&[record("A", None)]).unwrap();
        let sheet = xlsx_part(&bytes, "xl/worksheets/sheet1.xml");
        let styles = xlsx_part(&bytes, "xl/styles.xml");

        for cell in ["A1", "F1"] {
            let xf = cell_xf(&styles, &sheet, cell).expect("header unstyled");
            assert!(xf.contains(r#"horizontal="center""#), "{xf}");
            let font_id: usize = attr(&format!(" {xf}"), "fontId").unwrap().parse().unwrap();
            let font = section(&styles, "<fonts", "</fonts>")
                .split("<font>")
                .nth(font_id + 1)
                .unwrap();
            assert!(font.contains("<b/>"), "{font}");
        }
    }

    #[test]
    fn chart_plots_market_cap_by_name_at_h2() {
        let bytes = build_workbook(&[
            record("A", Some(1.0)),
            record("B", Some(-1.0)),
            record("C", None),
        ])
        .unwrap();
        let chart = xlsx_part(&bytes, "xl/charts/chart1.xml");
        let drawing = xlsx_part(&bytes, "xl/drawings/drawing1.xml");

        assert!(chart.contains("<c:barChart>"));
        assert!(chart.contains(r#"<c:barDir val="col"/>"#));
        let series = section(&chart, "<c:ser>", "</c:ser>");
        assert!(section(series, "<c:tx>", "</c:tx>").contains("'Crypto Data'!$D$1"));
        assert!(section(series, "<c:cat>", "</c:cat>").contains("'Crypto Data'!$A$2:$A$4"));
        assert!(section(series, "<c:val>", "</c:val>").contains("'Crypto Data'!$D$2:$D$4"));
        assert_eq!(chart.matches("<c:ser>").count(), 1);
        for title in ["Market Cap Distribution", "Cryptocurrency", "Market Cap (USD)"] {
            assert!(chart.contains(title), "{title} missing");
        }

        let anchor = section(&drawing, "<xdr:from>", "</xdr:from>");
        assert!(anchor.contains("<xdr:col>7</xdr:col>"), "{anchor}");
        assert!(anchor.contains("<xdr:row>1</xdr:row>"), "{anchor}");
    }

    #[test]
    fn renders_workbook_and_leaves_no_scratch_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("report.xlsx");
        let snapshot = MarketSnapshot::new(vec![record("A", Some(1.0)), record("B", None)], 1);

        render(&snapshot, &path).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], b"PK");
        let entries: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("report.xlsx")]);
    }

    #[test]
    fn rerender_replaces_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.xlsx");
        fs::write(&path, b"stale").unwrap();

        render(&MarketSnapshot::new(vec![record("A", Some(-2.0))], 1), &path).unwrap();

        assert_ne!(fs::read(&path).unwrap(), b"stale");
    }

    #[test]
    fn failed_rename_reports_locked_and_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = unrenamable_report(dir.path());
        fs::write(&path, b"previous report").unwrap();

        let err = render(&MarketSnapshot::new(vec![record("A", None)], 1), &path).unwrap_err();
        assert!(matches!(err, WriteError::FileLocked { .. }), "{err}");
        assert_eq!(fs::read(&path).unwrap(), b"previous report");
    }

    #[test]
    fn availability_check_passes_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_file_availability(&dir.path().join("absent.xlsx")).is_ok());
    }

    #[test]
    fn availability_check_restores_original_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.xlsx");
        fs::write(&path, b"contents").unwrap();

        check_file_availability(&path).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"contents");
        assert!(!sibling_path(&path, "", ASIDE_SUFFIX).unwrap().exists());
    }

    #[test]
    fn availability_check_leaves_unrelated_siblings_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.xlsx");
        fs::write(&path, b"contents").unwrap();
        let sibling = sibling_path(&path, "", ASIDE_SUFFIX).unwrap();
        fs::write(&sibling, b"user data").unwrap();

        check_file_availability(&path).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"contents");
        assert_eq!(fs::read(&sibling).unwrap(), b"user data");
        let entries = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 2);
    }
}
