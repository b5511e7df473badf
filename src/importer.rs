use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::db::{table_count, DATA_TABLES};
use crate::decode::{
    decode_category_row, decode_margin_row, decode_sale_row, decode_stock_row, parse_date,
    report_date_from_cells, report_date_from_name, DecodeContext, Decoded, HierarchyCarry,
};
use crate::dialect::{min_width, required_fields, Dialect};
use crate::diagnostics::Diagnostics;
use crate::error::{IngestError, Result};
use crate::grid::{load_grid, Cell, RawGrid};
use crate::header::{resolve_columns, ColumnMap, Resolved};
use crate::layout::detect_layout;
use crate::models::{CategoryNode, DecodeOptions, Field, FieldValue, ImportRecord, SheetKind};
use crate::refresh::{refresh_categories, refresh_margins};
use crate::writer::{Destination, SheetWriter, WriteStrategy};

/// Rows searched for a "日期：" cell when the file name carries no date.
const REPORT_DATE_ROWS: usize = 15;
const PREVIEW_SAMPLES: usize = 3;
/// Data rows inspected when preview looks for empty key/date columns.
const PREVIEW_SCAN_ROWS: usize = 20;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn compute_checksum(file_path: &Path) -> Result<String> {
    let data = std::fs::read(file_path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(hex::encode(hasher.finalize()))
}

fn file_label(file_path: &Path) -> String {
    file_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_string()
}

/// Settings that apply to every sheet of an import.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub store_id: String,
    pub decode: DecodeOptions,
    /// Overrides the date of stock and margin sheets.
    pub report_date: Option<NaiveDate>,
    /// Reload instead of accumulate: batches clear the affected tables and
    /// stock sheets clear their own report date.
    pub replace: bool,
}

/// File name first, then a "日期：" cell near the top, then today.
fn report_date(grid: &RawGrid, label: &str, opts: &ImportOptions) -> NaiveDate {
    opts.report_date
        .or_else(|| report_date_from_name(label))
        .or_else(|| {
            let rows = grid.height().min(REPORT_DATE_ROWS);
            report_date_from_cells((0..rows).flat_map(|r| grid.row(r).iter()))
        })
        .unwrap_or_else(|| chrono::Local::now().date_naive())
}

// ---------------------------------------------------------------------------
// Sheet plan: layout, columns and structural checks
// ---------------------------------------------------------------------------

struct SheetPlan {
    map: ColumnMap,
    data_start: usize,
}

/// Fails with a structural error when the grid cannot hold a sheet of `kind`.
fn plan_sheet(grid: &RawGrid, kind: SheetKind, label: &str) -> Result<SheetPlan> {
    let layout = detect_layout(grid, kind);
    let width = grid.width();
    if grid.height().saturating_sub(layout.top) < 2 {
        return Err(IngestError::Structural(format!(
            "{label}: insufficient rows (need a header and at least one data row)"
        )));
    }
    if width < min_width(kind) {
        return Err(IngestError::Structural(format!(
            "{label}: insufficient columns ({width}, need at least {})",
            min_width(kind)
        )));
    }

    let map = resolve_columns(grid, &layout, kind);
    for field in required_fields(kind).iter().filter(|f| f.is_additive()) {
        if let Some(idx) = map.get(*field).filter(|idx| *idx >= width) {
            return Err(IngestError::Structural(format!(
                "{label}: insufficient columns ({} expected in column {}, sheet has {width})",
                field.column(),
                idx + 1
            )));
        }
    }

    let data_start = map
        .header_row
        .map_or(layout.data_start, |h| layout.data_start.max(h + 1));
    Ok(SheetPlan { map, data_start })
}

// ---------------------------------------------------------------------------
// Row dispatch
// ---------------------------------------------------------------------------

pub enum Row {
    Keyed(ImportRecord),
    Category(CategoryNode),
}

/// Decodes rows of one sheet in order, holding the values carried down
/// merged cells.
struct RowDecoder<'a> {
    kind: SheetKind,
    map: &'a ColumnMap,
    ctx: DecodeContext<'a>,
    last_large: Option<String>,
    carry: HierarchyCarry,
}

impl<'a> RowDecoder<'a> {
    fn new(kind: SheetKind, map: &'a ColumnMap, ctx: DecodeContext<'a>) -> Self {
        Self {
            kind,
            map,
            ctx,
            last_large: None,
            carry: HierarchyCarry::default(),
        }
    }

    fn decode(&mut self, row: &[Cell]) -> Decoded<Row> {
        let keyed = match self.kind {
            SheetKind::SaleDaily | SheetKind::SaleSummary => decode_sale_row(row, self.map, &self.ctx),
            SheetKind::Stock => decode_stock_row(row, self.map, &self.ctx),
            SheetKind::Margin => decode_margin_row(row, self.map, &self.ctx, &mut self.last_large),
            SheetKind::Category => {
                return match decode_category_row(row, self.map, &mut self.carry) {
                    Decoded::Record(node) => Decoded::Record(Row::Category(node)),
                    Decoded::Skip(reason) => Decoded::Skip(reason),
                };
            }
        };
        match keyed {
            Decoded::Record(rec) => Decoded::Record(Row::Keyed(rec)),
            Decoded::Skip(reason) => Decoded::Skip(reason),
        }
    }
}

// ---------------------------------------------------------------------------
// import_sheet
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SheetOutcome {
    pub kind: SheetKind,
    pub label: String,
    pub committed: usize,
    /// Set only when nothing was committed.
    pub diagnostic: Option<String>,
    pub diagnostics: Diagnostics,
    pub dialect: Dialect,
    pub header_row: Option<usize>,
    pub date_range: Option<(String, String)>,
}

/// Imports one grid as a single transaction. Row problems are counted, not
/// raised; only structural and database errors propagate.
pub fn import_grid(
    conn: &Connection,
    grid: &RawGrid,
    kind: SheetKind,
    label: &str,
    opts: &ImportOptions,
) -> Result<SheetOutcome> {
    let plan = plan_sheet(grid, kind, label)?;
    let ctx = DecodeContext {
        store_id: &opts.store_id,
        report_date: report_date(grid, label, opts),
        options: &opts.decode,
    };
    let mut writer = SheetWriter::new(conn, kind, opts.decode.margin_policy)?;
    if opts.replace && kind == SheetKind::Stock {
        let cleared = writer.clear_snapshot(ctx.report_date, &opts.store_id)?;
        info!(sheet = label, cleared, date = %ctx.report_date, "stock snapshot cleared");
    }
    let mut decoder = RowDecoder::new(kind, &plan.map, ctx);
    let mut diag = Diagnostics::default();
    let mut dates: BTreeSet<NaiveDate> = BTreeSet::new();

    for r in plan.data_start..grid.height() {
        if grid.is_blank_row(r) {
            continue;
        }
        diag.record_seen();
        let written = match decoder.decode(grid.row(r)) {
            Decoded::Skip(reason) => {
                diag.record_skip(reason);
                continue;
            }
            Decoded::Record(Row::Keyed(rec)) => writer.write(&rec).map(|s| {
                dates.insert(rec.key.date);
                s != WriteStrategy::Full
            }),
            Decoded::Record(Row::Category(node)) => writer.write_category(&node).map(|()| false),
        };
        match written {
            Ok(degraded) => diag.record_written(degraded),
            Err(e) => {
                warn!(sheet = label, row = r + 1, error = %e, "row not written");
                diag.record_error(&e.to_string());
            }
        }
    }
    writer.commit()?;

    let committed = diag.written;
    info!(sheet = label, kind = kind.key(), committed, degraded = diag.degraded, "sheet imported");
    let fmt = |d: &NaiveDate| d.format("%Y-%m-%d").to_string();
    Ok(SheetOutcome {
        kind,
        label: label.to_string(),
        committed,
        diagnostic: diag.summary(label),
        diagnostics: diag,
        dialect: plan.map.dialect,
        header_row: plan.map.header_row,
        date_range: dates.first().zip(dates.last()).map(|(a, b)| (fmt(a), fmt(b))),
    })
}

/// Loads, imports and records one file in the import ledger.
pub fn import_sheet(
    conn: &Connection,
    file_path: &Path,
    kind: SheetKind,
    opts: &ImportOptions,
) -> Result<SheetOutcome> {
    let grid = load_grid(file_path)?;
    let label = file_label(file_path);
    let outcome = import_grid(conn, &grid, kind, &label, opts)?;

    if outcome.committed > 0 {
        let (start, end) = outcome.date_range.clone().unzip();
        conn.execute(
            "INSERT INTO imports (filename, kind, record_count, date_range_start, date_range_end, checksum) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                label,
                kind.key(),
                outcome.committed as i64,
                start,
                end,
                compute_checksum(file_path)?,
            ],
        )?;
    }
    Ok(outcome)
}

// ---------------------------------------------------------------------------
// import_batch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub counts: BTreeMap<SheetKind, usize>,
    pub sheets: Vec<SheetOutcome>,
    /// Zero-row explanations and structural failures.
    pub diagnostics: Vec<String>,
    pub errors: Vec<String>,
    pub refreshed_margins: Option<usize>,
    pub refreshed_categories: Option<usize>,
    pub totals: BTreeMap<String, i64>,
}

impl BatchReport {
    pub fn committed(&self) -> usize {
        self.counts.values().sum()
    }
}

/// Imports files in kind order (sales, stock, categories, margins), then
/// refreshes the tables derived from sales. With `opts.replace`, the tables the
/// batch loads are emptied first; stock sheets only clear their report date.
pub fn import_batch(
    conn: &Connection,
    files: &[(SheetKind, PathBuf)],
    opts: &ImportOptions,
) -> Result<BatchReport> {
    let mut ordered: Vec<&(SheetKind, PathBuf)> = files.iter().collect();
    ordered.sort_by_key(|(kind, _)| *kind);

    if opts.replace {
        let tables: BTreeSet<&str> = ordered
            .iter()
            .flat_map(|(kind, _)| Destination::for_kind(*kind).tables().iter().copied())
            .collect();
        for table in tables {
            conn.execute(&format!("DELETE FROM {table}"), [])?;
            info!(table, "table cleared");
        }
    }

    let mut report = BatchReport::default();
    for (kind, path) in ordered {
        let label = file_label(path);
        match import_sheet(conn, path, *kind, opts) {
            Ok(outcome) => {
                *report.counts.entry(*kind).or_default() += outcome.committed;
                if let Some(text) = &outcome.diagnostic {
                    report.diagnostics.push(text.clone());
                }
                report.sheets.push(outcome);
            }
            Err(IngestError::Structural(msg)) => report.diagnostics.push(msg),
            Err(e) => report.errors.push(format!("{label}: {e}")),
        }
    }

    let sales_loaded = report
        .counts
        .iter()
        .any(|(kind, n)| kind.is_sales() && *n > 0);
    let margin_supplied = files.iter().any(|(kind, _)| *kind == SheetKind::Margin);
    if sales_loaded && !margin_supplied {
        match refresh_margins(conn) {
            Ok(n) => report.refreshed_margins = Some(n),
            Err(e) => report.errors.push(format!("margin refresh: {e}")),
        }
    }
    if sales_loaded {
        match refresh_categories(conn) {
            Ok(n) => report.refreshed_categories = Some(n),
            Err(e) => report.errors.push(format!("category refresh: {e}")),
        }
    }

    for table in DATA_TABLES {
        report.totals.insert(table.to_string(), table_count(conn, table)?);
    }
    Ok(report)
}

// ---------------------------------------------------------------------------
// preview_sheet
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    pub rows: usize,
    pub columns: usize,
    pub header_row: Option<usize>,
    pub data_start: usize,
    pub dialect: Dialect,
    pub mapping: Vec<(Field, Resolved)>,
    /// First decoded rows as (column, value) pairs.
    pub samples: Vec<Vec<(String, String)>>,
    pub issues: Vec<String>,
}

fn describe(row: &Row) -> Vec<(String, String)> {
    match row {
        Row::Keyed(rec) => {
            let mut pairs = vec![
                ("date".to_string(), rec.key.date.format("%Y-%m-%d").to_string()),
                ("key".to_string(), rec.key.item.clone()),
            ];
            pairs.extend(rec.values.iter().filter(|(_, v)| !v.is_null()).map(|(f, v)| {
                let shown = match v {
                    FieldValue::Text(Some(s)) => s.clone(),
                    FieldValue::Decimal(Some(d)) => format!("{d}"),
                    FieldValue::Timestamp(Some(ts)) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
                    _ => String::new(),
                };
                (f.column().to_string(), shown)
            }));
            pairs
        }
        Row::Category(node) => vec![
            ("large".to_string(), format!("{} {}", node.large_code, node.large)),
            ("mid".to_string(), format!("{} {}", node.mid_code, node.mid)),
            ("small".to_string(), format!("{} {}", node.small_code, node.small)),
        ],
    }
}

/// Column has at least one non-blank cell among the scanned rows.
fn column_has_values(grid: &RawGrid, map: &ColumnMap, field: Field, rows: &[usize]) -> bool {
    map.get(field)
        .is_some_and(|c| rows.iter().any(|r| !grid.cell(*r, c).is_blank()))
}

/// Dry run: resolves layout and columns and decodes a few rows without
/// touching the store.
pub fn preview_grid(grid: &RawGrid, kind: SheetKind, label: &str, opts: &ImportOptions) -> Result<Preview> {
    let plan = plan_sheet(grid, kind, label)?;
    let ctx = DecodeContext {
        store_id: &opts.store_id,
        report_date: report_date(grid, label, opts),
        options: &opts.decode,
    };
    let mut decoder = RowDecoder::new(kind, &plan.map, ctx);
    let scan: Vec<usize> = (plan.data_start..grid.height())
        .filter(|r| !grid.is_blank_row(*r))
        .take(PREVIEW_SCAN_ROWS)
        .collect();

    let samples = scan
        .iter()
        .filter_map(|r| match decoder.decode(grid.row(*r)) {
            Decoded::Record(row) => Some(describe(&row)),
            Decoded::Skip(_) => None,
        })
        .take(PREVIEW_SAMPLES)
        .collect();

    let mut issues = Vec::new();
    let needs_key = matches!(kind, SheetKind::SaleDaily | SheetKind::SaleSummary | SheetKind::Stock);
    if needs_key && !column_has_values(grid, &plan.map, Field::Sku, &scan) {
        issues.push("item code column empty or not detected".to_string());
    }
    if kind.is_sales() {
        let any_date = plan.map.get(Field::Date).is_some_and(|c| {
            scan.iter().any(|r| parse_date(grid.cell(*r, c)).is_some())
        });
        if !any_date {
            issues.push("date column empty or unsupported format".to_string());
        }
    }
    if plan.map.header_row.is_none() {
        issues.push("no header row recognised, using positional defaults".to_string());
    }

    Ok(Preview {
        rows: grid.height(),
        columns: grid.width(),
        header_row: plan.map.header_row,
        data_start: plan.data_start,
        dialect: plan.map.dialect,
        mapping: plan.map.iter().collect(),
        samples,
        issues,
    })
}

pub fn preview_sheet(file_path: &Path, kind: SheetKind, opts: &ImportOptions) -> Result<Preview> {
    let grid = load_grid(file_path)?;
    preview_grid(&grid, kind, &file_label(file_path), opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_connection, init_db};
    use crate::models::MarginPolicy;

    fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("test.db")).unwrap();
        init_db(&conn).unwrap();
        (dir, conn)
    }

    fn opts() -> ImportOptions {
        ImportOptions {
            store_id: "S1".to_string(),
            decode: DecodeOptions {
                margin_policy: MarginPolicy::Plain,
                ..DecodeOptions::default()
            },
            report_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            replace: false,
        }
    }

    fn replacing() -> ImportOptions {
        ImportOptions {
            replace: true,
            ..opts()
        }
    }

    fn write_csv(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    const DAILY: &str = "\
商品销售日报表
打印时间: 2024-03-06
货号,品名,销售日期,销售数量,销售金额,参考金额,品牌名称
1001,可乐,2024-03-05,10,35,20,可口可乐
1001,可乐,2024-03-05,-2,-7,-4,
1002,雪碧,20240305,1,3.5,2,
,合计,,9,31.5,18,
1003,芬达,someday,1,3,2,
";

    #[test]
    fn test_import_grid_accumulates_and_counts_skips() {
        let (dir, conn) = test_db();
        let path = write_csv(dir.path(), "daily.csv", DAILY);
        let outcome = import_sheet(&conn, &path, SheetKind::SaleDaily, &opts()).unwrap();
        assert_eq!(outcome.committed, 3);
        assert_eq!(outcome.diagnostics.no_key, 1);
        assert_eq!(outcome.diagnostics.no_date, 1);
        assert_eq!(outcome.diagnostic, None);
        assert_eq!(outcome.header_row, Some(2));

        let (qty, amount, gross, brand): (f64, f64, f64, Option<String>) = conn
            .query_row(
                "SELECT sale_qty, sale_amount, gross_profit, brand_name FROM sales WHERE sku_code = '1001'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .unwrap();
        assert_eq!((qty, amount, gross), (8.0, 28.0, 12.0));
        assert_eq!(brand.as_deref(), Some("可口可乐"));
    }

    #[test]
    fn test_import_sheet_records_ledger() {
        let (dir, conn) = test_db();
        let path = write_csv(dir.path(), "daily.csv", DAILY);
        import_sheet(&conn, &path, SheetKind::SaleDaily, &opts()).unwrap();
        let (kind, count, start, checksum): (String, i64, String, String) = conn
            .query_row(
                "SELECT kind, record_count, date_range_start, checksum FROM imports",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .unwrap();
        assert_eq!(kind, "sale_daily");
        assert_eq!(count, 3);
        assert_eq!(start, "2024-03-05");
        assert_eq!(checksum.len(), 64);
    }

    #[test]
    fn test_header_only_sheet_is_insufficient_rows() {
        let (_dir, conn) = test_db();
        let grid = RawGrid::from_text_rows(&[&["货号", "销售日期", "销售金额", "参考金额"]]);
        let err = import_grid(&conn, &grid, SheetKind::SaleDaily, "empty.csv", &opts()).unwrap_err();
        assert!(matches!(err, IngestError::Structural(_)));
        assert!(err.to_string().contains("insufficient rows"));
    }

    #[test]
    fn test_narrow_sheet_is_insufficient_columns() {
        let (_dir, conn) = test_db();
        let grid = RawGrid::from_text_rows(&[&["a", "b"], &["1", "2"], &["3", "4"]]);
        let err = import_grid(&conn, &grid, SheetKind::SaleSummary, "narrow.csv", &opts()).unwrap_err();
        assert!(err.to_string().contains("insufficient columns"));
    }

    #[test]
    fn test_headerless_sheet_with_defaults_beyond_width() {
        let (_dir, conn) = test_db();
        let grid = RawGrid::from_text_rows(&[&["x", "y", "z", "w"], &["1", "2", "3", "4"]]);
        let err = import_grid(&conn, &grid, SheetKind::SaleDaily, "short.csv", &opts()).unwrap_err();
        assert!(err.to_string().contains("sale_amount expected in column 30"));
    }

    #[test]
    fn test_zero_rows_explained() {
        let (_dir, conn) = test_db();
        let grid = RawGrid::from_text_rows(&[
            &["货号", "销售日期", "销售金额", "参考金额"],
            &["", "2024-03-05", "1", "1"],
            &["", "2024-03-05", "2", "1"],
        ]);
        let outcome = import_grid(&conn, &grid, SheetKind::SaleDaily, "nokey.csv", &opts()).unwrap();
        assert_eq!(outcome.committed, 0);
        let text = outcome.diagnostic.unwrap();
        assert!(text.contains("2 without item code"));
        assert!(text.contains("item code column"));
    }

    #[test]
    fn test_stock_uses_report_date_and_sums() {
        let (_dir, conn) = test_db();
        let grid = RawGrid::from_text_rows(&[
            &["仓库编码", "货号", "品名", "实时库存", "库存金额", "上次变动日期"],
            &["01", "1001", "可乐", "10", "35", "2024-02-28 09:15:00"],
            &["02", "1001", "可乐", "5", "17.5", ""],
        ]);
        let outcome = import_grid(&conn, &grid, SheetKind::Stock, "stock_2024-03-04.csv", &ImportOptions {
            report_date: None,
            ..opts()
        })
        .unwrap();
        assert_eq!(outcome.committed, 2);
        let (date, qty, changed): (String, f64, Option<String>) = conn
            .query_row("SELECT data_date, stock_qty, last_change_date FROM stock", [], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?))
            })
            .unwrap();
        assert_eq!(date, "2024-03-04");
        assert_eq!(qty, 15.0);
        assert_eq!(changed.as_deref(), Some("2024-02-28 09:15:00"));
    }

    #[test]
    fn test_batch_orders_kinds_and_refreshes() {
        let (dir, conn) = test_db();
        let daily = write_csv(dir.path(), "daily.csv", "货号,销售日期,类别名称,销售金额,参考金额\n1001,2024-03-05,饮料,10,6\n");
        let bad = write_csv(dir.path(), "stock.csv", "货号\n");
        let files = vec![(SheetKind::Stock, bad), (SheetKind::SaleDaily, daily)];
        let report = import_batch(&conn, &files, &opts()).unwrap();
        assert_eq!(report.counts.get(&SheetKind::SaleDaily), Some(&1));
        assert_eq!(report.sheets[0].kind, SheetKind::SaleDaily);
        assert_eq!(report.diagnostics.len(), 1);
        assert!(report.diagnostics[0].contains("insufficient"));
        assert!(report.errors.is_empty());
        assert_eq!(report.refreshed_margins, Some(1));
        assert_eq!(report.totals["margins"], 1);
    }

    #[test]
    fn test_batch_reports_io_errors_separately() {
        let (dir, conn) = test_db();
        let missing = dir.path().join("missing.csv");
        let report = import_batch(&conn, &[(SheetKind::Stock, missing)], &opts()).unwrap();
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("missing.csv: IO error"));
        assert_eq!(report.refreshed_margins, None);
    }

    #[test]
    fn test_replace_clears_before_import() {
        let (dir, conn) = test_db();
        let daily = write_csv(dir.path(), "daily.csv", "货号,销售日期,销售数量,销售金额,参考金额\n1001,2024-03-05,10,10,6\n");
        let files = vec![(SheetKind::SaleDaily, daily)];
        import_batch(&conn, &files, &opts()).unwrap();
        import_batch(&conn, &files, &opts()).unwrap();
        let qty: f64 = conn.query_row("SELECT sale_qty FROM sales", [], |r| r.get(0)).unwrap();
        assert_eq!(qty, 20.0);
        import_batch(&conn, &files, &replacing()).unwrap();
        let qty: f64 = conn.query_row("SELECT sale_qty FROM sales", [], |r| r.get(0)).unwrap();
        assert_eq!(qty, 10.0);
    }

    #[test]
    fn test_sales_batch_keeps_earlier_margin_sheets() {
        let (dir, conn) = test_db();
        let margin = write_csv(
            dir.path(),
            "margin_2024-03-01.csv",
            "大类名称,类别名称,求和项:销售金额,求和项:销售数量,求和项:参考进价金额\n食品,饮料,100,10,60\n",
        );
        let report = import_batch(&conn, &[(SheetKind::Margin, margin)], &opts()).unwrap();
        assert_eq!(report.counts.get(&SheetKind::Margin), Some(&1));

        let daily = write_csv(dir.path(), "daily.csv", "货号,销售日期,类别名称,销售金额,参考金额\n1001,2024-03-05,饮料,10,6\n");
        let report = import_batch(&conn, &[(SheetKind::SaleDaily, daily)], &opts()).unwrap();
        assert_eq!(report.refreshed_margins, Some(1));

        let (amount, gross): (f64, f64) = conn
            .query_row(
                "SELECT sale_amount, gross_profit FROM margins WHERE data_date = '2024-03-01'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!((amount, gross), (100.0, 40.0));
        assert_eq!(report.totals["margins"], 2);
    }

    #[test]
    fn test_stock_replace_clears_only_its_report_date() {
        let (dir, conn) = test_db();
        let body = "仓库编码,货号,品名,实时库存,库存金额\n01,1001,可乐,10,35\n";
        let earlier = write_csv(dir.path(), "stock_2024-03-04.csv", body);
        let later = write_csv(dir.path(), "stock_2024-03-05.csv", body);
        let dated = ImportOptions {
            report_date: None,
            ..opts()
        };
        import_batch(&conn, &[(SheetKind::Stock, earlier), (SheetKind::Stock, later.clone())], &dated).unwrap();
        import_batch(&conn, &[(SheetKind::Stock, later)], &ImportOptions { replace: true, ..dated }).unwrap();

        let mut stmt = conn.prepare("SELECT data_date, stock_qty FROM stock ORDER BY data_date").unwrap();
        let rows: Vec<(String, f64)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(
            rows,
            vec![("2024-03-04".to_string(), 10.0), ("2024-03-05".to_string(), 10.0)]
        );
    }

    #[test]
    fn test_store_without_optional_columns_imports_every_row() {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("legacy.db")).unwrap();
        conn.execute_batch(
            "CREATE TABLE sales (
                data_date TEXT NOT NULL, sku_code TEXT NOT NULL, store_id TEXT NOT NULL,
                sale_qty REAL, sale_amount REAL, sale_cost REAL, gross_profit REAL,
                UNIQUE (data_date, sku_code, store_id)
            );",
        )
        .unwrap();
        let grid = RawGrid::from_text_rows(&[
            &["货号", "品名", "销售日期", "销售数量", "销售金额", "参考金额", "品牌名称"],
            &["1001", "可乐", "2024-03-05", "10", "35", "20", "可口可乐"],
            &["1001", "可乐", "2024-03-05", "5", "17.5", "10", "可口可乐"],
        ]);
        let outcome = import_grid(&conn, &grid, SheetKind::SaleDaily, "legacy.csv", &opts()).unwrap();
        assert_eq!(outcome.committed, 2);
        assert_eq!(outcome.diagnostics.failures, 0);
        assert_eq!(outcome.diagnostics.degraded, 2);
        assert!(outcome.diagnostic.is_none());
        let qty: f64 = conn.query_row("SELECT sale_qty FROM sales", [], |r| r.get(0)).unwrap();
        assert_eq!(qty, 15.0);
    }

    #[test]
    fn test_margin_sheet_import() {
        let (_dir, conn) = test_db();
        let grid = RawGrid::from_text_rows(&[
            &["毛利汇总"],
            &["日期：2024-03-02"],
            &["大类名称", "类别名称", "求和项:销售金额", "求和项:销售数量", "求和项:参考进价金额"],
            &["食品", "饮料", "100", "10", "60"],
            &["", "零食", "50", "5", "45"],
            &["总计", "", "150", "15", "105"],
        ]);
        let outcome = import_grid(&conn, &grid, SheetKind::Margin, "margin.csv", &ImportOptions {
            report_date: None,
            ..opts()
        })
        .unwrap();
        assert_eq!(outcome.committed, 2);
        assert_eq!(outcome.diagnostics.filtered, 1);
        let (date, large, rate): (String, String, f64) = conn
            .query_row(
                "SELECT data_date, category_large, profit_rate FROM margins WHERE category = '零食'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(date, "2024-03-02");
        assert_eq!(large, "食品");
        assert!((rate - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_category_sheet_import() {
        let (_dir, conn) = test_db();
        let grid = RawGrid::from_text_rows(&[
            &["大类", "", "中类", "", "小类", ""],
            &["编码", "名称", "编码", "名称", "编码", "名称"],
            &["01", "食品", "0101", "饮料", "010101", "碳酸"],
            &["", "", "", "", "010102", "果汁"],
        ]);
        let outcome = import_grid(&conn, &grid, SheetKind::Category, "cat.csv", &opts()).unwrap();
        assert_eq!(outcome.committed, 2);
        let mid: String = conn
            .query_row("SELECT category_mid FROM categories WHERE category_small_code = '010102'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(mid, "饮料");
    }

    #[test]
    fn test_preview_reports_mapping_and_issues() {
        let grid = RawGrid::from_text_rows(&[
            &["货号", "销售日期", "销售金额", "参考金额"],
            &["1001", "not a date", "1", "1"],
        ]);
        let preview = preview_grid(&grid, SheetKind::SaleDaily, "p.csv", &opts()).unwrap();
        assert_eq!(preview.header_row, Some(0));
        assert!(preview.samples.is_empty());
        assert!(preview.issues.iter().any(|i| i.contains("date column")));
        assert!(!preview.issues.iter().any(|i| i.contains("item code")));
        assert!(preview.mapping.iter().any(|(f, r)| *f == Field::Sku && r.index == 0));
    }
}
