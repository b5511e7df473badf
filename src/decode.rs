use chrono::{Duration, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::grid::{format_number, Cell};
use crate::header::ColumnMap;
use crate::models::{
    AccumulationKey, CategoryNode, DecodeOptions, Field, FieldValue, ImportRecord, ValueType,
};

/// Serial values at or below this are small integers, not dates.
const SERIAL_MIN: f64 = 1000.0;
/// 9999-12-31 as a spreadsheet serial.
const SERIAL_MAX: f64 = 2_958_466.0;
const CODE_MAX_LEN: usize = 16;
const NAME_MAX_LEN: usize = 64;
const UNCATEGORIZED: &str = "未分类";
/// Row labels of grand-total lines in pivot exports.
const TOTAL_LABELS: &[&str] = &["总计", "合计"];

// ---------------------------------------------------------------------------
// Scalar coercion
// ---------------------------------------------------------------------------

/// Parses money-like text: thousands separators, currency symbols and
/// parenthesised negatives are accepted.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let s: String = raw
        .chars()
        .filter(|c| !matches!(c, ',' | '"' | '$' | '¥' | '￥'))
        .collect();
    let s = s.trim();
    let value = if let Some(inner) = s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        -inner.trim().parse::<f64>().ok()?
    } else {
        s.parse::<f64>().ok()?
    };
    value.is_finite().then_some(value)
}

/// Numeric value of a cell, or `None` for blanks and anything unparsable.
pub fn parse_optional_decimal(cell: &Cell) -> Option<f64> {
    match cell {
        Cell::Number(f) if f.is_finite() => Some(*f),
        Cell::Text(s) if !cell.is_blank() => parse_amount(s),
        _ => None,
    }
}

/// Numeric value of a cell; blanks, NaN and unparsable values give `default`.
pub fn parse_decimal(cell: &Cell, default: f64) -> f64 {
    parse_optional_decimal(cell).unwrap_or(default)
}

/// Trimmed, truncated text. Integral numbers and "12345.0"-style strings come
/// back as plain integers so numeric storage of code columns does not leak.
pub fn cell_text(cell: &Cell, max_len: usize) -> Option<String> {
    if cell.is_blank() {
        return None;
    }
    let s = match cell {
        Cell::Number(f) => format_number(*f),
        Cell::Text(t) => normalize_code(t.trim()).to_string(),
        other => other.text(),
    };
    let s: String = s.chars().take(max_len).collect();
    (!s.is_empty()).then_some(s)
}

fn normalize_code(s: &str) -> &str {
    match s.split_once('.') {
        Some((int, frac))
            if !int.is_empty()
                && int.bytes().all(|b| b.is_ascii_digit())
                && !frac.is_empty()
                && frac.bytes().all(|b| b == b'0') =>
        {
            int
        }
        _ => s,
    }
}

// ---------------------------------------------------------------------------
// Dates
// ---------------------------------------------------------------------------

/// Spreadsheet serial (days since 1899-12-30, fraction = time of day).
pub fn serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !(0.0..SERIAL_MAX).contains(&serial) {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let days = serial.floor();
    let seconds = ((serial - days) * 86_400.0).round() as i64;
    base.checked_add_signed(Duration::days(days as i64) + Duration::seconds(seconds))
}

static SEPARATED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})[-/.](\d{1,2})[-/.](\d{1,2})").expect("valid regex"));
static COMPACT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\D)(\d{4})(\d{2})(\d{2})(?:\D|$)").expect("valid regex"));
static LOCALIZED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})年(\d{1,2})月(\d{1,2})").expect("valid regex"));
static TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{4})[-/.](\d{1,2})[-/.](\d{1,2})\s+(\d{1,2})[:.](\d{1,2})(?:[:.](\d{1,2}))?")
        .expect("valid regex")
});

fn ymd_from(re: &Regex, s: &str) -> Option<NaiveDate> {
    let caps = re.captures(s)?;
    let y = caps[1].parse().ok()?;
    let m = caps[2].parse().ok()?;
    let d = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(y, m, d)
}

/// Textual date patterns, tried in order.
const DATE_PATTERNS: &[&Lazy<Regex>] = &[&SEPARATED, &COMPACT, &LOCALIZED];

pub fn parse_date_text(s: &str) -> Option<NaiveDate> {
    DATE_PATTERNS.iter().find_map(|re| ymd_from(re, s))
}

/// Native dates pass through; numbers in the serial range are serial days;
/// anything else is matched against the textual patterns.
pub fn parse_date(cell: &Cell) -> Option<NaiveDate> {
    match cell {
        _ if cell.is_blank() => None,
        Cell::Date(dt) => Some(dt.date()),
        Cell::Number(f) if *f > SERIAL_MIN => serial_to_datetime(*f)
            .map(|dt| dt.date())
            .or_else(|| parse_date_text(&cell.text())),
        other => parse_date_text(&other.text()),
    }
}

pub fn parse_datetime(cell: &Cell) -> Option<NaiveDateTime> {
    match cell {
        Cell::Date(dt) => Some(*dt),
        Cell::Number(f) if *f > SERIAL_MIN => serial_to_datetime(*f),
        Cell::Text(s) => TIMESTAMP
            .captures(s)
            .and_then(|caps| {
                let date = NaiveDate::from_ymd_opt(
                    caps[1].parse().ok()?,
                    caps[2].parse().ok()?,
                    caps[3].parse().ok()?,
                )?;
                let sec = caps.get(6).map_or(Some(0), |m| m.as_str().parse().ok())?;
                date.and_hms_opt(caps[4].parse().ok()?, caps[5].parse().ok()?, sec)
            })
            .or_else(|| parse_date(cell).and_then(|d| d.and_hms_opt(0, 0, 0))),
        _ => None,
    }
}

static REPORT_DATE_IN_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})[-_]?(\d{2})[-_]?(\d{2})").expect("valid regex"));
static REPORT_DATE_IN_CELL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"日期\s*[：:]\s*(\d{4})[-/.](\d{1,2})[-/.](\d{1,2})").expect("valid regex")
});

/// Report date embedded in a file name such as `stock_2024-03-05.xlsx`.
pub fn report_date_from_name(name: &str) -> Option<NaiveDate> {
    ymd_from(&REPORT_DATE_IN_NAME, name)
}

/// Report date written as "日期：2024-03-05" in the first rows of a sheet.
pub fn report_date_from_cells<'a>(cells: impl IntoIterator<Item = &'a Cell>) -> Option<NaiveDate> {
    cells
        .into_iter()
        .find_map(|cell| ymd_from(&REPORT_DATE_IN_CELL, &cell.text()))
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoKey,
    NoDate,
    /// Grand-total or all-zero rows of a pivot export.
    Filtered,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    Record(T),
    Skip(SkipReason),
}

/// Everything a row needs besides its own cells.
#[derive(Debug, Clone, Copy)]
pub struct DecodeContext<'a> {
    pub store_id: &'a str,
    /// Date for sheets that carry no per-row date.
    pub report_date: NaiveDate,
    pub options: &'a DecodeOptions,
}

fn at<'a>(row: &'a [Cell], map: &ColumnMap, field: Field) -> &'a Cell {
    static BLANK: Cell = Cell::Blank;
    map.get(field)
        .and_then(|idx| row.get(idx))
        .unwrap_or(&BLANK)
}

fn field_value(field: Field, cell: &Cell) -> FieldValue {
    match field.value_type() {
        ValueType::Text => FieldValue::Text(cell_text(cell, field.max_len())),
        ValueType::Decimal if field.is_additive() => FieldValue::Decimal(Some(parse_decimal(cell, 0.0))),
        ValueType::Decimal => FieldValue::Decimal(parse_optional_decimal(cell)),
        ValueType::Timestamp => FieldValue::Timestamp(parse_datetime(cell)),
    }
}

/// Copies every mapped field not in `handled` into the record.
fn copy_attributes(record: &mut ImportRecord, row: &[Cell], map: &ColumnMap, handled: &[Field]) {
    for (field, _) in map.iter() {
        if handled.contains(&field) {
            continue;
        }
        record.set(field, field_value(field, at(row, map, field)));
    }
}

/// Amount and cost after the configured swap and per-unit multiplication.
fn amount_and_cost(row: &[Cell], map: &ColumnMap, options: &DecodeOptions) -> (f64, f64, f64) {
    let qty = parse_decimal(at(row, map, Field::SaleQty), 0.0);
    let mut amount = parse_decimal(at(row, map, Field::SaleAmount), 0.0);
    let mut cost = parse_decimal(at(row, map, Field::SaleCost), 0.0);
    if options.swap_amount_cost {
        std::mem::swap(&mut amount, &mut cost);
    }
    let has_qty = map.get(Field::SaleQty).is_some();
    if has_qty && !options.amount_as_total {
        amount *= qty;
    }
    if has_qty && !options.cost_as_total {
        cost *= qty;
    }
    (qty, amount, cost)
}

const SALE_HANDLED: &[Field] = &[
    Field::Sku,
    Field::Date,
    Field::SaleQty,
    Field::SaleAmount,
    Field::SaleCost,
    Field::Margin,
];

/// Daily and summary sales rows: keyed by (row date, item, store).
pub fn decode_sale_row(row: &[Cell], map: &ColumnMap, ctx: &DecodeContext) -> Decoded<ImportRecord> {
    let Some(sku) = cell_text(at(row, map, Field::Sku), Field::Sku.max_len()) else {
        return Decoded::Skip(SkipReason::NoKey);
    };
    let Some(date) = parse_date(at(row, map, Field::Date)) else {
        return Decoded::Skip(SkipReason::NoDate);
    };
    let (qty, amount, mut cost) = amount_and_cost(row, map, ctx.options);
    // A margin column is authoritative: derive cost so amount - cost equals it.
    if map.get(Field::Margin).is_some() && amount != 0.0 {
        cost = amount - parse_decimal(at(row, map, Field::Margin), 0.0);
    }

    let mut record = ImportRecord::new(AccumulationKey {
        date,
        item: sku,
        location: ctx.store_id.to_string(),
    });
    record.set(Field::SaleQty, FieldValue::Decimal(Some(qty)));
    record.set(Field::SaleAmount, FieldValue::Decimal(Some(amount)));
    record.set(Field::SaleCost, FieldValue::Decimal(Some(cost)));
    copy_attributes(&mut record, row, map, SALE_HANDLED);
    Decoded::Record(record)
}

/// Stock snapshot rows: keyed by (report date, item, store).
pub fn decode_stock_row(row: &[Cell], map: &ColumnMap, ctx: &DecodeContext) -> Decoded<ImportRecord> {
    let Some(sku) = cell_text(at(row, map, Field::Sku), Field::Sku.max_len()) else {
        return Decoded::Skip(SkipReason::NoKey);
    };
    let mut record = ImportRecord::new(AccumulationKey {
        date: ctx.report_date,
        item: sku,
        location: ctx.store_id.to_string(),
    });
    record.set(Field::StockQty, field_value(Field::StockQty, at(row, map, Field::StockQty)));
    record.set(Field::StockAmount, field_value(Field::StockAmount, at(row, map, Field::StockAmount)));
    copy_attributes(&mut record, row, map, &[Field::Sku, Field::StockQty, Field::StockAmount]);
    Decoded::Record(record)
}

/// Margin pivot rows: keyed by (report date, category, store). Pivot exports
/// leave the large category blank below its first row, so it carries down.
pub fn decode_margin_row(
    row: &[Cell],
    map: &ColumnMap,
    ctx: &DecodeContext,
    last_large: &mut Option<String>,
) -> Decoded<ImportRecord> {
    if let Some(large) = cell_text(at(row, map, Field::CategoryLarge), NAME_MAX_LEN) {
        *last_large = Some(large);
    }
    let category = cell_text(at(row, map, Field::Category), NAME_MAX_LEN);
    let Some(name) = category.clone().or_else(|| last_large.clone()) else {
        return Decoded::Skip(SkipReason::NoKey);
    };
    let is_total = |v: Option<&String>| v.is_some_and(|s| TOTAL_LABELS.contains(&s.as_str()));
    if is_total(category.as_ref()) || is_total(last_large.as_ref()) {
        return Decoded::Skip(SkipReason::Filtered);
    }
    let (qty, amount, cost) = amount_and_cost(row, map, ctx.options);
    if amount == 0.0 && cost == 0.0 {
        return Decoded::Skip(SkipReason::Filtered);
    }

    let mut record = ImportRecord::new(AccumulationKey {
        date: ctx.report_date,
        item: name,
        location: ctx.store_id.to_string(),
    });
    record.set(Field::SaleAmount, FieldValue::Decimal(Some(amount)));
    record.set(Field::SaleCost, FieldValue::Decimal(Some(cost)));
    if map.get(Field::SaleQty).is_some() {
        record.set(Field::SaleQty, FieldValue::Decimal(Some(qty)));
    }
    record.set(Field::CategoryLarge, FieldValue::Text(last_large.clone()));
    Decoded::Record(record)
}

/// Levels carried down merged hierarchy cells.
#[derive(Debug, Default)]
pub struct HierarchyCarry {
    large_code: String,
    large: String,
    mid_code: String,
    mid: String,
}

/// Category hierarchy rows. Blank large/mid cells inherit the row above; a new
/// large code starts a fresh mid level.
pub fn decode_category_row(
    row: &[Cell],
    map: &ColumnMap,
    carry: &mut HierarchyCarry,
) -> Decoded<CategoryNode> {
    let text = |field: Field, max: usize| cell_text(at(row, map, field), max);
    let large_code = text(Field::CategoryLargeCode, CODE_MAX_LEN);
    let large = text(Field::CategoryLarge, NAME_MAX_LEN);
    let mid_code = text(Field::CategoryMidCode, CODE_MAX_LEN);
    let mid = text(Field::CategoryMid, NAME_MAX_LEN);
    let small_code = text(Field::CategorySmallCode, CODE_MAX_LEN).unwrap_or_default();
    let small = text(Field::CategorySmall, NAME_MAX_LEN).unwrap_or_default();

    if large_code.is_none()
        && large.is_none()
        && mid_code.is_none()
        && mid.is_none()
        && small_code.is_empty()
        && small.is_empty()
    {
        return Decoded::Skip(SkipReason::NoKey);
    }

    if let Some(code) = large_code {
        if code != carry.large_code {
            carry.mid_code.clear();
            carry.mid.clear();
        }
        carry.large_code = code;
        carry.large = large.unwrap_or_default();
    } else if let Some(name) = large {
        carry.large = name;
    }
    if let Some(code) = mid_code {
        carry.mid_code = code;
        carry.mid = mid.unwrap_or_default();
    } else if let Some(name) = mid {
        carry.mid = name;
    }

    Decoded::Record(CategoryNode {
        large_code: carry.large_code.clone(),
        large: if carry.large.is_empty() {
            UNCATEGORIZED.to_string()
        } else {
            carry.large.clone()
        },
        mid_code: carry.mid_code.clone(),
        mid: carry.mid.clone(),
        small_code,
        small,
    })
}
