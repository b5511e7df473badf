use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::debug;

use crate::dialect::{required_fields, Dialect};
use crate::grid::{Cell, RawGrid};
use crate::layout::Layout;
use crate::models::{Field, SheetKind};

/// Header cells beyond this column are never inspected.
const MAX_HEADER_COLS: usize = 60;
/// Rows below the detected header that may still hold the real header.
const ROWS_BELOW: usize = 3;

// ---------------------------------------------------------------------------
// Rule tables
// ---------------------------------------------------------------------------

/// Maps a canonical field to header text. A label matches when it contains
/// any keyword or equals any exact label, and contains no exclusion.
#[derive(Debug, Clone, Copy)]
pub struct HeaderRule {
    pub field: Field,
    pub any: &'static [&'static str],
    pub exact: &'static [&'static str],
    pub exclude: &'static [&'static str],
}

impl HeaderRule {
    pub fn matches(&self, label: &str) -> bool {
        let label = label.trim();
        if label.is_empty() || self.exclude.iter().any(|x| label.contains(x)) {
            return false;
        }
        self.any.iter().any(|k| label.contains(k)) || self.exact.contains(&label)
    }
}

const fn kw(field: Field, any: &'static [&'static str]) -> HeaderRule {
    HeaderRule { field, any, exact: &[], exclude: &[] }
}

const fn kw_except(
    field: Field,
    any: &'static [&'static str],
    exclude: &'static [&'static str],
) -> HeaderRule {
    HeaderRule { field, any, exact: &[], exclude }
}

const fn kw_or_exact(
    field: Field,
    any: &'static [&'static str],
    exact: &'static [&'static str],
) -> HeaderRule {
    HeaderRule { field, any, exact, exclude: &[] }
}

const HIERARCHY_RULES: [HeaderRule; 6] = [
    kw_or_exact(Field::CategoryLargeCode, &["大类编码"], &["大类编"]),
    kw(Field::CategoryLarge, &["大类名称"]),
    kw_or_exact(Field::CategoryMidCode, &["中类编码"], &["中类编"]),
    kw(Field::CategoryMid, &["中类名称"]),
    kw_or_exact(Field::CategorySmallCode, &["小类编码"], &["小类编"]),
    kw(Field::CategorySmall, &["小类名称"]),
];

// Evaluated top to bottom. The net subtotal columns come before the plain
// sale columns: return lines carry a zero sale amount but a negative subtotal.
pub const SALE_RULES: &[HeaderRule] = &[
    kw_except(Field::Sku, &["货号", "商品编码", "SKU", "品号", "商品号"], &["状态"]),
    kw(Field::Date, &["销售日期", "订单日期", "业务日期"]),
    kw_except(Field::Date, &["日期"], &["变动"]),
    kw_except(Field::SaleAmount, &["金额小计"], &["占比"]),
    kw_except(Field::SaleAmount, &["销售金额"], &["占比"]),
    kw_except(
        Field::SaleCost,
        &["成本金额", "销售成本", "参考进价金额", "参考金额"],
        &["成本单价"],
    ),
    kw(Field::Margin, &["进销差价金额"]),
    kw_except(Field::SaleQty, &["数量小计"], &["占比"]),
    kw(Field::SaleQty, &["销售数量"]),
    kw(Field::Category, &["类别名称", "品类"]),
    HIERARCHY_RULES[0],
    HIERARCHY_RULES[1],
    HIERARCHY_RULES[2],
    HIERARCHY_RULES[3],
    HIERARCHY_RULES[4],
    HIERARCHY_RULES[5],
    kw(Field::BizMode, &["经营方式"]),
    kw(Field::WarehouseCode, &["仓库编码"]),
    kw(Field::WarehouseName, &["仓库名称"]),
    kw_except(Field::ProductName, &["商品名称", "品名"], &["简称"]),
    kw(Field::Barcode, &["国际条码", "条码"]),
    kw(Field::BrandName, &["品牌名称"]),
    kw(Field::SupplierName, &["供应商名称"]),
    kw(Field::ReturnQty, &["退货数量"]),
    kw(Field::ReturnAmount, &["退货金额"]),
    kw(Field::GiftQty, &["赠送数量"]),
    kw(Field::GiftAmount, &["赠送金额"]),
];

pub const STOCK_RULES: &[HeaderRule] = &[
    kw_except(Field::Sku, &["货号", "商品编码", "SKU"], &["状态"]),
    kw_except(Field::Category, &["类别", "品类"], &["名称"]),
    kw(Field::CategoryName, &["类别名称"]),
    kw(Field::StockAmount, &["库存总金额"]),
    kw(Field::StockAmount, &["库存金额", "零售价"]),
    kw(Field::StockBoxes, &["库存箱数"]),
    kw(Field::StockQty, &["实时库存", "库存数量"]),
    kw_except(Field::StockQty, &["库存"], &["金额"]),
    kw(Field::WarehouseCode, &["仓库编码"]),
    kw(Field::WarehouseName, &["仓库名称"]),
    kw(Field::Barcode, &["国际条码", "条码"]),
    kw(Field::ProductName, &["商品名称"]),
    kw(Field::Spec, &["规格"]),
    kw(Field::Unit, &["单位"]),
    kw(Field::ProductStatus, &["商品状态"]),
    kw(Field::BranchManage, &["分店经营"]),
    kw_except(Field::SalePrice, &["售价"], &["零售价"]),
    kw(Field::ShortName, &["商品简称"]),
    kw(Field::BrandCode, &["品牌编码"]),
    kw(Field::BrandName, &["品牌名称", "品牌"]),
    kw(Field::SupplierCode, &["供应商编码"]),
    kw(Field::SupplierName, &["主供应商", "供应商"]),
    kw(Field::LocationName, &["库位名称"]),
    kw(Field::LocationCode, &["库位"]),
    kw(Field::Contact, &["联系方式"]),
    kw(Field::BizMode, &["经营方式"]),
    HIERARCHY_RULES[0],
    HIERARCHY_RULES[1],
    HIERARCHY_RULES[2],
    HIERARCHY_RULES[3],
    HIERARCHY_RULES[4],
    HIERARCHY_RULES[5],
    kw(Field::AvgInboundPrice, &["平均入库价"]),
    kw(Field::AvgPrice, &["平均价"]),
    kw(Field::Aging, &["账龄"]),
    kw(Field::LastChangeDate, &["上次变动日期"]),
    kw(Field::ProductCode, &["品号"]),
];

pub const MARGIN_RULES: &[HeaderRule] = &[
    kw(Field::CategoryLarge, &["大类名称"]),
    kw(Field::Category, &["类别名称", "品类"]),
    kw_except(Field::SaleAmount, &["销售金额"], &["占比"]),
    kw(Field::SaleQty, &["销售数量"]),
    kw(Field::SaleCost, &["参考进价金额", "参考金额", "成本金额", "销售成本"]),
];

pub const CATEGORY_RULES: &[HeaderRule] = &HIERARCHY_RULES;

pub fn rules_for(kind: SheetKind) -> &'static [HeaderRule] {
    match kind {
        SheetKind::SaleDaily | SheetKind::SaleSummary => SALE_RULES,
        SheetKind::Stock => STOCK_RULES,
        SheetKind::Margin => MARGIN_RULES,
        SheetKind::Category => CATEGORY_RULES,
    }
}

// ---------------------------------------------------------------------------
// Forward fill and matching
// ---------------------------------------------------------------------------

/// Each blank cell takes the text of the nearest non-blank cell to its left,
/// reconstructing labels of horizontally merged header cells.
pub fn forward_fill(row: &[Cell]) -> Vec<String> {
    row.iter()
        .scan(String::new(), |last, cell| {
            if !cell.is_blank() {
                *last = cell.text();
            }
            Some(last.clone())
        })
        .collect()
}

/// Labels for a header that sits under a band row: the forward-filled band
/// text prefixed to each sub-header cell ("大类" over "编码" gives "大类编码").
/// A band needs at least two labels; a single merged title is not a band.
fn banded_labels(grid: &RawGrid, row: usize, top: usize) -> Option<Vec<String>> {
    if row <= top {
        return None;
    }
    let band_cells = grid.row(row - 1).iter().filter(|c| !c.is_blank()).count();
    if band_cells < 2 {
        return None;
    }
    let band = forward_fill(grid.row(row - 1));
    let width = band.len().max(grid.row(row).len());
    Some(
        (0..width)
            .map(|c| {
                let parent = band.get(c).map(String::as_str).unwrap_or("");
                let child = grid.cell(row, c);
                if child.is_blank() {
                    parent.to_string()
                } else {
                    format!("{parent}{}", child.text())
                }
            })
            .collect(),
    )
}

fn find_column(labels: &[String], rule: &HeaderRule, claimed: &BTreeSet<usize>) -> Option<usize> {
    labels
        .iter()
        .take(MAX_HEADER_COLS)
        .enumerate()
        .find(|(c, label)| !claimed.contains(c) && rule.matches(label))
        .map(|(c, _)| c)
}

/// Evaluates `rules` in order. Each rule whose field is still unresolved takes
/// the first unclaimed column whose plain label matches, else the first whose
/// banded label matches. A column is claimed by at most one field.
pub fn match_rules(
    labels: &[String],
    banded: Option<&[String]>,
    rules: &[HeaderRule],
) -> BTreeMap<Field, usize> {
    let mut found = BTreeMap::new();
    let mut claimed = BTreeSet::new();
    for rule in rules {
        if found.contains_key(&rule.field) {
            continue;
        }
        let hit = find_column(labels, rule, &claimed)
            .or_else(|| banded.and_then(|b| find_column(b, rule, &claimed)));
        if let Some(c) = hit {
            found.insert(rule.field, c);
            claimed.insert(c);
        }
    }
    found
}

/// Whether a candidate header row resolved enough to be trusted.
fn accepts(kind: SheetKind, found: &BTreeMap<Field, usize>) -> bool {
    let has = |f: Field| found.contains_key(&f);
    match kind {
        SheetKind::SaleDaily | SheetKind::SaleSummary => {
            has(Field::Sku) && (has(Field::SaleAmount) || has(Field::Date))
        }
        SheetKind::Stock => has(Field::Sku),
        SheetKind::Margin => has(Field::SaleAmount) && has(Field::SaleCost),
        SheetKind::Category => found.len() >= 2,
    }
}

/// Detected row first, then the rows above it, then a few rows below.
pub fn candidate_rows(anchor: usize, top: usize, height: usize) -> Vec<usize> {
    let mut rows = vec![anchor];
    rows.extend((top..anchor).rev());
    rows.extend(anchor + 1..=anchor + ROWS_BELOW);
    rows.retain(|r| *r < height);
    rows
}

// ---------------------------------------------------------------------------
// Column map
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Keyword,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resolved {
    pub index: usize,
    pub source: Source,
}

/// Canonical field to column index for one sheet. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    pub dialect: Dialect,
    /// Row the keywords were resolved from; `None` when only defaults apply.
    pub header_row: Option<usize>,
    columns: BTreeMap<Field, Resolved>,
}

impl ColumnMap {
    /// Keyword hits first, then dialect defaults for every field the keywords
    /// missed. Defaults never take a column a keyword already claimed, and
    /// out-of-range defaults are dropped unless the field is required.
    pub fn build(
        kind: SheetKind,
        found: BTreeMap<Field, usize>,
        header_row: Option<usize>,
        dialect: Dialect,
        width: usize,
    ) -> Self {
        let mut columns: BTreeMap<Field, Resolved> = found
            .into_iter()
            .map(|(f, index)| (f, Resolved { index, source: Source::Keyword }))
            .collect();
        let claimed: BTreeSet<usize> = columns.values().map(|r| r.index).collect();
        let required = required_fields(kind);
        for (field, index) in dialect.defaults() {
            if columns.contains_key(field) || claimed.contains(index) {
                continue;
            }
            if *index < width || required.contains(field) {
                columns.insert(*field, Resolved { index: *index, source: Source::Default });
            }
        }
        Self { dialect, header_row, columns }
    }

    pub fn get(&self, field: Field) -> Option<usize> {
        self.columns.get(&field).map(|r| r.index)
    }

    pub fn resolved(&self, field: Field) -> Option<Resolved> {
        self.columns.get(&field).copied()
    }

    pub fn is_keyword(&self, field: Field) -> bool {
        matches!(self.resolved(field), Some(Resolved { source: Source::Keyword, .. }))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, Resolved)> + '_ {
        self.columns.iter().map(|(f, r)| (*f, *r))
    }
}

/// Resolves the column map for a sheet whose layout is already known. With
/// no accepted header row the map is the dialect's default map, minus
/// optional fields whose default column lies beyond the sheet width; those
/// cells would read as blank, so the rows decode the same.
pub fn resolve_columns(grid: &RawGrid, layout: &Layout, kind: SheetKind) -> ColumnMap {
    let width = grid.width();
    let anchor = layout
        .header_row
        .unwrap_or_else(|| layout.data_start.saturating_sub(1));
    let rules = rules_for(kind);

    for row in candidate_rows(anchor, layout.top, grid.height()) {
        let labels = forward_fill(grid.row(row));
        let banded = banded_labels(grid, row, layout.top);
        let found = match_rules(&labels, banded.as_deref(), rules);
        if accepts(kind, &found) {
            debug!(kind = kind.key(), row, resolved = found.len(), "header resolved");
            return ColumnMap::build(kind, found, Some(row), layout.dialect, width);
        }
    }
    debug!(kind = kind.key(), dialect = ?layout.dialect, "no header matched, using dialect defaults");
    ColumnMap::build(kind, BTreeMap::new(), None, layout.dialect, width)
}
