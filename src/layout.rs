use tracing::debug;

use crate::dialect::Dialect;
use crate::grid::RawGrid;
use crate::header::forward_fill;
use crate::models::SheetKind;

/// Rows scanned for a header anchor.
const HEADER_WINDOW_ROWS: usize = 25;
/// Columns scanned for a header anchor.
const HEADER_WINDOW_COLS: usize = 50;
/// Data start (relative to the first non-blank row) when no header is found.
const FALLBACK_DATA_ROW: usize = 1;

/// Where the header and data of a sheet sit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// First non-blank row.
    pub top: usize,
    /// `None` in degraded mode: no anchor keyword within the window.
    pub header_row: Option<usize>,
    pub data_start: usize,
    pub dialect: Dialect,
}

impl Layout {
    pub fn is_degraded(&self) -> bool {
        self.header_row.is_none()
    }
}

/// Keywords that mark a row as a header for each sheet kind.
pub fn anchor_keywords(kind: SheetKind) -> &'static [&'static str] {
    match kind {
        SheetKind::SaleDaily | SheetKind::SaleSummary => &[
            "货号", "商品编码", "品号", "商品号", "销售日期", "订单日期", "销售金额", "销售数量",
            "商品名称",
        ],
        SheetKind::Stock => &[
            "货号", "商品编码", "实时库存", "库存数量", "库存金额", "库存总金额", "商品名称",
        ],
        SheetKind::Margin => &["大类名称", "类别名称", "销售金额", "参考进价", "求和项"],
        SheetKind::Category => &["大类", "中类", "小类"],
    }
}

/// Skips blank leading rows, then takes the first row within the window that
/// carries an anchor keyword as the header. Never fails: without an anchor the
/// sheet is read from a fixed row with the kind's default dialect.
pub fn detect_layout(grid: &RawGrid, kind: SheetKind) -> Layout {
    let top = (0..grid.height())
        .find(|r| !grid.is_blank_row(*r))
        .unwrap_or(grid.height());
    let anchors = anchor_keywords(kind);

    let header_row = (top..grid.height().min(top + HEADER_WINDOW_ROWS)).find(|r| {
        forward_fill(grid.row(*r))
            .iter()
            .take(HEADER_WINDOW_COLS)
            .any(|label| anchors.iter().any(|k| label.contains(k)))
    });

    let labels = header_row
        .map(|r| forward_fill(grid.row(r)))
        .unwrap_or_default();
    let dialect = Dialect::detect(kind, &labels, grid.width());
    let data_start = match header_row {
        Some(r) => r + 1,
        None => top + FALLBACK_DATA_ROW,
    };
    debug!(kind = kind.key(), top, ?header_row, data_start, ?dialect, "layout detected");

    Layout {
        top,
        header_row,
        data_start,
        dialect,
    }
}
