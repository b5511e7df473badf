use serde::Serialize;

use crate::models::{Field, SheetKind};

/// Known sheet layouts, each with positional fallback indices for every
/// canonical field it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// 39-column daily sales export.
    SaleDaily,
    /// 54-column sales summary export.
    SaleSummary,
    /// 24-column real-time stock export.
    StockRealtime,
    /// 23-column stock query export.
    StockQuery,
    /// Pivot table: large category, category, sale amount, cost.
    MarginPivot,
    /// Six-column hierarchy: large/mid/small code and name.
    CategoryTable,
}

const SALE_DAILY: &[(Field, usize)] = &[
    (Field::WarehouseCode, 0),
    (Field::WarehouseName, 1),
    (Field::Sku, 2),
    (Field::ProductName, 3),
    (Field::Barcode, 4),
    (Field::ShortName, 5),
    (Field::Unit, 6),
    (Field::Spec, 7),
    (Field::CategoryCode, 8),
    (Field::Category, 9),
    (Field::CategoryLargeCode, 10),
    (Field::CategoryLarge, 11),
    (Field::CategoryMidCode, 12),
    (Field::CategoryMid, 13),
    (Field::CategorySmallCode, 14),
    (Field::CategorySmall, 15),
    (Field::BizMode, 16),
    (Field::SupplierCode, 17),
    (Field::SupplierName, 18),
    (Field::BrandCode, 19),
    (Field::BrandName, 20),
    (Field::CategoryGroupCode, 21),
    (Field::CategoryGroupName, 22),
    (Field::LocationCode, 23),
    (Field::LocationName, 24),
    (Field::JointRate, 25),
    (Field::Date, 26),
    (Field::SalePrice, 27),
    (Field::SaleQty, 28),
    (Field::SaleAmount, 29),
    (Field::ReturnQty, 30),
    (Field::ReturnAmount, 31),
    (Field::GiftQty, 32),
    (Field::GiftAmount, 33),
    (Field::QtyTotal, 34),
    (Field::AmountTotal, 35),
    (Field::ReturnPrice, 36),
    (Field::SaleCost, 38),
];

// Columns 0-15 match the daily export; supplier columns gain a "main
// supplier" pair and everything after shifts.
const SALE_SUMMARY: &[(Field, usize)] = &[
    (Field::WarehouseCode, 0),
    (Field::WarehouseName, 1),
    (Field::Sku, 2),
    (Field::ProductName, 3),
    (Field::Barcode, 4),
    (Field::ShortName, 5),
    (Field::Unit, 6),
    (Field::Spec, 7),
    (Field::CategoryCode, 8),
    (Field::Category, 9),
    (Field::CategoryLargeCode, 10),
    (Field::CategoryLarge, 11),
    (Field::CategoryMidCode, 12),
    (Field::CategoryMid, 13),
    (Field::CategorySmallCode, 14),
    (Field::CategorySmall, 15),
    (Field::SupplierCode, 16),
    (Field::SupplierName, 17),
    (Field::SupplierMainCode, 18),
    (Field::SupplierMainName, 19),
    (Field::BrandCode, 20),
    (Field::BrandName, 21),
    (Field::CategoryGroupCode, 22),
    (Field::CategoryGroupName, 23),
    (Field::LocationCode, 24),
    (Field::LocationName, 25),
    (Field::JointRate, 26),
    (Field::Date, 27),
    (Field::AvgSalePrice, 28),
    (Field::SalePrice, 29),
    (Field::SaleQty, 30),
    (Field::SaleAmount, 31),
    (Field::ReturnQty, 32),
    (Field::ReturnAmount, 33),
    (Field::GiftQty, 34),
    (Field::GiftAmount, 35),
    (Field::QtyTotal, 36),
    (Field::QtyRatio, 37),
    (Field::AmountTotal, 38),
    (Field::AmountRatio, 39),
    (Field::ReturnPrice, 40),
    (Field::SaleCost, 41),
    (Field::CurrentStock, 43),
];

const STOCK_REALTIME: &[(Field, usize)] = &[
    (Field::WarehouseCode, 0),
    (Field::WarehouseName, 1),
    (Field::Category, 2),
    (Field::CategoryName, 3),
    (Field::Sku, 4),
    (Field::Barcode, 5),
    (Field::ProductName, 6),
    (Field::Spec, 7),
    (Field::Unit, 8),
    (Field::ProductStatus, 9),
    (Field::BranchManage, 10),
    (Field::StockQty, 11),
    (Field::StockBoxes, 12),
    (Field::StockAmount, 13),
    (Field::SalePrice, 14),
    (Field::ShortName, 15),
    (Field::BrandCode, 16),
    (Field::BrandName, 17),
    (Field::SupplierCode, 18),
    (Field::SupplierName, 19),
    (Field::LocationCode, 20),
    (Field::LocationName, 21),
    (Field::Contact, 22),
    (Field::BizMode, 23),
];

const STOCK_QUERY: &[(Field, usize)] = &[
    (Field::WarehouseCode, 0),
    (Field::WarehouseName, 1),
    (Field::Sku, 2),
    (Field::Category, 3),
    (Field::CategoryLargeCode, 4),
    (Field::CategoryLarge, 5),
    (Field::CategoryMidCode, 6),
    (Field::CategoryMid, 7),
    (Field::CategorySmallCode, 8),
    (Field::CategorySmall, 9),
    (Field::Spec, 10),
    (Field::LocationName, 11),
    (Field::BrandName, 12),
    (Field::Unit, 13),
    (Field::ProductCode, 14),
    (Field::StockQty, 15),
    (Field::AvgPrice, 16),
    (Field::StockAmount, 17),
    (Field::Aging, 18),
    (Field::LastChangeDate, 19),
    (Field::AvgInboundPrice, 20),
    (Field::ProductStatus, 21),
    (Field::Barcode, 22),
];

const MARGIN_PIVOT: &[(Field, usize)] = &[
    (Field::CategoryLarge, 0),
    (Field::Category, 1),
    (Field::SaleAmount, 2),
    (Field::SaleCost, 4),
];

const CATEGORY_TABLE: &[(Field, usize)] = &[
    (Field::CategoryLargeCode, 0),
    (Field::CategoryLarge, 1),
    (Field::CategoryMidCode, 2),
    (Field::CategoryMid, 3),
    (Field::CategorySmallCode, 4),
    (Field::CategorySmall, 5),
];

/// Column count of the legacy real-time stock export.
const STOCK_REALTIME_WIDTH: usize = 24;

impl Dialect {
    /// Picks the dialect from the sheet kind, the header labels (when a header
    /// was found) and the total column count.
    pub fn detect(kind: SheetKind, header_labels: &[String], width: usize) -> Self {
        match kind {
            SheetKind::SaleDaily => Self::SaleDaily,
            SheetKind::SaleSummary => Self::SaleSummary,
            SheetKind::Margin => Self::MarginPivot,
            SheetKind::Category => Self::CategoryTable,
            SheetKind::Stock => {
                let has = |kw: &str| header_labels.iter().any(|l| l.contains(kw));
                if has("实时库存") {
                    Self::StockRealtime
                } else if has("库存数量") || has("库存总金额") {
                    Self::StockQuery
                } else if width >= STOCK_REALTIME_WIDTH {
                    Self::StockRealtime
                } else {
                    Self::StockQuery
                }
            }
        }
    }

    pub fn defaults(&self) -> &'static [(Field, usize)] {
        match self {
            Self::SaleDaily => SALE_DAILY,
            Self::SaleSummary => SALE_SUMMARY,
            Self::StockRealtime => STOCK_REALTIME,
            Self::StockQuery => STOCK_QUERY,
            Self::MarginPivot => MARGIN_PIVOT,
            Self::CategoryTable => CATEGORY_TABLE,
        }
    }

    pub fn default_index(&self, field: Field) -> Option<usize> {
        self.defaults()
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, idx)| *idx)
    }
}

/// Fields a sheet kind cannot do without. Their positional defaults are kept
/// even when out of range so the structural check can report the shortfall.
pub fn required_fields(kind: SheetKind) -> &'static [Field] {
    match kind {
        SheetKind::SaleDaily | SheetKind::SaleSummary => {
            &[Field::Sku, Field::Date, Field::SaleAmount, Field::SaleCost]
        }
        SheetKind::Stock => &[Field::Sku],
        SheetKind::Margin => &[Field::SaleAmount, Field::SaleCost],
        SheetKind::Category => &[],
    }
}

/// Fewest columns a sheet of this kind can have and still be imported.
pub fn min_width(kind: SheetKind) -> usize {
    match kind {
        SheetKind::SaleDaily | SheetKind::SaleSummary | SheetKind::Margin => 3,
        SheetKind::Stock => 5,
        SheetKind::Category => 2,
    }
}
