use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::{Null, ToSql, ToSqlOutput};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Sheet kinds: enum dispatch, processing order is declaration order
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetKind {
    SaleDaily,
    SaleSummary,
    Stock,
    Category,
    Margin,
}

pub const ALL_KINDS: &[SheetKind] = &[
    SheetKind::SaleDaily,
    SheetKind::SaleSummary,
    SheetKind::Stock,
    SheetKind::Category,
    SheetKind::Margin,
];

impl SheetKind {
    pub fn key(&self) -> &'static str {
        match self {
            Self::SaleDaily => "sale_daily",
            Self::SaleSummary => "sale_summary",
            Self::Stock => "stock",
            Self::Category => "category",
            Self::Margin => "margin",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SaleDaily => "Daily sales",
            Self::SaleSummary => "Sales summary",
            Self::Stock => "Stock snapshot",
            Self::Category => "Category hierarchy",
            Self::Margin => "Margin summary",
        }
    }

    pub fn is_sales(&self) -> bool {
        matches!(self, Self::SaleDaily | Self::SaleSummary)
    }
}

/// Accepts the canonical keys plus "profit", the older name of margin sheets.
pub fn get_by_key(key: &str) -> Option<SheetKind> {
    if key == "profit" {
        return Some(SheetKind::Margin);
    }
    ALL_KINDS.iter().find(|k| k.key() == key).copied()
}

// ---------------------------------------------------------------------------
// Canonical fields
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Text,
    Decimal,
    Timestamp,
}

/// A logical column, independent of where a given sheet puts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Sku,
    Date,
    WarehouseCode,
    WarehouseName,
    ProductName,
    Barcode,
    ShortName,
    Unit,
    Spec,
    CategoryCode,
    Category,
    CategoryName,
    CategoryLargeCode,
    CategoryLarge,
    CategoryMidCode,
    CategoryMid,
    CategorySmallCode,
    CategorySmall,
    BizMode,
    SupplierCode,
    SupplierName,
    SupplierMainCode,
    SupplierMainName,
    BrandCode,
    BrandName,
    CategoryGroupCode,
    CategoryGroupName,
    LocationCode,
    LocationName,
    ProductCode,
    ProductStatus,
    BranchManage,
    Contact,
    JointRate,
    SalePrice,
    AvgSalePrice,
    ReturnPrice,
    QtyRatio,
    AmountRatio,
    CurrentStock,
    AvgPrice,
    Aging,
    AvgInboundPrice,
    SaleQty,
    SaleAmount,
    SaleCost,
    Margin,
    ReturnQty,
    ReturnAmount,
    GiftQty,
    GiftAmount,
    QtyTotal,
    AmountTotal,
    StockQty,
    StockAmount,
    StockBoxes,
    LastChangeDate,
}

impl Field {
    /// Destination column name.
    pub fn column(&self) -> &'static str {
        match self {
            Self::Sku => "sku_code",
            Self::Date => "data_date",
            Self::WarehouseCode => "warehouse_code",
            Self::WarehouseName => "warehouse_name",
            Self::ProductName => "product_name",
            Self::Barcode => "barcode",
            Self::ShortName => "short_name",
            Self::Unit => "unit",
            Self::Spec => "spec",
            Self::CategoryCode => "category_code",
            Self::Category => "category",
            Self::CategoryName => "category_name",
            Self::CategoryLargeCode => "category_large_code",
            Self::CategoryLarge => "category_large",
            Self::CategoryMidCode => "category_mid_code",
            Self::CategoryMid => "category_mid",
            Self::CategorySmallCode => "category_small_code",
            Self::CategorySmall => "category_small",
            Self::BizMode => "biz_mode",
            Self::SupplierCode => "supplier_code",
            Self::SupplierName => "supplier_name",
            Self::SupplierMainCode => "supplier_main_code",
            Self::SupplierMainName => "supplier_main_name",
            Self::BrandCode => "brand_code",
            Self::BrandName => "brand_name",
            Self::CategoryGroupCode => "category_group_code",
            Self::CategoryGroupName => "category_group_name",
            Self::LocationCode => "location_code",
            Self::LocationName => "location_name",
            Self::ProductCode => "product_code",
            Self::ProductStatus => "product_status",
            Self::BranchManage => "branch_manage",
            Self::Contact => "contact",
            Self::JointRate => "joint_rate",
            Self::SalePrice => "sale_price",
            Self::AvgSalePrice => "avg_sale_price",
            Self::ReturnPrice => "return_price",
            Self::QtyRatio => "qty_ratio",
            Self::AmountRatio => "amount_ratio",
            Self::CurrentStock => "current_stock",
            Self::AvgPrice => "avg_price",
            Self::Aging => "aging",
            Self::AvgInboundPrice => "avg_inbound_price",
            Self::SaleQty => "sale_qty",
            Self::SaleAmount => "sale_amount",
            Self::SaleCost => "sale_cost",
            Self::Margin => "margin_amount",
            Self::ReturnQty => "return_qty",
            Self::ReturnAmount => "return_amount",
            Self::GiftQty => "gift_qty",
            Self::GiftAmount => "gift_amount",
            Self::QtyTotal => "qty_total",
            Self::AmountTotal => "amount_total",
            Self::StockQty => "stock_qty",
            Self::StockAmount => "stock_amount",
            Self::StockBoxes => "stock_boxes",
            Self::LastChangeDate => "last_change_date",
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Self::LastChangeDate => ValueType::Timestamp,
            Self::JointRate
            | Self::SalePrice
            | Self::AvgSalePrice
            | Self::ReturnPrice
            | Self::QtyRatio
            | Self::AmountRatio
            | Self::CurrentStock
            | Self::AvgPrice
            | Self::Aging
            | Self::AvgInboundPrice => ValueType::Decimal,
            f if f.is_additive() => ValueType::Decimal,
            _ => ValueType::Text,
        }
    }

    /// Measures that sum on key collision. A sheet legitimately carries a
    /// sale line, a return line and a gift line for the same logical key.
    pub fn is_additive(&self) -> bool {
        matches!(
            self,
            Self::SaleQty
                | Self::SaleAmount
                | Self::SaleCost
                | Self::Margin
                | Self::ReturnQty
                | Self::ReturnAmount
                | Self::GiftQty
                | Self::GiftAmount
                | Self::QtyTotal
                | Self::AmountTotal
                | Self::StockQty
                | Self::StockAmount
                | Self::StockBoxes
        )
    }

    /// Maximum stored length for text fields.
    pub fn max_len(&self) -> usize {
        match self {
            Self::Category | Self::CategoryName => 64,
            _ => 128,
        }
    }
}

// ---------------------------------------------------------------------------
// Decoded values and records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(Option<String>),
    Decimal(Option<f64>),
    Timestamp(Option<NaiveDateTime>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(
            self,
            Self::Text(None) | Self::Decimal(None) | Self::Timestamp(None)
        )
    }
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Text(Some(s)) => ToSqlOutput::from(s.as_str()),
            Self::Decimal(Some(f)) => ToSqlOutput::from(*f),
            Self::Timestamp(Some(ts)) => {
                ToSqlOutput::from(ts.format("%Y-%m-%d %H:%M:%S").to_string())
            }
            _ => ToSqlOutput::from(Null),
        })
    }
}

/// Natural identity under which additive measures are summed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccumulationKey {
    pub date: NaiveDate,
    pub item: String,
    pub location: String,
}

/// One decoded row. Built by the decoder, consumed by the writer.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRecord {
    pub key: AccumulationKey,
    pub values: BTreeMap<Field, FieldValue>,
}

impl ImportRecord {
    pub fn new(key: AccumulationKey) -> Self {
        Self {
            key,
            values: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, field: Field, value: FieldValue) {
        self.values.insert(field, value);
    }

    pub fn decimal(&self, field: Field) -> f64 {
        match self.values.get(&field) {
            Some(FieldValue::Decimal(Some(v))) => *v,
            _ => 0.0,
        }
    }

    pub fn text(&self, field: Field) -> Option<&str> {
        match self.values.get(&field) {
            Some(FieldValue::Text(Some(s))) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// One row of the category hierarchy table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CategoryNode {
    pub large_code: String,
    pub large: String,
    pub mid_code: String,
    pub mid: String,
    pub small_code: String,
    pub small: String,
}

// ---------------------------------------------------------------------------
// Decode options
// ---------------------------------------------------------------------------

/// What to store as gross profit when a key has no sale amount but does have
/// cost. Sheets with swapped price/cost columns produce exactly this shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MarginPolicy {
    /// gross = amount - cost, always.
    Plain,
    /// gross = 0 when amount is zero and cost is positive.
    #[default]
    ZeroWithoutSales,
}

impl MarginPolicy {
    pub fn gross(&self, amount: f64, cost: f64) -> f64 {
        match self {
            Self::ZeroWithoutSales if amount == 0.0 && cost > 0.0 => 0.0,
            _ => amount - cost,
        }
    }
}

/// Per-call decoding toggles. Passed explicitly into every decode call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecodeOptions {
    #[serde(default)]
    pub swap_amount_cost: bool,
    /// The amount column already holds the row total (not a unit price).
    #[serde(default = "default_true")]
    pub amount_as_total: bool,
    /// The cost column already holds the row total (not a unit cost).
    #[serde(default = "default_true")]
    pub cost_as_total: bool,
    #[serde(default)]
    pub margin_policy: MarginPolicy,
}

fn default_true() -> bool {
    true
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            swap_amount_cost: false,
            amount_as_total: true,
            cost_as_total: true,
            margin_policy: MarginPolicy::default(),
        }
    }
}
