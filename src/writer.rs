use chrono::NaiveDate;
use rusqlite::types::ToSql;
use rusqlite::{Connection, Transaction};
use tracing::warn;

use crate::error::{IngestError, Result};
use crate::models::{CategoryNode, Field, ImportRecord, MarginPolicy, SheetKind};

// ---------------------------------------------------------------------------
// Write strategies
// ---------------------------------------------------------------------------

/// Column sets a row can be written with, richest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStrategy {
    /// Every decoded field.
    Full,
    /// Identity plus the core measures of the table.
    Minimal,
}

impl WriteStrategy {
    pub const LADDER: [WriteStrategy; 2] = [WriteStrategy::Full, WriteStrategy::Minimal];

    pub fn next(self) -> Option<Self> {
        let pos = Self::LADDER.iter().position(|s| *s == self)?;
        Self::LADDER.get(pos + 1).copied()
    }
}

/// Whether the store rejected a statement because a column it names does not
/// exist, which is what a stale schema looks like.
pub fn is_unknown_column(err: &IngestError) -> bool {
    let msg = err.to_string();
    msg.contains("has no column named") || msg.contains("no such column")
}

// ---------------------------------------------------------------------------
// Destinations
// ---------------------------------------------------------------------------

/// Measures recomputed from accumulated totals on every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Derived {
    Nothing,
    /// gross_profit under the configured margin policy.
    Gross,
    /// gross_profit (plain difference) and profit_rate clamped to [-1, 1].
    GrossAndRate,
}

/// Table a keyed record lands in.
#[derive(Debug, Clone, Copy)]
pub struct Target {
    pub table: &'static str,
    pub item_column: &'static str,
    /// Fields kept by the minimal strategy.
    pub core: &'static [Field],
    pub derived: Derived,
}

#[derive(Debug, Clone, Copy)]
pub enum Destination {
    Keyed(Target),
    Categories,
}

impl Destination {
    pub fn for_kind(kind: SheetKind) -> Self {
        match kind {
            SheetKind::SaleDaily | SheetKind::SaleSummary => Self::Keyed(Target {
                table: "sales",
                item_column: "sku_code",
                core: &[Field::SaleQty, Field::SaleAmount, Field::SaleCost],
                derived: Derived::Gross,
            }),
            SheetKind::Stock => Self::Keyed(Target {
                table: "stock",
                item_column: "sku_code",
                core: &[Field::StockQty, Field::StockAmount],
                derived: Derived::Nothing,
            }),
            SheetKind::Margin => Self::Keyed(Target {
                table: "margins",
                item_column: "category",
                core: &[Field::SaleAmount, Field::SaleCost],
                derived: Derived::GrossAndRate,
            }),
            SheetKind::Category => Self::Categories,
        }
    }

    /// Tables a batch clears before loading this kind in replace mode. Stock
    /// is a dated snapshot and is cleared per report date instead, see
    /// [`SheetWriter::clear_snapshot`].
    pub fn tables(&self) -> &'static [&'static str] {
        match self {
            Self::Keyed(t) if t.table == "sales" => &["sales", "margins"],
            Self::Keyed(t) if t.table == "stock" => &[],
            Self::Keyed(_) => &["margins"],
            Self::Categories => &["categories"],
        }
    }
}

// ---------------------------------------------------------------------------
// SQL builders
// ---------------------------------------------------------------------------

const KEY_COLUMNS: usize = 3;

fn sum_expr(col: &str) -> String {
    format!("(COALESCE({col}, 0) + COALESCE(excluded.{col}, 0))")
}

fn gross_expr(amount: &str, cost: &str, policy: MarginPolicy) -> String {
    match policy {
        MarginPolicy::Plain => format!("{amount} - {cost}"),
        MarginPolicy::ZeroWithoutSales => {
            format!("CASE WHEN {amount} = 0 AND {cost} > 0 THEN 0 ELSE {amount} - {cost} END")
        }
    }
}

/// One atomic upsert. Additive columns add to the stored value, attributes
/// keep the stored value when the new one is null, derived measures are
/// recomputed from the summed totals inside the same statement.
/// `updated_at` is bookkeeping and only written by the full strategy.
pub fn upsert_sql(
    target: &Target,
    fields: &[Field],
    derived: Derived,
    policy: MarginPolicy,
    strategy: WriteStrategy,
) -> String {
    let mut columns = vec!["data_date", target.item_column, "store_id"];
    columns.extend(fields.iter().map(|f| f.column()));

    let mut updates: Vec<String> = fields
        .iter()
        .map(|f| {
            let c = f.column();
            if f.is_additive() {
                format!("{c} = {}", sum_expr(c))
            } else {
                format!("{c} = COALESCE(excluded.{c}, {c})")
            }
        })
        .collect();

    let amount = sum_expr(Field::SaleAmount.column());
    let cost = sum_expr(Field::SaleCost.column());
    match derived {
        Derived::Nothing => {}
        Derived::Gross => {
            columns.push("gross_profit");
            updates.push(format!("gross_profit = {}", gross_expr(&amount, &cost, policy)));
        }
        Derived::GrossAndRate => {
            columns.push("gross_profit");
            columns.push("profit_rate");
            updates.push(format!("gross_profit = {amount} - {cost}"));
            updates.push(format!(
                "profit_rate = CASE WHEN {amount} > 0 THEN MAX(-1.0, MIN(1.0, ({amount} - {cost}) / {amount})) ELSE 0 END"
            ));
        }
    }
    if strategy == WriteStrategy::Full {
        updates.push("updated_at = datetime('now')".to_string());
    }

    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    format!(
        "INSERT INTO {table} ({cols}) VALUES ({vals}) ON CONFLICT(data_date, {item}, store_id) DO UPDATE SET {updates}",
        table = target.table,
        cols = columns.join(", "),
        vals = placeholders.join(", "),
        item = target.item_column,
        updates = updates.join(", "),
    )
}

/// Zero unless sales are positive, then clamped to [-1, 1].
pub fn profit_rate(amount: f64, cost: f64) -> f64 {
    if amount > 0.0 {
        ((amount - cost) / amount).clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

pub fn upsert_category(conn: &Connection, node: &CategoryNode) -> Result<()> {
    conn.prepare_cached(
        "INSERT INTO categories (category_large_code, category_large, category_mid_code, category_mid, category_small_code, category_small)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(category_large_code, category_mid_code, category_small_code) DO UPDATE SET
            category_large = COALESCE(NULLIF(excluded.category_large, ''), category_large),
            category_mid = COALESCE(NULLIF(excluded.category_mid, ''), category_mid),
            category_small = COALESCE(NULLIF(excluded.category_small, ''), category_small),
            updated_at = datetime('now')",
    )?
    .execute(rusqlite::params![
        node.large_code,
        node.large,
        node.mid_code,
        node.mid,
        node.small_code,
        node.small,
    ])?;
    Ok(())
}

// ---------------------------------------------------------------------------
// SheetWriter
// ---------------------------------------------------------------------------

/// Writes the records of one sheet inside one transaction. The strategy only
/// moves down the ladder: once a sheet degrades, its remaining rows are
/// written minimal.
pub struct SheetWriter<'c> {
    tx: Transaction<'c>,
    destination: Destination,
    policy: MarginPolicy,
    strategy: WriteStrategy,
}

impl<'c> SheetWriter<'c> {
    pub fn new(conn: &'c Connection, kind: SheetKind, policy: MarginPolicy) -> Result<Self> {
        Ok(Self {
            tx: conn.unchecked_transaction()?,
            destination: Destination::for_kind(kind),
            policy,
            strategy: WriteStrategy::Full,
        })
    }

    pub fn strategy(&self) -> WriteStrategy {
        self.strategy
    }

    /// Writes one record, stepping down the ladder on unknown-column
    /// rejections. Returns the strategy the row was written with.
    pub fn write(&mut self, record: &ImportRecord) -> Result<WriteStrategy> {
        let Destination::Keyed(target) = self.destination else {
            return Err(IngestError::Other(
                "category rows are written with write_category".to_string(),
            ));
        };
        loop {
            match self.write_with(&target, record, self.strategy) {
                Ok(()) => return Ok(self.strategy),
                Err(e) if is_unknown_column(&e) => match self.strategy.next() {
                    Some(next) => {
                        warn!(table = target.table, error = %e, "column missing from store, falling back to minimal writes");
                        self.strategy = next;
                    }
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }

    fn write_with(&self, target: &Target, record: &ImportRecord, strategy: WriteStrategy) -> Result<()> {
        let fields: Vec<Field> = record
            .values
            .keys()
            .copied()
            .filter(|f| strategy == WriteStrategy::Full || target.core.contains(f))
            .collect();
        let has_measures = record.values.contains_key(&Field::SaleAmount)
            && record.values.contains_key(&Field::SaleCost);
        let derived = if has_measures { target.derived } else { Derived::Nothing };

        let amount = record.decimal(Field::SaleAmount);
        let cost = record.decimal(Field::SaleCost);
        let gross = match derived {
            Derived::GrossAndRate => amount - cost,
            _ => self.policy.gross(amount, cost),
        };
        let rate = profit_rate(amount, cost);
        let date = record.key.date.format("%Y-%m-%d").to_string();

        let mut params: Vec<&dyn ToSql> = Vec::with_capacity(fields.len() + KEY_COLUMNS + 2);
        params.push(&date);
        params.push(&record.key.item);
        params.push(&record.key.location);
        for f in &fields {
            params.push(&record.values[f]);
        }
        match derived {
            Derived::Nothing => {}
            Derived::Gross => params.push(&gross),
            Derived::GrossAndRate => {
                params.push(&gross);
                params.push(&rate);
            }
        }

        let sql = upsert_sql(target, &fields, derived, self.policy, strategy);
        self.tx.prepare_cached(&sql)?.execute(params.as_slice())?;
        Ok(())
    }

    /// Deletes the rows of one date and store before a snapshot is reloaded.
    pub fn clear_snapshot(&self, date: NaiveDate, store_id: &str) -> Result<usize> {
        let Destination::Keyed(target) = self.destination else {
            return Ok(0);
        };
        let sql = format!("DELETE FROM {} WHERE data_date = ?1 AND store_id = ?2", target.table);
        let date = date.format("%Y-%m-%d").to_string();
        Ok(self.tx.execute(&sql, rusqlite::params![date, store_id])?)
    }

    pub fn write_category(&mut self, node: &CategoryNode) -> Result<()> {
        upsert_category(&self.tx, node)
    }

    pub fn commit(self) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_connection, init_db};
    use crate::models::{AccumulationKey, FieldValue};

    fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("test.db")).unwrap();
        init_db(&conn).unwrap();
        (dir, conn)
    }

    fn sale(qty: f64, amount: f64, cost: f64, brand: Option<&str>) -> ImportRecord {
        let mut rec = ImportRecord::new(AccumulationKey {
            date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
            item: "1001".to_string(),
            location: "S1".to_string(),
        });
        rec.set(Field::SaleQty, FieldValue::Decimal(Some(qty)));
        rec.set(Field::SaleAmount, FieldValue::Decimal(Some(amount)));
        rec.set(Field::SaleCost, FieldValue::Decimal(Some(cost)));
        rec.set(Field::BrandName, FieldValue::Text(brand.map(str::to_string)));
        rec
    }

    fn write_all(conn: &Connection, kind: SheetKind, policy: MarginPolicy, records: &[ImportRecord]) {
        let mut writer = SheetWriter::new(conn, kind, policy).unwrap();
        for rec in records {
            writer.write(rec).unwrap();
        }
        writer.commit().unwrap();
    }

    fn sales_row(conn: &Connection) -> (f64, f64, f64, f64, Option<String>) {
        conn.query_row(
            "SELECT sale_qty, sale_amount, sale_cost, gross_profit, brand_name FROM sales",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .unwrap()
    }

    #[test]
    fn test_ladder_order() {
        assert_eq!(WriteStrategy::Full.next(), Some(WriteStrategy::Minimal));
        assert_eq!(WriteStrategy::Minimal.next(), None);
    }

    #[test]
    fn test_sequential_imports_sum_quantities() {
        let (_dir, conn) = test_db();
        write_all(&conn, SheetKind::SaleDaily, MarginPolicy::Plain, &[sale(10.0, 100.0, 60.0, None)]);
        write_all(&conn, SheetKind::SaleDaily, MarginPolicy::Plain, &[sale(5.0, 50.0, 30.0, None)]);
        let (qty, amount, cost, gross, _) = sales_row(&conn);
        assert_eq!((qty, amount, cost, gross), (15.0, 150.0, 90.0, 60.0));
        let rows: i64 = conn.query_row("SELECT count(*) FROM sales", [], |r| r.get(0)).unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_return_line_nets_against_sale() {
        let (_dir, conn) = test_db();
        write_all(
            &conn,
            SheetKind::SaleDaily,
            MarginPolicy::Plain,
            &[sale(2.0, 10.0, 6.0, None), sale(-1.0, -4.0, -2.0, None)],
        );
        let (qty, amount, cost, gross, _) = sales_row(&conn);
        assert_eq!((qty, amount, cost, gross), (1.0, 6.0, 4.0, 2.0));
    }

    #[test]
    fn test_gross_recomputed_from_totals_under_policy() {
        let (_dir, conn) = test_db();
        let policy = MarginPolicy::ZeroWithoutSales;
        write_all(&conn, SheetKind::SaleDaily, policy, &[sale(1.0, 0.0, 5.0, None)]);
        assert_eq!(sales_row(&conn).3, 0.0);
        write_all(&conn, SheetKind::SaleDaily, policy, &[sale(1.0, 10.0, 0.0, None)]);
        let (_, amount, cost, gross, _) = sales_row(&conn);
        assert_eq!((amount, cost, gross), (10.0, 5.0, 5.0));
    }

    #[test]
    fn test_attributes_coalesce() {
        let (_dir, conn) = test_db();
        write_all(&conn, SheetKind::SaleDaily, MarginPolicy::Plain, &[sale(1.0, 1.0, 1.0, Some("可口可乐"))]);
        write_all(&conn, SheetKind::SaleDaily, MarginPolicy::Plain, &[sale(1.0, 1.0, 1.0, None)]);
        assert_eq!(sales_row(&conn).4.as_deref(), Some("可口可乐"));
        write_all(&conn, SheetKind::SaleDaily, MarginPolicy::Plain, &[sale(1.0, 1.0, 1.0, Some("百事"))]);
        assert_eq!(sales_row(&conn).4.as_deref(), Some("百事"));
    }

    #[test]
    fn test_missing_optional_column_degrades_without_errors() {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("old.db")).unwrap();
        conn.execute_batch(
            "CREATE TABLE sales (
                data_date TEXT NOT NULL, sku_code TEXT NOT NULL, store_id TEXT NOT NULL,
                sale_qty REAL, sale_amount REAL, sale_cost REAL, gross_profit REAL,
                UNIQUE (data_date, sku_code, store_id)
            );",
        )
        .unwrap();
        let mut writer = SheetWriter::new(&conn, SheetKind::SaleDaily, MarginPolicy::Plain).unwrap();
        let first = writer.write(&sale(10.0, 100.0, 60.0, Some("可口可乐"))).unwrap();
        let second = writer.write(&sale(5.0, 50.0, 30.0, Some("可口可乐"))).unwrap();
        writer.commit().unwrap();
        assert_eq!(first, WriteStrategy::Minimal);
        assert_eq!(second, WriteStrategy::Minimal);
        let (qty, gross): (f64, f64) = conn
            .query_row("SELECT sale_qty, gross_profit FROM sales", [], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap();
        assert_eq!((qty, gross), (15.0, 60.0));
    }

    #[test]
    fn test_other_errors_are_not_degraded() {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("nokey.db")).unwrap();
        conn.execute_batch(
            "CREATE TABLE sales (data_date TEXT, sku_code TEXT, store_id TEXT, sale_qty REAL,
             sale_amount REAL, sale_cost REAL, gross_profit REAL, brand_name TEXT, updated_at TEXT);",
        )
        .unwrap();
        let mut writer = SheetWriter::new(&conn, SheetKind::SaleDaily, MarginPolicy::Plain).unwrap();
        let err = writer.write(&sale(1.0, 1.0, 1.0, None)).unwrap_err();
        assert!(!is_unknown_column(&err));
        assert_eq!(writer.strategy(), WriteStrategy::Full);
    }

    #[test]
    fn test_margin_rate_recomputed_and_clamped() {
        let (_dir, conn) = test_db();
        let mut rec = ImportRecord::new(AccumulationKey {
            date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
            item: "饮料".to_string(),
            location: "S1".to_string(),
        });
        rec.set(Field::SaleAmount, FieldValue::Decimal(Some(10.0)));
        rec.set(Field::SaleCost, FieldValue::Decimal(Some(30.0)));
        write_all(&conn, SheetKind::Margin, MarginPolicy::Plain, &[rec.clone()]);
        let rate: f64 = conn.query_row("SELECT profit_rate FROM margins", [], |r| r.get(0)).unwrap();
        assert_eq!(rate, -1.0);

        rec.set(Field::SaleAmount, FieldValue::Decimal(Some(90.0)));
        rec.set(Field::SaleCost, FieldValue::Decimal(Some(20.0)));
        write_all(&conn, SheetKind::Margin, MarginPolicy::Plain, &[rec]);
        let (gross, rate): (f64, f64) = conn
            .query_row("SELECT gross_profit, profit_rate FROM margins", [], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap();
        assert_eq!(gross, 50.0);
        assert!((rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_category_upsert_keeps_known_names() {
        let (_dir, conn) = test_db();
        let node = CategoryNode {
            large_code: "01".into(),
            large: "食品".into(),
            mid_code: "0101".into(),
            mid: "饮料".into(),
            small_code: "010101".into(),
            small: "碳酸".into(),
        };
        upsert_category(&conn, &node).unwrap();
        upsert_category(&conn, &CategoryNode { small: String::new(), ..node.clone() }).unwrap();
        let small: String = conn.query_row("SELECT category_small FROM categories", [], |r| r.get(0)).unwrap();
        assert_eq!(small, "碳酸");
    }

    #[test]
    fn test_upsert_sql_shape() {
        let Destination::Keyed(target) = Destination::for_kind(SheetKind::SaleDaily) else {
            panic!("sales are keyed");
        };
        let fields = [Field::SaleQty, Field::BrandName];
        let sql = upsert_sql(&target, &fields, Derived::Gross, MarginPolicy::Plain, WriteStrategy::Full);
        assert!(sql.starts_with("INSERT INTO sales (data_date, sku_code, store_id, sale_qty, brand_name, gross_profit)"));
        assert!(sql.contains("sale_qty = (COALESCE(sale_qty, 0) + COALESCE(excluded.sale_qty, 0))"));
        assert!(sql.contains("brand_name = COALESCE(excluded.brand_name, brand_name)"));
        assert!(sql.contains("VALUES (?1, ?2, ?3, ?4, ?5, ?6)"));
        assert!(sql.contains("updated_at"));

        let minimal = upsert_sql(&target, &fields[..1], Derived::Gross, MarginPolicy::Plain, WriteStrategy::Minimal);
        assert!(!minimal.contains("updated_at"));
    }

    #[test]
    fn test_rate_is_zero_without_positive_sales() {
        assert_eq!(profit_rate(0.0, 5.0), 0.0);
        assert_eq!(profit_rate(-10.0, -4.0), 0.0);
        assert_eq!(profit_rate(10.0, 40.0), -1.0);

        let (_dir, conn) = test_db();
        let mut rec = ImportRecord::new(AccumulationKey {
            date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
            item: "饮料".to_string(),
            location: "S1".to_string(),
        });
        rec.set(Field::SaleAmount, FieldValue::Decimal(Some(-10.0)));
        rec.set(Field::SaleCost, FieldValue::Decimal(Some(-4.0)));
        write_all(&conn, SheetKind::Margin, MarginPolicy::Plain, &[rec.clone()]);
        write_all(&conn, SheetKind::Margin, MarginPolicy::Plain, &[rec]);
        let (gross, rate): (f64, f64) = conn
            .query_row("SELECT gross_profit, profit_rate FROM margins", [], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap();
        assert_eq!((gross, rate), (-12.0, 0.0));
    }

    #[test]
    fn test_clear_snapshot_only_touches_one_date() {
        let (_dir, conn) = test_db();
        for day in [4, 5] {
            conn.execute(
                "INSERT INTO stock (data_date, sku_code, store_id, stock_qty) VALUES (?1, '1001', 'S1', 3)",
                [format!("2024-03-0{day}")],
            )
            .unwrap();
        }
        let writer = SheetWriter::new(&conn, SheetKind::Stock, MarginPolicy::Plain).unwrap();
        let removed = writer
            .clear_snapshot(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(), "S1")
            .unwrap();
        writer.commit().unwrap();
        assert_eq!(removed, 1);
        let left: String = conn.query_row("SELECT data_date FROM stock", [], |r| r.get(0)).unwrap();
        assert_eq!(left, "2024-03-04");
        assert!(Destination::for_kind(SheetKind::Stock).tables().is_empty());
    }
}
