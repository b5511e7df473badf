use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

/// Upserts one margin row per (date, category, store) found in stored sales.
/// Sales without a category fall back to their large category. Margin rows
/// with no matching sales are left alone. Gross profit is the sum of the
/// stored, policy-adjusted sales gross profit.
pub fn refresh_margins(conn: &Connection) -> Result<usize> {
    let rows = conn.execute(
        "INSERT INTO margins (data_date, category, store_id, category_large, sale_qty, sale_amount, sale_cost, gross_profit, profit_rate)
         SELECT data_date,
                COALESCE(NULLIF(category, ''), NULLIF(category_large, ''), '未分类'),
                store_id,
                MAX(category_large),
                SUM(COALESCE(sale_qty, 0)),
                SUM(COALESCE(sale_amount, 0)),
                SUM(COALESCE(sale_cost, 0)),
                SUM(COALESCE(gross_profit, 0)),
                CASE WHEN SUM(COALESCE(sale_amount, 0)) > 0
                     THEN MAX(-1.0, MIN(1.0, SUM(COALESCE(gross_profit, 0)) / SUM(COALESCE(sale_amount, 0))))
                     ELSE 0
                END
         FROM sales
         WHERE true
         GROUP BY 1, 2, 3
         ON CONFLICT(data_date, category, store_id) DO UPDATE SET
            category_large = COALESCE(excluded.category_large, category_large),
            sale_qty = excluded.sale_qty,
            sale_amount = excluded.sale_amount,
            sale_cost = excluded.sale_cost,
            gross_profit = excluded.gross_profit,
            profit_rate = excluded.profit_rate,
            updated_at = datetime('now')",
        [],
    )?;
    info!(rows, "margins refreshed from sales");
    Ok(rows)
}

/// Adds the category hierarchy carried by sales rows. Names already stored
/// are only replaced by non-empty ones.
pub fn refresh_categories(conn: &Connection) -> Result<usize> {
    let rows = conn.execute(
        "INSERT INTO categories (category_large_code, category_large, category_mid_code, category_mid, category_small_code, category_small)
         SELECT COALESCE(category_large_code, ''),
                COALESCE(MAX(NULLIF(category_large, '')), '未分类'),
                COALESCE(category_mid_code, ''),
                COALESCE(MAX(category_mid), ''),
                COALESCE(category_small_code, ''),
                COALESCE(MAX(category_small), '')
         FROM sales
         WHERE COALESCE(category_large_code, category_mid_code, category_small_code) IS NOT NULL
         GROUP BY 1, 3, 5
         ON CONFLICT(category_large_code, category_mid_code, category_small_code) DO UPDATE SET
            category_large = CASE WHEN excluded.category_large = '未分类' THEN category_large ELSE excluded.category_large END,
            category_mid = COALESCE(NULLIF(excluded.category_mid, ''), category_mid),
            category_small = COALESCE(NULLIF(excluded.category_small, ''), category_small),
            updated_at = datetime('now')",
        [],
    )?;
    info!(rows, "categories refreshed from sales");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_connection, init_db};

    fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("test.db")).unwrap();
        init_db(&conn).unwrap();
        (dir, conn)
    }

    fn add_sale(conn: &Connection, sku: &str, category: Option<&str>, large: &str, amount: f64, cost: f64) {
        conn.execute(
            "INSERT INTO sales (data_date, sku_code, store_id, category, category_large, category_large_code, category_mid_code, category_small_code, sale_amount, sale_cost, gross_profit)
             VALUES ('2024-03-05', ?1, 'S1', ?2, ?3, '01', '0101', ?1, ?4, ?5, ?4 - ?5)",
            rusqlite::params![sku, category, large, amount, cost],
        )
        .unwrap();
    }

    fn margin_count(conn: &Connection) -> i64 {
        conn.query_row("SELECT count(*) FROM margins", [], |r| r.get(0)).unwrap()
    }

    #[test]
    fn test_refresh_margins_groups_by_category() {
        let (_dir, conn) = test_db();
        add_sale(&conn, "1001", Some("饮料"), "食品", 100.0, 60.0);
        add_sale(&conn, "1002", Some("饮料"), "食品", 50.0, 40.0);
        add_sale(&conn, "1003", None, "日化", 10.0, 30.0);
        assert_eq!(refresh_margins(&conn).unwrap(), 2);

        let (amount, gross, rate): (f64, f64, f64) = conn
            .query_row(
                "SELECT sale_amount, gross_profit, profit_rate FROM margins WHERE category = '饮料'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!((amount, gross), (150.0, 50.0));
        assert!((rate - 1.0 / 3.0).abs() < 1e-9);

        let rate: f64 = conn
            .query_row("SELECT profit_rate FROM margins WHERE category = '日化'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rate, -1.0);
    }

    #[test]
    fn test_refresh_margins_is_repeatable() {
        let (_dir, conn) = test_db();
        add_sale(&conn, "1001", Some("饮料"), "食品", 100.0, 60.0);
        refresh_margins(&conn).unwrap();
        refresh_margins(&conn).unwrap();
        assert_eq!(margin_count(&conn), 1);
        let amount: f64 = conn.query_row("SELECT sale_amount FROM margins", [], |r| r.get(0)).unwrap();
        assert_eq!(amount, 100.0);
    }

    #[test]
    fn test_refresh_keeps_margin_rows_without_sales() {
        let (_dir, conn) = test_db();
        conn.execute(
            "INSERT INTO margins (data_date, category, store_id, sale_amount, sale_cost, gross_profit, profit_rate)
             VALUES ('2024-03-01', '饮料', 'S1', 80, 50, 30, 0.375)",
            [],
        )
        .unwrap();
        add_sale(&conn, "1001", Some("饮料"), "食品", 100.0, 60.0);
        refresh_margins(&conn).unwrap();
        assert_eq!(margin_count(&conn), 2);
        let gross: f64 = conn
            .query_row("SELECT gross_profit FROM margins WHERE data_date = '2024-03-01'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(gross, 30.0);
    }

    #[test]
    fn test_refresh_uses_stored_gross_profit() {
        let (_dir, conn) = test_db();
        conn.execute(
            "INSERT INTO sales (data_date, sku_code, store_id, category, sale_amount, sale_cost, gross_profit)
             VALUES ('2024-03-05', '1001', 'S1', '饮料', 0, 6, 0)",
            [],
        )
        .unwrap();
        refresh_margins(&conn).unwrap();
        let (gross, rate): (f64, f64) = conn
            .query_row("SELECT gross_profit, profit_rate FROM margins", [], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap();
        assert_eq!((gross, rate), (0.0, 0.0));
    }

    #[test]
    fn test_refresh_categories_from_sales() {
        let (_dir, conn) = test_db();
        add_sale(&conn, "1001", Some("饮料"), "食品", 1.0, 1.0);
        add_sale(&conn, "1002", Some("饮料"), "食品", 1.0, 1.0);
        refresh_categories(&conn).unwrap();
        let (count, large): (i64, String) = conn
            .query_row("SELECT count(*), MAX(category_large) FROM categories", [], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(large, "食品");
    }
}
