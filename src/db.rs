use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;

pub const DB_FILE: &str = "sheetledger.db";

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sales (
    id INTEGER PRIMARY KEY,
    data_date TEXT NOT NULL,
    sku_code TEXT NOT NULL,
    store_id TEXT NOT NULL,
    warehouse_code TEXT,
    warehouse_name TEXT,
    product_name TEXT,
    barcode TEXT,
    short_name TEXT,
    unit TEXT,
    spec TEXT,
    category_code TEXT,
    category TEXT,
    category_large_code TEXT,
    category_large TEXT,
    category_mid_code TEXT,
    category_mid TEXT,
    category_small_code TEXT,
    category_small TEXT,
    biz_mode TEXT,
    supplier_code TEXT,
    supplier_name TEXT,
    supplier_main_code TEXT,
    supplier_main_name TEXT,
    brand_code TEXT,
    brand_name TEXT,
    category_group_code TEXT,
    category_group_name TEXT,
    location_code TEXT,
    location_name TEXT,
    joint_rate REAL,
    sale_price REAL,
    avg_sale_price REAL,
    return_price REAL,
    qty_ratio REAL,
    amount_ratio REAL,
    current_stock REAL,
    sale_qty REAL DEFAULT 0,
    sale_amount REAL DEFAULT 0,
    sale_cost REAL DEFAULT 0,
    gross_profit REAL DEFAULT 0,
    return_qty REAL DEFAULT 0,
    return_amount REAL DEFAULT 0,
    gift_qty REAL DEFAULT 0,
    gift_amount REAL DEFAULT 0,
    qty_total REAL DEFAULT 0,
    amount_total REAL DEFAULT 0,
    updated_at TEXT DEFAULT (datetime('now')),
    UNIQUE (data_date, sku_code, store_id)
);

CREATE TABLE IF NOT EXISTS stock (
    id INTEGER PRIMARY KEY,
    data_date TEXT NOT NULL,
    sku_code TEXT NOT NULL,
    store_id TEXT NOT NULL,
    warehouse_code TEXT,
    warehouse_name TEXT,
    category TEXT,
    category_name TEXT,
    category_large_code TEXT,
    category_large TEXT,
    category_mid_code TEXT,
    category_mid TEXT,
    category_small_code TEXT,
    category_small TEXT,
    barcode TEXT,
    product_name TEXT,
    product_code TEXT,
    spec TEXT,
    unit TEXT,
    product_status TEXT,
    branch_manage TEXT,
    short_name TEXT,
    brand_code TEXT,
    brand_name TEXT,
    supplier_code TEXT,
    supplier_name TEXT,
    location_code TEXT,
    location_name TEXT,
    contact TEXT,
    biz_mode TEXT,
    sale_price REAL,
    avg_price REAL,
    avg_inbound_price REAL,
    aging REAL,
    last_change_date TEXT,
    stock_qty REAL DEFAULT 0,
    stock_boxes REAL DEFAULT 0,
    stock_amount REAL DEFAULT 0,
    updated_at TEXT DEFAULT (datetime('now')),
    UNIQUE (data_date, sku_code, store_id)
);

CREATE TABLE IF NOT EXISTS margins (
    id INTEGER PRIMARY KEY,
    data_date TEXT NOT NULL,
    category TEXT NOT NULL,
    store_id TEXT NOT NULL,
    category_large TEXT,
    sale_qty REAL DEFAULT 0,
    sale_amount REAL DEFAULT 0,
    sale_cost REAL DEFAULT 0,
    gross_profit REAL DEFAULT 0,
    profit_rate REAL DEFAULT 0,
    updated_at TEXT DEFAULT (datetime('now')),
    UNIQUE (data_date, category, store_id)
);

CREATE TABLE IF NOT EXISTS categories (
    id INTEGER PRIMARY KEY,
    category_large_code TEXT NOT NULL DEFAULT '',
    category_large TEXT NOT NULL,
    category_mid_code TEXT NOT NULL DEFAULT '',
    category_mid TEXT NOT NULL DEFAULT '',
    category_small_code TEXT NOT NULL DEFAULT '',
    category_small TEXT NOT NULL DEFAULT '',
    updated_at TEXT DEFAULT (datetime('now')),
    UNIQUE (category_large_code, category_mid_code, category_small_code)
);

CREATE TABLE IF NOT EXISTS imports (
    id INTEGER PRIMARY KEY,
    filename TEXT NOT NULL,
    kind TEXT NOT NULL,
    import_date TEXT DEFAULT (datetime('now')),
    record_count INTEGER,
    date_range_start TEXT,
    date_range_end TEXT,
    checksum TEXT
);
";

/// Tables shown by `status`, in display order.
pub const DATA_TABLES: &[&str] = &["sales", "stock", "margins", "categories", "imports"];

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

pub fn table_count(conn: &Connection, table: &str) -> Result<i64> {
    let count = conn.query_row(&format!("SELECT count(*) FROM {table}"), [], |r| r.get(0))?;
    Ok(count)
}
