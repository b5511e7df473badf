use comfy_table::{Cell, Table};

use crate::db::{get_connection, table_count, DATA_TABLES};
use crate::error::Result;
use crate::fmt::{money, quantity};
use crate::settings::{db_path, load_settings};

pub fn run(db_override: Option<&str>) -> Result<()> {
    let settings = load_settings();
    let path = db_path(&settings, db_override);

    println!("Store:      {}", settings.store_id);
    println!("Database:   {}", path.display());

    if !path.exists() {
        println!();
        println!("Database not found. Run `sheetledger init` to set up.");
        return Ok(());
    }
    let conn = get_connection(&path)?;

    let mut table = Table::new();
    table.set_header(vec!["Table", "Rows"]);
    for name in DATA_TABLES {
        table.add_row(vec![Cell::new(name), Cell::new(table_count(&conn, name)?)]);
    }
    println!("\n{table}");

    let (qty, amount, cost, gross, first, last): (f64, f64, f64, f64, Option<String>, Option<String>) =
        conn.query_row(
            "SELECT COALESCE(SUM(sale_qty), 0), COALESCE(SUM(sale_amount), 0), COALESCE(SUM(sale_cost), 0),
                    COALESCE(SUM(gross_profit), 0), MIN(data_date), MAX(data_date)
             FROM sales",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?)),
        )?;
    if let (Some(first), Some(last)) = (first, last) {
        println!();
        println!("Sales:      {first} to {last}");
        println!("Quantity:   {}", quantity(qty));
        println!("Amount:     {}", money(amount));
        println!("Cost:       {}", money(cost));
        println!("Gross:      {}", money(gross));
    }

    let mut stmt = conn.prepare(
        "SELECT filename, kind, record_count, import_date FROM imports ORDER BY id DESC LIMIT 5",
    )?;
    let recent: Vec<(String, String, i64, String)> = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if !recent.is_empty() {
        let mut table = Table::new();
        table.set_header(vec!["File", "Kind", "Rows", "Imported"]);
        for (file, kind, count, date) in recent {
            table.add_row(vec![Cell::new(file), Cell::new(kind), Cell::new(count), Cell::new(date)]);
        }
        println!("\nRecent imports\n{table}");
    }
    Ok(())
}
