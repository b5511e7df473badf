use std::path::PathBuf;

use chrono::NaiveDate;
use colored::Colorize;

use super::ImportArgs;
use crate::db::{get_connection, init_db};
use crate::error::{IngestError, Result};
use crate::importer::{import_batch, BatchReport, ImportOptions};
use crate::models::SheetKind;
use crate::settings::{db_path, load_settings};

fn collect_files(args: &ImportArgs) -> Vec<(SheetKind, PathBuf)> {
    let groups = [
        (SheetKind::SaleDaily, &args.sale_daily),
        (SheetKind::SaleSummary, &args.sale_summary),
        (SheetKind::Stock, &args.stock),
        (SheetKind::Category, &args.category),
        (SheetKind::Margin, &args.margin),
    ];
    groups
        .iter()
        .flat_map(|(kind, paths)| paths.iter().map(move |p| (*kind, PathBuf::from(p))))
        .collect()
}

pub fn parse_report_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| IngestError::Other(format!("Invalid report date '{raw}' (expected YYYY-MM-DD)")))
}

pub fn run(args: &ImportArgs, db_override: Option<&str>) -> Result<()> {
    let files = collect_files(args);
    if files.is_empty() {
        return Err(IngestError::Other(
            "No files given. Use --sale-daily, --sale-summary, --stock, --category or --margin.".to_string(),
        ));
    }

    let settings = load_settings();
    let opts = ImportOptions {
        store_id: args.store.clone().unwrap_or_else(|| settings.store_id.clone()),
        decode: args.toggles.apply(settings.import),
        report_date: args.report_date.as_deref().map(parse_report_date).transpose()?,
        replace: args.replace,
    };

    let conn = get_connection(&db_path(&settings, db_override))?;
    init_db(&conn)?;
    let report = import_batch(&conn, &files, &opts)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &BatchReport) {
    for sheet in &report.sheets {
        let mark = if sheet.committed > 0 { "✓".green() } else { "✗".yellow() };
        let mut line = format!("{mark} {:<13} {}: {} rows", sheet.kind.key(), sheet.label, sheet.committed);
        if sheet.diagnostics.degraded > 0 {
            line.push_str(&format!(" ({} with minimal columns)", sheet.diagnostics.degraded));
        }
        if let Some((start, end)) = &sheet.date_range {
            line.push_str(&format!(", {start} to {end}"));
        }
        println!("{line}");
    }
    for text in &report.diagnostics {
        println!("{} {text}", "!".yellow().bold());
    }
    for text in &report.errors {
        println!("{} {text}", "error:".red().bold());
    }
    if let Some(n) = report.refreshed_margins {
        println!("Margins refreshed from sales: {n} rows");
    }
    if let Some(n) = report.refreshed_categories {
        println!("Categories refreshed from sales: {n} rows");
    }
    println!("{} rows imported", report.committed().to_string().bold());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_report_date() {
        assert_eq!(parse_report_date("2024-03-05").unwrap(), NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        assert!(parse_report_date("03/05/2024").is_err());
    }
}
