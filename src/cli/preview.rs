use std::path::Path;

use colored::Colorize;
use comfy_table::{Cell, Table};

use super::ToggleArgs;
use crate::error::{IngestError, Result};
use crate::header::Source;
use crate::importer::{preview_sheet, ImportOptions};
use crate::models::get_by_key;
use crate::settings::load_settings;

pub fn run(file: &str, kind: &str, toggles: &ToggleArgs, json: bool) -> Result<()> {
    let kind = get_by_key(kind).ok_or_else(|| IngestError::UnknownKind(kind.to_string()))?;
    let settings = load_settings();
    let opts = ImportOptions {
        store_id: settings.store_id.clone(),
        decode: toggles.apply(settings.import),
        report_date: None,
        replace: false,
    };
    let preview = preview_sheet(Path::new(file), kind, &opts)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&preview)?);
        return Ok(());
    }

    println!("{} ({})", file.bold(), kind.name());
    println!("Size:       {} rows x {} columns", preview.rows, preview.columns);
    match preview.header_row {
        Some(r) => println!("Header row: {}", r + 1),
        None => println!("Header row: (none)"),
    }
    println!("Data from:  row {}", preview.data_start + 1);
    println!("Dialect:    {:?}", preview.dialect);

    let mut table = Table::new();
    table.set_header(vec!["Field", "Column", "Source"]);
    for (field, resolved) in &preview.mapping {
        let source = match resolved.source {
            Source::Keyword => "header".green(),
            Source::Default => "default".dimmed(),
        };
        table.add_row(vec![
            Cell::new(field.column()),
            Cell::new(resolved.index + 1),
            Cell::new(source),
        ]);
    }
    println!("Columns\n{table}");

    for (i, sample) in preview.samples.iter().enumerate() {
        let text: Vec<String> = sample.iter().map(|(k, v)| format!("{k}={v}")).collect();
        println!("Row {}: {}", i + 1, text.join(", "));
    }
    for issue in &preview.issues {
        println!("{} {issue}", "!".yellow().bold());
    }
    Ok(())
}
