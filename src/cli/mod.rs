pub mod import;
pub mod init;
pub mod preview;
pub mod status;

use clap::{Args, Parser, Subcommand};

use crate::models::{DecodeOptions, MarginPolicy};

#[derive(Parser)]
#[command(
    name = "sheetledger",
    about = "Load retail sales, stock, margin and category spreadsheets into SQLite."
)]
pub struct Cli {
    /// Database file (default: <data_dir>/sheetledger.db)
    #[arg(long, global = true)]
    pub db: Option<String>,
    /// Log layout and column decisions to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Choose a data directory and store, and initialize the database.
    Init {
        /// Path for data (default: ~/Documents/sheetledger)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
        /// Store identifier used as the location of every record
        #[arg(long)]
        store: Option<String>,
    },
    /// Import one or more sheets. Files load in kind order: sales, stock,
    /// categories, margins.
    Import(ImportArgs),
    /// Show how a sheet would be read without writing anything.
    Preview {
        /// Path to a CSV or workbook file
        file: String,
        /// Sheet kind: sale_daily, sale_summary, stock, category, margin
        #[arg(long)]
        kind: String,
        #[command(flatten)]
        toggles: ToggleArgs,
        /// Print the preview as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show table counts, sales totals and recent imports.
    Status,
}

#[derive(Args)]
pub struct ImportArgs {
    /// Daily sales export(s)
    #[arg(long = "sale-daily")]
    pub sale_daily: Vec<String>,
    /// Sales summary export(s)
    #[arg(long = "sale-summary")]
    pub sale_summary: Vec<String>,
    /// Stock snapshot(s)
    #[arg(long)]
    pub stock: Vec<String>,
    /// Category hierarchy sheet(s)
    #[arg(long)]
    pub category: Vec<String>,
    /// Margin summary sheet(s)
    #[arg(long, alias = "profit")]
    pub margin: Vec<String>,
    /// Store identifier (default: from settings)
    #[arg(long)]
    pub store: Option<String>,
    /// Date for stock and margin sheets, YYYY-MM-DD (default: from the file)
    #[arg(long = "report-date")]
    pub report_date: Option<String>,
    /// Empty the affected tables before loading
    #[arg(long)]
    pub replace: bool,
    /// Print the batch report as JSON
    #[arg(long)]
    pub json: bool,
    #[command(flatten)]
    pub toggles: ToggleArgs,
}

/// Per-run overrides of the configured decode options.
#[derive(Args, Default)]
pub struct ToggleArgs {
    /// The amount and cost columns are swapped in the source
    #[arg(long = "swap-amount-cost")]
    pub swap_amount_cost: bool,
    /// The amount column holds a unit price (multiplied by quantity)
    #[arg(long = "unit-amount")]
    pub unit_amount: bool,
    /// The cost column holds a unit cost (multiplied by quantity)
    #[arg(long = "unit-cost")]
    pub unit_cost: bool,
    /// Gross profit rule for rows with cost but no sales
    #[arg(long = "margin-policy", value_enum)]
    pub margin_policy: Option<MarginPolicy>,
}

impl ToggleArgs {
    /// Flags only ever switch a toggle on; settings supply the rest.
    pub fn apply(&self, base: DecodeOptions) -> DecodeOptions {
        DecodeOptions {
            swap_amount_cost: base.swap_amount_cost || self.swap_amount_cost,
            amount_as_total: base.amount_as_total && !self.unit_amount,
            cost_as_total: base.cost_as_total && !self.unit_cost,
            margin_policy: self.margin_policy.unwrap_or(base.margin_policy),
        }
    }
}
