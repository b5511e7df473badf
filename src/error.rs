use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Workbook error: {0}")]
    Workbook(String),

    /// Whole-sheet failure: the grid cannot follow any known layout.
    #[error("{0}")]
    Structural(String),

    #[error("Unknown sheet kind: {0}")]
    UnknownKind(String),

    #[error("Unsupported file type: {0} (expected .xlsx, .xls, .xlsm, .ods or .csv)")]
    UnsupportedFile(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, IngestError>;
