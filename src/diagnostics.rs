use serde::Serialize;

use crate::decode::SkipReason;

/// Longest write error kept for the summary.
const ERROR_SAMPLE_LEN: usize = 100;

/// Per-sheet counters, observed by every stage of an import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub rows_seen: usize,
    pub no_key: usize,
    pub no_date: usize,
    pub filtered: usize,
    pub failures: usize,
    pub first_error: Option<String>,
    pub written: usize,
    /// Rows written through the minimal column set after schema drift.
    pub degraded: usize,
}

impl Diagnostics {
    pub fn record_seen(&mut self) {
        self.rows_seen += 1;
    }

    pub fn record_skip(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::NoKey => self.no_key += 1,
            SkipReason::NoDate => self.no_date += 1,
            SkipReason::Filtered => self.filtered += 1,
        }
    }

    pub fn record_written(&mut self, degraded: bool) {
        self.written += 1;
        if degraded {
            self.degraded += 1;
        }
    }

    /// Counts a failed write. Only the first message is kept.
    pub fn record_error(&mut self, message: &str) {
        self.failures += 1;
        if self.first_error.is_none() {
            self.first_error = Some(message.chars().take(ERROR_SAMPLE_LEN).collect());
        }
    }

    fn likely_cause(&self) -> &'static str {
        if self.rows_seen == 0 {
            return "no data rows below the header";
        }
        let ranked = [
            (self.no_key, "item code column empty or not detected"),
            (self.no_date, "date column empty or in an unsupported format"),
            (self.failures, "rows were rejected by the database"),
            (self.filtered, "only total or empty rows were found"),
        ];
        ranked
            .iter()
            .fold((0, "unknown"), |best, (n, cause)| if *n > best.0 { (*n, *cause) } else { best })
            .1
    }

    /// Human-readable explanation, only when nothing was written.
    pub fn summary(&self, label: &str) -> Option<String> {
        if self.written > 0 {
            return None;
        }
        let mut text = format!(
            "{label}: 0 rows imported ({} rows read, {} without item code, {} without date, {} filtered, {} write failures)",
            self.rows_seen, self.no_key, self.no_date, self.filtered, self.failures
        );
        if let Some(err) = &self.first_error {
            text.push_str(&format!("; first error: {err}"));
        }
        text.push_str(&format!("; likely cause: {}", self.likely_cause()));
        Some(text)
    }
}
