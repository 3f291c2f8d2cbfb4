//! Core types: report catalogue, instruments, tasks and outcomes.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Identifier of a submitted extraction job on the remote service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobId(pub String);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of one status check on a submitted job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// The job finished and its result can be downloaded
    Ready,
    /// The status endpoint returned a rejecting status code; the task
    /// should go back to the Requesting state
    Rejected(u16),
}

/// Terminal outcome of one task's pass through the download state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Daily files written, bulk file removed
    Success,
    /// Job submission kept failing after all retry attempts
    RequestFailed,
    /// Download or split kept failing after all retry attempts
    DownloadFailed,
    /// The output device is full; never retried
    StorageExhausted,
}

impl DownloadOutcome {
    /// True for outcomes that end the task without retry
    pub fn is_terminal_failure(&self) -> bool {
        !matches!(self, DownloadOutcome::Success)
    }
}

/// Report flavor of an extraction request.
///
/// Each report type carries its own request shape: the OData request type
/// suffix, the default content field list, extra condition entries, and the
/// name of the date column used when splitting a bulk file into daily files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    /// Daily summary rows (settlement, open interest, close prices)
    EndOfDay,
    /// Tick-by-tick trades
    Trades,
    /// Tick-by-tick quotes
    Quotes,
    /// Market depth snapshots (10 levels)
    Depths,
    /// Hourly intraday summaries
    IntraDay,
}

impl ReportType {
    /// Directory / label name for this report type
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::EndOfDay => "EndOfDay",
            ReportType::Trades => "Trades",
            ReportType::Quotes => "Quotes",
            ReportType::Depths => "Depths",
            ReportType::IntraDay => "IntraDay",
        }
    }

    /// OData extraction request type appended to the request type prefix
    pub fn odata_suffix(&self) -> &'static str {
        match self {
            ReportType::EndOfDay => "ElektronTimeseriesExtractionRequest",
            ReportType::Trades | ReportType::Quotes => {
                "TickHistoryTimeAndSalesExtractionRequest"
            }
            ReportType::Depths => "TickHistoryMarketDepthExtractionRequest",
            ReportType::IntraDay => "TickHistoryIntradaySummariesExtractionRequest",
        }
    }

    /// Default content field names requested when the caller supplies none
    pub fn default_fields(&self) -> &'static [&'static str] {
        match self {
            ReportType::EndOfDay => &[
                "Trade Date",
                "RIC",
                "Expiration Date",
                "Last Trading Day",
                "Open",
                "Settlement Price",
                "Universal Close Price",
                "Universal Ask Price",
                "Universal Bid Price",
                "Bid",
                "Ask",
                "Volume",
                "Floor Volume",
                "Open Interest",
            ],
            ReportType::Trades => &[
                "Trade - Price",
                "Trade - Volume",
                "Trade - Accumulated Volume",
                "Trade - Sequence Number",
                "Trade - Exchange Time",
            ],
            ReportType::Quotes => &[
                "Quote - Bid Price",
                "Quote - Bid Size",
                "Quote - Ask Price",
                "Quote - Ask Size",
                "Quote - Sequence Number",
                "Quote - Exchange Time",
            ],
            ReportType::Depths => &[
                "Ask Price",
                "Ask Size",
                "Bid Price",
                "Bid Size",
                "Number of Buyers",
                "Number of Sellers",
            ],
            ReportType::IntraDay => &[
                "High Ask",
                "High Ask Size",
                "High Bid",
                "High Bid Size",
                "Low Ask",
                "Low Ask Size",
                "Low Bid",
                "Low Bid Size",
                "Volume",
            ],
        }
    }

    /// Extra condition entries this report type adds to the request payload
    pub fn extra_conditions(&self) -> Vec<(&'static str, serde_json::Value)> {
        match self {
            ReportType::EndOfDay => Vec::new(),
            ReportType::Trades | ReportType::Quotes => vec![
                ("DisplaySourceRIC", serde_json::json!("true")),
                ("ApplyCorrectionsAndCancellations", serde_json::json!("true")),
            ],
            ReportType::Depths => vec![
                ("DisplaySourceRIC", serde_json::json!("true")),
                ("View", serde_json::json!("NormalizedLL2")),
                ("NumberOfLevels", serde_json::json!(10)),
            ],
            ReportType::IntraDay => vec![
                ("DisplaySourceRIC", serde_json::json!("true")),
                ("SummaryInterval", serde_json::json!("OneHour")),
            ],
        }
    }

    /// Name of the bulk-file column holding the row's date.
    ///
    /// End-of-day files carry a plain trade date; all tick-level reports use
    /// a full timestamp column whose date prefix is matched during the split.
    pub fn date_column(&self) -> &'static str {
        match self {
            ReportType::EndOfDay => "Trade Date",
            _ => "Date-Time",
        }
    }

    /// End-of-day requests relax instrument validation so expired contracts
    /// still resolve
    pub fn allow_historical_instruments(&self) -> bool {
        matches!(self, ReportType::EndOfDay)
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Asset class of an instrument; decides how the chain RIC is derived
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    /// Futures chain (e.g. ES)
    Futures,
    /// Single equity
    Equity,
    /// Options chain
    Options,
    /// Treasury chain
    Treasury,
    /// Fixed-income chain
    FixedIncome,
}

/// A concrete instrument to extract data for
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    /// Base RIC, e.g. "ES"
    pub base_ric: String,
    /// Asset class
    pub kind: InstrumentKind,
}

impl Instrument {
    /// Create an instrument from a base RIC and asset class
    pub fn new(base_ric: impl Into<String>, kind: InstrumentKind) -> Self {
        Self {
            base_ric: base_ric.into(),
            kind,
        }
    }

    /// Identifier sent to the extraction service.
    ///
    /// Chain instruments are expanded by the remote from a chain-RIC pattern;
    /// equities are requested verbatim.
    pub fn chain_ric(&self) -> String {
        match self.kind {
            // VIX futures chains omit the trailing colon
            InstrumentKind::Futures if self.base_ric == "VX:VE" => {
                format!("0#{}", self.base_ric)
            }
            InstrumentKind::Futures => format!("0#{}:", self.base_ric),
            InstrumentKind::Equity => self.base_ric.clone(),
            InstrumentKind::Options => format!("0#{}*.U", self.base_ric),
            InstrumentKind::Treasury => format!("0#{}=R", self.base_ric),
            InstrumentKind::FixedIncome => self.base_ric.clone(),
        }
    }

    /// Identifier type the extraction service expects for this instrument
    pub fn identifier_type(&self) -> &'static str {
        match self.kind {
            InstrumentKind::Futures | InstrumentKind::FixedIncome => "ChainRIC",
            _ => "Ric",
        }
    }
}

/// The subject of a run: one instrument extracted as one report type.
///
/// Shared by every task of a run behind an `Arc`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Instrument being extracted
    pub instrument: Instrument,
    /// Report flavor being extracted
    pub report_type: ReportType,
}

impl Subject {
    /// Create a subject from an instrument and report type
    pub fn new(instrument: Instrument, report_type: ReportType) -> Self {
        Self {
            instrument,
            report_type,
        }
    }

    /// Output directory for this subject under `data_dir`
    pub fn output_dir(&self, data_dir: &Path) -> PathBuf {
        data_dir
            .join(&self.instrument.base_ric)
            .join(self.report_type.as_str())
    }
}

/// One unit of work: a single sub-range of dates for a subject.
///
/// Immutable once enqueued. `start == end` is a valid single-day task.
#[derive(Clone, Debug)]
pub struct Task {
    /// Subject shared across the whole run
    pub subject: Arc<Subject>,
    /// First calendar date of the sub-range (inclusive)
    pub start: NaiveDate,
    /// Last calendar date of the sub-range (inclusive)
    pub end: NaiveDate,
}

impl Task {
    /// Create a task for a sub-range of a subject
    pub fn new(subject: Arc<Subject>, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            subject,
            start,
            end,
        }
    }

    /// Name of the bulk file this task downloads before splitting
    pub fn bulk_filename(&self) -> String {
        format!("{}-{}.csv.gz", self.start, self.end)
    }

    /// Short description shown on the task's progress row,
    /// e.g. `ES (EndOfDay) 2023-01-01-2023-01-03`
    pub fn describe(&self) -> String {
        format!(
            "{} ({}) {}-{}",
            self.subject.instrument.base_ric, self.subject.report_type, self.start, self.end
        )
    }
}

/// Canonical name of a single-date daily artifact file
pub fn daily_filename(date: NaiveDate) -> String {
    format!("{date}.csv.gz")
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn futures_chain_ric_has_prefix_and_colon() {
        let es = Instrument::new("ES", InstrumentKind::Futures);
        assert_eq!(es.chain_ric(), "0#ES:");
        assert_eq!(es.identifier_type(), "ChainRIC");
    }

    #[test]
    fn vix_futures_chain_ric_drops_trailing_colon() {
        let vx = Instrument::new("VX:VE", InstrumentKind::Futures);
        assert_eq!(vx.chain_ric(), "0#VX:VE");
    }

    #[test]
    fn equity_identifier_is_verbatim_ric() {
        let aapl = Instrument::new("AAPL.O", InstrumentKind::Equity);
        assert_eq!(aapl.chain_ric(), "AAPL.O");
        assert_eq!(aapl.identifier_type(), "Ric");
    }

    #[test]
    fn treasury_and_options_patterns() {
        assert_eq!(
            Instrument::new("US10YT", InstrumentKind::Treasury).chain_ric(),
            "0#US10YT=R"
        );
        assert_eq!(
            Instrument::new("SPX", InstrumentKind::Options).chain_ric(),
            "0#SPX*.U"
        );
    }

    #[test]
    fn date_column_depends_on_report_type() {
        assert_eq!(ReportType::EndOfDay.date_column(), "Trade Date");
        assert_eq!(ReportType::Trades.date_column(), "Date-Time");
        assert_eq!(ReportType::Depths.date_column(), "Date-Time");
    }

    #[test]
    fn depth_conditions_request_ten_levels() {
        let conds = ReportType::Depths.extra_conditions();
        assert!(conds.iter().any(|(k, v)| *k == "NumberOfLevels" && *v == serde_json::json!(10)));
    }

    #[test]
    fn subject_output_dir_is_keyed_by_ric_and_report() {
        let subject = Subject::new(
            Instrument::new("ES", InstrumentKind::Futures),
            ReportType::Trades,
        );
        let dir = subject.output_dir(Path::new("data"));
        assert_eq!(dir, PathBuf::from("data/ES/Trades"));
    }

    #[test]
    fn task_description_and_bulk_filename() {
        let subject = Arc::new(Subject::new(
            Instrument::new("ES", InstrumentKind::Futures),
            ReportType::EndOfDay,
        ));
        let task = Task::new(subject, date("2023-01-01"), date("2023-01-03"));
        assert_eq!(task.bulk_filename(), "2023-01-01-2023-01-03.csv.gz");
        assert_eq!(task.describe(), "ES (EndOfDay) 2023-01-01-2023-01-03");
    }

    #[test]
    fn single_day_task_is_valid() {
        let subject = Arc::new(Subject::new(
            Instrument::new("ES", InstrumentKind::Futures),
            ReportType::EndOfDay,
        ));
        let task = Task::new(subject, date("2023-01-05"), date("2023-01-05"));
        assert_eq!(task.bulk_filename(), "2023-01-05-2023-01-05.csv.gz");
    }

    #[test]
    fn report_type_serializes_snake_case() {
        let json = serde_json::to_string(&ReportType::EndOfDay).unwrap();
        assert_eq!(json, "\"end_of_day\"");
    }
}
