//! Extraction service client.
//!
//! [`ExtractionService`] is the seam between the download pipeline and the
//! vendor REST API: submit a job for a date range, poll it until ready,
//! stream the result to disk. [`DataScopeClient`] is the production
//! implementation; tests drive the pipeline through scripted fakes instead.

use crate::config::{Config, Credentials, PollConfig};
use crate::error::{Error, Result};
use crate::types::{JobId, PollStatus, Subject};
use async_trait::async_trait;
use chrono::NaiveDate;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use url::Url;

const ODATA_REQUEST_PREFIX: &str = "#DataScope.Select.Api.Extractions.ExtractionRequests.";

/// Remote collaborator the download state machine talks to.
///
/// Failure modes are part of the contract:
/// - `submit` fails with [`Error::RequestRejected`] when the remote refuses
///   the payload (transient; the caller re-requests with backoff);
/// - `poll_status` returns [`PollStatus::Rejected`] for a rejecting status
///   code and [`Error::PollExhausted`] when the pending-check budget runs
///   out;
/// - `download` fails with [`Error::StorageExhausted`] when the output
///   device is full and transient errors otherwise.
#[async_trait]
pub trait ExtractionService: Send + Sync {
    /// Submit an extraction job covering `[start, end]`; returns its job id
    async fn submit(&self, subject: &Subject, start: NaiveDate, end: NaiveDate) -> Result<JobId>;

    /// Poll a submitted job until it is ready, rejected, or the check
    /// budget is exhausted
    async fn poll_status(&self, job: &JobId) -> Result<PollStatus>;

    /// Stream the completed job's result into `dest`; returns bytes written
    async fn download(&self, job: &JobId, dest: &Path) -> Result<u64>;
}

/// REST client for the DataScope Select extraction API
#[derive(Debug)]
pub struct DataScopeClient {
    http: reqwest::Client,
    base_url: Url,
    token: String,
    poll: PollConfig,
}

impl DataScopeClient {
    /// Authenticate and build a ready-to-use client.
    ///
    /// Authentication failures are fatal: they propagate without retry.
    pub async fn connect(config: &Config) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| Error::Config {
            message: format!("invalid base URL: {e}"),
            key: Some("base_url".to_string()),
        })?;
        let http = reqwest::Client::new();
        let token = authenticate(&http, &base_url, &config.credentials).await?;
        tracing::info!(user = %config.credentials.username, "authenticated with extraction service");
        Ok(Self {
            http,
            base_url,
            token,
            poll: config.poll.clone(),
        })
    }

    fn auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&format!("Token {}", self.token)) {
            headers.insert("Authorization", value);
        }
        headers.insert("Prefer", HeaderValue::from_static("respond-async, wait=1"));
        headers
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::MalformedResponse(format!("bad endpoint {path}: {e}")))
    }
}

async fn authenticate(http: &reqwest::Client, base_url: &Url, creds: &Credentials) -> Result<String> {
    let endpoint = base_url
        .join("Authentication/RequestToken")
        .map_err(|e| Error::MalformedResponse(format!("bad auth endpoint: {e}")))?;

    let body = serde_json::json!({
        "Credentials": {
            "Username": creds.username,
            "Password": creds.password,
        }
    });

    let response = http
        .post(endpoint)
        .header("Prefer", "respond-async")
        .json(&body)
        .send()
        .await?;

    let payload: serde_json::Value = response.json().await?;
    match payload.get("value").and_then(|v| v.as_str()) {
        Some(token) => Ok(token.to_string()),
        None => Err(Error::Auth(payload.to_string())),
    }
}

#[async_trait]
impl ExtractionService for DataScopeClient {
    async fn submit(&self, subject: &Subject, start: NaiveDate, end: NaiveDate) -> Result<JobId> {
        let payload = request_payload(subject, start, end);
        let response = self
            .http
            .post(self.endpoint("Extractions/ExtractRaw")?)
            .headers(self.auth_headers())
            .header("Accept-Charset", "UTF-8")
            .json(&payload)
            .send()
            .await?;

        // a created job is announced through the Location header; anything
        // else carries the rejection reason in the body
        if let Some(location) = response.headers().get("Location")
            && let Ok(result_url) = location.to_str()
            && let Some(job_id) = quoted_segment(result_url)
        {
            tracing::debug!(job_id = %job_id, "extraction job created");
            return Ok(JobId(job_id.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        Err(rejection_from_body(&body))
    }

    async fn poll_status(&self, job: &JobId) -> Result<PollStatus> {
        let endpoint =
            self.endpoint(&format!("Extractions/ExtractRawResult(ExtractionId='{job}')"))?;
        let max_checks = self.poll.max_checks();

        for check in 0..max_checks {
            if check > 0 {
                tokio::time::sleep(self.poll.interval).await;
            }
            let response = self
                .http
                .get(endpoint.clone())
                .headers(self.auth_headers())
                .send()
                .await?;

            let status = response.status();
            if status == reqwest::StatusCode::ACCEPTED {
                tracing::debug!(job_id = %job, check, "job still processing");
                continue;
            }
            if status.is_success() {
                return Ok(PollStatus::Ready);
            }
            return Ok(PollStatus::Rejected(status.as_u16()));
        }

        Err(Error::PollExhausted { checks: max_checks })
    }

    async fn download(&self, job: &JobId, dest: &Path) -> Result<u64> {
        let endpoint =
            self.endpoint(&format!("Extractions/RawExtractionResults('{job}')/$value"))?;
        let response = self
            .http
            .get(endpoint)
            .headers(self.auth_headers())
            .header("Accept-Encoding", "gzip")
            .header("X-Direct-Download", "true")
            .send()
            .await?
            .error_for_status()?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::from_write_error(e, dest))?;
        }
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| Error::from_write_error(e, dest))?;

        let mut bytes_written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|e| Error::from_write_error(e, dest))?;
            bytes_written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| Error::from_write_error(e, dest))?;

        tracing::debug!(job_id = %job, bytes = bytes_written, file = %dest.display(), "extract downloaded");
        Ok(bytes_written)
    }
}

/// Build the extraction request payload for one task's range.
///
/// The report type supplies the request type suffix, the default field list
/// and its extra condition entries; the instrument supplies the identifier.
/// Query boundaries span the calendar dates from local midnight to
/// end-of-day, matching daily artifact semantics.
pub(crate) fn request_payload(
    subject: &Subject,
    start: NaiveDate,
    end: NaiveDate,
) -> serde_json::Value {
    let report = subject.report_type;

    let mut condition = serde_json::Map::new();
    condition.insert(
        "ReportDateRangeType".to_string(),
        serde_json::json!("Range"),
    );
    condition.insert(
        "QueryStartDate".to_string(),
        serde_json::json!(format!("{start}T00:00:00.000000")),
    );
    condition.insert(
        "QueryEndDate".to_string(),
        serde_json::json!(format!("{end}T23:59:59.999999")),
    );
    for (key, value) in report.extra_conditions() {
        condition.insert(key.to_string(), value);
    }

    let validation_options = if report.allow_historical_instruments() {
        serde_json::json!({ "AllowHistoricalInstruments": "true" })
    } else {
        serde_json::Value::Null
    };

    serde_json::json!({
        "ExtractionRequest": {
            "@odata.type": format!("{ODATA_REQUEST_PREFIX}{}", report.odata_suffix()),
            "ContentFieldNames": report.default_fields(),
            "IdentifierList": {
                "@odata.type": format!("{ODATA_REQUEST_PREFIX}InstrumentIdentifierList"),
                "InstrumentIdentifiers": [{
                    "Identifier": subject.instrument.chain_ric(),
                    "IdentifierType": subject.instrument.identifier_type(),
                }],
                "ValidationOptions": validation_options,
                "UseUserPreferencesForValidationOptions": "false",
            },
            "Condition": condition,
        }
    })
}

/// Extract the single-quoted segment of a job result URL,
/// e.g. `.../ExtractRawResult(ExtractionId='0x0abc')` yields `0x0abc`
fn quoted_segment(url: &str) -> Option<&str> {
    let mut parts = url.split('\'');
    parts.next()?;
    parts.next()
}

/// Turn a rejection body into a descriptive error carrying the remote's
/// own message where one exists
fn rejection_from_body(body: &str) -> Error {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(json) => match json.pointer("/error/message").and_then(|m| m.as_str()) {
            Some(message) => Error::RequestRejected(message.to_string()),
            None => Error::MalformedResponse(format!("rejection without error message: {json}")),
        },
        Err(_) => Error::MalformedResponse(format!("unparseable rejection body: {body}")),
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Instrument, InstrumentKind, ReportType};
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn subject(report_type: ReportType) -> Subject {
        Subject::new(Instrument::new("ES", InstrumentKind::Futures), report_type)
    }

    fn test_config(server: &MockServer) -> Config {
        Config {
            credentials: Credentials {
                username: "user".to_string(),
                password: "pass".to_string(),
            },
            base_url: format!("{}/", server.uri()),
            poll: PollConfig {
                timeout: Duration::from_secs(3),
                interval: Duration::from_millis(1),
                ready_pause: Duration::ZERO,
            },
            ..Default::default()
        }
    }

    async fn connected_client(server: &MockServer) -> DataScopeClient {
        Mock::given(method("POST"))
            .and(path("/Authentication/RequestToken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": "tok-123"
            })))
            .mount(server)
            .await;
        DataScopeClient::connect(&test_config(server)).await.unwrap()
    }

    #[test]
    fn payload_uses_report_specific_request_type() {
        let payload = request_payload(&subject(ReportType::Depths), date("2023-01-01"), date("2023-01-02"));
        let odata = payload
            .pointer("/ExtractionRequest/@odata.type")
            .and_then(|v| v.as_str())
            .unwrap();
        assert!(odata.ends_with("TickHistoryMarketDepthExtractionRequest"));
        assert_eq!(
            payload.pointer("/ExtractionRequest/Condition/NumberOfLevels"),
            Some(&serde_json::json!(10))
        );
    }

    #[test]
    fn payload_query_boundaries_span_full_calendar_days() {
        let payload = request_payload(&subject(ReportType::Trades), date("2023-01-01"), date("2023-01-03"));
        assert_eq!(
            payload.pointer("/ExtractionRequest/Condition/QueryStartDate"),
            Some(&serde_json::json!("2023-01-01T00:00:00.000000"))
        );
        assert_eq!(
            payload.pointer("/ExtractionRequest/Condition/QueryEndDate"),
            Some(&serde_json::json!("2023-01-03T23:59:59.999999"))
        );
    }

    #[test]
    fn end_of_day_payload_allows_historical_instruments() {
        let payload = request_payload(&subject(ReportType::EndOfDay), date("2023-01-01"), date("2023-01-01"));
        assert_eq!(
            payload.pointer("/ExtractionRequest/IdentifierList/ValidationOptions/AllowHistoricalInstruments"),
            Some(&serde_json::json!("true"))
        );
        // tick-level requests keep validation options null
        let tick = request_payload(&subject(ReportType::Quotes), date("2023-01-01"), date("2023-01-01"));
        assert_eq!(
            tick.pointer("/ExtractionRequest/IdentifierList/ValidationOptions"),
            Some(&serde_json::Value::Null)
        );
    }

    #[test]
    fn quoted_segment_extracts_job_id() {
        let url = "https://x/RestApi/v1/Extractions/ExtractRawResult(ExtractionId='0x07a')";
        assert_eq!(quoted_segment(url), Some("0x07a"));
        assert_eq!(quoted_segment("no quotes here"), None);
    }

    #[tokio::test]
    async fn connect_fails_fatally_without_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Authentication/RequestToken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": "invalid credentials"
            })))
            .mount(&server)
            .await;

        let err = DataScopeClient::connect(&test_config(&server)).await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        assert!(err.to_string().contains("invalid credentials"));
    }

    #[tokio::test]
    async fn submit_reads_job_id_from_location_header() {
        let server = MockServer::start().await;
        let client = connected_client(&server).await;

        Mock::given(method("POST"))
            .and(path("/Extractions/ExtractRaw"))
            .and(header("Authorization", "Token tok-123"))
            .and(body_partial_json(serde_json::json!({
                "ExtractionRequest": {
                    "IdentifierList": {
                        "InstrumentIdentifiers": [{
                            "Identifier": "0#ES:",
                            "IdentifierType": "ChainRIC"
                        }]
                    }
                }
            })))
            .respond_with(ResponseTemplate::new(202).insert_header(
                "Location",
                "https://x/Extractions/ExtractRawResult(ExtractionId='0x0abc')",
            ))
            .mount(&server)
            .await;

        let job = client
            .submit(&subject(ReportType::EndOfDay), date("2023-01-01"), date("2023-01-02"))
            .await
            .unwrap();
        assert_eq!(job, JobId("0x0abc".to_string()));
    }

    #[tokio::test]
    async fn submit_rejection_carries_remote_message() {
        let server = MockServer::start().await;
        let client = connected_client(&server).await;

        Mock::given(method("POST"))
            .and(path("/Extractions/ExtractRaw"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": { "message": "Too many extraction requests" }
            })))
            .mount(&server)
            .await;

        let err = client
            .submit(&subject(ReportType::EndOfDay), date("2023-01-01"), date("2023-01-02"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RequestRejected(ref m) if m.contains("Too many")));
    }

    #[tokio::test]
    async fn poll_waits_through_pending_then_reports_ready() {
        let server = MockServer::start().await;
        let client = connected_client(&server).await;

        Mock::given(method("GET"))
            .and(path("/Extractions/ExtractRawResult(ExtractionId='j1')"))
            .respond_with(ResponseTemplate::new(202))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/Extractions/ExtractRawResult(ExtractionId='j1')"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let status = client.poll_status(&JobId("j1".to_string())).await.unwrap();
        assert_eq!(status, PollStatus::Ready);
    }

    #[tokio::test]
    async fn poll_reports_rejecting_status_codes() {
        let server = MockServer::start().await;
        let client = connected_client(&server).await;

        Mock::given(method("GET"))
            .and(path("/Extractions/ExtractRawResult(ExtractionId='j2')"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let status = client.poll_status(&JobId("j2".to_string())).await.unwrap();
        assert_eq!(status, PollStatus::Rejected(403));
    }

    #[tokio::test]
    async fn poll_budget_exhaustion_is_an_explicit_error() {
        let server = MockServer::start().await;
        let client = connected_client(&server).await;

        Mock::given(method("GET"))
            .and(path("/Extractions/ExtractRawResult(ExtractionId='j3')"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let err = client.poll_status(&JobId("j3".to_string())).await.unwrap_err();
        assert!(matches!(err, Error::PollExhausted { .. }));
    }

    #[tokio::test]
    async fn download_streams_body_to_destination() {
        let server = MockServer::start().await;
        let client = connected_client(&server).await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("ES/EndOfDay/2023-01-01-2023-01-02.csv.gz");

        let body = b"Trade Date,Close\n2023-01-01,4100.25\n".to_vec();
        Mock::given(method("GET"))
            .and(path("/Extractions/RawExtractionResults('j4')/$value"))
            .and(header("X-Direct-Download", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let bytes = client.download(&JobId("j4".to_string()), &dest).await.unwrap();
        assert_eq!(bytes, body.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), body);
    }

    #[tokio::test]
    async fn download_http_error_is_transient() {
        let server = MockServer::start().await;
        let client = connected_client(&server).await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("x.csv.gz");

        Mock::given(method("GET"))
            .and(path("/Extractions/RawExtractionResults('j5')/$value"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client.download(&JobId("j5".to_string()), &dest).await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
        assert!(!dest.exists(), "no partial file on HTTP failure");
    }
}
