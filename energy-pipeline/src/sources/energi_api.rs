use std::sync::Arc;

use arrow::datatypes::Schema;
use arrow::error::ArrowError;
use arrow::json::{reader::infer_json_schema_from_iterator, ReaderBuilder};
use arrow::record_batch::RecordBatch;
use energy_client::ExtractionMetadata;
use reqwest::Url;
use serde_json::Value;
use time::{macros::format_description, Duration, OffsetDateTime, UtcOffset};

#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("invalid API url '{url}': {detail}")]
    Url { url: String, detail: String },
    #[error("API request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected API response: {0}")]
    Parse(String),
    #[error("cannot build table from API records: {0}")]
    Decode(#[from] ArrowError),
    #[error("cannot format export window: {0}")]
    Format(#[from] time::error::Format),
}

/// Time range requested from the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportWindow {
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

/// Records returned by one successful extraction, with their provenance.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub data: RecordBatch,
    pub metadata: ExtractionMetadata,
}

/// Window ending `days_delay` days before `reference_end` (truncated to the
/// whole hour, in UTC) and spanning `days_export` days back from there.
pub fn export_window(reference_end: OffsetDateTime, days_delay: i64, days_export: i64) -> ExportWindow {
    let reference = truncate_to_hour(reference_end);
    let end = reference - Duration::days(days_delay);
    let start = end - Duration::days(days_export);
    ExportWindow { start, end }
}

fn truncate_to_hour(ts: OffsetDateTime) -> OffsetDateTime {
    let ts = ts.to_offset(UtcOffset::UTC);
    ts - Duration::new(
        i64::from(ts.minute()) * 60 + i64::from(ts.second()),
        ts.nanosecond() as i32,
    )
}

fn format_query_bound(ts: OffsetDateTime) -> Result<String, time::error::Format> {
    ts.format(format_description!("[year]-[month]-[day]T[hour]:[minute]"))
}

/// Client for the Energi Data Service hourly consumption dataset.
#[derive(Debug, Clone)]
pub struct EnergiDataSource {
    client: reqwest::Client,
    url: String,
}

impl EnergiDataSource {
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
        }
    }

    pub fn request_url(&self, window: &ExportWindow) -> Result<Url, SourceError> {
        let mut url = Url::parse(&self.url).map_err(|e| SourceError::Url {
            url: self.url.clone(),
            detail: e.to_string(),
        })?;
        // Bounds hold only query-safe characters and are written unencoded.
        let params = format!(
            "offset=0&sort=HourUTC&timezone=utc&start={}&end={}",
            format_query_bound(window.start)?,
            format_query_bound(window.end)?
        );
        let query = match url.query() {
            Some(existing) if !existing.is_empty() => format!("{existing}&{params}"),
            _ => params,
        };
        url.set_query(Some(&query));
        Ok(url)
    }

    /// Fetch the export window ending `days_delay` days before
    /// `reference_end` (now when `None`).
    ///
    /// A body that is not JSON yields `Ok(None)`: the API is known to be
    /// flaky and callers skip the cycle. Transport failures and JSON without
    /// a `records` array are errors.
    pub async fn extract(
        &self,
        reference_end: Option<OffsetDateTime>,
        days_delay: i64,
        days_export: i64,
    ) -> Result<Option<Extraction>, SourceError> {
        let reference_end = reference_end.unwrap_or_else(OffsetDateTime::now_utc);
        let window = export_window(reference_end, days_delay, days_export);
        let url = self.request_url(&window)?;

        tracing::info!(url = %url, "requesting data from API");
        metrics::counter!("energi_api_requests_total").increment(1);

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        tracing::info!(status = status.as_u16(), "response received from API");
        let body = response.bytes().await?;

        let payload: Value = match serde_json::from_slice(&body) {
            Ok(payload) => payload,
            Err(e) => {
                metrics::counter!("energi_api_invalid_responses_total").increment(1);
                tracing::error!(status = status.as_u16(), error = %e, "API response is not JSON");
                return Ok(None);
            }
        };

        let records = payload
            .get("records")
            .and_then(Value::as_array)
            .ok_or_else(|| SourceError::Parse(format!("no 'records' array in response ({status})")))?;
        let data = records_to_table(records)?;
        metrics::histogram!("energi_api_records").record(data.num_rows() as f64);

        let metadata = ExtractionMetadata::new(days_delay, days_export, url.as_str(), window.start, window.end)?;
        Ok(Some(Extraction { data, metadata }))
    }
}

/// Build a table from row objects; columns and types are inferred from the
/// records themselves.
fn records_to_table(records: &[Value]) -> Result<RecordBatch, ArrowError> {
    if records.is_empty() {
        return Ok(RecordBatch::new_empty(Arc::new(Schema::empty())));
    }

    let schema = infer_json_schema_from_iterator(records.iter().map(Ok::<_, ArrowError>))?;
    let mut decoder = ReaderBuilder::new(Arc::new(schema.clone()))
        .with_batch_size(records.len())
        .build_decoder()?;
    decoder.serialize(records)?;

    Ok(decoder
        .flush()?
        .unwrap_or_else(|| RecordBatch::new_empty(Arc::new(schema))))
}

#[cfg(test)]
mod tests {
    use arrow::array::{AsArray, StringArray};
    use arrow::datatypes::{DataType, Float64Type};
    use serde_json::json;
    use time::macros::datetime;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn window_zeroes_minutes_before_subtracting() {
        let window = export_window(datetime!(2024-01-15 10:37:00 UTC), 15, 30);

        assert_eq!(window.end, datetime!(2023-12-31 10:00:00 UTC));
        assert_eq!(window.start, datetime!(2023-12-01 10:00:00 UTC));
    }

    #[test]
    fn window_is_computed_in_utc() {
        let window = export_window(datetime!(2024-01-15 12:59:59.999 +02:00), 1, 1);

        assert_eq!(window.end, datetime!(2024-01-14 10:00 UTC));
        assert_eq!(window.start, datetime!(2024-01-13 10:00 UTC));
    }

    #[test]
    fn delay_and_export_add_up() {
        let reference = datetime!(2024-03-01 00:00 UTC);
        let window = export_window(reference, 0, 7);

        assert_eq!(window.end, reference);
        assert_eq!(reference - window.start, Duration::days(7));
    }

    fn records() -> Value {
        json!({
            "total": 2,
            "records": [
                {"HourUTC": "2023-12-01T10:00:00", "HourDK": "2023-12-01T11:00:00", "PriceArea": "DK1", "ConsumerType_DE35": 111, "TotalCon": 1234.5},
                {"HourUTC": "2023-12-01T11:00:00", "HourDK": "2023-12-01T12:00:00", "PriceArea": "DK2", "ConsumerType_DE35": 111, "TotalCon": 987.25},
            ]
        })
    }

    #[tokio::test]
    async fn extract_queries_window_and_builds_table() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dataset/ConsumptionDE35Hour"))
            .and(query_param("offset", "0"))
            .and(query_param("sort", "HourUTC"))
            .and(query_param("timezone", "utc"))
            .and(query_param("start", "2023-12-01T10:00"))
            .and(query_param("end", "2023-12-31T10:00"))
            .respond_with(ResponseTemplate::new(200).set_body_json(records()))
            .expect(1)
            .mount(&server)
            .await;

        let source = EnergiDataSource::new(&format!("{}/dataset/ConsumptionDE35Hour", server.uri()));
        let extraction = source
            .extract(Some(datetime!(2024-01-15 10:37:00 UTC)), 15, 30)
            .await
            .unwrap()
            .expect("extraction should succeed");

        let data = &extraction.data;
        assert_eq!(data.num_rows(), 2);
        let areas = data.column_by_name("PriceArea").unwrap();
        assert_eq!(areas.as_string::<i32>(), &StringArray::from(vec!["DK1", "DK2"]));
        assert_eq!(data.schema().field_with_name("TotalCon").unwrap().data_type(), &DataType::Float64);
        assert_eq!(
            data.column_by_name("TotalCon").unwrap().as_primitive::<Float64Type>().value(1),
            987.25
        );

        let meta = &extraction.metadata;
        assert_eq!(meta.days_delay, 15);
        assert_eq!(meta.days_export, 30);
        assert_eq!(meta.export_datetime_utc_start, "2023-12-01T10:00:00Z");
        assert_eq!(meta.export_datetime_utc_end, "2023-12-31T10:00:00Z");
        assert_eq!(meta.datetime_format, "%Y-%m-%dT%H:%M:%SZ");
        assert!(meta.url.starts_with(&server.uri()));
        assert!(meta.url.contains("sort=HourUTC"));
        assert!(meta.url.ends_with("?offset=0&sort=HourUTC&timezone=utc&start=2023-12-01T10:00&end=2023-12-31T10:00"));
    }

    #[tokio::test]
    async fn non_json_body_is_absent_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("<html>Service Unavailable</html>"))
            .mount(&server)
            .await;

        let source = EnergiDataSource::new(&server.uri());
        let result = source.extract(None, 15, 30).await.unwrap();

        assert!(result.is_none());
    }

    #[tokio::test]
    async fn json_without_records_is_a_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "bad window"})))
            .mount(&server)
            .await;

        let source = EnergiDataSource::new(&server.uri());
        let err = source.extract(None, 15, 30).await.unwrap_err();

        assert!(matches!(err, SourceError::Parse(_)));
    }

    #[tokio::test]
    async fn empty_record_set_gives_empty_table() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"records": []})))
            .mount(&server)
            .await;

        let source = EnergiDataSource::new(&server.uri());
        let extraction = source.extract(None, 15, 30).await.unwrap().unwrap();

        assert_eq!(extraction.data.num_rows(), 0);
    }

    #[test]
    fn request_url_keeps_existing_query_and_readable_bounds() {
        let source = EnergiDataSource::new("https://api.example.test/dataset/ConsumptionDE35Hour?limit=5");
        let window = export_window(datetime!(2024-01-15 10:37 UTC), 15, 30);

        let url = source.request_url(&window).unwrap();

        assert_eq!(
            url.query(),
            Some("limit=5&offset=0&sort=HourUTC&timezone=utc&start=2023-12-01T10:00&end=2023-12-31T10:00")
        );
    }

    #[test]
    fn invalid_url_is_reported() {
        let source = EnergiDataSource::new("not a url");
        let window = export_window(datetime!(2024-01-15 00:00 UTC), 1, 1);

        assert!(matches!(source.request_url(&window), Err(SourceError::Url { .. })));
    }
}
