use serde::{Deserialize, Serialize};
use time::{macros::format_description, OffsetDateTime, PrimitiveDateTime, UtcOffset};

/// strftime-style pattern recorded alongside the window bounds.
pub const METADATA_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Provenance of one extraction run. Built once, never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    pub days_delay: i64,
    pub days_export: i64,
    /// Fully rendered request URL, query included.
    pub url: String,
    pub export_datetime_utc_start: String,
    pub export_datetime_utc_end: String,
    pub datetime_format: String,
}

impl ExtractionMetadata {
    pub fn new(
        days_delay: i64,
        days_export: i64,
        url: impl Into<String>,
        export_start: OffsetDateTime,
        export_end: OffsetDateTime,
    ) -> Result<Self, time::error::Format> {
        Ok(Self {
            days_delay,
            days_export,
            url: url.into(),
            export_datetime_utc_start: format_bound(export_start)?,
            export_datetime_utc_end: format_bound(export_end)?,
            datetime_format: METADATA_DATETIME_FORMAT.to_string(),
        })
    }

    /// Parse the recorded bounds back into UTC instants.
    pub fn export_window(&self) -> Result<(OffsetDateTime, OffsetDateTime), time::error::Parse> {
        Ok((
            parse_bound(&self.export_datetime_utc_start)?,
            parse_bound(&self.export_datetime_utc_end)?,
        ))
    }
}

fn format_bound(ts: OffsetDateTime) -> Result<String, time::error::Format> {
    ts.to_offset(UtcOffset::UTC)
        .format(format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z"))
}

fn parse_bound(s: &str) -> Result<OffsetDateTime, time::error::Parse> {
    PrimitiveDateTime::parse(
        s,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z"),
    )
    .map(PrimitiveDateTime::assume_utc)
}
