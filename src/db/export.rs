//! CSV and JSON serialization of the prediction log.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::db::{
    helpers::format_datetime,
    models::{PredictionFilter, PredictionRecord},
    Database,
};
use crate::error::NegaBotError;

pub const CSV_HEADER: &str =
    "id,text,sentiment,confidence,predicted_class,timestamp,metadata,created_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Json => "application/json",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = NegaBotError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(NegaBotError::Validation(format!(
                "export format must be csv or json, got '{other}'"
            ))),
        }
    }
}

impl Database {
    /// Serializes every matching record, oldest first.
    pub async fn export(
        &self,
        format: ExportFormat,
        filter: &PredictionFilter,
    ) -> Result<Vec<u8>, NegaBotError> {
        let records = self.list_all(filter).await?;
        render(format, &records)
    }
}

pub fn render(format: ExportFormat, records: &[PredictionRecord]) -> Result<Vec<u8>, NegaBotError> {
    match format {
        ExportFormat::Csv => Ok(render_csv(records).into_bytes()),
        ExportFormat::Json => serde_json::to_vec_pretty(records)
            .map_err(|err| NegaBotError::Internal(format!("failed to encode export: {err}"))),
    }
}

fn render_csv(records: &[PredictionRecord]) -> String {
    let mut out = String::with_capacity(64 * (records.len() + 1));
    out.push_str(CSV_HEADER);
    out.push_str("\r\n");

    for record in records {
        let metadata = record
            .metadata
            .as_ref()
            .map(|m| serde_json::Value::Object(m.clone()).to_string())
            .unwrap_or_default();
        let fields = [
            record.id.to_string(),
            csv_field(&record.text),
            record.sentiment.as_str().to_string(),
            record.confidence.to_string(),
            record.predicted_class.to_string(),
            format_datetime(&record.timestamp),
            csv_field(&metadata),
            format_datetime(&record.created_at),
        ];
        out.push_str(&fields.join(","));
        out.push_str("\r\n");
    }

    out
}

/// RFC 4180 quoting: wrap in quotes and double inner quotes when needed.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::db::{
        models::{Metadata, NewPrediction, Sentiment},
        test_support::scratch_db,
    };

    #[test]
    fn quotes_fields_that_need_it() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a, b"), "\"a, b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn parses_format_names() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!("json".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert!("xml".parse::<ExportFormat>().is_err());
    }

    #[tokio::test]
    async fn csv_export_has_header_and_rows_in_insert_order() {
        let (db, _dir) = scratch_db();
        let mut metadata = Metadata::new();
        metadata.insert("source".into(), serde_json::json!("csv"));

        db.append_prediction(
            NewPrediction::new("Great, really great", Sentiment::Positive, 0.95)
                .with_metadata(Some(metadata)),
        )
        .await
        .unwrap();
        db.append_prediction(NewPrediction::new("Broke", Sentiment::Negative, 0.8))
            .await
            .unwrap();

        let bytes = db
            .export(ExportFormat::Csv, &PredictionFilter::default())
            .await
            .unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<_> = text.split("\r\n").filter(|l| !l.is_empty()).collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines[1].starts_with("1,\"Great, really great\",Positive,0.95,0,"));
        assert!(lines[1].contains("\"{\"\"source\"\":\"\"csv\"\"}\""));
        assert!(lines[2].starts_with("2,Broke,Negative,0.8,1,"));
    }

    #[tokio::test]
    async fn json_export_honours_filter() {
        let (db, _dir) = scratch_db();
        db.append_prediction(NewPrediction::new("good", Sentiment::Positive, 0.9))
            .await
            .unwrap();
        db.append_prediction(NewPrediction::new("bad", Sentiment::Negative, 0.9))
            .await
            .unwrap();

        let bytes = db
            .export(
                ExportFormat::Json,
                &PredictionFilter::sentiment(Sentiment::Negative),
            )
            .await
            .unwrap();
        let records: Vec<PredictionRecord> = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text, "bad");
        assert_eq!(records[0].predicted_class, 1);
    }
}
