use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row, ToSql};

use crate::db::{
    helpers::{
        decode_metadata, encode_metadata, format_datetime, parse_datetime, parse_sentiment,
        to_i64, to_u64,
    },
    models::{
        round_to_places, ConfidenceBin, ConfidenceSummary, HourOfDayCounts, NewPrediction,
        PredictionFilter, PredictionRecord, PredictionStats, Sentiment, SentimentCounts,
        TimeBucket,
    },
    Database,
};
use crate::error::NegaBotError;

/// Upper bound on buckets a single time-series query may produce.
pub const MAX_TIME_BUCKETS: i64 = 10_000;

/// Upper bound on confidence histogram bins.
pub const MAX_CONFIDENCE_BINS: usize = 100;

const RECORD_COLUMNS: &str =
    "id, text, sentiment, confidence, predicted_class, timestamp, metadata, created_at";

fn row_to_prediction(row: &Row) -> Result<PredictionRecord> {
    let sentiment: String = row.get("sentiment")?;
    let predicted_class: i64 = row.get("predicted_class")?;
    let timestamp: String = row.get("timestamp")?;
    let metadata: Option<String> = row.get("metadata")?;
    let created_at: String = row.get("created_at")?;

    Ok(PredictionRecord {
        id: row.get("id")?,
        text: row.get("text")?,
        sentiment: parse_sentiment(&sentiment)?,
        confidence: row.get("confidence")?,
        predicted_class: u8::try_from(predicted_class)
            .map_err(|_| anyhow!("predicted_class out of range: {predicted_class}"))?,
        timestamp: parse_datetime(&timestamp, "timestamp")?,
        metadata: decode_metadata(metadata)?,
        created_at: parse_datetime(&created_at, "created_at")?,
    })
}

/// Builds a `WHERE` clause (possibly empty) plus its positional parameters.
fn filter_clause(filter: &PredictionFilter) -> (String, Vec<Box<dyn ToSql>>) {
    let mut conditions = Vec::new();
    let mut params_vec: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(sentiment) = filter.sentiment {
        conditions.push("sentiment = ?");
        params_vec.push(Box::new(sentiment.as_str()));
    }
    if let Some(search) = filter.search.as_deref().filter(|s| !s.is_empty()) {
        // LIKE is case-insensitive for ASCII in SQLite.
        conditions.push("text LIKE ? ESCAPE '\\'");
        params_vec.push(Box::new(format!("%{}%", escape_like(search))));
    }
    if let Some(since) = filter.since {
        conditions.push("created_at >= ?");
        params_vec.push(Box::new(format_datetime(&since)));
    }
    if let Some(until) = filter.until {
        conditions.push("created_at < ?");
        params_vec.push(Box::new(format_datetime(&until)));
    }

    if conditions.is_empty() {
        (String::new(), params_vec)
    } else {
        (format!(" WHERE {}", conditions.join(" AND ")), params_vec)
    }
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn param_refs(params_vec: &[Box<dyn ToSql>]) -> Vec<&dyn ToSql> {
    params_vec.iter().map(|b| b.as_ref()).collect()
}

fn query_counts(conn: &Connection, filter: &PredictionFilter) -> Result<SentimentCounts> {
    let (where_clause, params_vec) = filter_clause(filter);
    let query = format!(
        "SELECT sentiment, COUNT(*) FROM predictions{where_clause} GROUP BY sentiment"
    );

    let mut stmt = conn.prepare(&query)?;
    let mut rows = stmt.query(param_refs(&params_vec).as_slice())?;
    let mut counts = SentimentCounts::default();
    while let Some(row) = rows.next()? {
        let sentiment: String = row.get(0)?;
        let count: i64 = row.get(1)?;
        counts.increment(parse_sentiment(&sentiment)?, to_u64(count, "count")?);
    }

    Ok(counts)
}

fn query_average(conn: &Connection, filter: &PredictionFilter) -> Result<f64> {
    let (where_clause, params_vec) = filter_clause(filter);
    let query = format!("SELECT AVG(confidence) FROM predictions{where_clause}");

    let average: Option<f64> = conn.query_row(
        &query,
        param_refs(&params_vec).as_slice(),
        |row| row.get(0),
    )?;

    // AVG over zero rows is NULL.
    Ok(average.unwrap_or(0.0))
}

impl Database {
    /// Validates and inserts a prediction, returning the assigned id.
    pub async fn append_prediction(&self, prediction: NewPrediction) -> Result<i64, NegaBotError> {
        let predicted_class = prediction.validate()?;
        let metadata = encode_metadata(prediction.metadata.as_ref())
            .map_err(|err| NegaBotError::Validation(format!("{err:#}")))?;

        self.execute(move |conn| {
            let created_at = Utc::now();
            conn.execute(
                "INSERT INTO predictions (text, sentiment, confidence, predicted_class, timestamp, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    prediction.text,
                    prediction.sentiment.as_str(),
                    prediction.confidence,
                    i64::from(predicted_class),
                    format_datetime(&prediction.timestamp),
                    metadata,
                    format_datetime(&created_at),
                ],
            )
            .context("failed to insert prediction")?;

            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(NegaBotError::storage)
    }

    pub async fn count(&self, filter: &PredictionFilter) -> Result<u64, NegaBotError> {
        let filter = filter.clone();
        self.execute(move |conn| {
            let (where_clause, params_vec) = filter_clause(&filter);
            let query = format!("SELECT COUNT(*) FROM predictions{where_clause}");
            let count: i64 =
                conn.query_row(&query, param_refs(&params_vec).as_slice(), |row| row.get(0))?;
            to_u64(count, "count")
        })
        .await
        .map_err(NegaBotError::storage)
    }

    /// Counts per label; both labels are always reported.
    pub async fn count_by_sentiment(
        &self,
        filter: &PredictionFilter,
    ) -> Result<SentimentCounts, NegaBotError> {
        let filter = filter.clone();
        self.execute(move |conn| query_counts(conn, &filter))
            .await
            .map_err(NegaBotError::storage)
    }

    /// Mean confidence over matching rows, `0.0` when nothing matches.
    pub async fn average_confidence(&self, filter: &PredictionFilter) -> Result<f64, NegaBotError> {
        let filter = filter.clone();
        self.execute(move |conn| query_average(conn, &filter))
            .await
            .map_err(NegaBotError::storage)
    }

    /// Newest first by `created_at`, ties broken by id.
    pub async fn list_recent(
        &self,
        limit: usize,
        filter: &PredictionFilter,
    ) -> Result<Vec<PredictionRecord>, NegaBotError> {
        let filter = filter.clone();
        self.execute(move |conn| {
            let (where_clause, mut params_vec) = filter_clause(&filter);
            let query = format!(
                "SELECT {RECORD_COLUMNS} FROM predictions{where_clause}
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?"
            );
            params_vec.push(Box::new(to_i64(limit as u64)?));

            let mut stmt = conn.prepare(&query)?;
            let mut rows = stmt.query(param_refs(&params_vec).as_slice())?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_prediction(row)?);
            }

            Ok(records)
        })
        .await
        .map_err(NegaBotError::storage)
    }

    /// Every matching row, oldest first.
    pub async fn list_all(
        &self,
        filter: &PredictionFilter,
    ) -> Result<Vec<PredictionRecord>, NegaBotError> {
        let filter = filter.clone();
        self.execute(move |conn| {
            let (where_clause, params_vec) = filter_clause(&filter);
            let query = format!(
                "SELECT {RECORD_COLUMNS} FROM predictions{where_clause}
                 ORDER BY created_at ASC, id ASC"
            );

            let mut stmt = conn.prepare(&query)?;
            let mut rows = stmt.query(param_refs(&params_vec).as_slice())?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_prediction(row)?);
            }

            Ok(records)
        })
        .await
        .map_err(NegaBotError::storage)
    }

    /// Groups matching rows into epoch-aligned buckets of `bucket_secs`.
    pub async fn time_series(
        &self,
        bucket_secs: u64,
        filter: &PredictionFilter,
    ) -> Result<Vec<TimeBucket>, NegaBotError> {
        if bucket_secs == 0 {
            return Err(NegaBotError::Validation(
                "bucket size must be at least one second".into(),
            ));
        }

        let filter = filter.clone();
        let rows = self
            .execute(move |conn| {
                let (where_clause, params_vec) = filter_clause(&filter);
                let query = format!(
                    "SELECT created_at, sentiment FROM predictions{where_clause}
                     ORDER BY created_at ASC"
                );

                let mut stmt = conn.prepare(&query)?;
                let mut rows = stmt.query(param_refs(&params_vec).as_slice())?;
                let mut points = Vec::new();
                while let Some(row) = rows.next()? {
                    let created_at: String = row.get(0)?;
                    let sentiment: String = row.get(1)?;
                    points.push((
                        parse_datetime(&created_at, "created_at")?,
                        parse_sentiment(&sentiment)?,
                    ));
                }

                Ok(points)
            })
            .await
            .map_err(NegaBotError::storage)?;

        bucketize(&rows, bucket_secs)
    }

    /// Counts and average confidence read in one worker round-trip.
    pub async fn stats(&self, filter: &PredictionFilter) -> Result<PredictionStats, NegaBotError> {
        let filter = filter.clone();
        self.execute(move |conn| {
            let counts = query_counts(conn, &filter)?;
            let average = query_average(conn, &filter)?;
            Ok(PredictionStats::from_parts(counts, average))
        })
        .await
        .map_err(NegaBotError::storage)
    }

    /// Splits `[0, 1]` into `bins` equal slices and counts matching rows per label.
    pub async fn confidence_histogram(
        &self,
        bins: usize,
        filter: &PredictionFilter,
    ) -> Result<Vec<ConfidenceBin>, NegaBotError> {
        if bins == 0 || bins > MAX_CONFIDENCE_BINS {
            return Err(NegaBotError::Validation(format!(
                "histogram needs between 1 and {MAX_CONFIDENCE_BINS} bins, got {bins}"
            )));
        }

        let filter = filter.clone();
        let points = self
            .execute(move |conn| {
                let (where_clause, params_vec) = filter_clause(&filter);
                let query =
                    format!("SELECT confidence, sentiment FROM predictions{where_clause}");

                let mut stmt = conn.prepare(&query)?;
                let mut rows = stmt.query(param_refs(&params_vec).as_slice())?;
                let mut points = Vec::new();
                while let Some(row) = rows.next()? {
                    let confidence: f64 = row.get(0)?;
                    let sentiment: String = row.get(1)?;
                    points.push((confidence, parse_sentiment(&sentiment)?));
                }

                Ok(points)
            })
            .await
            .map_err(NegaBotError::storage)?;

        Ok(bin_confidences(&points, bins))
    }

    /// 24 entries, one per UTC hour, zero-filled.
    pub async fn hour_of_day_counts(
        &self,
        filter: &PredictionFilter,
    ) -> Result<Vec<HourOfDayCounts>, NegaBotError> {
        let filter = filter.clone();
        self.execute(move |conn| {
            let (where_clause, params_vec) = filter_clause(&filter);
            // created_at is fixed-width RFC 3339, so characters 12-13 are the hour.
            let query = format!(
                "SELECT CAST(substr(created_at, 12, 2) AS INTEGER) AS hour, sentiment, COUNT(*)
                 FROM predictions{where_clause}
                 GROUP BY hour, sentiment"
            );

            let mut hours: Vec<HourOfDayCounts> = (0..24u8)
                .map(|hour| HourOfDayCounts {
                    hour,
                    counts: SentimentCounts::default(),
                })
                .collect();

            let mut stmt = conn.prepare(&query)?;
            let mut rows = stmt.query(param_refs(&params_vec).as_slice())?;
            while let Some(row) = rows.next()? {
                let hour: i64 = row.get(0)?;
                let sentiment: String = row.get(1)?;
                let count: i64 = row.get(2)?;
                let slot = usize::try_from(hour)
                    .ok()
                    .and_then(|index| hours.get_mut(index))
                    .ok_or_else(|| anyhow!("hour of day out of range: {hour}"))?;
                let sentiment = parse_sentiment(&sentiment)?;
                slot.counts.increment(sentiment, to_u64(count, "count")?);
            }

            Ok(hours)
        })
        .await
        .map_err(NegaBotError::storage)
    }

    /// Count, mean, min and max confidence per label. Labels with no rows are left out.
    pub async fn confidence_by_sentiment(
        &self,
        filter: &PredictionFilter,
    ) -> Result<Vec<ConfidenceSummary>, NegaBotError> {
        let filter = filter.clone();
        self.execute(move |conn| {
            let (where_clause, params_vec) = filter_clause(&filter);
            let query = format!(
                "SELECT sentiment, COUNT(*), AVG(confidence), MIN(confidence), MAX(confidence)
                 FROM predictions{where_clause}
                 GROUP BY sentiment"
            );

            let mut stmt = conn.prepare(&query)?;
            let mut rows = stmt.query(param_refs(&params_vec).as_slice())?;
            let mut summaries = Vec::new();
            while let Some(row) = rows.next()? {
                let sentiment: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                let mean: f64 = row.get(2)?;
                summaries.push(ConfidenceSummary {
                    sentiment: parse_sentiment(&sentiment)?,
                    count: to_u64(count, "count")?,
                    mean: round_to_places(mean, 4),
                    min: row.get(3)?,
                    max: row.get(4)?,
                });
            }
            summaries.sort_by_key(|summary| summary.sentiment.class_index());

            Ok(summaries)
        })
        .await
        .map_err(NegaBotError::storage)
    }
}

/// Equal-width bins over `[0, 1]`; a confidence of exactly 1.0 lands in the last bin.
pub fn bin_confidences(points: &[(f64, Sentiment)], bins: usize) -> Vec<ConfidenceBin> {
    let width = 1.0 / bins as f64;
    let mut histogram: Vec<ConfidenceBin> = (0..bins)
        .map(|index| ConfidenceBin {
            lower: round_to_places(index as f64 * width, 4),
            upper: round_to_places((index + 1) as f64 * width, 4),
            counts: SentimentCounts::default(),
        })
        .collect();

    for (confidence, sentiment) in points {
        let index = ((confidence * bins as f64).floor() as usize).min(bins - 1);
        histogram[index].counts.increment(*sentiment, 1);
    }

    histogram
}

/// Contiguous, zero-filled buckets between the first and last non-empty one.
pub fn bucketize(
    points: &[(DateTime<Utc>, Sentiment)],
    bucket_secs: u64,
) -> Result<Vec<TimeBucket>, NegaBotError> {
    let size = i64::try_from(bucket_secs)
        .map_err(|_| NegaBotError::Validation(format!("bucket size {bucket_secs} is too large")))?;
    if size == 0 {
        return Err(NegaBotError::Validation(
            "bucket size must be at least one second".into(),
        ));
    }

    let mut buckets: BTreeMap<i64, SentimentCounts> = BTreeMap::new();
    for (created_at, sentiment) in points {
        let start = created_at.timestamp().div_euclid(size) * size;
        buckets.entry(start).or_default().increment(*sentiment, 1);
    }

    let (first, last) = match (buckets.keys().next(), buckets.keys().next_back()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return Ok(Vec::new()),
    };

    let span = (last - first) / size + 1;
    if span > MAX_TIME_BUCKETS {
        return Err(NegaBotError::Validation(format!(
            "time range needs {span} buckets of {bucket_secs}s, limit is {MAX_TIME_BUCKETS}"
        )));
    }

    let mut series = Vec::with_capacity(span as usize);
    let mut start = first;
    while start <= last {
        let bucket_start = DateTime::<Utc>::from_timestamp(start, 0).ok_or_else(|| {
            NegaBotError::Validation(format!("bucket start {start} is out of range"))
        })?;
        series.push(TimeBucket {
            bucket_start,
            counts: buckets.get(&start).copied().unwrap_or_default(),
        });
        start += size;
    }

    Ok(series)
}
