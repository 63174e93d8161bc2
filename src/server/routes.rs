//! Request routing. Pure over `(method, url, body)` so it can be driven
//! without a socket.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tiny_http::Method;

use crate::db::{ExportFormat, PredictionFilter, Sentiment, MAX_TIME_BUCKETS};
use crate::error::NegaBotError;
use crate::service::{BatchPredictRequest, PredictRequest, PredictionService};

use super::dashboard::{self, DashboardData};

const ENABLE_LOGS: bool = true;

use crate::log_warn;

pub const DEFAULT_LIST_LIMIT: usize = 100;
pub const MAX_LIST_LIMIT: usize = 1000;
pub const DEFAULT_BUCKET_SECS: u64 = 3600;
const DASHBOARD_RECENT: usize = 50;
const DASHBOARD_TREND_BUCKETS: i64 = 24;
const DASHBOARD_HISTOGRAM_BINS: usize = 20;

/// A response ready to be written to the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                content_type: "application/json",
                headers: Vec::new(),
                body,
            },
            Err(err) => Self::error(&NegaBotError::Internal(format!(
                "failed to encode response: {err}"
            ))),
        }
    }

    pub fn html(body: String) -> Self {
        Self {
            status: 200,
            content_type: "text/html; charset=utf-8",
            headers: Vec::new(),
            body: body.into_bytes(),
        }
    }

    pub fn error(err: &NegaBotError) -> Self {
        let status = err.status_code();
        if status >= 500 {
            log_warn!("Request failed with {status}: {err}");
        }
        Self::json(status, &json!({ "detail": err.to_string() }))
    }

    fn from_result<T: Serialize>(result: Result<T, NegaBotError>) -> Self {
        match result {
            Ok(value) => Self::json(200, &value),
            Err(err) => Self::error(&err),
        }
    }
}

fn route_method(path: &str) -> Option<Method> {
    match path {
        "/" | "/health" | "/stats" | "/predictions" | "/stats/timeseries" | "/export"
        | "/dashboard" => Some(Method::Get),
        "/predict" | "/batch_predict" => Some(Method::Post),
        _ => None,
    }
}

pub async fn handle(service: &PredictionService, method: &Method, url: &str, body: &[u8]) -> Reply {
    let (path, raw_query) = url.split_once('?').unwrap_or((url, ""));
    let path = match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    };

    let Some(expected) = route_method(path) else {
        return Reply::error(&NegaBotError::NotFound(path.to_string()));
    };
    if *method != expected {
        return Reply::error(&NegaBotError::MethodNotAllowed(method.to_string()));
    }

    let query = match parse_query(raw_query) {
        Ok(query) => query,
        Err(err) => return Reply::error(&err),
    };

    match path {
        "/" => Reply::json(200, &service.info()),
        "/health" => Reply::json(200, &service.health()),
        "/predict" => match parse_body::<PredictRequest>(body) {
            Ok(request) => Reply::from_result(service.predict(request).await),
            Err(err) => Reply::error(&err),
        },
        "/batch_predict" => match parse_body::<BatchPredictRequest>(body) {
            Ok(request) => Reply::from_result(service.batch_predict(request).await),
            Err(err) => Reply::error(&err),
        },
        "/stats" => match parse_filter(&query) {
            Ok(filter) => Reply::from_result(service.stats(&filter).await),
            Err(err) => Reply::error(&err),
        },
        "/predictions" => Reply::from_result(list_predictions(service, &query).await),
        "/stats/timeseries" => Reply::from_result(time_series(service, &query).await),
        "/export" => export(service, &query).await.unwrap_or_else(|err| Reply::error(&err)),
        "/dashboard" => dashboard_page(service, &query)
            .await
            .unwrap_or_else(|err| Reply::error(&err)),
        _ => Reply::error(&NegaBotError::NotFound(path.to_string())),
    }
}

async fn list_predictions(
    service: &PredictionService,
    query: &HashMap<String, String>,
) -> Result<Value, NegaBotError> {
    let limit = match query.get("limit") {
        Some(raw) => parse_number::<usize>("limit", raw)?,
        None => DEFAULT_LIST_LIMIT,
    };
    if limit == 0 || limit > MAX_LIST_LIMIT {
        return Err(NegaBotError::Validation(format!(
            "limit must be between 1 and {MAX_LIST_LIMIT}, got {limit}"
        )));
    }

    let filter = parse_filter(query)?;
    let predictions = service.db().list_recent(limit, &filter).await?;
    Ok(json!({ "count": predictions.len(), "predictions": predictions }))
}

async fn time_series(
    service: &PredictionService,
    query: &HashMap<String, String>,
) -> Result<Value, NegaBotError> {
    let bucket_secs = match query.get("bucket") {
        Some(raw) => parse_number::<u64>("bucket", raw)?,
        None => DEFAULT_BUCKET_SECS,
    };
    let mut filter = parse_filter(query)?;
    if filter.since.is_none() {
        filter.since = window_start(filter.until, bucket_secs, MAX_TIME_BUCKETS);
    }
    let buckets = service.db().time_series(bucket_secs, &filter).await?;
    Ok(json!({ "bucket_secs": bucket_secs, "since": filter.since, "buckets": buckets }))
}

async fn export(
    service: &PredictionService,
    query: &HashMap<String, String>,
) -> Result<Reply, NegaBotError> {
    let format = match query.get("format") {
        Some(raw) => raw.parse::<ExportFormat>()?,
        None => ExportFormat::Csv,
    };
    let filter = parse_filter(query)?;
    let body = service.db().export(format, &filter).await?;
    let filename = format!(
        "negabot_predictions_{}.{}",
        Utc::now().format("%Y%m%d_%H%M%S"),
        format.extension()
    );

    Ok(Reply {
        status: 200,
        content_type: format.content_type(),
        headers: vec![(
            "Content-Disposition",
            format!("attachment; filename=\"{filename}\""),
        )],
        body,
    })
}

async fn dashboard_page(
    service: &PredictionService,
    query: &HashMap<String, String>,
) -> Result<Reply, NegaBotError> {
    let filter = parse_filter(query)?;
    let db = service.db();
    let stats = db.stats(&filter).await?;

    let trend_filter = PredictionFilter {
        since: filter.since.max(window_start(
            filter.until,
            DEFAULT_BUCKET_SECS,
            DASHBOARD_TREND_BUCKETS,
        )),
        ..filter.clone()
    };
    let trend = db.time_series(DEFAULT_BUCKET_SECS, &trend_filter).await?;

    let histogram = db
        .confidence_histogram(DASHBOARD_HISTOGRAM_BINS, &filter)
        .await?;
    let hours = db.hour_of_day_counts(&filter).await?;
    let confidence = db.confidence_by_sentiment(&filter).await?;
    let recent = db.list_recent(DASHBOARD_RECENT, &filter).await?;

    Ok(Reply::html(dashboard::render(&DashboardData {
        filter,
        stats,
        trend,
        histogram,
        hours,
        confidence,
        recent,
    })))
}

/// Start of the `buckets` epoch-aligned buckets that end with the one holding
/// `until` (or now). `None` when the arithmetic leaves chrono's range.
fn window_start(
    until: Option<DateTime<Utc>>,
    bucket_secs: u64,
    buckets: i64,
) -> Option<DateTime<Utc>> {
    let size = i64::try_from(bucket_secs).ok().filter(|size| *size > 0)?;
    let anchor = until.unwrap_or_else(Utc::now).timestamp();
    let current = anchor.div_euclid(size).checked_mul(size)?;
    let start = current.checked_sub(size.checked_mul(buckets - 1)?)?;
    DateTime::<Utc>::from_timestamp(start, 0)
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, NegaBotError> {
    serde_json::from_slice(body).map_err(|err| match err.classify() {
        // Well-formed JSON of the wrong shape is a validation failure.
        serde_json::error::Category::Data => NegaBotError::Validation(err.to_string()),
        _ => NegaBotError::BadRequest(err.to_string()),
    })
}

pub fn parse_query(raw: &str) -> Result<HashMap<String, String>, NegaBotError> {
    let mut params = HashMap::new();
    for pair in raw.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params.insert(decode_component(key)?, decode_component(value)?);
    }
    Ok(params)
}

fn decode_component(raw: &str) -> Result<String, NegaBotError> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .map_err(|err| NegaBotError::BadRequest(format!("invalid query encoding: {err}")))
}

/// Reads `sentiment`, `search`, `since` and `until`; blank values are ignored.
pub fn parse_filter(query: &HashMap<String, String>) -> Result<PredictionFilter, NegaBotError> {
    let present = |key: &str| {
        query
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    };

    let sentiment = match present("sentiment") {
        Some(value) if value.eq_ignore_ascii_case("all") => None,
        Some(value) => Some(value.parse::<Sentiment>()?),
        None => None,
    };

    Ok(PredictionFilter {
        sentiment,
        search: present("search").map(str::to_string),
        since: present("since").map(|v| parse_instant("since", v)).transpose()?,
        until: present("until").map(|v| parse_instant("until", v)).transpose()?,
    })
}

/// RFC 3339 instants or plain `YYYY-MM-DD` dates. A date `until` covers the
/// whole day, so it becomes the following midnight.
fn parse_instant(field: &str, value: &str) -> Result<DateTime<Utc>, NegaBotError> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Ok(instant.with_timezone(&Utc));
    }

    let invalid = || {
        NegaBotError::Validation(format!(
            "{field} must be an RFC 3339 timestamp or a YYYY-MM-DD date, got {value:?}"
        ))
    };
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| invalid())?;
    let date = if field == "until" {
        date.checked_add_signed(Duration::days(1)).ok_or_else(invalid)?
    } else {
        date
    };
    date.and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .ok_or_else(invalid)
}

fn parse_number<T: std::str::FromStr>(field: &str, raw: &str) -> Result<T, NegaBotError> {
    raw.trim()
        .parse()
        .map_err(|_| NegaBotError::Validation(format!("{field} must be a non-negative integer")))
}
