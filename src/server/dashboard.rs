//! Server-rendered analytics page.

use std::fmt::Write;

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Timelike, Utc};

use crate::db::{
    ConfidenceBin, ConfidenceSummary, HourOfDayCounts, PredictionFilter, PredictionRecord,
    PredictionStats, Sentiment, TimeBucket,
};

pub struct DashboardData {
    pub filter: PredictionFilter,
    pub stats: PredictionStats,
    pub trend: Vec<TimeBucket>,
    pub histogram: Vec<ConfidenceBin>,
    pub hours: Vec<HourOfDayCounts>,
    pub confidence: Vec<ConfidenceSummary>,
    pub recent: Vec<PredictionRecord>,
}

const STYLE: &str = "body{font-family:sans-serif;margin:2rem;color:#222}\
h1{color:#1f77b4}\
.metrics{display:flex;gap:1rem;margin:1rem 0}\
.metric{flex:1;background:#f0f2f6;padding:1rem;border-radius:.5rem}\
.metric b{display:block;font-size:1.6rem}\
.bar{height:1.2rem;display:inline-block}\
.positive{background:#2e8b57}.negative{background:#dc143c}\
table{border-collapse:collapse;width:100%;margin:1rem 0}\
td,th{border:1px solid #ddd;padding:.3rem .5rem;text-align:left}\
th{background:#f0f2f6}";

pub fn render(data: &DashboardData) -> String {
    let mut html = String::with_capacity(8 * 1024);
    html.push_str("<!DOCTYPE html><html><head><meta charset=\"utf-8\">");
    html.push_str("<title>NegaBot Analytics Dashboard</title>");
    let _ = write!(html, "<style>{STYLE}</style></head><body>");
    html.push_str("<h1>NegaBot Analytics Dashboard</h1>");

    render_filters(&mut html, &data.filter);

    if data.stats.total_predictions == 0 {
        html.push_str(
            "<p><strong>No prediction data found.</strong> \
             Make some predictions with <code>POST /predict</code> first.</p>",
        );
        html.push_str("</body></html>");
        return html;
    }

    render_metrics(&mut html, &data.stats);
    render_distribution(&mut html, &data.stats);
    render_trend(&mut html, &data.trend);
    render_histogram(&mut html, &data.histogram);
    render_confidence(&mut html, &data.confidence);
    render_hours(&mut html, &data.hours);
    render_recent(&mut html, &data.recent);
    render_export_links(&mut html, &data.filter);

    html.push_str("</body></html>");
    html
}

fn render_filters(html: &mut String, filter: &PredictionFilter) {
    html.push_str("<form method=\"get\" action=\"/dashboard\">Sentiment: <select name=\"sentiment\">");
    for (value, selected) in [
        ("All", filter.sentiment.is_none()),
        ("Positive", filter.sentiment == Some(Sentiment::Positive)),
        ("Negative", filter.sentiment == Some(Sentiment::Negative)),
    ] {
        let _ = write!(
            html,
            "<option value=\"{value}\"{}>{value}</option>",
            if selected { " selected" } else { "" }
        );
    }
    let _ = write!(
        html,
        "</select> Search: <input name=\"search\" value=\"{}\"> \
         From: <input type=\"date\" name=\"since\" value=\"{}\"> \
         To: <input type=\"date\" name=\"until\" value=\"{}\"> \
         <button type=\"submit\">Apply</button></form>",
        escape_html(filter.search.as_deref().unwrap_or("")),
        filter.since.map(|since| since.date_naive().to_string()).unwrap_or_default(),
        filter.until.map(last_included_day).map(|day| day.to_string()).unwrap_or_default(),
    );
}

/// `until` is exclusive, so a bound at midnight belongs to the day before.
fn last_included_day(until: DateTime<Utc>) -> NaiveDate {
    let at_midnight = until.num_seconds_from_midnight() == 0 && until.nanosecond() == 0;
    if at_midnight {
        (until - Duration::days(1)).date_naive()
    } else {
        until.date_naive()
    }
}

fn render_metrics(html: &mut String, stats: &PredictionStats) {
    let _ = write!(
        html,
        "<div class=\"metrics\">\
         <div class=\"metric\">Total Predictions<b>{}</b></div>\
         <div class=\"metric\">Positive<b>{} ({:.1}%)</b></div>\
         <div class=\"metric\">Negative<b>{} ({:.1}%)</b></div>\
         <div class=\"metric\">Avg Confidence<b>{:.2}%</b></div>\
         </div>",
        stats.total_predictions,
        stats.positive_count,
        stats.positive_percentage,
        stats.negative_count,
        stats.negative_percentage,
        stats.average_confidence * 100.0,
    );
}

fn render_distribution(html: &mut String, stats: &PredictionStats) {
    html.push_str("<h2>Sentiment Distribution</h2><div>");
    for (class, percentage) in [
        ("positive", stats.positive_percentage),
        ("negative", stats.negative_percentage),
    ] {
        let _ = write!(
            html,
            "<span class=\"bar {class}\" style=\"width:{percentage:.2}%\" title=\"{class} {percentage:.1}%\"></span>"
        );
    }
    html.push_str("</div>");
}

fn render_trend(html: &mut String, trend: &[TimeBucket]) {
    html.push_str("<h2>Predictions Over Time (hourly)</h2><table>");
    html.push_str("<tr><th>Hour (UTC)</th><th>Positive</th><th>Negative</th><th>Total</th></tr>");
    for bucket in trend {
        let _ = write!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            bucket.bucket_start.format("%Y-%m-%d %H:00"),
            bucket.counts.positive,
            bucket.counts.negative,
            bucket.counts.total()
        );
    }
    html.push_str("</table>");
}

fn render_histogram(html: &mut String, bins: &[ConfidenceBin]) {
    let tallest = bins
        .iter()
        .map(|bin| bin.counts.positive.max(bin.counts.negative))
        .max()
        .unwrap_or(0)
        .max(1);

    html.push_str("<h2>Confidence Distribution</h2><table>");
    html.push_str("<tr><th>Confidence</th><th>Positive</th><th>Negative</th></tr>");
    for bin in bins {
        let _ = write!(html, "<tr><td>{:.2}-{:.2}</td>", bin.lower, bin.upper);
        for (class, count) in [
            ("positive", bin.counts.positive),
            ("negative", bin.counts.negative),
        ] {
            let width = count as f64 / tallest as f64 * 100.0;
            let _ = write!(
                html,
                "<td><span class=\"bar {class}\" style=\"width:{width:.1}%\"></span> {count}</td>"
            );
        }
        html.push_str("</tr>");
    }
    html.push_str("</table>");
}

fn render_confidence(html: &mut String, summaries: &[ConfidenceSummary]) {
    html.push_str("<h2>Confidence by Sentiment</h2><table>");
    html.push_str(
        "<tr><th>Sentiment</th><th>Count</th><th>Mean</th><th>Min</th><th>Max</th></tr>",
    );
    for summary in summaries {
        let _ = write!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{:.1}%</td><td>{:.1}%</td><td>{:.1}%</td></tr>",
            summary.sentiment,
            summary.count,
            summary.mean * 100.0,
            summary.min * 100.0,
            summary.max * 100.0
        );
    }
    html.push_str("</table>");
}

fn render_hours(html: &mut String, hours: &[HourOfDayCounts]) {
    html.push_str("<h2>Predictions by Hour of Day (UTC)</h2><table>");
    html.push_str("<tr><th>Hour</th><th>Positive</th><th>Negative</th><th>Total</th></tr>");
    for entry in hours {
        let _ = write!(
            html,
            "<tr><td>{:02}:00</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            entry.hour,
            entry.counts.positive,
            entry.counts.negative,
            entry.counts.total()
        );
    }
    html.push_str("</table>");
}

fn render_recent(html: &mut String, recent: &[PredictionRecord]) {
    html.push_str("<h2>Recent Predictions</h2><table>");
    html.push_str("<tr><th>Time (UTC)</th><th>Text</th><th>Sentiment</th><th>Confidence</th></tr>");
    for record in recent {
        let _ = write!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{:.1}%</td></tr>",
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            escape_html(&record.text),
            record.sentiment,
            record.confidence * 100.0
        );
    }
    html.push_str("</table>");
}

fn render_export_links(html: &mut String, filter: &PredictionFilter) {
    let mut query = String::new();
    if let Some(sentiment) = filter.sentiment {
        let _ = write!(query, "&sentiment={sentiment}");
    }
    if let Some(search) = &filter.search {
        let _ = write!(query, "&search={}", urlencoding::encode(search));
    }
    for (key, bound) in [("since", filter.since), ("until", filter.until)] {
        if let Some(bound) = bound {
            let bound = bound.to_rfc3339_opts(SecondsFormat::Secs, true);
            let _ = write!(query, "&{key}={}", urlencoding::encode(&bound));
        }
    }
    let query = escape_html(&query);

    let _ = write!(
        html,
        "<h2>Export Data</h2><p>\
         <a href=\"/export?format=csv{query}\">Download CSV</a> | \
         <a href=\"/export?format=json{query}\">Download JSON</a></p>"
    );
}

pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::db::SentimentCounts;

    fn stats(positive: u64, negative: u64) -> PredictionStats {
        PredictionStats::from_parts(SentimentCounts { positive, negative }, 0.9)
    }

    fn data(filter: PredictionFilter, stats: PredictionStats) -> DashboardData {
        DashboardData {
            filter,
            stats,
            trend: Vec::new(),
            histogram: Vec::new(),
            hours: Vec::new(),
            confidence: Vec::new(),
            recent: Vec::new(),
        }
    }

    #[test]
    fn empty_store_shows_a_hint() {
        let html = render(&data(PredictionFilter::default(), stats(0, 0)));
        assert!(html.contains("No prediction data found"));
        assert!(!html.contains("Recent Predictions"));
    }

    #[test]
    fn renders_metrics_trend_and_filter_state() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap();
        let mut page = data(
            PredictionFilter {
                search: Some("\"quoted\" & more".into()),
                ..PredictionFilter::sentiment(Sentiment::Negative)
            },
            stats(1, 3),
        );
        page.trend = vec![TimeBucket {
            bucket_start: start,
            counts: SentimentCounts {
                positive: 1,
                negative: 3,
            },
        }];
        let html = render(&page);

        assert!(html.contains("<b>3 (75.0%)</b>"));
        assert!(html.contains("<td>2024-05-01 13:00</td><td>1</td><td>3</td><td>4</td>"));
        assert!(html.contains("<option value=\"Negative\" selected>"));
        assert!(html.contains("value=\"&quot;quoted&quot; &amp; more\""));
        assert!(html.contains("/export?format=csv&amp;sentiment=Negative&amp;search=%22quoted%22%20%26%20more"));
    }

    #[test]
    fn date_range_fills_inputs_and_export_links() {
        let filter = PredictionFilter {
            since: Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()),
            until: Some(Utc.with_ymd_and_hms(2024, 5, 4, 0, 0, 0).unwrap()),
            ..PredictionFilter::default()
        };
        let html = render(&data(filter, stats(2, 1)));

        assert!(html.contains("<input type=\"date\" name=\"since\" value=\"2024-05-01\">"));
        assert!(html.contains("<input type=\"date\" name=\"until\" value=\"2024-05-03\">"));
        assert!(html.contains(
            "/export?format=json&amp;since=2024-05-01T00%3A00%3A00Z&amp;until=2024-05-04T00%3A00%3A00Z"
        ));
    }

    #[test]
    fn renders_histogram_hours_and_confidence_summary() {
        let mut page = data(PredictionFilter::default(), stats(3, 1));
        page.histogram = vec![
            ConfidenceBin {
                lower: 0.9,
                upper: 0.95,
                counts: SentimentCounts { positive: 1, negative: 1 },
            },
            ConfidenceBin {
                lower: 0.95,
                upper: 1.0,
                counts: SentimentCounts { positive: 2, negative: 0 },
            },
        ];
        page.hours = (0..24u8)
            .map(|hour| HourOfDayCounts {
                hour,
                counts: SentimentCounts {
                    positive: u64::from(hour == 7) * 3,
                    negative: u64::from(hour == 7),
                },
            })
            .collect();
        page.confidence = vec![ConfidenceSummary {
            sentiment: Sentiment::Positive,
            count: 3,
            mean: 0.95,
            min: 0.9,
            max: 0.99,
        }];

        let html = render(&page);
        assert!(html.contains("Confidence Distribution"));
        assert!(html.contains("<td>0.95-1.00</td>"));
        assert!(html.contains("style=\"width:100.0%\"></span> 2</td>"));
        assert!(html.contains("<td>07:00</td><td>3</td><td>1</td><td>4</td>"));
        assert!(html.contains("<td>23:00</td><td>0</td><td>0</td><td>0</td>"));
        assert!(html.contains(
            "<td>Positive</td><td>3</td><td>95.0%</td><td>90.0%</td><td>99.0%</td>"
        ));
    }

    #[test]
    fn until_at_midnight_shows_the_previous_day() {
        let midnight = Utc.with_ymd_and_hms(2024, 5, 4, 0, 0, 0).unwrap();
        assert_eq!(last_included_day(midnight), NaiveDate::from_ymd_opt(2024, 5, 3).unwrap());
        let afternoon = Utc.with_ymd_and_hms(2024, 5, 4, 15, 0, 0).unwrap();
        assert_eq!(last_included_day(afternoon), NaiveDate::from_ymd_opt(2024, 5, 4).unwrap());
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(escape_html("<a href='x'>&</a>"), "&lt;a href=&#39;x&#39;&gt;&amp;&lt;/a&gt;");
    }
}
