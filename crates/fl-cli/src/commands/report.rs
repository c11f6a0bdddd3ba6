//! Report command for usage summaries.
//!
//! This module implements `fl report` for the daily, weekly and monthly
//! windows, with human-readable and JSON output.

use std::fmt::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Local, TimeZone, Utc};
use fl_client::UsageSource;
use fl_core::{
    Aggregates, FocusSplit, KeywordMatcher, ProductiveKeys, RankedShare, Summary, TimeFrame,
    UsageBatch, UsageRecord, aggregate, classify, filter_by_time_frame, summarize,
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::Config;
use crate::commands::backend_client;
use crate::commands::util::{parse_datetime, read_input};

/// Options for `fl report`.
#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub frame: TimeFrame,
    pub source: UsageSource,
    pub input: Option<PathBuf>,
    pub now: Option<String>,
    pub top: usize,
    pub json: bool,
}

/// Decides which subjects count as productive.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    /// Keys the backend lists as productive.
    pub allow_list: ProductiveKeys,
    /// Used only when neither record categories nor the allow-list say anything.
    pub keywords: KeywordMatcher,
}

impl Classifier {
    /// Backend categories first, then the allow-list, then keyword matching.
    pub fn productive_keys(
        &self,
        records: &[UsageRecord],
        aggregates: &Aggregates,
    ) -> ProductiveKeys {
        let categorized = records.iter().any(|r| r.category.is_some());
        if !categorized && self.allow_list.is_empty() {
            return self.keywords.productive_keys(aggregates);
        }

        let mut keys = ProductiveKeys::from_records(records);
        keys.extend(self.allow_list.clone());
        keys
    }
}

/// Computed report data.
#[derive(Debug)]
pub struct ReportData {
    pub generated_at: DateTime<Utc>,
    pub frame: TimeFrame,
    pub source: UsageSource,
    pub window_start: DateTime<FixedOffset>,
    pub window_end: DateTime<FixedOffset>,
    pub timezone: String,
    pub summary: Summary,
    pub focus: FocusSplit,
    pub top: Vec<RankedShare>,
}

// ========== Duration Formatting ==========

/// Formats seconds as "Xh Ym", "Xm", or "Xs" under a minute.
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{seconds}s");
    }
    let total_minutes = seconds / 60;
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;

    if hours >= 1 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

// ========== Progress Bar ==========

/// Generates a 10-character progress bar.
/// Values <5% of max get a single block for visibility.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn progress_bar(value: u64, max: u64) -> String {
    if max == 0 {
        return "░░░░░░░░░░".to_string();
    }

    let ratio = value as f64 / max as f64;
    let filled = if ratio < 0.05 && value > 0 {
        1
    } else {
        (ratio * 10.0).round().min(10.0) as usize
    };

    let empty = 10 - filled;
    format!("{}{}", "█".repeat(filled), "░".repeat(empty))
}

// ========== Report Generation ==========

/// Filters, aggregates and summarizes `records` for the window containing `now`.
pub fn generate_report_data<Tz: TimeZone>(
    records: &[UsageRecord],
    frame: TimeFrame,
    source: UsageSource,
    now: &DateTime<Tz>,
    classifier: &Classifier,
    top: usize,
) -> Result<ReportData> {
    let in_window = filter_by_time_frame(records, frame, now);
    debug!(
        frame = %frame,
        total = records.len(),
        in_window = in_window.len(),
        "filtered usage records"
    );

    let aggregates = aggregate(&in_window)?;
    let summary = summarize(&aggregates, in_window.len());
    let productive = classifier.productive_keys(&in_window, &aggregates);
    let focus = classify(&aggregates, &productive);

    let timezone = iana_time_zone::get_timezone().unwrap_or_else(|_| "UTC".to_string());

    Ok(ReportData {
        generated_at: now.with_timezone(&Utc),
        frame,
        source,
        window_start: frame.window_start(now).fixed_offset(),
        window_end: now.fixed_offset(),
        timezone,
        summary,
        focus,
        top: aggregates.top_by_time(top),
    })
}

/// Formats the window description for the report header.
fn format_window_description(data: &ReportData) -> String {
    let start = data.window_start.date_naive();
    match data.frame {
        // "Today, Wednesday, Mar 12, 2025"
        TimeFrame::Daily => format!("{}, {}", data.frame.label(), start.format("%A, %b %-d, %Y")),
        // "This week, since Sunday, Mar 9, 2025"
        TimeFrame::Weekly => format!(
            "{}, since {}",
            data.frame.label(),
            start.format("%A, %b %-d, %Y")
        ),
        // "This month, March 2025"
        TimeFrame::Monthly => format!("{}, {}", data.frame.label(), start.format("%B %Y")),
    }
}

/// Formats the human-readable report output.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "average session length is non-negative and far below u64::MAX"
)]
pub fn format_report(data: &ReportData) -> String {
    let mut output = String::new();

    // Header
    writeln!(output, "FOCUS REPORT: {}", format_window_description(data)).unwrap();
    writeln!(
        output,
        "Source: {} ({} records)",
        data.source, data.summary.total_record_count
    )
    .unwrap();

    if data.top.is_empty() {
        writeln!(output).unwrap();
        writeln!(
            output,
            "No usage recorded {}.",
            data.frame.label().to_lowercase()
        )
        .unwrap();
        writeln!(output).unwrap();
        writeln!(
            output,
            "Hint: Check that the tracker is running and 'backend_url' points at the backend."
        )
        .unwrap();
        return output;
    }

    // SUMMARY section
    let summary = &data.summary;
    let average = summary.average_session_duration_seconds.round() as u64;
    writeln!(output).unwrap();
    writeln!(output, "SUMMARY").unwrap();
    writeln!(output, "───────").unwrap();
    writeln!(
        output,
        "Total time:       {}",
        format_duration(summary.total_time_seconds)
    )
    .unwrap();
    writeln!(output, "Average session:  {}", format_duration(average)).unwrap();
    writeln!(output, "Most visited:     {}", summary.most_visited_key).unwrap();
    writeln!(output, "Most time spent:  {}", summary.most_time_spent_key).unwrap();

    // FOCUS section
    let focus = &data.focus;
    writeln!(output).unwrap();
    writeln!(output, "FOCUS").unwrap();
    writeln!(output, "─────").unwrap();
    writeln!(
        output,
        "Productive:       {}",
        format_duration(focus.productive_seconds)
    )
    .unwrap();
    writeln!(
        output,
        "Non-productive:   {}",
        format_duration(focus.non_productive_seconds)
    )
    .unwrap();
    writeln!(
        output,
        "Focus score:      {}% ({})",
        focus.focus_score_percent,
        focus.rating().label()
    )
    .unwrap();

    // TOP SUBJECTS section, bars scaled to the largest slice
    let max_total = data
        .top
        .iter()
        .map(|s| s.total_duration_seconds)
        .max()
        .unwrap_or(0);
    writeln!(output).unwrap();
    writeln!(output, "TOP SUBJECTS").unwrap();
    writeln!(output, "────────────").unwrap();
    for share in &data.top {
        let duration = format_duration(share.total_duration_seconds);
        let bar = progress_bar(share.total_duration_seconds, max_total);
        writeln!(output, "{:<24}{duration:>8}  {bar}", share.label).unwrap();
    }

    output
}

// ========== JSON Output ==========

/// JSON report structure.
#[derive(Debug, Serialize)]
pub struct JsonReport<'a> {
    pub generated_at: String,
    pub timezone: &'a str,
    pub window: JsonWindow,
    pub source: &'a str,
    pub summary: &'a Summary,
    pub focus: JsonFocus,
    pub top: &'a [RankedShare],
}

#[derive(Debug, Serialize)]
pub struct JsonWindow {
    #[serde(rename = "type")]
    pub frame: TimeFrame,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Serialize)]
pub struct JsonFocus {
    pub productive_seconds: u64,
    pub non_productive_seconds: u64,
    pub focus_score_percent: u8,
    pub rating: &'static str,
}

/// Formats report data as JSON.
pub fn format_report_json(data: &ReportData) -> Result<String> {
    let report = JsonReport {
        generated_at: data.generated_at.to_rfc3339(),
        timezone: &data.timezone,
        window: JsonWindow {
            frame: data.frame,
            start: data.window_start.to_rfc3339(),
            end: data.window_end.to_rfc3339(),
        },
        source: data.source.as_str(),
        summary: &data.summary,
        focus: JsonFocus {
            productive_seconds: data.focus.productive_seconds,
            non_productive_seconds: data.focus.non_productive_seconds,
            focus_score_percent: data.focus.focus_score_percent,
            rating: data.focus.rating().label(),
        },
        top: &data.top,
    };

    Ok(serde_json::to_string_pretty(&report)?)
}

// ========== Public Interface ==========

/// Keeps the usable records, warning about each one that was dropped.
fn accept(batch: UsageBatch) -> Vec<UsageRecord> {
    for rejected in &batch.rejected {
        warn!(
            position = rejected.position,
            subject_key = %rejected.subject_key,
            reason = %rejected.defect,
            "skipping usage record"
        );
        eprintln!("warning: skipped {rejected}");
    }
    batch.records
}

/// Loads records from `--input` or the backend, along with the classifier.
async fn load(config: &Config, options: &ReportOptions) -> Result<(Vec<UsageRecord>, Classifier)> {
    let mut classifier = Classifier {
        allow_list: ProductiveKeys::default(),
        keywords: KeywordMatcher::new(&config.productive_keywords),
    };

    if let Some(path) = &options.input {
        let body = read_input(path)?;
        let batch = fl_client::parse_usage(&body)
            .with_context(|| format!("invalid usage records in {}", path.display()))?;
        return Ok((accept(batch), classifier));
    }

    let client = backend_client(config)?;
    let records = client
        .fetch_usage(options.source)
        .await
        .map(accept)
        .with_context(|| format!("failed to fetch {} usage", options.source))?;

    if let Some(path) = &config.productive_keys_path {
        match client.fetch_productive_keys(path).await {
            Ok(keys) => classifier.allow_list = keys,
            Err(err) => warn!(error = %err, "productive keys unavailable, using keywords"),
        }
    }

    Ok((records, classifier))
}

/// Runs the report command.
pub async fn run(config: &Config, options: &ReportOptions) -> Result<()> {
    let now = match &options.now {
        Some(value) => parse_datetime(value)?,
        None => Utc::now(),
    }
    .with_timezone(&Local);

    let (records, classifier) = load(config, options).await?;
    let data = generate_report_data(
        &records,
        options.frame,
        options.source,
        &now,
        &classifier,
        options.top,
    )?;

    if options.json {
        let output = format_report_json(&data)?;
        println!("{output}");
    } else {
        let output = format_report(&data);
        print!("{output}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use fl_core::{ProductivityCategory, SubjectKey};
    use insta::assert_snapshot;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn record(key: &str, timestamp: &str, seconds: i64) -> UsageRecord {
        UsageRecord::new(SubjectKey::new(key).unwrap(), at(timestamp), seconds)
    }

    fn sample_records() -> Vec<UsageRecord> {
        vec![
            record("Slack", "2025-03-11T20:00:00Z", 900),
            record("Terminal", "2025-03-12T09:00:00Z", 1800),
            record("github.com", "2025-03-12T10:00:00Z", 1200),
            record("Spotify", "2025-03-12T11:00:00Z", 600),
            record("Terminal", "2025-03-12T12:00:00Z", 600),
            record("YouTube", "2025-03-12T13:00:00Z", 300),
        ]
    }

    fn report(records: &[UsageRecord], frame: TimeFrame, top: usize) -> ReportData {
        let now = at("2025-03-12T15:30:00Z");
        let mut data = generate_report_data(
            records,
            frame,
            UsageSource::Apps,
            &now,
            &Classifier::default(),
            top,
        )
        .unwrap();
        data.timezone = "UTC".to_string();
        data
    }

    // ========== Formatting Tests ==========

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(59), "59s");
        assert_eq!(format_duration(60), "1m");
        assert_eq!(format_duration(3599), "59m");
        assert_eq!(format_duration(3600), "1h 0m");
        assert_eq!(format_duration(5400), "1h 30m");
    }

    #[test]
    fn test_progress_bar() {
        assert_eq!(progress_bar(10, 10), "██████████");
        assert_eq!(progress_bar(5, 10), "█████░░░░░");
        assert_eq!(progress_bar(0, 10), "░░░░░░░░░░");
        // Under 5% still shows one block
        assert_eq!(progress_bar(1, 100), "█░░░░░░░░░");
        assert_eq!(progress_bar(0, 0), "░░░░░░░░░░");
    }

    // ========== Report Generation Tests ==========

    #[test]
    fn test_daily_window_excludes_yesterday() {
        let data = report(&sample_records(), TimeFrame::Daily, 5);
        assert_eq!(data.summary.total_record_count, 5);
        assert_eq!(data.summary.total_time_seconds, 4500);
        assert_eq!(data.summary.most_visited_key, "Terminal");
        assert_eq!(data.window_start, at("2025-03-12T00:00:00Z").fixed_offset());
    }

    #[test]
    fn test_weekly_window_includes_yesterday() {
        let data = report(&sample_records(), TimeFrame::Weekly, 5);
        assert_eq!(data.summary.total_record_count, 6);
        assert_eq!(data.summary.total_time_seconds, 5400);
        // Mar 12, 2025 is a Wednesday; the week starts on Sunday
        assert_eq!(data.window_start, at("2025-03-09T00:00:00Z").fixed_offset());
    }

    #[test]
    fn test_negative_duration_fails_the_report() {
        let records = vec![record("Terminal", "2025-03-12T09:00:00Z", -5)];
        let now = at("2025-03-12T15:30:00Z");
        let err = generate_report_data(
            &records,
            TimeFrame::Daily,
            UsageSource::Apps,
            &now,
            &Classifier::default(),
            5,
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid duration"));
    }

    #[test]
    fn test_backend_categories_override_keywords() {
        // "Terminal" would match a keyword, but the backend says otherwise.
        let records = vec![
            record("Terminal", "2025-03-12T09:00:00Z", 600)
                .with_category(ProductivityCategory::Distracting),
            record("Linear", "2025-03-12T10:00:00Z", 1800)
                .with_category(ProductivityCategory::Productive),
        ];
        let data = report(&records, TimeFrame::Daily, 5);
        assert_eq!(data.focus.productive_seconds, 1800);
        assert_eq!(data.focus.non_productive_seconds, 600);
        assert_eq!(data.focus.focus_score_percent, 75);
    }

    #[test]
    fn test_allow_list_adds_to_categories() {
        let records = vec![
            record("Linear", "2025-03-12T09:00:00Z", 600),
            record("Spotify", "2025-03-12T10:00:00Z", 600),
        ];
        let aggregates = aggregate(&records).unwrap();
        let classifier = Classifier {
            allow_list: ProductiveKeys::new(["Linear"]),
            keywords: KeywordMatcher::default(),
        };
        let keys = classifier.productive_keys(&records, &aggregates);
        assert!(keys.contains("Linear"));
        assert!(!keys.contains("Spotify"));
    }

    // ========== Output Tests ==========

    #[test]
    fn test_report_daily() {
        let data = report(&sample_records(), TimeFrame::Daily, 3);
        assert_snapshot!(format_report(&data), @r"
        FOCUS REPORT: Today, Wednesday, Mar 12, 2025
        Source: apps (5 records)

        SUMMARY
        ───────
        Total time:       1h 15m
        Average session:  15m
        Most visited:     Terminal
        Most time spent:  Terminal

        FOCUS
        ─────
        Productive:       1h 0m
        Non-productive:   15m
        Focus score:      80% (Excellent)

        TOP SUBJECTS
        ────────────
        Terminal                     40m  ██████████
        github.com                   20m  █████░░░░░
        Spotify                      10m  ███░░░░░░░
        Others                        5m  █░░░░░░░░░
        ");
    }

    #[test]
    fn test_report_empty_window() {
        let data = report(&[], TimeFrame::Weekly, 5);
        assert_snapshot!(format_report(&data), @r"
        FOCUS REPORT: This week, since Sunday, Mar 9, 2025
        Source: apps (0 records)

        No usage recorded this week.

        Hint: Check that the tracker is running and 'backend_url' points at the backend.
        ");
    }

    #[test]
    fn test_report_monthly_header() {
        let data = report(&sample_records(), TimeFrame::Monthly, 5);
        let output = format_report(&data);
        assert!(output.starts_with("FOCUS REPORT: This month, March 2025\n"));
    }

    #[test]
    fn test_report_json_output() {
        let data = report(&sample_records(), TimeFrame::Daily, 2);
        let json: serde_json::Value =
            serde_json::from_str(&format_report_json(&data).unwrap()).unwrap();

        assert_eq!(json["timezone"], "UTC");
        assert_eq!(json["source"], "apps");
        assert_eq!(json["window"]["type"], "daily");
        assert_eq!(json["window"]["start"], "2025-03-12T00:00:00+00:00");
        assert_eq!(json["window"]["end"], "2025-03-12T15:30:00+00:00");
        assert_eq!(json["summary"]["total_time_seconds"], 4500);
        assert_eq!(json["summary"]["average_session_duration_seconds"], 900.0);
        assert_eq!(json["focus"]["focus_score_percent"], 80);
        assert_eq!(json["focus"]["rating"], "Excellent");

        let top = json["top"].as_array().unwrap();
        assert_eq!(top.len(), 3);
        assert_eq!(top[2]["label"], "Others");
        assert_eq!(top[2]["total_duration_seconds"], 900);
    }
}
