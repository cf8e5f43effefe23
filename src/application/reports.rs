use crate::domain::models::{ChartPoint, EmployeeWorkDetail, ReportPeriod};
use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReportSummary {
    pub total_hours: f64,
    pub average_hours: f64,
    pub worked_days: usize,
}

/// Buckets per-day work into one point per day of the requested week or month.
pub fn chart_series(detail: &EmployeeWorkDetail, period: ReportPeriod) -> Vec<ChartPoint> {
    let mut seconds_by_day: HashMap<NaiveDate, u64> = HashMap::new();
    for day in &detail.days {
        let entry = seconds_by_day.entry(day.date).or_default();
        *entry = entry.saturating_add(day.seconds);
    }

    period_days(period)
        .into_iter()
        .map(|date| {
            let seconds = seconds_by_day.get(&date).copied().unwrap_or(0);
            ChartPoint {
                label: day_label(date, period),
                date,
                hours: round_tenth(seconds as f64 / 3600.0),
            }
        })
        .collect()
}

pub fn summarize(series: &[ChartPoint]) -> ReportSummary {
    let total_hours = round_tenth(series.iter().map(|point| point.hours).sum());
    let denom = if series.is_empty() { 1.0 } else { series.len() as f64 };
    ReportSummary {
        total_hours,
        average_hours: round_tenth(total_hours / denom),
        worked_days: series.iter().filter(|point| point.hours > 0.0).count(),
    }
}

pub fn period_days(period: ReportPeriod) -> Vec<NaiveDate> {
    match period {
        ReportPeriod::Week(anchor) => {
            let start = week_start(anchor);
            (0..7).map(|offset| start + Duration::days(offset)).collect()
        }
        ReportPeriod::Month(anchor) => {
            let Some(first) = anchor.with_day(1) else {
                return Vec::new();
            };
            first
                .iter_days()
                .take_while(|date| date.month() == first.month())
                .collect()
        }
    }
}

fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

fn day_label(date: NaiveDate, period: ReportPeriod) -> String {
    match period {
        ReportPeriod::Week(_) => date.format("%a").to_string(),
        ReportPeriod::Month(_) => date.day().to_string(),
    }
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
