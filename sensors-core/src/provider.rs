//! Vendor boundary: the services the platforms poll.
//!
//! Every fetch returns `Ok(None)` when the vendor answered but had nothing to
//! give, and `Err(_)` when the call itself failed. Pollers treat both as "keep
//! the cached payload" but log them at different levels.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;

use crate::{
    config::ForecastMode,
    model::{CalendarEvent, Coordinates, ForecastEntry, Observation},
};

pub mod google;
pub mod openweather;

pub use google::GoogleCalendarProvider;
pub use openweather::OpenWeatherProvider;

#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    async fn current(&self, at: Coordinates) -> anyhow::Result<Option<Observation>>;

    async fn forecast(
        &self,
        at: Coordinates,
        mode: ForecastMode,
    ) -> anyhow::Result<Option<Vec<ForecastEntry>>>;
}

#[async_trait]
pub trait CalendarProvider: Send + Sync + Debug {
    /// Upcoming single (expanded) events starting at or after `time_min`,
    /// ordered by start time.
    async fn upcoming_events(
        &self,
        calendar_id: &str,
        time_min: DateTime<Utc>,
        max_results: u32,
    ) -> anyhow::Result<Option<Vec<CalendarEvent>>>;
}

pub(crate) fn unix_to_utc(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
}

pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    } else {
        body.to_string()
    }
}

/// A body the vendor sent with nothing in it.
pub(crate) fn is_blank(body: &str) -> bool {
    let trimmed = body.trim();
    trimmed.is_empty() || trimmed == "null"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_long_body() {
        let body = "x".repeat(500);
        let out = truncate_body(&body);
        assert_eq!(out.len(), 203);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let body = format!("{}é{}", "a".repeat(199), "b".repeat(50));
        let out = truncate_body(&body);
        assert!(out.starts_with(&"a".repeat(199)));
        assert!(out.ends_with("..."));
    }

    #[test]
    fn blank_bodies() {
        assert!(is_blank(""));
        assert!(is_blank("  \n"));
        assert!(is_blank("null"));
        assert!(!is_blank("{}"));
    }

    #[test]
    fn unix_timestamps() {
        let dt = unix_to_utc(1_710_496_800).unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-03-15T10:00:00+00:00");
    }
}
