use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A point on the map, in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Coordinates rounded to 5 decimals (roughly one metre).
    pub fn rounded(self) -> Self {
        Self {
            latitude: round5(self.latitude),
            longitude: round5(self.longitude),
        }
    }
}

fn round5(v: f64) -> f64 {
    (v * 100_000.0).round() / 100_000.0
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.5},{:.5}", self.latitude, self.longitude)
    }
}

/// Current conditions as reported by the weather service. Always metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub location_name: String,
    pub condition_code: Option<u16>,
    pub description: Option<String>,
    pub temperature_c: f64,
    pub pressure_hpa: f64,
    pub humidity_pct: u8,
    pub wind_speed_mps: f64,
    pub wind_bearing_deg: Option<f64>,
    pub observation_time: DateTime<Utc>,
}

/// One forecast slot (3-hourly or daily depending on the mode). Always metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastEntry {
    pub time: DateTime<Utc>,
    pub condition_code: Option<u16>,
    pub temperature_c: f64,
    pub temp_low_c: Option<f64>,
    pub precipitation_mm: Option<f64>,
    pub wind_speed_mps: Option<f64>,
    pub wind_bearing_deg: Option<f64>,
}

/// Start or end of a calendar event. All-day events only carry a date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventTime {
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventTime::DateTime(dt) => f.write_str(&dt.to_rfc3339()),
            EventTime::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: Option<String>,
    pub start: EventTime,
    pub end: Option<EventTime>,
    pub location: Option<String>,
    pub html_link: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_round_to_five_decimals() {
        let c = Coordinates::new(52.370_216_7, -4.895_167_9).rounded();
        assert_eq!(c.latitude, 52.37022);
        assert_eq!(c.longitude, -4.89517);
    }

    #[test]
    fn event_time_display() {
        let date = EventTime::Date(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
        assert_eq!(date.to_string(), "2024-03-15");

        let dt = EventTime::DateTime("2024-03-15T10:00:00Z".parse().unwrap());
        assert_eq!(dt.to_string(), "2024-03-15T10:00:00+00:00");
    }
}
