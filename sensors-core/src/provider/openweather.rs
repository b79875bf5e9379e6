use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, de::DeserializeOwned};
use tracing::debug;

use crate::{
    config::ForecastMode,
    model::{Coordinates, ForecastEntry, Observation},
    provider::{is_blank, truncate_body, unix_to_utc},
};

use super::WeatherProvider;

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org";

/// Days requested from the daily forecast endpoint.
const DAILY_FORECAST_DAYS: u8 = 15;

/// 3-hour slots per day; `freedaily` keeps one of every eight.
const SLOTS_PER_DAY: usize = 8;

#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    base_url: String,
    http: Client,
}

impl OpenWeatherProvider {
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Point the provider at another host (a proxy, or a mock server).
    pub fn with_base_url(api_key: String, base_url: impl Into<String>) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(anyhow!("OpenWeatherMap API key is empty"));
        }

        let http = Client::builder()
            .user_agent(concat!("sensors/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client for OpenWeatherMap")?;

        Ok(Self {
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    /// GET an endpoint keyed by coordinates. A 404 or a blank body is an
    /// empty answer rather than an error.
    async fn get_json<T: DeserializeOwned>(
        &self,
        what: &str,
        path: &str,
        at: Coordinates,
        extra: &[(&str, String)],
    ) -> Result<Option<T>> {
        let url = format!("{}{}", self.base_url, path);

        let res = self
            .http
            .get(&url)
            .query(&[
                ("lat", at.latitude.to_string()),
                ("lon", at.longitude.to_string()),
                ("appid", self.api_key.clone()),
                ("units", "metric".to_string()),
            ])
            .query(extra)
            .send()
            .await
            .with_context(|| format!("Failed to send request to OpenWeatherMap ({what})"))?;

        let status = res.status();
        let body = res
            .text()
            .await
            .with_context(|| format!("Failed to read OpenWeatherMap {what} response body"))?;

        if status == StatusCode::NOT_FOUND {
            debug!(what, "OpenWeatherMap has no data for {at}");
            return Ok(None);
        }

        if !status.is_success() {
            return Err(anyhow!(
                "OpenWeatherMap {} request failed with status {}: {}",
                what,
                status,
                truncate_body(&body),
            ));
        }

        if is_blank(&body) {
            return Ok(None);
        }

        let parsed = serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse OpenWeatherMap {what} JSON"))?;

        Ok(Some(parsed))
    }

    async fn fetch_three_hourly(&self, at: Coordinates) -> Result<Option<Vec<ForecastEntry>>> {
        let Some(parsed) = self
            .get_json::<OwForecastResponse>("forecast", "/data/2.5/forecast", at, &[])
            .await?
        else {
            return Ok(None);
        };

        let entries: Vec<ForecastEntry> = parsed.list.into_iter().map(ForecastEntry::from).collect();
        Ok(non_empty(entries))
    }

    async fn fetch_daily(&self, at: Coordinates) -> Result<Option<Vec<ForecastEntry>>> {
        let Some(parsed) = self
            .get_json::<OwDailyResponse>(
                "daily forecast",
                "/data/2.5/forecast/daily",
                at,
                &[("cnt", DAILY_FORECAST_DAYS.to_string())],
            )
            .await?
        else {
            return Ok(None);
        };

        let entries: Vec<ForecastEntry> = parsed.list.into_iter().map(ForecastEntry::from).collect();
        Ok(non_empty(entries))
    }
}

fn non_empty(entries: Vec<ForecastEntry>) -> Option<Vec<ForecastEntry>> {
    if entries.is_empty() { None } else { Some(entries) }
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
    async fn current(&self, at: Coordinates) -> Result<Option<Observation>> {
        let Some(parsed) = self
            .get_json::<OwCurrentResponse>("current weather", "/data/2.5/weather", at, &[])
            .await?
        else {
            return Ok(None);
        };

        let observation_time = unix_to_utc(parsed.dt).unwrap_or_else(Utc::now);
        let weather = parsed.weather.first();

        Ok(Some(Observation {
            location_name: parsed.name,
            condition_code: weather.map(|w| w.id),
            description: weather.map(|w| w.description.clone()),
            temperature_c: parsed.main.temp,
            pressure_hpa: parsed.main.pressure,
            humidity_pct: parsed.main.humidity,
            wind_speed_mps: parsed.wind.speed,
            wind_bearing_deg: parsed.wind.deg,
            observation_time,
        }))
    }

    async fn forecast(
        &self,
        at: Coordinates,
        mode: ForecastMode,
    ) -> Result<Option<Vec<ForecastEntry>>> {
        match mode {
            ForecastMode::Hourly => self.fetch_three_hourly(at).await,
            ForecastMode::Daily => self.fetch_daily(at).await,
            ForecastMode::FreeDaily => Ok(self
                .fetch_three_hourly(at)
                .await?
                .map(|entries| entries.into_iter().step_by(SLOTS_PER_DAY).collect())),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
    pressure: f64,
    humidity: u8,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    id: u16,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Default, Deserialize)]
struct OwWind {
    speed: f64,
    deg: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    #[serde(default)]
    name: String,
    dt: i64,
    main: OwMain,
    #[serde(default)]
    weather: Vec<OwWeather>,
    #[serde(default)]
    wind: OwWind,
}

#[derive(Debug, Default, Deserialize)]
struct OwVolume {
    #[serde(rename = "3h")]
    three_hours: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwForecastEntry {
    dt: i64,
    main: OwMain,
    #[serde(default)]
    weather: Vec<OwWeather>,
    wind: Option<OwWind>,
    rain: Option<OwVolume>,
    snow: Option<OwVolume>,
}

#[derive(Debug, Deserialize)]
struct OwForecastResponse {
    #[serde(default)]
    list: Vec<OwForecastEntry>,
}

#[derive(Debug, Deserialize)]
struct OwDailyTemp {
    min: f64,
    max: f64,
}

#[derive(Debug, Deserialize)]
struct OwDailyEntry {
    dt: i64,
    temp: OwDailyTemp,
    #[serde(default)]
    weather: Vec<OwWeather>,
    speed: Option<f64>,
    deg: Option<f64>,
    rain: Option<f64>,
    snow: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwDailyResponse {
    #[serde(default)]
    list: Vec<OwDailyEntry>,
}

fn sum_volumes(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0.0) + b.unwrap_or(0.0)),
    }
}

impl From<OwForecastEntry> for ForecastEntry {
    fn from(e: OwForecastEntry) -> Self {
        let precipitation = sum_volumes(
            e.rain.and_then(|r| r.three_hours),
            e.snow.and_then(|s| s.three_hours),
        );

        ForecastEntry {
            time: unix_to_utc(e.dt).unwrap_or_else(Utc::now),
            condition_code: e.weather.first().map(|w| w.id),
            temperature_c: e.main.temp,
            temp_low_c: None,
            precipitation_mm: precipitation,
            wind_speed_mps: e.wind.as_ref().map(|w| w.speed),
            wind_bearing_deg: e.wind.and_then(|w| w.deg),
        }
    }
}

impl From<OwDailyEntry> for ForecastEntry {
    fn from(e: OwDailyEntry) -> Self {
        ForecastEntry {
            time: unix_to_utc(e.dt).unwrap_or_else(Utc::now),
            condition_code: e.weather.first().map(|w| w.id),
            temperature_c: e.temp.max,
            temp_low_c: Some(e.temp.min),
            precipitation_mm: sum_volumes(e.rain, e.snow),
            wind_speed_mps: e.speed,
            wind_bearing_deg: e.deg,
        }
    }
}
