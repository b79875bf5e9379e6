//! OpenWeatherMap weather platform.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    condition::condition_for_code,
    config::{ForecastMode, HomeSection, UnitSystem, WeatherPlatformConfig, WeatherSection},
    entity::{Entity, STATE_UNKNOWN, or_unknown},
    error::SetupError,
    host::Host,
    model::{Coordinates, ForecastEntry, Observation},
    provider::{OpenWeatherProvider, WeatherProvider},
    throttle::{Refresh, Throttled},
};

pub const PLATFORM: &str = "weather";
pub const ATTRIBUTION: &str = "Data provided by OpenWeatherMap";

pub const MIN_TIME_BETWEEN_UPDATES: Duration = Duration::from_secs(10 * 60);
pub const MIN_TIME_BETWEEN_FORECAST_UPDATES: Duration = Duration::from_secs(30 * 60);

const HPA_TO_INHG: f64 = 0.029_529_983_071_445;
const MPS_TO_KMH: f64 = 3.6;
const MPS_TO_MPH: f64 = 2.236_936;

/// Validate the `[weather]` section, connect to OpenWeatherMap and register
/// one weather entity with the host.
pub async fn setup_platform(host: &mut Host, section: &WeatherSection) -> Result<(), SetupError> {
    let config = section
        .validate(host.home())
        .map_err(|e| SetupError::config(PLATFORM, e).logged())?;

    let provider = OpenWeatherProvider::new(config.api_key.clone())
        .map_err(|e| SetupError::connect("OpenWeatherMap", e).logged())?;

    setup_platform_with(host, config, Arc::new(provider)).await;
    Ok(())
}

/// Register a weather entity backed by an already constructed provider.
pub async fn setup_platform_with(
    host: &mut Host,
    config: WeatherPlatformConfig,
    provider: Arc<dyn WeatherProvider>,
) {
    let data = WeatherData::new(provider, config.coordinates, config.mode);
    let entity = WeatherEntity::new(config.name, data, config.units);
    host.add_entities(vec![Box::new(entity)], true).await;
}

/// Validate without a host, e.g. before writing a config file.
pub fn check_section(section: &WeatherSection, home: &HomeSection) -> Result<(), SetupError> {
    section
        .validate(home)
        .map(|_| ())
        .map_err(|e| SetupError::config(PLATFORM, e))
}

/// Current conditions and forecast, each on its own throttle, sharing one
/// provider handle.
#[derive(Debug)]
pub struct WeatherData {
    provider: Arc<dyn WeatherProvider>,
    coordinates: Coordinates,
    mode: ForecastMode,
    current: Throttled<Observation>,
    forecast: Throttled<Vec<ForecastEntry>>,
}

impl WeatherData {
    pub fn new(provider: Arc<dyn WeatherProvider>, coordinates: Coordinates, mode: ForecastMode) -> Self {
        Self {
            provider,
            coordinates,
            mode,
            current: Throttled::new("weather", MIN_TIME_BETWEEN_UPDATES),
            forecast: Throttled::new("forecast", MIN_TIME_BETWEEN_FORECAST_UPDATES),
        }
    }

    pub fn coordinates(&self) -> Coordinates {
        self.coordinates
    }

    pub fn mode(&self) -> ForecastMode {
        self.mode
    }

    pub async fn update(&mut self, now: Instant) -> Refresh {
        let provider = &self.provider;
        let at = self.coordinates;
        self.current.update(now, || provider.current(at)).await
    }

    pub async fn update_forecast(&mut self, now: Instant) -> Refresh {
        let provider = &self.provider;
        let (at, mode) = (self.coordinates, self.mode);
        self.forecast.update(now, || provider.forecast(at, mode)).await
    }

    pub fn observation(&self) -> Option<&Observation> {
        self.current.payload()
    }

    pub fn forecast(&self) -> Option<&[ForecastEntry]> {
        self.forecast.payload().map(Vec::as_slice)
    }
}

/// One forecast slot as the host displays it, already in display units.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastView {
    pub datetime: String,
    pub temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub templow: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precipitation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_bearing: Option<f64>,
}

#[derive(Debug)]
pub struct WeatherEntity {
    name: String,
    data: WeatherData,
    units: UnitSystem,
}

impl WeatherEntity {
    pub fn new(name: String, data: WeatherData, units: UnitSystem) -> Self {
        Self { name, data, units }
    }

    pub fn data(&self) -> &WeatherData {
        &self.data
    }

    pub fn condition(&self) -> Option<&'static str> {
        self.data.observation()?.condition_code.and_then(condition_for_code)
    }

    pub fn temperature(&self) -> Option<f64> {
        self.data.observation().map(|o| self.convert_temperature(o.temperature_c))
    }

    pub fn pressure(&self) -> Option<f64> {
        self.data.observation().map(|o| match self.units {
            UnitSystem::Metric => o.pressure_hpa,
            UnitSystem::Imperial => round2(o.pressure_hpa * HPA_TO_INHG),
        })
    }

    pub fn humidity(&self) -> Option<u8> {
        self.data.observation().map(|o| o.humidity_pct)
    }

    pub fn wind_speed(&self) -> Option<f64> {
        self.data.observation().map(|o| self.convert_speed(o.wind_speed_mps))
    }

    pub fn wind_bearing(&self) -> Option<f64> {
        self.data.observation()?.wind_bearing_deg
    }

    pub fn forecast(&self) -> Option<Vec<ForecastView>> {
        let entries = self.data.forecast()?;
        Some(
            entries
                .iter()
                .map(|e| ForecastView {
                    datetime: e.time.to_rfc3339(),
                    temperature: self.convert_temperature(e.temperature_c),
                    templow: e.temp_low_c.map(|t| self.convert_temperature(t)),
                    precipitation: e.precipitation_mm.map(round2),
                    condition: e.condition_code.and_then(condition_for_code).map(String::from),
                    wind_speed: e.wind_speed_mps.map(|s| self.convert_speed(s)),
                    wind_bearing: e.wind_bearing_deg,
                })
                .collect(),
        )
    }

    pub fn temperature_unit(&self) -> &'static str {
        match self.units {
            UnitSystem::Metric => "°C",
            UnitSystem::Imperial => "°F",
        }
    }

    pub fn pressure_unit(&self) -> &'static str {
        match self.units {
            UnitSystem::Metric => "hPa",
            UnitSystem::Imperial => "inHg",
        }
    }

    pub fn wind_speed_unit(&self) -> &'static str {
        match self.units {
            UnitSystem::Metric => "km/h",
            UnitSystem::Imperial => "mph",
        }
    }

    fn convert_temperature(&self, celsius: f64) -> f64 {
        match self.units {
            UnitSystem::Metric => celsius,
            UnitSystem::Imperial => round2(celsius * 9.0 / 5.0 + 32.0),
        }
    }

    fn convert_speed(&self, mps: f64) -> f64 {
        match self.units {
            UnitSystem::Metric => round2(mps * MPS_TO_KMH),
            UnitSystem::Imperial => round2(mps * MPS_TO_MPH),
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[async_trait]
impl Entity for WeatherEntity {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> String {
        self.condition().unwrap_or(STATE_UNKNOWN).to_string()
    }

    fn attributes(&self) -> Map<String, Value> {
        let mut attrs = Map::new();
        attrs.insert("temperature".into(), or_unknown(self.temperature()));
        attrs.insert("temperature_unit".into(), self.temperature_unit().into());
        attrs.insert("pressure".into(), or_unknown(self.pressure()));
        attrs.insert("pressure_unit".into(), self.pressure_unit().into());
        attrs.insert("humidity".into(), or_unknown(self.humidity()));
        attrs.insert("wind_speed".into(), or_unknown(self.wind_speed()));
        attrs.insert("wind_speed_unit".into(), self.wind_speed_unit().into());
        attrs.insert("wind_bearing".into(), or_unknown(self.wind_bearing()));
        attrs.insert("forecast".into(), or_unknown(self.forecast()));
        attrs.insert("attribution".into(), ATTRIBUTION.into());
        attrs
    }

    async fn update(&mut self, now: Instant) {
        self.data.update(now).await;
        self.data.update_forecast(now).await;
    }
}
