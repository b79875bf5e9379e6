//! Core library for the `sensors` host.
//!
//! This crate defines:
//! - Configuration sections and their validation
//! - A time-based throttle that keeps the last good payload
//! - Vendor providers (OpenWeatherMap, Google Calendar) and OAuth credentials
//! - Entities exposing cached data to a host, and the host that ticks them
//!
//! It is used by `sensors-cli`, but can also be embedded by other binaries or services.

pub mod auth;
pub mod condition;
pub mod config;
pub mod entity;
pub mod error;
pub mod events;
pub mod host;
pub mod logging;
pub mod model;
pub mod provider;
pub mod throttle;
pub mod weather;

pub use config::{Config, EventsSection, ForecastMode, HomeSection, UnitSystem, WeatherSection};
pub use entity::{Entity, EntitySnapshot, STATE_UNKNOWN};
pub use error::{ConfigError, SetupError};
pub use host::Host;
pub use model::{CalendarEvent, Coordinates, EventTime, ForecastEntry, Observation};
pub use provider::{CalendarProvider, WeatherProvider};
pub use throttle::{Clock, ManualClock, Refresh, SystemClock, Throttled};
