//! Google Calendar upcoming-events platform.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value, json};

use crate::{
    auth::{Authorizer, CredentialProvider, GoogleCredentials, GoogleOAuth, TokenStore},
    config::{EventsPlatformConfig, EventsSection},
    entity::{Entity, STATE_UNKNOWN, or_unknown},
    error::SetupError,
    host::Host,
    model::CalendarEvent,
    provider::{CalendarProvider, GoogleCalendarProvider},
    throttle::{Refresh, Throttled},
};

pub const PLATFORM: &str = "events";
pub const ICON: &str = "mdi:timelapse";
pub const STATE_NO_EVENTS: &str = "No events";
const UNTITLED: &str = "(no title)";

pub const MIN_TIME_BETWEEN_UPDATES: Duration = Duration::from_secs(10 * 60);

/// Validate the `[events]` section, make sure usable Google credentials exist
/// (signing in through `authorizer` if needed) and register one events entity.
pub async fn setup_platform(
    host: &mut Host,
    section: &EventsSection,
    authorizer: Option<Arc<dyn Authorizer>>,
) -> Result<(), SetupError> {
    let config = section
        .validate()
        .map_err(|e| SetupError::config(PLATFORM, e).logged())?;

    let credentials = credentials_for(&config, authorizer)?;
    credentials
        .credential()
        .await
        .map_err(|e| SetupError::connect("Google Calendar API", e).logged())?;

    let provider = GoogleCalendarProvider::new(credentials)
        .map_err(|e| SetupError::connect("Google Calendar API", e).logged())?;

    setup_platform_with(host, config, Arc::new(provider)).await;
    Ok(())
}

/// Credential chain for a validated config: token file, refresh, login.
pub fn credentials_for(
    config: &EventsPlatformConfig,
    authorizer: Option<Arc<dyn Authorizer>>,
) -> Result<Arc<dyn CredentialProvider>, SetupError> {
    let oauth = config
        .oauth
        .clone()
        .map(GoogleOAuth::new)
        .transpose()
        .map_err(|e| SetupError::connect("Google OAuth", e).logged())?;

    let store = TokenStore::new(&config.token_file);
    Ok(Arc::new(GoogleCredentials::new(store, oauth, authorizer)))
}

pub async fn setup_platform_with(
    host: &mut Host,
    config: EventsPlatformConfig,
    provider: Arc<dyn CalendarProvider>,
) {
    let data = EventsData::new(provider, config.calendar_id, config.max_results);
    host.add_entities(vec![Box::new(EventsEntity::new(config.name, data))], true)
        .await;
}

/// Upcoming events of one calendar on a 10 minute throttle.
#[derive(Debug)]
pub struct EventsData {
    provider: Arc<dyn CalendarProvider>,
    calendar_id: String,
    max_results: u32,
    events: Throttled<Vec<CalendarEvent>>,
}

impl EventsData {
    pub fn new(provider: Arc<dyn CalendarProvider>, calendar_id: String, max_results: u32) -> Self {
        Self {
            provider,
            calendar_id,
            max_results,
            events: Throttled::new("calendar events", MIN_TIME_BETWEEN_UPDATES),
        }
    }

    pub async fn update(&mut self, now: Instant) -> Refresh {
        let provider = &self.provider;
        let calendar_id = self.calendar_id.as_str();
        let max_results = self.max_results;
        self.events
            .update(now, || provider.upcoming_events(calendar_id, Utc::now(), max_results))
            .await
    }

    pub fn events(&self) -> Option<&[CalendarEvent]> {
        self.events.payload().map(Vec::as_slice)
    }

    pub fn next_event(&self) -> Option<&CalendarEvent> {
        self.events()?.first()
    }
}

#[derive(Debug)]
pub struct EventsEntity {
    name: String,
    data: EventsData,
}

impl EventsEntity {
    pub fn new(name: String, data: EventsData) -> Self {
        Self { name, data }
    }

    pub fn data(&self) -> &EventsData {
        &self.data
    }
}

fn title(event: &CalendarEvent) -> &str {
    event.summary.as_deref().unwrap_or(UNTITLED)
}

#[async_trait]
impl Entity for EventsEntity {
    fn name(&self) -> &str {
        &self.name
    }

    fn icon(&self) -> Option<&str> {
        Some(ICON)
    }

    fn state(&self) -> String {
        match self.data.events() {
            None => STATE_UNKNOWN.to_string(),
            Some([]) => STATE_NO_EVENTS.to_string(),
            Some([next, ..]) => title(next).to_string(),
        }
    }

    fn attributes(&self) -> Map<String, Value> {
        let events = self.data.events();
        let next = self.data.next_event();

        let mut attrs = Map::new();
        attrs.insert("start".into(), or_unknown(next.map(|e| e.start.to_string())));
        attrs.insert(
            "end".into(),
            or_unknown(next.and_then(|e| e.end).map(|t| t.to_string())),
        );
        attrs.insert("location".into(), or_unknown(next.and_then(|e| e.location.as_deref())));
        attrs.insert("event_count".into(), or_unknown(events.map(<[_]>::len)));
        attrs.insert(
            "upcoming".into(),
            or_unknown(events.map(|list| {
                list.iter()
                    .map(|e| json!({ "summary": title(e), "start": e.start.to_string() }))
                    .collect::<Vec<_>>()
            })),
        );
        attrs
    }

    async fn update(&mut self, now: Instant) {
        self.data.update(now).await;
    }
}
