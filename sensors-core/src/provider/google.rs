use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{
    auth::CredentialProvider,
    model::{CalendarEvent, EventTime},
    provider::{is_blank, truncate_body},
};

use super::CalendarProvider;

pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/calendar/v3";

/// Google Calendar API v3 client for `events.list`.
#[derive(Debug, Clone)]
pub struct GoogleCalendarProvider {
    credentials: Arc<dyn CredentialProvider>,
    base_url: String,
    http: Client,
}

impl GoogleCalendarProvider {
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        Self::with_base_url(credentials, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        credentials: Arc<dyn CredentialProvider>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("sensors/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client for Google Calendar")?;

        Ok(Self {
            credentials,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }
}

#[async_trait]
impl CalendarProvider for GoogleCalendarProvider {
    async fn upcoming_events(
        &self,
        calendar_id: &str,
        time_min: DateTime<Utc>,
        max_results: u32,
    ) -> Result<Option<Vec<CalendarEvent>>> {
        let credential = self
            .credentials
            .credential()
            .await
            .context("Failed to obtain Google credentials")?;

        let url = format!(
            "{}/calendars/{}/events",
            self.base_url,
            urlencoding::encode(calendar_id)
        );

        let res = self
            .http
            .get(&url)
            .bearer_auth(&credential.access_token)
            .query(&[
                ("timeMin", time_min.to_rfc3339()),
                ("maxResults", max_results.to_string()),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
            ])
            .send()
            .await
            .context("Failed to send request to Google Calendar (events)")?;

        let status = res.status();
        let body = res
            .text()
            .await
            .context("Failed to read Google Calendar events response body")?;

        if status == StatusCode::UNAUTHORIZED {
            return Err(anyhow!("Google Calendar rejected the access token (401)"));
        }

        if !status.is_success() {
            return Err(anyhow!(
                "Google Calendar events request failed with status {}: {}",
                status,
                truncate_body(&body),
            ));
        }

        if is_blank(&body) {
            return Ok(None);
        }

        let parsed: ApiEventList =
            serde_json::from_str(&body).context("Failed to parse Google Calendar events JSON")?;

        let events: Vec<CalendarEvent> = parsed.items.into_iter().filter_map(convert_event).collect();
        debug!("fetched {} events from calendar {}", events.len(), calendar_id);

        Ok(Some(events))
    }
}

fn convert_event(event: ApiEvent) -> Option<CalendarEvent> {
    if event.status.as_deref() == Some("cancelled") {
        return None;
    }

    let id = event.id?;
    let Some(start) = event.start.as_ref().and_then(ApiEventTime::parse) else {
        warn!("event {} has no usable start time", id);
        return None;
    };
    let end = event.end.as_ref().and_then(ApiEventTime::parse);

    Some(CalendarEvent {
        id,
        summary: event.summary,
        start,
        end,
        location: event.location,
        html_link: event.html_link,
    })
}

#[derive(Debug, Deserialize)]
struct ApiEventList {
    #[serde(default)]
    items: Vec<ApiEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEvent {
    id: Option<String>,
    status: Option<String>,
    summary: Option<String>,
    location: Option<String>,
    html_link: Option<String>,
    start: Option<ApiEventTime>,
    end: Option<ApiEventTime>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEventTime {
    date: Option<String>,
    date_time: Option<String>,
}

impl ApiEventTime {
    fn parse(&self) -> Option<EventTime> {
        if let Some(dt) = &self.date_time {
            return DateTime::parse_from_rfc3339(dt)
                .map_err(|e| warn!("failed to parse event time '{}': {}", dt, e))
                .ok()
                .map(|t| EventTime::DateTime(t.with_timezone(&Utc)));
        }

        let date = self.date.as_ref()?;
        NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|e| warn!("failed to parse event date '{}': {}", date, e))
            .ok()
            .map(EventTime::Date)
    }
}
