/// Directions provider client
///
/// Queries the Google Directions JSON API for the duration of a driving trip
/// departing at a given moment.
///
/// ## Request
/// `GET {base_url}?origin=..&destination=..&mode=driving&avoid=tolls&departure_time={unix}&key=..`
///
/// Supplying `departure_time` makes the provider return a traffic-aware
/// `duration_in_traffic` for every leg, next to the free-flow `duration`.
///
/// ## Response (abridged)
/// ```json
/// {
///   "status": "OK",
///   "routes": [
///     { "legs": [ { "duration": { "value": 1500, "text": "25 mins" },
///                   "duration_in_traffic": { "value": 1680, "text": "28 mins" } } ] }
///   ]
/// }
/// ```
/// Any status other than `OK` carries an optional `error_message`.
use crate::config::RequestPolicy;
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, TimeZone};
use serde::Deserialize;

/// One duration lookup: a trip between two addresses starting at `departure`
/// (naive local time of the machine running the job)
#[derive(Debug, Clone, Copy)]
pub struct TripQuery<'a> {
    pub origin: &'a str,
    pub destination: &'a str,
    pub departure: NaiveDateTime,
}

/// Source of traffic-aware trip durations
#[async_trait]
pub trait RouteProvider: Send + Sync {
    /// Driving duration in seconds, avoiding tolls, accounting for traffic
    async fn duration_in_traffic(&self, query: &TripQuery<'_>) -> Result<u64, DirectionsError>;
}

#[derive(Debug, Clone)]
pub struct DirectionsClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    policy: RequestPolicy,
}

impl DirectionsClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        policy: RequestPolicy,
    ) -> Result<Self, DirectionsError> {
        let client = reqwest::Client::builder()
            .timeout(policy.timeout)
            .build()
            .map_err(|e| DirectionsError::NetworkError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self::with_client(client, base_url, api_key, policy))
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        policy: RequestPolicy,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            policy,
        }
    }

    /// Request URL without the API key, safe to log
    fn request_url(&self, query: &TripQuery<'_>) -> Result<String, DirectionsError> {
        let departure = Local
            .from_local_datetime(&query.departure)
            .earliest()
            .ok_or(DirectionsError::InvalidDeparture(query.departure))?;

        Ok(format!(
            "{}?origin={}&destination={}&mode=driving&avoid=tolls&departure_time={}",
            self.base_url,
            urlencoding::encode(query.origin),
            urlencoding::encode(query.destination),
            departure.timestamp()
        ))
    }

    /// Execute HTTP request, retrying transient failures up to the policy limit
    async fn execute_with_retry(&self, url: &str) -> Result<u64, DirectionsError> {
        let mut last_error = None;

        for attempt in 0..self.policy.max_attempts {
            if attempt > 0 {
                let delay = self.policy.backoff(attempt);
                tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "Retrying directions request...");
                tokio::time::sleep(delay).await;
            }

            match self.execute_request(url).await {
                Ok(seconds) => return Ok(seconds),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(attempt, error = %e, "Transient error");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| DirectionsError::NetworkError("No attempts allowed".to_string())))
    }

    async fn execute_request(&self, url: &str) -> Result<u64, DirectionsError> {
        let response = self
            .client
            .get(format!("{}&key={}", url, urlencoding::encode(&self.api_key)))
            .send()
            .await
            .map_err(|e| DirectionsError::NetworkError(e.without_url().to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DirectionsError::NetworkError(e.without_url().to_string()))?;

        if !status.is_success() {
            tracing::error!(status = %status, body_preview = %text.chars().take(200).collect::<String>(), "Directions API error");

            if status.as_u16() == 429 || status.is_server_error() {
                return Err(DirectionsError::RetryableError(format!("HTTP {}", status)));
            }

            return Err(DirectionsError::HttpError {
                status: status.as_u16(),
                body: text.chars().take(200).collect(),
            });
        }

        parse_duration_in_traffic(&text)
    }
}

#[async_trait]
impl RouteProvider for DirectionsClient {
    async fn duration_in_traffic(&self, query: &TripQuery<'_>) -> Result<u64, DirectionsError> {
        let url = self.request_url(query)?;
        tracing::debug!(url = %url, "Fetching trip duration");

        self.execute_with_retry(&url).await
    }
}

#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    routes: Vec<Route>,
}

#[derive(Debug, Deserialize)]
struct Route {
    #[serde(default)]
    legs: Vec<Leg>,
}

#[derive(Debug, Deserialize)]
struct Leg {
    duration_in_traffic: Option<TextValue>,
}

#[derive(Debug, Deserialize)]
struct TextValue {
    value: u64,
}

/// Extract `routes[0].legs[0].duration_in_traffic.value` (seconds)
pub fn parse_duration_in_traffic(body: &str) -> Result<u64, DirectionsError> {
    let parsed: DirectionsResponse = serde_json::from_str(body).map_err(|e| {
        tracing::error!(
            error = %e,
            body_preview = %body.chars().take(500).collect::<String>(),
            "Failed to parse directions response"
        );
        DirectionsError::ParseError(e.to_string())
    })?;

    if parsed.status != "OK" {
        return Err(DirectionsError::StatusError {
            status: parsed.status,
            message: parsed.error_message.unwrap_or_default(),
        });
    }

    let leg = parsed
        .routes
        .first()
        .and_then(|route| route.legs.first())
        .ok_or(DirectionsError::NoRoute)?;

    leg.duration_in_traffic
        .as_ref()
        .map(|d| d.value)
        .ok_or(DirectionsError::MissingDuration)
}

#[derive(Debug, thiserror::Error)]
pub enum DirectionsError {
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Retryable error: {0}")]
    RetryableError(String),
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },
    #[error("Failed to parse response: {0}")]
    ParseError(String),
    #[error("Provider returned {status}: {message}")]
    StatusError { status: String, message: String },
    #[error("Provider returned no route")]
    NoRoute,
    #[error("Provider response has no duration_in_traffic")]
    MissingDuration,
    #[error("Departure {0} does not exist in the local time zone")]
    InvalidDeparture(NaiveDateTime),
}

impl DirectionsError {
    /// Check if this error is transient and should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            DirectionsError::NetworkError(_) | DirectionsError::RetryableError(_) => true,
            DirectionsError::StatusError { status, .. } => status == "UNKNOWN_ERROR",
            _ => false,
        }
    }
}
