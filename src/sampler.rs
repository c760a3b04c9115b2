use crate::config::HourWindow;
use crate::providers::{DirectionsError, RouteProvider, TripQuery};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use std::fmt;
use tracing::{debug, info};

/// Direction of travel between the two configured addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    AToB,
    BToA,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::AToB => "a_to_b",
            Direction::BToA => "b_to_a",
        }
    }

    /// (origin, destination) for this direction
    pub fn endpoints<'a>(&self, a: &'a str, b: &'a str) -> (&'a str, &'a str) {
        match self {
            Direction::AToB => (a, b),
            Direction::BToA => (b, a),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One provider answer: trip duration for a departure timestamp
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepartureSample {
    pub direction: Direction,
    pub timestamp: NaiveDateTime,
    pub duration_minutes: f64,
}

fn at_hour(date: NaiveDate, hour: u32) -> Result<NaiveDateTime, SampleError> {
    NaiveTime::from_hms_opt(hour, 0, 0)
        .map(|time| date.and_time(time))
        .ok_or(SampleError::InvalidHour(hour))
}

/// Timestamps every `step` from `start_hour` to `end_hour` inclusive on `date`
pub fn timestamps(
    date: NaiveDate,
    window: HourWindow,
    step: Duration,
) -> Result<Vec<NaiveDateTime>, SampleError> {
    let start = at_hour(date, window.start_hour)?;
    let end = at_hour(date, window.end_hour)?;
    if start > end || step <= Duration::zero() {
        return Err(SampleError::EmptyWindow(window));
    }

    let mut times = Vec::new();
    let mut current = start;
    while current <= end {
        times.push(current);
        current += step;
    }
    Ok(times)
}

/// Whole-hour departures across the window
pub fn hourly_departures(
    date: NaiveDate,
    window: HourWindow,
) -> Result<Vec<NaiveDateTime>, SampleError> {
    timestamps(date, window, Duration::hours(1))
}

/// Query the provider once per departure, strictly in order.
///
/// The first provider failure aborts sampling; no partial result is returned.
pub async fn sample_direction<P: RouteProvider + ?Sized>(
    provider: &P,
    direction: Direction,
    address_a: &str,
    address_b: &str,
    departures: &[NaiveDateTime],
) -> Result<Vec<DepartureSample>, SampleError> {
    let (origin, destination) = direction.endpoints(address_a, address_b);
    let mut samples = Vec::with_capacity(departures.len());

    for &departure in departures {
        let query = TripQuery {
            origin,
            destination,
            departure,
        };
        let seconds = provider
            .duration_in_traffic(&query)
            .await
            .map_err(|source| SampleError::Provider {
                direction,
                departure,
                source,
            })?;
        let duration_minutes = seconds as f64 / 60.0;

        debug!(%direction, %departure, minutes = duration_minutes, "Sampled trip duration");
        samples.push(DepartureSample {
            direction,
            timestamp: departure,
            duration_minutes,
        });
    }

    info!(%direction, samples = samples.len(), "Sampled direction");
    Ok(samples)
}

#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("Hour {0} is not a valid time of day")]
    InvalidHour(u32),
    #[error("Window {}..{} contains no departures", .0.start_hour, .0.end_hour)]
    EmptyWindow(HourWindow),
    #[error("Provider failed for {direction} at {departure}: {source}")]
    Provider {
        direction: Direction,
        departure: NaiveDateTime,
        #[source]
        source: DirectionsError,
    },
}
