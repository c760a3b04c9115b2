use crate::config::HourWindow;
use crate::sampler::{self, DepartureSample, Direction, SampleError};
use chrono::{Duration, NaiveDate, NaiveDateTime};

/// Timestamps encoded as seconds on the naive local clock
fn encode(timestamp: NaiveDateTime) -> f64 {
    timestamp.and_utc().timestamp() as f64
}

/// Piecewise-linear function through `(x, y)` knots.
///
/// Outside the knot range the first and last segments are extended
/// linearly; nothing is clamped.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearInterpolant {
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl LinearInterpolant {
    /// Build from unsorted points. At least two distinct x values are needed.
    pub fn new(mut points: Vec<(f64, f64)>) -> Result<Self, InterpolationError> {
        if points.len() < 2 {
            return Err(InterpolationError::TooFewSamples(points.len()));
        }
        if points.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
            return Err(InterpolationError::NonFinite);
        }
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        if points.windows(2).any(|w| w[0].0 == w[1].0) {
            return Err(InterpolationError::DuplicateTimestamp);
        }

        let (xs, ys) = points.into_iter().unzip();
        Ok(Self { xs, ys })
    }

    pub fn x_bounds(&self) -> (f64, f64) {
        (self.xs[0], self.xs[self.xs.len() - 1])
    }

    pub fn eval(&self, x: f64) -> f64 {
        let n = self.xs.len();
        // Index of the segment [xs[i], xs[i + 1]] used for x; edge segments
        // serve extrapolation on either side.
        let i = match self.xs.partition_point(|&knot| knot <= x) {
            0 => 0,
            p if p >= n => n - 2,
            p => p - 1,
        };
        let (x0, x1) = (self.xs[i], self.xs[i + 1]);
        let (y0, y1) = (self.ys[i], self.ys[i + 1]);
        y0 + (y1 - y0) * (x - x0) / (x1 - x0)
    }
}

/// Interpolated durations for one direction on a fixed grid
#[derive(Debug, Clone, PartialEq)]
pub struct InterpolatedSeries {
    pub direction: Direction,
    pub points: Vec<(NaiveDateTime, f64)>,
    /// Grid points that fell outside the sampled range
    pub extrapolated: usize,
}

impl InterpolatedSeries {
    pub fn last(&self) -> Option<(NaiveDateTime, f64)> {
        self.points.last().copied()
    }
}

/// Half-hour marks from `start_hour` to `end_hour` inclusive on `date`
pub fn half_hour_grid(date: NaiveDate, window: HourWindow) -> Result<Vec<NaiveDateTime>, InterpolationError> {
    Ok(sampler::timestamps(date, window, Duration::minutes(30))?)
}

/// Fit the samples of one direction and evaluate on `grid`
pub fn resample(
    direction: Direction,
    samples: &[DepartureSample],
    grid: &[NaiveDateTime],
) -> Result<InterpolatedSeries, InterpolationError> {
    if let Some(other) = samples.iter().find(|s| s.direction != direction) {
        return Err(InterpolationError::MixedDirections {
            expected: direction,
            found: other.direction,
        });
    }

    let interpolant = LinearInterpolant::new(
        samples
            .iter()
            .map(|s| (encode(s.timestamp), s.duration_minutes))
            .collect(),
    )?;
    let (lo, hi) = interpolant.x_bounds();

    let mut extrapolated = 0;
    let points = grid
        .iter()
        .map(|&t| {
            let x = encode(t);
            if x < lo || x > hi {
                extrapolated += 1;
            }
            (t, interpolant.eval(x))
        })
        .collect();

    Ok(InterpolatedSeries {
        direction,
        points,
        extrapolated,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum InterpolationError {
    #[error("Need at least two samples to interpolate, got {0}")]
    TooFewSamples(usize),
    #[error("Two samples share the same timestamp")]
    DuplicateTimestamp,
    #[error("Sample contains a non-finite value")]
    NonFinite,
    #[error("Expected samples for {expected}, found {found}")]
    MixedDirections { expected: Direction, found: Direction },
    #[error(transparent)]
    Grid(#[from] SampleError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 20).unwrap()
    }

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        date().and_time(NaiveTime::from_hms_opt(hour, minute, 0).unwrap())
    }

    fn sample(hour: u32, minutes: f64) -> DepartureSample {
        DepartureSample {
            direction: Direction::AToB,
            timestamp: at(hour, 0),
            duration_minutes: minutes,
        }
    }

    #[test]
    fn midpoint_is_mean_of_neighbours() {
        let f = LinearInterpolant::new(vec![(10.0, 4.0), (20.0, 10.0)]).unwrap();
        assert_eq!(f.eval(15.0), 7.0);
        assert_eq!(f.eval(10.0), 4.0);
        assert_eq!(f.eval(20.0), 10.0);
    }

    #[test]
    fn extrapolation_continues_edge_slopes() {
        let f = LinearInterpolant::new(vec![(0.0, 0.0), (1.0, 2.0), (2.0, 3.0)]).unwrap();
        // last segment slope is 1
        assert_eq!(f.eval(4.0), 5.0);
        // first segment slope is 2
        assert_eq!(f.eval(-1.0), -2.0);
    }

    #[test]
    fn knots_are_sorted_before_fitting() {
        let f = LinearInterpolant::new(vec![(2.0, 3.0), (0.0, 0.0), (1.0, 2.0)]).unwrap();
        assert_eq!(f.eval(0.5), 1.0);
        assert_eq!(f.x_bounds(), (0.0, 2.0));
    }

    #[test]
    fn degenerate_inputs_are_rejected() {
        assert!(matches!(
            LinearInterpolant::new(vec![(1.0, 1.0)]),
            Err(InterpolationError::TooFewSamples(1))
        ));
        assert!(matches!(
            LinearInterpolant::new(vec![(1.0, 1.0), (1.0, 2.0)]),
            Err(InterpolationError::DuplicateTimestamp)
        ));
        assert!(matches!(
            LinearInterpolant::new(vec![(1.0, f64::NAN), (2.0, 2.0)]),
            Err(InterpolationError::NonFinite)
        ));
    }

    #[test]
    fn half_hour_between_samples_is_interpolated() {
        let samples = [sample(8, 25.0), sample(9, 30.0)];
        let grid = half_hour_grid(date(), HourWindow::new(8, 9)).unwrap();

        let series = resample(Direction::AToB, &samples, &grid).unwrap();

        assert_eq!(
            series.points,
            vec![(at(8, 0), 25.0), (at(8, 30), 27.5), (at(9, 0), 30.0)]
        );
        assert_eq!(series.extrapolated, 0);
    }

    #[test]
    fn grid_outside_samples_is_extrapolated_not_clamped() {
        let samples = [sample(8, 25.0), sample(9, 30.0)];
        let grid = half_hour_grid(date(), HourWindow::new(7, 10)).unwrap();

        let series = resample(Direction::AToB, &samples, &grid).unwrap();

        assert_eq!(series.points.first(), Some(&(at(7, 0), 20.0)));
        assert_eq!(series.last(), Some((at(10, 0), 35.0)));
        assert_eq!(series.extrapolated, 4);
    }

    #[test]
    fn series_is_ordered_and_covers_grid_endpoints() {
        let samples: Vec<_> = (4..=14)
            .map(|h| sample(h, 20.0 + f64::from((h * 7) % 5)))
            .collect();
        let grid = half_hour_grid(date(), HourWindow::new(4, 14)).unwrap();

        let series = resample(Direction::AToB, &samples, &grid).unwrap();

        assert_eq!(series.points.len(), 21);
        assert!(series.points.windows(2).all(|w| w[0].0 < w[1].0));
        assert_eq!(series.points.first().map(|p| p.0), Some(at(4, 0)));
        assert_eq!(series.last().map(|p| p.0), Some(at(14, 0)));
        for s in &samples {
            let hit = series.points.iter().find(|p| p.0 == s.timestamp).unwrap();
            assert!((hit.1 - s.duration_minutes).abs() < 1e-9);
        }
    }

    #[test]
    fn samples_from_the_other_direction_are_refused() {
        let mut wrong = sample(8, 25.0);
        wrong.direction = Direction::BToA;
        let grid = half_hour_grid(date(), HourWindow::new(8, 9)).unwrap();

        assert!(matches!(
            resample(Direction::AToB, &[sample(9, 30.0), wrong], &grid),
            Err(InterpolationError::MixedDirections { .. })
        ));
    }
}
