use crate::chart::{ChartError, ChartRenderer, LabelledSeries};
use crate::config::Config;
use crate::interpolate::{self, InterpolatedSeries, InterpolationError};
use crate::notifier::{self, Mailer, NotifyError};
use crate::providers::RouteProvider;
use crate::sampler::{self, Direction, SampleError};
use chrono::NaiveDate;
use tracing::{debug, info};

/// What one run produced
#[derive(Debug, Clone)]
pub struct RunReport {
    pub date: NaiveDate,
    pub series: Vec<InterpolatedSeries>,
    pub recipient: String,
}

/// Sample -> Interpolate -> Render -> Notify, once, for `date`.
///
/// Every stage consumes the full output of the previous one; the first error
/// ends the run. The chart file is the only thing left behind by a run that
/// fails while notifying.
pub async fn run<P, R, M>(
    config: &Config,
    date: NaiveDate,
    provider: &P,
    renderer: &R,
    mailer: &M,
) -> Result<RunReport, PipelineError>
where
    P: RouteProvider + ?Sized,
    R: ChartRenderer + ?Sized,
    M: Mailer + ?Sized,
{
    info!(%date, "Starting trip duration run");

    let plan = [
        (Direction::AToB, config.windows.a_to_b),
        (Direction::BToA, config.windows.b_to_a),
    ];

    let mut sampled = Vec::with_capacity(plan.len());
    for (direction, window) in plan {
        let departures = sampler::hourly_departures(date, window)?;
        let samples = sampler::sample_direction(
            provider,
            direction,
            &config.addresses.a,
            &config.addresses.b,
            &departures,
        )
        .await?;
        sampled.push((direction, window, samples));
    }

    let mut series = Vec::with_capacity(sampled.len());
    for (direction, window, samples) in &sampled {
        let grid = interpolate::half_hour_grid(date, *window)?;
        let resampled = interpolate::resample(*direction, samples, &grid)?;
        debug!(
            %direction,
            points = resampled.points.len(),
            extrapolated = resampled.extrapolated,
            "Interpolated onto half-hour grid"
        );
        series.push(resampled);
    }

    let labelled: Vec<LabelledSeries<'_>> = series
        .iter()
        .map(|s| LabelledSeries {
            series: s,
            label: match s.direction {
                Direction::AToB => config.labels.to_b.as_str(),
                Direction::BToA => config.labels.to_a.as_str(),
            },
        })
        .collect();
    let artifact = renderer.render(date, &labelled, &config.chart.path)?;

    let notification = notifier::compose(&config.smtp, &artifact, date)?;
    mailer.deliver(&notification).await?;

    info!(%date, recipient = %notification.to, "Run complete");
    Ok(RunReport {
        date,
        series,
        recipient: notification.to,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Sampling failed: {0}")]
    Sample(#[from] SampleError),
    #[error("Interpolation failed: {0}")]
    Interpolation(#[from] InterpolationError),
    #[error("Rendering failed: {0}")]
    Chart(#[from] ChartError),
    #[error("Notification failed: {0}")]
    Notify(#[from] NotifyError),
}
