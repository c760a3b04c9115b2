mod chart;
mod config;
mod interpolate;
mod notifier;
mod pipeline;
mod providers;
mod sampler;

use chrono::{Days, Local};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chart::PlottersRenderer;
use config::Config;
use notifier::SmtpMailer;
use providers::DirectionsClient;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trip_plot=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    // Data is always for tomorrow relative to the run
    let date = Local::now()
        .date_naive()
        .checked_add_days(Days::new(1))
        .ok_or("date out of range")?;

    let provider = DirectionsClient::new(
        config.maps.base_url.clone(),
        config.maps.api_key.clone(),
        config.maps.request_policy(),
    )?;
    let renderer = PlottersRenderer::new(&config.chart);
    let mailer = SmtpMailer::new(&config.smtp)?;

    let report = pipeline::run(&config, date, &provider, &renderer, &mailer).await?;

    info!(
        date = %report.date,
        recipient = %report.recipient,
        chart = %config.chart.path.display(),
        extrapolated = report.series.iter().map(|s| s.extrapolated).sum::<usize>(),
        "Trip duration report delivered"
    );

    Ok(())
}
