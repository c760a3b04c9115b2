use crate::config::{ChartConfig, HourWindow};
use crate::interpolate::InterpolatedSeries;
use crate::sampler::Direction;
use chrono::{NaiveDate, NaiveDateTime};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use plotters_backend::{
    BackendColor, BackendCoord, BackendStyle, BackendTextStyle, DrawingErrorKind,
};
use std::panic;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const TITLE: &str = "Trip Duration vs. Departure Time";
const X_DESC: &str = "Departure Time";
const Y_DESC: &str = "Trip Duration (minutes)";

/// Fraction of the x range, at either edge, in which labels are pulled inward
const EDGE_FRACTION: f64 = 0.05;
const LABEL_OFFSET_PX: i32 = 14;

/// A rendered chart on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartArtifact {
    pub path: PathBuf,
}

/// A series with the text drawn at its final point
#[derive(Debug, Clone, Copy)]
pub struct LabelledSeries<'a> {
    pub series: &'a InterpolatedSeries,
    pub label: &'a str,
}

pub trait ChartRenderer {
    fn render(
        &self,
        date: NaiveDate,
        series: &[LabelledSeries<'_>],
        path: &Path,
    ) -> Result<ChartArtifact, ChartError>;
}

/// `13` -> `"1 pm"`, `0` -> `"12 am"`, `4` -> `"4 am"`
pub fn format_clock_hour(hour: u32) -> String {
    let hour = hour % 24;
    let display = match hour % 12 {
        0 => 12,
        h => h,
    };
    let suffix = if hour < 12 { "am" } else { "pm" };
    format!("{} {}", display, suffix)
}

/// Position on the x axis: hours since midnight of `date`
fn hours_into(date: NaiveDate, timestamp: NaiveDateTime) -> f64 {
    (timestamp - date.and_time(chrono::NaiveTime::MIN)).num_seconds() as f64 / 3600.0
}

fn series_color(direction: Direction) -> RGBColor {
    match direction {
        Direction::AToB => RGBColor(0x1f, 0x77, 0xb4),
        Direction::BToA => RGBColor(0xff, 0x7f, 0x0e),
    }
}

/// Label budget for the x axis. Plotters picks the finest 1-2-5 step whose
/// tick count fits the budget, so asking for exactly one label per `step`
/// hours yields ticks on those hours.
pub fn x_label_count(range: HourWindow, step: u32) -> usize {
    ((range.end_hour - range.start_hour) / step.max(1)) as usize + 1
}

/// Horizontal anchor for an endpoint label. Labels sit centred above their
/// point unless the point is near a side of the plot, where they are aligned
/// to stay inside it.
pub fn label_anchor(x: f64, x_start: f64, x_end: f64) -> HPos {
    let margin = (x_end - x_start) * EDGE_FRACTION;
    if x >= x_end - margin {
        HPos::Right
    } else if x <= x_start + margin {
        HPos::Left
    } else {
        HPos::Center
    }
}

/// y range covering every value with 10% headroom on both sides
pub fn y_bounds<'a, I>(values: I) -> (f64, f64)
where
    I: IntoIterator<Item = &'a f64>,
{
    let (min, max) = values
        .into_iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });
    if !min.is_finite() || !max.is_finite() {
        return (0.0, 1.0);
    }
    let pad = if max > min { (max - min) * 0.1 } else { 1.0 };
    (min - pad, max + pad)
}

fn draw_err<E: std::fmt::Display>(err: E) -> ChartError {
    ChartError::Draw(err.to_string())
}

/// Bitmap chart writer; the output format follows the file extension
#[derive(Debug, Clone)]
pub struct PlottersRenderer {
    width: u32,
    height: u32,
    x_range: HourWindow,
    tick_hours: u32,
}

impl PlottersRenderer {
    pub fn new(config: &ChartConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            x_range: config.x_range,
            tick_hours: config.tick_hours,
        }
    }
}

impl PlottersRenderer {
    fn draw<DB: DrawingBackend>(
        &self,
        root: DrawingArea<DB, Shift>,
        date: NaiveDate,
        series: &[LabelledSeries<'_>],
    ) -> Result<(), ChartError> {
        root.fill(&WHITE).map_err(draw_err)?;

        let x_start = f64::from(self.x_range.start_hour);
        let x_end = f64::from(self.x_range.end_hour);
        let (y_min, y_max) = y_bounds(series.iter().flat_map(|s| s.series.points.iter().map(|p| &p.1)));

        let mut chart = ChartBuilder::on(&root)
            .caption(TITLE, ("sans-serif", 40))
            .margin(30)
            .x_label_area_size(80)
            .y_label_area_size(90)
            .build_cartesian_2d(x_start..x_end, y_min..y_max)
            .map_err(draw_err)?;

        chart
            .configure_mesh()
            .x_labels(x_label_count(self.x_range, self.tick_hours))
            .x_desc(X_DESC)
            .y_desc(Y_DESC)
            .x_label_formatter(&|x| format_clock_hour(x.round() as u32))
            .y_label_formatter(&|y| format!("{:.0}", y))
            .label_style(("sans-serif", 28))
            .axis_desc_style(("sans-serif", 32))
            .bold_line_style(BLACK.mix(0.15))
            .light_line_style(TRANSPARENT)
            .draw()
            .map_err(draw_err)?;

        for entry in series {
            let color = series_color(entry.series.direction);
            let style = ShapeStyle {
                color: color.to_rgba(),
                filled: true,
                stroke_width: 3,
            };
            let points: Vec<(f64, f64)> = entry
                .series
                .points
                .iter()
                .map(|&(t, minutes)| (hours_into(date, t), minutes))
                .filter(|(x, _)| (x_start..=x_end).contains(x))
                .collect();

            chart
                .draw_series(LineSeries::new(points, style).point_size(5))
                .map_err(draw_err)?;

            if let Some((t, minutes)) = entry.series.last() {
                let x = hours_into(date, t);
                let text_style = ("sans-serif", 30)
                    .into_font()
                    .color(&color)
                    .pos(Pos::new(label_anchor(x, x_start, x_end), VPos::Bottom));
                chart
                    .draw_series(std::iter::once(
                        EmptyElement::at((x, minutes))
                            + Text::new(entry.label.to_string(), (0, -LABEL_OFFSET_PX), text_style),
                    ))
                    .map_err(draw_err)?;
            }
        }

        root.present().map_err(draw_err)
    }
}

impl ChartRenderer for PlottersRenderer {
    fn render(
        &self,
        date: NaiveDate,
        series: &[LabelledSeries<'_>],
        path: &Path,
    ) -> Result<ChartArtifact, ChartError> {
        if series.iter().all(|s| s.series.points.is_empty()) {
            return Err(ChartError::NoData);
        }

        let backend = BitMapBackend::new(path, (self.width, self.height));
        self.draw(FontTolerantBackend::new(backend).into_drawing_area(), date, series)?;

        info!(path = %path.display(), width = self.width, height = self.height, "Rendered chart");
        Ok(ChartArtifact {
            path: path.to_path_buf(),
        })
    }
}

/// Backend wrapper that degrades text instead of failing the chart when the
/// host has no usable fonts: text is skipped and its size is approximated
/// from the font size.
struct FontTolerantBackend<DB> {
    inner: DB,
}

impl<DB> FontTolerantBackend<DB> {
    fn new(inner: DB) -> Self {
        Self { inner }
    }
}

/// Rough glyph box for text that cannot be laid out
fn approximate_text_size(text: &str, font_size: f64) -> (u32, u32) {
    let chars = text.chars().count() as f64;
    ((chars * font_size * 0.6).ceil() as u32, font_size.ceil() as u32)
}

impl<DB: DrawingBackend> DrawingBackend for FontTolerantBackend<DB> {
    type ErrorType = DB::ErrorType;

    fn get_size(&self) -> (u32, u32) {
        self.inner.get_size()
    }

    fn ensure_prepared(&mut self) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.ensure_prepared()
    }

    fn present(&mut self) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.present()
    }

    fn draw_pixel(
        &mut self,
        point: BackendCoord,
        color: BackendColor,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.draw_pixel(point, color)
    }

    fn draw_line<S: BackendStyle>(
        &mut self,
        from: BackendCoord,
        to: BackendCoord,
        style: &S,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.draw_line(from, to, style)
    }

    fn draw_rect<S: BackendStyle>(
        &mut self,
        upper_left: BackendCoord,
        bottom_right: BackendCoord,
        style: &S,
        fill: bool,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.draw_rect(upper_left, bottom_right, style, fill)
    }

    fn draw_path<S: BackendStyle, I: IntoIterator<Item = BackendCoord>>(
        &mut self,
        path: I,
        style: &S,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.draw_path(path, style)
    }

    fn draw_circle<S: BackendStyle>(
        &mut self,
        center: BackendCoord,
        radius: u32,
        style: &S,
        fill: bool,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.draw_circle(center, radius, style, fill)
    }

    fn fill_polygon<S: BackendStyle, I: IntoIterator<Item = BackendCoord>>(
        &mut self,
        vert: I,
        style: &S,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.fill_polygon(vert, style)
    }

    fn blit_bitmap(
        &mut self,
        pos: BackendCoord,
        (iw, ih): (u32, u32),
        src: &[u8],
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.blit_bitmap(pos, (iw, ih), src)
    }

    fn draw_text<TStyle: BackendTextStyle>(
        &mut self,
        text: &str,
        style: &TStyle,
        pos: BackendCoord,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        match panic::catch_unwind(panic::AssertUnwindSafe(|| {
            self.inner.draw_text(text, style, pos)
        })) {
            Ok(Err(DrawingErrorKind::FontError(e))) => {
                debug!(error = %e, text, "Skipping text, font unavailable");
                Ok(())
            }
            Ok(result) => result,
            Err(_) => {
                debug!(text, "Skipping text, font rasterizer panicked");
                Ok(())
            }
        }
    }

    fn estimate_text_size<TStyle: BackendTextStyle>(
        &self,
        text: &str,
        style: &TStyle,
    ) -> Result<(u32, u32), DrawingErrorKind<Self::ErrorType>> {
        match panic::catch_unwind(panic::AssertUnwindSafe(|| {
            self.inner.estimate_text_size(text, style)
        })) {
            Ok(Err(DrawingErrorKind::FontError(_))) | Err(_) => {
                Ok(approximate_text_size(text, style.size()))
            }
            Ok(result) => result,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChartError {
    #[error("Nothing to plot")]
    NoData,
    #[error("Failed to draw chart: {0}")]
    Draw(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use plotters::coord::types::RangedCoordf64;

    #[test]
    fn clock_labels_use_twelve_hour_time_without_leading_zero() {
        assert_eq!(format_clock_hour(0), "12 am");
        assert_eq!(format_clock_hour(12), "12 pm");
        assert_eq!(format_clock_hour(13), "1 pm");
        assert_eq!(format_clock_hour(4), "4 am");
        assert_eq!(format_clock_hour(22), "10 pm");
        assert!(format_clock_hour(0).starts_with("12"));
        assert!(format_clock_hour(12).starts_with("12"));
    }

    /// Tick hours plotters places on an x axis spanning `range`
    fn x_ticks(range: HourWindow, step: u32) -> Vec<u32> {
        let coord: RangedCoordf64 = (f64::from(range.start_hour)..f64::from(range.end_hour)).into();
        coord
            .key_points(x_label_count(range, step))
            .into_iter()
            .map(|x| x.round() as u32)
            .collect()
    }

    #[test]
    fn ticks_every_two_hours_across_visible_range() {
        assert_eq!(
            x_ticks(HourWindow::new(4, 22), 2),
            vec![4, 6, 8, 10, 12, 14, 16, 18, 20, 22]
        );
    }

    #[test]
    fn hourly_ticks_cover_every_hour() {
        assert_eq!(
            x_ticks(HourWindow::new(4, 22), 1),
            (4..=22).collect::<Vec<_>>()
        );
    }

    #[test]
    fn labels_near_the_edges_are_pulled_inward() {
        assert!(matches!(label_anchor(22.0, 4.0, 22.0), HPos::Right));
        assert!(matches!(label_anchor(4.2, 4.0, 22.0), HPos::Left));
        assert!(matches!(label_anchor(14.0, 4.0, 22.0), HPos::Center));
    }

    #[test]
    fn unmeasurable_text_gets_an_approximate_box() {
        assert_eq!(approximate_text_size("4 am", 30.0), (72, 30));
        assert_eq!(approximate_text_size("", 28.0), (0, 28));
    }

    #[test]
    fn y_bounds_pad_the_data() {
        let (lo, hi) = y_bounds(&[20.0, 30.0]);
        assert_eq!((lo, hi), (19.0, 31.0));

        let (lo, hi) = y_bounds(&[25.0]);
        assert_eq!((lo, hi), (24.0, 26.0));

        assert_eq!(y_bounds(&[] as &[f64]), (0.0, 1.0));
    }

    #[test]
    fn hours_are_measured_from_midnight_of_the_target_date() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 20).unwrap();
        let t = date.and_time(NaiveTime::from_hms_opt(13, 30, 0).unwrap());
        assert_eq!(hours_into(date, t), 13.5);
    }

    fn sample_series(date: NaiveDate) -> [InterpolatedSeries; 2] {
        let at = |h: u32, m: u32| date.and_time(NaiveTime::from_hms_opt(h, m, 0).unwrap());
        [
            InterpolatedSeries {
                direction: Direction::AToB,
                points: vec![(at(4, 0), 20.0), (at(4, 30), 22.5), (at(5, 0), 25.0)],
                extrapolated: 0,
            },
            InterpolatedSeries {
                direction: Direction::BToA,
                points: vec![(at(21, 0), 30.0), (at(21, 30), 28.0), (at(22, 0), 26.0)],
                extrapolated: 0,
            },
        ]
    }

    /// Width and height from the first baseline or progressive frame header
    fn jpeg_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
        let mut i = 2;
        while i + 9 <= bytes.len() {
            if bytes[i] != 0xFF {
                return None;
            }
            let marker = bytes[i + 1];
            let len = usize::from(u16::from_be_bytes([bytes[i + 2], bytes[i + 3]]));
            if marker == 0xC0 || marker == 0xC2 {
                let height = u16::from_be_bytes([bytes[i + 5], bytes[i + 6]]);
                let width = u16::from_be_bytes([bytes[i + 7], bytes[i + 8]]);
                return Some((width.into(), height.into()));
            }
            i += 2 + len;
        }
        None
    }

    fn small_chart() -> ChartConfig {
        ChartConfig {
            width: 600,
            height: 900,
            ..ChartConfig::default()
        }
    }

    #[test]
    fn renders_jpeg_file_with_configured_size() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 20).unwrap();
        let [to_b, to_a] = sample_series(date);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trip_duration_plot.jpg");

        let artifact = PlottersRenderer::new(&small_chart())
            .render(
                date,
                &[
                    LabelledSeries { series: &to_b, label: "To B" },
                    LabelledSeries { series: &to_a, label: "To A" },
                ],
                &path,
            )
            .unwrap();

        assert_eq!(artifact.path, path);
        let bytes = std::fs::read(&artifact.path).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(jpeg_dimensions(&bytes), Some((600, 900)));
    }

    #[test]
    fn both_series_are_drawn_in_their_colors() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 20).unwrap();
        let [to_b, to_a] = sample_series(date);
        let config = small_chart();
        let mut buffer = vec![0_u8; (config.width * config.height * 3) as usize];

        {
            let backend = BitMapBackend::with_buffer(&mut buffer, (config.width, config.height));
            PlottersRenderer::new(&config)
                .draw(
                    FontTolerantBackend::new(backend).into_drawing_area(),
                    date,
                    &[
                        LabelledSeries { series: &to_b, label: "To B" },
                        LabelledSeries { series: &to_a, label: "To A" },
                    ],
                )
                .unwrap();
        }

        let has = |c: RGBColor| buffer.chunks_exact(3).any(|p| p == [c.0, c.1, c.2]);
        assert!(has(series_color(Direction::AToB)));
        assert!(has(series_color(Direction::BToA)));
        assert!(has(WHITE));
    }

    #[test]
    fn empty_series_are_rejected() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 20).unwrap();
        let empty = InterpolatedSeries {
            direction: Direction::AToB,
            points: Vec::new(),
            extrapolated: 0,
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trip_duration_plot.jpg");

        let err = PlottersRenderer::new(&small_chart())
            .render(date, &[LabelledSeries { series: &empty, label: "To B" }], &path)
            .unwrap_err();

        assert!(matches!(err, ChartError::NoData));
        assert!(!path.exists());
    }
}
