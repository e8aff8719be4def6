use std::collections::HashMap;
use std::time::Instant;

use crate::detection::domain::marker_tracker::MarkerEvent;

/// Cross-cutting logger for frame pipeline events.
///
/// Decouples the driver and stages from specific output mechanisms so a
/// console, a GUI or a test can observe the loop without changing it.
pub trait PipelineLogger: Send {
    /// Report that a frame finished processing.
    fn frame(&mut self, index: usize);

    /// Record how long a named stage took for one frame.
    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// Record a point-in-time metric (e.g. faces in view).
    fn metric(&mut self, name: &str, value: f64);

    /// Report a marker presence transition.
    fn marker_event(&mut self, event: &MarkerEvent);

    /// Log a human-readable status message.
    fn info(&mut self, message: &str);

    /// Emit an end-of-run summary. Default: no-op.
    fn summary(&self) {}
}

/// Silent logger that discards all events. Used by tests.
pub struct NullPipelineLogger;

impl PipelineLogger for NullPipelineLogger {
    fn frame(&mut self, _index: usize) {}
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn metric(&mut self, _name: &str, _value: f64) {}
    fn marker_event(&mut self, _event: &MarkerEvent) {}
    fn info(&mut self, _message: &str) {}
}

/// Forwards events to the `log` facade and keeps per-stage timing and
/// metric aggregates for a summary when the loop ends.
///
/// A throughput line is logged at debug level every `report_every`
/// frames.
pub struct LogPipelineLogger {
    report_every: usize,
    timings: HashMap<String, Aggregate>,
    metrics: HashMap<String, Aggregate>,
    start_time: Instant,
    frames: usize,
    marker_events: usize,
}

#[derive(Clone, Copy, Debug, Default)]
struct Aggregate {
    count: usize,
    total: f64,
    max: f64,
}

impl Aggregate {
    fn push(&mut self, value: f64) {
        self.count += 1;
        self.total += value;
        self.max = self.max.max(value);
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }
}

impl LogPipelineLogger {
    pub fn new(report_every: usize) -> Self {
        Self {
            report_every: report_every.max(1),
            timings: HashMap::new(),
            metrics: HashMap::new(),
            start_time: Instant::now(),
            frames: 0,
            marker_events: 0,
        }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Mean duration of a stage in milliseconds.
    pub fn mean_timing(&self, stage: &str) -> Option<f64> {
        self.timings.get(stage).map(Aggregate::mean)
    }

    pub fn mean_metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).map(Aggregate::mean)
    }

    /// Returns the formatted summary, or `None` if nothing was processed.
    pub fn summary_string(&self) -> Option<String> {
        if self.frames == 0 && self.timings.is_empty() {
            return None;
        }

        let elapsed_ms = self.start_time.elapsed().as_secs_f64() * 1000.0;
        let mut lines = vec![format!(
            "Pipeline summary ({} frames, {:.1}s, {} marker events):",
            self.frames,
            elapsed_ms / 1000.0,
            self.marker_events
        )];

        let mut stages: Vec<_> = self.timings.iter().collect();
        stages.sort_by(|a, b| a.0.cmp(b.0));
        for (stage, agg) in stages {
            lines.push(format!(
                "  {stage:12}: avg {:6.1}ms  max {:6.1}ms  ({} runs)",
                agg.mean(),
                agg.max,
                agg.count
            ));
        }

        let mut metrics: Vec<_> = self.metrics.iter().collect();
        metrics.sort_by(|a, b| a.0.cmp(b.0));
        for (name, agg) in metrics {
            lines.push(format!("  {name}: avg {:.1}", agg.mean()));
        }

        if self.frames > 0 && elapsed_ms > 0.0 {
            let fps = self.frames as f64 / (elapsed_ms / 1000.0);
            lines.push(format!("  Throughput: {fps:.1} fps"));
        }

        Some(lines.join("\n"))
    }
}

impl Default for LogPipelineLogger {
    fn default() -> Self {
        Self::new(100)
    }
}

impl PipelineLogger for LogPipelineLogger {
    fn frame(&mut self, index: usize) {
        self.frames += 1;
        if self.frames % self.report_every == 0 {
            let secs = self.start_time.elapsed().as_secs_f64();
            let fps = if secs > 0.0 { self.frames as f64 / secs } else { 0.0 };
            log::debug!("Frame {index}: {} processed, {fps:.1} fps", self.frames);
        }
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        self.timings
            .entry(stage.to_string())
            .or_default()
            .push(duration_ms);
    }

    fn metric(&mut self, name: &str, value: f64) {
        self.metrics.entry(name.to_string()).or_default().push(value);
    }

    fn marker_event(&mut self, event: &MarkerEvent) {
        self.marker_events += 1;
        log::info!("{event}");
    }

    fn info(&mut self, message: &str) {
        log::info!("{message}");
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("\n\n{text}");
        }
    }
}
