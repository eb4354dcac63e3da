//! Per-step accounting: token usage, wall-clock timing, and the run monitor.
//!
//! The monitor keeps one record per action step and derives aggregates from
//! them on completion, emitting `tracing` events along the way so any
//! subscriber can follow a run live.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Token counts for one model call, or an aggregate of several.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub input_tokens: u32,
    /// Tokens produced by the completion.
    pub output_tokens: u32,
}

fn clamped(total: u64) -> u32 {
    u32::try_from(total).unwrap_or(u32::MAX)
}

impl TokenUsage {
    /// Create a usage record from explicit counts.
    #[must_use]
    pub const fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Combined input and output count.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    /// Whether any tokens were actually counted. Aggregation treats an
    /// all-zero record as "nothing reported".
    #[must_use]
    pub const fn has_tokens(&self) -> bool {
        self.total() > 0
    }
}

impl std::ops::Add for TokenUsage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        // Widen before adding so aggregation over long runs cannot wrap.
        Self {
            input_tokens: clamped(u64::from(self.input_tokens) + u64::from(rhs.input_tokens)),
            output_tokens: clamped(u64::from(self.output_tokens) + u64::from(rhs.output_tokens)),
        }
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl std::fmt::Display for TokenUsage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} tokens ({} in / {} out)",
            self.total(),
            self.input_tokens,
            self.output_tokens
        )
    }
}

/// Wall-clock timing of a step or a whole run: an absolute start plus an
/// elapsed duration once finished.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Timing {
    /// When the measured span began.
    pub start_time: DateTime<Utc>,
    /// How long it took; `None` while still in flight.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
}

impl Timing {
    /// Start measuring now.
    #[must_use]
    pub fn begin() -> Self {
        Self {
            start_time: Utc::now(),
            duration: None,
        }
    }

    /// Stop measuring; the duration is the time since `begin`.
    pub fn finish(&mut self) {
        let elapsed = Utc::now() - self.start_time;
        self.duration = elapsed.to_std().ok();
    }

    /// The end timestamp, derived from start plus duration.
    #[must_use]
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        let duration = self.duration?;
        chrono::Duration::from_std(duration)
            .ok()
            .map(|d| self.start_time + d)
    }

    /// Elapsed seconds, once finished.
    #[must_use]
    pub fn duration_secs(&self) -> Option<f64> {
        self.duration.map(|d| d.as_secs_f64())
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self::begin()
    }
}

/// What the monitor remembers about one action step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StepRecord {
    /// The step number.
    pub step: usize,
    /// Token usage the step reported, if any.
    pub tokens: Option<TokenUsage>,
}

/// Aggregates derived from a finished run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunMetrics {
    /// Number of action steps recorded.
    pub steps: usize,
    /// Summed usage; `None` when no step reported any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    /// Number of steps that reported usage (a gap here means the totals
    /// undercount).
    pub steps_with_usage: usize,
    /// Tool invocations across the run.
    pub tool_calls: usize,
    /// Recoverable errors recorded on steps.
    pub errors: usize,
    /// Wall time of the run, set on completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wall_time: Option<Duration>,
}

impl RunMetrics {
    /// Mean wall time per action step.
    #[must_use]
    pub fn mean_step_secs(&self) -> Option<f64> {
        if self.steps == 0 {
            return None;
        }
        self.wall_time
            .map(|total| total.as_secs_f64() / self.steps as f64)
    }
}

impl std::fmt::Display for RunMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} step(s)", self.steps)?;
        match self.token_usage {
            Some(usage) => write!(f, ", {usage}")?,
            None => write!(f, ", no token usage reported")?,
        }
        write!(f, ", {} tool call(s), {} error(s)", self.tool_calls, self.errors)?;
        if let Some(wall) = self.wall_time {
            write!(f, " in {:.2}s", wall.as_secs_f64())?;
            if let Some(mean) = self.mean_step_secs() {
                write!(f, " ({mean:.2}s/step)")?;
            }
        }
        Ok(())
    }
}

/// Collects per-step records during a run and derives [`RunMetrics`].
///
/// All mutation of aggregate token counters goes through this type; the
/// driver records every appended step here before dispatching callbacks.
#[derive(Debug, Clone)]
pub struct Monitor {
    started: Instant,
    records: Vec<StepRecord>,
    tool_calls: usize,
    errors: usize,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor {
    /// Create a monitor with its clock running.
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            records: Vec::new(),
            tool_calls: 0,
            errors: 0,
        }
    }

    /// Forget everything and restart the clock.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Record a completed action step.
    pub fn record_step(&mut self, step: usize, tokens: Option<&TokenUsage>) {
        self.records.push(StepRecord {
            step,
            tokens: tokens.copied(),
        });
        match tokens {
            Some(usage) => info!(
                step,
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "action step finished"
            ),
            None => info!(step, "action step finished (no usage reported)"),
        }
    }

    /// Record one tool invocation.
    pub fn record_tool_call(&mut self, tool: &str) {
        self.tool_calls += 1;
        debug!(tool, "tool invoked");
    }

    /// Record a recoverable step error.
    pub fn record_error(&mut self, error: &str) {
        self.errors += 1;
        debug!(error, "step recorded an error");
    }

    /// The per-step records collected so far.
    #[must_use]
    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    /// Metrics for the run so far, without stopping the clock.
    #[must_use]
    pub fn metrics(&self) -> RunMetrics {
        self.derive(None)
    }

    /// Finish the run: stamp the wall time and return the aggregates.
    pub fn complete(&mut self) -> RunMetrics {
        let metrics = self.derive(Some(self.started.elapsed()));
        info!(
            steps = metrics.steps,
            tool_calls = metrics.tool_calls,
            errors = metrics.errors,
            tokens = metrics.token_usage.map(|u| u.total()).unwrap_or_default(),
            wall_ms = metrics.wall_time.map(|w| w.as_millis() as u64).unwrap_or_default(),
            "agent run finished"
        );
        metrics
    }

    fn derive(&self, wall_time: Option<Duration>) -> RunMetrics {
        let mut token_usage: Option<TokenUsage> = None;
        let mut steps_with_usage = 0;
        for record in &self.records {
            if let Some(usage) = record.tokens {
                steps_with_usage += 1;
                token_usage = Some(token_usage.unwrap_or_default() + usage);
            }
        }
        RunMetrics {
            steps: self.records.len(),
            token_usage,
            steps_with_usage,
            tool_calls: self.tool_calls,
            errors: self.errors,
            wall_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_usage_totals() {
        let usage = TokenUsage::new(100, 50);
        assert_eq!(usage.total(), 150);
        assert!(usage.has_tokens());
        assert!(!TokenUsage::default().has_tokens());
    }

    #[test]
    fn test_token_usage_add_clamps_at_max() {
        let sum = TokenUsage::new(u32::MAX, 1) + TokenUsage::new(10, 1);
        assert_eq!(sum.input_tokens, u32::MAX);
        assert_eq!(sum.output_tokens, 2);

        let mut acc = TokenUsage::new(1, 2);
        acc += TokenUsage::new(3, 4);
        assert_eq!(acc, TokenUsage::new(4, 6));
    }

    #[test]
    fn test_token_usage_display() {
        assert_eq!(
            TokenUsage::new(30, 15).to_string(),
            "45 tokens (30 in / 15 out)"
        );
    }

    #[test]
    fn test_timing_finishes_with_consistent_end() {
        let mut timing = Timing::begin();
        assert!(timing.duration_secs().is_none());
        assert!(timing.end_time().is_none());

        timing.finish();
        let secs = timing.duration_secs().expect("finished");
        assert!(secs >= 0.0);
        let end = timing.end_time().expect("finished");
        assert!(end >= timing.start_time);
    }

    #[test]
    fn test_monitor_derives_aggregates() {
        let mut monitor = Monitor::new();
        monitor.record_step(1, Some(&TokenUsage::new(100, 50)));
        monitor.record_step(2, None);
        monitor.record_step(3, Some(&TokenUsage::new(10, 5)));
        monitor.record_tool_call("add");
        monitor.record_tool_call("web_search");
        monitor.record_error("boom");

        let metrics = monitor.complete();
        assert_eq!(metrics.steps, 3);
        assert_eq!(metrics.steps_with_usage, 2);
        assert_eq!(metrics.token_usage, Some(TokenUsage::new(110, 55)));
        assert_eq!(metrics.tool_calls, 2);
        assert_eq!(metrics.errors, 1);
        assert!(metrics.wall_time.is_some());
        assert!(metrics.mean_step_secs().is_some());
    }

    #[test]
    fn test_monitor_reset_clears_records() {
        let mut monitor = Monitor::new();
        monitor.record_step(1, None);
        monitor.reset();
        assert!(monitor.records().is_empty());
        assert_eq!(monitor.metrics().steps, 0);
    }

    #[test]
    fn test_metrics_display_reads_as_one_line() {
        let metrics = RunMetrics {
            steps: 2,
            token_usage: Some(TokenUsage::new(30, 15)),
            steps_with_usage: 2,
            tool_calls: 1,
            errors: 0,
            wall_time: Some(Duration::from_millis(1500)),
        };
        let line = metrics.to_string();
        assert!(line.contains("2 step(s)"));
        assert!(line.contains("45 tokens"));
        assert!(line.contains("1.50s"));
        assert!(!line.contains('\n'));
    }
}
