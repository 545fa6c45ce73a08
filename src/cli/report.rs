//! Run summary
//!
//! Consumes the engine event stream and reduces it to counts and latency
//! statistics for display.

use std::collections::BTreeMap;

use colored::Colorize;
use serde::Serialize;

use crate::engine::{EngineEvent, EventStream};

/// Aggregated outcome of a batch of runs
#[derive(Debug, Default, Serialize)]
pub struct Summary {
    pub runs: usize,
    pub failed_runs: usize,
    pub started: usize,
    pub requests: usize,
    pub responses: usize,
    pub errors: usize,
    pub latency: Option<LatencyStats>,
    /// Error message → occurrences
    pub error_messages: BTreeMap<String, usize>,
}

/// Response latency statistics in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyStats {
    pub min_ms: f64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub max_ms: f64,
}

impl LatencyStats {
    /// Compute statistics from latencies in nanoseconds
    pub fn from_nanos(mut samples: Vec<u64>) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        samples.sort_unstable();

        let to_ms = |ns: u64| ns as f64 / 1_000_000.0;
        let sum: u128 = samples.iter().map(|&ns| ns as u128).sum();

        Some(Self {
            min_ms: to_ms(samples[0]),
            mean_ms: sum as f64 / samples.len() as f64 / 1_000_000.0,
            p50_ms: to_ms(percentile(&samples, 0.50)),
            p95_ms: to_ms(percentile(&samples, 0.95)),
            max_ms: to_ms(samples[samples.len() - 1]),
        })
    }
}

/// Nearest-rank percentile of sorted, non-empty samples
fn percentile(sorted: &[u64], p: f64) -> u64 {
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Drain the event stream until every sink is dropped
pub async fn collect(mut stream: EventStream) -> Summary {
    let mut summary = Summary::default();
    let mut latencies = Vec::new();

    while let Some(event) = stream.recv().await {
        match event {
            EngineEvent::Started => summary.started += 1,
            EngineEvent::Request => summary.requests += 1,
            EngineEvent::Response { latency_ns, .. } => {
                summary.responses += 1;
                latencies.push(latency_ns);
            }
            EngineEvent::Error { message } => {
                summary.errors += 1;
                *summary.error_messages.entry(message).or_insert(0) += 1;
            }
        }
    }

    summary.latency = LatencyStats::from_nanos(latencies);
    summary
}

/// Print a human-readable summary
pub fn print_summary(summary: &Summary) {
    println!("\n{}", "Summary:".cyan());
    println!("  runs:      {}", summary.runs);
    println!("  started:   {}", summary.started);
    println!("  requests:  {}", summary.requests);
    println!("  responses: {}", summary.responses);

    if summary.errors > 0 {
        println!("  errors:    {}", summary.errors.to_string().red());
        for (message, count) in &summary.error_messages {
            println!("    {} × {}", count, message.dimmed());
        }
    } else {
        println!("  errors:    0");
    }

    if let Some(latency) = &summary.latency {
        println!("\n{}", "Latency (ms):".cyan());
        println!(
            "  min {:.3}  mean {:.3}  p50 {:.3}  p95 {:.3}  max {:.3}",
            latency.min_ms, latency.mean_ms, latency.p50_ms, latency.p95_ms, latency.max_ms
        );
    }

    if summary.failed_runs == 0 {
        println!(
            "\n{} {}\n",
            "✓".green().bold(),
            "All runs completed".green().bold()
        );
    } else {
        println!(
            "\n{} {}\n",
            "✗".red().bold(),
            format!("{} of {} runs failed", summary.failed_runs, summary.runs)
                .red()
                .bold()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::events;

    #[test]
    fn test_latency_stats() {
        let samples = (1..=100).map(|ms| ms * 1_000_000).collect();
        let stats = LatencyStats::from_nanos(samples).unwrap();
        assert_eq!(stats.min_ms, 1.0);
        assert_eq!(stats.max_ms, 100.0);
        assert_eq!(stats.p50_ms, 50.0);
        assert_eq!(stats.p95_ms, 95.0);
        assert!((stats.mean_ms - 50.5).abs() < 1e-9);
        assert!(LatencyStats::from_nanos(Vec::new()).is_none());
    }

    #[test]
    fn test_single_sample_percentiles() {
        let stats = LatencyStats::from_nanos(vec![2_000_000]).unwrap();
        assert_eq!(stats.p50_ms, 2.0);
        assert_eq!(stats.p95_ms, 2.0);
    }

    #[tokio::test]
    async fn test_collect_counts_events() {
        let (sink, stream) = events::channel();
        sink.emit(EngineEvent::Started);
        sink.emit(EngineEvent::Request);
        sink.emit(EngineEvent::Response {
            latency_ns: 3_000_000,
            payload_hex: "00".into(),
            run_id: "r1".into(),
        });
        sink.emit(EngineEvent::Request);
        sink.emit(EngineEvent::Error {
            message: "Socket closed".into(),
        });
        drop(sink);

        let summary = collect(stream).await;
        assert_eq!(summary.started, 1);
        assert_eq!(summary.requests, 2);
        assert_eq!(summary.responses, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.error_messages.get("Socket closed"), Some(&1));
        assert_eq!(summary.latency.unwrap().max_ms, 3.0);
    }
}
