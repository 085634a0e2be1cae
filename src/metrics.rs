//! Latency figures the controller derives from a worker's result.
//!
//! Dispatch and return latency subtract timestamps taken on two different
//! hosts. Nothing here corrects for clock skew, so on unsynchronized machines
//! either value may come out negative.

use std::fmt::Write as _;

use console::style;
use time::{Duration, OffsetDateTime};

use crate::structs::WorkerMetrics;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionMetrics {
    /// Worker's job receipt minus the controller's job send.
    pub dispatch_latency: Duration,
    pub worker_crack_time: Duration,
    /// Controller's result receipt minus the worker's result send.
    pub result_return_latency: Duration,
}

impl SessionMetrics {
    pub fn compute(
        job_sent_at: OffsetDateTime,
        result_received_at: OffsetDateTime,
        worker: &WorkerMetrics,
    ) -> Self {
        Self {
            dispatch_latency: worker.job_received_at - job_sent_at,
            worker_crack_time: Duration::nanoseconds(
                i64::try_from(worker.total_crack_nanos).unwrap_or(i64::MAX),
            ),
            result_return_latency: result_received_at - worker.result_sent_at,
        }
    }
}

/// Formats a duration the way the metrics block prints it.
pub fn human_duration(d: Duration) -> String {
    let abs = d.abs();

    if abs < Duration::MICROSECOND {
        format!("{} ns", d.whole_nanoseconds())
    } else if abs < Duration::SECOND {
        format!("{:.3} ms", d.whole_microseconds() as f64 / 1000.0)
    } else {
        format!("{:.3} s", d.as_seconds_f64())
    }
}

/// What the controller prints once a session ends without a worker error.
#[derive(Clone, Debug)]
pub struct Summary<'a> {
    pub password: Option<&'a str>,
    pub parse_time: Duration,
    pub session: SessionMetrics,
    pub end_to_end: Duration,
    pub heartbeats: usize,
}

impl Summary<'_> {
    pub fn render(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "\n{}", style("==== Cracking Results ====").bold());
        match self.password {
            Some(password) => {
                let _ = writeln!(out, "Password Found: {}", style(password).bold().green());
            }
            None => {
                let _ = writeln!(out, "{}", style("Password Not Found").red());
            }
        }

        let _ = writeln!(out, "\n{}", style("==== Metrics ====").bold());
        let rows = [
            ("Controller parse time:", self.parse_time),
            ("Job dispatch latency:", self.session.dispatch_latency),
            ("Worker cracking time:", self.session.worker_crack_time),
            ("Result return latency:", self.session.result_return_latency),
            ("End-to-end runtime:", self.end_to_end),
        ];
        for (label, value) in rows {
            let _ = writeln!(out, "{label:<26}{}", human_duration(value));
        }
        let _ = writeln!(out, "{:<26}{}", "Heartbeats received:", self.heartbeats);

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn latencies_come_from_both_clocks() {
        let worker = WorkerMetrics {
            total_crack_nanos: 2_500_000_000,
            job_received_at: datetime!(2024-03-01 10:00:00.010 UTC),
            result_sent_at: datetime!(2024-03-01 10:00:05.000 UTC),
        };

        let metrics = SessionMetrics::compute(
            datetime!(2024-03-01 10:00:00.000 UTC),
            datetime!(2024-03-01 10:00:05.003 UTC),
            &worker,
        );

        assert_eq!(metrics.dispatch_latency, Duration::milliseconds(10));
        assert_eq!(metrics.worker_crack_time, Duration::milliseconds(2_500));
        assert_eq!(metrics.result_return_latency, Duration::milliseconds(3));
    }

    #[test]
    fn skewed_clocks_give_negative_latency() {
        let worker = WorkerMetrics {
            total_crack_nanos: 0,
            job_received_at: datetime!(2024-03-01 09:59:59 UTC),
            result_sent_at: datetime!(2024-03-01 10:00:00 UTC),
        };

        let metrics = SessionMetrics::compute(
            datetime!(2024-03-01 10:00:00 UTC),
            datetime!(2024-03-01 10:00:01 UTC),
            &worker,
        );

        assert!(metrics.dispatch_latency.is_negative());
        assert_eq!(human_duration(metrics.dispatch_latency), "-1.000 s");
    }

    #[test]
    fn human_duration_picks_a_unit() {
        assert_eq!(human_duration(Duration::nanoseconds(999)), "999 ns");
        assert_eq!(human_duration(Duration::microseconds(1_500)), "1.500 ms");
        assert_eq!(human_duration(Duration::milliseconds(999)), "999.000 ms");
        assert_eq!(human_duration(Duration::milliseconds(61_250)), "61.250 s");
        assert_eq!(human_duration(Duration::nanoseconds(-20)), "-20 ns");
    }

    #[test]
    fn summary_lists_every_metric() {
        console::set_colors_enabled(false);

        let summary = Summary {
            password: Some("A"),
            parse_time: Duration::microseconds(40),
            session: SessionMetrics {
                dispatch_latency: Duration::microseconds(300),
                worker_crack_time: Duration::milliseconds(12),
                result_return_latency: Duration::microseconds(90),
            },
            end_to_end: Duration::seconds(2),
            heartbeats: 1,
        };
        let text = summary.render();

        assert!(text.contains("Password Found: A"));
        assert!(text.contains("Job dispatch latency:     0.300 ms"));
        assert!(text.contains("Worker cracking time:     12.000 ms"));
        assert!(text.contains("End-to-end runtime:       2.000 s"));
        assert!(text.contains("Heartbeats received:      1"));

        let not_found = Summary {
            password: None,
            ..summary
        };
        assert!(not_found.render().contains("Password Not Found"));
    }
}
