use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::record::colorize_footprint;

#[derive(Debug, Default, Clone, Copy)]
struct QueryStats {
    count: u64,
    total: Duration,
}

/// Request-scoped performance accounting.
///
/// Counts database queries and their accumulated duration; both values are
/// monotonically non-decreasing. The three-token footprint
/// `<count> <query_seconds> <other_seconds>` is stitched into every log
/// line emitted while the request is active.
#[derive(Debug)]
pub struct PerfCounter {
    started: Instant,
    stats: Mutex<QueryStats>,
}

impl Default for PerfCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl PerfCounter {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            stats: Mutex::new(QueryStats::default()),
        }
    }

    /// Record one database query of the given duration.
    pub fn add_query(&self, duration: Duration) {
        let mut stats = self.stats.lock().expect("perf counter poisoned");
        stats.count += 1;
        stats.total += duration;
    }

    /// Consistent snapshot: (query count, query seconds, other seconds).
    pub fn snapshot(&self) -> (u64, f64, f64) {
        let stats = *self.stats.lock().expect("perf counter poisoned");
        let elapsed = self.started.elapsed();
        let other = elapsed.saturating_sub(stats.total);
        (stats.count, stats.total.as_secs_f64(), other.as_secs_f64())
    }

    pub fn footprint(&self) -> String {
        let (count, query, other) = self.snapshot();
        format!("{} {:.3} {:.3}", count, query, other)
    }

    pub fn footprint_colored(&self) -> String {
        let (count, query, other) = self.snapshot();
        colorize_footprint(count, query, other)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Run a database operation and report its duration to the counter.
///
/// This is the wrapper every database call site goes through so the
/// footprint reflects real query time.
pub async fn track_query<T, F>(counter: &PerfCounter, operation: F) -> T
where
    F: Future<Output = T>,
{
    let start = Instant::now();
    let result = operation.await;
    counter.add_query(start.elapsed());
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_accumulate() {
        let counter = PerfCounter::new();
        counter.add_query(Duration::from_millis(120));
        counter.add_query(Duration::from_millis(80));

        let (count, query, _other) = counter.snapshot();
        assert_eq!(count, 2);
        assert!((query - 0.2).abs() < 0.005);
    }

    #[test]
    fn test_footprint_shape() {
        let counter = PerfCounter::new();
        counter.add_query(Duration::from_millis(50));

        let footprint = counter.footprint();
        let tokens: Vec<&str> = footprint.split(' ').collect();
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0], "1");
        assert!(tokens[1].contains('.'));
        assert!(tokens[2].contains('.'));
    }

    #[test]
    fn test_other_time_excludes_query_time() {
        let counter = PerfCounter::new();
        std::thread::sleep(Duration::from_millis(20));
        counter.add_query(Duration::from_millis(15));

        let (_, query, other) = counter.snapshot();
        // elapsed >= 20ms, of which 15ms counted as query time
        assert!((query - 0.015).abs() < 0.001);
        assert!(other >= 0.004);
    }

    #[tokio::test]
    async fn test_track_query_reports_duration() {
        let counter = PerfCounter::new();
        let value = track_query(&counter, async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            7
        })
        .await;

        assert_eq!(value, 7);
        let (count, query, _) = counter.snapshot();
        assert_eq!(count, 1);
        assert!(query >= 0.009);
    }

    #[test]
    fn test_concurrent_add_query() {
        let counter = std::sync::Arc::new(PerfCounter::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        counter.add_query(Duration::from_micros(10));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let (count, _, _) = counter.snapshot();
        assert_eq!(count, 800);
    }
}
