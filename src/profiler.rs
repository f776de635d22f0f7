//! Lightweight per-phase profiler, enabled with the `profile` feature.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Accumulated timing per named physics phase.
#[derive(Default)]
pub struct Profiler {
    sections: HashMap<&'static str, SectionStats>,
    current: Option<(&'static str, Instant)>,
    ticks: u64,
}

#[derive(Default, Clone, Copy)]
pub struct SectionStats {
    pub total: Duration,
    pub calls: u64,
}

impl SectionStats {
    pub fn avg(&self) -> Duration {
        if self.calls == 0 {
            Duration::ZERO
        } else {
            self.total / self.calls as u32
        }
    }
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, name: &'static str) {
        self.current = Some((name, Instant::now()));
    }

    pub fn end(&mut self) {
        if let Some((name, start)) = self.current.take() {
            let stats = self.sections.entry(name).or_default();
            stats.total += start.elapsed();
            stats.calls += 1;
        }
    }

    pub fn tick(&mut self) {
        self.ticks += 1;
    }

    pub fn get(&self, name: &str) -> Option<SectionStats> {
        self.sections.get(name).copied()
    }

    /// Print a per-phase summary sorted by total time.
    pub fn print_summary(&self) {
        let mut sections: Vec<_> = self.sections.iter().collect();
        sections.sort_by(|a, b| b.1.total.cmp(&a.1.total));
        println!("=== physics profile ({} sub-steps) ===", self.ticks);
        for (name, stats) in sections {
            println!(
                "{:<20} total {:>10.2?}  avg/call {:>10.2?}  calls {}",
                name,
                stats.total,
                stats.avg(),
                stats.calls
            );
        }
    }

    pub fn reset(&mut self) {
        self.sections.clear();
        self.current = None;
        self.ticks = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiler_records_sections() {
        let mut profiler = Profiler::new();
        profiler.begin("beams");
        std::thread::sleep(Duration::from_millis(2));
        profiler.end();
        profiler.tick();

        let stats = profiler.get("beams").unwrap();
        assert_eq!(stats.calls, 1);
        assert!(stats.total >= Duration::from_millis(2));
    }
}
