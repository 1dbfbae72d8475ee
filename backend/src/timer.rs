use log::debug;
use std::time::{Duration, Instant};

/// Times one pipeline stage; the duration is logged at debug level on stop.
pub struct Timer {
    stage: &'static str,
    started: Instant,
}

impl Timer {
    pub fn start(stage: &'static str) -> Self {
        debug!("{}: starting", stage);
        Self {
            stage,
            started: Instant::now(),
        }
    }

    pub fn stop(self) -> Duration {
        let elapsed = self.started.elapsed();
        debug!("{} duration: {} msec", self.stage, elapsed.as_millis());
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_reports_elapsed_time() {
        let t = Timer::start("sleep");
        std::thread::sleep(Duration::from_millis(5));
        assert!(t.stop() >= Duration::from_millis(5));
    }
}
