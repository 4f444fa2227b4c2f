//! Progress extraction from the transcoder's `-progress` stream
//!
//! The transcoder writes blocks of `key=value` lines; a `speed` line closes
//! each block. One [`ProgressState`] lives for exactly one subprocess run.

use thiserror::Error;

/// A recognised key carried a value that could not be parsed
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Progress parse error: invalid value '{value}' for '{key}'")]
pub struct ProgressParseError {
    pub key: String,
    pub value: String,
}

/// Snapshot emitted when a progress block is complete
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressReport {
    pub frame: u64,
    pub fps: f64,
    pub time_seconds: f64,
    pub speed: String,
    /// `None` when the target duration is unknown
    pub percent: Option<f64>,
}

/// Running state for a single subprocess's progress stream
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressState {
    pub last_frame: u64,
    pub last_fps: f64,
    pub last_time_seconds: f64,
    pub speed_label: String,
    target_duration: f64,
}

impl ProgressState {
    /// Create a fresh state measuring against `target_duration` seconds
    pub fn new(target_duration: f64) -> Self {
        Self {
            last_frame: 0,
            last_fps: 0.0,
            last_time_seconds: 0.0,
            speed_label: "0x".to_string(),
            target_duration,
        }
    }

    pub fn target_duration(&self) -> f64 {
        self.target_duration
    }

    /// Consume one line of the progress stream.
    ///
    /// Returns `Ok(Some(report))` when the line was the `speed` terminator,
    /// `Ok(None)` for every other line. A malformed value leaves the state
    /// untouched and is returned as an error; the caller keeps feeding lines.
    pub fn feed_line(&mut self, line: &str) -> Result<Option<ProgressReport>, ProgressParseError> {
        let Some((key, value)) = line.trim().split_once('=') else {
            return Ok(None);
        };
        let key = key.trim();
        let value = value.trim();

        let invalid = || ProgressParseError {
            key: key.to_string(),
            value: value.to_string(),
        };

        match key {
            "frame" => {
                self.last_frame = value.parse().map_err(|_| invalid())?;
            }
            "fps" => {
                self.last_fps = value.parse().map_err(|_| invalid())?;
            }
            "out_time_us" => {
                let micros: i64 = value.parse().map_err(|_| invalid())?;
                self.last_time_seconds = micros as f64 / 1_000_000.0;
            }
            "speed" => {
                self.speed_label = value.to_string();
                return Ok(Some(self.report()));
            }
            _ => {}
        }

        Ok(None)
    }

    /// Current snapshot, with the percentage computed against the target
    pub fn report(&self) -> ProgressReport {
        ProgressReport {
            frame: self.last_frame,
            fps: self.last_fps,
            time_seconds: self.last_time_seconds,
            speed: self.speed_label.clone(),
            percent: percent_complete(self.last_time_seconds, self.target_duration),
        }
    }
}

/// `elapsed / target * 100`, clamped to `[0, 100]`; `None` for a non-positive target
pub fn percent_complete(elapsed_seconds: f64, target_seconds: f64) -> Option<f64> {
    if target_seconds <= 0.0 || !target_seconds.is_finite() {
        return None;
    }
    Some((elapsed_seconds / target_seconds * 100.0).clamp(0.0, 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_full_block_flushes_on_speed() {
        let mut state = ProgressState::new(10.0);

        assert_eq!(state.feed_line("frame=100"), Ok(None));
        assert_eq!(state.feed_line("fps=30.0"), Ok(None));
        assert_eq!(state.feed_line("out_time_us=5000000"), Ok(None));
        let report = state.feed_line("speed=2.5x").unwrap().expect("speed flushes");

        assert_eq!(state.last_frame, 100);
        assert_eq!(state.last_fps, 30.0);
        assert_eq!(state.last_time_seconds, 5.0);
        assert_eq!(report.speed, "2.5x");
        assert_eq!(report.percent, Some(50.0));
    }

    #[test]
    fn test_unknown_keys_and_garbage_ignored() {
        let mut state = ProgressState::new(10.0);
        assert_eq!(state.feed_line("bitrate=1234.5kbits/s"), Ok(None));
        assert_eq!(state.feed_line("progress=continue"), Ok(None));
        assert_eq!(state.feed_line("no separator here"), Ok(None));
        assert_eq!(state.feed_line(""), Ok(None));
        assert_eq!(state, ProgressState::new(10.0));
    }

    #[test]
    fn test_malformed_value_is_non_fatal() {
        let mut state = ProgressState::new(10.0);
        state.feed_line("frame=12").unwrap();

        let err = state.feed_line("out_time_us=N/A").unwrap_err();
        assert_eq!(err.key, "out_time_us");
        assert_eq!(err.value, "N/A");

        // Later lines keep working and earlier values survive
        state.feed_line("out_time_us=1000000").unwrap();
        let report = state.feed_line("speed=1x").unwrap().unwrap();
        assert_eq!(report.frame, 12);
        assert_eq!(report.time_seconds, 1.0);
    }

    #[test]
    fn test_unknown_duration_has_no_percent() {
        let mut state = ProgressState::new(0.0);
        state.feed_line("out_time_us=3000000").unwrap();
        let report = state.feed_line("speed=0.9x").unwrap().unwrap();
        assert_eq!(report.percent, None);
    }

    #[test]
    fn test_percent_clamped() {
        assert_eq!(percent_complete(20.0, 10.0), Some(100.0));
        assert_eq!(percent_complete(-0.04, 10.0), Some(0.0));
        assert_eq!(percent_complete(1.0, -3.0), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_percent_always_in_bounds(
            micros in -10_000_000i64..1_000_000_000,
            target in 0.001f64..10_000.0,
        ) {
            let mut state = ProgressState::new(target);
            state.feed_line(&format!("out_time_us={}", micros)).unwrap();
            let report = state.feed_line("speed=1.0x").unwrap().unwrap();
            let percent = report.percent.unwrap();
            prop_assert!((0.0..=100.0).contains(&percent));
        }
    }
}
