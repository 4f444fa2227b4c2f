//! Timestamp parsing and clip time ranges
//!
//! Accepts `SS`, `MM:SS` and `HH:MM:SS` notation with fractional seconds.

use thiserror::Error;

/// Error type for timestamp and time range handling
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimestampError {
    /// Input is not a recognised time notation
    #[error("Time given in invalid format: '{input}'")]
    Format { input: String },

    /// The end of the range precedes its start
    #[error("TO timestamp ({to}s) can not be set before FROM ({from}s)")]
    EndBeforeStart { from: f64, to: f64 },
}

/// Parse a timestamp into seconds.
///
/// Three-segment input is computed as `hours * 60 + minutes * 60 + seconds`,
/// so `01:30:00` yields 1860.0 rather than 5400.0.
pub fn parse_timestamp(input: &str) -> Result<f64, TimestampError> {
    let format_error = || TimestampError::Format {
        input: input.to_string(),
    };

    let parts: Vec<&str> = input
        .trim()
        .split(':')
        .filter(|part| !part.is_empty())
        .collect();

    let whole = |s: &str| s.trim().parse::<i64>().map(|v| v as f64).map_err(|_| format_error());
    let seconds = |s: &str| {
        s.trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(format_error)
    };

    match parts.as_slice() {
        [s] => seconds(s),
        [m, s] => Ok(whole(m)? * 60.0 + seconds(s)?),
        [h, m, s] => Ok(whole(h)? * 60.0 + whole(m)? * 60.0 + seconds(s)?),
        _ => Err(format_error()),
    }
}

/// Requested portion of the reference clip, in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub from: f64,
    /// `None` means "until the end of the clip"
    pub to: Option<f64>,
}

impl Default for TimeRange {
    fn default() -> Self {
        Self { from: 0.0, to: None }
    }
}

impl TimeRange {
    /// Parse the operator-supplied bounds; a missing `from` starts at zero.
    ///
    /// Fails if both bounds are present and `to < from`.
    pub fn parse(from: Option<&str>, to: Option<&str>) -> Result<Self, TimestampError> {
        let from = match from {
            Some(s) => parse_timestamp(s)?,
            None => 0.0,
        };
        let to = to.map(parse_timestamp).transpose()?;

        let range = Self { from, to };
        range.check()?;
        Ok(range)
    }

    fn check(&self) -> Result<(), TimestampError> {
        match self.to {
            Some(to) if to < self.from => Err(TimestampError::EndBeforeStart {
                from: self.from,
                to,
            }),
            _ => Ok(()),
        }
    }

    /// Fill in an open end from the probed clip duration.
    ///
    /// An unknown (zero) duration leaves the end open.
    pub fn resolve(&self, duration: f64) -> Result<ClipWindow, TimestampError> {
        let to = self.to.or(if duration > 0.0 { Some(duration) } else { None });
        let window = ClipWindow {
            from: self.from,
            to,
        };
        if let Some(to) = to {
            if to < self.from {
                return Err(TimestampError::EndBeforeStart {
                    from: self.from,
                    to,
                });
            }
        }
        Ok(window)
    }
}

/// Effective extraction window after metadata probing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipWindow {
    pub from: f64,
    pub to: Option<f64>,
}

impl ClipWindow {
    /// Length of the extracted clip; zero when the end is unknown
    pub fn duration(&self) -> f64 {
        self.to.map(|to| to - self.from).unwrap_or(0.0)
    }
}
