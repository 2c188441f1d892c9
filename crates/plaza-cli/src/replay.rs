//! Position source that replays a recorded track.
//!
//! A track file holds one fix per line as `lat,lng` or `lat,lng,accuracy`.
//! Blank lines and lines starting with `#` are skipped. While watching, the
//! source emits the next fix every `interval` and wraps around at the end of
//! the track. An empty track reports no positioning capability. Timing and
//! sample timestamps come from the [`Environment`].

use std::{path::Path, time::Duration};

use plaza_client::{PositionEvent, transport::PositionSource};
use plaza_core::{Environment, PositionOptions, PositionSample};
use thiserror::Error;

/// Errors loading a track file.
#[derive(Debug, Error)]
pub enum TrackError {
    /// The file could not be read.
    #[error("failed to read track {path}: {source}")]
    Io {
        /// Track path as given
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A line is not a valid fix.
    #[error("track line {line}: {reason}")]
    Parse {
        /// 1-based line number
        line: usize,
        /// What was wrong
        reason: String,
    },
}

/// One recorded fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    /// Degrees north.
    pub latitude: f64,
    /// Degrees east.
    pub longitude: f64,
    /// Horizontal accuracy in meters.
    pub accuracy: Option<f64>,
}

/// Parse a track from text.
pub fn parse_track(text: &str) -> Result<Vec<Fix>, TrackError> {
    let mut fixes = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parse_error = |reason: String| TrackError::Parse { line: index + 1, reason };
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if !(2..=3).contains(&fields.len()) {
            return Err(parse_error(format!("expected 2 or 3 fields, got {}", fields.len())));
        }

        let number = |field: &str| {
            field
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .ok_or_else(|| parse_error(format!("`{field}` is not a number")))
        };

        let latitude = number(fields[0])?;
        let longitude = number(fields[1])?;
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(parse_error(format!("{latitude},{longitude} is out of range")));
        }

        let accuracy = fields.get(2).copied().map(number).transpose()?;
        fixes.push(Fix { latitude, longitude, accuracy });
    }

    Ok(fixes)
}

/// Load a track from a file.
pub fn load_track(path: &Path) -> Result<Vec<Fix>, TrackError> {
    let text = std::fs::read_to_string(path)
        .map_err(|source| TrackError::Io { path: path.display().to_string(), source })?;
    parse_track(&text)
}

/// Replays fixes as device readings.
#[derive(Debug)]
pub struct ReplaySource<E: Environment> {
    env: E,
    fixes: Vec<Fix>,
    interval: Duration,
    cursor: usize,
    watching: bool,
    last_emitted: Option<E::Instant>,
    pending_request: bool,
}

impl<E: Environment> ReplaySource<E> {
    /// Replay `fixes`, one every `interval` while watching.
    pub fn new(env: E, fixes: Vec<Fix>, interval: Duration) -> Self {
        Self {
            env,
            fixes,
            interval,
            cursor: 0,
            watching: false,
            last_emitted: None,
            pending_request: false,
        }
    }

    fn next_sample(&mut self) -> Option<PositionSample> {
        let fix = *self.fixes.get(self.cursor)?;
        self.cursor = (self.cursor + 1) % self.fixes.len();

        Some(PositionSample {
            latitude: fix.latitude,
            longitude: fix.longitude,
            accuracy: fix.accuracy,
            speed: None,
            heading: None,
            captured_at: self.env.wall_clock(),
        })
    }

    fn poll_at(&mut self, now: E::Instant) -> Option<PositionEvent> {
        if self.pending_request {
            self.pending_request = false;
            if self.watching {
                self.last_emitted = Some(now);
            }
            return self.next_sample().map(PositionEvent::Sample);
        }

        if !self.watching {
            return None;
        }

        match self.last_emitted {
            Some(last) if now - last < self.interval => None,
            _ => {
                self.last_emitted = Some(now);
                self.next_sample().map(PositionEvent::Sample)
            },
        }
    }
}

impl<E: Environment> PositionSource for ReplaySource<E> {
    fn available(&self) -> bool {
        !self.fixes.is_empty()
    }

    fn request(&mut self, _options: PositionOptions) {
        self.pending_request = true;
    }

    fn watch(&mut self, _options: PositionOptions) {
        tracing::debug!(fixes = self.fixes.len(), interval = ?self.interval, "replaying track");
        self.watching = true;
        self.last_emitted = None;
    }

    fn clear(&mut self) {
        self.watching = false;
        self.last_emitted = None;
    }

    fn poll(&mut self) -> Option<PositionEvent> {
        let now = self.env.now();
        self.poll_at(now)
    }
}

#[cfg(test)]
mod tests {
    use plaza_client::SystemEnv;
    use proptest::prelude::*;

    use super::*;

    const TRACK: &str = "\
# Bogota, walking north
4.7110,-74.0721
4.7120, -74.0721, 8.5

4.7130,-74.0722
";

    fn replay(interval_secs: u64) -> ReplaySource<SystemEnv> {
        let fixes = parse_track(TRACK).unwrap();
        ReplaySource::new(SystemEnv::new(), fixes, Duration::from_secs(interval_secs))
    }

    fn coordinates(event: Option<PositionEvent>) -> Option<(f64, f64)> {
        match event {
            Some(PositionEvent::Sample(sample)) => Some((sample.latitude, sample.longitude)),
            _ => None,
        }
    }

    #[test]
    fn parses_fixes_and_skips_comments() {
        let fixes = parse_track(TRACK).unwrap();

        assert_eq!(fixes.len(), 3);
        assert_eq!(fixes[0], Fix { latitude: 4.7110, longitude: -74.0721, accuracy: None });
        assert_eq!(fixes[1].accuracy, Some(8.5));
    }

    #[test]
    fn rejects_bad_lines_with_line_number() {
        let err = parse_track("4.7,-74.0\nnorth,-74.0\n").unwrap_err();
        assert!(matches!(err, TrackError::Parse { line: 2, .. }));

        let err = parse_track("4.7\n").unwrap_err();
        assert!(matches!(err, TrackError::Parse { line: 1, .. }));

        let err = parse_track("91.0,0.0\n").unwrap_err();
        assert!(matches!(err, TrackError::Parse { line: 1, .. }));
    }

    #[test]
    fn empty_track_has_no_capability() {
        let source = ReplaySource::new(SystemEnv::new(), Vec::new(), Duration::from_secs(1));
        assert!(!source.available());
    }

    #[test]
    fn watch_emits_on_interval_and_wraps() {
        let mut source = replay(2);
        let t0 = SystemEnv::new().now();

        assert!(source.poll_at(t0).is_none());

        source.watch(PositionOptions::default());
        assert_eq!(coordinates(source.poll_at(t0)), Some((4.7110, -74.0721)));
        assert!(source.poll_at(t0 + Duration::from_secs(1)).is_none());
        assert_eq!(coordinates(source.poll_at(t0 + Duration::from_secs(2))), Some((4.7120, -74.0721)));
        assert_eq!(coordinates(source.poll_at(t0 + Duration::from_secs(4))), Some((4.7130, -74.0722)));
        assert_eq!(coordinates(source.poll_at(t0 + Duration::from_secs(6))), Some((4.7110, -74.0721)));

        source.clear();
        assert!(source.poll_at(t0 + Duration::from_secs(60)).is_none());
    }

    #[test]
    fn request_emits_once() {
        let mut source = replay(2);
        source.request(PositionOptions::default());

        let now = SystemEnv::new().now();
        assert!(source.poll_at(now).is_some());
        assert!(source.poll_at(now).is_none());
    }

    #[test]
    fn request_then_watch_does_not_double_sample() {
        let mut source = replay(2);
        source.request(PositionOptions::default());
        source.watch(PositionOptions::default());

        let t0 = SystemEnv::new().now();
        assert_eq!(coordinates(source.poll_at(t0)), Some((4.7110, -74.0721)));
        assert!(source.poll_at(t0).is_none());
        assert_eq!(coordinates(source.poll_at(t0 + Duration::from_secs(2))), Some((4.7120, -74.0721)));
    }

    #[test]
    fn samples_are_stamped_by_environment() {
        let env = SystemEnv::new();
        let mut source = replay(2);
        source.request(PositionOptions::default());

        let before = env.wall_clock();
        let event = source.poll();
        let after = env.wall_clock();

        let sample = match event {
            Some(PositionEvent::Sample(sample)) => sample,
            other => panic!("expected a sample, got {other:?}"),
        };
        assert!(before <= sample.captured_at && sample.captured_at <= after);
    }

    proptest! {
        #[test]
        fn prop_in_range_fixes_parse(
            lat in -90.0f64..=90.0,
            lng in -180.0f64..=180.0,
        ) {
            let fixes = parse_track(&format!("{lat},{lng}")).unwrap();

            // PROPERTY: Display output of a finite float parses back exactly
            prop_assert_eq!(fixes, vec![Fix { latitude: lat, longitude: lng, accuracy: None }]);
        }
    }
}
