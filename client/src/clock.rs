//! Clock drift controller.
//!
//! Keeps `server_time ≈ realtime + server_time_delta` close behind the newest
//! snapshot. The delta is corrected once per batch of new snapshots: a hard
//! reset for large errors, a halving step for moderate ones, and a 1-2 ms
//! drift otherwise. All arithmetic is integer milliseconds.

use tracing::debug;

use crate::config::ClientConfig;

/// Intervals kept for the server cadence estimate.
const CADENCE_WINDOW: usize = 8;

/// Longest frame or snapshot period considered, in milliseconds.
const MAX_PERIOD: i32 = 1000;

/// Outcome of one drift correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftAdjustment {
    /// Delta snapped to the observed value.
    Reset,
    /// Delta moved halfway to the observed value.
    Fast,
    /// Delta nudged by the given number of milliseconds.
    Slow(i32),
    /// Within tolerance; nothing changed.
    Hold,
}

/// Worst-case overrun of a client ticking every `client_period` ms against
/// a server ticking every `server_period` ms.
///
/// Simulates client ticks over one least-common-multiple window and returns
/// the largest distance between a client tick and the newest server tick at
/// or before it. Returns 0 when either period is not positive. Runs in
/// `O(server_period / gcd)` steps.
#[must_use]
pub fn compute_safe_increment_threshold(client_period: i32, server_period: i32) -> i32 {
    if client_period <= 0 || server_period <= 0 {
        return 0;
    }
    let fc = i64::from(client_period);
    let fs = i64::from(server_period);
    let lcm = fc / gcd(fc, fs) * fs;

    let mut min_spare = 0i64;
    let mut t = 0i64;
    while t < lcm {
        let server_tick = (t / fs) * fs;
        min_spare = min_spare.min(server_tick - t);
        t += fc;
    }
    i32::try_from(min_spare.abs()).unwrap_or(i32::MAX)
}

const fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

/// Tracks client frame and server snapshot periods and caches the safe
/// increment threshold for them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CadenceEstimator {
    client_period: i32,
    server_hint: Option<i32>,
    intervals: [i32; CADENCE_WINDOW],
    cursor: usize,
    last_snapshot_time: Option<i32>,
    computed_for: (i32, i32),
    threshold: i32,
}

impl CadenceEstimator {
    /// Records the length of a client frame.
    pub fn observe_frame(&mut self, msec: i32) {
        if msec > 0 {
            self.client_period = msec.min(MAX_PERIOD);
            self.refresh();
        }
    }

    /// Records the server time of a newly accepted snapshot.
    pub fn observe_snapshot(&mut self, server_time: i32) {
        if let Some(last) = self.last_snapshot_time {
            let interval = server_time.saturating_sub(last);
            if interval > 0 {
                self.intervals[self.cursor] = interval.min(MAX_PERIOD);
                self.cursor = (self.cursor + 1) % CADENCE_WINDOW;
            }
        }
        self.last_snapshot_time = Some(server_time);
        self.refresh();
    }

    /// Sets the advertised snapshot period, overriding observation.
    pub fn set_server_hint(&mut self, period: Option<i32>) {
        self.server_hint = period.filter(|p| *p > 0).map(|p| p.min(MAX_PERIOD));
        self.refresh();
    }

    #[must_use]
    pub const fn client_period(&self) -> i32 {
        self.client_period
    }

    /// Advertised period if known, else the shortest recent interval.
    #[must_use]
    pub fn server_period(&self) -> i32 {
        self.server_hint.unwrap_or_else(|| {
            self.intervals
                .iter()
                .copied()
                .filter(|i| *i > 0)
                .min()
                .unwrap_or(0)
        })
    }

    #[must_use]
    pub const fn threshold(&self) -> i32 {
        self.threshold
    }

    fn refresh(&mut self) {
        let periods = (self.client_period, self.server_period());
        if periods != self.computed_for {
            self.threshold = compute_safe_increment_threshold(periods.0, periods.1);
            self.computed_for = periods;
            debug!(
                client_period = periods.0,
                server_period = periods.1,
                threshold = self.threshold,
                "recomputed safe increment threshold"
            );
        }
    }
}

/// Render clock state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClockState {
    /// Published server time for this frame.
    pub server_time: i32,
    /// Floor that keeps `server_time` from running backwards.
    pub old_server_time: i32,
    /// Believed offset from local realtime to server time.
    pub server_time_delta: i32,
    /// Delta at the first snapshot, for drift reporting.
    pub baseline_delta: i32,
    /// Snapshot server time seen by the previous frame.
    pub old_frame_server_time: i32,
    /// Set when a frame ran up against the newest snapshot.
    pub extrapolated: bool,
    pub cadence: CadenceEstimator,
}

impl ClockState {
    /// Aligns the clock to the first valid snapshot of a session.
    pub fn first_snapshot(&mut self, snap_time: i32, realtime: i32) {
        self.server_time_delta = snap_time.saturating_sub(realtime);
        self.baseline_delta = self.server_time_delta;
        self.old_server_time = snap_time;
        self.server_time = snap_time;
        self.old_frame_server_time = snap_time;
        self.extrapolated = false;
    }

    /// Corrects the delta after new snapshots arrived.
    pub fn adjust(&mut self, snap_time: i32, realtime: i32, config: &ClientConfig) -> DriftAdjustment {
        let new_delta = snap_time.saturating_sub(realtime);
        let delta_delta = new_delta.saturating_sub(self.server_time_delta).saturating_abs();

        if delta_delta > config.reset_threshold {
            debug!(
                old_delta = self.server_time_delta,
                new_delta, "resetting server time delta"
            );
            self.server_time_delta = new_delta;
            self.server_time = self.server_time.max(snap_time);
            self.old_server_time = self.server_time;
            return DriftAdjustment::Reset;
        }

        if delta_delta > config.halve_threshold {
            let midpoint = (i64::from(self.server_time_delta) + i64::from(new_delta)) >> 1;
            #[allow(clippy::cast_possible_truncation)]
            let midpoint = midpoint as i32;
            self.server_time_delta = midpoint;
            return DriftAdjustment::Fast;
        }

        if self.extrapolated {
            self.extrapolated = false;
            self.server_time_delta -= 2;
            return DriftAdjustment::Slow(-2);
        }

        let spare = snap_time.saturating_sub(realtime.saturating_add(self.server_time_delta));
        if spare > self.cadence.threshold() {
            self.server_time_delta += 1;
            return DriftAdjustment::Slow(1);
        }
        DriftAdjustment::Hold
    }

    /// Produces this frame's server time.
    ///
    /// The result never drops below the previously published value.
    pub fn advance(&mut self, realtime: i32, snap_time: i32, config: &ClientConfig) -> i32 {
        let nudge = config.time_nudge.clamp(-30, 30);
        let unnudged = realtime.saturating_add(self.server_time_delta);
        let time = unnudged.saturating_sub(nudge).max(self.old_server_time);
        self.server_time = time;
        self.old_server_time = time;

        if unnudged >= snap_time.saturating_sub(config.extrapolation_margin) {
            self.extrapolated = true;
        }
        time
    }

    /// Pins the clock to `target` and zeroes the delta.
    ///
    /// Used by programmatic seeks, which bypass drift control.
    pub fn pin(&mut self, target: i32) {
        self.server_time = target;
        self.old_server_time = target;
        self.server_time_delta = 0;
    }

    /// Drift of the delta since the session started.
    #[must_use]
    pub const fn drift(&self) -> i32 {
        self.server_time_delta - self.baseline_delta
    }
}
