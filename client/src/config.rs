//! Tunables for the clock controller, buffers and demo seeking.

use std::num::NonZeroUsize;

use crate::types::{CMD_BACKUP, MAX_ENTITIES_IN_SNAPSHOT, MAX_PARSE_ENTITIES, MAX_RELIABLE_COMMANDS, PACKET_BACKUP};

/// Default number of rewind checkpoints kept in memory.
pub const MAX_REWIND_BACKUPS: usize = 20;

/// Ring buffer depths.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BufferLimits {
    /// Snapshots kept for delta decoding and interpolation.
    pub snapshot_backup: NonZeroUsize,
    /// Entity states kept across buffered snapshots.
    pub parse_entities: NonZeroUsize,
    /// Entities handed out per snapshot read.
    pub entities_in_snapshot: usize,
    /// Reliable server commands kept.
    pub reliable_commands: NonZeroUsize,
    /// Outbound user commands kept.
    pub cmd_backup: NonZeroUsize,
}

impl Default for BufferLimits {
    fn default() -> Self {
        Self {
            snapshot_backup: nz(PACKET_BACKUP),
            parse_entities: nz(MAX_PARSE_ENTITIES),
            entities_in_snapshot: MAX_ENTITIES_IN_SNAPSHOT,
            reliable_commands: nz(MAX_RELIABLE_COMMANDS),
            cmd_backup: nz(CMD_BACKUP),
        }
    }
}

impl BufferLimits {
    /// Creates limits suitable for testing with smaller values.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            snapshot_backup: nz(8),
            parse_entities: nz(256),
            entities_in_snapshot: 16,
            reliable_commands: nz(16),
            cmd_backup: nz(8),
        }
    }
}

/// Client configuration surface.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ClientConfig {
    /// Milliseconds subtracted from the render clock. Clamped to -30..=30.
    pub time_nudge: i32,
    /// How close to the newest snapshot the clock may run before the frame
    /// counts as extrapolated. Clamped to 0..=100.
    pub extrapolation_margin: i32,
    /// Drift beyond which the delta snaps to the new value.
    pub reset_threshold: i32,
    /// Drift beyond which the delta moves halfway to the new value.
    pub halve_threshold: i32,
    /// Rewind checkpoints kept. Clamped to 1..=256.
    pub max_rewind_backups: usize,
    /// Messages between checkpoints; 0 spreads checkpoints evenly over the
    /// recording.
    pub rewind_interval: u64,
    pub buffers: BufferLimits,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            time_nudge: 0,
            extrapolation_margin: 5,
            reset_threshold: 500,
            halve_threshold: 100,
            max_rewind_backups: MAX_REWIND_BACKUPS,
            rewind_interval: 0,
            buffers: BufferLimits::default(),
        }
    }
}

impl ClientConfig {
    /// Creates a configuration with small buffers for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            buffers: BufferLimits::for_testing(),
            ..Self::default()
        }
    }

    /// Returns a copy with every setting inside its documented range.
    #[must_use]
    pub fn clamped(&self) -> Self {
        let reset_threshold = self.reset_threshold.max(1);
        Self {
            time_nudge: self.time_nudge.clamp(-30, 30),
            extrapolation_margin: self.extrapolation_margin.clamp(0, 100),
            reset_threshold,
            halve_threshold: self.halve_threshold.clamp(0, reset_threshold),
            max_rewind_backups: self.max_rewind_backups.clamp(1, 256),
            rewind_interval: self.rewind_interval,
            buffers: self.buffers.clone(),
        }
    }

    /// Messages between checkpoints for a recording of `total_messages`.
    #[must_use]
    pub fn checkpoint_interval(&self, total_messages: u64) -> u64 {
        if self.rewind_interval > 0 {
            return self.rewind_interval;
        }
        (total_messages / self.max_rewind_backups.max(1) as u64).max(1)
    }
}

const fn nz(value: usize) -> NonZeroUsize {
    match NonZeroUsize::new(value) {
        Some(v) => v,
        None => NonZeroUsize::MIN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_depths() {
        let config = ClientConfig::default();
        assert_eq!(config.buffers.snapshot_backup.get(), 32);
        assert_eq!(config.buffers.parse_entities.get(), 2048);
        assert_eq!(config.buffers.reliable_commands.get(), 256);
        assert_eq!(config.max_rewind_backups, 20);
        assert_eq!(config.extrapolation_margin, 5);
    }

    #[test]
    fn clamped_bounds_settings() {
        let config = ClientConfig {
            time_nudge: -100,
            extrapolation_margin: 500,
            max_rewind_backups: 0,
            halve_threshold: 900,
            ..ClientConfig::default()
        }
        .clamped();
        assert_eq!(config.time_nudge, -30);
        assert_eq!(config.extrapolation_margin, 100);
        assert_eq!(config.max_rewind_backups, 1);
        assert_eq!(config.halve_threshold, config.reset_threshold);
    }

    #[test]
    fn automatic_interval_spreads_checkpoints() {
        let config = ClientConfig::default();
        assert_eq!(config.checkpoint_interval(25_000), 1250);
        assert_eq!(config.checkpoint_interval(5), 1);

        let fixed = ClientConfig {
            rewind_interval: 1000,
            ..ClientConfig::default()
        };
        assert_eq!(fixed.checkpoint_interval(25_000), 1000);
    }
}
