//! Snapshot ring buffer and accessor.
//!
//! Snapshots are stored by message number in a fixed ring. A delta snapshot
//! is only trusted while its base is still valid, still owns its ring slot,
//! and still has its entities in the parse ring.

use tracing::{debug, warn};
use wire::{EntityChange, EntityState, PlayerState, SnapshotRecord};

use crate::config::BufferLimits;
use crate::entities::ParseEntities;
use crate::error::{ClientError, ClientResult};
use crate::ring::Ring;
use crate::types::SnapFlags;

/// One buffered snapshot as bookkept by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClSnapshot {
    /// Cleared when the snapshot cannot be trusted as a delta base.
    pub valid: bool,
    pub message_num: i32,
    /// Message number of the delta base, `None` for a full snapshot.
    pub delta_num: Option<i32>,
    pub server_time: i32,
    pub snap_flags: SnapFlags,
    /// Round-trip estimate at arrival.
    pub ping: i32,
    pub areamask: Vec<u8>,
    pub player: PlayerState,
    /// Reliable commands received when this snapshot arrived.
    pub server_command_num: i32,
    /// First index of this snapshot's span in the parse ring.
    pub parse_entities_num: i32,
    pub num_entities: usize,
}

/// Read-only copy of a snapshot handed to consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotView {
    pub message_num: i32,
    pub server_time: i32,
    pub snap_flags: SnapFlags,
    pub ping: i32,
    pub areamask: Vec<u8>,
    pub player: PlayerState,
    pub entities: Vec<EntityState>,
    pub server_command_sequence: i32,
}

/// Why a delta snapshot was stored as invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaRejection {
    /// The base snapshot was itself invalid.
    InvalidBase,
    /// The base slot has been reused by a newer message.
    BaseTooOld,
    /// The base's entities are about to leave the parse ring.
    EntitiesTooOld,
    /// Not newer than the current snapshot.
    Stale,
}

/// Result of storing a decoded snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The snapshot became current.
    Accepted { message_num: i32, server_time: i32 },
    /// The snapshot was stored as invalid, or dropped if stale.
    Rejected {
        message_num: i32,
        reason: DeltaRejection,
    },
}

impl WriteOutcome {
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Ring of recent snapshots plus the entity states they reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotBuffer {
    snapshots: Ring<ClSnapshot>,
    entities: ParseEntities,
    current: ClSnapshot,
    max_entities: usize,
}

impl SnapshotBuffer {
    #[must_use]
    pub fn new(limits: &BufferLimits) -> Self {
        Self {
            snapshots: Ring::new(limits.snapshot_backup),
            entities: ParseEntities::new(limits.parse_entities),
            current: ClSnapshot::default(),
            max_entities: limits.entities_in_snapshot,
        }
    }

    /// The newest valid snapshot.
    #[must_use]
    pub const fn current(&self) -> &ClSnapshot {
        &self.current
    }

    #[must_use]
    pub const fn current_number(&self) -> i32 {
        self.current.message_num
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.snapshots.capacity()
    }

    #[must_use]
    pub const fn entities(&self) -> &ParseEntities {
        &self.entities
    }

    /// Stores a decoded snapshot received as message `message_num`.
    ///
    /// `ping` is recorded on the snapshot if it becomes current.
    pub fn write(
        &mut self,
        message_num: i32,
        record: &SnapshotRecord,
        server_command_num: i32,
        ping: i32,
    ) -> WriteOutcome {
        if self.current.valid && message_num <= self.current.message_num {
            return WriteOutcome::Rejected {
                message_num,
                reason: DeltaRejection::Stale,
            };
        }

        // `None` inside `Some` marks a base number below the sequence range.
        let delta_num = (!record.is_full())
            .then(|| message_num.checked_sub(i32::from(record.delta_num)));
        let base = match delta_num {
            None => None,
            Some(base_num) => match base_num
                .ok_or(DeltaRejection::BaseTooOld)
                .and_then(|base_num| self.check_base(message_num, base_num))
            {
                Ok(span) => Some(span),
                Err(reason) => {
                    warn!(message_num, ?base_num, ?reason, "rejecting delta snapshot");
                    self.snapshots.put(
                        message_num,
                        ClSnapshot {
                            valid: false,
                            message_num,
                            delta_num: base_num,
                            server_time: record.server_time,
                            snap_flags: SnapFlags::new(record.snap_flags),
                            server_command_num,
                            ..ClSnapshot::default()
                        },
                    );
                    return WriteOutcome::Rejected {
                        message_num,
                        reason,
                    };
                }
            },
        };

        let parse_entities_num = self.entities.next_index();
        let merged = self.merge_entities(base, record);
        let num_entities = merged.len();
        for state in merged {
            self.entities.push(state);
        }

        self.invalidate_skipped(message_num);

        let snapshot = ClSnapshot {
            valid: true,
            message_num,
            delta_num: delta_num.flatten(),
            server_time: record.server_time,
            snap_flags: SnapFlags::new(record.snap_flags),
            ping,
            areamask: record.areamask.clone(),
            player: record.player,
            server_command_num,
            parse_entities_num,
            num_entities,
        };
        self.snapshots.put(message_num, snapshot.clone());
        self.current = snapshot;

        WriteOutcome::Accepted {
            message_num,
            server_time: record.server_time,
        }
    }

    /// Copies snapshot `number` for a consumer.
    ///
    /// Fails if `number` is newer than the current snapshot. Returns `None`
    /// if the snapshot was evicted, never valid, or its entities aged out.
    pub fn read(&self, number: i32) -> ClientResult<Option<SnapshotView>> {
        let current = self.current.message_num;
        if number > current {
            return Err(ClientError::SnapshotOutOfRange {
                requested: number,
                current,
            });
        }
        let Some(snapshot) = self.retained(number) else {
            return Ok(None);
        };
        if !self.entities.is_retained(snapshot.parse_entities_num) {
            debug!(number, "snapshot entities aged out");
            return Ok(None);
        }

        if snapshot.num_entities > self.max_entities {
            warn!(
                number,
                count = snapshot.num_entities,
                max = self.max_entities,
                "truncating snapshot entities"
            );
        }

        Ok(Some(SnapshotView {
            message_num: snapshot.message_num,
            server_time: snapshot.server_time,
            snap_flags: snapshot.snap_flags,
            ping: snapshot.ping,
            areamask: snapshot.areamask.clone(),
            player: snapshot.player,
            entities: self.entities.span(
                snapshot.parse_entities_num,
                snapshot.num_entities,
                self.max_entities,
            ),
            server_command_sequence: snapshot.server_command_num,
        }))
    }

    /// Returns snapshot `number` if it is still valid and owns its slot.
    #[must_use]
    pub fn retained(&self, number: i32) -> Option<&ClSnapshot> {
        let age = self.current.message_num.checked_sub(number)?;
        if !(0..self.snapshots.span()).contains(&age) {
            return None;
        }
        let snapshot = self.snapshots.at(number);
        (snapshot.valid && snapshot.message_num == number).then_some(snapshot)
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.entities.clear();
        self.current = ClSnapshot::default();
    }

    fn check_base(&self, message_num: i32, base_num: i32) -> Result<(i32, usize), DeltaRejection> {
        let base = self.snapshots.at(base_num);
        if !base.valid {
            return Err(DeltaRejection::InvalidBase);
        }
        if message_num.wrapping_sub(base_num) >= self.snapshots.span()
            || base.message_num != base_num
        {
            return Err(DeltaRejection::BaseTooOld);
        }
        let cap = self.entities.window();
        if self.entities.age(base.parse_entities_num) > cap - cap / 16 {
            return Err(DeltaRejection::EntitiesTooOld);
        }
        Ok((base.parse_entities_num, base.num_entities))
    }

    fn merge_entities(&self, base: Option<(i32, usize)>, record: &SnapshotRecord) -> Vec<EntityState> {
        let old = base.map_or_else(Vec::new, |(first, count)| {
            self.entities.span(first, count, usize::MAX)
        });
        let mut old = old.into_iter().peekable();
        let mut merged = Vec::with_capacity(record.entities.len() + old.len());

        for update in &record.entities {
            while let Some(unchanged) = old.next_if(|o| o.number < update.number) {
                merged.push(unchanged);
            }
            let _replaced = old.next_if(|o| o.number == update.number);
            if let EntityChange::State(state) = update.change {
                merged.push(EntityState {
                    number: update.number,
                    ..state
                });
            }
        }
        merged.extend(old);
        merged
    }

    /// Clears validity of every slot between the last current snapshot and
    /// `message_num` so wrapped slots cannot pose as delta bases.
    fn invalidate_skipped(&mut self, message_num: i32) {
        let span = i64::from(self.snapshots.span());
        let end = i64::from(message_num);
        let stale = (i64::from(self.current.message_num) + 1).max(end - (span - 1));
        for n in stale..end {
            if let Ok(n) = i32::try_from(n) {
                self.snapshots.at_mut(n).valid = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wire::EntityUpdate;

    fn buffer() -> SnapshotBuffer {
        SnapshotBuffer::new(&BufferLimits::for_testing())
    }

    fn record(server_time: i32, delta_num: u8, entities: &[(u16, bool)]) -> SnapshotRecord {
        SnapshotRecord {
            server_time,
            delta_num,
            entities: entities
                .iter()
                .map(|&(number, present)| EntityUpdate {
                    number,
                    change: if present {
                        EntityChange::State(EntityState {
                            number,
                            model_index: u16::try_from(server_time).unwrap_or(0),
                            ..EntityState::default()
                        })
                    } else {
                        EntityChange::Removed
                    },
                })
                .collect(),
            ..SnapshotRecord::default()
        }
    }

    fn numbers(view: &SnapshotView) -> Vec<u16> {
        view.entities.iter().map(|e| e.number).collect()
    }

    #[test]
    fn full_snapshot_becomes_current() {
        let mut buf = buffer();
        let outcome = buf.write(1, &record(100, 0, &[(1, true), (4, true)]), 0, 20);
        assert!(outcome.is_accepted());
        assert_eq!(buf.current_number(), 1);
        let view = buf.read(1).unwrap().unwrap();
        assert_eq!(view.server_time, 100);
        assert_eq!(view.ping, 20);
        assert_eq!(numbers(&view), vec![1, 4]);
    }

    #[test]
    fn delta_merges_with_base_entities() {
        let mut buf = buffer();
        buf.write(1, &record(100, 0, &[(1, true), (4, true), (9, true)]), 0, 0);
        buf.write(2, &record(150, 1, &[(2, true), (4, false), (9, true)]), 0, 0);
        let view = buf.read(2).unwrap().unwrap();
        assert_eq!(numbers(&view), vec![1, 2, 9]);
        assert_eq!(view.entities[0].model_index, 100);
        assert_eq!(view.entities[2].model_index, 150);
    }

    #[test]
    fn delta_from_missing_base_is_stored_invalid() {
        let mut buf = buffer();
        buf.write(1, &record(100, 0, &[]), 0, 0);
        let outcome = buf.write(3, &record(200, 1, &[]), 0, 0);
        assert_eq!(
            outcome,
            WriteOutcome::Rejected {
                message_num: 3,
                reason: DeltaRejection::InvalidBase
            }
        );
        assert_eq!(buf.current_number(), 1);
        assert!(buf.retained(3).is_none());
    }

    #[test]
    fn delta_base_older_than_ring_is_too_old() {
        let mut buf = buffer();
        buf.write(1, &record(100, 0, &[]), 0, 0);
        buf.write(2, &record(150, 1, &[]), 0, 0);
        let cap = i32::try_from(buf.capacity()).unwrap();
        let outcome = buf.write(2 + cap, &record(900, u8::try_from(cap).unwrap(), &[]), 0, 0);
        assert!(matches!(
            outcome,
            WriteOutcome::Rejected {
                reason: DeltaRejection::BaseTooOld,
                ..
            }
        ));
    }

    #[test]
    fn stale_message_rejected() {
        let mut buf = buffer();
        buf.write(5, &record(100, 0, &[]), 0, 0);
        let outcome = buf.write(5, &record(100, 0, &[]), 0, 0);
        assert!(matches!(
            outcome,
            WriteOutcome::Rejected {
                reason: DeltaRejection::Stale,
                ..
            }
        ));
    }

    #[test]
    fn gap_invalidates_skipped_slots() {
        let mut buf = buffer();
        for n in 1..=8 {
            buf.write(n, &record(n * 50, 0, &[]), 0, 0);
        }
        buf.write(12, &record(600, 0, &[]), 0, 0);
        for n in 9..12 {
            assert!(buf.retained(n).is_none());
        }
        // Message 9 never arrived; its slot still holds message 1.
        let outcome = buf.write(13, &record(650, 4, &[]), 0, 0);
        assert!(!outcome.is_accepted());
        assert!(buf.write(14, &record(700, 2, &[]), 0, 0).is_accepted());
    }

    #[test]
    fn read_newer_than_current_fails() {
        let mut buf = buffer();
        buf.write(3, &record(100, 0, &[]), 0, 0);
        assert!(matches!(
            buf.read(4),
            Err(ClientError::SnapshotOutOfRange {
                requested: 4,
                current: 3
            })
        ));
    }

    #[test]
    fn read_far_below_current_is_unavailable() {
        let mut buf = buffer();
        assert!(buf.read(i32::MIN).unwrap().is_none());
        buf.write(3, &record(100, 0, &[]), 0, 0);
        assert!(buf.read(i32::MIN).unwrap().is_none());
        assert!(buf.retained(i32::MIN).is_none());
    }

    #[test]
    fn delta_below_sequence_range_is_rejected() {
        let mut buf = buffer();
        let outcome = buf.write(i32::MIN, &record(100, 1, &[]), 0, 0);
        assert_eq!(
            outcome,
            WriteOutcome::Rejected {
                message_num: i32::MIN,
                reason: DeltaRejection::BaseTooOld
            }
        );
        assert!(buf.write(i32::MIN, &record(100, 0, &[(1, true)]), 0, 0).is_accepted());
        assert!(buf.write(i32::MIN + 1, &record(150, 1, &[]), 0, 0).is_accepted());
        assert_eq!(numbers(&buf.read(i32::MIN + 1).unwrap().unwrap()), vec![1]);
    }

    fn narrow_entity_buffer() -> SnapshotBuffer {
        SnapshotBuffer::new(&BufferLimits {
            parse_entities: std::num::NonZeroUsize::new(32).unwrap(),
            ..BufferLimits::for_testing()
        })
    }

    #[test]
    fn delta_against_aged_entities_is_rejected() {
        let mut buf = narrow_entity_buffer();
        let wide: Vec<(u16, bool)> = (0..10).map(|n| (n, true)).collect();
        for n in 1..=4 {
            assert!(buf.write(n, &record(n * 50, 0, &wide), 0, 0).is_accepted());
        }
        // Message 1 still owns its slot but its entities are 40 indices back.
        let outcome = buf.write(5, &record(250, 4, &[]), 0, 0);
        assert_eq!(
            outcome,
            WriteOutcome::Rejected {
                message_num: 5,
                reason: DeltaRejection::EntitiesTooOld
            }
        );
        // A base within the window still decodes.
        assert!(buf.write(6, &record(300, 2, &[]), 0, 0).is_accepted());
        assert_eq!(buf.read(6).unwrap().unwrap().entities.len(), 10);
    }

    #[test]
    fn read_unavailable_once_entities_age_out() {
        let mut buf = narrow_entity_buffer();
        let wide: Vec<(u16, bool)> = (0..10).map(|n| (n, true)).collect();
        for n in 1..=4 {
            buf.write(n, &record(n * 50, 0, &wide), 0, 0);
        }
        assert!(buf.retained(1).is_some());
        assert!(buf.read(1).unwrap().is_none());
        assert!(buf.read(2).unwrap().is_some());
    }

    #[test]
    fn read_truncates_to_max_entities() {
        let mut buf = buffer();
        let entities: Vec<(u16, bool)> = (0..20).map(|n| (n, true)).collect();
        buf.write(1, &record(100, 0, &entities), 0, 0);
        let view = buf.read(1).unwrap().unwrap();
        assert_eq!(view.entities.len(), BufferLimits::for_testing().entities_in_snapshot);
    }
}
