//! Deterministic recorded-session generator for snapsync.
//!
//! Produces a complete framed recording: a gamestate, a run of snapshots
//! (mostly delta-encoded) with moving entities, periodic reliable commands,
//! optional dropped messages, and the end marker. The same [`SimConfig`]
//! always produces the same bytes.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;
use wire::{
    encode_message, write_end_marker, write_frame, EntityChange, EntityState, EntityUpdate,
    GamestateRecord, PlayerState, ServerMessage, ServerOp, SnapshotRecord,
};

/// Deltas never reference a base further back than this.
pub const MAX_DELTA_DISTANCE: i32 = 31;

/// Upper bound on simulated entities.
pub const MAX_SIM_ENTITIES: u16 = 256;

const POS_LIMIT: i32 = 4096;
const VEL_LIMIT: i32 = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimConfig {
    /// RNG seed.
    pub seed: u64,
    /// Snapshot messages to generate.
    pub snapshots: u32,
    /// Server time between snapshots, in milliseconds.
    pub snapshot_period: i32,
    /// Server time of the gamestate.
    pub start_time: i32,
    /// Simulated entities, capped at [`MAX_SIM_ENTITIES`].
    pub entities: u16,
    /// Force a full snapshot every N messages; 0 sends only the first.
    pub full_every: u32,
    /// Drop every Nth message; 0 drops nothing.
    pub drop_every: u32,
    /// Issue a reliable command every N messages; 0 issues none.
    pub command_every: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            snapshots: 600,
            snapshot_period: 50,
            start_time: 10_000,
            entities: 16,
            full_every: 0,
            drop_every: 0,
            command_every: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SimSummary {
    pub seed: u64,
    /// Frames written, including the gamestate.
    pub frames: u32,
    pub full_snapshots: u32,
    pub delta_snapshots: u32,
    pub dropped: u32,
    pub commands: u32,
    pub first_server_time: i32,
    pub last_server_time: i32,
    pub bytes: usize,
}

/// A generated recording.
#[derive(Debug, Clone)]
pub struct Recording {
    pub bytes: Vec<u8>,
    pub summary: SimSummary,
}

/// Generates a recording for `config`.
pub fn generate(config: &SimConfig) -> Result<Recording> {
    let period = config.snapshot_period.max(1);
    let mut rng = Rng::new(config.seed);
    let mut world = World::new(config.entities.min(MAX_SIM_ENTITIES), &mut rng);
    let mut summary = SimSummary {
        seed: config.seed,
        ..SimSummary::default()
    };
    let mut out = Vec::new();

    #[allow(clippy::cast_possible_truncation)]
    let checksum_feed = config.seed as i32;
    let gamestate = ServerMessage {
        reliable_ack: 0,
        ops: vec![ServerOp::Gamestate(GamestateRecord {
            command_sequence: 0,
            configstrings: vec![
                (0, format!("\\sv_fps\\{}\\sv_hostname\\demo-sim", 1000 / period)),
                (1, "\\mapname\\sim_arena".to_string()),
            ],
            baselines: world.present().collect(),
            client_num: 0,
            checksum_feed,
        })],
    };
    let payload = encode_message(&gamestate).context("encode gamestate")?;
    write_frame(&mut out, 0, &payload).context("write gamestate frame")?;
    summary.frames += 1;

    let mut base: Option<(i32, Vec<Option<EntityState>>)> = None;
    let mut pending: Vec<(i32, String)> = Vec::new();
    let mut command_sequence = 0;

    for i in 1..=config.snapshots {
        let sequence = i32::try_from(i).context("snapshot count overflows sequence")?;
        let server_time = config.start_time.saturating_add(sequence.saturating_mul(period));
        world.step(&mut rng);

        if config.command_every > 0 && i % config.command_every == 0 {
            command_sequence += 1;
            let text = if command_sequence % 3 == 0 {
                format!("cs 2 \"round {command_sequence}\"")
            } else {
                format!("print \"tick {i}\"")
            };
            pending.push((command_sequence, text));
        }

        if config.drop_every > 0 && i % config.drop_every == 0 {
            summary.dropped += 1;
            continue;
        }

        let delta_base = base.as_ref().filter(|(base_seq, _)| {
            let forced = config.full_every > 0 && i % config.full_every == 0;
            !forced && sequence - base_seq <= MAX_DELTA_DISTANCE
        });
        let (delta_num, entities) = match delta_base {
            Some((base_seq, base_states)) => (
                u8::try_from(sequence - base_seq).context("delta distance")?,
                world.diff(base_states),
            ),
            None => (0, world.full()),
        };
        if delta_num == 0 {
            summary.full_snapshots += 1;
        } else {
            summary.delta_snapshots += 1;
        }

        let mut ops: Vec<ServerOp> = pending
            .drain(..)
            .map(|(sequence, text)| ServerOp::ServerCommand { sequence, text })
            .collect();
        summary.commands += u32::try_from(ops.len()).unwrap_or(u32::MAX);
        ops.push(ServerOp::Snapshot(SnapshotRecord {
            server_time,
            delta_num,
            snap_flags: 0,
            areamask: vec![0xff; 4],
            player: world.player(server_time - period / 2),
            entities,
        }));
        let message = ServerMessage {
            reliable_ack: 0,
            ops,
        };
        let payload = encode_message(&message)
            .with_context(|| format!("encode message {sequence}"))?;
        write_frame(&mut out, sequence, &payload)
            .with_context(|| format!("write frame {sequence}"))?;

        if summary.full_snapshots + summary.delta_snapshots == 1 {
            summary.first_server_time = server_time;
        }
        summary.last_server_time = server_time;
        summary.frames += 1;
        base = Some((sequence, world.states.clone()));
    }

    write_end_marker(&mut out).context("write end marker")?;
    summary.bytes = out.len();
    debug!(?summary, "generated recording");
    Ok(Recording {
        bytes: out,
        summary,
    })
}

struct World {
    states: Vec<Option<EntityState>>,
    velocities: Vec<[i32; 3]>,
}

impl World {
    fn new(count: u16, rng: &mut Rng) -> Self {
        let states = (0..count)
            .map(|number| {
                Some(EntityState {
                    number,
                    entity_type: u8::try_from(number % 4).unwrap_or(0),
                    flags: 0,
                    origin: [
                        rng.range(-POS_LIMIT / 2, POS_LIMIT / 2),
                        rng.range(-POS_LIMIT / 2, POS_LIMIT / 2),
                        rng.range(0, 256),
                    ],
                    angles: [0, rng.range(0, 359), 0],
                    model_index: number % 8 + 1,
                })
            })
            .collect();
        let velocities = (0..count)
            .map(|_| {
                [
                    rng.range(-VEL_LIMIT, VEL_LIMIT),
                    rng.range(-VEL_LIMIT, VEL_LIMIT),
                    0,
                ]
            })
            .collect();
        Self { states, velocities }
    }

    fn step(&mut self, rng: &mut Rng) {
        for (slot, vel) in self.states.iter_mut().zip(&mut self.velocities) {
            let Some(state) = slot else {
                // Respawn removed entities now and then.
                if rng.next_u32() % 40 == 0 {
                    *slot = Some(EntityState::default());
                }
                continue;
            };
            // Idle entities keep their state so deltas stay sparse.
            if rng.next_u32() % 3 == 0 {
                continue;
            }
            for axis in 0..2 {
                if rng.next_u32() % 10 == 0 {
                    vel[axis] = (vel[axis] + rng.range(-8, 8)).clamp(-VEL_LIMIT, VEL_LIMIT);
                }
                state.origin[axis] = (state.origin[axis] + vel[axis]).clamp(-POS_LIMIT, POS_LIMIT);
                if state.origin[axis].abs() == POS_LIMIT {
                    vel[axis] = -vel[axis];
                }
            }
            state.angles[1] = (state.angles[1] + rng.range(0, 12)) % 360;
            if rng.next_u32() % 200 == 0 {
                *slot = None;
            }
        }
        for (number, slot) in self.states.iter_mut().enumerate() {
            if let Some(state) = slot {
                state.number = u16::try_from(number).unwrap_or(0);
            }
        }
    }

    fn present(&self) -> impl Iterator<Item = EntityState> + '_ {
        self.states.iter().flatten().copied()
    }

    fn full(&self) -> Vec<EntityUpdate> {
        self.present()
            .map(|state| EntityUpdate {
                number: state.number,
                change: EntityChange::State(state),
            })
            .collect()
    }

    fn diff(&self, base: &[Option<EntityState>]) -> Vec<EntityUpdate> {
        self.states
            .iter()
            .zip(base)
            .filter_map(|(now, then)| match (now, then) {
                (Some(now), Some(then)) if now == then => None,
                (Some(now), _) => Some(EntityUpdate {
                    number: now.number,
                    change: EntityChange::State(*now),
                }),
                (None, Some(then)) => Some(EntityUpdate {
                    number: then.number,
                    change: EntityChange::Removed,
                }),
                (None, None) => None,
            })
            .collect()
    }

    fn player(&self, command_time: i32) -> PlayerState {
        let origin = self.present().next().map_or([0; 3], |state| state.origin);
        PlayerState {
            command_time,
            client_num: 0,
            pm_type: 0,
            flags: 0,
            origin,
            velocity: self.velocities.first().copied().unwrap_or_default(),
            view_angles: [0; 3],
        }
    }
}

struct Rng {
    state: u64,
}

impl Rng {
    const fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u32(&mut self) -> u32 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1);
        #[allow(clippy::cast_possible_truncation)]
        let value = (self.state >> 32) as u32;
        value
    }

    fn range(&mut self, min: i32, max: i32) -> i32 {
        let span = u64::from(min.abs_diff(max)) + 1;
        let offset = u64::from(self.next_u32()) % span;
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let offset = offset as i32;
        min + offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use wire::{decode_message, read_frame, Limits};

    fn frames(bytes: &[u8]) -> Vec<(i32, ServerMessage)> {
        let mut reader = Cursor::new(bytes);
        let mut out = Vec::new();
        while let Some(frame) = read_frame(&mut reader, &Limits::default()).unwrap() {
            let message = decode_message(&frame.payload, &Limits::default()).unwrap();
            out.push((frame.sequence, message));
        }
        out
    }

    #[test]
    fn same_seed_same_bytes() {
        let config = SimConfig {
            snapshots: 50,
            ..SimConfig::default()
        };
        let a = generate(&config).unwrap();
        let b = generate(&config).unwrap();
        assert_eq!(a.bytes, b.bytes);
        let other = generate(&SimConfig { seed: 2, ..config }).unwrap();
        assert_ne!(a.bytes, other.bytes);
    }

    #[test]
    fn recording_decodes() {
        let config = SimConfig {
            snapshots: 100,
            full_every: 40,
            ..SimConfig::default()
        };
        let recording = generate(&config).unwrap();
        let frames = frames(&recording.bytes);
        assert_eq!(frames.len(), 101);
        assert!(matches!(frames[0].1.ops[0], ServerOp::Gamestate(_)));
        assert_eq!(recording.summary.full_snapshots, 3);
        assert_eq!(recording.summary.delta_snapshots, 97);
        assert_eq!(recording.summary.commands, 10);
        assert_eq!(recording.summary.first_server_time, 10_050);
        assert_eq!(recording.summary.last_server_time, 15_000);
        assert_eq!(recording.summary.bytes, recording.bytes.len());
    }

    #[test]
    fn dropped_messages_leave_gaps() {
        let config = SimConfig {
            snapshots: 40,
            drop_every: 7,
            command_every: 7,
            ..SimConfig::default()
        };
        let recording = generate(&config).unwrap();
        let frames = frames(&recording.bytes);
        assert_eq!(recording.summary.dropped, 5);
        assert!(frames.iter().all(|(sequence, _)| sequence % 7 != 0 || *sequence == 0));

        // Commands from dropped messages ride along with the next one.
        let (_, after_drop) = &frames[7];
        assert_eq!(after_drop.ops.len(), 2);
        let ServerOp::Snapshot(snapshot) = &after_drop.ops[1] else {
            panic!("expected snapshot");
        };
        assert_eq!(snapshot.delta_num, 2);
    }
}
