//! Decoded server message records and their byte layout.
//!
//! A message is a reliable-acknowledge counter followed by a sequence of
//! typed records, each introduced by a one-byte opcode, and terminated by
//! [`SVC_EOF`].

use crate::error::{DecodeError, EncodeError, LimitKind, WireResult};
use crate::limits::Limits;
use crate::msg::{MsgReader, MsgWriter};

pub const SVC_NOP: u8 = 1;
pub const SVC_GAMESTATE: u8 = 2;
pub const SVC_CONFIGSTRING: u8 = 3;
pub const SVC_BASELINE: u8 = 4;
pub const SVC_SERVER_COMMAND: u8 = 5;
pub const SVC_DOWNLOAD: u8 = 6;
pub const SVC_SNAPSHOT: u8 = 7;
pub const SVC_EOF: u8 = 8;

/// Entity numbers are `0..ENTITY_NUM_NONE`.
pub const MAX_GENTITIES: u16 = 1024;

/// Terminates an entity list on the wire.
pub const ENTITY_NUM_NONE: u16 = MAX_GENTITIES - 1;

/// Networked state of one entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityState {
    pub number: u16,
    pub entity_type: u8,
    pub flags: u32,
    pub origin: [i32; 3],
    pub angles: [i32; 3],
    pub model_index: u16,
}

/// Networked state of the local player.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayerState {
    /// Server time of the last user command the server executed.
    pub command_time: i32,
    pub client_num: u8,
    pub pm_type: u8,
    pub flags: u32,
    pub origin: [i32; 3],
    pub velocity: [i32; 3],
    pub view_angles: [i32; 3],
}

/// One entry of a snapshot's entity list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityChange {
    /// The entity left the snapshot.
    Removed,
    /// The entity's full current state.
    State(EntityState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityUpdate {
    pub number: u16,
    pub change: EntityChange,
}

/// Full game state sent on connect and map change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GamestateRecord {
    pub command_sequence: i32,
    pub configstrings: Vec<(u16, String)>,
    pub baselines: Vec<EntityState>,
    pub client_num: i32,
    pub checksum_feed: i32,
}

/// One snapshot, full or delta-encoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub server_time: i32,
    /// Distance back to the delta base, 0 for a full snapshot.
    pub delta_num: u8,
    pub snap_flags: u8,
    pub areamask: Vec<u8>,
    pub player: PlayerState,
    /// Ascending by entity number.
    pub entities: Vec<EntityUpdate>,
}

impl SnapshotRecord {
    /// Returns `true` for a snapshot with no delta base.
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.delta_num == 0
    }
}

/// A typed record inside a server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerOp {
    Nop,
    ServerCommand { sequence: i32, text: String },
    Gamestate(GamestateRecord),
    Configstring { index: u16, value: String },
    Snapshot(SnapshotRecord),
    Download { block: u16, data: Vec<u8> },
}

/// A fully decoded server message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerMessage {
    /// Last client command sequence the server acknowledged.
    pub reliable_ack: i32,
    pub ops: Vec<ServerOp>,
}

/// Decodes one server message.
pub fn decode_message(payload: &[u8], limits: &Limits) -> WireResult<ServerMessage> {
    if payload.len() > limits.max_msg_len {
        return Err(DecodeError::MessageTooLarge {
            len: payload.len(),
            max: limits.max_msg_len,
        });
    }

    let mut reader = MsgReader::new(payload);
    let reliable_ack = reader.read_vars32()?;
    let mut ops = Vec::new();
    loop {
        let op = reader.read_u8()?;
        let record = match op {
            SVC_EOF => break,
            SVC_NOP => ServerOp::Nop,
            SVC_SERVER_COMMAND => ServerOp::ServerCommand {
                sequence: reader.read_vars32()?,
                text: reader.read_string(limits.max_string_len)?,
            },
            SVC_GAMESTATE => ServerOp::Gamestate(decode_gamestate(&mut reader, limits)?),
            SVC_CONFIGSTRING => {
                let (index, value) = decode_configstring(&mut reader, limits)?;
                ServerOp::Configstring { index, value }
            }
            SVC_SNAPSHOT => ServerOp::Snapshot(decode_snapshot(&mut reader, limits)?),
            SVC_DOWNLOAD => {
                let block = reader.read_u16()?;
                let data = reader
                    .read_blob(LimitKind::DownloadBlock, limits.max_download_block)?
                    .to_vec();
                ServerOp::Download { block, data }
            }
            op => return Err(DecodeError::IllegibleOp { op }),
        };
        ops.push(record);
    }

    Ok(ServerMessage { reliable_ack, ops })
}

/// Encodes one server message.
pub fn encode_message(message: &ServerMessage) -> Result<Vec<u8>, EncodeError> {
    let mut writer = MsgWriter::with_capacity(256);
    writer.write_vars32(message.reliable_ack);
    for op in &message.ops {
        match op {
            ServerOp::Nop => writer.write_u8(SVC_NOP),
            ServerOp::ServerCommand { sequence, text } => {
                writer.write_u8(SVC_SERVER_COMMAND);
                writer.write_vars32(*sequence);
                writer.write_string(text)?;
            }
            ServerOp::Gamestate(gamestate) => {
                writer.write_u8(SVC_GAMESTATE);
                encode_gamestate(&mut writer, gamestate)?;
            }
            ServerOp::Configstring { index, value } => {
                writer.write_u8(SVC_CONFIGSTRING);
                writer.write_u16(*index);
                writer.write_string(value)?;
            }
            ServerOp::Snapshot(snapshot) => {
                writer.write_u8(SVC_SNAPSHOT);
                encode_snapshot(&mut writer, snapshot)?;
            }
            ServerOp::Download { block, data } => {
                writer.write_u8(SVC_DOWNLOAD);
                writer.write_u16(*block);
                writer.write_blob("download block", data)?;
            }
        }
    }
    writer.write_u8(SVC_EOF);
    Ok(writer.finish())
}

fn decode_configstring(reader: &mut MsgReader<'_>, limits: &Limits) -> WireResult<(u16, String)> {
    let index = reader.read_u16()?;
    if usize::from(index) >= limits.max_configstrings {
        return Err(DecodeError::LimitsExceeded {
            kind: LimitKind::ConfigstringIndex,
            limit: limits.max_configstrings,
            actual: usize::from(index),
        });
    }
    let value = reader.read_string(limits.max_string_len)?;
    Ok((index, value))
}

fn decode_gamestate(reader: &mut MsgReader<'_>, limits: &Limits) -> WireResult<GamestateRecord> {
    let command_sequence = reader.read_vars32()?;
    let mut configstrings = Vec::new();
    let mut baselines = Vec::new();
    loop {
        match reader.read_u8()? {
            SVC_EOF => break,
            SVC_CONFIGSTRING => configstrings.push(decode_configstring(reader, limits)?),
            SVC_BASELINE => {
                let number = read_entity_number(reader)?;
                if baselines.len() >= limits.max_entities {
                    return Err(DecodeError::LimitsExceeded {
                        kind: LimitKind::EntityCount,
                        limit: limits.max_entities,
                        actual: baselines.len() + 1,
                    });
                }
                baselines.push(decode_entity_body(reader, number)?);
            }
            op => return Err(DecodeError::IllegibleGamestateOp { op }),
        }
    }
    let client_num = reader.read_vars32()?;
    let checksum_feed = reader.read_vars32()?;
    Ok(GamestateRecord {
        command_sequence,
        configstrings,
        baselines,
        client_num,
        checksum_feed,
    })
}

fn encode_gamestate(writer: &mut MsgWriter, gamestate: &GamestateRecord) -> Result<(), EncodeError> {
    writer.write_vars32(gamestate.command_sequence);
    for (index, value) in &gamestate.configstrings {
        writer.write_u8(SVC_CONFIGSTRING);
        writer.write_u16(*index);
        writer.write_string(value)?;
    }
    for baseline in &gamestate.baselines {
        check_entity_number(baseline.number)?;
        writer.write_u8(SVC_BASELINE);
        writer.write_u16(baseline.number);
        encode_entity_body(writer, baseline);
    }
    writer.write_u8(SVC_EOF);
    writer.write_vars32(gamestate.client_num);
    writer.write_vars32(gamestate.checksum_feed);
    Ok(())
}

fn decode_snapshot(reader: &mut MsgReader<'_>, limits: &Limits) -> WireResult<SnapshotRecord> {
    let server_time = reader.read_vars32()?;
    let delta_num = reader.read_u8()?;
    let snap_flags = reader.read_u8()?;
    let areamask = reader
        .read_blob(LimitKind::AreamaskBytes, limits.max_areamask_bytes)?
        .to_vec();
    let player = decode_player(reader)?;

    let mut entities = Vec::new();
    let mut previous: Option<u16> = None;
    loop {
        let number = reader.read_u16()?;
        if number == ENTITY_NUM_NONE {
            break;
        }
        if number > ENTITY_NUM_NONE {
            return Err(DecodeError::EntityNumber { number });
        }
        if let Some(previous) = previous {
            if number <= previous {
                return Err(DecodeError::EntityOrder { previous, number });
            }
        }
        if entities.len() >= limits.max_entities {
            return Err(DecodeError::LimitsExceeded {
                kind: LimitKind::EntityCount,
                limit: limits.max_entities,
                actual: entities.len() + 1,
            });
        }
        let change = if reader.read_u8()? == 0 {
            EntityChange::Removed
        } else {
            EntityChange::State(decode_entity_body(reader, number)?)
        };
        entities.push(EntityUpdate { number, change });
        previous = Some(number);
    }

    Ok(SnapshotRecord {
        server_time,
        delta_num,
        snap_flags,
        areamask,
        player,
        entities,
    })
}

fn encode_snapshot(writer: &mut MsgWriter, snapshot: &SnapshotRecord) -> Result<(), EncodeError> {
    writer.write_vars32(snapshot.server_time);
    writer.write_u8(snapshot.delta_num);
    writer.write_u8(snapshot.snap_flags);
    writer.write_blob("areamask", &snapshot.areamask)?;
    encode_player(writer, &snapshot.player);

    let mut previous: Option<u16> = None;
    for update in &snapshot.entities {
        check_entity_number(update.number)?;
        if let Some(previous) = previous {
            if update.number <= previous {
                return Err(EncodeError::EntityOrder {
                    previous,
                    number: update.number,
                });
            }
        }
        writer.write_u16(update.number);
        match &update.change {
            EntityChange::Removed => writer.write_u8(0),
            EntityChange::State(state) => {
                writer.write_u8(1);
                encode_entity_body(writer, state);
            }
        }
        previous = Some(update.number);
    }
    writer.write_u16(ENTITY_NUM_NONE);
    Ok(())
}

fn read_entity_number(reader: &mut MsgReader<'_>) -> WireResult<u16> {
    let number = reader.read_u16()?;
    if number >= ENTITY_NUM_NONE {
        return Err(DecodeError::EntityNumber { number });
    }
    Ok(number)
}

const fn check_entity_number(number: u16) -> Result<(), EncodeError> {
    if number >= ENTITY_NUM_NONE {
        return Err(EncodeError::EntityNumber { number });
    }
    Ok(())
}

fn decode_entity_body(reader: &mut MsgReader<'_>, number: u16) -> WireResult<EntityState> {
    Ok(EntityState {
        number,
        entity_type: reader.read_u8()?,
        flags: reader.read_varu32()?,
        origin: read_vec3(reader)?,
        angles: read_vec3(reader)?,
        model_index: reader.read_u16()?,
    })
}

fn encode_entity_body(writer: &mut MsgWriter, state: &EntityState) {
    writer.write_u8(state.entity_type);
    writer.write_varu32(state.flags);
    write_vec3(writer, state.origin);
    write_vec3(writer, state.angles);
    writer.write_u16(state.model_index);
}

fn decode_player(reader: &mut MsgReader<'_>) -> WireResult<PlayerState> {
    Ok(PlayerState {
        command_time: reader.read_vars32()?,
        client_num: reader.read_u8()?,
        pm_type: reader.read_u8()?,
        flags: reader.read_varu32()?,
        origin: read_vec3(reader)?,
        velocity: read_vec3(reader)?,
        view_angles: read_vec3(reader)?,
    })
}

fn encode_player(writer: &mut MsgWriter, player: &PlayerState) {
    writer.write_vars32(player.command_time);
    writer.write_u8(player.client_num);
    writer.write_u8(player.pm_type);
    writer.write_varu32(player.flags);
    write_vec3(writer, player.origin);
    write_vec3(writer, player.velocity);
    write_vec3(writer, player.view_angles);
}

fn read_vec3(reader: &mut MsgReader<'_>) -> WireResult<[i32; 3]> {
    Ok([reader.read_vars32()?, reader.read_vars32()?, reader.read_vars32()?])
}

fn write_vec3(writer: &mut MsgWriter, value: [i32; 3]) {
    for component in value {
        writer.write_vars32(component);
    }
}
