//! Client session state and the per-frame update.
//!
//! All mutable session data lives in [`SessionState`] so a demo checkpoint
//! can capture and restore it as one value.

use tracing::{debug, info};
use wire::{decode_message, GamestateRecord, Limits, ServerMessage, ServerOp, SnapshotRecord};

use crate::clock::{ClockState, DriftAdjustment};
use crate::commands::{CommandAction, ReliableCommands};
use crate::config::{BufferLimits, ClientConfig};
use crate::error::{ClientError, ClientResult};
use crate::gamestate::GameState;
use crate::outgoing::{OutPackets, UserCmd, UserCmds};
use crate::snapshot::{SnapshotBuffer, SnapshotView, WriteOutcome};
use crate::types::{ConnectionState, CS_SERVERINFO, PING_UNKNOWN};

/// Where messages come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Messages arrive from a server.
    Live,
    /// Messages are replayed from a recording.
    Playback,
}

/// Every piece of mutable session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub connection: ConnectionState,
    pub snapshots: SnapshotBuffer,
    pub clock: ClockState,
    pub commands: ReliableCommands,
    pub gamestate: GameState,
    pub user_cmds: UserCmds,
    pub out_packets: OutPackets,
    /// Set when a snapshot was accepted since the last frame.
    pub new_snapshots: bool,
    pub server_message_sequence: i32,
    pub reliable_acknowledge: i32,
    /// Local clock in milliseconds.
    pub realtime: i32,
    pub client_num: i32,
    pub checksum_feed: i32,
}

impl SessionState {
    #[must_use]
    pub fn new(limits: &BufferLimits) -> Self {
        Self {
            connection: ConnectionState::Connected,
            snapshots: SnapshotBuffer::new(limits),
            clock: ClockState::default(),
            commands: ReliableCommands::new(limits.reliable_commands),
            gamestate: GameState::default(),
            user_cmds: UserCmds::new(limits.cmd_backup),
            out_packets: OutPackets::new(limits.snapshot_backup),
            new_snapshots: false,
            server_message_sequence: 0,
            reliable_acknowledge: 0,
            realtime: 0,
            client_num: -1,
            checksum_feed: 0,
        }
    }

    /// Pins the render clock to `target` with the current snapshot as the
    /// previous frame's snapshot.
    pub fn pin_time(&mut self, target: i32) {
        self.clock.pin(target);
        self.clock.old_frame_server_time = self.snapshots.current().server_time;
        self.realtime = target;
    }
}

/// What one server message changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageSummary {
    pub snapshot: Option<WriteOutcome>,
    /// The message carried a snapshot with no delta base.
    pub full_snapshot: bool,
    /// New reliable commands stored.
    pub commands: usize,
    pub gamestate: bool,
    pub configstrings: usize,
    pub downloads: usize,
}

/// A reliable command ready for the game module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCommand {
    pub sequence: i32,
    pub text: String,
}

/// The client side of one server connection or demo playback.
#[derive(Debug, Clone)]
pub struct ClientSession {
    config: ClientConfig,
    limits: Limits,
    mode: SessionMode,
    state: SessionState,
}

impl ClientSession {
    #[must_use]
    pub fn new(config: ClientConfig, mode: SessionMode) -> Self {
        let config = config.clamped();
        let state = SessionState::new(&config.buffers);
        Self {
            config,
            limits: Limits::default(),
            mode,
            state,
        }
    }

    /// Replaces the decode limits.
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub const fn limits(&self) -> &Limits {
        &self.limits
    }

    #[must_use]
    pub const fn mode(&self) -> SessionMode {
        self.mode
    }

    #[must_use]
    pub fn is_playback(&self) -> bool {
        self.mode == SessionMode::Playback
    }

    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    #[must_use]
    pub const fn connection(&self) -> ConnectionState {
        self.state.connection
    }

    /// Copies the whole session state.
    #[must_use]
    pub fn capture(&self) -> SessionState {
        self.state.clone()
    }

    /// Replaces the whole session state.
    pub fn restore(&mut self, state: SessionState) {
        self.state = state;
    }

    /// Decodes and applies one server message.
    pub fn parse_server_message(&mut self, sequence: i32, payload: &[u8]) -> ClientResult<MessageSummary> {
        let message = decode_message(payload, &self.limits)?;
        self.apply_message(sequence, &message)
    }

    /// Applies an already decoded server message.
    pub fn apply_message(&mut self, sequence: i32, message: &ServerMessage) -> ClientResult<MessageSummary> {
        self.state.server_message_sequence = sequence;
        self.state.reliable_acknowledge = message.reliable_ack;

        let mut summary = MessageSummary::default();
        for op in &message.ops {
            match op {
                ServerOp::Nop => {}
                ServerOp::ServerCommand { sequence, text } => {
                    if self.state.commands.store(*sequence, text) {
                        summary.commands += 1;
                    }
                }
                ServerOp::Gamestate(record) => {
                    self.apply_gamestate(record)?;
                    summary.gamestate = true;
                }
                ServerOp::Configstring { index, value } => {
                    self.set_configstring(usize::from(*index), value)?;
                    summary.configstrings += 1;
                }
                ServerOp::Snapshot(record) => {
                    summary.full_snapshot |= record.is_full();
                    summary.snapshot = Some(self.apply_snapshot(sequence, record));
                }
                ServerOp::Download { .. } => summary.downloads += 1,
            }
        }
        Ok(summary)
    }

    fn apply_gamestate(&mut self, record: &GamestateRecord) -> ClientResult<()> {
        let mut state = SessionState::new(&self.config.buffers);
        state.gamestate = GameState::from_record(record)?;
        state.commands.reset(record.command_sequence);
        state.connection = ConnectionState::Primed;
        state.server_message_sequence = self.state.server_message_sequence;
        state.reliable_acknowledge = self.state.reliable_acknowledge;
        state.realtime = self.state.realtime;
        state.client_num = record.client_num;
        state.checksum_feed = record.checksum_feed;
        state
            .clock
            .cadence
            .observe_frame(self.state.clock.cadence.client_period());
        state
            .clock
            .cadence
            .set_server_hint(state.gamestate.server_period());

        info!(
            command_sequence = record.command_sequence,
            configstrings = record.configstrings.len(),
            baselines = record.baselines.len(),
            "gamestate received"
        );
        self.state = state;
        Ok(())
    }

    fn apply_snapshot(&mut self, sequence: i32, record: &SnapshotRecord) -> WriteOutcome {
        let ping = self
            .state
            .out_packets
            .compute_ping(record.player.command_time, self.state.realtime)
            .unwrap_or(PING_UNKNOWN);
        let outcome =
            self.state
                .snapshots
                .write(sequence, record, self.state.commands.sequence(), ping);
        if let WriteOutcome::Accepted { server_time, .. } = outcome {
            self.state.new_snapshots = true;
            self.state.clock.cadence.observe_snapshot(server_time);
        }
        outcome
    }

    /// Replaces a configstring, refreshing the server cadence when the
    /// server info changes.
    pub fn set_configstring(&mut self, index: usize, value: &str) -> ClientResult<()> {
        let changed = self.state.gamestate.set_configstring(index, value)?;
        if changed && index == CS_SERVERINFO {
            let period = self.state.gamestate.server_period();
            self.state.clock.cadence.set_server_hint(period);
        }
        Ok(())
    }

    /// Advances local realtime by `msec` and computes this frame's server
    /// time.
    ///
    /// Returns `None` until the session is active.
    pub fn frame(&mut self, msec: i32) -> ClientResult<Option<i32>> {
        self.state.realtime = self.state.realtime.saturating_add(msec);
        self.state.clock.cadence.observe_frame(msec);
        self.set_cgame_time()
    }

    fn set_cgame_time(&mut self) -> ClientResult<Option<i32>> {
        match self.state.connection {
            ConnectionState::Disconnected | ConnectionState::Connected => return Ok(None),
            ConnectionState::Primed => {
                if !self.state.new_snapshots || !self.state.snapshots.current().valid {
                    return Ok(None);
                }
                self.activate();
            }
            ConnectionState::Active => {}
        }

        let snap = self.state.snapshots.current();
        if !snap.valid {
            return Err(ClientError::NoValidSnapshot);
        }
        let snap_time = snap.server_time;
        let clock = &mut self.state.clock;
        if snap_time < clock.old_frame_server_time && self.mode == SessionMode::Live {
            return Err(ClientError::ServerTimeRegressed {
                snapshot_time: snap_time,
                previous: clock.old_frame_server_time,
            });
        }
        clock.old_frame_server_time = snap_time;
        clock.advance(self.state.realtime, snap_time, &self.config);

        if self.state.new_snapshots {
            self.state.new_snapshots = false;
            // The delta never drifts during playback.
            if self.mode == SessionMode::Live {
                let adjustment = clock.adjust(snap_time, self.state.realtime, &self.config);
                if adjustment != DriftAdjustment::Hold {
                    debug!(?adjustment, delta = clock.server_time_delta, "adjusted time delta");
                }
            }
        }
        Ok(Some(clock.server_time))
    }

    /// Aligns the clock to the current snapshot and marks the session
    /// active. No-op without a valid snapshot.
    pub fn activate(&mut self) {
        let snap = self.state.snapshots.current();
        if !snap.valid {
            return;
        }
        let snap_time = snap.server_time;
        self.state.clock.first_snapshot(snap_time, self.state.realtime);
        self.state.new_snapshots = false;
        self.state.connection = ConnectionState::Active;
        debug!(server_time = snap_time, "first snapshot");
    }

    /// Forces the session active without touching the clock.
    pub fn force_active(&mut self) {
        self.state.connection = ConnectionState::Active;
    }

    /// Pins the render clock to `target` for a programmatic seek.
    pub fn pin_time(&mut self, target: i32) {
        self.state.pin_time(target);
    }

    /// Published server time.
    #[must_use]
    pub const fn server_time(&self) -> i32 {
        self.state.clock.server_time
    }

    #[must_use]
    pub const fn realtime(&self) -> i32 {
        self.state.realtime
    }

    #[must_use]
    pub const fn clock(&self) -> &ClockState {
        &self.state.clock
    }

    /// Newest snapshot number and its server time.
    #[must_use]
    pub const fn current_snapshot(&self) -> (i32, i32) {
        let snap = self.state.snapshots.current();
        (snap.message_num, snap.server_time)
    }

    #[must_use]
    pub const fn has_valid_snapshot(&self) -> bool {
        self.state.snapshots.current().valid
    }

    pub fn snapshot(&self, number: i32) -> ClientResult<Option<SnapshotView>> {
        self.state.snapshots.read(number)
    }

    /// Fetches reliable command `sequence` and applies interception.
    ///
    /// Returns `None` for commands consumed by the client itself, and for
    /// cycled commands during playback.
    pub fn server_command(&mut self, sequence: i32) -> ClientResult<Option<String>> {
        let playback = self.is_playback();
        let Some(text) = self.state.commands.fetch(sequence, playback)? else {
            return Ok(None);
        };
        match self.state.commands.intercept(&text)? {
            CommandAction::Deliver(text) => Ok(Some(text)),
            CommandAction::Configstring { index, value, text } => {
                self.set_configstring(index, &value)?;
                Ok(Some(text))
            }
            CommandAction::MapRestart(text) => {
                self.state.user_cmds.clear();
                Ok(Some(text))
            }
            CommandAction::Swallow => Ok(None),
        }
    }

    /// Next unexecuted command for the game module, skipping commands the
    /// client consumed itself.
    pub fn next_server_command(&mut self) -> ClientResult<Option<ServerCommand>> {
        while self.state.commands.last_executed() < self.state.commands.sequence() {
            let sequence = self.state.commands.last_executed() + 1;
            if let Some(text) = self.server_command(sequence)? {
                return Ok(Some(ServerCommand { sequence, text }));
            }
        }
        Ok(None)
    }

    #[must_use]
    pub const fn commands(&self) -> &ReliableCommands {
        &self.state.commands
    }

    pub(crate) fn commands_mut(&mut self) -> &mut ReliableCommands {
        &mut self.state.commands
    }

    /// Stores a locally generated command and records its packet timing.
    pub fn send_user_cmd(&mut self, cmd: UserCmd) -> i32 {
        let number = self.state.user_cmds.push(cmd);
        self.state
            .out_packets
            .record(self.state.realtime, cmd.server_time);
        number
    }

    pub fn user_cmd(&self, number: i32) -> ClientResult<Option<UserCmd>> {
        self.state.user_cmds.get(number)
    }

    #[must_use]
    pub const fn current_cmd_number(&self) -> i32 {
        self.state.user_cmds.current()
    }

    #[must_use]
    pub fn configstring(&self, index: usize) -> Option<&str> {
        self.state.gamestate.configstring(index)
    }

    #[must_use]
    pub fn baseline(&self, number: u16) -> Option<&wire::EntityState> {
        self.state.gamestate.baseline(number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wire::{encode_message, EntityChange, EntityState, EntityUpdate, PlayerState};

    fn gamestate(command_sequence: i32) -> ServerMessage {
        ServerMessage {
            reliable_ack: 0,
            ops: vec![ServerOp::Gamestate(GamestateRecord {
                command_sequence,
                configstrings: vec![(0, "\\sv_fps\\20".to_string())],
                baselines: Vec::new(),
                client_num: 2,
                checksum_feed: 7,
            })],
        }
    }

    fn snapshot(server_time: i32, delta_num: u8) -> ServerMessage {
        ServerMessage {
            reliable_ack: 0,
            ops: vec![ServerOp::Snapshot(SnapshotRecord {
                server_time,
                delta_num,
                player: PlayerState {
                    command_time: server_time - 30,
                    ..PlayerState::default()
                },
                entities: vec![EntityUpdate {
                    number: 1,
                    change: EntityChange::State(EntityState {
                        number: 1,
                        ..EntityState::default()
                    }),
                }],
                ..SnapshotRecord::default()
            })],
        }
    }

    fn command(sequence: i32, text: &str) -> ServerMessage {
        ServerMessage {
            reliable_ack: 0,
            ops: vec![ServerOp::ServerCommand {
                sequence,
                text: text.to_string(),
            }],
        }
    }

    fn live() -> ClientSession {
        let mut session = ClientSession::new(ClientConfig::for_testing(), SessionMode::Live);
        session.apply_message(1, &gamestate(10)).unwrap();
        session
    }

    #[test]
    fn gamestate_primes_session() {
        let session = live();
        assert_eq!(session.connection(), ConnectionState::Primed);
        assert_eq!(session.commands().sequence(), 10);
        assert_eq!(session.commands().last_executed(), 10);
        assert_eq!(session.state().client_num, 2);
        assert_eq!(session.clock().cadence.server_period(), 50);
    }

    #[test]
    fn first_snapshot_activates() {
        let mut session = live();
        assert_eq!(session.frame(16).unwrap(), None);
        session.apply_message(2, &snapshot(5_000, 0)).unwrap();
        let time = session.frame(16).unwrap();
        assert_eq!(session.connection(), ConnectionState::Active);
        assert_eq!(time, Some(5_000));
        assert_eq!(session.clock().baseline_delta, 5_000 - 32);
    }

    #[test]
    fn encoded_messages_apply() {
        let mut session = live();
        let bytes = encode_message(&snapshot(5_000, 0)).unwrap();
        let summary = session.parse_server_message(2, &bytes).unwrap();
        assert!(summary.full_snapshot);
        assert!(summary.snapshot.unwrap().is_accepted());
        assert_eq!(session.current_snapshot(), (2, 5_000));
    }

    #[test]
    fn delta_at_lowest_sequence_is_rejected() {
        let mut session = ClientSession::new(ClientConfig::for_testing(), SessionMode::Playback);
        session.apply_message(0, &gamestate(0)).unwrap();
        let bytes = encode_message(&snapshot(5_000, 1)).unwrap();
        let summary = session.parse_server_message(i32::MIN, &bytes).unwrap();
        assert!(!summary.snapshot.unwrap().is_accepted());
        assert!(!session.has_valid_snapshot());
        assert!(session.snapshot(i32::MIN).unwrap().is_none());
    }

    #[test]
    fn regression_is_fatal_live() {
        let mut session = live();
        session.apply_message(2, &snapshot(5_000, 0)).unwrap();
        session.frame(16).unwrap();
        session.apply_message(3, &snapshot(4_000, 0)).unwrap();
        assert!(matches!(
            session.frame(16),
            Err(ClientError::ServerTimeRegressed { .. })
        ));
    }

    #[test]
    fn commands_delivered_in_order_with_interception() {
        let mut session = live();
        session.apply_message(2, &command(11, "print hello")).unwrap();
        session.apply_message(3, &command(12, "popup x")).unwrap();
        session.apply_message(4, &command(13, "cs 5 \"q3dm17\"")).unwrap();

        let first = session.next_server_command().unwrap().unwrap();
        assert_eq!(first.sequence, 11);
        let second = session.next_server_command().unwrap().unwrap();
        assert_eq!(second.sequence, 13);
        assert_eq!(session.configstring(5), Some("q3dm17"));
        assert!(session.next_server_command().unwrap().is_none());
    }

    #[test]
    fn map_restart_clears_user_cmds() {
        let mut session = live();
        let number = session.send_user_cmd(UserCmd {
            server_time: 100,
            ..UserCmd::default()
        });
        session.apply_message(2, &command(11, "map_restart")).unwrap();
        session.next_server_command().unwrap();
        assert_eq!(session.current_cmd_number(), number);
        assert_eq!(session.user_cmd(number).unwrap(), Some(UserCmd::default()));
    }

    #[test]
    fn disconnect_ends_session() {
        let mut session = live();
        session.apply_message(2, &command(11, "disconnect")).unwrap();
        assert!(matches!(
            session.next_server_command(),
            Err(ClientError::ServerDisconnected { reason: None })
        ));
    }

    #[test]
    fn ping_uses_sent_packets() {
        let mut session = live();
        session.frame(100).unwrap();
        session.send_user_cmd(UserCmd {
            server_time: 4_960,
            ..UserCmd::default()
        });
        session.frame(40).unwrap();
        session.apply_message(2, &snapshot(5_000, 0)).unwrap();
        let view = session.snapshot(2).unwrap().unwrap();
        assert_eq!(view.ping, 40);
    }

    #[test]
    fn serverinfo_change_updates_cadence() {
        let mut session = live();
        session.set_configstring(CS_SERVERINFO, "\\sv_fps\\40").unwrap();
        assert_eq!(session.clock().cadence.server_period(), 25);
    }
}
