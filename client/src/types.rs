//! Shared constants and small value types.

/// Snapshots retained for delta decoding and interpolation.
pub const PACKET_BACKUP: usize = 32;

/// Entity states retained across all buffered snapshots.
pub const MAX_PARSE_ENTITIES: usize = 2048;

/// Entities handed out per snapshot.
pub const MAX_ENTITIES_IN_SNAPSHOT: usize = 512;

/// Outbound user commands retained.
pub const CMD_BACKUP: usize = 64;

/// Reliable server commands retained.
pub const MAX_RELIABLE_COMMANDS: usize = 256;

/// Reported when no outbound packet matches the acknowledged command time.
pub const PING_UNKNOWN: i32 = 999;

/// Configstring holding the server info string.
pub const CS_SERVERINFO: usize = 0;

/// Per-snapshot flags sent by the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SnapFlags(u8);

impl SnapFlags {
    pub const RATE_DELAYED: u8 = 1;
    pub const NOT_ACTIVE: u8 = 2;
    pub const SERVER_COUNT: u8 = 4;

    #[must_use]
    pub const fn new(bits: u8) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// The server considers this client not yet in the game.
    #[must_use]
    pub const fn is_not_active(self) -> bool {
        self.0 & Self::NOT_ACTIVE != 0
    }

    /// Toggles on every server restart.
    #[must_use]
    pub const fn server_count(self) -> bool {
        self.0 & Self::SERVER_COUNT != 0
    }
}

/// Connection lifecycle as seen by the snapshot core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Awaiting a gamestate.
    Connected,
    /// Gamestate received, awaiting the first valid snapshot.
    Primed,
    /// Rendering.
    Active,
}
