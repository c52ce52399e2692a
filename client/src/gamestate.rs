//! Configstrings and entity baselines from the gamestate.

use wire::{EntityState, GamestateRecord, MAX_GENTITIES};

use crate::error::{ClientError, ClientResult};
use crate::types::CS_SERVERINFO;

/// Number of configstring slots.
pub const MAX_CONFIGSTRINGS: usize = 1024;

/// Character budget shared by all configstrings.
pub const MAX_GAMESTATE_CHARS: usize = 16_000;

/// Looks up `key` in a `\key\value\key\value` info string.
#[must_use]
pub fn info_value<'a>(info: &'a str, key: &str) -> Option<&'a str> {
    let mut parts = info.strip_prefix('\\').unwrap_or(info).split('\\');
    while let Some(k) = parts.next() {
        let v = parts.next()?;
        if k.eq_ignore_ascii_case(key) {
            return Some(v);
        }
    }
    None
}

/// Configstring table and baselines for the current map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameState {
    configstrings: Vec<String>,
    total_chars: usize,
    baselines: Vec<Option<EntityState>>,
}

impl Default for GameState {
    fn default() -> Self {
        Self {
            configstrings: vec![String::new(); MAX_CONFIGSTRINGS],
            total_chars: 0,
            baselines: vec![None; usize::from(MAX_GENTITIES)],
        }
    }
}

impl GameState {
    /// Builds the table from a received gamestate.
    pub fn from_record(record: &GamestateRecord) -> ClientResult<Self> {
        let mut state = Self::default();
        for (index, value) in &record.configstrings {
            state.set_configstring(usize::from(*index), value)?;
        }
        for baseline in &record.baselines {
            if let Some(slot) = state.baselines.get_mut(usize::from(baseline.number)) {
                *slot = Some(*baseline);
            }
        }
        Ok(state)
    }

    #[must_use]
    pub fn configstring(&self, index: usize) -> Option<&str> {
        self.configstrings.get(index).map(String::as_str)
    }

    #[must_use]
    pub fn baseline(&self, number: u16) -> Option<&EntityState> {
        self.baselines.get(usize::from(number))?.as_ref()
    }

    /// Non-empty configstrings in index order.
    pub fn configstrings(&self) -> impl Iterator<Item = (usize, &str)> {
        self.configstrings
            .iter()
            .enumerate()
            .filter(|(_, value)| !value.is_empty())
            .map(|(index, value)| (index, value.as_str()))
    }

    pub fn baselines(&self) -> impl Iterator<Item = &EntityState> {
        self.baselines.iter().flatten()
    }

    /// Replaces one configstring. Returns `false` if the value is unchanged.
    pub fn set_configstring(&mut self, index: usize, value: &str) -> ClientResult<bool> {
        let Some(slot) = self.configstrings.get_mut(index) else {
            return Err(ClientError::ConfigstringIndex {
                index,
                max: MAX_CONFIGSTRINGS,
            });
        };
        if slot.as_str() == value {
            return Ok(false);
        }
        // Each stored string also pays for its terminator.
        let old_cost = if slot.is_empty() { 0 } else { slot.len() + 1 };
        let new_cost = if value.is_empty() { 0 } else { value.len() + 1 };
        let total = self.total_chars - old_cost + new_cost;
        if total > MAX_GAMESTATE_CHARS {
            return Err(ClientError::ConfigstringOverflow {
                total,
                max: MAX_GAMESTATE_CHARS,
            });
        }
        value.clone_into(slot);
        self.total_chars = total;
        Ok(true)
    }

    /// Snapshot period advertised through `sv_fps` in the server info.
    #[must_use]
    pub fn server_period(&self) -> Option<i32> {
        let info = self.configstring(CS_SERVERINFO)?;
        let fps: i32 = info_value(info, "sv_fps")?.trim().parse().ok()?;
        (fps > 0).then(|| 1000 / fps)
    }
}
