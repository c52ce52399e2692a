//! Reliable server command sequencer.
//!
//! Commands arrive with sequence numbers and are consumed strictly in order.
//! A fixed table of directives is intercepted before generic delivery.

use std::num::NonZeroUsize;

use tracing::warn;

use crate::error::{ClientError, ClientResult};
use crate::ring::Ring;

/// Capacity of the big-configstring accumulation buffer.
pub const BIG_INFO_STRING: usize = 8192;

/// Commands handled by the client before the game module sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Ends the session, optionally with a reason.
    Disconnect,
    /// Starts a big configstring.
    BigConfigstringStart,
    /// Continues a big configstring.
    BigConfigstringPart,
    /// Completes a big configstring and applies it as `cs`.
    BigConfigstringEnd,
    /// Replaces one configstring.
    Configstring,
    /// Drops queued user commands before a restart.
    MapRestart,
    /// Server-to-client popup; not forwarded.
    Popup,
    /// Level screenshot request; not forwarded.
    ClientLevelShot,
}

/// Ordered interception table, matched against the first token.
pub const DIRECTIVES: &[(&str, Directive)] = &[
    ("disconnect", Directive::Disconnect),
    ("bcs0", Directive::BigConfigstringStart),
    ("bcs1", Directive::BigConfigstringPart),
    ("bcs2", Directive::BigConfigstringEnd),
    ("cs", Directive::Configstring),
    ("map_restart", Directive::MapRestart),
    ("popup", Directive::Popup),
    ("clientLevelShot", Directive::ClientLevelShot),
];

/// Looks up the directive for a command's first token.
#[must_use]
pub fn classify(name: &str) -> Option<Directive> {
    DIRECTIVES
        .iter()
        .find(|(prefix, _)| *prefix == name)
        .map(|(_, directive)| *directive)
}

/// What the session should do with an intercepted command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandAction {
    /// Hand `text` to the game module unchanged.
    Deliver(String),
    /// Store a configstring, then deliver `text`.
    Configstring {
        index: usize,
        value: String,
        text: String,
    },
    /// Clear user commands, then deliver `text`.
    MapRestart(String),
    /// Consume without delivery.
    Swallow,
}

/// Splits a command line into whitespace-separated tokens, honouring
/// double quotes.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(&first) = chars.peek() else {
            break;
        };
        let mut token = String::new();
        if first == '"' {
            chars.next();
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                token.push(c);
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                token.push(c);
            }
        }
        tokens.push(token);
    }
    tokens
}

/// Ring of reliable server commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReliableCommands {
    ring: Ring<String>,
    sequence: i32,
    last_executed: i32,
    big_configstring: String,
}

impl ReliableCommands {
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            ring: Ring::new(capacity),
            sequence: 0,
            last_executed: 0,
            big_configstring: String::new(),
        }
    }

    /// Newest sequence received.
    #[must_use]
    pub const fn sequence(&self) -> i32 {
        self.sequence
    }

    /// Newest sequence handed to the consumer.
    #[must_use]
    pub const fn last_executed(&self) -> i32 {
        self.last_executed
    }

    /// Oldest sequence still retained.
    #[must_use]
    pub fn oldest(&self) -> i32 {
        self.sequence.saturating_sub(self.ring.span()).saturating_add(1)
    }

    /// Returns `true` if `sequence` has been overwritten.
    #[must_use]
    pub fn is_cycled(&self, sequence: i32) -> bool {
        sequence <= self.sequence.saturating_sub(self.ring.span())
    }

    /// Restarts numbering at `sequence`, as on a new gamestate.
    pub fn reset(&mut self, sequence: i32) {
        self.ring.clear();
        self.sequence = sequence;
        self.last_executed = sequence;
        self.big_configstring.clear();
    }

    /// Skips ahead so the next command fetched is `sequence + 1`.
    pub fn set_last_executed(&mut self, sequence: i32) {
        self.last_executed = sequence;
    }

    /// Stores a received command. Duplicates and older sequences are ignored.
    pub fn store(&mut self, sequence: i32, text: &str) -> bool {
        if sequence <= self.sequence {
            return false;
        }
        self.sequence = sequence;
        self.ring.put(sequence, text.to_owned());
        true
    }

    /// Fetches command `sequence` and marks it executed.
    ///
    /// During playback a cycled command is skipped and reported as `None`;
    /// live, it is fatal.
    pub fn fetch(&mut self, sequence: i32, playback: bool) -> ClientResult<Option<String>> {
        if self.is_cycled(sequence) {
            if playback {
                warn!(sequence, oldest = self.oldest(), "reliable command was cycled out");
                self.last_executed = self.last_executed.max(sequence);
                return Ok(None);
            }
            return Err(ClientError::CommandCycled {
                requested: sequence,
                oldest: self.oldest(),
            });
        }
        if sequence > self.sequence {
            return Err(ClientError::CommandNotReceived {
                requested: sequence,
                latest: self.sequence,
            });
        }
        self.last_executed = sequence;
        Ok(Some(self.ring.at(sequence).clone()))
    }

    /// Applies the directive table to a fetched command.
    pub fn intercept(&mut self, text: &str) -> ClientResult<CommandAction> {
        let args = tokenize(text);
        let Some(name) = args.first() else {
            return Ok(CommandAction::Deliver(text.to_owned()));
        };
        let arg = |i: usize| args.get(i).map_or("", String::as_str);

        match classify(name) {
            None => Ok(CommandAction::Deliver(text.to_owned())),
            Some(Directive::Disconnect) => Err(ClientError::ServerDisconnected {
                reason: args.get(1).cloned(),
            }),
            Some(Directive::BigConfigstringStart) => {
                self.big_configstring = format!("cs {} \"{}", arg(1), arg(2));
                self.check_big_len(0)?;
                Ok(CommandAction::Swallow)
            }
            Some(Directive::BigConfigstringPart) => {
                self.check_big_len(arg(2).len())?;
                self.big_configstring.push_str(arg(2));
                Ok(CommandAction::Swallow)
            }
            Some(Directive::BigConfigstringEnd) => {
                self.check_big_len(arg(2).len() + 1)?;
                let mut assembled = std::mem::take(&mut self.big_configstring);
                assembled.push_str(arg(2));
                assembled.push('"');
                self.intercept(&assembled)
            }
            Some(Directive::Configstring) => Ok(arg(1).parse::<usize>().map_or_else(
                |_| CommandAction::Deliver(text.to_owned()),
                |index| CommandAction::Configstring {
                    index,
                    value: arg(2).to_owned(),
                    text: text.to_owned(),
                },
            )),
            Some(Directive::MapRestart) => Ok(CommandAction::MapRestart(text.to_owned())),
            Some(Directive::Popup | Directive::ClientLevelShot) => Ok(CommandAction::Swallow),
        }
    }

    fn check_big_len(&self, extra: usize) -> ClientResult<()> {
        let len = self.big_configstring.len() + extra;
        if len >= BIG_INFO_STRING {
            return Err(ClientError::BigConfigstringOverflow {
                len,
                max: BIG_INFO_STRING,
            });
        }
        Ok(())
    }
}
