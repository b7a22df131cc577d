// Per-session settings.
//
// Plain serde struct with defaults for every field, so a partial JSON object
// (e.g. `{"required_players": 3}` on the command line) is a valid config.

use serde::{Deserialize, Serialize};

/// How a session's clock runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum SessionMode {
    /// Seats act one at a time; `end-turn` (or a timeout) passes the turn.
    TurnBased,
    /// Every seat may act at any time; the game advances every `tick_ms`.
    RealTime { tick_ms: u64 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameSettings {
    /// Seats that must be filled and ready before the game starts.
    pub required_players: usize,
    pub mode: SessionMode,
    /// Each seat's starting time bank.
    pub time_bank_ms: u64,
    /// Added to the active seat's bank at the start of each of its turns.
    pub time_added_per_turn_ms: u64,
    /// Turn (or tick) after which the game ends via
    /// `GameRules::max_turns_reached`. `None` means no limit.
    pub max_turns: Option<u64>,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            required_players: 2,
            mode: SessionMode::TurnBased,
            time_bank_ms: 10_000,
            time_added_per_turn_ms: 0,
            max_turns: Some(200),
        }
    }
}

impl GameSettings {
    pub fn is_turn_based(&self) -> bool {
        self.mode == SessionMode::TurnBased
    }
}
