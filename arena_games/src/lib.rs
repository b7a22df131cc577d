// arena_games: reference game rules for the arena server.
//
// Each module implements `arena_core::GameRules` for one game, using only the
// core's public API (schema builders, `GameContext`, dispatch bindings). The
// server looks games up by name through `factory`.
//
// - `nim.rs`: Nim, take 1..=3 stones from a shared pile, last stone wins.

use std::sync::Arc;

use arena_core::GameFactory;

pub mod nim;

/// Every game this crate ships, by name.
pub fn factories() -> Vec<Arc<dyn GameFactory>> {
    vec![Arc::new(nim::NimFactory)]
}

/// Look up a game by name, ignoring ASCII case.
pub fn factory(name: &str) -> Option<Arc<dyn GameFactory>> {
    factories()
        .into_iter()
        .find(|f| f.game_name().eq_ignore_ascii_case(name))
}
