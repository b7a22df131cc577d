// End-to-end tests for the whole stack.
//
// Each test starts a real server hosting Nim, connects real `NetClient`s (via
// `TestGameClient`), and checks the full path:
// hello → welcome snapshot → ready → order → reply + deltas → mirror.
//
// The property that matters most: every client's mirror, built only from its
// join snapshot plus the deltas it received, ends up identical to every
// other client's.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use arena_core::{GameSettings, Value, path};
use arena_games::nim::NimFactory;
use arena_protocol::message::{OrderReply, ServerMessage};
use arena_protocol::types::{ClientRole, ObjectId};
use arena_server::server::{ServerConfig, ServerHandle, start_server};
use arena_tests::TestGameClient;
use serde_json::json;

fn start(settings: GameSettings) -> (ServerHandle, SocketAddr) {
    let config = ServerConfig {
        port: 0,
        settings,
        ..ServerConfig::default()
    };
    start_server(config, Arc::new(NimFactory)).unwrap()
}

/// Connect two players to `session`, ready them and wait until both mirrors
/// show the running game with their player objects.
fn start_game(addr: SocketAddr, session: &str) -> (TestGameClient, TestGameClient) {
    let mut alice = TestGameClient::connect(addr, "Alice", session, ClientRole::Player);
    let mut bob = TestGameClient::connect(addr, "Bob", session, ClientRole::Player);
    assert_eq!(alice.seat(), Some(0));
    assert_eq!(bob.seat(), Some(1));
    alice.ready();
    bob.ready();
    for client in [&mut alice, &mut bob] {
        client.wait_until(|c| c.phase().as_deref() == Some("running") && c.my_object().is_some());
    }
    (alice, bob)
}

fn stones(client: &TestGameClient) -> i64 {
    client
        .get(&path!["game", "stones"])
        .and_then(|v| v.as_int())
        .unwrap_or(-1)
}

fn error_code(reply: &OrderReply) -> &str {
    match reply {
        OrderReply::Error { code, .. } => code,
        other => panic!("expected an error reply, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Test scenarios
// ---------------------------------------------------------------------------

#[test]
fn nim_played_to_the_end_leaves_identical_mirrors() {
    let (handle, addr) = start(GameSettings::default());
    let mut watcher = TestGameClient::connect(addr, "Watcher", "e2e", ClientRole::Spectator);
    let (alice, bob) = start_game(addr, "e2e");
    let mut players = [alice, bob];

    let mut turn = 0;
    loop {
        let seat = turn % 2;
        let other = 1 - seat;
        players[seat].wait_until(|c| c.active_player() == Some(seat));
        let before = stones(&players[seat]);
        let take = before.min(3);
        let reply = players[seat].take(take);
        assert_eq!(
            reply,
            OrderReply::Returned {
                returned: json!(true),
                invalid: None
            }
        );
        // The reply is sent before the deltas of the same order.
        players[seat].wait_until(|c| stones(c) == before - take);
        if before == take {
            break;
        }
        players[seat].end_turn();
        players[other].wait_until(|c| c.active_player() == Some(other));
        turn += 1;
    }

    // 15 stones, 3 a turn: Alice takes the last three.
    for client in players.iter_mut().chain([&mut watcher]) {
        let msg = client.wait_for(|m| matches!(m, ServerMessage::Over { .. }));
        assert_eq!(
            msg,
            ServerMessage::Over {
                reason: "Alice took the last stone".into()
            }
        );
    }
    let reference = players[0].mirror().snapshot();
    assert_eq!(players[1].mirror().snapshot(), reference);
    assert_eq!(watcher.mirror().snapshot(), reference);
    assert_eq!(reference["session"]["players"][0]["won"], json!(true));
    assert_eq!(reference["session"]["players"][1]["lost"], json!(true));
    assert_eq!(reference["game"]["log"].as_array().map(Vec::len), Some(5));

    handle.stop();
}

#[test]
fn rejected_orders_change_nothing() {
    let (handle, addr) = start(GameSettings::default());
    let (mut alice, mut bob) = start_game(addr, "rejects");
    let me = alice.my_object().unwrap();

    // Judged invalid by the game: declared invalid value plus a reason.
    match alice.take(5) {
        OrderReply::Returned { returned, invalid } => {
            assert_eq!(returned, json!(false));
            assert!(invalid.unwrap().contains("between 1 and 3"));
        }
        other => panic!("expected Returned, got {other:?}"),
    }

    // Rejected by the server before the game sees it.
    assert_eq!(error_code(&bob.take(1)), "not-your-turn");
    let bad_type = BTreeMap::from([("count".to_owned(), json!("many"))]);
    assert_eq!(error_code(&alice.order(&me, "take", bad_type)), "validation");
    assert_eq!(
        error_code(&alice.order(&me, "give", BTreeMap::new())),
        "unknown-function"
    );
    assert_eq!(
        error_code(&alice.order(&ObjectId::from("nope"), "take", BTreeMap::new())),
        "unresolved-reference"
    );

    // A legal order still goes through and is the only change.
    alice.take(1);
    alice.wait_until(|c| stones(c) == 14);
    bob.wait_until(|c| stones(c) == 14);
    assert_eq!(
        bob.get(&path!["game", "log"]),
        Some(Value::List(vec![Value::from("Alice took 1")]))
    );

    handle.stop();
}

#[test]
fn exhausted_time_bank_forfeits_over_the_wire() {
    let (handle, addr) = start(GameSettings {
        time_bank_ms: 1_000,
        ..GameSettings::default()
    });
    let (mut alice, mut bob) = start_game(addr, "slow");

    // Alice never moves.
    let msg = bob.wait_for(|m| matches!(m, ServerMessage::Over { .. }));
    assert_eq!(
        msg,
        ServerMessage::Over {
            reason: "Last player standing".into()
        }
    );
    assert_eq!(
        bob.get(&path!["session", "players", 0usize, "timedOut"]),
        Some(Value::Bool(true))
    );
    alice.wait_for(|m| matches!(m, ServerMessage::Over { .. }));
    assert_eq!(alice.mirror().snapshot(), bob.mirror().snapshot());

    handle.stop();
}

#[test]
fn leaving_mid_game_hands_the_win_to_the_other_player() {
    let (handle, addr) = start(GameSettings::default());
    let (mut alice, mut bob) = start_game(addr, "quit");

    alice.disconnect();
    match bob.wait_for(|m| matches!(m, ServerMessage::ClientLeft { .. })) {
        ServerMessage::ClientLeft { client_id, name } => {
            assert_eq!(client_id, alice.client_id());
            assert_eq!(name, "Alice");
        }
        _ => unreachable!(),
    }
    bob.wait_for(|m| matches!(m, ServerMessage::Over { .. }));
    assert_eq!(
        bob.get(&path!["session", "players", 0usize, "disconnected"]),
        Some(Value::Bool(true))
    );
    assert_eq!(
        bob.get(&path!["session", "players", 1usize, "won"]),
        Some(Value::Bool(true))
    );

    handle.stop();
}

#[test]
fn late_spectator_starts_from_a_consistent_snapshot() {
    let (handle, addr) = start(GameSettings::default());
    let (mut alice, mut bob) = start_game(addr, "late");
    alice.take(2);
    alice.wait_until(|c| stones(c) == 13);

    let mut watcher = TestGameClient::connect(addr, "Late", "late", ClientRole::Spectator);
    assert_eq!(watcher.seat(), None);
    assert_eq!(stones(&watcher), 13);

    alice.take(1);
    for client in [&mut alice, &mut bob, &mut watcher] {
        client.wait_until(|c| stones(c) == 12);
    }
    assert_eq!(watcher.mirror().snapshot(), alice.mirror().snapshot());
    assert_eq!(watcher.mirror().snapshot(), bob.mirror().snapshot());

    handle.stop();
}

#[test]
fn sessions_do_not_share_state() {
    let (handle, addr) = start(GameSettings::default());
    let (mut a1, _b1) = start_game(addr, "table-1");
    let (a2, _b2) = start_game(addr, "table-2");

    a1.take(3);
    a1.wait_until(|c| stones(c) == 12);
    assert_eq!(stones(&a2), 15);

    handle.stop();
}
