// Nim played through a full `GameManager` session with a spectator mirror,
// the way the server drives it: orders, turn ends and delta flushes.

use std::collections::BTreeMap;

use arena_core::{
    ClientRole, Delta, DeltaGraph, GameManager, GameSettings, Phase, Value, path, serializer,
};
use arena_games::{factory, nim};
use serde_json::json;

fn take(count: i64) -> BTreeMap<String, serde_json::Value> {
    BTreeMap::from([("count".to_owned(), json!(count))])
}

#[test]
fn three_player_game_converges_on_a_spectator_mirror() {
    let rules = factory(nim::GAME_NAME).unwrap().create();
    let settings = GameSettings {
        required_players: 3,
        ..GameSettings::default()
    };
    let mut manager = GameManager::new(rules, settings).unwrap();
    let clients: Vec<_> = ["ann", "ben", "cat"]
        .iter()
        .map(|name| manager.connect(name, ClientRole::Player).unwrap().client)
        .collect();
    let watcher = manager.connect("watcher", ClientRole::Spectator).unwrap();
    let mut mirror = DeltaGraph::from_value(serializer::untyped(&watcher.snapshot)).unwrap();

    for &client in &clients {
        manager.ready(client).unwrap();
    }

    let mut turns = 0;
    while manager.phase() == Phase::Running {
        let seat = manager.active_player().unwrap();
        let me = manager.context().seat_object(seat).unwrap();
        // Everyone takes 2, except when 1 stone is left.
        let stones = manager.context().game_attr("stones").unwrap().as_int().unwrap();
        let reply = manager
            .register_order(clients[seat], &me, "take", &take(stones.min(2)))
            .unwrap();
        assert_eq!(reply.value, json!(true));
        if manager.phase() == Phase::Running {
            manager.end_turn(clients[seat]).unwrap();
        }
        for delta in manager.flush_deltas_for(watcher.client) {
            mirror.apply(&Delta::from_wire(&delta.to_wire())).unwrap();
        }
        assert_eq!(mirror.snapshot(), manager.snapshot());
        turns += 1;
    }

    // 15 = 2 * 7 + 1: the eighth take is ben's single stone.
    assert_eq!(turns, 8);
    assert_eq!(manager.over_reason(), Some("ben took the last stone"));
    assert_eq!(mirror.get(&path!["session", "phase"]), Some(Value::from("over")));
    assert_eq!(mirror.get(&path!["game", "stones"]), Some(Value::Int(0)));
    assert_eq!(
        mirror.get(&path!["game", "log"]).and_then(|v| v.as_list().map(<[Value]>::len)),
        Some(8)
    );
}

#[test]
fn rejected_take_leaves_no_deltas() {
    let mut manager =
        GameManager::new(factory("nim").unwrap().create(), GameSettings::default()).unwrap();
    let a = manager.connect("a", ClientRole::Player).unwrap().client;
    let b = manager.connect("b", ClientRole::Player).unwrap().client;
    manager.ready(a).unwrap();
    manager.ready(b).unwrap();
    manager.flush_deltas_for(a);

    let me = manager.context().seat_object(0).unwrap();
    let reply = manager.register_order(a, &me, "take", &take(0)).unwrap();
    assert_eq!(reply.value, json!(false));
    assert!(reply.invalid.is_some());
    assert!(manager.flush_deltas_for(a).is_empty());
}
