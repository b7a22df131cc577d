// Whole-session properties of the core, exercised through the public API
// only: mirror convergence under long random mutation sequences, hook order
// across turns, time-bank forfeiture and fault isolation between sessions.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arena_core::{
    AttributeSchema, ClassSchema, ClientRole, Delta, DeltaGraph, DeltaOp, DispatchTableBuilder,
    FieldSchema, FunctionSchema, GameContext, GameManager, GameRules, GameSchema, GameSettings,
    HandlerError, ObjectId, OrderError, Outcome, Phase, ReturnSchema, TypeSpec, Value,
    WireValue, path, serializer,
};
use serde_json::json;

// ---------------------------------------------------------------------------
// Graph round-trip
// ---------------------------------------------------------------------------

/// Small deterministic generator so failures reproduce.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: u64) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 33) % bound
    }
}

fn random_scalar(rng: &mut Lcg) -> Value {
    match rng.next(5) {
        0 => Value::Null,
        1 => Value::Bool(rng.next(2) == 0),
        2 => Value::Int(rng.next(10) as i64),
        3 => Value::from(format!("s{}", rng.next(4))),
        _ => Value::Object(ObjectId(rng.next(3).to_string())),
    }
}

#[test]
fn random_mutations_replay_exactly_onto_a_mirror() {
    let mut rng = Lcg(7);
    let mut graph = DeltaGraph::new();
    graph.set(&path!["scalars"], Value::map::<String, Value>([])).unwrap();
    graph.set(&path!["list"], Value::List(vec![])).unwrap();
    graph.set(&path!["nested"], Value::map::<String, Value>([])).unwrap();
    graph.flush();
    let mut mirror = DeltaGraph::from_value(graph.to_value()).unwrap();

    for round in 0..500 {
        let key = format!("k{}", rng.next(6));
        match rng.next(7) {
            0 => graph.put_key(&path!["scalars"], &key, random_scalar(&mut rng)).unwrap(),
            1 => graph.remove_key(&path!["scalars"], &key).unwrap(),
            2 => graph.push(&path!["list"], random_scalar(&mut rng)).unwrap(),
            3 => {
                let len = graph.list_len(&path!["list"]).unwrap();
                let index = rng.next(len as u64 + 1) as usize;
                let remove = rng.next((len - index) as u64 + 1) as usize;
                let insert = (0..rng.next(3)).map(|_| random_scalar(&mut rng)).collect();
                graph.splice(&path!["list"], index, remove, insert).unwrap();
            }
            4 => {
                let items = (0..rng.next(6)).map(|_| random_scalar(&mut rng)).collect();
                graph.set(&path!["list"], Value::List(items)).unwrap();
            }
            5 => {
                let inner = Value::map((0..rng.next(4)).map(|i| (format!("f{i}"), random_scalar(&mut rng))));
                graph.put_key(&path!["nested"], &key, inner).unwrap();
            }
            _ => {
                let entries = (0..rng.next(5)).map(|i| (format!("k{i}"), random_scalar(&mut rng)));
                graph.set(&path!["scalars"], Value::map(entries)).unwrap();
            }
        }

        if rng.next(4) == 0 {
            // Mirrors only ever see wire deltas.
            for delta in graph.flush() {
                mirror.apply(&Delta::from_wire(&delta.to_wire())).unwrap();
            }
            assert_eq!(mirror.snapshot(), graph.snapshot(), "diverged at round {round}");
        }
    }
    for delta in graph.flush() {
        mirror.apply(&Delta::from_wire(&delta.to_wire())).unwrap();
    }
    assert_eq!(mirror.snapshot(), graph.snapshot());
}

#[test]
fn reassigning_identical_state_is_silent() {
    let state = Value::map([
        ("a", Value::List(vec![Value::Int(1), Value::map([("x", 2)])])),
        ("b", Value::Object(ObjectId::from("3"))),
    ]);
    let mut graph = DeltaGraph::new();
    graph.set(&path!["root"], state.clone()).unwrap();
    graph.flush();
    graph.set(&path!["root"], state).unwrap();
    assert!(graph.pending().is_empty());
}

#[test]
fn one_changed_entry_in_a_large_map_is_one_delta() {
    let big = |changed: i64| {
        Value::map((0..1_000).map(|i| (format!("u{i}"), Value::Int(if i == 500 { changed } else { i }))))
    };
    let mut graph = DeltaGraph::new();
    graph.set(&path!["units"], big(500)).unwrap();
    graph.flush();
    graph.set(&path!["units"], big(-1)).unwrap();
    let deltas = graph.flush();
    assert_eq!(deltas.len(), 1);
    assert_eq!(deltas[0].op, DeltaOp::Set);
    assert_eq!(deltas[0].path, path!["units", "u500"]);
}

// ---------------------------------------------------------------------------
// A tiny game for session-level properties
// ---------------------------------------------------------------------------

type HookLog = Arc<Mutex<Vec<String>>>;

/// Every seat may `poke` the board. Poking with `boom` faults; poking with
/// `shape` reports a broken graph, which ends the session.
struct Poke {
    hooks: HookLog,
}

impl GameRules for Poke {
    fn schema(&self) -> GameSchema {
        GameSchema::new("Poke")
            .game_attribute("pokes", AttributeSchema::new(TypeSpec::Int))
            .class("GameObject", ClassSchema::new())
            .class(
                "Board",
                ClassSchema::new().extends("GameObject").function(
                    "poke",
                    FunctionSchema::new(
                        vec![FieldSchema::optional(
                            "how",
                            TypeSpec::literals(["gently", "boom", "shape"]),
                            json!("gently"),
                        )],
                        ReturnSchema::new(TypeSpec::Boolean, json!(true), json!(false)),
                    ),
                ),
            )
    }

    fn bind(&self, builder: &mut DispatchTableBuilder) {
        builder.handler("Board", "poke", |ctx, call| {
            let pokes = ctx.game_attr("pokes").and_then(|v| v.as_int()).unwrap_or(0);
            ctx.set_game_attr("pokes", pokes + 1)?;
            match call.str("how") {
                Some("boom") => Err(HandlerError::fault("board exploded")),
                Some("shape") => {
                    ctx.set_game_attr("pokes", pokes + 2)?;
                    Err(arena_core::StructuralInvariantError::MissingContainer {
                        path: "/game/pokes/inner".into(),
                    }
                    .into())
                }
                // No explicit return: the declared default applies.
                _ => Ok(None),
            }
        });
    }

    fn start(&mut self, ctx: &mut GameContext) -> Result<(), HandlerError> {
        ctx.create_object_with_id("board", "Board")?;
        self.hooks.lock().unwrap().push("start".into());
        Ok(())
    }

    fn before_turn(&mut self, ctx: &mut GameContext, seat: usize) -> Result<(), HandlerError> {
        self.hooks
            .lock()
            .unwrap()
            .push(format!("before {seat} @{}", ctx.current_turn()));
        Ok(())
    }

    fn after_turn(&mut self, ctx: &mut GameContext, seat: usize) -> Result<(), HandlerError> {
        self.hooks
            .lock()
            .unwrap()
            .push(format!("after {seat} @{}", ctx.current_turn()));
        Ok(())
    }

    fn outcome(&self, _ctx: &GameContext) -> Option<Outcome> {
        None
    }
}

fn session(players: usize, hooks: &HookLog) -> (GameManager, Vec<arena_core::ClientId>) {
    let mut manager = GameManager::new(
        Box::new(Poke {
            hooks: hooks.clone(),
        }),
        GameSettings {
            required_players: players,
            time_bank_ms: 1_000,
            ..GameSettings::default()
        },
    )
    .unwrap();
    let clients: Vec<_> = (0..players)
        .map(|i| {
            manager
                .connect(&format!("bot{i}"), ClientRole::Player)
                .unwrap()
                .client
        })
        .collect();
    for &client in &clients {
        manager.ready(client).unwrap();
    }
    (manager, clients)
}

fn board() -> ObjectId {
    ObjectId::from("board")
}

fn poke_args(how: &str) -> BTreeMap<String, WireValue> {
    BTreeMap::from([("how".to_owned(), json!(how))])
}

#[test]
fn turns_cycle_with_one_hook_pair_per_turn() {
    let hooks = HookLog::default();
    let (mut manager, clients) = session(4, &hooks);

    let mut seen = vec![manager.active_player().unwrap()];
    for _ in 0..8 {
        let active = manager.active_player().unwrap();
        manager.end_turn(clients[active]).unwrap();
        seen.push(manager.active_player().unwrap());
    }
    assert_eq!(seen, vec![0, 1, 2, 3, 0, 1, 2, 3, 0]);
    assert_eq!(manager.context().current_turn(), 8);

    let hooks = hooks.lock().unwrap();
    assert_eq!(hooks[0], "start");
    assert_eq!(hooks[1], "before 0 @0");
    assert_eq!(hooks[2], "after 0 @0");
    assert_eq!(hooks[3], "before 1 @1");
    assert_eq!(hooks.iter().filter(|h| h.starts_with("before")).count(), 9);
    assert_eq!(hooks.iter().filter(|h| h.starts_with("after")).count(), 8);
}

#[test]
fn exhausted_time_bank_forfeits_the_seat_but_not_the_session() {
    let hooks = HookLog::default();
    let (mut manager, clients) = session(3, &hooks);

    assert_eq!(manager.turn_deadline(), Some(Duration::from_millis(1_000)));
    assert!(manager.elapse(Duration::from_millis(1_500)));
    manager.advance_turn().unwrap();

    let state = manager.snapshot();
    let seat0 = &state["session"]["players"][0];
    assert_eq!(seat0["timedOut"], json!(true));
    assert_eq!(seat0["lost"], json!(true));
    assert_eq!(manager.phase(), Phase::Running);
    assert_eq!(manager.active_player(), Some(1));
    assert_eq!(
        manager.register_order(clients[0], &board(), "poke", &BTreeMap::new()),
        Err(OrderError::ClientOut)
    );
}

#[test]
fn faults_are_isolated_from_state_and_from_other_sessions() {
    let hooks = HookLog::default();
    let (mut faulty, a) = session(2, &hooks);
    let (mut healthy, b) = session(2, &hooks);

    let before = faulty.snapshot();
    let err = faulty
        .register_order(a[0], &board(), "poke", &poke_args("boom"))
        .unwrap_err();
    assert_eq!(err.code(), "handler-fault");
    assert_eq!(faulty.snapshot(), before);
    assert_eq!(faulty.phase(), Phase::Running);

    let err = faulty
        .register_order(a[0], &board(), "poke", &poke_args("shape"))
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(faulty.phase(), Phase::Over);
    assert!(faulty.failed());
    assert_eq!(faulty.snapshot()["game"]["pokes"], json!(0));

    let reply = healthy
        .register_order(b[0], &board(), "poke", &BTreeMap::new())
        .unwrap();
    assert_eq!(reply.value, json!(true));
    assert_eq!(healthy.phase(), Phase::Running);
}

#[test]
fn end_to_end_mirror_sees_the_poke() {
    let hooks = HookLog::default();
    let (mut manager, clients) = session(2, &hooks);
    let watcher = manager.connect("watcher", ClientRole::Spectator).unwrap();
    let mut mirror = DeltaGraph::from_value(serializer::untyped(&watcher.snapshot)).unwrap();

    let reply = manager
        .register_order(clients[0], &board(), "poke", &BTreeMap::new())
        .unwrap();
    assert_eq!(reply.value, json!(true));
    assert_eq!(reply.invalid, None);

    let deltas = manager.flush_deltas_for(watcher.client);
    assert_eq!(deltas.len(), 1);
    assert_eq!(deltas[0].path, path!["game", "pokes"]);
    for delta in &deltas {
        mirror.apply(&Delta::from_wire(&delta.to_wire())).unwrap();
    }
    assert_eq!(mirror.get(&path!["game", "pokes"]), Some(Value::Int(1)));
}
