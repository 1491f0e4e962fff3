//! End-to-end runs of small scenarios

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use scenario_engine::metadata::{METADATA_FILE, SCENARIO_FILE};
use scenario_engine::{
    AbortInfo, ChannelEventSink, NodeDef, PrimitiveName, Scenario, ScenarioContent,
    ScenarioDefinition, ScenarioEvent, ScenarioMetadata, ScenarioState, SensorDevice,
    SensorSample, StopReason, VecEventSink,
};
use sensor_log::RecordReader;
use serde_json::json;
use tempfile::tempdir;
use tokio::sync::mpsc::UnboundedReceiver;

fn node(primitive: PrimitiveName, kwargs: serde_json::Value) -> NodeDef {
    NodeDef::new(primitive).with_kwargs(kwargs)
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn build(content: ScenarioContent, dir: &Path) -> Arc<Scenario> {
    init_logging();
    Scenario::builder(ScenarioDefinition::new(42, content), dir).build()
}

fn build_with_channel(
    content: ScenarioContent,
    dir: &Path,
) -> (Arc<Scenario>, UnboundedReceiver<ScenarioEvent>) {
    init_logging();
    let (sink, rx) = ChannelEventSink::new();
    let scenario = Scenario::builder(ScenarioDefinition::new(42, content), dir)
        .event_sink(Arc::new(sink))
        .build();
    (scenario, rx)
}

/// Next prompt id emitted by the scenario
async fn next_prompt(rx: &mut UnboundedReceiver<ScenarioEvent>) -> (u64, ScenarioEvent) {
    loop {
        let event = rx.recv().await.expect("event channel closed");
        if let Some(prompt_id) = event.prompt_id() {
            return (prompt_id, event);
        }
    }
}

#[tokio::test]
async fn test_counter_scenario_completes() {
    let dir = tempdir().unwrap();
    let content = ScenarioContent::new("a")
        .with_node("a", NodeDef::new(PrimitiveName::Nop).then("b"))
        .with_node(
            "b",
            node(PrimitiveName::CounterSet, json!({"name": "x", "value": 5})).then("c"),
        )
        .with_node(
            "c",
            node(PrimitiveName::CounterEqu, json!({"name": "x", "value": 5}))
                .with_next_nodes([None, Some("mismatch")]),
        )
        .with_node(
            "mismatch",
            node(PrimitiveName::Abort, json!({"reason": "counter mismatch"})),
        );
    let scenario = build(content, dir.path());

    scenario.start().unwrap();
    assert_eq!(scenario.finished().await, StopReason::Completed);
    assert_eq!(scenario.state(), ScenarioState::Stopped);
    assert_eq!(scenario.counter("x"), Some(5));

    let metadata = ScenarioMetadata::load(dir.path()).unwrap();
    assert_eq!(metadata.scenario_id, 42);
    assert!(metadata.acquisition_start_timestamp.is_some());
    assert!(metadata.acquisition_end_timestamp.is_some());
    assert!(metadata.abort.is_none());
    assert!(dir.path().join(SCENARIO_FILE).exists());
}

#[tokio::test]
async fn test_counter_inc_then_dec_returns_to_zero() {
    let dir = tempdir().unwrap();
    let content = ScenarioContent::new("inc")
        .with_node("inc", node(PrimitiveName::CounterInc, json!({"name": "n"})).then("dec"))
        .with_node("dec", node(PrimitiveName::CounterDec, json!({"name": "n"})).then("check"))
        .with_node(
            "check",
            node(PrimitiveName::CounterCmp, json!({"name": "n", "value": 0}))
                .with_next_nodes([None, Some("mismatch"), Some("mismatch")]),
        )
        .with_node(
            "mismatch",
            node(PrimitiveName::Abort, json!({"reason": "counter drifted"})),
        );
    let scenario = build(content, dir.path());

    scenario.start().unwrap();
    assert_eq!(scenario.finished().await, StopReason::Completed);
    assert_eq!(scenario.counter("n"), Some(0));
}

#[tokio::test]
async fn test_counter_comparisons() {
    let dir = tempdir().unwrap();
    let content = ScenarioContent::new("unset_equ")
        .with_node(
            "unset_equ",
            node(PrimitiveName::CounterEqu, json!({"name": "missing", "value": 0}))
                .with_next_nodes([Some("fail"), Some("unset_cmp")]),
        )
        .with_node(
            "unset_cmp",
            node(PrimitiveName::CounterCmp, json!({"name": "missing", "value": 0}))
                .with_next_nodes([Some("fail"), Some("set"), Some("fail")]),
        )
        .with_node("set", node(PrimitiveName::CounterSet, json!({"name": "n", "value": 3})).then("greater"))
        .with_node(
            "greater",
            node(PrimitiveName::CounterCmp, json!({"name": "n", "value": 1}))
                .with_next_nodes([Some("fail"), Some("fail"), Some("lower")]),
        )
        .with_node(
            "lower",
            node(PrimitiveName::CounterCmp, json!({"name": "n", "value": 7}))
                .with_next_nodes([Some("fail"), Some("done"), Some("fail")]),
        )
        .with_node("done", node(PrimitiveName::CounterSet, json!({"name": "ok", "value": 1})))
        .with_node("fail", node(PrimitiveName::Abort, json!({"reason": "unexpected comparison"})));
    let scenario = build(content, dir.path());

    scenario.start().unwrap();
    assert_eq!(scenario.finished().await, StopReason::Completed);
    assert_eq!(scenario.counter("ok"), Some(1));
    assert_eq!(scenario.counter("missing"), None);
}

#[tokio::test(start_paused = true)]
async fn test_fork_and_join() {
    let dir = tempdir().unwrap();
    let content = ScenarioContent::new("fork")
        .with_node(
            "fork",
            node(PrimitiveName::Fork, json!({"branch_name": "b"})).with_next_nodes([Some("join"), Some("b1")]),
        )
        .with_node("b1", node(PrimitiveName::CounterInc, json!({"name": "y"})).then("b2"))
        .with_node("b2", node(PrimitiveName::WaitDelay, json!({"delay": 2.0})).then("b3"))
        .with_node("b3", node(PrimitiveName::CounterInc, json!({"name": "y"})).then("b_end"))
        .with_node("b_end", node(PrimitiveName::Join, json!({"subbranch": "b"})))
        .with_node("join", node(PrimitiveName::Join, json!({"subbranch": "b"})).then("check"))
        .with_node(
            "check",
            node(PrimitiveName::CounterCmp, json!({"name": "y", "value": 2}))
                .with_next_nodes([None, Some("fail"), Some("fail")]),
        )
        .with_node("fail", node(PrimitiveName::Abort, json!({"reason": "branch did not finish"})));
    let scenario = build(content, dir.path());

    scenario.start().unwrap();
    assert_eq!(scenario.finished().await, StopReason::Completed);
    assert_eq!(scenario.counter("y"), Some(2));
    assert_eq!(scenario.branch("b").unwrap().value(), Some(0));
}

#[tokio::test]
async fn test_join_unknown_branch_returns_immediately() {
    let dir = tempdir().unwrap();
    let content = ScenarioContent::new("join")
        .with_node("join", node(PrimitiveName::Join, json!({"subbranch": "ghost"})).then("done"))
        .with_node("done", node(PrimitiveName::CounterSet, json!({"name": "done", "value": 1})));
    let scenario = build(content, dir.path());

    scenario.start().unwrap();
    assert_eq!(scenario.finished().await, StopReason::Completed);
    assert_eq!(scenario.counter("done"), Some(1));
}

#[tokio::test]
async fn test_event_wait_with_zero_timeout() {
    let dir = tempdir().unwrap();
    let content = ScenarioContent::new("create")
        .with_node("create", node(PrimitiveName::EventCreate, json!({"event_name": "e"})).then("early"))
        .with_node(
            "early",
            node(PrimitiveName::EventWait, json!({"event_name": "e", "timeout": 0}))
                .with_next_nodes([Some("fail"), Some("set")]),
        )
        .with_node("set", node(PrimitiveName::EventSet, json!({"event_name": "e"})).then("late"))
        .with_node(
            "late",
            node(PrimitiveName::EventWaitAll, json!({"event_names": ["e"], "timeout": 0}))
                .with_next_nodes([Some("done"), Some("fail")]),
        )
        .with_node("done", node(PrimitiveName::CounterSet, json!({"name": "ok", "value": 1})))
        .with_node("fail", node(PrimitiveName::Abort, json!({"reason": "unexpected event state"})));
    let scenario = build(content, dir.path());

    scenario.start().unwrap();
    assert_eq!(scenario.finished().await, StopReason::Completed);
    assert_eq!(scenario.counter("ok"), Some(1));
}

#[tokio::test]
async fn test_zero_timeout_wait_needs_every_event() {
    let dir = tempdir().unwrap();
    let content = ScenarioContent::new("create")
        .with_node(
            "create",
            node(PrimitiveName::EventCreate, json!({"event_names": ["a", "b"]})).then("set_a"),
        )
        .with_node("set_a", node(PrimitiveName::EventSet, json!({"event_name": "a"})).then("any"))
        .with_node(
            "any",
            node(PrimitiveName::EventWait, json!({"event_names": ["a", "b"], "timeout": 0}))
                .with_next_nodes([Some("fail"), Some("all")]),
        )
        .with_node(
            "all",
            node(PrimitiveName::EventWaitAll, json!({"event_names": ["a", "b"], "timeout": 0}))
                .with_next_nodes([Some("fail"), Some("set_b")]),
        )
        .with_node("set_b", node(PrimitiveName::EventSet, json!({"event_name": "b"})).then("both"))
        .with_node(
            "both",
            node(PrimitiveName::EventWait, json!({"event_names": ["a", "b"], "timeout": 0}))
                .with_next_nodes([Some("none"), Some("fail")]),
        )
        .with_node(
            "none",
            node(PrimitiveName::EventWait, json!({"event_names": [], "timeout": 0}))
                .with_next_nodes([Some("done"), Some("fail")]),
        )
        .with_node("done", node(PrimitiveName::CounterSet, json!({"name": "ok", "value": 1})))
        .with_node("fail", node(PrimitiveName::Abort, json!({"reason": "unexpected event state"})));
    let scenario = build(content, dir.path());

    scenario.start().unwrap();
    assert_eq!(scenario.finished().await, StopReason::Completed);
    assert_eq!(scenario.counter("ok"), Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_event_wait_times_out() {
    let dir = tempdir().unwrap();
    let content = ScenarioContent::new("create")
        .with_node("create", node(PrimitiveName::EventCreate, json!({"event_name": "e"})).then("wait"))
        .with_node(
            "wait",
            node(PrimitiveName::EventWait, json!({"event_name": "e", "timeout": 3.5}))
                .with_next_nodes([None, Some("timed_out")]),
        )
        .with_node(
            "timed_out",
            node(PrimitiveName::CounterSet, json!({"name": "timed_out", "value": 1})),
        );
    let scenario = build(content, dir.path());

    let started = tokio::time::Instant::now();
    scenario.start().unwrap();
    assert_eq!(scenario.finished().await, StopReason::Completed);
    assert_eq!(scenario.counter("timed_out"), Some(1));
    assert!(started.elapsed() >= Duration::from_millis(3500));
}

#[tokio::test(start_paused = true)]
async fn test_reset_event_strands_waiters() {
    let dir = tempdir().unwrap();
    let content = ScenarioContent::new("create")
        .with_node("create", node(PrimitiveName::EventCreate, json!({"event_name": "e"})).then("fork"))
        .with_node(
            "fork",
            node(PrimitiveName::Fork, json!({"branch_name": "waiter"}))
                .with_next_nodes([Some("settle"), Some("wait")]),
        )
        .with_node("wait", node(PrimitiveName::EventWait, json!({"event_name": "e"})).then("woke"))
        .with_node("woke", node(PrimitiveName::CounterSet, json!({"name": "woke", "value": 1})))
        .with_node("settle", node(PrimitiveName::WaitDelay, json!({"delay": 0.1})).then("reset"))
        .with_node("reset", node(PrimitiveName::EventReset, json!({"event_name": "e"})).then("set"))
        .with_node("set", node(PrimitiveName::EventSet, json!({"event_name": "e"})).then("linger"))
        .with_node("linger", node(PrimitiveName::WaitDelay, json!({"delay": 1.0})));
    let scenario = build(content, dir.path());

    scenario.start().unwrap();
    assert_eq!(scenario.finished().await, StopReason::Completed);
    assert_eq!(scenario.counter("woke"), None);
    assert!(scenario.event("e").unwrap().is_resolved());
}

#[tokio::test]
async fn test_abort_stops_with_reason() {
    let dir = tempdir().unwrap();
    let content = ScenarioContent::new("abort")
        .with_node(
            "abort",
            node(PrimitiveName::Abort, json!({"reason": "no_signal", "message": "Sensor silent"}))
                .with_next_nodes([Some("after"), Some("after")]),
        )
        .with_node("after", node(PrimitiveName::CounterSet, json!({"name": "after", "value": 1})));
    let sink = Arc::new(VecEventSink::new());
    let scenario = Scenario::builder(ScenarioDefinition::new(42, content), dir.path())
        .event_sink(sink.clone())
        .build();

    scenario.start().unwrap();
    let info = AbortInfo {
        reason: "no_signal".to_string(),
        message: Some("Sensor silent".to_string()),
    };
    assert_eq!(scenario.finished().await, StopReason::Aborted(info.clone()));
    assert_eq!(scenario.counter("after"), None);

    let metadata = ScenarioMetadata::load(dir.path()).unwrap();
    assert_eq!(metadata.abort, Some(info.clone()));

    let events = sink.events();
    assert_eq!(
        events.last(),
        Some(&ScenarioEvent::Finished {
            error: Some("no_signal".to_string()),
            abort: Some(info),
        })
    );
    assert!(events.contains(&ScenarioEvent::State {
        state: ScenarioState::Stopped
    }));
}

#[tokio::test]
async fn test_invalid_arguments_fail_the_run() {
    let dir = tempdir().unwrap();
    let content = ScenarioContent::new("bad")
        .with_node("bad", node(PrimitiveName::CounterSet, json!({"value": 1})));
    let scenario = build(content, dir.path());

    scenario.start().unwrap();
    let reason = scenario.finished().await;
    assert!(matches!(reason, StopReason::Failed(ref message) if message.contains("counter_set")));
    assert!(!reason.keeps_data());
}

#[tokio::test]
async fn test_wait_option_selects_successor() {
    let dir = tempdir().unwrap();
    let content = ScenarioContent::new("ask")
        .with_text("question", "Which hand?")
        .with_node(
            "ask",
            node(
                PrimitiveName::WaitOption,
                json!({"msg": "${txt:question}", "options": ["left", "right"]}),
            )
            .with_next_nodes([Some("left"), Some("right")]),
        )
        .with_node("left", node(PrimitiveName::CounterSet, json!({"name": "hand", "value": 0})))
        .with_node("right", node(PrimitiveName::CounterSet, json!({"name": "hand", "value": 1})));
    let (scenario, mut rx) = build_with_channel(content, dir.path());

    scenario.start().unwrap();
    let (prompt_id, event) = next_prompt(&mut rx).await;
    assert_eq!(
        event,
        ScenarioEvent::WaitOption {
            prompt_id,
            title: None,
            msg: Some("Which hand?".to_string()),
            options: vec!["left".to_string(), "right".to_string()],
        }
    );
    assert_eq!(scenario.pending_prompts(), vec![prompt_id]);
    assert!(scenario.resolve_prompt(prompt_id, 1));

    assert_eq!(scenario.finished().await, StopReason::Completed);
    assert_eq!(scenario.counter("hand"), Some(1));
}

#[tokio::test]
async fn test_device_choice_out_of_range_takes_fallback() {
    init_logging();
    let dir = tempdir().unwrap();
    let content = ScenarioContent::new("select")
        .with_node(
            "select",
            node(PrimitiveName::SensorDeviceSelect, json!({"sensor_device_type": "mobile_phone"}))
                .with_next_nodes([Some("fail"), Some("fallback")]),
        )
        .with_node("fallback", node(PrimitiveName::CounterSet, json!({"name": "fallback", "value": 1})))
        .with_node("fail", node(PrimitiveName::Abort, json!({"reason": "device selected"})));
    let (sink, mut rx) = ChannelEventSink::new();
    let scenario = Scenario::builder(ScenarioDefinition::new(42, content), dir.path())
        .available_devices(vec![
            SensorDevice::mobile_phone(&["generic.acc"]),
            SensorDevice::mobile_phone(&["generic.gyr"]),
        ])
        .event_sink(Arc::new(sink))
        .build();

    scenario.start().unwrap();
    let (prompt_id, event) = next_prompt(&mut rx).await;
    assert!(matches!(event, ScenarioEvent::WaitOption { ref options, .. } if options.len() == 2));
    assert!(scenario.resolve_prompt(prompt_id, 5));

    assert_eq!(scenario.finished().await, StopReason::Completed);
    assert_eq!(scenario.counter("fallback"), Some(1));
    assert!(scenario.selected_devices().is_empty());
}

#[tokio::test]
async fn test_rejected_prompt_fails_the_run() {
    let dir = tempdir().unwrap();
    let content = ScenarioContent::new("next").with_node("next", NodeDef::new(PrimitiveName::WaitNext));
    let (scenario, mut rx) = build_with_channel(content, dir.path());

    scenario.start().unwrap();
    let (prompt_id, _) = next_prompt(&mut rx).await;
    assert!(scenario.reject_prompt(prompt_id, "ui closed"));

    let reason = scenario.finished().await;
    assert!(matches!(reason, StopReason::Failed(ref message) if message.contains("ui closed")));
}

#[tokio::test]
async fn test_display_page_countdown_then_next() {
    let dir = tempdir().unwrap();
    let content = ScenarioContent::new("page").with_node(
        "page",
        node(PrimitiveName::DisplayPage, json!({"title": "Walk", "countdown": 3}))
            .with_step("walking"),
    );
    let (scenario, mut rx) = build_with_channel(content, dir.path());

    scenario.start().unwrap();
    let (countdown_id, countdown) = next_prompt(&mut rx).await;
    assert_eq!(
        countdown,
        ScenarioEvent::WaitCountdown {
            prompt_id: countdown_id,
            countdown: 3.0
        }
    );
    scenario.resolve_prompt(countdown_id, 0);

    let (next_id, next) = next_prompt(&mut rx).await;
    assert_eq!(next, ScenarioEvent::WaitNext { prompt_id: next_id });
    scenario.resolve_prompt(next_id, 0);

    assert_eq!(scenario.finished().await, StopReason::Completed);
}

#[tokio::test]
async fn test_records_receive_routed_samples() {
    let dir = tempdir().unwrap();
    let content = ScenarioContent::new("create")
        .with_node(
            "create",
            node(
                PrimitiveName::RecordCreate,
                json!({"name": "walk", "sensors": ["generic.acc", "generic.gyr"]}),
            )
            .then("next"),
        )
        .with_node("next", NodeDef::new(PrimitiveName::WaitNext).then("annotate"))
        .with_node(
            "annotate",
            node(PrimitiveName::RecordAnnotate, json!({"name": "walk", "label": "turn"})).then("close"),
        )
        .with_node("close", node(PrimitiveName::RecordClose, json!({"name": "walk"})));
    let (scenario, mut rx) = build_with_channel(content, dir.path());

    scenario.start().unwrap();
    let (prompt_id, _) = next_prompt(&mut rx).await;

    scenario.on_sensor_sample(
        "mobile_phone",
        "generic.acc",
        &SensorSample {
            timestamp: 1_000,
            values: vec![0.5, -1.0, 9.75],
        },
    );
    scenario.on_sensor_sample(
        "mobile_phone",
        "generic.gyr",
        &SensorSample {
            timestamp: 2_000,
            values: vec![0.25, 0.0, 0.125],
        },
    );
    // Not routed to any record
    scenario.on_sensor_sample(
        "mobile_phone",
        "generic.uncal_acc",
        &SensorSample {
            timestamp: 3_000,
            values: vec![0.0; 6],
        },
    );
    scenario.resolve_prompt(prompt_id, 0);
    assert_eq!(scenario.finished().await, StopReason::Completed);

    let file = std::fs::File::open(dir.path().join("walk.bin")).unwrap();
    let mut reader = RecordReader::new(std::io::BufReader::new(file)).unwrap();
    let frames = reader.read_all().unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].frame_id, 0);
    assert_eq!(frames[0].timestamp, 1_000);
    let acc: Vec<f64> = frames[0].values.iter().map(|v| v.as_f64()).collect();
    assert_eq!(acc, vec![0.5, -1.0, 9.75]);
    assert_eq!(frames[1].frame_id, 1);
    assert_eq!(frames[1].timestamp, 2_000);

    let metadata = ScenarioMetadata::load(dir.path()).unwrap();
    assert_eq!(metadata.record_info["walk"].filename, "walk.bin");
    let events: Vec<&str> = metadata.record_events.iter().map(|e| e.event.as_str()).collect();
    assert_eq!(events, vec!["create", "close"]);
    assert_eq!(metadata.annotations.len(), 1);
    assert_eq!(metadata.annotations[0].label, "turn");
}

#[tokio::test]
async fn test_log_info_and_metadata_set() {
    let dir = tempdir().unwrap();
    let content = ScenarioContent::new("log")
        .with_node("log", node(PrimitiveName::LogInfo, json!({"message": "first"})).then("log2"))
        .with_node("log2", node(PrimitiveName::LogInfo, json!({"message": "second"})).then("meta"))
        .with_node(
            "meta",
            node(PrimitiveName::MetadataSet, json!({"key": "shoe", "value": {"size": 42}})),
        );
    let scenario = build(content, dir.path());

    scenario.start().unwrap();
    assert_eq!(scenario.finished().await, StopReason::Completed);

    let log = std::fs::read_to_string(dir.path().join("acquisition.log")).unwrap();
    assert_eq!(log, "first\nsecond\n");
    let metadata: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join(METADATA_FILE)).unwrap()).unwrap();
    assert_eq!(metadata["extra_metadata"]["shoe"], json!({"size": 42}));
}

#[tokio::test(start_paused = true)]
async fn test_pause_and_resume() {
    let dir = tempdir().unwrap();
    let content = ScenarioContent::new("wait")
        .with_node("wait", node(PrimitiveName::WaitDelay, json!({"delay": 10})).then("done"))
        .with_node("done", node(PrimitiveName::CounterInc, json!({"name": "done"})));
    let scenario = build(content, dir.path());

    // Lifecycle calls outside their source state are ignored
    scenario.pause();
    scenario.resume();
    assert_eq!(scenario.state(), ScenarioState::Stopped);

    scenario.start().unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    scenario.resume();
    assert_eq!(scenario.state(), ScenarioState::Running);
    scenario.pause();
    assert_eq!(scenario.state(), ScenarioState::Paused);
    scenario.start().unwrap();
    assert_eq!(scenario.state(), ScenarioState::Paused);

    // Nothing runs while paused
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(scenario.counter("done"), None);
    assert_eq!(scenario.execution_point().unwrap().node_id, "wait");

    scenario.resume();
    assert_eq!(scenario.state(), ScenarioState::Running);
    assert_eq!(scenario.finished().await, StopReason::Completed);
    assert_eq!(scenario.counter("done"), Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_host_stop_interrupts_waits() {
    let dir = tempdir().unwrap();
    let content = ScenarioContent::new("next").with_node("next", NodeDef::new(PrimitiveName::WaitNext));
    let (scenario, mut rx) = build_with_channel(content, dir.path());

    scenario.start().unwrap();
    let (prompt_id, _) = next_prompt(&mut rx).await;
    // Starting a running scenario changes nothing
    scenario.start().unwrap();
    assert_eq!(scenario.pending_prompts(), vec![prompt_id]);
    scenario.stop(None).await;

    assert_eq!(scenario.finished().await, StopReason::Completed);
    assert!(scenario.pending_prompts().is_empty());
    // A second stop is a no-op
    scenario.stop(None).await;
    assert_eq!(scenario.state(), ScenarioState::Stopped);
}
