//! End-to-end runs of the speculative executor against a scripted phone.

mod common;

use action_memory::device::ExecutionOutcome;
use action_memory::{
    AbortReason, Action, ActionKind, ElementRef, ElementSchema, PredictedStep, RecordingContext, Reflector, SharedContext,
    SpeculationState, SpeculativeExecutor, UiSnapshot, WorkAction, WorkflowMemory, WorkflowRecorder,
};
use common::*;
use std::sync::Arc;

fn executor(phone: &Arc<FakePhone>) -> SpeculativeExecutor {
    SpeculativeExecutor::new(phone.clone(), phone.clone(), ElementSchema::Reduced)
}

fn tap(x: i32, y: i32) -> Action {
    Action::Tap {
        element: Some(ElementRef::Point { x, y }),
    }
}

fn wifi_steps() -> Vec<PredictedStep> {
    vec![
        PredictedStep::new("open Wi-Fi", r#"do(action="Tap", element="B1")"#),
        PredictedStep::new("add a network", r#"do(action="Tap", element="C3")"#),
    ]
}

/// History plus a session that has just tapped "Network" on the home screen
/// and is waiting for the resulting state.
fn session_after_home_tap() -> (WorkflowMemory, WorkflowRecorder, Vec<String>) {
    let mut memory = WorkflowMemory::new();
    let history = record_history(&mut memory, "wf-history", "wifi", &[HOME, NETWORK, WIFI, ADD_NETWORK]);

    let mut recorder = WorkflowRecorder::start(&mut memory, "connect to wifi");
    let home = memory.graph_or_insert(APP).create_node(UiSnapshot::new(screen(HOME)));
    assert_eq!(home, history[0]);
    recorder.on_new_node(&mut memory, &home).unwrap();
    let open_network = WorkAction::new(ActionKind::Tap, "open Network", Some("Network".into()));
    let index = memory.add_action(&home, open_network.clone()).unwrap();
    recorder.on_action_executed(&home, open_network, Some(index), true);
    (memory, recorder, history)
}

#[tokio::test]
async fn test_prepare_predicts_the_next_two_recorded_states() {
    let mut memory = WorkflowMemory::new();
    record_history(&mut memory, "wf-history", "wifi", &[HOME, NETWORK, WIFI, ADD_NETWORK]);
    let phone = Arc::new(FakePhone::new(&[HOME]));
    let mut exec = executor(&phone);

    let context = exec.prepare(&memory, APP, &screen(HOME));

    assert!(context.starts_with("--- NEXT UI STATE (after current action) ---"));
    assert!(context.contains("  B1: Wi-Fi"));
    assert!(context.contains("--- UI STATE AFTER NEXT (two steps ahead) ---"));
    assert!(context.contains("  C3: Add network"));
    assert_eq!(exec.future_nodes().len(), 2);
}

#[tokio::test]
async fn test_prepare_matches_on_content_regardless_of_order() {
    let mut memory = WorkflowMemory::new();
    record_history(&mut memory, "wf-history", "wifi", &[HOME, NETWORK, WIFI]);
    let phone = Arc::new(FakePhone::new(&[HOME]));
    let mut exec = executor(&phone);

    let mut live = screen(HOME);
    live.reverse();
    let context = exec.prepare(&memory, APP, &live);

    assert!(!context.is_empty());
    assert_eq!(exec.future_nodes()[0].elements, screen(NETWORK));
}

#[tokio::test]
async fn test_two_of_three_shared_elements_is_not_a_match() {
    let mut memory = WorkflowMemory::new();
    record_history(&mut memory, "wf-login", "login", &[&["Login", "Password", "Submit"], HOME, NETWORK]);
    let phone = Arc::new(FakePhone::new(&[HOME]));
    let mut exec = executor(&phone);

    let context = exec.prepare(&memory, APP, &screen(&["Login", "Password"]));

    assert_eq!(context, "");
    assert!(exec.future_nodes().is_empty());
}

#[tokio::test]
async fn test_prepare_ignores_other_apps() {
    let mut memory = WorkflowMemory::new();
    record_history(&mut memory, "wf-history", "wifi", &[HOME, NETWORK, WIFI]);
    let phone = Arc::new(FakePhone::new(&[HOME]));
    let mut exec = executor(&phone);

    assert_eq!(exec.prepare(&memory, "Camera", &screen(HOME)), "");
}

#[tokio::test]
async fn test_full_run_executes_and_records_every_predicted_step() {
    let (mut memory, mut recorder, history) = session_after_home_tap();
    let phone = Arc::new(FakePhone::new(&[NETWORK, WIFI, ADD_NETWORK]));
    let mut exec = executor(&phone);
    let mut ctx = SharedContext::default();

    assert!(!exec.prepare(&memory, APP, &screen(HOME)).is_empty());
    let out = exec
        .execute(
            &wifi_steps(),
            Some(RecordingContext {
                memory: &mut memory,
                recorder: &mut recorder,
            }),
            &mut ctx,
            None,
        )
        .await
        .unwrap();

    assert_eq!(out.state, SpeculationState::Completed);
    assert_eq!(out.executed, 2);
    assert!(out.abort_reason.is_none());
    assert!(!out.finished);
    assert_eq!(out.observation.unwrap().elements, screen(ADD_NETWORK));
    assert_eq!(phone.executed(), vec![tap(100, 50), tap(100, 250)]);
    assert_eq!(ctx.history().count(), 2);

    let session = memory.workflow(recorder.current_workflow_id()).unwrap();
    let hops: Vec<(&str, &str)> = session
        .path()
        .iter()
        .map(|t| (t.from_node_id.as_str(), t.to_node_id.as_str()))
        .collect();
    assert_eq!(
        hops,
        vec![
            (history[0].as_str(), history[1].as_str()),
            (history[1].as_str(), history[2].as_str()),
            (history[2].as_str(), history[3].as_str()),
        ]
    );
    assert_eq!(session.path()[1].action.target.as_deref(), Some("Wi-Fi"));
    assert!(!recorder.has_pending_transition());
}

#[tokio::test]
async fn test_divergence_on_second_node_stops_after_one_action() {
    let mut memory = WorkflowMemory::new();
    record_history(&mut memory, "wf-history", "wifi", &[HOME, NETWORK, WIFI, ADD_NETWORK]);
    let phone = Arc::new(FakePhone::new(&[NETWORK, &["Bluetooth", "Pairing", "Devices"]]));
    let mut exec = executor(&phone);
    let mut ctx = SharedContext::default();

    exec.prepare(&memory, APP, &screen(HOME));
    let out = exec.execute(&wifi_steps(), None, &mut ctx, None).await.unwrap();

    assert_eq!(out.executed, 1);
    assert_eq!(out.state, SpeculationState::Aborted);
    assert_eq!(
        out.abort_reason,
        Some(AbortReason::MatchMiss {
            node_index: 1,
            similarity: 0.0
        })
    );
    assert_eq!(phone.executed(), vec![tap(100, 50)]);
    assert_eq!(out.observation.unwrap().elements, screen(&["Bluetooth", "Pairing", "Devices"]));
}

#[tokio::test]
async fn test_first_node_mismatch_executes_nothing() {
    let mut memory = WorkflowMemory::new();
    record_history(&mut memory, "wf-history", "wifi", &[HOME, NETWORK, WIFI]);
    let phone = Arc::new(FakePhone::new(&[HOME]));
    let mut exec = executor(&phone);
    let mut ctx = SharedContext::default();

    exec.prepare(&memory, APP, &screen(HOME));
    // the home tap never happened, so the screen is still the home screen
    let out = exec
        .execute(&wifi_steps(), None, &mut ctx, Some(observation(HOME)))
        .await
        .unwrap();

    assert_eq!(out.executed, 0);
    assert!(matches!(out.abort_reason, Some(AbortReason::MatchMiss { node_index: 0, .. })));
    assert!(phone.executed().is_empty());
    assert_eq!(ctx.history().count(), 0);
}

#[tokio::test]
async fn test_execution_error_aborts_without_recording_the_action() {
    let (mut memory, mut recorder, history) = session_after_home_tap();
    let phone = Arc::new(FakePhone::broken(&[NETWORK]));
    let mut exec = executor(&phone);
    let mut ctx = SharedContext::default();
    let actions_before = memory.find_node(&history[1]).unwrap().actions.len();

    exec.prepare(&memory, APP, &screen(HOME));
    let out = exec
        .execute(
            &wifi_steps(),
            Some(RecordingContext {
                memory: &mut memory,
                recorder: &mut recorder,
            }),
            &mut ctx,
            None,
        )
        .await
        .unwrap();

    assert_eq!(out.executed, 0);
    assert!(matches!(out.abort_reason, Some(AbortReason::ExecutionFailed { node_index: 0, .. })));
    // the failed tap never became an edge on the node it started from
    assert_eq!(actions_before, 1);
    assert_eq!(memory.find_node(&history[1]).unwrap().actions.len(), actions_before);
    let session = memory.workflow(recorder.current_workflow_id()).unwrap();
    // only the step taken before speculation started
    assert_eq!(session.len(), 1);
    assert_eq!(session.path()[0].to_node_id, history[1]);
    assert!(!recorder.has_pending_transition());
    assert_eq!(ctx.history().count(), 0);
}

#[tokio::test]
async fn test_reported_failure_is_recorded_then_aborts() {
    let (mut memory, mut recorder, _history) = session_after_home_tap();
    let phone = Arc::new(FakePhone::new(&[NETWORK, NETWORK]));
    phone.set_outcome(ExecutionOutcome::failed("tap had no effect"));
    let mut exec = executor(&phone);
    let mut ctx = SharedContext::default();

    exec.prepare(&memory, APP, &screen(HOME));
    let out = exec
        .execute(
            &wifi_steps(),
            Some(RecordingContext {
                memory: &mut memory,
                recorder: &mut recorder,
            }),
            &mut ctx,
            None,
        )
        .await
        .unwrap();

    assert_eq!(out.abort_reason, Some(AbortReason::ActionFailed { node_index: 0 }));
    let session = memory.workflow(recorder.current_workflow_id()).unwrap();
    assert_eq!(session.len(), 2);
    assert!(!session.path()[1].success);
    assert!(!ctx.history().last().unwrap().success);
}

#[tokio::test]
async fn test_device_finish_ends_the_run() {
    let mut memory = WorkflowMemory::new();
    record_history(&mut memory, "wf-history", "wifi", &[HOME, NETWORK, WIFI, ADD_NETWORK]);
    let phone = Arc::new(FakePhone::new(&[NETWORK, WIFI]));
    phone.set_outcome(ExecutionOutcome {
        success: true,
        should_finish: true,
        message: None,
    });
    let mut exec = executor(&phone);
    let mut ctx = SharedContext::default();

    exec.prepare(&memory, APP, &screen(HOME));
    let out = exec.execute(&wifi_steps(), None, &mut ctx, None).await.unwrap();

    assert!(out.finished);
    assert_eq!(out.state, SpeculationState::Completed);
    assert_eq!(out.executed, 1);
    assert_eq!(phone.executed().len(), 1);
}

#[tokio::test]
async fn test_finish_step_stops_without_touching_the_device() {
    let mut memory = WorkflowMemory::new();
    record_history(&mut memory, "wf-history", "wifi", &[HOME, NETWORK, WIFI]);
    let phone = Arc::new(FakePhone::new(&[NETWORK]));
    let mut exec = executor(&phone);
    let mut ctx = SharedContext::default();

    exec.prepare(&memory, APP, &screen(HOME));
    let steps = [PredictedStep::new("wrap up", r#"finish(message="Wi-Fi settings open")"#)];
    let out = exec.execute(&steps, None, &mut ctx, None).await.unwrap();

    assert!(out.finished);
    assert_eq!(out.executed, 0);
    assert!(phone.executed().is_empty());
}

#[tokio::test]
async fn test_unknown_element_id_aborts_unresolved() {
    let mut memory = WorkflowMemory::new();
    record_history(&mut memory, "wf-history", "wifi", &[HOME, NETWORK, WIFI]);
    let phone = Arc::new(FakePhone::new(&[NETWORK]));
    let mut exec = executor(&phone);
    let mut ctx = SharedContext::default();

    exec.prepare(&memory, APP, &screen(HOME));
    let steps = [PredictedStep::new("tap", r#"do(action="Tap", element="B9")"#)];
    let out = exec.execute(&steps, None, &mut ctx, None).await.unwrap();

    assert_eq!(out.abort_reason, Some(AbortReason::Unresolved { node_index: 0 }));
    assert!(phone.executed().is_empty());
}

#[tokio::test]
async fn test_obvious_change_is_reflected_onto_the_recorded_action() {
    let (mut memory, mut recorder, history) = session_after_home_tap();
    let phone = Arc::new(FakePhone::new(&[NETWORK, WIFI]));
    let mut exec = executor(&phone).with_reflector(Reflector::new(true, None));
    let mut ctx = SharedContext::default();

    exec.prepare(&memory, APP, &screen(HOME));
    let out = exec
        .execute(
            &wifi_steps()[..1],
            Some(RecordingContext {
                memory: &mut memory,
                recorder: &mut recorder,
            }),
            &mut ctx,
            None,
        )
        .await
        .unwrap();
    assert_eq!(out.executed, 1);

    let network = memory.find_node(&history[1]).unwrap();
    let recorded = network
        .actions
        .iter()
        .find(|a| a.target.as_deref() == Some("Wi-Fi"))
        .unwrap();
    let reflection = recorded.reflection.as_ref().unwrap();
    assert_eq!(reflection.success, Some(true));
    assert_eq!(recorded.confidence_score, Some(reflection.confidence));

    let session = memory.workflow(recorder.current_workflow_id()).unwrap();
    assert!(session.path()[1].action.reflection.is_some());
    assert_eq!(ctx.reflections().count(), 1);
}

#[tokio::test]
async fn test_subtle_change_is_judged_by_the_oracle() {
    let mut memory = WorkflowMemory::new();
    record_history(&mut memory, "wf-history", "wifi", &[HOME, NETWORK, WIFI]);
    let after: &[&str] = &["Wi-Fi", "Mobile data", "Airplane mode", "Hotspot", "Turning on..."];
    let phone = Arc::new(FakePhone::new(&[NETWORK, after]));
    let oracle = Arc::new(CannedOracle::new(
        r#"```json
{"execution_result": "failure", "reasoning": "Wi-Fi page did not open", "improvement_suggestions": "tap the label", "confidence": 0.3}
```"#,
    ));
    let mut exec = executor(&phone).with_reflector(Reflector::new(true, Some(oracle.clone())));
    let mut ctx = SharedContext::default();

    exec.prepare(&memory, APP, &screen(HOME));
    exec.execute(&wifi_steps()[..1], None, &mut ctx, None).await.unwrap();

    assert_eq!(oracle.calls(), 1);
    let reflection = ctx.reflections().next().unwrap();
    assert_eq!(reflection.success, Some(false));
    assert_eq!(reflection.suggestions, "tap the label");
}
