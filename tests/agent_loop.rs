use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use autoglm::config::AgentSection;
use autoglm::device::mock::{DeviceCommand, MockDevice};
use autoglm::llm::providers::scripted::{ScriptedProvider, ScriptedReply};
use autoglm::llm::types::{CallConfig, Role};
use autoglm::{
    Action, AgentEvent, AgentKind, AgentState, AutoGlmResult, CancelHandle, DeviceAction,
    PhoneAgent, RunOutcome,
};

const TAP: &str = "<think>点一下</think><answer>do(action=\"Tap\", element=[500, 300])</answer>";

fn agent(
    kind: AgentKind,
    device: Arc<MockDevice>,
    provider: Arc<ScriptedProvider>,
    max_steps: u32,
) -> PhoneAgent {
    let settings = AgentSection {
        max_steps,
        ..AgentSection::default()
    };
    let cfg = CallConfig {
        model: "test-model".into(),
        stream: true,
        ..CallConfig::default()
    };
    PhoneAgent::new(kind.strategy().unwrap(), provider, cfg, device, &settings)
}

async fn run(agent: &mut PhoneAgent, task: &str) -> (AutoGlmResult<RunOutcome>, Vec<AgentEvent>) {
    let (tx, mut rx) = mpsc::channel(512);
    let outcome = agent.stream(task, tx).await;
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    (outcome, events)
}

fn step_numbers(events: &[AgentEvent]) -> Vec<u32> {
    events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::Step(step) => Some(step.step),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn glm_agent_taps_then_finishes() {
    let device = Arc::new(MockDevice::new("phone"));
    let provider = Arc::new(ScriptedProvider::new([
        ScriptedReply::text(TAP),
        ScriptedReply::text("<think>好了</think><answer>finish(message=\"done\")</answer>"),
    ]));
    let mut agent = agent(AgentKind::Glm, device.clone(), provider.clone(), 10);

    let (outcome, events) = run(&mut agent, "打开设置").await;
    let outcome = outcome.unwrap();

    assert_eq!(outcome.state, AgentState::Finished);
    assert!(outcome.success);
    assert_eq!(outcome.steps, 2);
    assert_eq!(device.actions(), vec![DeviceCommand::Tap { x: 540, y: 576 }]);
    assert_eq!(step_numbers(&events), vec![1, 2]);
    assert!(events
        .iter()
        .any(|e| matches!(e, AgentEvent::Thinking { .. })));

    let first = events
        .iter()
        .find_map(|e| match e {
            AgentEvent::Step(step) => Some(step.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(first.thinking, "点一下");
    assert_eq!(
        first.action,
        Some(Action::Do(DeviceAction::Tap { element: [500, 300] }))
    );
    assert!(!first.finished);

    assert_eq!(
        events.last(),
        Some(&AgentEvent::Done {
            message: "done".into(),
            steps: 2,
            success: true,
        })
    );
    assert_eq!(agent.state(), AgentState::Finished);
    assert!(!agent.is_running());

    // the first user turn carries the task and screen info
    let requests = provider.requests();
    let first_user = requests[0][1].text();
    assert!(first_user.starts_with("打开设置\n\n** Screen Info **\n\n"));
    assert!(first_user.contains("System Home"));
    let second_user = requests[1].last().unwrap().text();
    assert!(second_user.starts_with("** Screen Info **"));
}

#[tokio::test]
async fn only_the_latest_turn_carries_an_image() {
    let device = Arc::new(MockDevice::new("phone"));
    let provider = Arc::new(ScriptedProvider::new([ScriptedReply::text(TAP)]).repeating());
    let mut agent = agent(AgentKind::Glm, device, provider.clone(), 4);

    let _ = run(&mut agent, "滚动").await;

    for request in provider.requests() {
        let images = request.iter().filter(|m| m.has_image()).count();
        assert_eq!(images, 1);
        assert!(request.last().unwrap().has_image());
    }
    assert!(agent.context().iter().all(|m| !m.has_image()));
}

#[tokio::test]
async fn max_steps_ends_the_run_unsuccessfully() {
    let device = Arc::new(MockDevice::new("phone"));
    let provider = Arc::new(ScriptedProvider::new([ScriptedReply::text(TAP)]).repeating());
    let mut agent = agent(AgentKind::Glm, device.clone(), provider, 3);

    let (outcome, events) = run(&mut agent, "一直点").await;
    let outcome = outcome.unwrap();

    assert_eq!(outcome.state, AgentState::MaxStepsReached);
    assert_eq!(step_numbers(&events), vec![1, 2, 3]);
    assert_eq!(device.actions().len(), 3);
    assert_eq!(
        events.last(),
        Some(&AgentEvent::Done {
            message: "Max steps reached".into(),
            steps: 3,
            success: false,
        })
    );
}

#[tokio::test]
async fn cancelling_between_steps_stops_without_done() {
    let handle: Arc<OnceLock<CancelHandle>> = Arc::new(OnceLock::new());
    let taps = Arc::new(AtomicUsize::new(0));
    let device = {
        let handle = handle.clone();
        let taps = taps.clone();
        Arc::new(MockDevice::new("phone").on_command(move |cmd| {
            if matches!(cmd, DeviceCommand::Tap { .. }) && taps.fetch_add(1, Ordering::SeqCst) == 1 {
                if let Some(h) = handle.get() {
                    h.cancel();
                }
            }
        }))
    };
    let provider = Arc::new(ScriptedProvider::new([ScriptedReply::text(TAP)]).repeating());
    let mut agent = agent(AgentKind::Glm, device.clone(), provider, 5);
    let _ = handle.set(agent.cancel_handle());

    let (outcome, events) = run(&mut agent, "点五次").await;

    assert!(outcome.unwrap_err().is_cancelled());
    assert_eq!(agent.step_count(), 2);
    assert_eq!(agent.state(), AgentState::Aborted);
    assert_eq!(step_numbers(&events), vec![1, 2]);
    assert_eq!(device.actions().len(), 2);
    assert!(!events.iter().any(|e| matches!(e, AgentEvent::Done { .. })));
    assert_eq!(
        events.last(),
        Some(&AgentEvent::Cancelled {
            message: "Task cancelled by user".into()
        })
    );
}

#[tokio::test]
async fn cancel_while_idle_does_not_affect_next_run() {
    let device = Arc::new(MockDevice::new("phone"));
    let provider = Arc::new(ScriptedProvider::new([ScriptedReply::text(
        "finish(message=\"nothing to do\")",
    )]));
    let mut agent = agent(AgentKind::Glm, device, provider, 5);

    agent.cancel();
    let message = agent.run("看看").await.unwrap();
    assert_eq!(message, "nothing to do");
    agent.cancel();
    assert_eq!(agent.state(), AgentState::Finished);

    agent.reset().unwrap();
    assert_eq!(agent.step_count(), 0);
    assert_eq!(agent.context().len(), 1);
    assert_eq!(agent.state(), AgentState::Idle);
}

#[tokio::test]
async fn device_failure_mid_run_reports_error_then_done() {
    let device = Arc::new(MockDevice::new("phone").fail_screenshots_after(1));
    let provider = Arc::new(ScriptedProvider::new([ScriptedReply::text(TAP)]).repeating());
    let mut agent = agent(AgentKind::Glm, device, provider, 5);

    let (outcome, events) = run(&mut agent, "点").await;
    let outcome = outcome.unwrap();

    assert_eq!(outcome.state, AgentState::DeviceError);
    assert!(!outcome.success);
    assert_eq!(outcome.steps, 2);
    let kinds: Vec<&str> = events.iter().map(|e| e.kind()).collect();
    let tail = &kinds[kinds.len() - 3..];
    assert_eq!(tail, ["error", "step", "done"]);
    assert!(outcome.message.starts_with("Device error: "));
    assert_eq!(events.iter().filter(|e| e.kind() == "error").count(), 1);
}

#[tokio::test]
async fn device_failure_before_first_step() {
    let device = Arc::new(MockDevice::new("phone").fail_screenshots_after(0));
    let provider = Arc::new(ScriptedProvider::new(Vec::new()));
    let mut agent = agent(AgentKind::Glm, device, provider.clone(), 5);

    let (outcome, events) = run(&mut agent, "点").await;
    let outcome = outcome.unwrap();

    assert_eq!(outcome.steps, 0);
    assert_eq!(provider.request_count(), 0);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind(), "error");
    assert!(matches!(
        events[1],
        AgentEvent::Done {
            steps: 0,
            success: false,
            ..
        }
    ));
}

#[tokio::test]
async fn model_failure_is_run_fatal() {
    let device = Arc::new(MockDevice::new("phone"));
    let provider = Arc::new(ScriptedProvider::new([ScriptedReply::Fail(
        "401 unauthorized".into(),
    )]));
    let mut agent = agent(AgentKind::Glm, device.clone(), provider, 5);

    let (outcome, events) = run(&mut agent, "点").await;
    let outcome = outcome.unwrap();

    assert_eq!(outcome.state, AgentState::ModelError);
    assert_eq!(outcome.message, "Model error: 401 unauthorized");
    assert!(device.actions().is_empty());
    let kinds: Vec<&str> = events.iter().map(|e| e.kind()).collect();
    assert_eq!(kinds, ["error", "step", "done"]);
}

#[tokio::test]
async fn tool_call_agent_truncates_floats_and_feeds_results_back() {
    let device = Arc::new(MockDevice::new("phone").with_current_app("com.android.settings"));
    let provider = Arc::new(ScriptedProvider::new([
        ScriptedReply::tool("tap", json!({"x": 500.7, "y": 300.2})),
        ScriptedReply::tool("finish", json!({"message": "ok"})),
    ]));
    let mut agent = agent(AgentKind::ToolCall, device.clone(), provider.clone(), 5);

    let (outcome, _) = run(&mut agent, "点一下").await;
    let outcome = outcome.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.message, "ok");
    assert_eq!(device.actions(), vec![DeviceCommand::Tap { x: 540, y: 576 }]);

    let requests = provider.requests();
    assert_eq!(
        requests[0][1].text(),
        "点一下\n\nCurrent app: com.android.settings"
    );
    let second = &requests[1];
    let tool_turn = second
        .iter()
        .find(|m| m.role == Role::Tool)
        .expect("tool turn");
    assert_eq!(tool_turn.tool_call_id.as_deref(), Some("call_1"));
    let content: serde_json::Value = serde_json::from_str(&tool_turn.text()).unwrap();
    assert_eq!(content, json!({"success": true, "message": "OK"}));
    let assistant = second
        .iter()
        .find(|m| m.role == Role::Assistant)
        .expect("assistant turn");
    let calls = assistant.tool_calls.as_ref().unwrap();
    assert_eq!(calls[0].id, "call_1");
    assert_eq!(calls[0].function.name, "tap");
}

#[tokio::test]
async fn unknown_tool_finishes_the_run() {
    let device = Arc::new(MockDevice::new("phone"));
    let provider = Arc::new(ScriptedProvider::new([ScriptedReply::tool("fly", json!({}))]));
    let mut agent = agent(AgentKind::ToolCall, device.clone(), provider, 5);

    let (outcome, events) = run(&mut agent, "飞").await;
    let outcome = outcome.unwrap();

    assert!(outcome.message.contains("Unknown tool"));
    assert_eq!(outcome.steps, 1);
    assert!(device.actions().is_empty());
    assert_eq!(step_numbers(&events), vec![1]);
}

#[tokio::test]
async fn cancelling_during_generation_closes_the_model_stream() {
    let device = Arc::new(MockDevice::new("phone"));
    let reply = format!("{}\ndo(action=\"Tap\", element=[500, 300])", "想".repeat(400));
    let provider =
        Arc::new(ScriptedProvider::new([ScriptedReply::text(reply)]).with_chunk_chars(1));
    let mut agent = agent(AgentKind::Glm, device.clone(), provider.clone(), 5);
    let handle = agent.cancel_handle();

    // capacity 1 keeps the run in lockstep with the reader
    let (tx, mut rx) = mpsc::channel(1);
    let read = async move {
        let mut events = Vec::new();
        let mut thinking = 0;
        while let Some(event) = rx.recv().await {
            if matches!(event, AgentEvent::Thinking { .. }) {
                thinking += 1;
                if thinking == 5 {
                    handle.cancel();
                }
            }
            events.push(event);
        }
        events
    };
    let (outcome, events) = tokio::join!(agent.stream("想一想", tx), read);

    assert!(outcome.unwrap_err().is_cancelled());
    assert_eq!(
        events.last(),
        Some(&AgentEvent::Cancelled {
            message: "Task cancelled by user".into()
        })
    );
    assert!(!events.iter().any(|e| matches!(e, AgentEvent::Done { .. })));
    assert!(step_numbers(&events).is_empty());
    let thinking = events
        .iter()
        .filter(|e| matches!(e, AgentEvent::Thinking { .. }))
        .count();
    assert!((5..10).contains(&thinking), "thinking events: {thinking}");
    assert!(device.actions().is_empty());
    assert_eq!(agent.step_count(), 1);
    assert_eq!(agent.state(), AgentState::Aborted);
    assert_eq!(provider.closed_streams(), 1);
    assert!(provider.delivered_chunks() < 20);
}

#[tokio::test]
async fn dropping_a_run_mid_step_leaves_the_agent_idle() {
    let device = Arc::new(MockDevice::new("phone"));
    let provider = Arc::new(ScriptedProvider::new([ScriptedReply::text(
        "等页面加载\ndo(action=\"Wait\", duration=\"5 seconds\")",
    )]));
    let mut agent = agent(AgentKind::Glm, device, provider, 5);

    let (tx, _rx) = mpsc::channel(64);
    let timed_out = tokio::time::timeout(Duration::from_millis(200), agent.stream("等", tx)).await;
    assert!(timed_out.is_err());

    assert!(!agent.is_running());
    assert_eq!(agent.state(), AgentState::Aborted);
    agent.reset().unwrap();
    assert_eq!(agent.state(), AgentState::Idle);
    assert_eq!(agent.context().len(), 1);
}

#[tokio::test]
async fn follow_up_task_continues_the_conversation_until_reset() {
    let device = Arc::new(MockDevice::new("phone"));
    let provider = Arc::new(ScriptedProvider::new([
        ScriptedReply::text("finish(message=\"first\")"),
        ScriptedReply::text("finish(message=\"second\")"),
    ]));
    let mut agent = agent(AgentKind::Glm, device, provider.clone(), 10);

    let (first, _) = run(&mut agent, "打开设置").await;
    assert_eq!(first.unwrap().steps, 1);
    assert_eq!(agent.context().len(), 3);

    let (second, events) = run(&mut agent, "再打开蓝牙").await;
    let second = second.unwrap();
    assert_eq!(second.message, "second");
    assert_eq!(second.steps, 2);
    assert_eq!(step_numbers(&events), vec![2]);

    // the follow-up request still carries the first exchange
    let requests = provider.requests();
    let follow_up = &requests[1];
    assert_eq!(follow_up.len(), 4);
    assert!(follow_up[1].text().starts_with("打开设置"));
    assert_eq!(follow_up[2].role, Role::Assistant);
    assert!(follow_up[3].text().starts_with("再打开蓝牙"));
    assert_eq!(follow_up.iter().filter(|m| m.has_image()).count(), 1);
    assert_eq!(agent.context().len(), 5);
    assert_eq!(agent.step_log().len(), 2);

    agent.reset().unwrap();
    assert_eq!(agent.context().len(), 1);
    assert_eq!(agent.step_count(), 0);
    assert!(agent.step_log().is_empty());
}
