//! Tier fallback through the public API, driven by the scripted provider.

use std::sync::Arc;

use chatrelay::mock::{Script, Scripted, ScriptedModel};
use chatrelay::prelude::*;

fn config() -> OrchestratorConfig {
    OrchestratorConfig::builder()
        .endpoint("https://llm.example.com/v1")
        .api_key("sk-test")
        .build()
}

fn orchestrator(script: Script) -> StreamOrchestrator {
    StreamOrchestrator::with_model(config(), Arc::new(ScriptedModel::new(script)))
        .expect("valid config")
}

#[tokio::test]
async fn event_channel_backs_up_an_empty_text_channel() {
    let orch = orchestrator(Script::new().events(vec![
        StreamEvent::TextDelta("from ".into()),
        StreamEvent::TextDelta("events".into()),
        StreamEvent::Finish(FinishReason::Stop),
    ]));
    let text = collect_text(orch.stream_chat(ChatRequest::new("u", "hi")))
        .await
        .expect("text");
    assert_eq!(text, "from events");
}

#[tokio::test]
async fn settled_text_backs_up_both_channels() {
    let orch = orchestrator(Script::new().final_text("Final text"));
    let text = collect_text(orch.stream_chat(ChatRequest::new("u", "hi")))
        .await
        .expect("text");
    assert_eq!(text, "Final text");
}

#[tokio::test(start_paused = true)]
async fn custom_settlement_timeouts_apply() {
    let config = OrchestratorConfig::builder()
        .endpoint("https://llm.example.com/v1")
        .api_key("sk-test")
        .settlement(SettlementTimeouts {
            text: std::time::Duration::from_secs(2),
            ..SettlementTimeouts::default()
        })
        .build();
    let model = ScriptedModel::new(Script::new().text_reads(vec![Scripted::Hang]));
    let orch = StreamOrchestrator::with_model(config, Arc::new(model)).expect("valid config");

    let started = tokio::time::Instant::now();
    let err = collect_text(orch.stream_chat(ChatRequest::new("u", "hi")))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SettlementTimeout);
    assert!(started.elapsed() < std::time::Duration::from_secs(30));
}

#[test]
fn blank_configuration_is_rejected() {
    let config = OrchestratorConfig::builder().endpoint("  ").api_key("").build();
    let err = StreamOrchestrator::with_model(config, Arc::new(ScriptedModel::new(Script::new())))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.message().contains("api_key"));
    assert!(err.message().contains("endpoint"));
}
