//! End-to-end tests for the orchestration loop using the mock provider.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{roles, MockProvider};
use parley::config::{EngineConfig, ExecutionMode};
use parley::dispatch::RESET_HISTORY;
use parley::engine::Engine;
use parley::error::ParleyError;
use parley::tools::{BlockingCapability, CapabilityParameters, CapabilityRegistry, FnCapability};
use parley::types::*;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

const PROMPT: &str = "You are a concise travel assistant.";

fn registry() -> CapabilityRegistry {
    let weather = FnCapability::new(
        "get_weather",
        "Current weather for a city",
        CapabilityParameters::object()
            .string("city", "City name", true)
            .build(),
        |args| async move {
            let city = args
                .as_ref()
                .and_then(|a| a.get_str_opt("city"))
                .unwrap_or("unknown")
                .to_string();
            Ok(json!({ "city": city, "forecast": "sunny", "temp_c": 24 }))
        },
    );
    let datetime = BlockingCapability::new(
        "get_datetime",
        "Current date and time",
        CapabilityParameters::empty(),
        |_| Ok(Value::String("2024-05-01T12:00:00Z".into())),
    );
    let broken = FnCapability::new(
        "get_exchange_rate",
        "Currency exchange rate",
        CapabilityParameters::empty(),
        |_| async { Err(ParleyError::tool("get_exchange_rate", "upstream unavailable")) },
    );
    let slow = FnCapability::new(
        "search_flights",
        "Slow flight search",
        CapabilityParameters::empty(),
        |_| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(Value::String("no flights".into()))
        },
    );
    CapabilityRegistry::new()
        .with(weather)
        .unwrap()
        .with(datetime)
        .unwrap()
        .with(broken)
        .unwrap()
        .with(slow)
        .unwrap()
}

fn config() -> EngineConfig {
    EngineConfig::builder().system_prompt(PROMPT).build()
}

fn engine_with(config: EngineConfig, provider: Arc<MockProvider>) -> Engine {
    Engine::new(config, provider, registry()).unwrap()
}

#[tokio::test]
async fn plain_answer_produces_three_message_history() {
    let provider = Arc::new(MockProvider::new());
    provider.queue_response("Hello! How can I help?");
    let engine = engine_with(config(), provider.clone());

    let answer = engine.process_message("s1", "Hi").await.unwrap();

    assert_eq!(answer, "Hello! How can I help?");
    let history = engine.store().get("s1", true);
    assert_eq!(roles(&history), vec![Role::System, Role::User, Role::Assistant]);
    assert_eq!(history[0].text(), PROMPT);
    assert_eq!(history[1].text(), "Hi");
    assert_eq!(history[2].text(), "Hello! How can I help?");
}

#[tokio::test]
async fn tool_round_is_purged_from_final_history() {
    let provider = Arc::new(MockProvider::new());
    provider.queue_tool_calls(
        None,
        &[
            ("call_1", "get_weather", json!({ "city": "Madrid" })),
            ("call_2", "get_datetime", Value::Null),
        ],
    );
    provider.queue_response("Sunny and 24C in Madrid at noon.");
    let engine = engine_with(config(), provider.clone());

    let report = engine.run_turn("s1", "Weather in Madrid?").await.unwrap();

    assert_eq!(report.answer, "Sunny and 24C in Madrid at noon.");
    assert_eq!(report.iterations, 2);
    assert_eq!(report.usage.total_tokens, 45);

    // The second model call saw the tool traffic.
    let second = &provider.requests()[1];
    assert_eq!(
        roles(&second.messages),
        vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Tool]
    );
    assert_eq!(second.messages[2].tool_calls.len(), 2);
    assert_eq!(second.messages[3].tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(
        second.messages[3].text(),
        r#"{"city":"Madrid","forecast":"sunny","temp_c":24}"#
    );
    assert_eq!(second.messages[4].text(), "2024-05-01T12:00:00Z");

    // The final history did not keep it.
    let history = engine.store().get("s1", true);
    assert_eq!(roles(&history), vec![Role::System, Role::User, Role::Assistant]);
    assert_eq!(engine.store().ephemeral_count("s1"), 0);
}

#[tokio::test]
async fn failing_tool_yields_sentinel_while_sibling_succeeds() {
    let provider = Arc::new(MockProvider::new());
    provider.queue_tool_calls(
        None,
        &[
            ("call_1", "get_exchange_rate", json!({ "from": "EUR", "to": "USD" })),
            ("call_2", "get_datetime", Value::Null),
        ],
    );
    provider.queue_response("I could not fetch the rate.");
    let config = config();
    let sentinel = config.error_sentinel.clone();
    let engine = engine_with(config, provider.clone());

    engine.process_message("s1", "EUR to USD?").await.unwrap();

    let tool_messages: Vec<_> = provider.requests()[1]
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| (m.tool_call_id.clone().unwrap(), m.text().to_string()))
        .collect();
    assert_eq!(
        tool_messages,
        vec![
            ("call_1".to_string(), sentinel),
            ("call_2".to_string(), "2024-05-01T12:00:00Z".to_string()),
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn worker_pool_mode_matches_cooperative_mode() {
    let mut transcripts = Vec::new();
    for mode in [ExecutionMode::Cooperative, ExecutionMode::WorkerPool] {
        let provider = Arc::new(MockProvider::new());
        provider.queue_tool_calls(
            None,
            &[
                ("call_1", "search_flights", Value::Null),
                ("call_2", "get_exchange_rate", Value::Null),
                ("call_3", "get_weather", json!({ "city": "Lima" })),
            ],
        );
        provider.queue_response("Done.");
        let config = EngineConfig::builder()
            .system_prompt(PROMPT)
            .execution(mode)
            .max_workers(2)
            .build();
        let engine = engine_with(config, provider.clone());

        engine.process_message("s1", "Plan my trip").await.unwrap();
        transcripts.push(provider.requests()[1].messages.clone());
    }

    assert_eq!(transcripts[0], transcripts[1]);
}

#[tokio::test]
async fn sole_reset_clears_history_to_prompt() {
    let provider = Arc::new(MockProvider::new());
    provider.queue_response("Hello!");
    provider.queue_tool_call("call_r", RESET_HISTORY, Value::Null);
    provider.queue_response("Fresh start.");
    let engine = engine_with(config(), provider.clone());

    engine.process_message("s1", "Hi").await.unwrap();
    let answer = engine.process_message("s1", "Forget everything").await.unwrap();

    assert_eq!(answer, "Fresh start.");
    // After the reset the model only saw the prompt.
    let after_reset = &provider.requests()[2];
    assert_eq!(roles(&after_reset.messages), vec![Role::System]);

    let history = engine.store().get("s1", true);
    assert_eq!(roles(&history), vec![Role::System, Role::Assistant]);
    assert_eq!(history[1].text(), "Fresh start.");
}

#[tokio::test]
async fn reset_notice_follows_prompt_after_reset() {
    let provider = Arc::new(MockProvider::new());
    provider.queue_tool_call("call_r", RESET_HISTORY, Value::Null);
    provider.queue_response("Fresh start.");
    let config = EngineConfig::builder()
        .system_prompt(PROMPT)
        .reset_notice("The conversation was reset by the user.")
        .build();
    let engine = engine_with(config, provider.clone());

    engine.process_message("s1", "Start over").await.unwrap();

    let after_reset = &provider.requests()[1];
    assert_eq!(roles(&after_reset.messages), vec![Role::System, Role::System]);
    assert_eq!(
        after_reset.messages[1].text(),
        "The conversation was reset by the user."
    );
}

#[tokio::test]
async fn batched_reset_is_rejected_and_history_kept() {
    let provider = Arc::new(MockProvider::new());
    provider.queue_response("Hello!");
    provider.queue_tool_calls(
        None,
        &[
            ("call_r", RESET_HISTORY, Value::Null),
            ("call_t", "get_datetime", Value::Null),
        ],
    );
    provider.queue_response("It is noon.");
    let config = config();
    let rejection = config.reset_rejection.clone();
    let engine = engine_with(config, provider.clone());

    engine.process_message("s1", "Hi").await.unwrap();
    engine.process_message("s1", "Reset and tell me the time").await.unwrap();

    let outputs: Vec<_> = provider.requests()[2]
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| m.text().to_string())
        .collect();
    assert_eq!(outputs, vec![rejection, "2024-05-01T12:00:00Z".to_string()]);

    let history = engine.store().get("s1", true);
    assert_eq!(
        roles(&history),
        vec![Role::System, Role::User, Role::Assistant, Role::User, Role::Assistant]
    );
}

#[tokio::test]
async fn reset_tool_is_advertised_alongside_capabilities() {
    let provider = Arc::new(MockProvider::new());
    let engine = engine_with(config(), provider.clone());

    engine.process_message("s1", "Hi").await.unwrap();

    let request = &provider.requests()[0];
    let names: Vec<_> = request.tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "get_weather",
            "get_datetime",
            "get_exchange_rate",
            "search_flights",
            RESET_HISTORY
        ]
    );
    assert_eq!(request.tool_choice, "auto");
    assert_eq!(request.model, parley::config::DEFAULT_MODEL);
}

#[tokio::test]
async fn unknown_tool_aborts_turn_without_recording_the_call() {
    let provider = Arc::new(MockProvider::new());
    provider.queue_tool_call("call_1", "send_email", json!({ "to": "a@b.c" }));
    provider.queue_response("Sorry about that.");
    let engine = engine_with(config(), provider.clone());

    let err = engine.process_message("s1", "Email Bob").await.unwrap_err();
    assert!(matches!(err, ParleyError::UnknownTool { ref name, .. } if name == "send_email"));
    // the unresolvable tool-call message is never recorded
    assert_eq!(engine.store().ephemeral_count("s1"), 0);

    engine.process_message("s1", "Never mind").await.unwrap();

    let resent = &provider.requests()[1].messages;
    assert_eq!(roles(resent), vec![Role::System, Role::User, Role::User]);
    assert!(resent.iter().all(|m| m.tool_calls.is_empty()));

    let history = engine.store().get("s1", true);
    assert_eq!(
        roles(&history),
        vec![Role::System, Role::User, Role::User, Role::Assistant]
    );
    assert_eq!(engine.store().ephemeral_count("s1"), 0);
}

#[tokio::test]
async fn disabled_reset_tool_is_unknown_and_keeps_history() {
    let provider = Arc::new(MockProvider::new());
    provider.queue_response("Hello.");
    provider.queue_tool_call("call_1", RESET_HISTORY, Value::Null);
    let config = EngineConfig::builder()
        .system_prompt(PROMPT)
        .enable_reset_tool(false)
        .build();
    let engine = engine_with(config, provider.clone());

    engine.process_message("s1", "Hi").await.unwrap();
    let err = engine.process_message("s1", "Forget everything").await.unwrap_err();

    assert!(matches!(err, ParleyError::UnknownTool { ref name, .. } if name == RESET_HISTORY));
    let history = engine.store().get("s1", true);
    assert_eq!(
        roles(&history),
        vec![Role::System, Role::User, Role::Assistant, Role::User]
    );
    assert_eq!(history[2].text(), "Hello.");
}

#[tokio::test]
async fn endless_tool_calls_hit_the_iteration_cap() {
    let provider = Arc::new(MockProvider::new());
    for i in 0..5 {
        provider.queue_tool_call(&format!("call_{i}"), "get_datetime", Value::Null);
    }
    let config = EngineConfig::builder()
        .system_prompt(PROMPT)
        .max_iterations(3)
        .build();
    let engine = engine_with(config, provider.clone());

    let err = engine.process_message("s1", "Loop forever").await.unwrap_err();

    assert!(matches!(err, ParleyError::MaxIterationsExceeded(3)));
    assert_eq!(provider.request_count(), 3);
}

#[tokio::test]
async fn interim_text_reaches_the_handler() {
    let provider = Arc::new(MockProvider::new());
    provider.queue_tool_calls(
        Some("Let me check the weather."),
        &[("call_1", "get_weather", json!({ "city": "Oslo" }))],
    );
    provider.queue_tool_calls(Some("   "), &[("call_2", "get_datetime", Value::Null)]);
    provider.queue_response("Cold.");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let engine = engine_with(config(), provider.clone()).with_interim_handler(
        move |session_id, text| {
            sink.lock()
                .unwrap()
                .push(format!("{session_id}: {text}"));
        },
    );

    engine.process_message("s1", "Weather in Oslo?").await.unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["s1: Let me check the weather.".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn rate_limits_are_retried_and_the_turn_completes() {
    let provider = Arc::new(MockProvider::new());
    provider.queue_error(ParleyError::RateLimited {
        retry_after_ms: None,
    });
    provider.queue_error(ParleyError::api(429, "Too Many Requests"));
    provider.queue_response("Finally.");
    let engine = engine_with(config(), provider.clone());

    let started = tokio::time::Instant::now();
    let answer = engine.process_message("s1", "Hi").await.unwrap();

    assert_eq!(answer, "Finally.");
    assert_eq!(provider.request_count(), 3);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(3100), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(3200), "{elapsed:?}");
}

#[tokio::test]
async fn non_rate_limit_failure_aborts_without_retry() {
    let provider = Arc::new(MockProvider::new());
    provider.queue_error(ParleyError::api(401, "invalid api key"));
    let engine = engine_with(config(), provider.clone());

    let err = engine.process_message("s1", "Hi").await.unwrap_err();

    assert!(matches!(err, ParleyError::Api { status: 401, .. }));
    assert_eq!(provider.request_count(), 1);
}

#[tokio::test]
async fn turns_on_one_session_do_not_interleave() {
    let provider = Arc::new(MockProvider::new());
    provider.queue_tool_call("call_1", "search_flights", Value::Null);
    provider.queue_response("No flights today.");
    let engine = engine_with(config(), provider.clone());

    let (first, second) = tokio::join!(
        engine.process_message("s1", "Flights to Rome?"),
        engine.process_message("s1", "Thanks"),
    );

    assert_eq!(first.unwrap(), "No flights today.");
    assert_eq!(second.unwrap(), "Mock response");
    let history = engine.store().get("s1", true);
    assert_eq!(
        roles(&history),
        vec![Role::System, Role::User, Role::Assistant, Role::User, Role::Assistant]
    );
}

#[tokio::test]
async fn ending_a_session_waits_for_its_running_turn() {
    let provider = Arc::new(MockProvider::new());
    provider.queue_tool_call("call_1", "search_flights", Value::Null);
    provider.queue_response("No flights today.");
    let engine = engine_with(config(), provider.clone());

    let (answer, existed) = tokio::join!(
        engine.process_message("s1", "Flights to Rome?"),
        engine.end_session("s1"),
    );

    assert_eq!(answer.unwrap(), "No flights today.");
    assert!(existed);
    assert!(!engine.store().contains("s1"));
    assert_eq!(provider.request_count(), 2);
}

#[tokio::test]
async fn sessions_are_isolated() {
    let provider = Arc::new(MockProvider::new());
    provider.queue_response("Hi Ana.");
    provider.queue_response("Hi Bo.");
    let engine = engine_with(config(), provider.clone());

    engine.process_message("ana", "I'm Ana").await.unwrap();
    engine.process_message("bo", "I'm Bo").await.unwrap();

    assert_eq!(engine.history("ana")[1].text(), "Hi Ana.");
    assert_eq!(engine.history("bo")[1].text(), "Hi Bo.");
    assert_eq!(engine.store().session_ids(), vec!["ana", "bo"]);
}

#[tokio::test]
async fn long_conversations_are_compacted_on_user_boundaries() {
    let provider = Arc::new(MockProvider::new());
    let engine = engine_with(config(), provider.clone());

    for i in 0..10 {
        engine
            .process_message("s1", format!("question {i}"))
            .await
            .unwrap();
    }

    let history = engine.store().get("s1", true);
    assert!(history.len() < 20, "history kept {} entries", history.len());
    assert_eq!(history[0].text(), PROMPT);
    assert_eq!(history[1].role, Role::User);
    assert_eq!(history.last().unwrap().role, Role::Assistant);
}

#[tokio::test]
async fn oversized_sessions_are_reinitialized_before_the_turn() {
    let provider = Arc::new(MockProvider::new());
    let config = EngineConfig::builder()
        .system_prompt(PROMPT)
        .max_session_messages(4)
        .build();
    let engine = engine_with(config, provider.clone());

    engine.process_message("s1", "one").await.unwrap();
    engine.process_message("s1", "two").await.unwrap();
    assert_eq!(engine.store().get("s1", true).len(), 5);

    engine.process_message("s1", "three").await.unwrap();

    let history = engine.store().get("s1", true);
    assert_eq!(roles(&history), vec![Role::System, Role::User, Role::Assistant]);
    assert_eq!(history[1].text(), "three");
}
