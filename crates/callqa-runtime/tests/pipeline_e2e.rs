//! End-to-end pipeline runs against a scripted backend.

mod common;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use callqa_core::{ModuleConfig, ModuleConfigs, ModuleName, SkipReason};
use callqa_runtime::alerts::AlertDispatcher;
use callqa_runtime::registry::LlmModule;
use callqa_runtime::{
    BackendError, MemoryResultStore, ModuleEvaluationError, ModuleFailure, ModuleRegistry, PipelineRunner,
    RetryError, RetryPolicy,
};

use common::{backend, sale_call, RecordingSink, Reply, ScriptedProvider};

fn passing_full_qa() -> Reply {
    Reply::Json(json!({
        "has_violation": false,
        "overall_score": 94,
        "summary": "Clear and compliant sale",
        "category_scores": { "greeting": 10, "closing": 9 }
    }))
}

#[tokio::test]
async fn sale_call_with_only_full_qa_enabled() {
    let provider = Arc::new(ScriptedProvider::new().always(ModuleName::FullQa, passing_full_qa()));
    let registry = ModuleRegistry::with_backend(backend(provider.clone()));
    let store = Arc::new(MemoryResultStore::with_configs(
        ModuleConfigs::new()
            .with(ModuleName::FullQa, ModuleConfig::enabled().with_min_talk_time(0))
            .with(ModuleName::Disclosure, ModuleConfig::default())
            .with(ModuleName::DncRequest, ModuleConfig::default())
            .with(ModuleName::ProhibitedLanguage, ModuleConfig::default()),
    ));
    let sink = Arc::new(RecordingSink::default());
    let runner = PipelineRunner::new(
        Arc::new(registry),
        store.clone(),
        Arc::new(AlertDispatcher::new(sink.clone())),
    );

    let outcome = runner.run(&sale_call("call-100")).await.unwrap();

    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].module_name, ModuleName::FullQa);
    assert!(!outcome.results[0].has_violation);
    assert!(outcome.alerts.is_empty());
    assert!(outcome.skipped.is_empty());
    assert!(outcome.errors.is_empty());

    assert_eq!(ModuleName::ALL.iter().map(|m| provider.calls(*m)).sum::<u32>(), 1);
    assert_eq!(store.results_for("call-100").len(), 1);
    assert_eq!(store.legacy("call-100").unwrap().overall_score, 94.0);
    assert_eq!(sink.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn one_failing_module_does_not_affect_others() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .always(ModuleName::FullQa, passing_full_qa())
            .always(
                ModuleName::Disclosure,
                Reply::Text("I'm sorry, I can't produce JSON for this one.".to_string()),
            )
            .always(
                ModuleName::DncRequest,
                Reply::Json(json!({
                    "has_violation": false,
                    "customer_requested_dnc": false,
                    "agent_honored_request": true
                })),
            ),
    );
    let store = Arc::new(MemoryResultStore::with_configs(
        [ModuleName::FullQa, ModuleName::Disclosure, ModuleName::DncRequest]
            .into_iter()
            .fold(ModuleConfigs::new(), |c, m| c.with(m, ModuleConfig::enabled())),
    ));
    let registry = [ModuleName::FullQa, ModuleName::Disclosure, ModuleName::DncRequest]
        .into_iter()
        .fold(ModuleRegistry::builder(), |b, m| {
            b.register(Arc::new(LlmModule::new(m, backend(provider.clone()))))
        })
        .build();
    let runner = PipelineRunner::new(Arc::new(registry), store.clone(), Arc::new(AlertDispatcher::noop()))
        .with_retry(RetryPolicy::new(2, Duration::from_millis(100)));

    let outcome = runner.run(&sale_call("call-200")).await.unwrap();

    assert_eq!(outcome.results.len(), 2);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].module_name, ModuleName::Disclosure);
    match &outcome.errors[0].error {
        ModuleFailure::Evaluation(RetryError::Exhausted(ModuleEvaluationError::Backend(
            BackendError::InvalidJson(_),
        ))) => {}
        other => panic!("unexpected failure: {other}"),
    }
    assert_eq!(provider.calls(ModuleName::Disclosure), 3);
    assert_eq!(provider.calls(ModuleName::FullQa), 1);
    assert!(store.result("call-200", ModuleName::Disclosure).is_none());
}

#[tokio::test(start_paused = true)]
async fn violation_dispatches_alert_with_manager() {
    let provider = Arc::new(ScriptedProvider::new().always(
        ModuleName::DncRequest,
        Reply::Json(json!({
            "has_violation": false,
            "customer_requested_dnc": true,
            "agent_honored_request": false,
            "request_quote": "I'd like to buy the plan",
            "summary": "Customer asked to be removed"
        })),
    ));
    let registry = ModuleRegistry::builder()
        .register(Arc::new(LlmModule::new(ModuleName::DncRequest, backend(provider))))
        .build();
    let store = Arc::new(MemoryResultStore::with_configs(
        ModuleConfigs::new().with(ModuleName::DncRequest, ModuleConfig::enabled()),
    ));
    let sink = Arc::new(RecordingSink::default());
    let directory = callqa_runtime::alerts::StaticDirectory::new(
        [("agent-7".to_string(), "lead@example.com".to_string())].into(),
    );
    let dispatcher = AlertDispatcher::new(sink.clone()).with_directory(Arc::new(directory));
    let runner = PipelineRunner::new(Arc::new(registry), store, Arc::new(dispatcher));

    let outcome = runner.run(&sale_call("call-300")).await.unwrap();
    assert_eq!(outcome.alerts.len(), 1);
    assert_eq!(outcome.alerts[0].violation_type, "dnc_not_honored");

    // Delivery happens in the background.
    for _ in 0..50 {
        if sink.sent_count() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let sent = sink.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].manager_email, "lead@example.com");
    assert_eq!(sent[0].call_duration, 330);
    assert_eq!(sent[0].agent_name.as_deref(), Some("Dana"));
}

#[tokio::test]
async fn disabled_and_short_calls_are_skipped() {
    let provider = Arc::new(ScriptedProvider::new());
    let registry = ModuleRegistry::with_backend(backend(provider.clone()));
    let store = Arc::new(MemoryResultStore::with_configs(
        ModuleConfigs::new()
            .with(ModuleName::FullQa, ModuleConfig::default())
            .with(ModuleName::Disclosure, ModuleConfig::enabled().with_min_talk_time(301))
            .with(ModuleName::DncRequest, ModuleConfig::enabled().with_dispositions(["no_sale"])),
    ));
    let runner = PipelineRunner::new(Arc::new(registry), store, Arc::new(AlertDispatcher::noop()));

    let outcome = runner.run(&sale_call("call-400")).await.unwrap();
    assert!(outcome.results.is_empty());
    assert!(outcome.errors.is_empty());
    // Disabled and unconfigured modules are inactive, not skipped.
    assert_eq!(outcome.skipped.len(), 2);

    let reason = |m: ModuleName| outcome.skipped.iter().find(|s| s.module_name == m).map(|s| s.reason.clone());
    assert_eq!(reason(ModuleName::FullQa), None);
    assert_eq!(reason(ModuleName::ProhibitedLanguage), None);
    assert!(matches!(reason(ModuleName::Disclosure), Some(SkipReason::TalkTimeBelowMinimum { .. })));
    assert!(matches!(reason(ModuleName::DncRequest), Some(SkipReason::DispositionNotAllowed { .. })));
    assert_eq!(ModuleName::ALL.iter().map(|m| provider.calls(*m)).sum::<u32>(), 0);
}
