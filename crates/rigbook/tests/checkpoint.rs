//! Thread persistence through the file checkpoint store.

mod common;

use common::{ScriptedEngine, lab, service, text, tool_call};
use rigbook::prelude::*;
use std::sync::Arc;

fn orchestrator(engine: ScriptedEngine, store: &MemoryStore, dir: &std::path::Path) -> Orchestrator {
    let tools = allocation_tools(service(store)).unwrap();
    Orchestrator::new(
        Arc::new(engine),
        Arc::new(tools),
        Arc::new(store.clone()),
        Arc::new(FileCheckpointStore::new(dir).unwrap()),
        OrchestratorConfig::default(),
    )
    .with_event_handler(NoopHandler)
}

#[tokio::test]
async fn threads_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = lab();

    let first = orchestrator(
        ScriptedEngine::new(vec![
            Ok(tool_call(
                "c1",
                "auto_allocate",
                r#"{"subject": 1, "start_date": "2024-03-04", "test_type": "brake"}"#,
            )),
            text("Booked."),
        ]),
        &store,
        dir.path(),
    );
    first.handle_message("ops-desk", "book V1 on March 4th").await;
    drop(first);

    assert!(dir.path().join("ops-desk.json").exists());

    let engine = Arc::new(ScriptedEngine::new(vec![text("You have one booking.")]));
    let second = Orchestrator::new(
        engine.clone(),
        Arc::new(allocation_tools(service(&store)).unwrap()),
        Arc::new(store.clone()),
        Arc::new(FileCheckpointStore::new(dir.path()).unwrap()),
        OrchestratorConfig::default(),
    )
    .with_event_handler(NoopHandler);
    let turn = second.handle_message("ops-desk", "what do I have?").await;
    assert_eq!(turn.reply, "You have one booking.");

    // System prompt, then the earlier four messages, then the new question.
    let prompts = engine.prompts();
    let prompt = &prompts[0];
    assert_eq!(prompt.len(), 6);
    assert_eq!(prompt[1].content_str(), "book V1 on March 4th");
    assert_eq!(prompt[5].content_str(), "what do I have?");

    let saved = FileCheckpointStore::new(dir.path())
        .unwrap()
        .load("ops-desk")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saved.messages.len(), 6);
    assert_eq!(store.allocations().len(), 1);
}

#[tokio::test]
async fn corrupt_checkpoint_starts_a_fresh_thread() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
    let store = lab();

    let orch = orchestrator(ScriptedEngine::new(vec![text("Hello again.")]), &store, dir.path());
    let turn = orch.handle_message("broken", "hi").await;

    assert!(!turn.failed());
    let saved = FileCheckpointStore::new(dir.path())
        .unwrap()
        .load("broken")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saved.messages.len(), 2);
}

#[tokio::test]
async fn unsafe_thread_ids_still_get_an_answer() {
    let dir = tempfile::tempdir().unwrap();
    let store = lab();

    let orch = orchestrator(ScriptedEngine::new(vec![text("Answered.")]), &store, dir.path());
    let turn = orch.handle_message("../escape", "hi").await;

    assert_eq!(turn.reply, "Answered.");
    assert!(!dir.path().join("../escape.json").exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
