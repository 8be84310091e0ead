//! Integration tests that exercise the full turn pipeline with a scripted
//! model: shell envelopes, persistence across store reopenings, capture
//! attachment, retention sweeps, and personality routing.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::capture::CaptureStore;
use crate::config::CaptureConfig;
use crate::memory::SqliteMemoryStore;
use crate::orchestrator::Orchestrator;
use crate::scheduler::Scheduler;
use crate::shell::Shell;
use crate::testing::{setup_test_harness, MockGenerator, ScriptedScreenSource};
use crate::traits::MemoryStore;
use crate::types::{Personality, Role, TurnRequest};

fn request(conversation_id: Option<&str>, personality_id: &str, text: &str) -> TurnRequest {
    TurnRequest {
        conversation_id: conversation_id.map(|s| s.to_string()),
        personality_id: personality_id.to_string(),
        text: text.to_string(),
    }
}

#[tokio::test]
async fn shell_turn_end_to_end() {
    let rig = setup_test_harness(MockGenerator::with_replies(vec!["hello there"]))
        .await
        .unwrap();
    let shell = Shell::new(rig.orchestrator.clone(), rig.captures.clone());

    let resp = shell.send_message(request(None, "sage", "hi")).await;
    assert!(resp.success);
    let outcome = resp.data.unwrap();
    assert_eq!(outcome.assistant_message.content, "hello there");

    let history = rig.store.get_history(&outcome.conversation.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].content, "hi");
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].content, "hello there");
}

#[tokio::test]
async fn failed_turn_reports_error_and_keeps_user_text() {
    let rig = setup_test_harness(MockGenerator::failing("backend down"))
        .await
        .unwrap();
    let shell = Shell::new(rig.orchestrator.clone(), rig.captures.clone());

    let resp = shell.send_message(request(None, "sage", "hi")).await;
    assert!(!resp.success);
    assert!(resp.data.is_none());
    assert!(resp.error.is_some());

    let conversations = rig.store.list_conversations().await.unwrap();
    assert_eq!(conversations.len(), 1);
    let history = rig.store.get_history(&conversations[0].id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "hi");
}

#[tokio::test]
async fn conversations_and_settings_survive_a_reopen() {
    let db_file = tempfile::NamedTempFile::new().unwrap();
    let db_path = db_file.path().to_str().unwrap().to_string();

    let conversation_id = {
        let store = Arc::new(SqliteMemoryStore::new(&db_path).await.unwrap());
        store.seed_defaults().await.unwrap();

        let capture_dir = tempfile::TempDir::new().unwrap();
        let captures = Arc::new(CaptureStore::new(
            capture_dir.path(),
            Arc::new(ScriptedScreenSource::new(Vec::new())),
        ));
        let orchestrator = Orchestrator::new(
            store.clone(),
            Arc::new(MockGenerator::with_replies(vec!["kept"])),
            captures,
        );

        let outcome = orchestrator
            .handle_turn(&request(None, "listener", "don't lose this"))
            .await
            .unwrap();
        store
            .upsert_setting("capture_interval_secs", "30")
            .await
            .unwrap();
        outcome.conversation.id
    };

    // A fresh store over the same file sees everything.
    let reopened = SqliteMemoryStore::new(&db_path).await.unwrap();
    let conversation = reopened
        .get_conversation(&conversation_id)
        .await
        .unwrap()
        .expect("conversation survives reopen");
    assert_eq!(conversation.title, "don't lose this");
    assert_eq!(conversation.summary.as_deref(), Some("kept"));

    let history = reopened.get_history(&conversation_id).await.unwrap();
    assert_eq!(history.len(), 2);

    let interval = reopened.get_setting("capture_interval_secs").await.unwrap();
    assert_eq!(interval.as_deref(), Some("30"));
}

#[tokio::test]
async fn second_turn_attaches_fresh_capture_and_sweep_orphans_it() {
    let rig = setup_test_harness(MockGenerator::new()).await.unwrap();

    let first = rig
        .orchestrator
        .handle_turn(&request(None, "creator", "no screenshot yet"))
        .await
        .unwrap();
    let history = rig.store.get_history(&first.conversation.id).await.unwrap();
    assert!(history[0].screenshot_path.is_none());

    rig.captures.capture().await.unwrap();
    let second = rig
        .orchestrator
        .handle_turn(&request(
            Some(&first.conversation.id),
            "creator",
            "now with context",
        ))
        .await
        .unwrap();

    let history = rig.store.get_history(&second.conversation.id).await.unwrap();
    let attached = history[2].screenshot_path.clone().expect("capture attached");

    // Retention: the file goes away, the message row keeps its stale path.
    let scheduler = Scheduler::new(
        rig.store.clone(),
        rig.captures.clone(),
        CaptureConfig::default(),
    );
    tokio::time::sleep(Duration::from_millis(10)).await;
    scheduler.run_sweep(Duration::ZERO).await;

    assert!(rig.captures.latest().await.unwrap().is_none());
    let history = rig.store.get_history(&second.conversation.id).await.unwrap();
    assert_eq!(history[2].screenshot_path.as_deref(), Some(attached.as_str()));
    assert!(!std::path::Path::new(&attached).exists());
}

#[tokio::test]
async fn custom_personality_shapes_the_system_prompt() {
    let rig = setup_test_harness(MockGenerator::new()).await.unwrap();

    let now = Utc::now();
    let captain = Personality {
        id: "captain".to_string(),
        name: "Captain".to_string(),
        description: "Nautical to a fault".to_string(),
        system_prompt: "Speak like a ship captain.".to_string(),
        traits: vec!["salty".to_string(), "decisive".to_string()],
        color: "#123456".to_string(),
        avatar: "\u{2693}".to_string(),
        created_at: now,
        updated_at: now,
    };
    rig.store.upsert_personality(&captain).await.unwrap();

    rig.orchestrator
        .handle_turn(&request(None, "captain", "ahoy"))
        .await
        .unwrap();

    let calls = rig.generator.calls().await;
    assert_eq!(calls[0][0].content, "Speak like a ship captain.");
}

#[tokio::test]
async fn threads_stay_isolated_and_ordered_by_activity() {
    let rig = setup_test_harness(MockGenerator::new()).await.unwrap();

    let a = rig
        .orchestrator
        .handle_turn(&request(None, "sage", "thread a"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let b = rig
        .orchestrator
        .handle_turn(&request(None, "optimist", "thread b"))
        .await
        .unwrap();

    // Histories do not bleed into each other.
    assert_eq!(rig.store.get_history(&a.conversation.id).await.unwrap().len(), 2);
    assert_eq!(rig.store.get_history(&b.conversation.id).await.unwrap().len(), 2);

    // Most recently active first.
    let listed = rig.store.list_conversations().await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, b.conversation.id);

    // Touch thread A again; the order flips.
    tokio::time::sleep(Duration::from_millis(5)).await;
    rig.orchestrator
        .handle_turn(&request(Some(&a.conversation.id), "sage", "back to a"))
        .await
        .unwrap();
    let listed = rig.store.list_conversations().await.unwrap();
    assert_eq!(listed[0].id, a.conversation.id);

    // The model only ever saw the active thread's history.
    let calls = rig.generator.calls().await;
    let last = calls.last().unwrap();
    assert_eq!(last.len(), 4); // system + a/reply/back-to-a
    assert!(last.iter().all(|m| m.content != "thread b"));
}
