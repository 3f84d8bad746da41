// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// End-to-end scenarios: aggregation through routing, dedup, locking,
/// service execution, and the hub — all against temp directories, the
/// in-memory chat port, and scripted agent drivers.  No network access.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use quill_chat::{ChatPort, InMemoryChatPort, IncomingEvent};
use quill_config::{OverlayStore, ServiceMode, SettingsStore};
use quill_core::agent::{
    AgentDriver, AgentError, AgentInvocation, AgentOutcome, MockAgentDriver,
};
use quill_core::{Aggregator, ContextStore, MessageGroup, RateLimiter, Router, ServiceDeps};
use quill_git::GitDriver;
use quill_store::{BindingStore, CredentialStore, KbBinding, KbKind, ModeStore, ProcessedLog};
use quill_sync::KbSyncManager;

struct World {
    _dir: tempfile::TempDir,
    chat: Arc<InMemoryChatPort>,
    router: Arc<Router>,
    modes: ModeStore,
    bindings: BindingStore,
    kb_root: std::path::PathBuf,
}

fn world(driver: Arc<dyn AgentDriver>) -> World {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");
    std::fs::create_dir_all(&data).unwrap();
    let kb_root = dir.path().join("knowledge_bases/kb1");

    let bindings = BindingStore::new(data.join("kb_bindings.json"));
    bindings
        .bind(
            1,
            KbBinding {
                kb_name: "kb1".into(),
                kb_root_path: kb_root.clone(),
                kind: KbKind::Local,
                remote_url: None,
            },
        )
        .unwrap();

    let chat = Arc::new(InMemoryChatPort::new());
    let deps = Arc::new(ServiceDeps {
        settings: SettingsStore::new(
            HashMap::new(),
            OverlayStore::new(data.join("user_settings_overrides.json")),
        ),
        bindings: bindings.clone(),
        credentials: CredentialStore::new(data.join("credentials.json"), [1u8; 32]),
        sync: Arc::new(KbSyncManager::new()),
        chat: chat.clone(),
        driver,
        hub: None,
        contexts: Arc::new(ContextStore::new()),
        limiter: Arc::new(RateLimiter::new()),
    });
    let modes = ModeStore::new(data.join("user_modes.json"));
    let router = Arc::new(Router::new(
        deps,
        ProcessedLog::new(data.join("processed.json")),
        ModeStore::new(data.join("user_modes.json")),
    ));
    World {
        _dir: dir,
        chat,
        router,
        modes,
        bindings,
        kb_root,
    }
}

fn group_from(user_id: i64, text: &str) -> MessageGroup {
    MessageGroup::from_events(vec![IncomingEvent::text(1, 10 + user_id, user_id, text)]).unwrap()
}

// ── Scenario 1: note from a single text message ───────────────────────────────

#[tokio::test]
async fn note_message_produces_exactly_one_commit_with_one_file() {
    let note_path = "tech/2026-08-01-article-about-neural-networks.md";
    let content = "---\ntitle: Article about neural networks\ncategory: tech\n\
                   created_at: 2026-08-01T00:00:00Z\n---\n\nhttps://example.com/nn";
    let w = world(Arc::new(MockAgentDriver::creating(note_path, content)));

    w.router
        .process_one(group_from(
            1,
            "Article about neural networks https://example.com/nn",
        ))
        .await;

    let git = GitDriver::open(&w.kb_root).unwrap();
    let head = git.head_id().unwrap().expect("one commit must exist");

    let repo = git2::Repository::open(&w.kb_root).unwrap();
    let commit = repo.head().unwrap().peel_to_commit().unwrap();
    assert!(commit.parent_count() == 0, "exactly one commit");
    let tree = commit.tree().unwrap();
    assert!(tree
        .get_path(std::path::Path::new(
            "topics/tech/2026-08-01-article-about-neural-networks.md"
        ))
        .is_ok());

    // Front-matter survives on disk.
    let text =
        std::fs::read_to_string(w.kb_root.join("topics").join(note_path)).unwrap();
    assert!(text.contains("category: tech"));
    assert!(text.contains("created_at:"));

    // The status message ends in the success state.
    let last = w.chat.last_in_chat(11).unwrap();
    assert!(last.text.contains("note saved"), "{}", last.text);
    assert!(!head.is_empty());
}

// ── Scenario 2: dedup of identical retries ────────────────────────────────────

#[tokio::test]
async fn identical_retry_produces_one_commit_and_no_second_git_activity() {
    let w = world(Arc::new(MockAgentDriver::new(vec![
        quill_core::agent::MockBehaviour::CreateFiles {
            files: vec![("note.md".into(), "body".into())],
            answer: "saved".into(),
        },
        // A second behaviour existing proves it is never consumed.
        quill_core::agent::MockBehaviour::CreateFiles {
            files: vec![("other.md".into(), "body".into())],
            answer: "saved again".into(),
        },
    ])));

    let g = group_from(1, "Article about neural networks https://example.com/nn");
    w.router.process_one(g.clone()).await;
    w.router.process_one(g).await;

    let repo = git2::Repository::open(&w.kb_root).unwrap();
    let head = repo.head().unwrap().peel_to_commit().unwrap();
    assert_eq!(head.parent_count(), 0, "exactly one commit after the retry");

    let texts: Vec<String> = w.chat.messages().into_iter().map(|m| m.text).collect();
    assert!(texts.iter().any(|t| t.contains("already processed")));
}

// ── Scenario 3: two users share one KB ────────────────────────────────────────

/// Driver that asserts mutual exclusion: the service holds the KB lock
/// around every run, so two runs against the same KB must never overlap.
struct OverlapProbe {
    inside: AtomicBool,
    runs: AtomicU32,
}

#[async_trait::async_trait]
impl AgentDriver for OverlapProbe {
    fn name(&self) -> &str {
        "overlap-probe"
    }

    async fn run(&self, inv: AgentInvocation) -> Result<AgentOutcome, AgentError> {
        assert!(
            !self.inside.swap(true, Ordering::SeqCst),
            "two agent runs held the same KB lock concurrently"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        let path = inv.working_dir.join(format!("user_{}.md", inv.user_id));
        std::fs::create_dir_all(inv.working_dir.clone()).unwrap();
        std::fs::write(&path, "content").unwrap();
        self.inside.store(false, Ordering::SeqCst);
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(AgentOutcome {
            answer: "done".into(),
            files_created: vec![format!("topics/user_{}.md", inv.user_id)],
            iterations: 1,
            ..Default::default()
        })
    }
}

#[tokio::test]
async fn two_users_sharing_a_kb_serialize_on_the_lock() {
    let probe = Arc::new(OverlapProbe {
        inside: AtomicBool::new(false),
        runs: AtomicU32::new(0),
    });
    let w = world(probe.clone());
    // Bind user 2 to the same KB.
    w.bindings
        .bind(
            2,
            KbBinding {
                kb_name: "kb1".into(),
                kb_root_path: w.kb_root.clone(),
                kind: KbKind::Local,
                remote_url: None,
            },
        )
        .unwrap();
    w.modes.set(1, ServiceMode::Task).unwrap();
    w.modes.set(2, ServiceMode::Task).unwrap();

    let r1 = w.router.clone();
    let r2 = w.router.clone();
    let t1 = tokio::spawn(async move { r1.process_one(group_from(1, "from user one")).await });
    let t2 = tokio::spawn(async move { r2.process_one(group_from(2, "from user two")).await });
    t1.await.unwrap();
    t2.await.unwrap();

    assert_eq!(probe.runs.load(Ordering::SeqCst), 2, "both must complete");
    // Both commits landed in some total order.
    let repo = git2::Repository::open(&w.kb_root).unwrap();
    let head = repo.head().unwrap().peel_to_commit().unwrap();
    assert_eq!(head.parent_count(), 1, "two commits stacked");
}

// ── Scenario 4: ask mode answers without mutating ─────────────────────────────

#[tokio::test]
async fn ask_mode_edits_status_with_answer_and_leaves_git_untouched() {
    let w = world(Arc::new(MockAgentDriver::answering(
        "You wrote three notes about transformers.",
    )));
    w.modes.set(1, ServiceMode::Ask).unwrap();

    w.router
        .process_one(group_from(1, "What did I write about transformers?"))
        .await;

    let git = GitDriver::open(&w.kb_root).unwrap();
    assert!(git.head_id().unwrap().is_none(), "no commit in ask mode");
    let last = w.chat.last_in_chat(11).unwrap();
    assert_eq!(last.text, "You wrote three notes about transformers.");
}

// ── Scenario 5: path traversal is rejected inside the agent loop ──────────────

#[tokio::test]
async fn traversal_tool_call_is_rejected_and_the_loop_recovers() {
    use quill_core::agent::{ContextFactory, InProcessDriver};
    use quill_model::ScriptedBackend;
    use quill_tools::ToolContext;

    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("topics")).unwrap();

    let factory: ContextFactory = Arc::new(|inv: &AgentInvocation| {
        Arc::new(ToolContext {
            user_id: inv.user_id,
            kb_name: inv.kb_name.clone(),
            kb_root: inv.kb_root.clone(),
            working_dir: inv.working_dir.clone(),
            hub: None,
            github_token: None,
            web_search_key: None,
            vector_top_k: 5,
            http_timeout: Duration::from_secs(5),
        })
    });
    let backend = ScriptedBackend::tool_then_text(
        "c1",
        "file_create",
        serde_json::json!({"path": "../../etc/passwd", "content": "x"}),
        "understood, staying inside the tree",
    );
    let driver = InProcessDriver::new(Arc::new(backend), factory);

    let outcome = driver
        .run(AgentInvocation {
            mode: ServiceMode::Note,
            user_id: 1,
            kb_name: "kb1".into(),
            kb_root: dir.path().to_path_buf(),
            working_dir: dir.path().join("topics"),
            grouped_text: "attempt".into(),
            media: vec![],
            kb_structure_hint: String::new(),
            context: vec![],
            deadline: tokio::time::Instant::now() + Duration::from_secs(10),
            max_iterations: 5,
        })
        .await
        .unwrap();

    assert_eq!(outcome.answer, "understood, staying inside the tree");
    assert!(!outcome.has_mutations());
    let rejected = outcome.tool_trace.iter().find(|t| !t.ok).unwrap();
    assert!(rejected.summary.contains("InvalidPath"));
}

// ── Scenario 6: hub memory is user-scoped over the wire ───────────────────────

#[tokio::test]
async fn hub_memory_isolation_between_users() {
    let dir = tempfile::tempdir().unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let state = quill_hub::HubState::new(
        quill_hub::MemoryStore::new(dir.path().join("memory")),
        quill_hub::VectorIndex::new(dir.path().join("memory")),
        quill_hub::ServerRegistry::new(dir.path().join("mcp_servers")),
        base_url.clone(),
    );
    tokio::spawn(quill_hub::serve(state, listener));

    let client = quill_hub::HubClient::connect(&base_url, Duration::from_secs(5))
        .await
        .unwrap();
    client.store_memory(1, "A", None).await.unwrap();
    let other = client.retrieve_memory(2, "A", None).await.unwrap();
    assert!(other.is_empty(), "user 2 must not see user 1's memory");

    // And the storage layout is per-user on disk.
    assert!(dir.path().join("memory/user_1/memory.json").is_file());
    assert!(!dir.path().join("memory/user_2").exists());
}

// ── Aggregation feeds the router end to end ───────────────────────────────────

#[tokio::test]
async fn aggregated_events_flow_to_a_single_service_run() {
    let w = world(Arc::new(MockAgentDriver::answering("grouped answer")));
    w.modes.set(1, ServiceMode::Ask).unwrap();

    let (tx, rx) = tokio::sync::mpsc::channel(16);
    let aggregator = Aggregator::new(tx);
    tokio::spawn(w.router.clone().run(rx));

    // Two quick messages coalesce into one group.
    let e1 = IncomingEvent::text(1, 11, 1, "part one");
    let mut e2 = IncomingEvent::text(2, 11, 1, "part two");
    e2.timestamp = e1.timestamp + chrono::Duration::milliseconds(5);
    aggregator.add(e1, Duration::from_millis(200)).await;
    aggregator.add(e2, Duration::from_millis(200)).await;

    // Wait for the final status edit.
    let mut answered = false;
    for _ in 0..100 {
        if let Some(m) = w.chat.last_in_chat(11) {
            if m.text == "grouped answer" {
                answered = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
    assert!(answered, "aggregated group must reach the service");
}
