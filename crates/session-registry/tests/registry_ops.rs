//! End-to-end registry behavior against an in-process fake worker.

use std::sync::Arc;
use std::time::Duration;

use cdp_client::testing::FakeWorker;
use cdp_client::CdpError;
use session_registry::{RegistryConfig, RegistryError, SessionRegistry, SessionStatus};
use session_store::{MemoryStore, SessionStore};

const PNG_SIGNATURE: [u8; 4] = [0x89, 0x50, 0x4E, 0x47];

fn test_config() -> RegistryConfig {
    RegistryConfig {
        discovery_attempts: 3,
        discovery_backoff: Duration::from_millis(10),
        ..RegistryConfig::default()
    }
}

fn registry_with_store(cfg: RegistryConfig) -> (Arc<SessionRegistry>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new(Duration::from_secs(60)));
    let registry = SessionRegistry::new(Some(store.clone() as Arc<dyn SessionStore>), cfg);
    (registry, store)
}

#[tokio::test]
async fn create_navigate_evaluate_round_trip() {
    let fake = FakeWorker::start().await;
    let (registry, _store) = registry_with_store(test_config());

    let session = registry
        .create_session("agent-a", None, fake.port())
        .await
        .unwrap();
    assert!(session.id.starts_with("sess_"));
    assert!(session.name().starts_with("session-"));
    let before = session.last_activity();

    let page_id = registry
        .navigate(&session.id, "https://example.com")
        .await
        .unwrap();
    let title = registry
        .evaluate(&session.id, &page_id, "document.title")
        .await
        .unwrap();
    assert_eq!(title, serde_json::json!("Example Domain"));

    let snapshot = registry.get_session(&session.id).await.unwrap().snapshot();
    assert_eq!(snapshot.page_ids, vec![page_id]);
    assert_eq!(snapshot.page_count, 1);
    assert_eq!(snapshot.status, SessionStatus::Active);
    assert!(snapshot.last_activity >= before);

    registry.close().await;
}

#[tokio::test]
async fn names_are_unique_per_agent() {
    let fake = FakeWorker::start().await;
    let (registry, _store) = registry_with_store(test_config());

    registry
        .create_session("agent-a", Some("task"), fake.port())
        .await
        .unwrap();

    let err = registry
        .create_session("agent-a", Some("task"), fake.port())
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::NameConflict { .. }));

    // The same name under a different agent is a different namespace.
    registry
        .create_session("agent-b", Some("task"), fake.port())
        .await
        .unwrap();

    registry.close().await;
}

#[tokio::test]
async fn concurrent_same_name_creations_admit_exactly_one_winner() {
    let fake = FakeWorker::start().await;
    let (registry, _store) = registry_with_store(test_config());
    let port = fake.port();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let registry = Arc::clone(&registry);
        tasks.push(tokio::spawn(async move {
            registry.create_session("agent-c", Some("shared"), port).await
        }));
    }

    let mut created = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => created += 1,
            Err(RegistryError::NameConflict { .. }) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(conflicts, 7);

    registry.close().await;
}

#[tokio::test]
async fn per_agent_quota_rejects_the_eleventh_session() {
    let fake = FakeWorker::start().await;
    let (registry, _store) = registry_with_store(test_config());

    for _ in 0..10 {
        registry
            .create_session("agent-a", None, fake.port())
            .await
            .unwrap();
    }
    let err = registry
        .create_session("agent-a", None, fake.port())
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::AgentQuota(10)));

    registry.close().await;
}

#[tokio::test]
async fn global_quota_is_always_enforced() {
    let fake = FakeWorker::start().await;
    let cfg = RegistryConfig {
        max_total_sessions: 2,
        ..test_config()
    };
    let (registry, _store) = registry_with_store(cfg);

    registry
        .create_session("agent-a", None, fake.port())
        .await
        .unwrap();
    registry
        .create_session("agent-b", None, fake.port())
        .await
        .unwrap();
    let err = registry
        .create_session("agent-c", None, fake.port())
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::GlobalQuota(2)));

    registry.close().await;
}

#[tokio::test]
async fn screenshots_decode_to_png_bytes() {
    let fake = FakeWorker::start().await;
    let (registry, _store) = registry_with_store(test_config());

    let session = registry
        .create_session("agent-a", None, fake.port())
        .await
        .unwrap();
    let page_id = registry
        .navigate(&session.id, "https://example.com")
        .await
        .unwrap();

    let bytes = registry
        .screenshot(&session.id, &page_id, None)
        .await
        .unwrap();
    assert!(!bytes.is_empty());
    assert_eq!(&bytes[..4], &PNG_SIGNATURE);

    registry.close().await;
}

#[tokio::test]
async fn content_and_accessibility_tree() {
    let fake = FakeWorker::start().await;
    let (registry, _store) = registry_with_store(test_config());

    let session = registry
        .create_session("agent-a", None, fake.port())
        .await
        .unwrap();
    let page_id = registry
        .navigate(&session.id, "https://example.com")
        .await
        .unwrap();

    let html = registry.content(&session.id, &page_id).await.unwrap();
    assert!(html.starts_with("<html>"));
    assert!(html.contains("Example Domain"));

    let tree = registry
        .accessibility_tree(&session.id, &page_id)
        .await
        .unwrap();
    assert_eq!(tree.page_id, page_id);
    assert_eq!(tree.nodes.len(), 1);
    assert_eq!(tree.nodes[0].role, "RootWebArea");

    registry.close().await;
}

#[tokio::test]
async fn script_exceptions_surface_as_script_errors() {
    let fake = FakeWorker::start().await;
    let (registry, _store) = registry_with_store(test_config());

    let session = registry
        .create_session("agent-a", None, fake.port())
        .await
        .unwrap();
    let page_id = registry
        .navigate(&session.id, "https://example.com")
        .await
        .unwrap();

    let err = registry
        .evaluate(&session.id, &page_id, "throw new Error('boom')")
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Script(_)));

    registry.close().await;
}

#[tokio::test]
async fn close_page_untracks_and_unknown_pages_are_rejected() {
    let fake = FakeWorker::start().await;
    let (registry, _store) = registry_with_store(test_config());

    let session = registry
        .create_session("agent-a", None, fake.port())
        .await
        .unwrap();
    let first = registry
        .navigate(&session.id, "https://example.com")
        .await
        .unwrap();
    let second = registry
        .navigate(&session.id, "https://example.org")
        .await
        .unwrap();
    assert_eq!(fake.live_targets(), 2);

    registry.close_page(&session.id, &first).await.unwrap();
    assert_eq!(fake.live_targets(), 1);
    assert_eq!(session.pages(), vec![second]);

    let err = registry
        .close_page(&session.id, "target-unknown")
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::PageNotFound(_)));

    registry.close().await;
}

#[tokio::test]
async fn destroy_closes_pages_and_disposes_the_context() {
    let fake = FakeWorker::start().await;
    let (registry, store) = registry_with_store(test_config());

    let session = registry
        .create_session("agent-a", Some("doomed"), fake.port())
        .await
        .unwrap();
    registry
        .navigate(&session.id, "https://example.com")
        .await
        .unwrap();
    registry
        .navigate(&session.id, "https://example.org")
        .await
        .unwrap();

    registry.destroy_session(&session.id).await.unwrap();

    assert_eq!(fake.live_targets(), 0);
    assert_eq!(fake.disposed_contexts(), vec![session.context_id.clone()]);
    assert!(matches!(
        registry.get_session(&session.id).await,
        Err(RegistryError::NotFound(_))
    ));
    assert!(store.get(&session.id).await.is_err());
    // The name is free again.
    registry
        .create_session("agent-a", Some("doomed"), fake.port())
        .await
        .unwrap();

    registry.close().await;
}

#[tokio::test]
async fn worker_loss_then_resume_resurrects_on_a_fresh_client() {
    let fake = FakeWorker::start().await;
    let (registry, store) = registry_with_store(test_config());

    let session = registry
        .create_session("agent-a", Some("task"), fake.port())
        .await
        .unwrap();
    let page_id = registry
        .navigate(&session.id, "https://example.com")
        .await
        .unwrap();

    // Simulate worker loss: the protocol client dies under the session.
    session.client().close().await;
    let err = registry
        .evaluate(&session.id, &page_id, "document.title")
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Cdp(CdpError::Closed)));

    // The durable entry survives the client.
    assert!(store.get(&session.id).await.is_ok());

    // The restarted browser no longer knows the old targets.
    fake.clear_targets();

    let resumed = registry
        .resume_by_name("agent-a", "task")
        .await
        .unwrap();
    assert_eq!(resumed.id, session.id);
    assert_eq!(resumed.created_at, session.created_at);
    assert!(!resumed.client().is_closed());

    // Stored page ids come back, but they are advisory: target-scoped
    // operations against them surface a protocol error.
    assert_eq!(resumed.pages(), vec![page_id.clone()]);
    let err = registry
        .evaluate(&resumed.id, &page_id, "document.title")
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Cdp(CdpError::Protocol { .. })));

    // Fresh navigation works on the resurrected session.
    registry
        .navigate(&resumed.id, "https://example.com")
        .await
        .unwrap();

    registry.close().await;
}

#[tokio::test]
async fn resume_prefers_the_resident_record() {
    let fake = FakeWorker::start().await;
    let (registry, _store) = registry_with_store(test_config());

    let session = registry
        .create_session("agent-a", Some("task"), fake.port())
        .await
        .unwrap();
    let before = session.last_activity();

    let resumed = registry.resume_by_name("agent-a", "task").await.unwrap();
    assert!(Arc::ptr_eq(&session, &resumed));
    assert!(resumed.last_activity() >= before);

    let by_id = registry.resume_by_id(&session.id).await.unwrap();
    assert!(Arc::ptr_eq(&session, &by_id));

    registry.close().await;
}

#[tokio::test]
async fn agent_listing_mixes_live_records_and_projections() {
    let fake = FakeWorker::start().await;
    let (registry, store) = registry_with_store(test_config());

    let resident = registry
        .create_session("agent-a", Some("live"), fake.port())
        .await
        .unwrap();

    // A session left over from a previous process: durable only.
    let mut ghost = resident.snapshot();
    ghost.session_id = "sess_ghost00000000000000000".to_string();
    store
        .save(&session_store::SessionState {
            session_id: ghost.session_id.clone(),
            session_name: "ghost".to_string(),
            agent_id: "agent-a".to_string(),
            process_port: 9400,
            context_id: "ctx-ghost".to_string(),
            created_at: ghost.created_at,
            last_activity: ghost.last_activity,
            status: "active".to_string(),
            pages: vec![session_store::PageState {
                page_id: "target-old".to_string(),
                url: String::new(),
                title: String::new(),
            }],
            cookies: Vec::new(),
            local_storage: Default::default(),
        })
        .await
        .unwrap();

    let listed = registry.list_agent_sessions("agent-a").await.unwrap();
    assert_eq!(listed.len(), 2);

    let ghost_row = listed
        .iter()
        .find(|row| row.session_id == ghost.session_id)
        .expect("projection for the durable-only session");
    assert_eq!(ghost_row.page_count, 1);
    // Listing must not resurrect.
    assert!(matches!(
        registry.get_session(&ghost.session_id).await,
        Err(RegistryError::NotFound(_))
    ));

    registry.close().await;
}

#[tokio::test]
async fn sweeper_destroys_idle_sessions() {
    let fake = FakeWorker::start().await;
    let cfg = RegistryConfig {
        idle_timeout: Duration::from_millis(50),
        sweep_interval: Duration::from_millis(25),
        ..test_config()
    };
    let (registry, store) = registry_with_store(cfg);

    let session = registry
        .create_session("agent-a", Some("idle"), fake.port())
        .await
        .unwrap();
    registry.start_sweeper();

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(matches!(
        registry.get_session(&session.id).await,
        Err(RegistryError::NotFound(_))
    ));
    assert!(store.get(&session.id).await.is_err());
    assert_eq!(fake.disposed_contexts(), vec![session.context_id.clone()]);

    registry.close().await;
}

#[tokio::test]
async fn rename_moves_the_reservation() {
    let fake = FakeWorker::start().await;
    let (registry, _store) = registry_with_store(test_config());

    let session = registry
        .create_session("agent-a", Some("one"), fake.port())
        .await
        .unwrap();
    registry
        .create_session("agent-a", Some("two"), fake.port())
        .await
        .unwrap();

    let err = registry
        .rename_session(&session.id, "two")
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::NameConflict { .. }));

    registry.rename_session(&session.id, "three").await.unwrap();
    assert_eq!(session.name(), "three");

    let resumed = registry.resume_by_name("agent-a", "three").await.unwrap();
    assert_eq!(resumed.id, session.id);
    assert!(matches!(
        registry.resume_by_name("agent-a", "one").await,
        Err(RegistryError::NotFound(_))
    ));

    registry.close().await;
}

#[tokio::test]
async fn registry_works_without_a_durable_store() {
    let fake = FakeWorker::start().await;
    let registry = SessionRegistry::new(None, test_config());

    let session = registry
        .create_session("agent-a", Some("volatile"), fake.port())
        .await
        .unwrap();
    let page_id = registry
        .navigate(&session.id, "https://example.com")
        .await
        .unwrap();
    registry
        .evaluate(&session.id, &page_id, "document.title")
        .await
        .unwrap();

    // Persistence-backed features degrade: with no index to resurrect from,
    // resume reports not-found; listings fall back to resident sessions.
    assert!(matches!(
        registry.resume_by_name("agent-a", "volatile").await,
        Err(RegistryError::NotFound(_))
    ));
    let listed = registry.list_agent_sessions("agent-a").await.unwrap();
    assert_eq!(listed.len(), 1);

    // Rename still detects resident conflicts.
    registry
        .create_session("agent-a", Some("other"), fake.port())
        .await
        .unwrap();
    assert!(matches!(
        registry.rename_session(&session.id, "other").await,
        Err(RegistryError::NameConflict { .. })
    ));

    registry.close().await;
}

#[tokio::test]
async fn close_abandons_resident_sessions_but_keeps_durable_entries() {
    let fake = FakeWorker::start().await;
    let (registry, store) = registry_with_store(test_config());

    let session = registry
        .create_session("agent-a", Some("survivor"), fake.port())
        .await
        .unwrap();
    registry.close().await;

    assert!(matches!(
        registry.get_session(&session.id).await,
        Err(RegistryError::NotFound(_))
    ));
    // No destruction happened: the context was never disposed and the
    // durable entry is intact for a later resume.
    assert!(fake.disposed_contexts().is_empty());
    assert!(store.get(&session.id).await.is_ok());
}
