//! Integration tests for the capability audit trail.
//!
//! Every check made through a checker must appear exactly once, in order,
//! both in memory and in the persisted JSON-lines file.

use cordon_audit::{AuditDecision, AuditLog, load_jsonl};
use cordon_capabilities::{CapabilityChecker, CapabilitySet, ambient};

fn set(strings: &[&str]) -> CapabilitySet {
    CapabilitySet::parse(strings).unwrap()
}

#[tokio::test]
async fn test_decisions_persist_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    let (audit, sink) = AuditLog::with_jsonl_sink(&path).unwrap();

    let mut checker = CapabilityChecker::new(
        set(&["file:read:/data/**", "!file:read:/data/secret/**"]),
        audit.clone(),
    );
    checker.check("file:read:/data/a.csv").unwrap();
    checker.check("file:read:/data/secret/key").unwrap_err();
    let handle = checker.push(set(&["!file:read:/data/**"])).unwrap();
    checker.check("file:read:/data/a.csv").unwrap_err();
    checker.pop(handle).unwrap();
    checker.check("not a capability").unwrap_err();

    assert_eq!(sink.shutdown().await.unwrap(), 4);

    let persisted = load_jsonl(&path).unwrap();
    let in_memory: Vec<_> = audit.entries().map(|e| (*e).clone()).collect();
    assert_eq!(persisted, in_memory);

    let summary: Vec<_> = persisted
        .iter()
        .map(|e| (e.decision, e.context_depth, e.matched.as_deref()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (AuditDecision::Granted, 0, Some("file:read:/data/**")),
            (AuditDecision::Denied, 0, Some("!file:read:/data/secret/**")),
            (AuditDecision::Denied, 1, Some("!file:read:/data/**")),
            (AuditDecision::Denied, 0, None),
        ]
    );
    assert_eq!(persisted[3].capability, "not a capability");
}

#[tokio::test]
async fn test_reader_sees_only_entries_recorded_before_it() {
    let audit = AuditLog::new();
    let checker = CapabilityChecker::new(set(&["env:read:*"]), audit.clone());

    checker.check("env:read:HOME").unwrap();
    let early = audit.entries();
    checker.check("env:read:PATH").unwrap();
    checker.check("net:connect:example.com").unwrap_err();

    assert_eq!(early.count(), 1);
    let all = audit.entries();
    assert_eq!(all.len(), 3);
    assert_eq!(audit.granted_count(), 2);
    assert_eq!(audit.denied_count(), 1);

    // Re-reading starts from the beginning again.
    let first: Vec<_> = audit.entries().take(1).map(|e| e.capability.clone()).collect();
    assert_eq!(first, vec!["env:read:HOME".to_owned()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_tasks_share_one_trail() {
    let audit = AuditLog::new();
    let mut tasks = Vec::new();
    for i in 0..10_u32 {
        let checker = CapabilityChecker::new(set(&["file:read:/srv/**"]), audit.clone());
        tasks.push(tokio::spawn(ambient::run_with(checker, async move {
            for j in 0..5_u32 {
                let _ = ambient::check(&format!("file:read:/srv/{i}/{j}"));
                tokio::task::yield_now().await;
            }
            ambient::check("file:write:/srv/x").is_err()
        })));
    }
    for task in tasks {
        assert!(task.await.unwrap());
    }

    assert_eq!(audit.len(), 60);
    assert_eq!(audit.denied_count(), 10);
    assert!(audit.entries().all(|e| e.context_depth == 0));
}
