// crates/flowwarden-core/tests/memory_store.rs
// ============================================================================
// Module: Memory Store Tests
// Description: Provenance enforcement, immutability, filters, and snapshots.
// ============================================================================
//! ## Overview
//! Covers mandatory provenance, deep-copy-on-write immutability, AND/OR
//! filter semantics, timeline ordering, snapshot verification, and the
//! directional memory-to-audit reference.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::sync::Arc;

use flowwarden_core::AuditLog;
use flowwarden_core::Clock;
use flowwarden_core::ManualClock;
use flowwarden_core::MemoryEntryId;
use flowwarden_core::MemoryEntryKind;
use flowwarden_core::MemoryFilter;
use flowwarden_core::MemoryStore;
use flowwarden_core::MemoryWriteOptions;
use flowwarden_core::Provenance;
use flowwarden_core::WorkflowId;
use flowwarden_core::runtime::MemoryError;
use serde_json::json;

/// Builds a store over a manual clock plus its audit log.
fn store() -> (MemoryStore, Arc<ManualClock>, Arc<AuditLog>) {
    let clock = Arc::new(ManualClock::starting_at(0));
    let audit = Arc::new(AuditLog::new(clock.clone() as Arc<dyn Clock>));
    let memory = MemoryStore::new(Arc::clone(&audit), clock.clone() as Arc<dyn Clock>);
    (memory, clock, audit)
}

#[test]
fn empty_task_id_fails_with_invalid_provenance() {
    let (memory, _, _) = store();
    let result = memory.write(
        &WorkflowId::new("wf-1"),
        &json!({"note": "x"}),
        Provenance::new("", "step"),
        MemoryWriteOptions::default(),
    );
    assert!(matches!(result, Err(MemoryError::InvalidProvenance)));
}

#[test]
fn empty_step_id_fails_with_invalid_provenance() {
    let (memory, _, _) = store();
    let result = memory.write(
        &WorkflowId::new("wf-1"),
        &json!({"note": "x"}),
        Provenance::new("task", ""),
        MemoryWriteOptions::default(),
    );
    assert!(matches!(result, Err(MemoryError::InvalidProvenance)));
}

#[test]
fn content_is_deep_copied_on_write() {
    let (memory, _, _) = store();
    let mut content = json!({"counter": 1});
    let entry = memory
        .write(
            &WorkflowId::new("wf-1"),
            &content,
            Provenance::new("task", "step"),
            MemoryWriteOptions::default(),
        )
        .expect("write");
    // Mutating the caller's value must not affect the stored entry.
    content["counter"] = json!(999);
    let stored = memory.read(&MemoryFilter {
        workflow_id: Some(WorkflowId::new("wf-1")),
        ..MemoryFilter::default()
    });
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].content, json!({"counter": 1}));
    assert_eq!(stored[0].entry_id, entry.entry_id);
}

#[test]
fn every_write_appends_a_matching_audit_entry() {
    let (memory, _, audit) = store();
    let entry = memory
        .write(
            &WorkflowId::new("wf-1"),
            &json!({"note": "x"}),
            Provenance::new("task", "step"),
            MemoryWriteOptions::default(),
        )
        .expect("write");
    let entries = audit.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].seq, entry.source_audit_seq);
    assert_eq!(entries[0].action, "memory_write");
    assert_eq!(entries[0].provenance.task_id.as_str(), "task");
}

#[test]
fn filters_and_across_categories_or_across_tags() {
    let (memory, _, _) = store();
    let workflow = WorkflowId::new("wf-1");
    memory
        .write(
            &workflow,
            &json!(1),
            Provenance::new("t1", "s1"),
            MemoryWriteOptions::note_with_tags(vec!["alpha".to_string()]),
        )
        .expect("write");
    memory
        .write(
            &workflow,
            &json!(2),
            Provenance::new("t1", "s2"),
            MemoryWriteOptions::note_with_tags(vec!["beta".to_string()]),
        )
        .expect("write");
    memory
        .write(
            &workflow,
            &json!(3),
            Provenance::new("t2", "s3"),
            MemoryWriteOptions::note_with_tags(vec!["alpha".to_string(), "beta".to_string()]),
        )
        .expect("write");

    // Tags OR: alpha or beta matches all three.
    let any_tag = memory.read(&MemoryFilter {
        tags: vec!["alpha".to_string(), "beta".to_string()],
        ..MemoryFilter::default()
    });
    assert_eq!(any_tag.len(), 3);

    // Categories AND: task t1 AND tag alpha matches exactly one.
    let narrowed = memory.read(&MemoryFilter {
        task_id: Some("t1".to_string()),
        tags: vec!["alpha".to_string()],
        ..MemoryFilter::default()
    });
    assert_eq!(narrowed.len(), 1);
    assert_eq!(narrowed[0].content, json!(1));

    // No match is an empty vector, never null.
    let none = memory.read(&MemoryFilter {
        task_id: Some("ghost".to_string()),
        ..MemoryFilter::default()
    });
    assert!(none.is_empty());
}

#[test]
fn timeline_returns_ascending_timestamps() {
    let (memory, clock, _) = store();
    let workflow = WorkflowId::new("wf-1");
    for index in 0..4 {
        memory
            .write(
                &workflow,
                &json!({"index": index}),
                Provenance::new("task", "step"),
                MemoryWriteOptions::default(),
            )
            .expect("write");
        clock.advance_millis(10);
    }
    let timeline = memory.timeline(&workflow);
    assert_eq!(timeline.len(), 4);
    for pair in timeline.windows(2) {
        assert!(pair[0].created_at <= pair[1].created_at);
    }
    for (index, entry) in timeline.iter().enumerate() {
        assert_eq!(entry.content, json!({"index": index}));
    }
}

#[test]
fn mark_verified_is_idempotent_and_checks_kind() {
    let (memory, _, _) = store();
    let workflow = WorkflowId::new("wf-1");
    let note = memory
        .write(
            &workflow,
            &json!({"n": 1}),
            Provenance::new("task", "step"),
            MemoryWriteOptions::default(),
        )
        .expect("write note");
    let snapshot = memory
        .write(
            &workflow,
            &json!({"state": "good"}),
            Provenance::new("task", "step"),
            MemoryWriteOptions::snapshot(),
        )
        .expect("write snapshot");

    assert!(memory.mark_verified(&snapshot.entry_id).is_ok());
    assert!(memory.mark_verified(&snapshot.entry_id).is_ok(), "idempotent");
    assert!(matches!(
        memory.mark_verified(&note.entry_id),
        Err(MemoryError::NotSnapshot(_))
    ));
    assert!(matches!(
        memory.mark_verified(&MemoryEntryId::new("mem-999")),
        Err(MemoryError::NotFound(_))
    ));
}

#[test]
fn latest_verified_snapshot_picks_the_most_recent() {
    let (memory, clock, _) = store();
    let workflow = WorkflowId::new("wf-1");
    let first = memory
        .write(
            &workflow,
            &json!({"gen": 1}),
            Provenance::new("task", "step"),
            MemoryWriteOptions::snapshot(),
        )
        .expect("write");
    clock.advance_millis(10);
    let second = memory
        .write(
            &workflow,
            &json!({"gen": 2}),
            Provenance::new("task", "step"),
            MemoryWriteOptions::snapshot(),
        )
        .expect("write");
    clock.advance_millis(10);
    let unverified = memory
        .write(
            &workflow,
            &json!({"gen": 3}),
            Provenance::new("task", "step"),
            MemoryWriteOptions::snapshot(),
        )
        .expect("write");

    assert!(memory.latest_verified_snapshot(&workflow).is_none());
    memory.mark_verified(&first.entry_id).expect("verify first");
    memory.mark_verified(&second.entry_id).expect("verify second");

    let latest = memory.latest_verified_snapshot(&workflow).expect("latest");
    assert_eq!(latest.entry_id, second.entry_id);
    assert_ne!(latest.entry_id, unverified.entry_id);
    assert_eq!(latest.kind, MemoryEntryKind::Snapshot);
    assert!(latest.verified);
}
