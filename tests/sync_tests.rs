mod support;

use rostersync::import::{ImportContext, ImportRecord};
use rostersync::remote::{FieldValue, RemoteError};
use rostersync::sync::{ConflictSelection, SyncService};
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use support::{detail_table, fields, harness, mock_remote, parent_table};

fn record(key: &str, name: &str, phone: Option<&str>, attributes: &[(&str, &str)]) -> ImportRecord {
    ImportRecord {
        natural_key: key.to_string(),
        display_name: name.to_string(),
        phone: phone.map(str::to_string),
        attributes: attributes
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
        category: "Course A".to_string(),
        reference_date: "2024-01-15".to_string(),
    }
}

#[tokio::test]
async fn test_new_entity_created_with_normalized_phone() {
    let h = harness(mock_remote());
    let payload = "user_id,nickname,phone,course,learning_date\nu1,Alice,138-0000-0000,Course A,2024-01-15\n";

    let outcome = h
        .orchestrator
        .sync(payload.as_bytes(), "roster.csv", &ImportContext::default())
        .await;

    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.summary.created, 1);
    assert_eq!(outcome.summary.updated, 0);
    assert_eq!(outcome.summary.linked, 1);
    assert!(!outcome.summary.has_conflicts);

    let parents = h.remote.records(&parent_table());
    assert_eq!(parents.len(), 1);
    assert_eq!(parents[0].fields["phone"], FieldValue::text("13800000000"));
    assert_eq!(parents[0].fields["nickname"], FieldValue::text("Alice"));

    let details = h.remote.records(&detail_table());
    assert_eq!(details.len(), 1);
    assert_eq!(
        details[0].fields["student"],
        FieldValue::Links(vec![parents[0].record_id.clone()])
    );
    assert_eq!(details[0].fields["course"], FieldValue::text("Course A"));
}

#[tokio::test]
async fn test_rerun_is_idempotent_for_parents() {
    let h = harness(mock_remote());
    let records = vec![record("u1", "Alice", Some("13800000000"), &[("city", "Beijing")])];

    let first = h.orchestrator.sync_records(&records).await;
    assert_eq!(first.summary.created, 1);

    let second = h.orchestrator.sync_records(&records).await;
    assert!(second.success);
    assert_eq!(second.summary.created, 0);
    assert_eq!(second.summary.updated, 0);
    assert_eq!(second.summary.processed_records, 1);
    assert!(!second.summary.has_conflicts);

    assert_eq!(h.remote.records(&parent_table()).len(), 1);
    assert_eq!(h.remote.update_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_conflicting_value_is_reported_not_written() {
    let remote = mock_remote();
    let record_id = remote.seed(
        &parent_table(),
        fields(&[("user_id", "u1"), ("nickname", "Alice"), ("city", "Shanghai")]),
    );
    let h = harness(remote);

    let outcome = h
        .orchestrator
        .sync_records(&[record("u1", "Alice", None, &[("city", "Beijing")])])
        .await;

    assert!(outcome.success);
    assert!(outcome.summary.has_conflicts);
    let conflicts = outcome.summary.conflicts();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].field_name, "city");
    assert_eq!(conflicts[0].existing_value, FieldValue::text("Shanghai"));
    assert_eq!(conflicts[0].new_value, FieldValue::text("Beijing"));

    let stored = h.remote.record(&parent_table(), &record_id).unwrap();
    assert_eq!(stored.fields["city"], FieldValue::text("Shanghai"));
    assert_eq!(h.remote.update_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_empty_remote_fields_are_filled() {
    let remote = mock_remote();
    let record_id = remote.seed(
        &parent_table(),
        fields(&[("user_id", "u1"), ("nickname", "Alice"), ("city", "")]),
    );
    let h = harness(remote);

    let outcome = h
        .orchestrator
        .sync_records(&[record("u1", "Alice", None, &[("city", "Beijing"), ("Age", "30.7")])])
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.summary.updated, 1);
    assert_eq!(outcome.summary.created, 0);

    let stored = h.remote.record(&parent_table(), &record_id).unwrap();
    assert_eq!(stored.fields["city"], FieldValue::text("Beijing"));
    assert_eq!(stored.fields["age"], FieldValue::Int(30));
}

#[tokio::test]
async fn test_rows_sharing_a_key_merge_into_one_parent() {
    let h = harness(mock_remote());
    let records = vec![
        record("u1", "Alice", None, &[]),
        record("u1", "Alice", Some("13900000000"), &[("city", "Beijing")]),
    ];

    let outcome = h.orchestrator.sync_records(&records).await;

    assert!(outcome.success);
    assert_eq!(outcome.summary.created, 1);
    assert_eq!(outcome.summary.linked, 2);

    let parents = h.remote.records(&parent_table());
    assert_eq!(parents.len(), 1);
    assert_eq!(parents[0].fields["phone"], FieldValue::text("13900000000"));
    assert_eq!(parents[0].fields["city"], FieldValue::text("Beijing"));
    assert_eq!(h.remote.records(&detail_table()).len(), 2);
}

#[tokio::test]
async fn test_cache_reflects_created_entity_without_remote_reads() {
    let h = harness(mock_remote());

    h.orchestrator
        .sync_records(&[record("u1", "Alice", None, &[])])
        .await;
    let queries = h.remote.query_calls.load(Ordering::SeqCst);

    let cached = h.cache.get("u1").await.unwrap();
    let parents = h.remote.records(&parent_table());
    assert_eq!(cached.record_id, parents[0].record_id);
    assert_eq!(h.remote.query_calls.load(Ordering::SeqCst), queries);

    // Second run reads from the in-memory cache
    h.orchestrator
        .sync_records(&[record("u1", "Alice", None, &[])])
        .await;
    assert_eq!(h.remote.query_calls.load(Ordering::SeqCst), queries);
    assert!(h.store.has_snapshot());
}

#[tokio::test]
async fn test_resolve_conflicts_applies_selected_value() {
    let remote = mock_remote();
    let record_id = remote.seed(
        &parent_table(),
        fields(&[("user_id", "u1"), ("nickname", "Alice"), ("city", "Shanghai")]),
    );
    let h = harness(remote);

    let outcome = h
        .orchestrator
        .sync_records(&[record("u1", "Alice", None, &[("city", "Beijing")])])
        .await;
    let selections: Vec<ConflictSelection> = outcome
        .summary
        .conflicts()
        .iter()
        .map(ConflictSelection::from)
        .collect();

    let resolution = h.orchestrator.resolve_conflicts(&selections).await.unwrap();

    assert_eq!(resolution.updated_count, 1);
    assert_eq!(resolution.failed_count, 0);
    let stored = h.remote.record(&parent_table(), &record_id).unwrap();
    assert_eq!(stored.fields["city"], FieldValue::text("Beijing"));
    assert_eq!(
        h.cache.get("u1").await.unwrap().fields["city"],
        FieldValue::text("Beijing")
    );
}

#[tokio::test]
async fn test_resolve_unknown_key_counts_failure() {
    let h = harness(mock_remote());

    let resolution = h
        .orchestrator
        .resolve_conflicts(&[ConflictSelection {
            natural_key: "ghost".to_string(),
            field_name: "city".to_string(),
            new_value: FieldValue::text("Beijing"),
        }])
        .await
        .unwrap();

    assert_eq!(resolution.updated_count, 0);
    assert_eq!(resolution.failed_count, 1);
    assert_eq!(resolution.errors, vec!["ghost not found".to_string()]);
}

#[tokio::test]
async fn test_auth_failure_fails_the_run() {
    let remote = mock_remote();
    remote.fail_auth(true);
    let h = harness(remote);

    let outcome = h
        .orchestrator
        .sync_records(&[record("u1", "Alice", None, &[])])
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.message, "Authentication failed: invalid app secret");
    assert_eq!(outcome.summary.created, 0);
}

#[tokio::test]
async fn test_no_import_data_fails() {
    let h = harness(mock_remote());

    let outcome = h.orchestrator.sync_records(&[]).await;

    assert!(!outcome.success);
    assert_eq!(outcome.message, "No import data");
    assert_eq!(h.remote.remote_calls(), 0);
}

#[tokio::test]
async fn test_schema_failure_is_recorded_and_run_continues() {
    let remote = mock_remote();
    remote.fail_schema(true);
    let h = harness(remote);

    let outcome = h
        .orchestrator
        .sync_records(&[record("u1", "Alice", Some("13800000000"), &[("city", "Beijing")])])
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.summary.created, 1);
    assert_eq!(outcome.summary.error_count, 1);

    // Without a schema only the key, name and the pre-resolved phone are written
    let parents = h.remote.records(&parent_table());
    assert!(!parents[0].fields.contains_key("city"));
    assert_eq!(parents[0].fields["phone"], FieldValue::text("13800000000"));
}

#[tokio::test]
async fn test_invalid_rows_become_warnings() {
    let h = harness(mock_remote());
    let payload = "user_id,nickname\nu1,Alice\n,Nobody\n";

    let outcome = h
        .orchestrator
        .sync(payload.as_bytes(), "roster.csv", &ImportContext::default())
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.summary.created, 1);
    assert!(outcome
        .summary
        .warnings
        .iter()
        .any(|w| w.starts_with("Row 2 skipped")));
}

#[tokio::test]
async fn test_service_wraps_outcomes_in_envelopes() {
    let remote = mock_remote();
    let h = harness(remote);
    let service = SyncService::new(Arc::new(h.orchestrator));

    let empty = service.resolve_conflicts(&[]).await;
    assert!(!empty.success);
    assert_eq!(empty.message, "No conflicts selected");

    let checks = service.check_tables().await;
    assert!(checks.success);
    let tables = checks.data.unwrap();
    assert_eq!(tables.len(), 2);
    assert_eq!(tables[0].role, "parent");
    assert_eq!(tables[0].field_count, 5);

    let refreshed = service.cache_refresh().await;
    assert!(refreshed.success);
    assert!(refreshed.data.unwrap().loaded);

    let cleared = service.cache_clear().await;
    assert!(cleared.success);
    assert!(!cleared.data.unwrap().loaded);
}

fn selection(key: &str, field: &str, value: &str) -> ConflictSelection {
    ConflictSelection {
        natural_key: key.to_string(),
        field_name: field.to_string(),
        new_value: FieldValue::text(value),
    }
}

#[tokio::test]
async fn test_failed_create_only_affects_its_entity() {
    let remote = mock_remote();
    remote.fail_create_for("bad");
    let h = harness(remote);

    let outcome = h
        .orchestrator
        .sync_records(&[
            record("u1", "Alice", None, &[]),
            record("bad", "Mallory", None, &[]),
        ])
        .await;

    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.summary.created, 1);
    assert_eq!(outcome.summary.processed_records, 1);
    assert_eq!(outcome.summary.linked, 1);
    assert_eq!(outcome.summary.error_count, 1);
    assert!(outcome.summary.errors[0].starts_with("Failed to create bad"));
    assert!(outcome
        .summary
        .warnings
        .contains(&"bad has no resolved parent record, detail row skipped".to_string()));

    assert_eq!(h.remote.records(&parent_table()).len(), 1);
    assert_eq!(h.remote.records(&detail_table()).len(), 1);
    assert!(h.cache.get("bad").await.is_none());
}

#[tokio::test]
async fn test_failed_update_still_links_detail_row() {
    let remote = mock_remote();
    let record_id = remote.seed(
        &parent_table(),
        fields(&[("user_id", "u1"), ("nickname", "Alice"), ("city", "")]),
    );
    remote.fail_update_for(&record_id);
    let h = harness(remote);

    let outcome = h
        .orchestrator
        .sync_records(&[record("u1", "Alice", None, &[("city", "Beijing")])])
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.summary.updated, 0);
    assert_eq!(outcome.summary.processed_records, 0);
    assert_eq!(outcome.summary.linked, 1);
    assert_eq!(outcome.summary.error_count, 1);
    assert!(outcome.summary.errors[0].starts_with("Failed to update u1"));

    let stored = h.remote.record(&parent_table(), &record_id).unwrap();
    assert_eq!(stored.fields["city"], FieldValue::text(""));
    assert_eq!(
        h.cache.get("u1").await.unwrap().fields["city"],
        FieldValue::text("")
    );
}

#[tokio::test]
async fn test_resolve_finds_uncached_key_by_scanning() {
    let remote = mock_remote();
    remote.seed(&parent_table(), fields(&[("user_id", "u0"), ("nickname", "Zed")]));
    let record_id = remote.seed(
        &parent_table(),
        fields(&[("user_id", "u1"), ("nickname", "Alice"), ("city", "Shanghai")]),
    );
    let h = harness(remote);
    assert!(h.cache.get("u1").await.is_none());

    let resolution = h
        .orchestrator
        .resolve_conflicts(&[selection("u1", "city", "Beijing")])
        .await
        .unwrap();

    assert_eq!(resolution.updated_count, 1);
    assert_eq!(resolution.failed_count, 0);
    assert!(h.remote.query_calls.load(Ordering::SeqCst) >= 1);
    let stored = h.remote.record(&parent_table(), &record_id).unwrap();
    assert_eq!(stored.fields["city"], FieldValue::text("Beijing"));
    assert_eq!(
        h.cache.get("u1").await.unwrap().fields["city"],
        FieldValue::text("Beijing")
    );
}

#[tokio::test]
async fn test_resolve_stops_at_auth_failure() {
    let remote = mock_remote();
    remote.fail_auth(true);
    let h = harness(remote);

    let result = h
        .orchestrator
        .resolve_conflicts(&[
            selection("u1", "city", "Beijing"),
            selection("u2", "city", "Beijing"),
            selection("u3", "city", "Beijing"),
        ])
        .await;

    assert!(matches!(result, Err(RemoteError::Auth(_))));
    assert_eq!(h.remote.remote_calls(), 1);
}

#[tokio::test]
async fn test_service_reports_auth_failure_on_resolve() {
    let remote = mock_remote();
    remote.fail_auth(true);
    let h = harness(remote);
    let service = SyncService::new(Arc::new(h.orchestrator));

    let envelope = service
        .resolve_conflicts(&[selection("u1", "city", "Beijing")])
        .await;

    assert!(!envelope.success);
    assert_eq!(envelope.message, "Authentication failed: invalid app secret");
    assert!(envelope.data.is_none());
}
