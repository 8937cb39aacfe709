use chrono::{Duration, Utc};
use embermon_common::types::RuleKey;
use std::collections::HashMap;
use tempfile::TempDir;

use crate::store::StateStore;
use crate::{AlertInstanceRow, InstanceQuery, InstanceReader, InstanceStore};

async fn setup() -> (TempDir, StateStore) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("instances.db");
    let url = format!("sqlite://{}?mode=rwc", path.display());
    let store = StateStore::new(&url).await.unwrap();
    (dir, store)
}

fn make_row(org: i64, uid: &str, hash: &str, state: &str, eval_secs_ago: i64) -> AlertInstanceRow {
    let eval_time = Utc::now() - Duration::seconds(eval_secs_ago);
    let mut labels = HashMap::new();
    labels.insert("alertname".to_string(), format!("rule-{uid}"));
    labels.insert("host".to_string(), format!("host-{hash}"));
    AlertInstanceRow {
        rule_org_id: org,
        rule_uid: uid.to_string(),
        labels,
        labels_hash: hash.to_string(),
        current_state: state.to_string(),
        current_reason: None,
        current_state_since: eval_time,
        current_state_end: eval_time + Duration::seconds(20),
        last_eval_time: eval_time,
        last_sent_at: None,
        resolved_at: None,
        result_fingerprint: Some("0000000000000001".to_string()),
    }
}

#[tokio::test]
async fn upsert_and_list_round_trip() {
    let (_dir, store) = setup().await;

    let row = make_row(1, "rule-a", "aaaa", "Alerting", 10);
    store.upsert_instance(row.clone()).await.unwrap();

    let listed = store.list_instances(&InstanceQuery::org(1)).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].rule_uid, "rule-a");
    assert_eq!(listed[0].labels_hash, "aaaa");
    assert_eq!(listed[0].current_state, "Alerting");
    assert_eq!(listed[0].labels.get("host").unwrap(), "host-aaaa");
}

#[tokio::test]
async fn upsert_updates_existing_key_in_place() {
    let (_dir, store) = setup().await;

    store
        .upsert_instance(make_row(1, "rule-a", "aaaa", "Pending", 20))
        .await
        .unwrap();
    let mut updated = make_row(1, "rule-a", "aaaa", "Alerting", 10);
    updated.current_reason = Some("Error".to_string());
    store.upsert_instance(updated).await.unwrap();

    let listed = store.list_instances(&InstanceQuery::org(1)).await.unwrap();
    assert_eq!(listed.len(), 1, "upsert must not duplicate the key");
    assert_eq!(listed[0].current_state, "Alerting");
    assert_eq!(listed[0].current_reason.as_deref(), Some("Error"));
}

#[tokio::test]
async fn list_scoped_to_one_rule() {
    let (_dir, store) = setup().await;

    store
        .upsert_instance(make_row(1, "rule-a", "aaaa", "Alerting", 10))
        .await
        .unwrap();
    store
        .upsert_instance(make_row(1, "rule-b", "bbbb", "Normal", 10))
        .await
        .unwrap();

    let key = RuleKey::new(1, "rule-a");
    let listed = store
        .list_instances(&InstanceQuery::rule(&key))
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].rule_uid, "rule-a");
}

#[tokio::test]
async fn delete_instances_by_hashes() {
    let (_dir, store) = setup().await;
    let key = RuleKey::new(1, "rule-a");

    for hash in ["aaaa", "bbbb", "cccc"] {
        store
            .upsert_instance(make_row(1, "rule-a", hash, "Alerting", 10))
            .await
            .unwrap();
    }

    let removed = store
        .delete_instances(&key, &["aaaa".to_string(), "cccc".to_string()])
        .await
        .unwrap();
    assert_eq!(removed, 2);

    let listed = store.list_instances(&InstanceQuery::org(1)).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].labels_hash, "bbbb");

    // Empty hash list is a no-op, not a delete-all
    let removed = store.delete_instances(&key, &[]).await.unwrap();
    assert_eq!(removed, 0);
}

#[tokio::test]
async fn delete_rule_instances_removes_whole_rule() {
    let (_dir, store) = setup().await;

    store
        .upsert_instance(make_row(1, "rule-a", "aaaa", "Alerting", 10))
        .await
        .unwrap();
    store
        .upsert_instance(make_row(1, "rule-a", "bbbb", "Pending", 10))
        .await
        .unwrap();
    store
        .upsert_instance(make_row(1, "rule-b", "cccc", "Normal", 10))
        .await
        .unwrap();

    let removed = store
        .delete_rule_instances(&RuleKey::new(1, "rule-a"))
        .await
        .unwrap();
    assert_eq!(removed, 2);

    let listed = store.list_instances(&InstanceQuery::org(1)).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].rule_uid, "rule-b");
}

#[tokio::test]
async fn replace_all_swaps_the_entire_snapshot() {
    let (_dir, store) = setup().await;

    store
        .upsert_instance(make_row(1, "rule-a", "aaaa", "Alerting", 30))
        .await
        .unwrap();
    store
        .upsert_instance(make_row(2, "rule-x", "xxxx", "Pending", 30))
        .await
        .unwrap();

    store
        .replace_all_instances(vec![make_row(1, "rule-a", "dddd", "Normal", 5)])
        .await
        .unwrap();

    assert!(store
        .list_instances(&InstanceQuery::org(2))
        .await
        .unwrap()
        .is_empty());
    let listed = store.list_instances(&InstanceQuery::org(1)).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].labels_hash, "dddd");
}

#[tokio::test]
async fn replace_rule_leaves_other_rules_alone() {
    let (_dir, store) = setup().await;

    store
        .upsert_instance(make_row(1, "rule-a", "aaaa", "Alerting", 30))
        .await
        .unwrap();
    store
        .upsert_instance(make_row(1, "rule-b", "bbbb", "Normal", 30))
        .await
        .unwrap();

    let key = RuleKey::new(1, "rule-a");
    store
        .replace_rule_instances(
            &key,
            vec![
                make_row(1, "rule-a", "eeee", "Pending", 5),
                make_row(1, "rule-a", "ffff", "Alerting", 5),
            ],
        )
        .await
        .unwrap();

    let rule_a = store
        .list_instances(&InstanceQuery::rule(&key))
        .await
        .unwrap();
    assert_eq!(rule_a.len(), 2);
    assert!(rule_a.iter().all(|r| r.labels_hash != "aaaa"));

    let rule_b = store
        .list_instances(&InstanceQuery::rule(&RuleKey::new(1, "rule-b")))
        .await
        .unwrap();
    assert_eq!(rule_b.len(), 1);
}

#[tokio::test]
async fn rule_uid_and_org_listings_are_distinct() {
    let (_dir, store) = setup().await;

    store
        .upsert_instance(make_row(1, "rule-a", "aaaa", "Alerting", 10))
        .await
        .unwrap();
    store
        .upsert_instance(make_row(1, "rule-a", "bbbb", "Pending", 10))
        .await
        .unwrap();
    store
        .upsert_instance(make_row(1, "rule-b", "cccc", "Normal", 10))
        .await
        .unwrap();
    store
        .upsert_instance(make_row(2, "rule-x", "xxxx", "Alerting", 10))
        .await
        .unwrap();

    let uids = store.list_rule_uids_with_instances(1).await.unwrap();
    assert_eq!(uids, vec!["rule-a".to_string(), "rule-b".to_string()]);

    let orgs = store.list_org_ids_with_instances().await.unwrap();
    assert_eq!(orgs, vec![1, 2]);
}
