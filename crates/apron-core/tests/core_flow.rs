use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs;

use apron_core::board::JobBoard;
use apron_core::classify::PriorityKey;
use apron_core::datastore::DataStore;
use apron_core::filter::{FilterSpec, StatusFilter, filter_jobs};
use apron_core::response::normalize_response_str;
use apron_core::task::View;
use apron_core::tree::{ParentResolution, TreeOptions, build_tree, build_tree_with, flatten};
use chrono::{TimeZone, Utc};
use tempfile::tempdir;

const PAYLOAD: &str = r#"{
  "success": true,
  "data": {
    "tasks": [
      { "id": 10, "title": "Turnaround VN210", "priority": "URGENT", "status": "IN_PROGRESS",
        "hierarchyLevel": 0, "createdAt": "2025-03-09T01:00:00Z",
        "assignments": [{ "recipientType": "TEAM", "recipientId": "ramp",
                          "assignedAt": "2025-03-09T02:00:00Z", "dueAt": "2025-03-09T05:00:00Z",
                          "status": "ACCEPTED" }] },
      { "id": 11, "parentId": 10, "title": "Refuel", "hierarchyLevel": 1 },
      { "id": 12, "parentId": 11, "title": "Fuel slip", "hierarchyLevel": 2 },
      { "id": 20, "title": "Tow to stand 4", "priority": "Thấp", "status": "Đã hoàn thành",
        "hierarchyLevel": 0, "createdAt": "2025-03-01T08:00:00Z" },
      { "id": 30, "parentId": 999, "title": "Orphaned check", "hierarchyLevel": 1,
        "createdAt": "2025-03-09T09:00:00Z" }
    ],
    "totalCount": 5,
    "metadata": { "type": "received" }
  }
}"#;

#[test]
fn snapshot_tree_and_filter_flow() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");

    let response = normalize_response_str(PAYLOAD).expect("normalize payload");
    store
        .save_snapshot(View::Received, &response)
        .expect("save snapshot");
    let loaded = store
        .load_snapshot(View::Received)
        .expect("load snapshot")
        .expect("snapshot present");
    assert_eq!(loaded.tasks.len(), 5);

    let forest = build_tree(loaded.tasks.clone());
    let roots: Vec<&str> = forest.iter().map(|node| node.id().as_str()).collect();
    assert_eq!(roots, vec!["10", "20"]);
    assert_eq!(forest[1].subtasks[0].id().as_str(), "30");

    let strict = build_tree_with(
        loaded.tasks.clone(),
        TreeOptions {
            parent_resolution: ParentResolution::Strict,
        },
    );
    let strict_roots: Vec<&str> = strict.iter().map(|node| node.id().as_str()).collect();
    assert_eq!(strict_roots, vec!["10", "20", "30"]);

    let mut flat: Vec<String> = flatten(&forest)
        .into_iter()
        .map(|node| node.id().to_string())
        .collect();
    flat.sort();
    let mut input: Vec<String> = loaded.tasks.iter().map(|task| task.id.to_string()).collect();
    input.sort();
    assert_eq!(flat, input);

    let now = Utc
        .with_ymd_and_hms(2025, 3, 10, 0, 0, 0)
        .single()
        .expect("valid time");

    let overdue = filter_jobs(
        &forest,
        &FilterSpec {
            status: Some(StatusFilter::Overdue),
            as_of: Some(now),
            ..FilterSpec::default()
        },
    );
    assert_eq!(overdue.len(), 1);
    assert_eq!(overdue[0].descendant_count(), 2);

    let low_or_urgent = FilterSpec {
        priorities: BTreeSet::from([PriorityKey::Low, PriorityKey::Urgent]),
        ..FilterSpec::default()
    };
    let picked = filter_jobs(&forest, &low_or_urgent);
    let picked_ids: Vec<&str> = picked.iter().map(|node| node.id().as_str()).collect();
    assert_eq!(picked_ids, vec!["10", "20"]);
    assert_eq!(filter_jobs(&picked, &low_or_urgent), picked);
}

#[test]
fn board_discards_results_for_previous_view() {
    let response = normalize_response_str(PAYLOAD).expect("normalize payload");
    let mut board = JobBoard::new(View::Received);

    let in_flight = board.begin_fetch();
    board.switch_view(View::Created);
    assert!(!board.apply(in_flight, response.clone()));

    let current = board.begin_fetch();
    assert!(board.apply(current, response));
    assert_eq!(board.forest().len(), 2);
    assert_eq!(board.total_count(), 5);
    assert_eq!(board.visible().len(), 2);
}

#[test]
fn cli_lists_jobs_from_saved_payload() {
    let temp = tempdir().expect("tempdir");
    let payload = temp.path().join("payload.json");
    fs::write(&payload, PAYLOAD).expect("write payload");

    let args: Vec<OsString> = [
        "apron",
        "--apronrc",
        "/dev/null",
        "--data",
        temp.path().join("data").to_str().expect("utf8 path"),
        "rc.color=off",
        "jobs",
        "--view",
        "received",
        "--input",
        payload.to_str().expect("utf8 path"),
        "--priority",
        "urgent",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();

    apron_core::run(args).expect("run jobs");
    assert!(temp.path().join("data").is_dir());
}
