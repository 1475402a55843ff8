// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session tracker seen from the outside: the snapshot file and concurrent use.

use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use agent_fleet::fleet::{read_snapshot, ActiveSession, BackendKind, RepoTask, SessionTracker};

fn session(repo: usize, backend: BackendKind) -> ActiveSession {
    let task = RepoTask::new(format!("/fleet/repo-{repo}"), format!("repo-{repo}"), format!("T-{repo}"), "Work");
    ActiveSession::for_task(&task, backend)
}

#[test]
fn test_snapshot_wire_format() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("sessions.json");
    let tracker = SessionTracker::new(&path);
    tracker.register_session(session(1, BackendKind::ApiBackend));

    let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert!(raw["updatedAt"].is_string());
    let entry = &raw["sessions"][0];
    assert_eq!(entry["repoPath"], "/fleet/repo-1");
    assert_eq!(entry["repoName"], "repo-1");
    assert_eq!(entry["taskId"], "T-1");
    assert_eq!(entry["taskTitle"], "Work");
    assert_eq!(entry["backend"], "apiBackend");
    assert!(entry["startedAt"].is_string());
}

#[test]
fn test_observer_never_sees_torn_snapshot() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("sessions.json");
    let tracker = Arc::new(SessionTracker::new(&path));
    tracker.register_session(session(0, BackendKind::ProcessBackend));

    let writers: Vec<_> = (1..5)
        .map(|w| {
            let tracker = tracker.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    let repo = w * 100 + i;
                    tracker.register_session(session(repo, BackendKind::ProcessBackend));
                    tracker.deregister_session(&format!("/fleet/repo-{repo}"));
                }
            })
        })
        .collect();

    let reader_path = path.clone();
    let reader = thread::spawn(move || {
        for _ in 0..200 {
            let snapshot = read_snapshot(&reader_path).expect("snapshot is always complete");
            assert!(snapshot.sessions.iter().any(|s| s.repo_path == "/fleet/repo-0"));
        }
    });

    for writer in writers {
        writer.join().unwrap();
    }
    reader.join().unwrap();

    let snapshot = read_snapshot(&path).unwrap();
    assert_eq!(snapshot.sessions.len(), 1);
    assert_eq!(tracker.active_sessions().len(), 1);
}

#[test]
fn test_one_session_per_repository_under_contention() {
    let tracker = Arc::new(SessionTracker::in_memory());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let tracker = tracker.clone();
            thread::spawn(move || {
                for repo in 0..20 {
                    tracker.register_session(session(repo, BackendKind::ApiBackend));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(tracker.active_sessions().len(), 20);
}

#[test]
fn test_clear_empties_snapshot() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("nested").join("sessions.json");
    let tracker = SessionTracker::new(&path);
    tracker.register_session(session(1, BackendKind::ProcessBackend));
    tracker.register_session(session(2, BackendKind::ApiBackend));

    // A second tracker over the same file starts by discarding stale state.
    let restarted = SessionTracker::new(&path);
    restarted.clear_stale_sessions();

    let snapshot = read_snapshot(&path).unwrap();
    assert!(snapshot.sessions.is_empty());
}

#[test]
fn test_missing_snapshot_reads_as_none() {
    let temp = TempDir::new().unwrap();
    assert!(read_snapshot(&temp.path().join("absent.json")).is_none());
}
