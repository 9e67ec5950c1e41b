//! Append-only behaviour of the ledger under concurrent writers.

#![allow(unused_results)]

use std::sync::Arc;
use std::thread;

use herald_core::{Channel, DeliveryStatus, ImpactTier, NewLedgerRecord, TaskId};
use herald_ledger::{AppendOutcome, ConnectionConfig, DeliveryLedger};

fn record(event: &str, channel: Channel) -> NewLedgerRecord {
    NewLedgerRecord {
        task_id: TaskId::for_event(&event.into(), channel),
        event_id: event.into(),
        channel,
        tier: Some(ImpactTier::Medium),
        status: DeliveryStatus::Delivered,
        attempts: 1,
        reason: None,
        content_hash: format!("hash-{event}"),
        detail: serde_json::json!({ "eventId": event }),
    }
}

#[test]
fn concurrent_appends_are_linearized() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(
        DeliveryLedger::open(dir.path().join("ledger.db"), &ConnectionConfig::default()).unwrap(),
    );

    // Eight writers; every task is appended by two of them.
    let handles: Vec<_> = (0..8)
        .map(|writer| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                let mut appended = 0;
                for i in 0..20 {
                    let event = format!("evt-{}-{i}", writer % 4);
                    match ledger.append(&record(&event, Channel::Ledger)).unwrap() {
                        AppendOutcome::Appended(_) => appended += 1,
                        AppendOutcome::AlreadyDelivered(_) => {}
                    }
                }
                appended
            })
        })
        .collect();
    let appended: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(appended, 80);
    assert_eq!(ledger.record_count().unwrap(), 80);

    let mut records = ledger.recent(1_000).unwrap();
    records.reverse();
    for pair in records.windows(2) {
        assert!(pair[0].sequence < pair[1].sequence);
        assert!(pair[0].appended_at_ms <= pair[1].appended_at_ms);
    }
}

#[test]
fn records_cannot_be_modified_or_removed() {
    let dir = tempfile::tempdir().unwrap();
    let ledger =
        DeliveryLedger::open(dir.path().join("ledger.db"), &ConnectionConfig::default()).unwrap();
    let before = ledger.append(&record("p1", Channel::Sms)).unwrap();

    let conn = ledger.pool().get().unwrap();
    assert!(conn.execute("UPDATE ledger_records SET status = 'abandoned'", []).is_err());
    assert!(conn.execute("DELETE FROM ledger_records", []).is_err());
    drop(conn);

    let after = ledger.query(&"p1".into()).unwrap();
    assert_eq!(after, vec![before.record().clone()]);
}

#[test]
fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    {
        let ledger = DeliveryLedger::open(&path, &ConnectionConfig::default()).unwrap();
        ledger.append(&record("p1", Channel::Ledger)).unwrap();
    }
    let reopened = DeliveryLedger::open(&path, &ConnectionConfig::default()).unwrap();
    let again = reopened.append(&record("p1", Channel::Ledger)).unwrap();
    assert!(matches!(again, AppendOutcome::AlreadyDelivered(_)));
    assert_eq!(reopened.record_count().unwrap(), 1);
}
