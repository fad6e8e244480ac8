mod common;

use mailproc_ingest::{CommitMode, IngestError, IngestOutcome, Ingestor};
use mailproc_store::claim::ClaimToken;
use mailproc_store::record::ProcessingStatus;
use mailproc_store::storage::in_memory::MemDb;
use mailproc_store::time::now_msec;

use crate::common::constants::*;
use crate::common::*;

#[tokio::test]
async fn metadata_is_extracted() {
    let db = MemDb::new();
    let ingestor = pipeline(&db, CommitMode::Atomic).await;
    let event = deliver(&db, "ses-0001", EMAIL1);

    let outcome = ingestor.ingest(&event).await.unwrap();
    assert_eq!(
        outcome,
        IngestOutcome::Committed {
            message_id: EMAIL1_ID.to_string()
        }
    );

    let records = db.records();
    assert_eq!(records.len(), 1);
    let rec = &records[0];
    assert_eq!(rec.message_id, EMAIL1_ID);
    assert!(!rec.fallback_id);
    assert_eq!(rec.from, "bob@example.tld");
    assert_eq!(rec.to, vec!["alice@example.tld"]);
    assert_eq!(rec.cc, vec!["PIRARD@vm1.ulg.ac.be"]);
    assert!(rec.subject.starts_with("If you can read this yo"));
    assert_eq!(
        rec.received_at.map(|d| d.to_rfc3339()),
        Some("2023-07-08T05:14:29+00:00".to_string())
    );
    assert_eq!(rec.size_bytes, EMAIL1.len() as u64);
    assert!(!rec.has_attachments);
    assert_eq!(rec.storage_key, "mail/ses-0001");
    assert_eq!(rec.delivery_id, "ses-0001");
    assert_eq!(rec.processing_status, ProcessingStatus::Complete);
    assert!(rec.processed_at.is_some());
    assert_eq!(rec.claim_token, None);
}

#[tokio::test]
async fn attachments_are_detected() {
    let db = MemDb::new();
    let ingestor = pipeline(&db, CommitMode::Atomic).await;
    let event = deliver(&db, "ses-0002", EMAIL_ATTACHMENT);

    ingestor.ingest(&event).await.unwrap();
    let rec = ingestor
        .repository()
        .get_status("report-42@example.com")
        .await
        .unwrap();
    assert!(rec.has_attachments);
    assert_eq!(rec.from, "reports@example.com");
    assert_eq!(rec.to, vec!["alice@example.tld", "bob@example.tld"]);
    assert_eq!(rec.cc, vec!["carol@example.tld"]);
    assert_eq!(
        rec.received_at.map(|d| d.to_rfc3339()),
        Some("2023-07-10T08:00:00+00:00".to_string())
    );
}

#[tokio::test]
async fn redelivery_is_a_noop() {
    for mode in [CommitMode::Atomic, CommitMode::TwoPhase] {
        let db = MemDb::new();
        let ingestor = pipeline(&db, mode).await;

        // SES may deliver the same message twice, under two object keys
        let first = deliver(&db, "ses-0001", EMAIL1);
        let second = deliver(&db, "ses-0002", EMAIL1);

        let outcome = ingestor.ingest(&first).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Committed { .. }));
        let before = db.records();

        let outcome = ingestor.ingest(&second).await.unwrap();
        assert_eq!(
            outcome,
            IngestOutcome::Duplicate {
                message_id: EMAIL1_ID.to_string()
            }
        );
        let outcome = ingestor.ingest(&first).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Duplicate { .. }));

        // the first write is left untouched
        assert_eq!(db.records(), before);
        assert_eq!(complete_records(&db).len(), 1);
    }
}

#[tokio::test]
async fn fallback_id_is_stable() {
    let db = MemDb::new();
    let ingestor = pipeline(&db, CommitMode::Atomic).await;

    let a = ingestor
        .ingest(&deliver(&db, "ses-0001", EMAIL2))
        .await
        .unwrap();
    let b = ingestor
        .ingest(&deliver(&db, "ses-0002", EMAIL2))
        .await
        .unwrap();

    assert!(a.message_id().starts_with("fallback-"));
    assert_eq!(a.message_id(), b.message_id());
    assert!(matches!(b, IngestOutcome::Duplicate { .. }));

    let records = db.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].fallback_id);
}

#[tokio::test]
async fn concurrent_deliveries_commit_once() {
    for mode in [CommitMode::Atomic, CommitMode::TwoPhase] {
        let db = MemDb::new();
        let ingestor = pipeline(&db, mode).await;

        let tasks = (0..16)
            .map(|i| {
                let ingestor = ingestor.clone();
                let event = deliver(&db, &format!("ses-{:04}", i), EMAIL_ATTACHMENT);
                tokio::spawn(async move { ingestor.ingest(&event).await })
            })
            .collect::<Vec<_>>();

        let mut committed = 0;
        for res in futures::future::join_all(tasks).await {
            match res.unwrap() {
                Ok(IngestOutcome::Committed { .. }) => committed += 1,
                Ok(IngestOutcome::Duplicate { .. }) => (),
                Err(IngestError::Contended(id)) => assert_eq!(id, "report-42@example.com"),
                Err(e) => panic!("unexpected failure: {}", e),
            }
        }

        assert_eq!(committed, 1);
        assert_eq!(db.records().len(), 1);
        assert_eq!(complete_records(&db).len(), 1);
    }
}

#[tokio::test]
async fn malformed_message_is_terminal() {
    let db = MemDb::new();
    let ingestor = pipeline(&db, CommitMode::Atomic).await;
    let event = deliver(&db, "ses-0001", EMAIL_NO_DELIMITER);

    let err = ingestor.ingest(&event).await.unwrap_err();
    assert!(matches!(err, IngestError::Malformed(_)));
    assert!(!err.is_retryable());
    assert!(db.records().is_empty());
}

#[tokio::test]
async fn missing_object_is_terminal() {
    let db = MemDb::new();
    let ingestor = pipeline(&db, CommitMode::TwoPhase).await;
    let event = mailproc_ingest::DeliveryEvent {
        storage_key: "mail/never-stored".into(),
        delivery_id: "never-stored".into(),
    };

    let err = ingestor.ingest(&event).await.unwrap_err();
    assert!(matches!(err, IngestError::ObjectMissing(ref k) if k == "mail/never-stored"));
    assert!(!err.is_retryable());
    assert!(db.records().is_empty());
}

#[tokio::test]
async fn claims_expire() {
    let db = MemDb::new();
    let ingestor = pipeline(&db, CommitMode::Atomic).await;
    let event = deliver(&db, "ses-0002", EMAIL_ATTACHMENT);

    // first delivery parsed the message then its invocation died
    let lease = common::config(CommitMode::Atomic).claim_lease;
    let crashed = |claimed_at: u64| {
        mailproc_store::record::MetadataRecord {
            message_id: "report-42@example.com".into(),
            fallback_id: false,
            from: "reports@example.com".into(),
            to: vec![],
            cc: vec![],
            subject: String::new(),
            received_at: None,
            size_bytes: 0,
            has_attachments: false,
            storage_key: "mail/ses-0001".into(),
            processing_status: ProcessingStatus::Pending,
            processed_at: None,
            claim_token: None,
            claimed_at: None,
            delivery_id: "ses-0001".into(),
            failure_reason: None,
        }
        .into_pending(ClaimToken::issued_at(claimed_at))
    };

    // still within its lease: nobody may touch it
    db.record_overwrite(crashed(now_msec()));
    let err = ingestor.ingest(&event).await.unwrap_err();
    assert!(matches!(err, IngestError::Contended(_)));
    assert!(err.is_retryable());
    assert_eq!(db.records()[0].processing_status, ProcessingStatus::Pending);

    // lease expired: taken over
    let expired = now_msec() - lease.as_millis() as u64 - 1000;
    db.record_overwrite(crashed(expired));
    let outcome = ingestor.ingest(&event).await.unwrap();
    assert!(matches!(outcome, IngestOutcome::Committed { .. }));

    let rec = &db.records()[0];
    assert!(rec.is_complete());
    assert_eq!(rec.delivery_id, "ses-0002");
    assert!(rec.has_attachments);
}

#[tokio::test]
async fn failed_records_are_retried() {
    let db = MemDb::new();
    let faulty = Ingestor::from_store(
        FaultyStore::new(&db, Fault::CommitUnavailable).await,
        common::config(CommitMode::TwoPhase),
    );
    let event = deliver(&db, "ses-0001", EMAIL1);

    let err = faulty.ingest(&event).await.unwrap_err();
    assert!(matches!(err, IngestError::StoreUnavailable(_)));
    assert!(err.is_retryable());

    // the claim was released instead of being left to expire
    let rec = &db.records()[0];
    assert_eq!(rec.processing_status, ProcessingStatus::Failed);
    assert!(rec
        .failure_reason
        .as_deref()
        .unwrap_or_default()
        .starts_with("commit failed"));

    let healthy = pipeline(&db, CommitMode::TwoPhase).await;
    let outcome = healthy.ingest(&event).await.unwrap();
    assert!(matches!(outcome, IngestOutcome::Committed { .. }));
    assert_eq!(complete_records(&db).len(), 1);
    assert_eq!(db.records()[0].failure_reason, None);
}

#[tokio::test]
async fn lost_claim_is_not_committed() {
    let db = MemDb::new();
    let ingestor = Ingestor::from_store(
        FaultyStore::new(&db, Fault::TakeoverBeforeCommit).await,
        common::config(CommitMode::TwoPhase),
    );
    let event = deliver(&db, "ses-0001", EMAIL1);

    let err = ingestor.ingest(&event).await.unwrap_err();
    assert!(matches!(err, IngestError::Contended(ref id) if id == EMAIL1_ID));

    // the thief's claim is intact
    let rec = &db.records()[0];
    assert_eq!(rec.processing_status, ProcessingStatus::Pending);
    assert!(complete_records(&db).is_empty());
}
