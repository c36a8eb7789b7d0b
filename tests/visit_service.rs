//! Visit service tests: serialization, persistence and degraded operation.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::{assert_all_next_at, cam, cameras_of, service, source_at};
use gen2_visit::config::{SourceKind, VisitConfig};
use gen2_visit::error::SourceError;
use gen2_visit::fallback::FallbackSequence;
use gen2_visit::ledger::{JsonLinesLedger, VisitOrigin};
use gen2_visit::{AppError, VisitError, VisitRequest, VisitService};

fn request(caller: &str) -> VisitRequest {
    VisitRequest {
        caller: Some(caller.to_string()),
        design_id: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_get_distinct_visits() {
    let positions = [('A', 10, 17), ('B', 11, 0), ('C', 9, 3), ('D', 10, 0)];
    let source = source_at(&positions);
    let cameras = cameras_of(&positions);
    let (service, ledger) = service(&source, cameras.clone());
    let service = Arc::new(service);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.get_visit(request(&format!("client-{i}"))).await })
        })
        .collect();

    let mut visits = HashSet::new();
    for handle in handles {
        let record = handle.await.unwrap().unwrap();
        assert!(visits.insert(record.visit), "visit {} issued twice", record.visit);
    }

    // The first allocation lands on 11, every later one on the next block.
    let expected: HashSet<u32> = (11..19).collect();
    assert_eq!(visits, expected);
    assert_eq!(ledger.records().len(), 8);
    assert_eq!(service.last_visit().map(|v| v >= 11), Some(true));
    assert_all_next_at(&source, &cameras, 18);
}

#[tokio::test]
async fn test_records_caller_and_design() {
    let positions = [('A', 300, 0), ('B', 300, 0)];
    let source = source_at(&positions);
    let (service, ledger) = service(&source, cameras_of(&positions));

    let record = service
        .get_visit(VisitRequest {
            caller: Some("iic".into()),
            design_id: Some(0x5c0a_61e9),
        })
        .await
        .unwrap();

    assert_eq!(record.visit, 300);
    assert_eq!(record.origin, VisitOrigin::Gen2);
    assert_eq!(ledger.records(), vec![record]);
    assert_eq!(service.exposure_id(300), "PFSE00030000");
}

#[tokio::test]
async fn test_service_from_config_persists_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let ledger_path = dir.path().join("visits.jsonl");

    let mut config = VisitConfig::default();
    config.frame_source.kind = SourceKind::Simulated;
    config.frame_source.start_visit = 1200;
    config.ledger.path = Some(ledger_path.clone());

    let service = VisitService::from_config(&config).unwrap();
    let first = service.get_visit(request("sps")).await.unwrap();
    let second = service.get_visit(VisitRequest::default()).await.unwrap();

    assert_eq!(first.visit, 1200);
    assert_eq!(second.visit, 1201);

    let stored = JsonLinesLedger::new(&ledger_path).read_all().await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].description, "sps");
    assert_eq!(stored[1].description, "unknown");
    assert_eq!(stored[1].design_id, 0);
}

#[tokio::test]
async fn test_fallback_after_source_outage() {
    let dir = tempfile::tempdir().unwrap();
    let sequence = FallbackSequence::new(dir.path().join("sequence.json"));

    let positions = [('A', 50, 0), ('B', 50, 0)];
    let source = source_at(&positions);
    let (service, ledger) = service(&source, cameras_of(&positions));
    let service = service.with_fallback(sequence.clone());

    let gen2 = service.get_visit(request("iic")).await.unwrap();
    assert_eq!(gen2.visit, 50);
    assert_eq!(sequence.last().await.unwrap(), 50);

    source.inject_failure(SourceError::Unavailable("gen2 down".into()));
    let degraded = service.get_visit(request("iic")).await.unwrap();
    assert_eq!(degraded.visit, 51);
    assert_eq!(degraded.origin, VisitOrigin::Fallback);

    // Gen2 comes back still pointing at 51.
    let recovered = service.get_visit(request("iic")).await.unwrap();
    assert_eq!(recovered.visit, 52);
    assert_eq!(recovered.origin, VisitOrigin::Gen2);
    assert_all_next_at(&source, &cameras_of(&positions), 52);

    let records = ledger.records();
    let origins: Vec<_> = records.iter().map(|r| r.origin).collect();
    assert_eq!(
        origins,
        vec![VisitOrigin::Gen2, VisitOrigin::Fallback, VisitOrigin::Gen2]
    );
    let distinct: HashSet<u32> = records.iter().map(|r| r.visit).collect();
    assert_eq!(distinct.len(), records.len());
}

#[tokio::test]
async fn test_protocol_fault_reaches_caller_despite_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let positions = [('A', 50, 0), ('B', 50, 0)];
    let source = source_at(&positions);
    source.interfere_after(cam('B'), 1, 1);
    let (service, ledger) = service(&source, cameras_of(&positions));
    let service = service.with_fallback(FallbackSequence::new(dir.path().join("sequence.json")));

    let err = service.get_visit(request("iic")).await.unwrap_err();

    assert!(matches!(
        err,
        AppError::Visit(VisitError::SequenceDiscontinuity { .. })
    ));
    assert!(ledger.records().is_empty());
    assert_eq!(service.last_visit(), None);
}
