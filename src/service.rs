//! Visit service.
//!
//! Wraps a [`VisitAllocator`] with everything a `getVisit` request needs around the
//! allocation itself:
//!
//! - one allocation at a time, enforced by an async mutex held for the whole protocol
//! - whole-allocation retries for retryable faults, per [`RetryPolicy`]
//! - an optional filesystem fallback sequence for transport faults
//! - a ledger entry for every issued visit
//!
//! Protocol faults other than retryable ones always reach the caller: no exposure can
//! proceed without a visit, and a guessed number is worse than none.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::allocator::VisitAllocator;
use crate::camera::{CameraId, CameraSet};
use crate::config::{ConfigError, SourceKind, VisitConfig};
use crate::error::{AppError, AppResult};
use crate::error_recovery::{with_retry, RetryPolicy};
use crate::fallback::FallbackSequence;
use crate::frame_id::exposure_id;
use crate::ledger::{JsonLinesLedger, MemoryLedger, VisitLedger, VisitOrigin, VisitRecord};
use crate::source::{CommandFrameSource, FrameSource, SimulatedFrameSource};

/// Description recorded when the caller did not name itself.
pub const UNKNOWN_CALLER: &str = "unknown";

/// A request for a new visit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisitRequest {
    /// Who is asking, e.g. the sequencing actor
    pub caller: Option<String>,
    /// Fiber design the exposure will use
    pub design_id: Option<i64>,
}

/// Issues visits and records them.
pub struct VisitService<S> {
    allocator: Mutex<VisitAllocator<S>>,
    cameras: CameraSet,
    instrument_code: String,
    retry: RetryPolicy,
    ledger: Arc<dyn VisitLedger>,
    fallback: Option<FallbackSequence>,
    last_visit: StdMutex<Option<u32>>,
}

impl<S: FrameSource> VisitService<S> {
    /// Service reconciling `cameras` with no retries and no fallback.
    pub fn new(
        allocator: VisitAllocator<S>,
        cameras: CameraSet,
        instrument_code: impl Into<String>,
        ledger: Arc<dyn VisitLedger>,
    ) -> Self {
        Self {
            allocator: Mutex::new(allocator),
            cameras,
            instrument_code: instrument_code.into(),
            retry: RetryPolicy::no_retry(),
            ledger,
            fallback: None,
            last_visit: StdMutex::new(None),
        }
    }

    /// Retry whole allocations per `policy`.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Fall back to `sequence` when the frame source is unreachable.
    pub fn with_fallback(mut self, sequence: FallbackSequence) -> Self {
        self.fallback = Some(sequence);
        self
    }

    /// Cameras every allocation reconciles.
    pub fn cameras(&self) -> &CameraSet {
        &self.cameras
    }

    /// Instrument code used in identifiers.
    pub fn instrument_code(&self) -> &str {
        &self.instrument_code
    }

    /// Most recent visit issued by this service.
    pub fn last_visit(&self) -> Option<u32> {
        *self.last_visit.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exposure identifier for `visit`.
    pub fn exposure_id(&self, visit: u32) -> String {
        exposure_id(&self.instrument_code, visit)
    }

    /// Issues a new visit.
    ///
    /// # Errors
    ///
    /// The allocation fault, unless it was a transport fault and the fallback
    /// sequence supplied a number. Ledger failures are logged, not returned.
    pub async fn get_visit(&self, request: VisitRequest) -> AppResult<VisitRecord> {
        let description = request
            .caller
            .unwrap_or_else(|| UNKNOWN_CALLER.to_string());
        let design_id = request.design_id.unwrap_or(0);

        let (visit, origin) = {
            let guard = self.allocator.lock().await;
            let allocator: &VisitAllocator<S> = &guard;
            let cameras = &self.cameras;

            match with_retry(&self.retry, move |_| allocator.allocate_visit(cameras)).await {
                Ok(visit) => match &self.fallback {
                    Some(sequence) => (
                        self.pass_fallback(allocator, sequence, visit).await?,
                        VisitOrigin::Gen2,
                    ),
                    None => (visit, VisitOrigin::Gen2),
                },
                Err(err) => match &self.fallback {
                    Some(sequence) if err.is_transport() => {
                        warn!(
                            path = %sequence.path().display(),
                            "failed to get a visit from the frame source ({err}), using fallback sequence"
                        );
                        (sequence.next().await?, VisitOrigin::Fallback)
                    }
                    _ => {
                        error!("failed to allocate visit: {err}");
                        return Err(err.into());
                    }
                },
            }
        };

        *self.last_visit.lock().unwrap_or_else(PoisonError::into_inner) = Some(visit);

        let record = VisitRecord {
            visit,
            description,
            design_id,
            origin,
            issued_at: Utc::now(),
        };
        if let Err(e) = self.ledger.record(&record).await {
            warn!(visit, "failed to insert into visit ledger: {e}");
        }

        info!(
            visit,
            design_id,
            caller = %record.description,
            origin = ?origin,
            "visit={visit}"
        );
        Ok(record)
    }

    /// Allocates past every visit the fallback sequence has handed out, then
    /// raises the sequence to the result.
    ///
    /// The Gen2 counters never see fallback visits, so the first allocations after
    /// an outage can land on numbers that were already issued.
    async fn pass_fallback(
        &self,
        allocator: &VisitAllocator<S>,
        sequence: &FallbackSequence,
        mut visit: u32,
    ) -> AppResult<u32> {
        let issued = sequence.last().await?;
        if visit <= issued {
            warn!(
                visit,
                fallback_visit = issued,
                "visit {visit} was already issued from the fallback sequence, skipping to {}",
                issued + 1
            );
        }
        let cameras = &self.cameras;
        while visit <= issued {
            visit = with_retry(&self.retry, move |_| allocator.allocate_visit(cameras)).await?;
        }

        if let Err(e) = sequence.raise_to(visit).await {
            warn!("failed to update fallback sequence: {e}");
        }
        Ok(visit)
    }
}

impl VisitService<Box<dyn FrameSource>> {
    /// Builds the frame source, ledger, retry policy and fallback from `config`.
    pub fn from_config(config: &VisitConfig) -> AppResult<Self> {
        config.validate()?;
        let cameras = config.camera_set()?;
        let source_config = &config.frame_source;

        let source: Box<dyn FrameSource> = match source_config.kind {
            SourceKind::Simulated => Box::new(simulated_source(
                &source_config.instrument_code,
                &cameras,
                source_config.start_visit,
            )),
            SourceKind::Command => Box::new(
                CommandFrameSource::new(source_config.command.clone()).ok_or_else(|| {
                    AppError::Config(ConfigError::ValidationError(
                        "frame_source.command cannot be empty".into(),
                    ))
                })?,
            ),
        };

        let ledger: Arc<dyn VisitLedger> = match &config.ledger.path {
            Some(path) => Arc::new(JsonLinesLedger::new(path)),
            None => Arc::new(MemoryLedger::new()),
        };

        let allocator = VisitAllocator::new(source, config.request_timeout());
        let mut service = VisitService::new(
            allocator,
            cameras,
            source_config.instrument_code.clone(),
            ledger,
        )
        .with_retry(config.retry_policy());
        if config.fallback.enabled {
            service = service.with_fallback(FallbackSequence::new(&config.fallback.sequence_path));
        }
        Ok(service)
    }
}

fn simulated_source(instrument_code: &str, cameras: &CameraSet, start_visit: u32) -> SimulatedFrameSource {
    cameras.iter().fold(
        SimulatedFrameSource::new(instrument_code),
        |source, camera: CameraId| source.with_camera(camera, start_visit, 0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SourceError, VisitError};
    use std::time::Duration;
    use tracing_test::traced_test;

    fn service(
        source: SimulatedFrameSource,
        letters: &str,
    ) -> (VisitService<SimulatedFrameSource>, Arc<MemoryLedger>) {
        let ledger = Arc::new(MemoryLedger::new());
        let service = VisitService::new(
            VisitAllocator::new(source, Duration::from_secs(1)),
            CameraSet::from_letters(letters).unwrap(),
            "PFS",
            ledger.clone(),
        );
        (service, ledger)
    }

    fn aligned(letters: &str, visit: u32) -> SimulatedFrameSource {
        letters.chars().fold(SimulatedFrameSource::new("PFS"), |s, c| {
            s.with_camera(CameraId::new(c).unwrap(), visit, 0)
        })
    }

    #[tokio::test]
    async fn test_get_visit_records_ledger() {
        let (service, ledger) = service(aligned("AB", 10), "AB");
        let record = service
            .get_visit(VisitRequest {
                caller: Some("iic".into()),
                design_id: Some(0x5a5a),
            })
            .await
            .unwrap();
        assert_eq!(record.visit, 10);
        assert_eq!(record.origin, VisitOrigin::Gen2);
        assert_eq!(record.description, "iic");
        assert_eq!(service.last_visit(), Some(10));
        assert_eq!(ledger.records(), vec![record]);
    }

    #[tokio::test]
    async fn test_defaults_for_missing_caller_and_design() {
        let (service, _) = service(aligned("A", 3), "A");
        let record = service.get_visit(VisitRequest::default()).await.unwrap();
        assert_eq!(record.description, UNKNOWN_CALLER);
        assert_eq!(record.design_id, 0);
        assert_eq!(service.exposure_id(record.visit), "PFSE00000300");
    }

    #[tokio::test]
    async fn test_transport_fault_without_fallback_is_returned() {
        let source = aligned("AB", 10);
        source.inject_failure(SourceError::Unavailable("gen2 down".into()));
        let (service, ledger) = service(source, "AB");
        let err = service.get_visit(VisitRequest::default()).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Visit(VisitError::SourceUnavailable { .. })
        ));
        assert!(ledger.records().is_empty());
        assert_eq!(service.last_visit(), None);
    }

    #[tokio::test]
    async fn test_retry_recovers_from_discontinuity() {
        let source = aligned("AB", 10);
        let b = CameraId::new('B').unwrap();
        source.interfere_after(b, 1, 7);
        let (service, _) = service(source.clone(), "AB");
        let service = service.with_retry(RetryPolicy {
            max_attempts: 2,
            backoff_delay: Duration::from_millis(1),
        });
        let record = service.get_visit(VisitRequest::default()).await.unwrap();
        // The failed attempt left A past block 10 and B inside block 11.
        assert_eq!(record.visit, 12);
        assert_eq!(source.position(b), Some((13, 0)));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_transport_fault_uses_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let sequence = FallbackSequence::new(dir.path().join("seq.json"));
        sequence.raise_to(41).await.unwrap();

        let source = aligned("AB", 10);
        source.inject_failure(SourceError::Timeout(Duration::from_secs(1)));
        let (service, ledger) = service(source, "AB");
        let service = service.with_fallback(sequence.clone());

        let record = service.get_visit(VisitRequest::default()).await.unwrap();
        assert_eq!(record.visit, 42);
        assert_eq!(record.origin, VisitOrigin::Fallback);
        assert_eq!(ledger.records()[0].origin, VisitOrigin::Fallback);
        assert_eq!(sequence.last().await.unwrap(), 42);
        assert!(logs_contain("using fallback sequence"));
    }

    #[tokio::test]
    async fn test_protocol_fault_is_never_masked_by_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let sequence = FallbackSequence::new(dir.path().join("seq.json"));

        let source = aligned("A", 10);
        source.interfere_after(CameraId::new('A').unwrap(), 1, 2);
        let (service, ledger) = service(source, "A");
        let service = service.with_fallback(sequence.clone());

        let err = service.get_visit(VisitRequest::default()).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Visit(VisitError::SequenceDiscontinuity { .. })
        ));
        assert!(ledger.records().is_empty());
        assert_eq!(sequence.last().await.unwrap(), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_gen2_after_outage_skips_fallback_visits() {
        let dir = tempfile::tempdir().unwrap();
        let sequence = FallbackSequence::new(dir.path().join("seq.json"));
        let source = aligned("AB", 50);
        let (service, ledger) = service(source.clone(), "AB");
        let service = service.with_fallback(sequence.clone());

        service.get_visit(VisitRequest::default()).await.unwrap();
        source.inject_failure(SourceError::Unavailable("gen2 down".into()));
        service.get_visit(VisitRequest::default()).await.unwrap();
        service.get_visit(VisitRequest::default()).await.unwrap();

        let issued: Vec<_> = ledger.records().iter().map(|r| (r.visit, r.origin)).collect();
        assert_eq!(
            issued,
            vec![
                (50, VisitOrigin::Gen2),
                (51, VisitOrigin::Fallback),
                (52, VisitOrigin::Gen2)
            ]
        );
        assert_eq!(sequence.last().await.unwrap(), 52);
        assert!(logs_contain("already issued from the fallback sequence"));
    }

    #[tokio::test]
    async fn test_gen2_skips_far_ahead_fallback_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let sequence = FallbackSequence::new(dir.path().join("seq.json"));
        sequence.raise_to(41).await.unwrap();

        let source = aligned("A", 10);
        let (service, _) = service(source.clone(), "A");
        let service = service.with_fallback(sequence.clone());

        let record = service.get_visit(VisitRequest::default()).await.unwrap();
        assert_eq!(record.visit, 42);
        assert_eq!(record.origin, VisitOrigin::Gen2);
        // One block per allocation from 10 through 42.
        assert_eq!(source.frames_issued(CameraId::new('A').unwrap()), 33 * 100);
        assert_eq!(sequence.last().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_unreadable_fallback_sequence_fails_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seq.json");
        std::fs::write(&path, "not json").unwrap();

        let (service, ledger) = service(aligned("A", 10), "A");
        let service = service.with_fallback(FallbackSequence::new(&path));

        let err = service.get_visit(VisitRequest::default()).await.unwrap_err();
        assert!(matches!(err, AppError::Fallback(_)));
        assert!(ledger.records().is_empty());
    }

    #[tokio::test]
    async fn test_successful_allocation_raises_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let sequence = FallbackSequence::new(dir.path().join("seq.json"));
        let (service, _) = service(aligned("ABCD", 777), "ABCD");
        let service = service.with_fallback(sequence.clone());

        service.get_visit(VisitRequest::default()).await.unwrap();
        assert_eq!(sequence.last().await.unwrap(), 777);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_ledger_failure_does_not_fail_request() {
        struct BrokenLedger;

        #[async_trait::async_trait]
        impl VisitLedger for BrokenLedger {
            async fn record(&self, _record: &VisitRecord) -> AppResult<()> {
                Err(AppError::Io(std::io::Error::other("opdb down")))
            }
        }

        let service = VisitService::new(
            VisitAllocator::new(aligned("A", 5), Duration::from_secs(1)),
            CameraSet::from_letters("A").unwrap(),
            "PFS",
            Arc::new(BrokenLedger),
        );
        let record = service.get_visit(VisitRequest::default()).await.unwrap();
        assert_eq!(record.visit, 5);
        assert!(logs_contain("failed to insert into visit ledger"));
    }

    #[test]
    fn test_from_config_simulated() {
        let mut config = VisitConfig::default();
        config.frame_source.start_visit = 300;
        let service = VisitService::from_config(&config).unwrap();
        assert_eq!(service.cameras(), &CameraSet::reference());
        assert_eq!(service.instrument_code(), "PFS");
    }

    #[test]
    fn test_from_config_rejects_invalid() {
        let mut config = VisitConfig::default();
        config.frame_source.kind = SourceKind::Command;
        assert!(VisitService::from_config(&config).is_err());
    }
}
