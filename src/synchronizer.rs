//! Sync steps that move data from the fetcher, bootstrap payload or data adapter into the
//! [`SpecStore`].
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    data_adapter::{DataAdapter, SPECS_KEY},
    events::{DiagnosticEvent, DiagnosticsObserver, SyncKind},
    fetcher::SpecsFetcher,
    id_lists,
    snapshot::{SpecSet, SyncSource},
    spec_store::SpecStore,
    Error, Result,
};

/// Cumulative time without a successful sync after which failures are reported as errors.
pub(crate) const STALENESS_THRESHOLD: Duration = Duration::from_secs(120);

/// Parse `payload` and install it into `store`.
///
/// Returns `Ok(false)` if the payload carries no updates. On error the store is left untouched.
pub(crate) fn install_payload(store: &SpecStore, payload: &[u8], source: SyncSource) -> Result<bool> {
    match SpecSet::from_json(payload)? {
        Some(specs) => {
            log::debug!(target: "featuregate", time = specs.time, gates = specs.gates.len(), configs = specs.configs.len(), layers = specs.layers.len(); "installing specs");
            store.update(|snapshot| snapshot.with_specs(specs, source));
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Install the payload cached in `adapter`, if any.
pub(crate) fn install_from_adapter(store: &SpecStore, adapter: &dyn DataAdapter) -> Result<bool> {
    let entry = adapter
        .get(SPECS_KEY)
        .map_err(|err| Error::DataAdapter(err.to_string()))?;
    match entry {
        Some(entry) => install_payload(store, entry.value.as_bytes(), SyncSource::DataAdapter),
        None => Ok(false),
    }
}

/// Counts consecutive failures of one sync loop and reports once they add up to
/// [`STALENESS_THRESHOLD`].
#[derive(Debug)]
struct FailureTracker {
    kind: SyncKind,
    interval: Duration,
    failures: u32,
}

impl FailureTracker {
    fn new(kind: SyncKind, interval: Duration) -> FailureTracker {
        FailureTracker {
            kind,
            interval,
            failures: 0,
        }
    }

    fn record_success(&mut self) {
        self.failures = 0;
    }

    /// Returns `true` if the threshold was crossed (and the counter reset).
    fn record_failure(&mut self) -> bool {
        self.failures += 1;
        if self.interval * self.failures < STALENESS_THRESHOLD {
            return false;
        }
        log::error!(target: "featuregate", failures = self.failures; "{:?} sync has been failing for {:?}", self.kind, self.interval * self.failures);
        self.failures = 0;
        true
    }
}

/// Runs specs and ID-list sync cycles against a [`SpecStore`].
pub(crate) struct Synchronizer {
    fetcher: Arc<dyn SpecsFetcher>,
    store: Arc<SpecStore>,
    data_adapter: Option<Arc<dyn DataAdapter>>,
    observer: Arc<dyn DiagnosticsObserver>,
    specs_failures: FailureTracker,
    id_list_failures: FailureTracker,
}

impl Synchronizer {
    pub fn new(
        fetcher: Arc<dyn SpecsFetcher>,
        store: Arc<SpecStore>,
        data_adapter: Option<Arc<dyn DataAdapter>>,
        observer: Arc<dyn DiagnosticsObserver>,
        specs_interval: Duration,
        id_lists_interval: Duration,
    ) -> Synchronizer {
        Synchronizer {
            fetcher,
            store,
            data_adapter,
            observer,
            specs_failures: FailureTracker::new(SyncKind::Specs, specs_interval),
            id_list_failures: FailureTracker::new(SyncKind::IdLists, id_lists_interval),
        }
    }

    /// Fetch specs changed since the current snapshot and install them.
    ///
    /// Failures leave the current snapshot in place.
    pub async fn sync_specs(&mut self) -> Result<()> {
        self.observer.on_event(DiagnosticEvent::SyncStarted {
            kind: SyncKind::Specs,
        });
        let started = Instant::now();

        let result = self.fetch_and_install_specs().await;

        match &result {
            Ok(()) => self.specs_failures.record_success(),
            Err(err) => {
                log::warn!(target: "featuregate", "failed to sync specs: {err}");
                self.specs_failures.record_failure();
            }
        }
        self.observer.on_event(DiagnosticEvent::SyncFinished {
            kind: SyncKind::Specs,
            success: result.is_ok(),
            duration: started.elapsed(),
        });
        result
    }

    async fn fetch_and_install_specs(&self) -> Result<()> {
        let since_time = self.store.get_snapshot().last_sync_time;
        let payload = self.fetcher.fetch_specs(since_time).await?;

        if !install_payload(&self.store, &payload, SyncSource::Network)? {
            log::debug!(target: "featuregate", since_time; "no spec updates");
            return Ok(());
        }

        if let Some(adapter) = &self.data_adapter {
            let time = self.store.get_snapshot().last_sync_time;
            let backup = String::from_utf8_lossy(&payload);
            if let Err(err) = adapter.set(SPECS_KEY, &backup, Some(time)) {
                log::warn!(target: "featuregate", "failed to back up specs to data adapter: {err}");
            }
        }
        Ok(())
    }

    /// Run one ID-list sync cycle and install the result.
    pub async fn sync_id_lists(&mut self) -> Result<()> {
        self.observer.on_event(DiagnosticEvent::SyncStarted {
            kind: SyncKind::IdLists,
        });
        let started = Instant::now();

        let current = Arc::clone(&self.store.get_snapshot().id_lists);
        let result = id_lists::sync_id_lists(Arc::clone(&self.fetcher), &current).await;
        let result = match result {
            Ok(lists) => {
                self.store.update(|snapshot| snapshot.with_id_lists(lists));
                self.id_list_failures.record_success();
                Ok(())
            }
            Err(err) => {
                log::warn!(target: "featuregate", "failed to sync ID lists: {err}");
                self.id_list_failures.record_failure();
                Err(err)
            }
        };

        self.observer.on_event(DiagnosticEvent::SyncFinished {
            kind: SyncKind::IdLists,
            success: result.is_ok(),
            duration: started.elapsed(),
        });
        result
    }
}
