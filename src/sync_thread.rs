//! A background sync thread that periodically fetches specs and ID lists and installs them into
//! the spec store.
use std::{
    sync::{Arc, Condvar, Mutex, PoisonError},
    time::Duration,
};

use rand::{thread_rng, Rng};
use tokio::{sync::watch, time::Instant};

use crate::{synchronizer::Synchronizer, Error, Result};

/// Configuration of the background sync thread.
// Not implementing `Copy` as we may add non-copyable fields in the future.
#[derive(Debug, Clone)]
pub struct SyncThreadConfig {
    /// Interval to wait between specs syncs.
    ///
    /// Defaults to [`SyncThreadConfig::DEFAULT_SPECS_INTERVAL`].
    pub specs_interval: Duration,
    /// Interval to wait between ID-list syncs.
    ///
    /// Defaults to [`SyncThreadConfig::DEFAULT_ID_LISTS_INTERVAL`].
    pub id_lists_interval: Duration,
    /// Jitter applies a randomized duration to wait between syncs. This helps to avoid multiple
    /// server instances synchronizing and producing spiky network load.
    ///
    /// Defaults to [`SyncThreadConfig::DEFAULT_JITTER`].
    pub jitter: Duration,
}

impl SyncThreadConfig {
    /// Default value for [`SyncThreadConfig::specs_interval`].
    pub const DEFAULT_SPECS_INTERVAL: Duration = Duration::from_secs(10);
    /// Default value for [`SyncThreadConfig::id_lists_interval`].
    pub const DEFAULT_ID_LISTS_INTERVAL: Duration = Duration::from_secs(60);
    /// Default value for [`SyncThreadConfig::jitter`].
    pub const DEFAULT_JITTER: Duration = Duration::from_secs(1);

    /// Create a new `SyncThreadConfig` using default configuration.
    pub fn new() -> SyncThreadConfig {
        SyncThreadConfig::default()
    }

    /// Update specs sync interval with `interval`.
    pub fn with_specs_interval(mut self, interval: Duration) -> SyncThreadConfig {
        self.specs_interval = interval;
        self
    }

    /// Update ID-list sync interval with `interval`.
    pub fn with_id_lists_interval(mut self, interval: Duration) -> SyncThreadConfig {
        self.id_lists_interval = interval;
        self
    }

    /// Update sync interval jitter with `jitter`.
    pub fn with_jitter(mut self, jitter: Duration) -> SyncThreadConfig {
        self.jitter = jitter;
        self
    }
}

impl Default for SyncThreadConfig {
    fn default() -> SyncThreadConfig {
        SyncThreadConfig {
            specs_interval: SyncThreadConfig::DEFAULT_SPECS_INTERVAL,
            id_lists_interval: SyncThreadConfig::DEFAULT_ID_LISTS_INTERVAL,
            jitter: SyncThreadConfig::DEFAULT_JITTER,
        }
    }
}

type SyncResult = Arc<(Mutex<Option<Result<()>>>, Condvar)>;

/// A background sync thread.
///
/// The thread runs one specs sync and one ID-list sync right away, then keeps both loops going on
/// their own intervals. Stopping is only observed between sync cycles: a cycle in flight when
/// [`SyncThread::stop`] is called finishes and installs its result before the thread exits.
pub(crate) struct SyncThread {
    join_handle: std::thread::JoinHandle<()>,

    /// Used to send a stop command to the sync thread.
    stop_sender: watch::Sender<bool>,

    /// Holds `None` until the first specs sync has finished, then the outcome of that sync.
    /// Overwritten if an unrecoverable error stops the thread later.
    result: SyncResult,
}

impl SyncThread {
    /// Starts the sync thread with the provided configuration.
    ///
    /// # Errors
    ///
    /// This method can return the following errors:
    /// - IO Error if the sync thread failed to start.
    pub fn start(
        mut synchronizer: Synchronizer,
        config: SyncThreadConfig,
    ) -> std::io::Result<SyncThread> {
        let (stop_sender, mut stop_receiver) = watch::channel(false);

        let result: SyncResult = Arc::new((Mutex::new(None), Condvar::new()));

        let join_handle = {
            // Cloning Arc for move into thread
            let result = Arc::clone(&result);
            let update_result = move |value| {
                *result.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
                result.1.notify_all();
            };

            std::thread::Builder::new()
                .name("featuregate-sync".to_owned())
                .spawn(move || {
                    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        let runtime = match tokio::runtime::Builder::new_current_thread()
                            .enable_all()
                            .build()
                        {
                            Ok(runtime) => runtime,
                            Err(err) => {
                                update_result(Err(Error::from(err)));
                                return;
                            }
                        };

                        runtime.block_on(async {
                            log::debug!(target: "featuregate", "running initial sync");
                            let initial = synchronizer.sync_specs().await;
                            let stop = initial.as_ref().is_err_and(Error::is_unrecoverable);
                            update_result(initial);
                            if stop {
                                return;
                            }
                            if let Err(err) = synchronizer.sync_id_lists().await {
                                if err.is_unrecoverable() {
                                    update_result(Err(err));
                                    return;
                                }
                            }

                            let mut next_specs =
                                Instant::now() + jitter(config.specs_interval, config.jitter);
                            let mut next_id_lists =
                                Instant::now() + jitter(config.id_lists_interval, config.jitter);

                            loop {
                                let result = tokio::select! {
                                    // Stop wins over due syncs.
                                    biased;
                                    _ = stop_receiver.changed() => {
                                        // Either a stop command or the sender got dropped.
                                        log::debug!(target: "featuregate", "sync thread received stop command");
                                        return;
                                    }
                                    _ = tokio::time::sleep_until(next_specs) => {
                                        let result = synchronizer.sync_specs().await;
                                        next_specs = Instant::now()
                                            + jitter(config.specs_interval, config.jitter);
                                        result
                                    }
                                    _ = tokio::time::sleep_until(next_id_lists) => {
                                        let result = synchronizer.sync_id_lists().await;
                                        next_id_lists = Instant::now()
                                            + jitter(config.id_lists_interval, config.jitter);
                                        result
                                    }
                                };

                                if let Err(err) = result {
                                    if err.is_unrecoverable() {
                                        log::warn!(target: "featuregate", "stopping sync thread: {err}");
                                        update_result(Err(err));
                                        return;
                                    }
                                }
                            }
                        });
                    }));

                    // If catch_unwind returns Err, it means a panic occurred.
                    if outcome.is_err() {
                        update_result(Err(Error::SyncThreadPanicked));
                    }
                })?
        };

        Ok(SyncThread {
            join_handle,
            stop_sender,
            result,
        })
    }

    /// Waits for the first specs sync to finish and returns its outcome.
    ///
    /// # Errors
    ///
    /// This method can fail with the following errors:
    ///
    /// - [`Error::SyncThreadPanicked`]
    /// - [`Error::Unauthorized`]
    /// - [`Error::InvalidBaseUrl`]
    /// - any error of the first sync (network, malformed payload)
    pub fn wait_for_configuration(&self) -> Result<()> {
        let lock = self
            .result
            .0
            .lock()
            .map_err(|_| Error::SyncThreadPanicked)?;
        let lock = self
            .result
            .1
            .wait_while(lock, |result| result.is_none())
            .map_err(|_| Error::SyncThreadPanicked)?;
        lock.clone().unwrap_or(Err(Error::SyncThreadPanicked))
    }

    /// Like [`SyncThread::wait_for_configuration`], but gives up after `timeout`.
    ///
    /// Returns `None` if the first sync has not finished in time. The sync keeps running and
    /// installs its result once it completes.
    pub fn wait_for_configuration_timeout(&self, timeout: Duration) -> Option<Result<()>> {
        let lock = match self.result.0.lock() {
            Ok(lock) => lock,
            Err(_) => return Some(Err(Error::SyncThreadPanicked)),
        };
        match self
            .result
            .1
            .wait_timeout_while(lock, timeout, |result| result.is_none())
        {
            Ok((lock, _)) => lock.clone(),
            Err(_) => Some(Err(Error::SyncThreadPanicked)),
        }
    }

    /// Stop the sync thread.
    ///
    /// This function does not wait for the thread to actually stop.
    pub fn stop(&self) {
        // Error means the thread has already exited. There's nothing useful to do then.
        let _ = self.stop_sender.send(true);
    }

    /// Stop the sync thread and block waiting for it to exit. A sync cycle in flight is allowed
    /// to finish first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SyncThreadPanicked`] if the thread has panicked.
    pub fn shutdown(self) -> Result<()> {
        // Send stop signal in case it wasn't sent before.
        self.stop();

        // Error means that the thread has panicked and there's nothing useful we can do in that
        // case.
        self.join_handle
            .join()
            .map_err(|_| Error::SyncThreadPanicked)?;

        Ok(())
    }
}

/// Apply randomized `jitter` to `interval`.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    Duration::saturating_sub(interval, thread_rng().gen_range(Duration::ZERO..=jitter))
}
