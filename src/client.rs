use std::sync::{Arc, Mutex, PoisonError};

use crate::{
    events::NoopDiagnosticsObserver,
    fetcher::{HttpFetcher, SpecsFetcher},
    snapshot::SyncSource,
    spec_store::SpecStore,
    sync_thread::SyncThread,
    synchronizer::{self, Synchronizer},
    ClientConfig, EvalOptions, EvaluationResult, Evaluator, EvaluatorConfig, JsonObject,
    Result, User,
};

/// Outcome of [`Client::initialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitializeDetails {
    /// Where the snapshot in use after initialization came from.
    pub source: SyncSource,
    /// `true` if the first network sync did not finish within the configured timeout. The sync
    /// keeps running in the background.
    pub timed_out: bool,
}

/// A feature gate and experiment client.
///
/// In order to create a client instance, first create [`ClientConfig`].
///
/// # Examples
/// ```
/// # use featuregate::{Client, ClientConfig, User};
/// let client = Client::new(ClientConfig::from_server_secret("secret-key").local_mode(true));
/// client.initialize().unwrap();
///
/// let user = User::with_user_id("a-user");
/// assert!(!client.check_gate(&user, "new_homepage").value);
/// ```
pub struct Client {
    spec_store: Arc<SpecStore>,
    evaluator: Evaluator,
    config: ClientConfig,
    sync_thread: Mutex<Option<SyncThread>>,
}

impl Client {
    /// Create a new `Client` using the specified configuration.
    ///
    /// Nothing is loaded until [`Client::initialize`] is called; evaluating before that returns
    /// uninitialized defaults.
    pub fn new(mut config: ClientConfig) -> Client {
        let spec_store = Arc::new(SpecStore::new());
        let evaluator = Evaluator::new(EvaluatorConfig {
            spec_store: spec_store.clone(),
            country_lookup: config.country_lookup.take(),
            environment_tier: config.environment_tier.take(),
            persistent_storage: config.persistent_storage.take(),
            observer: config.observer.clone(),
        });
        Client {
            spec_store,
            evaluator,
            config,
            sync_thread: Mutex::new(None),
        }
    }

    /// Load specs and start background synchronization.
    ///
    /// A bootstrap payload is installed first, otherwise the data adapter's cached payload. Unless
    /// in local mode, a sync thread is then started and the first network sync is awaited (up to
    /// the configured timeout). Calling `initialize` again is a no-op apart from reporting the
    /// current source.
    ///
    /// # Errors
    ///
    /// - [`Error::Unauthorized`](crate::Error::Unauthorized) if the server rejected the server
    ///   secret.
    /// - [`Error::InvalidBaseUrl`](crate::Error::InvalidBaseUrl) if the base URL cannot be parsed.
    /// - [`Error::Io`](crate::Error::Io) if the sync thread failed to start.
    ///
    /// Other sync failures are logged and leave the client running on whatever snapshot it has.
    pub fn initialize(&self) -> Result<InitializeDetails> {
        let mut sync_thread = self
            .sync_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if sync_thread.is_some() {
            return Ok(self.details(false));
        }

        self.load_local_specs();

        if self.config.local_mode {
            log::debug!(target: "featuregate", "local mode, skipping network sync");
            return Ok(self.details(false));
        }

        let fetcher: Arc<dyn SpecsFetcher> = match &self.config.fetcher {
            Some(fetcher) => fetcher.clone(),
            None => Arc::new(HttpFetcher::new(
                self.config.base_url.clone(),
                self.config.server_secret.clone(),
            )),
        };
        let thread_config = self.config.sync_thread_config.clone();
        let synchronizer = Synchronizer::new(
            fetcher,
            self.spec_store.clone(),
            self.config.data_adapter.clone(),
            self.config
                .observer
                .clone()
                .unwrap_or_else(|| Arc::new(NoopDiagnosticsObserver)),
            thread_config.specs_interval,
            thread_config.id_lists_interval,
        );
        let thread = SyncThread::start(synchronizer, thread_config)?;

        let outcome = match self.config.init_timeout {
            Some(timeout) => thread.wait_for_configuration_timeout(timeout),
            None => Some(thread.wait_for_configuration()),
        };
        let timed_out = match outcome {
            None => {
                log::warn!(target: "featuregate", "initialization timed out, sync continues in the background");
                true
            }
            Some(Err(err)) if err.is_unrecoverable() => {
                // The thread has stopped already.
                let _ = thread.shutdown();
                return Err(err);
            }
            Some(Err(err)) => {
                log::warn!(target: "featuregate", "initial sync failed: {err}");
                false
            }
            Some(Ok(())) => false,
        };

        *sync_thread = Some(thread);
        Ok(self.details(timed_out))
    }

    fn load_local_specs(&self) {
        if let Some(bootstrap) = &self.config.bootstrap {
            match synchronizer::install_payload(
                &self.spec_store,
                bootstrap.as_bytes(),
                SyncSource::Bootstrap,
            ) {
                Ok(true) => return,
                Ok(false) => log::warn!(target: "featuregate", "bootstrap payload has no updates"),
                Err(err) => log::warn!(target: "featuregate", "failed to install bootstrap payload: {err}"),
            }
        }

        if let Some(adapter) = &self.config.data_adapter {
            if let Err(err) = synchronizer::install_from_adapter(&self.spec_store, adapter.as_ref())
            {
                log::warn!(target: "featuregate", "failed to load specs from data adapter: {err}");
            }
        }
    }

    fn details(&self, timed_out: bool) -> InitializeDetails {
        InitializeDetails {
            source: self.spec_store.get_snapshot().source,
            timed_out,
        }
    }

    /// Evaluate a feature gate.
    pub fn check_gate(&self, user: &User, name: &str) -> EvaluationResult {
        self.evaluator.check_gate(user, name)
    }

    /// Evaluate a feature gate with per-call options.
    pub fn check_gate_with_options(
        &self,
        user: &User,
        name: &str,
        options: &EvalOptions,
    ) -> EvaluationResult {
        self.evaluator.check_gate_with_options(user, name, options)
    }

    /// Evaluate a dynamic config or experiment.
    pub fn get_config(&self, user: &User, name: &str) -> EvaluationResult {
        self.evaluator.get_config(user, name)
    }

    /// Evaluate a dynamic config or experiment with per-call options.
    pub fn get_config_with_options(
        &self,
        user: &User,
        name: &str,
        options: &EvalOptions,
    ) -> EvaluationResult {
        self.evaluator.get_config_with_options(user, name, options)
    }

    /// Evaluate a layer.
    pub fn get_layer(&self, user: &User, name: &str) -> EvaluationResult {
        self.evaluator.get_layer(user, name)
    }

    /// Evaluate a layer with per-call options.
    pub fn get_layer_with_options(
        &self,
        user: &User,
        name: &str,
        options: &EvalOptions,
    ) -> EvaluationResult {
        self.evaluator.get_layer_with_options(user, name, options)
    }

    /// Name of the layer `experiment` belongs to.
    pub fn get_experiment_layer(&self, experiment: &str) -> Option<String> {
        self.evaluator.get_experiment_layer(experiment)
    }

    /// Override a gate for `id` (a user id or custom id), or for everyone if `id` is `None`.
    pub fn override_gate(&self, name: &str, value: bool, id: Option<&str>) {
        self.evaluator.override_gate(name, value, id);
    }

    /// Override a config for `id`, or for everyone if `id` is `None`.
    pub fn override_config(&self, name: &str, value: JsonObject, id: Option<&str>) {
        self.evaluator.override_config(name, value, id);
    }

    /// Override a layer for `id`, or for everyone if `id` is `None`.
    pub fn override_layer(&self, name: &str, value: JsonObject, id: Option<&str>) {
        self.evaluator.override_layer(name, value, id);
    }

    /// Remove a gate override. `None` removes it for every id.
    pub fn remove_gate_override(&self, name: &str, id: Option<&str>) {
        self.evaluator.remove_gate_override(name, id);
    }

    /// Remove a config override. `None` removes it for every id.
    pub fn remove_config_override(&self, name: &str, id: Option<&str>) {
        self.evaluator.remove_config_override(name, id);
    }

    /// Remove a layer override. `None` removes it for every id.
    pub fn remove_layer_override(&self, name: &str, id: Option<&str>) {
        self.evaluator.remove_layer_override(name, id);
    }

    /// Remove all overrides.
    pub fn remove_all_overrides(&self) {
        self.evaluator.remove_all_overrides();
    }

    /// Stop background synchronization and wait for the sync thread to exit. A sync in flight
    /// finishes and is installed first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SyncThreadPanicked`](crate::Error::SyncThreadPanicked) if the thread has
    /// panicked.
    pub fn shutdown(&self) -> Result<()> {
        let thread = self
            .sync_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match thread {
            Some(thread) => thread.shutdown(),
            None => Ok(()),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        let thread = self
            .sync_thread
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(thread) = thread {
            thread.stop();
        }
    }
}
