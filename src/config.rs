use std::{sync::Arc, time::Duration};

use crate::{
    eval::CountryLookup, fetcher::DEFAULT_BASE_URL, Client, DataAdapter, DiagnosticsObserver,
    PersistentStorage, SpecsFetcher, SyncThreadConfig,
};

/// Configuration for [`Client`].
pub struct ClientConfig {
    pub(crate) server_secret: String,
    pub(crate) base_url: String,
    pub(crate) sync_thread_config: SyncThreadConfig,
    pub(crate) local_mode: bool,
    pub(crate) bootstrap: Option<String>,
    pub(crate) init_timeout: Option<Duration>,
    pub(crate) environment_tier: Option<String>,
    pub(crate) data_adapter: Option<Arc<dyn DataAdapter>>,
    pub(crate) persistent_storage: Option<Arc<dyn PersistentStorage>>,
    pub(crate) country_lookup: Option<Arc<dyn CountryLookup>>,
    pub(crate) observer: Option<Arc<dyn DiagnosticsObserver>>,
    pub(crate) fetcher: Option<Arc<dyn SpecsFetcher>>,
}

impl ClientConfig {
    /// Default base URL for API calls.
    pub const DEFAULT_BASE_URL: &'static str = DEFAULT_BASE_URL;

    /// Create a default configuration using the specified server secret.
    ///
    /// ```
    /// # use featuregate::ClientConfig;
    /// ClientConfig::from_server_secret("secret-key");
    /// ```
    pub fn from_server_secret(server_secret: impl Into<String>) -> ClientConfig {
        ClientConfig {
            server_secret: server_secret.into(),
            base_url: ClientConfig::DEFAULT_BASE_URL.to_owned(),
            sync_thread_config: SyncThreadConfig::default(),
            local_mode: false,
            bootstrap: None,
            init_timeout: None,
            environment_tier: None,
            data_adapter: None,
            persistent_storage: None,
            country_lookup: None,
            observer: None,
            fetcher: None,
        }
    }

    /// Override base URL for API calls. Clients should use the default setting in most cases.
    pub fn base_url(mut self, base_url: impl Into<String>) -> ClientConfig {
        self.base_url = base_url.into();
        self
    }

    /// Sync intervals and jitter of the background sync thread.
    pub fn sync_thread_config(mut self, config: SyncThreadConfig) -> ClientConfig {
        self.sync_thread_config = config;
        self
    }

    /// Never touch the network. Only the bootstrap payload, the data adapter and local overrides
    /// are used.
    pub fn local_mode(mut self, local_mode: bool) -> ClientConfig {
        self.local_mode = local_mode;
        self
    }

    /// Specs payload (same shape as a network response) installed synchronously on
    /// initialization.
    ///
    /// ```
    /// # use featuregate::ClientConfig;
    /// let config = ClientConfig::from_server_secret("secret-key")
    ///     .bootstrap(r#"{"has_updates": true, "time": 1, "feature_gates": [], "dynamic_configs": [], "layer_configs": []}"#);
    /// ```
    pub fn bootstrap(mut self, payload: impl Into<String>) -> ClientConfig {
        self.bootstrap = Some(payload.into());
        self
    }

    /// Upper bound on how long [`Client::initialize`] waits for the first network sync.
    pub fn init_timeout(mut self, timeout: Duration) -> ClientConfig {
        self.init_timeout = Some(timeout);
        self
    }

    /// Environment tier used by `environment_field` conditions when the user has none.
    pub fn environment_tier(mut self, tier: impl Into<String>) -> ClientConfig {
        self.environment_tier = Some(tier.into());
        self
    }

    /// Cache for specs payloads, read at startup and written after every network sync.
    pub fn data_adapter(mut self, adapter: impl DataAdapter + 'static) -> ClientConfig {
        self.data_adapter = Some(Arc::new(adapter));
        self
    }

    /// Storage for sticky experiment assignments.
    pub fn persistent_storage(mut self, storage: impl PersistentStorage + 'static) -> ClientConfig {
        self.persistent_storage = Some(Arc::new(storage));
        self
    }

    /// IP to country resolution for `ip_based` conditions.
    ///
    /// ```
    /// # use featuregate::ClientConfig;
    /// let config = ClientConfig::from_server_secret("secret-key").country_lookup(|ip: &str| {
    ///     ip.starts_with("81.").then(|| "GB".to_owned())
    /// });
    /// ```
    pub fn country_lookup(mut self, lookup: impl CountryLookup + 'static) -> ClientConfig {
        self.country_lookup = Some(Arc::new(lookup));
        self
    }

    /// Receive sync and evaluation events.
    ///
    /// ```
    /// # use featuregate::{ClientConfig, DiagnosticEvent};
    /// let config = ClientConfig::from_server_secret("secret-key").observer(|event: DiagnosticEvent| {
    ///   println!("{:?}", event);
    /// });
    /// ```
    pub fn observer(mut self, observer: impl DiagnosticsObserver + 'static) -> ClientConfig {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Replace the HTTP transport.
    pub fn fetcher(mut self, fetcher: impl SpecsFetcher + 'static) -> ClientConfig {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    /// Create a new [`Client`] using the specified configuration.
    ///
    /// ```
    /// # use featuregate::{ClientConfig, Client};
    /// let client: Client = ClientConfig::from_server_secret("secret-key").to_client();
    /// ```
    pub fn to_client(self) -> Client {
        Client::new(self)
    }
}
