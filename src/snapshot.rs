//! Immutable view of all specs and ID lists at a point in time.
use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    id_lists::IdList,
    spec::{Spec, SpecWire},
    Error, Result,
};

/// ID lists by name.
pub type IdLists = HashMap<String, Arc<IdList>>;

/// Where the specs of the current snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncSource {
    /// Nothing has been installed yet.
    Uninitialized,
    /// Fetched from the server.
    Network,
    /// Supplied by the host application at startup.
    Bootstrap,
    /// Read from the data adapter.
    DataAdapter,
}

/// Specs payload as received from the server.
///
/// The three spec arrays are required. A payload with a missing or non-array field fails to parse
/// and the update is discarded as a whole.
#[derive(Debug, Deserialize)]
struct SpecsResponse {
    #[serde(default)]
    time: i64,
    feature_gates: Vec<SpecWire>,
    dynamic_configs: Vec<SpecWire>,
    layer_configs: Vec<SpecWire>,
    #[serde(default)]
    layers: HashMap<String, Vec<String>>,
}

/// Only the update flag, read before committing to a full parse.
#[derive(Debug, Deserialize)]
struct SpecsResponseHeader {
    #[serde(default)]
    has_updates: Option<bool>,
}

/// Gates, dynamic configs and layers from a single specs payload.
#[derive(Debug, Default)]
pub struct SpecSet {
    /// Server time of the payload. Used as `sinceTime` for the next delta fetch.
    pub time: i64,
    /// Feature gates (including segments and holdouts) by name.
    pub gates: HashMap<String, Arc<Spec>>,
    /// Dynamic configs, experiments and autotunes by name.
    pub configs: HashMap<String, Arc<Spec>>,
    /// Layers by name.
    pub layers: HashMap<String, Arc<Spec>>,
    /// Experiment name to the name of the layer it is allocated in.
    pub experiment_to_layer: HashMap<String, String>,
}

impl SpecSet {
    /// Parse a specs payload.
    ///
    /// Returns `Ok(None)` if the payload does not carry `has_updates: true`. Any parse failure of
    /// the payload or of a single spec in it fails the whole payload.
    pub fn from_json(payload: &[u8]) -> Result<Option<SpecSet>> {
        let header: SpecsResponseHeader = serde_json::from_slice(payload)
            .map_err(|err| Error::MalformedSpecs(Arc::new(err)))?;
        if header.has_updates != Some(true) {
            return Ok(None);
        }

        let response: SpecsResponse = serde_json::from_slice(payload)
            .map_err(|err| Error::MalformedSpecs(Arc::new(err)))?;

        Ok(Some(SpecSet::from_response(response)))
    }

    fn from_response(response: SpecsResponse) -> SpecSet {
        fn by_name(specs: Vec<SpecWire>) -> HashMap<String, Arc<Spec>> {
            specs
                .into_iter()
                .map(|wire| {
                    let spec = Spec::from(wire);
                    (spec.name.clone(), Arc::new(spec))
                })
                .collect()
        }

        let experiment_to_layer = response
            .layers
            .into_iter()
            .flat_map(|(layer, experiments)| {
                experiments
                    .into_iter()
                    .map(move |experiment| (experiment, layer.clone()))
            })
            .collect();

        SpecSet {
            time: response.time,
            gates: by_name(response.feature_gates),
            configs: by_name(response.dynamic_configs),
            layers: by_name(response.layer_configs),
            experiment_to_layer,
        }
    }
}

/// Complete view of specs and ID lists. Never mutated once shared; replaced as a whole.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Current specs.
    pub specs: Arc<SpecSet>,
    /// Current ID lists.
    pub id_lists: Arc<IdLists>,
    /// Server time of the installed specs. `0` if nothing has been installed.
    pub last_sync_time: i64,
    /// `last_sync_time` of the first install, or `-1` if nothing has been installed yet.
    pub initial_sync_time: i64,
    /// Source of the installed specs.
    pub source: SyncSource,
}

impl Default for Snapshot {
    fn default() -> Snapshot {
        Snapshot {
            specs: Arc::default(),
            id_lists: Arc::default(),
            last_sync_time: 0,
            initial_sync_time: -1,
            source: SyncSource::Uninitialized,
        }
    }
}

impl Snapshot {
    /// Whether any specs have been installed.
    pub fn is_initialized(&self) -> bool {
        self.source != SyncSource::Uninitialized
    }

    /// Return a copy of this snapshot with `specs` installed. ID lists are kept.
    pub fn with_specs(&self, specs: SpecSet, source: SyncSource) -> Snapshot {
        let last_sync_time = specs.time;
        Snapshot {
            specs: Arc::new(specs),
            id_lists: Arc::clone(&self.id_lists),
            last_sync_time,
            initial_sync_time: if self.initial_sync_time < 0 {
                last_sync_time
            } else {
                self.initial_sync_time
            },
            source,
        }
    }

    /// Return a copy of this snapshot with `id_lists` installed. Specs are kept.
    pub fn with_id_lists(&self, id_lists: IdLists) -> Snapshot {
        Snapshot {
            id_lists: Arc::new(id_lists),
            ..self.clone()
        }
    }

    /// Look up a feature gate.
    pub fn get_gate(&self, name: &str) -> Option<&Arc<Spec>> {
        self.specs.gates.get(name)
    }

    /// Look up a dynamic config or experiment.
    pub fn get_config(&self, name: &str) -> Option<&Arc<Spec>> {
        self.specs.configs.get(name)
    }

    /// Look up a layer.
    pub fn get_layer(&self, name: &str) -> Option<&Arc<Spec>> {
        self.specs.layers.get(name)
    }

    /// Look up an ID list.
    pub fn get_id_list(&self, name: &str) -> Option<&Arc<IdList>> {
        self.id_lists.get(name)
    }

    /// Name of the layer `experiment` is allocated in.
    pub fn layer_for_experiment(&self, experiment: &str) -> Option<&str> {
        self.specs
            .experiment_to_layer
            .get(experiment)
            .map(String::as_str)
    }
}
