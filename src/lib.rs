//! An embedded evaluation engine for feature gates, dynamic configs, experiments and layers.
//!
//! # Overview
//!
//! The crate revolves around a [`Client`] that evaluates specs for a [`User`]. Specs are
//! downloaded from the server in the background and kept in memory, so every evaluation is a
//! synchronous, in-process computation that never waits on the network. Each evaluation returns an
//! [`EvaluationResult`] carrying the value, the rule that produced it and the exposures it
//! depended on.
//!
//! Specs can also be supplied up front (a bootstrap payload), loaded from a [`DataAdapter`], or
//! replaced entirely with local overrides. Experiments marked active keep their assignments stable
//! across rule changes when a [`PersistentStorage`] is configured.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum. Only initialization and the background sync return
//! errors. Evaluation always produces a result; failures show up in
//! [`EvaluationDetails::reason`] and [`EvaluationResult::unsupported`].
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging messages under
//! the `featuregate` target. Consider integrating a `log`-compatible logger implementation for
//! better visibility into sync and evaluation.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod client;
mod config;
mod data_adapter;
mod error;
mod eval;
mod events;
mod fetcher;
mod hashing;
mod id_lists;
mod overrides;
mod persistent_storage;
mod snapshot;
pub mod spec;
mod spec_store;
mod sync_thread;
mod synchronizer;
mod user;

pub use client::{Client, InitializeDetails};
pub use config::ClientConfig;
pub use data_adapter::{AdapterEntry, DataAdapter, SPECS_KEY};
pub use error::{BoxError, Error, Result};
pub use eval::{
    CountryLookup, EvalOptions, EvaluationDetails, EvaluationReason, EvaluationResult, Evaluator,
    EvaluatorConfig, SecondaryExposure,
};
pub use events::{DiagnosticEvent, DiagnosticsObserver, SyncKind};
pub use fetcher::{BoxFuture, HttpFetcher, IdListChunk, SpecsFetcher, DEFAULT_BASE_URL};
pub use hashing::hash64;
pub use id_lists::IdList;
pub use persistent_storage::{PersistentStorage, StickyKey, StickyValue};
pub use snapshot::{IdLists, Snapshot, SpecSet, SyncSource};
pub use spec_store::SpecStore;
pub use sync_thread::SyncThreadConfig;
pub use user::{Attributes, User, USER_ID_TYPE};

/// JSON object used for config values and custom attributes.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;
