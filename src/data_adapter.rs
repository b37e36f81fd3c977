use crate::error::BoxError;

/// Key under which the raw specs payload is stored in a [`DataAdapter`].
pub const SPECS_KEY: &str = "featuregate.specs";

/// Value read from a [`DataAdapter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterEntry {
    /// Stored value.
    pub value: String,
    /// Server time the value corresponds to, if known.
    pub time: Option<i64>,
}

/// Out-of-process storage for the specs payload.
///
/// At startup, when no bootstrap payload is supplied, the payload is read from the adapter. After
/// every successful network sync the raw payload is written back, so that other processes (or the
/// next start of this one) can initialize without the network.
///
/// Errors are logged and otherwise ignored.
pub trait DataAdapter: Send + Sync {
    /// Read the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<AdapterEntry>, BoxError>;

    /// Store `value` under `key`.
    fn set(&self, key: &str, value: &str, time: Option<i64>) -> Result<(), BoxError>;
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{collections::HashMap, sync::Mutex};

    use super::*;

    /// In-memory adapter shared by tests across the crate.
    #[derive(Default)]
    pub(crate) struct MemoryAdapter {
        pub entries: Mutex<HashMap<String, AdapterEntry>>,
    }

    impl DataAdapter for MemoryAdapter {
        fn get(&self, key: &str) -> Result<Option<AdapterEntry>, BoxError> {
            Ok(self.entries.lock().unwrap().get(key).cloned())
        }

        fn set(&self, key: &str, value: &str, time: Option<i64>) -> Result<(), BoxError> {
            self.entries.lock().unwrap().insert(
                key.to_owned(),
                AdapterEntry {
                    value: value.to_owned(),
                    time,
                },
            );
            Ok(())
        }
    }

    #[test]
    fn memory_adapter_round_trips() {
        let adapter = MemoryAdapter::default();
        assert_eq!(adapter.get(SPECS_KEY).unwrap(), None);

        adapter.set(SPECS_KEY, "{}", Some(5)).unwrap();

        assert_eq!(
            adapter.get(SPECS_KEY).unwrap(),
            Some(AdapterEntry {
                value: "{}".to_owned(),
                time: Some(5),
            })
        );
    }
}
