//! Incremental synchronization of ID lists.
//!
//! An ID list is an append-only file of diff lines (`+<id>` adds an id, `-<id>` removes it). The
//! lookup table tells which lists exist and how large their files are. Each cycle fetches only the
//! bytes past what has already been read, so large lists are downloaded once and then extended.
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use serde::Deserialize;
use tokio::task::JoinSet;

use crate::{
    fetcher::{IdListChunk, SpecsFetcher},
    snapshot::IdLists,
    Error, Result,
};

/// Membership set of hashed identifiers plus the bookkeeping needed to extend it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdList {
    /// List name.
    pub name: String,
    /// Id of the file the list is read from. Changes when the file is rotated.
    pub file_id: String,
    /// Creation time of the file.
    pub creation_time: i64,
    /// File location.
    pub url: String,
    /// Number of bytes of the file applied so far.
    pub read_bytes: u64,
    /// Current members.
    pub ids: HashSet<String>,
}

impl IdList {
    fn empty(name: &str, entry: &IdListLookupEntry) -> IdList {
        IdList {
            name: name.to_owned(),
            file_id: entry.file_id.clone(),
            creation_time: entry.creation_time,
            url: entry.url.clone(),
            read_bytes: 0,
            ids: HashSet::new(),
        }
    }

    /// Whether `id` is a member.
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Apply a chunk of diff lines and advance the read position.
    ///
    /// A chunk that does not start with `+` or `-` means the read position is misaligned with the
    /// file. Nothing is applied and [`Error::IdListDesync`] is returned; the caller drops the list.
    pub fn apply_chunk(&mut self, chunk: &IdListChunk) -> Result<()> {
        if !chunk.data.starts_with(['+', '-']) {
            return Err(Error::IdListDesync {
                name: self.name.clone(),
            });
        }

        for line in chunk.data.lines() {
            if line.len() < 2 {
                continue;
            }
            let (op, id) = line.split_at(1);
            let id = id.trim();
            match op {
                "+" => {
                    self.ids.insert(id.to_owned());
                }
                "-" => {
                    self.ids.remove(id);
                }
                _ => {}
            }
        }

        self.read_bytes += chunk.len();
        Ok(())
    }
}

/// One entry of the ID-list lookup table.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IdListLookupEntry {
    url: String,
    #[serde(rename = "fileID")]
    file_id: String,
    creation_time: i64,
    size: u64,
}

/// Parse the lookup table. Entries that fail to parse are skipped, not fatal.
pub(crate) fn parse_lookup(payload: &[u8]) -> Result<HashMap<String, IdListLookupEntry>> {
    let raw: HashMap<String, serde_json::Value> = serde_json::from_slice(payload)
        .map_err(|err| Error::MalformedIdListLookup(Arc::new(err)))?;

    Ok(raw
        .into_iter()
        .filter_map(|(name, value)| match serde_json::from_value(value) {
            Ok(entry) => Some((name, entry)),
            Err(err) => {
                log::warn!(target: "featuregate", list = name.as_str(); "skipping malformed ID list lookup entry: {err}");
                None
            }
        })
        .collect())
}

/// What a lookup entry requires for a list.
enum Plan {
    /// Keep this list as is.
    Keep(Arc<IdList>),
    /// Read the file tail into `base`.
    Fetch(IdList),
}

fn plan(name: &str, entry: &IdListLookupEntry, existing: Option<&Arc<IdList>>) -> Plan {
    let base = match existing {
        Some(list) if entry.creation_time < list.creation_time => {
            // Stale lookup response.
            return Plan::Keep(Arc::clone(list));
        }
        Some(list) if list.file_id == entry.file_id => Arc::clone(list),
        // New list, or the file got rotated.
        _ => Arc::new(IdList::empty(name, entry)),
    };

    if entry.size <= base.read_bytes {
        Plan::Keep(base)
    } else {
        Plan::Fetch(IdList::clone(&base))
    }
}

/// Run one ID-list sync cycle against `current` and return the new set of lists.
///
/// All range fetches run concurrently and the cycle returns once every one has settled. A failed
/// fetch keeps that list at its previous read position; a desynced list is removed. Lists missing
/// from the lookup are removed.
pub(crate) async fn sync_id_lists(
    fetcher: Arc<dyn SpecsFetcher>,
    current: &IdLists,
) -> Result<IdLists> {
    let lookup = parse_lookup(&fetcher.fetch_id_list_lookup().await?)?;

    let mut lists = IdLists::with_capacity(lookup.len());
    let mut fetches = JoinSet::new();

    for (name, entry) in lookup {
        match plan(&name, &entry, current.get(&name)) {
            Plan::Keep(list) => {
                lists.insert(name, list);
            }
            Plan::Fetch(base) => {
                let fetcher = Arc::clone(&fetcher);
                fetches.spawn(async move {
                    let chunk = fetcher.fetch_id_list_chunk(&base.url, base.read_bytes).await;
                    (base, chunk)
                });
            }
        }
    }

    while let Some(joined) = fetches.join_next().await {
        let (mut list, chunk) = match joined {
            Ok(it) => it,
            Err(err) => {
                log::warn!(target: "featuregate", "ID list fetch task failed: {err}");
                continue;
            }
        };

        match chunk {
            Ok(chunk) => match list.apply_chunk(&chunk) {
                Ok(()) => {
                    log::debug!(target: "featuregate", list = list.name.as_str(), size = list.ids.len(); "updated ID list");
                    lists.insert(list.name.clone(), Arc::new(list));
                }
                Err(err) => {
                    log::warn!(target: "featuregate", list = list.name.as_str(); "dropping ID list: {err}");
                }
            },
            Err(err) => {
                log::warn!(target: "featuregate", list = list.name.as_str(); "failed to fetch ID list: {err}");
                lists.insert(list.name.clone(), Arc::new(list));
            }
        }
    }

    Ok(lists)
}
