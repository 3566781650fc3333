//! Persisted derived results, keyed by what they were derived from.

use crate::channel::Channel;
use crate::sync::AlignedTable;
use crate::utils::{load_msgpack, save_msgpack};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Identity of a derived result: input identity, input content, operation
/// and parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheKey {
    pub identity: String,
    pub fingerprint: String,
    pub op: String,
    pub params: Vec<String>,
}

impl CacheKey {
    /// md5 of every field of the key.
    pub fn digest(&self) -> String {
        let joined = format!(
            "{}\n{}\n{}\n{}",
            self.identity,
            self.fingerprint,
            self.op,
            self.params.join("\n")
        );
        format!("{:x}", md5::compute(joined.as_bytes()))
    }

    fn file_name(&self) -> String {
        format!("{}.msgpack", self.digest())
    }
}

/// Fingerprint of results derived from the entries behind `keys`.
///
/// Changes whenever any of the keys changes, including its parameters.
pub fn combine<'a, I>(keys: I) -> String
where
    I: IntoIterator<Item = &'a CacheKey>,
{
    let mut ctx = md5::Context::new();
    for key in keys {
        ctx.consume(key.digest());
        ctx.consume(b"\n");
    }
    format!("{:x}", ctx.compute())
}

/// Payloads whose completeness is judged by the columns they carry.
pub trait Columns {
    fn column_names(&self) -> Vec<&str>;
}

impl Columns for Channel {
    fn column_names(&self) -> Vec<&str> {
        self.columns().iter().map(|col| col.name.as_str()).collect()
    }
}

impl Columns for AlignedTable {
    fn column_names(&self) -> Vec<&str> {
        self.columns().iter().map(|col| col.name.as_str()).collect()
    }
}

#[derive(Serialize, Deserialize)]
struct Entry<T> {
    key: CacheKey,
    payload: T,
}

/// Directory of cache entries, one file per key.
pub struct Cache {
    dir: PathBuf,
}

impl Cache {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn entry_file(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Look up the entry for `key`.
    ///
    /// Returns `None` when there is no entry, when it cannot be decoded, or
    /// when it lacks any of the `expected` columns. Partial entries are stale
    /// and never returned.
    pub fn load<T>(&self, key: &CacheKey, expected: &[String]) -> Result<Option<T>>
    where
        T: DeserializeOwned + Columns,
    {
        let file = self.entry_file(key);
        if !file.is_file() {
            log::info!("cache miss for {} of {:?}", key.op, key.identity);
            return Ok(None);
        }

        let entry: Entry<T> = match load_msgpack(&file) {
            Ok(entry) => entry,
            Err(error) => {
                log::warn!("discarding unreadable cache entry {file:?}: {error:#}");
                return Ok(None);
            }
        };
        if &entry.key != key {
            log::warn!("discarding cache entry {file:?} with a different key");
            return Ok(None);
        }

        let names = entry.payload.column_names();
        let missing: Vec<_> = expected
            .iter()
            .filter(|col| !names.contains(&col.as_str()))
            .collect();
        if !missing.is_empty() {
            log::warn!("cache entry {file:?} is stale, missing columns {missing:?}");
            return Ok(None);
        }

        log::info!("cache hit for {} of {:?}", key.op, key.identity);
        Ok(Some(entry.payload))
    }

    pub fn store<T: Serialize>(&self, key: &CacheKey, payload: &T) -> Result<()> {
        let file = self.entry_file(key);
        let entry = Entry {
            key: key.clone(),
            payload,
        };
        save_msgpack(&entry, &file).with_context(|| format!("failed to store {file:?}"))?;
        log::info!("cached {} of {:?} in {file:?}", key.op, key.identity);
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        if self.dir.is_dir() {
            fs::remove_dir_all(&self.dir)
                .with_context(|| format!("failed to remove {:?}", self.dir))?;
            log::info!("removed {:?}", self.dir);
        }
        Ok(())
    }
}

/// Content fingerprint of a set of input files.
pub fn fingerprint<P: AsRef<Path>>(files: &[P]) -> Result<String> {
    let mut ctx = md5::Context::new();
    for file in files {
        let file = file.as_ref();
        let bytes = fs::read(file).with_context(|| format!("failed to read {file:?}"))?;
        ctx.consume((bytes.len() as u64).to_le_bytes());
        ctx.consume(&bytes);
    }
    Ok(format!("{:x}", ctx.compute()))
}
