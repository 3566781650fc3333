use crate::cache::{Cache, CacheKey, combine, fingerprint};
use crate::channel::{Channel, Column};
use crate::config::{ChannelConfig, Config};
use crate::region::{ActiveRegion, find_active_region};
use crate::stats::{Stat, max_deviation, rolling_moments};
use crate::sync::{AlignedTable, Selection, split_valid, synchronize};
use crate::synth::Generator;
use crate::utils::{load_msgpack, nan_mean_std, save_msgpack};
use anyhow::{Context, Result, bail};
use glob::glob;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

const FOLDER_PREFIX: &str = "data_collection_";
const CACHE_DIR: &str = "cache";
const ALIGNED_FILE: &str = "aligned_data.msgpack";
const SUMMARY_FILE: &str = "summary.toml";
const STOP_FILE: &str = "STOP";

/// Outcome of processing one data folder.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct FolderSummary {
    pub folder: String,
    pub channels_ok: Vec<String>,
    pub failures: Vec<String>,
    pub aligned_rows: Option<usize>,
    pub region: Option<RegionSummary>,
    pub columns: Vec<ColumnSummary>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegionSummary {
    pub channel: String,
    pub start: usize,
    pub end: usize,
    pub t_start: f64,
    pub t_end: f64,
}

/// Spread of one column over the active region.
#[derive(Debug, Serialize, Deserialize)]
pub struct ColumnSummary {
    pub channel: String,
    pub column: String,
    pub n_vals: usize,
    pub mean: f64,
    pub std_dev: f64,
}

pub struct Manager {
    data_dir: PathBuf,
    cfg: Config,
    abort: Arc<AtomicBool>,
}

impl Manager {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();

        let cfg =
            Config::from_file(data_dir.join("config.toml")).context("failed to construct cfg")?;
        log::info!("{cfg:#?}");

        Ok(Self {
            data_dir,
            cfg,
            abort: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Flag that stops a running batch before its next channel.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    fn should_abort(&self) -> bool {
        self.abort.load(Ordering::Relaxed) || self.data_dir.join(STOP_FILE).exists()
    }

    pub fn create_synthetic(&self) -> Result<()> {
        let n_existing = self.find_folders().context("failed to find data folders")?.len();
        for i_folder in 0..self.cfg.synth.n_folders {
            let folder_idx = n_existing + i_folder;
            let folder = self
                .data_dir
                .join(format!("{FOLDER_PREFIX}{folder_idx:04}"));
            fs::create_dir_all(&folder).with_context(|| format!("failed to create {folder:?}"))?;

            let seed = self.cfg.synth.seed + folder_idx as u64;
            let channels = Generator::new(self.cfg.synth.duration_s, seed)
                .generate()
                .context("failed to generate recording")?;
            for channel in &channels {
                let Some(ch_cfg) = self.cfg.channel(channel.name()) else {
                    log::warn!("channel {:?} is not configured, skipping", channel.name());
                    continue;
                };
                save_msgpack(channel, folder.join(&ch_cfg.file))
                    .with_context(|| format!("failed to save {:?}", channel.name()))?;
            }
            log::info!("created {folder:?}");
        }
        Ok(())
    }

    /// Process every data folder, returning one summary per finished folder.
    ///
    /// Channel failures are recorded in the folder summaries; only an abort
    /// request stops the batch early.
    pub fn process_all(&self, force: bool) -> Result<Vec<FolderSummary>> {
        let folders = self.find_folders().context("failed to find data folders")?;
        log::info!("found {} data folders", folders.len());

        let mut summaries = Vec::with_capacity(folders.len());
        for folder in folders {
            log::info!("processing {folder:?}");
            let Some(summary) = self
                .process_folder(&folder, force)
                .with_context(|| format!("failed to process {folder:?}"))?
            else {
                log::warn!("abort requested, stopping batch");
                break;
            };

            let summary_file = folder.join(SUMMARY_FILE);
            let contents = toml::to_string_pretty(&summary).context("failed to serialize summary")?;
            fs::write(&summary_file, contents)
                .with_context(|| format!("failed to write {summary_file:?}"))?;
            summaries.push(summary);
        }
        Ok(summaries)
    }

    pub fn clean_all(&self) -> Result<()> {
        for folder in self.find_folders().context("failed to find data folders")? {
            Cache::new(folder.join(CACHE_DIR)).clear()?;
            for file in [ALIGNED_FILE, SUMMARY_FILE] {
                let file = folder.join(file);
                if file.is_file() {
                    fs::remove_file(&file).with_context(|| format!("failed to remove {file:?}"))?;
                    log::info!("removed {file:?}");
                }
            }
        }
        Ok(())
    }

    /// Returns `None` if the batch was aborted.
    fn process_folder(&self, folder: &Path, force: bool) -> Result<Option<FolderSummary>> {
        let cache = Cache::new(folder.join(CACHE_DIR));
        let mut summary = FolderSummary {
            folder: folder.to_string_lossy().into_owned(),
            ..Default::default()
        };

        let mut channels = BTreeMap::new();
        let mut keys = BTreeMap::new();
        for ch_cfg in &self.cfg.channels {
            if self.should_abort() {
                return Ok(None);
            }
            match self.derive_channel(folder, ch_cfg, &cache, force) {
                Ok((channel, key)) => {
                    summary.channels_ok.push(ch_cfg.name.clone());
                    channels.insert(ch_cfg.name.clone(), channel);
                    keys.insert(ch_cfg.name.clone(), key);
                }
                Err(error) => {
                    log::warn!("skipping channel {:?}: {error:#}", ch_cfg.name);
                    summary.failures.push(format!("{}: {error:#}", ch_cfg.name));
                }
            }
        }

        match self.region_summary(&channels) {
            Ok((region, columns)) => {
                summary.region = Some(region);
                summary.columns = columns;
            }
            Err(error) => {
                log::warn!("no active region: {error:#}");
                summary.failures.push(format!("region: {error:#}"));
            }
        }

        if self.should_abort() {
            return Ok(None);
        }
        match self.align_channels(folder, &channels, &keys, &cache, force, &mut summary) {
            Ok(table) => summary.aligned_rows = Some(table.len()),
            Err(error) => {
                log::warn!("no aligned table: {error:#}");
                summary.failures.push(format!("sync: {error:#}"));
            }
        }

        Ok(Some(summary))
    }

    /// Load a channel and append its rolling statistics, all or nothing.
    ///
    /// Also returns the cache key the derived channel is stored under.
    fn derive_channel(
        &self,
        folder: &Path,
        ch_cfg: &ChannelConfig,
        cache: &Cache,
        force: bool,
    ) -> Result<(Channel, CacheKey)> {
        let file = folder.join(&ch_cfg.file);
        let rolling_cfg = &self.cfg.rolling;
        let key = CacheKey {
            identity: ch_cfg.name.clone(),
            fingerprint: fingerprint(&[&file])?,
            op: "rolling".to_string(),
            params: [rolling_cfg.avg_len.to_string(), rolling_cfg.stat_len.to_string()]
                .into_iter()
                .chain(ch_cfg.rolling.iter().cloned())
                .collect(),
        };
        let expected: Vec<_> = ch_cfg
            .rolling
            .iter()
            .flat_map(|col| Stat::ALL.map(|stat| stat.column_name(col)))
            .collect();
        if !force {
            if let Some(channel) = cache.load::<Channel>(&key, &expected)? {
                return Ok((channel, key));
            }
        }

        let mut channel: Channel =
            load_msgpack(&file).with_context(|| format!("failed to load {file:?}"))?;
        channel.validate()?;
        if channel.name() != ch_cfg.name {
            bail!("file holds channel {:?}", channel.name());
        }
        if (channel.rate_hz() - ch_cfg.rate_hz).abs() > 1e-9 * ch_cfg.rate_hz {
            log::warn!(
                "{:?} is sampled at {} Hz, configured for {} Hz",
                ch_cfg.name,
                channel.rate_hz(),
                ch_cfg.rate_hz
            );
        }
        log::info!("loaded {:?} with {} samples", ch_cfg.name, channel.len());

        let mut derived = Vec::new();
        for col in &ch_cfg.rolling {
            derived.extend(
                self.rolling_columns(&channel, col)
                    .with_context(|| format!("failed to derive statistics of {col:?}"))?,
            );
        }
        for col in derived {
            channel.append(col)?;
        }

        cache.store(&key, &channel)?;
        Ok((channel, key))
    }

    fn rolling_columns(&self, channel: &Channel, col: &str) -> Result<Vec<Column>> {
        let vals = channel.column(col)?;
        let rolling_cfg = &self.cfg.rolling;

        let mean = rolling_moments(vals, rolling_cfg.avg_len, Stat::Mean)?;
        let moments = rolling_moments(vals, rolling_cfg.stat_len, Stat::Kurt)?;

        for (stat, computed) in [(Stat::Mean, &mean), (Stat::Kurt, &moments)] {
            let dev = max_deviation(vals, computed, stat, rolling_cfg.verify_windows)?;
            if dev > rolling_cfg.verify_tol {
                log::warn!(
                    "rolling statistics of {:?}/{col:?} (window {}) deviate from the reference by {dev:e}",
                    channel.name(),
                    computed.window()
                );
            }
        }

        let mut cols = vec![Column::new(
            Stat::Mean.column_name(col),
            mean.series(Stat::Mean).aligned(),
        )];
        for stat in [Stat::StdDev, Stat::Skew, Stat::Kurt] {
            cols.push(Column::new(
                stat.column_name(col),
                moments.series(stat).aligned(),
            ));
        }
        Ok(cols)
    }

    /// Detect the active region and summarize the rolling columns inside it.
    fn region_summary(
        &self,
        channels: &BTreeMap<String, Channel>,
    ) -> Result<(RegionSummary, Vec<ColumnSummary>)> {
        let region_cfg = &self.cfg.region;
        let Some(channel) = channels.get(&region_cfg.channel) else {
            bail!("region channel {:?} is unavailable", region_cfg.channel);
        };
        let series = channel.column(&region_cfg.column)?;

        let Some(region) = find_active_region(series, region_cfg.threshold) else {
            bail!(
                "{:?} never exceeds {}",
                region_cfg.column,
                region_cfg.threshold
            );
        };
        let margin = (region_cfg.margin_s * channel.rate_hz()).round() as usize;
        let region = region.shrink(margin);
        if region.is_empty() {
            bail!("active region is shorter than twice the margin");
        }
        let ActiveRegion { start, end } = region;

        let time = channel.time();
        let (t_start, t_end) = (time[start], time[end - 1]);
        log::info!(
            "active region of {:?}: {t_start:.3}s to {t_end:.3}s ({} samples)",
            channel.name(),
            region.len()
        );

        let mut columns = Vec::new();
        for ch_cfg in &self.cfg.channels {
            let Some(channel) = channels.get(&ch_cfg.name) else {
                continue;
            };
            let (i_start, i_end) = channel.index_range(t_start, t_end);
            for col in &ch_cfg.rolling {
                let (mean, std_dev, n_vals) = nan_mean_std(&channel.column(col)?[i_start..i_end]);
                columns.push(ColumnSummary {
                    channel: ch_cfg.name.clone(),
                    column: col.clone(),
                    n_vals,
                    mean,
                    std_dev,
                });
            }
        }

        let region = RegionSummary {
            channel: channel.name().to_string(),
            start,
            end,
            t_start,
            t_end,
        };
        Ok((region, columns))
    }

    /// Build (or reuse) the aligned table of all synchronized columns.
    ///
    /// Secondaries failing their preconditions are reported and left out.
    /// The table is cached under the keys of the derived channels it reads,
    /// so any change of input or rolling parameters rebuilds it.
    fn align_channels(
        &self,
        folder: &Path,
        channels: &BTreeMap<String, Channel>,
        keys: &BTreeMap<String, CacheKey>,
        cache: &Cache,
        force: bool,
        summary: &mut FolderSummary,
    ) -> Result<AlignedTable> {
        let basis_name = &self.cfg.sync.basis;
        let Some(basis) = channels.get(basis_name) else {
            bail!("basis channel {basis_name:?} is unavailable");
        };
        let basis_cfg = self
            .cfg
            .channel(basis_name)
            .context("basis channel is not configured")?;
        let basis = Selection::new(basis, &basis_cfg.sync);

        let mut secondaries = Vec::new();
        for ch_cfg in &self.cfg.channels {
            if &ch_cfg.name == basis_name || ch_cfg.sync.is_empty() {
                continue;
            }
            let Some(channel) = channels.get(&ch_cfg.name) else {
                continue;
            };
            secondaries.push(Selection::new(channel, &ch_cfg.sync));
        }
        let (secondaries, skipped) = split_valid(secondaries);
        for skip in skipped {
            log::warn!("leaving {:?} out of the aligned table: {}", skip.channel, skip.error);
            summary.failures.push(format!("{}: {}", skip.channel, skip.error));
        }

        let derived_keys = std::iter::once(&basis)
            .chain(&secondaries)
            .map(|sel| {
                keys.get(sel.channel.name())
                    .with_context(|| format!("no cache key for {:?}", sel.channel.name()))
            })
            .collect::<Result<Vec<_>>>()?;
        let key = CacheKey {
            identity: folder.to_string_lossy().into_owned(),
            fingerprint: combine(derived_keys),
            op: "synchronize".to_string(),
            params: std::iter::once(&basis)
                .chain(&secondaries)
                .flat_map(|sel| {
                    std::iter::once(sel.channel.name().to_string()).chain(sel.columns.clone())
                })
                .collect(),
        };

        let expected = &self.cfg.sync.expected_columns;
        let cached = if force {
            None
        } else {
            cache.load::<AlignedTable>(&key, expected)?
        };
        let table = match cached {
            Some(table) => table,
            None => {
                let table = synchronize(&basis, &secondaries)?;
                log::info!(
                    "aligned {} columns onto {} rows of {basis_name:?}",
                    table.columns().len(),
                    table.len()
                );
                cache.store(&key, &table)?;
                table
            }
        };

        let missing: Vec<_> = expected
            .iter()
            .filter(|col| table.column(col).is_none())
            .collect();
        if !missing.is_empty() {
            summary
                .failures
                .push(format!("aligned table lacks expected columns {missing:?}"));
        }

        save_msgpack(&table, folder.join(ALIGNED_FILE)).context("failed to save aligned table")?;
        Ok(table)
    }

    /// Data folders below the data directory, in sorted order.
    fn find_folders(&self) -> Result<Vec<PathBuf>> {
        let pattern = self.data_dir.join("**").join(format!("{FOLDER_PREFIX}*"));
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        let mut folders: Vec<_> = glob(pattern)
            .context("failed to glob data folders")?
            .filter_map(Result::ok)
            .filter(|p| p.is_dir())
            .collect();
        folders.sort();
        Ok(folders)
    }
}
