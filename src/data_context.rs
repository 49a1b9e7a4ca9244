use crate::models::MarketSample;
use anyhow::{anyhow, Context, Result};
use chrono::prelude::*;
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const MARKET_DATA_SNAPSHOT_VERSION: u32 = 1;
const SAMPLE_INTERVAL_SECONDS: i64 = 60;
const MAX_REPORTED_GAPS: usize = 20;

#[derive(Serialize, Deserialize)]
struct MarketDataSnapshot {
    version: u32,
    generated_at: DateTime<Utc>,
    #[serde(default)]
    source_dirs: Vec<String>,
    samples: Vec<MarketSample>,
}

/// A run of missing one-minute samples between two consecutive timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataGap {
    pub previous: i64,
    pub next: i64,
    pub missing_samples: i64,
}

impl DataGap {
    pub fn describe(&self) -> String {
        format!(
            "{} missing between {} and {}",
            self.missing_samples,
            format_timestamp(self.previous),
            format_timestamp(self.next)
        )
    }
}

/// Time-ordered price series shared read-only between simulation runs.
#[derive(Debug, Clone)]
pub struct MarketData {
    samples: Arc<Vec<MarketSample>>,
    source_dirs: Vec<String>,
}

impl MarketData {
    /// Wraps already ordered samples.
    pub fn from_samples(samples: Vec<MarketSample>) -> Self {
        Self {
            samples: Arc::new(samples),
            source_dirs: Vec::new(),
        }
    }

    /// Imports every `*.csv` file of each directory and merges the directories.
    ///
    /// Earlier directories win when the same timestamp appears more than once.
    pub fn from_csv_dirs<P: AsRef<Path>>(dirs: &[P]) -> Result<Self> {
        if dirs.is_empty() {
            return Err(anyhow!("At least one CSV directory is required"));
        }

        let mut per_dir = Vec::with_capacity(dirs.len());
        for dir in dirs {
            per_dir.push(import_csv_dir(dir.as_ref())?);
        }
        let samples = combine_samples(per_dir);
        info!("Combined {} entries in total", samples.len());

        Ok(Self {
            samples: Arc::new(samples),
            source_dirs: dirs
                .iter()
                .map(|dir| dir.as_ref().display().to_string())
                .collect(),
        })
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading market data snapshot from {}", path.display());
        let file = File::open(path).with_context(|| {
            format!("Failed to open market data snapshot at {}", path.display())
        })?;
        let reader = BufReader::new(file);
        let snapshot: MarketDataSnapshot =
            bincode::deserialize_from(reader).context("Snapshot decode failed")?;

        if snapshot.version != MARKET_DATA_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "Market data snapshot version mismatch (found {}, expected {})",
                snapshot.version,
                MARKET_DATA_SNAPSHOT_VERSION
            ));
        }

        info!(
            "Loaded {} samples (snapshot generated at {})",
            snapshot.samples.len(),
            snapshot.generated_at.to_rfc3339()
        );
        Ok(Self {
            samples: Arc::new(snapshot.samples),
            source_dirs: snapshot.source_dirs,
        })
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create snapshot directory {}", parent.display())
                })?;
            }
        }

        let file = File::create(path).with_context(|| {
            format!(
                "Unable to create market data snapshot at {}",
                path.display()
            )
        })?;
        let mut writer = BufWriter::new(file);
        let snapshot = MarketDataSnapshot {
            version: MARKET_DATA_SNAPSHOT_VERSION,
            generated_at: Utc::now(),
            source_dirs: self.source_dirs.clone(),
            samples: self.samples.as_ref().clone(),
        };
        bincode::serialize_into(&mut writer, &snapshot)
            .context("Failed to serialize market data snapshot")?;
        writer
            .flush()
            .context("Failed to flush market data snapshot to disk")?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[MarketSample] {
        &self.samples
    }

    pub fn samples_arc(&self) -> Arc<Vec<MarketSample>> {
        Arc::clone(&self.samples)
    }

    pub fn source_dirs(&self) -> &[String] {
        &self.source_dirs
    }

    /// Slices the series with signed positions; negative values count from the end
    /// and out-of-range values are clamped.
    pub fn window(&self, start: i64, end: i64) -> MarketData {
        let len = self.samples.len();
        let from = resolve_position(start, len);
        let to = resolve_position(end, len);
        let samples = if from < to {
            self.samples[from..to].to_vec()
        } else {
            Vec::new()
        };
        MarketData {
            samples: Arc::new(samples),
            source_dirs: self.source_dirs.clone(),
        }
    }

    /// Lists every place where consecutive samples are more than one minute apart.
    pub fn missing_gaps(&self) -> Vec<DataGap> {
        self.samples
            .windows(2)
            .filter_map(|pair| {
                let delta = pair[1].timestamp - pair[0].timestamp;
                (delta > SAMPLE_INTERVAL_SECONDS).then(|| DataGap {
                    previous: pair[0].timestamp,
                    next: pair[1].timestamp,
                    missing_samples: delta / SAMPLE_INTERVAL_SECONDS - 1,
                })
            })
            .filter(|gap| gap.missing_samples > 0)
            .collect()
    }

    pub fn log_summary(&self) {
        let (Some(first), Some(last)) = (self.samples.first(), self.samples.last()) else {
            warn!("Market data is empty");
            return;
        };
        info!(
            "Market data: {} samples from {} to {}",
            self.samples.len(),
            format_timestamp(first.timestamp),
            format_timestamp(last.timestamp)
        );

        let gaps = self.missing_gaps();
        if gaps.is_empty() {
            return;
        }
        let missing: i64 = gaps.iter().map(|gap| gap.missing_samples).sum();
        warn!(
            "Market data has {} gaps ({} missing one-minute samples)",
            gaps.len(),
            missing
        );
        for gap in gaps.iter().take(MAX_REPORTED_GAPS) {
            warn!("  {}", gap.describe());
        }
        if gaps.len() > MAX_REPORTED_GAPS {
            warn!("  ... {} more", gaps.len() - MAX_REPORTED_GAPS);
        }
    }
}

fn resolve_position(position: i64, len: usize) -> usize {
    if position < 0 {
        let from_end = position.unsigned_abs() as usize;
        len.saturating_sub(from_end)
    } else {
        (position as usize).min(len)
    }
}

fn format_timestamp(timestamp: i64) -> String {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .map(|date| date.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

fn import_csv_dir(dir: &Path) -> Result<Vec<MarketSample>> {
    if !dir.is_dir() {
        return Err(anyhow!("CSV directory {} not found", dir.display()));
    }

    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to list CSV directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.is_file() && path.extension().map(|ext| ext == "csv").unwrap_or(false)
        })
        .collect();
    files.sort();

    let parsed = files
        .par_iter()
        .map(|path| read_csv_file(path))
        .collect::<Result<Vec<_>>>()?;

    let mut samples: Vec<MarketSample> = parsed.into_iter().flatten().collect();
    samples.sort_by_key(|sample| sample.timestamp);
    info!("Imported {} entries from {}", samples.len(), dir.display());
    Ok(samples)
}

fn read_csv_file(path: &Path) -> Result<Vec<MarketSample>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;
    reader
        .deserialize::<MarketSample>()
        .enumerate()
        .map(|(row, record)| {
            record.with_context(|| format!("Invalid row {} in {}", row + 1, path.display()))
        })
        .collect()
}

fn combine_samples(per_dir: Vec<Vec<MarketSample>>) -> Vec<MarketSample> {
    let mut seen = HashSet::new();
    let mut combined: Vec<MarketSample> = per_dir
        .into_iter()
        .flatten()
        .filter(|sample| seen.insert(sample.timestamp))
        .collect();
    combined.sort_by_key(|sample| sample.timestamp);
    combined
}
