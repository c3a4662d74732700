use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::scheduler::StageType;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Bounding box for a rendered thumbnail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThumbnailSize {
    pub width: u32,
    pub height: u32,
}

impl ThumbnailSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for ThumbnailSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for ThumbnailSize {
    type Err = String;

    /// Parses `WIDTHxHEIGHT`, e.g. `300x200`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .to_lowercase()
            .split_once('x')
            .map(|(w, h)| (w.to_string(), h.to_string()))
            .ok_or_else(|| format!("Invalid thumbnail size: {}. Expected WIDTHxHEIGHT", s))?;
        let width: u32 = w
            .parse()
            .map_err(|_| format!("Invalid thumbnail width: {}", w))?;
        let height: u32 = h
            .parse()
            .map_err(|_| format!("Invalid thumbnail height: {}", h))?;
        if width == 0 || height == 0 {
            return Err(format!("Thumbnail size must be non-zero: {}", s));
        }
        Ok(Self { width, height })
    }
}

/// Configuration for the job orchestration engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of jobs in Processing at once
    pub max_concurrency: usize,
    /// Minimum age of a terminal job before the sweeper deletes it
    pub retention_window: Duration,
    /// How often the retention sweeper runs
    pub retention_sweep_interval: Duration,
    /// Stages the required-jobs policy may select
    pub enabled_stages: HashSet<StageType>,
    /// Sizes rendered by thumbnail generation
    pub thumbnail_sizes: Vec<ThumbnailSize>,
    /// Fallback admission tick; admission also runs after every enqueue and completion
    pub dispatch_tick_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            retention_window: 30 * DAY,
            retention_sweep_interval: DAY,
            enabled_stages: StageType::ALL.into_iter().collect(),
            thumbnail_sizes: vec![
                ThumbnailSize::new(150, 150),
                ThumbnailSize::new(300, 300),
                ThumbnailSize::new(800, 600),
            ],
            dispatch_tick_interval: Duration::from_secs(1),
        }
    }
}

impl EngineConfig {
    pub fn new(max_concurrency: usize) -> Self {
        Self::default().with_max_concurrency(max_concurrency)
    }

    /// Values below 1 are raised to 1 so the engine can always make progress.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_retention_window(mut self, window: Duration) -> Self {
        self.retention_window = window;
        self
    }

    pub fn with_retention_sweep_interval(mut self, interval: Duration) -> Self {
        self.retention_sweep_interval = interval;
        self
    }

    pub fn with_enabled_stages(mut self, stages: impl IntoIterator<Item = StageType>) -> Self {
        self.enabled_stages = stages.into_iter().collect();
        self
    }

    pub fn with_thumbnail_sizes(mut self, sizes: Vec<ThumbnailSize>) -> Self {
        self.thumbnail_sizes = sizes;
        self
    }

    pub fn with_dispatch_tick_interval(mut self, interval: Duration) -> Self {
        self.dispatch_tick_interval = interval;
        self
    }

    pub fn is_stage_enabled(&self, stage: StageType) -> bool {
        self.enabled_stages.contains(&stage)
    }
}
