use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub index: IndexConfig,
    pub matcher: MatcherConfig,
    pub search: SearchConfig,
    pub preprocess: PreprocessConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Image extensions picked up by the corpus walk, compared case-insensitively.
    pub extensions: Vec<String>,
    /// Log a progress line every this many candidates.
    pub progress_every: usize,
    /// Worker threads for extraction and scoring; 0 means one per core.
    pub threads: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            extensions: ["jpg", "jpeg", "png", "bmp"].iter().map(|s| s.to_string()).collect(),
            progress_every: 50,
            threads: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Nearest neighbour must be closer than `ratio` times the second nearest.
    pub ratio: f32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self { ratio: 0.8 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub top_n: usize,
    /// Candidates must score strictly above this.
    pub min_score: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { top_n: 5, min_score: 4 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlurMethod {
    #[default]
    Gaussian,
    Median,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub blur: BlurMethod,
    /// CLAHE clip limit, as a multiple of the mean bin height of a tile.
    pub clip_limit: f32,
    /// CLAHE tiles per side.
    pub tile_grid: u32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self { blur: BlurMethod::Gaussian, clip_limit: 2.0, tile_grid: 8 }
    }
}

impl Config {
    /// Load from an optional TOML file, then apply `SIMSEARCH_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)?;
                toml::from_str(&text)?
            }
            None => Config::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = env_parse::<f32>("SIMSEARCH_RATIO")? {
            self.matcher.ratio = v;
        }
        if let Some(v) = env_parse::<u32>("SIMSEARCH_MIN_SCORE")? {
            self.search.min_score = v;
        }
        if let Some(v) = env_parse::<usize>("SIMSEARCH_TOP_N")? {
            self.search.top_n = v;
        }
        if let Some(v) = env_parse::<usize>("SIMSEARCH_THREADS")? {
            self.index.threads = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.matcher.ratio > 0.0 && self.matcher.ratio <= 1.0) {
            return Err(SearchError::Config(format!("matcher.ratio must be in (0, 1], got {}", self.matcher.ratio)));
        }
        if self.search.top_n == 0 {
            return Err(SearchError::Config("search.top_n must be at least 1".into()));
        }
        if !(self.preprocess.clip_limit > 0.0) {
            return Err(SearchError::Config(format!(
                "preprocess.clip_limit must be positive, got {}",
                self.preprocess.clip_limit
            )));
        }
        if self.preprocess.tile_grid == 0 {
            return Err(SearchError::Config("preprocess.tile_grid must be at least 1".into()));
        }
        if self.index.extensions.is_empty() {
            return Err(SearchError::Config("index.extensions must not be empty".into()));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| SearchError::Config(format!("{key}: cannot parse {raw:?}"))),
        Err(_) => Ok(None),
    }
}
