use std::{env, fs, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ExecError;

pub const DEFAULT_PAGE_SIZE: usize = 16384;
pub const DEFAULT_BUFFER_PAGES: usize = 100;

/// 4 byte tuple count at the start of every page.
pub const PAGE_HEADER_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MergeStrategy {
    /// Merge groups of a pass run one after another.
    #[default]
    Sequential,
    /// Merge groups of a pass run on the rayon pool; passes stay ordered.
    Parallel,
}

impl FromStr for MergeStrategy {
    type Err = ExecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" => Ok(MergeStrategy::Sequential),
            "parallel" => Ok(MergeStrategy::Parallel),
            other => Err(ExecError::InvalidConfig(format!(
                "unknown merge strategy {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SortConfig {
    /// Page capacity in bytes.
    pub page_size: usize,
    /// Buffer budget in pages. Pass 0 buffers this many pages per run and
    /// merges open at most `buffer_pages - 1` runs at once.
    pub buffer_pages: usize,
    /// Prefix of every run file name: `{temp_prefix}{operator_id} {run_index}`.
    pub temp_prefix: String,
    pub merge_strategy: MergeStrategy,
}

impl Default for SortConfig {
    fn default() -> Self {
        let mut temp_prefix = env::temp_dir().to_string_lossy().into_owned();
        if !temp_prefix.ends_with(std::path::MAIN_SEPARATOR) {
            temp_prefix.push(std::path::MAIN_SEPARATOR);
        }
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            buffer_pages: DEFAULT_BUFFER_PAGES,
            temp_prefix,
            merge_strategy: MergeStrategy::default(),
        }
    }
}

impl SortConfig {
    pub fn new(page_size: usize, buffer_pages: usize) -> Self {
        Self {
            page_size,
            buffer_pages,
            ..Self::default()
        }
    }

    pub fn with_temp_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.temp_prefix = prefix.into();
        self
    }

    pub fn with_merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.merge_strategy = strategy;
        self
    }

    pub fn fan_in(&self) -> usize {
        self.buffer_pages - 1
    }

    pub fn validate(&self) -> Result<(), ExecError> {
        if self.page_size <= PAGE_HEADER_SIZE {
            return Err(ExecError::InvalidConfig(format!(
                "page size {} leaves no room after the {} byte header",
                self.page_size, PAGE_HEADER_SIZE
            )));
        }
        if self.page_size > u32::MAX as usize {
            return Err(ExecError::InvalidConfig(format!(
                "page size {} is too large",
                self.page_size
            )));
        }
        if self.buffer_pages < 3 {
            return Err(ExecError::InvalidConfig(format!(
                "buffer budget of {} pages cannot merge (need at least 3)",
                self.buffer_pages
            )));
        }
        Ok(())
    }

    /// Defaults overlaid with the `SORT_*` environment variables, validated.
    pub fn from_env() -> Result<Self, ExecError> {
        let config = Self::default().with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlays `SORT_PAGE_SIZE`, `SORT_BUFFER_PAGES`, `SORT_TEMP_PREFIX` and
    /// `SORT_MERGE_STRATEGY`. Values are parsed but not validated, so later
    /// layers can still replace them.
    pub fn with_env_overrides(mut self) -> Result<Self, ExecError> {
        if let Some(v) = env_var("SORT_PAGE_SIZE") {
            self.page_size = parse_usize("SORT_PAGE_SIZE", &v)?;
        }
        if let Some(v) = env_var("SORT_BUFFER_PAGES") {
            self.buffer_pages = parse_usize("SORT_BUFFER_PAGES", &v)?;
        }
        if let Some(v) = env_var("SORT_TEMP_PREFIX") {
            self.temp_prefix = v;
        }
        if let Some(v) = env_var("SORT_MERGE_STRATEGY") {
            self.merge_strategy = v.parse()?;
        }
        Ok(self)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ExecError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ExecError::io(path, e))?;
        let config: SortConfig = serde_json::from_str(&text)
            .map_err(|e| ExecError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ExecError> {
    value
        .parse()
        .map_err(|_| ExecError::InvalidConfig(format!("{} must be a number, got {}", key, value)))
}
