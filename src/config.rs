use std::path::Path;

use anyhow::Context as _;
use image::imageops::FilterType;

use crate::{
    foundation::{
        core::Canvas,
        error::{MintError, MintResult},
    },
    guard::UniquenessPolicy,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Sample each category by rarity weight.
    #[default]
    WeightedRandom,
    /// Walk the cross-product of selectable options in catalog order.
    Exhaustive,
}

/// What to do with a token whose layers cannot all be resolved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingAssetPolicy {
    /// Abort the run.
    #[default]
    Fail,
    /// Emit nothing for the token (neither image nor metadata) and continue.
    Skip,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    Nearest,
    Triangle,
    #[default]
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl From<ResizeFilter> for FilterType {
    fn from(f: ResizeFilter) -> Self {
        match f {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Triangle => FilterType::Triangle,
            ResizeFilter::CatmullRom => FilterType::CatmullRom,
            ResizeFilter::Gaussian => FilterType::Gaussian,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Run-wide settings consumed by the [`Generator`](crate::Generator).
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerateConfig {
    /// Number of outputs to produce.
    pub count: u64,
    pub canvas: Canvas,
    pub uniqueness: UniquenessPolicy,
    pub selection: SelectionMode,
    pub on_missing_asset: MissingAssetPolicy,
    /// Fixed RNG seed; `None` seeds from OS entropy.
    pub seed: Option<u64>,
    /// Record names become `"<prefix> #<id>"`; `None` omits the name.
    pub name_prefix: Option<String>,
    pub resize_filter: ResizeFilter,
    /// Extra attempts to hand one output to the sink before the run fails.
    pub persist_retries: u32,
    /// Composite chunks of accepted draws on a rayon pool.
    pub parallel: bool,
    pub threads: Option<usize>,
    pub chunk_size: usize,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            count: 10,
            canvas: Canvas::default(),
            uniqueness: UniquenessPolicy::Enforce,
            selection: SelectionMode::WeightedRandom,
            on_missing_asset: MissingAssetPolicy::Fail,
            seed: None,
            name_prefix: Some("NFT".to_string()),
            resize_filter: ResizeFilter::CatmullRom,
            persist_retries: 2,
            parallel: false,
            threads: None,
            chunk_size: 64,
        }
    }
}

impl GenerateConfig {
    pub fn validate(&self) -> MintResult<()> {
        if self.count == 0 {
            return Err(MintError::validation("count must be > 0"));
        }
        self.canvas.validate()?;
        if self.threads == Some(0) {
            return Err(MintError::validation("threads must be > 0 when set"));
        }
        Ok(())
    }

    pub fn from_json_str(s: &str) -> MintResult<Self> {
        let cfg: Self = serde_json::from_str(s)
            .map_err(|e| MintError::serde(format!("parse config JSON: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_path(path: impl AsRef<Path>) -> MintResult<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config '{}'", path.display()))?;
        Self::from_json_str(&s)
    }

    pub(crate) fn normalized_chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }
}
