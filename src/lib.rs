//! traitmint layers independently authored trait images into unique, rarity-weighted renders.
//!
//! - Describe trait categories and options in a [`Catalog`]
//! - Configure a run with [`GenerateConfig`] and build a [`Generator`]
//! - Resolve layer images through a [`LayerStore`] and collect outputs in an [`OutputSink`]
#![forbid(unsafe_code)]

pub mod assets;
pub mod catalog;
pub mod composite;
pub mod config;
pub mod draw;
pub mod foundation;
pub mod generate;
pub mod guard;
pub mod metadata;
pub mod select;
pub mod sink;

pub use assets::{DirSource, LayerSource, LayerStore, MemorySource, PreparedLayer, normalize_rel_path};
pub use catalog::{Catalog, Category, TraitOption};
pub use composite::{ComposedImage, composite_draw, over};
pub use config::{GenerateConfig, MissingAssetPolicy, ResizeFilter, SelectionMode};
pub use draw::{Draw, DrawKey, ExhaustiveDraws, Pick};
pub use foundation::core::{Canvas, Rgba8Premul, TokenId};
pub use foundation::error::{MintError, MintResult};
pub use generate::{Generator, RunReport, SkippedToken};
pub use guard::{UniquenessGuard, UniquenessPolicy};
pub use metadata::{Attribute, MetadataRecord};
pub use select::pick_weighted;
pub use sink::{DirSink, InMemorySink, OutputSink, SinkConfig};
