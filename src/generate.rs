use std::sync::atomic::{AtomicU64, Ordering};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::{
    assets::LayerStore,
    catalog::Catalog,
    composite::{ComposedImage, composite_draw},
    config::{GenerateConfig, MissingAssetPolicy, SelectionMode},
    draw::{Draw, ExhaustiveDraws},
    foundation::{
        core::TokenId,
        error::{MintError, MintResult},
    },
    guard::{UniquenessGuard, UniquenessPolicy},
    metadata::MetadataRecord,
    sink::{OutputSink, SinkConfig},
};

/// A token that produced no output under [`MissingAssetPolicy::Skip`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedToken {
    pub token: TokenId,
    pub category: String,
    pub option: String,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Outputs handed to the sink.
    pub produced: u64,
    pub skipped: Vec<SkippedToken>,
    /// Draws built, including rejected duplicates.
    pub attempts: u64,
    pub duplicates_rejected: u64,
}

/// Drives select → accept → composite → describe → persist for every token id.
///
/// The catalog and configuration are fixed at construction. The uniqueness history lives as
/// long as the generator, so repeated runs never repeat a combination either. Token ids
/// continue across runs for the same reason: a second run into the same sink adds outputs
/// instead of overwriting the first run's.
#[derive(Debug)]
pub struct Generator {
    catalog: Catalog,
    config: GenerateConfig,
    guard: UniquenessGuard,
    next_token: AtomicU64,
}

impl Generator {
    /// Validate inputs and fail fast if the requested count cannot be met.
    pub fn new(catalog: Catalog, config: GenerateConfig) -> MintResult<Self> {
        config.validate()?;
        catalog.validate()?;
        let generator = Self {
            catalog,
            config,
            guard: UniquenessGuard::new(),
            next_token: AtomicU64::new(0),
        };
        generator.check_capacity()?;
        Ok(generator)
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &GenerateConfig {
        &self.config
    }

    /// Id the next run starts from.
    pub fn next_token(&self) -> TokenId {
        TokenId(self.next_token.load(Ordering::SeqCst))
    }

    pub fn history_len(&self) -> usize {
        self.guard.len()
    }

    /// Distinct draws still available to this generator.
    pub fn remaining_capacity(&self) -> u64 {
        self.catalog
            .capacity()
            .saturating_sub(self.guard.len() as u64)
    }

    fn check_capacity(&self) -> MintResult<()> {
        let bounded = self.config.uniqueness == UniquenessPolicy::Enforce
            || self.config.selection == SelectionMode::Exhaustive;
        if !bounded {
            return Ok(());
        }
        let capacity = match self.config.selection {
            SelectionMode::Exhaustive if self.config.uniqueness == UniquenessPolicy::None => {
                self.catalog.capacity()
            }
            _ => self.remaining_capacity(),
        };
        if self.config.count > capacity {
            return Err(MintError::CapacityExceeded {
                requested: self.config.count,
                capacity,
            });
        }
        Ok(())
    }

    /// Generate `config.count` outputs into `sink`.
    ///
    /// Draws are accepted one at a time from a single RNG, so a fixed seed reproduces the run
    /// regardless of `parallel`. Outputs reach the sink in token order. Each run reserves the
    /// next `count` token ids up front; ids of a run that fails part way are not reused.
    #[tracing::instrument(skip_all, fields(count = self.config.count))]
    pub fn run(&self, store: &LayerStore, sink: &mut dyn OutputSink) -> MintResult<RunReport> {
        self.check_capacity()?;
        if store.canvas() != self.config.canvas {
            return Err(MintError::validation(format!(
                "layer store canvas {}x{} does not match configured canvas {}x{}",
                store.canvas().width,
                store.canvas().height,
                self.config.canvas.width,
                self.config.canvas.height
            )));
        }

        let mut rng = match self.config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let mut exhaustive = ExhaustiveDraws::new(&self.catalog);
        let pool = if self.config.parallel {
            Some(build_thread_pool(self.config.threads)?)
        } else {
            None
        };
        let chunk_size = if pool.is_some() {
            self.config.normalized_chunk_size() as u64
        } else {
            1
        };

        sink.begin(SinkConfig {
            canvas: self.config.canvas,
            count: self.config.count,
        })?;

        let first = self
            .next_token
            .fetch_add(self.config.count, Ordering::SeqCst);
        let last = first.saturating_add(self.config.count);

        let mut report = RunReport::default();
        let mut next = first;
        while next < last {
            let end = next.saturating_add(chunk_size).min(last);

            let mut batch = Vec::with_capacity((end - next) as usize);
            for id in next..end {
                let draw = self.next_draw(&mut rng, &mut exhaustive, &mut report)?;
                batch.push((TokenId(id), draw));
            }

            let composed: Vec<MintResult<ComposedImage>> = match &pool {
                Some(pool) => pool.install(|| {
                    batch
                        .par_iter()
                        .map(|(_, draw)| composite_draw(draw, store))
                        .collect()
                }),
                None => batch
                    .iter()
                    .map(|(_, draw)| composite_draw(draw, store))
                    .collect(),
            };

            for ((token, draw), result) in batch.iter().zip(composed) {
                match result {
                    Ok(image) => {
                        let record = MetadataRecord::build(
                            draw,
                            *token,
                            self.config.name_prefix.as_deref(),
                        );
                        self.persist(sink, *token, &image, &record)?;
                        report.produced += 1;
                        tracing::info!(token = token.0, traits = %draw.key(), "generated");
                    }
                    Err(err) => {
                        self.handle_composite_error(err.with_token(token.0), *token, &mut report)?;
                    }
                }
            }
            next = end;
        }

        sink.end()?;
        Ok(report)
    }

    fn next_draw<'c>(
        &'c self,
        rng: &mut ChaCha8Rng,
        exhaustive: &mut ExhaustiveDraws<'c>,
        report: &mut RunReport,
    ) -> MintResult<Draw<'c>> {
        loop {
            let draw = match self.config.selection {
                SelectionMode::WeightedRandom => Draw::sample(&self.catalog, rng)?,
                SelectionMode::Exhaustive => {
                    exhaustive
                        .next()
                        .ok_or_else(|| MintError::CapacityExceeded {
                            requested: self.config.count,
                            capacity: self.catalog.capacity(),
                        })?
                }
            };
            report.attempts += 1;

            match self.config.uniqueness {
                UniquenessPolicy::None => return Ok(draw),
                UniquenessPolicy::Enforce => {
                    if self.guard.accept(&draw) {
                        return Ok(draw);
                    }
                    report.duplicates_rejected += 1;
                    tracing::debug!(traits = %draw.key(), "duplicate draw, retrying");
                }
            }
        }
    }

    fn handle_composite_error(
        &self,
        err: MintError,
        token: TokenId,
        report: &mut RunReport,
    ) -> MintResult<()> {
        match (self.config.on_missing_asset, err) {
            (
                MissingAssetPolicy::Skip,
                MintError::MissingAsset {
                    category,
                    option,
                    source,
                    ..
                },
            ) => {
                let reason = format!("{source:#}");
                tracing::warn!(token = token.0, %category, %option, %reason, "skipping token");
                report.skipped.push(SkippedToken {
                    token,
                    category,
                    option,
                    reason,
                });
                Ok(())
            }
            (_, err) => Err(err),
        }
    }

    // The draw is already in the history; a failed push is retried with the same output.
    fn persist(
        &self,
        sink: &mut dyn OutputSink,
        token: TokenId,
        image: &ComposedImage,
        record: &MetadataRecord,
    ) -> MintResult<()> {
        let mut attempt = 0u32;
        loop {
            match sink.push(token, image, record) {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.config.persist_retries => {
                    attempt += 1;
                    tracing::warn!(token = token.0, attempt, error = %err, "persist failed, retrying");
                }
                Err(MintError::Persistence { source, .. }) => {
                    return Err(MintError::Persistence {
                        token_id: Some(token.0),
                        source,
                    });
                }
                Err(err) => {
                    return Err(MintError::Persistence {
                        token_id: Some(token.0),
                        source: err.into(),
                    });
                }
            }
        }
    }
}

fn build_thread_pool(threads: Option<usize>) -> MintResult<rayon::ThreadPool> {
    if let Some(n) = threads
        && n == 0
    {
        return Err(MintError::validation("'threads' must be >= 1 when set"));
    }

    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(n) = threads {
        builder = builder.num_threads(n);
    }
    builder
        .build()
        .map_err(|e| MintError::validation(format!("failed to build rayon thread pool: {e}")))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::{
        assets::MemorySource,
        catalog::{Category, TraitOption},
        config::ResizeFilter,
        foundation::core::Canvas,
        sink::InMemorySink,
    };

    fn png_1x1(rgba: [u8; 4]) -> Vec<u8> {
        let img = image::RgbaImage::from_raw(1, 1, rgba.to_vec()).unwrap();
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn two_by_one() -> Catalog {
        Catalog::new(vec![
            Category::new(
                "A",
                vec![
                    TraitOption::new("x", "A/x.png", 0.5),
                    TraitOption::new("y", "A/y.png", 0.5),
                ],
            ),
            Category::new("B", vec![TraitOption::new("p", "B/p.png", 1.0)]),
        ])
        .unwrap()
    }

    fn store() -> LayerStore {
        let source = MemorySource::new()
            .with("A/x.png", png_1x1([255, 0, 0, 255]))
            .with("A/y.png", png_1x1([0, 255, 0, 255]))
            .with("B/p.png", png_1x1([0, 0, 0, 0]));
        LayerStore::new(source, canvas(), ResizeFilter::Nearest)
    }

    fn canvas() -> Canvas {
        Canvas {
            width: 1,
            height: 1,
        }
    }

    fn config(count: u64) -> GenerateConfig {
        GenerateConfig {
            count,
            canvas: canvas(),
            seed: Some(9),
            ..GenerateConfig::default()
        }
    }

    #[test]
    fn capacity_scenario_two_ok_three_fails() {
        assert!(Generator::new(two_by_one(), config(2)).is_ok());
        let err = Generator::new(two_by_one(), config(3)).unwrap_err();
        assert!(matches!(
            err,
            MintError::CapacityExceeded {
                requested: 3,
                capacity: 2
            }
        ));
    }

    #[test]
    fn uniqueness_off_lifts_capacity_bound() {
        let cfg = GenerateConfig {
            uniqueness: UniquenessPolicy::None,
            ..config(5)
        };
        let generator = Generator::new(two_by_one(), cfg).unwrap();
        let mut sink = InMemorySink::new();
        let report = generator.run(&store(), &mut sink).unwrap();
        assert_eq!(report.produced, 5);
        assert_eq!(report.duplicates_rejected, 0);
        assert_eq!(generator.history_len(), 0);
    }

    #[test]
    fn run_fills_capacity_exactly() {
        let generator = Generator::new(two_by_one(), config(2)).unwrap();
        let mut sink = InMemorySink::new();
        let report = generator.run(&store(), &mut sink).unwrap();
        assert_eq!(report.produced, 2);
        assert_eq!(report.attempts, 2 + report.duplicates_rejected);
        assert_eq!(generator.remaining_capacity(), 0);

        let ids: Vec<u64> = sink.outputs().iter().map(|(t, _, _)| t.0).collect();
        assert_eq!(ids, [0, 1]);

        // History outlives the run, so a second run has nothing left to draw.
        let err = generator.run(&store(), &mut sink).unwrap_err();
        assert!(matches!(err, MintError::CapacityExceeded { .. }));
        assert_eq!(generator.next_token(), TokenId(2));
    }

    #[test]
    fn token_ids_continue_across_runs() {
        let catalog = Catalog::new(vec![
            Category::new(
                "A",
                vec![
                    TraitOption::new("x", "A/x.png", 0.5),
                    TraitOption::new("y", "A/y.png", 0.5),
                ],
            ),
            Category::new(
                "B",
                vec![
                    TraitOption::new("p", "B/p.png", 1.0),
                    TraitOption::new("q", "B/p.png", 1.0),
                ],
            ),
        ])
        .unwrap();
        let generator = Generator::new(catalog, config(2)).unwrap();

        let mut first = InMemorySink::new();
        generator.run(&store(), &mut first).unwrap();
        let mut second = InMemorySink::new();
        generator.run(&store(), &mut second).unwrap();

        let ids: Vec<u64> = second.outputs().iter().map(|(t, _, _)| t.0).collect();
        assert_eq!(ids, [2, 3]);
        assert_eq!(second.outputs()[0].2.name.as_deref(), Some("NFT #2"));
        assert_eq!(generator.next_token(), TokenId(4));
    }

    #[test]
    fn store_canvas_must_match_config() {
        let generator = Generator::new(two_by_one(), config(1)).unwrap();
        let wide = LayerStore::new(
            MemorySource::new(),
            Canvas {
                width: 2,
                height: 1,
            },
            ResizeFilter::Nearest,
        );
        let err = generator.run(&wide, &mut InMemorySink::new()).unwrap_err();
        assert!(matches!(err, MintError::Validation(_)));
    }

    #[test]
    fn thread_pool_rejects_zero_threads() {
        assert!(build_thread_pool(Some(0)).is_err());
        assert!(build_thread_pool(Some(1)).is_ok());
    }
}
