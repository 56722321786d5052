use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use anyhow::Context as _;

use crate::{
    config::ResizeFilter,
    foundation::{
        core::Canvas,
        error::{MintError, MintResult},
    },
};

pub mod decode;

/// A trait layer decoded, stretched to the canvas, and premultiplied.
#[derive(Clone, Debug)]
pub struct PreparedLayer {
    pub width: u32,
    pub height: u32,
    /// Premultiplied RGBA8, row-major, tightly packed.
    pub rgba8_premul: Arc<Vec<u8>>,
}

/// Resolves an option's image reference to encoded image bytes.
pub trait LayerSource: Send + Sync {
    fn read(&self, image_ref: &str) -> MintResult<Vec<u8>>;
}

/// Reads layers from a directory tree. References are relative to `root`.
#[derive(Clone, Debug)]
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, image_ref: &str) -> MintResult<PathBuf> {
        Ok(self.root.join(normalize_rel_path(image_ref)?))
    }
}

impl LayerSource for DirSource {
    fn read(&self, image_ref: &str) -> MintResult<Vec<u8>> {
        let path = self.resolve(image_ref)?;
        let bytes =
            std::fs::read(&path).with_context(|| format!("read layer '{}'", path.display()))?;
        Ok(bytes)
    }
}

/// Holds encoded layers in memory, keyed by image reference.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    layers: HashMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, image_ref: impl Into<String>, bytes: Vec<u8>) {
        self.layers.insert(image_ref.into(), bytes);
    }

    pub fn with(mut self, image_ref: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.insert(image_ref, bytes);
        self
    }
}

impl LayerSource for MemorySource {
    fn read(&self, image_ref: &str) -> MintResult<Vec<u8>> {
        self.layers
            .get(image_ref)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no in-memory layer '{image_ref}'").into())
    }
}

/// Decodes each referenced layer once per run and hands out shared copies.
///
/// Safe to share across worker threads; two threads racing on the same cold reference may both
/// decode it, and the first insert wins.
pub struct LayerStore {
    source: Box<dyn LayerSource>,
    canvas: Canvas,
    filter: ResizeFilter,
    cache: Mutex<HashMap<String, PreparedLayer>>,
}

impl LayerStore {
    pub fn new(source: impl LayerSource + 'static, canvas: Canvas, filter: ResizeFilter) -> Self {
        Self {
            source: Box::new(source),
            canvas,
            filter,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn canvas(&self) -> Canvas {
        self.canvas
    }

    pub fn get(&self, image_ref: &str) -> MintResult<PreparedLayer> {
        if let Some(hit) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(image_ref)
        {
            return Ok(hit.clone());
        }

        let bytes = self.source.read(image_ref)?;
        let layer = decode::decode_layer(&bytes, self.canvas, self.filter.into())
            .map_err(|e| anyhow::anyhow!("decode layer '{image_ref}': {e:#}"))?;
        tracing::debug!(image_ref, "decoded layer");

        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(cache
            .entry(image_ref.to_string())
            .or_insert(layer)
            .clone())
    }

    pub fn cached_len(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl std::fmt::Debug for LayerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerStore")
            .field("canvas", &self.canvas)
            .field("filter", &self.filter)
            .field("cached", &self.cached_len())
            .finish()
    }
}

pub fn normalize_rel_path(source: &str) -> MintResult<String> {
    let s = source.replace('\\', "/");
    if s.starts_with('/') {
        return Err(MintError::validation("layer paths must be relative"));
    }
    if s.is_empty() {
        return Err(MintError::validation("layer path must be non-empty"));
    }

    let mut out = Vec::<&str>::new();
    for part in s.split('/') {
        if part.is_empty() || part == "." {
            continue;
        }
        if part == ".." {
            return Err(MintError::validation("layer paths must not contain '..'"));
        }
        out.push(part);
    }

    if out.is_empty() {
        return Err(MintError::validation("layer path must contain a file name"));
    }

    Ok(out.join("/"))
}

#[cfg(test)]
mod tests {
    use std::{
        io::Cursor,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    fn png_1x1(rgba: [u8; 4]) -> Vec<u8> {
        let img = image::RgbaImage::from_raw(1, 1, rgba.to_vec()).unwrap();
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    struct CountingSource {
        inner: MemorySource,
        reads: Arc<AtomicUsize>,
    }

    impl LayerSource for CountingSource {
        fn read(&self, image_ref: &str) -> MintResult<Vec<u8>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.read(image_ref)
        }
    }

    #[test]
    fn normalize_path_cross_platform() {
        assert_eq!(normalize_rel_path("a/b.png").unwrap(), "a/b.png");
        assert_eq!(normalize_rel_path("a\\b.png").unwrap(), "a/b.png");
        assert_eq!(normalize_rel_path("./a//b.png").unwrap(), "a/b.png");
        assert!(normalize_rel_path("../x.png").is_err());
        assert!(normalize_rel_path("/abs.png").is_err());
        assert!(normalize_rel_path("").is_err());
        assert!(normalize_rel_path("./").is_err());
    }

    #[test]
    fn store_decodes_each_reference_once() {
        let reads = Arc::new(AtomicUsize::new(0));
        let source = CountingSource {
            inner: MemorySource::new().with("a.png", png_1x1([1, 2, 3, 255])),
            reads: Arc::clone(&reads),
        };
        let store = LayerStore::new(
            source,
            Canvas {
                width: 2,
                height: 2,
            },
            ResizeFilter::Nearest,
        );

        let first = store.get("a.png").unwrap();
        let second = store.get("a.png").unwrap();
        assert_eq!(reads.load(Ordering::SeqCst), 1);
        assert_eq!(store.cached_len(), 1);
        assert!(Arc::ptr_eq(&first.rgba8_premul, &second.rgba8_premul));
        assert_eq!((first.width, first.height), (2, 2));
    }

    #[test]
    fn store_does_not_cache_failures() {
        let store = LayerStore::new(MemorySource::new(), Canvas::default(), ResizeFilter::Nearest);
        assert!(store.get("missing.png").is_err());
        assert!(store.get("missing.png").is_err());
        assert_eq!(store.cached_len(), 0);
    }

    #[test]
    fn dir_source_rejects_escaping_references() {
        let src = DirSource::new("traits");
        assert!(src.read("../secret.png").is_err());
        assert_eq!(
            src.resolve("Body\\Original.png").unwrap(),
            Path::new("traits").join("Body/Original.png")
        );
    }
}
