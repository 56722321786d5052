use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::{
    composite::ComposedImage,
    foundation::{
        core::{Canvas, TokenId},
        error::{MintError, MintResult},
    },
    metadata::MetadataRecord,
};

/// Configuration provided to an [`OutputSink`] before the first output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SinkConfig {
    pub canvas: Canvas,
    /// Number of outputs the run was asked for (skipped tokens never arrive).
    pub count: u64,
}

/// Consumer of finished outputs.
///
/// Ordering contract: `push` is called in strictly increasing [`TokenId`] order. A failing
/// `push` may be retried with the same image and record; implementations should tolerate that.
pub trait OutputSink: Send {
    fn begin(&mut self, cfg: SinkConfig) -> MintResult<()>;
    fn push(
        &mut self,
        token: TokenId,
        image: &ComposedImage,
        record: &MetadataRecord,
    ) -> MintResult<()>;
    fn end(&mut self) -> MintResult<()>;
}

/// Keeps every output in memory. Handy for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemorySink {
    cfg: Option<SinkConfig>,
    outputs: Vec<(TokenId, ComposedImage, MetadataRecord)>,
    finished: bool,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(&self) -> Option<SinkConfig> {
        self.cfg
    }

    pub fn outputs(&self) -> &[(TokenId, ComposedImage, MetadataRecord)] {
        &self.outputs
    }

    pub fn records(&self) -> impl Iterator<Item = &MetadataRecord> {
        self.outputs.iter().map(|(_, _, r)| r)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl OutputSink for InMemorySink {
    fn begin(&mut self, cfg: SinkConfig) -> MintResult<()> {
        self.cfg = Some(cfg);
        self.outputs.clear();
        self.finished = false;
        Ok(())
    }

    fn push(
        &mut self,
        token: TokenId,
        image: &ComposedImage,
        record: &MetadataRecord,
    ) -> MintResult<()> {
        self.outputs.push((token, image.clone(), record.clone()));
        Ok(())
    }

    fn end(&mut self) -> MintResult<()> {
        self.finished = true;
        Ok(())
    }
}

/// Writes `<id>.png` and `<id>.json` side by side into one directory.
///
/// Both files are staged under temporary names before either is moved into place, and a failed
/// push removes whatever it already placed. An id therefore has both files or neither.
#[derive(Clone, Debug)]
pub struct DirSink {
    out_dir: PathBuf,
}

impl DirSink {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn image_path(&self, token: TokenId) -> PathBuf {
        self.out_dir.join(format!("{}.png", token.0))
    }

    pub fn metadata_path(&self, token: TokenId) -> PathBuf {
        self.out_dir.join(format!("{}.json", token.0))
    }
}

impl OutputSink for DirSink {
    fn begin(&mut self, _cfg: SinkConfig) -> MintResult<()> {
        std::fs::create_dir_all(&self.out_dir)
            .with_context(|| format!("create output dir '{}'", self.out_dir.display()))
            .map_err(MintError::persistence)
    }

    fn push(
        &mut self,
        token: TokenId,
        image: &ComposedImage,
        record: &MetadataRecord,
    ) -> MintResult<()> {
        let png = image.encode_png()?;
        let json = record.to_json_pretty()?;
        write_pair([
            (self.image_path(token), png.as_slice()),
            (self.metadata_path(token), json.as_bytes()),
        ])
    }

    fn end(&mut self) -> MintResult<()> {
        Ok(())
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".part");
    PathBuf::from(tmp)
}

fn write_pair(files: [(PathBuf, &[u8]); 2]) -> MintResult<()> {
    let parts = files.each_ref().map(|(path, _)| part_path(path));

    let staged = files
        .iter()
        .zip(&parts)
        .try_for_each(|((_, bytes), tmp)| {
            std::fs::write(tmp, bytes).with_context(|| format!("write '{}'", tmp.display()))
        });
    if let Err(e) = staged {
        for tmp in &parts {
            std::fs::remove_file(tmp).ok();
        }
        return Err(MintError::persistence(e));
    }

    let mut placed: Vec<&Path> = Vec::with_capacity(files.len());
    for ((path, _), tmp) in files.iter().zip(&parts) {
        if let Err(e) = std::fs::rename(tmp, path)
            .with_context(|| format!("move '{}' into place", path.display()))
        {
            for done in placed {
                std::fs::remove_file(done).ok();
            }
            for tmp in &parts {
                std::fs::remove_file(tmp).ok();
            }
            return Err(MintError::persistence(e));
        }
        placed.push(path);
    }
    Ok(())
}
