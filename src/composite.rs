use std::io::Cursor;

use anyhow::Context as _;

use crate::{
    assets::LayerStore,
    draw::Draw,
    foundation::{
        core::{Canvas, Rgba8Premul},
        error::{MintError, MintResult},
    },
};

pub type PremulRgba8 = [u8; 4];

/// Source-over: `out = src + dst * (1 - src.a)`, all channels premultiplied.
pub fn over(dst: PremulRgba8, src: PremulRgba8) -> PremulRgba8 {
    if src[3] == 0 {
        return dst;
    }
    if src[3] == 255 {
        return src;
    }

    let inv = 255u16 - u16::from(src[3]);

    let mut out = [0u8; 4];
    for i in 0..4 {
        let dc = mul_div255(u16::from(dst[i]), inv);
        out[i] = src[i].saturating_add(dc);
    }
    out
}

pub fn over_in_place(dst: &mut [u8], src: &[u8]) -> MintResult<()> {
    if dst.len() != src.len() || !dst.len().is_multiple_of(4) {
        return Err(MintError::validation(
            "over_in_place expects equal-length rgba8 buffers",
        ));
    }
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let out = over([d[0], d[1], d[2], d[3]], [s[0], s[1], s[2], s[3]]);
        d.copy_from_slice(&out);
    }
    Ok(())
}

fn mul_div255(x: u16, y: u16) -> u8 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u8
}

/// A finished render: every layer of one draw stacked bottom to top.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComposedImage {
    pub width: u32,
    pub height: u32,
    /// Premultiplied RGBA8, row-major, tightly packed.
    pub rgba8_premul: Vec<u8>,
}

impl ComposedImage {
    pub fn transparent(canvas: Canvas) -> MintResult<Self> {
        Ok(Self {
            width: canvas.width,
            height: canvas.height,
            rgba8_premul: vec![0u8; canvas.byte_len()?],
        })
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba8Premul> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = ((y as usize) * (self.width as usize) + (x as usize)) * 4;
        let p = &self.rgba8_premul[i..i + 4];
        Some(Rgba8Premul {
            r: p[0],
            g: p[1],
            b: p[2],
            a: p[3],
        })
    }

    /// Straight-alpha copy for encoders that expect unassociated alpha (PNG).
    pub fn to_rgba_image(&self) -> MintResult<image::RgbaImage> {
        let mut straight = Vec::with_capacity(self.rgba8_premul.len());
        for p in self.rgba8_premul.chunks_exact(4) {
            let px = Rgba8Premul {
                r: p[0],
                g: p[1],
                b: p[2],
                a: p[3],
            };
            straight.extend_from_slice(&px.to_straight_rgba());
        }
        image::RgbaImage::from_raw(self.width, self.height, straight)
            .ok_or_else(|| MintError::validation("composed buffer does not match its dimensions"))
    }

    pub fn encode_png(&self) -> MintResult<Vec<u8>> {
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgba8(self.to_rgba_image()?)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .context("encode png")?;
        Ok(buf)
    }
}

/// Stack every layer of `draw` onto a transparent canvas, first category at the bottom.
///
/// A layer that cannot be read or decoded fails the whole composite with
/// [`MintError::MissingAsset`]; no layer is ever silently dropped.
#[tracing::instrument(skip_all, fields(layers = draw.len()))]
pub fn composite_draw(draw: &Draw<'_>, store: &LayerStore) -> MintResult<ComposedImage> {
    let mut canvas = ComposedImage::transparent(store.canvas())?;

    for pick in draw.picks() {
        let layer = store
            .get(&pick.option.image)
            .map_err(|e| MintError::MissingAsset {
                token_id: None,
                category: pick.category.name.clone(),
                option: pick.option.name.clone(),
                image: pick.option.image.clone(),
                source: e.into(),
            })?;
        if (layer.width, layer.height) != (canvas.width, canvas.height) {
            return Err(MintError::validation(format!(
                "layer '{}' is {}x{}, canvas is {}x{}",
                pick.option.image, layer.width, layer.height, canvas.width, canvas.height
            )));
        }
        over_in_place(&mut canvas.rgba8_premul, &layer.rgba8_premul)?;
    }

    Ok(canvas)
}
