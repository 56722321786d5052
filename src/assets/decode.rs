use std::sync::Arc;

use anyhow::Context;
use image::imageops::FilterType;

use crate::{
    MintResult,
    assets::PreparedLayer,
    foundation::core::Canvas,
};

/// Decode an encoded raster, stretch it to `canvas`, and premultiply it.
///
/// Aspect ratio is not preserved. Resampling happens on premultiplied pixels so that fully
/// transparent neighbours cannot bleed colour into visible edges.
pub fn decode_layer(bytes: &[u8], canvas: Canvas, filter: FilterType) -> MintResult<PreparedLayer> {
    let dyn_img = image::load_from_memory(bytes).context("decode image from memory")?;
    let mut rgba = dyn_img.to_rgba8();
    premultiply_rgba8_in_place(&mut rgba);

    if rgba.dimensions() != (canvas.width, canvas.height) {
        rgba = image::imageops::resize(&rgba, canvas.width, canvas.height, filter);
        clamp_premul_in_place(&mut rgba);
    }

    let (width, height) = rgba.dimensions();
    Ok(PreparedLayer {
        width,
        height,
        rgba8_premul: Arc::new(rgba.into_raw()),
    })
}

fn premultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = px[3] as u16;
        if a == 0 {
            px[0] = 0;
            px[1] = 0;
            px[2] = 0;
            continue;
        }
        px[0] = ((px[0] as u16 * a + 127) / 255) as u8;
        px[1] = ((px[1] as u16 * a + 127) / 255) as u8;
        px[2] = ((px[2] as u16 * a + 127) / 255) as u8;
    }
}

// Cubic kernels overshoot; a premultiplied channel may never exceed its alpha.
fn clamp_premul_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = px[3];
        px[0] = px[0].min(a);
        px[1] = px[1].min(a);
        px[2] = px[2].min(a);
    }
}
