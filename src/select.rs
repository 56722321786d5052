use rand::Rng;

use crate::{
    catalog::{Category, TraitOption},
    foundation::error::{MintError, MintResult},
};

/// Draw one option from `category`, honoring relative weights.
///
/// `r` is uniform in `[0, total)`; the first option whose running weight reaches `r` wins.
/// Zero-weight options are skipped and can never be returned. Should rounding leave the
/// running sum short of `r`, the last selectable option is returned.
pub fn pick_weighted<'c, R>(category: &'c Category, rng: &mut R) -> MintResult<&'c TraitOption>
where
    R: Rng + ?Sized,
{
    let Some(last) = category.options.iter().rev().find(|o| o.is_selectable()) else {
        return Err(if category.options.is_empty() {
            MintError::invalid_catalog(format!("category '{}' has no options", category.name))
        } else {
            MintError::invalid_catalog(format!(
                "all option weights in category '{}' are zero",
                category.name
            ))
        });
    };

    let total: f64 = category
        .options
        .iter()
        .filter(|o| o.is_selectable())
        .map(|o| o.rarity)
        .sum();
    if !total.is_finite() {
        return Err(MintError::invalid_catalog(format!(
            "total weight of category '{}' overflows",
            category.name
        )));
    }

    let r = rng.gen_range(0.0..total);
    let mut upto = 0.0;
    for opt in category.options.iter().filter(|o| o.is_selectable()) {
        upto += opt.rarity;
        if upto >= r {
            return Ok(opt);
        }
    }
    Ok(last)
}
