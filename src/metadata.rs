use crate::{
    catalog::Catalog,
    draw::{Draw, DrawKey},
    foundation::{
        core::TokenId,
        error::{MintError, MintResult},
    },
};

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Attribute {
    pub trait_type: String,
    pub value: String,
}

/// Per-output record. `attributes` line up 1:1 with catalog categories.
///
/// The token id travels alongside the record rather than inside the serialized form.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MetadataRecord {
    #[serde(skip)]
    pub token_id: TokenId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub attributes: Vec<Attribute>,
}

impl MetadataRecord {
    pub fn build(draw: &Draw<'_>, token_id: TokenId, name_prefix: Option<&str>) -> Self {
        Self {
            token_id,
            name: name_prefix.map(|p| format!("{p} #{}", token_id.0)),
            attributes: draw
                .picks()
                .iter()
                .map(|p| Attribute {
                    trait_type: p.category.name.clone(),
                    value: p.option.name.clone(),
                })
                .collect(),
        }
    }

    /// Recover the draw identity, checking positions against `catalog`.
    pub fn draw_key(&self, catalog: &Catalog) -> MintResult<DrawKey> {
        if self.attributes.len() != catalog.len() {
            return Err(MintError::validation(format!(
                "record has {} attributes, catalog has {} categories",
                self.attributes.len(),
                catalog.len()
            )));
        }
        for (attr, cat) in self.attributes.iter().zip(catalog.categories()) {
            if attr.trait_type != cat.name {
                return Err(MintError::validation(format!(
                    "attribute '{}' is out of place (expected '{}')",
                    attr.trait_type, cat.name
                )));
            }
        }
        let names: Vec<&str> = self.attributes.iter().map(|a| a.value.as_str()).collect();
        Ok(Draw::from_option_names(catalog, names.as_slice())?.key())
    }

    pub fn to_json_pretty(&self) -> MintResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| MintError::serde(format!("serialize metadata: {e}")))
    }
}
