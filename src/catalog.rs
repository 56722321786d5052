use std::{collections::HashSet, fmt, marker::PhantomData, path::Path};

use anyhow::Context as _;
use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};

use crate::foundation::error::{MintError, MintResult};

/// One selectable image within a [`Category`].
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TraitOption {
    pub name: String,
    /// Reference resolved by a [`LayerSource`](crate::LayerSource), usually a relative path.
    pub image: String,
    /// Relative weight within the owning category. Zero disables the option.
    pub rarity: f64,
}

impl TraitOption {
    pub fn new(name: impl Into<String>, image: impl Into<String>, rarity: f64) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            rarity,
        }
    }

    pub fn is_selectable(&self) -> bool {
        self.rarity > 0.0
    }
}

/// A layer class. Its position in the [`Catalog`] is its z-order (first = bottom).
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Category {
    pub name: String,
    pub options: Vec<TraitOption>,
}

impl Category {
    pub fn new(name: impl Into<String>, options: Vec<TraitOption>) -> Self {
        Self {
            name: name.into(),
            options,
        }
    }

    pub fn total_weight(&self) -> f64 {
        self.options.iter().map(|o| o.rarity).sum()
    }

    pub fn selectable_count(&self) -> usize {
        self.options.iter().filter(|o| o.is_selectable()).count()
    }

    pub fn option(&self, name: &str) -> Option<&TraitOption> {
        self.options.iter().find(|o| o.name == name)
    }

    pub fn validate(&self) -> MintResult<()> {
        if self.name.is_empty() {
            return Err(MintError::invalid_catalog("category name must be non-empty"));
        }
        if self.options.is_empty() {
            return Err(MintError::invalid_catalog(format!(
                "category '{}' has no options",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for opt in &self.options {
            if !seen.insert(opt.name.as_str()) {
                return Err(MintError::invalid_catalog(format!(
                    "category '{}' declares option '{}' more than once",
                    self.name, opt.name
                )));
            }
            if !opt.rarity.is_finite() || opt.rarity < 0.0 {
                return Err(MintError::invalid_catalog(format!(
                    "option '{}/{}' has invalid rarity {} (must be finite and >= 0)",
                    self.name, opt.name, opt.rarity
                )));
            }
        }

        if self.selectable_count() == 0 {
            return Err(MintError::invalid_catalog(format!(
                "all option weights in category '{}' are zero",
                self.name
            )));
        }
        let total = self.total_weight();
        if !total.is_finite() {
            return Err(MintError::invalid_catalog(format!(
                "total weight of category '{}' overflows",
                self.name
            )));
        }

        // Every selectable option must own a slice of [0, total) the sampler can land in:
        // it has to raise the running sum and be no finer than the sampler's resolution.
        let mut upto = 0.0f64;
        for opt in self.options.iter().filter(|o| o.is_selectable()) {
            let next = upto + opt.rarity;
            if next <= upto || opt.rarity / total < f64::EPSILON {
                return Err(MintError::invalid_catalog(format!(
                    "option '{}/{}' has rarity {} which is too small next to the category \
                     total {} to ever be drawn",
                    self.name, opt.name, opt.rarity, total
                )));
            }
            upto = next;
        }
        Ok(())
    }
}

/// Validated, immutable set of categories in compositing order.
#[derive(Clone, Debug, PartialEq)]
pub struct Catalog {
    categories: Vec<Category>,
}

impl Catalog {
    pub fn new(categories: Vec<Category>) -> MintResult<Self> {
        let catalog = Self { categories };
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn validate(&self) -> MintResult<()> {
        if self.categories.is_empty() {
            return Err(MintError::invalid_catalog(
                "catalog must declare at least one category",
            ));
        }
        let mut seen = HashSet::new();
        for cat in &self.categories {
            if !seen.insert(cat.name.as_str()) {
                return Err(MintError::invalid_catalog(format!(
                    "category '{}' is declared more than once",
                    cat.name
                )));
            }
            cat.validate()?;
        }
        Ok(())
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn category(&self, name: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.name == name)
    }

    /// Number of distinct draws the selector can produce, saturating at `u64::MAX`.
    ///
    /// Zero-weight options are never selected, so they do not contribute.
    pub fn capacity(&self) -> u64 {
        self.categories.iter().fold(1u64, |acc, cat| {
            acc.saturating_mul(cat.selectable_count() as u64)
        })
    }

    /// Parse the `{ category: { option: { file | image, rarity } } }` layout.
    ///
    /// Declaration order is kept for both categories and options. A `file` entry resolves to
    /// `<category>/<file>`; an `image` entry is used verbatim. Repeated keys are kept so that
    /// validation reports them instead of the last one silently winning.
    pub fn from_json_str(s: &str) -> MintResult<Self> {
        let root: Entries<Entries<RawOption>> = serde_json::from_str(s)
            .map_err(|e| MintError::serde(format!("parse catalog JSON: {e}")))?;

        let mut categories = Vec::with_capacity(root.0.len());
        for (cat_name, raw) in root.0 {
            let mut options = Vec::with_capacity(raw.0.len());
            for (opt_name, entry) in raw.0 {
                let image = match (entry.image, entry.file) {
                    (Some(image), None) => image,
                    (None, Some(file)) => format!("{cat_name}/{file}"),
                    (Some(_), Some(_)) => {
                        return Err(MintError::invalid_catalog(format!(
                            "option '{cat_name}/{opt_name}' sets both 'image' and 'file'"
                        )));
                    }
                    (None, None) => {
                        return Err(MintError::invalid_catalog(format!(
                            "option '{cat_name}/{opt_name}' needs an 'image' or 'file'"
                        )));
                    }
                };
                options.push(TraitOption::new(opt_name, image, entry.rarity));
            }
            categories.push(Category::new(cat_name, options));
        }

        Self::new(categories)
    }

    pub fn from_path(path: impl AsRef<Path>) -> MintResult<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read catalog '{}'", path.display()))?;
        Self::from_json_str(&s)
    }
}

/// Object entries in document order, duplicate keys included.
struct Entries<T>(Vec<(String, T)>);

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Entries<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for EntriesVisitor<T> {
            type Value = Entries<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, T>()? {
                    entries.push(entry);
                }
                Ok(Entries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor(PhantomData))
    }
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOption {
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    image: Option<String>,
    rarity: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat(name: &str, opts: &[(&str, f64)]) -> Category {
        Category::new(
            name,
            opts.iter()
                .map(|(n, w)| TraitOption::new(*n, format!("{name}/{n}.png"), *w))
                .collect(),
        )
    }

    #[test]
    fn capacity_counts_selectable_options() {
        let c = Catalog::new(vec![
            cat("A", &[("x", 0.5), ("y", 0.5)]),
            cat("B", &[("p", 1.0)]),
        ])
        .unwrap();
        assert_eq!(c.capacity(), 2);

        let c = Catalog::new(vec![
            cat("A", &[("x", 0.5), ("off", 0.0), ("y", 0.5)]),
            cat("B", &[("p", 1.0), ("q", 2.0), ("r", 0.1)]),
        ])
        .unwrap();
        assert_eq!(c.capacity(), 6);
    }

    #[test]
    fn capacity_saturates() {
        let big: Vec<(String, f64)> = (0..1000).map(|i| (format!("o{i}"), 1.0)).collect();
        let cats = (0..10)
            .map(|c| {
                Category::new(
                    format!("C{c}"),
                    big.iter()
                        .map(|(n, w)| TraitOption::new(n.clone(), n.clone(), *w))
                        .collect(),
                )
            })
            .collect();
        let c = Catalog::new(cats).unwrap();
        assert_eq!(c.capacity(), u64::MAX);
    }

    #[test]
    fn single_zero_weight_option_is_invalid() {
        let err = Catalog::new(vec![cat("Only", &[("only", 0.0)])]).unwrap_err();
        assert!(matches!(err, MintError::InvalidCatalog(_)));
    }

    #[test]
    fn empty_and_malformed_catalogs_are_invalid() {
        assert!(matches!(
            Catalog::new(vec![]).unwrap_err(),
            MintError::InvalidCatalog(_)
        ));
        assert!(matches!(
            Catalog::new(vec![Category::new("Empty", vec![])]).unwrap_err(),
            MintError::InvalidCatalog(_)
        ));
        assert!(matches!(
            Catalog::new(vec![cat("A", &[("x", -1.0), ("y", 1.0)])]).unwrap_err(),
            MintError::InvalidCatalog(_)
        ));
        assert!(matches!(
            Catalog::new(vec![cat("A", &[("x", f64::NAN)])]).unwrap_err(),
            MintError::InvalidCatalog(_)
        ));
        assert!(matches!(
            Catalog::new(vec![cat("A", &[("x", 1.0), ("x", 1.0)])]).unwrap_err(),
            MintError::InvalidCatalog(_)
        ));
        assert!(matches!(
            Catalog::new(vec![cat("A", &[("x", 1.0)]), cat("A", &[("y", 1.0)])]).unwrap_err(),
            MintError::InvalidCatalog(_)
        ));
    }

    #[test]
    fn json_preserves_declaration_order() {
        let json = r#"{
            "Background": {
                "Zeta": { "file": "Zeta.png", "rarity": 0.25 },
                "Alpha": { "file": "Alpha.png", "rarity": 0.75 }
            },
            "Body": {
                "Original": { "image": "shared/body.png", "rarity": 1.0 }
            },
            "Aura": {
                "Glow": { "file": "Glow.png", "rarity": 0.8 }
            }
        }"#;
        let c = Catalog::from_json_str(json).unwrap();
        let names: Vec<_> = c.categories().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["Background", "Body", "Aura"]);

        let bg = c.category("Background").unwrap();
        assert_eq!(bg.options[0].name, "Zeta");
        assert_eq!(bg.options[0].image, "Background/Zeta.png");
        assert_eq!(bg.options[1].name, "Alpha");
        assert_eq!(c.category("Body").unwrap().options[0].image, "shared/body.png");
    }

    #[test]
    fn json_rejects_bad_entries() {
        let missing_image = r#"{ "A": { "x": { "rarity": 1.0 } } }"#;
        assert!(matches!(
            Catalog::from_json_str(missing_image).unwrap_err(),
            MintError::InvalidCatalog(_)
        ));

        let unknown_field = r#"{ "A": { "x": { "file": "x.png", "rarity": 1.0, "w": 2 } } }"#;
        assert!(matches!(
            Catalog::from_json_str(unknown_field).unwrap_err(),
            MintError::Serde(_)
        ));

        let not_object = r#"{ "A": [1, 2] }"#;
        assert!(matches!(
            Catalog::from_json_str(not_object).unwrap_err(),
            MintError::Serde(_)
        ));

        let empty_category = r#"{ "A": {} }"#;
        assert!(matches!(
            Catalog::from_json_str(empty_category).unwrap_err(),
            MintError::InvalidCatalog(_)
        ));
    }

    #[test]
    fn json_rejects_repeated_keys() {
        let repeated_option = r#"{
            "A": {
                "x": { "file": "x.png", "rarity": 1.0 },
                "x": { "file": "y.png", "rarity": 1.0 }
            }
        }"#;
        let err = Catalog::from_json_str(repeated_option).unwrap_err();
        assert!(matches!(err, MintError::InvalidCatalog(_)), "{err:?}");
        assert!(err.to_string().contains("'x'"));

        let repeated_category = r#"{
            "A": { "x": { "file": "x.png", "rarity": 1.0 } },
            "A": { "y": { "file": "y.png", "rarity": 1.0 } }
        }"#;
        assert!(matches!(
            Catalog::from_json_str(repeated_category).unwrap_err(),
            MintError::InvalidCatalog(_)
        ));
    }

    #[test]
    fn weights_absorbed_by_their_siblings_are_invalid() {
        // 1.0 + 1e-20 == 1.0, so "tiny" could never be drawn.
        let err = Catalog::new(vec![cat("A", &[("big", 1.0), ("tiny", 1e-20)])]).unwrap_err();
        assert!(matches!(err, MintError::InvalidCatalog(_)));
        assert!(err.to_string().contains("A/tiny"));

        // First in line but below the sampler's resolution.
        assert!(matches!(
            Catalog::new(vec![cat("A", &[("tiny", 1e-20), ("big", 1.0)])]).unwrap_err(),
            MintError::InvalidCatalog(_)
        ));

        // Rare but reachable.
        let c = Catalog::new(vec![cat("A", &[("big", 1.0), ("rare", 1e-6)])]).unwrap();
        assert_eq!(c.capacity(), 2);
    }
}
