use std::hash::{Hash, Hasher};

use rand::Rng;

use crate::{
    catalog::{Catalog, Category, TraitOption},
    foundation::error::{MintError, MintResult},
    select::pick_weighted,
};

/// One category's chosen option.
#[derive(Clone, Copy, Debug)]
pub struct Pick<'c> {
    pub category: &'c Category,
    pub option: &'c TraitOption,
}

/// One option per category, in catalog order.
///
/// Two draws are equal iff their option-name sequences are equal position-wise.
#[derive(Clone, Debug)]
pub struct Draw<'c> {
    picks: Vec<Pick<'c>>,
}

impl<'c> Draw<'c> {
    /// Build a fresh draw by sampling every category of `catalog`.
    pub fn sample<R>(catalog: &'c Catalog, rng: &mut R) -> MintResult<Self>
    where
        R: Rng + ?Sized,
    {
        let picks = catalog
            .categories()
            .iter()
            .map(|category| {
                pick_weighted(category, rng).map(|option| Pick { category, option })
            })
            .collect::<MintResult<Vec<_>>>()?;
        Ok(Self { picks })
    }

    /// Rebuild a draw from option names listed in catalog order.
    pub fn from_option_names<S: AsRef<str>>(catalog: &'c Catalog, names: &[S]) -> MintResult<Self> {
        if names.len() != catalog.len() {
            return Err(MintError::validation(format!(
                "draw needs {} option names, got {}",
                catalog.len(),
                names.len()
            )));
        }
        let picks = catalog
            .categories()
            .iter()
            .zip(names)
            .map(|(category, name)| {
                let name: &str = name.as_ref();
                category
                    .option(name)
                    .map(|option| Pick { category, option })
                    .ok_or_else(|| {
                        MintError::validation(format!(
                            "category '{}' has no option '{name}'",
                            category.name
                        ))
                    })
            })
            .collect::<MintResult<Vec<_>>>()?;
        Ok(Self { picks })
    }

    pub fn picks(&self) -> &[Pick<'c>] {
        &self.picks
    }

    pub fn len(&self) -> usize {
        self.picks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.picks.is_empty()
    }

    pub fn option_names(&self) -> impl Iterator<Item = &'c str> + '_ {
        self.picks.iter().map(|p| p.option.name.as_str())
    }

    /// Owned identity of this draw, suitable for long-lived history sets.
    pub fn key(&self) -> DrawKey {
        DrawKey(self.option_names().map(str::to_owned).collect())
    }
}

impl PartialEq for Draw<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.option_names().eq(other.option_names())
    }
}

impl Eq for Draw<'_> {}

impl Hash for Draw<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DrawKey(pub Vec<String>);

impl std::fmt::Display for DrawKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

/// Cartesian product of every category's selectable options.
///
/// Yields draws in catalog order with the last category varying fastest.
pub struct ExhaustiveDraws<'c> {
    catalog: &'c Catalog,
    selectable: Vec<Vec<&'c TraitOption>>,
    cursor: Option<Vec<usize>>,
}

impl<'c> ExhaustiveDraws<'c> {
    pub fn new(catalog: &'c Catalog) -> Self {
        let selectable: Vec<Vec<&TraitOption>> = catalog
            .categories()
            .iter()
            .map(|c| c.options.iter().filter(|o| o.is_selectable()).collect())
            .collect();
        let cursor = if selectable.is_empty() || selectable.iter().any(Vec::is_empty) {
            None
        } else {
            Some(vec![0; selectable.len()])
        };
        Self {
            catalog,
            selectable,
            cursor,
        }
    }

    fn advance(&mut self) {
        let Some(cursor) = self.cursor.as_mut() else {
            return;
        };
        for pos in (0..cursor.len()).rev() {
            cursor[pos] += 1;
            if cursor[pos] < self.selectable[pos].len() {
                return;
            }
            cursor[pos] = 0;
        }
        self.cursor = None;
    }
}

impl<'c> Iterator for ExhaustiveDraws<'c> {
    type Item = Draw<'c>;

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.cursor.as_ref()?;
        let picks = self
            .catalog
            .categories()
            .iter()
            .zip(cursor)
            .zip(&self.selectable)
            .map(|((category, &i), options)| Pick {
                category,
                option: options[i],
            })
            .collect();
        self.advance();
        Some(Draw { picks })
    }
}
