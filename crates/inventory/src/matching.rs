//! Ingredient-to-stock matching.
//!
//! Template ingredients carry free-text names ("Nutella Topping") while stores
//! name their stock rows however they like ("Nutella Sauce"). Matching runs a
//! fixed cascade and the first strategy that yields a row wins:
//!
//! 1. exact equality after trimming and lowercasing
//! 2. the curated [`SYNONYMS`] table
//! 3. substring containment in either direction
//! 4. token overlap, accepted only above [`TOKEN_OVERLAP_THRESHOLD`]
//!
//! Inactive rows are never matched.

use serde::{Deserialize, Serialize};

use crate::stock::InventoryStockItem;

/// Minimum token-overlap score (exclusive) for a fuzzy match to be accepted.
pub const TOKEN_OVERLAP_THRESHOLD: f64 = 0.5;

/// Known naming variants between recipe templates and store stock.
///
/// Each entry is `(template pattern, stock-name variants)`. An entry applies
/// when the ingredient name contains the pattern or the pattern contains the
/// ingredient name; its variants are then tried in order as substrings of stock
/// names. Entries are consulted in table order and the first hit wins, so more
/// specific patterns must come before broader ones.
pub const SYNONYMS: &[(&str, &[&str])] = &[
    ("oreo crushed", &["crushed oreo", "oreo crushed"]),
    ("crushed oreo", &["oreo crushed", "crushed oreo"]),
    ("biscoff crushed", &["crushed biscoff", "biscoff crushed"]),
    ("crushed biscoff", &["biscoff crushed", "crushed biscoff"]),
    ("graham crushed", &["crushed grahams", "graham crushed"]),
    ("crushed grahams", &["graham crushed", "crushed grahams"]),
    ("chocolate sauce", &["choco sauce", "chocolate sauce", "dark chocolate sauce"]),
    ("caramel sauce", &["caramel syrup", "caramel sauce"]),
    ("strawberry toppings", &["strawberry jam", "strawberry topping"]),
    ("nutella topping", &["nutella", "nutella sauce"]),
];

/// Which step of the cascade produced a match.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    Exact,
    Synonym,
    Substring,
    TokenOverlap,
}

impl MatchStrategy {
    /// Anything other than exact equality is a guess worth reviewing.
    pub fn is_fuzzy(self) -> bool {
        !matches!(self, Self::Exact)
    }
}

impl core::fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::Exact => "exact",
            Self::Synonym => "synonym",
            Self::Substring => "substring",
            Self::TokenOverlap => "token_overlap",
        })
    }
}

/// A resolved stock row plus how it was found.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IngredientMatch<'a> {
    pub item: &'a InventoryStockItem,
    pub strategy: MatchStrategy,
    /// 1.0 for every strategy except token overlap.
    pub score: f64,
    /// Synonym variant that matched, when `strategy` is `Synonym`.
    pub via: Option<&'static str>,
}

impl<'a> IngredientMatch<'a> {
    fn certain(item: &'a InventoryStockItem, strategy: MatchStrategy) -> Self {
        Self {
            item,
            strategy,
            score: 1.0,
            via: None,
        }
    }
}

/// Lowercased, trimmed form used for every comparison.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Find the stock row that best matches `ingredient_name`.
pub fn find_best_match<'a>(
    ingredient_name: &str,
    inventory: &'a [InventoryStockItem],
) -> Option<IngredientMatch<'a>> {
    let wanted = normalize_name(ingredient_name);
    if wanted.is_empty() {
        return None;
    }

    let candidates: Vec<(&'a InventoryStockItem, String)> = inventory
        .iter()
        .filter(|item| item.is_active)
        .map(|item| (item, normalize_name(&item.name)))
        .collect();

    if let Some((item, _)) = candidates.iter().find(|(_, name)| *name == wanted) {
        return Some(IngredientMatch::certain(*item, MatchStrategy::Exact));
    }

    if let Some(found) = synonym_match(&wanted, &candidates) {
        return Some(found);
    }

    if let Some((item, _)) = candidates
        .iter()
        .find(|(_, name)| !name.is_empty() && (wanted.contains(name.as_str()) || name.contains(&wanted)))
    {
        return Some(IngredientMatch::certain(*item, MatchStrategy::Substring));
    }

    token_overlap_match(&wanted, &candidates)
}

fn synonym_match<'a>(
    wanted: &str,
    candidates: &[(&'a InventoryStockItem, String)],
) -> Option<IngredientMatch<'a>> {
    for (pattern, variants) in SYNONYMS {
        if !(wanted.contains(pattern) || pattern.contains(wanted)) {
            continue;
        }
        for variant in *variants {
            if let Some((item, _)) = candidates.iter().find(|(_, name)| name.contains(*variant)) {
                return Some(IngredientMatch {
                    item: *item,
                    strategy: MatchStrategy::Synonym,
                    score: 1.0,
                    via: Some(*variant),
                });
            }
        }
    }
    None
}

/// Share of words in common, relative to the longer of the two names.
///
/// Two words are "in common" when either contains the other, so "topping"
/// counts against "toppings".
pub fn token_overlap_score(a: &str, b: &str) -> f64 {
    let a_words: Vec<&str> = a.split_whitespace().collect();
    let b_words: Vec<&str> = b.split_whitespace().collect();
    let longest = a_words.len().max(b_words.len());
    if longest == 0 {
        return 0.0;
    }

    let common = a_words
        .iter()
        .filter(|word| b_words.iter().any(|other| other.contains(*word) || word.contains(other)))
        .count();

    common as f64 / longest as f64
}

fn token_overlap_match<'a>(
    wanted: &str,
    candidates: &[(&'a InventoryStockItem, String)],
) -> Option<IngredientMatch<'a>> {
    let mut best: Option<(&'a InventoryStockItem, f64)> = None;

    for (item, name) in candidates {
        let score = token_overlap_score(wanted, name);
        if score <= TOKEN_OVERLAP_THRESHOLD {
            continue;
        }
        // Strictly greater keeps the earliest row on ties.
        if best.is_none_or(|(_, top)| score > top) {
            best = Some((*item, score));
        }
    }

    best.map(|(item, score)| IngredientMatch {
        item,
        strategy: MatchStrategy::TokenOverlap,
        score,
        via: None,
    })
}
