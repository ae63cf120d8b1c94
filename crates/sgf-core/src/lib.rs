//! Core product-catalog model, filter engine and facet aggregation for SGF.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "sgf-core";

pub const TOP_N: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceId {
    Coacel,
    Convivir,
}

impl SourceId {
    pub const ALL: [SourceId; 2] = [SourceId::Coacel, SourceId::Convivir];

    pub fn slug(self) -> &'static str {
        match self {
            SourceId::Coacel => "coacel",
            SourceId::Convivir => "convivir",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SourceId::Coacel => "Coacel",
            SourceId::Convivir => "Convivir",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            SourceId::Coacel => "Fundación Coacel",
            SourceId::Convivir => "Fundación Convivir",
        }
    }

    pub fn from_slug(input: &str) -> Option<Self> {
        let input = input.trim();
        Self::ALL
            .into_iter()
            .find(|s| s.slug().eq_ignore_ascii_case(input) || s.label().eq_ignore_ascii_case(input))
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub category: String,
    pub product: String,
    pub company: String,
}

impl CatalogEntry {
    pub fn new(
        category: impl Into<String>,
        product: impl Into<String>,
        company: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            product: product.into(),
            company: company.into(),
        }
    }

    pub fn tagged(&self, source: SourceId) -> Record {
        Record {
            category: self.category.clone(),
            product: self.product.clone(),
            company: self.company.clone(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub category: String,
    pub product: String,
    pub company: String,
    pub source: SourceId,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecordSets {
    sets: BTreeMap<SourceId, Vec<CatalogEntry>>,
}

impl RecordSets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: SourceId, entries: Vec<CatalogEntry>) -> Self {
        self.insert(source, entries);
        self
    }

    pub fn insert(&mut self, source: SourceId, entries: Vec<CatalogEntry>) {
        self.sets.insert(source, entries);
    }

    pub fn get(&self, source: SourceId) -> &[CatalogEntry] {
        self.sets.get(&source).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn len(&self, source: SourceId) -> usize {
        self.get(source).len()
    }

    pub fn total(&self) -> usize {
        self.sets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Active filter constraints. Empty strings impose no constraint; sources
/// missing from `include_sources` are never merged in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterCriteria {
    pub search_term: String,
    pub category: String,
    pub company: String,
    pub include_sources: BTreeSet<SourceId>,
}

impl Default for FilterCriteria {
    fn default() -> Self {
        Self {
            search_term: String::new(),
            category: String::new(),
            company: String::new(),
            include_sources: SourceId::ALL.into_iter().collect(),
        }
    }
}

impl FilterCriteria {
    pub fn includes(&self, source: SourceId) -> bool {
        self.include_sources.contains(&source)
    }

    pub fn with_search(mut self, term: impl Into<String>) -> Self {
        self.search_term = term.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = company.into();
        self
    }

    pub fn only_sources(mut self, sources: impl IntoIterator<Item = SourceId>) -> Self {
        self.include_sources = sources.into_iter().collect();
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        if !self.search_term.is_empty() {
            let term = self.search_term.to_lowercase();
            if !record.product.to_lowercase().contains(&term) {
                return false;
            }
        }
        if !self.category.is_empty() && record.category != self.category {
            return false;
        }
        if !self.company.is_empty() && record.company != self.company {
            return false;
        }
        true
    }
}

pub fn merge(sets: &RecordSets, include: &BTreeSet<SourceId>) -> Vec<Record> {
    SourceId::ALL
        .into_iter()
        .filter(|source| include.contains(source))
        .flat_map(|source| sets.get(source).iter().map(move |entry| entry.tagged(source)))
        .collect()
}

/// Filter engine: merge included sources, then narrow by the text, category
/// and company predicates. Preserves merge order.
pub fn apply(sets: &RecordSets, criteria: &FilterCriteria) -> Vec<Record> {
    let term = criteria.search_term.to_lowercase();
    merge(sets, &criteria.include_sources)
        .into_iter()
        .filter(|r| term.is_empty() || r.product.to_lowercase().contains(&term))
        .filter(|r| criteria.category.is_empty() || r.category == criteria.category)
        .filter(|r| criteria.company.is_empty() || r.company == criteria.company)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Facet {
    Category,
    Company,
}

impl Facet {
    pub fn of<'a>(self, record: &'a Record) -> &'a str {
        match self {
            Facet::Category => &record.category,
            Facet::Company => &record.company,
        }
    }

    fn of_entry(self, entry: &CatalogEntry) -> &str {
        match self {
            Facet::Category => &entry.category,
            Facet::Company => &entry.company,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub label: String,
    pub count: usize,
}

/// Top-N frequency counts for one facet. Empty values are not counted;
/// equal counts keep first-seen order.
pub fn summarize(records: &[Record], facet: Facet) -> Vec<Summary> {
    summarize_by(records, |r| facet.of(r))
}

pub fn summarize_by<F>(records: &[Record], selector: F) -> Vec<Summary>
where
    F: Fn(&Record) -> &str,
{
    let mut index = HashMap::<&str, usize>::new();
    let mut counts = Vec::<Summary>::new();
    for record in records {
        let label = selector(record);
        if label.is_empty() {
            continue;
        }
        match index.get(label) {
            Some(&i) => counts[i].count += 1,
            None => {
                index.insert(label, counts.len());
                counts.push(Summary {
                    label: label.to_string(),
                    count: 1,
                });
            }
        }
    }
    // stable sort keeps discovery order within equal counts
    counts.sort_by(|a, b| b.count.cmp(&a.count));
    counts.truncate(TOP_N);
    counts
}

pub fn facet_options(sets: &RecordSets, include: &BTreeSet<SourceId>, facet: Facet) -> Vec<String> {
    SourceId::ALL
        .into_iter()
        .filter(|source| include.contains(source))
        .flat_map(|source| sets.get(source).iter())
        .map(|entry| facet.of_entry(entry))
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
