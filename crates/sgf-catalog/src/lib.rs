//! Catalog registry, CSV normalization and sample fixtures for SGF.

use std::fs;
use std::path::Path;

use anyhow::Context;
use csv::{ReaderBuilder, StringRecord};
use serde::{Deserialize, Serialize};
use sgf_core::{CatalogEntry, SourceId};
use sgf_fetch::{FixtureTransport, DEFAULT_PROXIES};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "sgf-catalog";

pub const COACEL_CSV_URL: &str = "https://docs.google.com/spreadsheets/d/e/2PACX-1vS3uqYngG2O1K07T4FMip3zvB1K1hLfKnFyxwEizn9R58-NQsxncOAKi2bWtH_Y81AqC8SazM1dqfSB/pub?gid=0&single=true&output=csv";
pub const CONVIVIR_CSV_URL: &str = "https://docs.google.com/spreadsheets/d/e/2PACX-1vS3uqYngG2O1K07T4FMip3zvB1K1hLfKnFyxwEizn9R58-NQsxncOAKi2bWtH_Y81AqC8SazM1dqfSB/pub?gid=1009429221&single=true&output=csv";

const CATEGORY_ACCENTED: &str = "Categoría";
const CATEGORY_PLAIN: &str = "Categoria";
const PRODUCT: &str = "Producto";
const COMPANY: &str = "Empresa";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unreadable csv header: {0}")]
    Header(#[source] csv::Error),
    #[error("malformed csv row {row}: {source}")]
    Row {
        row: usize,
        #[source]
        source: csv::Error,
    },
}

/// Header positions resolved once per document.
#[derive(Debug, Clone, Copy, Default)]
struct Columns {
    category_accented: Option<usize>,
    category_plain: Option<usize>,
    product: Option<usize>,
    company: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &StringRecord) -> Self {
        let mut columns = Self::default();
        for (idx, name) in headers.iter().enumerate() {
            let slot = match name.trim() {
                CATEGORY_ACCENTED => &mut columns.category_accented,
                CATEGORY_PLAIN => &mut columns.category_plain,
                PRODUCT => &mut columns.product,
                COMPANY => &mut columns.company,
                _ => continue,
            };
            // first occurrence of a duplicated header wins
            slot.get_or_insert(idx);
        }
        columns
    }

    fn cell<'r>(record: &'r StringRecord, idx: Option<usize>) -> &'r str {
        idx.and_then(|i| record.get(i)).map(str::trim).unwrap_or_default()
    }

    fn entry(&self, record: &StringRecord) -> CatalogEntry {
        let accented = Self::cell(record, self.category_accented);
        let category = if accented.is_empty() {
            Self::cell(record, self.category_plain)
        } else {
            accented
        };
        CatalogEntry::new(
            category,
            Self::cell(record, self.product),
            Self::cell(record, self.company),
        )
    }
}

/// Normalizes header-delimited catalog text into entries, dropping rows
/// without a product. Output keeps input row order.
///
/// Cells are trimmed before the category columns are compared, so a
/// whitespace-only `Categoría` counts as empty and `Categoria` is used.
/// Picking the first non-empty raw cell instead would keep the blank value.
pub fn parse(raw: &str) -> Result<Vec<CatalogEntry>, ParseError> {
    parse_bytes(raw.as_bytes())
}

pub fn parse_bytes(raw: &[u8]) -> Result<Vec<CatalogEntry>, ParseError> {
    let raw = raw.strip_prefix("\u{feff}".as_bytes()).unwrap_or(raw);
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(raw);

    let headers = reader.headers().map_err(ParseError::Header)?.clone();
    let columns = Columns::from_headers(&headers);

    let mut entries = Vec::new();
    let mut dropped = 0usize;
    for (idx, result) in reader.records().enumerate() {
        let record = result.map_err(|source| ParseError::Row {
            row: idx + 2,
            source,
        })?;
        let entry = columns.entry(&record);
        if entry.product.is_empty() {
            dropped += 1;
            continue;
        }
        entries.push(entry);
    }
    debug!(kept = entries.len(), dropped, "normalized catalog csv");
    Ok(entries)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogSource {
    pub source: SourceId,
    pub url: String,
}

/// Dataset endpoints and fallback proxies in effect for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogRegistry {
    pub sources: Vec<CatalogSource>,
    pub proxies: Vec<String>,
}

impl Default for CatalogRegistry {
    fn default() -> Self {
        Self {
            sources: vec![
                CatalogSource {
                    source: SourceId::Coacel,
                    url: COACEL_CSV_URL.to_string(),
                },
                CatalogSource {
                    source: SourceId::Convivir,
                    url: CONVIVIR_CSV_URL.to_string(),
                },
            ],
            proxies: DEFAULT_PROXIES.iter().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("parsing registry yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unknown source_id `{0}` (expected coacel or convivir)")]
    UnknownSource(String),
    #[error("empty url for source {0}")]
    EmptyUrl(SourceId),
}

#[derive(Debug, Default, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    sources: Vec<SourceOverride>,
    #[serde(default)]
    proxies: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct SourceOverride {
    source_id: String,
    url: String,
}

impl CatalogRegistry {
    pub fn url_for(&self, source: SourceId) -> Option<&str> {
        self.sources
            .iter()
            .find(|s| s.source == source)
            .map(|s| s.url.as_str())
    }

    /// Applies a YAML override on top of the built-in endpoints. Keys left
    /// out keep their defaults.
    pub fn from_yaml_str(text: &str) -> Result<Self, RegistryError> {
        let file: RegistryFile = if text.trim().is_empty() {
            RegistryFile::default()
        } else {
            serde_yaml::from_str(text)?
        };
        let mut registry = Self::default();

        for entry in file.sources {
            let source = SourceId::from_slug(&entry.source_id)
                .ok_or_else(|| RegistryError::UnknownSource(entry.source_id.clone()))?;
            let url = entry.url.trim();
            if url.is_empty() {
                return Err(RegistryError::EmptyUrl(source));
            }
            if let Some(slot) = registry.sources.iter_mut().find(|s| s.source == source) {
                slot.url = url.to_string();
            }
        }
        if let Some(proxies) = file.proxies {
            registry.proxies = proxies
                .into_iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
        }
        Ok(registry)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

/// Ten-row demo lists from the first prototype. Test and offline fixtures only.
pub fn sample_entries(source: SourceId) -> Vec<CatalogEntry> {
    let rows: &[(&str, &str, &str)] = match source {
        SourceId::Coacel => &[
            ("Alimentos en conserva", "Atún en agua", "San José"),
            ("Bebidas", "Jugo natural de naranja", "Watt's"),
            ("Bebidas", "Bebida gaseosa", "Coca-Cola"),
            ("Cereales y harinas", "Harina de arroz", "Carozzi"),
            ("Cereales y harinas", "Avena sin gluten", "Quaker"),
            ("Lácteos", "Yogur natural", "Soprole"),
            ("Snacks", "Papas fritas", "Evercrisp"),
            ("Pastas", "Fideos de arroz", "Carozzi"),
            ("Galletas y repostería", "Galletas de arroz", "Tamara"),
            ("Alimentos en conserva", "Arvejas en conserva", "San José"),
        ],
        SourceId::Convivir => &[
            ("Bebidas", "Jugo de manzana", "Watt's"),
            ("Panadería", "Pan sin gluten", "Ideal"),
            ("Panadería", "Masa para pizza", "Líder"),
            ("Cereales y harinas", "Premezcla para pan", "Selecta"),
            ("Galletas y repostería", "Brownie sin gluten", "Jumbo"),
            ("Pastas", "Pasta de maíz", "Lucchetti"),
            ("Snacks", "Maní salado", "Evercrisp"),
            ("Cereales y harinas", "Cereal sin gluten", "Nestlé"),
            ("Lácteos", "Leche sin lactosa", "Colun"),
            ("Bebidas", "Bebida sabor cola", "Pepsi"),
        ],
    };
    rows.iter()
        .map(|(category, product, company)| CatalogEntry::new(*category, *product, *company))
        .collect()
}

/// Renders a source's sample list the way the published sheets export it.
pub fn sample_csv(source: SourceId) -> anyhow::Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([CATEGORY_PLAIN, PRODUCT, COMPANY])
        .context("writing sample csv header")?;
    for entry in sample_entries(source) {
        writer
            .write_record([&entry.category, &entry.product, &entry.company])
            .context("writing sample csv row")?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| anyhow::anyhow!("finishing sample csv: {}", err.error()))?;
    String::from_utf8(bytes).context("sample csv is not utf-8")
}

/// Transport that serves the sample lists at the registry's direct URLs.
pub fn sample_transport(registry: &CatalogRegistry) -> anyhow::Result<FixtureTransport> {
    let mut transport = FixtureTransport::new();
    for source in &registry.sources {
        transport = transport.with_body(source.url.clone(), sample_csv(source.source)?);
    }
    Ok(transport)
}
