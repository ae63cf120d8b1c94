use std::fmt::Write as _;

use sgf_catalog::CatalogRegistry;
use sgf_core::{Record, Summary};
use sgf_sync::{Availability, DashboardView, SourceToggle};

const BAR_WIDTH: usize = 30;

fn width(text: &str) -> usize {
    text.chars().count()
}

fn pad(text: &str, to: usize) -> String {
    let mut out = text.to_string();
    out.extend(std::iter::repeat(' ').take(to.saturating_sub(width(text))));
    out
}

fn toggle_line(toggle: &SourceToggle) -> String {
    let mark = match (toggle.enabled, toggle.checked) {
        (false, _) => "[-]",
        (true, true) => "[x]",
        (true, false) => "[ ]",
    };
    let detail = match &toggle.availability {
        Availability::Pending => "loading".to_string(),
        Availability::Loaded { records, fetched_at } => {
            format!("{records} records, fetched {}", fetched_at.format("%Y-%m-%d %H:%M:%S UTC"))
        }
        Availability::Unavailable { reason } => format!("unavailable: {reason}"),
    };
    format!("{mark} {} ({detail})", toggle.display_name)
}

pub fn toggles(view: &DashboardView) -> String {
    view.toggles
        .iter()
        .map(toggle_line)
        .collect::<Vec<_>>()
        .join("\n")
}

fn row_line(cells: [&str; 4], widths: [usize; 4]) -> String {
    cells
        .iter()
        .zip(widths)
        .map(|(cell, w)| pad(cell, w))
        .collect::<Vec<_>>()
        .join("  ")
        .trim_end()
        .to_string()
}

pub fn table(records: &[Record], limit: Option<usize>) -> String {
    let shown = &records[..limit.unwrap_or(records.len()).min(records.len())];
    let headers = ["Producto", "Categoría", "Empresa", "Fuente"];
    let rows = shown
        .iter()
        .map(|r| {
            [
                r.product.as_str(),
                r.category.as_str(),
                r.company.as_str(),
                r.source.label(),
            ]
        })
        .collect::<Vec<_>>();

    let mut widths = headers.map(width);
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(width(cell));
        }
    }

    let rule = widths.map(|w| "-".repeat(w));
    let mut out = row_line(headers, widths);
    out.push('\n');
    out.push_str(&row_line(rule.each_ref().map(String::as_str), widths));
    for row in rows {
        out.push('\n');
        out.push_str(&row_line(row, widths));
    }
    if shown.len() < records.len() {
        let _ = write!(out, "\n... {} more", records.len() - shown.len());
    }
    out
}

pub fn bars(title: &str, summaries: &[Summary]) -> String {
    let mut out = format!("{title}\n");
    let Some(max) = summaries.iter().map(|s| s.count).max() else {
        out.push_str("  (no data)");
        return out;
    };
    let label_width = summaries.iter().map(|s| width(&s.label)).max().unwrap_or(0);
    for summary in summaries {
        let len = (summary.count * BAR_WIDTH).div_ceil(max);
        let _ = writeln!(
            out,
            "  {}  {} {}",
            pad(&summary.label, label_width),
            "#".repeat(len),
            summary.count
        );
    }
    out.trim_end().to_string()
}

pub fn dashboard(view: &DashboardView, limit: Option<usize>) -> String {
    let mut out = String::new();
    if let Some(error) = &view.error {
        let _ = writeln!(out, "error: {error} (type `retry` to reload)\n");
    }
    let _ = writeln!(out, "{}\n", toggles(view));
    let _ = writeln!(out, "{} products", view.total);
    if view.total > 0 {
        let _ = writeln!(out, "\n{}", table(&view.results, limit));
        let _ = writeln!(out, "\n{}", bars("Top categories", &view.category_summary));
        let _ = writeln!(out, "\n{}", bars("Top companies", &view.company_summary));
    }
    out.trim_end().to_string()
}

pub fn dashboard_json(view: &DashboardView) -> serde_json::Value {
    serde_json::json!({
        "view": view,
        "charts": view.charts_json(),
    })
}

pub fn registry(registry: &CatalogRegistry) -> String {
    let mut out = String::from("sources:\n");
    for source in &registry.sources {
        let _ = writeln!(
            out,
            "  {:<9} {}  {}",
            source.source.slug(),
            source.source.display_name(),
            source.url
        );
    }
    if registry.proxies.is_empty() {
        out.push_str("proxies: none (direct only)");
    } else {
        out.push_str("proxies:");
        for proxy in &registry.proxies {
            let _ = write!(out, "\n  {proxy}");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use sgf_core::{CatalogEntry, SourceId};

    fn records() -> Vec<Record> {
        vec![
            CatalogEntry::new("Panadería", "Pan", "Ideal").tagged(SourceId::Coacel),
            CatalogEntry::new("Bebidas", "Jugo de manzana", "Watt's").tagged(SourceId::Convivir),
        ]
    }

    #[test]
    fn table_aligns_on_characters_not_bytes() {
        let out = table(&records(), None);
        let lines = out.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Producto         Categoría"));
        assert!(lines[2].starts_with("Pan              Panadería  Ideal"));
        assert!(lines[3].ends_with("Convivir"));
    }

    #[test]
    fn table_limit_notes_hidden_rows() {
        let out = table(&records(), Some(1));
        assert!(out.ends_with("... 1 more"));
        assert_eq!(out.lines().count(), 4);
    }

    #[test]
    fn bars_scale_to_the_largest_count() {
        let out = bars(
            "Top",
            &[
                Summary { label: "Bebidas".into(), count: 4 },
                Summary { label: "Pan".into(), count: 1 },
            ],
        );
        let lines = out.lines().collect::<Vec<_>>();
        assert_eq!(lines[1], format!("  Bebidas  {} 4", "#".repeat(BAR_WIDTH)));
        assert_eq!(lines[2], format!("  Pan      {} 1", "#".repeat(8)));
        assert_eq!(bars("Empty", &[]), "Empty\n  (no data)");
    }

    #[test]
    fn registry_listing_shows_direct_only_without_proxies() {
        let reg = CatalogRegistry::from_yaml_str("proxies: []").unwrap();
        let out = registry(&reg);
        assert!(out.contains("coacel"));
        assert!(out.ends_with("proxies: none (direct only)"));
    }
}
