//! Table formatting utilities for structured output.

use comfy_table::{
    Attribute, Cell, CellAlignment, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
};

use crate::types::PostingMatch;
use crate::vector::IndexMetadata;

const PREVIEW_CHARS: usize = 80;

/// Builder for creating formatted tables.
pub struct TableBuilder {
    table: Table,
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TableBuilder {
    pub fn new() -> Self {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.apply_modifier(UTF8_ROUND_CORNERS);
        Self { table }
    }

    /// Set the table headers.
    pub fn set_headers(mut self, headers: Vec<&str>) -> Self {
        let header_cells: Vec<Cell> = headers
            .into_iter()
            .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
            .collect();
        self.table.set_header(header_cells);
        self
    }

    pub fn add_row(mut self, row: Vec<String>) -> Self {
        self.table.add_row(row);
        self
    }

    pub fn build(self) -> String {
        self.table.to_string()
    }
}

/// Ranked search hits, one row per posting.
///
/// `first_rank` is the rank of the first row (pages after the first start later).
pub fn create_results_table(hits: &[PostingMatch], first_rank: usize) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.apply_modifier(UTF8_ROUND_CORNERS);

    table.set_header(vec![
        Cell::new("#").add_attribute(Attribute::Bold),
        Cell::new("Score").add_attribute(Attribute::Bold),
        Cell::new("Job").add_attribute(Attribute::Bold),
        Cell::new("Title").add_attribute(Attribute::Bold),
        Cell::new("Company").add_attribute(Attribute::Bold),
        Cell::new("Location").add_attribute(Attribute::Bold),
        Cell::new("Description").add_attribute(Attribute::Bold),
    ]);

    for (offset, hit) in hits.iter().enumerate() {
        let score = hit.score.get();
        let color = if score >= 0.7 {
            Color::Green
        } else if score >= 0.4 {
            Color::Yellow
        } else {
            Color::Reset
        };
        let posting = &hit.posting;

        table.add_row(vec![
            Cell::new(first_rank + offset).set_alignment(CellAlignment::Right),
            Cell::new(format!("{score:.3}")).fg(color),
            Cell::new(posting.job_id),
            Cell::new(&posting.title),
            Cell::new(&posting.company),
            Cell::new(posting.location.as_deref().unwrap_or("-")),
            Cell::new(posting.description_preview(PREVIEW_CHARS)),
        ]);
    }

    table.to_string()
}

/// Index and store summary for `jobmatch info`.
pub fn create_info_table(
    metadata: Option<&IndexMetadata>,
    postings: usize,
    embedded: usize,
) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.apply_modifier(UTF8_ROUND_CORNERS);

    table.set_header(vec![
        Cell::new("Metric").add_attribute(Attribute::Bold),
        Cell::new("Value").add_attribute(Attribute::Bold),
    ]);

    table.add_row(vec!["Postings", &postings.to_string()]);
    table.add_row(vec!["Embedded", &embedded.to_string()]);

    match metadata {
        Some(metadata) => {
            table.add_row(vec!["Index kind", &metadata.kind.to_string()]);
            table.add_row(vec!["Indexed vectors", &metadata.ntotal.to_string()]);
            table.add_row(vec!["Model", &metadata.model_id]);
            table.add_row(vec!["Dimension", &metadata.dimension.to_string()]);
            table.add_row(vec!["Clusters", &metadata.number_of_clusters.to_string()]);
            table.add_row(vec![
                "Training sample",
                &metadata.training_sample_size.to_string(),
            ]);
            table.add_row(vec![
                "Sub-quantizers",
                &format!(
                    "{} x {} codes ({} bits)",
                    metadata.subquantizers, metadata.codebook_size, metadata.quantization_bits
                ),
            ]);
            table.add_row(vec!["Default nprobe", &metadata.default_nprobe.to_string()]);
            table.add_row(vec!["Built at", &metadata.built_at]);

            if metadata.ntotal != embedded {
                table.add_row(vec![
                    Cell::new("Status"),
                    Cell::new("stale, run 'jobmatch build'")
                        .fg(Color::Yellow)
                        .add_attribute(Attribute::Bold),
                ]);
            }
        }
        None => {
            table.add_row(vec![
                Cell::new("Index"),
                Cell::new("not built").fg(Color::Yellow),
            ]);
        }
    }

    table.to_string()
}
