//! Per-well mean Cas9 intensity, published as an SVG plate heatmap.
//!
//! ```text
//! conductor run --context context.local.json --script target/debug/examples/plate_heatmap
//! ```

use anyhow::{Context as _, Result};
use conductor_context::{Context, FigureFormat, FigurePayload, PublishOptions, RenderFigure};
use std::collections::BTreeMap;
use std::io::{self, Write};

const VALUE_COLUMN: &str = "Nuclei - Cas9_Intensity Mean";
const CELL: usize = 24;

struct PlateHeatmap {
    rows: Vec<String>,
    columns: Vec<u32>,
    /// (row, column) -> mean
    values: BTreeMap<(String, u32), f64>,
}

impl PlateHeatmap {
    fn range(&self) -> (f64, f64) {
        self.values
            .values()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)))
    }
}

impl RenderFigure for PlateHeatmap {
    fn render(&self, format: FigureFormat, out: &mut dyn Write) -> io::Result<()> {
        if format != FigureFormat::Svg {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "plate heatmap renders svg only"));
        }
        let (lo, hi) = self.range();
        let span = if hi > lo { hi - lo } else { 1.0 };
        let width = (self.columns.len() + 1) * CELL;
        let height = (self.rows.len() + 2) * CELL;

        writeln!(
            out,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" font-size="10">"#
        )?;
        writeln!(out, r#"<text x="0" y="12">Average {VALUE_COLUMN}</text>"#)?;
        for (ci, c) in self.columns.iter().enumerate() {
            writeln!(out, r#"<text x="{}" y="{}">{c}</text>"#, (ci + 1) * CELL + 6, 2 * CELL - 4)?;
        }
        for (ri, r) in self.rows.iter().enumerate() {
            let y = (ri + 2) * CELL;
            writeln!(out, r#"<text x="6" y="{}">{r}</text>"#, y + 16)?;
            for (ci, c) in self.columns.iter().enumerate() {
                let x = (ci + 1) * CELL;
                match self.values.get(&(r.clone(), *c)) {
                    Some(v) => {
                        // blue (low) to red (high)
                        let t = (v - lo) / span;
                        let red = (255.0 * t).round() as u8;
                        let blue = (255.0 * (1.0 - t)).round() as u8;
                        writeln!(
                            out,
                            r#"<rect x="{x}" y="{y}" width="{CELL}" height="{CELL}" fill="rgb({red},0,{blue})"><title>{r}{c}: {v:.3}</title></rect>"#
                        )?;
                    }
                    None => writeln!(
                        out,
                        r##"<rect x="{x}" y="{y}" width="{CELL}" height="{CELL}" fill="#eeeeee"/>"##
                    )?,
                }
            }
        }
        writeln!(out, "</svg>")
    }
}

fn build_heatmap(ctx: &Context) -> Result<PlateHeatmap> {
    let table = ctx.read_csv("data/Operetta_objectresults.csv")?;
    let (Some(ri), Some(ci), Some(vi)) = (
        table.column_index("Row"),
        table.column_index("Column"),
        table.column_index(VALUE_COLUMN),
    ) else {
        anyhow::bail!("object results need Row, Column and '{VALUE_COLUMN}' columns");
    };

    let mut sums: BTreeMap<(String, u32), (f64, usize)> = BTreeMap::new();
    for (n, row) in table.rows.iter().enumerate() {
        let cell = |i: usize| row.get(i).map(String::as_str).unwrap_or("");
        let Ok(value) = cell(vi).trim().parse::<f64>() else {
            continue; // blank / NaN measurement
        };
        let column: u32 = cell(ci)
            .trim()
            .parse()
            .with_context(|| format!("row {}: bad Column '{}'", n + 2, cell(ci)))?;
        let slot = sums.entry((cell(ri).trim().to_string(), column)).or_default();
        slot.0 += value;
        slot.1 += 1;
    }

    let values: BTreeMap<_, _> = sums
        .into_iter()
        .map(|(k, (sum, n))| (k, sum / n as f64))
        .collect();
    let mut rows: Vec<String> = values.keys().map(|(r, _)| r.clone()).collect();
    rows.dedup();
    let mut columns: Vec<u32> = values.keys().map(|(_, c)| *c).collect();
    columns.sort_unstable();
    columns.dedup();

    Ok(PlateHeatmap { rows, columns, values })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let ctx = Context::from_env()?;
    let heatmap = build_heatmap(&ctx)?;

    let record = ctx.publish_figure(
        "plate_heatmap",
        FigurePayload::render(&heatmap, FigureFormat::Svg)?,
        PublishOptions::new()
            .title("Cas9 intensity heatmap")
            .description(format!("Average {VALUE_COLUMN} per well")),
    )?;
    println!("published {}", record.path);
    Ok(())
}
