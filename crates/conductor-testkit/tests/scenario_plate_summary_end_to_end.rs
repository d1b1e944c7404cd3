//! Scenario: an analysis script reading an Operetta export and publishing
//! a per-well summary table and a heatmap figure.
//!
//! GREEN when:
//! - `read_csv_as` resolves `Operetta_objectresults` under `data/**`;
//! - the table lands at `results/table/summary.csv` and `results.json`
//!   lists `summary` with kind `table`;
//! - the figure lands under `results/figure/` as SVG;
//! - a dry-run context produces the same files and manifest shape;
//! - worker threads sharing one `&Context` each register their artifact.

use conductor_context::{
    Context, ExecutionMode, FigureFormat, FigurePayload, PublishOptions, RawArtifactPayload, RenderFigure,
    TablePayload,
};
use conductor_testkit::{operetta_objects_csv, RequestFixture};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::thread;

#[derive(Debug, Deserialize)]
struct ObjectRow {
    #[serde(rename = "Row")]
    row: String,
    #[serde(rename = "Column")]
    column: u32,
    #[serde(rename = "Area")]
    area: f64,
}

#[derive(Debug, Serialize)]
struct WellSummary {
    well: String,
    objects: usize,
    mean_area: f64,
}

struct Heatmap<'a>(&'a [WellSummary]);

impl RenderFigure for Heatmap<'_> {
    fn render(&self, format: FigureFormat, out: &mut dyn Write) -> io::Result<()> {
        if format != FigureFormat::Svg {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "svg only"));
        }
        writeln!(out, r#"<svg xmlns="http://www.w3.org/2000/svg">"#)?;
        for (i, w) in self.0.iter().enumerate() {
            writeln!(
                out,
                r#"<rect x="{}" y="0" width="10" height="10" data-well="{}" data-mean="{:.2}"/>"#,
                i * 10,
                w.well,
                w.mean_area
            )?;
        }
        writeln!(out, "</svg>")
    }
}

fn summarize(ctx: &Context) -> anyhow::Result<Vec<WellSummary>> {
    let rows: Vec<ObjectRow> = ctx.read_csv_as("Operetta_objectresults")?;
    let mut per_well: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for r in rows {
        per_well.entry(format!("{}{}", r.row, r.column)).or_default().push(r.area);
    }
    Ok(per_well
        .into_iter()
        .map(|(well, areas)| WellSummary {
            well,
            objects: areas.len(),
            mean_area: areas.iter().sum::<f64>() / areas.len() as f64,
        })
        .collect())
}

fn run_script(ctx: &Context) -> anyhow::Result<()> {
    let summary = summarize(ctx)?;
    ctx.publish_table(
        "summary",
        TablePayload::from_records(&summary)?,
        PublishOptions::new().title("Per-well object summary"),
    )?;
    ctx.publish_figure(
        "heatmap",
        FigurePayload::render(&Heatmap(&summary), FigureFormat::Svg)?,
        PublishOptions::new().title("Mean area heatmap"),
    )?;
    Ok(())
}

fn seed(fx: &RequestFixture) -> anyhow::Result<()> {
    fx.write_data(
        "Operetta/1234/Operetta_objectresults.csv",
        operetta_objects_csv(&[("A", 1, 10.0), ("A", 1, 14.0), ("B", 2, 3.0)]),
    )?;
    Ok(())
}

#[test]
fn scenario_plate_summary_publishes_table_and_figure() -> anyhow::Result<()> {
    let fx = RequestFixture::new()?;
    seed(&fx)?;
    let ctx = fx.context_with_step("plate_heatmap");

    run_script(&ctx)?;

    let table = fx.root().join("results/table/summary.csv");
    assert_eq!(
        std::fs::read_to_string(&table)?,
        "well,objects,mean_area\nA1,2,12.0\nB2,1,3.0\n"
    );
    let svg = std::fs::read_to_string(fx.root().join("results/figure/heatmap.svg"))?;
    assert!(svg.contains(r#"data-well="A1""#));

    let json = fx.manifest_json()?;
    assert_eq!(json["request"]["request_id"], "REQ-TEST");
    assert_eq!(json["artifacts"]["summary"]["kind"], "table");
    assert_eq!(json["artifacts"]["summary"]["path"], "results/table/summary.csv");
    assert_eq!(json["artifacts"]["summary"]["metadata"]["content_type"], "text/csv");
    assert_eq!(json["artifacts"]["summary"]["metadata"]["step"], "plate_heatmap");
    assert_eq!(json["artifacts"]["heatmap"]["kind"], "figure");
    assert_eq!(json["artifacts"]["heatmap"]["metadata"]["content_type"], "image/svg+xml");
    Ok(())
}

#[test]
fn scenario_dry_run_context_writes_the_same_results() -> anyhow::Result<()> {
    let fx = RequestFixture::new()?;
    seed(&fx)?;
    let ctx = Context::new(&fx.config(), ExecutionMode::DryRun);
    assert!(ctx.is_dry_run());

    run_script(&ctx)?;

    let m = ctx.manifest()?;
    assert_eq!(m.ids().collect::<Vec<_>>(), vec!["summary", "heatmap"]);
    assert!(ctx.scan_consistency()?.is_consistent());
    Ok(())
}

#[test]
fn scenario_workers_share_one_context() -> anyhow::Result<()> {
    let fx = RequestFixture::new()?;
    let ctx = fx.context();

    thread::scope(|s| {
        for w in 0..4 {
            let ctx = &ctx;
            s.spawn(move || {
                ctx.publish_artifact(
                    &format!("worker-{w}.log"),
                    RawArtifactPayload::new(format!("worker {w} done\n").into_bytes()),
                    PublishOptions::new(),
                )
                .unwrap();
            });
        }
    });

    assert_eq!(ctx.manifest()?.len(), 4);
    Ok(())
}
