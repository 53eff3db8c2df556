use anyhow::{bail, Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

// Use library instead of local modules
use stt_billing::{Pipeline, PipelineConfig};

const USAGE: &str = "usage: stt-billing [--config FILE] [init | stage <csv> <partition> | reconcile | aggregate | export [path] | run]";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args: Vec<String> = env::args().skip(1).collect();

    let config = if args.first().map(String::as_str) == Some("--config") {
        if args.len() < 2 {
            bail!("--config needs a file\n{USAGE}");
        }
        let path = PathBuf::from(args.remove(1));
        args.remove(0);
        PipelineConfig::from_toml_file(&path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?
    } else {
        PipelineConfig::default()
    };

    let pipeline = Pipeline::open(config).context("Failed to open database")?;

    match args.first().map(String::as_str).unwrap_or("run") {
        "init" => pipeline.init().context("init failed")?,
        "stage" => {
            let (Some(csv), Some(partition)) = (args.get(1), args.get(2)) else {
                bail!("stage needs <csv> <partition>\n{USAGE}");
            };
            let report = pipeline
                .stage(Path::new(csv), partition)
                .with_context(|| format!("stage {csv} → {partition} failed"))?;
            println!(
                "✓ Staged {} rows into {} ({} rejected)",
                report.outcome.inserted,
                partition,
                report.normalize.rows_rejected()
            );
        }
        "reconcile" => {
            let report = pipeline.reconcile().context("reconcile failed")?;
            println!("✓ Merged {} STTs ({} overridden)", report.merged, report.overridden);
        }
        "aggregate" => {
            let rows = pipeline.aggregate().context("aggregate failed")?;
            println!("✓ {} summary rows", rows.len());
        }
        "export" => {
            let path = args
                .get(1)
                .map(PathBuf::from)
                .unwrap_or_else(|| pipeline.config().output_path.clone());
            let written = pipeline.export(&path).context("export failed")?;
            println!("✓ Wrote {} rows to {}", written, path.display());
        }
        "run" => {
            let rows = pipeline.run_end_to_end().context("pipeline failed")?;
            println!(
                "✓ {} summary rows written to {}",
                rows.len(),
                pipeline.config().output_path.display()
            );
        }
        other => bail!("unknown command: {other}\n{USAGE}"),
    }

    Ok(())
}
