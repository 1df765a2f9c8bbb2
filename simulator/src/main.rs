use anyhow::Context;
use clap::Parser;
use std::fs;
use std::path::PathBuf;

use generator::{build_ramp_cube, build_reference_store};
use workflow::config::WorkflowConfig;
use workflow::runner::Runner;

mod generator;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "NIR ramp reduction workflow driver")]
struct Args {
    /// Load a workflow config from YAML
    #[arg(long)]
    workflow: Option<PathBuf>,
    /// Override the number of integrations in the synthetic exposure
    #[arg(long)]
    integrations: Option<usize>,
    /// Override the temporal bin size
    #[arg(long)]
    bin_size: Option<usize>,
    /// Write the JSON summary product even if the config leaves saving off
    #[arg(long, default_value_t = false)]
    save: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = if let Some(path) = args.workflow {
        WorkflowConfig::load(path)?
    } else {
        WorkflowConfig::default()
    };
    if let Some(n) = args.integrations {
        config.generator.integrations = n;
    }
    if let Some(b) = args.bin_size {
        config.stages.timeaverage.num_ave = b;
    }
    if args.save {
        config.save_opt = true;
    }

    let ramp = build_ramp_cube(&config.generator)?;
    let reference = build_reference_store(&config.generator);
    let runner = Runner::new(config.clone());
    let result = runner.execute(ramp, &reference)?;

    println!(
        "Reduction run -> {} binned integrations, {}x{} pixels, {:.1}% flagged, mean rate {:.3} {}",
        result.summary.binned_integrations,
        result.summary.rows,
        result.summary.columns,
        100.0 * result.summary.flagged_fraction,
        result.summary.mean_rate,
        result.cube.meta.bunit_data
    );

    if config.save_opt {
        let report_path = PathBuf::from(format!("{}.json", config.product_name));
        let report =
            serde_json::to_string_pretty(&result.summary).context("serialising run summary")?;
        fs::write(&report_path, report)
            .with_context(|| format!("writing {}", report_path.display()))?;
        println!("Summary written to {}", report_path.display());
    }

    Ok(())
}
