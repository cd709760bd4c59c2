//! `openapi-infer`: generate an OpenAPI document from the router setup of a Rust web project.
//!
//! ```bash
//! openapi-infer ./my-api-project -o openapi.yaml
//! openapi-infer ./my-api-project -f json -c infer.yaml -v
//! ```

use anyhow::Result;
use clap::Parser;
use log::info;
use openapi_infer::cli;

fn main() -> Result<()> {
    let args = cli::CliArgs::parse();

    let log_level = if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    info!("openapi-infer starting...");
    let args = cli::validate_args(args)?;
    let summary = cli::run(&args)?;
    if summary.skipped > 0 {
        info!(
            "{} facts could not be resolved statically; run with -v for details",
            summary.skipped
        );
    }
    Ok(())
}
