#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Generates the SPDK configuration and bdevperf job file of an NVMe write-back cache benchmark.
//!
//! # Usage
//!
//! ```text
//! ocf-bench --config <PATH> [--output-dir <DIR>] [--verbose]
//! ```
//!
//! ## Arguments
//!
//! - `--config <PATH>`: TOML file describing the drives, processors and workloads
//! - `--output-dir <DIR>`: Optional. Directory to write into, overriding `output_dir` in the file
//! - `--verbose`: Optional. Log processor assignment and document assembly in detail
//!
//! Two files named after the `name` of the topology are written to the output directory,
//! typically the root of an SPDK checkout:
//!
//! - `<name>_spdk_config.json`
//! - `<name>_bdevperf_config.ini`
//!
//! The bdevperf command line that runs them is printed to stdout. Logs go to stderr.
//!
//! # Example
//!
//! ```bash
//! ocf-bench --config app1.toml --output-dir ~/spdk
//! # Prints: ./test/bdev/bdevperf/bdevperf -c app1_spdk_config.json -j app1_bdevperf_config.ini -m 0x11 -r /var/tmp/spdk.sock -t 300
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use argh::FromArgs;
use ocf_bench::RunInput;
use tracing::Level;

/// Generates the SPDK configuration and bdevperf job file of an NVMe write-back cache benchmark.
#[derive(FromArgs)]
struct Args {
    /// path to the TOML file describing the benchmark topology
    #[argh(option)]
    config: PathBuf,

    /// directory to write the generated files to, overriding the topology file
    #[argh(option)]
    output_dir: Option<PathBuf>,

    /// log in more detail
    #[argh(switch)]
    verbose: bool,
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg_attr(test, mutants::skip)]
fn main() -> ExitCode {
    let args: Args = argh::from_env();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .with_writer(std::io::stderr)
        .init();

    let input = RunInput {
        config: args.config,
        output_dir: args.output_dir,
    };

    match ocf_bench::run(&input) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
