#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Describe an NVMe write-back cache benchmark and generate the configuration that runs it.
//!
//! An operator describes which NVMe drives exist, how each drive is split into partitions,
//! which partitions act as cache and which as backing ("core") storage, and which processor
//! drives each workload. From that description this crate generates two documents that are
//! consistent with each other by construction:
//!
//! * an SPDK JSON configuration that attaches the drives, splits them and creates one OCF
//!   write-back cache per cache/core pair;
//! * a bdevperf job file with one job per cache, pinned to the processor of its workload.
//!
//! It also composes the bdevperf command line that runs the jobs on every processor used.
//! Running it is left to the operator.
//!
//! # Example
//!
//! ```
//! use new_zealand::nz;
//! use ocf_bench::fake::HardwareBuilder;
//! use ocf_bench::{CpuRegistry, DevicePair, IoPattern, OutputSink, Topology, Workload};
//!
//! # fn main() -> ocf_bench::Result<()> {
//! # let output_dir = tempfile::tempdir().unwrap();
//! // CpuRegistry::enumerate() inspects the real host instead.
//! let mut registry = CpuRegistry::fake(HardwareBuilder::from_counts(nz!(4), nz!(2)))?;
//!
//! let cpu0 = registry.acquire_cpu()?;
//! let cpu0s = registry.sibling_of(&cpu0)?.expect("fake hardware has two threads per core");
//!
//! let mut topology = Topology::new("app1");
//!
//! let cache1 = topology.make_drive("66:00.0", "Nvme1", nz!(8), Some(102_400));
//! let cache2 = topology.make_drive("e3:00.0", "Nvme2", nz!(8), Some(102_400));
//! let core1 = topology.make_drive("68:00.0", "Nvme0", nz!(8), None);
//! let core2 = topology.make_drive("65:00.0", "Nvme3", nz!(8), None);
//!
//! topology.add_workload(
//!     Workload::builder("wla")
//!         .rw(IoPattern::Write)
//!         .block_size(4096)
//!         .queue_depth(128)
//!         .cpu(cpu0)
//!         .devices(DevicePair::zip(cache1.partitions(), core1.partitions()))
//!         .build()?,
//! );
//!
//! topology.add_workload(
//!     Workload::builder("wlb")
//!         .rw(IoPattern::Write)
//!         .block_size(4096)
//!         .queue_depth(128)
//!         .cpu(cpu0s)
//!         .devices(DevicePair::zip(cache2.partitions(), core2.partitions()))
//!         .build()?,
//! );
//!
//! let sink = OutputSink::new(Some(output_dir.path().to_path_buf()));
//! let produced = topology.produce(&registry, &sink)?;
//!
//! assert!(produced.run_command().contains("-m 0x11"));
//! # Ok(())
//! # }
//! ```
//!
//! # Topology files
//!
//! The same description can be written as a TOML file and loaded with [`TopologyFile`]; the
//! `ocf-bench` binary does exactly that.
//!
//! # Processor assignment
//!
//! [`CpuRegistry`] hands out one processor per physical core from its free pool. The second
//! hyperthread of an already assigned core is obtained with [`CpuRegistry::sibling_of()`].
//! Processors on the same physical core compare equal.

mod config;
mod cpu;
mod document;
mod error;
pub mod fake;
mod pal;
mod registry;
mod sink;
mod topology;

use std::path::PathBuf;

pub use config::*;
pub use cpu::*;
pub(crate) use document::DocumentBuilder;
pub use document::{
    BdevMethod, CACHE_LINE_SIZE_KIB, CACHE_MODE, CachePairing, Documents, Job, JobFile,
    SpdkConfig,
};
pub use error::*;
pub use registry::*;
pub use sink::*;
pub use topology::*;

/// Input parameters for the [`run()`] function.
///
/// This is the parsed command line that the core logic operates on.
#[doc(hidden)]
#[derive(Debug)]
#[allow(
    clippy::exhaustive_structs,
    reason = "This is a hidden struct for internal/test use only"
)]
pub struct RunInput {
    /// Path to the topology file.
    pub config: PathBuf,
    /// Output directory, overriding the one named in the topology file.
    pub output_dir: Option<PathBuf>,
}

/// Core logic of the tool, extracted for testability.
///
/// Enumerates the processors of the host, then continues as [`run_with_registry()`].
#[doc(hidden)]
pub fn run(input: &RunInput) -> Result<Produced> {
    run_with_registry(input, CpuRegistry::enumerate()?)
}

/// Loads the topology file, assigns its processors from `registry`, writes both documents and
/// prints the run command.
#[doc(hidden)]
pub fn run_with_registry(input: &RunInput, mut registry: CpuRegistry) -> Result<Produced> {
    let file = TopologyFile::load(&input.config)?;
    let topology = file.build(&mut registry)?;

    let output_dir = input
        .output_dir
        .clone()
        .or_else(|| file.output_dir().map(PathBuf::from));

    let sink = OutputSink::new(output_dir).with_run_settings(file.run().clone());

    topology.produce(&registry, &sink)
}
