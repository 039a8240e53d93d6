//! Translation of a topology into the SPDK configuration and the bdevperf job file.
//!
//! Both documents refer to each other by name: every job targets the cache bdev created for
//! it, and both names derive only from the workload name and the cache partition. The SPDK
//! document lists its entries in dependency order - every drive is attached and split before
//! any cache is created on top of its partitions.

use std::fmt::{self, Display};

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use tracing::debug;

use crate::{CpuId, CpuMask, Drive, IoPattern, Result, Workload};

/// Caches are always created in write-back mode.
pub const CACHE_MODE: &str = "wb";

/// Cache line size of every cache, in KiB.
pub const CACHE_LINE_SIZE_KIB: u32 = 64;

/// One entry of the SPDK `bdev` subsystem configuration.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
#[non_exhaustive]
pub enum BdevMethod {
    /// Attaches an NVMe controller by PCIe address.
    BdevNvmeAttachController {
        /// Controller name; namespace 1 becomes bdev `{name}n1`.
        name: String,
        /// Transport type, always `PCIe`.
        trtype: &'static str,
        /// Transport address.
        traddr: String,
    },

    /// Splits a bdev into partitions.
    BdevSplitCreate {
        /// The bdev being split.
        base_bdev: String,
        /// Number of partitions.
        split_count: usize,
        /// Partition size in MiB; absent to split evenly.
        #[serde(skip_serializing_if = "Option::is_none")]
        split_size_mb: Option<u64>,
    },

    /// Creates an OCF cache bdev on top of a cache and a core partition.
    BdevOcfCreate {
        /// Name of the resulting cache bdev.
        name: String,
        /// Cache mode.
        mode: &'static str,
        /// Cache line size in KiB.
        cache_line_size: u32,
        /// The partition used as cache.
        cache_bdev_name: String,
        /// The partition used as backing storage.
        core_bdev_name: String,
        /// Processors allowed to serve the cache, in list form.
        cpu_mask: String,
        /// Create the cache if it does not exist yet.
        create: bool,
        /// Overwrite existing cache metadata.
        force: bool,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
struct Subsystem {
    subsystem: &'static str,
    config: Vec<BdevMethod>,
}

/// The SPDK application configuration, declaring drives, partitions and caches.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SpdkConfig {
    subsystems: Vec<Subsystem>,
}

impl SpdkConfig {
    /// Entries of the `bdev` subsystem, in the order SPDK executes them.
    #[must_use]
    pub fn entries(&self) -> &[BdevMethod] {
        self.subsystems
            .first()
            .map_or(&[], |subsystem| subsystem.config.as_slice())
    }

    /// Renders the configuration as JSON indented with four spaces.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialize`][crate::Error::Serialize] if serialization fails, which
    /// does not happen for configurations produced by this crate.
    pub fn to_json(&self) -> Result<String> {
        let mut buffer = Vec::new();
        let formatter = PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);

        self.serialize(&mut serializer)?;

        // serde_json only ever emits UTF-8.
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// A cache bdev binding one cache partition to one core partition.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CachePairing {
    name: String,
    cache: String,
    core: String,
    cpu_id: CpuId,
}

impl CachePairing {
    fn new(cache: &str, core: &str, cpu_id: CpuId) -> Self {
        Self {
            name: format!("{cache}_ocf"),
            cache: cache.to_string(),
            core: core.to_string(),
            cpu_id,
        }
    }

    /// Name of the cache bdev, `{cache partition}_ocf`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The partition used as cache.
    #[must_use]
    pub fn cache(&self) -> &str {
        &self.cache
    }

    /// The partition used as backing storage.
    #[must_use]
    pub fn core(&self) -> &str {
        &self.core
    }

    /// The processor that owns the cache.
    #[must_use]
    pub fn cpu_id(&self) -> CpuId {
        self.cpu_id
    }

    fn to_bdev_method(&self) -> BdevMethod {
        BdevMethod::BdevOcfCreate {
            name: self.name.clone(),
            mode: CACHE_MODE,
            cache_line_size: CACHE_LINE_SIZE_KIB,
            cache_bdev_name: self.cache.clone(),
            core_bdev_name: self.core.clone(),
            cpu_mask: CpuMask::from_iter([self.cpu_id]).to_string(),
            create: true,
            force: true,
        }
    }
}

/// One bdevperf job, driving one cache bdev from one processor.
#[derive(Clone, Debug, PartialEq)]
pub struct Job {
    name: String,
    rw: IoPattern,
    block_size: u32,
    queue_depth: u32,
    zipf_theta: Option<f64>,
    filename: String,
    cpumask: CpuMask,
}

impl Job {
    fn new(workload: &Workload, pairing: &CachePairing) -> Self {
        Self {
            name: format!("{}_{}", workload.name(), pairing.name()),
            rw: workload.rw(),
            block_size: workload.block_size(),
            queue_depth: workload.queue_depth(),
            zipf_theta: workload.zipf_theta(),
            filename: pairing.name().to_string(),
            cpumask: CpuMask::from(workload.cpu()),
        }
    }

    /// Job section name, `{workload}_{cache bdev}`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The cache bdev the job targets.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Processors the job runs on.
    #[must_use]
    pub fn cpumask(&self) -> &CpuMask {
        &self.cpumask
    }
}

impl Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[{}]", self.name)?;
        writeln!(f, "rw={}", self.rw)?;
        writeln!(f, "bs={}", self.block_size)?;
        writeln!(f, "iodepth={}", self.queue_depth)?;

        // Zero skew is uniform access, the same as no skew at all. `Debug` keeps the fraction
        // of whole numbers, so 1.0 stays `1.0`.
        if let Some(theta) = self.zipf_theta.filter(|theta| *theta != 0.0) {
            writeln!(f, "zipf_theta={theta:?}")?;
        }

        writeln!(f, "filename={}", self.filename)?;
        writeln!(f, "cpumask={}", self.cpumask)
    }
}

/// The bdevperf job file: an empty `[global]` section followed by one section per job.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JobFile {
    jobs: Vec<Job>,
}

impl JobFile {
    /// The jobs, in generation order.
    #[must_use]
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Number of jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether there are no jobs at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl Display for JobFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[global]")?;

        for job in &self.jobs {
            writeln!(f)?;
            write!(f, "{job}")?;
        }

        Ok(())
    }
}

/// The two correlated documents generated from a topology.
#[derive(Clone, Debug, PartialEq)]
pub struct Documents {
    spdk: SpdkConfig,
    jobs: JobFile,
    pairings: Vec<CachePairing>,
}

impl Documents {
    /// The SPDK configuration.
    #[must_use]
    pub fn spdk(&self) -> &SpdkConfig {
        &self.spdk
    }

    /// The bdevperf job file.
    #[must_use]
    pub fn jobs(&self) -> &JobFile {
        &self.jobs
    }

    /// The cache bindings derived from the workloads, in the same order as the jobs.
    #[must_use]
    pub fn pairings(&self) -> &[CachePairing] {
        &self.pairings
    }
}

/// First phase: collects the attach and split declarations of every drive.
#[derive(Debug)]
pub(crate) struct DocumentBuilder {
    declarations: Vec<BdevMethod>,
}

impl DocumentBuilder {
    pub(crate) fn new<'a>(drives: impl IntoIterator<Item = &'a Drive>) -> Self {
        let mut declarations = Vec::new();

        for drive in drives {
            declarations.push(BdevMethod::BdevNvmeAttachController {
                name: drive.name().to_string(),
                trtype: "PCIe",
                traddr: drive.address().to_string(),
            });

            declarations.push(BdevMethod::BdevSplitCreate {
                base_bdev: drive.base_bdev(),
                split_count: drive.partition_count(),
                // A zero size splits evenly, same as no size.
                split_size_mb: drive.partition_size_mib().filter(|size| *size != 0),
            });
        }

        Self { declarations }
    }

    /// Second phase: derives one cache pairing and one job per device pair of every workload.
    pub(crate) fn workloads<'a>(
        self,
        workloads: impl IntoIterator<Item = &'a Workload>,
    ) -> DerivedDocuments {
        let mut pairings = Vec::new();
        let mut jobs = Vec::new();

        for workload in workloads {
            for pair in workload.devices() {
                let pairing = CachePairing::new(pair.cache(), pair.core(), workload.cpu().id());
                let job = Job::new(workload, &pairing);

                debug!(
                    cache = pairing.name(),
                    job = job.name(),
                    cpu = pairing.cpu_id(),
                    "derived cache pairing"
                );

                pairings.push(pairing);
                jobs.push(job);
            }
        }

        DerivedDocuments {
            declarations: self.declarations,
            pairings,
            jobs,
        }
    }
}

/// Declarations plus everything derived from the workloads, not yet assembled.
#[derive(Debug)]
pub(crate) struct DerivedDocuments {
    declarations: Vec<BdevMethod>,
    pairings: Vec<CachePairing>,
    jobs: Vec<Job>,
}

impl DerivedDocuments {
    /// Appends the cache creation entries after every declaration and assembles the documents.
    pub(crate) fn finish(self) -> Documents {
        let mut config = self.declarations;
        config.extend(self.pairings.iter().map(CachePairing::to_bdev_method));

        Documents {
            spdk: SpdkConfig {
                subsystems: vec![Subsystem {
                    subsystem: "bdev",
                    config,
                }],
            },
            jobs: JobFile { jobs: self.jobs },
            pairings: self.pairings,
        }
    }
}
