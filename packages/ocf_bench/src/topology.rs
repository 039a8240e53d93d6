use std::num::NonZero;
use std::str::FromStr;

use derive_more::Display;
use foldhash::{HashSet, HashSetExt};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{Cpu, CpuRegistry, DocumentBuilder, Documents, Error, OutputSink, Produced, Result};

/// An NVMe drive attached by PCIe address and split into equally sized partitions.
///
/// Partition `i` of a drive named `Nvme0` is called `Nvme0n1p{i}`, the name SPDK gives the
/// split bdevs of namespace 1.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Drive {
    address: String,
    name: String,
    partition_size_mib: Option<u64>,
    partitions: Vec<String>,
}

impl Drive {
    fn new(
        address: String,
        name: String,
        partition_count: NonZero<u32>,
        partition_size_mib: Option<u64>,
    ) -> Self {
        let partitions = (0..partition_count.get())
            .map(|index| format!("{name}n1p{index}"))
            .collect();

        Self {
            address,
            name,
            partition_size_mib,
            partitions,
        }
    }

    /// The PCIe address, e.g. `65:00.0`.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The controller name SPDK attaches the drive under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The namespace bdev that gets split into partitions.
    #[must_use]
    pub fn base_bdev(&self) -> String {
        format!("{}n1", self.name)
    }

    /// Size of each partition in MiB, or `None` to let SPDK split the namespace evenly. A size
    /// of zero also splits evenly.
    #[must_use]
    pub fn partition_size_mib(&self) -> Option<u64> {
        self.partition_size_mib
    }

    /// Names of all partitions, in index order.
    #[must_use]
    pub fn partitions(&self) -> &[String] {
        &self.partitions
    }

    /// Number of partitions the drive is split into.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Name of one partition, or `None` if the drive has fewer partitions.
    #[must_use]
    pub fn partition(&self, index: usize) -> Option<&str> {
        self.partitions.get(index).map(String::as_str)
    }
}

/// One cache partition bound to one core partition.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct DevicePair {
    cache: String,
    core: String,
}

impl DevicePair {
    /// Pairs a cache partition with the core partition it caches.
    #[must_use]
    pub fn new(cache: impl Into<String>, core: impl Into<String>) -> Self {
        Self {
            cache: cache.into(),
            core: core.into(),
        }
    }

    /// Pairs two partition lists element by element. The longer list is truncated.
    ///
    /// # Example
    ///
    /// ```
    /// use ocf_bench::DevicePair;
    ///
    /// let pairs = DevicePair::zip(["Nvme1n1p0", "Nvme1n1p1"], ["Nvme0n1p0", "Nvme0n1p1"]);
    ///
    /// assert_eq!(pairs.len(), 2);
    /// assert_eq!(pairs[1].cache(), "Nvme1n1p1");
    /// assert_eq!(pairs[1].core(), "Nvme0n1p1");
    /// ```
    pub fn zip<C, K>(
        cache: impl IntoIterator<Item = C>,
        core: impl IntoIterator<Item = K>,
    ) -> Vec<Self>
    where
        C: Into<String>,
        K: Into<String>,
    {
        cache
            .into_iter()
            .zip(core)
            .map(|(cache, core)| Self::new(cache, core))
            .collect()
    }

    /// The partition acting as cache.
    #[must_use]
    pub fn cache(&self) -> &str {
        &self.cache
    }

    /// The partition acting as backing storage.
    #[must_use]
    pub fn core(&self) -> &str {
        &self.core
    }
}

/// The I/O pattern of a bdevperf job.
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq)]
#[serde(try_from = "String")]
#[non_exhaustive]
pub enum IoPattern {
    /// Sequential reads.
    #[display("read")]
    Read,

    /// Sequential writes.
    #[display("write")]
    Write,

    /// Random reads.
    #[display("randread")]
    RandRead,

    /// Random writes.
    #[display("randwrite")]
    RandWrite,

    /// Sequential mixed reads and writes.
    #[display("rw")]
    ReadWrite,

    /// Random mixed reads and writes.
    #[display("randrw")]
    RandReadWrite,

    /// Writes followed by read-back verification.
    #[display("verify")]
    Verify,

    /// Bdev resets.
    #[display("reset")]
    Reset,

    /// Unmap (trim) operations.
    #[display("unmap")]
    Unmap,

    /// Flush operations.
    #[display("flush")]
    Flush,

    /// Write-zeroes operations.
    #[display("write_zeroes")]
    WriteZeroes,
}

impl IoPattern {
    const ALL: [Self; 11] = [
        Self::Read,
        Self::Write,
        Self::RandRead,
        Self::RandWrite,
        Self::ReadWrite,
        Self::RandReadWrite,
        Self::Verify,
        Self::Reset,
        Self::Unmap,
        Self::Flush,
        Self::WriteZeroes,
    ];
}

impl FromStr for IoPattern {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|pattern| pattern.to_string() == s)
            .ok_or_else(|| format!("unknown I/O pattern '{s}'"))
    }
}

impl TryFrom<String> for IoPattern {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

/// A named benchmark intent: one I/O pattern driven by one processor against a list of
/// cache/core pairs.
///
/// Create with [`Workload::builder()`].
#[derive(Clone, Debug)]
pub struct Workload {
    name: String,
    rw: IoPattern,
    block_size: u32,
    queue_depth: u32,
    zipf_theta: Option<f64>,
    cpu: Cpu,
    devices: Vec<DevicePair>,
}

impl Workload {
    /// Starts describing a workload with the given name.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> WorkloadBuilder {
        WorkloadBuilder::new(name.into())
    }

    /// The workload name, used as prefix of every job it produces.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The I/O pattern.
    #[must_use]
    pub fn rw(&self) -> IoPattern {
        self.rw
    }

    /// I/O size in bytes.
    #[must_use]
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Number of I/Os kept in flight per job.
    #[must_use]
    pub fn queue_depth(&self) -> u32 {
        self.queue_depth
    }

    /// Skew of the Zipfian access distribution, or `None` for uniform access.
    #[must_use]
    pub fn zipf_theta(&self) -> Option<f64> {
        self.zipf_theta
    }

    /// The processor that drives every job of this workload.
    #[must_use]
    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    /// The cache/core pairs, in the order their jobs are generated.
    #[must_use]
    pub fn devices(&self) -> &[DevicePair] {
        &self.devices
    }
}

/// Builds a [`Workload`]. The I/O pattern, block size, queue depth and processor are
/// mandatory; the device list may stay empty, in which case the workload produces no jobs.
#[derive(Debug)]
#[must_use]
pub struct WorkloadBuilder {
    name: String,
    rw: Option<IoPattern>,
    block_size: Option<u32>,
    queue_depth: Option<u32>,
    zipf_theta: Option<f64>,
    cpu: Option<Cpu>,
    devices: Vec<DevicePair>,
}

impl WorkloadBuilder {
    fn new(name: String) -> Self {
        Self {
            name,
            rw: None,
            block_size: None,
            queue_depth: None,
            zipf_theta: None,
            cpu: None,
            devices: Vec::new(),
        }
    }

    /// Sets the I/O pattern.
    pub fn rw(mut self, rw: IoPattern) -> Self {
        self.rw = Some(rw);
        self
    }

    /// Sets the I/O size in bytes.
    pub fn block_size(mut self, bytes: u32) -> Self {
        self.block_size = Some(bytes);
        self
    }

    /// Sets the number of I/Os kept in flight per job.
    pub fn queue_depth(mut self, depth: u32) -> Self {
        self.queue_depth = Some(depth);
        self
    }

    /// Switches from uniform to Zipfian access with the given skew. A skew of zero keeps access
    /// uniform and is left out of the job file.
    pub fn zipf_theta(mut self, theta: f64) -> Self {
        self.zipf_theta = Some(theta);
        self
    }

    /// Sets the processor that drives the workload.
    pub fn cpu(mut self, cpu: Cpu) -> Self {
        self.cpu = Some(cpu);
        self
    }

    /// Appends cache/core pairs to the device list.
    pub fn devices(mut self, pairs: impl IntoIterator<Item = DevicePair>) -> Self {
        self.devices.extend(pairs);
        self
    }

    /// Finishes the workload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IncompleteWorkload`] if a mandatory field was never set.
    pub fn build(self) -> Result<Workload> {
        let missing = |what: &'static str| Error::IncompleteWorkload {
            workload: self.name.clone(),
            missing: what,
        };

        let rw = self.rw.ok_or_else(|| missing("an I/O pattern"))?;
        let block_size = self.block_size.ok_or_else(|| missing("a block size"))?;
        let queue_depth = self.queue_depth.ok_or_else(|| missing("a queue depth"))?;
        let cpu = self.cpu.ok_or_else(|| missing("a CPU"))?;

        Ok(Workload {
            name: self.name,
            rw,
            block_size,
            queue_depth,
            zipf_theta: self.zipf_theta,
            cpu,
            devices: self.devices,
        })
    }
}

/// Everything one benchmark run consists of: the drives and how they are split, plus the
/// workloads that bind partitions into caches and drive them.
///
/// The topology is append-only. It is fully determined by the sequence of
/// [`make_drive()`][1] and [`add_workload()`][2] calls made on it.
///
/// # Example
///
/// ```
/// use new_zealand::nz;
/// use ocf_bench::fake::HardwareBuilder;
/// use ocf_bench::{CpuRegistry, DevicePair, IoPattern, Topology, Workload};
///
/// let mut registry = CpuRegistry::fake(HardwareBuilder::from_counts(nz!(4), nz!(2))).unwrap();
/// let mut topology = Topology::new("app1");
///
/// let cache = topology.make_drive("66:00.0", "Nvme1", nz!(8), Some(102_400));
/// let core = topology.make_drive("68:00.0", "Nvme0", nz!(8), None);
///
/// topology.add_workload(
///     Workload::builder("wla")
///         .rw(IoPattern::Write)
///         .block_size(4096)
///         .queue_depth(128)
///         .cpu(registry.acquire_cpu().unwrap())
///         .devices(DevicePair::zip(cache.partitions(), core.partitions()))
///         .build()
///         .unwrap(),
/// );
///
/// let documents = topology.build_documents();
/// assert_eq!(documents.jobs().len(), 8);
/// ```
///
/// [1]: Self::make_drive
/// [2]: Self::add_workload
#[derive(Debug)]
pub struct Topology {
    name: String,
    drives: Vec<Drive>,
    workloads: Vec<Workload>,
}

impl Topology {
    /// Creates an empty topology. The name prefixes the generated file names.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            drives: Vec::new(),
            workloads: Vec::new(),
        }
    }

    /// The app name that prefixes the generated file names.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declares a drive and returns a copy of it, for pairing its partitions.
    ///
    /// Addresses are not checked for uniqueness or existence.
    pub fn make_drive(
        &mut self,
        address: impl Into<String>,
        name: impl Into<String>,
        partition_count: NonZero<u32>,
        partition_size_mib: Option<u64>,
    ) -> Drive {
        let drive = Drive::new(
            address.into(),
            name.into(),
            partition_count,
            partition_size_mib,
        );

        self.drives.push(drive.clone());
        drive
    }

    /// Adds a workload.
    pub fn add_workload(&mut self, workload: Workload) -> &Workload {
        self.workloads.push(workload);
        self.workloads
            .last()
            .expect("we just pushed a workload so there must be a last one")
    }

    /// Declared drives, in declaration order.
    #[must_use]
    pub fn drives(&self) -> &[Drive] {
        &self.drives
    }

    /// Added workloads, in the order they were added.
    #[must_use]
    pub fn workloads(&self) -> &[Workload] {
        &self.workloads
    }

    /// Partitions named by workload device pairs that no declared drive provides.
    ///
    /// Such references are not an error: the documents are still generated but SPDK will fail
    /// to create the affected caches.
    #[must_use]
    pub fn unresolved_partitions(&self) -> Vec<&str> {
        let mut known = HashSet::new();

        for drive in &self.drives {
            known.extend(drive.partitions().iter().map(String::as_str));
        }

        self.workloads
            .iter()
            .flat_map(Workload::devices)
            .flat_map(|pair| [pair.cache(), pair.core()])
            .filter(|partition| !known.contains(partition))
            .collect()
    }

    /// Translates the topology into the SPDK and bdevperf documents without writing anything.
    #[must_use]
    pub fn build_documents(&self) -> Documents {
        DocumentBuilder::new(self.drives.iter())
            .workloads(self.workloads.iter())
            .finish()
    }

    /// Generates both documents, writes them through `sink` and prints the bdevperf command
    /// that runs them on every processor `registry` has assigned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutputPathUnset`] if the sink has no directory, in which case nothing
    /// is written, or any error the sink reports while writing.
    pub fn produce(&self, registry: &CpuRegistry, sink: &OutputSink) -> Result<Produced> {
        for partition in self.unresolved_partitions() {
            warn!(
                partition,
                "workload references a partition of no declared drive"
            );
        }

        let documents = self.build_documents();
        let cpu_mask = registry.assigned_mask();

        debug!(
            drives = self.drives.len(),
            workloads = self.workloads.len(),
            jobs = documents.jobs().len(),
            physical_cores = registry.assigned_core_count(),
            %cpu_mask,
            "generated benchmark documents"
        );

        let produced = sink.write(&self.name, &documents, &cpu_mask)?;

        println!("{}", produced.run_command());

        Ok(produced)
    }
}
