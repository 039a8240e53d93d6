// Topology files: a whole benchmark run described in TOML.
//
// The file is the declarative counterpart of a sequence of `CpuRegistry`/`Topology` calls and
// is replayed in file order: CPUs first, then drives, then workloads.

use std::fs;
use std::num::NonZero;
use std::path::{Path, PathBuf};

use foldhash::{HashMap, HashMapExt};
use serde::Deserialize;
use tracing::debug;

use crate::{
    Cpu, CpuRegistry, DevicePair, Drive, Error, IoPattern, Result, RunSettings, Topology,
    Workload,
};

/// A parsed topology file.
///
/// # Example
///
/// ```
/// use new_zealand::nz;
/// use ocf_bench::TopologyFile;
/// use ocf_bench::fake::HardwareBuilder;
/// use ocf_bench::CpuRegistry;
///
/// let file = TopologyFile::from_toml(
///     r#"
///     name = "app1"
///
///     [[cpu]]
///     name = "cpu0"
///
///     [[drive]]
///     address = "65:00.0"
///     name = "Nvme0"
///     partitions = 2
///
///     [[workload]]
///     name = "w1"
///     rw = "write"
///     bs = 4096
///     iodepth = 128
///     cpu = "cpu0"
///     cache = { drive = "Nvme0", partitions = "0" }
///     core = { drive = "Nvme0", partitions = "1" }
///     "#,
/// )
/// .unwrap();
///
/// let mut registry = CpuRegistry::fake(HardwareBuilder::from_counts(nz!(2), nz!(1))).unwrap();
/// let topology = file.build(&mut registry).unwrap();
///
/// assert_eq!(topology.workloads()[0].devices().len(), 1);
/// ```
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopologyFile {
    name: String,

    output_dir: Option<PathBuf>,

    #[serde(default)]
    run: RunSettings,

    #[serde(default, rename = "cpu")]
    cpus: Vec<CpuEntry>,

    #[serde(default, rename = "drive")]
    drives: Vec<DriveEntry>,

    #[serde(default, rename = "workload")]
    workloads: Vec<WorkloadEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CpuEntry {
    name: String,

    // Absent: acquire from the free pool.
    sibling_of: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DriveEntry {
    address: String,
    name: String,
    partitions: NonZero<u32>,
    partition_size_mib: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WorkloadEntry {
    name: String,
    rw: IoPattern,
    bs: u32,
    iodepth: u32,
    zipf_theta: Option<f64>,
    cpu: String,
    cache: Option<PartitionSelection>,
    core: Option<PartitionSelection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartitionSelection {
    drive: String,

    // Id list of partition indices. Absent: every partition of the drive.
    partitions: Option<String>,
}

impl TopologyFile {
    /// Reads and parses a topology file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigRead`] if the file cannot be read or [`Error::ConfigParse`] if it
    /// does not have the expected shape.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml(&text)
    }

    /// Parses a topology file from a string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigParse`] if the text is not valid TOML or does not have the
    /// expected shape.
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// The app name that prefixes the generated file names.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The output directory named in the file, if any.
    #[must_use]
    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    /// How bdevperf is to be invoked.
    #[must_use]
    pub fn run(&self) -> &RunSettings {
        &self.run
    }

    /// Replays the file against `registry`, assigning the CPUs it declares, and returns the
    /// resulting topology.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file references an unknown or duplicate name, selects
    /// a partition index the drive does not have or asks for the sibling of a processor
    /// without one. Registry errors such as [`Error::NoCpuAvailable`] are passed through.
    pub fn build(&self, registry: &mut CpuRegistry) -> Result<Topology> {
        let cpus = self.assign_cpus(registry)?;

        let mut topology = Topology::new(&self.name);
        let mut drives = HashMap::with_capacity(self.drives.len());

        for entry in &self.drives {
            if drives.contains_key(entry.name.as_str()) {
                return Err(Error::Config(format!("drive '{}' is declared twice", entry.name)));
            }

            let drive = topology.make_drive(
                &entry.address,
                &entry.name,
                entry.partitions,
                entry.partition_size_mib,
            );

            drives.insert(entry.name.as_str(), drive);
        }

        for entry in &self.workloads {
            if topology.workloads().iter().any(|w| w.name() == entry.name) {
                return Err(Error::Config(format!(
                    "workload '{}' is declared twice",
                    entry.name
                )));
            }

            let cpu = cpus.get(entry.cpu.as_str()).ok_or_else(|| {
                Error::Config(format!(
                    "workload '{}' uses undeclared CPU '{}'",
                    entry.name, entry.cpu
                ))
            })?;

            let devices = match (&entry.cache, &entry.core) {
                (Some(cache), Some(core)) => DevicePair::zip(
                    select_partitions(cache, &drives, &entry.name)?,
                    select_partitions(core, &drives, &entry.name)?,
                ),
                (None, None) => Vec::new(),
                _ => {
                    return Err(Error::Config(format!(
                        "workload '{}' must name both cache and core partitions or neither",
                        entry.name
                    )));
                }
            };

            let mut builder = Workload::builder(&entry.name)
                .rw(entry.rw)
                .block_size(entry.bs)
                .queue_depth(entry.iodepth)
                .cpu(cpu.clone())
                .devices(devices);

            if let Some(theta) = entry.zipf_theta {
                builder = builder.zipf_theta(theta);
            }

            topology.add_workload(builder.build()?);
        }

        Ok(topology)
    }

    fn assign_cpus(&self, registry: &mut CpuRegistry) -> Result<HashMap<&str, Cpu>> {
        let mut cpus: HashMap<&str, Cpu> = HashMap::with_capacity(self.cpus.len());

        for entry in &self.cpus {
            if cpus.contains_key(entry.name.as_str()) {
                return Err(Error::Config(format!("CPU '{}' is declared twice", entry.name)));
            }

            let cpu = match &entry.sibling_of {
                None => registry.acquire_cpu()?,
                Some(of) => {
                    let of_cpu = cpus.get(of.as_str()).ok_or_else(|| {
                        Error::Config(format!(
                            "CPU '{}' is the sibling of '{of}', which is not declared before it",
                            entry.name
                        ))
                    })?;

                    registry.sibling_of(of_cpu)?.ok_or_else(|| {
                        Error::Config(format!(
                            "CPU '{of}' has no hyperthread sibling to serve as '{}'",
                            entry.name
                        ))
                    })?
                }
            };

            debug!(name = %entry.name, %cpu, "assigned named CPU");
            cpus.insert(entry.name.as_str(), cpu);
        }

        Ok(cpus)
    }
}

fn select_partitions<'a>(
    selection: &PartitionSelection,
    drives: &'a HashMap<&str, Drive>,
    workload: &str,
) -> Result<Vec<&'a str>> {
    let drive = drives.get(selection.drive.as_str()).ok_or_else(|| {
        Error::Config(format!(
            "workload '{workload}' uses undeclared drive '{}'",
            selection.drive
        ))
    })?;

    let Some(list) = &selection.partitions else {
        return Ok(drive.partitions().iter().map(String::as_str).collect());
    };

    cpulist::parse(list)?
        .into_iter()
        .map(|index| {
            usize::try_from(index)
                .ok()
                .and_then(|index| drive.partition(index))
                .ok_or_else(|| {
                    Error::Config(format!(
                        "workload '{workload}' selects partition {index} of drive '{}', which has only {}",
                        drive.name(),
                        drive.partition_count()
                    ))
                })
        })
        .collect()
}
