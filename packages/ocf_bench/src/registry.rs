use std::collections::BTreeMap;

use foldhash::{HashSet, HashSetExt};
use tracing::{debug, warn};

use crate::fake::HardwareBuilder;
use crate::pal::{Platform, PlatformFacade};
use crate::{Cpu, CpuId, CpuMask, Error, Result};

/// Hands out the processors that drive benchmark workloads and remembers which ones were
/// handed out.
///
/// The host is enumerated once, when the registry is created. Every physical core enters the
/// free pool exactly once, represented by the first of its logical processors we come across.
/// Processors move from the free pool to the assigned list and never return.
///
/// The registry is a plain value owned by whoever builds the topology. Separate registries are
/// fully independent.
///
/// # Example
///
/// ```
/// use new_zealand::nz;
/// use ocf_bench::CpuRegistry;
/// use ocf_bench::fake::HardwareBuilder;
///
/// let mut registry = CpuRegistry::fake(HardwareBuilder::from_counts(nz!(2), nz!(1))).unwrap();
///
/// let first = registry.acquire_cpu().unwrap();
/// let second = registry.acquire_cpu().unwrap();
/// assert_ne!(first, second);
///
/// // Both cores are taken now.
/// assert!(registry.acquire_cpu().is_err());
///
/// assert_eq!(format!("{:#x}", registry.assigned_mask()), "0x3");
/// ```
#[derive(Debug)]
pub struct CpuRegistry {
    platform: PlatformFacade,

    // Keyed by physical core id. Popping the first entry makes the choice deterministic.
    free: BTreeMap<CpuId, Cpu>,

    // In assignment order. May hold the same logical processor twice if a caller asks for
    // the sibling of one core more than once.
    assigned: Vec<Cpu>,
}

impl CpuRegistry {
    /// Enumerates the processors of the current host.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TopologyUnavailable`] if the processor count or any sibling list cannot
    /// be read.
    pub fn enumerate() -> Result<Self> {
        Self::with_platform(PlatformFacade::target())
    }

    /// Enumerates the processors of fake hardware instead of the host.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TopologyUnavailable`] if the layout does not number its processors
    /// `0..N` without gaps.
    pub fn fake(hardware: HardwareBuilder) -> Result<Self> {
        Self::with_platform(PlatformFacade::from_fake(hardware.build()))
    }

    pub(crate) fn with_platform(platform: PlatformFacade) -> Result<Self> {
        let count = platform
            .cpu_count()
            .map_err(|source| Error::topology_unavailable("processor count", source))?;

        let mut free = BTreeMap::new();

        for id in 0..count {
            let cpu = Cpu::query(id, &platform)?;

            // The first processor seen for a core represents it; later siblings are duplicates.
            free.entry(cpu.physical_core_id()).or_insert(cpu);
        }

        debug!(
            processors = count,
            physical_cores = free.len(),
            "enumerated CPU topology"
        );

        Ok(Self {
            platform,
            free,
            assigned: Vec::new(),
        })
    }

    /// Takes a processor out of the free pool and marks it assigned.
    ///
    /// Each physical core is handed out at most once by this method.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoCpuAvailable`] if the free pool is empty. The registry stays usable.
    pub fn acquire_cpu(&mut self) -> Result<Cpu> {
        let (_, cpu) = self.free.pop_first().ok_or(Error::NoCpuAvailable)?;

        debug!(%cpu, "acquired CPU");

        self.assigned.push(cpu.clone());
        Ok(cpu)
    }

    /// Returns the hyperthread partner of `cpu` and marks it assigned, or `None` if the core
    /// of `cpu` has only one logical processor.
    ///
    /// The partner's sibling list is looked up afresh. This does not look at the free pool:
    /// the core of `cpu` is expected to have left it already, through [`acquire_cpu()`][1].
    /// Nothing stops a caller from asking for the same partner twice; that assigns the same
    /// logical processor to two owners and is reported as a warning.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TopologyUnavailable`] if the partner's sibling list cannot be read.
    ///
    /// [1]: Self::acquire_cpu
    pub fn sibling_of(&mut self, cpu: &Cpu) -> Result<Option<Cpu>> {
        let Some(partner_id) = cpu.partner_id() else {
            return Ok(None);
        };

        let partner = Cpu::query(partner_id, &self.platform)?;

        if self.assigned.iter().any(|c| c.id() == partner.id()) {
            warn!(
                %partner,
                "hyperthread sibling is already assigned; it will be shared by multiple owners"
            );
        } else {
            debug!(%partner, of = %cpu, "assigned hyperthread sibling");
        }

        self.assigned.push(partner.clone());
        Ok(Some(partner))
    }

    /// Every processor assigned so far, in assignment order.
    pub fn assigned(&self) -> impl Iterator<Item = &Cpu> {
        self.assigned.iter()
    }

    /// Number of physical cores still in the free pool.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Bitwise union of every processor assigned so far, whether acquired from the free pool
    /// or obtained as a sibling.
    #[must_use]
    pub fn assigned_mask(&self) -> CpuMask {
        self.assigned.iter().map(Cpu::id).collect()
    }

    /// Number of distinct physical cores that have at least one assigned processor.
    #[must_use]
    pub fn assigned_core_count(&self) -> usize {
        let mut cores = HashSet::new();

        for cpu in &self.assigned {
            cores.insert(cpu);
        }

        cores.len()
    }
}
