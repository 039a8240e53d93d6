//! Fake hardware for deterministic runs and tests.
//!
//! A [`CpuRegistry`][crate::CpuRegistry] built from fake hardware never touches the host, so the
//! generated documents depend only on the layout described here.
//!
//! # Example
//!
//! ```
//! use new_zealand::nz;
//! use ocf_bench::CpuRegistry;
//! use ocf_bench::fake::HardwareBuilder;
//!
//! // Four physical cores with two hyperthreads each, numbered the way Linux usually does it:
//! // core 0 owns processors 0 and 4, core 1 owns 1 and 5 and so on.
//! let mut registry = CpuRegistry::fake(HardwareBuilder::from_counts(nz!(4), nz!(2))).unwrap();
//!
//! let cpu = registry.acquire_cpu().unwrap();
//! let sibling = registry.sibling_of(&cpu).unwrap().unwrap();
//!
//! assert_eq!(cpu.id(), 0);
//! assert_eq!(sibling.id(), 4);
//! ```

use std::collections::BTreeMap;
use std::io;
use std::num::NonZero;

use itertools::Itertools;

use crate::pal::Platform;

/// Describes the processor layout of fake hardware, one physical core at a time.
#[derive(Clone, Debug, Default)]
pub struct HardwareBuilder {
    cores: Vec<Vec<u32>>,
}

impl HardwareBuilder {
    /// Creates a builder without any processors.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a layout of `cores` physical cores with `threads_per_core` logical processors
    /// each.
    ///
    /// Processor `n` of core `c` gets the id `c + n * cores`, matching the usual Linux
    /// enumeration order where the first hyperthread of every core comes before any second one.
    #[must_use]
    pub fn from_counts(cores: NonZero<u32>, threads_per_core: NonZero<u32>) -> Self {
        let cores_count = cores.get();

        (0..cores_count).fold(Self::new(), |builder, core| {
            builder.core(
                (0..threads_per_core.get())
                    .map(|thread| core.saturating_add(thread.saturating_mul(cores_count))),
            )
        })
    }

    /// Adds one physical core whose logical processors have the given ids.
    ///
    /// Processor ids must be unique across the whole layout and, like on a real host, the
    /// registry expects them to cover `0..N` without gaps.
    #[must_use]
    pub fn core(mut self, processor_ids: impl IntoIterator<Item = u32>) -> Self {
        self.cores
            .push(processor_ids.into_iter().sorted().dedup().collect());
        self
    }

    pub(crate) fn build(self) -> FakePlatform {
        let mut siblings = BTreeMap::new();

        for core in &self.cores {
            let list = core.iter().join(",");

            for &id in core {
                siblings.insert(id, list.clone());
            }
        }

        FakePlatform { siblings }
    }
}

/// Fake platform answering the PAL queries from a [`HardwareBuilder`] layout.
#[derive(Debug)]
pub(crate) struct FakePlatform {
    // Processor id to its rendered sibling list.
    siblings: BTreeMap<u32, String>,
}

impl Platform for FakePlatform {
    fn cpu_count(&self) -> io::Result<u32> {
        u32::try_from(self.siblings.len())
            .map_err(|_overflow| io::Error::new(io::ErrorKind::InvalidData, "too many processors"))
    }

    fn thread_siblings_list(&self, cpu_id: u32) -> io::Result<String> {
        self.siblings
            .get(&cpu_id)
            .map(|list| format!("{list}\n"))
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("fake hardware has no processor {cpu_id}"),
                )
            })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;

    use super::*;

    #[test]
    fn from_counts_interleaves_threads() {
        let platform = HardwareBuilder::from_counts(nz!(4), nz!(2)).build();

        assert_eq!(platform.cpu_count().unwrap(), 8);
        assert_eq!(platform.thread_siblings_list(0).unwrap(), "0,4\n");
        assert_eq!(platform.thread_siblings_list(5).unwrap(), "1,5\n");
        assert_eq!(platform.thread_siblings_list(3).unwrap(), "3,7\n");
    }

    #[test]
    fn single_thread_cores() {
        let platform = HardwareBuilder::from_counts(nz!(2), nz!(1)).build();

        assert_eq!(platform.cpu_count().unwrap(), 2);
        assert_eq!(platform.thread_siblings_list(1).unwrap(), "1\n");
    }

    #[test]
    fn explicit_cores() {
        let platform = HardwareBuilder::new().core([1, 0]).core([2]).build();

        assert_eq!(platform.cpu_count().unwrap(), 3);
        assert_eq!(platform.thread_siblings_list(1).unwrap(), "0,1\n");
        assert_eq!(platform.thread_siblings_list(2).unwrap(), "2\n");
    }

    #[test]
    fn unknown_processor_is_not_found() {
        let platform = HardwareBuilder::new().core([0]).build();

        let error = platform.thread_siblings_list(9).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::NotFound);
    }
}
