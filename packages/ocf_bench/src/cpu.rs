use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt::{self, Display, LowerHex};
use std::hash::{Hash, Hasher};

use itertools::Itertools;

use crate::pal::Platform;
use crate::{Error, Result};

/// Identifies a logical processor, matching the numeric id used by operating system tools.
pub type CpuId = u32;

/// A logical processor handed out by a [`CpuRegistry`][crate::CpuRegistry].
///
/// Two `Cpu` values are equal when they belong to the same physical core, even if they are
/// different hyperthreads of it. A set of `Cpu` therefore naturally holds at most one entry
/// per physical core.
#[derive(Clone, Debug)]
pub struct Cpu {
    id: CpuId,

    // Ascending, always contains `id`.
    siblings: Vec<CpuId>,

    // Lowest id among the siblings. Sibling sets of different cores never overlap, so this
    // identifies the core.
    physical_core_id: CpuId,
}

impl Cpu {
    /// Looks up the hyperthread siblings of processor `id` and creates a handle for it.
    pub(crate) fn query(id: CpuId, platform: &impl Platform) -> Result<Self> {
        let raw = platform.thread_siblings_list(id).map_err(|source| {
            Error::topology_unavailable(format!("sibling list of processor {id}"), source)
        })?;

        // sysfs files end with a newline, which is not part of the list format.
        let siblings = cpulist::parse(raw.trim_end()).map_err(|parse_error| {
            Error::malformed_topology(format!("sibling list of processor {id}: {parse_error}"))
        })?;

        Self::new(id, siblings)
    }

    pub(crate) fn new(id: CpuId, siblings: Vec<CpuId>) -> Result<Self> {
        if !siblings.contains(&id) {
            return Err(Error::malformed_topology(format!(
                "processor {id} is missing from its own sibling list {siblings:?}"
            )));
        }

        let physical_core_id = siblings.iter().copied().min().unwrap_or(id);

        Ok(Self {
            id,
            siblings,
            physical_core_id,
        })
    }

    /// The logical processor id, as used in CPU masks.
    #[must_use]
    pub fn id(&self) -> CpuId {
        self.id
    }

    /// Every logical processor on the same physical core, including this one, in ascending
    /// order.
    #[must_use]
    pub fn siblings(&self) -> &[CpuId] {
        &self.siblings
    }

    /// Identifies the physical core this processor belongs to.
    #[must_use]
    pub fn physical_core_id(&self) -> CpuId {
        self.physical_core_id
    }

    /// The other logical processor on this core, if the core has more than one.
    pub(crate) fn partner_id(&self) -> Option<CpuId> {
        if self.siblings.len() < 2 {
            return None;
        }

        self.siblings.iter().copied().find(|&sibling| sibling != self.id)
    }
}

impl PartialEq for Cpu {
    fn eq(&self, other: &Self) -> bool {
        self.physical_core_id == other.physical_core_id
    }
}

impl Eq for Cpu {}

impl Hash for Cpu {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.physical_core_id.hash(state);
    }
}

impl PartialOrd for Cpu {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cpu {
    fn cmp(&self, other: &Self) -> Ordering {
        self.physical_core_id.cmp(&other.physical_core_id)
    }
}

impl Display for Cpu {
    #[cfg_attr(test, mutants::skip)] // No API contract beyond "writes something".
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu {} [core {}]", self.id, self.physical_core_id)
    }
}

/// A set of logical processors, as consumed by SPDK and bdevperf.
///
/// There are two renderings:
///
/// * [`Display`] produces the bracketed list form used per job and per cache, e.g. `[3]` or
///   `[0,4]`.
/// * [`LowerHex`] produces the bit mask form used on the bdevperf command line. Use `{:#x}` to
///   get the `0x` prefix. The mask has no width limit, so processors beyond 127 work too.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CpuMask {
    ids: BTreeSet<CpuId>,
}

impl CpuMask {
    /// Creates an empty mask.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the mask includes the processor.
    #[must_use]
    pub fn contains(&self, id: CpuId) -> bool {
        self.ids.contains(&id)
    }

    /// Whether no processor is included.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl From<&Cpu> for CpuMask {
    fn from(cpu: &Cpu) -> Self {
        std::iter::once(cpu.id()).collect()
    }
}

impl FromIterator<CpuId> for CpuMask {
    fn from_iter<T: IntoIterator<Item = CpuId>>(iter: T) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

impl Display for CpuMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.ids.iter().join(","))
    }
}

impl LowerHex for CpuMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(&highest) = self.ids.last() else {
            return f.pad_integral(true, "0x", "0");
        };

        // One hex digit covers four processors. We build from the most significant digit.
        let digits = (0..=highest / 4)
            .rev()
            .map(|digit| {
                let nibble = (0..4_u32)
                    .filter(|bit| self.contains(digit.saturating_mul(4).saturating_add(*bit)))
                    .fold(0_u32, |acc, bit| acc | (1 << bit));

                char::from_digit(nibble, 16).unwrap_or('0')
            })
            .collect::<String>();

        f.pad_integral(true, "0x", &digits)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::collections::HashSet;
    use std::hash::DefaultHasher;
    use std::io;

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::pal::MockPlatform;

    assert_impl_all!(Cpu: Send, Sync, Clone);
    assert_impl_all!(CpuMask: Send, Sync, Clone);

    fn hash_of(cpu: &Cpu) -> u64 {
        let mut hasher = DefaultHasher::new();
        cpu.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn siblings_are_equal() {
        let cpu0 = Cpu::new(0, vec![0, 4]).unwrap();
        let cpu4 = Cpu::new(4, vec![0, 4]).unwrap();
        let cpu1 = Cpu::new(1, vec![1, 5]).unwrap();

        assert_eq!(cpu0, cpu4);
        assert_eq!(hash_of(&cpu0), hash_of(&cpu4));
        assert_ne!(cpu0, cpu1);
        assert!(cpu0 < cpu1);

        let set: HashSet<Cpu> = [cpu0, cpu4, cpu1].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn independently_queried_siblings_are_equal() {
        let mut platform = MockPlatform::new();
        platform
            .expect_thread_siblings_list()
            .returning(|_| Ok("2,6\n".to_string()));

        let first = Cpu::query(2, &platform).unwrap();
        let second = Cpu::query(6, &platform).unwrap();

        assert_eq!(first, second);
        assert_eq!(hash_of(&first), hash_of(&second));
        assert_eq!(first.physical_core_id(), 2);
        assert_eq!(second.physical_core_id(), 2);
        assert_eq!(second.siblings(), &[2, 6]);
    }

    #[test]
    fn sysfs_sibling_list_formats() {
        let mut platform = MockPlatform::new();
        platform
            .expect_thread_siblings_list()
            .returning(|id| match id {
                3 => Ok("3\n".to_string()),
                64 => Ok("0,64\n".to_string()),
                _ => Ok("6-7\n".to_string()),
            });

        assert_eq!(Cpu::query(3, &platform).unwrap().siblings(), &[3]);
        assert_eq!(Cpu::query(64, &platform).unwrap().siblings(), &[0, 64]);
        assert_eq!(Cpu::query(64, &platform).unwrap().physical_core_id(), 0);
        assert_eq!(Cpu::query(7, &platform).unwrap().siblings(), &[6, 7]);
    }

    #[test]
    fn partner_is_the_other_sibling() {
        assert_eq!(Cpu::new(0, vec![0, 4]).unwrap().partner_id(), Some(4));
        assert_eq!(Cpu::new(4, vec![0, 4]).unwrap().partner_id(), Some(0));
        assert_eq!(Cpu::new(3, vec![3]).unwrap().partner_id(), None);
    }

    #[test]
    fn query_failure_is_topology_unavailable() {
        let mut platform = MockPlatform::new();
        platform
            .expect_thread_siblings_list()
            .returning(|_| Err(io::Error::new(io::ErrorKind::NotFound, "no such file")));

        let error = Cpu::query(1, &platform).unwrap_err();
        assert!(matches!(error, Error::TopologyUnavailable { source: Some(_), .. }));
    }

    #[test]
    fn garbage_sibling_list_is_topology_unavailable() {
        let mut platform = MockPlatform::new();
        platform
            .expect_thread_siblings_list()
            .returning(|_| Ok("zero,one".to_string()));

        let error = Cpu::query(0, &platform).unwrap_err();
        assert!(matches!(error, Error::TopologyUnavailable { source: None, .. }));
    }

    #[test]
    fn processor_must_be_its_own_sibling() {
        Cpu::new(3, vec![0, 4]).unwrap_err();
        Cpu::new(3, vec![]).unwrap_err();
    }

    #[test]
    fn mask_list_form() {
        assert_eq!(CpuMask::new().to_string(), "[]");
        assert_eq!(CpuMask::from_iter([3]).to_string(), "[3]");
        assert_eq!(CpuMask::from_iter([4, 0]).to_string(), "[0,4]");
    }

    #[test]
    fn mask_hex_form() {
        assert_eq!(format!("{:#x}", CpuMask::new()), "0x0");
        assert_eq!(format!("{:#x}", CpuMask::from_iter([0])), "0x1");
        assert_eq!(format!("{:#x}", CpuMask::from_iter([0, 4])), "0x11");
        assert_eq!(format!("{:#x}", CpuMask::from_iter([3])), "0x8");
        assert_eq!(format!("{:x}", CpuMask::from_iter([7, 8])), "180");
        assert_eq!(
            format!("{:#x}", CpuMask::from_iter([129])),
            "0x200000000000000000000000000000000"
        );
    }
}
