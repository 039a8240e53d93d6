use std::fmt::Debug;
use std::io;
use std::sync::Arc;

use crate::fake::FakePlatform;
#[cfg(test)]
use crate::pal::MockPlatform;
use crate::pal::{BUILD_TARGET_PLATFORM, BuildTargetPlatform, Platform};

/// Enum to hide the different platform implementations behind a single wrapper type.
#[derive(Clone)]
pub(crate) enum PlatformFacade {
    Target(&'static BuildTargetPlatform),

    Fake(Arc<FakePlatform>),

    #[cfg(test)]
    Mock(Arc<MockPlatform>),
}

// Trivial constructors.
#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg_attr(test, mutants::skip)]
impl PlatformFacade {
    pub(crate) const fn target() -> Self {
        Self::Target(&BUILD_TARGET_PLATFORM)
    }

    pub(crate) fn from_fake(fake: FakePlatform) -> Self {
        Self::Fake(Arc::new(fake))
    }

    #[cfg(test)]
    pub(crate) fn from_mock(mock: MockPlatform) -> Self {
        Self::Mock(Arc::new(mock))
    }
}

// Pure dispatch to the wrapped platform.
#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg_attr(test, mutants::skip)]
impl Platform for PlatformFacade {
    fn cpu_count(&self) -> io::Result<u32> {
        match self {
            Self::Target(p) => p.cpu_count(),
            Self::Fake(p) => p.cpu_count(),
            #[cfg(test)]
            Self::Mock(p) => p.cpu_count(),
        }
    }

    fn thread_siblings_list(&self, cpu_id: u32) -> io::Result<String> {
        match self {
            Self::Target(p) => p.thread_siblings_list(cpu_id),
            Self::Fake(p) => p.thread_siblings_list(cpu_id),
            #[cfg(test)]
            Self::Mock(p) => p.thread_siblings_list(cpu_id),
        }
    }
}

// Debug output is not part of any contract.
#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg_attr(test, mutants::skip)]
impl Debug for PlatformFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Target(inner) => inner.fmt(f),
            Self::Fake(inner) => inner.fmt(f),
            #[cfg(test)]
            Self::Mock(inner) => inner.fmt(f),
        }
    }
}
