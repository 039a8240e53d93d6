use std::fs;
use std::io;
use std::thread;

use crate::pal::Platform;

/// The platform the build is targeting.
///
/// Unit tests use mocks and integration tests use fake hardware, so this is only exercised by
/// running the tool on a real machine.
#[derive(Debug, Default)]
pub(crate) struct BuildTargetPlatform;

pub(crate) static BUILD_TARGET_PLATFORM: BuildTargetPlatform = BuildTargetPlatform;

// Thin wrappers over std and sysfs, only meaningful on a real host.
#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg_attr(test, mutants::skip)]
impl Platform for BuildTargetPlatform {
    fn cpu_count(&self) -> io::Result<u32> {
        let count = thread::available_parallelism()?.get();

        u32::try_from(count).map_err(|_overflow| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("processor count {count} does not fit in u32"),
            )
        })
    }

    fn thread_siblings_list(&self, cpu_id: u32) -> io::Result<String> {
        fs::read_to_string(format!(
            "/sys/devices/system/cpu/cpu{cpu_id}/topology/thread_siblings_list"
        ))
    }
}
