use std::fmt::Debug;
use std::io;

/// The host queries the CPU registry is built from.
///
/// Both queries are synchronous and expected to be fast: on Linux they are answered by the
/// kernel's virtual filesystem, never by a real storage device. Failures are not retried.
#[cfg_attr(test, mockall::automock)]
pub(crate) trait Platform: Debug + Send + Sync + 'static {
    /// The number of logical processors available to the current process, equivalent to what
    /// the `nproc` utility reports.
    ///
    /// Processors are assumed to be numbered `0..count`.
    fn cpu_count(&self) -> io::Result<u32>;

    /// Contents of `/sys/devices/system/cpu/cpu{cpu_id}/topology/thread_siblings_list`.
    ///
    /// This is a list-format file (`"0,64"` or `"0-1"` style) naming every logical processor
    /// that shares a physical core with `cpu_id`, including `cpu_id` itself.
    fn thread_siblings_list(&self, cpu_id: u32) -> io::Result<String>;
}
