use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while describing a benchmark topology or producing its documents.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The CPU count or the hyperthread sibling data of the host could not be read or made
    /// no sense. There is no way to continue without it.
    #[error("CPU topology unavailable: {what}")]
    TopologyUnavailable {
        /// What exactly we failed to obtain.
        what: String,

        /// The underlying I/O error, if the failure came from the operating system.
        #[source]
        source: Option<io::Error>,
    },

    /// Every physical core known to the registry has already been handed out.
    #[error("no free CPU left to assign")]
    NoCpuAvailable,

    /// Documents were about to be written but no output directory was configured.
    #[error("output directory not set - cannot write benchmark configuration")]
    OutputPathUnset,

    /// One of the generated documents could not be written to its destination.
    #[error("failed to write '{}': {source}", path.display())]
    Write {
        /// The destination that could not be written.
        path: PathBuf,

        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The SPDK configuration document could not be rendered as JSON.
    #[error("failed to render SPDK configuration: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A partition selection in the Linux list format (`0-3,8,10-14:2`) did not match the
    /// expected syntax.
    #[error("invalid id list: {0}")]
    InvalidIdList(#[from] cpulist::Error),

    /// A workload was built without one of the fields every job needs.
    #[error("workload '{workload}' is missing {missing}")]
    IncompleteWorkload {
        /// Name of the workload being built.
        workload: String,

        /// The field that was never provided.
        missing: &'static str,
    },

    /// The topology file could not be read.
    #[error("failed to read topology file '{}': {source}", path.display())]
    ConfigRead {
        /// The file that could not be read.
        path: PathBuf,

        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The topology file is well-formed TOML but describes something we cannot build.
    #[error("invalid topology file: {0}")]
    Config(String),

    /// The topology file is not valid TOML or does not match the expected shape.
    #[error("failed to parse topology file: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl Error {
    pub(crate) fn topology_unavailable(what: impl Into<String>, source: io::Error) -> Self {
        Self::TopologyUnavailable {
            what: what.into(),
            source: Some(source),
        }
    }

    pub(crate) fn malformed_topology(what: impl Into<String>) -> Self {
        Self::TopologyUnavailable {
            what: what.into(),
            source: None,
        }
    }
}

/// A specialized `Result` type for this crate, returning the crate's [`Error`] type as the
/// error value.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn messages_name_the_problem() {
        let error = Error::topology_unavailable(
            "sibling list of cpu 7",
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert!(error.to_string().contains("cpu 7"));
        assert!(std::error::Error::source(&error).is_some());

        let error = Error::malformed_topology("empty sibling list");
        assert!(std::error::Error::source(&error).is_none());

        let error = Error::IncompleteWorkload {
            workload: "wla".to_string(),
            missing: "a CPU",
        };
        assert_eq!(error.to_string(), "workload 'wla' is missing a CPU");

        let error = Error::Write {
            path: PathBuf::from("/nowhere/app_spdk_config.json"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(error.to_string().contains("/nowhere/app_spdk_config.json"));
    }
}
