use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::{CpuMask, Documents, Error, Result};

/// How bdevperf is invoked in the printed run command.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
#[non_exhaustive]
pub struct RunSettings {
    /// Path of the bdevperf binary, relative to the SPDK checkout the documents are written to.
    pub bdevperf: String,

    /// Path of the SPDK RPC socket.
    pub rpc_socket: String,

    /// Benchmark duration in seconds.
    pub duration_secs: u64,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            bdevperf: "./test/bdev/bdevperf/bdevperf".to_string(),
            rpc_socket: "/var/tmp/spdk.sock".to_string(),
            duration_secs: 300,
        }
    }
}

/// Writes generated documents to an output directory.
///
/// The directory is only required when writing: a sink without one can be created and passed
/// around freely, but [`write()`][Self::write] fails with [`Error::OutputPathUnset`].
#[derive(Clone, Debug, Default)]
pub struct OutputSink {
    output_dir: Option<PathBuf>,
    run: RunSettings,
}

impl OutputSink {
    /// Creates a sink writing into `output_dir`, typically the root of an SPDK checkout.
    #[must_use]
    pub fn new(output_dir: Option<PathBuf>) -> Self {
        Self {
            output_dir,
            run: RunSettings::default(),
        }
    }

    /// Replaces the settings used to compose the run command.
    #[must_use]
    pub fn with_run_settings(mut self, run: RunSettings) -> Self {
        self.run = run;
        self
    }

    /// The directory documents are written to, if configured.
    #[must_use]
    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    /// Writes both documents of app `app_name`, overwriting existing files, and composes the
    /// bdevperf command line running them on the processors in `cpu_mask`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutputPathUnset`] before touching the filesystem if no directory is
    /// configured, or [`Error::Write`] if a document cannot be written.
    pub fn write(
        &self,
        app_name: &str,
        documents: &Documents,
        cpu_mask: &CpuMask,
    ) -> Result<Produced> {
        let output_dir = self.output_dir.as_deref().ok_or(Error::OutputPathUnset)?;

        let spdk_config_name = spdk_config_file_name(app_name);
        let job_config_name = job_config_file_name(app_name);

        // Render both before writing either, so a rendering failure leaves no partial output.
        let spdk_config = documents.spdk().to_json()?;
        let job_config = documents.jobs().to_string();

        let spdk_config_path = output_dir.join(&spdk_config_name);
        write_document(&spdk_config_path, &spdk_config)?;

        let job_config_path = output_dir.join(&job_config_name);
        write_document(&job_config_path, &job_config)?;

        let run_command = format!(
            "{} -c {spdk_config_name} -j {job_config_name} -m {cpu_mask:#x} -r {} -t {}",
            self.run.bdevperf, self.run.rpc_socket, self.run.duration_secs
        );

        Ok(Produced {
            spdk_config_path,
            job_config_path,
            run_command,
        })
    }
}

fn write_document(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).map_err(|source| Error::Write {
        path: path.to_path_buf(),
        source,
    })?;

    info!(path = %path.display(), "wrote benchmark configuration");
    Ok(())
}

/// File name of the SPDK configuration of app `app_name`.
#[must_use]
pub fn spdk_config_file_name(app_name: &str) -> String {
    format!("{app_name}_spdk_config.json")
}

/// File name of the bdevperf job file of app `app_name`.
#[must_use]
pub fn job_config_file_name(app_name: &str) -> String {
    format!("{app_name}_bdevperf_config.ini")
}

/// What [`OutputSink::write()`] produced.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Produced {
    spdk_config_path: PathBuf,
    job_config_path: PathBuf,
    run_command: String,
}

impl Produced {
    /// Where the SPDK configuration was written.
    #[must_use]
    pub fn spdk_config_path(&self) -> &Path {
        &self.spdk_config_path
    }

    /// Where the bdevperf job file was written.
    #[must_use]
    pub fn job_config_path(&self) -> &Path {
        &self.job_config_path
    }

    /// The shell command that runs the benchmark, to be executed from the output directory.
    #[must_use]
    pub fn run_command(&self) -> &str {
        &self.run_command
    }
}
