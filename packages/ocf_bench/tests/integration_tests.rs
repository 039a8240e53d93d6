//! Integration tests for ocf_bench.
//!
//! These tests drive the whole pipeline from a topology file on disk to the generated files,
//! with the processors of the host replaced by fake hardware.

#![cfg(not(miri))]

use std::fs;
use std::path::Path;

use new_zealand::nz;
use ocf_bench::fake::HardwareBuilder;
use ocf_bench::{CpuRegistry, Error, RunInput, run_with_registry};

const TWO_APPS_ON_ONE_CORE: &str = r#"
name = "app1"

[[cpu]]
name = "cpu0"

[[cpu]]
name = "cpu0s"
sibling_of = "cpu0"

[[drive]]
address = "66:00.0"
name = "Nvme1"
partitions = 8
partition_size_mib = 102400

[[drive]]
address = "e3:00.0"
name = "Nvme2"
partitions = 8
partition_size_mib = 102400

[[drive]]
address = "68:00.0"
name = "Nvme0"
partitions = 8

[[drive]]
address = "65:00.0"
name = "Nvme3"
partitions = 8

[[workload]]
name = "wla"
rw = "write"
bs = 4096
iodepth = 128
cpu = "cpu0"
cache = { drive = "Nvme1" }
core = { drive = "Nvme0" }

[[workload]]
name = "wlb"
rw = "write"
bs = 4096
iodepth = 128
cpu = "cpu0s"
cache = { drive = "Nvme2" }
core = { drive = "Nvme3" }
"#;

/// Four cores with two hyperthreads each; core N holds processors N and N + 4.
fn registry() -> CpuRegistry {
    CpuRegistry::fake(HardwareBuilder::from_counts(nz!(4), nz!(2))).unwrap()
}

fn write_topology(dir: &Path, contents: &str) -> RunInput {
    let config = dir.join("app1.toml");
    fs::write(&config, contents).unwrap();

    RunInput {
        config,
        output_dir: Some(dir.to_path_buf()),
    }
}

#[test]
fn two_workloads_on_sibling_threads() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_topology(dir.path(), TWO_APPS_ON_ONE_CORE);

    let produced = run_with_registry(&input, registry()).unwrap();

    assert_eq!(
        produced.run_command(),
        "./test/bdev/bdevperf/bdevperf -c app1_spdk_config.json -j app1_bdevperf_config.ini \
         -m 0x11 -r /var/tmp/spdk.sock -t 300"
    );

    let json = fs::read_to_string(dir.path().join("app1_spdk_config.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    let config = value["subsystems"][0]["config"].as_array().unwrap();

    // 4 drives declared (attach + split each), then one cache per pair of 2 x 8 pairs.
    assert_eq!(config.len(), 4 * 2 + 16);

    let methods = config
        .iter()
        .map(|entry| entry["method"].as_str().unwrap())
        .collect::<Vec<_>>();

    assert!(methods[..8].iter().all(|m| *m != "bdev_ocf_create"));
    assert!(methods[8..].iter().all(|m| *m == "bdev_ocf_create"));

    assert_eq!(config[0]["params"]["name"], "Nvme1");
    assert_eq!(config[1]["params"]["base_bdev"], "Nvme1n1");
    assert_eq!(config[1]["params"]["split_size_mb"], 102_400);
    assert!(config[5]["params"].get("split_size_mb").is_none());

    assert_eq!(config[8]["params"]["name"], "Nvme1n1p0_ocf");
    assert_eq!(config[8]["params"]["cache_bdev_name"], "Nvme1n1p0");
    assert_eq!(config[8]["params"]["core_bdev_name"], "Nvme0n1p0");
    assert_eq!(config[8]["params"]["cpu_mask"], "[0]");
    assert_eq!(config[8]["params"]["mode"], "wb");

    assert_eq!(config[16]["params"]["name"], "Nvme2n1p0_ocf");
    assert_eq!(config[16]["params"]["cpu_mask"], "[4]");

    let ini = fs::read_to_string(dir.path().join("app1_bdevperf_config.ini")).unwrap();

    assert!(ini.starts_with(
        "[global]\n\n[wla_Nvme1n1p0_ocf]\nrw=write\nbs=4096\niodepth=128\n\
         filename=Nvme1n1p0_ocf\ncpumask=[0]\n"
    ));
    assert!(ini.ends_with(
        "[wlb_Nvme2n1p7_ocf]\nrw=write\nbs=4096\niodepth=128\n\
         filename=Nvme2n1p7_ocf\ncpumask=[4]\n"
    ));
    assert_eq!(ini.matches("\n[wl").count(), 16);
}

#[test]
fn command_line_output_dir_wins() {
    let dir = tempfile::tempdir().unwrap();
    let elsewhere = tempfile::tempdir().unwrap();

    let contents = format!(
        "output_dir = {:?}\n{TWO_APPS_ON_ONE_CORE}",
        elsewhere.path().display().to_string()
    );
    let input = write_topology(dir.path(), &contents);

    let produced = run_with_registry(&input, registry()).unwrap();

    assert_eq!(produced.spdk_config_path().parent(), Some(dir.path()));
    assert!(!elsewhere.path().join("app1_spdk_config.json").exists());
}

#[test]
fn output_dir_from_file_is_used() {
    let dir = tempfile::tempdir().unwrap();
    let elsewhere = tempfile::tempdir().unwrap();

    let contents = format!(
        "output_dir = {:?}\n{TWO_APPS_ON_ONE_CORE}",
        elsewhere.path().display().to_string()
    );
    let mut input = write_topology(dir.path(), &contents);
    input.output_dir = None;

    let produced = run_with_registry(&input, registry()).unwrap();

    assert_eq!(produced.job_config_path().parent(), Some(elsewhere.path()));
}

#[test]
fn missing_output_dir_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut input = write_topology(dir.path(), TWO_APPS_ON_ONE_CORE);
    input.output_dir = None;

    let error = run_with_registry(&input, registry()).unwrap_err();

    assert!(matches!(error, Error::OutputPathUnset));
    assert!(!dir.path().join("app1_spdk_config.json").exists());
    assert!(!dir.path().join("app1_bdevperf_config.ini").exists());
}

#[test]
fn custom_run_settings() {
    let dir = tempfile::tempdir().unwrap();

    let contents = format!(
        "{TWO_APPS_ON_ONE_CORE}\n[run]\nbdevperf = \"build/examples/bdevperf\"\nduration_secs = 60\n"
    );
    let input = write_topology(dir.path(), &contents);

    let produced = run_with_registry(&input, registry()).unwrap();

    assert!(produced.run_command().starts_with("build/examples/bdevperf -c "));
    assert!(produced.run_command().ends_with(" -r /var/tmp/spdk.sock -t 60"));
}

#[test]
fn more_cores_than_hardware_is_error() {
    let dir = tempfile::tempdir().unwrap();

    let contents = r#"
name = "app1"

[[cpu]]
name = "a"

[[cpu]]
name = "b"
"#;
    let input = write_topology(dir.path(), contents);

    let single_core = CpuRegistry::fake(HardwareBuilder::from_counts(nz!(1), nz!(2))).unwrap();
    let error = run_with_registry(&input, single_core).unwrap_err();

    assert!(matches!(error, Error::NoCpuAvailable));
}

#[test]
fn missing_topology_file_is_read_error() {
    let dir = tempfile::tempdir().unwrap();

    let input = RunInput {
        config: dir.path().join("absent.toml"),
        output_dir: Some(dir.path().to_path_buf()),
    };

    let error = run_with_registry(&input, registry()).unwrap_err();

    assert!(matches!(error, Error::ConfigRead { .. }));
}

#[test]
fn unknown_key_is_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_topology(dir.path(), "name = \"app1\"\nsurprise = 1\n");

    let error = run_with_registry(&input, registry()).unwrap_err();

    assert!(matches!(error, Error::ConfigParse(_)));
}
