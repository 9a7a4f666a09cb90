use std::io::Write;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use tempfile::NamedTempFile;

fn rule_file() -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
    file.write_all(
        b"title: suspicious logon\nauthors:\n  - dev\nkind: evtx\nlevel: high\nstatus: stable\ntimestamp: Timestamp\nfilter: \"EventID: 4624\"\n",
    )
    .unwrap();
    file
}

#[test]
fn hunt_fails_with_no_decoder_registered_for_evtx() -> Result<(), Box<dyn std::error::Error>> {
    let rule = rule_file();
    let mut sample = tempfile::Builder::new().suffix(".evtx").tempfile().unwrap();
    sample.write_all(b"not a real evtx file").unwrap();

    let mut cmd = Command::cargo_bin("tauscan")?;
    cmd.arg("hunt").arg(sample.path()).arg("--rule").arg(rule.path());
    cmd.assert().failure().stderr(predicate::str::contains("no decoder registered"));

    Ok(())
}

#[test]
fn hunt_with_no_paths_finds_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("tauscan")?;
    cmd.arg("hunt").arg("--quiet").arg("--json");
    cmd.assert().success().stdout(predicate::str::contains("[]"));

    Ok(())
}

#[test]
fn analyse_shimcache_fails_without_a_registered_registry_decoder() -> Result<(), Box<dyn std::error::Error>> {
    let mut system_hive = tempfile::Builder::new().suffix(".hve").tempfile().unwrap();
    system_hive.write_all(b"not a real hive").unwrap();

    let mut cmd = Command::cargo_bin("tauscan")?;
    cmd.arg("analyse").arg("shimcache").arg("--shimcache").arg(system_hive.path());
    cmd.assert().failure().stderr(predicate::str::contains("no registry hive decoder registered"));

    Ok(())
}

#[test]
fn analyse_srum_fails_without_a_registered_esedb_decoder() -> Result<(), Box<dyn std::error::Error>> {
    let mut srudb = tempfile::Builder::new().suffix(".dat").tempfile().unwrap();
    srudb.write_all(b"not a real ese database").unwrap();
    let mut software_hive = tempfile::Builder::new().suffix(".hve").tempfile().unwrap();
    software_hive.write_all(b"not a real hive").unwrap();

    let mut cmd = Command::cargo_bin("tauscan")?;
    cmd.arg("analyse").arg("srum").arg(srudb.path()).arg(software_hive.path());
    cmd.assert().failure().stderr(predicate::str::contains("no ESE database decoder registered"));

    Ok(())
}
