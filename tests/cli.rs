use assert_cmd::cargo;
use assert_cmd::Command;
use clap::{crate_name, crate_version};
use predicates::prelude::*; // Used for writing assertions

fn gitcache(cache_dir: &std::path::Path) -> Command {
    let mut cmd = cargo::cargo_bin_cmd!("gitcache");
    cmd.env("GITCACHE_DIR", cache_dir);
    cmd.env("GITCACHE_LOGLEVEL", "info");
    cmd
}

#[test]
fn version_flag_working() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = cargo::cargo_bin_cmd!("gitcache");

    cmd.arg("--version");

    cmd.assert().success().stdout(predicate::str::contains(format!(
        "{} {}",
        crate_name!(),
        crate_version!()
    )));

    Ok(())
}

#[test]
fn settings_output_and_config_creation() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::tempdir()?;

    gitcache(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("gitcache global settings:"))
        .stdout(predicate::str::contains("gitcache configuration:"))
        .stdout(predicate::str::contains("MirrorHandling:"))
        .stdout(predicate::str::contains("GITCACHE_UPDATE_INTERVAL"));

    // the first run materializes the configuration file
    assert!(tmp.path().join("config").exists());

    Ok(())
}

#[test]
fn statistics_of_an_empty_cache() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::tempdir()?;

    gitcache(tmp.path())
        .arg("--show-statistics")
        .assert()
        .success()
        .stdout(predicate::str::contains("Total:"))
        .stdout(predicate::str::contains("Clones from Mirror:   0"));

    Ok(())
}

#[test]
fn zero_statistics_of_an_empty_cache() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::tempdir()?;

    gitcache(tmp.path())
        .arg("--zero-statistics")
        .assert()
        .success()
        .stderr(predicate::str::contains("Statistics cleared."));

    Ok(())
}

#[test]
fn cleanup_of_an_empty_cache() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::tempdir()?;

    gitcache(tmp.path())
        .arg("--cleanup")
        .assert()
        .success()
        .stderr(predicate::str::contains("Removed 0 mirrors."));

    Ok(())
}

#[test]
fn update_all_of_an_empty_cache() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::tempdir()?;

    gitcache(tmp.path())
        .arg("--update-all")
        .assert()
        .success()
        .stderr(predicate::str::contains("Nothing to update."));

    Ok(())
}

#[test]
fn delete_of_an_unknown_mirror_fails() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::tempdir()?;

    gitcache(tmp.path())
        .args(["--delete", "https://github.com/seeraven/gitcache"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown mirror"));

    Ok(())
}

#[test]
fn bail_out_option_calls_the_real_git() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::tempdir()?;

    gitcache(tmp.path())
        .args(["git", "--version"])
        .assert()
        .success()
        .stdout(predicate::str::contains("git version"));

    Ok(())
}

#[test]
fn unhandled_commands_fall_through() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::tempdir()?;

    gitcache(tmp.path())
        .args(["git", "version"])
        .assert()
        .success()
        .stdout(predicate::str::contains("git version"));

    Ok(())
}

#[test]
fn local_clones_are_not_cached() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::tempdir()?;
    let workspace = tempfile::tempdir()?;

    // prepare a small upstream repository
    let upstream = workspace.path().join("upstream");
    std::fs::create_dir_all(&upstream)?;
    let git = |args: &[&str], cwd: &std::path::Path| {
        let status = std::process::Command::new("git")
            .args(args)
            .current_dir(cwd)
            .env("GIT_AUTHOR_NAME", "Test")
            .env("GIT_AUTHOR_EMAIL", "test@example.com")
            .env("GIT_COMMITTER_NAME", "Test")
            .env("GIT_COMMITTER_EMAIL", "test@example.com")
            .status()
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    };
    git(&["init", "--quiet"], &upstream);
    std::fs::write(upstream.join("README"), "hello\n")?;
    git(&["add", "README"], &upstream);
    git(&["commit", "--quiet", "-m", "initial"], &upstream);

    // a plain local path is cloned without going through a mirror
    gitcache(tmp.path())
        .args([
            "git",
            "clone",
            upstream.to_str().unwrap(),
            workspace.path().join("checkout").to_str().unwrap(),
        ])
        .assert()
        .success();

    assert!(workspace.path().join("checkout").join("README").exists());
    // no mirror and no database entry was created
    assert!(!tmp.path().join("mirrors").exists());
    let db = tmp.path().join("db");
    if db.exists() {
        let content = std::fs::read_to_string(db)?;
        assert!(!content.contains("upstream"), "unexpected entry: {content}");
    }

    Ok(())
}
