mod common;

use std::process::Command;

use anyhow::Result;
use assert_cmd::prelude::*;
use assert_fs::TempDir;
use assert_fs::prelude::*;
use predicates::prelude::*;

use common::save_pattern;

macro_rules! cargo_run {
    ($dir:expr, $($args:expr),*) => {
        {
            let mut cmd = Command::cargo_bin("imfinder")?;
            cmd.env_remove("IMAGES_DIR_PATH").env_remove("CACHE_DIR_PATH");
            cmd.arg("--images-dir").arg($dir.child("images").path());
            cmd.arg("--cache-dir").arg($dir.child("cache").path());
            $(cmd.arg($args);)*
            cmd.assert()
        }
    };
}

#[test]
fn update_and_search() -> Result<()> {
    let dir = TempDir::new()?;
    dir.child("images").create_dir_all()?;
    save_pattern(dir.child("images/a.png").path(), 1);
    save_pattern(dir.child("images/b.png").path(), 2);
    dir.child("images/readme.txt").write_str("not an image")?;

    cargo_run!(dir, "update").success().stdout(predicate::str::contains("计算 2"));
    cargo_run!(dir, "update").success().stdout(predicate::str::contains("缓存 2"));
    dir.child("cache/a.png.npy").assert(predicate::path::is_file());

    cargo_run!(dir, "search", dir.child("images/b.png").path())
        .success()
        .stdout(predicate::str::contains("b.png"));

    cargo_run!(dir, "search", "--output-format", "json", dir.child("images/a.png").path())
        .success()
        .stdout(predicate::str::contains("\"identity\": \"a.png\""));

    Ok(())
}

#[test]
fn add_twice() -> Result<()> {
    let dir = TempDir::new()?;
    save_pattern(dir.child("new.png").path(), 4);

    cargo_run!(dir, "add", dir.child("new.png").path())
        .success()
        .stdout(predicate::str::contains("[OK]"));
    cargo_run!(dir, "add", dir.child("new.png").path())
        .success()
        .stdout(predicate::str::contains("[EXISTS]"));

    let stored = std::fs::read_dir(dir.child("images").path())?.count();
    assert_eq!(stored, 1);
    Ok(())
}

#[test]
fn add_missing_file() -> Result<()> {
    let dir = TempDir::new()?;
    cargo_run!(dir, "add", dir.child("missing.png").path())
        .success()
        .stderr(predicate::str::contains("[ERR]"));
    Ok(())
}
