//! Argument and precondition failures that should fail fast with a useful
//! message rather than panicking.

use assert_cmd::prelude::*;
use assert_cmd::Command;
use std::error::Error;
use std::fs;
use tempfile::tempdir;

/// `main`'s `error!(...)` line goes wherever the `tracing_subscriber` fmt
/// layer writes (stdout by default), while clap's own usage errors always
/// go to stderr; check both so the assertion doesn't depend on which one.
fn assert_failed_with_message(cmd: &mut Command, needle: &str) {
    let output = cmd.output().expect("process should run");
    assert!(!output.status.success(), "expected failure, got {output:?}");
    let combined = format!("{}{}", String::from_utf8_lossy(&output.stdout), String::from_utf8_lossy(&output.stderr));
    assert!(combined.contains(needle), "expected {needle:?} in output, got:\n{combined}");
}

#[test]
fn train_without_subcommand_args_fails_clap_parsing() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("lm")?;
    cmd.args(["train"]);
    cmd.assert().failure();
    Ok(())
}

#[test]
fn init_rejects_output_layer_size_mismatched_with_vocab() -> Result<(), Box<dyn Error>> {
    let tmp = tempdir()?;
    let corpus = tmp.path().join("corpus.txt");
    fs::write(&corpus, "the cat sat\n")?;

    let vocab_model = tmp.path().join("vocab.lm");
    Command::cargo_bin("lm")?
        .args(["vocab", corpus.to_str().unwrap(), vocab_model.to_str().unwrap()])
        .assert()
        .success();

    // vocab carries 5 entries (</s>, <unk>, the, cat, sat) but this topology
    // declares an output layer of size 1.
    let topology = tmp.path().join("topology.txt");
    fs::write(
        &topology,
        "<component name=lm>\nlayer name=in type=input size=1\nlayer name=out type=output size=1\nglue name=w type=dense in=in out=out\n</component>\n",
    )?;

    let init_model = tmp.path().join("init.lm");
    let mut cmd = Command::cargo_bin("lm")?;
    cmd.args(["init", topology.to_str().unwrap(), vocab_model.to_str().unwrap(), init_model.to_str().unwrap()]);
    assert_failed_with_message(&mut cmd, "output layer size");
    assert!(!init_model.exists());

    Ok(())
}

#[test]
fn init_rejects_unknown_glue_type() -> Result<(), Box<dyn Error>> {
    let tmp = tempdir()?;
    let corpus = tmp.path().join("corpus.txt");
    fs::write(&corpus, "the cat sat\n")?;

    let vocab_model = tmp.path().join("vocab.lm");
    Command::cargo_bin("lm")?
        .args(["vocab", corpus.to_str().unwrap(), vocab_model.to_str().unwrap()])
        .assert()
        .success();

    let topology = tmp.path().join("topology.txt");
    fs::write(
        &topology,
        "<component name=lm>\nlayer name=in type=input size=1\nlayer name=out type=output size=5\nglue name=w type=bogus in=in out=out\n</component>\n",
    )?;

    let init_model = tmp.path().join("init.lm");
    let mut cmd = Command::cargo_bin("lm")?;
    cmd.args(["init", topology.to_str().unwrap(), vocab_model.to_str().unwrap(), init_model.to_str().unwrap()]);
    assert_failed_with_message(&mut cmd, "compiler error");

    Ok(())
}

#[test]
fn train_fails_fast_on_missing_model_in() -> Result<(), Box<dyn Error>> {
    let tmp = tempdir()?;
    let corpus = tmp.path().join("corpus.txt");
    fs::write(&corpus, "the cat sat\n")?;

    Command::cargo_bin("lm")?
        .args([
            "train",
            corpus.to_str().unwrap(),
            tmp.path().join("does-not-exist.lm").to_str().unwrap(),
            tmp.path().join("out.lm").to_str().unwrap(),
        ])
        .assert()
        .failure();

    Ok(())
}

#[test]
fn gen_rejects_model_with_no_components() -> Result<(), Box<dyn Error>> {
    let tmp = tempdir()?;
    let corpus = tmp.path().join("corpus.txt");
    fs::write(&corpus, "the cat sat\n")?;

    let vocab_model = tmp.path().join("vocab.lm");
    Command::cargo_bin("lm")?
        .args(["vocab", corpus.to_str().unwrap(), vocab_model.to_str().unwrap()])
        .assert()
        .success();

    let mut cmd = Command::cargo_bin("lm")?;
    cmd.args(["gen", vocab_model.to_str().unwrap(), "1"]);
    assert_failed_with_message(&mut cmd, "missing resource");

    Ok(())
}

#[test]
fn converter_rejects_unknown_selection_method() -> Result<(), Box<dyn Error>> {
    let tmp = tempdir()?;
    let corpus = tmp.path().join("corpus.txt");
    fs::write(&corpus, "the cat sat\n")?;
    let topology = tmp.path().join("topology.txt");
    fs::write(
        &topology,
        "<component name=lm>\nlayer name=in type=input size=1\nlayer name=out type=output size=5\nglue name=w type=dense in=in out=out\n</component>\n",
    )?;

    let vocab_model = tmp.path().join("vocab.lm");
    Command::cargo_bin("lm")?
        .args(["vocab", corpus.to_str().unwrap(), vocab_model.to_str().unwrap()])
        .assert()
        .success();

    let init_model = tmp.path().join("init.lm");
    Command::cargo_bin("lm")?
        .args(["init", topology.to_str().unwrap(), vocab_model.to_str().unwrap(), init_model.to_str().unwrap()])
        .assert()
        .success();

    let fst_out = tmp.path().join("out.fst.txt");
    let mut cmd = Command::cargo_bin("lm")?;
    cmd.args([
        "converter",
        init_model.to_str().unwrap(),
        fst_out.to_str().unwrap(),
        "--word-selection-method",
        "bogus",
    ]);
    assert_failed_with_message(&mut cmd, "invalid arguments");

    Ok(())
}
