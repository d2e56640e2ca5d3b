//! End-to-end smoke test over the full `lm` pipeline: vocab, init, train,
//! eval, gen, merge, converter. Each stage feeds the next, mirroring how a
//! real session would chain the subcommands by hand.

use assert_cmd::prelude::*;
use assert_cmd::Command;
use std::error::Error;
use std::fs;
use tempfile::tempdir;

const CORPUS: &str = "the cat sat\nthe dog ran\ncat ran\nthe cat ran\n";

const TOPOLOGY: &str = "\
<component name=lm>
layer name=in type=input size=1
layer name=hid type=hidden size=4
layer name=out type=output size=7
glue name=w1 type=dense in=in out=hid
glue name=w2 type=dense in=hid out=out
</component>
";

#[test]
fn full_pipeline_vocab_through_converter() -> Result<(), Box<dyn Error>> {
    let tmp = tempdir()?;
    let corpus = tmp.path().join("corpus.txt");
    fs::write(&corpus, CORPUS)?;
    let topology = tmp.path().join("topology.txt");
    fs::write(&topology, TOPOLOGY)?;

    let vocab_model = tmp.path().join("vocab.lm");
    Command::cargo_bin("lm")?
        .args(["vocab", corpus.to_str().unwrap(), vocab_model.to_str().unwrap()])
        .assert()
        .success();
    assert!(vocab_model.exists());

    let init_model = tmp.path().join("init.lm");
    Command::cargo_bin("lm")?
        .args(["init", topology.to_str().unwrap(), vocab_model.to_str().unwrap(), init_model.to_str().unwrap()])
        .assert()
        .success();
    assert!(init_model.exists());

    let trained_model = tmp.path().join("trained.lm");
    Command::cargo_bin("lm")?
        .args([
            "train",
            corpus.to_str().unwrap(),
            init_model.to_str().unwrap(),
            trained_model.to_str().unwrap(),
            "--learning-rate",
            "0.05",
        ])
        .assert()
        .success();
    assert!(trained_model.exists());

    Command::cargo_bin("lm")?
        .args(["eval", corpus.to_str().unwrap(), trained_model.to_str().unwrap()])
        .assert()
        .success();

    Command::cargo_bin("lm")?
        .args(["gen", trained_model.to_str().unwrap(), "2", "--random-seed", "7"])
        .assert()
        .success();

    let merged_model = tmp.path().join("merged.lm");
    Command::cargo_bin("lm")?
        .args([
            "merge",
            trained_model.to_str().unwrap(),
            vocab_model.to_str().unwrap(),
            merged_model.to_str().unwrap(),
        ])
        .assert()
        .success();
    assert!(merged_model.exists());

    let fst_out = tmp.path().join("model.fst.txt");
    Command::cargo_bin("lm")?
        .args(["converter", trained_model.to_str().unwrap(), fst_out.to_str().unwrap(), "--max-gram", "2"])
        .assert()
        .success();
    assert!(fst_out.exists());
    let fst_text = fs::read_to_string(&fst_out)?;
    assert!(!fst_text.is_empty(), "converted FST should carry at least the final-state line");

    Ok(())
}

#[test]
fn eval_writes_per_sentence_log_probabilities() -> Result<(), Box<dyn Error>> {
    let tmp = tempdir()?;
    let corpus = tmp.path().join("corpus.txt");
    fs::write(&corpus, CORPUS)?;
    let topology = tmp.path().join("topology.txt");
    fs::write(&topology, TOPOLOGY)?;

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

    let log_out = tmp.path().join("eval.log");
    Command::cargo_bin("lm")?
        .args(["eval", corpus.to_str().unwrap(), init_model.to_str().unwrap(), log_out.to_str().unwrap()])
        .assert()
        .success();

    let text = fs::read_to_string(&log_out)?;
    assert_eq!(text.lines().count(), CORPUS.lines().count());

    Ok(())
}
