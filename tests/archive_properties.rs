//! Entry-level properties of bundle creation and merging.

use std::fs;

use bootstrap_gather::archive::{create_archive_from, merge_archives};
use bootstrap_gather::test_support::{read_bundle, write_bundle};
use camino::{Utf8Path, Utf8PathBuf};
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct Scratch {
    root: Utf8PathBuf,
    _tmp: TempDir,
}

#[fixture]
fn scratch() -> Scratch {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("create scratch directory: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("scratch path should be valid UTF-8: {}", path.display()));
    Scratch { root, _tmp: tmp }
}

fn bundle(root: &Utf8Path, file: &str, entries: &[(&str, &str)]) -> Utf8PathBuf {
    let path = root.join(file);
    write_bundle(&path, entries).unwrap_or_else(|err| panic!("write {path}: {err}"));
    path
}

fn entries(path: &Utf8Path) -> Vec<(String, Vec<u8>)> {
    read_bundle(path).unwrap_or_else(|err| panic!("read {path}: {err}"))
}

fn suffix_after_two_segments(name: &str) -> Option<&str> {
    name.splitn(3, '/').nth(2)
}

#[rstest]
#[case::flat(&[("log-bundle-3/journal.log", "j")], &[("install/serial/vm.log", "s")])]
#[case::nested(
    &[("log-bundle-3/control-plane/10.0.0.6/kubelet.log", "k")],
    &[("install/serial/boot/diag/vm.bmp", "BM"), ("install/serial/vm.log", "s")]
)]
#[case::several_primaries(
    &[("log-bundle-3/a.log", "a"), ("log-bundle-3/b/c.log", "c"), ("log-bundle-3/d.log", "")],
    &[("x/y/z", "z")]
)]
fn merged_entries_come_from_exactly_one_input(
    scratch: Scratch,
    #[case] primary: &[(&str, &str)],
    #[case] secondary: &[(&str, &str)],
) {
    let primary_path = bundle(&scratch.root, "primary.tar.gz", primary);
    let secondary_path = bundle(&scratch.root, "secondary.tar.gz", secondary);
    let output = scratch.root.join("out.tar.gz");

    merge_archives(
        Some(&primary_path),
        Some(&secondary_path),
        &output,
        "log-bundle-3",
    )
    .unwrap_or_else(|err| panic!("merge: {err}"));

    let primary_entries = entries(&primary_path);
    let secondary_entries = entries(&secondary_path);
    let merged = entries(&output);
    assert_eq!(merged.len(), primary.len() + secondary.len());
    for (name, bytes) in &merged {
        let from_primary = primary_entries
            .iter()
            .any(|(primary_name, primary_bytes)| primary_name == name && primary_bytes == bytes);
        let from_secondary = name
            .strip_prefix("log-bundle-3/serial-logs/")
            .is_some_and(|suffix| {
                secondary_entries.iter().any(|(secondary_name, secondary_bytes)| {
                    suffix_after_two_segments(secondary_name) == Some(suffix)
                        && secondary_bytes == bytes
                })
            });
        assert!(
            from_primary || from_secondary,
            "entry {name} has no source in either input"
        );
    }
}

#[rstest]
fn merging_an_empty_secondary_reproduces_the_primary(scratch: Scratch) {
    let primary_path = bundle(
        &scratch.root,
        "primary.tar.gz",
        &[("log-bundle-3/a.log", "a"), ("log-bundle-3/b/c.log", "c")],
    );
    let secondary_path = bundle(&scratch.root, "secondary.tar.gz", &[]);
    let output = scratch.root.join("out.tar.gz");

    merge_archives(
        Some(&primary_path),
        Some(&secondary_path),
        &output,
        "log-bundle-3",
    )
    .unwrap_or_else(|err| panic!("merge: {err}"));

    assert_eq!(entries(&output), entries(&primary_path));
}

#[rstest]
#[case::text(b"serial console output\n".as_slice())]
#[case::binary(&[0, 159, 146, 150, 255])]
#[case::empty(&[])]
fn created_entries_reproduce_file_bytes(scratch: Scratch, #[case] contents: &[u8]) {
    let name = Utf8PathBuf::from("install/serial-log-bundle-3/vm.log");
    let file = scratch.root.join(&name);
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent).unwrap_or_else(|err| panic!("create {parent}: {err}"));
    }
    fs::write(&file, contents).unwrap_or_else(|err| panic!("write {file}: {err}"));
    let output = scratch.root.join("serial.tar.gz");

    create_archive_from(&scratch.root, &[name.clone()], &output)
        .unwrap_or_else(|err| panic!("create: {err}"));

    assert_eq!(
        entries(&output),
        vec![(name.into_string(), contents.to_vec())]
    );
}
