//! Unit tests for bundle creation and merging.

use super::*;
use crate::test_support::{read_bundle, write_bundle};
use rstest::{fixture, rstest};
use std::fs;
use tempfile::TempDir;

struct Scratch {
    root: Utf8PathBuf,
    _tmp: TempDir,
}

#[fixture]
fn scratch() -> Scratch {
    let tmp = TempDir::new().expect("temp dir");
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8 temp dir");
    Scratch { root, _tmp: tmp }
}

fn write(root: &Utf8Path, name: &str, contents: &[u8]) {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    fs::write(path, contents).expect("write fixture");
}

#[rstest]
fn create_archive_from_names_entries_after_given_paths(scratch: Scratch) {
    write(&scratch.root, "install/serial/master-0.log", b"serial output\n");
    write(&scratch.root, "install/serial/master-0.bmp", &[0, 159, 146, 150]);
    let bundle = scratch.root.join("out.tar.gz");

    create_archive_from(
        &scratch.root,
        &[
            Utf8PathBuf::from("install/serial/master-0.log"),
            Utf8PathBuf::from("install/serial/master-0.bmp"),
        ],
        &bundle,
    )
    .expect("archive should be created");

    let entries = read_bundle(&bundle).expect("bundle should decode");
    assert_eq!(
        entries,
        vec![
            (
                String::from("install/serial/master-0.log"),
                b"serial output\n".to_vec()
            ),
            (
                String::from("install/serial/master-0.bmp"),
                vec![0, 159, 146, 150]
            ),
        ]
    );
}

#[rstest]
fn create_archive_preserves_file_size_and_mode(scratch: Scratch) {
    write(&scratch.root, "logs/a.txt", b"abc");
    let bundle = scratch.root.join("out.tar.gz");
    create_archive_from(&scratch.root, &[Utf8PathBuf::from("logs/a.txt")], &bundle)
        .expect("archive should be created");

    let file = File::open(&bundle).expect("open bundle");
    let mut archive = Archive::new(MultiGzDecoder::new(BufReader::new(file)));
    let mut entries = archive.entries().expect("entries");
    let entry = entries.next().expect("one entry").expect("readable entry");
    assert_eq!(entry.header().size().expect("size"), 3);
    assert!(entry.header().entry_type().is_file());
}

#[rstest]
fn create_archive_stops_at_first_missing_file(scratch: Scratch) {
    let bundle = scratch.root.join("out.tar.gz");
    let missing = scratch.root.join("missing.log");

    let err = create_archive_from(&scratch.root, &[Utf8PathBuf::from("missing.log")], &bundle)
        .expect_err("missing file should fail");

    assert!(
        matches!(err, ArchiveError::Open { ref path, .. } if *path == missing),
        "unexpected error: {err}"
    );
}

#[rstest]
fn merge_keeps_primary_and_rehomes_secondary(scratch: Scratch) {
    let primary = scratch.root.join("log-bundle.tar.gz");
    let secondary = scratch.root.join("serial.tar.gz");
    write_bundle(
        &primary,
        &[
            ("log-bundle-20240101000000/bootstrap/journal.log", "journal"),
            ("log-bundle-20240101000000/control-plane/10.0.0.6/kubelet.log", "kubelet"),
        ],
    )
    .expect("primary bundle");
    write_bundle(
        &secondary,
        &[
            ("install/serial-log-bundle-20240101000000/master-0.serialconsole.log", "serial"),
            ("install/serial-log-bundle-20240101000000/master-0.screenshot.bmp", "bmp"),
        ],
    )
    .expect("secondary bundle");
    let output = scratch.root.join("combined.tar.gz");

    let written = merge_archives(
        Some(&primary),
        Some(&secondary),
        &output,
        "log-bundle-20240101000000",
    )
    .expect("merge should succeed");

    assert_eq!(written.as_deref(), Some(output.as_path()));
    let entries = read_bundle(&output).expect("combined bundle should decode");
    let names: Vec<&str> = entries.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "log-bundle-20240101000000/bootstrap/journal.log",
            "log-bundle-20240101000000/control-plane/10.0.0.6/kubelet.log",
            "log-bundle-20240101000000/serial-logs/master-0.serialconsole.log",
            "log-bundle-20240101000000/serial-logs/master-0.screenshot.bmp",
        ]
    );
    assert_eq!(entries[2].1, b"serial".to_vec());
    assert_eq!(entries[3].1, b"bmp".to_vec());
}

#[rstest]
fn merge_keeps_nested_remainder_of_secondary_names(scratch: Scratch) {
    let primary = scratch.root.join("log-bundle.tar.gz");
    let secondary = scratch.root.join("serial.tar.gz");
    write_bundle(&primary, &[("a/b", "1")]).expect("primary bundle");
    write_bundle(&secondary, &[("x/y/vm-1/console.log", "2")]).expect("secondary bundle");
    let output = scratch.root.join("combined.tar.gz");

    merge_archives(Some(&primary), Some(&secondary), &output, "label").expect("merge");

    let names = entry_names(&output).expect("names");
    assert_eq!(names, vec!["a/b", "label/serial-logs/vm-1/console.log"]);
}

#[rstest]
#[case("console.log")]
#[case("serial-log-bundle/console.log")]
fn merge_rejects_secondary_entries_with_too_few_segments(scratch: Scratch, #[case] name: &str) {
    let primary = scratch.root.join("log-bundle.tar.gz");
    let secondary = scratch.root.join("serial.tar.gz");
    write_bundle(&primary, &[("a/b", "1")]).expect("primary bundle");
    write_bundle(&secondary, &[(name, "2")]).expect("secondary bundle");
    let output = scratch.root.join("combined.tar.gz");

    let err = merge_archives(Some(&primary), Some(&secondary), &output, "label")
        .expect_err("short names should be rejected");

    assert!(
        matches!(err, ArchiveError::MalformedEntry { name: ref entry, .. } if entry == name),
        "unexpected error: {err}"
    );
}

#[rstest]
fn merge_without_secondary_copies_primary_entries(scratch: Scratch) {
    let primary = scratch.root.join("log-bundle.tar.gz");
    write_bundle(
        &primary,
        &[("log-bundle-1/a.log", "alpha"), ("log-bundle-1/b.log", "beta")],
    )
    .expect("primary bundle");
    let output = scratch.root.join("combined.tar.gz");

    merge_archives(Some(&primary), None, &output, "log-bundle-1").expect("merge");

    assert_eq!(
        read_bundle(&output).expect("combined"),
        read_bundle(&primary).expect("primary")
    );
}

#[rstest]
fn merge_with_no_inputs_writes_nothing(scratch: Scratch) {
    let output = scratch.root.join("combined.tar.gz");

    let written = merge_archives(None, None, &output, "label").expect("merge is skipped");

    assert!(written.is_none());
    assert!(!output.exists());
}

#[rstest]
fn merge_surfaces_missing_primary(scratch: Scratch) {
    let output = scratch.root.join("combined.tar.gz");
    let missing = scratch.root.join("absent.tar.gz");

    let err = merge_archives(Some(&missing), None, &output, "label").expect_err("missing input");

    assert!(matches!(err, ArchiveError::Open { .. }), "unexpected error: {err}");
}

#[rstest]
fn entry_names_rejects_non_gzip_input(scratch: Scratch) {
    write(&scratch.root, "plain.txt", b"not a bundle");

    let err = entry_names(&scratch.root.join("plain.txt")).expect_err("plain text is not a bundle");

    assert!(matches!(err, ArchiveError::Read { .. }), "unexpected error: {err}");
}

fn write_host_bundle_with_links(path: &Utf8Path, link_target: &str) {
    let mut builder = open_writer(path).expect("primary bundle");

    let mut dir = Header::new_gnu();
    dir.set_entry_type(tar::EntryType::Directory);
    dir.set_mode(0o755);
    dir.set_size(0);
    builder
        .append_data(&mut dir, "log-bundle-1/", io::empty())
        .expect("directory entry");

    let mut link = Header::new_gnu();
    link.set_entry_type(tar::EntryType::Symlink);
    link.set_size(0);
    builder
        .append_link(&mut link, "log-bundle-1/journal", link_target)
        .expect("symlink entry");

    builder
        .append_pax_extensions([("SCHILY.xattr.user.origin", b"bootstrap".as_slice())])
        .expect("pax records");
    let mut file = Header::new_gnu();
    file.set_mode(0o644);
    file.set_size(7);
    builder
        .append_data(&mut file, "log-bundle-1/kubelet.log", b"kubelet".as_slice())
        .expect("file entry");

    finish(builder, path).expect("finish primary");
}

#[rstest]
fn merge_keeps_primary_links_directories_and_pax_records(scratch: Scratch) {
    let target = format!("/var/log/{}", "x".repeat(150));
    let primary = scratch.root.join("log-bundle.tar.gz");
    write_host_bundle_with_links(&primary, &target);
    let output = scratch.root.join("combined.tar.gz");

    merge_archives(Some(&primary), None, &output, "log-bundle-1").expect("merge");

    let mut archive = open_reader(&output).expect("combined bundle");
    let mut entries = archive.entries().expect("entries");

    let dir = entries.next().expect("directory").expect("readable directory");
    assert!(dir.header().entry_type().is_dir());
    assert_eq!(
        dir.path().expect("directory name").to_string_lossy().trim_end_matches('/'),
        "log-bundle-1"
    );

    let link = entries.next().expect("symlink").expect("readable symlink");
    assert!(link.header().entry_type().is_symlink());
    assert_eq!(
        link.link_name_bytes().expect("link target").as_ref(),
        target.as_bytes()
    );

    let mut file = entries.next().expect("file").expect("readable file");
    let origin = file
        .pax_extensions()
        .expect("pax records decode")
        .expect("pax records present")
        .filter_map(Result::ok)
        .find(|extension| extension.key() == Ok("SCHILY.xattr.user.origin"))
        .map(|extension| extension.value_bytes().to_vec());
    assert_eq!(origin.as_deref(), Some(b"bootstrap".as_slice()));
    assert_eq!(
        file.path().expect("file name").to_string_lossy(),
        "log-bundle-1/kubelet.log"
    );
    assert!(entries.next().is_none());
}

#[rstest]
fn merge_rehomes_secondary_symlinks_without_losing_targets(scratch: Scratch) {
    let target = format!("../{}", "serial".repeat(20));
    let secondary = scratch.root.join("serial.tar.gz");
    let mut builder = open_writer(&secondary).expect("secondary bundle");
    let mut link = Header::new_gnu();
    link.set_entry_type(tar::EntryType::Symlink);
    link.set_size(0);
    builder
        .append_link(&mut link, "install/serial-log-bundle-1/latest.log", &target)
        .expect("symlink entry");
    finish(builder, &secondary).expect("finish secondary");
    let output = scratch.root.join("combined.tar.gz");

    merge_archives(None, Some(&secondary), &output, "log-bundle-1").expect("merge");

    let mut archive = open_reader(&output).expect("combined bundle");
    let entry = archive
        .entries()
        .expect("entries")
        .next()
        .expect("one entry")
        .expect("readable entry");
    assert_eq!(
        entry.path().expect("name").to_string_lossy(),
        "log-bundle-1/serial-logs/latest.log"
    );
    assert_eq!(
        entry.link_name_bytes().expect("link target").as_ref(),
        target.as_bytes()
    );
}

#[rstest]
#[case::absolute("/tmp/install/a.log")]
#[case::parent("install/../a.log")]
fn create_archive_rejects_names_outside_the_archive_root(scratch: Scratch, #[case] name: &str) {
    let bundle = scratch.root.join("out.tar.gz");

    let err = create_archive(&[Utf8PathBuf::from(name)], &bundle)
        .expect_err("name should be rejected");

    assert!(
        matches!(err, ArchiveError::InvalidName { name: ref rejected } if rejected == name),
        "unexpected error: {err}"
    );
    assert!(!bundle.exists());
}

#[rstest]
fn create_archive_entries_separates_disk_paths_from_names(scratch: Scratch) {
    write(&scratch.root, "staging/vm.log", b"console");
    let bundle = scratch.root.join("out.tar.gz");

    create_archive_entries(
        &[(
            scratch.root.join("staging/vm.log"),
            Utf8PathBuf::from("install/serial-log-bundle-1/vm.log"),
        )],
        &bundle,
    )
    .expect("archive should be created");

    assert_eq!(
        read_bundle(&bundle).expect("bundle"),
        vec![(
            String::from("install/serial-log-bundle-1/vm.log"),
            b"console".to_vec()
        )]
    );
}
