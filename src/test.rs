#![allow(clippy::unwrap_used)]

use crate::node::Node;
use crate::walk::{self, Walk};
use crate::{ErrorKind, NodeState};
use core::num::NonZeroUsize;
use std::ffi::CString;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

fn cpath(path: &Path) -> CString {
    CString::new(path.as_os_str().as_bytes()).unwrap()
}

fn threaded(path: &Path, threads: usize) -> Arc<Walk> {
    walk::threaded::run(&cpath(path), NonZeroUsize::new(threads).unwrap())
}

/// Every available backend; io_uring is skipped where the sandbox or
/// kernel denies ring creation.
fn backends(path: &Path) -> Vec<(&'static str, Arc<Walk>)> {
    let mut runs = vec![
        ("threaded-1", threaded(path, 1)),
        ("threaded-8", threaded(path, 8)),
    ];
    if walk::uring::available() {
        runs.push(("io_uring", walk::uring::run(&cpath(path)).unwrap()));
    }
    runs
}

fn running_as_root() -> bool {
    // SAFETY: geteuid cannot fail
    unsafe { libc::geteuid() == 0 }
}

fn root_record(walk: &Walk) -> &Node {
    walk.records().get(0)
}

fn find<'w>(walk: &'w Walk, suffix: &str) -> &'w Node {
    walk.records()
        .iter()
        .find(|record| record.path().as_bytes().ends_with(suffix.as_bytes()))
        .unwrap_or_else(|| panic!("no record with path ending in {suffix:?}"))
}

/// Structural invariants that must hold for any finished traversal:
/// parent back-edges point strictly downward (except the self-parenting
/// root), every record is terminal, every directory's size equals the
/// sum of its non-errored descendants, and the progress handle agrees
/// with the list.
fn assert_invariants(label: &str, walk: &Walk) {
    let count = walk.records().len();
    assert!(count > 0, "{label}: traversal produced no records");
    assert!(walk.progress().finished(), "{label}: progress not finished");
    assert_eq!(
        walk.progress().completed(),
        count,
        "{label}: completed count disagrees with the record list"
    );

    let mut accumulated = vec![0_u64; count as usize];
    for index in (1..count).rev() {
        let record = walk.records().get(index);
        assert!(
            record.parent() < index,
            "{label}: record {index} does not point strictly upward"
        );
        let contribution = match record.state() {
            NodeState::CompletedFile => record.size(),
            NodeState::CompletedDir => {
                assert_eq!(
                    record.size(),
                    accumulated[index as usize],
                    "{label}: directory size mismatch at {:?}",
                    String::from_utf8_lossy(record.path().as_bytes())
                );
                record.size()
            }
            NodeState::Errored(_) => 0,
            pending => panic!("{label}: record {index} left non-terminal: {pending:?}"),
        };
        accumulated[record.parent() as usize] += contribution;
    }

    let root = root_record(walk);
    assert_eq!(root.parent(), 0, "{label}: root must be self-parenting");
    match root.state() {
        NodeState::CompletedDir => {
            assert_eq!(root.size(), accumulated[0], "{label}: root size mismatch");
        }
        NodeState::Errored(_) => assert_eq!(count, 1, "{label}: errored root cannot have children"),
        pending => panic!("{label}: root left non-terminal: {pending:?}"),
    }
}

#[test]
fn two_files_sum_into_the_root() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a"), vec![0; 5]).unwrap();
    fs::write(dir.path().join("b"), vec![0; 7]).unwrap();

    for (label, walk) in backends(dir.path()) {
        assert_invariants(label, &walk);
        assert_eq!(walk.records().len(), 3, "{label}");
        assert_eq!(root_record(&walk).size(), 12, "{label}");
        assert_eq!(root_record(&walk).state(), NodeState::CompletedDir, "{label}");
        let mut sizes = [find(&walk, "/a").size(), find(&walk, "/b").size()];
        sizes.sort_unstable();
        assert_eq!(sizes, [5, 7], "{label}");
        assert_eq!(find(&walk, "/a").state(), NodeState::CompletedFile, "{label}");
    }
}

#[test]
fn nested_directory_propagates_upward() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("d")).unwrap();
    fs::write(dir.path().join("d").join("x"), vec![0; 3]).unwrap();
    fs::write(dir.path().join("y"), vec![0; 4]).unwrap();

    for (label, walk) in backends(dir.path()) {
        assert_invariants(label, &walk);
        assert_eq!(walk.records().len(), 4, "{label}");
        assert_eq!(root_record(&walk).size(), 7, "{label}");
        let d = find(&walk, "/d");
        assert_eq!(d.state(), NodeState::CompletedDir, "{label}");
        assert_eq!(d.size(), 3, "{label}");
        assert_eq!(find(&walk, "/d/x").size(), 3, "{label}");
        assert_eq!(find(&walk, "/y").size(), 4, "{label}");
    }
}

#[test]
fn empty_root_is_a_single_completed_record() {
    let dir = tempfile::tempdir().unwrap();
    for (label, walk) in backends(dir.path()) {
        assert_invariants(label, &walk);
        assert_eq!(walk.records().len(), 1, "{label}");
        assert_eq!(root_record(&walk).state(), NodeState::CompletedDir, "{label}");
        assert_eq!(root_record(&walk).size(), 0, "{label}");
    }
}

#[test]
fn unreadable_directory_is_errored_not_fatal() {
    if running_as_root() {
        return; // root ignores permission bits, the scenario cannot be staged
    }
    let dir = tempfile::tempdir().unwrap();
    let restricted = dir.path().join("restricted");
    fs::create_dir(&restricted).unwrap();
    fs::set_permissions(&restricted, fs::Permissions::from_mode(0o000)).unwrap();

    for (label, walk) in backends(dir.path()) {
        assert_invariants(label, &walk);
        assert_eq!(walk.records().len(), 2, "{label}");
        assert_eq!(root_record(&walk).state(), NodeState::CompletedDir, "{label}");
        assert_eq!(root_record(&walk).size(), 0, "{label}");
        assert_eq!(
            find(&walk, "/restricted").state(),
            NodeState::Errored(ErrorKind::AccessDenied),
            "{label}"
        );
    }

    fs::set_permissions(&restricted, fs::Permissions::from_mode(0o755)).unwrap();
}

#[test]
fn unstattable_entry_still_counts_as_a_finished_child() {
    if running_as_root() {
        return;
    }
    // Read-but-not-search permission: the listing works, the statx on
    // the child does not.
    let dir = tempfile::tempdir().unwrap();
    let sealed = dir.path().join("sealed");
    fs::create_dir(&sealed).unwrap();
    fs::write(sealed.join("ghost"), b"boo").unwrap();
    fs::set_permissions(&sealed, fs::Permissions::from_mode(0o600)).unwrap();

    for (label, walk) in backends(dir.path()) {
        assert_invariants(label, &walk);
        assert_eq!(root_record(&walk).size(), 0, "{label}");
        let sealed_record = find(&walk, "/sealed");
        assert_eq!(sealed_record.state(), NodeState::CompletedDir, "{label}");
        assert_eq!(sealed_record.size(), 0, "{label}");
        assert_eq!(
            find(&walk, "/ghost").state(),
            NodeState::Errored(ErrorKind::AccessDenied),
            "{label}"
        );
    }

    fs::set_permissions(&sealed, fs::Permissions::from_mode(0o755)).unwrap();
}

#[test]
fn terabyte_sparse_file_does_not_overflow() {
    let dir = tempfile::tempdir().unwrap();
    let file = fs::File::create(dir.path().join("big")).unwrap();
    file.set_len(1 << 40).unwrap();
    drop(file);

    for (label, walk) in backends(dir.path()) {
        assert_invariants(label, &walk);
        assert_eq!(root_record(&walk).size(), 1 << 40, "{label}");
        assert_eq!(find(&walk, "/big").size(), 1 << 40, "{label}");
    }
}

#[test]
fn deep_chain_carries_the_leaf_to_every_ancestor() {
    let dir = tempfile::tempdir().unwrap();
    let mut path = dir.path().to_path_buf();
    for _ in 0..10 {
        path.push("a");
        fs::create_dir(&path).unwrap();
    }
    fs::write(path.join("leaf"), b"!").unwrap();

    for (label, walk) in backends(dir.path()) {
        assert_invariants(label, &walk);
        assert_eq!(walk.records().len(), 12, "{label}");
        for record in walk.records().iter() {
            match record.state() {
                NodeState::CompletedDir | NodeState::CompletedFile => {
                    assert_eq!(record.size(), 1, "{label}");
                }
                other => panic!("{label}: unexpected state {other:?}"),
            }
        }
    }
}

#[test]
fn symlinks_are_recorded_but_never_followed() {
    let dir = tempfile::tempdir().unwrap();
    let real = dir.path().join("real");
    fs::create_dir(&real).unwrap();
    fs::write(real.join("payload"), vec![0; 100]).unwrap();
    std::os::unix::fs::symlink("real", dir.path().join("link")).unwrap();

    for (label, walk) in backends(dir.path()) {
        assert_invariants(label, &walk);
        // root, real, real/payload, link; descending through the link
        // would have produced five or more
        assert_eq!(walk.records().len(), 4, "{label}");
        let link = find(&walk, "/link");
        assert_eq!(link.state(), NodeState::CompletedFile, "{label}");
        // lstat semantics: a symlink's own size is its target string
        assert_eq!(link.size(), 4, "{label}");
        assert_eq!(root_record(&walk).size(), 104, "{label}");
    }
}

#[test]
fn missing_root_yields_an_errored_root_record() {
    let dir = tempfile::tempdir().unwrap();
    let gone = dir.path().join("never-created");

    for (label, walk) in backends(&gone) {
        assert_eq!(walk.records().len(), 1, "{label}");
        assert_eq!(
            root_record(&walk).state(),
            NodeState::Errored(ErrorKind::FileNotFound),
            "{label}"
        );
        assert!(walk.progress().finished(), "{label}");
    }
}

fn build_mixed_tree(root: &Path) -> u64 {
    let mut total = 0;
    for d in 0..6_u64 {
        let dir = root.join(format!("dir{d}"));
        fs::create_dir(&dir).unwrap();
        for f in 0..8_u64 {
            let size = (d * 31 + f * 7 + 1) as usize;
            fs::write(dir.join(format!("f{f}")), vec![b'z'; size]).unwrap();
            total += size as u64;
        }
        let sub = dir.join("sub");
        fs::create_dir(&sub).unwrap();
        for f in 0..3_u64 {
            let size = (d + f + 1) as usize;
            fs::write(sub.join(format!("s{f}")), vec![b'q'; size]).unwrap();
            total += size as u64;
        }
    }
    fs::write(root.join("toplevel"), vec![b'r'; 123]).unwrap();
    total + 123
}

#[test]
fn mixed_tree_invariants_and_totals() {
    let dir = tempfile::tempdir().unwrap();
    let expected = build_mixed_tree(dir.path());

    for (label, walk) in backends(dir.path()) {
        assert_invariants(label, &walk);
        // 1 root + 6 dirs + 6 subs + 48 files + 18 subfiles + 1 top
        assert_eq!(walk.records().len(), 80, "{label}");
        assert_eq!(root_record(&walk).size(), expected, "{label}");
    }
}

#[test]
fn repeated_traversal_is_byte_identical_when_sequential() {
    let dir = tempfile::tempdir().unwrap();
    build_mixed_tree(dir.path());

    let snapshot = |walk: &Walk| {
        walk.records()
            .iter()
            .map(|record| {
                (
                    record.path().as_bytes().to_vec(),
                    record.size(),
                    record.state(),
                )
            })
            .collect::<Vec<_>>()
    };

    let first = threaded(dir.path(), 1);
    let second = threaded(dir.path(), 1);
    assert_eq!(snapshot(&first), snapshot(&second));

    // Concurrent runs may interleave listings differently; sizes and
    // states per path must still agree exactly.
    let concurrent = threaded(dir.path(), 8);
    let mut a = snapshot(&first);
    let mut b = snapshot(&concurrent);
    a.sort_by(|x, y| x.0.cmp(&y.0));
    b.sort_by(|x, y| x.0.cmp(&y.0));
    assert_eq!(a, b);
}
