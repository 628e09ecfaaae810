use std::str::FromStr;

use pretty_assertions::assert_eq;
use qcheck_macros::quickcheck;

use cairn::checksum::{Checksum, ObjectId, ObjectType};
use cairn::commit::Commit;
use cairn::content::ContentObject;
use cairn::delta::{self, Endianness, Part, PartEntry, PartHeader, Superblock};
use cairn::refname::RefName;
use cairn::remote::Remote;
use cairn::sign::keyring::{detached_with_signatures, Keyring};
use cairn::store::memory::MemoryStore;
use cairn::store::{RepoMode, Store};
use cairn::summary::{Summary, SummaryRef, STATIC_DELTAS_KEY};
use cairn::tree::{DirEntry, DirMeta, DirTree, FileEntry};
use cairn::wire;

use cairn_pull::fetcher::memory::MemoryFetcher;
use cairn_pull::{
    pull_with_options, remote_fetch_summary_with_options, Cancel, Collector, Error, Progress,
    PullFlags, PullOptions, SummaryOptions,
};

const BASE_URL: &str = "http://remote/repo";

fn refname(name: &str) -> RefName {
    RefName::try_from(name).unwrap()
}

fn object_route(checksum: Checksum, objtype: ObjectType) -> String {
    format!("repo/{}", ObjectId::new(checksum, objtype).loose_path())
}

/// Serve `data` as an object of the given type and return its checksum.
fn route_object(fetcher: &mut MemoryFetcher, objtype: ObjectType, data: &[u8]) -> Checksum {
    let checksum = Checksum::digest(data);
    fetcher.insert(object_route(checksum, objtype), data.to_vec());
    checksum
}

fn route_config(fetcher: &mut MemoryFetcher) {
    fetcher.insert("repo/config", &b"[core]\nmode=archive-z2\n"[..]);
}

fn summary_bytes(refs: Vec<SummaryRef>, extra: Vec<(String, Vec<u8>)>) -> Vec<u8> {
    wire::serialize(&Summary::new(refs, extra))
}

fn summary_ref(name: &str, commit_bytes: &[u8]) -> SummaryRef {
    SummaryRef {
        name: refname(name),
        commit_size: commit_bytes.len() as u64,
        checksum: Checksum::digest(commit_bytes),
    }
}

/// A remote serving one commit with two files under the root tree and
/// one file in `sub/`.
struct BasicRemote {
    commit: Checksum,
    commit_bytes: Vec<u8>,
    tree: Checksum,
    meta: Checksum,
    sub_tree: Checksum,
    file_a: Checksum,
    file_b: Checksum,
    file_c: Checksum,
}

fn basic_remote(fetcher: &mut MemoryFetcher, with_summary: bool) -> BasicRemote {
    let file_a = route_object(
        fetcher,
        ObjectType::File,
        &ContentObject::regular(&b"file a"[..]).to_raw(),
    );
    let file_b = route_object(
        fetcher,
        ObjectType::File,
        &ContentObject::regular(&b"file b"[..]).to_raw(),
    );
    let file_c = route_object(
        fetcher,
        ObjectType::File,
        &ContentObject::regular(&b"file c"[..]).to_raw(),
    );
    let meta = route_object(
        fetcher,
        ObjectType::DirMeta,
        &wire::serialize(&DirMeta::default()),
    );
    let sub_tree = route_object(
        fetcher,
        ObjectType::DirTree,
        &wire::serialize(&DirTree {
            files: vec![FileEntry {
                name: "c".into(),
                checksum: file_c,
            }],
            dirs: vec![],
        }),
    );
    let tree = route_object(
        fetcher,
        ObjectType::DirTree,
        &wire::serialize(&DirTree {
            files: vec![
                FileEntry {
                    name: "a".into(),
                    checksum: file_a,
                },
                FileEntry {
                    name: "b".into(),
                    checksum: file_b,
                },
            ],
            dirs: vec![DirEntry {
                name: "sub".into(),
                tree: sub_tree,
                meta,
            }],
        }),
    );
    let commit_bytes = wire::serialize(&Commit {
        parent: None,
        tree_contents: tree,
        tree_meta: meta,
        metadata: b"version=1".to_vec(),
    });
    let commit = route_object(fetcher, ObjectType::Commit, &commit_bytes);

    route_config(fetcher);
    if with_summary {
        fetcher.insert(
            "repo/summary",
            summary_bytes(vec![summary_ref("mybranch", &commit_bytes)], vec![]),
        );
    }

    BasicRemote {
        commit,
        commit_bytes,
        tree,
        meta,
        sub_tree,
        file_a,
        file_b,
        file_c,
    }
}

fn local_repo() -> MemoryStore {
    let mut repo = MemoryStore::new(RepoMode::Bare);
    repo.add_remote(
        "origin",
        Remote {
            name: Some("origin".into()),
            url: Some(BASE_URL.into()),
            ..Remote::default()
        },
    );
    repo
}

fn pull(
    repo: &mut MemoryStore,
    fetcher: &mut MemoryFetcher,
    options: PullOptions,
) -> Result<(), Error> {
    pull_with_options(
        repo,
        "origin",
        options,
        fetcher,
        &Keyring::default(),
        None,
        Cancel::new(),
    )
}

fn refs_options(refs: &[&str]) -> PullOptions {
    PullOptions {
        refs: refs.iter().map(|r| r.to_string()).collect(),
        ..PullOptions::default()
    }
}

#[test]
fn test_small_ref_pull() {
    let mut fetcher = MemoryFetcher::new().unwrap();
    let remote = basic_remote(&mut fetcher, true);
    let mut repo = local_repo();

    pull(&mut repo, &mut fetcher, refs_options(&["mybranch"])).unwrap();

    for id in [
        ObjectId::new(remote.commit, ObjectType::Commit),
        ObjectId::new(remote.tree, ObjectType::DirTree),
        ObjectId::new(remote.sub_tree, ObjectType::DirTree),
        ObjectId::new(remote.meta, ObjectType::DirMeta),
        ObjectId::new(remote.file_a, ObjectType::File),
        ObjectId::new(remote.file_b, ObjectType::File),
        ObjectId::new(remote.file_c, ObjectType::File),
    ] {
        assert!(repo.has_object(&id).unwrap(), "missing {id}");
    }
    assert_eq!(
        repo.resolve_rev("origin/mybranch").unwrap(),
        Some(remote.commit)
    );
    // The commitpartial marker was cleaned up after the commit.
    assert!(!repo.is_commit_partial(&remote.commit));
}

#[test]
fn test_pull_is_idempotent() {
    let mut fetcher = MemoryFetcher::new().unwrap();
    let remote = basic_remote(&mut fetcher, true);
    let mut repo = local_repo();

    pull(&mut repo, &mut fetcher, refs_options(&["mybranch"])).unwrap();
    let after_first = repo.clone();
    let served_before = fetcher.served().len();

    pull(&mut repo, &mut fetcher, refs_options(&["mybranch"])).unwrap();

    assert_eq!(repo, after_first);
    // The second pull re-reads wire metadata but transfers no objects
    // besides the detached-metadata probe.
    let new: Vec<_> = fetcher.served()[served_before..]
        .iter()
        .filter(|path| path.starts_with("repo/objects/"))
        .collect();
    assert!(
        new.iter()
            .all(|path| path.ends_with(".commitmeta") || path.ends_with(".commit-tombstone")),
        "unexpected object fetches: {new:?}"
    );
    assert_eq!(fetcher.served_count(&object_route(remote.file_a, ObjectType::File)), 1);
}

#[test]
fn test_at_most_once_fetches() {
    let mut fetcher = MemoryFetcher::new().unwrap();
    let remote = basic_remote(&mut fetcher, true);
    let mut repo = local_repo();

    pull(&mut repo, &mut fetcher, refs_options(&["mybranch"])).unwrap();

    for (checksum, objtype) in [
        (remote.commit, ObjectType::Commit),
        (remote.tree, ObjectType::DirTree),
        (remote.sub_tree, ObjectType::DirTree),
        (remote.meta, ObjectType::DirMeta),
        (remote.file_a, ObjectType::File),
        (remote.file_b, ObjectType::File),
        (remote.file_c, ObjectType::File),
    ] {
        assert_eq!(
            fetcher.served_count(&object_route(checksum, objtype)),
            1,
            "{checksum}.{objtype}"
        );
    }
}

#[test]
fn test_subdir_filter() {
    let mut fetcher = MemoryFetcher::new().unwrap();
    let remote = basic_remote(&mut fetcher, true);
    let mut repo = local_repo();

    let mut options = refs_options(&["mybranch"]);
    options.subdir = Some("/sub".into());
    pull(&mut repo, &mut fetcher, options).unwrap();

    // Root files are filtered out, the subdirectory's content is taken,
    // and the tree metadata is still fetched.
    assert!(!repo
        .has_object(&ObjectId::new(remote.file_a, ObjectType::File))
        .unwrap());
    assert!(!repo
        .has_object(&ObjectId::new(remote.file_b, ObjectType::File))
        .unwrap());
    assert!(repo
        .has_object(&ObjectId::new(remote.file_c, ObjectType::File))
        .unwrap());
    assert!(repo
        .has_object(&ObjectId::new(remote.tree, ObjectType::DirTree))
        .unwrap());
    assert!(repo
        .has_object(&ObjectId::new(remote.sub_tree, ObjectType::DirTree))
        .unwrap());
}

/// A remote carrying a from→to static delta, advertised in the summary.
struct DeltaRemote {
    from: Checksum,
    to: Checksum,
    superblock_path: String,
    part_path: String,
}

fn delta_remote(fetcher: &mut MemoryFetcher, repo: &mut MemoryStore) -> DeltaRemote {
    // The local side already has the `from` commit.
    let meta_bytes = wire::serialize(&DirMeta::default());
    let from_tree_bytes = wire::serialize(&DirTree::default());
    let from_commit_bytes = wire::serialize(&Commit {
        parent: None,
        tree_contents: Checksum::digest(&from_tree_bytes),
        tree_meta: Checksum::digest(&meta_bytes),
        metadata: vec![],
    });
    let from = Checksum::digest(&from_commit_bytes);
    repo.write_metadata(ObjectType::Commit, &from, &from_commit_bytes)
        .unwrap();
    repo.prepare_transaction().unwrap();
    repo.transaction_set_ref(Some("origin"), &refname("mybranch"), &from)
        .unwrap();
    repo.commit_transaction().unwrap();

    // The target commit: one tree, one file.
    let file_raw = ContentObject::regular(&b"delta payload"[..]).to_raw();
    let file = Checksum::digest(&file_raw);
    let meta = Checksum::digest(&meta_bytes);
    let to_tree_bytes = wire::serialize(&DirTree {
        files: vec![FileEntry {
            name: "payload".into(),
            checksum: file,
        }],
        dirs: vec![],
    });
    let to_tree = Checksum::digest(&to_tree_bytes);
    let to_commit_bytes = wire::serialize(&Commit {
        parent: Some(from),
        tree_contents: to_tree,
        tree_meta: meta,
        metadata: vec![],
    });
    let to = Checksum::digest(&to_commit_bytes);

    let part = Part {
        entries: vec![
            PartEntry {
                id: ObjectId::new(to_tree, ObjectType::DirTree),
                data: to_tree_bytes,
            },
            PartEntry {
                id: ObjectId::new(meta, ObjectType::DirMeta),
                data: meta_bytes,
            },
            PartEntry {
                id: ObjectId::new(file, ObjectType::File),
                data: file_raw,
            },
        ],
    };
    let part_bytes = part.to_bytes();
    let superblock = Superblock {
        metadata: vec![],
        to,
        commit: to_commit_bytes.clone(),
        parts: vec![PartHeader {
            version: 0,
            checksum: part.digest(),
            size: part_bytes.len() as u64,
            uncompressed_size: part_bytes.len() as u64,
            objects: vec![
                ObjectId::new(to_tree, ObjectType::DirTree),
                ObjectId::new(meta, ObjectType::DirMeta),
                ObjectId::new(file, ObjectType::File),
            ],
        }],
        fallbacks: vec![],
    };
    let superblock_bytes = superblock.encode(Endianness::Big);

    let name = delta::name(Some(&from), &to);
    let superblock_path = format!("repo/{}", delta::superblock_path(Some(&from), &to));
    let part_path = format!("repo/{}", delta::part_path(Some(&from), &to, 0));
    fetcher.insert(superblock_path.clone(), superblock_bytes.clone());
    fetcher.insert(part_path.clone(), part_bytes);

    route_config(fetcher);
    fetcher.insert(
        "repo/summary",
        summary_bytes(
            vec![summary_ref("mybranch", &to_commit_bytes)],
            vec![(
                STATIC_DELTAS_KEY.to_owned(),
                Summary::encode_static_deltas(&[(name, Checksum::digest(&superblock_bytes))]),
            )],
        ),
    );

    DeltaRemote {
        from,
        to,
        superblock_path,
        part_path,
    }
}

#[test]
fn test_static_delta_pull() {
    let mut fetcher = MemoryFetcher::new().unwrap();
    let mut repo = local_repo();
    let remote = delta_remote(&mut fetcher, &mut repo);

    let mut options = refs_options(&["mybranch"]);
    options.require_static_deltas = true;
    pull(&mut repo, &mut fetcher, options).unwrap();

    assert!(repo
        .has_object(&ObjectId::new(remote.to, ObjectType::Commit))
        .unwrap());
    assert_eq!(
        repo.resolve_rev("origin/mybranch").unwrap(),
        Some(remote.to)
    );
    assert_eq!(fetcher.served_count(&remote.superblock_path), 1);
    assert_eq!(fetcher.served_count(&remote.part_path), 1);
    // No individual objects were fetched, only the detached-metadata
    // probe for the freshly written commit.
    let objects: Vec<_> = fetcher
        .served()
        .iter()
        .filter(|path| path.starts_with("repo/objects/"))
        .collect();
    assert!(
        objects.iter().all(|path| path.ends_with(".commitmeta")),
        "unexpected object fetches: {objects:?}"
    );
}

#[test]
fn test_dry_run_reports_without_writing() {
    let mut fetcher = MemoryFetcher::new().unwrap();
    let mut repo = local_repo();
    let remote = delta_remote(&mut fetcher, &mut repo);
    let before = repo.clone();

    let mut options = refs_options(&["mybranch"]);
    options.require_static_deltas = true;
    options.dry_run = true;
    let mut progress = Collector::default();
    pull_with_options(
        &mut repo,
        "origin",
        options,
        &mut fetcher,
        &Keyring::default(),
        Some(&mut progress),
        Cancel::new(),
    )
    .unwrap();

    let last = progress.snapshots.last().expect("dry run reports once");
    assert_eq!(last.total_delta_superblocks, 1);
    assert_eq!(last.total_delta_parts, 1);
    assert!(last.total_delta_part_size > 0);
    assert!(last.total_delta_part_usize > 0);

    // No writes happened and the ref still points at the old commit.
    assert!(!repo
        .has_object(&ObjectId::new(remote.to, ObjectType::Commit))
        .unwrap());
    assert_eq!(
        repo.resolve_rev("origin/mybranch").unwrap(),
        Some(remote.from)
    );
    assert_eq!(fetcher.served_count(&remote.part_path), 0);
    // Everything but the resumable-transaction marker is untouched.
    assert_eq!(repo.object_ids().count(), before.object_ids().count());
}

#[test]
fn test_delta_checksum_mismatch_is_fatal() {
    let mut fetcher = MemoryFetcher::new().unwrap();
    let mut repo = local_repo();
    let remote = delta_remote(&mut fetcher, &mut repo);

    // Replace the superblock in transit; its digest no longer matches
    // the one the summary advertises.
    let forged = Superblock {
        metadata: vec![],
        to: remote.to,
        commit: vec![],
        parts: vec![],
        fallbacks: vec![],
    }
    .encode(Endianness::Big);
    fetcher.insert(remote.superblock_path.clone(), forged);

    let mut options = refs_options(&["mybranch"]);
    options.require_static_deltas = true;
    let err = pull(&mut repo, &mut fetcher, options).unwrap_err();
    assert!(matches!(err, Error::DeltaChecksumMismatch(_)), "{err}");
}

#[test]
fn test_gpg_failure_updates_nothing() {
    let mut fetcher = MemoryFetcher::new().unwrap();
    let remote = basic_remote(&mut fetcher, true);

    // The commit is signed, but by a key the keyring doesn't trust.
    fetcher.insert(
        object_route(remote.commit, ObjectType::CommitMeta),
        detached_with_signatures(Keyring::sign("rogue", b"rogue-secret", &remote.commit_bytes)),
    );

    let mut repo = MemoryStore::new(RepoMode::Bare);
    repo.add_remote(
        "origin",
        Remote {
            name: Some("origin".into()),
            url: Some(BASE_URL.into()),
            gpg_verify: true,
            ..Remote::default()
        },
    );
    let mut keyring = Keyring::default();
    keyring.trust("origin", "release", b"release-secret".to_vec());

    let mut progress = Collector::default();
    let err = pull_with_options(
        &mut repo,
        "origin",
        refs_options(&["mybranch"]),
        &mut fetcher,
        &keyring,
        Some(&mut progress),
        Cancel::new(),
    )
    .unwrap_err();

    assert!(matches!(err, Error::NoTrustedSignature), "{err}");
    assert_eq!(repo.resolve_rev("origin/mybranch").unwrap(), None);
    // The verification result was still surfaced.
    assert_eq!(progress.verified.len(), 1);
    assert_eq!(progress.verified[0].1.valid, 0);
}

#[test]
fn test_gpg_success_with_trusted_key() {
    let mut fetcher = MemoryFetcher::new().unwrap();
    let remote = basic_remote(&mut fetcher, true);
    fetcher.insert(
        object_route(remote.commit, ObjectType::CommitMeta),
        detached_with_signatures(Keyring::sign(
            "release",
            b"release-secret",
            &remote.commit_bytes,
        )),
    );

    let mut repo = MemoryStore::new(RepoMode::Bare);
    repo.add_remote(
        "origin",
        Remote {
            name: Some("origin".into()),
            url: Some(BASE_URL.into()),
            gpg_verify: true,
            ..Remote::default()
        },
    );
    let mut keyring = Keyring::default();
    keyring.trust("origin", "release", b"release-secret".to_vec());

    pull_with_options(
        &mut repo,
        "origin",
        refs_options(&["mybranch"]),
        &mut fetcher,
        &keyring,
        None,
        Cancel::new(),
    )
    .unwrap();
    assert_eq!(
        repo.resolve_rev("origin/mybranch").unwrap(),
        Some(remote.commit)
    );
}

#[test]
fn test_interrupted_pull_resumes() {
    let mut fetcher = MemoryFetcher::new().unwrap();
    let remote = basic_remote(&mut fetcher, true);
    let mut repo = local_repo();

    // First attempt: the user interrupts while the root tree arrives.
    fetcher.cancel_after(object_route(remote.tree, ObjectType::DirTree));
    let err = pull(&mut repo, &mut fetcher, refs_options(&["mybranch"])).unwrap_err();
    assert!(matches!(err, Error::Cancelled), "{err}");

    // The commit landed with its partial marker; the ref did not move.
    assert!(repo
        .has_object(&ObjectId::new(remote.commit, ObjectType::Commit))
        .unwrap());
    assert!(repo.is_commit_partial(&remote.commit));
    assert_eq!(repo.resolve_rev("origin/mybranch").unwrap(), None);
    assert!(!repo
        .has_object(&ObjectId::new(remote.file_a, ObjectType::File))
        .unwrap());

    // Second attempt completes the closure and clears the marker.
    let mut fetcher = MemoryFetcher::new().unwrap();
    let remote = basic_remote(&mut fetcher, true);
    pull(&mut repo, &mut fetcher, refs_options(&["mybranch"])).unwrap();

    assert!(repo
        .has_object(&ObjectId::new(remote.file_a, ObjectType::File))
        .unwrap());
    assert!(repo
        .has_object(&ObjectId::new(remote.file_c, ObjectType::File))
        .unwrap());
    assert!(!repo.is_commit_partial(&remote.commit));
    assert_eq!(
        repo.resolve_rev("origin/mybranch").unwrap(),
        Some(remote.commit)
    );
}

#[test]
fn test_mirror_pull() {
    let mut fetcher = MemoryFetcher::new().unwrap();
    let remote = basic_remote(&mut fetcher, true);

    let mut repo = MemoryStore::new(RepoMode::ArchiveZ2);
    repo.add_remote(
        "origin",
        Remote {
            name: Some("origin".into()),
            url: Some(BASE_URL.into()),
            ..Remote::default()
        },
    );

    let options = PullOptions {
        flags: PullFlags::from_bits(PullFlags::MIRROR),
        ..PullOptions::default()
    };
    pull(&mut repo, &mut fetcher, options).unwrap();

    // Mirror pulls update global refs and publish the summary verbatim.
    assert_eq!(repo.resolve_rev("mybranch").unwrap(), Some(remote.commit));
    let published = repo.summary().unwrap().expect("summary mirrored");
    let decoded = wire::deserialize::<Summary>(&published).unwrap();
    assert_eq!(
        decoded.lookup(&refname("mybranch")).unwrap().checksum,
        remote.commit
    );
}

#[test]
fn test_depth_limits_history() {
    fn chain_remote(fetcher: &mut MemoryFetcher, length: usize) -> Vec<Checksum> {
        let meta = route_object(
            fetcher,
            ObjectType::DirMeta,
            &wire::serialize(&DirMeta::default()),
        );
        let tree = route_object(fetcher, ObjectType::DirTree, &wire::serialize(&DirTree::default()));
        let mut commits = Vec::new();
        let mut parent = None;
        let mut tip_bytes = Vec::new();
        for generation in 0..length {
            let bytes = wire::serialize(&Commit {
                parent,
                tree_contents: tree,
                tree_meta: meta,
                metadata: format!("generation={generation}").into_bytes(),
            });
            let checksum = route_object(fetcher, ObjectType::Commit, &bytes);
            commits.push(checksum);
            parent = Some(checksum);
            tip_bytes = bytes;
        }
        route_config(fetcher);
        fetcher.insert(
            "repo/summary",
            summary_bytes(vec![summary_ref("mybranch", &tip_bytes)], vec![]),
        );
        commits
    }

    for (depth, expected) in [(0, 1), (1, 2), (5, 3), (-1, 3)] {
        let mut fetcher = MemoryFetcher::new().unwrap();
        let commits = chain_remote(&mut fetcher, 3);
        let mut repo = local_repo();

        let mut options = refs_options(&["mybranch"]);
        options.depth = depth;
        pull(&mut repo, &mut fetcher, options).unwrap();

        let present = commits
            .iter()
            .filter(|c| {
                repo.has_object(&ObjectId::new(**c, ObjectType::Commit))
                    .unwrap()
            })
            .count();
        assert_eq!(present, expected, "depth={depth}");
    }
}

#[test]
fn test_local_remote_import() {
    let mut source = MemoryStore::new(RepoMode::ArchiveZ2);
    let meta_bytes = wire::serialize(&DirMeta::default());
    let meta = source
        .write_metadata(ObjectType::DirMeta, &Checksum::digest(&meta_bytes), &meta_bytes)
        .unwrap();
    let file_raw = ContentObject::regular(&b"local file"[..]).to_raw();
    let file = Checksum::digest(&file_raw);
    source
        .write_content(&file, &ContentObject::parse(&file_raw).unwrap())
        .unwrap();
    let tree_bytes = wire::serialize(&DirTree {
        files: vec![FileEntry {
            name: "f".into(),
            checksum: file,
        }],
        dirs: vec![],
    });
    let tree = source
        .write_metadata(ObjectType::DirTree, &Checksum::digest(&tree_bytes), &tree_bytes)
        .unwrap();
    let commit_bytes = wire::serialize(&Commit {
        parent: None,
        tree_contents: tree,
        tree_meta: meta,
        metadata: vec![],
    });
    let commit = source
        .write_metadata(ObjectType::Commit, &Checksum::digest(&commit_bytes), &commit_bytes)
        .unwrap();
    source.set_summary(
        summary_bytes(vec![summary_ref("mybranch", &commit_bytes)], vec![]),
        None,
    );

    let mut repo = MemoryStore::new(RepoMode::Bare);
    repo.mount("/srv/mirror", source);

    let mut fetcher = MemoryFetcher::new().unwrap();
    let options = PullOptions {
        refs: vec!["mybranch".into()],
        override_remote_name: Some("origin".into()),
        ..PullOptions::default()
    };
    pull_with_options(
        &mut repo,
        "file:///srv/mirror",
        options,
        &mut fetcher,
        &Keyring::default(),
        None,
        Cancel::new(),
    )
    .unwrap();

    for id in [
        ObjectId::new(commit, ObjectType::Commit),
        ObjectId::new(tree, ObjectType::DirTree),
        ObjectId::new(meta, ObjectType::DirMeta),
        ObjectId::new(file, ObjectType::File),
    ] {
        assert!(repo.has_object(&id).unwrap(), "missing {id}");
    }
    assert_eq!(repo.resolve_rev("origin/mybranch").unwrap(), Some(commit));
    // Only the (absent) delta superblock and detached-metadata probes
    // went over the wire; every object was imported locally.
    assert!(fetcher
        .served()
        .iter()
        .all(|path| path.contains("/deltas/") || path.ends_with(".commitmeta")));
}

#[test]
fn test_summary_only_fetch() {
    let mut fetcher = MemoryFetcher::new().unwrap();
    let remote = basic_remote(&mut fetcher, true);
    fetcher.insert("repo/summary.sig", &b"unchecked signature"[..]);
    let mut repo = local_repo();

    let out = remote_fetch_summary_with_options(
        &mut repo,
        "origin",
        SummaryOptions::default(),
        &mut fetcher,
        &Keyring::default(),
        Cancel::new(),
    )
    .unwrap();

    let summary = wire::deserialize::<Summary>(&out.summary.unwrap()).unwrap();
    assert_eq!(
        summary.lookup(&refname("mybranch")).unwrap().checksum,
        remote.commit
    );
    assert_eq!(out.signature.as_deref(), Some(&b"unchecked signature"[..]));
    // No ref resolution or object traffic happened.
    assert!(fetcher
        .served()
        .iter()
        .all(|path| !path.starts_with("repo/objects/")));
}

#[test]
fn test_summary_cache_short_circuits_refetch() {
    let mut fetcher = MemoryFetcher::new().unwrap();
    let remote = basic_remote(&mut fetcher, true);
    fetcher.insert("repo/summary.sig", &b"stable signature"[..]);
    let mut repo = local_repo();

    pull(&mut repo, &mut fetcher, refs_options(&["mybranch"])).unwrap();
    assert_eq!(fetcher.served_count("repo/summary"), 1);

    // Same signature: the cached summary is reused even though the
    // summary route is gone.
    fetcher.remove("repo/summary");
    pull(&mut repo, &mut fetcher, refs_options(&["mybranch"])).unwrap();
    assert_eq!(fetcher.served_count("repo/summary"), 1);
    assert_eq!(fetcher.served_count("repo/summary.sig"), 2);
    let _ = remote;
}

#[test]
fn test_option_validation() {
    let mut fetcher = MemoryFetcher::new().unwrap();
    let mut repo = local_repo();

    let options = PullOptions {
        disable_static_deltas: true,
        require_static_deltas: true,
        ..PullOptions::default()
    };
    assert!(matches!(
        pull(&mut repo, &mut fetcher, options),
        Err(Error::Options(_))
    ));

    let options = PullOptions {
        dry_run: true,
        ..PullOptions::default()
    };
    assert!(matches!(
        pull(&mut repo, &mut fetcher, options),
        Err(Error::Options(_))
    ));

    let options = PullOptions {
        subdir: Some("sub".into()),
        ..PullOptions::default()
    };
    assert!(matches!(
        pull(&mut repo, &mut fetcher, options),
        Err(Error::Options(_))
    ));

    // Verification on an anonymous URL remote needs an identity.
    let options = PullOptions {
        gpg_verify: Some(true),
        refs: vec!["mybranch".into()],
        ..PullOptions::default()
    };
    let err = pull_with_options(
        &mut repo,
        "http://remote/repo",
        options,
        &mut fetcher,
        &Keyring::default(),
        None,
        Cancel::new(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::MissingRemoteName));

    // No refs given and none configured.
    assert!(matches!(
        pull(&mut repo, &mut fetcher, PullOptions::default()),
        Err(Error::NoBranches(_))
    ));
}

#[test]
fn test_unsupported_remote_mode() {
    let mut fetcher = MemoryFetcher::new().unwrap();
    basic_remote(&mut fetcher, true);
    fetcher.insert("repo/config", &b"[core]\nmode=bare\n"[..]);
    let mut repo = local_repo();

    let err = pull(&mut repo, &mut fetcher, refs_options(&["mybranch"])).unwrap_err();
    assert!(matches!(err, Error::RemoteMode(_)), "{err}");
}

#[test]
fn test_commit_size_limit_enforced() {
    let mut fetcher = MemoryFetcher::new().unwrap();
    let remote = basic_remote(&mut fetcher, false);
    route_config(&mut fetcher);
    // The summary understates the commit size; the fetcher must refuse
    // the oversized response.
    fetcher.insert(
        "repo/summary",
        summary_bytes(
            vec![SummaryRef {
                name: refname("mybranch"),
                commit_size: 1,
                checksum: remote.commit,
            }],
            vec![],
        ),
    );
    let mut repo = local_repo();
    let mut options = refs_options(&["mybranch"]);
    options.disable_static_deltas = true;

    let err = pull(&mut repo, &mut fetcher, options).unwrap_err();
    assert!(
        matches!(err, Error::Fetch(cairn_pull::fetcher::Error::TooLarge { .. })),
        "{err}"
    );
}

#[quickcheck]
fn prop_closure_holds_for_generated_trees(file_count: u8, payload: Vec<u8>) {
    let file_count = usize::from(file_count % 24) + 1;
    let mut fetcher = MemoryFetcher::new().unwrap();

    let mut files = Vec::new();
    let mut entries = Vec::new();
    for index in 0..file_count {
        let mut data = payload.clone();
        data.extend_from_slice(index.to_string().as_bytes());
        let raw = ContentObject::regular(data).to_raw();
        let checksum = route_object(&mut fetcher, ObjectType::File, &raw);
        files.push(checksum);
        entries.push(FileEntry {
            name: format!("file-{index}"),
            checksum,
        });
    }
    let meta = route_object(
        &mut fetcher,
        ObjectType::DirMeta,
        &wire::serialize(&DirMeta::default()),
    );
    let tree = route_object(
        &mut fetcher,
        ObjectType::DirTree,
        &wire::serialize(&DirTree {
            files: entries,
            dirs: vec![],
        }),
    );
    let commit_bytes = wire::serialize(&Commit {
        parent: None,
        tree_contents: tree,
        tree_meta: meta,
        metadata: vec![],
    });
    route_object(&mut fetcher, ObjectType::Commit, &commit_bytes);
    route_config(&mut fetcher);
    fetcher.insert(
        "repo/summary",
        summary_bytes(vec![summary_ref("mybranch", &commit_bytes)], vec![]),
    );

    let mut repo = local_repo();
    pull(&mut repo, &mut fetcher, refs_options(&["mybranch"])).unwrap();

    // Every file referenced by the reached tree is present, fetched at
    // most once.
    for checksum in files {
        let id = ObjectId::new(checksum, ObjectType::File);
        assert!(repo.has_object(&id).unwrap());
        assert!(fetcher.served_count(&object_route(checksum, ObjectType::File)) <= 1);
    }
}

/// A helper exercising the `Progress` trait through a plain closure
/// sink, to keep the engine honest about the dry-run contract.
struct Once(bool);

impl Progress for Once {
    fn update(&mut self, _snapshot: &cairn_pull::Snapshot) {
        self.0 = true;
    }
}

#[test]
fn test_dry_run_reports_at_least_once() {
    let mut fetcher = MemoryFetcher::new().unwrap();
    let mut repo = local_repo();
    delta_remote(&mut fetcher, &mut repo);

    let mut options = refs_options(&["mybranch"]);
    options.require_static_deltas = true;
    options.dry_run = true;
    let mut sink = Once(false);
    pull_with_options(
        &mut repo,
        "origin",
        options,
        &mut fetcher,
        &Keyring::default(),
        Some(&mut sink),
        Cancel::new(),
    )
    .unwrap();
    assert!(sink.0);
}

#[test]
fn test_metalink_supplies_base_and_summary() {
    let mut fetcher = MemoryFetcher::new().unwrap();
    let remote = basic_remote(&mut fetcher, false);
    fetcher.set_metalink(cairn_pull::fetcher::Metalink {
        target: url::Url::parse("http://mirror/repo/summary").unwrap(),
        summary: summary_bytes(vec![summary_ref("mybranch", &remote.commit_bytes)], vec![]),
    });

    let mut repo = MemoryStore::new(RepoMode::Bare);
    repo.add_remote(
        "origin",
        Remote {
            name: Some("origin".into()),
            metalink: Some("http://remote/metalink.xml".into()),
            ..Remote::default()
        },
    );

    pull(&mut repo, &mut fetcher, refs_options(&["mybranch"])).unwrap();

    assert_eq!(
        repo.resolve_rev("origin/mybranch").unwrap(),
        Some(remote.commit)
    );
    // The summary came from the metalink; it was never fetched over
    // the wire.
    assert_eq!(fetcher.served_count("repo/summary"), 0);
}

#[test]
fn test_pull_by_commit_checksum() {
    let mut fetcher = MemoryFetcher::new().unwrap();
    let remote = basic_remote(&mut fetcher, true);
    let mut repo = local_repo();

    pull(
        &mut repo,
        &mut fetcher,
        refs_options(&[&remote.commit.to_string()]),
    )
    .unwrap();

    assert!(repo
        .has_object(&ObjectId::new(remote.commit, ObjectType::Commit))
        .unwrap());
    assert!(repo
        .has_object(&ObjectId::new(remote.file_a, ObjectType::File))
        .unwrap());
    // No ref was requested, so none was created.
    assert_eq!(repo.resolve_rev("origin/mybranch").unwrap(), None);
    assert!(!repo.is_commit_partial(&remote.commit));
}

#[test]
fn test_dangling_parent_resolved_by_tombstone() {
    let mut fetcher = MemoryFetcher::new().unwrap();
    fetcher.insert(
        "repo/config",
        &b"[core]\nmode=archive-z2\ntombstone-commits=true\n"[..],
    );
    let meta = route_object(
        &mut fetcher,
        ObjectType::DirMeta,
        &wire::serialize(&DirMeta::default()),
    );
    let tree = route_object(
        &mut fetcher,
        ObjectType::DirTree,
        &wire::serialize(&DirTree::default()),
    );
    // The parent commit was pruned from the remote; only its tombstone
    // remains.
    let orphan = Checksum::digest(b"pruned commit");
    fetcher.insert(object_route(orphan, ObjectType::TombstoneCommit), vec![]);
    let tip_bytes = wire::serialize(&Commit {
        parent: Some(orphan),
        tree_contents: tree,
        tree_meta: meta,
        metadata: vec![],
    });
    let tip = route_object(&mut fetcher, ObjectType::Commit, &tip_bytes);
    fetcher.insert(
        "repo/summary",
        summary_bytes(vec![summary_ref("mybranch", &tip_bytes)], vec![]),
    );

    let mut repo = local_repo();
    let mut options = refs_options(&["mybranch"]);
    options.depth = 1;
    pull(&mut repo, &mut fetcher, options).unwrap();

    assert!(repo
        .has_object(&ObjectId::new(tip, ObjectType::Commit))
        .unwrap());
    assert!(!repo
        .has_object(&ObjectId::new(orphan, ObjectType::Commit))
        .unwrap());
    assert_eq!(
        fetcher.served_count(&object_route(orphan, ObjectType::TombstoneCommit)),
        1
    );
}

#[test]
fn test_checksum_parse_roundtrip() {
    let checksum = Checksum::digest(b"x");
    assert_eq!(Checksum::from_str(&checksum.to_string()).unwrap(), checksum);
}
