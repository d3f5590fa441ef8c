//! # Archive Tests
//!
//! Create, verify and restore cycles for encrypted archives of
//! non-repository paths.
//!
//! ## Test Coverage
//!
//! - Byte-identical restore of text and binary files
//! - Verification with the wrong key
//! - Restore refusals leave the destination untouched
//! - Exclusion patterns
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test archive_test
//! ```

use chrono::Utc;
use repo_guard::archive::{entry_name, ArchiveManager};
use repo_guard::config::BackupSet;
use repo_guard::key::KeyManager;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn populate(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let files = vec![
        (root.join("notes.txt"), b"remember the milk\n".to_vec()),
        (root.join("nested/deeper/config.ini"), b"[core]\nvalue = 1\n".to_vec()),
        (root.join("blob.bin"), (0u8..=255).cycle().take(70_000).collect()),
    ];
    for (path, bytes) in &files {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }
    files
}

fn set_for(root: &Path) -> BackupSet {
    BackupSet {
        name: "documents".into(),
        paths: vec![root.display().to_string()],
        exclude: vec!["*.sock".into()],
        encrypt: true,
        compress: true,
    }
}

#[test]
fn test_encrypted_round_trip_is_byte_identical() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("source");
    let files = populate(&source);
    fs::write(source.join("agent.sock"), b"socket").unwrap();

    let manager = ArchiveManager::new(temp.path().join("archives"), temp.path().join("archive.key"));
    let entry = manager
        .create(&set_for(&source), Utc::now())
        .unwrap()
        .expect("archive created");

    let name = entry.path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("documents_"));
    assert!(name.ends_with(".tar.gz.enc"));
    assert!(entry.is_valid());
    assert!(manager.verify(&entry.path).unwrap().is_verified());

    let sealed = fs::read(&entry.path).unwrap();
    assert!(!sealed
        .windows(b"remember the milk".len())
        .any(|w| w == b"remember the milk"));

    let dest = temp.path().join("restored");
    let count = manager.restore(&entry.path, &dest).unwrap();
    assert_eq!(count, files.len());

    for (path, bytes) in &files {
        let restored = dest.join(entry_name(path));
        assert_eq!(&fs::read(&restored).unwrap(), bytes, "{}", restored.display());
    }
    assert!(!dest.join(entry_name(&source.join("agent.sock"))).exists());
}

#[test]
fn test_wrong_key_fails_verification_and_restore() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("source");
    populate(&source);

    let archives = temp.path().join("archives");
    let manager = ArchiveManager::new(&archives, temp.path().join("right.key"));
    let entry = manager
        .create(&set_for(&source), Utc::now())
        .unwrap()
        .unwrap();

    let other_key = temp.path().join("wrong.key");
    KeyManager::new(&other_key).acquire().unwrap();
    let wrong = ArchiveManager::new(&archives, &other_key);

    let verification = wrong.verify(&entry.path).unwrap();
    assert!(verification.manifest_complete);
    assert!(verification.checksum_ok);
    assert!(!verification.opens);
    assert!(!verification.is_verified());

    let dest = temp.path().join("restored");
    assert!(wrong.restore(&entry.path, &dest).is_err());
    assert!(!dest.exists());
    let leftovers: Vec<_> = fs::read_dir(temp.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(".repo-guard-restore-"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn test_restore_refuses_non_empty_destination() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("source");
    populate(&source);

    let manager = ArchiveManager::new(temp.path().join("archives"), temp.path().join("archive.key"));
    let entry = manager
        .create(&set_for(&source), Utc::now())
        .unwrap()
        .unwrap();

    let dest = temp.path().join("occupied");
    fs::create_dir_all(&dest).unwrap();
    fs::write(dest.join("keep.txt"), "mine").unwrap();

    assert!(manager.restore(&entry.path, &dest).is_err());
    assert_eq!(fs::read_to_string(dest.join("keep.txt")).unwrap(), "mine");
    assert_eq!(fs::read_dir(&dest).unwrap().count(), 1);
}

#[test]
fn test_restore_into_existing_empty_directory() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("source");
    let files = populate(&source);

    let manager = ArchiveManager::new(temp.path().join("archives"), temp.path().join("archive.key"));
    let entry = manager
        .create(&set_for(&source), Utc::now())
        .unwrap()
        .unwrap();

    let dest = temp.path().join("empty");
    fs::create_dir_all(&dest).unwrap();
    manager.restore(&entry.path, &dest).unwrap();

    let (path, bytes) = &files[0];
    assert_eq!(&fs::read(dest.join(entry_name(path))).unwrap(), bytes);
}

#[test]
fn test_listing_reports_every_set() {
    let temp = TempDir::new().unwrap();
    let docs = temp.path().join("docs");
    let keys = temp.path().join("keys");
    populate(&docs);
    fs::create_dir_all(&keys).unwrap();
    fs::write(keys.join("id_test"), "not really a key").unwrap();

    let manager = ArchiveManager::new(temp.path().join("archives"), temp.path().join("archive.key"));
    manager.create(&set_for(&docs), Utc::now()).unwrap();
    manager
        .create(
            &BackupSet {
                name: "ssh".into(),
                paths: vec![keys.join("*").display().to_string()],
                exclude: vec![],
                encrypt: true,
                compress: false,
            },
            Utc::now(),
        )
        .unwrap();

    let entries = manager.list().unwrap();
    let sets: Vec<&str> = entries.iter().map(|e| e.set.as_str()).collect();
    assert_eq!(sets, vec!["documents", "ssh"]);
    assert!(entries.iter().all(|e| e.is_valid()));
    assert!(entries[1].path.to_string_lossy().ends_with(".tar.enc"));
}
