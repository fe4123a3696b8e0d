//! Main test module for profsync
//!
//! This module includes all test suites:
//! - Integration tests for multi-machine scenarios
//! - Chaos tests for remote store failures and damaged profiles
//! - Property-based tests for fingerprint and codec invariants

pub mod integration;
pub mod chaos;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::profsync::*;
    use std::fs;
    use tempfile::TempDir;

    fn instance(home: &std::path::Path, store: &MemoryStore) -> Profsync {
        Profsync::builder()
            .layout(SourceLayout::under(home))
            .store(store.clone())
            .build()
            .unwrap()
    }

    #[test]
    fn test_profile_name_boundaries() {
        let longest = "x".repeat(MAX_PROFILE_NAME_LEN);
        let too_long = "x".repeat(MAX_PROFILE_NAME_LEN + 1);
        for valid in ["work", "a", "home-laptop-2", longest.as_str()] {
            assert!(ProfileName::new(valid).is_ok(), "{} should be valid", valid);
        }
        for invalid in [
            "",
            "Work_1",
            "work profile",
            "-work",
            "work-",
            "work--home",
            "wörk",
            "../work",
            too_long.as_str(),
        ] {
            assert!(
                matches!(ProfileName::new(invalid), Err(ProfsyncError::InvalidProfileName(_))),
                "{:?} should be rejected",
                invalid
            );
        }
    }

    #[test]
    fn test_nothing_to_store() {
        let home = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let p = instance(home.path(), &store);

        // The gate runs first and already rejects an empty home
        let err = p.store("work").unwrap_err();
        assert!(matches!(err, ProfsyncError::VerificationFailed { .. }));
        assert_eq!(store.calls(), 0);

        let err = archive::build(&p.layout().sources(), None).unwrap_err();
        assert!(matches!(err, ProfsyncError::NoContent));
    }

    #[test]
    fn test_status_of_empty_home() {
        let home = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let p = instance(home.path(), &store);

        let status = p.status().unwrap();
        assert!(status.size.is_none());
        assert!(status.entries.is_empty());
        assert!(!status.verification.valid);
        assert!(status.sources.iter().all(|s| !s.present));
        assert_eq!(store.calls(), 0);
    }

    #[test]
    fn test_list_with_no_slot() {
        let home = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let p = instance(home.path(), &store);
        assert!(p.list().unwrap().is_empty());
        assert!(!p.exists("work").unwrap());
    }

    #[test]
    fn test_empty_config_directory_is_archived() {
        let home = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let p = instance(home.path(), &store);
        fs::create_dir_all(&p.layout().config_dir).unwrap();
        fs::write(p.layout().credentials_file(), "{}").unwrap();
        fs::create_dir_all(p.layout().config_dir.join("empty/nested")).unwrap();
        fs::write(&p.layout().config_file, "{}").unwrap();

        p.store("work").unwrap();
        let q = instance(target.path(), &store);
        q.restore("work").unwrap();
        assert!(q.layout().config_dir.join("empty/nested").is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_skipped() {
        let home = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let p = instance(home.path(), &store);
        fs::create_dir_all(&p.layout().config_dir).unwrap();
        fs::write(p.layout().credentials_file(), "{}").unwrap();
        fs::write(&p.layout().config_file, "{}").unwrap();
        std::os::unix::fs::symlink("/etc/hostname", p.layout().config_dir.join("link")).unwrap();

        let blob = archive::build(&p.layout().sources(), None).unwrap();
        let entries = archive::list_entries(&blob).unwrap();
        assert!(entries.iter().all(|e| !e.path.ends_with("link")));
    }
}
