//! Integration tests for profsync
//!
//! These tests drive the public facade end-to-end against in-process stores
//! and temporary home directories.

#[cfg(test)]
mod integration_tests {
    use crate::*;
    use crate::store::InjectedFailure;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn populate(layout: &SourceLayout) {
        fs::create_dir_all(layout.config_dir.join("agents")).unwrap();
        fs::write(layout.config_dir.join("settings.json"), r#"{"model":"large"}"#).unwrap();
        fs::write(layout.config_dir.join("agents/reviewer.md"), "# Reviewer").unwrap();
        fs::write(layout.credentials_file(), r#"{"accessToken":"secret"}"#).unwrap();
        fs::write(&layout.config_file, r#"{"theme":"dark"}"#).unwrap();
        fs::write(&layout.config_backup, r#"{"theme":"light"}"#).unwrap();
    }

    fn machine(home: &Path, store: &MemoryStore) -> Profsync {
        Profsync::builder()
            .layout(SourceLayout::under(home))
            .store(store.clone())
            .build()
            .unwrap()
    }

    #[test]
    fn test_basic_workflow() {
        let laptop = TempDir::new().unwrap();
        let desktop = TempDir::new().unwrap();
        let store = MemoryStore::new();

        // Store on one machine
        let a = machine(laptop.path(), &store);
        populate(a.layout());
        let stored = a.store("work").unwrap();
        assert_eq!(stored.stats.sources_added, 3);
        assert!(stored.size.within_limit);

        // Visible from another
        let b = machine(desktop.path(), &store);
        let names: Vec<String> = b.list().unwrap().into_iter().map(String::from).collect();
        assert_eq!(names, vec!["work"]);
        assert!(b.verify("work").unwrap().valid);

        // Restore there
        let restored = b.restore("work").unwrap();
        assert_eq!(restored.files_restored, 5);
        assert!(restored.warnings.is_empty());
        assert_eq!(
            fs::read_to_string(b.layout().config_dir.join("agents/reviewer.md")).unwrap(),
            "# Reviewer"
        );
        assert_eq!(
            fs::read_to_string(&b.layout().config_backup).unwrap(),
            r#"{"theme":"light"}"#
        );

        // Both machines now fingerprint the same
        let fa = fingerprint::compute_fingerprint(&a.layout().sources(), None).unwrap();
        let fb = fingerprint::compute_fingerprint(&b.layout().sources(), None).unwrap();
        assert_eq!(fa, fb);
    }

    #[test]
    fn test_storing_again_replaces_profile() {
        let home = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let p = machine(home.path(), &store);
        populate(p.layout());

        p.store("work").unwrap();
        fs::write(&p.layout().config_file, r#"{"theme":"solarized"}"#).unwrap();
        p.store("work").unwrap();
        assert_eq!(p.list().unwrap().len(), 1);

        fs::write(&p.layout().config_file, r#"{"theme":"dark"}"#).unwrap();
        p.restore("work").unwrap();
        assert_eq!(
            fs::read_to_string(&p.layout().config_file).unwrap(),
            r#"{"theme":"solarized"}"#
        );
    }

    #[test]
    fn test_restore_keeps_local_extras() {
        let home = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let p = machine(home.path(), &store);
        populate(p.layout());
        p.store("work").unwrap();

        let extra = p.layout().config_dir.join("local-only.txt");
        fs::write(&extra, "mine").unwrap();
        p.restore("work").unwrap();
        assert_eq!(fs::read_to_string(&extra).unwrap(), "mine");
    }

    #[test]
    fn test_failed_verification_leaves_local_state_untouched() {
        let home = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let p = machine(home.path(), &store);
        populate(p.layout());

        // A profile without the top-level configuration file
        let staging = TempDir::new().unwrap();
        let partial = SourceLayout::under(staging.path());
        fs::create_dir_all(&partial.config_dir).unwrap();
        fs::write(partial.credentials_file(), "{}").unwrap();
        let blob = archive::build(&partial.sources(), None).unwrap();
        p.transfer()
            .upload(&ProfileName::new("broken").unwrap(), &blob)
            .unwrap();

        let report = p.verify("broken").unwrap();
        assert!(!report.valid);
        assert!(report.issues.iter().any(|i| i.contains("config.json")));

        let err = p.restore("broken").unwrap_err();
        assert!(err.blocks_restore());
        assert_eq!(
            fs::read_to_string(&p.layout().config_file).unwrap(),
            r#"{"theme":"dark"}"#
        );
    }

    #[test]
    fn test_delete_then_restore_is_not_found() {
        let home = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let p = machine(home.path(), &store);
        populate(p.layout());

        p.store("home-laptop").unwrap();
        assert!(p.exists("home-laptop").unwrap());
        p.delete("home-laptop").unwrap();
        assert!(!p.exists("home-laptop").unwrap());
        assert!(matches!(
            p.restore("home-laptop"),
            Err(ProfsyncError::ProfileNotFound(name)) if name == "home-laptop"
        ));
        assert!(matches!(
            p.delete("home-laptop"),
            Err(ProfsyncError::ProfileNotFound(_))
        ));
    }

    #[test]
    fn test_transport_failure_surfaces_unchanged() {
        let home = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let p = machine(home.path(), &store);
        populate(p.layout());

        store.inject_failure(Some(InjectedFailure::Transport));
        let err = p.store("work").unwrap_err();
        assert!(err.is_recoverable());

        store.inject_failure(Some(InjectedFailure::PermissionDenied));
        let err = p.list().unwrap_err();
        assert_eq!(err.exit_code(), 4);

        store.inject_failure(None);
        p.store("work").unwrap();
    }

    #[test]
    fn test_directory_store_workflow() {
        let home = TempDir::new().unwrap();
        let remote = TempDir::new().unwrap();
        let p = Profsync::builder()
            .layout(SourceLayout::under(home.path()))
            .store(DirectoryStore::new(remote.path()))
            .build()
            .unwrap();
        populate(p.layout());

        p.store("work").unwrap();
        p.store("personal").unwrap();
        let names: Vec<String> = p.list().unwrap().into_iter().map(String::from).collect();
        assert_eq!(names, vec!["personal", "work"]);

        fs::remove_dir_all(&p.layout().config_dir).unwrap();
        p.restore("personal").unwrap();
        assert!(p.layout().credentials_file().is_file());
    }

    #[test]
    fn test_keychain_profile_on_machine_without_keychain() {
        let laptop = TempDir::new().unwrap();
        let desktop = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let token = Credentials {
            access_token: "kc-token".to_string(),
            refresh_token: None,
            expires_at_ms: None,
            scopes: Vec::new(),
        };

        let a = Profsync::builder()
            .layout(SourceLayout::under(laptop.path()))
            .store(store.clone())
            .credentials(StaticCredentials::new(Some(token)))
            .build()
            .unwrap();
        fs::create_dir_all(&a.layout().config_dir).unwrap();
        fs::write(&a.layout().config_file, "{}").unwrap();
        let stored = a.store("mac").unwrap();
        assert!(stored.stats.credentials);

        // Without a keychain the plain credentials file is essential
        let b = machine(desktop.path(), &store);
        match b.restore("mac") {
            Err(ProfsyncError::VerificationFailed { issues }) => {
                assert!(issues.iter().any(|i| i.contains(".credentials.json")));
            }
            other => panic!("expected verification failure, got {:?}", other.map(|r| r.profile)),
        }
        assert!(!b.layout().config_file.exists());

        // With both kinds present it restores and warns about the keychain part
        fs::write(a.layout().credentials_file(), r#"{"accessToken":"plain"}"#).unwrap();
        a.store("mac").unwrap();
        let restored = b.restore("mac").unwrap();
        assert!(!restored.credentials_restored);
        assert_eq!(restored.warnings.len(), 1);
        assert!(b.layout().credentials_file().is_file());
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_operations_are_logged() {
        let home = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let p = machine(home.path(), &store);
        populate(p.layout());

        p.store("work").unwrap();
        p.restore("work").unwrap();
        p.delete("work").unwrap();
        assert!(logs_contain("Stored profile work"));
        assert!(logs_contain("Restored profile work"));
        assert!(logs_contain("Deleted profile work"));
    }

    #[tokio::test]
    async fn test_watch_uploads_after_change() {
        let home = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let p = Profsync::builder()
            .layout(SourceLayout::under(home.path()))
            .store(store.clone())
            .settle(Duration::from_millis(100))
            .throttle(Duration::ZERO)
            .build()
            .unwrap();
        populate(p.layout());

        let sink = Arc::new(CollectingSink::new());
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let layout = p.layout().clone();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            fs::write(&layout.config_file, r#"{"theme":"high-contrast"}"#).unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            let _ = stop_tx.send(());
        });

        let summary = p
            .watch("work", sink.clone(), async {
                let _ = stop_rx.await;
            })
            .await
            .unwrap();
        writer.await.unwrap();

        assert!(summary.save_count >= 1);
        assert!(sink.count(|e| matches!(e, WatchEvent::Started { .. })) == 1);
        assert!(sink.count(|e| matches!(e, WatchEvent::Stopped { .. })) == 1);

        let staging = TempDir::new().unwrap();
        let blob = p.transfer().download(&ProfileName::new("work").unwrap()).unwrap();
        archive::extract(&blob, staging.path()).unwrap();
        assert_eq!(
            fs::read_to_string(staging.path().join("config.json")).unwrap(),
            r#"{"theme":"high-contrast"}"#
        );
    }
}
