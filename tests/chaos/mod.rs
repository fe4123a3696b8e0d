//! Chaos testing for profsync
//!
//! Damaged profiles, flaky remote stores and credential sources that fail
//! at the worst moment. Local state must never be left half-restored.

use ::profsync::*;
use ::profsync::store::{InjectedFailure, SlotId};
use parking_lot::Mutex;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Store that fails the n-th call and every call after it until reset
#[derive(Debug)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_from: AtomicUsize,
    seen: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            fail_from: AtomicUsize::new(usize::MAX),
            seen: AtomicUsize::new(0),
        }
    }

    /// Fail calls starting `n` calls from now
    pub fn fail_after(&self, n: usize) {
        let seen = self.seen.load(Ordering::SeqCst);
        self.fail_from.store(seen + n, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.fail_from.store(usize::MAX, Ordering::SeqCst);
    }

    fn tick(&self) -> Result<()> {
        let call = self.seen.fetch_add(1, Ordering::SeqCst);
        if call >= self.fail_from.load(Ordering::SeqCst) {
            Err(ProfsyncError::transport("connection reset"))
        } else {
            Ok(())
        }
    }
}

impl RemoteStore for FlakyStore {
    fn create(&self, description: &str) -> Result<SlotId> {
        self.tick()?;
        self.inner.create(description)
    }

    fn find_by_description(&self, description: &str) -> Result<Option<SlotId>> {
        self.tick()?;
        self.inner.find_by_description(description)
    }

    fn list_entry_names(&self, slot: &str) -> Result<Vec<String>> {
        self.tick()?;
        self.inner.list_entry_names(slot)
    }

    fn read_entry(&self, slot: &str, name: &str) -> Result<Option<RemoteEntry>> {
        self.tick()?;
        self.inner.read_entry(slot, name)
    }

    fn fetch_raw(&self, locator: &str) -> Result<Vec<u8>> {
        self.tick()?;
        self.inner.fetch_raw(locator)
    }

    fn write_entry(&self, slot: &str, name: &str, content: &str) -> Result<()> {
        self.tick()?;
        self.inner.write_entry(slot, name, content)
    }

    fn delete_entry(&self, slot: &str, name: &str) -> Result<()> {
        self.tick()?;
        self.inner.delete_entry(slot, name)
    }
}

/// Credential source whose writes always fail
#[derive(Debug, Default)]
pub struct ReadOnlyKeychain {
    stored: Mutex<Option<Credentials>>,
}

impl CredentialSource for ReadOnlyKeychain {
    fn read(&self) -> Result<Option<Credentials>> {
        Ok(self.stored.lock().clone())
    }

    fn write(&self, _credentials: &Credentials) -> Result<()> {
        Err(ProfsyncError::Credentials("keychain is locked".to_string()))
    }

    fn is_keychain(&self) -> bool {
        true
    }
}

fn seed(layout: &SourceLayout) {
    fs::create_dir_all(layout.config_dir.join("projects")).unwrap();
    fs::write(layout.credentials_file(), r#"{"accessToken":"t"}"#).unwrap();
    fs::write(layout.config_dir.join("projects/a.json"), "[1,2,3]").unwrap();
    fs::write(&layout.config_file, r#"{"theme":"dark"}"#).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn on(store: Arc<dyn RemoteStore>, home: &std::path::Path) -> Profsync {
        Profsync::builder()
            .layout(SourceLayout::under(home))
            .shared_store(store)
            .build()
            .unwrap()
    }

    #[test]
    #[traced_test]
    fn test_store_fails_midway_then_recovers() {
        let home = TempDir::new().unwrap();
        let flaky = Arc::new(FlakyStore::new(MemoryStore::new()));
        let p = on(flaky.clone(), home.path());
        seed(p.layout());

        flaky.fail_after(1);
        let err = p.store("work").unwrap_err();
        assert!(matches!(err, ProfsyncError::Transport(_)));
        assert!(err.is_recoverable());

        flaky.heal();
        p.store("work").unwrap();
        assert!(p.exists("work").unwrap());
    }

    #[test]
    fn test_download_failure_leaves_local_state_alone() {
        let home = TempDir::new().unwrap();
        let flaky = Arc::new(FlakyStore::new(MemoryStore::new()));
        let p = on(flaky.clone(), home.path());
        seed(p.layout());
        p.store("work").unwrap();

        fs::write(&p.layout().config_file, r#"{"theme":"local"}"#).unwrap();
        flaky.fail_after(0);
        assert!(p.restore("work").is_err());
        assert_eq!(
            fs::read_to_string(&p.layout().config_file).unwrap(),
            r#"{"theme":"local"}"#
        );
    }

    #[test]
    fn test_garbage_entry_is_an_extraction_failure() {
        let home = TempDir::new().unwrap();
        let memory = MemoryStore::new();
        let p = on(Arc::new(memory.clone()), home.path());
        seed(p.layout());
        p.store("work").unwrap();

        // Overwrite the stored entry with text that is not base64
        let slot = memory
            .find_by_description(p.transfer().description())
            .unwrap()
            .unwrap();
        memory
            .write_entry(&slot, "work.profile.b64", "not an archive!")
            .unwrap();

        fs::write(&p.layout().config_file, r#"{"theme":"local"}"#).unwrap();
        let err = p.restore("work").unwrap_err();
        assert!(matches!(err, ProfsyncError::ExtractionFailed(_)));
        assert!(err.blocks_restore());
        assert_eq!(
            fs::read_to_string(&p.layout().config_file).unwrap(),
            r#"{"theme":"local"}"#
        );
    }

    #[test]
    fn test_valid_base64_of_non_archive_is_rejected() {
        let home = TempDir::new().unwrap();
        let memory = MemoryStore::new();
        let p = on(Arc::new(memory.clone()), home.path());
        seed(p.layout());
        p.store("work").unwrap();

        let slot = memory
            .find_by_description(p.transfer().description())
            .unwrap()
            .unwrap();
        let bogus = transfer::encode(&ArchiveBlob::new(b"plain text, not gzip".to_vec()));
        memory.write_entry(&slot, "work.profile.b64", &bogus).unwrap();

        assert!(matches!(
            p.verify("work"),
            Err(ProfsyncError::ExtractionFailed(_))
        ));
    }

    #[test]
    fn test_permission_denied_is_distinguished() {
        let home = TempDir::new().unwrap();
        let memory = MemoryStore::new();
        let p = on(Arc::new(memory.clone()), home.path());
        seed(p.layout());

        memory.inject_failure(Some(InjectedFailure::PermissionDenied));
        let err = p.store("work").unwrap_err();
        assert!(matches!(err, ProfsyncError::PermissionDenied(_)));
        assert!(!err.is_recoverable());
        assert!(err.user_message().contains("gh auth refresh"));
    }

    #[test]
    fn test_keychain_write_failure_surfaces_after_files_restored() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        let memory = MemoryStore::new();
        let token = Credentials {
            access_token: "kc".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at_ms: Some(1_700_000_000_000),
            scopes: vec!["user:inference".to_string()],
        };

        let a = Profsync::builder()
            .layout(SourceLayout::under(source.path()))
            .store(memory.clone())
            .credentials(StaticCredentials::new(Some(token)))
            .build()
            .unwrap();
        seed(a.layout());
        a.store("mac").unwrap();

        let b = Profsync::builder()
            .layout(SourceLayout::under(target.path()))
            .store(memory)
            .credentials(ReadOnlyKeychain::default())
            .build()
            .unwrap();
        let err = b.restore("mac").unwrap_err();
        assert!(matches!(err, ProfsyncError::Credentials(_)));
        assert!(b.layout().config_file.is_file());
    }
}
