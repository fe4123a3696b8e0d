//! Integration tests for profsync
//!
//! Simulates several machines sharing one remote store and moves profiles
//! between them.

use ::profsync::*;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::info;

/// One simulated machine: its own home directory, a shared remote store
pub struct Machine {
    pub home: TempDir,
    pub profsync: Profsync,
}

impl Machine {
    /// Create a machine with an empty home
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        let home = TempDir::new().unwrap();
        let profsync = Profsync::builder()
            .layout(SourceLayout::under(home.path()))
            .shared_store(store)
            .build()
            .unwrap();
        Self { home, profsync }
    }

    pub fn layout(&self) -> &SourceLayout {
        self.profsync.layout()
    }

    /// Write a minimal restorable configuration plus `extra` files
    pub fn seed(&self, theme: &str, extra: &[(&str, &[u8])]) {
        let layout = self.layout();
        fs::create_dir_all(&layout.config_dir).unwrap();
        fs::write(layout.credentials_file(), br#"{"accessToken":"token"}"#).unwrap();
        fs::write(&layout.config_file, format!(r#"{{"theme":"{}"}}"#, theme)).unwrap();
        for (relative, content) in extra {
            let path = layout.config_dir.join(relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
    }

    pub fn theme(&self) -> String {
        fs::read_to_string(&self.layout().config_file).unwrap()
    }

    pub fn read(&self, relative: &str) -> Vec<u8> {
        fs::read(self.layout().config_dir.join(relative)).unwrap()
    }
}

fn directory_remote(root: &Path) -> Arc<dyn RemoteStore> {
    Arc::new(DirectoryStore::new(root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_store_list_restore_verify() {
        let remote = TempDir::new().unwrap();
        let store = directory_remote(remote.path());
        let laptop = Machine::new(store.clone());
        let desktop = Machine::new(store);

        laptop.seed("dark", &[("agents/reviewer.md", &b"# Reviewer"[..])]);
        let stored = laptop.profsync.store("work").unwrap();
        info!("Stored {} bytes", stored.size.encoded_bytes);

        let names = desktop.profsync.list().unwrap();
        assert_eq!(names, vec![ProfileName::new("work").unwrap()]);

        let restored = desktop.profsync.restore("work").unwrap();
        assert_eq!(restored.files_restored, 3);
        assert_eq!(desktop.theme(), r#"{"theme":"dark"}"#);
        assert_eq!(desktop.read("agents/reviewer.md"), b"# Reviewer");

        let report = desktop.profsync.verify("work").unwrap();
        assert!(report.valid, "{}", report.summary());
        assert!(desktop.profsync.verify_local().valid);
    }

    #[test]
    fn test_profiles_are_independent() {
        let store: Arc<dyn RemoteStore> = Arc::new(MemoryStore::new());
        let machine = Machine::new(store.clone());

        machine.seed("dark", &[]);
        machine.profsync.store("work").unwrap();
        machine.seed("light", &[("notes.txt", &b"home"[..])]);
        machine.profsync.store("home").unwrap();

        let other = Machine::new(store);
        other.profsync.restore("work").unwrap();
        assert_eq!(other.theme(), r#"{"theme":"dark"}"#);
        other.profsync.restore("home").unwrap();
        assert_eq!(other.theme(), r#"{"theme":"light"}"#);
        assert_eq!(other.read("notes.txt"), b"home");

        other.profsync.delete("work").unwrap();
        let names: Vec<String> = machine
            .profsync
            .list()
            .unwrap()
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(names, vec!["home"]);
    }

    #[test]
    fn test_last_writer_wins() -> anyhow::Result<()> {
        let store: Arc<dyn RemoteStore> = Arc::new(MemoryStore::new());
        let a = Machine::new(store.clone());
        let b = Machine::new(store.clone());
        let c = Machine::new(store);

        a.seed("from-a", &[]);
        b.seed("from-b", &[]);
        a.profsync.store("shared")?;
        b.profsync.store("shared")?;

        c.profsync.restore("shared")?;
        assert_eq!(c.theme(), r#"{"theme":"from-b"}"#);
        Ok(())
    }

    #[test]
    fn test_truncated_read_falls_back_to_raw_fetch() {
        let memory = MemoryStore::with_inline_limit(64);
        let store: Arc<dyn RemoteStore> = Arc::new(memory.clone());
        let a = Machine::new(store.clone());
        let b = Machine::new(store);

        let bulk: Vec<u8> = (0..20_000u32).flat_map(|i| i.to_le_bytes()).collect();
        a.seed("dark", &[("cache/blob.bin", bulk.as_slice())]);
        a.profsync.store("work").unwrap();

        b.profsync.restore("work").unwrap();
        assert_eq!(b.read("cache/blob.bin"), bulk);
        assert!(memory.raw_fetches() >= 1);
    }

    #[test]
    fn test_status_matches_what_is_stored() {
        let store: Arc<dyn RemoteStore> = Arc::new(MemoryStore::new());
        let machine = Machine::new(store);
        machine.seed("dark", &[("a/b/c.json", &b"{}"[..])]);

        let status = machine.profsync.status().unwrap();
        assert!(status.verification.valid);
        assert!(status.entries.iter().any(|e| e.path == "config-dir/a/b/c.json"));

        let stored = machine.profsync.store("work").unwrap();
        assert_eq!(Some(stored.size), status.size);
    }
}
