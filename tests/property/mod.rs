//! Property-based testing for profsync
//!
//! Uses proptest to check fingerprint and archive invariants across
//! randomly generated configuration trees.

use ::profsync::*;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Generate relative file paths one to three components deep
fn path_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z][a-z0-9]{0,7}", 1..=3).prop_map(|parts| parts.join("/"))
}

/// Generate file contents, empty files included
fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

/// Generate a configuration tree: relative path -> content
fn tree_strategy() -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    prop::collection::btree_map(path_strategy(), content_strategy(), 1..12).prop_filter(
        "no path may be a prefix directory of another",
        |tree| {
            tree.keys().all(|a| {
                tree.keys()
                    .all(|b| a == b || !b.starts_with(&format!("{}/", a)))
            })
        },
    )
}

/// Write `tree` into the configuration directory, in the given order
pub fn write_tree(layout: &SourceLayout, tree: &[(&String, &Vec<u8>)]) {
    fs::create_dir_all(&layout.config_dir).unwrap();
    for (relative, content) in tree {
        let path = layout.config_dir.join(relative.as_str());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    fs::write(&layout.config_file, "{}").unwrap();
}

fn fingerprint_of(root: &Path) -> Fingerprint {
    fingerprint::compute_fingerprint(&SourceLayout::under(root).sources(), None).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_fingerprint_ignores_creation_order(tree in tree_strategy()) {
            let forward = TempDir::new().unwrap();
            let backward = TempDir::new().unwrap();

            let entries: Vec<_> = tree.iter().collect();
            write_tree(&SourceLayout::under(forward.path()), &entries);
            let reversed: Vec<_> = tree.iter().rev().collect();
            write_tree(&SourceLayout::under(backward.path()), &reversed);

            prop_assert_eq!(fingerprint_of(forward.path()), fingerprint_of(backward.path()));
        }

        #[test]
        fn prop_fingerprint_detects_any_content_change(
            tree in tree_strategy(),
            pick in any::<prop::sample::Index>(),
            extra in any::<u8>(),
        ) {
            let home = TempDir::new().unwrap();
            let layout = SourceLayout::under(home.path());
            let entries: Vec<_> = tree.iter().collect();
            write_tree(&layout, &entries);
            let before = fingerprint_of(home.path());

            let (relative, content) = entries[pick.index(entries.len())];
            let mut changed = content.clone();
            changed.push(extra);
            fs::write(layout.config_dir.join(relative.as_str()), changed).unwrap();

            prop_assert_ne!(before, fingerprint_of(home.path()));
        }

        #[test]
        fn prop_archive_restores_every_file(tree in tree_strategy()) {
            let home = TempDir::new().unwrap();
            let layout = SourceLayout::under(home.path());
            let entries: Vec<_> = tree.iter().collect();
            write_tree(&layout, &entries);

            let blob = archive::build(&layout.sources(), None).unwrap();
            let dest = TempDir::new().unwrap();
            archive::extract(&blob, dest.path()).unwrap();

            for (relative, content) in &tree {
                let restored = fs::read(dest.path().join("config-dir").join(relative)).unwrap();
                prop_assert_eq!(&restored, content);
            }

            // Restoring the extracted tree elsewhere reproduces the fingerprint
            let other = TempDir::new().unwrap();
            let other_layout = SourceLayout::under(other.path());
            fs::create_dir_all(&other_layout.config_dir).unwrap();
            for entry in archive::list_entries(&blob).unwrap() {
                let from = dest.path().join(&entry.path);
                let to = other_layout.local_path(&entry.path).unwrap();
                if entry.is_dir {
                    fs::create_dir_all(to).unwrap();
                } else {
                    fs::create_dir_all(to.parent().unwrap()).unwrap();
                    fs::copy(&from, to).unwrap();
                }
            }
            prop_assert_eq!(fingerprint_of(home.path()), fingerprint_of(other.path()));
        }

        #[test]
        fn prop_decode_tolerates_line_wrapping(
            bytes in prop::collection::vec(any::<u8>(), 0..512),
            width in 1usize..100,
        ) {
            let encoded = transfer::encode(&ArchiveBlob::new(bytes.clone()));
            let wrapped: String = encoded
                .as_bytes()
                .chunks(width)
                .map(|chunk| std::str::from_utf8(chunk).unwrap())
                .collect::<Vec<_>>()
                .join("\n");
            let decoded = transfer::decode(&wrapped).unwrap();
            prop_assert_eq!(decoded.as_bytes(), bytes.as_slice());
        }

        #[test]
        fn prop_size_categories_are_monotonic(raw in 0u64..200 * 1024 * 1024) {
            let report = SizeReport::for_archive(raw);
            prop_assert_eq!(report.encoded_bytes, raw.div_ceil(3) * 4);
            if report.exceeds_web_interface_limit {
                prop_assert!(report.is_large);
            }
            if !report.within_limit {
                prop_assert!(report.exceeds_web_interface_limit);
            }
        }

        #[test]
        fn prop_valid_names_survive_parsing(name in "[a-z0-9]{1,10}(-[a-z0-9]{1,10}){0,3}") {
            let profile = ProfileName::new(name.clone()).unwrap();
            prop_assert_eq!(profile.as_str(), name.as_str());
            prop_assert!(transfer::entry_name(&profile).ends_with(".profile.b64"));
        }
    }
}
