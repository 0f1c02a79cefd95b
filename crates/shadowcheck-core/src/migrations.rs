//! Migration file loading and the migrations-hash (C3).
//!
//! Migration files live in a flat directory and match `V<n>__<desc>.sql`.
//! Unlike `dibs::migrate`'s Rust-function migrations, these are plain SQL
//! files enumerated by `std::fs::read_dir`, sorted lexicographically (the
//! loading discipline here is grounded on
//! `robert-sjoblom-pg-migration-lint::input::sql::SqlLoader`), and replayed
//! in order by [`crate::shadow_db`].

use crate::error::MigrationError;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

static MIGRATION_FILE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^V(\d+)__(.+)\.sql$").expect("static regex is valid"));

/// A single loaded migration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    /// The `<n>` in `V<n>__<desc>.sql`; also the Flyway-style `installed_rank`.
    pub rank: u64,
    /// `<desc>` with underscores replaced by spaces.
    pub description: String,
    pub path: PathBuf,
    pub contents: String,
}

/// Enumerate migration files in `dir`, sorted by rank, and check for gaps.
///
/// Any file that isn't a `.sql` file matching `V<n>__<desc>.sql` is silently
/// skipped rather than treated as an error — a migrations directory commonly
/// holds incidental files (a README, `.gitkeep`, editor swap files) that
/// aren't migrations at all. [`MigrationError::BadFileName`] is reserved for
/// a file that *does* match the naming convention but whose `<n>` doesn't
/// fit a `u64` (rank overflow). [`MigrationError::RankGap`] /
/// [`MigrationError::DuplicateRank`] fire if the ranks of the files that did
/// match aren't exactly `1, 2, 3, ...` once sorted.
pub fn load_migrations(dir: &Path) -> Result<Vec<MigrationFile>, MigrationError> {
    let mut entries =
        std::fs::read_dir(dir).map_err(|source| MigrationError::ReadDir {
            dir: dir.display().to_string(),
            source,
        })?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next().transpose().map_err(|source| MigrationError::ReadDir {
        dir: dir.display().to_string(),
        source,
    })? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let Some(caps) = MIGRATION_FILE_NAME.captures(&name) else {
            continue;
        };
        let rank: u64 = caps[1]
            .parse()
            .map_err(|_| MigrationError::BadFileName { name: name.clone() })?;
        let description = caps[2].replace('_', " ");
        let contents = std::fs::read_to_string(&path).map_err(|source| MigrationError::ReadDir {
            dir: path.display().to_string(),
            source,
        })?;

        files.push(MigrationFile {
            rank,
            description,
            path,
            contents,
        });
    }

    // Stable lexicographic sort by file name first (so a tie on rank is
    // reported deterministically), then the numeric rank is what actually
    // governs replay order and gap detection.
    files.sort_by(|a, b| a.path.file_name().cmp(&b.path.file_name()));
    files.sort_by_key(|f| f.rank);

    check_rank_sequence(&files)?;

    Ok(files)
}

fn check_rank_sequence(files: &[MigrationFile]) -> Result<(), MigrationError> {
    let mut expected = 1u64;
    for file in files {
        match file.rank.cmp(&expected) {
            std::cmp::Ordering::Less => {
                // A duplicate rank: same number as a file we already accepted.
                return Err(MigrationError::DuplicateRank {
                    rank: file.rank,
                    first: format!("rank {}", file.rank),
                    second: file.path.display().to_string(),
                });
            }
            std::cmp::Ordering::Greater => {
                return Err(MigrationError::RankGap {
                    expected,
                    found: file.rank,
                });
            }
            std::cmp::Ordering::Equal => {
                expected += 1;
            }
        }
    }
    Ok(())
}

/// Content hash over the sorted migration file set: sha256 of each file's
/// contents concatenated in sorted order. File names are not hashed
/// directly, but the order they're hashed in is derived from them.
pub fn migrations_hash(files: &[MigrationFile]) -> String {
    let mut hasher = Sha256::new();
    for file in files {
        hasher.update(file.contents.as_bytes());
    }
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn loads_and_sorts_migrations() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "V2__add_index.sql", "CREATE INDEX");
        write(tmp.path(), "V1__create_table.sql", "CREATE TABLE");
        write(tmp.path(), "README.md", "not a migration");

        let files = load_migrations(tmp.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].rank, 1);
        assert_eq!(files[0].description, "create table");
        assert_eq!(files[1].rank, 2);
        assert_eq!(files[1].description, "add index");
    }

    #[test]
    fn detects_rank_gap() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "V1__init.sql", "CREATE TABLE");
        write(tmp.path(), "V3__later.sql", "ALTER TABLE");

        let err = load_migrations(tmp.path()).unwrap_err();
        match err {
            MigrationError::RankGap { expected, found } => {
                assert_eq!(expected, 2);
                assert_eq!(found, 3);
            }
            other => panic!("expected RankGap, got {other:?}"),
        }
    }

    #[test]
    fn migrations_hash_is_stable_and_order_sensitive() {
        let a = vec![
            MigrationFile {
                rank: 1,
                description: "a".into(),
                path: "V1__a.sql".into(),
                contents: "create table a()".into(),
            },
            MigrationFile {
                rank: 2,
                description: "b".into(),
                path: "V2__b.sql".into(),
                contents: "create table b()".into(),
            },
        ];
        let mut b = a.clone();
        b.reverse();

        assert_eq!(migrations_hash(&a), migrations_hash(&a));
        assert_ne!(migrations_hash(&a), migrations_hash(&b));
    }

    #[test]
    fn rejects_files_not_matching_naming_convention_by_skipping_them() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "V1__init.sql", "CREATE TABLE");
        write(tmp.path(), "notes.txt", "ignored");

        let files = load_migrations(tmp.path()).unwrap();
        assert_eq!(files.len(), 1);
    }
}
