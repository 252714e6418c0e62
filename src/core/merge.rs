//! Merge raw files from overlapping download locations.
//!
//! The same study is often downloaded more than once, so one user's stream
//! may live in several roots with partially overlapping contents. Merging
//! keeps one file per timestamp key: the largest copy on disk, the first
//! directory in input order on a tie. Output is sorted by key, which is
//! chronological order.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::error::{RegistryError, Result};
use super::timekey::{TimeWindow, TimestampKey};
use crate::cli::{AppContext, MergeArgs};
use crate::infra::config::load_config;
use crate::infra::walk::{DirWalker, check_dirs};

/// One raw data file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFileRef
{
    pub path: PathBuf,
    /// Passive stream name, survey id or audio id.
    pub stream: String,
    pub timestamp_key: TimestampKey,
    pub size_bytes: u64,
}

/// Files of one (user, stream), strictly increasing by timestamp key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MergedStream
{
    files: Vec<RawFileRef>,
}

impl MergedStream
{
    /// Build from arbitrary refs: sorted by key, and on a duplicated key the
    /// largest file (first seen on a tie) is kept.
    pub fn from_files(files: impl IntoIterator<Item = RawFileRef>) -> Self
    {
        let mut by_key: BTreeMap<TimestampKey, RawFileRef> = BTreeMap::new();
        for file in files
        {
            keep_largest(&mut by_key, file);
        }
        Self {
            files: by_key
                .into_values()
                .collect(),
        }
    }

    pub fn files(&self) -> &[RawFileRef]
    {
        &self.files
    }

    pub fn paths(&self) -> Vec<&Path>
    {
        self.files
            .iter()
            .map(|f| f.path.as_path())
            .collect()
    }

    pub fn first(&self) -> Option<&TimestampKey>
    {
        self.files
            .first()
            .map(|f| &f.timestamp_key)
    }

    pub fn last(&self) -> Option<&TimestampKey>
    {
        self.files
            .last()
            .map(|f| &f.timestamp_key)
    }

    pub fn len(&self) -> usize
    {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.files.is_empty()
    }

    pub fn total_bytes(&self) -> u64
    {
        self.files
            .iter()
            .map(|f| f.size_bytes)
            .sum()
    }
}

/// Insert `file` unless an equal-or-larger file already holds its key.
fn keep_largest(
    by_key: &mut BTreeMap<TimestampKey, RawFileRef>,
    file: RawFileRef,
)
{
    match by_key.entry(file.timestamp_key.clone())
    {
        Entry::Vacant(slot) =>
        {
            slot.insert(file);
        }
        Entry::Occupied(mut slot) =>
        {
            if file.size_bytes > slot.get().size_bytes
            {
                debug!(
                    key = %file.timestamp_key,
                    kept = %file.path.display(),
                    dropped = %slot.get().path.display(),
                    "duplicate key, keeping larger file"
                );
                slot.insert(file);
            }
            else
            {
                trace!(key = %file.timestamp_key, dropped = %file.path.display(), "duplicate key");
            }
        }
    }
}

/// Deduplicating merge over candidate directories.
#[derive(Debug, Clone)]
pub struct FileMerger<'w>
{
    walker: &'w DirWalker,
}

impl<'w> FileMerger<'w>
{
    pub fn new(walker: &'w DirWalker) -> Self
    {
        Self { walker }
    }

    /// Merge the files of `directories` into one stream labelled `stream`.
    ///
    /// Every directory must exist; callers filter candidates first (see
    /// `infra::walk::check_dirs`). Files whose name does not carry a
    /// timestamp key are skipped.
    pub fn merge(
        &self,
        stream: &str,
        directories: &[PathBuf],
        window: Option<&TimeWindow>,
    ) -> Result<MergedStream>
    {
        if directories.is_empty()
        {
            return Ok(MergedStream::default());
        }

        let mut by_key: BTreeMap<TimestampKey, RawFileRef> = BTreeMap::new();

        for dir in directories
        {
            if !dir.exists()
            {
                return Err(RegistryError::DirectoryNotFound(dir.clone()));
            }
            if !dir.is_dir()
            {
                return Err(RegistryError::NotADirectory(dir.clone()));
            }

            for entry in self
                .walker
                .list_files(dir)?
            {
                let key = match TimestampKey::from_file_name(&entry.name)
                {
                    Ok(key) => key,
                    Err(_) =>
                    {
                        debug!(path = %entry.path.display(), "no timestamp key in file name");
                        continue;
                    }
                };

                if window.is_some_and(|w| !w.contains(&key))
                {
                    continue;
                }

                keep_largest(
                    &mut by_key,
                    RawFileRef {
                        path: entry.path,
                        stream: stream.to_string(),
                        timestamp_key: key,
                        size_bytes: entry.size_bytes,
                    },
                );
            }
        }

        Ok(MergedStream {
            files: by_key
                .into_values()
                .collect(),
        })
    }

    /// Path-only form of `merge`.
    pub fn merge_paths(
        &self,
        directories: &[PathBuf],
        window: Option<&TimeWindow>,
    ) -> Result<Vec<PathBuf>>
    {
        Ok(self
            .merge("", directories, window)?
            .files
            .into_iter()
            .map(|f| f.path)
            .collect())
    }
}

/// `bwreg merge`: merge explicit directories and print the kept files.
pub fn run(
    args: MergeArgs,
    ctx: &AppContext,
) -> anyhow::Result<()>
{
    let config = load_config().unwrap_or_default();
    let window = args
        .window
        .resolve()?;
    let walker = DirWalker::new(&config.ignore_patterns)
        .context("invalid ignore patterns")?
        .with_follow_symlinks(config.follow_symlinks);

    let check = check_dirs(&args.dirs);
    if let Some(missing) = check
        .not_exist
        .iter()
        .chain(&check.not_dir)
        .next()
    {
        anyhow::bail!("not a directory: {}", missing.display());
    }

    let label = args
        .stream
        .clone()
        .unwrap_or_default();
    let merged = FileMerger::new(&walker)
        .merge(&label, &args.dirs, window.as_ref())
        .context("merging directories")?;

    if args.json
    {
        println!("{}", serde_json::to_string_pretty(&merged)?);
        return Ok(());
    }

    for path in merged.paths()
    {
        println!("{}", path.display());
    }
    if !ctx.quiet
    {
        eprintln!(
            "{} files, {} bytes, from {} directories",
            merged.len(),
            merged.total_bytes(),
            args.dirs.len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests
{
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn write_sized(
        dir: &Path,
        name: &str,
        size: usize,
    )
    {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(name), vec![b'x'; size]).unwrap();
    }

    #[test]
    fn empty_input_is_empty_output()
    {
        let walker = DirWalker::with_defaults().unwrap();
        let merged = FileMerger::new(&walker)
            .merge("gps", &[], None)
            .unwrap();
        assert!(merged.is_empty());
        assert_eq!(merged.first(), None);
        assert_eq!(merged.last(), None);
    }

    #[test]
    fn largest_file_wins()
    {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        write_sized(&a, "2020-01-01 00_00_00.csv", 10);
        write_sized(&b, "2020-01-01 00_00_00.csv", 20);

        let walker = DirWalker::with_defaults().unwrap();
        let paths = FileMerger::new(&walker)
            .merge_paths(&[a.clone(), b.clone()], None)
            .unwrap();

        assert_eq!(paths, vec![b.join("2020-01-01 00_00_00.csv")]);
    }

    #[test]
    fn equal_sizes_keep_first_directory()
    {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        write_sized(&a, "2020-01-01 00_00_00.csv", 7);
        write_sized(&b, "2020-01-01 00_00_00.csv", 7);

        let walker = DirWalker::with_defaults().unwrap();
        let merger = FileMerger::new(&walker);

        let ab = merger
            .merge_paths(&[a.clone(), b.clone()], None)
            .unwrap();
        let ba = merger
            .merge_paths(&[b.clone(), a.clone()], None)
            .unwrap();

        assert_eq!(ab, vec![a.join("2020-01-01 00_00_00.csv")]);
        assert_eq!(ba, vec![b.join("2020-01-01 00_00_00.csv")]);
    }

    #[test]
    fn output_is_chronological_across_directories()
    {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        write_sized(&a, "2020-01-02 00_00_00.csv", 1);
        write_sized(&b, "2020-01-01 00_00_00.csv", 1);

        let walker = DirWalker::with_defaults().unwrap();
        let merged = FileMerger::new(&walker)
            .merge("accelerometer", &[a.clone(), b.clone()], None)
            .unwrap();

        let keys: Vec<&str> = merged
            .files()
            .iter()
            .map(|f| f.timestamp_key.as_str())
            .collect();
        assert_eq!(keys, vec!["2020-01-01 00_00_00", "2020-01-02 00_00_00"]);
        assert_eq!(merged.first().unwrap().as_str(), "2020-01-01 00_00_00");
        assert_eq!(merged.last().unwrap().as_str(), "2020-01-02 00_00_00");
        assert!(merged.files().iter().all(|f| f.stream == "accelerometer"));
    }

    #[test]
    fn window_keeps_only_inner_files()
    {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a");
        write_sized(&a, "2020-01-01 00_00_00.csv", 1);
        write_sized(&a, "2020-01-05 00_00_00.csv", 1);
        write_sized(&a, "2020-01-10 00_00_00.csv", 1);

        let window = TimeWindow::parse("2020-01-02 00_00_00", "2020-01-09 00_00_00").unwrap();
        let walker = DirWalker::with_defaults().unwrap();
        let paths = FileMerger::new(&walker)
            .merge_paths(&[a.clone()], Some(&window))
            .unwrap();

        assert_eq!(paths, vec![a.join("2020-01-05 00_00_00.csv")]);
    }

    #[test]
    fn window_end_is_inclusive_regardless_of_extension()
    {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a");
        write_sized(&a, "2020-01-09 00_00_00.mp4", 1);

        let window = TimeWindow::parse("2020-01-02 00_00_00", "2020-01-09 00_00_00").unwrap();
        let walker = DirWalker::with_defaults().unwrap();
        let paths = FileMerger::new(&walker)
            .merge_paths(&[a.clone()], Some(&window))
            .unwrap();

        assert_eq!(paths.len(), 1);
    }

    #[test]
    fn mixed_extensions_share_one_key()
    {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a");
        write_sized(&a, "2020-01-01 00_00_00.csv", 3);
        write_sized(&a, "2020-01-01 00_00_00.json", 9);

        let walker = DirWalker::with_defaults().unwrap();
        let merged = FileMerger::new(&walker)
            .merge("gps", &[a.clone()], None)
            .unwrap();

        assert_eq!(merged.len(), 1);
        assert_eq!(merged.files()[0].size_bytes, 9);
    }

    #[test]
    fn skips_junk_and_non_conforming_names()
    {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a");
        write_sized(&a, "2020-01-01 00_00_00.csv", 1);
        write_sized(&a, ".DS_Store", 1);
        write_sized(&a, "notes.txt", 1);

        let walker = DirWalker::with_defaults().unwrap();
        let merged = FileMerger::new(&walker)
            .merge("gps", &[a], None)
            .unwrap();
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn missing_directory_is_reported()
    {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nope");
        let file = tmp.path().join("file.csv");
        fs::write(&file, "x").unwrap();

        let walker = DirWalker::with_defaults().unwrap();
        let merger = FileMerger::new(&walker);

        assert!(matches!(
            merger.merge("gps", &[missing], None),
            Err(RegistryError::DirectoryNotFound(_))
        ));
        assert!(matches!(
            merger.merge("gps", &[file], None),
            Err(RegistryError::NotADirectory(_))
        ));
    }

    #[test]
    fn from_files_sorts_and_dedups()
    {
        let key = |s: &str| TimestampKey::parse(s).unwrap();
        let file = |p: &str, k: &str, n: u64| RawFileRef {
            path: PathBuf::from(p),
            stream: "gps".into(),
            timestamp_key: key(k),
            size_bytes: n,
        };

        let merged = MergedStream::from_files([
            file("b", "2020-01-02 00_00_00", 1),
            file("a1", "2020-01-01 00_00_00", 5),
            file("a2", "2020-01-01 00_00_00", 8),
        ]);

        let paths: Vec<&Path> = merged.paths();
        assert_eq!(paths, vec![Path::new("a2"), Path::new("b")]);
        assert_eq!(merged.total_bytes(), 9);
    }
}
