//! Filepath: src/infra/walk.rs
//! Directory scanning for raw data trees.
//! - Extra ignore globs matched on basenames (".DS_Store", "._*", ...)
//! - Optional following of symlinks and max depth for discovery walks
//! - Non-recursive listing of data files with their on-disk size
//! - Deterministic ordering for stable registries and tests
//!
//! Backed by ripgrep's `ignore` crate (with every ignore-file filter turned
//! off, raw exports are not git repositories) and `globset`.

use std::fs;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use tracing::{debug, warn};

use crate::core::error::{RegistryError, Result};

/// Glob patterns for entries that are never data, used when the
/// configuration does not supply its own.
pub const DEFAULT_IGNORES: &[&str] = &[".DS_Store", "Thumbs.db", "._*", "desktop.ini"];

/// A regular file found directly inside a data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry
{
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Scanner over raw data roots with extra ignore globs.
#[derive(Debug, Clone)]
pub struct DirWalker
{
    /// Compiled set of additional ignore patterns (matched on basenames)
    ignore_patterns: GlobSet,

    /// Follow symbolic links; default false
    follow_symlinks: bool,

    /// Maximum recursion depth for `walk_dirs`; default None (unbounded)
    max_depth: Option<usize>,
}

impl DirWalker
{
    /// Build a walker with additional ignore patterns (e.g. ".DS_Store", "._*").
    pub fn new(additional_ignores: &[String]) -> Result<Self>
    {
        let mut builder = GlobSetBuilder::new();

        for pattern in additional_ignores
        {
            builder.add(Glob::new(pattern)?);
        }

        Ok(Self {
            ignore_patterns: builder.build()?,
            follow_symlinks: false,
            max_depth: None,
        })
    }

    /// Walker with `DEFAULT_IGNORES`.
    pub fn with_defaults() -> Result<Self>
    {
        let patterns: Vec<String> = DEFAULT_IGNORES
            .iter()
            .map(|p| p.to_string())
            .collect();
        Self::new(&patterns)
    }

    /// (Optional) Follow or skip symbolic links (default false).
    pub fn with_follow_symlinks(
        mut self,
        follow: bool,
    ) -> Self
    {
        self.follow_symlinks = follow;
        self
    }

    /// (Optional) Limit recursion depth of `walk_dirs` (`None` = unbounded).
    pub fn with_max_depth(
        mut self,
        depth: Option<usize>,
    ) -> Self
    {
        self.max_depth = depth;
        self
    }

    /// True if the basename of `path` matches an ignore pattern.
    pub fn is_ignored(
        &self,
        path: &Path,
    ) -> bool
    {
        path.file_name()
            .is_some_and(|name| {
                self.ignore_patterns
                    .is_match(Path::new(name))
            })
    }

    /// Internal: construct a configured WalkBuilder for `root`.
    fn build_walk(
        &self,
        root: &Path,
    ) -> WalkBuilder
    {
        let mut b = WalkBuilder::new(root);

        // No .gitignore/.ignore/hidden handling; a raw export is plain data.
        b.standard_filters(false);

        b.follow_links(self.follow_symlinks);
        b.max_depth(self.max_depth);

        // Prune ignored entries early.
        let extra = self
            .ignore_patterns
            .clone();
        b.filter_entry(move |ent| {
            !extra.is_match(Path::new(ent.file_name()))
        });

        b
    }

    /// All directories below `root` (excluding `root` itself), sorted.
    ///
    /// `root` must be readable; errors deeper in the tree are logged and
    /// the offending entry is skipped.
    pub fn walk_dirs<P: AsRef<Path>>(
        &self,
        root: P,
    ) -> Result<Vec<PathBuf>>
    {
        let root_path = root.as_ref();
        fs::read_dir(root_path).map_err(|e| RegistryError::io(root_path, e))?;

        let mut out: Vec<PathBuf> = self
            .build_walk(root_path)
            .build()
            .filter_map(|res| match res
            {
                Ok(entry) => Some(entry),
                Err(err) =>
                {
                    warn!(root = %root_path.display(), error = %err, "skipping unreadable entry");
                    None
                }
            })
            .filter(|entry| entry.depth() > 0)
            .filter(|entry| {
                entry
                    .file_type()
                    .is_some_and(|ft| ft.is_dir())
            })
            .map(|entry| entry.into_path())
            .collect();

        // Deterministic order
        out.sort();

        Ok(out)
    }

    /// Regular files directly inside `dir`, sorted by name.
    pub fn list_files(
        &self,
        dir: &Path,
    ) -> Result<Vec<FileEntry>>
    {
        let mut out = Vec::new();

        for entry in fs::read_dir(dir).map_err(|e| RegistryError::io(dir, e))?
        {
            let entry = entry.map_err(|e| RegistryError::io(dir, e))?;
            let path = entry.path();

            if self.is_ignored(&path)
            {
                debug!(path = %path.display(), "ignored by pattern");
                continue;
            }

            // Symlinked files count only when links are followed
            let stat = if self.follow_symlinks
            {
                fs::metadata(&path)
            }
            else
            {
                fs::symlink_metadata(&path)
            };
            let meta = match stat
            {
                Ok(meta) => meta,
                Err(err) =>
                {
                    warn!(path = %path.display(), error = %err, "cannot stat file");
                    continue;
                }
            };
            if !meta.is_file()
            {
                continue;
            }

            let Some(name) = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
            else
            {
                warn!(path = %path.display(), "skipping non UTF-8 file name");
                continue;
            };

            out.push(FileEntry {
                name,
                path,
                size_bytes: meta.len(),
            });
        }

        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Names of the subdirectories directly inside `dir`, sorted.
    pub fn list_subdirs(
        &self,
        dir: &Path,
    ) -> Result<Vec<String>>
    {
        let mut out = Vec::new();

        for entry in fs::read_dir(dir).map_err(|e| RegistryError::io(dir, e))?
        {
            let entry = entry.map_err(|e| RegistryError::io(dir, e))?;
            let path = entry.path();

            if self.is_ignored(&path) || !path.is_dir()
            {
                continue;
            }
            if let Some(name) = path
                .file_name()
                .and_then(|n| n.to_str())
            {
                out.push(name.to_string());
            }
        }

        out.sort();
        Ok(out)
    }
}

/// Candidate directories sorted by state, input order preserved.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DirCheck
{
    pub not_exist: Vec<PathBuf>,
    pub not_dir: Vec<PathBuf>,
    pub empty: Vec<PathBuf>,
    pub not_empty: Vec<PathBuf>,
}

/// Classify candidate directories. Never fails; unreadable directories
/// count as not existing and are logged.
pub fn check_dirs<I, P>(candidates: I) -> DirCheck
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut check = DirCheck::default();

    for candidate in candidates
    {
        let path = candidate
            .as_ref()
            .to_path_buf();

        if !path.exists()
        {
            check.not_exist.push(path);
        }
        else if !path.is_dir()
        {
            check.not_dir.push(path);
        }
        else
        {
            match fs::read_dir(&path)
            {
                Ok(mut entries) =>
                {
                    if entries.next().is_some()
                    {
                        check.not_empty.push(path);
                    }
                    else
                    {
                        check.empty.push(path);
                    }
                }
                Err(err) =>
                {
                    warn!(path = %path.display(), error = %err, "unreadable directory");
                    check.not_exist.push(path);
                }
            }
        }
    }

    check
}
