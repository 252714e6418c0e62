//! Project-wide registry: one `UserRegistry` per user plus the cross-user
//! lists, dictionaries and flags that document a study download.
//!
//! Users are built independently. A user whose build fails is recorded in
//! `flags.failed_users` and left out of `data`; the run always continues.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::device::{DeviceOs, OsPolicy};
use super::error::{RegistryError, Result};
use super::report::{UserSummary, render_project, write_user_summary};
use super::timekey::{KeyRange, TimeWindow, TimestampKey};
use super::user::{BuildOptions, UserRegistry, UserRegistryBuilder};
use crate::cli::{AppContext, RegistryArgs};
use crate::infra::config::{load_config, resolve_roots};
use crate::infra::walk::{DirWalker, check_dirs};

pub const PROJECT_FILE: &str = "project.json";
pub const REGISTRIES_DIR: &str = "registries";
pub const IDENTIFIERS_DIR: &str = "identifiers";
pub const USER_SUMMARY_FILE: &str = "user_summary.csv";

/// Which users to build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum UserSelection
{
    #[default]
    All,
    Only(Vec<String>),
}

/// A value given for every user, per user, or not at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment<T>
{
    None,
    All(T),
    PerUser(BTreeMap<String, T>),
}

impl<T> Default for Assignment<T>
{
    fn default() -> Self
    {
        Assignment::None
    }
}

impl<T: Clone> Assignment<T>
{
    /// A command-line value applies to everyone; otherwise fall back to a
    /// per-user table, if it has entries.
    pub fn resolve(
        everyone: Option<T>,
        per_user: &BTreeMap<String, T>,
    ) -> Self
    {
        match everyone
        {
            Some(value) => Assignment::All(value),
            None if per_user.is_empty() => Assignment::None,
            None => Assignment::PerUser(per_user.clone()),
        }
    }
}

impl<T> Assignment<T>
{
    pub fn for_user(
        &self,
        user_id: &str,
    ) -> Option<&T>
    {
        match self
        {
            Assignment::None => None,
            Assignment::All(value) => Some(value),
            Assignment::PerUser(map) => map.get(user_id),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProjectOptions
{
    pub users: UserSelection,
    pub configuration: Assignment<PathBuf>,
    pub time_window: Assignment<TimeWindow>,
    /// Build users on the rayon pool.
    pub parallel: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectLists
{
    #[serde(rename = "iOS_users")]
    pub ios_users: Vec<String>,
    #[serde(rename = "Android_users")]
    pub android_users: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDictionaries
{
    pub default_name: BTreeMap<String, String>,
    pub os: BTreeMap<String, Option<DeviceOs>>,
    pub configuration: BTreeMap<String, Option<PathBuf>>,
    #[serde(rename = "UTC_range")]
    pub utc_range: BTreeMap<String, Option<TimeWindow>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectFlags
{
    /// Requested ids with no directory in any root.
    pub ignored_users: Vec<String>,
    /// Ids present in the roots but not requested.
    pub unrequested_users: Vec<String>,
    /// user id -> reason
    pub failed_users: BTreeMap<String, String>,
    /// Users with nothing registered besides identifiers.
    pub without_data: Vec<String>,
    pub irregular_directories: Vec<String>,
    pub multiple_devices: Vec<String>,
    pub multiple_os: Vec<String>,
}

impl ProjectFlags
{
    pub fn is_clean(&self) -> bool
    {
        *self == ProjectFlags::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectRegistry
{
    pub raw_roots: Vec<PathBuf>,
    /// Built users ordered by first observation; users without data last.
    pub ids: Vec<String>,
    #[serde(skip)]
    pub data: BTreeMap<String, UserRegistry>,
    pub first: Option<TimestampKey>,
    pub last: Option<TimestampKey>,
    pub lists: ProjectLists,
    pub passive: BTreeSet<String>,
    pub surveys: BTreeSet<String>,
    pub audio: BTreeSet<String>,
    pub dictionaries: ProjectDictionaries,
    pub flags: ProjectFlags,
}

impl ProjectRegistry
{
    /// Derive ids, ranges, lists and dictionaries from `data`. Build-time
    /// flags (`ignored_users`, `unrequested_users`, `failed_users`) are kept.
    pub fn summarize(&mut self)
    {
        let mut ids: Vec<&UserRegistry> = self
            .data
            .values()
            .collect();
        ids.sort_by(|a, b| match (&a.first, &b.first)
        {
            (Some(x), Some(y)) => x
                .cmp(y)
                .then_with(|| a.user_id.cmp(&b.user_id)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.user_id.cmp(&b.user_id),
        });
        self.ids = ids
            .iter()
            .map(|u| u.user_id.clone())
            .collect();

        let width = self.ids.len().to_string().len();
        let mut range = KeyRange::default();
        let mut lists = ProjectLists::default();
        let mut dictionaries = ProjectDictionaries::default();
        let mut passive = BTreeSet::new();
        let mut surveys = BTreeSet::new();
        let mut audio = BTreeSet::new();
        let mut flags = ProjectFlags {
            ignored_users: std::mem::take(&mut self.flags.ignored_users),
            unrequested_users: std::mem::take(&mut self.flags.unrequested_users),
            failed_users: std::mem::take(&mut self.flags.failed_users),
            ..ProjectFlags::default()
        };

        for (n, user) in ids.iter().enumerate()
        {
            let id = &user.user_id;
            range.include(&user.range());

            dictionaries
                .default_name
                .insert(id.clone(), format!("Participant {:0width$}", n + 1));
            let os = user
                .device
                .as_ref()
                .and_then(|d| d.os.clone());
            match os
            {
                Some(DeviceOs::Ios) => lists.ios_users.push(id.clone()),
                Some(DeviceOs::Android) => lists.android_users.push(id.clone()),
                Some(DeviceOs::Both) =>
                {
                    lists.ios_users.push(id.clone());
                    lists.android_users.push(id.clone());
                }
                _ => {}
            }
            dictionaries.os.insert(id.clone(), os);
            dictionaries
                .configuration
                .insert(id.clone(), user.configuration.clone());
            dictionaries
                .utc_range
                .insert(id.clone(), user.utc_range.clone());

            passive.extend(user.passive.keys().cloned());
            surveys.extend(user.surveys.keys().cloned());
            audio.extend(user.audio.keys().cloned());

            if !user.has_data()
            {
                flags.without_data.push(id.clone());
            }
            if !user.irregular_directories.is_empty()
            {
                flags.irregular_directories.push(id.clone());
            }
            if let Some(device) = &user.device
            {
                if device.has_multiple_devices()
                {
                    flags.multiple_devices.push(id.clone());
                }
                if device.has_multiple_os()
                {
                    flags.multiple_os.push(id.clone());
                }
            }
        }

        self.first = range.first;
        self.last = range.last;
        self.lists = lists;
        self.dictionaries = dictionaries;
        self.passive = passive;
        self.surveys = surveys;
        self.audio = audio;
        self.flags = flags;
    }

    /// Users in `ids` order.
    pub fn users(&self) -> impl Iterator<Item = &UserRegistry>
    {
        self.ids
            .iter()
            .filter_map(|id| self.data.get(id))
    }

    pub fn summaries(&self) -> Vec<UserSummary>
    {
        self.users()
            .map(|u| {
                UserSummary::from_registry(
                    u,
                    self.dictionaries
                        .default_name
                        .get(&u.user_id)
                        .map(String::as_str),
                )
            })
            .collect()
    }

    /// Write `{directory}/{name}/` with the project file, one registry and
    /// one identifiers CSV per user, and the user summary. Overwrites.
    pub fn export(
        &self,
        directory: &Path,
        name: &str,
    ) -> Result<PathBuf>
    {
        let root = directory.join(name);
        let registries = root.join(REGISTRIES_DIR);
        let identifiers = root.join(IDENTIFIERS_DIR);
        for dir in [&root, &registries, &identifiers]
        {
            fs::create_dir_all(dir).map_err(|e| RegistryError::io(dir, e))?;
        }

        let project_file = root.join(PROJECT_FILE);
        fs::write(&project_file, serde_json::to_string_pretty(self)?)
            .map_err(|e| RegistryError::io(&project_file, e))?;

        for user in self.users()
        {
            user.export(&registries)?;
            if let Some(device) = &user.device
            {
                device.export_csv(&user.user_id, &identifiers)?;
            }
        }

        write_user_summary(&root.join(USER_SUMMARY_FILE), &self.summaries())?;
        info!(path = %root.display(), users = self.ids.len(), "project exported");
        Ok(root)
    }

    /// Read a directory written by `export`.
    pub fn load(
        directory: &Path,
        policy: &OsPolicy,
    ) -> Result<Self>
    {
        let project_file = directory.join(PROJECT_FILE);
        let text = fs::read_to_string(&project_file).map_err(|e| RegistryError::io(&project_file, e))?;
        let mut project: ProjectRegistry = serde_json::from_str(&text)?;

        let registries = directory.join(REGISTRIES_DIR);
        for id in &project.ids
        {
            let path = registries.join(format!("{id}_registry.json"));
            let user = UserRegistry::load(&path, policy)?;
            project
                .data
                .insert(id.clone(), user);
        }
        Ok(project)
    }
}

/// Builds a `ProjectRegistry` over a set of raw roots.
pub struct ProjectRegistryBuilder
{
    user_builder: UserRegistryBuilder,
    options: ProjectOptions,
    progress: ProgressBar,
}

impl ProjectRegistryBuilder
{
    pub fn new(
        user_builder: UserRegistryBuilder,
        options: ProjectOptions,
    ) -> Self
    {
        Self {
            user_builder,
            options,
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(
        mut self,
        progress: ProgressBar,
    ) -> Self
    {
        self.progress = progress;
        self
    }

    /// Build every selected user found in `raw_roots`.
    ///
    /// Fails only when none of the roots is an existing directory.
    #[instrument(skip_all, fields(roots = raw_roots.len()))]
    pub fn build(
        &self,
        raw_roots: &[PathBuf],
    ) -> Result<ProjectRegistry>
    {
        let check = check_dirs(raw_roots);
        for path in check
            .not_exist
            .iter()
            .chain(&check.not_dir)
        {
            warn!(path = %path.display(), "raw root is not a directory, skipping");
        }
        let roots: Vec<PathBuf> = raw_roots
            .iter()
            .filter(|r| r.is_dir())
            .cloned()
            .collect();
        if roots.is_empty()
        {
            return Err(RegistryError::NoRawRoots(raw_roots.to_vec()));
        }

        let discovered = self.discover_ids(&roots);
        let mut flags = ProjectFlags::default();
        let ids: Vec<String> = match &self.options.users
        {
            UserSelection::All => discovered
                .iter()
                .cloned()
                .collect(),
            UserSelection::Only(requested) =>
            {
                let requested: BTreeSet<&String> = requested.iter().collect();
                for id in &requested
                {
                    if !discovered.contains(*id)
                    {
                        warn!(user_id = %id, "requested user not found in any root");
                        flags
                            .ignored_users
                            .push((*id).clone());
                    }
                }
                flags.unrequested_users = discovered
                    .iter()
                    .filter(|id| !requested.contains(id))
                    .cloned()
                    .collect();
                requested
                    .into_iter()
                    .filter(|id| discovered.contains(*id))
                    .cloned()
                    .collect()
            }
        };

        self.progress
            .set_length(ids.len() as u64);
        let outcomes: Vec<(String, Result<UserRegistry>)> = if self.options.parallel
        {
            ids.par_iter()
                .map(|id| (id.clone(), self.build_user(id, &roots)))
                .collect()
        }
        else
        {
            ids.iter()
                .map(|id| (id.clone(), self.build_user(id, &roots)))
                .collect()
        };
        self.progress
            .finish_and_clear();

        let mut project = ProjectRegistry {
            raw_roots: roots,
            ..ProjectRegistry::default()
        };
        for (id, outcome) in outcomes
        {
            match outcome
            {
                Ok(user) =>
                {
                    project
                        .data
                        .insert(id, user);
                }
                Err(err) =>
                {
                    let failure = RegistryError::UserBuildFailure {
                        user_id: id.clone(),
                        reason: err.to_string(),
                    };
                    warn!(error = %failure, "user excluded from project");
                    flags
                        .failed_users
                        .insert(id, err.to_string());
                }
            }
        }

        project.flags = flags;
        project.summarize();
        info!(built = project.data.len(), requested = ids.len(), "project registry built");
        Ok(project)
    }

    fn build_user(
        &self,
        user_id: &str,
        roots: &[PathBuf],
    ) -> Result<UserRegistry>
    {
        let result = self.user_builder.build(
            user_id,
            roots,
            self.options
                .time_window
                .for_user(user_id),
            self.options
                .configuration
                .for_user(user_id)
                .map(PathBuf::as_path),
        );
        self.progress.inc(1);
        self.progress
            .set_message(user_id.to_string());
        result
    }

    /// Union of top-level directory names across roots.
    fn discover_ids(
        &self,
        roots: &[PathBuf],
    ) -> BTreeSet<String>
    {
        let mut ids = BTreeSet::new();
        for root in roots
        {
            match self
                .user_builder
                .walker()
                .list_subdirs(root)
            {
                Ok(names) => ids.extend(names),
                Err(err) => warn!(root = %root.display(), error = %err, "cannot list raw root"),
            }
        }
        ids
    }
}

/// `bwreg registry`: build, export and summarize a project.
pub fn run(
    args: RegistryArgs,
    ctx: &AppContext,
) -> anyhow::Result<()>
{
    let config = load_config().unwrap_or_default();
    let roots = resolve_roots(&args.roots, &config);
    let window = args
        .window
        .resolve()?;
    let name = args
        .name
        .clone()
        .unwrap_or_else(|| config.project_name.clone());
    let out_dir = args
        .out
        .clone()
        .or_else(|| config.output_dir.clone());

    if ctx.dry_run
    {
        if !ctx.quiet
        {
            println!("{}", "DRY RUN: would build registry from:".yellow());
            for root in &roots
            {
                println!("  {}", root.display());
            }
            if let Some(out) = &out_dir
            {
                println!("{}", format!("Would write {}", out.join(&name).display()).yellow());
            }
        }
        return Ok(());
    }

    let walker = DirWalker::new(&config.ignore_patterns)
        .context("invalid ignore patterns")?
        .with_follow_symlinks(config.follow_symlinks);
    let include_streams = if args.include.is_empty()
    {
        config.include_streams.clone()
    }
    else
    {
        Some(args.include.clone())
    };
    let user_builder = UserRegistryBuilder::new(
        walker,
        BuildOptions {
            include_streams,
            os_policy: OsPolicy {
                aliases: config.os_aliases.clone(),
            },
        },
    );

    let options = ProjectOptions {
        users: if args.users.is_empty()
        {
            UserSelection::All
        }
        else
        {
            UserSelection::Only(args.users.clone())
        },
        configuration: Assignment::resolve(args.configuration.clone(), &config.configurations),
        time_window: Assignment::resolve(window, &config.utc_ranges),
        parallel: args.parallel || config.parallel,
    };

    let progress = if ctx.quiet || args.json
    {
        ProgressBar::hidden()
    }
    else
    {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb
    };

    let project = ProjectRegistryBuilder::new(user_builder, options)
        .with_progress(progress)
        .build(&roots)
        .context("building project registry")?;

    if let Some(out) = &out_dir
    {
        let path = project
            .export(out, &name)
            .with_context(|| format!("exporting registry to {}", out.display()))?;
        if !ctx.quiet && !args.json
        {
            println!("{} Wrote registry to {}", "✓".green(), path.display());
        }
    }

    if args.json
    {
        println!("{}", serde_json::to_string_pretty(&project)?);
    }
    else if !ctx.quiet
    {
        println!("{}", render_project(&project, ctx.no_color));
    }

    Ok(())
}
