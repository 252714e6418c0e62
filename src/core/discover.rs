//! Discover which streams, surveys and audio prompts a user has.
//!
//! Nothing is hardcoded: every root is walked two levels below
//! `{root}/{user}` and directory names are classified by their position
//! relative to the user directory.
//!
//! - level 1, name containing `survey` or `audio`: a container
//! - level 1, anything else: a passive stream
//! - level 2 under an `audio` container: an audio id
//! - level 2 under a `survey` container: a survey id
//!
//! Loose files directly inside a container are irregular; they are
//! reported per root and never merged.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::error::{RegistryError, Result};
use super::registrar::{AUDIO_RECORDINGS, SURVEY_ANSWERS, SURVEY_TIMINGS};
use crate::infra::walk::DirWalker;

/// Everything found for one user across all roots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserInventory
{
    pub passive: BTreeSet<String>,
    pub surveys: BTreeSet<String>,
    pub audio: BTreeSet<String>,
    /// Containers holding loose files, one entry per root.
    pub irregular_directories: Vec<PathBuf>,
    /// The loose files themselves.
    pub not_registered: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container
{
    Survey,
    Audio,
}

fn container_kind(name: &str) -> Option<Container>
{
    if name.contains("audio")
    {
        Some(Container::Audio)
    }
    else if name.contains("survey")
    {
        Some(Container::Survey)
    }
    else
    {
        None
    }
}

fn is_generic_name(
    name: &str,
    user_id: &str,
) -> bool
{
    name == user_id || [SURVEY_ANSWERS, SURVEY_TIMINGS, AUDIO_RECORDINGS].contains(&name)
}

/// Walk `{root}/{user_id}` in every root and classify what is there.
///
/// Roots without this user are skipped. A user path that exists but is not
/// a readable directory fails the whole discovery.
pub fn discover_user(
    walker: &DirWalker,
    user_id: &str,
    raw_roots: &[PathBuf],
) -> Result<UserInventory>
{
    let mut inventory = UserInventory::default();
    let depth_two = walker
        .clone()
        .with_max_depth(Some(2));

    for root in raw_roots
    {
        let user_dir = root.join(user_id);
        if !user_dir.exists()
        {
            debug!(root = %root.display(), user_id, "user absent from root");
            continue;
        }
        if !user_dir.is_dir()
        {
            return Err(RegistryError::NotADirectory(user_dir));
        }

        for dir in depth_two.walk_dirs(&user_dir)?
        {
            classify(&mut inventory, user_id, &user_dir, &dir);
        }

        collect_irregular(&mut inventory, walker, &user_dir);
    }

    Ok(inventory)
}

fn classify(
    inventory: &mut UserInventory,
    user_id: &str,
    user_dir: &Path,
    dir: &Path,
)
{
    let Ok(rel) = dir.strip_prefix(user_dir)
    else
    {
        return;
    };
    let parts: Vec<&str> = rel
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect();

    match parts.as_slice()
    {
        [name] =>
        {
            if container_kind(name).is_none() && !is_generic_name(name, user_id)
            {
                inventory
                    .passive
                    .insert(name.to_string());
            }
        }
        [container, id] =>
        {
            if is_generic_name(id, user_id)
            {
                return;
            }
            match container_kind(container)
            {
                Some(Container::Audio) =>
                {
                    inventory
                        .audio
                        .insert(id.to_string());
                }
                Some(Container::Survey) =>
                {
                    inventory
                        .surveys
                        .insert(id.to_string());
                }
                None => debug!(dir = %dir.display(), "nested directory inside passive stream"),
            }
        }
        _ => {}
    }
}

/// Record loose files sitting directly in survey/audio containers.
fn collect_irregular(
    inventory: &mut UserInventory,
    walker: &DirWalker,
    user_dir: &Path,
)
{
    let containers = match walker.list_subdirs(user_dir)
    {
        Ok(names) => names,
        Err(err) =>
        {
            warn!(dir = %user_dir.display(), error = %err, "cannot list user directory");
            return;
        }
    };

    for name in containers
        .iter()
        .filter(|n| container_kind(n).is_some())
    {
        let container = user_dir.join(name);
        match walker.list_files(&container)
        {
            Ok(files) if !files.is_empty() =>
            {
                warn!(
                    dir = %container.display(),
                    files = files.len(),
                    "irregular directory: raw files outside an id folder"
                );
                inventory
                    .irregular_directories
                    .push(container);
                inventory
                    .not_registered
                    .extend(files.into_iter().map(|f| f.path));
            }
            Ok(_) => {}
            Err(err) => warn!(dir = %container.display(), error = %err, "cannot list container"),
        }
    }
}
