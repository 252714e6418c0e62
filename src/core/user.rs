//! One user's registry: every merged stream, survey and audio prompt, the
//! overall first/last observation and whatever could not be registered.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::device::{DeviceInfo, OsPolicy};
use super::discover::discover_user;
use super::error::{RegistryError, Result};
use super::merge::MergedStream;
use super::registrar::{IDENTIFIERS, Registrar, SurveyStreams};
use super::timekey::{KeyRange, TimeWindow, TimestampKey};
use crate::cli::{AppContext, UserArgs};
use crate::infra::config::{load_config, resolve_roots};
use crate::infra::walk::DirWalker;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserRegistry
{
    pub user_id: String,
    pub first: Option<TimestampKey>,
    pub last: Option<TimestampKey>,
    pub passive: BTreeMap<String, MergedStream>,
    pub surveys: BTreeMap<String, SurveyStreams>,
    pub audio: BTreeMap<String, MergedStream>,
    #[serde(rename = "UTC_range")]
    pub utc_range: Option<TimeWindow>,
    /// Loose files found in survey/audio containers.
    pub not_registered: Vec<PathBuf>,
    pub irregular_directories: Vec<PathBuf>,
    /// Streams that failed to resolve and were treated as empty.
    pub unresolved: Vec<String>,
    /// Identifiers file used for device info when the window excluded all of them.
    pub identifiers_fallback: Option<PathBuf>,
    pub configuration: Option<PathBuf>,
    #[serde(skip)]
    pub device: Option<DeviceInfo>,
}

impl UserRegistry
{
    pub fn range(&self) -> KeyRange
    {
        KeyRange {
            first: self.first.clone(),
            last: self.last.clone(),
        }
    }

    /// Number of registered raw files.
    pub fn raw_file_count(&self) -> usize
    {
        self.passive
            .values()
            .map(MergedStream::len)
            .chain(self.surveys.values().map(SurveyStreams::len))
            .chain(self.audio.values().map(MergedStream::len))
            .sum()
    }

    /// Bytes on disk of all registered raw files.
    pub fn total_bytes(&self) -> u64
    {
        self.passive
            .values()
            .map(MergedStream::total_bytes)
            .chain(self.surveys.values().map(SurveyStreams::total_bytes))
            .chain(self.audio.values().map(MergedStream::total_bytes))
            .sum()
    }

    /// True if anything besides identifiers was registered.
    pub fn has_data(&self) -> bool
    {
        self.passive
            .iter()
            .any(|(name, s)| name != IDENTIFIERS && !s.is_empty())
            || self.surveys.values().any(|s| !s.is_empty())
            || self.audio.values().any(|s| !s.is_empty())
    }

    /// Files device info is read from.
    pub fn identifier_paths(&self) -> Vec<PathBuf>
    {
        let merged: Vec<PathBuf> = self
            .passive
            .get(IDENTIFIERS)
            .map(|s| s.paths().into_iter().map(Path::to_path_buf).collect())
            .unwrap_or_default();
        if merged.is_empty()
        {
            self.identifiers_fallback
                .iter()
                .cloned()
                .collect()
        }
        else
        {
            merged
        }
    }

    /// Write `{dir}/{user_id}_registry.json`, overwriting.
    pub fn export(
        &self,
        dir: &Path,
    ) -> Result<PathBuf>
    {
        fs::create_dir_all(dir).map_err(|e| RegistryError::io(dir, e))?;
        let path = dir.join(format!("{}_registry.json", self.user_id));
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).map_err(|e| RegistryError::io(&path, e))?;
        Ok(path)
    }

    /// Read an exported registry. Device info is re-read from the
    /// identifiers files when they are still present.
    pub fn load(
        path: &Path,
        policy: &OsPolicy,
    ) -> Result<Self>
    {
        let text = fs::read_to_string(path).map_err(|e| RegistryError::io(path, e))?;
        let mut registry: UserRegistry = serde_json::from_str(&text)?;

        let ids = registry.identifier_paths();
        if !ids.is_empty() && ids.iter().all(|p| p.is_file())
        {
            registry.device = DeviceInfo::read(&ids, policy).ok();
        }
        Ok(registry)
    }
}

/// Knobs shared by every user of a build.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions
{
    /// Passive streams to register; `None` registers all. Identifiers are
    /// always registered.
    pub include_streams: Option<Vec<String>>,
    pub os_policy: OsPolicy,
}

impl BuildOptions
{
    fn wants_stream(
        &self,
        stream: &str,
    ) -> bool
    {
        stream == IDENTIFIERS
            || self
                .include_streams
                .as_ref()
                .is_none_or(|list| list.iter().any(|s| s == stream))
    }
}

/// Builds `UserRegistry` values; shared by every worker of a project build.
#[derive(Debug, Clone)]
pub struct UserRegistryBuilder
{
    walker: DirWalker,
    options: BuildOptions,
}

impl UserRegistryBuilder
{
    pub fn new(
        walker: DirWalker,
        options: BuildOptions,
    ) -> Self
    {
        Self { walker, options }
    }

    pub fn walker(&self) -> &DirWalker
    {
        &self.walker
    }

    pub fn options(&self) -> &BuildOptions
    {
        &self.options
    }

    /// Build one user's registry.
    ///
    /// Only discovery can fail (the user path is not a readable directory).
    /// A stream that fails to merge is logged, listed in `unresolved` and
    /// registered as empty.
    #[instrument(skip(self, raw_roots, window, configuration))]
    pub fn build(
        &self,
        user_id: &str,
        raw_roots: &[PathBuf],
        window: Option<&TimeWindow>,
        configuration: Option<&Path>,
    ) -> Result<UserRegistry>
    {
        let inventory = discover_user(&self.walker, user_id, raw_roots)?;
        let registrar = Registrar::new(&self.walker, raw_roots, window);

        let mut registry = UserRegistry {
            user_id: user_id.to_string(),
            utc_range: window.cloned(),
            configuration: configuration.map(Path::to_path_buf),
            not_registered: inventory.not_registered,
            irregular_directories: inventory.irregular_directories,
            ..UserRegistry::default()
        };
        let mut range = KeyRange::default();

        let mut passive = inventory.passive;
        passive.insert(IDENTIFIERS.to_string());
        for stream in passive
        {
            if !self
                .options
                .wants_stream(&stream)
            {
                continue;
            }
            let merged = match registrar.register_stream(user_id, &stream)
            {
                Ok(reg) =>
                {
                    range.include(&reg.range);
                    reg.merged
                }
                Err(err) =>
                {
                    warn!(user_id, stream, error = %err, "stream not resolved");
                    registry
                        .unresolved
                        .push(stream.clone());
                    MergedStream::default()
                }
            };
            registry
                .passive
                .insert(stream, merged);
        }

        for survey_id in inventory.surveys
        {
            let merged = match registrar.register_survey(user_id, &survey_id)
            {
                Ok(reg) =>
                {
                    range.include(&reg.range);
                    reg.merged
                }
                Err(err) =>
                {
                    warn!(user_id, survey_id, error = %err, "survey not resolved");
                    registry
                        .unresolved
                        .push(survey_id.clone());
                    SurveyStreams::default()
                }
            };
            registry
                .surveys
                .insert(survey_id, merged);
        }

        for audio_id in inventory.audio
        {
            let merged = match registrar.register_audio(user_id, &audio_id)
            {
                Ok(reg) =>
                {
                    range.include(&reg.range);
                    reg.merged
                }
                Err(err) =>
                {
                    warn!(user_id, audio_id, error = %err, "audio not resolved");
                    registry
                        .unresolved
                        .push(audio_id.clone());
                    MergedStream::default()
                }
            };
            registry
                .audio
                .insert(audio_id, merged);
        }

        registry.first = range.first;
        registry.last = range.last;

        self.attach_device(&mut registry, &registrar, window);

        info!(
            user_id,
            files = registry.raw_file_count(),
            first = ?registry.first.as_ref().map(TimestampKey::as_str),
            last = ?registry.last.as_ref().map(TimestampKey::as_str),
            "registry built"
        );
        Ok(registry)
    }

    /// Read device info; fall back to the last identifiers file before the
    /// window end when the window excludes all of them.
    fn attach_device(
        &self,
        registry: &mut UserRegistry,
        registrar: &Registrar<'_>,
        window: Option<&TimeWindow>,
    )
    {
        let user_id = registry
            .user_id
            .clone();
        let in_range = registry
            .passive
            .get(IDENTIFIERS)
            .is_some_and(|s| !s.is_empty());

        if !in_range
        {
            warn!(user_id, "no identifiers found in this range");
            if let Some(window) = window
            {
                let widened = window.up_to_end();
                let fallback = registrar
                    .with_window(Some(&widened))
                    .register_stream(&user_id, IDENTIFIERS)
                    .ok()
                    .and_then(|reg| {
                        reg.merged
                            .files()
                            .last()
                            .map(|f| f.path.clone())
                    });
                match fallback
                {
                    Some(path) =>
                    {
                        warn!(user_id, path = %path.display(), "using last observed identifiers file");
                        registry.identifiers_fallback = Some(path);
                    }
                    None => warn!(user_id, "no identifiers found at all"),
                }
            }
        }

        let paths = registry.identifier_paths();
        if paths.is_empty()
        {
            return;
        }
        match DeviceInfo::read(&paths, &self.options.os_policy)
        {
            Ok(device) => registry.device = Some(device),
            Err(err) => warn!(user_id, error = %err, "unable to read device info"),
        }
    }
}

/// `bwreg user`: build and print one user's registry.
pub fn run(
    args: UserArgs,
    ctx: &AppContext,
) -> anyhow::Result<()>
{
    let config = load_config().unwrap_or_default();
    let roots = resolve_roots(&args.roots, &config);
    let window = args
        .window
        .resolve()?;

    if ctx.dry_run
    {
        if !ctx.quiet
        {
            println!("DRY RUN: would register user {} from {:?}", args.user_id, roots);
        }
        return Ok(());
    }

    let walker = DirWalker::new(&config.ignore_patterns)
        .context("invalid ignore patterns")?
        .with_follow_symlinks(config.follow_symlinks);
    let builder = UserRegistryBuilder::new(
        walker,
        BuildOptions {
            include_streams: None,
            os_policy: OsPolicy {
                aliases: config.os_aliases.clone(),
            },
        },
    );

    let registry = builder
        .build(&args.user_id, &roots, window.as_ref(), args.configuration.as_deref())
        .with_context(|| format!("building registry for {}", args.user_id))?;

    if let Some(out) = &args.out
    {
        let path = registry
            .export(out)
            .context("writing registry")?;
        if !ctx.quiet
        {
            eprintln!("Wrote {}", path.display());
        }
    }

    if args.json
    {
        println!("{}", serde_json::to_string_pretty(&registry)?);
    }
    else if !ctx.quiet
    {
        println!("{}", super::report::render_user(&registry, None, ctx.no_color));
    }

    Ok(())
}

#[cfg(test)]
mod tests
{
    use tempfile::TempDir;

    use super::*;

    const IDS: &str = "timestamp,UTC time,patient_id,MAC,phone_number,device_id,device_os,os_version,product,brand,hardware_id,manufacturer,model,beiwe_version\n1,t,u1,m,5,dev1,Android,10,p,b,h,m,model,2.4\n";

    fn touch(
        path: PathBuf,
        body: &str,
    )
    {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn builder() -> UserRegistryBuilder
    {
        UserRegistryBuilder::new(DirWalker::with_defaults().unwrap(), BuildOptions::default())
    }

    #[test]
    fn builds_full_user_with_range_and_device()
    {
        let tmp = TempDir::new().unwrap();
        let r1 = tmp.path().join("r1");
        let r2 = tmp.path().join("r2");
        touch(r1.join("u1/identifiers/2020-01-02 00_00_00.csv"), IDS);
        touch(r1.join("u1/gps/2020-01-03 00_00_00.csv"), "g");
        touch(r2.join("u1/gps/2020-01-03 00_00_00.csv"), "gps!");
        touch(r2.join("u1/survey_answers/s1/2020-01-01 05_00_00.csv"), "a");
        touch(r2.join("u1/audio_recordings/a1/2020-01-09 00_00_00.mp4"), "a");
        touch(r2.join("u1/survey_timings/2020-01-20 00_00_00.csv"), "loose");

        let reg = builder()
            .build("u1", &[r1, r2.clone()], None, None)
            .unwrap();

        assert_eq!(reg.first.as_ref().unwrap().as_str(), "2020-01-01 05_00_00");
        assert_eq!(reg.last.as_ref().unwrap().as_str(), "2020-01-09 00_00_00");
        assert_eq!(reg.passive["gps"].files()[0].path, r2.join("u1/gps/2020-01-03 00_00_00.csv"));
        assert_eq!(reg.surveys["s1"].survey_answers.len(), 1);
        assert_eq!(reg.audio["a1"].len(), 1);
        assert_eq!(reg.not_registered, vec![r2.join("u1/survey_timings/2020-01-20 00_00_00.csv")]);
        assert_eq!(reg.raw_file_count(), 4);
        assert!(reg.has_data());
        assert_eq!(
            reg.device.as_ref().and_then(|d| d.os.clone()),
            Some(crate::core::device::DeviceOs::Android)
        );
    }

    #[test]
    fn missing_identifiers_does_not_fail()
    {
        let tmp = TempDir::new().unwrap();
        let r1 = tmp.path().join("r1");
        touch(r1.join("u1/gps/2020-01-03 00_00_00.csv"), "g");

        let reg = builder()
            .build("u1", &[r1], None, None)
            .unwrap();

        assert!(reg.device.is_none());
        assert!(reg.passive[IDENTIFIERS].is_empty());
        assert_eq!(reg.passive["gps"].len(), 1);
    }

    #[test]
    fn window_falls_back_to_last_identifiers_before_end()
    {
        let tmp = TempDir::new().unwrap();
        let r1 = tmp.path().join("r1");
        touch(r1.join("u1/identifiers/2019-12-01 00_00_00.csv"), IDS);
        touch(r1.join("u1/identifiers/2019-12-15 00_00_00.csv"), IDS);
        touch(r1.join("u1/gps/2020-01-03 00_00_00.csv"), "g");
        let window = TimeWindow::parse("2020-01-01 00_00_00", "2020-02-01 00_00_00").unwrap();

        let reg = builder()
            .build("u1", &[r1.clone()], Some(&window), None)
            .unwrap();

        assert!(reg.passive[IDENTIFIERS].is_empty());
        assert_eq!(
            reg.identifiers_fallback,
            Some(r1.join("u1/identifiers/2019-12-15 00_00_00.csv"))
        );
        assert!(reg.device.is_some());
        assert_eq!(reg.first.as_ref().unwrap().as_str(), "2020-01-03 00_00_00");
        assert_eq!(reg.utc_range, Some(window));
    }

    #[test]
    fn include_list_limits_passive_streams()
    {
        let tmp = TempDir::new().unwrap();
        let r1 = tmp.path().join("r1");
        touch(r1.join("u1/gps/2020-01-03 00_00_00.csv"), "g");
        touch(r1.join("u1/accelerometer/2020-01-04 00_00_00.csv"), "a");

        let builder = UserRegistryBuilder::new(
            DirWalker::with_defaults().unwrap(),
            BuildOptions {
                include_streams: Some(vec!["gps".to_string()]),
                ..BuildOptions::default()
            },
        );
        let reg = builder
            .build("u1", &[r1], None, None)
            .unwrap();

        assert!(reg.passive.contains_key("gps"));
        assert!(reg.passive.contains_key(IDENTIFIERS));
        assert!(!reg.passive.contains_key("accelerometer"));
        assert_eq!(reg.last.as_ref().unwrap().as_str(), "2020-01-03 00_00_00");
    }

    #[test]
    fn export_and_load_round_trip()
    {
        let tmp = TempDir::new().unwrap();
        let r1 = tmp.path().join("r1");
        touch(r1.join("u1/identifiers/2020-01-02 00_00_00.csv"), IDS);
        touch(r1.join("u1/gps/2020-01-03 00_00_00.csv"), "g");
        touch(r1.join("u1/gps/2020-01-04 00_00_00.csv"), "g");
        touch(r1.join("u1/survey_answers/s1/2020-01-05 00_00_00.csv"), "s");

        let reg = builder()
            .build("u1", &[r1], None, Some(Path::new("study.json")))
            .unwrap();
        let path = reg
            .export(&tmp.path().join("out"))
            .unwrap();
        assert!(path.ends_with("u1_registry.json"));

        let back = UserRegistry::load(&path, &OsPolicy::default()).unwrap();
        assert_eq!(back.first, reg.first);
        assert_eq!(back.last, reg.last);
        assert_eq!(back.passive, reg.passive);
        assert_eq!(back.surveys, reg.surveys);
        assert_eq!(back.configuration, Some(PathBuf::from("study.json")));
        assert_eq!(back.device, reg.device);
    }
}
