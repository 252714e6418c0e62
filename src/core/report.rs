//! Readable summaries of user and project registries.
//!
//! One `UserSummary` row per user, written as `user_summary.csv` and
//! printed as a table.

use std::path::Path;

use itertools::Itertools;
use owo_colors::OwoColorize;
use serde::{Deserialize, Serialize};
use tabled::settings::Style;
use tabled::{Table, Tabled};

use super::error::Result;
use super::project::ProjectRegistry;
use super::timekey::{KeyRange, TimestampKey, days_between};
use super::user::UserRegistry;

/// Columns of `user_summary.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary
{
    pub user_id: String,
    pub user_name: Option<String>,
    pub followup_begin: Option<String>,
    pub followup_end: Option<String>,
    pub followup_days: Option<f64>,
    pub first_observation: Option<String>,
    pub last_observation: Option<String>,
    pub total_days: f64,
    pub raw_file_count: usize,
    #[serde(rename = "size_MB")]
    pub size_mb: f64,
    pub n_devices: usize,
    pub os: Option<String>,
    pub irregular_directories: usize,
    pub unregistered_files: usize,
    pub configuration_file: Option<String>,
}

impl UserSummary
{
    pub fn from_registry(
        registry: &UserRegistry,
        user_name: Option<&str>,
    ) -> Self
    {
        let window = registry.utc_range.as_ref();
        let device = registry.device.as_ref();
        let bytes = registry.total_bytes() as f64;

        Self {
            user_id: registry.user_id.clone(),
            user_name: user_name.map(str::to_string),
            followup_begin: window.map(|w| w.start().readable()),
            followup_end: window.map(|w| w.end().readable()),
            followup_days: window.map(|w| days_between(w.start(), w.end())),
            first_observation: registry.first.as_ref().map(TimestampKey::readable),
            last_observation: registry.last.as_ref().map(TimestampKey::readable),
            total_days: registry
                .range()
                .days()
                .unwrap_or(0.0),
            raw_file_count: registry.raw_file_count(),
            size_mb: (bytes / 1_000_000.0 * 100.0).round() / 100.0,
            n_devices: device.map_or(0, |d| d.unique_devices),
            os: device
                .and_then(|d| d.os.as_ref())
                .map(ToString::to_string),
            irregular_directories: registry.irregular_directories.len(),
            unregistered_files: registry.not_registered.len(),
            configuration_file: registry
                .configuration
                .as_ref()
                .map(|p| p.display().to_string()),
        }
    }
}

/// Write summaries as CSV with a header row, overwriting `path`.
pub fn write_user_summary(
    path: &Path,
    rows: &[UserSummary],
) -> Result<()>
{
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows
    {
        writer.serialize(row)?;
    }
    writer
        .flush()
        .map_err(|e| super::error::RegistryError::io(path, e))?;
    Ok(())
}

#[derive(Tabled)]
struct SummaryRow
{
    #[tabled(rename = "user")]
    user_id: String,
    name: String,
    first: String,
    last: String,
    days: String,
    files: usize,
    #[tabled(rename = "MB")]
    size_mb: String,
    os: String,
    devices: usize,
    issues: String,
}

impl From<&UserSummary> for SummaryRow
{
    fn from(s: &UserSummary) -> Self
    {
        let dash = || "-".to_string();
        let issues = s.irregular_directories + s.unregistered_files;
        Self {
            user_id: s.user_id.clone(),
            name: s.user_name.clone().unwrap_or_else(dash),
            first: s.first_observation.clone().unwrap_or_else(dash),
            last: s.last_observation.clone().unwrap_or_else(dash),
            days: format!("{:.1}", s.total_days),
            files: s.raw_file_count,
            size_mb: format!("{:.2}", s.size_mb),
            os: s.os.clone().unwrap_or_else(dash),
            devices: s.n_devices,
            issues: if issues == 0 { dash() } else { issues.to_string() },
        }
    }
}

#[derive(Tabled)]
struct Field
{
    field: &'static str,
    value: String,
}

fn warn_line(
    text: String,
    no_color: bool,
) -> String
{
    if no_color { text } else { text.yellow().to_string() }
}

fn range_text(range: &KeyRange) -> String
{
    match (&range.first, &range.last)
    {
        (Some(first), Some(last)) => format!("{} .. {}", first.readable(), last.readable()),
        _ => "no observations".to_string(),
    }
}

/// Key/value summary of one user.
pub fn render_user(
    registry: &UserRegistry,
    user_name: Option<&str>,
    no_color: bool,
) -> String
{
    let s = UserSummary::from_registry(registry, user_name);
    let opt = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());

    let mut fields = vec![
        Field { field: "user", value: s.user_id.clone() },
        Field { field: "observed", value: range_text(&registry.range()) },
        Field { field: "total days", value: format!("{:.1}", s.total_days) },
        Field { field: "raw files", value: s.raw_file_count.to_string() },
        Field { field: "size (MB)", value: format!("{:.2}", s.size_mb) },
        Field { field: "passive streams", value: registry.passive.len().to_string() },
        Field { field: "surveys", value: registry.surveys.len().to_string() },
        Field { field: "audio prompts", value: registry.audio.len().to_string() },
        Field { field: "devices", value: s.n_devices.to_string() },
        Field { field: "os", value: opt(&s.os) },
    ];
    if let Some(name) = &s.user_name
    {
        fields.insert(1, Field { field: "name", value: name.clone() });
    }
    if s.followup_begin.is_some()
    {
        fields.push(Field {
            field: "follow-up",
            value: format!("{} .. {}", opt(&s.followup_begin), opt(&s.followup_end)),
        });
    }
    if let Some(config) = &s.configuration_file
    {
        fields.push(Field { field: "configuration", value: config.clone() });
    }

    let mut out = Table::new(fields)
        .with(Style::rounded())
        .to_string();

    if !registry.irregular_directories.is_empty()
    {
        out.push('\n');
        out.push_str(&warn_line(
            format!(
                "{} irregular director(ies), {} unregistered file(s)",
                s.irregular_directories, s.unregistered_files
            ),
            no_color,
        ));
    }
    if !registry.unresolved.is_empty()
    {
        out.push('\n');
        out.push_str(&warn_line(
            format!("unresolved: {}", registry.unresolved.iter().join(", ")),
            no_color,
        ));
    }
    if registry.identifiers_fallback.is_some()
    {
        out.push('\n');
        out.push_str(&warn_line(
            "device info taken from an identifiers file before the window".to_string(),
            no_color,
        ));
    }
    out
}

/// Per-user table followed by any raised project flags.
pub fn render_project(
    project: &ProjectRegistry,
    no_color: bool,
) -> String
{
    let summaries = project.summaries();
    let mut out = format!(
        "{} users, {} passive streams, {} surveys, {} audio prompts, {}\n",
        project.ids.len(),
        project.passive.len(),
        project.surveys.len(),
        project.audio.len(),
        range_text(&KeyRange::new(project.first.as_ref(), project.last.as_ref())),
    );

    if !summaries.is_empty()
    {
        out.push_str(
            &Table::new(summaries.iter().map(SummaryRow::from))
                .with(Style::rounded())
                .to_string(),
        );
        out.push('\n');
    }

    let flags = &project.flags;
    if flags.is_clean()
    {
        out.push_str("no flags raised\n");
        return out;
    }
    let failed: Vec<String> = flags
        .failed_users
        .iter()
        .map(|(id, reason)| format!("{id} ({reason})"))
        .collect();
    let lines = [
        ("failed", &failed),
        ("ignored", &flags.ignored_users),
        ("not requested", &flags.unrequested_users),
        ("without data", &flags.without_data),
        ("irregular directories", &flags.irregular_directories),
        ("multiple devices", &flags.multiple_devices),
        ("multiple os", &flags.multiple_os),
    ];
    for (label, ids) in lines
    {
        if ids.is_empty()
        {
            continue;
        }
        let line = format!("{label}: {}", ids.iter().join(", "));
        if label == "failed" && !no_color
        {
            out.push_str(&line.red().to_string());
        }
        else
        {
            out.push_str(&warn_line(line, no_color));
        }
        out.push('\n');
    }
    out
}
