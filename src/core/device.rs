//! Device history from a user's identifiers files.
//!
//! Every identifiers file is a small CSV: one header row, then one row per
//! observation of the phone's parameters. Files are read in chronological
//! order (by file name) so `history` and the exported CSV follow the study
//! timeline.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::error::{RegistryError, Result};
use super::timekey::TimestampKey;

/// Columns of a well-formed identifiers file.
pub const IDENTIFIERS_HEADER: [&str; 14] = [
    "timestamp",
    "UTC time",
    "patient_id",
    "MAC",
    "phone_number",
    "device_id",
    "device_os",
    "os_version",
    "product",
    "brand",
    "hardware_id",
    "manufacturer",
    "model",
    "beiwe_version",
];

/// Normalised phone operating system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviceOs
{
    Ios,
    Android,
    /// History shows more than one OS.
    Both,
    Other(String),
}

impl DeviceOs
{
    pub fn as_str(&self) -> &str
    {
        match self
        {
            DeviceOs::Ios => "iOS",
            DeviceOs::Android => "Android",
            DeviceOs::Both => "both",
            DeviceOs::Other(s) => s,
        }
    }
}

impl From<String> for DeviceOs
{
    fn from(value: String) -> Self
    {
        match value.as_str()
        {
            "iOS" => DeviceOs::Ios,
            "Android" => DeviceOs::Android,
            "both" => DeviceOs::Both,
            _ => DeviceOs::Other(value),
        }
    }
}

impl From<DeviceOs> for String
{
    fn from(os: DeviceOs) -> Self
    {
        os.as_str().to_string()
    }
}

impl fmt::Display for DeviceOs
{
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result
    {
        f.write_str(self.as_str())
    }
}

/// Rewrites of raw `device_os` values before comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsPolicy
{
    pub aliases: BTreeMap<String, String>,
}

impl Default for OsPolicy
{
    fn default() -> Self
    {
        // Older iPhone exports say "iPhone OS".
        Self {
            aliases: BTreeMap::from([("iPhone OS".to_string(), "iOS".to_string())]),
        }
    }
}

impl OsPolicy
{
    pub fn normalize(
        &self,
        raw: &str,
    ) -> DeviceOs
    {
        let raw = raw.trim();
        let name = self
            .aliases
            .get(raw)
            .map(String::as_str)
            .unwrap_or(raw);
        DeviceOs::from(name.to_string())
    }
}

/// One row of one identifiers file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierRecord
{
    pub from_file: PathBuf,
    pub fields: IndexMap<String, String>,
}

/// Parsed device history for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo
{
    pub records: Vec<IdentifierRecord>,
    pub os: Option<DeviceOs>,
    pub unique_devices: usize,
    /// Files read on a best-effort basis after a header mismatch.
    pub ambiguous_files: Vec<PathBuf>,
}

impl DeviceInfo
{
    /// Read identifiers files. Unreadable or empty files are skipped with a
    /// warning; it is an error only if nothing could be read at all.
    pub fn read<P: AsRef<Path>>(
        paths: &[P],
        policy: &OsPolicy,
    ) -> Result<Self>
    {
        let mut ordered: Vec<&Path> = paths
            .iter()
            .map(|p| p.as_ref())
            .collect();
        ordered.sort_by_key(|p| p.file_name().map(|n| n.to_os_string()));

        let mut records = Vec::new();
        let mut ambiguous_files = Vec::new();

        for path in ordered
        {
            match read_identifiers_file(path)
            {
                Ok((mut rows, issues)) =>
                {
                    if !issues.is_empty()
                    {
                        for issue in &issues
                        {
                            warn!(%issue, "best-effort identifiers parse");
                        }
                        ambiguous_files.push(path.to_path_buf());
                    }
                    if rows.is_empty()
                    {
                        warn!(path = %path.display(), "identifiers file has no rows");
                    }
                    records.append(&mut rows);
                }
                Err(err) => warn!(path = %path.display(), error = %err, "cannot read identifiers file"),
            }
        }

        if records.is_empty()
        {
            return Err(RegistryError::AmbiguousIdentifierFile {
                path: paths
                    .first()
                    .map(|p| p.as_ref().to_path_buf())
                    .unwrap_or_default(),
                reason: "no identifier rows could be read".to_string(),
            });
        }

        let mut info = Self {
            records,
            os: None,
            unique_devices: 0,
            ambiguous_files,
        };

        let systems: BTreeSet<DeviceOs> = info
            .records
            .iter()
            .filter_map(|r| r.fields.get("device_os"))
            .filter(|v| !v.trim().is_empty())
            .map(|v| policy.normalize(v))
            .collect();
        info.os = match systems.len()
        {
            0 => None,
            1 => systems.into_iter().next(),
            _ => Some(DeviceOs::Both),
        };

        info.unique_devices = info
            .records
            .iter()
            .filter_map(|r| r.fields.get("device_id"))
            .filter(|v| !v.trim().is_empty())
            .collect::<BTreeSet<_>>()
            .len();

        Ok(info)
    }

    /// Values of `column` keyed by the row's `timestamp` (file key when the
    /// row has none), in file order.
    pub fn history(
        &self,
        column: &str,
    ) -> IndexMap<String, String>
    {
        if !IDENTIFIERS_HEADER.contains(&column)
        {
            warn!(column, "not a standard device attribute");
        }
        self.records
            .iter()
            .filter_map(|r| {
                let value = r.fields.get(column)?;
                let at = r
                    .fields
                    .get("timestamp")
                    .cloned()
                    .or_else(|| {
                        TimestampKey::from_path(&r.from_file)
                            .ok()
                            .map(String::from)
                    })
                    .unwrap_or_default();
                Some((at, value.clone()))
            })
            .collect()
    }

    pub fn has_multiple_devices(&self) -> bool
    {
        self.unique_devices > 1
    }

    pub fn has_multiple_os(&self) -> bool
    {
        self.os == Some(DeviceOs::Both)
    }

    /// Write all rows to `{dir}/{user_id}_identifiers.csv`. The header is
    /// `from_file` followed by the union of observed columns.
    pub fn export_csv(
        &self,
        user_id: &str,
        dir: &Path,
    ) -> Result<PathBuf>
    {
        fs::create_dir_all(dir).map_err(|e| RegistryError::io(dir, e))?;
        let path = dir.join(format!("{user_id}_identifiers.csv"));

        let columns: IndexSet<&str> = self
            .records
            .iter()
            .flat_map(|r| r.fields.keys().map(String::as_str))
            .collect();

        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(std::iter::once("from_file").chain(columns.iter().copied()))?;

        for record in &self.records
        {
            let from_file = record
                .from_file
                .display()
                .to_string();
            let row = std::iter::once(from_file).chain(columns.iter().map(|c| {
                record
                    .fields
                    .get(*c)
                    .cloned()
                    .unwrap_or_default()
            }));
            writer.write_record(row)?;
        }

        writer
            .flush()
            .map_err(|e| RegistryError::io(&path, e))?;
        Ok(path)
    }
}

/// Read one identifiers file into records plus any schema issues found.
fn read_identifiers_file(path: &Path) -> Result<(Vec<IdentifierRecord>, Vec<RegistryError>)>
{
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut rows = reader.records();
    let Some(header) = rows.next()
    else
    {
        return Ok((Vec::new(), Vec::new()));
    };
    let header: Vec<String> = header?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut issues = Vec::new();
    if header != IDENTIFIERS_HEADER
    {
        issues.push(RegistryError::AmbiguousIdentifierFile {
            path: path.to_path_buf(),
            reason: format!("unexpected header {header:?}"),
        });
    }

    let mut records = Vec::new();
    for row in rows
    {
        let values: Vec<String> = row?
            .iter()
            .map(str::to_string)
            .collect();
        let (fields, issue) = zip_row(path, &header, values);
        issues.extend(issue);
        records.push(IdentifierRecord {
            from_file: path.to_path_buf(),
            fields,
        });
    }

    Ok((records, issues))
}

/// Pair header names with row values.
///
/// Some historical iPhone exports carry one unlabelled trailing value after
/// `beiwe_version`. Surplus values are joined with `_` into the last column.
/// Missing values leave their columns out.
fn zip_row(
    path: &Path,
    header: &[String],
    mut values: Vec<String>,
) -> (IndexMap<String, String>, Option<RegistryError>)
{
    let mut issue = None;

    if values.len() > header.len() && !header.is_empty()
    {
        let tail = values
            .split_off(header.len() - 1)
            .join("_");
        values.push(tail);
    }
    else if values.len() < header.len()
    {
        issue = Some(RegistryError::AmbiguousIdentifierFile {
            path: path.to_path_buf(),
            reason: format!("row has {} values for {} columns", values.len(), header.len()),
        });
    }

    let fields = header
        .iter()
        .cloned()
        .zip(values)
        .collect();
    (fields, issue)
}

#[cfg(test)]
mod tests
{
    use tempfile::TempDir;

    use super::*;

    const HEADER: &str = "timestamp,UTC time,patient_id,MAC,phone_number,device_id,device_os,os_version,product,brand,hardware_id,manufacturer,model,beiwe_version";

    fn write_identifiers(
        dir: &Path,
        key: &str,
        row: &str,
    ) -> PathBuf
    {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join(format!("{key}.csv"));
        fs::write(&path, format!("{HEADER}\n{row}\n")).unwrap();
        path
    }

    #[test]
    fn reads_android_history()
    {
        let tmp = TempDir::new().unwrap();
        let p = write_identifiers(
            tmp.path(),
            "2020-01-01 00_00_00",
            "1577836800000,2020-01-01T00:00:00.000,u1,mac,555,dev1,Android,10,prod,brand,hw,man,model,2.4",
        );

        let info = DeviceInfo::read(&[p], &OsPolicy::default()).unwrap();
        assert_eq!(info.os, Some(DeviceOs::Android));
        assert_eq!(info.unique_devices, 1);
        assert!(info.ambiguous_files.is_empty());
        assert_eq!(info.history("device_id").get("1577836800000").unwrap(), "dev1");
    }

    #[test]
    fn iphone_os_alias_and_extra_trailing_value()
    {
        let tmp = TempDir::new().unwrap();
        let p = write_identifiers(
            tmp.path(),
            "2020-01-01 00_00_00",
            "1577836800000,2020-01-01T00:00:00.000,u1,mac,555,dev1,iPhone OS,13,prod,Apple,hw,Apple,iPhone,2.1,extra",
        );

        let info = DeviceInfo::read(&[p], &OsPolicy::default()).unwrap();
        assert_eq!(info.os, Some(DeviceOs::Ios));
        assert_eq!(info.records[0].fields["beiwe_version"], "2.1_extra");
        assert_eq!(info.records[0].fields.len(), 14);
    }

    #[test]
    fn switching_phones_flags_both()
    {
        let tmp = TempDir::new().unwrap();
        let a = write_identifiers(
            tmp.path(),
            "2020-01-01 00_00_00",
            "1,t,u1,mac,555,dev1,Android,10,p,b,h,m,model,2.4",
        );
        let b = write_identifiers(
            tmp.path(),
            "2020-02-01 00_00_00",
            "2,t,u1,mac,555,dev2,iOS,13,p,b,h,m,model,2.1",
        );

        // Input order does not matter; files are read by name.
        let info = DeviceInfo::read(&[b, a], &OsPolicy::default()).unwrap();
        assert!(info.has_multiple_os());
        assert!(info.has_multiple_devices());
        let history = info.history("device_os");
        let keys: Vec<&String> = history.keys().collect();
        assert_eq!(keys, vec!["1", "2"]);
    }

    #[test]
    fn unknown_header_is_best_effort()
    {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("2020-01-01 00_00_00.csv");
        fs::write(&path, "timestamp,device_id,device_os\n1,dev1,Android\n").unwrap();

        let info = DeviceInfo::read(&[path.clone()], &OsPolicy::default()).unwrap();
        assert_eq!(info.ambiguous_files, vec![path]);
        assert_eq!(info.os, Some(DeviceOs::Android));
    }

    #[test]
    fn rows_without_timestamps_all_count_towards_os()
    {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("2020-01-01 00_00_00.csv");
        fs::write(&path, "device_id,device_os\ndev1,Android\ndev2,iOS\n").unwrap();

        let info = DeviceInfo::read(&[path], &OsPolicy::default()).unwrap();
        assert_eq!(info.unique_devices, 2);
        assert_eq!(info.os, Some(DeviceOs::Both));
    }

    #[test]
    fn nothing_readable_is_an_error()
    {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("2020-01-01 00_00_00.csv");
        fs::write(&path, "").unwrap();

        let err = DeviceInfo::read(&[path], &OsPolicy::default()).unwrap_err();
        assert!(matches!(err, RegistryError::AmbiguousIdentifierFile { .. }));
    }

    #[test]
    fn export_writes_union_header()
    {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("2020-01-01 00_00_00.csv");
        fs::write(&a, "timestamp,device_os\n1,Android\n").unwrap();
        let b = tmp.path().join("2020-01-02 00_00_00.csv");
        fs::write(&b, "timestamp,device_id\n2,dev9\n").unwrap();

        let info = DeviceInfo::read(&[a, b], &OsPolicy::default()).unwrap();
        let out = info
            .export_csv("u1", &tmp.path().join("out"))
            .unwrap();

        let text = fs::read_to_string(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), "from_file,timestamp,device_os,device_id");
        assert!(lines.next().unwrap().ends_with(",1,Android,"));
        assert!(lines.next().unwrap().ends_with(",2,,dev9"));
    }
}
