//! Shared test utilities for integration tests
//!
//! Builds a small study downloaded twice: two raw roots whose contents
//! overlap, with the usual mess found in real exports (OS junk files,
//! loose survey files, an old iPhone identifiers file).

#![allow(dead_code)]

use assert_fs::prelude::*;

pub const HEADER: &str = "timestamp,UTC time,patient_id,MAC,phone_number,device_id,device_os,os_version,product,brand,hardware_id,manufacturer,model,beiwe_version";

/// One identifiers row for `user` on `device` running `os`.
pub fn identifiers(
    user: &str,
    device: &str,
    os: &str,
) -> String
{
    format!("{HEADER}\n1577836800000,2020-01-01T00:00:00.000,{user},mac,555,{device},{os},13,p,b,h,m,model,2.4\n")
}

/// Write `size` bytes at `rel` under the fixture root.
pub fn put(
    tmp: &assert_fs::TempDir,
    rel: &str,
    size: usize,
)
{
    tmp.child(rel)
        .write_binary(&vec![b'x'; size])
        .expect("write raw file");
}

/// Two overlapping downloads under `download_1/` and `download_2/`.
///
/// - u1: gps in both roots (2020-01-02 is larger in download_2), a
///   survey, an audio prompt, Android identifiers
/// - u2: accelerometer plus an iPhone identifiers file with the extra
///   trailing value
/// - u3: identifiers only
pub fn make_study_fixture() -> assert_fs::TempDir
{
    let tmp = assert_fs::TempDir::new().expect("tempdir");

    // First download
    tmp.child("download_1/u1/identifiers/2020-01-01 00_00_00.csv")
        .write_str(&identifiers("u1", "dev-a", "Android"))
        .expect("write");
    put(&tmp, "download_1/u1/gps/2020-01-01 00_00_00.csv", 10);
    put(&tmp, "download_1/u1/gps/2020-01-02 00_00_00.csv", 10);
    put(&tmp, "download_1/u1/survey_answers/s1/2020-01-03 00_00_00.csv", 5);
    put(&tmp, "download_1/u1/gps/.DS_Store", 3);

    // Old iPhone export: one value more than the header
    tmp.child("download_1/u2/identifiers/2020-02-01 00_00_00.csv")
        .write_str(&format!(
            "{HEADER}\n1580515200000,2020-02-01T00:00:00.000,u2,mac,555,dev-b,iPhone OS,13,p,b,h,m,iPhone,2.4,extra\n"
        ))
        .expect("write");
    put(&tmp, "download_1/u2/accelerometer/2020-02-01 00_00_00.csv", 7);
    put(&tmp, "download_1/.DS_Store", 1);

    // Second download overlaps u1 and adds u3
    put(&tmp, "download_2/u1/gps/2020-01-02 00_00_00.csv", 20);
    put(&tmp, "download_2/u1/gps/2020-01-05 00_00_00.csv", 10);
    put(&tmp, "download_2/u1/audio_recordings/a1/2020-01-04 00_00_00.mp4", 50);
    put(&tmp, "download_2/u1/survey_answers/2020-01-06 00_00_00.csv", 5);
    tmp.child("download_2/u3/identifiers/2020-03-01 00_00_00.csv")
        .write_str(&identifiers("u3", "dev-c", "Android"))
        .expect("write");

    tmp
}
