//! Per-stream registration across raw data roots.
//!
//! Each registrar turns one identifier into candidate directories, one per
//! root, keeps the ones that exist and hold something, and merges them:
//!
//! - passive streams: `{root}/{user}/{stream}`
//! - tracking surveys: `{root}/{user}/survey_answers/{id}` and
//!   `{root}/{user}/survey_timings/{id}`, merged independently
//! - audio prompts: `{root}/{user}/audio_recordings/{id}`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::Result;
use super::merge::{FileMerger, MergedStream};
use super::timekey::{KeyRange, TimeWindow};
use crate::infra::walk::{DirWalker, check_dirs};

pub const IDENTIFIERS: &str = "identifiers";
pub const SURVEY_ANSWERS: &str = "survey_answers";
pub const SURVEY_TIMINGS: &str = "survey_timings";
pub const AUDIO_RECORDINGS: &str = "audio_recordings";

/// Both halves of one tracking survey.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyStreams
{
    pub survey_answers: MergedStream,
    pub survey_timings: MergedStream,
}

impl SurveyStreams
{
    pub fn range(&self) -> KeyRange
    {
        let mut range = stream_range(&self.survey_answers);
        range.include(&stream_range(&self.survey_timings));
        range
    }

    pub fn is_empty(&self) -> bool
    {
        self.survey_answers.is_empty() && self.survey_timings.is_empty()
    }

    pub fn len(&self) -> usize
    {
        self.survey_answers.len() + self.survey_timings.len()
    }

    pub fn total_bytes(&self) -> u64
    {
        self.survey_answers.total_bytes() + self.survey_timings.total_bytes()
    }
}

/// First/last key of a merged stream.
pub fn stream_range(stream: &MergedStream) -> KeyRange
{
    KeyRange::new(stream.first(), stream.last())
}

/// Merged files plus their combined first/last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration<T>
{
    pub range: KeyRange,
    pub merged: T,
}

/// Registers streams of one user over a fixed set of raw roots.
#[derive(Debug, Clone)]
pub struct Registrar<'a>
{
    merger: FileMerger<'a>,
    raw_roots: &'a [PathBuf],
    window: Option<&'a TimeWindow>,
}

impl<'a> Registrar<'a>
{
    pub fn new(
        walker: &'a DirWalker,
        raw_roots: &'a [PathBuf],
        window: Option<&'a TimeWindow>,
    ) -> Self
    {
        Self {
            merger: FileMerger::new(walker),
            raw_roots,
            window,
        }
    }

    /// Same roots, different window.
    pub fn with_window<'b>(
        &self,
        window: Option<&'b TimeWindow>,
    ) -> Registrar<'b>
    where
        'a: 'b,
    {
        Registrar {
            merger: self.merger.clone(),
            raw_roots: self.raw_roots,
            window,
        }
    }

    /// Passive data stream. An absent stream is an empty registration.
    pub fn register_stream(
        &self,
        user_id: &str,
        stream: &str,
    ) -> Result<Registration<MergedStream>>
    {
        let merged = self.merge_under(stream, &[user_id, stream])?;
        Ok(Registration {
            range: stream_range(&merged),
            merged,
        })
    }

    /// Tracking survey: answers and timings merged separately, range combined.
    pub fn register_survey(
        &self,
        user_id: &str,
        survey_id: &str,
    ) -> Result<Registration<SurveyStreams>>
    {
        let merged = SurveyStreams {
            survey_answers: self.merge_under(survey_id, &[user_id, SURVEY_ANSWERS, survey_id])?,
            survey_timings: self.merge_under(survey_id, &[user_id, SURVEY_TIMINGS, survey_id])?,
        };
        Ok(Registration {
            range: merged.range(),
            merged,
        })
    }

    /// Audio prompt recordings.
    pub fn register_audio(
        &self,
        user_id: &str,
        audio_id: &str,
    ) -> Result<Registration<MergedStream>>
    {
        let merged = self.merge_under(audio_id, &[user_id, AUDIO_RECORDINGS, audio_id])?;
        Ok(Registration {
            range: stream_range(&merged),
            merged,
        })
    }

    /// Merge `{root}/{components...}` over every root that has it.
    fn merge_under(
        &self,
        label: &str,
        components: &[&str],
    ) -> Result<MergedStream>
    {
        let candidates = self
            .raw_roots
            .iter()
            .map(|root| join_all(root, components));
        let check = check_dirs(candidates);

        for path in &check.not_dir
        {
            warn!(path = %path.display(), "expected a directory, skipping");
        }
        for path in &check.empty
        {
            debug!(path = %path.display(), "empty directory");
        }
        if check.not_empty.is_empty()
        {
            debug!(stream = label, "no data in any root");
        }

        self.merger
            .merge(label, &check.not_empty, self.window)
    }
}

fn join_all(
    root: &Path,
    components: &[&str],
) -> PathBuf
{
    components
        .iter()
        .fold(root.to_path_buf(), |acc, c| acc.join(c))
}
