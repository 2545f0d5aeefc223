//! Inbound payload → [`Job`]
//!
//! Two payload shapes are accepted: a bare magnet URI, whose `dn` parameter
//! carries a release file name such as
//! `[Group] Show Name - 05 (1080p) [ABCD1234].mkv`, and a JSON record
//! `{"title", "link", "show"}`.

use regex::Regex;
use thiserror::Error;
use url::Url;

use super::model::{Job, JobRecord};
use crate::config::NormalizerConfig;

const MAGNET_SCHEME: &str = "magnet:";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid magnet link: {0}")]
    InvalidMagnet(#[from] url::ParseError),

    #[error("magnet link has no display name (dn)")]
    MissingDisplayName,

    #[error("invalid job record: {0}")]
    InvalidRecord(#[from] serde_json::Error),

    #[error("job field is empty: {0}")]
    EmptyField(&'static str),

    #[error("job link is not an absolute URL: {link:?}")]
    InvalidLink {
        link: String,
        #[source]
        source: url::ParseError,
    },

    #[error("job title is not a safe file name: {0:?}")]
    UnsafeTitle(String),

    #[error("job show is not a safe relative path: {0:?}")]
    UnsafeShow(String),
}

pub type Result<T> = std::result::Result<T, ParseError>;

/// Compiled release-name patterns plus the missing-field policy
#[derive(Debug, Clone)]
pub struct Normalizer {
    release_group: Regex,
    suffix: Regex,
    resolution: Regex,
    episode: Regex,
    derive_missing_fields: bool,
}

impl Normalizer {
    pub fn new(config: &NormalizerConfig) -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            release_group: Regex::new(&config.release_group_pattern)?,
            suffix: Regex::new(&config.suffix_pattern)?,
            resolution: Regex::new(&config.resolution_pattern)?,
            episode: Regex::new(&config.episode_pattern)?,
            derive_missing_fields: config.derive_missing_fields,
        })
    }

    /// Turn a raw message body into a job with all fields populated
    pub fn normalize(&self, raw: &[u8]) -> Result<Job> {
        if let Ok(text) = std::str::from_utf8(raw) {
            let text = text.trim();
            if text.starts_with(MAGNET_SCHEME) {
                return self.from_magnet(text);
            }
        }

        let record: JobRecord = serde_json::from_slice(raw)?;
        self.from_record(record)
    }

    /// Collection name for a release file name.
    ///
    /// `[Group] Show - 05 (1080p) [HASH].mkv` becomes `Show - 1080p`; without a
    /// resolution token the episode marker is dropped and the bare name is kept.
    pub fn show_name(&self, file_name: &str) -> String {
        let fragment = self.release_group.replace(file_name, "");
        let fragment = self.suffix.replace(&fragment, "");
        let base = self.episode.replace(fragment.trim(), "");
        let base = base.trim();

        let resolution = self
            .resolution
            .captures(file_name)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str());

        match resolution {
            Some(resolution) => format!("{} - {}p", base, resolution),
            None => base.to_string(),
        }
    }

    fn from_magnet(&self, link: &str) -> Result<Job> {
        let title = display_name(link)?;
        let show = self.show_name(&title);

        checked(Job {
            title,
            link: link.to_string(),
            show,
        })
    }

    fn from_record(&self, record: JobRecord) -> Result<Job> {
        let link = record.link.unwrap_or_default();
        let mut title = record.title.unwrap_or_default();
        let mut show = record.show.unwrap_or_default();

        if self.derive_missing_fields {
            if title.trim().is_empty() && !link.trim().is_empty() {
                title = display_name(link.trim())?;
            }
            if show.trim().is_empty() && !title.trim().is_empty() {
                show = self.show_name(&title);
            }
        }

        checked(Job { title, link, show })
    }
}

/// `dn` query parameter of a magnet URI, form-decoded
pub fn display_name(link: &str) -> Result<String> {
    let url = Url::parse(link)?;

    url.query_pairs()
        .find(|(key, _)| key == "dn")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.trim().is_empty())
        .ok_or(ParseError::MissingDisplayName)
}

fn checked(job: Job) -> Result<Job> {
    for (field, value) in [("title", &job.title), ("link", &job.link), ("show", &job.show)] {
        if value.trim().is_empty() {
            return Err(ParseError::EmptyField(field));
        }
    }

    // Handed to the fetch tool as an argument, so it must never look like an option
    if let Err(source) = Url::parse(&job.link) {
        return Err(ParseError::InvalidLink {
            link: job.link.clone(),
            source,
        });
    }

    // title lands under the staging directory, show under the destination collection
    if !is_path_component(&job.title) {
        return Err(ParseError::UnsafeTitle(job.title.clone()));
    }
    if !job.show.split('/').all(is_path_component) {
        return Err(ParseError::UnsafeShow(job.show.clone()));
    }

    Ok(job)
}

fn is_path_component(value: &str) -> bool {
    !value.trim().is_empty()
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\', '\0'])
}
