use std::fmt::Display;

use serde::Deserialize;

use crate::download::{episode_number_alignment, format_episode_number};

pub mod animepahe;
pub mod cache;

pub use animepahe::Catalog;
pub use cache::BrowseCache;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesInfo {
    /// Session id of the series on the listing service.
    pub session: String,
    pub title: String,
}

impl SeriesInfo {
    pub fn with_session(session: impl Into<String>, title: Option<String>) -> Self {
        let session = session.into();
        let title = title.filter(|title| !title.trim().is_empty()).unwrap_or_else(|| session.clone());

        Self { session, title }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EpisodeNumber {
    Number(u32),
    String(String),
}

impl EpisodeNumber {
    pub fn as_number(&self) -> Option<u32> {
        match self {
            EpisodeNumber::Number(number) => Some(*number),
            EpisodeNumber::String(number) => number.trim().parse().ok(),
        }
    }
}

impl Display for EpisodeNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EpisodeNumber::Number(number) => write!(f, "{number}"),
            EpisodeNumber::String(number) => write!(f, "{}", number.trim()),
        }
    }
}

impl<'de> Deserialize<'de> for EpisodeNumber {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u32),
            Float(f64),
            String(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(number) => EpisodeNumber::Number(number),
            Raw::Float(number) => EpisodeNumber::String(number.to_string()),
            Raw::String(number) => match number.trim().parse::<u32>() {
                Ok(number) => EpisodeNumber::Number(number),
                Err(_) => EpisodeNumber::String(number),
            },
        })
    }
}

/// One episode of a series, as listed by the listing service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Episode {
    #[serde(rename = "episode")]
    pub number: EpisodeNumber,
    pub session: String,
    #[serde(default)]
    pub snapshot: Option<String>,
    /// Listing page the episode was found on.
    #[serde(skip)]
    pub page: u32,
}

impl Episode {
    /// Episode number padded to the width of the largest number in the batch,
    /// and to at least two digits.
    pub fn display_number(&self, max_episode_number: Option<u32>) -> String {
        format_episode_number(&self.number, episode_number_alignment(max_episode_number))
    }
}

pub fn max_episode_number(episodes: &[Episode]) -> Option<u32> {
    episodes.iter().filter_map(|episode| episode.number.as_number()).max()
}

/// A download option exactly as the listing service reports it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawOption {
    /// Redirect link for this variant.
    pub link: String,
    /// Raw label, e.g. `SubsPlease 1080p (231MB) eng`.
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodePage {
    pub title: Option<String>,
    pub page: u32,
    pub total_pages: u32,
    pub has_next: bool,
    pub episodes: Vec<Episode>,
}
