use std::collections::HashMap;

use super::{EpisodePage, RawOption};

/// Listing responses of one browsing session.
///
/// Entries are never invalidated, so a long-lived session can show episodes
/// or options that the listing service has since changed. Start a new session
/// to see fresh data.
#[derive(Debug, Default)]
pub struct BrowseCache {
    pages: HashMap<(String, u32), EpisodePage>,
    options: HashMap<(String, String), Vec<RawOption>>,
}

impl BrowseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(&self, series: &str, page: u32) -> Option<&EpisodePage> {
        self.pages.get(&(series.to_owned(), page))
    }

    /// Stores `page` under the page number it was requested as, whatever
    /// number the response reports for itself.
    pub fn insert_page(&mut self, series: &str, page_number: u32, page: EpisodePage) {
        self.pages.insert((series.to_owned(), page_number), page);
    }

    pub fn options(&self, series: &str, episode: &str) -> Option<&[RawOption]> {
        self.options
            .get(&(series.to_owned(), episode.to_owned()))
            .map(Vec::as_slice)
    }

    pub fn insert_options(&mut self, series: &str, episode: &str, options: Vec<RawOption>) {
        self.options.insert((series.to_owned(), episode.to_owned()), options);
    }
}
