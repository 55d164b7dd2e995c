use anyhow::Context;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{BrowseCache, Episode, EpisodePage, RawOption, SeriesInfo};
use crate::download::get_page_json;
use crate::progress::ProgressTracker;

pub const DEFAULT_API: &str = "https://anime.disnakamadushan66.workers.dev/";

const EPISODES_PER_PAGE: u64 = 30;

#[derive(Debug, Deserialize)]
struct SeriesResponse {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    total: u64,
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    total_pages: Option<u32>,
    #[serde(default)]
    next: bool,
    #[serde(default)]
    episodes: Vec<Episode>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OptionsResponse {
    Options(Vec<RawOption>),
    Status { status: bool },
}

/// Client for the episode/option listing service.
pub struct Catalog {
    client: reqwest::Client,
    api: Url,
    cache: BrowseCache,
}

impl Catalog {
    pub fn new(api: Url) -> Self {
        Self::with_client(crate::download::default_client().clone(), api)
    }

    pub fn with_client(client: reqwest::Client, api: Url) -> Self {
        Catalog {
            client,
            api,
            cache: BrowseCache::new(),
        }
    }

    fn series_url(&self, series: &str, page: u32) -> Url {
        let mut url = self.api.clone();
        url.query_pairs_mut()
            .append_pair("method", "series")
            .append_pair("session", series)
            .append_pair("page", &page.to_string());
        url
    }

    fn episode_url(&self, series: &str, episode: &str) -> Url {
        let mut url = self.api.clone();
        url.query_pairs_mut()
            .append_pair("method", "episode")
            .append_pair("session", series)
            .append_pair("ep", episode);
        url
    }

    /// Fetches one listing page, bypassing the cache.
    pub async fn fetch_episode_page(
        &self,
        series: &str,
        page: u32,
        token: &CancellationToken,
    ) -> Result<EpisodePage, anyhow::Error> {
        let response: SeriesResponse = get_page_json(Some(&self.client), self.series_url(series, page), token)
            .await
            .with_context(|| format!("failed to fetch episode list page {page}"))?;

        let total_pages = response
            .total_pages
            .unwrap_or_else(|| u32::try_from(response.total.div_ceil(EPISODES_PER_PAGE)).unwrap_or(u32::MAX))
            .max(1);
        let page = response.page.unwrap_or(page);

        let episodes = response
            .episodes
            .into_iter()
            .map(|episode| Episode { page, ..episode })
            .collect();

        Ok(EpisodePage {
            title: response.title,
            page,
            total_pages,
            has_next: response.next || page < total_pages,
            episodes,
        })
    }

    /// Listing page as seen by this browsing session.
    pub async fn episode_page(
        &mut self,
        series: &str,
        page: u32,
        token: &CancellationToken,
    ) -> Result<EpisodePage, anyhow::Error> {
        if let Some(cached) = self.cache.page(series, page) {
            log::trace!("Using cached episode list page {} of {}", page, series);
            return Ok(cached.clone());
        }

        let fetched = self.fetch_episode_page(series, page, token).await?;
        self.cache.insert_page(series, page, fetched.clone());

        Ok(fetched)
    }

    /// Series info and every episode across all listing pages, in listing order.
    pub async fn all_episodes(
        &self,
        series: &str,
        progress: &ProgressTracker,
        token: &CancellationToken,
    ) -> Result<(SeriesInfo, Vec<Episode>), anyhow::Error> {
        let first = self.fetch_episode_page(series, 1, token).await?;
        let total_pages = first.total_pages;
        progress.start_phase("Fetching episode list...", total_pages as u64);
        progress.advance();

        let series_info = SeriesInfo::with_session(series, first.title);
        let mut episodes = first.episodes;

        for page in 2..=total_pages {
            let fetched = self.fetch_episode_page(series, page, token).await?;
            episodes.extend(fetched.episodes);
            progress.advance();
        }

        log::debug!("Found {} episodes on {} pages", episodes.len(), total_pages);

        Ok((series_info, episodes))
    }

    /// Download options of one episode, bypassing the cache.
    pub async fn fetch_options(
        &self,
        series: &str,
        episode: &str,
        token: &CancellationToken,
    ) -> Result<Vec<RawOption>, anyhow::Error> {
        let response: OptionsResponse = get_page_json(Some(&self.client), self.episode_url(series, episode), token)
            .await
            .context("failed to fetch download options")?;

        match response {
            OptionsResponse::Options(options) => Ok(options
                .into_iter()
                .map(|option| RawOption {
                    name: crate::utils::collapse_whitespace(&option.name),
                    ..option
                })
                .collect()),
            OptionsResponse::Status { status } => {
                anyhow::bail!("listing service returned no download options (status: {status})")
            }
        }
    }

    pub async fn options(
        &mut self,
        series: &str,
        episode: &str,
        token: &CancellationToken,
    ) -> Result<Vec<RawOption>, anyhow::Error> {
        if let Some(cached) = self.cache.options(series, episode) {
            return Ok(cached.to_vec());
        }

        let fetched = self.fetch_options(series, episode, token).await?;
        self.cache.insert_options(series, episode, fetched.clone());

        Ok(fetched)
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::Catalog;
    use crate::downloaders::EpisodeNumber;
    use crate::progress::ProgressTracker;

    async fn catalog(server: &MockServer) -> Catalog {
        Catalog::new(format!("{}/", server.uri()).parse().unwrap())
    }

    #[tokio::test]
    async fn test_total_pages_derived_from_total() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("method", "series"))
            .and(query_param("session", "abc"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "total": 61,
                "next": true,
                "episodes": [{"episode": 1, "session": "e1"}, {"episode": "2", "session": "e2"}]
            })))
            .mount(&server)
            .await;

        let token = CancellationToken::new();
        let page = catalog(&server).await.fetch_episode_page("abc", 1, &token).await.unwrap();

        assert_eq!(page.total_pages, 3);
        assert!(page.has_next);
        assert_eq!(page.episodes.len(), 2);
        assert_eq!(page.episodes[1].number, EpisodeNumber::Number(2));
        assert!(page.episodes.iter().all(|episode| episode.page == 1));
    }

    #[tokio::test]
    async fn test_all_episodes_walks_every_page() {
        let server = MockServer::start().await;

        for page in 1..=2 {
            Mock::given(method("GET"))
                .and(query_param("method", "series"))
                .and(query_param("page", page.to_string()))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "title": "Sousou no Frieren",
                    "total": 2,
                    "page": page,
                    "total_pages": 2,
                    "next": page == 1,
                    "episodes": [{"episode": page, "session": format!("e{page}")}]
                })))
                .expect(1)
                .mount(&server)
                .await;
        }

        let token = CancellationToken::new();
        let progress = ProgressTracker::hidden();
        let (series_info, episodes) = catalog(&server)
            .await
            .all_episodes("abc", &progress, &token)
            .await
            .unwrap();

        assert_eq!(series_info.title, "Sousou no Frieren");
        assert_eq!(series_info.session, "abc");
        assert_eq!(
            episodes.iter().map(|episode| episode.session.as_str()).collect::<Vec<_>>(),
            ["e1", "e2"]
        );
        assert_eq!(episodes[1].page, 2);
        assert_eq!(progress.snapshot().current, 2);
    }

    #[tokio::test]
    async fn test_options_are_cached_per_session() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("method", "episode"))
            .and(query_param("ep", "e1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"link": "https://kwik.cx/f/abc", "name": "SubsPlease  1080p (231MB)"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let token = CancellationToken::new();
        let mut catalog = catalog(&server).await;

        let first = catalog.options("abc", "e1", &token).await.unwrap();
        let second = catalog.options("abc", "e1", &token).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first[0].name, "SubsPlease 1080p (231MB)");
    }

    #[tokio::test]
    async fn test_huge_total_saturates_page_count() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("method", "series"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "total": u64::MAX,
                "episodes": []
            })))
            .mount(&server)
            .await;

        let token = CancellationToken::new();
        let page = catalog(&server).await.fetch_episode_page("abc", 1, &token).await.unwrap();

        assert_eq!(page.total_pages, u32::MAX);
        assert!(page.has_next);
    }

    #[tokio::test]
    async fn test_pages_are_cached_by_requested_number() {
        let server = MockServer::start().await;
        // The service answers page 2 but reports itself as page 1
        Mock::given(method("GET"))
            .and(query_param("method", "series"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "total": 60,
                "page": 1,
                "episodes": [{"episode": 31, "session": "e31"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = CancellationToken::new();
        let mut catalog = catalog(&server).await;

        let first = catalog.episode_page("abc", 2, &token).await.unwrap();
        let second = catalog.episode_page("abc", 2, &token).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second.episodes[0].session, "e31");
    }

    #[tokio::test]
    async fn test_status_false_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": false})))
            .mount(&server)
            .await;

        let token = CancellationToken::new();
        let err = catalog(&server).await.fetch_options("abc", "e1", &token).await.unwrap_err();
        assert!(format!("{err:#}").contains("no download options"));
    }
}
