use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::archive::{assemble, ArchiveItem, SaveTarget};
use crate::download::{download_to_file, get_archive_file_name, get_episode_file_name, unique_output_path};
use crate::downloaders::{max_episode_number, Catalog, Episode, RawOption, SeriesInfo};
use crate::error::{is_cancelled, JobError};
use crate::extractors::kwik;
use crate::options::{auto_select, common_options_of, find_common_option, find_option_by_key, CommonOption};
use crate::pool::run_pool;
use crate::probe::probe;
use crate::progress::ProgressTracker;
use crate::proxy::StreamProxy;
use crate::resolver::DirectLinkResolver;

/// External services a job talks to.
pub struct Services {
    pub catalog: Catalog,
    pub resolver: DirectLinkResolver,
    pub proxy: StreamProxy,
}

/// Hands out one cancellation token per job. Beginning a job cancels the
/// token of the previous one.
#[derive(Debug, Default)]
pub struct JobSlot {
    root: CancellationToken,
    current: Mutex<Option<CancellationToken>>,
}

impl JobSlot {
    pub fn new(root: CancellationToken) -> Self {
        JobSlot {
            root,
            current: Mutex::new(None),
        }
    }

    pub fn begin(&self) -> CancellationToken {
        let token = self.root.child_token();
        let previous = self.current.lock().unwrap().replace(token.clone());

        if let Some(previous) = previous {
            log::debug!("Cancelling previous job");
            previous.cancel();
        }

        token
    }

    pub fn cancel(&self) {
        if let Some(current) = self.current.lock().unwrap().take() {
            current.cancel();
        }
    }
}

/// The option of one episode chosen for the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkCandidate {
    pub episode: Episode,
    pub option: RawOption,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLink {
    pub episode: Episode,
    pub direct_url: String,
    /// Kwik link the direct url was resolved from. The media host requires it.
    pub referer: String,
}

/// One season download: episode list, per-episode options, the common option
/// and the archive built from it.
pub struct BulkJob<'a> {
    services: &'a Services,
    token: CancellationToken,
    concurrency: usize,
    series_info: Option<SeriesInfo>,
    episodes: Vec<Episode>,
    candidates: Vec<Vec<RawOption>>,
    common: Vec<CommonOption>,
    selected: Option<String>,
}

impl<'a> BulkJob<'a> {
    pub fn new(services: &'a Services, token: CancellationToken, concurrency: usize) -> Self {
        BulkJob {
            services,
            token,
            concurrency,
            series_info: None,
            episodes: Vec::new(),
            candidates: Vec::new(),
            common: Vec::new(),
            selected: None,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn series_info(&self) -> Option<&SeriesInfo> {
        self.series_info.as_ref()
    }

    pub fn episodes(&self) -> &[Episode] {
        &self.episodes
    }

    pub fn common_options(&self) -> &[CommonOption] {
        &self.common
    }

    fn reset(&mut self) {
        self.series_info = None;
        self.episodes.clear();
        self.candidates.clear();
        self.common.clear();
        self.selected = None;
    }

    /// Collects every episode of the series and their download options.
    pub async fn prepare_all(&mut self, series: &str, progress: &ProgressTracker) -> Result<(), anyhow::Error> {
        self.reset();

        if series.trim().is_empty() {
            return Err(JobError::NoSeries.into());
        }

        progress.start_phase("Fetching episode list...", 1);
        let (series_info, episodes) = self
            .services
            .catalog
            .all_episodes(series, progress, &self.token)
            .await?;

        self.prepare_episodes(series_info, episodes, progress).await
    }

    /// Uses an already fetched episode list, e.g. one listing page.
    pub async fn prepare_episodes(
        &mut self,
        series_info: SeriesInfo,
        episodes: Vec<Episode>,
        progress: &ProgressTracker,
    ) -> Result<(), anyhow::Error> {
        self.reset();

        if series_info.session.trim().is_empty() {
            return Err(JobError::NoSeries.into());
        }

        if episodes.is_empty() {
            return Err(JobError::NoEpisodes.into());
        }

        progress.start_phase("Fetching download options...", episodes.len() as u64);

        let catalog = &self.services.catalog;
        let series = series_info.session.as_str();
        let token = &self.token;

        let candidates = run_pool(&episodes, self.concurrency, token, move |episode, _| async move {
            let options = catalog
                .fetch_options(series, &episode.session, token)
                .await
                .with_context(|| format!("failed to fetch download options for EP {}", episode.number))?;
            progress.advance();
            Ok::<_, anyhow::Error>(options)
        })
        .await?;

        self.common = common_options_of(&candidates);
        self.selected = auto_select(None, &self.common);

        log::debug!(
            "{} episodes, {} common download options",
            episodes.len(),
            self.common.len()
        );

        self.series_info = Some(series_info);
        self.episodes = episodes;
        self.candidates = candidates;

        Ok(())
    }

    /// Selects a common option by key, label or 1-based index.
    pub fn select(&mut self, query: &str) -> Result<&CommonOption, anyhow::Error> {
        let option = find_common_option(&self.common, query).ok_or_else(|| JobError::UnknownOption(query.to_owned()))?;
        self.selected = Some(option.key.clone());

        Ok(option)
    }

    pub fn selected(&self) -> Option<&CommonOption> {
        let key = self.selected.as_deref()?;
        self.common.iter().find(|option| option.key == key)
    }

    /// The selected option of every episode, or nothing if any episode lacks it.
    pub fn selected_links(&self) -> Vec<LinkCandidate> {
        let Some(key) = self.selected.as_deref() else {
            return Vec::new();
        };

        let mut links = Vec::with_capacity(self.episodes.len());

        for (episode, options) in self.episodes.iter().zip(&self.candidates) {
            match find_option_by_key(options, key) {
                Some(option) => links.push(LinkCandidate {
                    episode: episode.clone(),
                    option: option.clone(),
                }),
                None => return Vec::new(),
            }
        }

        links
    }

    pub fn is_ready(&self) -> bool {
        !self.episodes.is_empty() && self.selected_links().len() == self.episodes.len()
    }

    /// Decodes and resolves the direct url of every selected link.
    pub async fn resolve_links(
        &self,
        links: &[LinkCandidate],
        progress: &ProgressTracker,
    ) -> Result<Vec<ResolvedLink>, anyhow::Error> {
        progress.start_phase("Resolving direct links...", links.len() as u64);

        let resolver = &self.services.resolver;
        let token = &self.token;

        run_pool(links, self.concurrency, token, move |link, _| async move {
            let kwik_url = kwik::redirect_url(&link.option.link, token)
                .await
                .with_context(|| format!("failed to decode redirect page of EP {}", link.episode.number))?;
            let direct_url = resolver
                .resolve(&kwik_url, token)
                .await
                .with_context(|| format!("direct link missing (EP {})", link.episode.number))?;
            progress.advance();

            Ok::<_, anyhow::Error>(ResolvedLink {
                episode: link.episode.clone(),
                direct_url,
                referer: kwik_url,
            })
        })
        .await
    }

    /// Fails on the first stream the proxy cannot serve.
    pub async fn probe_links(&self, resolved: &[ResolvedLink], progress: &ProgressTracker) -> Result<(), anyhow::Error> {
        progress.start_phase("Checking availability...", resolved.len() as u64);

        let proxy = &self.services.proxy;
        let token = &self.token;

        run_pool(resolved, self.concurrency, token, move |link, _| async move {
            let stream_url = proxy.stream_url(&link.direct_url, &link.referer);
            probe(None, &stream_url, token)
                .await
                .with_context(|| format!("stream of EP {} is unavailable", link.episode.number))?;
            progress.advance();
            Ok::<_, anyhow::Error>(())
        })
        .await?;

        Ok(())
    }

    /// Resolves, probes and streams every episode of the selected option into
    /// one archive opened on `target`. Returns the archive name.
    pub async fn download_archive<S: SaveTarget>(
        &self,
        target: &mut S,
        progress: &ProgressTracker,
    ) -> Result<String, anyhow::Error> {
        target.validate()?;

        let links = self.selected_links();
        let (Some(series_info), Some(selected)) = (self.series_info.as_ref(), self.selected()) else {
            return Err(JobError::NotReady.into());
        };

        if links.is_empty() || links.len() != self.episodes.len() {
            return Err(JobError::NotReady.into());
        }

        let resolved = self.resolve_links(&links, progress).await?;
        self.probe_links(&resolved, progress).await?;

        let max_episode = max_episode_number(&self.episodes);
        let items = resolved
            .iter()
            .map(|link| ArchiveItem {
                episode: link.episode.display_number(max_episode),
                file_name: get_episode_file_name(series_info, &link.episode.number, max_episode),
                url: self.services.proxy.stream_url(&link.direct_url, &link.referer),
            })
            .collect::<Vec<_>>();

        let archive_name = get_archive_file_name(series_info, &selected.label);
        let sink = target.open(&archive_name).await?;

        progress.start_phase("Downloading & zipping...", items.len() as u64);
        let result = assemble(&items, sink, None, progress, &self.token).await;

        match result {
            Ok(()) => {
                progress.finish();
                Ok(archive_name)
            }
            Err(err) => {
                if let Err(discard_err) = target.discard().await {
                    log::warn!("{:#}", discard_err);
                }

                if !is_cancelled(&err) {
                    progress.abandon();
                }

                Err(err)
            }
        }
    }
}

/// Options of one episode with their kwik links. Options whose redirect page
/// cannot be decoded are dropped with a warning.
pub async fn browse_option_links(
    options: &[RawOption],
    concurrency: usize,
    token: &CancellationToken,
) -> Result<Vec<(RawOption, String)>, anyhow::Error> {
    let links = run_pool(options, concurrency, token, move |option, _| async move {
        match kwik::redirect_url(&option.link, token).await {
            Ok(url) => Ok::<_, anyhow::Error>(Some((option.clone(), url))),
            Err(err) if is_cancelled(&err) => Err(err),
            Err(err) => {
                log::warn!("Skipping download option {}: {:#}", option.name, err);
                Ok(None)
            }
        }
    })
    .await?;

    Ok(links.into_iter().flatten().collect())
}

/// Downloads one episode in the option matching `option_query` (key, label or
/// 1-based index among the episode's options) into `directory`.
pub async fn download_single_episode(
    services: &Services,
    series_info: &SeriesInfo,
    episode: &Episode,
    option_query: Option<&str>,
    directory: &Path,
    progress: &ProgressTracker,
    token: &CancellationToken,
) -> Result<PathBuf, anyhow::Error> {
    let options = services
        .catalog
        .fetch_options(&series_info.session, &episode.session, token)
        .await?;
    let common = common_options_of(std::slice::from_ref(&options));

    let chosen = match option_query {
        Some(query) => find_common_option(&common, query).ok_or_else(|| JobError::UnknownOption(query.to_owned()))?,
        None => common.first().ok_or(JobError::NotReady)?,
    };
    let option = find_option_by_key(&options, &chosen.key).ok_or(JobError::NotReady)?;

    log::info!("Downloading EP {} in {}", episode.number, chosen.label);

    let kwik_url = kwik::redirect_url(&option.link, token)
        .await
        .context("failed to decode redirect page")?;
    let direct_url = services.resolver.resolve(&kwik_url, token).await?;
    let stream_url = services.proxy.stream_url(&direct_url, &kwik_url);

    let file_name = get_episode_file_name(series_info, &episode.number, None);
    let output_path = unique_output_path(directory, &file_name)?;

    download_to_file(None, &stream_url, &output_path, file_name, progress, token).await?;

    Ok(output_path)
}
