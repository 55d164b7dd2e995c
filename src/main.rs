#![cfg_attr(not(debug_assertions), allow(warnings, unused))]
use clap::Parser;
use cli::{Args, Command, EpisodeArg};
use indicatif::{HumanBytes, MultiProgress};
use pahe_dl::archive::{DirectorySaveTarget, SaveTarget};
use pahe_dl::downloaders::{max_episode_number, Catalog, Episode, SeriesInfo};
use pahe_dl::error::{is_cancelled, JobError};
use pahe_dl::job::{browse_option_links, download_single_episode, BulkJob, JobSlot, Services};
use pahe_dl::options::{common_options_of, find_option_by_key};
use pahe_dl::progress::ProgressTracker;
use pahe_dl::proxy::StreamProxy;
use pahe_dl::resolver::DirectLinkResolver;
use tokio_util::sync::CancellationToken;

pub(crate) mod cli;
pub(crate) mod dirs;
pub(crate) mod logger;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Parse arguments
    let args = cli::Args::parse();

    // Set up logger
    let multi_progress = MultiProgress::new();
    let logger = logger::default_logger(args.debug);
    logger::ProgressLogger::new(multi_progress.clone(), logger)
        .init()
        .unwrap();

    // Interrupt cancels the running job
    let root = CancellationToken::new();
    let slot = JobSlot::new(root.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::debug!("Received interrupt, cancelling");
            root.cancel();
        }
    });

    let progress = ProgressTracker::new(multi_progress);
    let result = run(args, &slot, &progress).await;
    progress.finish();

    let exit_code = match result {
        Ok(()) => 0,
        Err(err) if is_cancelled(&err) => 130,
        Err(err) if err.downcast_ref::<JobError>() == Some(&JobError::NoEpisodes) => {
            log::warn!("{}", err);
            0
        }
        Err(err) => {
            log::error!("{:#}", err);
            1
        }
    };

    std::process::exit(exit_code);
}

async fn run(args: Args, slot: &JobSlot, progress: &ProgressTracker) -> Result<(), anyhow::Error> {
    let token = slot.begin();
    let mut catalog = Catalog::new(args.api.clone());

    match &args.command {
        Command::Episodes { series, page } => list_episodes(&mut catalog, &series.series, *page, &token).await,
        Command::Options { episode } => list_options(&mut catalog, episode, args.concurrency, &token).await,
        Command::Episode { episode, option } => {
            // Fail fast on configuration before any request
            let resolver = args.require_resolver()?;
            let directory = dirs::get_save_directory(args.output.clone()).await?;
            DirectorySaveTarget::new(&directory).validate()?;

            let (series_info, found) = find_episode(&mut catalog, episode, &token).await?;
            let services = services(&args, catalog, resolver);

            let path = download_single_episode(
                &services,
                &series_info,
                &found,
                option.as_deref(),
                &directory,
                progress,
                &token,
            )
            .await?;

            log::info!("Saved {}", path.display());
            Ok(())
        }
        Command::Season {
            series,
            page,
            option,
            list,
        } => {
            let resolver = args.require_resolver()?;
            let mut target = DirectorySaveTarget::new(dirs::get_save_directory(args.output.clone()).await?);
            target.validate()?;

            let services = services(&args, catalog, resolver);
            let mut job = BulkJob::new(&services, token, args.concurrency);

            match page {
                Some(page) => {
                    progress.start_phase("Fetching episode list...", 1);
                    let fetched = services
                        .catalog
                        .fetch_episode_page(&series.series, *page, job.token())
                        .await?;
                    let series_info = SeriesInfo::with_session(series.series.as_str(), fetched.title);
                    job.prepare_episodes(series_info, fetched.episodes, progress).await?
                }
                None => job.prepare_all(&series.series, progress).await?,
            }
            progress.finish();

            if *list {
                print_common_options(&job);
                return Ok(());
            }

            if let Some(option) = option {
                job.select(option)?;
            }

            let Some(selected) = job.selected() else {
                anyhow::bail!(
                    "no download option is available for all {} episodes",
                    job.episodes().len()
                );
            };

            log::info!(
                "Downloading {} episodes in {}",
                job.episodes().len(),
                selected.label
            );

            let archive_name = job.download_archive(&mut target, progress).await?;
            let path = target
                .opened_path()
                .map(|path| path.to_path_buf())
                .unwrap_or_else(|| archive_name.into());

            match tokio::fs::metadata(&path).await {
                Ok(metadata) => log::info!("Saved {} ({})", path.display(), HumanBytes(metadata.len())),
                Err(_) => log::info!("Saved {}", path.display()),
            }
            Ok(())
        }
    }
}

fn services(args: &Args, catalog: Catalog, resolver: url::Url) -> Services {
    Services {
        catalog,
        resolver: DirectLinkResolver::new(resolver, args.auth.clone()),
        proxy: StreamProxy::new(args.proxy.clone()),
    }
}

async fn list_episodes(
    catalog: &mut Catalog,
    series: &str,
    page: u32,
    token: &CancellationToken,
) -> Result<(), anyhow::Error> {
    let fetched = catalog.episode_page(series, page, token).await?;

    if fetched.episodes.is_empty() {
        return Err(JobError::NoEpisodes.into());
    }

    let series_info = SeriesInfo::with_session(series, fetched.title);
    let max_episode = max_episode_number(&fetched.episodes);

    println!(
        "{} (page {}/{})",
        series_info.title, fetched.page, fetched.total_pages
    );

    for episode in &fetched.episodes {
        println!("{}", episode_line(episode, max_episode));
    }

    if fetched.has_next {
        println!("More episodes on page {}", fetched.page + 1);
    }

    Ok(())
}

/// Number, session id and snapshot url of one listed episode.
fn episode_line(episode: &Episode, max_episode: Option<u32>) -> String {
    format!(
        "EP {}  {}  {}",
        episode.display_number(max_episode),
        episode.session,
        episode.snapshot.as_deref().unwrap_or("-")
    )
}

async fn list_options(
    catalog: &mut Catalog,
    episode: &EpisodeArg,
    concurrency: usize,
    token: &CancellationToken,
) -> Result<(), anyhow::Error> {
    let (series_info, found) = find_episode(catalog, episode, token).await?;
    let options = catalog.options(&series_info.session, &found.session, token).await?;
    let links = browse_option_links(&options, concurrency, token).await?;

    println!("{} EP {}", series_info.title, found.number);

    // Numbered the same way `episode --option` counts
    for (index, common) in common_options_of(std::slice::from_ref(&options)).iter().enumerate() {
        let link = find_option_by_key(&options, &common.key)
            .and_then(|option| links.iter().find(|(candidate, _)| candidate == option))
            .map(|(_, url)| url.as_str())
            .unwrap_or("redirect page could not be decoded");

        println!("{:>3}. {}\n     {}", index + 1, common.label, link);
    }

    Ok(())
}

fn print_common_options(job: &BulkJob<'_>) {
    let selected = job.selected().map(|option| option.key.as_str());

    if job.common_options().is_empty() {
        println!("No download option is available for all {} episodes", job.episodes().len());
        return;
    }

    for (index, option) in job.common_options().iter().enumerate() {
        let marker = if Some(option.key.as_str()) == selected { '*' } else { ' ' };
        println!("{marker}{:>3}. {}", index + 1, option.label);
    }
}

/// Finds an episode by number or session id, walking the listing pages in order.
async fn find_episode(
    catalog: &mut Catalog,
    episode: &EpisodeArg,
    token: &CancellationToken,
) -> Result<(SeriesInfo, Episode), anyhow::Error> {
    let query = episode.episode.trim();
    let mut page = 1;

    loop {
        let fetched = catalog.episode_page(&episode.series, page, token).await?;

        let found = fetched
            .episodes
            .iter()
            .find(|candidate| candidate.session == query || candidate.number.to_string() == query);

        if let Some(found) = found {
            let series_info = SeriesInfo::with_session(episode.series.as_str(), fetched.title.clone());
            return Ok((series_info, found.clone()));
        }

        if page >= fetched.total_pages {
            anyhow::bail!("episode {} not found in series {}", query, episode.series);
        }

        page += 1;
    }
}
