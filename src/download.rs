use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use once_cell::sync::Lazy;
use reqwest::header::HeaderName;
use reqwest::redirect::Policy;
use reqwest::IntoUrl;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt as _;
use tokio_util::sync::CancellationToken;

use crate::downloaders::{EpisodeNumber, SeriesInfo};
use crate::error::Cancelled;
use crate::progress::ProgressTracker;
use crate::utils::remove_file_ignore_not_exists;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36";

static DEFAULT_CLIENT_NO_REDIRECT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .user_agent(DEFAULT_USER_AGENT)
        .connect_timeout(Duration::from_secs(20))
        .redirect(Policy::none()) // redirects handled in get_response
        .build()
        .unwrap()
});

pub fn default_client() -> &'static reqwest::Client {
    &DEFAULT_CLIENT_NO_REDIRECT
}

/// Races `future` against the token, dropping (and thereby aborting) the
/// future as soon as the token is cancelled.
pub async fn cancellable<T, F>(token: &CancellationToken, future: F) -> Result<T, anyhow::Error>
where
    F: Future<Output = Result<T, anyhow::Error>>,
{
    if token.is_cancelled() {
        return Err(Cancelled.into());
    }

    token
        .run_until_cancelled(future)
        .await
        .unwrap_or_else(|| Err(Cancelled.into()))
}

pub async fn get_response<U: IntoUrl>(
    client: Option<&reqwest::Client>,
    url: U,
    referer: Option<&str>,
    extra_headers: Option<&[(HeaderName, &str)]>,
    token: &CancellationToken,
) -> Result<reqwest::Response, anyhow::Error> {
    // We need to handle redirects ourself, because reqwest changes the Referer
    // header on redirection
    let client = client.unwrap_or_else(|| default_client());
    let mut last_url = url.into_url().context("failed to parse url")?;
    let mut redirect_count = 0u32;

    loop {
        let mut request = client.get(last_url.clone());

        request = request.header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.5");

        if let Some(referer) = referer {
            request = request.header(reqwest::header::REFERER, referer);
        }

        if let Some(extra_headers) = extra_headers {
            for (header, value) in extra_headers {
                request = request.header(header, *value);
            }
        }

        let response = cancellable(token, async {
            request.send().await.context("failed to request url")
        })
        .await?;

        let is_redirect_code = [301, 308, 302, 303, 307].contains(&response.status().as_u16());
        let location_header = response.headers().get(reqwest::header::LOCATION);

        match (is_redirect_code, location_header) {
            (true, Some(redirect_url)) => {
                if redirect_count >= 10 {
                    anyhow::bail!("more than 10 redirects");
                }

                redirect_count += 1;
                let redirect_url = redirect_url
                    .to_str()
                    .context("redirect url could not be converted to string")?;
                last_url = last_url
                    .join(redirect_url)
                    .context("redirect url could not be parsed")?;
                log::trace!("Following redirect to {}", last_url);
            }
            _ => return Ok(response),
        }
    }
}

pub(crate) fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, anyhow::Error> {
    let status = response.status();

    if !status.is_success() {
        anyhow::bail!("HTTP {} from {}", status, response.url());
    }

    Ok(response)
}

pub async fn get_page_text<U: IntoUrl>(
    client: Option<&reqwest::Client>,
    url: U,
    referer: Option<&str>,
    token: &CancellationToken,
) -> Result<String, anyhow::Error> {
    let response = ensure_success(get_response(client, url, referer, None, token).await?)?;

    cancellable(token, async {
        response.text().await.context("failed to parse response body as text")
    })
    .await
}

pub async fn get_page_json<T: DeserializeOwned, U: IntoUrl>(
    client: Option<&reqwest::Client>,
    url: U,
    token: &CancellationToken,
) -> Result<T, anyhow::Error> {
    let response = ensure_success(get_response(client, url, None, None, token).await?)?;

    cancellable(token, async {
        response.json().await.context("failed to parse response body as json")
    })
    .await
}

/// Streams `url` into a new file at `output_path`. The file is removed again
/// if the download fails or is cancelled.
pub async fn download_to_file(
    client: Option<&reqwest::Client>,
    url: &str,
    output_path: &Path,
    message: String,
    progress: &ProgressTracker,
    token: &CancellationToken,
) -> Result<(), anyhow::Error> {
    let target_file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(output_path)
        .await
        .context("failed to open download target file")?;

    let result = simple_download(client, url, target_file, message, progress, token).await;

    if result.is_err() {
        if let Err(err) = remove_file_ignore_not_exists(output_path).await {
            log::warn!("Failed to remove incomplete file {}: {}", output_path.display(), err);
        }
    }

    result
}

async fn simple_download(
    client: Option<&reqwest::Client>,
    url: &str,
    target_file: tokio::fs::File,
    message: String,
    progress: &ProgressTracker,
    token: &CancellationToken,
) -> Result<(), anyhow::Error> {
    let mut response = ensure_success(get_response(client, url, None, None, token).await?)?;
    let content_length = response.content_length();
    let byte_bar = progress.start_bytes(message, content_length);

    let mut output_stream = tokio::io::BufWriter::new(target_file);
    let mut downloaded = 0;

    loop {
        let chunk = cancellable(token, async { response.chunk().await.context("failed download") }).await;

        match chunk {
            Ok(Some(chunk)) => {
                downloaded += chunk.len() as u64;

                if let Err(err) = output_stream.write_all(&chunk).await {
                    byte_bar.abandon();
                    return Err(err).context("failed writing to download file");
                }

                byte_bar.set_position(downloaded);
            }
            Ok(None) => break,
            Err(err) => {
                byte_bar.abandon();
                return Err(err);
            }
        }
    }

    // Replace estimation with total size after download finished
    // Useful if Content-Length was unavailable or inaccurate
    byte_bar.set_length(downloaded);
    byte_bar.set_position(downloaded);

    output_stream.flush().await.context("failed to flush download file")?;
    output_stream
        .into_inner()
        .sync_all()
        .await
        .context("failed to sync download file")?;
    byte_bar.finish();

    Ok(())
}

pub(crate) fn prepare_series_name_for_file(name: &str) -> Option<String> {
    use regex::Regex;

    const NAME_LIMIT: usize = 160;

    let no_control_chars = name.replace(|c: char| c.is_ascii_control(), "");
    let no_special_spaces = no_control_chars.replace(char::is_whitespace, " ");
    let no_quotes = no_special_spaces.replace('\"', "");

    static COLON_V1_REGEX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"([\p{LETTER}[:digit:]]): +([\p{LETTER}[:digit:]])").unwrap());
    static COLON_V2_REGEX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"([\p{LETTER}[:digit:]]):([\p{LETTER}[:digit:]])").unwrap());
    let no_colon = COLON_V1_REGEX.replace_all(&no_quotes, r"${1} - ${2}");
    let no_colon = COLON_V2_REGEX.replace_all(&no_colon, r"${1} ${2}");
    let no_colon = no_colon.replace(':', "");

    static QUESTION_MARKS_REGEX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"([\p{LETTER}[:digit:]])\?+ +([\p{LETTER}[:digit:]])").unwrap());
    let no_question_marks = QUESTION_MARKS_REGEX.replace_all(&no_colon, r"${1} - ${2}");
    let no_question_marks = no_question_marks.replace('?', "");

    static SLASH_V1_REGEX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"\b([\p{LETTER}[:digit:]])/+([\p{LETTER}[:digit:]])\b").unwrap());
    static SLASH_V2_REGEX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"([\p{LETTER}[:digit:]])/+([\p{LETTER}[:digit:]])").unwrap());
    let no_slashs = SLASH_V1_REGEX.replace_all(&no_question_marks, r"${1}${2}");
    let no_slashs = SLASH_V2_REGEX.replace_all(&no_slashs, r"${1} ${2}");
    let no_slashs = no_slashs.replace('/', "");

    let no_extra = no_slashs.replace(['\\', '*', '<', '>', '|'], "");

    static MULTIPLE_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").unwrap());
    let no_multiple_space = MULTIPLE_SPACE.replace_all(&no_extra, " ");
    let no_dot_or_space_at_ends = no_multiple_space.trim_matches(|c: char| c == ' ' || c == '.');

    if no_dot_or_space_at_ends.is_empty() {
        None
    } else {
        let mut total_bytes = 0;

        Some(
            no_dot_or_space_at_ends
                .chars()
                .take_while(|c| {
                    total_bytes += c.len_utf8();
                    total_bytes <= NAME_LIMIT
                })
                .collect(),
        )
    }
}

/// Name used inside the season archive and for single-episode files:
/// `<series> - EP <episode>.mp4`.
pub fn get_episode_file_name(
    series_info: &SeriesInfo,
    episode_number: &EpisodeNumber,
    max_episode_number: Option<u32>,
) -> String {
    let series_name = prepare_series_name_for_file(&series_info.title).unwrap_or_else(|| "Unknown".to_owned());

    format!(
        "{} - EP {}.mp4",
        series_name,
        format_episode_number(episode_number, episode_number_alignment(max_episode_number))
    )
}

/// Digits of the largest episode number in a batch, at least two.
pub(crate) fn episode_number_alignment(max_episode_number: Option<u32>) -> Option<usize> {
    max_episode_number.map(|max_num| ((max_num.checked_ilog10().unwrap_or(0) + 1) as usize).max(2))
}

/// Name of the season archive: `<series> - <option label>.zip`.
pub fn get_archive_file_name(series_info: &SeriesInfo, option_label: &str) -> String {
    let series_name = prepare_series_name_for_file(&series_info.title).unwrap_or_else(|| "Unknown".to_owned());

    match prepare_series_name_for_file(option_label) {
        Some(label) => format!("{series_name} - {label}.zip"),
        None => format!("{series_name}.zip"),
    }
}

pub fn unique_output_path(directory: &Path, file_name: &str) -> Result<PathBuf, anyhow::Error> {
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| file_name.to_owned());
    let extension = path.extension().map(|extension| extension.to_string_lossy().to_string());
    let mut i = 0u32;

    loop {
        let name = match (i, &extension) {
            (0, _) => file_name.to_owned(),
            (i, Some(extension)) => format!("{stem} ({i}).{extension}"),
            (i, None) => format!("{stem} ({i})"),
        };
        let candidate = directory.join(&name);
        let exists = candidate
            .try_exists()
            .with_context(|| format!("failed to check if the file \"{}\" exists", name))?;

        if !exists {
            return Ok(candidate);
        }

        match i.checked_add(1) {
            Some(next_i) => i = next_i,
            None => anyhow::bail!("failed to find a name for the file"),
        }
    }
}

pub(crate) fn format_episode_number(episode_number: &EpisodeNumber, alignment_episode_number: Option<usize>) -> String {
    match episode_number {
        EpisodeNumber::Number(episode_number) => {
            format!("{episode_number:0>fill$}", fill = alignment_episode_number.unwrap_or(2))
        }
        EpisodeNumber::String(episode_number) => {
            let trimmed_episode_number = episode_number.trim();

            if let Some((pre, post)) = trimmed_episode_number.split_once(['.', ',']) {
                let pre_all_digits = pre.bytes().all(|b| b.is_ascii_digit());
                let post_all_digits = post.bytes().all(|b| b.is_ascii_digit());

                if pre_all_digits && post_all_digits {
                    let delim = trimmed_episode_number.as_bytes()[pre.len()] as char;
                    return format!(
                        "{pre:0>fill$}{delim}{post}",
                        fill = alignment_episode_number.unwrap_or(2)
                    );
                }
            }

            trimmed_episode_number.to_owned()
        }
    }
}
