use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use url::Url;

use pahe_dl::downloaders::animepahe::DEFAULT_API;
use pahe_dl::pool::DEFAULT_CONCURRENCY;
use pahe_dl::proxy::DEFAULT_PROXY;

#[derive(Parser, Debug)]
#[command(version)]
/// Download single episodes or whole seasons as one zip archive
pub(crate) struct Args {
    /// Episode listing service
    #[arg(long, env = "PAHE_API", default_value = DEFAULT_API, value_name = "URL")]
    pub(crate) api: Url,

    /// Direct link resolution service
    #[arg(long, env = "PAHE_RESOLVER", value_name = "URL")]
    pub(crate) resolver: Option<Url>,

    /// Streaming proxy
    #[arg(long, env = "PAHE_PROXY", default_value = DEFAULT_PROXY, value_name = "URL")]
    pub(crate) proxy: Url,

    /// Token sent to the resolution service
    #[arg(long, env = "PAHE_AUTH", hide_env_values = true, value_name = "TOKEN")]
    pub(crate) auth: Option<String>,

    /// Simultaneous requests per phase
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENCY, value_parser = parse_concurrency, value_name = "NUMBER")]
    pub(crate) concurrency: usize,

    /// Output directory [default: download directory]
    #[arg(short, long, value_name = "DIR")]
    pub(crate) output: Option<PathBuf>,

    /// Enable debug mode
    #[arg(short, long)]
    pub(crate) debug: bool,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// List the episodes of one listing page
    Episodes {
        #[command(flatten)]
        series: SeriesArg,

        /// Listing page
        #[arg(short, long, default_value_t = 1)]
        page: u32,
    },
    /// List the download options of one episode
    Options {
        #[command(flatten)]
        episode: EpisodeArg,
    },
    /// Download one episode
    Episode {
        #[command(flatten)]
        episode: EpisodeArg,

        /// Download option: key, label or number from `options`
        #[arg(long = "option", value_name = "OPTION")]
        option: Option<String>,
    },
    /// Download a whole season as one zip archive
    Season {
        #[command(flatten)]
        series: SeriesArg,

        /// Only the episodes of this listing page
        #[arg(short, long)]
        page: Option<u32>,

        /// Common download option: key, label or number from `--list`
        #[arg(long = "option", value_name = "OPTION")]
        option: Option<String>,

        /// Only list the download options common to every episode
        #[arg(long)]
        list: bool,
    },
}

#[derive(ClapArgs, Debug)]
pub(crate) struct SeriesArg {
    /// Series session id
    #[arg(value_name = "SERIES")]
    pub(crate) series: String,
}

#[derive(ClapArgs, Debug)]
pub(crate) struct EpisodeArg {
    /// Series session id
    #[arg(value_name = "SERIES")]
    pub(crate) series: String,

    /// Episode number or episode session id
    #[arg(value_name = "EPISODE")]
    pub(crate) episode: String,
}

impl Args {
    /// Resolver endpoint, required by every download command.
    pub(crate) fn require_resolver(&self) -> Result<Url, anyhow::Error> {
        self.resolver
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no resolution service configured, use --resolver or PAHE_RESOLVER"))
    }
}

fn parse_concurrency(input: &str) -> Result<usize, String> {
    let concurrency = input
        .parse::<usize>()
        .map_err(|err| format!("failed to parse \"{input}\" as number: {err}"))?;

    if concurrency == 0 {
        return Err("concurrency must be greater than 0".to_string());
    }

    Ok(concurrency)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Args, Command};

    #[test]
    fn test_season_args() {
        let args = Args::try_parse_from([
            "pahe-dl",
            "--resolver",
            "https://resolver.example/",
            "-c",
            "5",
            "season",
            "abc-123",
            "--page",
            "2",
            "--option",
            "1",
        ])
        .unwrap();

        assert_eq!(args.concurrency, 5);
        assert!(args.require_resolver().is_ok());

        match args.command {
            Command::Season {
                series, page, option, list,
            } => {
                assert_eq!(series.series, "abc-123");
                assert_eq!(page, Some(2));
                assert_eq!(option.as_deref(), Some("1"));
                assert!(!list);
            }
            command => panic!("unexpected command {command:?}"),
        }
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        assert!(Args::try_parse_from(["pahe-dl", "-c", "0", "episodes", "abc"]).is_err());
    }
}
