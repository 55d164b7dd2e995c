use std::collections::{HashMap, HashSet};
use std::fmt::Display;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::downloaders::RawOption;
use crate::utils::collapse_whitespace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioTag {
    Dual,
    Eng,
    Jpn,
    Dub,
}

impl AudioTag {
    /// Detects the audio tag of a raw label. The first matching tag in
    /// `DUAL`, `ENG`, `JPN`, `DUB` order wins.
    pub fn detect(raw_label: &str) -> Option<AudioTag> {
        static TAG_REGEXES: Lazy<[(AudioTag, Regex); 4]> = Lazy::new(|| {
            [
                (AudioTag::Dual, Regex::new(r"(?i)\bdual\b|\bdual[-\s]?audio\b").unwrap()),
                (AudioTag::Eng, Regex::new(r"(?i)\beng\b|\benglish\b").unwrap()),
                (AudioTag::Jpn, Regex::new(r"(?i)\bjpn\b|\bjapanese\b").unwrap()),
                (AudioTag::Dub, Regex::new(r"(?i)\bdub\b|\bdubbed\b").unwrap()),
            ]
        });

        TAG_REGEXES
            .iter()
            .find(|(_, regex)| regex.is_match(raw_label))
            .map(|(tag, _)| *tag)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioTag::Dual => "DUAL",
            AudioTag::Eng => "ENG",
            AudioTag::Jpn => "JPN",
            AudioTag::Dub => "DUB",
        }
    }
}

impl Display for AudioTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strips parenthetical and bracket annotations and audio annotations, then
/// collapses whitespace.
pub fn normalize_base_label(label: &str) -> String {
    static PARENTHESES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\([^)]*\)").unwrap());
    static BRACKETS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[^\]]*\]").unwrap());
    static AUDIO_ANNOTATION: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)\baudio\s*:\s*(?:dual|english|eng|japanese|jpn)\b").unwrap());
    static AUDIO_KEYWORD: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)\b(?:dual[-\s]?audio|dual|english|eng|japanese|jpn|dubbed|dub)\b").unwrap()
    });

    let label = PARENTHESES.replace_all(label, " ");
    let label = BRACKETS.replace_all(&label, " ");
    let label = AUDIO_ANNOTATION.replace_all(&label, " ");
    let label = AUDIO_KEYWORD.replace_all(&label, " ");

    collapse_whitespace(&label)
}

/// A raw option label with its derived, comparable forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOption {
    pub raw_label: String,
    pub base_label: String,
    pub audio: Option<AudioTag>,
    /// `<base>||<TAG>`, or `<base>||` without an audio tag.
    pub key: String,
    /// `<base> (<TAG>)`, or just `<base>` without an audio tag.
    pub display_label: String,
}

impl DownloadOption {
    pub fn parse(raw_label: &str) -> Self {
        let audio = AudioTag::detect(raw_label);
        let base_label = normalize_base_label(raw_label);
        let audio_str = audio.map(|tag| tag.as_str()).unwrap_or_default();

        let display_label = match audio {
            Some(tag) => format!("{base_label} ({tag})"),
            None => base_label.clone(),
        };

        DownloadOption {
            raw_label: raw_label.to_owned(),
            key: format!("{base_label}||{audio_str}"),
            base_label,
            audio,
            display_label,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonOption {
    pub key: String,
    pub label: String,
}

/// Options offered by every episode of a batch, sorted by display label.
///
/// Each item of `episodes` is the list of raw labels of one episode. An
/// episode without labels makes the result empty.
pub fn common_options<'a, I, E>(episodes: I) -> Vec<CommonOption>
where
    I: IntoIterator<Item = E>,
    E: IntoIterator<Item = &'a str>,
{
    let mut common: Option<HashSet<String>> = None;
    let mut label_by_key = HashMap::new();

    for labels in episodes {
        let keys = labels
            .into_iter()
            .map(|raw_label| {
                let option = DownloadOption::parse(raw_label);
                label_by_key.insert(option.key.clone(), option.display_label);
                option.key
            })
            .collect::<HashSet<_>>();

        let intersection = match common {
            Some(common) => common.intersection(&keys).cloned().collect(),
            None => keys,
        };
        let is_empty = intersection.is_empty();
        common = Some(intersection);

        if is_empty {
            break;
        }
    }

    let mut options = common
        .unwrap_or_default()
        .into_iter()
        .map(|key| CommonOption {
            label: label_by_key.get(&key).cloned().unwrap_or_else(|| key.clone()),
            key,
        })
        .collect::<Vec<_>>();

    options.sort_by(|a, b| {
        a.label
            .to_lowercase()
            .cmp(&b.label.to_lowercase())
            .then_with(|| a.label.cmp(&b.label))
    });

    options
}

pub fn common_options_of(candidates: &[Vec<RawOption>]) -> Vec<CommonOption> {
    common_options(
        candidates
            .iter()
            .map(|options| options.iter().map(|option| option.name.as_str())),
    )
}

/// Keeps an existing selection, otherwise picks the first common option.
pub fn auto_select(current: Option<String>, common: &[CommonOption]) -> Option<String> {
    current.or_else(|| common.first().map(|option| option.key.clone()))
}

/// Finds a common option by key, display label (case-insensitive) or 1-based index.
pub fn find_common_option<'a>(common: &'a [CommonOption], query: &str) -> Option<&'a CommonOption> {
    let query = query.trim();

    common
        .iter()
        .find(|option| option.key == query)
        .or_else(|| common.iter().find(|option| option.label.eq_ignore_ascii_case(query)))
        .or_else(|| {
            query
                .parse::<usize>()
                .ok()
                .and_then(|index| index.checked_sub(1))
                .and_then(|index| common.get(index))
        })
}

/// First option of one episode whose composite key equals `key`.
pub fn find_option_by_key<'a>(options: &'a [RawOption], key: &str) -> Option<&'a RawOption> {
    options
        .iter()
        .find(|option| DownloadOption::parse(&option.name).key == key)
}

#[cfg(test)]
mod tests {
    use super::{auto_select, common_options, find_common_option, normalize_base_label, AudioTag, DownloadOption};

    fn keys(episodes: &[Vec<&str>]) -> Vec<String> {
        common_options(episodes.iter().map(|labels| labels.iter().copied()))
            .into_iter()
            .map(|option| option.key)
            .collect()
    }

    #[test]
    fn test_parse_option() {
        let option = DownloadOption::parse("SubsPlease · 1080p (231MB) [BD] eng");
        assert_eq!(option.base_label, "SubsPlease · 1080p");
        assert_eq!(option.audio, Some(AudioTag::Eng));
        assert_eq!(option.key, "SubsPlease · 1080p||ENG");
        assert_eq!(option.display_label, "SubsPlease · 1080p (ENG)");

        let option = DownloadOption::parse("BD  1080p");
        assert_eq!(option.audio, None);
        assert_eq!(option.key, "BD 1080p||");
        assert_eq!(option.display_label, "BD 1080p");
    }

    #[test]
    fn test_audio_tag_priority() {
        let tests = [
            ("Dual-Audio English", Some(AudioTag::Dual)),
            ("English Dubbed", Some(AudioTag::Eng)),
            ("Japanese dub", Some(AudioTag::Jpn)),
            ("Dubbed 720p", Some(AudioTag::Dub)),
            ("Engine 720p", None),
            ("720p", None),
        ];

        for (input, expected) in tests {
            assert_eq!(AudioTag::detect(input), expected, "failed for {input}");
        }
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let labels = [
            "WEB-DL 720p (DUAL)",
            "WEB-DL 720p Audio: English",
            "  SubsPlease\t1080p [HEVC]  (231MB) ",
            "((nested)) label",
            "[a(b]c) label",
            "(unclosed label",
            "dual audio eng 480p",
        ];

        for label in labels {
            let once = normalize_base_label(label);
            assert_eq!(normalize_base_label(&once), once, "failed for {label}");
        }
    }

    #[test]
    fn test_common_options_scenario() {
        let full = vec!["WEB-DL 720p (DUAL)", "WEB-DL 720p Audio: English", "BD 1080p"];
        let without_bd = vec!["WEB-DL 720p (DUAL)", "WEB-DL 720p Audio: English"];

        let options = common_options([full.clone(), full, without_bd].iter().map(|labels| labels.iter().copied()));

        assert_eq!(
            options.iter().map(|option| option.key.as_str()).collect::<Vec<_>>(),
            ["WEB-DL 720p||DUAL", "WEB-DL 720p||ENG"]
        );
        assert_eq!(
            options.iter().map(|option| option.label.as_str()).collect::<Vec<_>>(),
            ["WEB-DL 720p (DUAL)", "WEB-DL 720p (ENG)"]
        );
    }

    #[test]
    fn test_intersection_ignores_episode_order() {
        let a = vec!["SubsPlease 1080p eng", "SubsPlease 720p eng", "BD 1080p"];
        let b = vec!["SubsPlease 720p eng", "SubsPlease 1080p eng"];
        let c = vec!["SubsPlease 1080p (88MB) eng", "BD 1080p", "SubsPlease 720p eng"];

        let expected = keys(&[a.clone(), b.clone(), c.clone()]);
        assert_eq!(expected, ["SubsPlease 1080p||ENG", "SubsPlease 720p||ENG"]);
        assert_eq!(keys(&[c.clone(), a.clone(), b.clone()]), expected);
        assert_eq!(keys(&[b.clone(), c.clone(), a.clone()]), expected);

        assert!(keys(&[a, Vec::new(), b]).is_empty());
        assert!(keys(&[c, Vec::new()]).is_empty());
        assert!(keys(&[]).is_empty());
    }

    #[test]
    fn test_sorting_is_case_insensitive() {
        let labels = vec!["beta 720p", "Alpha 720p", "alpha 1080p"];
        let options = common_options([labels.iter().copied()]);

        assert_eq!(
            options.iter().map(|option| option.label.as_str()).collect::<Vec<_>>(),
            ["alpha 1080p", "Alpha 720p", "beta 720p"]
        );
    }

    #[test]
    fn test_selection() {
        let labels = vec!["WEB-DL 720p (DUAL)", "WEB-DL 720p Audio: English"];
        let options = common_options([labels.iter().copied()]);

        assert_eq!(auto_select(None, &options).as_deref(), Some("WEB-DL 720p||DUAL"));
        assert_eq!(
            auto_select(Some("WEB-DL 720p||ENG".to_string()), &options).as_deref(),
            Some("WEB-DL 720p||ENG")
        );
        assert_eq!(auto_select(None, &[]), None);

        assert_eq!(find_common_option(&options, "WEB-DL 720p||ENG").unwrap().key, "WEB-DL 720p||ENG");
        assert_eq!(find_common_option(&options, "web-dl 720p (eng)").unwrap().key, "WEB-DL 720p||ENG");
        assert_eq!(find_common_option(&options, "1").unwrap().key, "WEB-DL 720p||DUAL");
        assert!(find_common_option(&options, "0").is_none());
        assert!(find_common_option(&options, "3").is_none());
    }
}
