// Release-name matching between a video file and subtitle releases

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

static RE_EXTENSION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.[a-zA-Z0-9]+$").unwrap());
static RE_SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[._-]+").unwrap());
static RE_SPACE_COLLAPSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static RE_SE_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"s\d+\s*e?\d+").unwrap());
static SE_PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        // S03E07
        Regex::new(r"s(\d+)\s*e(\d+)").unwrap(),
        // S03_07
        Regex::new(r"s(\d+)\s*(\d+)").unwrap(),
        // 3x07
        Regex::new(r"(\d+)x(\d+)").unwrap(),
    ]
});
static RE_GROUP_DASH_BRACKET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-([a-z0-9]+)\[").unwrap());
static RE_GROUP_BRACKETS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[([a-z0-9.]+)\]|\[([a-z0-9.]+)\]$").unwrap());
static RE_GROUP_TRAILING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-\s]([a-z0-9]+)$").unwrap());

const SOURCE_TYPES: &[&str] = &[
    "web-dl", "webdl", "webrip", "bluray", "blu-ray", "brrip", "hdrip", "hdtv", "dvdrip",
];
const RESOLUTION_TAGS: &[&str] = &["2160p", "1080p", "720p", "480p", "4k", "uhd", "hd"];
const CODEC_TAGS: &[&str] = &["x264", "h264", "x265", "hevc"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseComponents {
    pub title: String,
    /// `sNNeNN`, empty when the name has no episode marker
    pub season_episode: String,
    pub quality: String,
    pub group: String,
}

pub fn extract_release_components(name: &str) -> ReleaseComponents {
    if name.is_empty() {
        return ReleaseComponents::default();
    }

    let lowered = name.to_lowercase();
    let lowered = RE_EXTENSION.replace(&lowered, "").into_owned();
    let normalized = RE_SEPARATORS.replace_all(&lowered, " ").into_owned();

    let season_episode = SE_PATTERNS
        .iter()
        .find_map(|re| {
            let caps = re.captures(&normalized)?;
            let season: u32 = caps.get(1)?.as_str().parse().ok()?;
            let episode: u32 = caps.get(2)?.as_str().parse().ok()?;
            Some(format_season_episode(season, episode))
        })
        .unwrap_or_default();

    let mut quality_parts = Vec::new();
    if let Some(source) = SOURCE_TYPES.iter().find(|s| normalized.contains(*s)) {
        quality_parts.push(source.replace('-', ""));
    }
    if let Some(res) = RESOLUTION_TAGS.iter().find(|r| normalized.contains(*r)) {
        quality_parts.push(res.to_string());
    }
    let quality = quality_parts.join(" ");

    let group = if let Some(caps) = RE_GROUP_DASH_BRACKET.captures(&lowered) {
        caps[1].to_string()
    } else if let Some(caps) = RE_GROUP_BRACKETS.captures(&lowered) {
        caps.get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    } else if let Some(caps) = RE_GROUP_TRAILING.captures(&normalized) {
        caps[1].to_string()
    } else {
        String::new()
    };

    let mut title = normalized.clone();
    if !season_episode.is_empty() {
        title = RE_SE_TOKEN.replace_all(&title, "").into_owned();
    }
    for tag in SOURCE_TYPES
        .iter()
        .chain(RESOLUTION_TAGS.iter())
        .chain(CODEC_TAGS.iter())
    {
        title = title.replace(tag, "");
    }
    let title = RE_SPACE_COLLAPSE.replace_all(&title, " ").trim().to_string();

    ReleaseComponents {
        title,
        season_episode,
        quality,
        group,
    }
}

pub fn format_season_episode(season: u32, episode: u32) -> String {
    format!("s{:02}e{:02}", season, episode)
}

/// Weighted similarity in 0.0..=1.0
///
/// Series (video has a season/episode marker): S/E 40%, group 40%, quality 15%, title 5%.
/// Movies: group 50%, quality 20%, title 30%.
pub fn calculate_filename_similarity(video_filename: &str, subtitle_release: &str) -> f64 {
    if video_filename.is_empty() || subtitle_release.is_empty() {
        return 0.0;
    }

    let video = extract_release_components(video_filename);
    let subtitle = extract_release_components(subtitle_release);

    if video.title.is_empty() || subtitle.title.is_empty() {
        return 0.0;
    }

    let se_sim = if !video.season_episode.is_empty() && video.season_episode == subtitle.season_episode
    {
        1.0
    } else {
        0.0
    };

    let group_sim = if !video.group.is_empty() && !subtitle.group.is_empty() {
        ratio(&video.group, &subtitle.group) / 100.0
    } else {
        0.0
    };

    let quality_sim = if !video.quality.is_empty() && !subtitle.quality.is_empty() {
        token_set_ratio(&video.quality, &subtitle.quality) / 100.0
    } else {
        0.0
    };

    let title_sim = token_sort_ratio(&video.title, &subtitle.title) / 100.0;

    if !video.season_episode.is_empty() {
        se_sim * 0.4 + group_sim * 0.4 + quality_sim * 0.15 + title_sim * 0.05
    } else {
        group_sim * 0.5 + quality_sim * 0.2 + title_sim * 0.3
    }
}

/// Normalized indel similarity, 0..=100
pub fn ratio(a: &str, b: &str) -> f64 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let total = a_chars.len() + b_chars.len();
    if total == 0 {
        return 100.0;
    }
    let lcs = longest_common_subsequence(&a_chars, &b_chars);
    200.0 * lcs as f64 / total as f64
}

pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    ratio(&sorted_tokens(a), &sorted_tokens(b))
}

pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let a_tokens: BTreeSet<&str> = a.split_whitespace().collect();
    let b_tokens: BTreeSet<&str> = b.split_whitespace().collect();
    if a_tokens.is_empty() || b_tokens.is_empty() {
        return 0.0;
    }

    let intersection: Vec<&str> = a_tokens.intersection(&b_tokens).copied().collect();
    let diff_ab: Vec<&str> = a_tokens.difference(&b_tokens).copied().collect();
    let diff_ba: Vec<&str> = b_tokens.difference(&a_tokens).copied().collect();

    // One side is a subset of the other
    if !intersection.is_empty() && (diff_ab.is_empty() || diff_ba.is_empty()) {
        return 100.0;
    }

    let sect = intersection.join(" ");
    let combined_ab = join_nonempty(&sect, &diff_ab.join(" "));
    let combined_ba = join_nonempty(&sect, &diff_ba.join(" "));

    let mut best = ratio(&combined_ab, &combined_ba);
    if !sect.is_empty() {
        best = best
            .max(ratio(&sect, &combined_ab))
            .max(ratio(&sect, &combined_ba));
    }
    best
}

fn sorted_tokens(s: &str) -> String {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

fn join_nonempty(a: &str, b: &str) -> String {
    match (a.is_empty(), b.is_empty()) {
        (true, _) => b.to_string(),
        (_, true) => a.to_string(),
        _ => format!("{} {}", a, b),
    }
}

fn longest_common_subsequence(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let n = b.len();
    let mut prev: Vec<usize> = vec![0; n + 1];
    let mut curr: Vec<usize> = vec![0; n + 1];

    for ac in a {
        for j in 1..=n {
            curr[j] = if *ac == b[j - 1] {
                prev[j - 1] + 1
            } else {
                prev[j].max(curr[j - 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_series_release() {
        let parts = extract_release_components("Show.Name.S03E07.1080p.WEB-DL.x264-BiOMA[EZTVx.to].mkv");
        assert_eq!(parts.season_episode, "s03e07");
        // dashes are already normalized away, so "web-dl" is not detected
        assert_eq!(parts.quality, "1080p");
        assert_eq!(parts.group, "bioma");
        assert_eq!(parts.title, "show name web dl bioma[eztvx to]");
    }

    #[test]
    fn test_extract_alternate_episode_markers() {
        assert_eq!(
            extract_release_components("show_s2_05_hdtv").season_episode,
            "s02e05"
        );
        assert_eq!(
            extract_release_components("Show 3x7 DVDRip-GRP").season_episode,
            "s03e07"
        );
    }

    #[test]
    fn test_extract_movie_release() {
        let parts = extract_release_components("Movie.Title.2019.BluRay.720p.x265-RARBG.mp4");
        assert_eq!(parts.season_episode, "");
        assert_eq!(parts.quality, "bluray 720p");
        assert_eq!(parts.group, "rarbg");
        assert_eq!(parts.title, "movie title 2019 rarbg");
    }

    #[test]
    fn test_extract_bracket_group() {
        let parts = extract_release_components("[SubsPlease] Frieren - 05 (1080p).mkv");
        assert_eq!(parts.group, "subsplease");
    }

    #[test]
    fn test_extract_empty() {
        assert_eq!(extract_release_components(""), ReleaseComponents::default());
    }

    #[test]
    fn test_ratio() {
        assert_eq!(ratio("abc", "abc"), 100.0);
        assert_eq!(ratio("abc", "xyz"), 0.0);
        // lcs("bioma", "biomas") = 5 -> 200 * 5 / 11
        assert!((ratio("bioma", "biomas") - 1000.0 / 11.0).abs() < 1e-9);
    }

    #[test]
    fn test_token_ratios() {
        assert_eq!(token_sort_ratio("name show", "show name"), 100.0);
        assert_eq!(token_set_ratio("webdl 1080p", "1080p"), 100.0);
        assert!(token_set_ratio("webrip 720p", "bluray 1080p") < 50.0);
    }

    #[test]
    fn test_similarity_prefers_same_episode_and_group() {
        let video = "Show.S01E02.1080p.WEB-DL-NTb.mkv";
        let exact = calculate_filename_similarity(video, "Show.S01E02.1080p.WEB-DL-NTb");
        let other_group = calculate_filename_similarity(video, "Show.S01E02.720p.HDTV-KILLERS");
        let other_episode = calculate_filename_similarity(video, "Show.S01E03.1080p.WEB-DL-NTb");

        assert!((exact - 1.0).abs() < 1e-9);
        assert!(exact > other_group);
        assert!(exact > other_episode);
    }

    #[test]
    fn test_similarity_empty_inputs() {
        assert_eq!(calculate_filename_similarity("", "Show.S01E01"), 0.0);
        assert_eq!(calculate_filename_similarity("Show.S01E01.mkv", ""), 0.0);
        // title collapses to nothing
        assert_eq!(calculate_filename_similarity("1080p.mkv", "Movie.1080p"), 0.0);
    }
}
