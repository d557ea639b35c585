use std::collections::BTreeSet;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_GROUP: &str = "General";
const EXTINF: &str = "#EXTINF:";
const UNNAMED: &str = "Unnamed channel";

lazy_static! {
    static ref RE_LOGO: Regex = Regex::new(r#"(?i)tvg-logo="([^"]*)""#).unwrap();
    static ref RE_GROUP: Regex = Regex::new(r#"(?i)group-title="([^"]*)""#).unwrap();
    static ref RE_DASH_PREFIX: Regex = Regex::new(r"^\s*-\s*").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub url: String,
    pub group: String,
    pub logo: String,
    /// Position inside the loaded catalog. The parser leaves this at 0;
    /// `Catalog::load` assigns it.
    #[serde(default)]
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedPlaylist {
    pub channels: Vec<Channel>,
    /// Sorted, always contains [`DEFAULT_GROUP`].
    pub categories: Vec<String>,
}

/// True when the text carries at least one `#EXT` directive.
pub fn looks_like_m3u(content: &str) -> bool {
    content.contains("#EXT")
}

pub fn parse_m3u(content: &str) -> ParsedPlaylist {
    let lines: Vec<&str> = content.split('\n').map(str::trim).collect();
    let mut categories = BTreeSet::new();
    categories.insert(DEFAULT_GROUP.to_string());

    let mut channels = parse_attributed(&lines, &mut categories);
    if channels.is_empty() {
        channels = parse_loose(&lines);
    }

    ParsedPlaylist {
        channels,
        categories: categories.into_iter().collect(),
    }
}

fn parse_attributed(lines: &[&str], categories: &mut BTreeSet<String>) -> Vec<Channel> {
    let mut channels = Vec::new();
    let mut pending: Option<Channel> = None;

    for line in lines {
        if line.starts_with(EXTINF) {
            let logo = capture(&RE_LOGO, line).unwrap_or_default();
            let group = capture(&RE_GROUP, line)
                .filter(|g| !g.is_empty())
                .unwrap_or_else(|| DEFAULT_GROUP.to_string());
            let name = extinf_name(line, channels.len());

            categories.insert(group.clone());
            pending = Some(Channel {
                name,
                url: String::new(),
                group,
                logo,
                index: 0,
            });
        } else if !line.is_empty() && !line.starts_with('#') {
            if let Some(mut channel) = pending.take() {
                channel.url = line.to_string();
                if channel.url.starts_with("http") {
                    channels.push(channel);
                }
            }
        }
    }

    channels
}

/// Second chance for playlists whose `#EXTINF` lines the attribute pass
/// could not use: name after the first comma, everything else defaulted.
fn parse_loose(lines: &[&str]) -> Vec<Channel> {
    let mut channels = Vec::new();
    let mut pending: Option<Channel> = None;

    for line in lines {
        if line.starts_with(EXTINF) {
            if let Some((_, name)) = line.split_once(',') {
                pending = Some(Channel {
                    name: name.trim().to_string(),
                    url: String::new(),
                    group: DEFAULT_GROUP.to_string(),
                    logo: String::new(),
                    index: 0,
                });
            }
        } else if !line.is_empty() && !line.starts_with('#') {
            // An entry without a name never takes a url.
            if pending.as_ref().is_some_and(|c| !c.name.is_empty()) {
                if let Some(mut channel) = pending.take() {
                    channel.url = line.to_string();
                    if channel.url.starts_with("http") {
                        channels.push(channel);
                    }
                }
            }
        }
    }

    channels
}

fn capture(re: &Regex, line: &str) -> Option<String> {
    re.captures(line).map(|caps| caps[1].to_string())
}

fn extinf_name(line: &str, parsed_so_far: usize) -> String {
    let Some(pos) = line.rfind(',') else {
        return UNNAMED.to_string();
    };

    let trimmed = line[pos + 1..].trim();
    let stripped = RE_DASH_PREFIX.replace(trimmed, "");
    let name = match stripped.find('|') {
        Some(bar) => stripped[..bar].trim_end(),
        None => &stripped[..],
    };

    if name.is_empty() {
        format!("Channel {}", parsed_so_far + 1)
    } else {
        name.to_string()
    }
}

/// Writes channels back out in a form `parse_m3u` reads losslessly, as long
/// as no field embeds a double quote.
pub fn write_m3u(channels: &[Channel]) -> String {
    let mut out = String::from("#EXTM3U\n");
    for channel in channels {
        out.push_str(&format!(
            "#EXTINF:-1 tvg-name=\"{}\" tvg-logo=\"{}\" group-title=\"{}\",{}\n",
            channel.name, channel.logo, channel.group, channel.name
        ));
        out.push_str(&channel.url);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(name: &str, url: &str, group: &str, logo: &str) -> Channel {
        Channel {
            name: name.to_string(),
            url: url.to_string(),
            group: group.to_string(),
            logo: logo.to_string(),
            index: 0,
        }
    }

    #[test]
    fn test_parse_m3u() {
        let data = "#EXTM3U\n#EXTINF:-1 tvg-logo=\"x.png\" group-title=\"News\",Channel A\nhttp://a.test/stream\n#EXTINF:-1,Channel B\nhttp://b.test/s\n";

        let parsed = parse_m3u(data);
        assert_eq!(
            parsed.channels,
            vec![
                channel("Channel A", "http://a.test/stream", "News", "x.png"),
                channel("Channel B", "http://b.test/s", "General", ""),
            ]
        );
        assert_eq!(parsed.categories, vec!["General", "News"]);
    }

    #[test]
    fn test_no_markers() {
        let parsed = parse_m3u("no markers here");
        assert!(parsed.channels.is_empty());
        assert_eq!(parsed.categories, vec!["General"]);

        let parsed = parse_m3u("");
        assert!(parsed.channels.is_empty());
        assert_eq!(parsed.categories, vec!["General"]);
    }

    #[test]
    fn test_non_http_url_is_dropped() {
        let parsed = parse_m3u("#EXTM3U\n#EXTINF:-1 group-title=\"Movies\",Film\nnot-a-url\n");
        assert!(parsed.channels.is_empty());
        assert_eq!(parsed.categories, vec!["General", "Movies"]);
    }

    #[test]
    fn test_url_without_extinf_is_ignored() {
        let parsed = parse_m3u("#EXTM3U\nhttp://orphan.test/s\n#EXTINF:-1,Real\nhttp://real.test/s\n");
        assert_eq!(parsed.channels.len(), 1);
        assert_eq!(parsed.channels[0].name, "Real");
    }

    #[test]
    fn test_consecutive_extinf_keeps_last() {
        let data = "#EXTINF:-1 group-title=\"A\",First\n#EXTINF:-1 group-title=\"B\",Second\nhttp://x.test/1\n";
        let parsed = parse_m3u(data);
        assert_eq!(parsed.channels.len(), 1);
        assert_eq!(parsed.channels[0].name, "Second");
        assert_eq!(parsed.channels[0].group, "B");
        // Both groups were seen, even though only one channel survived.
        assert_eq!(parsed.categories, vec!["A", "B", "General"]);
    }

    #[test]
    fn test_other_directives_are_ignored() {
        let data = "#EXTM3U\n#EXTINF:0,3sat SD\n#EXTVLCOPT:network-caching=1000\nhttp://192.168.178.1/3sat\n";
        let parsed = parse_m3u(data);
        assert_eq!(parsed.channels.len(), 1);
        assert_eq!(parsed.channels[0].url, "http://192.168.178.1/3sat");
    }

    #[test]
    fn test_name_cleanup() {
        let data = "#EXTINF:-1 tvg-name=\"a,b\",  - Sports 1 | FHD\nhttp://s.test/1\n\
                    #EXTINF:-1 group-title=\"X\",\nhttp://s.test/2\n\
                    #EXTINF:-1 group-title=\"X\",|only suffix\nhttp://s.test/3\n";
        let parsed = parse_m3u(data);
        let names: Vec<&str> = parsed.channels.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Sports 1", "Channel 2", "Channel 3"]);
    }

    #[test]
    fn test_extinf_without_comma() {
        let parsed = parse_m3u("#EXTINF:-1 group-title=\"News\"\nhttp://n.test/1\n");
        assert_eq!(parsed.channels[0].name, "Unnamed channel");
        assert_eq!(parsed.channels[0].group, "News");
    }

    #[test]
    fn test_attribute_keys_are_case_insensitive() {
        let parsed = parse_m3u("#EXTINF:-1 TVG-LOGO=\"l.png\" Group-Title=\"Kids\",Toons\nhttps://k.test/1\n");
        assert_eq!(parsed.channels[0].logo, "l.png");
        assert_eq!(parsed.channels[0].group, "Kids");
    }

    #[test]
    fn test_empty_group_defaults() {
        let parsed = parse_m3u("#EXTINF:-1 group-title=\"\",Blank\nhttp://b.test/1\n");
        assert_eq!(parsed.channels[0].group, "General");
        assert_eq!(parsed.categories, vec!["General"]);
    }

    #[test]
    fn test_categories_sorted_ordinal() {
        let data = "#EXTINF:-1 group-title=\"news\",a\nhttp://x/1\n\
                    #EXTINF:-1 group-title=\"Movies\",b\nhttp://x/2\n\
                    #EXTINF:-1 group-title=\"Zeta\",c\nhttp://x/3\n";
        let parsed = parse_m3u(data);
        assert_eq!(parsed.categories, vec!["General", "Movies", "Zeta", "news"]);
    }

    #[test]
    fn test_crlf_lines() {
        let parsed = parse_m3u("#EXTM3U\r\n#EXTINF:-1,Win\r\nhttp://w.test/1\r\n");
        assert_eq!(parsed.channels[0].name, "Win");
        assert_eq!(parsed.channels[0].url, "http://w.test/1");
    }

    #[test]
    fn test_loose_pass() {
        let lines = vec!["#EXTINF:-1,First, with comma", "http://a.test/1", "#EXTINF:-1,", "http://a.test/2", "#EXTINF:-1", "http://a.test/3"];
        let channels = parse_loose(&lines);
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].name, "First, with comma");
        assert_eq!(channels[0].group, "General");
        assert_eq!(channels[0].logo, "");
    }

    #[test]
    fn test_every_url_is_http() {
        let data = "#EXTINF:-1,a\nrtsp://x/1\n#EXTINF:-1,b\nhttps://x/2\n#EXTINF:-1,c\nftp://x/3\n#EXTINF:-1,d\nhttp://x/4\n";
        let parsed = parse_m3u(data);
        assert_eq!(parsed.channels.len(), 2);
        assert!(parsed.channels.iter().all(|c| c.url.starts_with("http")));
    }

    #[test]
    fn test_write_then_parse_preserves_fields() {
        let channels = vec![
            channel("One", "http://one.test/live.m3u8", "News", "http://logo.test/1.png"),
            channel("Two", "https://two.test/s", "General", ""),
            channel("Três", "http://three.test/s?a=1&b=2", "Filmes & Séries", "x.png"),
        ];
        let parsed = parse_m3u(&write_m3u(&channels));
        assert_eq!(parsed.channels, channels);
        assert_eq!(parsed.categories, vec!["Filmes & Séries", "General", "News"]);
    }

    #[test]
    fn test_quality_suffix_survives_export() {
        let parsed = parse_m3u("#EXTINF:-1 group-title=\"Sports\",Sports 1 | FHD\nhttp://s.test/1\n");
        assert_eq!(parsed.channels[0].name, "Sports 1");

        let reparsed = parse_m3u(&write_m3u(&parsed.channels));
        assert_eq!(reparsed, parsed);
    }

    #[test]
    fn test_looks_like_m3u() {
        assert!(looks_like_m3u("#EXTM3U\n"));
        assert!(!looks_like_m3u("<html>nope</html>"));
    }
}
