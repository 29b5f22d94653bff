use super::score::normalize;

/// A play request split into what to search for and any explicit artist intent.
///
/// Artist intent is only read from explicit forms: `artist:<name>`,
/// `by <name>`, `<name> -` (artist only) or `<artist> - <title>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    pub search_text: String,
    pub artist_token: Option<String>,
    pub has_title: bool,
}

impl ParsedQuery {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let lower = trimmed.to_lowercase();

        for prefix in ["artist:", "by "] {
            if lower.starts_with(prefix) {
                let artist = normalize(&trimmed[prefix.len()..]);
                return Self::artist_only(artist);
            }
        }

        if let Some(artist) = trimmed.strip_suffix('-') {
            return Self::artist_only(normalize(artist));
        }

        if let Some((artist, title)) = trimmed.split_once(" - ") {
            let artist = normalize(artist);
            let title = normalize(title);
            if !artist.is_empty() {
                return Self {
                    search_text: normalize(&format!("{} {}", artist, title)),
                    has_title: !title.is_empty(),
                    artist_token: Some(artist),
                };
            }
        }

        Self {
            search_text: normalize(trimmed),
            artist_token: None,
            has_title: true,
        }
    }

    fn artist_only(artist: String) -> Self {
        Self {
            search_text: artist.clone(),
            artist_token: Some(artist).filter(|a| !a.is_empty()),
            has_title: false,
        }
    }

    /// The artist named by an artist-only query.
    pub fn artist_intent(&self) -> Option<&str> {
        if self.has_title {
            None
        } else {
            self.artist_token.as_deref()
        }
    }
}
