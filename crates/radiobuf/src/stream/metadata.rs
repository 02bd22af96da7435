//! ICY metadata parsing
//!
//! Pure parsing of the `key='value';` records that Icecast/Shoutcast servers
//! interleave into the audio stream when asked with `Icy-MetaData: 1`.

const STREAM_TITLE_KEY: &str = "StreamTitle='";

/// Current track as announced by the station
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrackInfo {
    /// Raw `StreamTitle` value, whitespace-trimmed. May be empty.
    pub title: String,
}

impl TrackInfo {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }

    /// Split on the first ` - `: "Artist - Title" → (Some(artist), Some(title)).
    /// Without a separator the whole string is the title.
    pub fn split(&self) -> (Option<String>, Option<String>) {
        let raw = self.title.trim();
        if raw.is_empty() {
            return (None, None);
        }

        match raw.find(" - ") {
            Some(pos) => {
                let artist = raw[..pos].trim();
                let title = raw[pos + 3..].trim();
                (non_empty(artist), non_empty(title))
            }
            None => (None, Some(raw.to_string())),
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Extract the `StreamTitle` value from a metadata record.
///
/// Format: `StreamTitle='Artist - Song';StreamUrl='...';`. The value ends at
/// the first `';`, so titles containing `;` survive. A record whose title
/// is unterminated (`StreamTitle='Song'`) is accepted up to the closing quote.
pub fn parse_stream_title(metadata: &str) -> Option<String> {
    let start = metadata.find(STREAM_TITLE_KEY)? + STREAM_TITLE_KEY.len();
    let rest = &metadata[start..];
    let value = match rest.find("';") {
        Some(end) => &rest[..end],
        None => rest.strip_suffix('\'').unwrap_or(rest),
    };
    Some(value.trim().to_string())
}

/// Extract the title from a raw metadata block.
///
/// Blocks are NUL-padded to a multiple of 16 bytes; padding is stripped and
/// invalid UTF-8 replaced before parsing.
pub fn extract_icy_title(raw_block: &[u8]) -> Option<String> {
    let end = raw_block
        .iter()
        .rposition(|&b| b != 0)
        .map(|p| p + 1)
        .unwrap_or(0);
    if end == 0 {
        return None;
    }

    let meta_str = String::from_utf8_lossy(&raw_block[..end]);
    parse_stream_title(&meta_str)
}
