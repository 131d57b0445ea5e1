use std::fmt;

pub mod parser;

#[derive(Debug)]
pub struct FormatError;

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Playlist file format error")
    }
}

impl std::error::Error for FormatError {}

pub type FormatResult<T> = error_stack::Result<T, FormatError>;

/// One `<title><delimiter><artist>` line, exactly as written in the file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackQuery {
    pub title: String,
    pub artist: String,
}

impl TrackQuery {
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
        }
    }

    /// Spotify search syntax restricting the match to the given artist.
    pub fn search_term(&self) -> String {
        format!("{} artist:{}", self.title, self.artist)
    }
}

impl fmt::Display for TrackQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} by {}", self.title, self.artist)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistRequest {
    pub name: String,
    pub tracks: Vec<TrackQuery>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingDelimiter,
    EmptyTitle,
    EmptyArtist,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingDelimiter => f.write_str("no delimiter"),
            SkipReason::EmptyTitle => f.write_str("empty title"),
            SkipReason::EmptyArtist => f.write_str("empty artist"),
        }
    }
}

/// A line the parser skipped without failing the whole document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    pub line_number: usize,
    pub line: String,
    pub reason: SkipReason,
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "line {} skipped ({}): {}",
            self.line_number, self.reason, self.line
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPlaylist {
    pub request: PlaylistRequest,
    pub warnings: Vec<ParseWarning>,
}
