use error_stack::Report;

use crate::config::{DataOrder, Settings};
use crate::playlist::{
    FormatError, FormatResult, ParseWarning, ParsedPlaylist, PlaylistRequest, SkipReason,
    TrackQuery,
};

const NAME_PREFIX: &str = "name:";
const COMMENT_PREFIX: char = '#';

/// Turns the text of a playlist file into a [`PlaylistRequest`].
#[derive(Debug, Clone)]
pub struct PlaylistParser {
    delimiter: String,
    order: DataOrder,
}

impl PlaylistParser {
    pub fn new(delimiter: impl Into<String>, order: DataOrder) -> Self {
        Self {
            delimiter: delimiter.into(),
            order,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.delimiter.clone(), settings.data_order)
    }

    pub fn parse(&self, text: &str) -> FormatResult<ParsedPlaylist> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut lines = text.lines().enumerate();

        let name = loop {
            let Some((_, line)) = lines.next() else {
                return Err(Report::new(FormatError)
                    .attach_printable("No line starting with `Name:` was found"));
            };
            if let Some(name) = strip_name_prefix(line.trim()) {
                break name;
            }
        };
        if name.is_empty() {
            return Err(Report::new(FormatError).attach_printable("The playlist name is empty"));
        }

        let mut tracks = vec![];
        let mut warnings = vec![];
        for (index, line) in lines {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with(COMMENT_PREFIX) {
                continue;
            }
            match self.parse_track(trimmed) {
                Ok(track) => tracks.push(track),
                Err(reason) => {
                    log::warn!("Skipping line {}: {}", index + 1, reason);
                    warnings.push(ParseWarning {
                        line_number: index + 1,
                        line: trimmed.to_string(),
                        reason,
                    });
                }
            }
        }

        Ok(ParsedPlaylist {
            request: PlaylistRequest {
                name: name.to_string(),
                tracks,
            },
            warnings,
        })
    }

    fn parse_track(&self, line: &str) -> Result<TrackQuery, SkipReason> {
        let (first, second) = line
            .split_once(self.delimiter.as_str())
            .ok_or(SkipReason::MissingDelimiter)?;
        let (title, artist) = match self.order {
            DataOrder::TrackArtist => (first.trim(), second.trim()),
            DataOrder::ArtistTrack => (second.trim(), first.trim()),
        };
        if title.is_empty() {
            return Err(SkipReason::EmptyTitle);
        }
        if artist.is_empty() {
            return Err(SkipReason::EmptyArtist);
        }
        Ok(TrackQuery::new(title, artist))
    }
}

fn strip_name_prefix(line: &str) -> Option<&str> {
    let prefix = line.get(..NAME_PREFIX.len())?;
    if !prefix.eq_ignore_ascii_case(NAME_PREFIX) {
        return None;
    }
    Some(line[NAME_PREFIX.len()..].trim())
}
