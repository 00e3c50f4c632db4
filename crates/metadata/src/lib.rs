use std::path::Path;

use lofty::error::LoftyError;
use lofty::prelude::{AudioFile, ItemKey, TaggedFileExt};

#[derive(Debug, Default, Clone)]
pub struct TrackTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album_artist: Option<String>,
    pub album: Option<String>,
    pub track_no: Option<u16>,
    pub disc_no: Option<u16>,
    pub year: Option<i32>,
    pub genre: Option<String>,
    pub length_secs: Option<u32>,
    // Bits per second.
    pub bitrate: Option<u32>,
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "tag error: {}", err),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Lofty(err)
    }
}

pub fn read_tags(path: &Path) -> Result<TrackTags, MetadataError> {
    let tagged_file = lofty::read_from_path(path)?;
    let properties = tagged_file.properties();

    let mut tags = TrackTags::default();

    let secs = properties.duration().as_secs();
    if secs > 0 {
        tags.length_secs = Some(secs.min(u64::from(u32::MAX)) as u32);
    }
    // lofty reports kbps
    tags.bitrate = properties
        .audio_bitrate()
        .or(properties.overall_bitrate())
        .map(|kbps| kbps.saturating_mul(1000));

    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        tags.title = non_empty(tag.get_string(&ItemKey::TrackTitle));
        tags.album = non_empty(tag.get_string(&ItemKey::AlbumTitle));
        tags.artist = non_empty(tag.get_string(&ItemKey::TrackArtist));
        tags.album_artist = non_empty(tag.get_string(&ItemKey::AlbumArtist));
        tags.track_no = tag.get_string(&ItemKey::TrackNumber).and_then(parse_u16);
        tags.disc_no = tag.get_string(&ItemKey::DiscNumber).and_then(parse_u16);
        tags.year = tag
            .get_string(&ItemKey::Year)
            .or_else(|| tag.get_string(&ItemKey::RecordingDate))
            .and_then(parse_year);
        tags.genre = tag.get_string(&ItemKey::Genre).and_then(first_genre);
    }

    Ok(tags)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

fn parse_u16(text: &str) -> Option<u16> {
    let head = text.split('/').next().unwrap_or(text).trim();
    head.parse().ok()
}

fn parse_year(text: &str) -> Option<i32> {
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            if digits.len() == 4 {
                break;
            }
        } else if !digits.is_empty() {
            break;
        }
    }
    if digits.len() != 4 {
        None
    } else {
        digits.parse().ok()
    }
}

fn first_genre(text: &str) -> Option<String> {
    text.split(&[';', ',', '/', '|', '\0'][..])
        .map(|part| part.trim())
        .find(|part| !part.is_empty())
        .map(|part| part.to_string())
}
