// SPDX-FileCopyrightText: 2025 Contributors to the OpenCDM Rust project.
// SPDX-License-Identifier: Apache-2.0

//! Capability string parsing.
//!
//! Extracts `width`, `height` and `original-media-type` from a serialized
//! caps string such as
//! `video/x-h264, width=(int)1920, height=(int)1080, original-media-type=(string)video/mp4`
//! to build the [`MediaProperties`] hint sent with each sample.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tracing::trace;

use crate::{MediaProperties, MediaType};

const MEDIA_TAG: &str = "original-media-type";
const WIDTH_TAG: &str = "width";
const HEIGHT_TAG: &str = "height";

/// Incremental caps parser that skips work when the caps did not change.
#[derive(Debug, Default)]
pub struct CapsParser {
    last_hash: Option<u64>,
    media_type: MediaType,
    width: u32,
    height: u32,
}

impl CapsParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `caps`, unless it hashes equal to the previous input.
    ///
    /// The media type is classified by a substring match on `video`/`audio`
    /// in the `original-media-type` value. For anything other than video the
    /// dimensions are forced to zero, whatever the string says.
    pub fn parse(&mut self, caps: &str) {
        if caps.is_empty() {
            return;
        }

        let mut hasher = DefaultHasher::new();
        caps.hash(&mut hasher);
        let hash = hasher.finish();
        if self.last_hash == Some(hash) {
            return;
        }
        self.last_hash = Some(hash);

        match find_marker(caps, MEDIA_TAG) {
            Some(value) => self.media_type = classify(value),
            None => trace!("No media type in caps"),
        }

        if self.media_type == MediaType::Video {
            self.width = find_marker(caps, WIDTH_TAG).map_or(0, parse_dimension);
            self.height = find_marker(caps, HEIGHT_TAG).map_or(0, parse_dimension);
        } else {
            self.width = 0;
            self.height = 0;
        }
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Snapshot of the last parse as a decrypt hint.
    pub fn media_properties(&self) -> MediaProperties {
        MediaProperties {
            height: self.height,
            width: self.width,
            media_type: self.media_type,
        }
    }
}

/// Returns the value of `tag`: the text after the first `)` that follows
/// the tag, up to the next `,` or the end of the string.
fn find_marker<'a>(data: &'a str, tag: &str) -> Option<&'a str> {
    let found = data.find(tag)?;
    let start = found + data[found..].find(')')? + 1;
    let end = data[start..].find(',').map_or(data.len(), |pos| start + pos);
    Some(&data[start..end])
}

fn classify(value: &str) -> MediaType {
    if value.contains("video") {
        MediaType::Video
    } else if value.contains("audio") {
        MediaType::Audio
    } else {
        MediaType::Unknown
    }
}

fn parse_dimension(value: &str) -> u32 {
    value.trim().parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_video_caps() {
        let mut parser = CapsParser::new();
        parser.parse(
            "video/x-h264, width=(int)1920, height=(int)1080, original-media-type=(string)video/mp4",
        );
        assert_eq!(parser.width(), 1920);
        assert_eq!(parser.height(), 1080);
        assert_eq!(parser.media_type(), MediaType::Video);
    }

    #[test]
    fn parses_caps_without_spaces() {
        let mut parser = CapsParser::new();
        parser.parse(
            "application/x-cenc,width=(int)1920,height=(int)1080,original-media-type=(string)video/mp4,protection-system=(string)abc",
        );
        assert_eq!(
            parser.media_properties(),
            MediaProperties {
                height: 1080,
                width: 1920,
                media_type: MediaType::Video,
            }
        );
    }

    #[test]
    fn audio_streams_lose_their_dimensions() {
        let mut parser = CapsParser::new();
        parser.parse(
            "application/x-cenc, width=(int)640, height=(int)480, original-media-type=(string)audio/mpeg",
        );
        assert_eq!(parser.media_type(), MediaType::Audio);
        assert_eq!(parser.width(), 0);
        assert_eq!(parser.height(), 0);
    }

    #[test]
    fn unknown_media_type_and_missing_values() {
        let mut parser = CapsParser::new();
        parser.parse("application/x-cenc, original-media-type=(string)text/vtt");
        assert_eq!(parser.media_type(), MediaType::Unknown);
        assert_eq!(parser.width(), 0);
    }

    #[test]
    fn unchanged_caps_are_not_reparsed() {
        let caps = "x, width=(int)10, height=(int)20, original-media-type=(string)video/mp4";
        let mut parser = CapsParser::new();
        parser.parse(caps);
        parser.width = 99;
        parser.parse(caps);
        assert_eq!(parser.width(), 99);
        parser.parse("y, width=(int)10, height=(int)20, original-media-type=(string)video/mp4");
        assert_eq!(parser.width(), 10);
    }
}
