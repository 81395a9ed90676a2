//! Wireless player metadata: tracks, transport status and raw properties
//!
//! Wireless backends hand over property-change payloads as
//! [`PropertyValue`]s; this module decodes them into the three kinds the
//! rest of the system understands.

use crate::domain::volume::Volume;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while decoding a property payload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Property {property} has unexpected type {found}")]
    UnexpectedType {
        property: String,
        found: &'static str,
    },

    #[error("Unknown status: {0}")]
    UnknownStatus(String),
}

pub type Result<T> = std::result::Result<T, DecodeError>;

/// Backend-neutral dynamic value of a changed property
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Byte(u8),
    U16(u16),
    U32(u32),
    I32(i32),
    U64(u64),
    Str(String),
    Dict(BTreeMap<String, PropertyValue>),
    Array(Vec<PropertyValue>),
}

impl PropertyValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::Bool(_) => "bool",
            PropertyValue::Byte(_) => "byte",
            PropertyValue::U16(_) => "uint16",
            PropertyValue::U32(_) => "uint32",
            PropertyValue::I32(_) => "int32",
            PropertyValue::U64(_) => "uint64",
            PropertyValue::Str(_) => "string",
            PropertyValue::Dict(_) => "dict",
            PropertyValue::Array(_) => "array",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Unsigned value widened to u32, if it fits
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            PropertyValue::Byte(v) => Some(*v as u32),
            PropertyValue::U16(v) => Some(*v as u32),
            PropertyValue::U32(v) => Some(*v),
            PropertyValue::U64(v) => u32::try_from(*v).ok(),
            PropertyValue::I32(v) => u32::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, PropertyValue>> {
        match self {
            PropertyValue::Dict(map) => Some(map),
            _ => None,
        }
    }
}

/// Transport status reported by a wireless player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Playing,
    Stopped,
    Paused,
    ForwardSeek,
    ReverseSeek,
    Error,
}

impl Status {
    pub fn is_playing(&self) -> bool {
        matches!(self, Status::Playing)
    }

    fn as_str(&self) -> &'static str {
        match self {
            Status::Playing => "playing",
            Status::Stopped => "stopped",
            Status::Paused => "paused",
            Status::ForwardSeek => "forward-seek",
            Status::ReverseSeek => "reverse-seek",
            Status::Error => "error",
        }
    }
}

impl FromStr for Status {
    type Err = DecodeError;

    /// Case-insensitive; `-` and `_` are interchangeable
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "playing" => Ok(Status::Playing),
            "stopped" => Ok(Status::Stopped),
            "paused" => Ok(Status::Paused),
            "forward-seek" => Ok(Status::ForwardSeek),
            "reverse-seek" => Ok(Status::ReverseSeek),
            "error" => Ok(Status::Error),
            _ => Err(DecodeError::UnknownStatus(s.to_string())),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Track metadata.
///
/// Equality only looks at title, artist, album and genre. Players re-announce
/// the same song with a refined duration or track number, and those updates
/// must not count as a track change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Track {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub genre: String,
    pub track_number: u32,
    pub total_tracks: u32,
    pub duration_ms: u32,
}

impl Track {
    /// Decode a track from its property dictionary.
    ///
    /// Missing fields default to empty/zero; present fields of the wrong type
    /// are an error.
    pub fn from_properties(properties: &BTreeMap<String, PropertyValue>) -> Result<Self> {
        Ok(Self {
            title: text_field(properties, "Title")?,
            artist: text_field(properties, "Artist")?,
            album: text_field(properties, "Album")?,
            genre: text_field(properties, "Genre")?,
            track_number: number_field(properties, "TrackNumber")?,
            total_tracks: number_field(properties, "NumberOfTracks")?,
            duration_ms: number_field(properties, "Duration")?,
        })
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.title == other.title
            && self.artist == other.artist
            && self.album == other.album
            && self.genre == other.genre
    }
}

impl Eq for Track {}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {} ({}, {}) [{}/{}, {} ms]",
            self.artist,
            self.title,
            self.album,
            self.genre,
            self.track_number,
            self.total_tracks,
            self.duration_ms
        )
    }
}

fn text_field(properties: &BTreeMap<String, PropertyValue>, key: &str) -> Result<String> {
    match properties.get(key) {
        None => Ok(String::new()),
        Some(value) => value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| unexpected(&format!("Track.{key}"), value)),
    }
}

fn number_field(properties: &BTreeMap<String, PropertyValue>, key: &str) -> Result<u32> {
    match properties.get(key) {
        None => Ok(0),
        Some(value) => value
            .as_u32()
            .ok_or_else(|| unexpected(&format!("Track.{key}"), value)),
    }
}

fn unexpected(property: &str, value: &PropertyValue) -> DecodeError {
    DecodeError::UnexpectedType {
        property: property.to_string(),
        found: value.type_name(),
    }
}

/// A decoded wireless property change
#[derive(Debug, Clone, PartialEq)]
pub enum WirelessProperty {
    Track(Track),
    Status(Status),
    Volume(Volume),
}

impl WirelessProperty {
    /// Decode one changed property.
    ///
    /// Returns `Ok(None)` for properties the system does not track.
    pub fn decode(name: &str, value: &PropertyValue) -> Result<Option<Self>> {
        match name {
            "Track" => {
                let dict = value.as_dict().ok_or_else(|| unexpected(name, value))?;
                Ok(Some(WirelessProperty::Track(Track::from_properties(dict)?)))
            }
            "Status" => {
                let text = value.as_str().ok_or_else(|| unexpected(name, value))?;
                Ok(Some(WirelessProperty::Status(text.parse()?)))
            }
            "Volume" => match value {
                PropertyValue::Byte(_) | PropertyValue::U16(_) => {
                    let raw = value.as_u32().unwrap_or_default() as u16;
                    Ok(Some(WirelessProperty::Volume(Volume::from_native(raw))))
                }
                other => Err(unexpected(name, other)),
            },
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn track_dict(title: &str, duration: u32) -> BTreeMap<String, PropertyValue> {
        let mut dict = BTreeMap::new();
        dict.insert("Title".to_string(), PropertyValue::Str(title.to_string()));
        dict.insert("Artist".to_string(), PropertyValue::Str("Artist".to_string()));
        dict.insert("Album".to_string(), PropertyValue::Str("Album".to_string()));
        dict.insert("Genre".to_string(), PropertyValue::Str("Jazz".to_string()));
        dict.insert("TrackNumber".to_string(), PropertyValue::U32(3));
        dict.insert("NumberOfTracks".to_string(), PropertyValue::U32(12));
        dict.insert("Duration".to_string(), PropertyValue::U32(duration));
        dict
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("playing".parse::<Status>(), Ok(Status::Playing));
        assert_eq!("PAUSED".parse::<Status>(), Ok(Status::Paused));
        assert_eq!("forward-seek".parse::<Status>(), Ok(Status::ForwardSeek));
        assert_eq!("reverse_seek".parse::<Status>(), Ok(Status::ReverseSeek));
        assert_eq!(
            "rewinding".parse::<Status>(),
            Err(DecodeError::UnknownStatus("rewinding".to_string()))
        );
    }

    #[test]
    fn test_status_display() {
        assert_eq!(Status::ForwardSeek.to_string(), "forward-seek");
        assert_eq!(Status::Stopped.to_string(), "stopped");
        for status in [Status::Playing, Status::ReverseSeek, Status::Error] {
            assert_eq!(status.to_string().parse::<Status>(), Ok(status));
        }
    }

    #[test]
    fn test_track_equality_ignores_numeric_fields() {
        let a = Track {
            title: "So What".to_string(),
            artist: "Miles Davis".to_string(),
            album: "Kind of Blue".to_string(),
            genre: "Jazz".to_string(),
            track_number: 1,
            total_tracks: 5,
            duration_ms: 562_000,
        };
        let b = Track {
            track_number: 2,
            total_tracks: 9,
            duration_ms: 0,
            ..a.clone()
        };
        assert_eq!(a, b);

        let c = Track {
            genre: "Modal".to_string(),
            ..a.clone()
        };
        assert_ne!(a, c);
    }

    #[test]
    fn test_track_from_properties() {
        let track = Track::from_properties(&track_dict("Blue in Green", 337_000)).unwrap();
        assert_eq!(track.title, "Blue in Green");
        assert_eq!(track.track_number, 3);
        assert_eq!(track.total_tracks, 12);
        assert_eq!(track.duration_ms, 337_000);
    }

    #[test]
    fn test_track_missing_fields_default() {
        let mut dict = BTreeMap::new();
        dict.insert("Title".to_string(), PropertyValue::Str("Untitled".to_string()));
        let track = Track::from_properties(&dict).unwrap();
        assert_eq!(track.title, "Untitled");
        assert!(track.genre.is_empty());
        assert_eq!(track.duration_ms, 0);
    }

    #[test]
    fn test_track_wrong_field_type() {
        let mut dict = track_dict("x", 1);
        dict.insert("Artist".to_string(), PropertyValue::U32(7));
        let err = Track::from_properties(&dict).unwrap_err();
        assert_eq!(
            err,
            DecodeError::UnexpectedType {
                property: "Track.Artist".to_string(),
                found: "uint32",
            }
        );
    }

    #[test]
    fn test_decode_properties() {
        let track = WirelessProperty::decode("Track", &PropertyValue::Dict(track_dict("t", 1)))
            .unwrap()
            .unwrap();
        assert!(matches!(track, WirelessProperty::Track(t) if t.title == "t"));

        let status = WirelessProperty::decode("Status", &PropertyValue::Str("paused".to_string()));
        assert_eq!(status, Ok(Some(WirelessProperty::Status(Status::Paused))));

        let volume = WirelessProperty::decode("Volume", &PropertyValue::U16(0x7f));
        assert_eq!(volume, Ok(Some(WirelessProperty::Volume(Volume::new(100)))));

        let ignored = WirelessProperty::decode("Position", &PropertyValue::U32(1000));
        assert_eq!(ignored, Ok(None));
    }

    #[test]
    fn test_decode_rejects_malformed_payloads() {
        assert!(WirelessProperty::decode("Volume", &PropertyValue::Str("loud".to_string())).is_err());
        assert!(WirelessProperty::decode("Status", &PropertyValue::U16(1)).is_err());
        assert!(WirelessProperty::decode("Track", &PropertyValue::Str("song".to_string())).is_err());
    }

    proptest! {
        #[test]
        fn prop_track_equality_ignores_numbers(
            title in "[a-zA-Z ]{0,16}",
            n1 in any::<u32>(), n2 in any::<u32>(), d1 in any::<u32>(), d2 in any::<u32>()
        ) {
            let a = Track { title: title.clone(), track_number: n1, duration_ms: d1, ..Track::default() };
            let b = Track { title, track_number: n2, duration_ms: d2, ..Track::default() };
            prop_assert_eq!(a, b);
        }
    }
}
