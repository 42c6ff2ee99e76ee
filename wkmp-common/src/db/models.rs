//! Database models
//!
//! Catalog entities are addressed by strongly typed integer ids so that a
//! release id can never be passed where a track id is expected.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn value(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(
    /// Row id of the `tracks` table
    TrackId
);
entity_id!(
    /// Row id of the `releases` table
    ReleaseId
);
entity_id!(
    /// Row id of the `artists` table
    ArtistId
);
entity_id!(
    /// Row id of the `track_lists` table
    TrackListId
);
entity_id!(ClusterId);

/// Role an artist plays on a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TrackArtistLinkType {
    Artist,
    ReleaseArtist,
    Composer,
    Conductor,
    Lyricist,
    Mixer,
    Performer,
    Producer,
    Remixer,
    Writer,
}

impl TrackArtistLinkType {
    pub const ALL: [TrackArtistLinkType; 10] = [
        Self::Artist,
        Self::ReleaseArtist,
        Self::Composer,
        Self::Conductor,
        Self::Lyricist,
        Self::Mixer,
        Self::Performer,
        Self::Producer,
        Self::Remixer,
        Self::Writer,
    ];

    /// Stable code stored in `track_artist_links.link_type`
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Artist => "artist",
            Self::ReleaseArtist => "release_artist",
            Self::Composer => "composer",
            Self::Conductor => "conductor",
            Self::Lyricist => "lyricist",
            Self::Mixer => "mixer",
            Self::Performer => "performer",
            Self::Producer => "producer",
            Self::Remixer => "remixer",
            Self::Writer => "writer",
        }
    }
}

impl fmt::Display for TrackArtistLinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackArtistLinkType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|link_type| link_type.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown artist link type: {}", s)))
    }
}

/// Persisted choice of recommendation backends
///
/// Stored in the `settings` table under
/// [`crate::db::settings::RECOMMENDATION_ENGINE_TYPE_KEY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RecommendationEngineType {
    /// Tag/cluster co-occurrence only
    #[default]
    Clusters,
    /// Audio feature vectors, with clusters as warm-up and fallback
    Features,
}

impl RecommendationEngineType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clusters => "clusters",
            Self::Features => "features",
        }
    }
}

impl fmt::Display for RecommendationEngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecommendationEngineType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clusters" => Ok(Self::Clusters),
            "features" => Ok(Self::Features),
            other => Err(Error::InvalidInput(format!(
                "Unknown recommendation engine type: {}",
                other
            ))),
        }
    }
}

/// Summary of the analysed features, used to validate cached models
///
/// `digest` is a SHA-256 over every (track id, feature data) row, so
/// re-analysing a track in place changes it too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeaturesFingerprint {
    pub feature_rows: i64,
    pub max_track_id: i64,
    pub digest: String,
}

/// Release and artist links of one track
#[derive(Debug, Clone, Default)]
pub struct TrackLinks {
    pub release: Option<ReleaseId>,
    pub artists: Vec<(ArtistId, TrackArtistLinkType)>,
}
