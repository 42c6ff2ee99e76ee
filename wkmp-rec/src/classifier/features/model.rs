//! Feature vector model
//!
//! Tracks are points in a weighted, min/max normalized feature space.
//! Releases and artists are the centroids of their tracks. Similarity is the
//! weighted euclidean distance to the centroid of the seeds.

use crate::config::{feature_dimensions, FeatureSettingsMap};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use tracing::warn;
use wkmp_common::db::{ArtistId, ReleaseId, TrackArtistLinkType, TrackId, TrackLinks};

/// Total vector length for a training set, `None` if a feature is unknown
pub fn vector_dimensions(settings: &FeatureSettingsMap) -> Option<usize> {
    settings
        .keys()
        .map(|name| feature_dimensions(name))
        .sum()
}

/// Per-dimension weights: each feature contributes `weight` in total,
/// spread evenly over its dimensions
pub fn dimension_weights(settings: &FeatureSettingsMap) -> Vec<f64> {
    let mut weights = Vec::new();
    for (name, weight) in settings {
        let dimensions = feature_dimensions(name).unwrap_or(0);
        weights.extend(std::iter::repeat(weight / dimensions as f64).take(dimensions));
    }
    weights
}

/// Flatten one track's feature JSON into a vector laid out as `settings`
///
/// Accepts arrays of numbers, or a bare number for single-dimension features.
/// Returns `None` when a feature is missing or has the wrong dimension count.
pub fn flatten_features(
    track: TrackId,
    features: &serde_json::Value,
    settings: &FeatureSettingsMap,
) -> Option<Vec<f64>> {
    let mut vector = Vec::new();

    for name in settings.keys() {
        let expected = feature_dimensions(name)?;
        let values: Vec<f64> = match features.get(name)? {
            serde_json::Value::Number(n) => vec![n.as_f64()?],
            serde_json::Value::Array(items) => items
                .iter()
                .map(|item| item.as_f64())
                .collect::<Option<Vec<f64>>>()?,
            _ => return None,
        };

        if values.len() != expected {
            warn!(
                "Track {}: dimension mismatch for feature '{}'. Expected {}, got {}",
                track,
                name,
                expected,
                values.len()
            );
            return None;
        }

        vector.extend(values);
    }

    Some(vector)
}

/// Min/max normalization factors, one pair per dimension
#[derive(Debug, Clone)]
pub struct DataNormalizer {
    min: Vec<f64>,
    max: Vec<f64>,
}

impl DataNormalizer {
    pub fn compute(samples: &[Vec<f64>], dimensions: usize) -> Self {
        let mut min = vec![f64::INFINITY; dimensions];
        let mut max = vec![f64::NEG_INFINITY; dimensions];

        for sample in samples {
            for (i, value) in sample.iter().enumerate() {
                min[i] = min[i].min(*value);
                max[i] = max[i].max(*value);
            }
        }

        Self { min, max }
    }

    /// Map every dimension to [0, 1]; constant dimensions collapse to 0
    pub fn normalize(&self, sample: &mut [f64]) {
        for (i, value) in sample.iter_mut().enumerate() {
            let range = self.max[i] - self.min[i];
            *value = if range > 0.0 {
                (*value - self.min[i]) / range
            } else {
                0.0
            };
        }
    }
}

/// Vectors of one kind of catalog object, with an id index
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(
    serialize = "Id: Serialize",
    deserialize = "Id: Deserialize<'de> + Eq + Hash + Copy"
))]
pub struct ObjectVectors<Id> {
    entries: Vec<(Id, Vec<f64>)>,
    #[serde(skip)]
    index: HashMap<Id, usize>,
}

impl<Id: Copy + Eq + Hash> ObjectVectors<Id> {
    pub fn new(entries: Vec<(Id, Vec<f64>)>) -> Self {
        let mut vectors = Self {
            entries,
            index: HashMap::new(),
        };
        vectors.reindex();
        vectors
    }

    /// Rebuild the id index (after deserialization)
    pub fn reindex(&mut self) {
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, (id, _))| (*id, position))
            .collect();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (Id, &[f64])> + '_ {
        self.entries.iter().map(|(id, vector)| (*id, vector.as_slice()))
    }

    pub fn get(&self, id: Id) -> Option<&[f64]> {
        self.index
            .get(&id)
            .map(|position| self.entries[*position].1.as_slice())
    }

    /// Centroid of the vectors of `ids` that are known, `None` if none is
    pub fn centroid(&self, ids: &[Id]) -> Option<Vec<f64>> {
        let vectors: Vec<&[f64]> = ids.iter().filter_map(|id| self.get(*id)).collect();
        mean(&vectors)
    }

    /// Every id except `exclude`, closest to `target` first
    ///
    /// `accept` further restricts candidates. Ties are broken by position.
    pub fn ranked<F>(
        &self,
        target: &[f64],
        weights: &[f64],
        exclude: &HashSet<Id>,
        accept: F,
    ) -> Vec<Id>
    where
        F: Fn(Id) -> bool,
    {
        let mut scored: Vec<(f64, usize)> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, (id, _))| !exclude.contains(id) && accept(*id))
            .map(|(position, (_, vector))| (weighted_distance(target, vector, weights), position))
            .collect();

        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        scored
            .into_iter()
            .map(|(_, position)| self.entries[position].0)
            .collect()
    }
}

/// Squared weighted euclidean distance
pub fn weighted_distance(a: &[f64], b: &[f64], weights: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .zip(weights)
        .map(|((x, y), w)| w * (x - y) * (x - y))
        .sum()
}

fn mean(vectors: &[&[f64]]) -> Option<Vec<f64>> {
    let first = vectors.first()?;
    let mut sum = vec![0.0; first.len()];
    for vector in vectors {
        for (acc, value) in sum.iter_mut().zip(vector.iter()) {
            *acc += value;
        }
    }
    let count = vectors.len() as f64;
    Some(sum.into_iter().map(|value| value / count).collect())
}

/// Accumulates per-object vector sums while tracks are classified
#[derive(Debug)]
pub struct CentroidAccumulator<Id> {
    sums: HashMap<Id, (Vec<f64>, usize)>,
    order: Vec<Id>,
}

impl<Id: Copy + Eq + Hash> Default for CentroidAccumulator<Id> {
    fn default() -> Self {
        Self {
            sums: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl<Id: Copy + Eq + Hash> CentroidAccumulator<Id> {
    pub fn add(&mut self, id: Id, vector: &[f64]) {
        let entry = self.sums.entry(id).or_insert_with(|| {
            self.order.push(id);
            (vec![0.0; vector.len()], 0)
        });
        for (acc, value) in entry.0.iter_mut().zip(vector) {
            *acc += value;
        }
        entry.1 += 1;
    }

    pub fn finish(mut self) -> ObjectVectors<Id> {
        let entries = self
            .order
            .iter()
            .filter_map(|id| self.sums.remove(id).map(|(sum, count)| (*id, sum, count)))
            .map(|(id, sum, count)| {
                let centroid = sum.into_iter().map(|value| value / count as f64).collect();
                (id, centroid)
            })
            .collect();
        ObjectVectors::new(entries)
    }
}

/// Everything the features backend needs to answer queries
///
/// Only the track vectors are cached; release and artist groups follow the
/// catalog links and are derived again on every load.
#[derive(Debug, Clone)]
pub struct FeaturesModel {
    pub weights: Vec<f64>,
    pub tracks: ObjectVectors<TrackId>,
    pub releases: ObjectVectors<ReleaseId>,
    /// Centroid over every track the artist appears on, whatever the role
    pub artists: ObjectVectors<ArtistId>,
    /// Artists credited with each role
    pub artist_roles: Vec<(TrackArtistLinkType, Vec<ArtistId>)>,
}

impl FeaturesModel {
    /// Group normalized track vectors by the release and artists of each track
    ///
    /// Tracks without an entry in `links` only take part in track queries.
    pub fn from_tracks(
        weights: Vec<f64>,
        tracks: ObjectVectors<TrackId>,
        links: &HashMap<TrackId, TrackLinks>,
    ) -> Self {
        let mut releases = CentroidAccumulator::default();
        let mut artists = CentroidAccumulator::default();
        let mut roles: HashMap<TrackArtistLinkType, HashSet<ArtistId>> = HashMap::new();

        for (track, vector) in tracks.iter() {
            let Some(track_links) = links.get(&track) else {
                continue;
            };
            if let Some(release) = track_links.release {
                releases.add(release, vector);
            }
            // One contribution per artist and track, whatever the number of roles
            let mut seen = HashSet::new();
            for (artist, link_type) in &track_links.artists {
                if seen.insert(*artist) {
                    artists.add(*artist, vector);
                }
                roles.entry(*link_type).or_default().insert(*artist);
            }
        }

        let artist_roles = TrackArtistLinkType::ALL
            .iter()
            .filter_map(|link_type| {
                roles.remove(link_type).map(|set| {
                    let mut artists: Vec<ArtistId> = set.into_iter().collect();
                    artists.sort_by_key(|artist| artist.value());
                    (*link_type, artists)
                })
            })
            .collect();

        Self {
            weights,
            tracks,
            releases: releases.finish(),
            artists: artists.finish(),
            artist_roles,
        }
    }

    /// Artists credited with any of `link_types` (any role when empty)
    pub fn artists_with_roles(&self, link_types: &[TrackArtistLinkType]) -> HashSet<ArtistId> {
        self.artist_roles
            .iter()
            .filter(|(link_type, _)| link_types.is_empty() || link_types.contains(link_type))
            .flat_map(|(_, artists)| artists.iter().copied())
            .collect()
    }
}
