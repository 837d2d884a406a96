//! Versioned, ordered feature declarations shared by aggregation, tables, drift and scoring.

use super::{FeatureValue, FeatureVector};
use crate::config::AggregationConfig;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};

pub const NUM_EVENTS: &str = "num_events";
pub const NUM_SESSIONS: &str = "num_sessions";
pub const NUM_SONGS_PLAYED: &str = "num_songs_played";
pub const DISTINCT_SONGS: &str = "distinct_songs";
pub const DISTINCT_ARTISTS: &str = "distinct_artists";
pub const TOTAL_LISTENING_MINUTES: &str = "total_listening_minutes";
pub const EVENTS_PER_HOUR: &str = "events_per_hour";
pub const ACTIVE_DAYS: &str = "active_days";
pub const AVG_SESSION_MINUTES: &str = "avg_session_minutes";
pub const MEDIAN_SESSION_MINUTES: &str = "median_session_minutes";
pub const STD_SESSION_MINUTES: &str = "std_session_minutes";
pub const AVG_EVENTS_PER_SESSION: &str = "avg_events_per_session";
pub const STD_EVENTS_PER_SESSION: &str = "std_events_per_session";
pub const NUM_THUMBS_UP: &str = "num_thumbs_up";
pub const NUM_THUMBS_DOWN: &str = "num_thumbs_down";
pub const NUM_ADD_PLAYLIST: &str = "num_add_playlist";
pub const NUM_ADD_FRIEND: &str = "num_add_friend";
pub const NUM_ROLL_ADVERT: &str = "num_roll_advert";
pub const NUM_ERRORS: &str = "num_errors";
pub const PAID_EVENT_RATIO: &str = "paid_event_ratio";
pub const CURRENT_LEVEL: &str = "current_level";
pub const GENDER_M: &str = "gender_m";
pub const GENDER_F: &str = "gender_f";
pub const ACCOUNT_AGE_DAYS: &str = "account_age_days";
pub const NUM_LOCATIONS: &str = "num_locations";

/// Tracked interaction pages and the counter each one feeds. Counted literally.
pub const INTERACTION_PAGES: &[(&str, &str)] = &[
    ("NextSong", NUM_SONGS_PLAYED),
    ("Thumbs Up", NUM_THUMBS_UP),
    ("Thumbs Down", NUM_THUMBS_DOWN),
    ("Add to Playlist", NUM_ADD_PLAYLIST),
    ("Add Friend", NUM_ADD_FRIEND),
    ("Roll Advert", NUM_ROLL_ADVERT),
    ("Error", NUM_ERRORS),
];

pub const LEVEL_CATEGORIES: &[&str] = &["free", "paid", "unknown"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeatureKind {
    Numeric,
    Categorical { categories: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDef {
    pub name: String,
    pub kind: FeatureKind,
    /// Value used when the aggregator has nothing to say for this feature
    pub default: FeatureValue,
    pub drift_comparable: bool,
}

impl FeatureDef {
    /// Whether `value` is a legal value for this feature. `Missing` always is.
    pub fn accepts(&self, value: &FeatureValue) -> bool {
        match (&self.kind, value) {
            (_, FeatureValue::Missing) => true,
            (FeatureKind::Numeric, FeatureValue::Number(f)) => f.is_finite(),
            (FeatureKind::Categorical { categories }, FeatureValue::Category(c)) => {
                categories.iter().any(|k| k == c)
            }
            _ => false,
        }
    }

    pub fn is_categorical(&self) -> bool {
        matches!(self.kind, FeatureKind::Categorical { .. })
    }
}

/// An immutable schema. New versions come from [`FeatureSchema::evolve`].
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSchema {
    version: u32,
    features: Vec<FeatureDef>,
    index: BTreeMap<String, usize>,
    fingerprint: String,
}

impl FeatureSchema {
    pub fn builder(version: u32) -> SchemaBuilder {
        SchemaBuilder {
            version,
            features: Vec::new(),
        }
    }

    /// The churn feature set, version 1.
    pub fn churn_v1() -> Self {
        let zero = || FeatureValue::Number(0.0);
        let numeric = |name: &str, default: FeatureValue, drift: bool| FeatureDef {
            name: name.to_string(),
            kind: FeatureKind::Numeric,
            default,
            drift_comparable: drift,
        };
        let features = vec![
            numeric(NUM_EVENTS, zero(), true),
            numeric(NUM_SESSIONS, zero(), true),
            numeric(NUM_SONGS_PLAYED, zero(), true),
            numeric(DISTINCT_SONGS, zero(), true),
            numeric(DISTINCT_ARTISTS, zero(), true),
            numeric(TOTAL_LISTENING_MINUTES, zero(), true),
            numeric(EVENTS_PER_HOUR, zero(), true),
            numeric(ACTIVE_DAYS, zero(), true),
            numeric(AVG_SESSION_MINUTES, FeatureValue::Missing, true),
            numeric(MEDIAN_SESSION_MINUTES, FeatureValue::Missing, true),
            numeric(STD_SESSION_MINUTES, FeatureValue::Missing, true),
            numeric(AVG_EVENTS_PER_SESSION, FeatureValue::Missing, true),
            numeric(STD_EVENTS_PER_SESSION, FeatureValue::Missing, true),
            numeric(NUM_THUMBS_UP, zero(), true),
            numeric(NUM_THUMBS_DOWN, zero(), true),
            numeric(NUM_ADD_PLAYLIST, zero(), true),
            numeric(NUM_ADD_FRIEND, zero(), true),
            numeric(NUM_ROLL_ADVERT, zero(), true),
            numeric(NUM_ERRORS, zero(), true),
            numeric(PAID_EVENT_RATIO, zero(), true),
            FeatureDef {
                name: CURRENT_LEVEL.to_string(),
                kind: FeatureKind::Categorical {
                    categories: LEVEL_CATEGORIES.iter().map(|s| s.to_string()).collect(),
                },
                default: FeatureValue::Category("unknown".to_string()),
                drift_comparable: true,
            },
            numeric(GENDER_M, zero(), false),
            numeric(GENDER_F, zero(), false),
            numeric(ACCOUNT_AGE_DAYS, FeatureValue::Missing, true),
        ];
        Self::assemble(1, features)
    }

    /// The v1 churn feature set with the configured optional groups.
    ///
    /// Equal to [`FeatureSchema::churn_v1`] under the default toggles. Any
    /// other combination is a different layout with its own fingerprint.
    pub fn churn(config: &AggregationConfig) -> Self {
        let mut features = Self::churn_v1().features;
        features.retain(|f| match f.name.as_str() {
            GENDER_M | GENDER_F => config.include_gender,
            CURRENT_LEVEL => config.include_level,
            _ => true,
        });
        if config.include_location {
            features.push(FeatureDef {
                name: NUM_LOCATIONS.to_string(),
                kind: FeatureKind::Numeric,
                default: FeatureValue::Number(0.0),
                drift_comparable: true,
            });
        }
        Self::assemble(1, features)
    }

    fn assemble(version: u32, features: Vec<FeatureDef>) -> Self {
        let index = features
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        let fingerprint = fingerprint(version, &features);
        Self {
            version,
            features,
            index,
            fingerprint,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// SHA-256 (hex) over the version and every declaration, in order.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn features(&self) -> &[FeatureDef] {
        &self.features
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.features.iter().map(|f| f.name.as_str())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn def(&self, name: &str) -> Option<&FeatureDef> {
        self.index_of(name).map(|i| &self.features[i])
    }

    /// Hard check that data produced under (`version`, `fingerprint`) belongs to this schema.
    pub fn ensure_matches(&self, version: u32, fingerprint: &str) -> Result<()> {
        if version == self.version && fingerprint == self.fingerprint {
            return Ok(());
        }
        tracing::error!(
            expected = self.version,
            found = version,
            "feature schema mismatch"
        );
        Err(Error::SchemaMismatch {
            expected_version: self.version,
            found_version: version,
            expected_fingerprint: self.fingerprint.clone(),
            found_fingerprint: fingerprint.to_string(),
        })
    }

    /// Select this schema's features out of a computed set.
    ///
    /// Computed values the schema does not declare are not emitted; declared
    /// features with no computed value take their default.
    pub fn project(
        &self,
        identity: &str,
        snapshot: DateTime<Utc>,
        computed: &BTreeMap<&str, FeatureValue>,
    ) -> Result<FeatureVector> {
        let values = self
            .features
            .iter()
            .map(|def| computed.get(def.name.as_str()).cloned().unwrap_or_else(|| def.default.clone()))
            .collect();
        self.vector(identity, snapshot, values)
    }

    /// Build a vector from values already in schema order.
    pub fn vector(
        &self,
        identity: &str,
        snapshot: DateTime<Utc>,
        values: Vec<FeatureValue>,
    ) -> Result<FeatureVector> {
        if values.len() != self.features.len() {
            return Err(Error::feature(format!(
                "expected {} values for schema v{}, got {}",
                self.features.len(),
                self.version,
                values.len()
            )));
        }
        for (def, value) in self.features.iter().zip(&values) {
            if !def.accepts(value) {
                return Err(Error::feature(format!(
                    "value {:?} is not valid for feature '{}'",
                    value, def.name
                )));
            }
        }
        Ok(FeatureVector {
            identity: identity.to_string(),
            schema_version: self.version,
            schema_fingerprint: self.fingerprint.clone(),
            snapshot,
            values,
        })
    }

    /// Start the next schema version from this one's declarations.
    pub fn evolve(&self) -> SchemaBuilder {
        SchemaBuilder {
            version: self.version + 1,
            features: self.features.clone(),
        }
    }
}

/// Collects declarations and validates them into a [`FeatureSchema`].
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    version: u32,
    features: Vec<FeatureDef>,
}

impl SchemaBuilder {
    pub fn numeric(mut self, name: &str, default: FeatureValue, drift_comparable: bool) -> Self {
        self.features.push(FeatureDef {
            name: name.to_string(),
            kind: FeatureKind::Numeric,
            default,
            drift_comparable,
        });
        self
    }

    pub fn categorical(
        mut self,
        name: &str,
        categories: &[&str],
        default: FeatureValue,
        drift_comparable: bool,
    ) -> Self {
        self.features.push(FeatureDef {
            name: name.to_string(),
            kind: FeatureKind::Categorical {
                categories: categories.iter().map(|c| c.to_string()).collect(),
            },
            default,
            drift_comparable,
        });
        self
    }

    pub fn remove(mut self, name: &str) -> Self {
        self.features.retain(|f| f.name != name);
        self
    }

    pub fn build(self) -> Result<FeatureSchema> {
        if self.version == 0 {
            return Err(Error::schema("schema versions start at 1"));
        }
        let mut seen = HashSet::new();
        for def in &self.features {
            if def.name.trim().is_empty() {
                return Err(Error::schema("feature names must not be empty"));
            }
            if !seen.insert(def.name.as_str()) {
                return Err(Error::schema(format!("duplicate feature '{}'", def.name)));
            }
            if let FeatureKind::Categorical { categories } = &def.kind {
                if categories.is_empty() {
                    return Err(Error::schema(format!(
                        "categorical feature '{}' has no categories",
                        def.name
                    )));
                }
            }
            if !def.accepts(&def.default) {
                return Err(Error::schema(format!(
                    "default {:?} does not fit feature '{}'",
                    def.default, def.name
                )));
            }
        }
        Ok(FeatureSchema::assemble(self.version, self.features))
    }
}

fn fingerprint(version: u32, features: &[FeatureDef]) -> String {
    let mut h = Sha256::new();
    h.update(format!("v{version}\n"));
    for f in features {
        let kind = match &f.kind {
            FeatureKind::Numeric => "numeric".to_string(),
            FeatureKind::Categorical { categories } => format!("categorical[{}]", categories.join(",")),
        };
        let default = match &f.default {
            FeatureValue::Number(v) => format!("{v:?}"),
            FeatureValue::Category(c) => format!("'{c}'"),
            FeatureValue::Missing => "missing".to_string(),
        };
        h.update(format!("{}|{}|{}|{}\n", f.name, kind, default, f.drift_comparable));
    }
    format!("{:x}", h.finalize())
}
