//! Behavioral statistics over the admitted window of one identity's events.

use super::schema::*;
use super::FeatureValue;
use crate::events::{CleanedEvent, Level};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};

const MILLIS_PER_MINUTE: f64 = 60_000.0;
const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Mean, lower median and population standard deviation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub mean: f64,
    pub median: f64,
    pub std: f64,
}

impl Summary {
    /// `None` for an empty sample. For an even count the median is the lower
    /// of the two middle values.
    pub fn of(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len() as f64;
        let mean = sorted.iter().sum::<f64>() / n;
        let var = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some(Self {
            mean,
            median: sorted[(sorted.len() - 1) / 2],
            std: var.sqrt(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowStats {
    pub num_events: usize,
    /// Sessions with at least one admitted event and a known session id
    pub num_sessions: usize,
    pub distinct_songs: usize,
    pub distinct_artists: usize,
    pub distinct_locations: usize,
    pub total_listening_minutes: f64,
    pub events_per_hour: f64,
    pub active_days: i64,
    pub session_minutes: Option<Summary>,
    pub events_per_session: Option<Summary>,
    /// Feature name → literal page count, every tracked interaction present
    pub interactions: BTreeMap<&'static str, u32>,
    pub paid_event_ratio: f64,
    pub current_level: Level,
    pub gender: Option<String>,
    pub account_age_days: Option<i64>,
    /// Registration was after the anchor; age was clamped to 0
    pub account_age_clamped: bool,
}

impl WindowStats {
    /// `events` must be one identity's admitted events in canonical order.
    pub fn from_events(
        events: &[&CleanedEvent],
        anchor: DateTime<Utc>,
        registration: Option<DateTime<Utc>>,
    ) -> Self {
        let mut interactions: BTreeMap<&'static str, u32> =
            INTERACTION_PAGES.iter().map(|(_, f)| (*f, 0)).collect();
        let mut songs = HashSet::new();
        let mut artists = HashSet::new();
        let mut locations = HashSet::new();
        // session id → (first ts, last ts, events)
        let mut sessions: BTreeMap<i64, (i64, i64, usize)> = BTreeMap::new();
        let mut listening_secs = 0.0;
        let mut paid = 0usize;

        for e in events {
            if let Some((_, feature)) = INTERACTION_PAGES.iter().find(|(page, _)| *page == e.page) {
                if let Some(c) = interactions.get_mut(feature) {
                    *c += 1;
                }
            }
            if let Some(ref s) = e.song {
                songs.insert(s.as_str());
            }
            if let Some(ref a) = e.artist {
                artists.insert(a.as_str());
            }
            if let Some(ref l) = e.location {
                locations.insert(l.as_str());
            }
            listening_secs += e.length.unwrap_or(0.0);
            if e.level == Level::Paid {
                paid += 1;
            }
            if let Some(sid) = e.session_id {
                let ms = e.ts.timestamp_millis();
                let s = sessions.entry(sid).or_insert((ms, ms, 0));
                s.0 = s.0.min(ms);
                s.1 = s.1.max(ms);
                s.2 += 1;
            }
        }

        let durations: Vec<f64> = sessions
            .values()
            .map(|(first, last, _)| (last - first) as f64 / MILLIS_PER_MINUTE)
            .collect();
        let counts: Vec<f64> = sessions.values().map(|(_, _, n)| *n as f64).collect();

        let n = events.len();
        let (span_ms, active_days) = match (events.first(), events.last()) {
            (Some(first), Some(last)) => {
                let span = last.ts - first.ts;
                (span.num_milliseconds(), span.num_days())
            }
            _ => (0, 0),
        };
        let events_per_hour = if span_ms <= 0 {
            n as f64
        } else {
            n as f64 / (span_ms as f64 / MILLIS_PER_HOUR)
        };

        let current_level = events
            .iter()
            .rev()
            .map(|e| e.level)
            .find(|l| *l != Level::Unknown)
            .unwrap_or(Level::Unknown);
        let gender = events.iter().rev().find_map(|e| e.gender.clone());

        let (account_age_days, account_age_clamped) = match registration {
            Some(reg) if anchor < reg => (Some(0), true),
            Some(reg) => (Some((anchor - reg).num_days()), false),
            None => (None, false),
        };

        WindowStats {
            num_events: n,
            num_sessions: sessions.len(),
            distinct_songs: songs.len(),
            distinct_artists: artists.len(),
            distinct_locations: locations.len(),
            total_listening_minutes: listening_secs / 60.0,
            events_per_hour,
            active_days,
            session_minutes: Summary::of(&durations),
            events_per_session: Summary::of(&counts),
            interactions,
            paid_event_ratio: if n == 0 { 0.0 } else { paid as f64 / n as f64 },
            current_level,
            gender,
            account_age_days,
            account_age_clamped,
        }
    }

    /// Every feature this module knows how to compute, by schema name.
    pub fn to_features(&self) -> BTreeMap<&'static str, FeatureValue> {
        let mut out = BTreeMap::new();
        let num = |v: f64| FeatureValue::Number(v);
        out.insert(NUM_EVENTS, num(self.num_events as f64));
        out.insert(NUM_SESSIONS, num(self.num_sessions as f64));
        out.insert(DISTINCT_SONGS, num(self.distinct_songs as f64));
        out.insert(DISTINCT_ARTISTS, num(self.distinct_artists as f64));
        out.insert(NUM_LOCATIONS, num(self.distinct_locations as f64));
        out.insert(TOTAL_LISTENING_MINUTES, num(self.total_listening_minutes));
        out.insert(EVENTS_PER_HOUR, num(self.events_per_hour));
        out.insert(ACTIVE_DAYS, num(self.active_days as f64));
        if let Some(s) = self.session_minutes {
            out.insert(AVG_SESSION_MINUTES, num(s.mean));
            out.insert(MEDIAN_SESSION_MINUTES, num(s.median));
            out.insert(STD_SESSION_MINUTES, num(s.std));
        }
        if let Some(s) = self.events_per_session {
            out.insert(AVG_EVENTS_PER_SESSION, num(s.mean));
            out.insert(STD_EVENTS_PER_SESSION, num(s.std));
        }
        for (feature, count) in &self.interactions {
            out.insert(*feature, num(f64::from(*count)));
        }
        out.insert(PAID_EVENT_RATIO, num(self.paid_event_ratio));
        out.insert(
            CURRENT_LEVEL,
            FeatureValue::Category(self.current_level.as_str().to_string()),
        );
        let gender = self.gender.as_deref().map(str::to_ascii_uppercase);
        out.insert(GENDER_M, num(if gender.as_deref() == Some("M") { 1.0 } else { 0.0 }));
        out.insert(GENDER_F, num(if gender.as_deref() == Some("F") { 1.0 } else { 0.0 }));
        if let Some(days) = self.account_age_days {
            out.insert(ACCOUNT_AGE_DAYS, num(days as f64));
        }
        out
    }
}
