//! The per-fetch data model. Kept as plain structs mutated in-place by
//! the driver and part handlers — one state struct owned by the request
//! loop, no interior mutability, no shared ownership.

use std::collections::{HashMap, HashSet};

/// Sentinel end-sequence-number marking a discarded format's single
/// catch-all consumed range, so the server stops re-sending its data.
pub const SENTINEL_END_SEQUENCE: i64 = i32::MAX as i64;
/// Sentinel duration paired with [`SENTINEL_END_SEQUENCE`].
pub const SENTINEL_DURATION: i64 = i64::MAX / 2;

pub const MAX_REQUESTS: u32 = 300;
pub const MAX_STALLED_REQUESTS: u32 = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatId {
    pub itag: i32,
    /// `0` on the wire means absent, mapped to `None`.
    pub lmt: Option<i64>,
    pub xtags: Option<String>,
}

impl FormatId {
    /// Stringified-itag key used to index `initialized_formats`, per
    /// `InitializedFormat` is keyed by the stringified itag.
    pub fn key(&self) -> String {
        self.itag.to_string()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConsumedRange {
    pub start_sequence_number: i64,
    pub end_sequence_number: i64,
    pub start_time_ms: i64,
    pub duration_ms: i64,
}

impl ConsumedRange {
    pub fn is_sentinel(&self) -> bool {
        self.end_sequence_number >= SENTINEL_END_SEQUENCE
    }

    /// True if `t` falls inside `[start, start + duration)` — used by the
    /// Used by the player-time advance rule in the driver loop.
    pub fn covers(&self, t: i64) -> bool {
        t >= self.start_time_ms && t < self.start_time_ms + self.duration_ms
    }
}

#[derive(Debug, Clone)]
pub struct InitializedFormat {
    pub itag: i32,
    pub lmt: Option<i64>,
    pub xtags: Option<String>,
    pub discard: bool,
    pub end_time_ms: Option<i64>,
    pub total_segments: Option<i64>,
    pub mime_type: Option<String>,
    pub init_segment_received: bool,
    pub consumed_ranges: Vec<ConsumedRange>,
}

impl InitializedFormat {
    pub fn new(itag: i32, lmt: Option<i64>, xtags: Option<String>, discard: bool) -> Self {
        let consumed_ranges = if discard {
            vec![ConsumedRange {
                start_sequence_number: 0,
                end_sequence_number: SENTINEL_END_SEQUENCE,
                start_time_ms: 0,
                duration_ms: SENTINEL_DURATION,
            }]
        } else {
            Vec::new()
        };
        Self {
            itag,
            lmt,
            xtags,
            discard,
            end_time_ms: None,
            total_segments: None,
            mime_type: None,
            init_segment_received: false,
            consumed_ranges,
        }
    }

    pub fn format_id(&self) -> FormatId {
        FormatId {
            itag: self.itag,
            lmt: self.lmt,
            xtags: self.xtags.clone(),
        }
    }

    /// Ranges that are real data, not the discard sentinel — the "active
    /// ranges" the end-of-stream check and player-time advance both use.
    pub fn active_ranges(&self) -> impl Iterator<Item = &ConsumedRange> {
        self.consumed_ranges.iter().filter(|r| !r.is_sentinel())
    }

    /// Record a finished, non-init segment, merging into an adjacent range
    /// when one exists, else appending a new single-segment range.
    pub fn record_segment(&mut self, sequence_number: i64, start_ms: i64, duration_ms: i64) {
        if let Some(existing) = self
            .consumed_ranges
            .iter_mut()
            .find(|r| r.end_sequence_number + 1 == sequence_number)
        {
            existing.duration_ms = (start_ms - existing.start_time_ms) + duration_ms;
            existing.end_sequence_number = sequence_number;
            return;
        }
        self.consumed_ranges.push(ConsumedRange {
            start_sequence_number: sequence_number,
            end_sequence_number: sequence_number,
            start_time_ms: start_ms,
            duration_ms,
        });
    }

    /// End-of-stream check for this format.
    pub fn is_complete(&self, player_time_ms: i64) -> bool {
        if let Some(total_segments) = self.total_segments {
            if let Some(max_end) = self.active_ranges().map(|r| r.end_sequence_number).max() {
                if max_end >= total_segments {
                    return true;
                }
            }
        }
        if let Some(end_time_ms) = self.end_time_ms {
            if end_time_ms > 0 && player_time_ms >= end_time_ms {
                return true;
            }
        }
        false
    }

    /// The player-time advance rule. Never returns less than `current` —
    /// the caller need not clamp separately.
    pub fn advance_player_time(&self, current: i64) -> i64 {
        if let Some(covering) = self.active_ranges().find(|r| r.covers(current)) {
            return (covering.start_time_ms + covering.duration_ms).max(current);
        }
        self.active_ranges()
            .map(|r| r.start_time_ms + r.duration_ms)
            .max()
            .map(|v| v.max(current))
            .unwrap_or(current)
    }
}

/// Transient per-request entry tracking a segment currently being streamed
/// across one or more `MEDIA` parts. Keyed by the server-assigned header id.
#[derive(Debug, Clone)]
pub struct PartialSegment {
    pub format_key: String,
    pub is_init_segment: bool,
    pub sequence_number: Option<i64>,
    pub start_ms: i64,
    pub duration_ms: i64,
    pub discard: bool,
    pub received_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    Overwrite = 0,
    KeepFirst = 2,
}

impl WritePolicy {
    pub fn from_wire(v: i64) -> Self {
        if v == 2 {
            Self::KeepFirst
        } else {
            Self::Overwrite
        }
    }
}

#[derive(Debug, Clone)]
pub struct SabrContext {
    pub context_type: i32,
    pub value: Vec<u8>,
    pub send_by_default: bool,
    pub write_policy: WritePolicy,
}

/// All per-fetch session state. Owned exclusively by the driver loop for
/// the lifetime of one `fetch()` call — never shared, never cloned into
/// another task (spec.md §5).
pub struct Session {
    pub url: String,
    pub preferred_itag: i32,
    pub preferred_lmt: Option<i64>,
    pub request_number: u32,
    pub player_time_ms: i64,
    pub playback_cookie: Option<Vec<u8>>,
    /// Decoded once from `FetchConfig::po_token` at session start; echoed
    /// in every request's `streamer_context` until the server rejects it
    /// (spec.md §4.4, §4.7).
    pub po_token: Option<Vec<u8>>,
    /// Decoded once from `FetchConfig::ustreamer_config`; passed through
    /// verbatim in request field 5.
    pub ustreamer_config: Option<Vec<u8>>,
    pub sabr_context_updates: HashMap<i32, SabrContext>,
    pub sabr_contexts_to_send: HashSet<i32>,
    pub initialized_formats: HashMap<String, InitializedFormat>,
    pub partial_segments: HashMap<u8, PartialSegment>,
    pub audio_format_key: Option<String>,
    pub stream_complete: bool,
    pub activity_in_request: bool,
    pub stalled_requests: u32,
}

impl Session {
    pub fn new(url: String, preferred_itag: i32, preferred_lmt: Option<i64>) -> Self {
        Self {
            url,
            preferred_itag,
            preferred_lmt,
            request_number: 0,
            player_time_ms: 0,
            playback_cookie: None,
            po_token: None,
            ustreamer_config: None,
            sabr_context_updates: HashMap::new(),
            sabr_contexts_to_send: HashSet::new(),
            initialized_formats: HashMap::new(),
            partial_segments: HashMap::new(),
            audio_format_key: None,
            stream_complete: false,
            activity_in_request: false,
            stalled_requests: 0,
        }
    }

    pub fn audio_format(&self) -> Option<&InitializedFormat> {
        self.audio_format_key
            .as_deref()
            .and_then(|k| self.initialized_formats.get(k))
    }

    /// Contexts to send this request, split into ones whose value is known
    /// and ones that are send-set members without a known update yet
    /// (spec.md §4.6 step 3; the "unsent" case from §9's Open Question).
    pub fn contexts_to_send(&self) -> (Vec<&SabrContext>, Vec<i32>) {
        let mut with_update = Vec::new();
        let mut unsent = Vec::new();
        for &t in &self.sabr_contexts_to_send {
            match self.sabr_context_updates.get(&t) {
                Some(ctx) => with_update.push(ctx),
                None => unsent.push(t),
            }
        }
        with_update.sort_by_key(|c| c.context_type);
        unsent.sort();
        (with_update, unsent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discarded_format_seeds_sentinel_range() {
        let f = InitializedFormat::new(140, None, None, true);
        assert_eq!(f.consumed_ranges.len(), 1);
        assert!(f.consumed_ranges[0].is_sentinel());
        assert_eq!(f.active_ranges().count(), 0);
    }

    #[test]
    fn record_segment_appends_when_not_adjacent() {
        let mut f = InitializedFormat::new(251, None, None, false);
        f.record_segment(5, 1000, 500);
        f.record_segment(10, 5000, 500);
        assert_eq!(f.consumed_ranges.len(), 2);
    }

    #[test]
    fn record_segment_merges_adjacent_range() {
        let mut f = InitializedFormat::new(251, None, None, false);
        f.record_segment(1, 0, 1000);
        f.record_segment(2, 1000, 1000);
        assert_eq!(f.consumed_ranges.len(), 1);
        let r = f.consumed_ranges[0];
        assert_eq!(r.start_sequence_number, 1);
        assert_eq!(r.end_sequence_number, 2);
        assert_eq!(r.duration_ms, 2000);
    }

    #[test]
    fn is_complete_when_total_segments_reached() {
        // Sequence numbers are 1-indexed (the teacher's `decode_media_header`
        // treats a wire value of 0 as "unset" and falls back to a counter
        // starting at 1), so `total_segments == 3` is reached at seq 3.
        let mut f = InitializedFormat::new(251, None, None, false);
        f.total_segments = Some(3);
        f.record_segment(1, 0, 1000);
        f.record_segment(2, 1000, 1000);
        assert!(!f.is_complete(0));
        f.record_segment(3, 2000, 1000);
        assert!(f.is_complete(0));
    }

    #[test]
    fn is_complete_when_end_time_reached() {
        let mut f = InitializedFormat::new(251, None, None, false);
        f.end_time_ms = Some(5000);
        assert!(!f.is_complete(4999));
        assert!(f.is_complete(5000));
    }

    #[test]
    fn advance_player_time_never_decreases_and_uses_covering_range() {
        // Advance is checked between arrivals, as the driver loop does —
        // recording both segments first would merge them into one range
        // before either `advance_player_time` call runs.
        let mut f = InitializedFormat::new(251, None, None, false);
        f.record_segment(1, 0, 1000);
        assert_eq!(f.advance_player_time(500), 1000);
        f.record_segment(2, 1000, 2000);
        assert_eq!(f.advance_player_time(1500), 3000);
        assert_eq!(f.advance_player_time(9000), 9000);
    }

    #[test]
    fn covers_is_half_open() {
        let r = ConsumedRange {
            start_sequence_number: 0,
            end_sequence_number: 0,
            start_time_ms: 1000,
            duration_ms: 500,
        };
        assert!(r.covers(1000));
        assert!(r.covers(1499));
        assert!(!r.covers(1500));
        assert!(!r.covers(999));
    }
}
