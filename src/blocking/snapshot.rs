//! Atomically-swappable policy snapshot plus the pause / family-time gate
//! layered in front of the blocklist matcher.
//!
//! [`DnsBlocker`](super::DnsBlocker) mutates its exact/wildcard `DashMap`s in
//! place as sources load, which is fine for the bulk aggregate set but
//! leaves no room for a consistent multi-field policy (allow, deny, regex)
//! that has to change together. This module builds that policy off the hot
//! path as an immutable [`BlocklistSnapshot`] and installs it with a single
//! `ArcSwap` pointer swap, so a reader sees one generation for the whole
//! query regardless of what the updater is doing concurrently.

use arc_swap::ArcSwap;
use chrono::{Local, Timelike, Weekday};
use regex::RegexSet;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Suffix match: `domain` matches `set` if it's an exact member, or if any
/// ancestor label (`b.c`, `c` for `a.b.c`) is. O(labels).
fn suffix_match(set: &HashSet<String>, domain: &str) -> bool {
    if set.is_empty() {
        return false;
    }
    if set.contains(domain) {
        return true;
    }
    for (i, b) in domain.bytes().enumerate() {
        if b == b'.' && set.contains(&domain[i + 1..]) {
            return true;
        }
    }
    false
}

/// Same suffix walk against a single pattern domain rather than a set.
fn suffix_match_one(pattern: &str, domain: &str) -> bool {
    if domain == pattern {
        return true;
    }
    domain
        .strip_suffix(pattern)
        .map(|prefix| prefix.ends_with('.'))
        .unwrap_or(false)
}

pub fn normalize_name(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

/// One immutable policy generation: allow set, deny set, and compiled regex
/// patterns, built off the hot path and swapped in atomically. The bulk
/// aggregate exact/wildcard sets stay in `DnsBlocker`'s `DashMap`s, which are
/// already sized and optimized for hundreds of thousands of entries; this
/// snapshot covers the smaller, frequently-reconfigured policy layers.
#[derive(Default)]
pub struct BlocklistSnapshot {
    pub allow: HashSet<String>,
    pub deny: HashSet<String>,
    regexes: Option<RegexSet>,
    regex_count: usize,
}

impl BlocklistSnapshot {
    pub fn new(allow: HashSet<String>, deny: HashSet<String>, regex_patterns: &[String]) -> Self {
        let regex_count = regex_patterns.len();
        let regexes = if regex_patterns.is_empty() {
            None
        } else {
            match RegexSet::new(regex_patterns) {
                Ok(set) => Some(set),
                Err(e) => {
                    tracing::warn!("failed to compile blocklist regex set: {}", e);
                    None
                }
            }
        };
        Self {
            allow,
            deny,
            regexes,
            regex_count,
        }
    }

    pub fn is_allowed(&self, normalized: &str) -> bool {
        suffix_match(&self.allow, normalized)
    }

    pub fn is_denied(&self, normalized: &str) -> bool {
        suffix_match(&self.deny, normalized)
    }

    pub fn is_regex_match(&self, normalized: &str) -> bool {
        self.regexes
            .as_ref()
            .is_some_and(|set| set.is_match(normalized))
    }
}

/// A weekday bitmap plus a `[start, end)` minute-of-day range, shared by the
/// scheduled-pause and family-time windows. Empty weekday set means "every
/// day". Windows never wrap midnight; that's validated at construction.
#[derive(Debug, Clone)]
pub struct ScheduledWindow {
    pub enabled: bool,
    pub start_minute: u16,
    pub end_minute: u16,
    /// Indexed by `chrono::Weekday::num_days_from_monday()`.
    pub days: [bool; 7],
}

impl Default for ScheduledWindow {
    fn default() -> Self {
        Self {
            enabled: false,
            start_minute: 0,
            end_minute: 0,
            days: [false; 7],
        }
    }
}

impl ScheduledWindow {
    /// `start`/`end` as `"HH:MM"`. An empty `days` slice means every day.
    pub fn parse(
        enabled: bool,
        start: &str,
        end: &str,
        days: &[String],
    ) -> Result<Self, String> {
        let start_minute = parse_hhmm(start)?;
        let end_minute = parse_hhmm(end)?;
        if enabled && start_minute >= end_minute {
            return Err(format!(
                "scheduled window must not wrap midnight: start {start} must precede end {end}"
            ));
        }
        let mut bitmap = [false; 7];
        for day in days {
            bitmap[parse_weekday(day)?] = true;
        }
        Ok(Self {
            enabled,
            start_minute,
            end_minute,
            days: bitmap,
        })
    }

    fn day_matches(&self, weekday: Weekday) -> bool {
        self.days.iter().all(|d| !d) || self.days[weekday.num_days_from_monday() as usize]
    }

    pub fn is_active_now(&self) -> bool {
        if !self.enabled {
            return false;
        }
        let now = Local::now();
        if !self.day_matches(now.weekday()) {
            return false;
        }
        let minute = now.hour() as u16 * 60 + now.minute() as u16;
        minute >= self.start_minute && minute < self.end_minute
    }
}

fn parse_hhmm(s: &str) -> Result<u16, String> {
    let (h, m) = s
        .split_once(':')
        .ok_or_else(|| format!("invalid HH:MM time: {s}"))?;
    let h: u16 = h.parse().map_err(|_| format!("invalid hour in {s}"))?;
    let m: u16 = m.parse().map_err(|_| format!("invalid minute in {s}"))?;
    if h > 23 || m > 59 {
        return Err(format!("time out of range: {s}"));
    }
    Ok(h * 60 + m)
}

fn parse_weekday(s: &str) -> Result<usize, String> {
    match s.to_ascii_lowercase().as_str() {
        "mon" | "monday" => Ok(0),
        "tue" | "tuesday" => Ok(1),
        "wed" | "wednesday" => Ok(2),
        "thu" | "thursday" => Ok(3),
        "fri" | "friday" => Ok(4),
        "sat" | "saturday" => Ok(5),
        "sun" | "sunday" => Ok(6),
        other => Err(format!("invalid day of week: {other}")),
    }
}

/// Family-time unions a set of per-service domain lists into the effective
/// deny set while its window is active.
#[derive(Debug, Clone, Default)]
pub struct FamilyTimeConfig {
    pub window: ScheduledWindow,
    pub services: HashMap<String, Vec<String>>,
}

impl FamilyTimeConfig {
    fn active_domains(&self) -> Option<impl Iterator<Item = &String>> {
        if self.window.is_active_now() {
            Some(self.services.values().flatten())
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PauseStatusInfo {
    pub paused: bool,
    pub until_unix: Option<u64>,
}

/// Transient override plus the two scheduled windows consulted immediately
/// before the blocklist snapshot. While any of the three is active for a
/// query, `IsBlocked` must return `false` for that query regardless of what
/// the snapshot says.
pub struct PauseGate {
    until_unix: AtomicU64,
    scheduled: ArcSwap<ScheduledWindow>,
    family_time: ArcSwap<FamilyTimeConfig>,
}

impl Default for PauseGate {
    fn default() -> Self {
        Self {
            until_unix: AtomicU64::new(0),
            scheduled: ArcSwap::from_pointee(ScheduledWindow::default()),
            family_time: ArcSwap::from_pointee(FamilyTimeConfig::default()),
        }
    }
}

impl PauseGate {
    pub fn pause(&self, duration: Duration) {
        self.until_unix
            .store(now_epoch() + duration.as_secs(), Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.until_unix.store(0, Ordering::Relaxed);
    }

    pub fn status(&self) -> PauseStatusInfo {
        let until = self.until_unix.load(Ordering::Relaxed);
        if until > now_epoch() {
            PauseStatusInfo {
                paused: true,
                until_unix: Some(until),
            }
        } else {
            PauseStatusInfo {
                paused: false,
                until_unix: None,
            }
        }
    }

    /// True if blocking should be bypassed for the query in flight: an
    /// explicit `Pause`, or the scheduled-pause window, is currently active.
    pub fn is_bypassed(&self) -> bool {
        self.status().paused || self.scheduled.load().is_active_now()
    }

    pub fn set_scheduled(&self, window: ScheduledWindow) {
        self.scheduled.store(Arc::new(window));
    }

    pub fn set_family_time(&self, config: FamilyTimeConfig) {
        self.family_time.store(Arc::new(config));
    }

    /// Extra deny-domains active only during the family-time window.
    pub fn is_family_time_denied(&self, normalized: &str) -> bool {
        let cfg = self.family_time.load();
        match cfg.active_domains() {
            Some(mut domains) => domains.any(|d| suffix_match_one(d, normalized)),
            None => false,
        }
    }
}

/// Public contract for the allow/deny/regex policy layer: the bulk
/// exact/wildcard aggregate set stays on [`super::DnsBlocker`]; this covers
/// the hot-swappable allow/deny/regex tiers and the pause gate consulted
/// ahead of all of it.
#[derive(Default)]
pub struct BlocklistMatcher {
    snapshot: ArcSwap<BlocklistSnapshot>,
    pause: PauseGate,
}

impl BlocklistMatcher {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(BlocklistSnapshot::default()),
            pause: PauseGate::default(),
        }
    }

    /// Replace the allow/deny/regex snapshot atomically; readers holding the
    /// previous `Arc` (from a load a moment ago) keep seeing it consistently
    /// until they load again.
    pub fn publish(&self, allow: HashSet<String>, deny: HashSet<String>, regex_patterns: &[String]) {
        self.snapshot
            .store(Arc::new(BlocklistSnapshot::new(allow, deny, regex_patterns)));
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_bypassed()
    }

    pub fn pause(&self, duration: Duration) {
        self.pause.pause(duration);
    }

    pub fn resume(&self) {
        self.pause.resume();
    }

    pub fn pause_status(&self) -> PauseStatusInfo {
        self.pause.status()
    }

    pub fn set_scheduled_pause(&self, window: ScheduledWindow) {
        self.pause.set_scheduled(window);
    }

    pub fn set_family_time(&self, config: FamilyTimeConfig) {
        self.pause.set_family_time(config);
    }

    pub fn is_allowed(&self, normalized: &str) -> bool {
        self.snapshot.load().is_allowed(normalized)
    }

    pub fn is_denied(&self, normalized: &str) -> bool {
        let snap = self.snapshot.load();
        snap.is_denied(normalized) || self.pause.is_family_time_denied(normalized)
    }

    pub fn is_regex_match(&self, normalized: &str) -> bool {
        self.snapshot.load().is_regex_match(normalized)
    }

    pub fn stats(&self) -> MatcherStats {
        let snap = self.snapshot.load();
        MatcherStats {
            allow_count: snap.allow.len(),
            deny_count: snap.deny.len(),
            regex_count: snap.regex_count,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MatcherStats {
    pub allow_count: usize,
    pub deny_count: usize,
    pub regex_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_beats_deny() {
        let matcher = BlocklistMatcher::new();
        let mut deny = HashSet::new();
        deny.insert("example.com".to_string());
        let mut allow = HashSet::new();
        allow.insert("good.example.com".to_string());
        matcher.publish(allow, deny, &[]);

        assert!(matcher.is_denied("evil.example.com"));
        assert!(!matcher.is_allowed("evil.example.com"));
        assert!(matcher.is_allowed("good.example.com"));
    }

    #[test]
    fn regex_pattern_matches() {
        let matcher = BlocklistMatcher::new();
        matcher.publish(HashSet::new(), HashSet::new(), &["^ads[0-9]+\\.".to_string()]);
        assert!(matcher.is_regex_match("ads42.example.com"));
        assert!(!matcher.is_regex_match("example.com"));
    }

    #[test]
    fn pause_bypasses_everything() {
        let matcher = BlocklistMatcher::new();
        assert!(!matcher.is_paused());
        matcher.pause(Duration::from_secs(60));
        assert!(matcher.is_paused());
        assert!(matcher.pause_status().paused);
        matcher.resume();
        assert!(!matcher.is_paused());
    }

    #[test]
    fn scheduled_window_rejects_midnight_wrap() {
        let err = ScheduledWindow::parse(true, "22:00", "06:00", &[]);
        assert!(err.is_err());
    }

    #[test]
    fn scheduled_window_parses_valid_range() {
        let window = ScheduledWindow::parse(
            true,
            "08:00",
            "17:00",
            &["mon".to_string(), "tue".to_string()],
        )
        .unwrap();
        assert_eq!(window.start_minute, 8 * 60);
        assert_eq!(window.end_minute, 17 * 60);
        assert!(window.days[0]);
        assert!(!window.days[2]);
    }

    #[test]
    fn suffix_match_one_requires_label_boundary() {
        assert!(suffix_match_one("ads.example.com", "tracker.ads.example.com"));
        assert!(!suffix_match_one("ads.example.com", "notads.example.com"));
    }
}
