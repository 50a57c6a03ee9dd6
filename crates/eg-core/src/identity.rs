//! Visitor identity and long-term usage bookkeeping.
//!
//! The engine does not own storage. It reads and writes opaque string values
//! through a [`KeyValueStore`] with two lifetimes: [`Scope::Session`] (ends with
//! the browsing session, like a session cookie) and [`Scope::Persistent`]
//! (survives sessions, like local storage). Every key is namespaced by client.
//!
//! Absent values are the normal first-visit case, not errors. Values that are
//! present but unparseable are logged and treated as absent.

use std::collections::HashMap;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::ClientId;

/// Lifetime of a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Session,
    Persistent,
}

impl Scope {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Persistent => "persistent",
        }
    }
}

/// String key-value storage for identity data.
pub trait KeyValueStore {
    fn get(&self, scope: Scope, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&mut self, scope: Scope, key: &str, value: &str) -> Result<(), StoreError>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for &mut S {
    fn get(&self, scope: Scope, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(scope, key)
    }

    fn set(&mut self, scope: Scope, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(scope, key, value)
    }
}

/// In-memory store, for tests and hosts without persistence.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: HashMap<(Scope, String), String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops all session-scoped values, as closing the browser would.
    pub fn end_session(&mut self) {
        self.values.retain(|(scope, _), _| *scope != Scope::Session);
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, scope: Scope, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.get(&(scope, key.to_string())).cloned())
    }

    fn set(&mut self, scope: Scope, key: &str, value: &str) -> Result<(), StoreError> {
        self.values.insert((scope, key.to_string()), value.to_string());
        Ok(())
    }
}

/// Stored fields, each kept under `eg_<field>_<client>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKey {
    VisitorId,
    SessionId,
    SessionReferrer,
    LifetimePageviews,
    LifetimeSessions,
    SessionHitNum,
    LastActiveTime,
}

impl IdentityKey {
    pub const ALL: [Self; 7] = [
        Self::VisitorId,
        Self::SessionId,
        Self::SessionReferrer,
        Self::LifetimePageviews,
        Self::LifetimeSessions,
        Self::SessionHitNum,
        Self::LastActiveTime,
    ];

    pub const fn field(self) -> &'static str {
        match self {
            Self::VisitorId => "uuid",
            Self::SessionId => "session_id",
            Self::SessionReferrer => "session_referrer",
            Self::LifetimePageviews => "lifetime_pageviews",
            Self::LifetimeSessions => "lifetime_sessions",
            Self::SessionHitNum => "session_hit_num",
            Self::LastActiveTime => "last_active_time",
        }
    }

    pub const fn scope(self) -> Scope {
        match self {
            Self::SessionId | Self::SessionReferrer | Self::SessionHitNum => Scope::Session,
            Self::VisitorId
            | Self::LifetimePageviews
            | Self::LifetimeSessions
            | Self::LastActiveTime => Scope::Persistent,
        }
    }

    pub fn key(self, client: &ClientId) -> String {
        format!("eg_{}_{client}", self.field())
    }
}

/// Identity fields included in every snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub visitor_id: String,
    pub session_id: String,
    pub referrer: String,
    pub referrer_host: String,
    pub session_referrer: String,
    pub first_ever_session: bool,
    pub first_ever_pageview: bool,
    pub lifetime_pageviews: u64,
    pub lifetime_sessions: u64,
    pub session_hit_num: u64,
    pub active_last_24_hrs: bool,
    pub active_last_7_days: bool,
}

impl Identity {
    /// Reads and updates stored identity for one page load at `now`.
    ///
    /// Runs once per page load: it increments the lifetime pageview counter,
    /// the session hit number and, on a session's first hit, the lifetime
    /// session counter.
    pub fn resolve<S: KeyValueStore + ?Sized>(
        store: &mut S,
        client: &ClientId,
        referrer: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, StoreError> {
        let mut ids = Keys { store, client };

        let visitor_id = ids.get_or_generate(IdentityKey::VisitorId)?;
        let session_id = ids.get_or_generate(IdentityKey::SessionId)?;

        let (referrer, referrer_host) = if referrer.is_empty() {
            ("direct".to_string(), "direct".to_string())
        } else {
            (referrer.to_string(), classify_referrer(referrer))
        };
        let session_referrer = match ids.get(IdentityKey::SessionReferrer)? {
            Some(existing) => existing,
            None => {
                ids.set(IdentityKey::SessionReferrer, &referrer_host)?;
                referrer_host.clone()
            }
        };

        let stored_pageviews = ids.get_count(IdentityKey::LifetimePageviews)?;
        let first_ever_pageview = stored_pageviews.is_none();
        let lifetime_pageviews = stored_pageviews.map_or(1, |n| n.saturating_add(1));
        ids.set(IdentityKey::LifetimePageviews, &lifetime_pageviews.to_string())?;

        let stored_sessions = ids.get_count(IdentityKey::LifetimeSessions)?;
        let first_ever_session = stored_sessions.is_none_or(|n| n == 0);
        let mut lifetime_sessions = stored_sessions.unwrap_or(0);
        let session_hit_num = match ids.get_count(IdentityKey::SessionHitNum)? {
            Some(hit) => hit.saturating_add(1),
            None => {
                lifetime_sessions = lifetime_sessions.saturating_add(1);
                1
            }
        };
        ids.set(IdentityKey::LifetimeSessions, &lifetime_sessions.to_string())?;
        ids.set(IdentityKey::SessionHitNum, &session_hit_num.to_string())?;

        let since_last_active = ids
            .get_timestamp(IdentityKey::LastActiveTime)?
            .map(|last| now - last);
        let active_last_24_hrs = since_last_active.is_some_and(|d| d < Duration::hours(24));
        let active_last_7_days = since_last_active.is_some_and(|d| d < Duration::days(7));
        ids.set(
            IdentityKey::LastActiveTime,
            &now.to_rfc3339_opts(SecondsFormat::Millis, true),
        )?;

        Ok(Self {
            visitor_id,
            session_id,
            referrer,
            referrer_host,
            session_referrer,
            first_ever_session,
            first_ever_pageview,
            lifetime_pageviews,
            lifetime_sessions,
            session_hit_num,
            active_last_24_hrs,
            active_last_7_days,
        })
    }
}

/// Client-scoped accessors over a store.
struct Keys<'a, S: ?Sized> {
    store: &'a mut S,
    client: &'a ClientId,
}

impl<S: KeyValueStore + ?Sized> Keys<'_, S> {
    fn get(&self, key: IdentityKey) -> Result<Option<String>, StoreError> {
        self.store.get(key.scope(), &key.key(self.client))
    }

    fn set(&mut self, key: IdentityKey, value: &str) -> Result<(), StoreError> {
        self.store.set(key.scope(), &key.key(self.client), value)
    }

    fn get_or_generate(&mut self, key: IdentityKey) -> Result<String, StoreError> {
        if let Some(existing) = self.get(key)? {
            return Ok(existing);
        }
        let fresh = Uuid::new_v4().to_string();
        self.set(key, &fresh)?;
        Ok(fresh)
    }

    fn get_count(&self, key: IdentityKey) -> Result<Option<u64>, StoreError> {
        let Some(raw) = self.get(key)? else {
            return Ok(None);
        };
        match raw.trim().parse() {
            Ok(n) => Ok(Some(n)),
            Err(err) => {
                tracing::warn!(key = key.field(), value = %raw, %err, "ignoring unparseable counter");
                Ok(None)
            }
        }
    }

    fn get_timestamp(&self, key: IdentityKey) -> Result<Option<DateTime<Utc>>, StoreError> {
        let Some(raw) = self.get(key)? else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(at) => Ok(Some(at.with_timezone(&Utc))),
            Err(err) => {
                tracing::warn!(key = key.field(), value = %raw, %err, "ignoring unparseable timestamp");
                Ok(None)
            }
        }
    }
}

/// Maps a referrer URL to a friendly name for well-known sources, or to its
/// bare host otherwise.
pub fn classify_referrer(referrer: &str) -> String {
    let host = referrer_host(referrer);
    let h = host.as_str();

    if h.starts_with("facebook.")
        || h.starts_with("fb.")
        || h.contains(".facebook.")
        || h.contains(".fb.")
    {
        "Facebook".to_string()
    } else if h.contains("mail.google") || h.contains("gmail.com") {
        "Gmail".to_string()
    } else if h.starts_with("google.") || h.contains(".google.") || h.contains(".googleusercontent.")
    {
        "Google".to_string()
    } else if h.contains("reddit.com") {
        "Reddit".to_string()
    } else if h == "t.co" {
        "Twitter".to_string()
    } else if h.starts_with("lnkd.in") || h.starts_with("linkedin.") {
        "LinkedIn".to_string()
    } else {
        host
    }
}

/// Extracts the `host[:port]` part of a referrer, tolerating non-URL strings.
fn referrer_host(referrer: &str) -> String {
    if let Ok(url) = Url::parse(referrer) {
        if let Some(host) = url.host_str() {
            return match url.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            };
        }
    }
    let after_scheme = referrer.split_once("//").map_or(referrer, |(_, rest)| rest);
    after_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .to_string()
}
