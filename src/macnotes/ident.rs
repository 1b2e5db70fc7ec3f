//! Identifier resolution.
//!
//! Handles derived from a predicate or from the UI selection sometimes report `0` (or
//! nothing) as their id. The real id is still visible in the handle's debug
//! description, e.g. `<SBObject @0x6000: <class 'note'> id "x-coredata://…/p12" of …>`.
//!
//! [`resolve`] never fails. When no source yields an id it returns
//! [`Identifier::invalid`], which callers must not use for equality, hashing or lookups.

use crate::host::{Handle, ObjectBridge, Property};
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

const SENTINEL: &str = "0";

static DEBUG_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"id "([^"]+)""#).expect("valid debug id regex"));

/// A host object identifier, or the invalid sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Wraps a raw id. Empty and `"0"` become the sentinel.
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        if raw.is_empty() || raw == SENTINEL {
            Self::invalid()
        } else {
            Identifier(raw)
        }
    }

    pub fn invalid() -> Self {
        Identifier(SENTINEL.to_string())
    }

    pub fn is_valid(&self) -> bool {
        self.0 != SENTINEL
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// First `id "<…>"` capture in a debug description.
pub fn parse_debug_id(description: &str) -> Option<Identifier> {
    DEBUG_ID
        .captures(description)
        .and_then(|caps| caps.get(1))
        .map(|m| Identifier::new(m.as_str()))
        .filter(Identifier::is_valid)
}

/// Native id first, then the debug description, else the sentinel.
pub fn resolve(bridge: &dyn ObjectBridge, handle: &Handle) -> Identifier {
    match bridge.get(handle, Property::Id) {
        Ok(value) if !value.is_absent() => {
            let id = value.into_text().map(Identifier::new);
            if let Some(id) = id.filter(Identifier::is_valid) {
                return id;
            }
        }
        Ok(_) => {}
        Err(e) => warn!("event=id_read_failed handle={} error={}", handle, e),
    }

    debug!(
        "event=fallback attribute=id from=structured to=debug_repr handle={}",
        handle
    );
    match bridge.describe(handle) {
        Ok(description) => parse_debug_id(&description).unwrap_or_else(Identifier::invalid),
        Err(e) => {
            warn!("event=describe_failed handle={} error={}", handle, e);
            Identifier::invalid()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::{MemoryHost, Quirks};

    #[test]
    fn sentinel_values() {
        assert!(!Identifier::new("0").is_valid());
        assert!(!Identifier::new("").is_valid());
        assert!(!Identifier::invalid().is_valid());
        assert!(Identifier::new("x-coredata://A/ICNote/p1").is_valid());
    }

    #[test]
    fn parses_first_id_from_description() {
        let repr = r#"<SBObject @0x6000: <class 'note'> id "x-coredata://A/ICNote/p7" of <class 'account'> id "x-coredata://A/ICAccount/p1">"#;
        assert_eq!(
            parse_debug_id(repr),
            Some(Identifier::new("x-coredata://A/ICNote/p7"))
        );
    }

    #[test]
    fn parse_rejects_missing_or_sentinel() {
        assert_eq!(parse_debug_id("<SBObject @0x6000: <class 'note'>>"), None);
        assert_eq!(parse_debug_id(r#"<SBObject id "0">"#), None);
    }

    #[test]
    fn resolve_uses_native_id() {
        let host = MemoryHost::new();
        let account = host.add_account("iCloud");
        let note = host.add_note(&account, "Shopping", "milk");
        let id = resolve(&host, &note);
        assert!(id.is_valid());
        assert_eq!(id, resolve(&host, &note));
    }

    #[test]
    fn resolve_recovers_from_debug_repr() {
        let host = MemoryHost::new();
        let account = host.add_account("iCloud");
        let note = host.add_note(&account, "Shopping", "milk");
        let expected = resolve(&host, &note);

        let derived = host.derived(&note);
        host.configure(|q| q.sentinel_ids = true);
        let first = resolve(&host, &derived);
        let second = resolve(&host, &derived);
        assert_eq!(first, expected);
        assert_eq!(first, second);
    }

    #[test]
    fn resolve_returns_sentinel_when_nothing_works() {
        let host = MemoryHost::new();
        let account = host.add_account("iCloud");
        let note = host.add_note(&account, "Shopping", "milk");
        let derived = host.derived(&note);
        host.configure(|q: &mut Quirks| {
            q.sentinel_ids = true;
            q.opaque_descriptions = true;
        });
        let id = resolve(&host, &derived);
        assert!(!id.is_valid());
    }
}
