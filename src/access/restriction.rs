//! Restrictions and the authority that evaluates them

use crate::core::identity::StreamIdentity;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Who is asking for data
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Requester {
    /// No authenticated identity
    Anonymous,
    /// The designated public identity, only produced when the caller enables it
    Public,
    /// A successfully authenticated user
    User(String),
}

impl Requester {
    pub fn user(name: impl Into<String>) -> Self {
        Requester::User(name.into())
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Requester::User(_))
    }
}

impl fmt::Display for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requester::Anonymous => f.write_str("<anonymous>"),
            Requester::Public => f.write_str("<public>"),
            Requester::User(name) => f.write_str(name),
        }
    }
}

/// Access restriction on one (network, station) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restriction {
    pub network: String,
    pub station: String,
    pub authorized_users: BTreeSet<String>,
}

impl Restriction {
    pub fn new<I, S>(network: &str, station: &str, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            network: network.to_uppercase(),
            station: station.to_uppercase(),
            authorized_users: users.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `requester` may read streams of this pair
    pub fn permits(&self, requester: &Requester) -> bool {
        match requester {
            Requester::User(name) => self.authorized_users.contains(name),
            Requester::Public => self.authorized_users.is_empty(),
            Requester::Anonymous => false,
        }
    }

    fn key(&self) -> (String, String) {
        (self.network.clone(), self.station.clone())
    }
}

/// Immutable view of all restrictions
#[derive(Debug, Clone, Default)]
pub struct RestrictionTable {
    entries: BTreeMap<(String, String), Restriction>,
}

impl RestrictionTable {
    pub fn get(&self, network: &str, station: &str) -> Option<&Restriction> {
        self.entries
            .get(&(network.to_string(), station.to_string()))
    }

    /// Unrestricted pairs are open to everybody
    pub fn is_allowed(&self, identity: &StreamIdentity, requester: &Requester) -> bool {
        let (network, station) = identity.network_station();
        match self.get(network, station) {
            None => true,
            Some(restriction) => restriction.permits(requester),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Restriction> {
        self.entries.values()
    }
}

/// Process-wide restriction authority.
///
/// Edits come from an administrative caller; queries read a snapshot so
/// that one query evaluates every stream against the same table.
#[derive(Debug, Default)]
pub struct RestrictionAuthority {
    table: RwLock<Arc<RestrictionTable>>,
}

impl RestrictionAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<RestrictionTable> {
        self.table.read().clone()
    }

    pub fn is_allowed(&self, identity: &StreamIdentity, requester: &Requester) -> bool {
        self.snapshot().is_allowed(identity, requester)
    }

    fn edit<R>(&self, f: impl FnOnce(&mut RestrictionTable) -> R) -> R {
        let mut guard = self.table.write();
        let mut next = RestrictionTable::clone(&guard);
        let result = f(&mut next);
        *guard = Arc::new(next);
        result
    }

    /// Create or replace the restriction for its (network, station) pair
    pub fn restrict(&self, restriction: Restriction) -> Option<Restriction> {
        self.edit(|table| table.entries.insert(restriction.key(), restriction))
    }

    /// Add `user` to the pair's authorized set, creating the restriction if needed
    pub fn grant(&self, network: &str, station: &str, user: &str) {
        self.edit(|table| {
            let restriction = Restriction::new(network, station, std::iter::empty::<String>());
            table
                .entries
                .entry(restriction.key())
                .or_insert(restriction)
                .authorized_users
                .insert(user.to_string());
        })
    }

    /// Remove `user` from the pair's authorized set; the restriction itself stays
    pub fn revoke(&self, network: &str, station: &str, user: &str) -> bool {
        self.edit(|table| {
            table
                .entries
                .get_mut(&(network.to_uppercase(), station.to_uppercase()))
                .map(|r| r.authorized_users.remove(user))
                .unwrap_or(false)
        })
    }

    /// Lift the restriction on a pair
    pub fn unrestrict(&self, network: &str, station: &str) -> Option<Restriction> {
        self.edit(|table| {
            table
                .entries
                .remove(&(network.to_uppercase(), station.to_uppercase()))
        })
    }

    /// Replace the whole table, e.g. from a persisted catalog
    pub fn replace_all(&self, restrictions: Vec<Restriction>) {
        self.edit(|table| {
            table.entries = restrictions.into_iter().map(|r| (r.key(), r)).collect();
        })
    }
}
