//! Type-safe identifiers using the TypeID specification.
//!
//! Grounded on the teacher's `ids::RequestId`: a UUIDv7-backed, prefixed
//! identifier that is both unique and time-sortable, which is useful for
//! correlating connection lifecycle events in logs.

use std::fmt;
use std::str::FromStr;

use mti::prelude::*;

/// A unique, time-sortable identifier for a single WebSocket connection
/// (spec.md §3: Connection). Surfaced to clients in `welcome` and
/// `connection_established` frames.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(MagicTypeId);

impl ConnectionId {
    pub const PREFIX: &'static str = "conn";

    #[must_use]
    pub fn new() -> Self {
        Self(Self::PREFIX.create_type_id::<V7>())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConnectionId {
    type Err = MagicTypeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MagicTypeId::from_str(s).map(Self)
    }
}

impl serde::Serialize for ConnectionId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_id_carries_the_conn_prefix() {
        let id = ConnectionId::new();
        assert!(id.as_str().starts_with("conn_"));
    }

    #[test]
    fn ids_are_time_ordered() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert!(a <= b);
    }
}
