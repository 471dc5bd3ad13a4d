// Participant identities shared across all Switchboard crates.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Separator between the owner segment and the local segment of a
/// composite participant id.
pub const LOCAL_ID_SEPARATOR: char = ':';

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParticipantIdError {
    #[error("participant id must not be empty")]
    Empty,
    #[error("participant id {0:?} has an empty owner segment")]
    EmptyOwner(String),
}

/// Identity of one logical participant.
///
/// A participant is either a connection itself (`owner`) or one of the
/// logical peers multiplexed over that connection (`owner:local`). On
/// the wire both forms travel as a single opaque string; everything
/// past the first `:` is the local segment. Routing code works on this
/// structured form and never splits strings itself.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParticipantId {
    owner: String,
    local: Option<String>,
}

impl ParticipantId {
    /// Identity of a connection with no local segment.
    pub fn bare(owner: impl Into<String>) -> Self {
        Self { owner: owner.into(), local: None }
    }

    /// Identity of `owner`, or of `owner:local` when a local segment is
    /// present.
    pub fn new(owner: impl Into<String>, local: Option<String>) -> Self {
        Self { owner: owner.into(), local: local.filter(|local| !local.is_empty()) }
    }

    /// Parse the wire form, splitting on the first `:`. An id without a
    /// separator is a bare connection id; a trailing empty local
    /// segment (`"a:"`) is treated as absent.
    pub fn parse(raw: &str) -> Result<Self, ParticipantIdError> {
        if raw.is_empty() {
            return Err(ParticipantIdError::Empty);
        }
        match raw.split_once(LOCAL_ID_SEPARATOR) {
            Some(("", _)) => Err(ParticipantIdError::EmptyOwner(raw.to_string())),
            Some((owner, local)) => Ok(Self::new(owner, Some(local.to_string()))),
            None => Ok(Self::bare(raw)),
        }
    }

    /// The owning connection id: the segment before the first `:`, or
    /// the whole id when no separator is present.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn local(&self) -> Option<&str> {
        self.local.as_deref()
    }

    pub fn is_composite(&self) -> bool {
        self.local.is_some()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.local {
            Some(local) => write!(f, "{}{}{}", self.owner, LOCAL_ID_SEPARATOR, local),
            None => f.write_str(&self.owner),
        }
    }
}

impl Serialize for ParticipantId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ParticipantId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
