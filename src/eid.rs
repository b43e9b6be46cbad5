use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::{fmt::Display, ops::Deref};

/// Opaque record identifier. Item and user records are both keyed by a ULID
/// string assigned by the store that creates them.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
#[serde(transparent)]
pub struct Eid(String);

#[derive(thiserror::Error, Debug)]
#[error("malformed id {0:?}")]
pub struct MalformedId(pub String);

impl Display for Eid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Eid {
    type Err = MalformedId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        s.parse::<rusty_ulid::Ulid>()
            .map(|ulid| Eid(ulid.to_string()))
            .map_err(|_| MalformedId(s.to_string()))
    }
}

impl Deref for Eid {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Eid> for String {
    fn from(fr: Eid) -> Self {
        fr.0
    }
}

impl Eid {
    #[inline]
    pub fn new() -> Eid {
        Eid(rusty_ulid::Ulid::generate().to_string())
    }

    /// Wraps a stored value without validating it. Only used when reading
    /// back records this process wrote itself.
    pub(crate) fn from_stored(raw: &str) -> Eid {
        Eid(raw.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Eid {
    fn default() -> Self {
        Self::new()
    }
}
