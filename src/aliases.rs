//! Aliases

use serde::Deserialize;
use serde::Serialize;
use url::Url;
use uuid::Uuid;

/// How often an alias may be resolved
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum UsagePolicy {
    /// Resolves forever, never counted
    Permanent,

    /// Resolves until the remaining tries reach zero
    Limited {
        /// Remaining resolutions, only ever decremented
        tries_left: u64,
    },
}

impl UsagePolicy {
    /// Is this policy unlimited?
    pub fn is_permanent(self) -> bool {
        matches!(self, Self::Permanent)
    }

    /// Remaining tries, `None` for permanent aliases
    pub fn tries_left(self) -> Option<u64> {
        match self {
            Self::Permanent => None,
            Self::Limited { tries_left } => Some(tries_left),
        }
    }
}

/// Short key pointing to a target
///
/// The record is owned by the directory, copies of it are never kept across requests
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alias {
    /// Storage assigned ID, not used for lookups
    pub id: Uuid,

    /// Unique key among the active aliases
    pub key: String,

    /// Where the alias resolves to
    pub target: Url,

    /// False once the alias is removed
    pub active: bool,

    /// Usage limit of the alias
    pub usage_policy: UsagePolicy,
}

impl Alias {
    /// Has a limited alias used up all its tries?
    ///
    /// Derived at read time, there is no stored expired state
    pub fn is_exhausted(&self) -> bool {
        self.usage_policy.tries_left() == Some(0)
    }
}

/// Request to create a single alias
#[derive(Clone, Debug)]
pub struct CreateRequest {
    /// Target of the new alias
    pub target: Url,

    /// Usage limit of the new alias
    pub usage_policy: UsagePolicy,
}
