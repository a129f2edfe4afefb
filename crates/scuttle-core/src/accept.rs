//! Accept policies: which keys a node is willing to receive.

use serde::{Deserialize, Serialize};

/// Key filter announced in a node's digest.
///
/// A whitelist, when present, is exclusive: any key it does not list is
/// rejected. A blacklist rejects the keys it lists. An empty policy accepts
/// everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blacklist: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whitelist: Option<Vec<String>>,
}

impl AcceptPolicy {
    /// Policy accepting only the listed keys.
    pub fn whitelist<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            blacklist: None,
            whitelist: Some(keys.into_iter().map(Into::into).collect()),
        }
    }

    /// Policy rejecting the listed keys.
    pub fn blacklist<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            blacklist: Some(keys.into_iter().map(Into::into).collect()),
            whitelist: None,
        }
    }

    pub fn accepts(&self, key: &str) -> bool {
        if let Some(blacklist) = &self.blacklist {
            if blacklist.iter().any(|k| k == key) {
                return false;
            }
        }
        match &self.whitelist {
            Some(whitelist) => whitelist.iter().any(|k| k == key),
            None => true,
        }
    }
}
