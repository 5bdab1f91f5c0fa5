use crate::clock::Clock;
use crate::storage::{CONSENT_DATE_KEY, CONSENT_KEY, KeyValueStore, StorageError};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentState {
    #[default]
    Unset,
    Accepted,
    Declined,
}

/// A choice the user can make on the consent banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentChoice {
    Accepted,
    Declined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerbosityTier {
    Full,
    Limited,
}

impl ConsentState {
    pub fn from_stored(value: Option<&str>) -> Self {
        match value {
            Some("accepted") => ConsentState::Accepted,
            Some("declined") => ConsentState::Declined,
            _ => ConsentState::Unset,
        }
    }

    /// Only an explicit accept unlocks full tracking.
    pub fn tier(self) -> VerbosityTier {
        match self {
            ConsentState::Accepted => VerbosityTier::Full,
            ConsentState::Declined | ConsentState::Unset => VerbosityTier::Limited,
        }
    }
}

impl ConsentChoice {
    pub fn as_str(self) -> &'static str {
        match self {
            ConsentChoice::Accepted => "accepted",
            ConsentChoice::Declined => "declined",
        }
    }

    pub fn tier(self) -> VerbosityTier {
        ConsentState::from(self).tier()
    }
}

impl From<ConsentChoice> for ConsentState {
    fn from(choice: ConsentChoice) -> Self {
        match choice {
            ConsentChoice::Accepted => ConsentState::Accepted,
            ConsentChoice::Declined => ConsentState::Declined,
        }
    }
}

/// Reads the persisted flag; unreadable storage counts as no decision.
pub fn load(store: &dyn KeyValueStore) -> ConsentState {
    match store.get(CONSENT_KEY) {
        Ok(value) => ConsentState::from_stored(value.as_deref()),
        Err(err) => {
            warn!(%err, "consent flag unreadable; treating as unset");
            ConsentState::Unset
        }
    }
}

/// Writes the choice and the moment it was made.
pub fn persist(
    store: &dyn KeyValueStore,
    choice: ConsentChoice,
    clock: &dyn Clock,
) -> Result<(), StorageError> {
    store.set(CONSENT_KEY, choice.as_str())?;
    store.set(CONSENT_DATE_KEY, &clock.iso_now())?;
    Ok(())
}
