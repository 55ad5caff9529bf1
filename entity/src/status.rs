use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    #[default]
    Offline,
    Available,
    Away,
}

impl Availability {
    /// Whether a client may store this availability through a status update.
    /// `Offline` is derived from presence and never persisted that way.
    pub fn is_settable(&self) -> bool {
        matches!(self, Availability::Available | Availability::Away)
    }
}

impl std::fmt::Display for Availability {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Availability::Offline => write!(fmt, "offline"),
            Availability::Available => write!(fmt, "available"),
            Availability::Away => write!(fmt, "away"),
        }
    }
}

/// A user's most recent status as shown to their buddies.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Default)]
pub struct UserStatus {
    pub availability: Availability,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub time: DateTime<Utc>,
    /// Opaque client-defined blob, stored and relayed untouched.
    #[serde(default)]
    pub user_metadata: String,
}

impl UserStatus {
    /// The synthesized status of an identity with no live session.
    pub fn offline() -> Self {
        Self::default()
    }

    /// The status a buddy should see: the stored one while the identity has a
    /// live session, `Offline` otherwise.
    pub fn masked(&self, online: bool) -> Self {
        if online {
            self.clone()
        } else {
            Self::offline()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_available_and_away_are_settable() {
        assert!(!Availability::Offline.is_settable());
        assert!(Availability::Available.is_settable());
        assert!(Availability::Away.is_settable());
    }

    #[test]
    fn masked_status_hides_stored_values_when_offline() {
        let status = UserStatus {
            availability: Availability::Away,
            message: "lunch".to_string(),
            time: Utc::now(),
            user_metadata: "{}".to_string(),
        };

        assert_eq!(status.masked(true), status);
        assert_eq!(status.masked(false), UserStatus::offline());
    }

    #[test]
    fn availability_serializes_lowercase() {
        let json = serde_json::to_string(&Availability::Away).unwrap();
        assert_eq!(json, "\"away\"");
        let parsed: Availability = serde_json::from_str("\"available\"").unwrap();
        assert_eq!(parsed, Availability::Available);
    }
}
