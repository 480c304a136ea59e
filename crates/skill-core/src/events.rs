//! Events appended to the install history.

use crate::types::{Id, InstalledRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event type names as stored in the history log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    SkillInstalled,
    SkillUninstalled,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SkillInstalled => "SKILL_INSTALLED",
            Self::SkillUninstalled => "SKILL_UNINSTALLED",
        }
    }
}

/// Payload for SKILL_UNINSTALLED.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillUninstalledPayload {
    pub id: Id,
    pub name: String,
    pub timestamp: DateTime<Utc>,
}

impl SkillUninstalledPayload {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Id::new(),
            name: name.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Union of everything the history log accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstallEvent {
    SkillInstalled(InstalledRecord),
    SkillUninstalled(SkillUninstalledPayload),
}

impl InstallEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::SkillInstalled(_) => EventType::SkillInstalled,
            Self::SkillUninstalled(_) => EventType::SkillUninstalled,
        }
    }

    pub fn id(&self) -> &Id {
        match self {
            Self::SkillInstalled(r) => &r.id,
            Self::SkillUninstalled(p) => &p.id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::SkillInstalled(r) => r.timestamp,
            Self::SkillUninstalled(p) => p.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_matches_serialized_tag() {
        let event = InstallEvent::SkillInstalled(InstalledRecord::new(
            "acme/greeter",
            "/skills/acme-greeter",
        ));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.event_type().as_str());
        assert_eq!(json["data"]["package"], "acme/greeter");
    }

    #[test]
    fn uninstalled_event_exposes_id_and_timestamp() {
        let payload = SkillUninstalledPayload::new("acme-greeter");
        let event = InstallEvent::SkillUninstalled(payload.clone());
        assert_eq!(event.id(), &payload.id);
        assert_eq!(event.timestamp(), payload.timestamp);
        assert_eq!(event.event_type(), EventType::SkillUninstalled);
    }
}
