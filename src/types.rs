/// Shared types used across the codebase

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const LOGIN_PATH: &str = "/login";
pub const CHOOSE_ROLE_PATH: &str = "/choose-role";
pub const UNAUTHORIZED_PATH: &str = "/unauthorized";

/// Closed set of marketplace roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum RoleTag {
    Unset,
    Buyer,
    Seller,
    Admin,
    Landlord,
}

impl RoleTag {
    pub const ASSIGNABLE: [RoleTag; 4] = [
        RoleTag::Buyer,
        RoleTag::Seller,
        RoleTag::Admin,
        RoleTag::Landlord,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoleTag::Unset => "unset",
            RoleTag::Buyer => "buyer",
            RoleTag::Seller => "seller",
            RoleTag::Admin => "admin",
            RoleTag::Landlord => "landlord",
        }
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, RoleTag::Unset)
    }

    /// Dashboard a user lands on once their role is known.
    /// This is the only role -> path table in the crate.
    pub fn home_path(&self) -> &'static str {
        match self {
            RoleTag::Unset => CHOOSE_ROLE_PATH,
            RoleTag::Buyer => "/buyer-dashboard",
            RoleTag::Seller => "/seller-dashboard",
            RoleTag::Admin => "/admin-dashboard",
            RoleTag::Landlord => "/landlord-dashboard",
        }
    }
}

impl fmt::Display for RoleTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown role: '{0}'")]
pub struct UnknownRole(pub String);

impl FromStr for RoleTag {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Legacy rows use "none" for role-less profiles and the French label for landlords
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "unset" | "none" => Ok(RoleTag::Unset),
            "buyer" => Ok(RoleTag::Buyer),
            "seller" => Ok(RoleTag::Seller),
            "admin" => Ok(RoleTag::Admin),
            "landlord" | "proprietaire immobilier" => Ok(RoleTag::Landlord),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

impl TryFrom<String> for RoleTag {
    type Error = UnknownRole;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Authenticated identity issued by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: Uuid,
    pub email: String,
    pub expiry: DateTime<Utc>,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Application-level record extending a session with a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(rename = "id")]
    pub user_id: Uuid,
    pub full_name: Option<String>,
    pub email: String,
    pub role: RoleTag,
    pub city: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    /// Profile as it looks right after lazy creation
    pub fn from_defaults(user_id: Uuid, defaults: &ProfileDefaults) -> Self {
        Self {
            user_id,
            full_name: defaults.full_name.clone(),
            email: defaults.email.clone(),
            role: RoleTag::Unset,
            city: defaults.city.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Onboarding data used when a profile has to be created lazily
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDefaults {
    pub email: String,
    pub full_name: Option<String>,
    pub city: Option<String>,
}

impl ProfileDefaults {
    pub fn for_session(session: &Session) -> Self {
        Self {
            email: session.email.clone(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    Timeout,
    Backend,
}

/// Why a resolution could not reach a routing verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
}

/// The single output of a resolution, consumed by the router
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RoutingDecision {
    Render,
    Redirect { path: String },
    Failed { reason: FailureReason },
}

impl RoutingDecision {
    pub fn redirect(path: impl Into<String>) -> Self {
        RoutingDecision::Redirect { path: path.into() }
    }

    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        RoutingDecision::Failed {
            reason: FailureReason {
                kind,
                message: message.into(),
            },
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RoutingDecision::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_legacy_role_spellings() {
        assert_eq!("none".parse::<RoleTag>().unwrap(), RoleTag::Unset);
        assert_eq!("".parse::<RoleTag>().unwrap(), RoleTag::Unset);
        assert_eq!("Seller".parse::<RoleTag>().unwrap(), RoleTag::Seller);
        assert_eq!(
            "proprietaire immobilier".parse::<RoleTag>().unwrap(),
            RoleTag::Landlord
        );
        assert!("tenant".parse::<RoleTag>().is_err());
    }

    #[test]
    fn every_assignable_role_has_a_dashboard() {
        for role in RoleTag::ASSIGNABLE {
            assert!(role.home_path().ends_with("-dashboard"), "{role}");
        }
        assert_eq!(RoleTag::Unset.home_path(), CHOOSE_ROLE_PATH);
    }

    #[test]
    fn decision_serializes_with_tag() {
        assert_eq!(
            serde_json::to_value(RoutingDecision::Render).unwrap(),
            json!({ "decision": "render" })
        );
        assert_eq!(
            serde_json::to_value(RoutingDecision::redirect(LOGIN_PATH)).unwrap(),
            json!({ "decision": "redirect", "path": "/login" })
        );
        assert_eq!(
            serde_json::to_value(RoutingDecision::failed(FailureKind::Timeout, "slow")).unwrap(),
            json!({ "decision": "failed", "reason": { "kind": "timeout", "message": "slow" } })
        );
    }

    #[test]
    fn profile_uses_id_on_the_wire() {
        let profile = Profile::from_defaults(
            Uuid::new_v4(),
            &ProfileDefaults {
                email: "a@b.c".into(),
                ..Default::default()
            },
        );
        let value = serde_json::to_value(&profile).unwrap();
        assert_eq!(value["id"], json!(profile.user_id));
        assert_eq!(value["role"], json!("unset"));
    }
}
