use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtHeader {
    pub alg: String,
    pub typ: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub user_metadata: Option<serde_json::Value>,
    pub iat: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Patient,
    Doctor,
    Secretary,
    MainDoctor,
    Admin,
}

impl UserRole {
    pub fn is_staff(&self) -> bool {
        !matches!(self, UserRole::Patient)
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UserRole::Patient => "patient",
            UserRole::Doctor => "doctor",
            UserRole::Secretary => "secretary",
            UserRole::MainDoctor => "main_doctor",
            UserRole::Admin => "admin",
        };
        f.write_str(s)
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "patient" => Ok(UserRole::Patient),
            "doctor" => Ok(UserRole::Doctor),
            "secretary" => Ok(UserRole::Secretary),
            "main_doctor" => Ok(UserRole::MainDoctor),
            "admin" => Ok(UserRole::Admin),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

/// The authenticated caller, as resolved from a bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    /// The subject claim as a UUID, if it is one.
    pub fn uuid(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.id).ok()
    }

    pub fn user_role(&self) -> Option<UserRole> {
        self.role.as_deref().and_then(|r| r.parse().ok())
    }

    pub fn is_patient(&self) -> bool {
        self.user_role() == Some(UserRole::Patient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_roles_case_insensitively() {
        assert_eq!("PATIENT".parse::<UserRole>(), Ok(UserRole::Patient));
        assert_eq!("main_doctor".parse::<UserRole>(), Ok(UserRole::MainDoctor));
        assert!("nurse".parse::<UserRole>().is_err());
    }

    #[test]
    fn only_patient_role_is_not_staff() {
        assert!(!UserRole::Patient.is_staff());
        assert!(UserRole::Secretary.is_staff());
        assert!(UserRole::Doctor.is_staff());
    }
}
