use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claims of the access token issued by the hosted auth provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // auth user UUID
    pub exp: usize,
    #[serde(default)]
    pub iat: Option<usize>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub aud: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StaffRole {
    Admin,
    Clerk,
}

impl std::fmt::Display for StaffRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StaffRole::Admin => "admin",
            StaffRole::Clerk => "clerk",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for StaffRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(StaffRole::Admin),
            "clerk" => Ok(StaffRole::Clerk),
            _ => Err(anyhow::anyhow!("Unknown role: {s}")),
        }
    }
}

/// Staff member resolved from the bearer token and `user_roles`.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub role: StaffRole,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.role == StaffRole::Admin
    }
}
