use serde::{Deserialize, Serialize};

/// Principal role, as specified: admins manage the chatflow registry and
/// user assignments, supervisors get the same retrieval privileges as
/// admins without the write endpoints, end users are ordinary callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Supervisor,
    EndUser,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Supervisor => "Supervisor",
            Role::EndUser => "EndUser",
        }
    }

    /// Privileged roles are allowed to retrieve any user's file uploads
    /// (spec §4.C7 retrieval rule).
    pub fn is_privileged(&self) -> bool {
        matches!(self, Role::Admin | Role::Supervisor)
    }
}

impl std::str::FromStr for Role {
    type Err = crate::AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Admin" => Ok(Role::Admin),
            "Supervisor" => Ok(Role::Supervisor),
            "EndUser" => Ok(Role::EndUser),
            other => Err(crate::AuthError::UnknownRole(other.to_string())),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn roundtrips_through_str() {
        for role in [Role::Admin, Role::Supervisor, Role::EndUser] {
            assert_eq!(Role::from_str(role.as_str()).unwrap(), role);
        }
    }

    #[test]
    fn rejects_unknown_role() {
        assert!(Role::from_str("Superuser").is_err());
    }
}
