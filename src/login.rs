use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{AppError, Result};

lazy_static! {
    // Verified against for unknown usernames so both failure paths cost the same
    static ref DUMMY_HASH: String = hash_password("dummy password").unwrap_or_default();
}

/// Role attached to a credential entry
///
/// Doctors and engineers may only enter data. Admins additionally see the
/// submission history and may edit the specialty mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Doctor,
    Admin,
    Engineer,
}

impl Role {
    /// Whether this role may browse previously submitted worksheets
    pub fn can_view_history(self) -> bool {
        matches!(self, Role::Admin)
    }

    /// Whether this role may overwrite the specialty mapping sheet
    pub fn can_edit_mapping(self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Doctor => "doctor",
            Role::Admin => "admin",
            Role::Engineer => "engineer",
        };
        f.write_str(name)
    }
}

/// Credential entry as written in the configuration file
///
/// The password is kept as an Argon2 PHC string, never in plain text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Username (unique identifier for the user)
    pub username: String,

    /// Argon2 hash of the user's password
    pub password_hash: String,

    /// Role granted on successful login
    pub role: Role,
}

/// Credential data for login
///
/// Used to receive the login form data from the client.
#[derive(Debug, Serialize, Deserialize)]
pub struct UserCredentials {
    pub username: String,
    pub password: String,
}

/// Fixed in-memory credential table
///
/// Built once at process start from the configuration and never mutated.
#[derive(Debug, Clone, Default)]
pub struct CredentialTable {
    users: HashMap<String, Credential>,
}

impl CredentialTable {
    /// Build the table from configured entries
    ///
    /// # Arguments
    /// * `entries` - Credential entries, usernames must be unique
    ///
    /// # Returns
    /// * `Result<CredentialTable>` - The table, or a configuration error
    ///
    /// # Errors
    /// * Returns an error if a username is empty or appears twice
    pub fn new(entries: Vec<Credential>) -> Result<Self> {
        let mut users = HashMap::with_capacity(entries.len());
        for entry in entries {
            if entry.username.is_empty() {
                return Err(AppError::Config("username cannot be empty".to_string()));
            }
            if users.contains_key(&entry.username) {
                return Err(AppError::Config(format!(
                    "duplicate user '{}'",
                    entry.username
                )));
            }
            users.insert(entry.username.clone(), entry);
        }
        Ok(CredentialTable { users })
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Verify user credentials
    ///
    /// Checks whether the provided username and password match an entry of
    /// the table and returns the role that entry grants.
    ///
    /// # Arguments
    /// * `username` - Username to verify
    /// * `password` - Password to verify
    ///
    /// # Returns
    /// * `Result<Role>` - The role of the matching entry
    ///
    /// # Errors
    /// * `AppError::InvalidCredentials` for an unknown user or wrong password
    /// * `AppError::Config` if the stored hash is malformed
    pub fn authenticate(&self, username: &str, password: &str) -> Result<Role> {
        let Some(user) = self.users.get(username) else {
            let _ = verify_password(password, &DUMMY_HASH);
            return Err(AppError::InvalidCredentials);
        };

        if verify_password(password, &user.password_hash)? {
            Ok(user.role)
        } else {
            Err(AppError::InvalidCredentials)
        }
    }
}

/// Hash a password using Argon2
///
/// Creates a PHC-format hash suitable for the `password_hash` field of a
/// configured user.
///
/// # Arguments
/// * `password` - The plaintext password to hash
///
/// # Returns
/// * `Result<String>` - The password hash or an error
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Config(format!("password hashing failed: {e}")))
}

/// Verify a password against a stored hash
///
/// # Arguments
/// * `password` - The plaintext password to verify
/// * `hash` - The stored password hash to check against
///
/// # Returns
/// * `Result<bool>` - True if the password matches, false if not
///
/// # Errors
/// * Returns an error if the hash is in an invalid format
fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|_| AppError::Config("invalid password hash format".to_string()))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> CredentialTable {
        CredentialTable::new(vec![
            Credential {
                username: "admin".to_string(),
                password_hash: hash_password("s3cret").unwrap(),
                role: Role::Admin,
            },
            Credential {
                username: "engineer1".to_string(),
                password_hash: hash_password("password123").unwrap(),
                role: Role::Engineer,
            },
        ])
        .unwrap()
    }

    #[test]
    fn matching_credentials_yield_role() {
        let table = table();
        assert_eq!(table.authenticate("admin", "s3cret").unwrap(), Role::Admin);
        assert_eq!(
            table.authenticate("engineer1", "password123").unwrap(),
            Role::Engineer
        );
    }

    #[test]
    fn wrong_password_or_unknown_user_is_rejected() {
        let table = table();
        assert!(matches!(
            table.authenticate("admin", "password123"),
            Err(AppError::InvalidCredentials)
        ));
        assert!(matches!(
            table.authenticate("nobody", "s3cret"),
            Err(AppError::InvalidCredentials)
        ));
    }

    #[test]
    fn unknown_users_still_run_a_verification() {
        assert!(DUMMY_HASH.starts_with("$argon2"));
        assert!(!verify_password("dummy", &DUMMY_HASH).unwrap());
        assert!(matches!(
            table().authenticate("ghost", "dummy password"),
            Err(AppError::InvalidCredentials)
        ));
    }

    #[test]
    fn duplicate_usernames_are_a_config_error() {
        let entry = Credential {
            username: "doc".to_string(),
            password_hash: "x".to_string(),
            role: Role::Doctor,
        };
        let result = CredentialTable::new(vec![entry.clone(), entry]);
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn malformed_hash_is_reported() {
        let table = CredentialTable::new(vec![Credential {
            username: "doc".to_string(),
            password_hash: "plaintext".to_string(),
            role: Role::Doctor,
        }])
        .unwrap();
        assert!(matches!(
            table.authenticate("doc", "plaintext"),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn only_admin_sees_history_and_edits_mapping() {
        assert!(Role::Admin.can_view_history());
        assert!(Role::Admin.can_edit_mapping());
        for role in [Role::Doctor, Role::Engineer] {
            assert!(!role.can_view_history());
            assert!(!role.can_edit_mapping());
        }
    }

    #[test]
    fn roles_parse_lowercase() {
        let role: Role = serde_json::from_str("\"engineer\"").unwrap();
        assert_eq!(role, Role::Engineer);
    }
}
