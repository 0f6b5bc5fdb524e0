use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;

const USER_COLUMNS: &str = "id, username, email, password_hash, profile_pic, image_name, \
     given_name, family_name, locale, active, confirmed_at, created_at";

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub profile_pic: Option<String>,
    pub image_name: String,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub locale: Option<String>,
    pub active: bool,
    pub confirmed_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

/// Profile fields carried over from a verified identity-provider login.
#[derive(Debug, Clone)]
pub struct ProviderProfile {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub profile_pic: Option<String>,
    pub locale: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AccountUpdate {
    pub username: String,
    pub email: String,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub locale: Option<String>,
}

impl User {
    pub async fn find_by_id(db: &PgPool, id: i64) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await
    }

    pub async fn find_by_email(db: &PgPool, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(db)
        .await
    }

    pub async fn find_by_username(
        db: &PgPool,
        username: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(db)
        .await
    }

    /// Create a locally registered user.
    pub async fn create(
        db: &PgPool,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (username, email, password_hash)
             VALUES ($1, $2, $3)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .fetch_one(db)
        .await
    }

    /// Create a user from a verified provider identity. The provider vouched
    /// for the email, so the account starts out confirmed.
    pub async fn create_from_provider(
        db: &PgPool,
        profile: &ProviderProfile,
    ) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users
                 (username, email, password_hash, given_name, family_name,
                  profile_pic, locale, confirmed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, now())
             RETURNING {USER_COLUMNS}"
        ))
        .bind(&profile.username)
        .bind(&profile.email)
        .bind(&profile.password_hash)
        .bind(&profile.given_name)
        .bind(&profile.family_name)
        .bind(&profile.profile_pic)
        .bind(&profile.locale)
        .fetch_one(db)
        .await
    }

    pub async fn update_account(
        db: &PgPool,
        id: i64,
        update: &AccountUpdate,
    ) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users
             SET username = $2, email = $3, given_name = $4, family_name = $5, locale = $6
             WHERE id = $1
             RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(&update.username)
        .bind(&update.email)
        .bind(&update.given_name)
        .bind(&update.family_name)
        .bind(&update.locale)
        .fetch_one(db)
        .await
    }

    pub async fn update_password(
        db: &PgPool,
        id: i64,
        password_hash: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn update_image(
        db: &PgPool,
        id: i64,
        image_name: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET image_name = $2 WHERE id = $1")
            .bind(id)
            .bind(image_name)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn role_names(db: &PgPool, user_id: i64) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            "SELECT r.name
             FROM roles r
             JOIN user_roles ur ON ur.role_id = r.id
             WHERE ur.user_id = $1
             ORDER BY r.name",
        )
        .bind(user_id)
        .fetch_all(db)
        .await
    }
}

/// The authenticated identity plus its granted capability set. Authorization
/// checks test role membership here rather than re-querying.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: i64,
    pub roles: HashSet<String>,
}

impl Principal {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            roles: HashSet::new(),
        }
    }

    pub fn with_roles(user_id: i64, roles: impl IntoIterator<Item = String>) -> Self {
        Self {
            user_id,
            roles: roles.into_iter().collect(),
        }
    }

    pub async fn load(db: &PgPool, user_id: i64) -> Result<Self, sqlx::Error> {
        let roles = User::role_names(db, user_id).await?;
        Ok(Self::with_roles(user_id, roles))
    }

    pub fn has_role(&self, name: &str) -> bool {
        self.roles.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn principal_role_membership() {
        let p = Principal::with_roles(1, vec!["editor".to_string()]);
        assert!(p.has_role("editor"));
        assert!(!p.has_role("admin"));
        assert!(!Principal::new(1).has_role("editor"));
    }
}
