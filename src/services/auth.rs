use anyhow::{anyhow, bail, Result};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand_core::{OsRng, RngCore};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db;
use crate::models::{Role, Session, User, ROLE_ADMIN, ROLE_USER};

const SESSION_LIFETIME_DAYS: i64 = 30;

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("Failed to hash password: {}", e))?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| anyhow!("Failed to parse password hash: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// 32 random bytes, URL-safe base64 without padding
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

async fn unique_manifest_token(pool: &SqlitePool) -> Result<String> {
    loop {
        let token = generate_token();
        let taken: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE manifest_token = ?")
            .bind(&token)
            .fetch_optional(pool)
            .await?;
        if taken.is_none() {
            return Ok(token);
        }
    }
}

pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password: &'a str,
    pub preferred_language: &'a str,
    pub active: bool,
}

/// Create a new user with a fresh manifest token
pub async fn create_user(pool: &SqlitePool, new_user: NewUser<'_>) -> Result<User> {
    let id = Uuid::new_v4().to_string();
    let password_hash = hash_password(new_user.password)?;
    let manifest_token = unique_manifest_token(pool).await?;
    let created_at = db::now();

    sqlx::query(
        "INSERT INTO users (id, username, email, password_hash, preferred_language, active, created_at, manifest_token)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(new_user.username)
    .bind(new_user.email)
    .bind(&password_hash)
    .bind(new_user.preferred_language)
    .bind(new_user.active)
    .bind(&created_at)
    .bind(&manifest_token)
    .execute(pool)
    .await?;

    Ok(User {
        id,
        username: new_user.username.to_string(),
        email: new_user.email.to_string(),
        password_hash,
        preferred_language: new_user.preferred_language.to_string(),
        active: new_user.active,
        created_at,
        manifest_token: Some(manifest_token),
        provider_credentials: None,
    })
}

pub async fn get_user(pool: &SqlitePool, user_id: &str) -> Result<User> {
    sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| anyhow!("User not found"))
}

/// Authenticate user and create session
pub async fn authenticate(
    pool: &SqlitePool,
    username: &str,
    password: &str,
) -> Result<(User, Session)> {
    let user: User = sqlx::query_as("SELECT * FROM users WHERE username = ? OR email = ?")
        .bind(username)
        .bind(username)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| anyhow!("User not found"))?;

    if !verify_password(password, &user.password_hash)? {
        bail!("Invalid password");
    }

    if !user.active {
        bail!("Account is not active");
    }

    let token = Uuid::new_v4().to_string();
    let created_at = db::now();
    let expires_at = (chrono::Utc::now() + chrono::Duration::days(SESSION_LIFETIME_DAYS))
        .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);

    sqlx::query("INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)")
        .bind(&token)
        .bind(&user.id)
        .bind(&created_at)
        .bind(&expires_at)
        .execute(pool)
        .await?;

    let session = Session {
        token,
        user_id: user.id.clone(),
        created_at,
        expires_at: Some(expires_at),
    };

    Ok((user, session))
}

/// Validate session token and get user
pub async fn validate_session(pool: &SqlitePool, token: &str) -> Result<User> {
    let session: Session = sqlx::query_as("SELECT * FROM sessions WHERE token = ?")
        .bind(token)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| anyhow!("Invalid session"))?;

    if let Some(ref expires_at) = session.expires_at {
        if expires_at.as_str() < db::now().as_str() {
            bail!("Session expired");
        }
    }

    let user = get_user(pool, &session.user_id).await?;
    if !user.active {
        bail!("Account is not active");
    }
    Ok(user)
}

pub async fn logout(pool: &SqlitePool, token: &str) -> Result<()> {
    sqlx::query("DELETE FROM sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;
    Ok(())
}

/// Remove sessions past their expiry, returning how many were dropped
pub async fn cleanup_expired_sessions(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at IS NOT NULL AND expires_at < ?")
        .bind(db::now())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Resolve the user behind an addon URL token
pub async fn user_by_manifest_token(pool: &SqlitePool, token: &str) -> Result<Option<User>> {
    if token.is_empty() {
        return Ok(None);
    }
    let user = sqlx::query_as("SELECT * FROM users WHERE manifest_token = ? AND active = 1")
        .bind(token)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

pub async fn regenerate_manifest_token(pool: &SqlitePool, user_id: &str) -> Result<String> {
    let token = unique_manifest_token(pool).await?;
    sqlx::query("UPDATE users SET manifest_token = ? WHERE id = ?")
        .bind(&token)
        .bind(user_id)
        .execute(pool)
        .await?;
    tracing::info!("Regenerated manifest token for user {}", user_id);
    Ok(token)
}

pub async fn set_preferred_language(pool: &SqlitePool, user_id: &str, language: &str) -> Result<()> {
    sqlx::query("UPDATE users SET preferred_language = ? WHERE id = ?")
        .bind(language)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Create the standard roles if they are missing
pub async fn ensure_roles(pool: &SqlitePool) -> Result<()> {
    for (name, description) in [(ROLE_USER, "Standard user"), (ROLE_ADMIN, "Administrator")] {
        let created = sqlx::query("INSERT OR IGNORE INTO roles (name, description) VALUES (?, ?)")
            .bind(name)
            .bind(description)
            .execute(pool)
            .await?;
        if created.rows_affected() > 0 {
            tracing::info!("Created role '{}'", name);
        }
    }
    Ok(())
}

pub async fn user_roles(pool: &SqlitePool, user_id: &str) -> Result<Vec<Role>> {
    let roles = sqlx::query_as(
        "SELECT r.* FROM roles r JOIN roles_users ru ON ru.role_id = r.id WHERE ru.user_id = ? ORDER BY r.name",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(roles)
}

pub async fn has_role(pool: &SqlitePool, user_id: &str, role: &str) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT 1 FROM roles r JOIN roles_users ru ON ru.role_id = r.id WHERE ru.user_id = ? AND r.name = ?",
    )
    .bind(user_id)
    .bind(role)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

pub async fn grant_role(pool: &SqlitePool, user_id: &str, role: &str) -> Result<()> {
    let role_id: (i64,) = sqlx::query_as("SELECT id FROM roles WHERE name = ?")
        .bind(role)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| anyhow!("Role '{}' does not exist", role))?;

    sqlx::query("INSERT OR IGNORE INTO roles_users (user_id, role_id) VALUES (?, ?)")
        .bind(user_id)
        .bind(role_id.0)
        .execute(pool)
        .await?;
    Ok(())
}

/// Create an active administrator account
pub async fn create_admin(
    pool: &SqlitePool,
    email: &str,
    username: &str,
    password: &str,
) -> Result<User> {
    let existing: Option<(String,)> =
        sqlx::query_as("SELECT id FROM users WHERE email = ? OR username = ?")
            .bind(email)
            .bind(username)
            .fetch_optional(pool)
            .await?;
    if existing.is_some() {
        bail!("User already exists");
    }

    ensure_roles(pool).await?;

    let user = create_user(
        pool,
        NewUser {
            username,
            email,
            password,
            preferred_language: "eng",
            active: true,
        },
    )
    .await?;
    grant_role(pool, &user.id, ROLE_ADMIN).await?;

    tracing::info!("Created admin user '{}'", username);
    Ok(user)
}

#[cfg(test)]
pub async fn test_user(pool: &SqlitePool, username: &str) -> User {
    create_user(
        pool,
        NewUser {
            username,
            email: &format!("{}@example.org", username),
            password: "secret",
            preferred_language: "eng",
            active: true,
        },
    )
    .await
    .unwrap()
}
