//! SQLite-backed user directory.
//!
//! Tables:
//! - `users`: email, password_hash, salt, first_name, created_at
//! - `roles`: name, description
//! - `user_roles`: account-to-role join
//!
//! The directory is the only component that ever sees password material;
//! everything it hands out is hash-free by construction.

use anyhow::{bail, Result};
use parking_lot::Mutex;
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Salt byte length for password hashing.
const SALT_BYTES: usize = 16;

/// Number of SHA-256 iterations for password stretching.
const HASH_ITERATIONS: u32 = 100_000;

/// An account with its resolved role names. Carries no password material.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub roles: Vec<String>,
}

/// SQLite-backed user directory.
pub struct UserStore {
    conn: Mutex<rusqlite::Connection>,
}

impl UserStore {
    /// Open (or create) the user database at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = rusqlite::Connection::open(db_path)?;
        // WAL mode for concurrent reads + crash safety
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;
        Self::init(conn)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::init(conn)
    }

    fn init(conn: rusqlite::Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                password_hash TEXT NOT NULL,
                salt TEXT NOT NULL,
                first_name TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS roles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_roles (
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                role_id INTEGER NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
                PRIMARY KEY (user_id, role_id)
            );",
        )?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.seed_default_roles()?;
        Ok(store)
    }

    /// Upsert the built-in roles. Safe to call on every open.
    fn seed_default_roles(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "INSERT OR IGNORE INTO roles (name, description)
             VALUES ('admin', 'Administrator with full access');
             INSERT OR IGNORE INTO roles (name, description)
             VALUES ('user', 'Standard registered user');",
        )?;
        Ok(())
    }

    // ── Account management ──────────────────────────────────────────

    /// Create an account holding the given roles. Returns the new id.
    pub fn create_user(
        &self,
        email: &str,
        password: &str,
        first_name: &str,
        roles: &[&str],
    ) -> Result<i64> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            bail!("Email address is not valid");
        }
        if password.len() < 8 {
            bail!("Password must be at least 8 characters");
        }

        let salt = generate_salt();
        let password_hash = hash_password(password, &salt);
        let now = epoch_secs();

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            "INSERT INTO users (email, password_hash, salt, first_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![email, password_hash, salt, first_name, now as i64],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                bail!("Email '{}' is already registered", email)
            }
            Err(e) => return Err(e.into()),
        }
        let user_id = tx.last_insert_rowid();

        for role in roles {
            let attached = tx.execute(
                "INSERT INTO user_roles (user_id, role_id)
                 SELECT ?1, id FROM roles WHERE name = ?2",
                rusqlite::params![user_id, role],
            )?;
            if attached == 0 {
                bail!("Unknown role '{}'", role);
            }
        }

        tx.commit()?;
        Ok(user_id)
    }

    /// Authenticate by email + password. Returns the account with its
    /// roles on success; an unknown email burns a dummy hash so the two
    /// failure paths are not distinguishable by timing.
    pub fn authenticate(&self, email: &str, password: &str) -> Result<UserRecord> {
        let conn = self.conn.lock();
        let row: Result<(i64, String, String, String), _> = conn.query_row(
            "SELECT id, password_hash, salt, first_name FROM users
             WHERE email = ?1 COLLATE NOCASE",
            rusqlite::params![email.trim()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        );

        match row {
            Ok((id, stored_hash, salt, first_name)) => {
                let attempt_hash = hash_password(password, &salt);
                if !constant_time_eq(stored_hash.as_bytes(), attempt_hash.as_bytes()) {
                    bail!("Invalid email or password");
                }
                let roles = roles_for(&conn, id)?;
                Ok(UserRecord {
                    id,
                    email: email.trim().to_string(),
                    first_name,
                    roles,
                })
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                let _ = hash_password(password, "0000000000000000");
                bail!("Invalid email or password");
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The admin roster projection: every account with its roles, ordered
    /// by id. Password material never crosses this boundary.
    pub fn list_users(&self) -> Result<Vec<UserRecord>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id, email, first_name FROM users ORDER BY id ASC")?;
        let accounts = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut users = Vec::with_capacity(accounts.len());
        for (id, email, first_name) in accounts {
            let roles = roles_for(&conn, id)?;
            users.push(UserRecord {
                id,
                email,
                first_name,
                roles,
            });
        }
        Ok(users)
    }

    /// Count registered accounts.
    pub fn user_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn roles_for(conn: &rusqlite::Connection, user_id: i64) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT r.name FROM user_roles ur
         JOIN roles r ON r.id = ur.role_id
         WHERE ur.user_id = ?1
         ORDER BY r.name",
    )?;
    let roles = stmt
        .query_map(rusqlite::params![user_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(roles)
}

// ── Cryptographic helpers ───────────────────────────────────────────

/// Generate a random salt (hex-encoded).
fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hash a password with salt using iterated SHA-256.
fn hash_password(password: &str, salt: &str) -> String {
    let mut hash = Sha256::new();
    hash.update(salt.as_bytes());
    hash.update(password.as_bytes());
    let mut result = hash.finalize();

    // Iterated hashing for key stretching
    for _ in 1..HASH_ITERATIONS {
        let mut h = Sha256::new();
        h.update(result);
        h.update(salt.as_bytes());
        result = h.finalize();
    }

    hex::encode(result)
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ── Tests ───────────────────────────────────────────────────────────
