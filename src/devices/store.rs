//! SQLite-backed device registry.
//!
//! One row per device. The kind-dependent state columns are nullable and
//! only the columns meaningful for the row's kind are ever non-NULL.
//! Devices are provisioned once (seeding below) and never created or
//! removed through this interface.

use super::{Device, DeviceKind, DeviceState};
use anyhow::{bail, Result};
use parking_lot::Mutex;
use rusqlite::OptionalExtension;
use std::path::Path;

/// SQLite-backed registry, keyed by device id.
pub struct DeviceStore {
    conn: Mutex<rusqlite::Connection>,
}

impl DeviceStore {
    /// Open (or create) the device database at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = rusqlite::Connection::open(db_path)?;
        // WAL mode for concurrent reads + crash safety
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        Self::init(conn)
    }

    /// In-memory registry for tests.
    pub fn in_memory() -> Result<Self> {
        Self::init(rusqlite::Connection::open_in_memory()?)
    }

    fn init(conn: rusqlite::Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS devices (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                is_on INTEGER,
                is_locked INTEGER,
                is_open INTEGER,
                value INTEGER
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Provision the stock fleet when the registry is empty. Returns the
    /// number of devices inserted (0 when already provisioned).
    pub fn seed_defaults(&self) -> Result<usize> {
        let stock = [
            (1, "Living Room Light", DeviceState::Light { on: false, brightness: 100 }),
            (2, "Front Door", DeviceState::Lock { locked: true }),
            (3, "Thermostat", DeviceState::Temp { on: true, target: 22 }),
            (4, "Garage", DeviceState::Garage { open: false }),
            (5, "Music Player", DeviceState::Music { on: false, volume: 35 }),
            (6, "Bedroom Blinds", DeviceState::Blinds { position: 0 }),
        ];

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let count: i64 = tx.query_row("SELECT COUNT(*) FROM devices", [], |row| row.get(0))?;
        if count > 0 {
            return Ok(0);
        }

        for (id, name, state) in &stock {
            let (is_on, is_locked, is_open, value) = state_columns(state);
            tx.execute(
                "INSERT INTO devices (id, name, kind, is_on, is_locked, is_open, value)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![id, name, state.kind().as_str(), is_on, is_locked, is_open, value],
            )?;
        }
        tx.commit()?;
        Ok(stock.len())
    }

    /// Look up one device.
    pub fn find(&self, id: i64) -> Result<Option<Device>> {
        let conn = self.conn.lock();
        find_in(&conn, id)
    }

    /// Every device, ordered by id ascending. Deterministic.
    pub fn list(&self) -> Result<Vec<Device>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, kind, is_on, is_locked, is_open, value
             FROM devices ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([], row_to_parts)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(parts_to_device).collect()
    }

    /// Atomic full replacement of one device's mutable fields. The kind
    /// tag is immutable; a state of a different kind is refused. Returns
    /// the stored device, or `None` for an unknown id.
    pub fn replace(&self, id: i64, state: &DeviceState) -> Result<Option<Device>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let replaced = replace_in(&tx, id, state)?;
        tx.commit()?;
        Ok(replaced)
    }

    /// Per-id atomic read-modify-write: the lookup, the transition, and
    /// the write happen under one transaction on the single guarded
    /// connection, so two concurrent mutations of the same device can
    /// never interleave and lose an update. Returns `None` (registry
    /// untouched) for an unknown id.
    pub fn mutate(
        &self,
        id: i64,
        f: impl FnOnce(&DeviceState) -> DeviceState,
    ) -> Result<Option<Device>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let Some(device) = find_in(&tx, id)? else {
            return Ok(None);
        };
        let next = f(&device.state);
        let replaced = replace_in(&tx, id, &next)?;
        tx.commit()?;
        Ok(replaced)
    }
}

fn find_in(conn: &rusqlite::Connection, id: i64) -> Result<Option<Device>> {
    let parts = conn
        .query_row(
            "SELECT id, name, kind, is_on, is_locked, is_open, value
             FROM devices WHERE id = ?1",
            rusqlite::params![id],
            row_to_parts,
        )
        .optional()?;
    parts.map(parts_to_device).transpose()
}

fn replace_in(conn: &rusqlite::Connection, id: i64, state: &DeviceState) -> Result<Option<Device>> {
    let Some(current) = find_in(conn, id)? else {
        return Ok(None);
    };
    if current.state.kind() != state.kind() {
        bail!(
            "device {} is a '{}', refusing to store '{}' state",
            id,
            current.state.kind().as_str(),
            state.kind().as_str()
        );
    }

    let (is_on, is_locked, is_open, value) = state_columns(state);
    conn.execute(
        "UPDATE devices SET is_on = ?2, is_locked = ?3, is_open = ?4, value = ?5
         WHERE id = ?1",
        rusqlite::params![id, is_on, is_locked, is_open, value],
    )?;

    Ok(Some(Device {
        id,
        name: current.name,
        state: *state,
    }))
}

type RowParts = (i64, String, String, Option<bool>, Option<bool>, Option<bool>, Option<i64>);

fn row_to_parts(row: &rusqlite::Row<'_>) -> rusqlite::Result<RowParts> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn parts_to_device(parts: RowParts) -> Result<Device> {
    let (id, name, kind, is_on, is_locked, is_open, value) = parts;
    let Some(kind) = DeviceKind::parse(&kind) else {
        bail!("device {} has unknown kind '{}'", id, kind);
    };

    let state = match kind {
        DeviceKind::Light => DeviceState::Light {
            on: is_on.unwrap_or(false),
            brightness: value.unwrap_or(0),
        },
        DeviceKind::Lock => DeviceState::Lock {
            locked: is_locked.unwrap_or(false),
        },
        DeviceKind::Temp => DeviceState::Temp {
            on: is_on.unwrap_or(false),
            target: value.unwrap_or(0),
        },
        DeviceKind::Garage => DeviceState::Garage {
            open: is_open.unwrap_or(false),
        },
        DeviceKind::Music => DeviceState::Music {
            on: is_on.unwrap_or(false),
            volume: value.unwrap_or(0),
        },
        DeviceKind::Blinds => DeviceState::Blinds {
            position: value.unwrap_or(0),
        },
    };

    Ok(Device { id, name, state })
}

fn state_columns(state: &DeviceState) -> (Option<bool>, Option<bool>, Option<bool>, Option<i64>) {
    match *state {
        DeviceState::Light { on, brightness } => (Some(on), None, None, Some(brightness)),
        DeviceState::Lock { locked } => (None, Some(locked), None, None),
        DeviceState::Temp { on, target } => (Some(on), None, None, Some(target)),
        DeviceState::Garage { open } => (None, None, Some(open), None),
        DeviceState::Music { on, volume } => (Some(on), None, None, Some(volume)),
        DeviceState::Blinds { position } => (None, None, None, Some(position)),
    }
}

// ── Tests ───────────────────────────────────────────────────────────
