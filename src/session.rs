//! Per-user session context.
//!
//! Everything a logged-in user has typed but not yet saved lives here,
//! keyed by the session cookie. Handlers look the context up, act on it and
//! write it back; nothing is shared across sessions.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::grid::Grid;
use crate::login::Role;

/// Session lifetime
pub const SESSION_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Where the entry grid is in its edit cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GridState {
    /// Fresh blank rows
    Blank,
    /// Holds unsaved edits
    Edited,
}

/// Editable entry grid with its cycle state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryGrid {
    pub grid: Grid,
    pub state: GridState,
}

impl EntryGrid {
    pub fn blank(rows: usize, cols: usize) -> Self {
        EntryGrid {
            grid: Grid::blank(rows, cols),
            state: GridState::Blank,
        }
    }
}

/// State of one logged-in user
#[derive(Debug, Clone)]
pub struct Session {
    pub username: String,
    pub role: Role,
    pub expires_at: SystemTime,
    pub entry: EntryGrid,
    /// Editable copy of the mapping template, once the user opened it
    pub mapping: Option<Grid>,
    rows: usize,
    cols: usize,
}

impl Session {
    pub fn new(username: &str, role: Role, rows: usize, cols: usize) -> Self {
        Session {
            username: username.to_string(),
            role,
            expires_at: SystemTime::now() + SESSION_DURATION,
            entry: EntryGrid::blank(rows, cols),
            mapping: None,
            rows,
            cols,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= SystemTime::now()
    }

    /// Store the grid as currently shown in the browser
    pub fn edit_entry(&mut self, grid: Grid) {
        self.entry.state = if grid.is_blank() {
            GridState::Blank
        } else {
            GridState::Edited
        };
        self.entry.grid = grid;
    }

    /// Back to blank rows, after a submission or on "Clear"
    pub fn reset_entry(&mut self) {
        self.entry = EntryGrid::blank(self.rows, self.cols);
    }

    pub fn require(&self, allowed: impl Fn(Role) -> bool) -> Result<()> {
        if allowed(self.role) {
            Ok(())
        } else {
            Err(AppError::Forbidden(self.role))
        }
    }
}

/// All live sessions of the process
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Session>>> {
        self.sessions
            .read()
            .map_err(|_| AppError::Config("session store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Session>>> {
        self.sessions
            .write()
            .map_err(|_| AppError::Config("session store lock poisoned".to_string()))
    }

    /// Register a session and return its id
    pub fn create(&self, session: Session) -> Result<String> {
        let session_id = Uuid::new_v4().to_string();
        let mut sessions = self.write()?;
        sessions.retain(|_, s| !s.is_expired());
        sessions.insert(session_id.clone(), session);
        Ok(session_id)
    }

    /// Snapshot of a live session
    pub fn get(&self, session_id: &str) -> Result<Session> {
        self.read()?
            .get(session_id)
            .filter(|s| !s.is_expired())
            .cloned()
            .ok_or(AppError::Unauthenticated)
    }

    /// Run `f` against a live session and keep its changes
    pub fn update<T>(&self, session_id: &str, f: impl FnOnce(&mut Session) -> T) -> Result<T> {
        let mut sessions = self.write()?;
        match sessions.get_mut(session_id) {
            Some(session) if !session.is_expired() => Ok(f(session)),
            _ => Err(AppError::Unauthenticated),
        }
    }

    /// Forget a session and everything it held
    pub fn remove(&self, session_id: &str) -> Result<()> {
        self.write()?.remove(session_id);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_with(value: &str) -> Grid {
        let mut grid = Grid::blank(3, 4);
        grid.rows[1][2] = value.to_string();
        grid
    }

    #[test]
    fn entry_grid_cycles_through_states() {
        let mut session = Session::new("doc", Role::Doctor, 3, 4);
        assert_eq!(session.entry.state, GridState::Blank);

        session.edit_entry(grid_with("42"));
        assert_eq!(session.entry.state, GridState::Edited);

        session.reset_entry();
        assert_eq!(session.entry, EntryGrid::blank(3, 4));

        session.edit_entry(grid_with("   "));
        assert_eq!(session.entry.state, GridState::Blank);
    }

    #[test]
    fn store_round_trip_and_logout() {
        let store = SessionStore::new();
        let id = store.create(Session::new("admin", Role::Admin, 10, 4)).unwrap();
        assert_eq!(store.get(&id).unwrap().role, Role::Admin);

        store.update(&id, |s| s.edit_entry(grid_with("x"))).unwrap();
        assert_eq!(store.get(&id).unwrap().entry.state, GridState::Edited);

        store.remove(&id).unwrap();
        assert!(matches!(store.get(&id), Err(AppError::Unauthenticated)));
        assert!(store.update(&id, |_| ()).is_err());
    }

    #[test]
    fn sessions_are_isolated() {
        let store = SessionStore::new();
        let a = store.create(Session::new("a", Role::Doctor, 2, 4)).unwrap();
        let b = store.create(Session::new("b", Role::Engineer, 2, 4)).unwrap();
        store.update(&a, |s| s.edit_entry(grid_with("only a"))).unwrap();
        assert_eq!(store.get(&b).unwrap().entry.state, GridState::Blank);
        assert_ne!(a, b);
    }

    #[test]
    fn expired_sessions_are_rejected() {
        let store = SessionStore::new();
        let mut session = Session::new("old", Role::Doctor, 1, 4);
        session.expires_at = SystemTime::now() - Duration::from_secs(1);
        let id = store.create(session).unwrap();
        assert!(matches!(store.get(&id), Err(AppError::Unauthenticated)));
    }

    #[test]
    fn role_gate() {
        let session = Session::new("doc", Role::Doctor, 1, 4);
        assert!(matches!(
            session.require(Role::can_view_history),
            Err(AppError::Forbidden(Role::Doctor))
        ));
        let admin = Session::new("root", Role::Admin, 1, 4);
        assert!(admin.require(Role::can_view_history).is_ok());
    }
}
