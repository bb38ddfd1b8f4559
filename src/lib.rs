/*!
# Secure Entry

A login-gated web form that appends rows of data to dated worksheets in a
remote spreadsheet.

## Overview

Users log in with a username and password and type rows into an editable
grid. On submit, every non-empty row is appended to the worksheet named
`data_YYYY-MM-DD` for the current day, which is created with a header row
the first time it is needed. Administrators can browse and download earlier
days, and edit a specialty mapping whose leading rows and columns are
frozen to the values of a reference template.

## Architecture

### Frontend Layer
- Login page and a tabbed entry page (data entry, specialty mapping, history)
- Plain HTML and JavaScript served by the backend

### Backend Layer
- **Technologies**: Rust, axum, tokio
- **Core Components**:
  - Sheet Locator - Finds or creates the worksheet for a day
  - Row Reconciler - Appends entry rows, merges mapping edits with the template
  - History Lookup - Lists dated worksheets and reads their contents
  - Session Store - Per-user grids and roles behind a session cookie

### Spreadsheet Layer
- `SheetService` trait with a Google Sheets REST client and an in-memory backend

## Modules

- **config**: TOML configuration
- **error**: Crate error type
- **grid**: Editable grid of text cells
- **login**: Credentials, roles and password hashing
- **session**: Per-user session state
- **sheets**: Remote spreadsheet abstraction and in-memory backend
- **google**: Google Sheets REST client
- **locator**: Dated worksheet naming and lookup
- **reconcile**: Entry submission and mapping merge
- **template**: Mapping template loading (CSV, XLSX)
- **history**: Past worksheets
- **downloader**: Export functionality (CSV, XLSX)
- **app**: Routing and middleware

## REST API Endpoints

- `/login`, `/logout` - Session management
- `/api/entry`, `/api/entry/submit`, `/api/entry/clear` - Main entry grid
- `/api/mapping`, `/api/mapping/save`, `/api/mapping/reset` - Specialty mapping
- `/api/history`, `/api/history/{date}`, `/api/history/{date}/export` - Past days (admin)
*/

pub mod config;
pub mod downloader;
pub mod error;
pub mod grid;
pub mod history;
pub mod locator;
pub mod login;
pub mod reconcile;
pub mod session;
pub mod sheets;
pub mod template;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod google;

pub use config::AppConfig;
pub use error::{AppError, Result};
pub use grid::Grid;
pub use login::Role;
pub use sheets::{MemorySheets, SheetService, Worksheet};
