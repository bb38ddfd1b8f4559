use axum::{
    Extension, Form, Json, Router,
    extract::{Path, Query, Request, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{FixedOffset, NaiveDate};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;

use crate::config::{AppConfig, Backend};
use crate::downloader::{self, ExportFormat};
use crate::error::{AppError, Result};
use crate::google::GoogleSheets;
use crate::grid::{Grid, Row};
use crate::history::{self, HistoryEntry, HistoryTable};
use crate::locator::{self, SheetLocator};
use crate::login::{CredentialTable, Role, UserCredentials};
use crate::reconcile;
use crate::session::{EntryGrid, Session, SessionStore};
use crate::sheets::{MemorySheets, SheetService};
use crate::template::{Template, load_template};

const SESSION_COOKIE: &str = "session";

pub struct AppState {
    pub config: AppConfig,
    pub credentials: CredentialTable,
    pub sessions: SessionStore,
    pub sheets: Arc<dyn SheetService>,
    pub template: Option<Template>,
    offset: FixedOffset,
    data_locator: SheetLocator,
    mapping_locator: SheetLocator,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        sheets: Arc<dyn SheetService>,
        template: Option<Template>,
    ) -> Result<Self> {
        config.validate()?;
        let entry = &config.entry;
        let data_locator = SheetLocator::data(&entry.data_prefix, entry.sheet_rows, &entry.columns);
        let (rows, cols) = template
            .as_ref()
            .map(|t| (t.rows.len() as u32 + 1, t.width() as u32))
            .unwrap_or((1, 1));
        let mapping_locator = SheetLocator::mapping(&config.mapping.prefix, rows, cols);

        Ok(AppState {
            credentials: config.credentials()?,
            offset: config.offset()?,
            sessions: SessionStore::new(),
            sheets,
            template,
            data_locator,
            mapping_locator,
            config,
        })
    }

    /// Build the spreadsheet backend and load the mapping template
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let sheets: Arc<dyn SheetService> = match config.sheets.backend {
            Backend::Memory => Arc::new(MemorySheets::new()),
            Backend::Google => {
                let id = config.sheets.spreadsheet_id.clone().unwrap_or_default();
                let token = config.sheets.token_source().ok_or_else(|| {
                    AppError::Config("no spreadsheet token configured".to_string())
                })?;
                Arc::new(GoogleSheets::new(&config.sheets.api_base, &id, token)?)
            }
        };

        let template = match &config.mapping.template {
            Some(path) => {
                let template = load_template(path)?;
                info!(
                    "loaded mapping template {} ({} rows)",
                    path.display(),
                    template.rows.len()
                );
                Some(template)
            }
            None => None,
        };

        Self::new(config, sheets, template)
    }

    fn today(&self) -> NaiveDate {
        locator::today(self.offset)
    }

    fn columns(&self) -> usize {
        self.config.entry.columns.len()
    }

    fn template(&self) -> Result<&Template> {
        self.template
            .as_ref()
            .ok_or_else(|| AppError::NotFound("mapping template".to_string()))
    }
}

/// Session id of the current request, set by [`require_auth`]
#[derive(Debug, Clone)]
struct SessionId(String);

#[derive(Debug, Serialize)]
struct ActionResponse {
    status: String,
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    saved: Option<usize>,
}

impl ActionResponse {
    fn ok(message: String) -> Self {
        ActionResponse {
            status: "ok".to_string(),
            message: Some(message),
            saved: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct SessionInfo {
    username: String,
    role: Role,
    columns: Vec<String>,
    can_view_history: bool,
    can_edit_mapping: bool,
    mapping_enabled: bool,
}

#[derive(Debug, Serialize)]
struct MappingView {
    header: Row,
    rows: Grid,
    frozen_rows: usize,
    frozen_cols: usize,
    editable: bool,
}

#[derive(Debug, Deserialize)]
struct ExportQuery {
    format: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::InvalidCredentials | AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Remote(_) => StatusCode::BAD_GATEWAY,
            AppError::Template(_)
            | AppError::Config(_)
            | AppError::Export(_)
            | AppError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            error!("{} error: {}", self.kind(), self);
        }

        let body = ActionResponse {
            status: "error".to_string(),
            message: Some(self.to_string()),
            saved: None,
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/", get(serve_entry_page))
        .route("/api/session", get(get_session))
        .route("/api/entry", get(get_entry).put(put_entry))
        .route("/api/entry/submit", post(submit_entry))
        .route("/api/entry/clear", post(clear_entry))
        .route("/api/mapping", get(get_mapping))
        .route("/api/mapping/save", post(save_mapping))
        .route("/api/mapping/reset", post(reset_mapping))
        .route("/api/history", get(list_history))
        .route("/api/history/:date", get(get_history))
        .route("/api/history/:date/export", get(export_history))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/login", get(serve_login_page).post(handle_login))
        .route("/logout", post(handle_logout))
        .merge(protected)
        .nest_service("/static", ServeDir::new("static"))
        .with_state(state)
}

pub async fn run(config: AppConfig) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let bind = config.bind.clone();
    let state = Arc::new(AppState::from_config(config)?);
    info!(
        "{} users, {} columns, timezone {}, mapping {}",
        state.credentials.len(),
        state.columns(),
        state.offset,
        if state.template.is_some() { "enabled" } else { "disabled" }
    );

    let app = router(state);

    let listener = TcpListener::bind(&bind).await?;
    info!("Listening on http://{}", bind);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Authentication middleware
///
/// Lets the request through when the session cookie names a live session.
/// Otherwise pages redirect to the login form and API calls get a 401.
async fn require_auth(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if state.sessions.get(cookie.value()).is_ok() {
            request
                .extensions_mut()
                .insert(SessionId(cookie.value().to_string()));
            return next.run(request).await;
        }
    }

    if request.uri().path().starts_with("/api/") {
        AppError::Unauthenticated.into_response()
    } else {
        Redirect::to("/login").into_response()
    }
}

async fn serve_login_page() -> Html<&'static str> {
    Html(include_str!("./static/login.html"))
}

async fn handle_login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(credentials): Form<UserCredentials>,
) -> Response {
    match state
        .credentials
        .authenticate(&credentials.username, &credentials.password)
    {
        Ok(role) => {
            let session = Session::new(
                &credentials.username,
                role,
                state.config.entry.default_rows,
                state.columns(),
            );
            let session_id = match state.sessions.create(session) {
                Ok(id) => id,
                Err(e) => return e.into_response(),
            };
            info!("{} logged in as {}", credentials.username, role);

            let cookie = Cookie::build((SESSION_COOKIE, session_id))
                .path("/")
                .http_only(true)
                .same_site(SameSite::Lax);
            (jar.add(cookie), Redirect::to("/")).into_response()
        }
        Err(AppError::InvalidCredentials) => {
            warn!("failed login for {}", credentials.username);
            Redirect::to(&format!(
                "/login?error={}",
                urlencoding::encode("Invalid username or password")
            ))
            .into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn handle_logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if let Err(e) = state.sessions.remove(cookie.value()) {
            return e.into_response();
        }
    }
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    (jar, Redirect::to("/login")).into_response()
}

async fn serve_entry_page(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(id)): Extension<SessionId>,
) -> Result<Html<String>> {
    let info = session_info(&state, &state.sessions.get(&id)?);
    let session_json = serde_json::to_string(&info)
        .map_err(|e| AppError::Validation(e.to_string()))?
        .replace("</", "<\\/");

    let template = include_str!("./static/entry.html").replace(
        "</head>",
        &format!("    <script>const SESSION = {};</script>\n</head>", session_json),
    );
    Ok(Html(template))
}

fn session_info(state: &AppState, session: &Session) -> SessionInfo {
    SessionInfo {
        username: session.username.clone(),
        role: session.role,
        columns: state.config.entry.columns.clone(),
        can_view_history: session.role.can_view_history(),
        can_edit_mapping: session.role.can_edit_mapping(),
        mapping_enabled: state.template.is_some(),
    }
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(id)): Extension<SessionId>,
) -> Result<Json<SessionInfo>> {
    let session = state.sessions.get(&id)?;
    Ok(Json(session_info(&state, &session)))
}

async fn get_entry(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(id)): Extension<SessionId>,
) -> Result<Json<EntryGrid>> {
    Ok(Json(state.sessions.get(&id)?.entry))
}

async fn put_entry(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(id)): Extension<SessionId>,
    Json(mut grid): Json<Grid>,
) -> Result<Json<EntryGrid>> {
    grid.conform(state.columns())?;
    let entry = state.sessions.update(&id, |s| {
        s.edit_entry(grid);
        s.entry.clone()
    })?;
    Ok(Json(entry))
}

async fn submit_entry(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(id)): Extension<SessionId>,
    Json(mut grid): Json<Grid>,
) -> Result<Json<ActionResponse>> {
    grid.conform(state.columns())?;
    // Keep the edits so a failed submission can be retried as-is
    state.sessions.update(&id, |s| s.edit_entry(grid.clone()))?;

    let saved =
        reconcile::submit_entry(state.sheets.as_ref(), &state.data_locator, state.today(), &grid)
            .await?;

    if saved == 0 {
        return Ok(Json(ActionResponse {
            status: "empty".to_string(),
            message: Some("No non-empty rows to save.".to_string()),
            saved: Some(0),
        }));
    }

    state.sessions.update(&id, Session::reset_entry)?;
    Ok(Json(ActionResponse {
        status: "ok".to_string(),
        message: Some(format!("Saved {saved} rows to today's sheet.")),
        saved: Some(saved),
    }))
}

async fn clear_entry(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(id)): Extension<SessionId>,
) -> Result<Json<EntryGrid>> {
    let entry = state.sessions.update(&id, |s| {
        s.reset_entry();
        s.entry.clone()
    })?;
    Ok(Json(entry))
}

async fn get_mapping(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(id)): Extension<SessionId>,
) -> Result<Json<MappingView>> {
    let template = state.template()?;
    let (rows, editable) = state.sessions.update(&id, |s| {
        let rows = s.mapping.get_or_insert_with(|| template.rows.clone()).clone();
        (rows, s.role.can_edit_mapping())
    })?;
    Ok(Json(mapping_view(&state, template, rows, editable)))
}

fn mapping_view(state: &AppState, template: &Template, rows: Grid, editable: bool) -> MappingView {
    let frozen = state.config.mapping.frozen();
    MappingView {
        header: template.header.clone(),
        rows,
        frozen_rows: frozen.rows,
        frozen_cols: frozen.cols,
        editable,
    }
}

async fn save_mapping(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(id)): Extension<SessionId>,
    Json(edited): Json<Grid>,
) -> Result<Json<ActionResponse>> {
    let session = state.sessions.get(&id)?;
    session.require(Role::can_edit_mapping)?;
    let template = state.template()?;

    let frozen = state.config.mapping.frozen();
    // A grid of the wrong shape never replaces the session's draft
    reconcile::reconcile_mapping(&edited, template, frozen)?;
    state
        .sessions
        .update(&id, |s| s.mapping = Some(edited.clone()))?;

    let worksheet = reconcile::save_mapping(
        state.sheets.as_ref(),
        &state.mapping_locator,
        state.today(),
        &edited,
        template,
        frozen,
    )
    .await?;

    info!("{} saved the mapping to {}", session.username, worksheet.title);
    state.sessions.update(&id, |s| s.mapping = None)?;
    Ok(Json(ActionResponse::ok(format!(
        "Mapping saved to {}.",
        worksheet.title
    ))))
}

async fn reset_mapping(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(id)): Extension<SessionId>,
) -> Result<Json<MappingView>> {
    state.sessions.get(&id)?.require(Role::can_edit_mapping)?;
    let template = state.template()?;
    state
        .sessions
        .update(&id, |s| s.mapping = Some(template.rows.clone()))?;
    Ok(Json(mapping_view(&state, template, template.rows.clone(), true)))
}

async fn list_history(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(id)): Extension<SessionId>,
) -> Result<Json<Vec<HistoryEntry>>> {
    state.sessions.get(&id)?.require(Role::can_view_history)?;
    let dates = history::list_dates(state.sheets.as_ref(), &state.config.entry.data_prefix).await?;
    Ok(Json(dates))
}

async fn load_history(state: &AppState, id: &str, date: &str) -> Result<HistoryTable> {
    state.sessions.get(id)?.require(Role::can_view_history)?;
    let date = history::parse_date(date)?;
    history::load(state.sheets.as_ref(), &state.config.entry.data_prefix, date).await
}

async fn get_history(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(id)): Extension<SessionId>,
    Path(date): Path<String>,
) -> Result<Json<HistoryTable>> {
    Ok(Json(load_history(&state, &id, &date).await?))
}

async fn export_history(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(id)): Extension<SessionId>,
    Path(date): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<Response> {
    let format = ExportFormat::parse(query.format.as_deref().unwrap_or("csv"))?;
    let table = load_history(&state, &id, &date).await?;

    let body = match format {
        ExportFormat::Csv => downloader::to_csv(&table).into_bytes(),
        ExportFormat::Xlsx => downloader::to_xlsx(&table)?,
    };
    let disposition = format!(
        "attachment; filename=\"{}\"",
        downloader::file_name(&table, format)
    );

    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}
