use anyhow::{Result, anyhow};
use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, get, post},
};
use custody_core::{
    FamilySummary, FileId, Pid,
    control::{ControlRequest, ControlResponse, Controller},
};
use tokio::{net::UnixListener, sync::oneshot, task::JoinHandle};

use crate::{
    dto::{ExitStatus, RegisterFamily, Registered, Terminated, Unregistered, Version, WaitForExit},
    error::EngineApiError,
};

pub struct ServerHandle {
    tx_shutdown: oneshot::Sender<()>,
    server_join_handle: JoinHandle<()>,
}

impl ServerHandle {
    pub async fn stop(self) {
        drop(self.tx_shutdown);
        let _ = self.server_join_handle.await;
    }
}

#[derive(Clone)]
pub struct EngineAPIContext {
    pub controller: Controller,
    pub version: String,
}

pub fn run_api_server(
    engine_api_ctx: EngineAPIContext,
    custom_socket_path: Option<&str>,
) -> Result<ServerHandle> {
    let family_routes = Router::new()
        .route("/", get(families).post(register_family))
        .route("/{pid}", delete(unregister_family))
        .route("/{pid}/terminate", post(terminate_family))
        .route("/{pid}/members", get(members))
        .route("/{pid}/files", get(files))
        .route("/{pid}/wait", post(wait_for_exit));

    let app = Router::new()
        .nest("/families", family_routes)
        .route("/version", get(version))
        .with_state(engine_api_ctx);

    let socket_path = custom_socket_path.unwrap_or(super::DEFAULT_UDS).to_string();

    let uds =
        UnixListener::bind(&socket_path).map_err(|err| anyhow!("Cannot bind to socket: {err}"))?;
    log::debug!("listening on {}", socket_path);

    let (tx_shutdown, rx_shutdown) = oneshot::channel();

    let server = axum::serve(uds, app).with_graceful_shutdown(async move {
        let _ = rx_shutdown.await;
    });

    let server_join_handle = tokio::spawn(async move {
        if let Err(e) = server.await {
            log::error!("Engine Api server error: {}", e);
        }
        if let Err(e) = tokio::fs::remove_file(socket_path).await {
            log::error!("Error removing unix socket: {}", e);
        };
    });

    Ok(ServerHandle {
        tx_shutdown,
        server_join_handle,
    })
}

/// Run a request on the blocking pool, registry calls may wait.
async fn dispatch(
    ctx: &EngineAPIContext,
    request: ControlRequest,
) -> Result<ControlResponse, EngineApiError> {
    let controller = ctx.controller.clone();
    tokio::task::spawn_blocking(move || controller.dispatch(request))
        .await
        .map_err(|err| {
            log::error!("Control request panicked: {err}");
            EngineApiError::InternalServerError
        })?
        .map_err(EngineApiError::from)
}

fn unexpected(response: ControlResponse) -> EngineApiError {
    log::error!("Unexpected control response {response:?}");
    EngineApiError::InternalServerError
}

async fn families(State(ctx): State<EngineAPIContext>) -> Json<Vec<FamilySummary>> {
    Json(ctx.controller.registry().snapshot())
}

async fn register_family(
    State(ctx): State<EngineAPIContext>,
    Json(request): Json<RegisterFamily>,
) -> Result<Json<Registered>, EngineApiError> {
    let request = ControlRequest::RegisterFamily {
        pid: request.pid,
        origin: request.origin,
        policy: request.policy,
    };
    match dispatch(&ctx, request).await? {
        ControlResponse::Registered { root } => Ok(Json(Registered { root })),
        other => Err(unexpected(other)),
    }
}

async fn unregister_family(
    State(ctx): State<EngineAPIContext>,
    Path(pid): Path<Pid>,
) -> Result<Json<Unregistered>, EngineApiError> {
    match dispatch(&ctx, ControlRequest::UnregisterFamily { pid }).await? {
        ControlResponse::Unregistered { removed } => Ok(Json(Unregistered { removed })),
        other => Err(unexpected(other)),
    }
}

async fn terminate_family(
    State(ctx): State<EngineAPIContext>,
    Path(pid): Path<Pid>,
) -> Result<Json<Terminated>, EngineApiError> {
    match dispatch(&ctx, ControlRequest::TerminateFamily { pid }).await? {
        ControlResponse::Terminated { pids } => Ok(Json(Terminated { pids })),
        other => Err(unexpected(other)),
    }
}

async fn members(
    State(ctx): State<EngineAPIContext>,
    Path(pid): Path<Pid>,
) -> Result<Json<Vec<Pid>>, EngineApiError> {
    match dispatch(&ctx, ControlRequest::ListMembers { pid }).await? {
        ControlResponse::Members { pids } => Ok(Json(pids)),
        other => Err(unexpected(other)),
    }
}

async fn files(
    State(ctx): State<EngineAPIContext>,
    Path(pid): Path<Pid>,
) -> Result<Json<Vec<FileId>>, EngineApiError> {
    match dispatch(&ctx, ControlRequest::ListFiles { pid }).await? {
        ControlResponse::Files { files } => Ok(Json(files)),
        other => Err(unexpected(other)),
    }
}

async fn wait_for_exit(
    State(ctx): State<EngineAPIContext>,
    Path(pid): Path<Pid>,
    Json(WaitForExit { timeout_ms }): Json<WaitForExit>,
) -> Result<Json<ExitStatus>, EngineApiError> {
    match dispatch(&ctx, ControlRequest::WaitForExit { pid, timeout_ms }).await? {
        ControlResponse::Waited { timed_out, removed } => {
            Ok(Json(ExitStatus { timed_out, removed }))
        }
        other => Err(unexpected(other)),
    }
}

async fn version(State(ctx): State<EngineAPIContext>) -> Json<Version> {
    Json(Version {
        version: ctx.version,
    })
}
