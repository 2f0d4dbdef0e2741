use crate::lookup::VendorLookup;
use crate::transfer::FileTransfer;
use anyhow::Context;
use blueprobe_core::validate::{validate_lookup_address, validate_transfer};
use blueprobe_core::{
    ConnectionManager, Device, DiscoveryError, ErrorKind, Radio, RadioState, ScanController,
    ScanEvent, SessionPhase,
};
use bytes::Buf;
use futures::{SinkExt, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use warp::http::StatusCode;
use warp::Filter;

/// Largest accepted upload
const MAX_UPLOAD_BYTES: u64 = 32 * 1024 * 1024;

// ============================================================================
// APP CONTEXT: shared state for HTTP endpoints
// ============================================================================

pub struct AppContext<R: Radio> {
    pub scanner: Arc<ScanController<R>>,
    pub connections: ConnectionManager<R>,
    pub vendor: VendorLookup,
    pub transfer: FileTransfer,
    pub upload_dir: PathBuf,
    pub start_time: Instant,
}

// ============================================================================
// API REQUEST / RESPONSE TYPES
// ============================================================================

#[derive(Deserialize, Debug)]
struct ConnectRequest {
    id: Option<String>,
}

#[derive(Serialize)]
struct ScanResponse {
    devices: Vec<Device>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    radio_state: RadioState,
    scanning: bool,
    session_id: u64,
    device_count: usize,
    version: String,
    uptime_seconds: u64,
}

#[derive(Serialize)]
struct TransferResponse {
    status: &'static str,
    stdout: String,
}

#[derive(Serialize, Debug, PartialEq, Eq)]
struct ErrorBody {
    error: String,
    detail: String,
}

/// JSON reply with an explicit status code
#[derive(Debug)]
pub struct ApiReply {
    status: StatusCode,
    body: serde_json::Value,
}

impl ApiReply {
    fn ok<T: Serialize>(body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self {
                status: StatusCode::OK,
                body,
            },
            Err(e) => Self::error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                format!("failed to encode response: {}", e),
            ),
        }
    }

    fn error(status: StatusCode, kind: &str, detail: impl Into<String>) -> Self {
        let body = ErrorBody {
            error: kind.to_string(),
            detail: detail.into(),
        };
        Self {
            status,
            body: serde_json::json!(body),
        }
    }

    fn discovery(err: &DiscoveryError) -> Self {
        let kind = serde_json::to_value(err.kind())
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "internal".to_string());
        Self::error(status_for(err.kind()), &kind, err.detail())
    }
}

impl warp::Reply for ApiReply {
    fn into_response(self) -> warp::reply::Response {
        warp::reply::with_status(warp::reply::json(&self.body), self.status).into_response()
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Busy => StatusCode::CONFLICT,
        ErrorKind::RadioUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::ConnectionFailed => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ============================================================================
// ROUTES
// ============================================================================

pub fn routes<R: Radio>(
    ctx: Arc<AppContext<R>>,
) -> impl Filter<Extract = impl warp::Reply, Error = std::convert::Infallible> + Clone {
    let ctx_filter = warp::any().map({
        let ctx = ctx.clone();
        move || ctx.clone()
    });

    // 1. Scan for the configured window
    let scan_route = warp::path!("scan-bluetooth")
        .and(warp::get())
        .and(ctx_filter.clone())
        .then(|ctx: Arc<AppContext<R>>| async move { scan(&ctx).await });

    // 2. Connect by session-local id
    let connect_route = warp::path!("connect-bluetooth")
        .and(warp::post())
        .and(ctx_filter.clone())
        .and(warp::body::json())
        .then(|ctx: Arc<AppContext<R>>, req: ConnectRequest| async move {
            connect(&ctx, req.id.as_deref()).await
        });

    // 3. Vendor lookup
    let lookup_route = warp::path!("lookup-mac")
        .and(warp::get())
        .and(ctx_filter.clone())
        .and(warp::query::<HashMap<String, String>>())
        .then(|ctx: Arc<AppContext<R>>, query: HashMap<String, String>| async move {
            lookup(&ctx, query.get("v").map(String::as_str)).await
        });

    // 4. Upload + transfer
    let send_route = warp::path!("send-image-bluetooth")
        .and(warp::post())
        .and(ctx_filter.clone())
        .and(warp::multipart::form().max_length(MAX_UPLOAD_BYTES))
        .then(|ctx: Arc<AppContext<R>>, form: warp::multipart::FormData| async move {
            send_image(&ctx, form).await
        });

    // 5. Service status
    let status_route = warp::path!("api" / "status")
        .and(warp::get())
        .and(ctx_filter.clone())
        .map(|ctx: Arc<AppContext<R>>| status(&ctx));

    // 6. Live scan events
    let ws_route = warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .and(ctx_filter)
        .map(|ws: warp::ws::Ws, ctx: Arc<AppContext<R>>| {
            let events = ctx.scanner.subscribe();
            ws.on_upgrade(move |socket| forward_events(socket, events))
        });

    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST"])
        .allow_header("content-type");

    scan_route
        .or(connect_route)
        .or(lookup_route)
        .or(send_route)
        .or(status_route)
        .or(ws_route)
        .with(cors)
        .recover(handle_rejection)
}

/// Bind and serve in a background task
pub fn start<R: Radio>(addr: SocketAddr, ctx: Arc<AppContext<R>>) -> tokio::task::JoinHandle<()> {
    let routes = routes(ctx);
    info!("Starting HTTP server on {}", addr);

    tokio::spawn(async move {
        warp::serve(routes).run(addr).await;
    })
}

// ============================================================================
// HANDLERS
// ============================================================================

async fn scan<R: Radio>(ctx: &AppContext<R>) -> ApiReply {
    match ctx.scanner.begin_scan().await {
        Ok(devices) => ApiReply::ok(&ScanResponse { devices }),
        Err(e) => {
            warn!("Scan request failed: {}", e);
            ApiReply::discovery(&e)
        }
    }
}

async fn connect<R: Radio>(ctx: &AppContext<R>, id: Option<&str>) -> ApiReply {
    match ctx.connections.connect(id.unwrap_or_default()).await {
        Ok(status) => ApiReply::ok(&status),
        Err(e) => ApiReply::discovery(&e),
    }
}

async fn lookup<R: Radio>(ctx: &AppContext<R>, mac: Option<&str>) -> ApiReply {
    let mac = match validate_lookup_address(mac) {
        Ok(mac) => mac,
        Err(e) => return ApiReply::discovery(&e),
    };

    match ctx.vendor.lookup(mac).await {
        Ok(response) => ApiReply::ok(&response),
        Err(e) => {
            error!("Vendor lookup failed: {:#}", e);
            ApiReply::error(StatusCode::BAD_GATEWAY, "lookupFailed", format!("{:#}", e))
        }
    }
}

fn status<R: Radio>(ctx: &AppContext<R>) -> ApiReply {
    ApiReply::ok(&StatusResponse {
        radio_state: ctx.scanner.radio_state(),
        scanning: ctx.scanner.phase() == SessionPhase::Scanning,
        session_id: ctx.scanner.current_session(),
        device_count: ctx.scanner.device_count(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: ctx.start_time.elapsed().as_secs(),
    })
}

#[derive(Debug, Default)]
struct Upload {
    address: Option<String>,
    image: Option<PathBuf>,
}

async fn send_image<R: Radio>(ctx: &AppContext<R>, form: warp::multipart::FormData) -> ApiReply {
    let mut upload = Upload::default();
    let reply = match receive_upload(&ctx.upload_dir, form, &mut upload).await {
        Ok(()) => transfer_upload(&ctx.transfer, &upload).await,
        Err(e) => {
            warn!("Upload failed: {:#}", e);
            ApiReply::error(StatusCode::BAD_REQUEST, "invalidInput", format!("{:#}", e))
        }
    };

    if let Some(path) = &upload.image {
        if let Err(e) = tokio::fs::remove_file(path).await {
            debug!("Could not remove upload {}: {}", path.display(), e);
        }
    }
    reply
}

async fn transfer_upload(transfer: &FileTransfer, upload: &Upload) -> ApiReply {
    let request = match validate_transfer(upload.address.as_deref(), upload.image.as_deref()) {
        Ok(request) => request,
        Err(e) => return ApiReply::discovery(&e),
    };

    match transfer.send(&request).await {
        Ok(stdout) => ApiReply::ok(&TransferResponse {
            status: "Image sent",
            stdout,
        }),
        Err(e) => ApiReply::error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "transferFailed",
            format!("{:#}", e),
        ),
    }
}

/// Store the `image` part under `dir` and collect the `address` field.
///
/// `upload.image` is set as soon as the file exists, so the caller can remove
/// it even when the body breaks off partway.
async fn receive_upload(
    dir: &Path,
    mut form: warp::multipart::FormData,
    upload: &mut Upload,
) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .context("Failed to create upload directory")?;

    while let Some(part) = form.try_next().await.context("Malformed multipart body")? {
        let name = part.name().to_string();
        match name.as_str() {
            "address" => {
                let mut value = Vec::new();
                let mut stream = Box::pin(part.stream());
                while let Some(chunk) = stream.try_next().await? {
                    value.extend_from_slice(chunk.chunk());
                }
                upload.address = Some(String::from_utf8_lossy(&value).trim().to_string());
            }
            "image" => {
                let path = dir.join(uuid::Uuid::new_v4().to_string());
                let mut file = tokio::fs::File::create(&path)
                    .await
                    .context("Failed to create upload file")?;
                upload.image = Some(path);

                let mut stream = Box::pin(part.stream());
                while let Some(chunk) = stream.try_next().await? {
                    file.write_all(chunk.chunk()).await?;
                }
                file.flush().await?;
            }
            other => debug!("Ignoring form field {}", other),
        }
    }
    Ok(())
}

async fn handle_rejection(err: warp::Rejection) -> Result<ApiReply, std::convert::Infallible> {
    let reply = if err.is_not_found() {
        ApiReply::error(StatusCode::NOT_FOUND, "notFound", "no such route")
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        ApiReply::error(StatusCode::BAD_REQUEST, "invalidInput", e.to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        ApiReply::error(StatusCode::METHOD_NOT_ALLOWED, "methodNotAllowed", "method not allowed")
    } else {
        debug!("Unhandled rejection: {:?}", err);
        ApiReply::error(StatusCode::BAD_REQUEST, "invalidInput", format!("{:?}", err))
    };
    Ok(reply)
}

// ============================================================================
// WEBSOCKET HANDLER
// ============================================================================

async fn forward_events(ws: warp::ws::WebSocket, mut events: broadcast::Receiver<ScanEvent>) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let forward_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Ok(json) = serde_json::to_string(&event) {
                        if ws_tx.send(warp::ws::Message::text(json)).await.is_err() {
                            break;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("WebSocket client lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Drain the client side until it closes
    while let Some(result) = ws_rx.next().await {
        match result {
            Ok(msg) if msg.is_close() => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }

    forward_task.abort();
}
