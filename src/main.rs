//! filedrop server binary.
//!
//! This crate wires together path-checked storage, optional Basic auth,
//! streaming downloads, and multipart uploads. The main entry point builds
//! the Axum router, optionally configures TLS with a self-signed
//! certificate, and starts the listener.

mod atomic;
mod auth;
mod background;
mod config;
mod error;
mod files;
mod health;
mod http;
mod locking;
mod logging;
mod storage;
mod tls;
mod upload;

use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span};

use crate::auth::AuthGate;
use crate::background::spawn_background_tasks;
use crate::config::Args;
use crate::http::build_cors_layer;
use crate::locking::LockManager;
use crate::storage::Storage;
use crate::upload::UploadConfig;

shadow!(build);

/// Starts the filedrop server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let storage = Arc::new(Storage::open(PathBuf::from(&args.serve_dir)).await?);
    let auth_gate = Arc::new(AuthGate::new(args.auth.clone()));
    let upload_config = Arc::new(UploadConfig {
        max_file_size: args.upload_max_size,
        temp_ttl: Duration::from_secs(args.upload_temp_ttl_secs),
    });
    let lock_manager = Arc::new(LockManager::new());

    let mut app = Router::new()
        .route("/", get(files::list_root))
        .route("/browse/{*path}", get(files::browse))
        .route("/download/{*path}", get(files::download))
        .route(
            "/upload",
            post(upload::upload_files).layer(DefaultBodyLimit::disable()),
        )
        .route("/health", get(health::health))
        .layer(middleware::from_fn(auth::auth_middleware))
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let forwarded_ip =
                        http::extract_forwarded_ip(request.headers()).map(|ip| ip.to_string());
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.to_string());
                    let client_ip = forwarded_ip
                        .or(connect_ip)
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(storage.clone()))
        .layer(Extension(auth_gate.clone()))
        .layer(Extension(upload_config.clone()))
        .layer(Extension(lock_manager));

    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let handle = Handle::new();

    info!("📁 Serving: {:?}", storage.root_path());
    if auth_gate.enabled() {
        info!("🔒 Auth: enabled");
    } else {
        info!("🔓 Auth: disabled (public access)");
    }

    spawn_background_tasks(storage, upload_config);

    if args.tls {
        let tls_config = tls::build_rustls_config(&args, host).await?;
        info!("🚀 Starting HTTPS server at https://{}", addr);
        let server = axum_server::bind_rustls(addr, tls_config)
            .handle(handle.clone())
            .serve(app.into_make_service_with_connect_info::<SocketAddr>());
        tokio::select! {
            result = server => result?,
            _ = shutdown_signal(handle) => {}
        }
    } else {
        info!("🚀 Starting HTTP server at http://{}", addr);
        let server = axum_server::bind(addr)
            .handle(handle.clone())
            .serve(app.into_make_service_with_connect_info::<SocketAddr>());
        tokio::select! {
            result = server => result?,
            _ = shutdown_signal(handle) => {}
        }
    }

    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
