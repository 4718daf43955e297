//! GuideForge entry point: catalog bootstrap, HTTP server, auto-refresh
//! scheduler and detector startup.

use std::sync::Arc;

use guideforge_lib::config::Config;
use guideforge_lib::db;
use guideforge_lib::detector::Detector;
use guideforge_lib::filters;
use guideforge_lib::refresh::logbuffer::LogBuffer;
use guideforge_lib::refresh::RefreshRunner;
use guideforge_lib::scheduler::RefreshScheduler;
use guideforge_lib::server::{self, AppState};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(Config::from_env());

    if let Some(parent) = std::path::Path::new(&config.db_path).parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            eprintln!("Cannot create database directory: {}", e);
            std::process::exit(1);
        }
    }

    // Migrations run once up front on a dedicated connection
    let mut conn = match db::establish_connection(&config.db_path) {
        Ok(conn) => conn,
        Err(e) => {
            eprintln!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = db::run_migrations(&mut conn) {
        eprintln!("Failed to run migrations: {}", e);
        std::process::exit(1);
    }
    drop(conn);

    let pool = match db::create_pool(&config.db_path) {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("Failed to create connection pool: {}", e);
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    runtime.block_on(async {
        let logs = Arc::new(LogBuffer::new(1000));
        let runner = Arc::new(RefreshRunner::new(pool.clone(), config.clone(), logs));
        let detector = Arc::new(Detector::new(pool.clone(), config.clone()));

        // Auto-refresh scheduler, applied from persisted preferences with
        // the config as the first-boot default
        let scheduler = RefreshScheduler::new(runner.clone(), pool.clone());
        if let Err(e) = scheduler.start().await {
            tracing::error!("scheduler start failed, auto refresh disabled: {}", e);
        } else {
            let (enabled, time) = {
                let prefs = pool
                    .get()
                    .ok()
                    .and_then(|mut conn| filters::load_preferences(&mut conn).ok());
                match prefs {
                    Some(p) => (p.auto_refresh_enabled, p.auto_refresh_time),
                    None => (config.auto_refresh_enabled, config.auto_refresh_time.clone()),
                }
            };
            if let Err(e) = scheduler.apply(enabled, &time).await {
                tracing::error!("auto refresh schedule invalid: {}", e);
            }
            let missed_check = scheduler.clone();
            let missed_time = time.clone();
            tokio::spawn(async move {
                // Let the server settle before a potential catch-up run
                tokio::time::sleep(std::time::Duration::from_secs(10)).await;
                missed_check.check_missed_run(&missed_time).await;
            });
        }

        let state = AppState::new(
            pool.clone(),
            config.clone(),
            runner.clone(),
            Some(scheduler.clone()),
            detector.clone(),
        );

        // Dummy segment + sidecar bootstrap run in the background so a slow
        // ffmpeg or unreachable DVR never delays startup
        {
            let state = state.clone();
            let out_dir = config.out_dir.clone();
            tokio::spawn(async move {
                if let Some(bytes) = server::hls::render_dummy_segment(&out_dir).await {
                    state.set_segment_bytes(bytes).await;
                }
            });
        }
        {
            let detector = detector.clone();
            tokio::spawn(async move {
                detector.bootstrap().await;
            });
        }

        let shutdown_detector = detector.clone();
        let server = tokio::spawn(async move {
            if let Err(e) = server::start_server(state).await {
                tracing::error!("HTTP server error: {}", e);
            }
        });

        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("shutdown requested"),
            Err(e) => tracing::error!("signal handler error: {}", e),
        }
        shutdown_detector.shutdown();
        let _ = scheduler.stop().await;
        server.abort();
    });
}
