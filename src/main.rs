use actix_cors::Cors;
use actix_web::{App, HttpServer, web::Data};
use airguard_ui::{
    api::{self, Api},
    config::AppConfig,
    device_client::AirguardDeviceClient,
    services::firmware::GithubReleaseFeed,
};
use anyhow::{Context, Result};
use env_logger::{Builder, Env, Target};
use log::{debug, error, info};
use std::io::Write;
use tokio::signal::unix::{SignalKind, signal};

type UiApi = Api<AirguardDeviceClient, GithubReleaseFeed>;

#[actix_web::main]
async fn main() {
    if let Err(e) = run().await {
        error!("application error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    initialize();

    let config = AppConfig::get();

    let device = AirguardDeviceClient::new(&config.device)
        .context("failed to create device client")?;
    let releases = GithubReleaseFeed::new(&config.firmware, config.device.timeout)
        .context("failed to create release feed")?;

    info!(
        "using device at {} (timeout {:?}), reconnect {} x {}ms",
        config.device.url,
        config.device.timeout,
        config.reconnect.max_retries,
        config.reconnect.interval_ms
    );

    let api = UiApi::new(device, releases, (&config.reconnect).into());
    let ui_port = config.ui.port;

    let server = HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_header()
                    .allowed_methods(vec!["GET", "POST"])
                    .max_age(3600),
            )
            .app_data(Data::new(api.clone()))
            .configure(api::configure::<AirguardDeviceClient, GithubReleaseFeed>)
    })
    .bind(("0.0.0.0", ui_port))
    .context("failed to bind server")?
    .disable_signals()
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    info!("listening on port {ui_port}");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => debug!("ctrl-c received"),
        _ = sigterm.recv() => debug!("SIGTERM received"),
        result = server_task => {
            match result {
                Ok(Ok(())) => debug!("server stopped normally"),
                Ok(Err(e)) => error!("server stopped with error: {e}"),
                Err(e) => error!("server task panicked: {e}"),
            }
        }
    }

    server_handle.stop(true).await;
    info!("shutdown complete");

    Ok(())
}

fn initialize() {
    log_panics::init();

    let mut builder = if cfg!(debug_assertions) {
        Builder::from_env(Env::default().default_filter_or("debug"))
    } else {
        Builder::from_env(Env::default().default_filter_or("info"))
    };

    builder.format(|f, record| match record.level() {
        log::Level::Error => {
            eprintln!("{}", record.args());
            Ok(())
        }
        _ => {
            writeln!(f, "{}", record.args())
        }
    });

    builder.target(Target::Stdout).init();

    info!("module version: {}", env!("CARGO_PKG_VERSION"));
}
