use anyhow::Context;
use axum::Router;
use lab_router::{config::Config, control, create_router};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let Some(config_path) = std::env::args().nth(1) else {
        eprintln!("usage: lab-router <config.toml>");
        std::process::exit(2);
    };

    let config = Config::from_file(&config_path)?;
    match &config.routes.source_url {
        Some(url) => tracing::info!(
            config = %config_path,
            ttl_secs = config.routes.cache_ttl_secs,
            "Routes come from {}",
            url
        ),
        None => tracing::info!(
            config = %config_path,
            "Serving {} static routes",
            config.routes.static_routes.len()
        ),
    }

    let (router_app, cache) = create_router(&config)?;
    let control_app = control::create_control_router(cache, config.server.control_auth.clone());

    let router = tokio::spawn(serve("router", config.server.proxy_port, router_app));
    let control = tokio::spawn(serve("control", config.server.control_port, control_app));

    // Neither server returns under normal operation.
    tokio::select! {
        result = router => tracing::error!("router exited: {:?}", result),
        result = control => tracing::error!("control server exited: {:?}", result),
    }

    Ok(())
}

async fn serve(name: &'static str, port: u16, app: Router) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {name} listener on {addr}"))?;
    tracing::info!("{} listening on {}", name, addr);

    axum::serve(listener, app).await?;
    Ok(())
}
