use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gateway::models::{Project, User, Vulnerability};
use gateway::{cli, config, router, AppState, Gateway, GatewayError};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "gateway=debug,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::Resolve { resource }) => {
            for (i, candidate) in cfg.resolver().resolve(&resource).iter().enumerate() {
                println!("{:>2}. {}", i + 1, candidate);
            }
            Ok(())
        }
        Some(cli::Commands::Fetch { resource, params }) => fetch(&cfg, &resource, &params).await,
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    let gateway = Gateway::from_config(&cfg)?;
    if cfg.service_account.is_none() {
        tracing::warn!("no service account configured; requests without a session will be rejected");
    }
    tracing::info!(
        service = %cfg.service_url,
        loopback = %cfg.loopback_url,
        external = cfg.env_url.as_ref().map(|u| u.as_str()).unwrap_or("-"),
        "upstream candidates configured"
    );

    let state = Arc::new(AppState {
        gateway,
        config: cfg,
    });
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("P0cit gateway listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn fetch(cfg: &config::Config, resource: &str, params: &[(String, String)]) -> anyhow::Result<()> {
    let gateway = Gateway::from_config(cfg)?;
    let params: Vec<(&str, &str)> = params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

    let value = match resource_kind(resource) {
        Kind::Users => to_json(gateway.get::<Vec<User>>(resource, &params).await),
        Kind::User => to_json(gateway.get::<User>(resource, &params).await),
        Kind::Projects => to_json(gateway.get::<Vec<Project>>(resource, &params).await),
        Kind::Project => to_json(gateway.get::<Project>(resource, &params).await),
        Kind::Vulnerabilities => {
            to_json(gateway.get::<Vec<Vulnerability>>(resource, &params).await)
        }
        Kind::Vulnerability => {
            to_json(gateway.get::<Vulnerability>(resource, &params).await)
        }
        Kind::Raw => gateway.get::<Value>(resource, &params).await.map_err(anyhow::Error::from),
    }?;

    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

enum Kind {
    Users,
    User,
    Projects,
    Project,
    Vulnerabilities,
    Vulnerability,
    Raw,
}

/// Pick the canonical shape from the resource path: `users` is a
/// collection, `users/<id>` an entity, anything deeper is printed raw
/// except `projects/<id>/vulnerabilities`.
fn resource_kind(resource: &str) -> Kind {
    let segments: Vec<&str> = resource
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    match segments.as_slice() {
        ["users"] | ["users", "clients"] | ["users", "pentesters"] => Kind::Users,
        ["users", _] => Kind::User,
        ["projects"] => Kind::Projects,
        ["projects", _] => Kind::Project,
        ["projects", _, "vulnerabilities"] | ["vulnerabilities"] | ["vulnerabilities", "recent"] => {
            Kind::Vulnerabilities
        }
        ["vulnerabilities", _] => Kind::Vulnerability,
        _ => Kind::Raw,
    }
}

fn to_json<T: serde::Serialize>(result: Result<T, GatewayError>) -> anyhow::Result<Value> {
    Ok(serde_json::to_value(result?)?)
}
