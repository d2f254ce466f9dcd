use blood_portal::{
    AppState, AuditedDirectory, PostgresRepository, SupabaseAuthClient,
    config::{AppConfig, BackendConfig, Env},
    create_router, create_unconfigured_router,
    repository::{DirectoryState, RepoError, RepositoryState},
    supabase::AuthProviderState,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Loads configuration, sets up logging, wires the backend services and serves
/// HTTP. Missing backend settings do not stop the process: it serves the
/// setup notice instead.
#[tokio::main]
async fn main() {
    // 1. Configuration
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    // 2. Logging: RUST_LOG wins, otherwise the crate at debug.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "blood_portal=debug,tower_http=info".into());

    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            // JSON lines for the log aggregator.
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);
    tracing::info!(unmatched_routes = ?config.unmatched_routes, "route guard policy");

    let bind_addr = config.bind_addr.clone();

    // 3. Services, or the setup notice when the backend is not configured
    //    or its database cannot be brought up to date.
    let app = match config.backend.clone() {
        Some(backend) => match connect_database(&backend).await {
            Ok(postgres) => {
                let repo = Arc::new(postgres.clone()) as RepositoryState;
                let directory = Arc::new(AuditedDirectory::new(postgres)) as DirectoryState;
                let auth = Arc::new(SupabaseAuthClient::new(
                    &backend.supabase_url,
                    &backend.anon_key,
                    backend.auth_redirect_url.clone(),
                )) as AuthProviderState;

                create_router(AppState {
                    repo,
                    directory,
                    auth,
                    config,
                })
            }
            Err(e) => {
                tracing::error!(error = %e, "database setup failed, serving setup notice");
                create_unconfigured_router()
            }
        },
        None => {
            match &config.setup_error {
                Some(reason) => tracing::error!(%reason, "backend configuration missing, serving setup notice"),
                None => tracing::error!("backend configuration missing, serving setup notice"),
            }
            create_unconfigured_router()
        }
    };

    // 4. Server
    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %bind_addr, "failed to bind");
            std::process::exit(1);
        }
    };

    tracing::info!("Listening on {}", bind_addr);
    tracing::info!("API Documentation (Swagger UI) available at: http://{}/swagger-ui", bind_addr);

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "server stopped");
    }
}

/// connect_database
///
/// Opens the pool and applies pending migrations. The pool is lazy, so the
/// migration run is also the first connectivity check.
async fn connect_database(backend: &BackendConfig) -> Result<PostgresRepository, RepoError> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect_lazy(&backend.db_url)?;

    let postgres = PostgresRepository::new(pool);
    postgres.run_migrations().await?;
    tracing::info!("database migrations applied");
    Ok(postgres)
}
