use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use tokio::net::TcpListener;

use entrada_server::config::Config;
use entrada_server::holds::sweeper::sweep_expired_holds;
use entrada_server::resale::sweeper::sweep_expired_listings;
use entrada_server::routes::create_routes;
use entrada_server::seats::sweeper::sweep_expired_reservations;
use entrada_server::state::AppState;
use entrada_server::sweeper::{
    Sweeper, HOLD_SWEEPER_LEASE_KEY, RESALE_SWEEPER_LEASE_KEY, RESERVATION_SWEEPER_LEASE_KEY,
};

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Successfully connected to database");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    tracing::info!("Migrations run successfully");

    let port = config.port;
    let period = config.sweep_period_secs;
    let batch = config.sweep_batch_size;
    let state = AppState::new(pool.clone(), config);

    Sweeper::new("hold-expiry", period, batch, HOLD_SWEEPER_LEASE_KEY).spawn(
        pool.clone(),
        state.clock.clone(),
        |pool, now, batch| async move { sweep_expired_holds(&pool, now, batch).await },
    );
    Sweeper::new("reservation-expiry", period, batch, RESERVATION_SWEEPER_LEASE_KEY).spawn(
        pool.clone(),
        state.clock.clone(),
        |pool, now, batch| async move { sweep_expired_reservations(&pool, now, batch).await },
    );
    Sweeper::new("resale-expiry", period, batch, RESALE_SWEEPER_LEASE_KEY).spawn(
        pool.clone(),
        state.clock.clone(),
        |pool, now, batch| async move { sweep_expired_listings(&pool, now, batch).await },
    );

    let app: Router = create_routes(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("🚀 Server running at http://{}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app).await.expect("Server failed");
}
