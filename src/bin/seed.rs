//! Admin seeder: loads a deterministic demo data set.
//!
//! Exit codes: 0 on success, 1 on configuration errors, 2 when the database
//! is unreachable, 3 when the seed data already exists.

use chrono::{Duration, Utc};
use dotenvy::dotenv;
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::process::ExitCode;

use entrada_server::clock::new_id;
use entrada_server::config::Config;

const EXIT_CONFIG_ERROR: u8 = 1;
const EXIT_DB_UNREACHABLE: u8 = 2;
const EXIT_SEED_CONFLICT: u8 = 3;

const SEED_EVENT_SLUG: &str = "entrada-demo-night";

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    if !config.database_url.starts_with("postgres://")
        && !config.database_url.starts_with("postgresql://")
    {
        tracing::error!("DATABASE_URL is not a postgres URL");
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }

    let pool = match PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.database_url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "could not connect to database");
            return ExitCode::from(EXIT_DB_UNREACHABLE);
        }
    };

    if let Err(e) = sqlx::migrate!().run(&pool).await {
        tracing::error!(error = %e, "migrations failed");
        return ExitCode::from(EXIT_DB_UNREACHABLE);
    }

    match seed(&pool).await {
        Ok(()) => {
            tracing::info!("seed data loaded");
            ExitCode::SUCCESS
        }
        Err(SeedError::Conflict) => {
            tracing::error!("seed data already present, refusing to overwrite");
            ExitCode::from(EXIT_SEED_CONFLICT)
        }
        Err(SeedError::Db(e)) => {
            tracing::error!(error = %e, "seeding failed");
            ExitCode::from(EXIT_DB_UNREACHABLE)
        }
    }
}

enum SeedError {
    Conflict,
    Db(sqlx::Error),
}

impl From<sqlx::Error> for SeedError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            // 23505: unique_violation
            if db.code().as_deref() == Some("23505") {
                return SeedError::Conflict;
            }
        }
        SeedError::Db(e)
    }
}

async fn seed(pool: &PgPool) -> Result<(), SeedError> {
    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events WHERE slug = $1")
        .bind(SEED_EVENT_SLUG)
        .fetch_one(pool)
        .await?;
    if existing > 0 {
        return Err(SeedError::Conflict);
    }

    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let organizer_user = new_id();
    sqlx::query("INSERT INTO users (id, name, email) VALUES ($1, $2, $3)")
        .bind(organizer_user)
        .bind("Demo Organizer")
        .bind("organizer@example.com")
        .execute(&mut *tx)
        .await?;

    let buyer = new_id();
    sqlx::query("INSERT INTO users (id, name, email) VALUES ($1, $2, $3)")
        .bind(buyer)
        .bind("Demo Buyer")
        .bind("buyer@example.com")
        .execute(&mut *tx)
        .await?;

    let organizer = new_id();
    sqlx::query(
        "INSERT INTO organizers (id, user_id, name, contact_email) VALUES ($1, $2, $3, $4)",
    )
    .bind(organizer)
    .bind(organizer_user)
    .bind("Entrada Demo Productions")
    .bind("organizer@example.com")
    .execute(&mut *tx)
    .await?;

    let venue = new_id();
    sqlx::query("INSERT INTO venues (id, organizer_id, name, address) VALUES ($1, $2, $3, $4)")
        .bind(venue)
        .bind(organizer)
        .bind("Demo Hall")
        .bind("1 Demo Street")
        .execute(&mut *tx)
        .await?;

    let event = new_id();
    sqlx::query(
        r#"
        INSERT INTO events (
            id, organizer_id, venue_id, title, slug, timezone,
            start_time, end_time, total_seats, available_seats, status
        )
        VALUES ($1, $2, $3, $4, $5, 'UTC', $6, $7, 20, 20, 'active')
        "#,
    )
    .bind(event)
    .bind(organizer)
    .bind(venue)
    .bind("Entrada Demo Night")
    .bind(SEED_EVENT_SLUG)
    .bind(now + Duration::days(30))
    .bind(now + Duration::days(30) + Duration::hours(4))
    .execute(&mut *tx)
    .await?;

    let ticket_type = new_id();
    sqlx::query(
        r#"
        INSERT INTO ticket_types (
            id, event_id, organizer_id, name, price_modifier,
            min_tickets_per_user, max_tickets_per_user, sales_start, status, is_default
        )
        VALUES ($1, $2, $3, 'General admission', $4, 1, 6, $5, 'active', TRUE)
        "#,
    )
    .bind(ticket_type)
    .bind(event)
    .bind(organizer)
    .bind(Decimal::new(2500, 2))
    .bind(now)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO ticket_stocks (id, ticket_type_id, total, available)
        VALUES ($1, $2, 10, 10)
        "#,
    )
    .bind(new_id())
    .bind(ticket_type)
    .execute(&mut *tx)
    .await?;

    for row in 0u8..4 {
        for number in 1..=5 {
            sqlx::query(
                r#"
                INSERT INTO seats (id, venue_id, seat_number, section, status)
                VALUES ($1, $2, $3, $4, 'available')
                "#,
            )
            .bind(new_id())
            .bind(venue)
            .bind(format!("{number}"))
            .bind(format!("Row {}", (b'A' + row) as char))
            .execute(&mut *tx)
            .await?;
        }
    }

    sqlx::query(
        r#"
        INSERT INTO discount_codes (
            id, organizer_id, code, discount_type, value,
            valid_from, valid_until, max_uses, min_order_value, is_active
        )
        VALUES ($1, $2, 'DEMO10', 'percentage', 10, $3, $4, 100, 0, TRUE)
        "#,
    )
    .bind(new_id())
    .bind(organizer)
    .bind(now)
    .bind(now + Duration::days(60))
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO user_ticket_limits (id, user_id, event_id, max_tickets)
        VALUES ($1, $2, $3, 4)
        "#,
    )
    .bind(new_id())
    .bind(buyer)
    .bind(event)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
