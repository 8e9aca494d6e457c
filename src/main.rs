#[macro_use]
extern crate diesel;
#[cfg(feature = "auto_migration")]
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

use std::sync::Arc;

use dotenvy::dotenv;
use lazy_static::lazy_static;
use warp::Filter;

use crate::{
    catalog::PgCatalog,
    config::Config,
    data::{IngestContext, s3utils::S3Store},
    util::OptFmt,
};

mod auth;
mod catalog;
mod config;
mod data;
mod error;
mod model;
mod schema;
mod util;

lazy_static! {
    pub static ref DATABASE_URL: String = std::env::var("DATABASE_URL")
        .expect("Missing environment variable DATABASE_URL must be set to connect to postgres");
    pub static ref MAX_DB_CONNECTIONS: usize = std::env::var("MAX_DB_CONNECTIONS")
        .unwrap_or_else(|_| String::from("25"))
        .parse::<usize>()
        .expect("MAX_DB_CONNECTIONS is not a valid usize");
    pub static ref CERT_PATH: Option<String> = std::env::var("CERT_PATH").ok();
    pub static ref KEY_PATH: Option<String> = std::env::var("KEY_PATH").ok();
}

#[cfg(feature = "auto_migration")]
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

fn main() {
    dotenv().ok();

    // initialise certain lazy statics on startup
    lazy_static::initialize(&DATABASE_URL);
    lazy_static::initialize(&MAX_DB_CONNECTIONS);

    let config = Config::from_env();

    setup_logger();

    #[cfg(feature = "auto_migration")]
    {
        use diesel::{Connection, PgConnection};

        log::info!("Running diesel migrations");
        let mut connection =
            PgConnection::establish(&DATABASE_URL).expect("Failed to establish database connection");
        if let Err(e) = connection.run_pending_migrations(MIGRATIONS) {
            panic!("Failed running db migrations: {}", e);
        }
        log::info!("Done running diesel migrations");
    }

    if !config.assets_root.exists() {
        std::fs::create_dir_all(&config.assets_root).expect("Failed to create assets directory");
    }

    setup_tokio_runtime(config);
}

/// Start a tokio runtime that runs a warp server.
#[tokio::main]
async fn setup_tokio_runtime(config: Config) {
    let access_key = std::env::var("AWS_ACCESS_KEY_ID")
        .expect("Missing environment variable AWS_ACCESS_KEY_ID must be set");
    let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY")
        .expect("Missing environment variable AWS_SECRET_ACCESS_KEY must be set");
    let s3_store = Arc::new(
        S3Store::new(
            &config.s3_bucket,
            &config.s3_region,
            config.s3_endpoint.as_deref(),
            &access_key,
            &secret_key,
        )
        .expect("Failed to set up object storage"),
    );
    let catalog = Arc::new(
        PgCatalog::new(&DATABASE_URL, *MAX_DB_CONNECTIONS)
            .expect("Failed to set up video catalog"),
    );

    let port = config.port;
    log::info!(
        "Starting server on port {} with {:?}, assets served from {}",
        port,
        config.url_mode,
        config.assets_root.display()
    );

    let ctx = Arc::new(IngestContext {
        config,
        catalog,
        object_store: s3_store.clone(),
        presigner: s3_store,
    });

    let filter = data::routes(ctx)
        .recover(error::handle_rejection)
        .with(warp::log::custom(|info| {
            let log_level = if info.elapsed().as_secs() >= 10 && !info.path().contains("_upload/")
            {
                log::Level::Warn
            } else if info.elapsed().as_millis() >= 250 {
                log::Level::Info
            } else {
                log::Level::Debug
            };

            log::log!(
                target: "vidvault::api",
                log_level,
                "{} \"{} {} {:?}\" {} \"{}\" \"{}\" {:?}",
                OptFmt(info.remote_addr()),
                info.method(),
                info.path(),
                info.version(),
                info.status().as_u16(),
                OptFmt(info.referer()),
                OptFmt(info.user_agent()),
                info.elapsed(),
            );
        }));

    #[cfg(debug_assertions)]
    let filter = filter.with(
        warp::cors()
            .allow_any_origin()
            .allow_header("content-type")
            .allow_header("Authorization")
            .allow_method(warp::http::Method::GET)
            .allow_method(warp::http::Method::OPTIONS)
            .allow_method(warp::http::Method::POST),
    );

    match (CERT_PATH.as_ref(), KEY_PATH.as_ref()) {
        (Some(cert_path), Some(key_path)) => {
            warp::serve(filter)
                .tls()
                .cert_path(cert_path)
                .key_path(key_path)
                .run(([0, 0, 0, 0], port))
                .await;
        }
        _ => warp::serve(filter).run(([0, 0, 0, 0], port)).await,
    }
}

fn setup_logger() {
    // create logs dir as fern does not appear to handle that itself
    if !std::path::Path::new("logs/").exists() {
        std::fs::create_dir("logs").expect("Failed to create logs/ directory");
    }

    let logging_level = if cfg!(debug_assertions) {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}]{}[{}] {}",
                record.level(),
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .level_for("vidvault", logging_level)
        .level_for("vidvault_server", logging_level)
        .chain(std::io::stdout())
        .chain(fern::DateBased::new("logs/", "logs_%Y-%m-%d.log"))
        .apply()
        .expect("Failed to set up logging");
}
