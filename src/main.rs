use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;

mod app;
mod auth;
mod cli;
mod config;
mod eid;
mod images;
mod items;
mod semantic;
mod storage;
#[cfg(test)]
mod tests;
mod users;
mod web;

use app::{notify, AppContextBuilder, ItemService};
use auth::TokenSigner;
use config::Config;
use users::{NewUser, UserDirectory, UsersCsv};

const BASE_PATH_ENV: &str = "RECLAIM_BASE_PATH";
const TOKEN_SECRET_ENV: &str = "RECLAIM_TOKEN_SECRET";

fn base_path() -> anyhow::Result<String> {
    if let Ok(path) = std::env::var(BASE_PATH_ENV) {
        return Ok(path);
    }

    let home = homedir::my_home()
        .ok()
        .flatten()
        .context("couldnt find home dir")?;
    Ok(format!("{}/.local/share/reclaim", home.to_string_lossy()))
}

fn token_signer(config: &Config) -> anyhow::Result<TokenSigner> {
    let secret = std::env::var(TOKEN_SECRET_ENV)
        .with_context(|| format!("{TOKEN_SECRET_ENV} must be set"))?;
    let ttl = config
        .token_ttl_hours
        .map(|hours| chrono::Duration::hours(hours as i64));

    Ok(TokenSigner::new(secret.as_bytes(), ttl)?)
}

fn load_users(base_path: &str) -> anyhow::Result<Arc<UsersCsv>> {
    Ok(Arc::new(UsersCsv::load(&format!("{base_path}/users.csv"))?))
}

fn block_on<F: std::future::Future>(fut: F) -> anyhow::Result<F::Output> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(fut))
}

fn serve(base_path: &str, config: Config) -> anyhow::Result<()> {
    let signer = token_signer(&config)?;
    let users = load_users(base_path)?;
    let items = Arc::new(items::BackendCsv::load(&format!("{base_path}/items.csv"))?);

    let uploads_dir = PathBuf::from(format!("{base_path}/uploads"));
    let objects = Arc::new(
        storage::BackendLocal::new(&uploads_dir.to_string_lossy(), &config.public_url)
            .context("failed to create uploads directory")?,
    );

    log::info!("loading embedding models, first start downloads them");
    let embeddings = semantic::FastembedGateway::new(&config.embeddings, config.base_path().to_path_buf())?;
    let index = semantic::LocalIndex::open(
        PathBuf::from(format!("{base_path}/index")),
        embeddings.text_model_id(),
        embeddings.image_model_id(),
    )?;

    let push: Arc<dyn notify::PushSender> = if config.push.enabled {
        Arc::new(notify::ExpoPush::new(&config.push)?)
    } else {
        log::warn!("push notifications are disabled");
        Arc::new(notify::DisabledPush)
    };

    let ctx = AppContextBuilder::new()
        .items(items)
        .users(users)
        .objects(objects)
        .embeddings(Arc::new(embeddings))
        .index(Arc::new(index))
        .push(push)
        .signer(signer)
        .matching(config.matching.clone())
        .timeouts(config.timeouts.clone())
        .images(config.images.clone())
        .build()?;

    let service = Arc::new(ItemService::new(Arc::new(ctx)));
    web::start_daemon(service, config, uploads_dir)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = cli::Args::parse();

    let base_path = base_path()?;
    let config = Config::load_with(&base_path)?;

    match args.command {
        cli::Command::Serve {} => serve(&base_path, config),

        cli::Command::User {
            action: cli::UserArgs::Add { mail, name, phone },
        } => {
            let signer = token_signer(&config)?;
            let users = load_users(&base_path)?;

            let user = block_on(users.create(NewUser { name, mail, phone }))??;
            println!("{}", serde_json::to_string_pretty(&user)?);
            println!("token: {}", signer.issue(&user.id));
            Ok(())
        }

        cli::Command::Token { mail } => {
            let signer = token_signer(&config)?;
            let users = load_users(&base_path)?;

            let user = block_on(users.find_by_mail(&mail))??
                .with_context(|| format!("no user with mail {mail}"))?;
            println!("{}", signer.issue(&user.id));
            Ok(())
        }
    }
}
