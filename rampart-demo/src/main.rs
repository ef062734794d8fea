use rampart::domain::{Entity, Goods, PageRequest, Post, User};
use rampart::persistence::SledEntityStore;
use rampart::planes::{EntityService, GoodsCatalog, GoodsOrdering};
use shared::config::Config;
use std::path::Path;
use std::sync::Arc;
use storage_engine::MokaCacheEngine;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

struct Services {
    goods: Arc<EntityService<Goods>>,
    users: Arc<EntityService<User>>,
    posts: Arc<EntityService<Post>>,
}

impl Services {
    async fn refresh_id_bounds(&self) {
        let results = [
            self.goods.refresh_id_bound().await,
            self.users.refresh_id_bound().await,
            self.posts.refresh_id_bound().await,
        ];
        for result in results {
            if let Err(e) = result {
                warn!("Failed to refresh id bound: {}", e);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting rampart demo");

    // Load environment variables
    match dotenvy::dotenv() {
        Ok(_) => info!("Loaded environment variables from .env file"),
        Err(_) => info!("No .env file found, using system environment variables"),
    }

    let config = Config::from_env();
    info!("Cache policy: {:?}", config.cache);

    std::fs::create_dir_all(&config.data_dir)?;
    let db = sled::open(Path::new(&config.data_dir).join("rampart.sled"))?;

    let goods_store = Arc::new(SledEntityStore::<Goods>::with_db(db.clone())?);
    let user_store = Arc::new(SledEntityStore::<User>::with_db(db.clone())?);
    let post_store = Arc::new(SledEntityStore::<Post>::with_db(db.clone())?);

    let engine = Arc::new(MokaCacheEngine::with_capacity(config.max_entries));

    let services = Arc::new(Services {
        goods: Arc::new(EntityService::new(goods_store.clone(), engine.clone(), &config.cache)),
        users: Arc::new(EntityService::new(user_store.clone(), engine.clone(), &config.cache)),
        posts: Arc::new(EntityService::new(post_store.clone(), engine.clone(), &config.cache)),
    });

    // Bounds must be seeded before the first read
    services.refresh_id_bounds().await;

    let refresher = if config.bound_refresh_interval.is_zero() {
        info!("Periodic id bound refresh disabled");
        None
    } else {
        let services = Arc::clone(&services);
        let period = config.bound_refresh_interval;
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                services.refresh_id_bounds().await;
            }
        }))
    };

    if let Err(e) = run_scenario(&services).await {
        error!("Demo scenario failed: {}", e);
    }
    info!("Cache engine state: {:?}", engine);

    info!("Press Ctrl+C to exit");
    shutdown_signal().await;

    if let Some(handle) = refresher {
        handle.abort();
    }
    goods_store.flush()?;
    user_store.flush()?;
    post_store.flush()?;

    info!("Rampart demo shutting down");
    Ok(())
}

async fn run_scenario(services: &Services) -> shared::Result<()> {
    let author = match services.users.get_by_natural_key("demo").await? {
        Some(user) => user,
        None => {
            let mut user = User::new("Demo User", "demo");
            services.users.create(&mut user).await?;
            user
        }
    };
    let author_id = author.require_id()?;
    info!("Author: {:?}", author);

    let mut post = Post::new(author_id, "hello from the rampart demo");
    services.posts.create(&mut post).await?;

    let latest = services
        .posts
        .get_latest_page(author_id, PageRequest::from_page(1, 5)?)
        .await?;
    info!("Latest {} posts of user {}", latest.len(), author_id);
    for post in &latest {
        info!("  #{:?}: {}", post.id, post.content);
    }

    let offer = [("tea", 40, 350), ("coffee", 25, 900), ("cocoa", 10, 600)];
    for (name, stock, price_cents) in offer {
        let mut goods = Goods::new(1, name, stock, price_cents);
        if !services.goods.create(&mut goods).await? {
            info!("Goods '{}' already exists in store 1", name);
        }
    }

    let catalog = GoodsCatalog::new(Arc::clone(&services.goods));
    let ordering = GoodsOrdering::parse(["price,desc", "name"])?;
    let page = catalog
        .page_by_store(1, PageRequest::new(0, 10)?, Some("c"), &ordering)
        .await?;
    info!("Catalog page: {} of {} goods", page.records.len(), page.total);
    for goods in &page.records {
        info!("  {} ({} in stock, {} cents)", goods.name, goods.stock, goods.price_cents);
    }

    // Probing far past the last id is rejected without touching the store
    let bound = services.goods.id_bound().allowed_bound();
    match services.goods.get(bound.saturating_add(1)).await {
        Ok(found) => warn!("Unexpected lookup result beyond bound: {:?}", found),
        Err(e) => info!("Rejected lookup: {}", e),
    }

    // A missing id inside the margin is cached as a miss
    let missing = services.goods.id_bound().max_known_id() + 1;
    services.goods.get(missing).await?;
    info!(
        "Goods {} absent, miss cached: {}",
        missing,
        services.goods.is_cached(missing).await?
    );

    Ok(())
}

// Graceful shutdown handler
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }

    info!("Shutting down gracefully...");
}
