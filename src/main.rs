use std::{net::SocketAddr, process, sync::Arc, time::Duration};

use quaderno::{
    application::{
        error::AppError,
        feed::FeedService,
        posts::PostService,
        repos::{
            CommentsRepo, CreateGroupParams, CreateUserParams, GroupsRepo, HealthRepo, PostsRepo,
            RepoError, SessionsRepo, UsersRepo,
        },
        sessions::{self, SessionService},
    },
    cache::{CacheConfig, CacheState},
    config,
    domain::slug::generate_unique_slug,
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, HttpState, LoginRateLimiter},
        telemetry,
        uploads::MediaStorage,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
        config::Command::Group(args) => run_group(settings, args).await,
        config::Command::Post(args) => run_post(settings, args).await,
        config::Command::User(args) => run_user(settings, args).await,
    }
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;

    let posts_repo: Arc<dyn PostsRepo> = repositories.clone();
    let groups_repo: Arc<dyn GroupsRepo> = repositories.clone();
    let users_repo: Arc<dyn UsersRepo> = repositories.clone();
    let comments_repo: Arc<dyn CommentsRepo> = repositories.clone();
    let sessions_repo: Arc<dyn SessionsRepo> = repositories.clone();
    let health_repo: Arc<dyn HealthRepo> = repositories.clone();

    let media = Arc::new(
        MediaStorage::new(settings.media.root.clone())
            .map_err(|err| AppError::from(InfraError::Io(err)))?,
    );

    let feed = Arc::new(FeedService::new(
        posts_repo.clone(),
        groups_repo.clone(),
        users_repo.clone(),
        settings.site.page_size,
    ));
    let posts = Arc::new(PostService::new(
        posts_repo,
        groups_repo,
        comments_repo,
        media.clone(),
    ));
    let session_service = Arc::new(SessionService::new(users_repo, sessions_repo));

    let cache_config = CacheConfig::from(&settings.cache);
    let cache = if cache_config.enabled {
        Some(CacheState::new(cache_config))
    } else {
        None
    };

    let state = HttpState {
        feed,
        posts,
        sessions: session_service,
        health: health_repo,
        media,
        login_limiter: Arc::new(LoginRateLimiter::new(&settings.login_rate_limit)),
        cache,
        site_title: settings.site.title.clone(),
    };
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.listen_addr)
        .await
        .map_err(|err| AppError::from(InfraError::Io(err)))?;

    info!(
        target = "quaderno::serve",
        addr = %settings.server.listen_addr,
        "listening"
    );

    // Connection info feeds the per-client login rate limiter.
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(settings.server.graceful_shutdown))
    .await
    .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal(grace: Duration) {
    let _ = tokio::signal::ctrl_c().await;
    info!(
        target = "quaderno::serve",
        grace_seconds = grace.as_secs(),
        "shutdown signal received, draining connections"
    );
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    init_repositories(&settings).await?;
    info!(target = "quaderno::migrate", "migrations applied");
    Ok(())
}

async fn run_group(settings: config::Settings, args: config::GroupArgs) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;

    match args.command {
        config::GroupCommand::Create(cmd) => {
            let slug = match cmd.slug {
                Some(slug) => slug,
                None => {
                    // Derived slugs get a numeric suffix when the obvious
                    // one is already taken; explicit --slug stays verbatim
                    // and surfaces the conflict instead.
                    let taken: Vec<String> = repositories
                        .list_groups()
                        .await
                        .map_err(repo_to_app)?
                        .into_iter()
                        .map(|group| group.slug)
                        .collect();
                    generate_unique_slug(&cmd.title, |candidate| {
                        !taken.iter().any(|slug| slug == candidate)
                    })
                    .map_err(|err| AppError::validation(err.to_string()))?
                }
            };
            let record = repositories
                .create_group(CreateGroupParams {
                    title: cmd.title,
                    slug,
                    description: cmd.description,
                })
                .await
                .map_err(repo_to_app)?;
            info!(
                target = "quaderno::admin",
                group = %record.slug,
                id = %record.id,
                "group created"
            );
            println!("{}  {}", record.id, record.slug);
        }
        config::GroupCommand::List(_) => {
            for group in repositories.list_groups().await.map_err(repo_to_app)? {
                println!("{}  {}  {}", group.id, group.slug, group.title);
            }
        }
        config::GroupCommand::Remove(cmd) => {
            repositories
                .delete_group(&cmd.slug)
                .await
                .map_err(repo_to_app)?;
            info!(target = "quaderno::admin", group = %cmd.slug, "group removed");
            println!("removed group `{}`", cmd.slug);
        }
    }

    Ok(())
}

async fn run_post(settings: config::Settings, args: config::PostAdminArgs) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;

    match args.command {
        config::PostCommand::Remove(cmd) => {
            repositories.delete_post(cmd.id).await.map_err(repo_to_app)?;
            info!(target = "quaderno::admin", post = %cmd.id, "post removed");
            println!("removed post `{}`", cmd.id);
        }
    }

    Ok(())
}

async fn run_user(settings: config::Settings, args: config::UserArgs) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;

    match args.command {
        config::UserCommand::Create(cmd) => {
            let password_hash = sessions::hash_password(&cmd.password)
                .map_err(|_| AppError::unexpected("failed to hash password"))?;
            let user = repositories
                .create_user(CreateUserParams {
                    username: cmd.username.trim().to_string(),
                    password_hash,
                })
                .await
                .map_err(repo_to_app)?;
            info!(target = "quaderno::admin", user = %user.username, "user created");
            println!("{}  {}", user.id, user.username);
        }
    }

    Ok(())
}

fn repo_to_app(err: RepoError) -> AppError {
    match err {
        RepoError::NotFound => AppError::NotFound,
        RepoError::Duplicate { constraint } => {
            AppError::validation(format!("duplicate record violates `{constraint}`"))
        }
        RepoError::InvalidInput { message } => AppError::validation(message),
        other => AppError::unexpected(other.to_string()),
    }
}
