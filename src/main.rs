use std::{sync::Arc, time::Duration};

use anyhow::Context;
use clap::{Parser, Subcommand};
use jiff::civil::Date;
use movieviewer::{
    cache::CacheStore,
    config::Config,
    db,
    models::{Category, Movie, MovieReview, SortOption},
    network::NetworkMonitor,
    prefs::FavoritesStore,
    repository::MovieRepository,
    screens::{DetailScreen, FavoritesScreen, HomeScreen, ReviewsScreen, SearchScreen},
    session::Session,
    tmdb::TmdbClient,
    users::{Registration, UserStore},
};
use tokio::sync::watch;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Serve everything from the local cache without touching the network
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List movies in a category
    List {
        /// popular, top_rated, now_playing or upcoming
        #[arg(short, long, default_value = "popular")]
        category: Category,

        /// Number of pages to load
        #[arg(short, long, default_value_t = 1)]
        pages: u32,
    },
    /// Show one movie with its reviews
    Show { id: i32 },
    /// Show all reviews for a movie
    Reviews { id: i32 },
    /// Search the catalog
    Search { query: String },
    /// List favorite movies
    Favorites {
        /// title, title-desc, rating, rating-asc, release or release-asc
        #[arg(short, long, default_value = "title")]
        sort: SortOption,
    },
    /// Toggle a movie in the favorites
    Favorite { id: i32 },
    /// Create a local account and log in
    Register {
        login_id: String,

        #[arg(short, long)]
        name: String,

        /// Date of birth (YYYY-MM-DD)
        #[arg(short, long)]
        birth_date: Date,

        #[arg(long, env = "MOVIEVIEWER_PASSWORD", hide_env_values = true)]
        password: String,

        #[arg(long)]
        confirm_password: String,

        #[arg(long)]
        picture: Option<String>,
    },
    /// Log in to a local account
    Login {
        login_id: String,

        #[arg(long, env = "MOVIEVIEWER_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget the logged-in account
    Logout,
    /// Print the logged-in account
    Whoami,
}

struct App {
    config: Config,
    tmdb: Arc<TmdbClient>,
    repo: MovieRepository,
    favorites: FavoritesStore,
    session: Session,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,movieviewer=debug,sqlx=warn".to_string()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let http = reqwest::Client::builder()
        .user_agent("movieviewer/0.1")
        .timeout(config.http_timeout)
        .build()?;

    let db = db::connect_and_migrate(&config.database_url).await?;
    let cache = CacheStore::new(db.clone(), config.cache_ttl_days);

    let tmdb = Arc::new(TmdbClient::new(
        http,
        config.tmdb_api_key.clone(),
        config.tmdb_access_token.clone(),
        config.tmdb_base_url.clone(),
        config.tmdb_rps,
    ));

    let repo = MovieRepository::new(tmdb.clone(), cache);
    let favorites = FavoritesStore::open(&config.prefs_dir).await?;
    let session = Session::open(UserStore::new(db), &config.prefs_dir).await?;

    let app = App { config, tmdb, repo, favorites, session };
    app.run(cli).await
}

impl App {
    async fn run(self, cli: Cli) -> anyhow::Result<()> {
        match cli.command {
            Commands::List { category, pages } => {
                let network = self.network(cli.offline).await;
                self.list(network, category, pages).await
            },
            Commands::Show { id } => {
                let network = self.network(cli.offline).await;
                self.show(network, id).await
            },
            Commands::Reviews { id } => {
                let network = self.network(cli.offline).await;
                let screen = ReviewsScreen::new(self.repo.clone(), network, id);
                let state = settle(&mut screen.subscribe(), |s| !s.is_loading).await?;

                println!("{}", state.movie_title.as_deref().unwrap_or("Reviews"));
                print_error(state.error.as_deref());
                print_reviews(&state.reviews);
                Ok(())
            },
            Commands::Search { query } => {
                let network = self.network(cli.offline).await;
                let screen = SearchScreen::new(
                    self.repo.clone(),
                    self.favorites.clone(),
                    network,
                    self.config.search_debounce,
                );
                screen.update_query(query);
                screen.search();
                let state =
                    settle(&mut screen.subscribe(), |s| s.has_searched && !s.is_loading).await?;

                print_error(state.error.as_deref());
                for movie in &state.results {
                    print_movie(movie, state.favorite_ids.contains(&movie.id));
                }
                Ok(())
            },
            Commands::Favorites { sort } => {
                let network = self.network(cli.offline).await;
                let screen =
                    FavoritesScreen::new(self.repo.clone(), self.favorites.clone(), network, sort);
                let state = settle(&mut screen.subscribe(), |s| !s.is_loading).await?;

                print_error(state.error.as_deref());
                if state.movies.is_empty() {
                    println!("No favorites yet");
                }
                for movie in &state.movies {
                    print_movie(movie, true);
                }
                Ok(())
            },
            Commands::Favorite { id } => {
                if self.favorites.toggle(id).await? {
                    println!("Added {id} to favorites");
                } else {
                    println!("Removed {id} from favorites");
                }
                Ok(())
            },
            Commands::Register {
                login_id,
                name,
                birth_date,
                password,
                confirm_password,
                picture,
            } => {
                let form = Registration {
                    login_id,
                    password,
                    confirm_password,
                    preferred_name: name,
                    birth_date: Some(birth_date),
                    profile_picture_path: picture,
                };
                let user = self.session.users().register(&form).await?;
                self.session.remember(&user).await?;
                println!("Welcome, {}", user.preferred_name);
                Ok(())
            },
            Commands::Login { login_id, password } => {
                let user = self.session.login(&login_id, &password).await?;
                println!("Welcome back, {}", user.preferred_name);
                Ok(())
            },
            Commands::Logout => {
                self.session.logout().await?;
                println!("Logged out");
                Ok(())
            },
            Commands::Whoami => {
                match self.session.restore().await? {
                    Some(user) => println!(
                        "{} ({}), born {}",
                        user.preferred_name, user.login_id, user.birth_date
                    ),
                    None => println!("Not logged in"),
                }
                Ok(())
            },
        }
    }

    async fn network(&self, offline: bool) -> NetworkMonitor {
        if offline {
            info!("offline mode, serving cache only");
            return NetworkMonitor::new(false);
        }
        let network = NetworkMonitor::default();
        network.probe(self.tmdb.as_ref()).await;
        network
    }

    async fn list(&self, network: NetworkMonitor, category: Category, pages: u32) -> anyhow::Result<()> {
        let screen = HomeScreen::new(self.repo.clone(), self.favorites.clone(), network, category);
        let mut rx = screen.subscribe();
        let mut state =
            settle(&mut rx, |s| !s.is_loading && (s.page >= 1 || s.error.is_some())).await?;

        while state.page < pages && state.can_load_more && state.error.is_none() {
            let target = state.page + 1;
            screen.load_next_page();
            state = settle(&mut rx, |s| {
                !s.is_loading_more && (s.page >= target || s.error.is_some() || !s.can_load_more)
            })
            .await?;
        }

        println!("{} ({} movies)", category.label(), state.movies.len());
        print_error(state.error.as_deref());
        for movie in &state.movies {
            print_movie(movie, state.favorite_ids.contains(&movie.id));
        }
        Ok(())
    }

    async fn show(&self, network: NetworkMonitor, id: i32) -> anyhow::Result<()> {
        let screen = DetailScreen::new(self.repo.clone(), self.favorites.clone(), network, id);
        let state = settle(&mut screen.subscribe(), |s| {
            !s.is_loading_detail && !s.is_loading_reviews
        })
        .await?;

        print_error(state.error.as_deref());
        let Some(detail) = state.detail else {
            return Ok(());
        };

        let star = if state.is_favorite { " *" } else { "" };
        println!("{} ({}){star}", detail.title, detail.release_date);
        if let Some(tagline) = &detail.tagline {
            println!("  \"{tagline}\"");
        }
        let genres: Vec<&str> = detail.genres.iter().map(|g| g.name.as_str()).collect();
        println!("  {}", genres.join(", "));
        if let Some(runtime) = detail.runtime {
            println!("  {runtime} min");
        }
        println!("  rating {:.1} ({} votes)", detail.vote_average, detail.vote_count);
        if let Some(url) = Movie::from(&detail).poster_url() {
            println!("  {url}");
        }
        println!();
        println!("{}", detail.overview);
        println!();

        print_error(state.reviews_error.as_deref());
        print_reviews(&state.reviews);
        Ok(())
    }
}

async fn settle<T: Clone>(
    rx: &mut watch::Receiver<T>,
    pred: impl FnMut(&T) -> bool,
) -> anyhow::Result<T> {
    let state = tokio::time::timeout(Duration::from_secs(120), rx.wait_for(pred))
        .await
        .context("timed out waiting for results")??;
    Ok(state.clone())
}

fn print_error(error: Option<&str>) {
    if let Some(error) = error {
        eprintln!("! {error}");
    }
}

fn print_movie(movie: &Movie, favorite: bool) {
    let year = movie.release_year().map(|y| y.to_string()).unwrap_or_else(|| "----".to_string());
    let star = if favorite { "*" } else { " " };
    println!("{star} {:>8}  {year}  {:>4.1}  {}", movie.id, movie.vote_average, movie.title);
}

fn print_reviews(reviews: &[MovieReview]) {
    for review in reviews {
        let rating = review.author_rating.map(|r| format!(" ({r:.0}/10)")).unwrap_or_default();
        println!("-- {}{rating}, {}", review.author, review.created_at.get(..10).unwrap_or(""));
        println!("{}", review.content.trim());
        println!();
    }
}
