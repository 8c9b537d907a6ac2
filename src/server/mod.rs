//! Development server with on-demand regeneration and live reload
//!
//! Generated pages are served from the public directory. A page whose
//! revalidation interval has passed is regenerated before it is served, and
//! a post that was never pre-rendered is fetched and rendered on first
//! request.

use anyhow::Result;
use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::{Request, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use notify_debouncer_mini::{new_debouncer, notify::RecursiveMode, DebounceEventResult};
use percent_encoding::percent_decode_str;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::cache::{route_key, unix_now, RevalidationCache};
use crate::generator::Generator;
use crate::helpers::{home_route, post_route};
use crate::prismic::ApiError;
use crate::Spacetraveling;

/// Live reload script injected into HTML pages
const LIVE_RELOAD_SCRIPT: &str = r#"
<script>
(function() {
    var ws = new WebSocket('ws://' + location.host + '/__livereload');
    ws.onmessage = function(msg) {
        if (msg.data === 'reload') {
            location.reload();
        }
    };
    ws.onclose = function() {
        console.log('Live reload disconnected. Attempting to reconnect...');
        setTimeout(function() { location.reload(); }, 1000);
    };
})();
</script>
</body>
"#;

/// A page the generator knows how to produce
#[derive(Debug, Clone, PartialEq, Eq)]
enum PageRoute {
    Home(usize),
    Post(String),
}

impl PageRoute {
    fn route(&self) -> String {
        match self {
            PageRoute::Home(page) => home_route(*page),
            PageRoute::Post(uid) => post_route(uid),
        }
    }
}

/// Server state
struct ServerState {
    base_dir: PathBuf,
    public_dir: PathBuf,
    generator: RwLock<Arc<Generator>>,
    /// Held for the whole of a regeneration, so requests regenerate one at a time
    cache: Mutex<RevalidationCache>,
    reload_tx: broadcast::Sender<()>,
    live_reload: bool,
}

impl ServerState {
    fn new(app: &Spacetraveling, generator: Generator, live_reload: bool) -> Self {
        let (reload_tx, _) = broadcast::channel::<()>(16);
        Self {
            base_dir: app.base_dir.clone(),
            public_dir: app.public_dir.clone(),
            generator: RwLock::new(Arc::new(generator)),
            cache: Mutex::new(RevalidationCache::load(&app.base_dir)),
            reload_tx,
            live_reload,
        }
    }

    fn generator(&self) -> Arc<Generator> {
        self.generator
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace_generator(&self, generator: Generator) {
        *self
            .generator
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(generator);
    }
}

/// Start the development server
pub async fn start(app: &Spacetraveling, ip: &str, port: u16, watch: bool, open: bool) -> Result<()> {
    let generator = Generator::new(app, app.content_api()?)?;
    let state = Arc::new(ServerState::new(app, generator, watch));

    // Create router with live reload endpoint
    let router = Router::new()
        .route("/__livereload", get(livereload_handler))
        .fallback(fallback_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    // Parse address - handle "localhost" specially
    let bind_ip = if ip == "localhost" { "127.0.0.1" } else { ip };
    let addr: SocketAddr = format!("{}:{}", bind_ip, port).parse()?;

    let url = format!("http://{}:{}", ip, port);
    println!("Server running at {}", url);
    if watch {
        println!("Live reload enabled. Watching for changes...");
    }
    println!("Press Ctrl+C to stop.");

    if open {
        if let Err(e) = open_browser(&url) {
            tracing::warn!("Failed to open browser: {}", e);
        }
    }

    if watch {
        let app = app.clone();
        tokio::spawn(async move {
            if let Err(e) = watch_and_reload(app, state).await {
                tracing::error!("File watcher error: {}", e);
            }
        });
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

/// Watch the config file and static directory, regenerate and reload
async fn watch_and_reload(app: Spacetraveling, state: Arc<ServerState>) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<DebounceEventResult>();

    // Create debouncer to avoid multiple rapid rebuilds
    let mut debouncer = new_debouncer(Duration::from_millis(500), move |res| {
        let _ = tx.send(res);
    })?;

    let config_path = app.config_path();
    if config_path.exists() {
        debouncer
            .watcher()
            .watch(&config_path, RecursiveMode::NonRecursive)?;
        tracing::debug!("Watching: {:?}", config_path);
    }

    if app.static_dir.exists() {
        debouncer
            .watcher()
            .watch(&app.static_dir, RecursiveMode::Recursive)?;
        tracing::debug!("Watching: {:?}", app.static_dir);
    }

    while let Some(result) = rx.recv().await {
        match result {
            Ok(events) => {
                // Filter out editor and VCS noise
                let relevant: Vec<_> = events
                    .iter()
                    .filter(|e| {
                        let path_str = e.path.to_string_lossy();
                        !path_str.contains(".git")
                            && !path_str.contains(".DS_Store")
                            && !path_str.ends_with('~')
                    })
                    .collect();

                if relevant.is_empty() {
                    continue;
                }

                println!();
                for event in &relevant {
                    println!("📝 File changed: {}", event.path.display());
                }

                println!("\n🔄 Regenerating...");
                match regenerate_all(&app.base_dir, &state).await {
                    Ok(()) => {
                        println!("✅ Regenerated successfully!");
                        let _ = state.reload_tx.send(());
                    }
                    Err(e) => {
                        println!("❌ Generation failed: {:#}", e);
                    }
                }
            }
            Err(e) => {
                tracing::error!("Watch error: {:?}", e);
            }
        }
    }

    Ok(())
}

/// Reload the configuration and regenerate every route
async fn regenerate_all(base_dir: &std::path::Path, state: &ServerState) -> Result<()> {
    let app = Spacetraveling::new(base_dir)?;
    let generator = Generator::new(&app, app.content_api()?)?;

    let mut cache = state.cache.lock().await;
    generator.generate(&mut cache, true).await?;
    cache.save(&state.base_dir)?;
    state.replace_generator(generator);
    Ok(())
}

/// WebSocket handler for live reload
async fn livereload_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    let reload_rx = state.reload_tx.subscribe();
    ws.on_upgrade(move |socket| handle_livereload_socket(socket, reload_rx))
}

/// Handle WebSocket connection for live reload
async fn handle_livereload_socket(mut socket: WebSocket, mut reload_rx: broadcast::Receiver<()>) {
    tracing::debug!("Live reload client connected");

    loop {
        tokio::select! {
            result = reload_rx.recv() => {
                match result {
                    Ok(_) => {
                        if socket.send(Message::Text("reload".to_string())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }
        }
    }

    tracing::debug!("Live reload client disconnected");
}

/// Serves generated pages, regenerating them when needed, and static files
async fn fallback_handler(
    State(state): State<Arc<ServerState>>,
    request: Request<Body>,
) -> Response {
    let route = parse_route(request.uri().path());
    match route {
        Some(route) => serve_page(&state, route).await,
        None => serve_static(&state, request).await,
    }
}

/// Map a request path onto a generated page
fn parse_route(path: &str) -> Option<PageRoute> {
    let trimmed = path.trim_start_matches('/');
    let trimmed = trimmed.strip_suffix("index.html").unwrap_or(trimmed);
    let trimmed = trimmed.trim_end_matches('/');
    if trimmed.is_empty() {
        return Some(PageRoute::Home(1));
    }

    match trimmed.split('/').collect::<Vec<_>>().as_slice() {
        ["page", n] => n.parse().ok().filter(|n| *n >= 1).map(PageRoute::Home),
        ["post", uid] => {
            let uid = percent_decode_str(uid).decode_utf8().ok()?;
            if uid.is_empty() {
                None
            } else {
                Some(PageRoute::Post(uid.into_owned()))
            }
        }
        _ => None,
    }
}

async fn serve_page(state: &ServerState, route: PageRoute) -> Response {
    let generator = state.generator();
    let output_path = generator.output_path(&route.route());

    {
        let mut cache = state.cache.lock().await;
        let needs_generation = match &route {
            // Home pages are regenerated as a set; a missing page past the end is a 404
            PageRoute::Home(_) => generator.home_is_stale(&cache),
            PageRoute::Post(_) => {
                cache.is_stale(&route_key(&route.route()), unix_now()) || !output_path.exists()
            }
        };

        if needs_generation {
            let result = match &route {
                PageRoute::Home(_) => generator.generate_home(&mut cache).await.map(|_| ()),
                PageRoute::Post(uid) => generator.generate_post(uid, &mut cache).await.map(|_| ()),
            };

            match result {
                Ok(()) => {
                    if let Err(e) = cache.save(&state.base_dir) {
                        tracing::warn!("Failed to save cache: {}", e);
                    }
                }
                Err(e) if is_not_found(&e) => {
                    tracing::debug!("No document for {:?}", route);
                    if let PageRoute::Post(uid) = &route {
                        if let Err(e) = generator.remove_post(uid, &mut cache) {
                            tracing::warn!("Failed to remove post page: {}", e);
                        }
                    }
                    return not_found(&generator);
                }
                Err(e) if output_path.exists() => {
                    tracing::warn!("Serving stale {:?}: {:#}", route, e);
                }
                Err(e) => {
                    tracing::error!("Failed to generate {:?}: {:#}", route, e);
                    return (StatusCode::BAD_GATEWAY, "Failed to load content").into_response();
                }
            }
        }
    }

    match tokio::fs::read_to_string(&output_path).await {
        Ok(html) if state.live_reload => Html(inject_live_reload(&html)).into_response(),
        Ok(html) => Html(html).into_response(),
        Err(_) => not_found(&generator),
    }
}

fn is_not_found(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<ApiError>(),
        Some(ApiError::NotFound { .. })
    )
}

fn not_found(generator: &Generator) -> Response {
    match generator.render_not_found() {
        Ok(html) => (StatusCode::NOT_FOUND, Html(html)).into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

async fn serve_static(state: &ServerState, request: Request<Body>) -> Response {
    let mut service = ServeDir::new(&state.public_dir).append_index_html_on_directories(true);
    match service.try_call(request).await {
        Ok(response) if response.status() == StatusCode::NOT_FOUND => {
            not_found(&state.generator())
        }
        Ok(response) => response.into_response(),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Server error").into_response(),
    }
}

/// Inject live reload script into HTML content
fn inject_live_reload(html: &str) -> String {
    if html.contains("</body>") {
        html.replace("</body>", LIVE_RELOAD_SCRIPT)
    } else {
        format!("{}{}", html, LIVE_RELOAD_SCRIPT)
    }
}

/// Open a URL in the default browser
fn open_browser(url: &str) -> Result<()> {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg(url).spawn()?;
    }

    #[cfg(target_os = "linux")]
    {
        std::process::Command::new("xdg-open").arg(url).spawn()?;
    }

    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("cmd")
            .args(["/c", "start", url])
            .spawn()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteConfig;
    use crate::prismic::fake::FakeApi;
    use std::fs;
    use tempfile::TempDir;

    fn state(dir: &TempDir, api: FakeApi) -> ServerState {
        let app = Spacetraveling::with_config(dir.path().to_path_buf(), SiteConfig::default());
        let generator = Generator::new(&app, Arc::new(api)).unwrap();
        ServerState::new(&app, generator, false)
    }

    async fn body(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_parse_route() {
        assert_eq!(parse_route("/"), Some(PageRoute::Home(1)));
        assert_eq!(parse_route("/index.html"), Some(PageRoute::Home(1)));
        assert_eq!(parse_route("/page/3/"), Some(PageRoute::Home(3)));
        assert_eq!(parse_route("/page/0/"), None);
        assert_eq!(
            parse_route("/post/como-utilizar-hooks/"),
            Some(PageRoute::Post("como-utilizar-hooks".to_string()))
        );
        assert_eq!(
            parse_route("/post/a%20b"),
            Some(PageRoute::Post("a b".to_string()))
        );
        assert_eq!(parse_route("/css/style.css"), None);
        assert_eq!(parse_route("/post/a/b/"), None);
    }

    #[test]
    fn test_inject_live_reload() {
        let html = inject_live_reload("<html><body>hi</body></html>");
        assert!(html.contains("__livereload"));
        assert!(html.ends_with("</html>"));
    }

    #[tokio::test]
    async fn test_post_generated_on_first_request() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir, FakeApi::with_posts(&["a", "b"]));

        let response = serve_page(&state, PageRoute::Post("b".to_string())).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body(response).await.contains("Post b"));
        assert!(dir.path().join("public/post/b/index.html").exists());
        assert!(state.cache.lock().await.get("/post/b/").is_some());
    }

    #[tokio::test]
    async fn test_unknown_post_is_404() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir, FakeApi::with_posts(&["a"]));

        let response = serve_page(&state, PageRoute::Post("missing".to_string())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body(response).await.contains("Post não encontrado"));
    }

    #[tokio::test]
    async fn test_stale_post_is_regenerated() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir, FakeApi::with_posts(&["a"]));
        let output = dir.path().join("public/post/a/index.html");
        fs::create_dir_all(output.parent().unwrap()).unwrap();
        fs::write(&output, "<html><body>old</body></html>").unwrap();

        state
            .cache
            .lock()
            .await
            .record("/post/a/", "post/a/index.html", unix_now(), Duration::from_secs(3600));
        let response = serve_page(&state, PageRoute::Post("a".to_string())).await;
        assert!(body(response).await.contains("old"));

        state
            .cache
            .lock()
            .await
            .record("/post/a/", "post/a/index.html", 0, Duration::from_secs(3600));
        let response = serve_page(&state, PageRoute::Post("a".to_string())).await;
        assert!(body(response).await.contains("Post a"));
    }

    #[tokio::test]
    async fn test_home_pages_beyond_listing_are_404() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir, FakeApi::with_posts(&["a", "b"]));

        let response = serve_page(&state, PageRoute::Home(1)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body(response).await.contains("Carregar mais posts"));

        let response = serve_page(&state, PageRoute::Home(2)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = serve_page(&state, PageRoute::Home(7)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
