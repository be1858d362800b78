//! End-to-end display and fetch against an in-memory editor

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use parking_lot::RwLock;
use tempfile::TempDir;
use tower::ServiceExt;

use mathml_render_cache::config::CacheConfig;
use mathml_render_cache::error::{RenderError, SerializationError};
use mathml_render_cache::{
    routes, AppState, Config, DocumentController, DocumentSession, EquationService, Renderer,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("mathml_render_cache=debug")
        .with_test_writer()
        .try_init();
}

/// Equation element whose markup the user can edit
struct Equation {
    markup: RwLock<String>,
}

impl Equation {
    fn new(markup: &str) -> Arc<Self> {
        Arc::new(Self {
            markup: RwLock::new(markup.to_string()),
        })
    }

    fn edit(&self, markup: &str) {
        *self.markup.write() = markup.to_string();
    }
}

struct Editor;

impl DocumentController for Editor {
    type Node = Equation;

    fn serialize_subtree(&self, node: &Equation) -> Result<String, SerializationError> {
        Ok(node.markup.read().clone())
    }

    fn current_doctype(&self) -> Option<String> {
        Some("<!DOCTYPE topic [<!ENTITY alpha \"&#945;\">]>".to_string())
    }

    fn system_id(&self) -> String {
        "file:/work/topic.dita".to_string()
    }
}

#[derive(Default)]
struct Rasterizer {
    calls: AtomicUsize,
}

impl Renderer for Rasterizer {
    fn render(&self, xml: &str) -> Result<Vec<u8>, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let width = 10 + xml.len() as u32 % 50;
        let mut bytes = Vec::new();
        image::DynamicImage::new_luma8(width, 16)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .map_err(|e| RenderError::new(e.to_string()))?;
        Ok(bytes)
    }
}

fn setup(dir: &TempDir) -> (AppState<Editor>, Arc<Rasterizer>) {
    let config = Config {
        cache: CacheConfig {
            dir: dir.path().to_path_buf(),
            memory_entries: 16,
        },
        ..Config::default()
    };
    let rasterizer = Arc::new(Rasterizer::default());
    let service = Arc::new(EquationService::new(&config, rasterizer.clone()));
    (AppState::with_service(config, service), rasterizer)
}

fn open(state: &AppState<Editor>) -> Arc<DocumentSession<Editor>> {
    Arc::new(DocumentSession::new(Arc::new(Editor), &state.config().snapshot))
}

/// Pull the `src` attribute out of a rendered `<img>` and turn it into a request path
fn request_path(html: &str) -> String {
    let start = html.find("src=\"").unwrap() + 5;
    let end = start + html[start..].find('"').unwrap();
    let src = html[start..end].replace("&amp;", "&");
    src.trim_start_matches("../plugins-dispatcher").to_string()
}

async fn fetch(state: &AppState<Editor>, path: &str) -> (StatusCode, Vec<u8>) {
    let response = routes::router()
        .with_state(state.clone())
        .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_displayed_equation_is_fetchable() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let (state, rasterizer) = setup(&dir);
    let document = open(&state);
    let equation = Equation::new("<math><mi>&alpha;</mi></math>");

    let html = state.service().display_html(&document, &equation);
    assert!(html.starts_with("<img "));
    assert!(html.contains("class=\"mathml-image\""));

    let (status, body) = fetch(&state, &request_path(&html)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with(b"\x89PNG"));

    // Display already rendered it
    assert_eq!(rasterizer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_fetch_sees_frozen_markup_not_later_edits() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let (state, _) = setup(&dir);
    let document = open(&state);
    let equation = Equation::new("<math><mn>1</mn></math>");

    let token = state.service().open_document(&document).unwrap();
    let handle = document.equations().freeze(&equation).unwrap();
    equation.edit("<math><mn>2</mn></math>");

    assert_eq!(
        document.equations().lookup(handle).as_deref(),
        Some("<math><mn>1</mn></math>")
    );

    let path = format!("/mathml?docId={}&elemId={}", token, handle);
    let (status, _) = fetch(&state, &path).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_closed_document_urls_stop_resolving() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let (state, _) = setup(&dir);
    let document = open(&state);
    let equation = Equation::new("<math><mi>y</mi></math>");

    let token = state.service().open_document(&document).unwrap();
    let handle = document.equations().freeze(&equation).unwrap();
    let path = format!("/mathml?docId={}&elemId={}", token, handle);

    assert_eq!(fetch(&state, &path).await.0, StatusCode::OK);
    drop(document);
    assert_eq!(fetch(&state, &path).await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_deleted_equations_are_compacted_away() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let (state, _) = setup(&dir);
    let document = open(&state);

    for i in 0..100 {
        let equation = Equation::new(&format!("<math><mn>{}</mn></math>", i));
        document.equations().freeze(&equation).unwrap();
        assert!(document.equations().len() <= 8);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fetches_agree() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let (state, rasterizer) = setup(&dir);
    let document = open(&state);
    let equation = Equation::new("<math><mfrac><mn>1</mn><mn>2</mn></mfrac></math>");

    let token = state.service().open_document(&document).unwrap();
    let handle = document.equations().freeze(&equation).unwrap();
    let path = format!("/mathml?docId={}&elemId={}", token, handle);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let state = state.clone();
        let path = path.clone();
        tasks.push(tokio::spawn(async move { fetch(&state, &path).await }));
    }

    let mut bodies = Vec::new();
    for task in tasks {
        let (status, body) = task.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        bodies.push(body);
    }
    assert!(bodies.windows(2).all(|w| w[0] == w[1]));

    // A second fetch is served from the cache
    let calls = rasterizer.calls.load(Ordering::SeqCst);
    assert!(calls >= 1);
    fetch(&state, &path).await;
    assert_eq!(rasterizer.calls.load(Ordering::SeqCst), calls);
}
