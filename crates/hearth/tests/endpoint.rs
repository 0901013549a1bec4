//! Integration tests for the plain endpoint path: one pull-style application
//! served against an in-memory host request/response pair.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::{Arc, Once};

use bytes::Bytes;
use hearth::host::memory::{MemoryLog, MemoryRequest, MemoryResponse, ResponseEvent};
use hearth::{
    Application, Body, BridgeError, ConfigurationError, Endpoint, Environ, HeaderMap, HearthConfig,
    HostLog, ProtocolError, Registry, StartResponse, keys, load_config,
};

// ── Tracing setup ────────────────────────────────────────────────

static TRACING_INIT: Once = Once::new();

fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

// ── Applications ─────────────────────────────────────────────────

fn text_plain() -> HeaderMap {
    [("Content-Type", "text/plain")].into_iter().collect()
}

fn hello(_env: Environ, start: StartResponse) -> anyhow::Result<Body> {
    start.start("200 OK", text_plain())?;
    Ok(Body::once("Hello, World!"))
}

fn incremental(_env: Environ, start: StartResponse) -> anyhow::Result<Body> {
    start.start("200 OK", text_plain())?;
    Ok(Body::from_chunks(["Hello", ", ", "World!"]))
}

fn legacy_writer(_env: Environ, start: StartResponse) -> anyhow::Result<Body> {
    let write = start.start("200 OK", text_plain())?;
    write.write(b"written ")?;
    Ok(Body::once("then yielded"))
}

fn fails_early(_env: Environ, _start: StartResponse) -> anyhow::Result<Body> {
    anyhow::bail!("database unavailable")
}

fn fails_midway(_env: Environ, start: StartResponse) -> anyhow::Result<Body> {
    start.start("200 OK", text_plain())?;
    let mut step = 0;
    Ok(Body::from_fn(move || {
        step += 1;
        match step {
            1 => Some(Ok(Bytes::from("partial"))),
            _ => Some(Err(anyhow::anyhow!("render failed"))),
        }
    }))
}

fn recovers_with_retry(_env: Environ, start: StartResponse) -> anyhow::Result<Body> {
    start.start("200 OK", text_plain())?;
    let failure = anyhow::anyhow!("template missing");
    start.restart("503 Service Unavailable", HeaderMap::new(), failure)?;
    Ok(Body::once("try again later"))
}

fn echo(env: Environ, start: StartResponse) -> anyhow::Result<Body> {
    let method = env.get_str(keys::REQUEST_METHOD).unwrap_or_default();
    let length = env
        .get_str(keys::CONTENT_LENGTH)
        .unwrap_or_else(|| "unknown".to_string());
    let body = env.input().map(|i| i.read_all()).transpose()?.unwrap_or_default();
    if let Some(errors) = env.errors() {
        errors.write(&format!("echoing {} bytes", body.len()));
    }
    start.start("200 OK", text_plain())?;
    Ok(Body::from_chunks([
        Bytes::from(format!("{method} {length} ")),
        body,
    ]))
}

fn flags(env: Environ, start: StartResponse) -> anyhow::Result<Body> {
    let flag = |key| {
        env.get(key)
            .and_then(|v| v.as_bool())
            .map(|b| b.to_string())
            .unwrap_or_default()
    };
    let line = format!(
        "{} {} {}",
        flag(keys::MULTITHREAD),
        flag(keys::MULTIPROCESS),
        flag(keys::RUN_ONCE)
    );
    start.start("200 OK", text_plain())?;
    Ok(Body::once(line))
}

fn registry() -> Registry {
    Registry::builder()
        .endpoint("demo.hello", hello)
        .endpoint("demo.incremental", incremental)
        .endpoint("demo.legacy", legacy_writer)
        .endpoint("demo.fails_early", fails_early)
        .endpoint("demo.fails_midway", fails_midway)
        .endpoint("demo.retry", recovers_with_retry)
        .endpoint("demo.echo", echo)
        .endpoint("demo.flags", flags)
        .build()
        .expect("registry should build")
}

fn endpoint(name: &str) -> Endpoint {
    Endpoint::init(&HearthConfig::scaffold(name), &registry(), None).expect("endpoint should init")
}

async fn serve(
    endpoint: &Endpoint,
    request: MemoryRequest,
) -> (MemoryResponse, Result<(), BridgeError>) {
    let response = MemoryResponse::new();
    let outcome = endpoint
        .service(request.into_host(), response.clone().into_host())
        .await;
    (response, outcome)
}

// ── Happy paths ──────────────────────────────────────────────────

#[tokio::test]
async fn hello_world() {
    init_tracing();
    let endpoint = endpoint("demo.hello");
    assert_eq!(endpoint.name(), "demo.hello");
    let (resp, outcome) = serve(&endpoint, MemoryRequest::new()).await;
    outcome.unwrap();
    assert_eq!(resp.status(), Some((200, "OK".to_string())));
    assert_eq!(resp.header("Content-Type").as_deref(), Some("text/plain"));
    assert_eq!(resp.body(), "Hello, World!");
}

#[tokio::test]
async fn incremental_chunks_are_flushed_individually() {
    init_tracing();
    let (resp, outcome) = serve(&endpoint("demo.incremental"), MemoryRequest::new()).await;
    outcome.unwrap();

    assert_eq!(resp.next_chunk(), Some(Bytes::from("Hello")));
    assert_eq!(resp.next_chunk(), Some(Bytes::from(", ")));
    assert_eq!(resp.next_chunk(), Some(Bytes::from("World!")));
    assert_eq!(resp.next_chunk(), None);

    let flushes = resp
        .events()
        .iter()
        .filter(|e| matches!(e, ResponseEvent::Flush))
        .count();
    assert_eq!(flushes, 3);
}

#[tokio::test]
async fn legacy_writer_and_body_interleave() {
    let (resp, outcome) = serve(&endpoint("demo.legacy"), MemoryRequest::new()).await;
    outcome.unwrap();
    assert_eq!(resp.body(), "written then yielded");
    assert_eq!(resp.status_calls(), 1);
}

#[tokio::test]
async fn retry_before_commit_replaces_status() {
    let (resp, outcome) = serve(&endpoint("demo.retry"), MemoryRequest::new()).await;
    outcome.unwrap();
    assert_eq!(resp.status(), Some((503, "Service Unavailable".to_string())));
    assert!(resp.headers().is_empty());
    assert_eq!(resp.body(), "try again later");
}

#[tokio::test]
async fn request_metadata_and_body_reach_the_application() {
    let log = MemoryLog::new();
    let host_log: Arc<dyn HostLog> = Arc::new(log.clone());
    let endpoint = Endpoint::init(
        &HearthConfig::scaffold("demo.echo"),
        &registry(),
        Some(host_log),
    )
    .unwrap();

    let request = MemoryRequest::new()
        .with_method(Some("POST".to_string()))
        .with_body("ping");
    let (resp, outcome) = serve(&endpoint, request).await;
    outcome.unwrap();

    assert_eq!(resp.body(), "POST 4 ping");
    assert_eq!(log.messages(), vec!["echoing 4 bytes"]);
}

#[tokio::test]
async fn unknown_content_length_is_absent() {
    let (resp, outcome) = serve(&endpoint("demo.echo"), MemoryRequest::new()).await;
    outcome.unwrap();
    assert_eq!(resp.body(), "GET unknown ");
}

#[tokio::test]
async fn configured_flags_are_published() {
    let config = HearthConfig::from_toml_str(
        r#"
[handler]
name = "demo.flags"

[environ]
multithread = false
multiprocess = true
run_once = true
"#,
    )
    .unwrap();
    let endpoint = Endpoint::init(&config, &registry(), None).unwrap();
    let (resp, outcome) = serve(&endpoint, MemoryRequest::new()).await;
    outcome.unwrap();
    assert_eq!(resp.body(), "false true true");
}

// ── Failures ─────────────────────────────────────────────────────

#[tokio::test]
async fn failure_before_commit_sends_500() {
    init_tracing();
    let (resp, outcome) = serve(&endpoint("demo.fails_early"), MemoryRequest::new()).await;

    match outcome.unwrap_err() {
        BridgeError::Application(err) => assert_eq!(err.to_string(), "database unavailable"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(resp.status(), Some((500, "Internal Server Error".to_string())));
    assert_eq!(resp.body(), "Internal Server Error");
}

#[tokio::test]
async fn failure_after_commit_keeps_committed_head() {
    init_tracing();
    let (resp, outcome) = serve(&endpoint("demo.fails_midway"), MemoryRequest::new()).await;

    assert!(matches!(outcome, Err(BridgeError::Application(_))));
    assert_eq!(resp.status_calls(), 1);
    assert_eq!(resp.status(), Some((200, "OK".to_string())));
    assert_eq!(resp.body(), "partial");
}

#[tokio::test]
async fn non_latin1_header_fails_the_request() {
    let app = |_env: Environ, start: StartResponse| -> anyhow::Result<Body> {
        let headers: HeaderMap = [("X-Greeting", "\u{4f60}\u{597d}")].into_iter().collect();
        start.start("200 OK", headers)?;
        Ok(Body::once("unreachable"))
    };
    let registry = Registry::builder().endpoint("demo.unicode", app).build().unwrap();
    let config = HearthConfig::scaffold("demo.unicode");
    let endpoint = Endpoint::init(&config, &registry, None).unwrap();
    let (resp, outcome) = serve(&endpoint, MemoryRequest::new()).await;

    assert!(matches!(
        outcome,
        Err(BridgeError::Protocol(ProtocolError::NonLatin1Header { .. }))
    ));
    assert_eq!(resp.status(), Some((500, "Internal Server Error".to_string())));
}

#[tokio::test]
async fn body_is_released_when_the_write_fails() {
    let closed = Rc::new(Cell::new(0));
    let hook = closed.clone();
    let app = move |_env: Environ, _start: StartResponse| -> anyhow::Result<Body> {
        let hook = hook.clone();
        Ok(Body::once("no status").on_close(move || hook.set(hook.get() + 1)))
    };

    let response = MemoryResponse::new();
    let commit = hearth::ResponseCommit::shared(response.clone().into_host());
    let environ = Environ::new(MemoryRequest::new().into_host(), Default::default());
    let err = hearth::HandlerInvoker::new(commit)
        .run(&app, environ)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BridgeError::Protocol(ProtocolError::WriteBeforeStatus)
    ));
    assert_eq!(closed.get(), 1);
}

// ── Setup errors ─────────────────────────────────────────────────

#[test]
fn init_rejects_bad_identifiers() {
    let registry = registry();
    let malformed = Endpoint::init(&HearthConfig::scaffold("hello"), &registry, None);
    assert!(matches!(malformed, Err(ConfigurationError::MalformedHandler(_))));

    let unknown = Endpoint::init(&HearthConfig::scaffold("demo.nothing"), &registry, None);
    assert!(matches!(unknown, Err(ConfigurationError::UnknownHandler(_))));
}

#[test]
fn init_rejects_middleware_as_endpoint() {
    let registry = Registry::builder()
        .middleware(
            "demo.passthrough",
            |downstream: Rc<dyn Application>| -> Rc<dyn Application> { downstream },
        )
        .build()
        .unwrap();
    let result = Endpoint::init(&HearthConfig::scaffold("demo.passthrough"), &registry, None);
    assert!(matches!(
        result,
        Err(ConfigurationError::WrongHandlerKind { expected: "endpoint", .. })
    ));
}

#[test]
fn load_config_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hearth.toml");
    std::fs::write(&path, "[handler]\nname = \"demo.hello\"\n").unwrap();
    assert_eq!(load_config(&path).unwrap().handler.name, "demo.hello");

    std::fs::write(&path, "[handler\n").unwrap();
    assert!(matches!(load_config(&path), Err(ConfigurationError::Parse(_))));

    let missing = dir.path().join("missing.toml");
    assert!(matches!(load_config(&missing), Err(ConfigurationError::Read(_))));
}
