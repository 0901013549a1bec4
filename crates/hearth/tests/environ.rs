//! Integration tests for the attribute view: host field mapping, deletes and
//! overrides as seen by both the application and the downstream request.

use std::rc::Rc;
use std::sync::Arc;

use hearth::host::memory::{MemoryRequest, MemoryResponse};
use hearth::{
    BaseEnviron, Body, Endpoint, Environ, HearthConfig, HostRequest, Registry, RequestView,
    StartResponse, keys,
};

fn view_over(request: Rc<dyn HostRequest>) -> Environ {
    Environ::new(request, Arc::new(BaseEnviron::default()))
}

type Accessor = fn(&dyn HostRequest) -> Option<String>;

type Case = (&'static str, MemoryRequest, Accessor, &'static str);

fn case(
    key: &'static str,
    request: MemoryRequest,
    accessor: Accessor,
    expected: &'static str,
) -> Case {
    (key, request, accessor, expected)
}

/// One case per host-backed field: the key, a request carrying the value,
/// the matching host accessor and the expected string form.
fn field_cases() -> Vec<Case> {
    let req = MemoryRequest::new;
    vec![
        case(keys::REQUEST_METHOD, req().with_method(Some("PUT".into())), |r| r.method(), "PUT"),
        case(
            keys::SCRIPT_NAME,
            req().with_script_name(Some("/app".into())),
            |r| r.script_name(),
            "/app",
        ),
        case(
            keys::PATH_INFO,
            req().with_path_info(Some("/items/7".into())),
            |r| r.path_info(),
            "/items/7",
        ),
        case(
            keys::QUERY_STRING,
            req().with_query_string(Some("a=1&b=2".into())),
            |r| r.query_string(),
            "a=1&b=2",
        ),
        case(
            keys::CONTENT_TYPE,
            req().with_content_type(Some("application/json".into())),
            |r| r.content_type(),
            "application/json",
        ),
        case(
            keys::CONTENT_LENGTH,
            req().with_content_length(Some(42)),
            |r| r.content_length().map(|n| n.to_string()),
            "42",
        ),
        case(
            keys::REMOTE_ADDR,
            req().with_remote_addr(Some("10.0.0.9".into())),
            |r| r.remote_addr(),
            "10.0.0.9",
        ),
        case(
            keys::REMOTE_HOST,
            req().with_remote_host(Some("peer.example.com".into())),
            |r| r.remote_host(),
            "peer.example.com",
        ),
        case(
            keys::REMOTE_PORT,
            req().with_remote_port(Some(5150)),
            |r| r.remote_port().map(|p| p.to_string()),
            "5150",
        ),
        case(
            keys::SERVER_NAME,
            req().with_local_name(Some("api.example.com".into())),
            |r| r.local_name(),
            "api.example.com",
        ),
        case(
            keys::SERVER_PORT,
            req().with_local_port(Some(8443)),
            |r| r.local_port().map(|p| p.to_string()),
            "8443",
        ),
        case(
            keys::SERVER_PROTOCOL,
            req().with_protocol(Some("HTTP/2".into())),
            |r| r.protocol(),
            "HTTP/2",
        ),
        case(keys::URL_SCHEME, req().with_scheme(Some("https".into())), |r| r.scheme(), "https"),
    ]
}

#[test]
fn host_fields_map_to_keys() {
    for (key, request, _, expected) in field_cases() {
        let env = view_over(request.into_host());
        assert_eq!(env.get_str(key).as_deref(), Some(expected), "key {key}");
    }
}

#[test]
fn deleted_keys_are_missing_for_app_and_downstream() {
    for (key, request, accessor, expected) in field_cases() {
        let host = request.into_host();
        let env = view_over(host.clone());
        let downstream = RequestView::new(host.clone(), env.clone());

        assert_eq!(accessor(&downstream).as_deref(), Some(expected), "key {key}");
        let removed = env.delete(key);
        assert!(removed.is_some(), "key {key} should have been present");

        assert!(env.get(key).is_none(), "key {key} still visible in view");
        assert!(!env.keys().iter().any(|k| k == key), "key {key} still listed");
        assert_eq!(accessor(&downstream), None, "key {key} still visible downstream");
        assert_eq!(accessor(host.as_ref()).as_deref(), Some(expected), "host mutated for {key}");
    }
}

#[test]
fn overridden_keys_reach_downstream() {
    let host = MemoryRequest::new().into_host();
    let env = view_over(host.clone());
    let downstream = RequestView::new(host, env.clone());

    env.set(keys::PATH_INFO, "/rewritten");
    env.set(keys::SERVER_PORT, "8080");
    env.set(keys::CONTENT_LENGTH, "not a number");

    assert_eq!(downstream.path_info().as_deref(), Some("/rewritten"));
    assert_eq!(downstream.local_port(), Some(8080));
    assert_eq!(downstream.content_length(), None);
}

#[test]
fn headers_join_multiple_values() {
    let env = view_over(
        MemoryRequest::new()
            .with_header("Accept", "text/html")
            .with_header("Accept", "application/json")
            .with_header("X-Request-Id", "abc")
            .into_host(),
    );
    assert_eq!(
        env.get_str("HTTP_ACCEPT").as_deref(),
        Some("text/html,application/json")
    );
    assert_eq!(env.get_str("HTTP_X_REQUEST_ID").as_deref(), Some("abc"));
    assert!(env.get("HTTP_COOKIE").is_none());
}

#[test]
fn host_is_only_read_for_requested_keys() {
    let request = Rc::new(MemoryRequest::new().with_header("Accept", "*/*"));
    let env = view_over(request.clone());
    assert_eq!(request.accessor_calls(), 0);

    env.get(keys::REQUEST_METHOD);
    env.get(keys::REQUEST_METHOD);
    env.get(keys::VERSION);
    assert_eq!(request.accessor_calls(), 1);

    env.get("HTTP_ACCEPT");
    assert_eq!(request.accessor_calls(), 2);

    env.keys();
    assert_eq!(request.accessor_calls(), 3);
}

#[test]
fn listing_keys_reads_only_the_content_length() {
    let request = Rc::new(
        MemoryRequest::new()
            .with_header("Accept", "*/*")
            .with_header("X-Request-Id", "abc"),
    );
    let env = view_over(request.clone());

    let listed = env.keys();
    assert_eq!(request.accessor_calls(), 1);
    assert!(!listed.iter().any(|k| k == keys::CONTENT_LENGTH));
    assert!(listed.iter().any(|k| k == "HTTP_X_REQUEST_ID"));
    assert!(listed.iter().any(|k| k == keys::REMOTE_PORT));

    env.delete("HTTP_ACCEPT");
    env.set("app.user", "alice");
    let listed = env.keys();
    assert!(!listed.iter().any(|k| k == "HTTP_ACCEPT"));
    assert_eq!(listed.last().map(String::as_str), Some("app.user"));
}

#[test]
fn overridden_then_deleted_keys_are_missing() {
    for (key, request, accessor, expected) in field_cases() {
        let host = request.into_host();
        let env = view_over(host.clone());
        let downstream = RequestView::new(host.clone(), env.clone());

        env.set(key, "override");
        env.delete(key);

        assert!(env.get(key).is_none(), "key {key} still visible in view");
        assert_eq!(accessor(&downstream), None, "key {key} still visible downstream");
        assert_eq!(accessor(host.as_ref()).as_deref(), Some(expected), "host mutated for {key}");
    }
}

#[test]
fn exactly_one_input_and_one_error_sink() {
    let env = view_over(MemoryRequest::new().with_body("payload").into_host());
    let entries = env.entries();
    let inputs = entries.iter().filter(|(_, v)| v.as_input().is_some()).count();
    let sinks = entries.iter().filter(|(_, v)| v.as_errors().is_some()).count();
    assert_eq!((inputs, sinks), (1, 1));
    assert_eq!(env.input().unwrap().read_all().unwrap(), "payload");
}

#[tokio::test]
async fn nested_bridge_reuses_the_attached_view() {
    let app = |env: Environ, start: StartResponse| -> anyhow::Result<Body> {
        let marker = env.get_str("outer.marker").unwrap_or_else(|| "fresh".into());
        start.start("200 OK", Default::default())?;
        Ok(Body::once(marker))
    };
    let registry = Registry::builder().endpoint("demo.inner", app).build().unwrap();
    let endpoint = Endpoint::init(&HearthConfig::scaffold("demo.inner"), &registry, None).unwrap();

    let host = MemoryRequest::new().into_host();
    let outer = view_over(host.clone());
    outer.set("outer.marker", "shared");
    let nested: Rc<dyn HostRequest> = Rc::new(RequestView::new(host.clone(), outer));

    let response = MemoryResponse::new();
    endpoint
        .service(nested, response.clone().into_host())
        .await
        .unwrap();
    assert_eq!(response.body(), "shared");

    let response = MemoryResponse::new();
    endpoint.service(host, response.clone().into_host()).await.unwrap();
    assert_eq!(response.body(), "fresh");
}
