//! Request outcomes against a local mock server.
//!
//! The mock server lives on its own tokio runtime: `EventLoop::run` blocks on
//! the loop's I/O runtime and must not be called from inside an async test.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pledge_core::Status;
use pledge_engine::{EventLoop, LoopConfig};
use pledge_fetch::{FetchConfig, FetchError, FetchRequest, FetchResponse, Method, fetch};

type Outcome = Result<FetchResponse, FetchError>;

struct Harness {
    runtime: tokio::runtime::Runtime,
    server: MockServer,
}

impl Harness {
    fn start() -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .expect("mock runtime");
        let server = runtime.block_on(MockServer::start());
        Self { runtime, server }
    }

    fn mount(&self, mock: Mock) {
        self.runtime.block_on(mock.mount(&self.server));
    }

    fn url(&self, route: &str) -> String {
        format!("{}{route}", self.server.uri())
    }
}

fn settle(request: FetchRequest, config: &FetchConfig) -> Outcome {
    let mut event_loop = EventLoop::new(LoopConfig::virtual_time()).expect("event loop");
    let handle = event_loop.handle();
    let slot: Rc<RefCell<Option<Outcome>>> = Rc::default();

    let on_ok = Rc::clone(&slot);
    let on_err = Rc::clone(&slot);
    fetch(&handle, config, request).then_or_else(
        move |response| {
            *on_ok.borrow_mut() = Some(Ok(response));
            Ok(())
        },
        move |error| {
            *on_err.borrow_mut() = Some(Err(error));
        },
    );

    event_loop.run().expect("run");
    slot.borrow_mut().take().expect("fetch settled")
}

#[test]
fn json_body_resolves() {
    let harness = Harness::start();
    harness.mount(
        Mock::given(method("GET"))
            .and(path("/todos/1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": 1, "title": "walk"})),
            ),
    );

    let response = settle(
        FetchRequest::get(harness.url("/todos/1")),
        &FetchConfig::default(),
    )
    .expect("resolved");
    assert_eq!(response.status, 200);
    assert_eq!(response.body, json!({"id": 1, "title": "walk"}));
    assert!(response.url.ends_with("/todos/1"));
}

#[test]
fn error_status_rejects() {
    let harness = Harness::start();
    harness.mount(
        Mock::given(path("/missing")).respond_with(ResponseTemplate::new(404)),
    );

    let error = settle(
        FetchRequest::get(harness.url("/missing")),
        &FetchConfig::default(),
    )
    .expect_err("rejected");
    assert_eq!(error, FetchError::Status { status: 404 });
    assert_eq!(error.to_string(), "Status 404, Request failed");
}

#[test]
fn status_399_is_not_an_error_status() {
    let harness = Harness::start();
    harness.mount(
        Mock::given(path("/odd")).respond_with(ResponseTemplate::new(399).set_body_string("[]")),
    );

    let response = settle(FetchRequest::get(harness.url("/odd")), &FetchConfig::default())
        .expect("resolved");
    assert_eq!(response.status, 399);
    assert_eq!(response.body, json!([]));
}

#[test]
fn non_json_body_rejects_with_decode_error() {
    let harness = Harness::start();
    harness.mount(
        Mock::given(path("/html"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>")),
    );

    let error = settle(FetchRequest::get(harness.url("/html")), &FetchConfig::default())
        .expect_err("rejected");
    assert!(matches!(error, FetchError::Decode { .. }), "got {error:?}");
}

#[test]
fn empty_body_resolves_with_null() {
    let harness = Harness::start();
    harness.mount(Mock::given(path("/empty")).respond_with(ResponseTemplate::new(204)));

    let response = settle(FetchRequest::get(harness.url("/empty")), &FetchConfig::default())
        .expect("resolved");
    assert_eq!(response.status, 204);
    assert_eq!(response.body, serde_json::Value::Null);
}

#[test]
fn method_and_user_agent_are_sent() {
    let harness = Harness::start();
    harness.mount(
        Mock::given(method("POST"))
            .and(path("/items"))
            .and(header("user-agent", "pledge-test/1"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"created": true})))
            .expect(1),
    );

    let config = FetchConfig {
        user_agent: "pledge-test/1".to_string(),
        timeout: Duration::from_secs(5),
    };
    let response = settle(
        FetchRequest::new(harness.url("/items"), Method::POST),
        &config,
    )
    .expect("resolved");
    assert_eq!(response.status, 201);
    harness.runtime.block_on(harness.server.verify());
}

#[test]
fn slow_server_hits_timeout() {
    let harness = Harness::start();
    harness.mount(
        Mock::given(path("/slow")).respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({}))
                .set_delay(Duration::from_secs(5)),
        ),
    );

    let config = FetchConfig {
        timeout: Duration::from_millis(100),
        ..FetchConfig::default()
    };
    let error = settle(FetchRequest::get(harness.url("/slow")), &config).expect_err("rejected");
    assert!(matches!(error, FetchError::Transport { .. }), "got {error:?}");
    assert_eq!(error.to_string(), "Request failed, check your preference");
}

#[test]
fn invalid_url_rejects_through_a_microtask() {
    let mut event_loop = EventLoop::new(LoopConfig::virtual_time()).expect("event loop");
    let handle = event_loop.handle();

    let deferred = fetch(
        &handle,
        &FetchConfig::default(),
        FetchRequest::get("not a url"),
    );
    assert_eq!(deferred.status(), Status::Pending);
    assert_eq!(handle.outstanding_io(), 0);

    let seen: Rc<RefCell<Option<FetchError>>> = Rc::default();
    let sink = Rc::clone(&seen);
    deferred.catch(move |error| *sink.borrow_mut() = Some(error));

    event_loop.run().expect("run");
    assert!(matches!(
        seen.borrow().as_ref(),
        Some(FetchError::InvalidUrl { url, .. }) if url == "not a url"
    ));
}
