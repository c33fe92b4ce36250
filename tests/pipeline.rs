use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use strata::auth::{Identity, StaticTokens, TokenVerifier};
use strata::flow::export::{Diagram, Waterfall};
use strata::flow::{FlowExporter, Outcome, SpanTree};
use strata::middleware::auth::Auth;
use strata::middleware::rate_limit::RateLimit;
use strata::middleware::validate::{Kind, Validate};
use strata::middleware::{Middleware, Next};
use strata::{App, Context, Error, Method, Pipeline, Request, Response, Router, StatusCode};

type Log = Arc<Mutex<Vec<String>>>;

struct Marker {
    name: &'static str,
    log: Log,
}

#[async_trait]
impl Middleware for Marker {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Error> {
        self.log.lock().push(format!("{}-enter", self.name));
        let result = next.run(ctx).await;
        self.log.lock().push(format!("{}-exit", self.name));
        result
    }
}

/// Answers without calling its continuation.
struct Teapot;

#[async_trait]
impl Middleware for Teapot {
    fn name(&self) -> &'static str {
        "teapot"
    }

    async fn handle(&self, ctx: &mut Context, _next: Next<'_>) -> Result<(), Error> {
        ctx.set_response(Response::builder().status(StatusCode::IM_A_TEAPOT).text("short"));
        Ok(())
    }
}

#[derive(Clone, Default)]
struct Collector(Arc<Mutex<Vec<SpanTree>>>);

impl FlowExporter for Collector {
    fn export(&self, tree: &SpanTree) {
        self.0.lock().push(tree.clone());
    }
}

fn marker(name: &'static str, log: &Log) -> Marker {
    Marker { name, log: Arc::clone(log) }
}

fn recording(log: &Log) -> impl strata::Handler {
    let log = Arc::clone(log);
    move |req: Request| {
        let log = Arc::clone(&log);
        async move {
            log.lock().push("H".to_owned());
            Ok::<_, Error>(Response::json_value(&json!({ "id": req.param("id") })))
        }
    }
}

fn body(ctx: &Context) -> Value {
    serde_json::from_slice(ctx.response().body()).unwrap()
}

#[tokio::test]
async fn onion_order_and_span_depth() {
    let log = Log::default();
    let collector = Collector::default();
    let pipeline = Pipeline::new()
        .with(marker("A", &log))
        .with(marker("B", &log))
        .with(marker("C", &log))
        .exporter(collector.clone());
    let app = App::with_pipeline(Router::new().get("/users/:id", recording(&log)), Arc::new(pipeline));

    let (ctx, tree) = app.handle_traced(Context::new(Method::Get, "/users/42")).await;

    assert_eq!(*log.lock(), ["A-enter", "B-enter", "C-enter", "H", "C-exit", "B-exit", "A-exit"]);
    assert_eq!(body(&ctx), json!({ "id": "42" }));
    assert_eq!(tree.depth(), 4);
    assert_eq!(tree.stages(), ["A", "B", "C", "handler"]);
    assert!(tree.spans().iter().all(|s| s.is_closed()));

    let root = tree.root().unwrap();
    assert_eq!(root.tag("route"), Some("/users/:id"));
    assert_eq!(root.tag("status"), Some("200"));

    let exported = collector.0.lock();
    assert_eq!(exported.len(), 1);
    assert_eq!(Waterfall::from_tree(&exported[0]).rows.len(), 5);
    assert_eq!(Diagram::from_tree(&exported[0]).edges.len(), 4);
}

#[tokio::test]
async fn short_circuit_keeps_its_response() {
    let log = Log::default();
    let pipeline = Pipeline::new()
        .with(marker("A", &log))
        .with(Teapot)
        .with(marker("C", &log));
    let app = App::with_pipeline(Router::new().get("/users/:id", recording(&log)), Arc::new(pipeline));

    let (ctx, tree) = app.handle_traced(Context::new(Method::Get, "/users/1")).await;

    assert_eq!(*log.lock(), ["A-enter", "A-exit"]);
    assert_eq!(ctx.response().status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(ctx.response().body().as_ref(), b"short");
    assert_eq!(tree.stages(), ["A", "teapot"]);
}

#[tokio::test]
async fn route_layers_run_inside_global_layers() {
    let log = Log::default();
    let mut router = Router::new();
    router
        .route(Method::Get, "/users/:id")
        .layer(marker("R", &log))
        .to(recording(&log))
        .unwrap();
    let app = App::with_pipeline(router, Arc::new(Pipeline::new().with(marker("G", &log))));

    let (_, tree) = app.handle_traced(Context::new(Method::Get, "/users/1")).await;

    assert_eq!(*log.lock(), ["G-enter", "R-enter", "H", "R-exit", "G-exit"]);
    assert_eq!(tree.stages(), ["G", "R", "handler"]);
}

#[tokio::test]
async fn unmatched_requests_still_pass_global_middleware() {
    let log = Log::default();
    let app = App::with_pipeline(Router::new(), Arc::new(Pipeline::new().with(marker("G", &log))));

    let ctx = app.handle(Context::new(Method::Get, "/missing")).await;

    assert_eq!(*log.lock(), ["G-enter", "G-exit"]);
    assert_eq!(ctx.response().status(), StatusCode::NOT_FOUND);
    assert_eq!(ctx.response().header("content-type"), Some("application/json"));
    assert_eq!(body(&ctx)["error"], "not_found");
}

#[tokio::test]
async fn handler_failures_become_opaque_500s() {
    let app = App::new(Router::new().get("/boom", |_req: Request| async {
        Err::<Response, _>(Error::handler("connection string leaked"))
    }));

    let ctx = app.handle(Context::new(Method::Get, "/boom")).await;

    assert_eq!(ctx.response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body(&ctx), json!({ "error": "internal" }));
    assert!(matches!(ctx.failure(), Some(Error::Handler(_))));
}

#[tokio::test]
async fn query_parameters_are_parsed() {
    let app = App::new(Router::new().get("/search", |req: Request| async move {
        Ok::<_, Error>(Response::json_value(&json!({
            "q": req.query("q"),
            "limit": req.query("limit"),
        })))
    }));

    let ctx = app.handle(Context::new(Method::Get, "/search?q=cats&limit=10")).await;

    assert_eq!(ctx.query().len(), 2);
    assert_eq!(body(&ctx), json!({ "q": "cats", "limit": "10" }));
}

#[tokio::test]
async fn concurrent_requests_do_not_share_params() {
    let app = Arc::new(App::new(Router::new().get("/users/:id", |req: Request| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok::<_, Error>(req.param("id").unwrap_or_default().to_owned())
    })));

    let handles: Vec<_> = (1..=2)
        .map(|id| {
            let app = Arc::clone(&app);
            tokio::spawn(async move { app.handle(Context::new(Method::Get, &format!("/users/{id}"))).await })
        })
        .collect();

    for (id, handle) in (1..=2).zip(handles) {
        let ctx = handle.await.unwrap();
        assert_eq!(ctx.param("id"), Some(id.to_string().as_str()));
        assert_eq!(ctx.response().body().as_ref(), id.to_string().as_bytes());
    }
}

#[tokio::test]
async fn auth_and_validation_guard_a_route() {
    let verifier: Arc<dyn TokenVerifier> = Arc::new(StaticTokens::new().with("t0k3n", Identity::new("alice")));
    let mut router = Router::new();
    router
        .route(Method::Post, "/users")
        .layer(Auth::required(verifier))
        .layer(Validate::json().require("name", Kind::String))
        .to(|req: Request| async move {
            let owner = req.user().map(|u| u.subject.clone());
            Ok::<_, Error>(Response::builder().status(StatusCode::CREATED).json_value(&json!({ "owner": owner })))
        })
        .unwrap();
    let app = App::new(router);

    let post = |auth: Option<&str>, body: &'static str| {
        let headers = auth.map(|t| vec![("Authorization".to_owned(), format!("Bearer {t}"))]).unwrap_or_default();
        Context::new(Method::Post, "/users").with_headers(headers).with_body(body)
    };

    let anonymous = app.handle(post(None, r#"{"name":"x"}"#)).await;
    assert_eq!(anonymous.response().status(), StatusCode::UNAUTHORIZED);

    let invalid = app.handle(post(Some("t0k3n"), r#"{"name":7}"#)).await;
    assert_eq!(invalid.response().status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body(&invalid)["fields"][0]["field"], "name");

    let created = app.handle(post(Some("t0k3n"), r#"{"name":"bob"}"#)).await;
    assert_eq!(created.response().status(), StatusCode::CREATED);
    assert_eq!(body(&created)["owner"], "alice");
}

#[tokio::test]
async fn a_field_named_request_is_still_a_validation_failure() {
    let mut router = Router::new();
    router
        .route(Method::Post, "/jobs")
        .layer(Validate::json().require("request", Kind::Object))
        .to(|_req: Request| async { Ok::<_, Error>("queued") })
        .unwrap();
    let app = App::new(router);

    let ctx = app.handle(Context::new(Method::Post, "/jobs").with_body(r#"{"request":1}"#)).await;

    assert_eq!(ctx.response().status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body(&ctx)["error"], "validation");
    assert_eq!(body(&ctx)["fields"][0]["field"], "request");
}

#[tokio::test]
async fn rate_limit_answers_429_without_running_the_handler() {
    let log = Log::default();
    let pipeline = Pipeline::new().with(RateLimit::new(1, Duration::from_secs(60)));
    let app = App::with_pipeline(Router::new().get("/users/:id", recording(&log)), Arc::new(pipeline));
    let from = |ip: &str| Context::new(Method::Get, "/users/1").with_peer(format!("{ip}:5000").parse().unwrap());

    assert_eq!(app.handle(from("10.0.0.1")).await.response().status(), StatusCode::OK);
    let limited = app.handle(from("10.0.0.1")).await;
    assert_eq!(limited.response().status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(app.handle(from("10.0.0.2")).await.response().status(), StatusCode::OK);
    assert_eq!(log.lock().len(), 2);
}

#[tokio::test]
async fn cancellation_unwinds_without_a_response() {
    let collector = Collector::default();
    let app = App::with_pipeline(
        Router::new().get("/slow", |_req: Request| async { Ok::<_, Error>("never") }),
        Arc::new(Pipeline::new().exporter(collector.clone())),
    );
    let ctx = Context::new(Method::Get, "/slow");
    ctx.cancellation_token().cancel();

    let ctx = app.handle(ctx).await;

    assert!(matches!(ctx.into_result(), Err(Error::Cancelled)));
    let trees = collector.0.lock();
    assert_eq!(trees[0].root().and_then(|r| r.outcome()), Some(&Outcome::Cancelled));
}
