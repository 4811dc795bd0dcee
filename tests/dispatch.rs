//! End-to-end dispatch through the HTTP host.

use std::sync::{Arc, Mutex};

use axum::http::StatusCode;
use serde_json::{json, Value};
use switchyard::config::RouterConfig;
use switchyard::http::middleware::{default_recoverer, sessions, MemorySessionStore, SessionConfig};
use switchyard::http::{handler_fn, middleware_fn, HandlerError, Middleware};
use switchyard::routing::Router;
use switchyard::security::allow_content_type;

mod common;

fn tag(label: &'static str, trace: Arc<Mutex<Vec<String>>>) -> Middleware {
    middleware_fn(move |ctx, next| {
        let trace = Arc::clone(&trace);
        Box::pin(async move {
            trace.lock().unwrap().push(format!("{label}>"));
            let result = next.run(ctx).await;
            trace.lock().unwrap().push(format!("<{label}"));
            result
        })
    })
}

#[tokio::test]
async fn test_named_route_round_trip() {
    let mut builder = Router::builder(RouterConfig::default());
    {
        let mut posts = builder.group("/posts", "posts", Vec::new());
        posts
            .get(
                "/<id:int>",
                handler_fn(|ctx| {
                    Box::pin(async move {
                        let id: i64 = ctx
                            .params()
                            .parse("id")
                            .ok_or_else(|| HandlerError::status(StatusCode::BAD_REQUEST, "bad id"))?;
                        let Some(next_id) = id.checked_add(1) else {
                            ctx.error(StatusCode::NOT_FOUND, "no next post");
                            return Ok(());
                        };
                        let next = ctx.url("posts:post", &[&next_id])?;
                        ctx.json(StatusCode::OK, &json!({ "id": id, "next": next }))
                    })
                }),
            )
            .name("post");
    }
    let server = common::start_server(builder.build().unwrap()).await;
    let client = common::client();

    let res = client.get(server.url("/posts/42")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["content-type"], "application/json");
    assert!(res.headers().contains_key("x-request-id"));
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "id": 42, "next": "/posts/43" }));

    let res = client
        .get(server.url("/posts/9223372036854775807"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
    assert_eq!(res.text().await.unwrap(), "no next post\n");

    let res = client.get(server.url("/posts/latest")).send().await.unwrap();
    assert_eq!(res.status(), 404);
    assert_eq!(res.text().await.unwrap(), "404 page not found\n");

    server.stop().await;
}

#[tokio::test]
async fn test_middleware_onion_over_the_wire() {
    let trace = Arc::new(Mutex::new(Vec::new()));
    let mut builder = Router::builder(RouterConfig::default());
    builder.use_middleware([tag("A", trace.clone()), tag("B", trace.clone())]);
    builder
        .get("/", common::text("home"))
        .use_middleware([tag("C", trace.clone()), tag("D", trace.clone())]);
    builder.get("/raw", common::text("raw")).disable_middleware();

    let server = common::start_server(builder.build().unwrap()).await;
    let client = common::client();

    let res = client.get(server.url("/")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "home");
    assert_eq!(
        *trace.lock().unwrap(),
        vec!["A>", "B>", "C>", "D>", "<D", "<C", "<B", "<A"]
    );

    trace.lock().unwrap().clear();
    let res = client.get(server.url("/raw")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "raw");
    assert!(trace.lock().unwrap().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_unrecovered_error_answers_500() {
    let mut builder = Router::builder(RouterConfig::default());
    builder.get(
        "/fail",
        handler_fn(|ctx| {
            Box::pin(async move {
                ctx.response.write_str("never sent");
                Err(HandlerError::status(StatusCode::CONFLICT, "conflict"))
            })
        }),
    );
    let mut recovered = builder.group("/safe", "safe", vec![default_recoverer()]);
    recovered.get(
        "/fail",
        handler_fn(|_ctx| {
            Box::pin(async move { Err(HandlerError::status(StatusCode::CONFLICT, "already exists")) })
        }),
    );

    let server = common::start_server(builder.build().unwrap()).await;
    let client = common::client();

    let res = client.get(server.url("/fail")).send().await.unwrap();
    assert_eq!(res.status(), 500);
    assert_eq!(res.text().await.unwrap(), "Internal Server Error");

    let res = client.get(server.url("/safe/fail")).send().await.unwrap();
    assert_eq!(res.status(), 409);
    assert_eq!(res.text().await.unwrap(), "already exists\n");

    server.stop().await;
}

#[tokio::test]
async fn test_body_reaches_handler() {
    let mut builder = Router::builder(RouterConfig::default());
    builder
        .post(
            "/echo",
            handler_fn(|ctx| {
                Box::pin(async move {
                    let value: Value = serde_json::from_slice(ctx.body())
                        .map_err(|e| HandlerError::status(StatusCode::BAD_REQUEST, e.to_string()))?;
                    ctx.json(StatusCode::CREATED, &value)
                })
            }),
        )
        .use_middleware([allow_content_type(["application/json"])]);

    let server = common::start_server(builder.build().unwrap()).await;
    let client = common::client();

    let res = client
        .post(server.url("/echo"))
        .json(&json!({ "title": "hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 201);
    assert_eq!(res.json::<Value>().await.unwrap(), json!({ "title": "hello" }));

    let res = client
        .post(server.url("/echo"))
        .header("content-type", "text/xml")
        .body("<title/>")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 415);

    server.stop().await;
}

#[tokio::test]
async fn test_session_cookie_over_the_wire() {
    let mut builder = Router::builder(RouterConfig::default());
    builder.use_middleware([sessions(
        Arc::new(MemorySessionStore::new()),
        SessionConfig::default(),
    )]);
    builder.get(
        "/visits",
        handler_fn(|ctx| {
            Box::pin(async move {
                let session = ctx
                    .session
                    .as_mut()
                    .ok_or_else(|| HandlerError::status(StatusCode::INTERNAL_SERVER_ERROR, "no session"))?;
                let visits = session.get("visits").and_then(Value::as_u64).unwrap_or(0) + 1;
                session.set("visits", json!(visits));
                ctx.json(StatusCode::OK, &json!({ "visits": visits }))
            })
        }),
    );

    let server = common::start_server(builder.build().unwrap()).await;
    let client = reqwest::Client::builder()
        .cookie_store(true)
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap();

    for expected in 1..=3u64 {
        let res = client.get(server.url("/visits")).send().await.unwrap();
        assert_eq!(res.headers()["vary"], "Cookie");
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["visits"], expected);
    }

    server.stop().await;
}
