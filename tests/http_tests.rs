mod common;

use actix_web::{App, http::StatusCode, test, web};
use common::{fake_kv_server, harness};
use kv_runner::http::configure;
use serde_json::{Value, json};

macro_rules! app {
    ($runner:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($runner.clone()))
                .configure(configure),
        )
        .await
    };
}

#[actix_web::test]
async fn test_health() {
    let h = harness(25400, 25409);
    let app = app!(h.runner);

    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body, json!({ "status": "ok" }));
}

#[actix_web::test]
async fn test_create_get_list_delete() {
    let h = harness(25410, 25419);
    let app = app!(h.runner);

    let req = test::TestRequest::post()
        .uri("/api/instances")
        .set_json(json!({ "id": "cache" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: Value = test::read_body_json(resp).await;
    assert_eq!(created["id"], "cache");
    assert_eq!(created["port"], 25410);
    assert_eq!(created["status"], "stopped");
    assert!(created["password"].is_string());

    let req = test::TestRequest::get().uri("/api/instances/cache").to_request();
    let fetched: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(fetched["port"], 25410);
    assert!(fetched.get("password").is_none());

    let req = test::TestRequest::get().uri("/api/instances").to_request();
    let listed: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    let req = test::TestRequest::delete().uri("/api/instances/cache").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let req = test::TestRequest::get().uri("/api/instances/cache").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], 404);
}

#[actix_web::test]
async fn test_create_errors_map_to_status_codes() {
    let h = harness(25420, 25420);
    let app = app!(h.runner);

    let post = |body: Value| {
        test::TestRequest::post()
            .uri("/api/instances")
            .set_json(body)
            .to_request()
    };

    let resp = test::call_service(&app, post(json!({ "id": "a" }))).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = test::call_service(&app, post(json!({ "id": "a" }))).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let resp = test::call_service(&app, post(json!({ "id": "b" }))).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let resp = test::call_service(&app, post(json!({ "id": "b", "port": 25420 }))).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let resp = test::call_service(&app, post(json!({ "id": "../x" }))).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = test::call_service(&app, post(json!({ "name": "missing id" }))).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], 400);
}

#[actix_web::test]
async fn test_start_status_stop_routes() {
    let h = harness(25430, 25439);
    let app = app!(h.runner);
    let created = h.runner.create("cache").await.unwrap();
    let _server = fake_kv_server(created.port).await;

    let req = test::TestRequest::post()
        .uri("/api/instances/cache/start")
        .to_request();
    let started: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(started["status"], "running");
    assert_eq!(started["service_status"], 1);

    h.register_spawned("cache", created.port);
    let req = test::TestRequest::get()
        .uri("/api/instances/cache/status")
        .to_request();
    let status: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(status["running"], true);
    assert!(status["pid"].is_u64());
    assert_eq!(status["config_exists"], true);

    let req = test::TestRequest::post()
        .uri("/api/instances/cache/stop")
        .to_request();
    let stopped: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(stopped["status"], "stopped");
    assert_eq!(stopped["service_status"], 0);
}

#[actix_web::test]
async fn test_unknown_instance_routes_return_404() {
    let h = harness(25440, 25449);
    let app = app!(h.runner);

    for req in [
        test::TestRequest::post().uri("/api/instances/nope/start").to_request(),
        test::TestRequest::post().uri("/api/instances/nope/stop").to_request(),
        test::TestRequest::get().uri("/api/instances/nope/status").to_request(),
        test::TestRequest::delete().uri("/api/instances/nope").to_request(),
    ] {
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}

#[actix_web::test]
async fn test_reconcile_route() {
    let h = harness(25450, 25459);
    let app = app!(h.runner);
    h.runner.create("a").await.unwrap();
    std::fs::remove_dir_all(h.runner.layout().instance_dir("a")).unwrap();

    let req = test::TestRequest::post().uri("/api/reconcile").to_request();
    let report: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(report["removed"], json!(["a"]));
    assert_eq!(report["adopted"], json!([]));
}
