//! Exercises [`ControlPlaneClient`] against a real local HTTP server,
//! following `srs-client`'s choice of a dev-dependency web server over a
//! mocking crate absent from this stack.

use std::{
    net::TcpListener,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use actix_web::{web, App, HttpResponse, HttpServer};
use courtstream_agent::{
    control_plane::{ClientConfig, ControlPlaneClient},
    record::{CourtId, StreamKey},
};

fn bind_local() -> (TcpListener, url::Url) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind failed");
    let addr = listener.local_addr().expect("local addr");
    (listener, format!("http://{addr}/").parse().unwrap())
}

fn client_config(base_url: url::Url) -> ClientConfig {
    ClientConfig {
        base_url,
        ground_id: "ground-1".into(),
        retry_interval: Duration::from_millis(10),
        max_retries: 3,
    }
}

#[tokio::test]
async fn go_live_succeeds_on_first_2xx() {
    let (listener, base_url) = bind_local();
    let server = HttpServer::new(|| {
        App::new().route(
            "/api/v1/padel-grounds/{ground}/courts/{court}/go-live/{key}",
            web::get().to(|| async { HttpResponse::Ok().finish() }),
        )
    })
    .listen(listener)
    .expect("listen failed")
    .run();
    tokio::spawn(server);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = ControlPlaneClient::new(client_config(base_url));
    let result = client
        .go_live_youtube(&CourtId("C1".into()), &StreamKey("K1".into()))
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn go_live_does_not_retry_on_4xx() {
    let (listener, base_url) = bind_local();
    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_for_route = Arc::clone(&attempts);

    let server = HttpServer::new(move || {
        let attempts = Arc::clone(&attempts_for_route);
        App::new().route(
            "/api/v1/padel-grounds/{ground}/courts/{court}/go-live/{key}",
            web::get().to(move || {
                let attempts = Arc::clone(&attempts);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    HttpResponse::NotFound().finish()
                }
            }),
        )
    })
    .listen(listener)
    .expect("listen failed")
    .run();
    tokio::spawn(server);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = ControlPlaneClient::new(client_config(base_url));
    let result = client
        .go_live_youtube(&CourtId("C1".into()), &StreamKey("K1".into()))
        .await;
    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn heartbeat_succeeds_on_2xx() {
    let (listener, base_url) = bind_local();
    let server = HttpServer::new(|| {
        App::new().route(
            "/api/v1/padel-grounds/heartbeat",
            web::post().to(|| async { HttpResponse::Ok().finish() }),
        )
    })
    .listen(listener)
    .expect("listen failed")
    .run();
    tokio::spawn(server);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = ControlPlaneClient::new(client_config(base_url));
    assert!(client.send_heartbeat().await.is_ok());
}

#[tokio::test]
async fn heartbeat_fails_on_5xx() {
    let (listener, base_url) = bind_local();
    let server = HttpServer::new(|| {
        App::new().route(
            "/api/v1/padel-grounds/heartbeat",
            web::post()
                .to(|| async { HttpResponse::InternalServerError().finish() }),
        )
    })
    .listen(listener)
    .expect("listen failed")
    .run();
    tokio::spawn(server);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = ControlPlaneClient::new(client_config(base_url));
    assert!(client.send_heartbeat().await.is_err());
}
