mod common;

use common::{StubEngine, png, request, spawn_server, test_config};
use core::time::Duration;
use ocr_tonic_core::proto::{RecognizeResponse, ocr_service_client::OcrServiceClient};
use ocr_tonic_server::ServerConfig;
use std::sync::atomic::Ordering;
use tonic::{Code, codec::CompressionEncoding};

#[tokio::test(flavor = "multi_thread")]
async fn empty_image_is_rejected() {
    let (engine, counters) = StubEngine::new();
    let server = spawn_server(engine, test_config()).await;
    let mut client = server.client().await;

    let status = client.recognize(request(Vec::new())).await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    let response = RecognizeResponse::from_status(&status).unwrap();
    assert!(!response.success);
    assert!(response.json.is_empty());
    assert_eq!(response.error, "Empty image");

    // Only the warmup reached the engine.
    assert_eq!(counters.calls.load(Ordering::SeqCst), 1);
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn undecodable_image_is_rejected() {
    let (engine, counters) = StubEngine::new();
    let server = spawn_server(engine, test_config()).await;
    let mut client = server.client().await;

    let garbage: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    let status = client.recognize(request(garbage)).await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    let response = RecognizeResponse::from_status(&status).unwrap();
    assert!(!response.success);
    assert_eq!(response.error, "Unable to decode image");
    assert_eq!(counters.calls.load(Ordering::SeqCst), 1);
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn blank_image_returns_json_array() {
    let (engine, _) = StubEngine::new();
    let server = spawn_server(engine, test_config()).await;
    let mut client = server.client().await;

    let response = client
        .recognize(request(png(64, 32)))
        .await
        .unwrap()
        .into_inner();

    assert!(response.success);
    assert!(response.error.is_empty());
    let value: serde_json::Value = serde_json::from_str(&response.json).unwrap();
    assert!(value.is_array());

    let results = response.results().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].text, "64x32");
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_requests_are_consistent() {
    let (engine, _) = StubEngine::new();
    let server = spawn_server(engine, test_config()).await;
    let mut client = server.client().await;

    let image = png(20, 10);
    let first = client.recognize(request(image.clone())).await.unwrap().into_inner();
    let second = client.recognize(request(image)).await.unwrap().into_inner();
    assert_eq!(first, second);

    let bad_first = client.recognize(request(b"GIF89a-but-not-really".to_vec())).await.unwrap_err();
    let bad_second = client.recognize(request(b"GIF89a-but-not-really".to_vec())).await.unwrap_err();
    assert_eq!(bad_first.code(), bad_second.code());
    assert_eq!(bad_first.message(), bad_second.message());
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_requests_get_their_own_results() {
    let (engine, _) = StubEngine::new();
    let engine = engine.with_delay(Duration::from_millis(50));
    let server = spawn_server(
        engine,
        ServerConfig {
            num_workers: 8,
            ..test_config()
        },
    )
    .await;

    let tasks: Vec<_> = (0..8u32)
        .map(|i| {
            let url = server.url();
            tokio::spawn(async move {
                let mut client = OcrServiceClient::connect(url).await.unwrap();
                let (width, height) = (10 + i, 5 + i);
                let response = client
                    .recognize(request(png(width, height)))
                    .await
                    .unwrap()
                    .into_inner();
                (format!("{width}x{height}"), response)
            })
        })
        .collect();

    for task in tasks {
        let (expected, response) = task.await.unwrap();
        assert!(response.success);
        let results = response.results().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, expected);
    }
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn load_beyond_the_pool_queues_instead_of_failing() {
    let (engine, counters) = StubEngine::new();
    let engine = engine.with_delay(Duration::from_millis(30));
    let server = spawn_server(
        engine,
        ServerConfig {
            num_workers: 2,
            queue_depth: 1,
            ..test_config()
        },
    )
    .await;

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let url = server.url();
            tokio::spawn(async move {
                let mut client = OcrServiceClient::connect(url).await.unwrap();
                client.recognize(request(png(8, 8))).await
            })
        })
        .collect();

    for task in tasks {
        assert!(task.await.unwrap().is_ok());
    }
    assert!(counters.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(counters.calls.load(Ordering::SeqCst), 11);
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn engine_failure_is_internal_and_contained() {
    let (engine, _) = StubEngine::new();
    let server = spawn_server(engine.failing_on_width(13), test_config()).await;
    let mut client = server.client().await;

    let status = client.recognize(request(png(13, 13))).await.unwrap_err();
    assert_eq!(status.code(), Code::Internal);
    let response = RecognizeResponse::from_status(&status).unwrap();
    assert!(!response.success);
    assert_eq!(response.error, "inference failed on 13px wide input");

    // The server keeps serving after an engine failure.
    let response = client.recognize(request(png(14, 13))).await.unwrap().into_inner();
    assert!(response.success);
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn oversized_messages_are_rejected_by_the_transport() {
    let (engine, counters) = StubEngine::new();
    let server = spawn_server(
        engine,
        ServerConfig {
            max_message_bytes: 1024,
            ..test_config()
        },
    )
    .await;
    let mut client = server.client().await;

    let status = client.recognize(request(vec![0x89; 4096])).await.unwrap_err();
    assert_ne!(status.code(), Code::Ok);
    assert_eq!(counters.calls.load(Ordering::SeqCst), 1);

    // Requests within the limit still work.
    assert!(client.recognize(request(png(4, 4))).await.is_ok());
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn compressed_requests_are_accepted() {
    let (engine, _) = StubEngine::new();
    let server = spawn_server(engine, test_config()).await;

    for encoding in [
        CompressionEncoding::Zstd,
        CompressionEncoding::Gzip,
        CompressionEncoding::Deflate,
    ] {
        let mut client = server
            .client()
            .await
            .send_compressed(encoding)
            .accept_compressed(encoding);
        let response = client.recognize(request(png(30, 20))).await.unwrap().into_inner();
        assert_eq!(response.results().unwrap()[0].text, "30x20");
    }
    server.stop().await.unwrap();
}
