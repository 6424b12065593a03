//! 图片采集链路集成测试：本地提取优先，跨源污染走且仅走一次代理回退。

use std::io::{Cursor, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use base64::{engine::general_purpose, Engine as _};
use virtual_tryon::acquire::{AcquireError, ImageAcquirer};
use virtual_tryon::broker::{Broker, BrokerConfig, BrokerHandle};
use virtual_tryon::dom::Node;

struct MockService {
    base_url: String,
    hits: Arc<AtomicUsize>,
}

impl MockService {
    fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

fn spawn_http_server(status_line: &'static str, body: String, max_requests: usize) -> MockService {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server failed");
    let addr = listener.local_addr().expect("read local addr failed");
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_in_thread = Arc::clone(&hits);

    thread::spawn(move || {
        for _ in 0..max_requests {
            let Ok((mut stream, _)) = listener.accept() else {
                break;
            };
            hits_in_thread.fetch_add(1, Ordering::SeqCst);
            read_http_request(&mut stream);

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes());
            let _ = stream.flush();
        }
    });

    MockService {
        base_url: format!("http://127.0.0.1:{}", addr.port()),
        hits,
    }
}

fn read_http_request(stream: &mut TcpStream) {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    let mut content_length = 0usize;
    let mut header_end: Option<usize> = None;

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);

                if header_end.is_none() {
                    if let Some(pos) = find_subsequence(&buffer, b"\r\n\r\n") {
                        header_end = Some(pos + 4);
                        let headers = String::from_utf8_lossy(&buffer[..pos]).to_string();
                        for line in headers.lines() {
                            let lower = line.to_ascii_lowercase();
                            if let Some(value) = lower.strip_prefix("content-length:") {
                                content_length = value.trim().parse().unwrap_or(0);
                            }
                        }
                    }
                }

                if let Some(end) = header_end {
                    if buffer.len() >= end + content_length {
                        break;
                    }
                }
            }
            Err(_) => break,
        }
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn broker_with_proxy(proxy_base: &str) -> BrokerHandle {
    Broker::new(BrokerConfig::new(
        "http://127.0.0.1:9/try-on",
        &format!("{}/proxy", proxy_base),
        "http://127.0.0.1:9/config",
    ))
    .expect("broker init failed")
    .spawn()
}

/// 一张 2x2 PNG 的 Data URL，作为代理服务的抓取结果。
fn tiny_png_data_url() -> String {
    let mut png_bytes = Vec::new();
    let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([10, 20, 30, 255]));
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut png_bytes), image::ImageFormat::Png)
        .expect("encode test png failed");

    format!(
        "data:image/png;base64,{}",
        general_purpose::STANDARD.encode(&png_bytes)
    )
}

#[tokio::test]
async fn same_origin_image_extracts_locally_without_proxy() {
    let _ = env_logger::builder().is_test(true).try_init();

    let proxy = spawn_http_server("200 OK", "{}".to_string(), 4);
    let acquirer = ImageAcquirer::new(broker_with_proxy(&proxy.base_url));

    let node = Node::image("https://shop.example.com/p/1.jpg")
        .alt("dress front")
        .loaded(64, 48)
        .build();

    let encoded = acquirer.extract(&node).await.expect("extract should succeed");

    assert_eq!(encoded.mime(), "image/jpeg");
    assert!(!encoded.is_empty());
    assert_eq!(proxy.hit_count(), 0, "local extraction must not touch the proxy");
}

#[tokio::test]
async fn tainted_image_falls_back_to_exactly_one_proxy_fetch() {
    let body = format!(r#"{{"base64":"{}"}}"#, tiny_png_data_url());
    let proxy = spawn_http_server("200 OK", body, 4);
    let acquirer = ImageAcquirer::new(broker_with_proxy(&proxy.base_url));

    let node = Node::image("https://cdn.other-origin.com/p/1.jpg")
        .loaded(64, 48)
        .tainted()
        .build();

    let encoded = acquirer.extract(&node).await.expect("fallback should succeed");

    assert_eq!(encoded.mime(), "image/png");
    assert_eq!(proxy.hit_count(), 1, "taint fallback should fetch exactly once");
}

#[tokio::test]
async fn failed_fallback_surfaces_error_to_caller() {
    let proxy = spawn_http_server(
        "200 OK",
        r#"{"error":"Failed to fetch image: upstream 404"}"#.to_string(),
        4,
    );
    let acquirer = ImageAcquirer::new(broker_with_proxy(&proxy.base_url));

    let node = Node::image("https://cdn.other-origin.com/p/missing.jpg")
        .loaded(64, 48)
        .tainted()
        .build();

    let result = acquirer.extract(&node).await;
    assert!(matches!(result, Err(AcquireError::ProxyFallback(_))));
}

#[tokio::test]
async fn load_error_reports_load_failure_without_fallback() {
    let proxy = spawn_http_server("200 OK", "{}".to_string(), 4);
    let acquirer = ImageAcquirer::new(broker_with_proxy(&proxy.base_url));

    let node = Node::image("https://shop.example.com/p/broken.jpg").build();
    node.fail_load();

    let result = acquirer.extract(&node).await;

    assert!(matches!(result, Err(AcquireError::LoadFailed(_))));
    assert_eq!(proxy.hit_count(), 0);
}

#[tokio::test]
async fn extraction_waits_for_pending_image_load() {
    let proxy = spawn_http_server("200 OK", "{}".to_string(), 4);
    let acquirer = ImageAcquirer::new(broker_with_proxy(&proxy.base_url));

    let node = Node::image("https://shop.example.com/p/slow.jpg").build();
    let loader = node.clone();

    let load_task = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        loader.complete_load(image::RgbaImage::from_pixel(
            8,
            8,
            image::Rgba([5, 5, 5, 255]),
        ));
    });

    let encoded = acquirer.extract(&node).await.expect("extract should succeed");
    load_task.await.expect("load task should not panic");

    assert_eq!(encoded.mime(), "image/jpeg");
    assert_eq!(proxy.hit_count(), 0);
}
