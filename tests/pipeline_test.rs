//! 端到端流水线测试：页面判定 → 监视挂入口 → 点击 → 采集 → 代理 → 结果回流。

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use virtual_tryon::broker::{Broker, BrokerConfig};
use virtual_tryon::controller::PageController;
use virtual_tryon::dom::{Document, Node};
use virtual_tryon::store::{Store, StoredAvatar, StoredSettings};
use virtual_tryon::ui::{self, UiEvent};
use virtual_tryon::watcher::SelectionMode;

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

const IMAGE_SRC: &str = "https://cdn.example.com/photos/summer-look.jpg";

fn temp_store(tag: &str) -> Arc<Store> {
    let dir = std::env::temp_dir()
        .join("virtual-tryon-pipeline-test")
        .join(format!("{}-{}", tag, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    Arc::new(Store::new(dir))
}

/// 标题含服装关键词、无选择器命中、alt 带 "dress model" 的商品页。
fn summer_dress_document() -> Document {
    let doc = Document::builder("https://boutique.example.com/item/88217")
        .title("Women's Summer Dress — Buy Now")
        .build();

    doc.append(
        &Node::image(IMAGE_SRC)
            .alt("dress model")
            .loaded(600, 800)
            .build(),
    );

    doc
}

fn stored_settings_auto_on() -> StoredSettings {
    StoredSettings {
        auto_detect_enabled: true,
        ..StoredSettings::default()
    }
}

fn stored_avatar() -> StoredAvatar {
    StoredAvatar {
        base64: format!("data:image/jpeg;base64,{}", "B".repeat(400)),
        file_name: "me.jpg".to_string(),
        upload_date: chrono::Utc::now(),
        file_size: 400,
    }
}

fn drain(rx: &mut ui::UiEventReceiver) -> Vec<UiEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn clothing_page_attaches_hover_affordance_within_debounce_window() {
    let _ = env_logger::builder().is_test(true).try_init();

    let store = temp_store("affordance");
    store.save_settings(&stored_settings_auto_on()).expect("save settings failed");

    let broker = Broker::new(BrokerConfig::new(
        "http://127.0.0.1:9/try-on",
        "http://127.0.0.1:9/proxy",
        "http://127.0.0.1:9/config",
    ))
    .expect("broker init failed")
    .spawn();

    let (tx, mut rx) = ui::channel();
    let controller = PageController::new(summer_dress_document(), broker, store, tx);

    controller.activate();
    assert!(controller.watcher().is_running());
    assert_eq!(controller.watcher().mode(), SelectionMode::Automatic);

    // 防抖窗口（150ms）过后入口出现
    tokio::time::sleep(Duration::from_millis(300)).await;

    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, UiEvent::AffordanceAttached { src, .. } if src == IMAGE_SRC)));

    // 悬停显示入口
    controller.watcher().pointer_enter_image(IMAGE_SRC);
    assert!(controller.watcher().is_affordance_visible(IMAGE_SRC));
}

#[tokio::test]
async fn service_503_surfaces_exact_unavailable_message() {
    let _ = env_logger::builder().is_test(true).try_init();

    let try_on = spawn_http_server(
        "503 Service Unavailable",
        r#"{"error":"overloaded"}"#.to_string(),
        2,
    );

    let store = temp_store("e2e-503");
    store.save_settings(&stored_settings_auto_on()).expect("save settings failed");
    store.save_avatar(&stored_avatar()).expect("save avatar failed");

    let broker = Broker::new(BrokerConfig::new(
        &format!("{}/try-on", try_on.base_url),
        "http://127.0.0.1:9/proxy",
        "http://127.0.0.1:9/config",
    ))
    .expect("broker init failed")
    .spawn();

    let (tx, mut rx) = ui::channel();
    let controller = PageController::new(summer_dress_document(), broker, store, tx);

    controller.activate();
    tokio::time::sleep(Duration::from_millis(300)).await;
    drain(&mut rx);

    controller.handle_try_on_click(IMAGE_SRC).await;

    let events = drain(&mut rx);

    // 入口经历忙碌并恢复空闲
    assert!(events
        .iter()
        .any(|e| matches!(e, UiEvent::AffordanceBusy { busy: true, .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, UiEvent::AffordanceBusy { busy: false, .. })));

    let error = events.iter().find_map(|e| match e {
        UiEvent::TryOnError { message } => Some(message.clone()),
        _ => None,
    });
    assert_eq!(
        error.as_deref(),
        Some("Virtual Try-On service is temporarily unavailable. Please try again later.")
    );

    // 单次投递，不自动重试
    assert_eq!(try_on.hit_count(), 1);
}

#[tokio::test]
async fn successful_try_on_flows_result_back_to_ui() {
    let try_on = spawn_http_server(
        "200 OK",
        r#"{"tryOnImageBase64":"R0VORVJBVEVE"}"#.to_string(),
        2,
    );

    let store = temp_store("e2e-success");
    store.save_settings(&stored_settings_auto_on()).expect("save settings failed");
    store.save_avatar(&stored_avatar()).expect("save avatar failed");

    let broker = Broker::new(BrokerConfig::new(
        &format!("{}/try-on", try_on.base_url),
        "http://127.0.0.1:9/proxy",
        "http://127.0.0.1:9/config",
    ))
    .expect("broker init failed")
    .spawn();

    let (tx, mut rx) = ui::channel();
    let controller = PageController::new(summer_dress_document(), broker, store, tx);

    controller.activate();
    tokio::time::sleep(Duration::from_millis(300)).await;
    drain(&mut rx);

    controller.handle_try_on_click(IMAGE_SRC).await;

    let events = drain(&mut rx);
    let result = events.iter().find_map(|e| match e {
        UiEvent::TryOnResult { image_base64 } => Some(image_base64.clone()),
        _ => None,
    });
    assert_eq!(result.as_deref(), Some("R0VORVJBVEVE"));
}

#[tokio::test]
async fn unauthorized_service_prompts_sign_in() {
    let try_on = spawn_http_server("403 Forbidden", "{}".to_string(), 2);

    let store = temp_store("e2e-auth");
    store.save_settings(&stored_settings_auto_on()).expect("save settings failed");
    store.save_avatar(&stored_avatar()).expect("save avatar failed");

    let broker = Broker::new(BrokerConfig::new(
        &format!("{}/try-on", try_on.base_url),
        "http://127.0.0.1:9/proxy",
        "http://127.0.0.1:9/config",
    ))
    .expect("broker init failed")
    .spawn();

    let (tx, mut rx) = ui::channel();
    let controller = PageController::new(summer_dress_document(), broker, store, tx);

    controller.activate();
    tokio::time::sleep(Duration::from_millis(300)).await;
    drain(&mut rx);

    controller.handle_try_on_click(IMAGE_SRC).await;

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(e, UiEvent::AuthRequired)));
}
