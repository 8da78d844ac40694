// 端到端：HTTP 桩 / 文件 / 嵌入资源 → 缓存 → 显示绑定
use std::io::{Cursor, Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba};
use web_image::{
    DisplayBinding, FetchHandle, ImageCache, ImageConfig, MemorySurfaceHost, PlayableImage,
    ResourceRegistry, SourceKey,
};

fn create_png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgba([(x % 255) as u8, (y % 255) as u8, 128, 255])
    });
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut cursor, ImageFormat::Png)
        .expect("failed to encode test image");
    cursor.into_inner()
}

/// 单次响应的 HTTP 桩，可在写回前等待 `delay`。
fn serve_once(body: Vec<u8>, delay: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server failed");
    let addr = listener.local_addr().expect("read local addr failed");

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept failed");
        let mut req_buf = [0u8; 1024];
        let _ = stream.read(&mut req_buf);
        thread::sleep(delay);
        let mut response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        )
        .into_bytes();
        response.extend_from_slice(&body);
        let _ = stream.write_all(&response);
        let _ = stream.flush();
    });

    format!("http://127.0.0.1:{}/a.png", addr.port())
}

fn new_cache(resources: Arc<ResourceRegistry>) -> (Arc<ImageCache>, Arc<MemorySurfaceHost>) {
    let host = Arc::new(MemorySurfaceHost::new());
    let cache = ImageCache::new(ImageConfig::default(), resources, host.clone())
        .expect("create cache failed");
    (Arc::new(cache), host)
}

async fn drain(cache: &ImageCache) {
    while cache.stats().in_flight > 0 {
        cache.wait_and_pump().await;
    }
}

#[tokio::test]
async fn png_over_http_succeeds_once_with_decoded_dimensions() {
    let url = serve_once(create_png_bytes(12, 7), Duration::ZERO);
    let (cache, host) = new_cache(Arc::new(ResourceRegistry::new()));
    let key = SourceKey::parse(&url).expect("parse key failed");

    let successes: Arc<Mutex<Vec<Arc<PlayableImage>>>> = Arc::default();
    let failures: Arc<Mutex<Vec<String>>> = Arc::default();
    let (ok, err) = (Arc::clone(&successes), Arc::clone(&failures));
    cache.request(
        &key,
        &FetchHandle::new(),
        move |image| ok.lock().expect("lock failed").push(image),
        move |reason| err.lock().expect("lock failed").push(reason),
    );
    drain(&cache).await;

    let successes = successes.lock().expect("lock failed");
    assert_eq!(successes.len(), 1);
    assert!(failures.lock().expect("lock failed").is_empty());
    assert!(!successes[0].is_animated());
    assert_eq!(successes[0].dimensions(), (12, 7));
    assert_eq!(host.created(), 1);
}

#[tokio::test]
async fn malformed_http_payload_fails_without_surface() {
    let url = serve_once(vec![0x00, 0x01, 0x02, 0x03], Duration::ZERO);
    let (cache, host) = new_cache(Arc::new(ResourceRegistry::new()));
    let binding = DisplayBinding::new(Arc::clone(&cache));

    binding.set_source(Some(&url)).expect("set source failed");
    drain(&cache).await;

    assert!(!binding.is_loading());
    assert!(binding.image().is_none());
    assert!(binding.last_error().is_some_and(|reason| !reason.is_empty()));
    assert_eq!(host.created(), 0);
}

#[tokio::test]
async fn switching_source_before_resolution_binds_only_latest() {
    let slow = serve_once(create_png_bytes(8, 8), Duration::from_millis(200));
    let fast = serve_once(create_png_bytes(3, 5), Duration::ZERO);
    let (cache, _host) = new_cache(Arc::new(ResourceRegistry::new()));
    let binding = DisplayBinding::new(Arc::clone(&cache));

    binding.set_source(Some(&slow)).expect("set source failed");
    binding.set_source(Some(&fast)).expect("set source failed");

    cache.wait_and_pump().await;
    let bound = binding.image().expect("latest image should be bound");
    assert_eq!(bound.dimensions(), (3, 5));

    drain(&cache).await;
    let still = binding.image().expect("latest image should stay bound");
    assert!(Arc::ptr_eq(&bound, &still));
    assert_eq!(cache.stats().entries, 2);
}

#[tokio::test]
async fn embedded_resources_resolve_with_and_without_assembly_prefix() {
    let resources = Arc::new(ResourceRegistry::new());
    resources
        .register("MyPlugin", "MyPlugin.Images.icon.png", create_png_bytes(4, 4))
        .expect("register failed");
    let (cache, _host) = new_cache(Arc::clone(&resources));

    let explicit = DisplayBinding::new(Arc::clone(&cache));
    explicit
        .set_source(Some("MyPlugin:MyPlugin.Images.icon.png"))
        .expect("set source failed");
    let bare = DisplayBinding::new(Arc::clone(&cache));
    bare.set_source(Some("MyPlugin.Images.icon.png"))
        .expect("set source failed");
    let missing = DisplayBinding::new(Arc::clone(&cache));
    missing
        .set_source(Some("Other:Other.Images.none.png"))
        .expect("set source failed");

    drain(&cache).await;

    assert_eq!(explicit.image().map(|image| image.dimensions()), Some((4, 4)));
    assert_eq!(bare.image().map(|image| image.dimensions()), Some((4, 4)));
    assert!(missing.image().is_none());
    assert!(missing.last_error().is_some());
}

#[tokio::test]
async fn local_file_source_is_read_from_disk() {
    let path = std::env::temp_dir().join(format!("webimage-it-{}.png", std::process::id()));
    std::fs::write(&path, create_png_bytes(6, 2)).expect("write temp file failed");
    let (cache, _host) = new_cache(Arc::new(ResourceRegistry::new()));
    let binding = DisplayBinding::new(Arc::clone(&cache));

    binding
        .set_source(path.to_str())
        .expect("set source failed");
    drain(&cache).await;
    let _ = std::fs::remove_file(&path);

    assert_eq!(binding.image().map(|image| image.dimensions()), Some((6, 2)));
}
