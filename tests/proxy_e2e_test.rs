//! End-to-end proxy tests
//!
//! Runs the real server against an in-process stub origin and drives it
//! with a plain HTTP client (redirects disabled, so 302 fallbacks are
//! observable).

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

use bandwidth_hero_proxy::config::Config;
use bandwidth_hero_proxy::server::ProxyServer;

/// Pseudo-random RGBA noise so generated images stay incompressible and
/// comfortably above the policy thresholds
fn noise_image(width: u32, height: u32) -> image::RgbaImage {
    image::RgbaImage::from_fn(width, height, |x, y| {
        let seed = x
            .wrapping_mul(2_654_435_761)
            .wrapping_add(y.wrapping_mul(40_503));
        image::Rgba([
            (seed >> 8) as u8,
            (seed >> 16) as u8,
            (seed >> 24) as u8,
            255,
        ])
    })
}

fn encode(img: image::RgbaImage, format: image::ImageFormat) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut buffer, format)
        .unwrap();
    buffer.into_inner()
}

fn noise_png(width: u32, height: u32) -> Vec<u8> {
    encode(noise_image(width, height), image::ImageFormat::Png)
}

fn noise_jpeg(width: u32, height: u32) -> Vec<u8> {
    encode(noise_image(width, height), image::ImageFormat::Jpeg)
}

fn tiny_png() -> Vec<u8> {
    encode(
        image::RgbaImage::from_pixel(8, 8, image::Rgba([40, 40, 40, 255])),
        image::ImageFormat::Png,
    )
}

fn origin_route(path: &str) -> Response<Full<Bytes>> {
    let (status, content_type, body): (StatusCode, &str, Vec<u8>) = match path {
        "/image.png" => (StatusCode::OK, "image/png", noise_png(200, 200)),
        "/photo.jpg" => (StatusCode::OK, "image/jpeg", noise_jpeg(100, 100)),
        "/tall.png" => (StatusCode::OK, "image/png", noise_png(2, 20000)),
        "/tiny.png" => (StatusCode::OK, "image/png", tiny_png()),
        "/corrupt.png" => (StatusCode::OK, "image/png", vec![0xAB; 2048]),
        "/page.html" => (
            StatusCode::OK,
            "text/html",
            b"<html><body>hello</body></html>".to_vec(),
        ),
        "/missing" => (StatusCode::NOT_FOUND, "text/plain", b"not found".to_vec()),
        _ => (StatusCode::NOT_FOUND, "text/plain", Vec::new()),
    };

    Response::builder()
        .status(status)
        .header("content-type", content_type)
        .header("content-length", body.len())
        .header("cache-control", "max-age=3600")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

/// Spawn the stub origin; returns its address and a hit counter
async fn spawn_origin() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_server = Arc::clone(&hits);

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => break,
            };
            let hits = Arc::clone(&hits_server);
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    hits.fetch_add(1, Ordering::SeqCst);
                    let response = origin_route(req.uri().path());
                    async move { Ok::<_, Infallible>(response) }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    (addr, hits)
}

async fn spawn_proxy() -> SocketAddr {
    let mut config = Config::default();
    config.server.address = "127.0.0.1".to_string();
    config.server.port = 0;

    let server = ProxyServer::bind(&config).await.unwrap();
    let addr = server.local_addr();
    tokio::spawn(server.run());
    addr
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()
        .unwrap()
}

fn proxy_url(proxy: SocketAddr, target: &str) -> String {
    format!("http://{}/?url={}", proxy, urlencoding::encode(target))
}

#[tokio::test]
async fn no_url_param_returns_acknowledgement() {
    let proxy = spawn_proxy().await;

    let response = client()
        .get(format!("http://{}/", proxy))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "bandwidth-hero-proxy");
}

#[tokio::test]
async fn invalid_url_returns_400() {
    let proxy = spawn_proxy().await;

    let response = client()
        .get(proxy_url(proxy, "ftp://example.com/file"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn non_root_path_returns_404() {
    let proxy = spawn_proxy().await;

    let response = client()
        .get(format!("http://{}/other?url=http://example.com/a", proxy))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn non_get_method_returns_405() {
    let proxy = spawn_proxy().await;

    let response = client()
        .post(format!("http://{}/", proxy))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn image_is_transcoded_to_webp() {
    let (origin, _) = spawn_origin().await;
    let proxy = spawn_proxy().await;
    let target = format!("http://{}/image.png", origin);
    let original_size = noise_png(200, 200).len() as u64;

    let response = client().get(proxy_url(proxy, &target)).send().await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers.get("content-type").unwrap(), "image/webp");
    assert_eq!(headers.get("content-encoding").unwrap(), "identity");
    assert_eq!(headers.get("access-control-allow-origin").unwrap(), "*");
    assert_eq!(
        headers.get("x-original-size").unwrap().to_str().unwrap(),
        original_size.to_string()
    );

    let body = response.bytes().await.unwrap();
    assert_eq!(&body[0..4], b"RIFF");
    assert_eq!(&body[8..12], b"WEBP");

    // x-bytes-saved is exactly original minus emitted length
    let saved: i64 = headers
        .get("x-bytes-saved")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(saved, original_size as i64 - body.len() as i64);
    let content_length: usize = headers
        .get("content-length")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(content_length, body.len());
}

#[tokio::test]
async fn jpeg_param_selects_jpeg_output() {
    let (origin, _) = spawn_origin().await;
    let proxy = spawn_proxy().await;
    let target = format!("http://{}/photo.jpg", origin);

    let response = client()
        .get(format!("{}&jpeg=1", proxy_url(proxy, &target)))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "image/jpeg"
    );
    let body = response.bytes().await.unwrap();
    assert_eq!(&body[0..2], &[0xFF, 0xD8]);
}

#[tokio::test]
async fn grayscale_disabled_keeps_color() {
    let (origin, _) = spawn_origin().await;
    let proxy = spawn_proxy().await;
    let target = format!("http://{}/photo.jpg", origin);

    let response = client()
        .get(format!("{}&jpeg=1&bw=0", proxy_url(proxy, &target)))
        .send()
        .await
        .unwrap();
    let body = response.bytes().await.unwrap();

    let img = image::load_from_memory(&body).unwrap().to_rgb8();
    let colorful = img.pixels().any(|p| {
        let [r, g, b] = p.0;
        r.abs_diff(g) > 16 || g.abs_diff(b) > 16
    });
    assert!(colorful, "expected color output when grayscale is disabled");
}

#[tokio::test]
async fn tall_image_height_is_capped() {
    let (origin, _) = spawn_origin().await;
    let proxy = spawn_proxy().await;
    let target = format!("http://{}/tall.png", origin);

    let response = client().get(proxy_url(proxy, &target)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "image/webp"
    );

    let body = response.bytes().await.unwrap();
    let decoded = webp::Decoder::new(&body).decode().unwrap();
    assert_eq!(decoded.height(), 16383);
    // 2 * 16383 / 20000 rounds to 2: aspect ratio preserved
    assert_eq!(decoded.width(), 2);
}

#[tokio::test]
async fn non_image_content_is_bypassed() {
    let (origin, _) = spawn_origin().await;
    let proxy = spawn_proxy().await;
    let target = format!("http://{}/page.html", origin);

    let response = client().get(proxy_url(proxy, &target)).send().await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers.get("x-proxy-bypass").unwrap(), "1");
    assert_eq!(headers.get("content-type").unwrap(), "text/html");
    assert_eq!(headers.get("content-encoding").unwrap(), "identity");

    let body = response.bytes().await.unwrap();
    assert_eq!(&body[..], b"<html><body>hello</body></html>");
}

#[tokio::test]
async fn small_image_is_bypassed() {
    let (origin, _) = spawn_origin().await;
    let proxy = spawn_proxy().await;
    let target = format!("http://{}/tiny.png", origin);

    let response = client().get(proxy_url(proxy, &target)).send().await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-proxy-bypass").unwrap(), "1");
    let body = response.bytes().await.unwrap();
    assert_eq!(&body[..], &tiny_png()[..]);
}

#[tokio::test]
async fn range_request_is_bypassed() {
    let (origin, _) = spawn_origin().await;
    let proxy = spawn_proxy().await;
    let target = format!("http://{}/image.png", origin);

    let response = client()
        .get(proxy_url(proxy, &target))
        .header("range", "bytes=0-99")
        .send()
        .await
        .unwrap();

    assert_eq!(response.headers().get("x-proxy-bypass").unwrap(), "1");
}

#[tokio::test]
async fn origin_404_redirects_to_original_url() {
    let (origin, _) = spawn_origin().await;
    let proxy = spawn_proxy().await;
    let target = format!("http://{}/missing", origin);

    let response = client().get(proxy_url(proxy, &target)).send().await.unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    let headers = response.headers();
    assert_eq!(headers.get("location").unwrap().to_str().unwrap(), target);
    assert_eq!(headers.get("content-length").unwrap(), "0");
    // The redirect must not inherit the origin's caching headers
    assert!(headers.get("cache-control").is_none());
    assert!(headers.get("etag").is_none());
}

#[tokio::test]
async fn corrupt_image_redirects_to_original_url() {
    let (origin, _) = spawn_origin().await;
    let proxy = spawn_proxy().await;
    let target = format!("http://{}/corrupt.png", origin);

    let response = client().get(proxy_url(proxy, &target)).send().await.unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers().get("location").unwrap().to_str().unwrap(),
        target
    );
}

#[tokio::test]
async fn out_of_range_quality_redirects() {
    let (origin, _) = spawn_origin().await;
    let proxy = spawn_proxy().await;
    let target = format!("http://{}/image.png", origin);

    let response = client()
        .get(format!("{}&l=200", proxy_url(proxy, &target)))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
}

#[tokio::test]
async fn loop_is_detected_before_any_upstream_call() {
    let (origin, hits) = spawn_origin().await;
    let proxy = spawn_proxy().await;
    let target = format!("http://{}/image.png", origin);

    let response = client()
        .get(proxy_url(proxy, &target))
        .header("via", "1.1 bandwidth-hero")
        .header("x-forwarded-for", "127.0.0.1")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers().get("location").unwrap().to_str().unwrap(),
        target
    );
    assert_eq!(hits.load(Ordering::SeqCst), 0, "origin must not be contacted");
}

#[tokio::test]
async fn foreign_via_header_is_proxied_normally() {
    let (origin, hits) = spawn_origin().await;
    let proxy = spawn_proxy().await;
    let target = format!("http://{}/page.html", origin);

    let response = client()
        .get(proxy_url(proxy, &target))
        .header("via", "1.1 some-other-proxy")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
