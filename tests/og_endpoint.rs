use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use devimpact_og::{
    AppState, OgRenderer,
    config::{BrandingConfig, ImageRenderConfig},
};
use tower::ServiceExt;

fn image_cfg(cache_enabled: bool) -> ImageRenderConfig {
    ImageRenderConfig {
        optimize_speed: true,
        cache_enabled,
        avatar_timeout_ms: 500,
        ..ImageRenderConfig::default()
    }
}

fn build_app(cache_enabled: bool) -> Router {
    let state = AppState::new(OgRenderer::new(
        BrandingConfig::default(),
        image_cfg(cache_enabled),
    ));
    devimpact_og::build_app(state, "/api")
}

async fn get(app: Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let resp = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .expect("request");
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body")
        .to_vec();
    (status, headers, body)
}

fn header_str<'a>(headers: &'a axum::http::HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

#[tokio::test]
async fn every_variant_returns_png_with_cache_headers() {
    let cases = [
        ("/og", "default"),
        ("/og?title=Changelog&description=What%20shipped", "custom"),
        ("/og?username=octo&name=Octo%20Cat&projects=3", "profile"),
        ("/api/og?title=Prefixed", "custom"),
    ];
    for (uri, variant) in cases {
        let (status, headers, body) = get(build_app(false), uri).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        assert_eq!(header_str(&headers, "content-type"), "image/png", "{uri}");
        assert_eq!(
            header_str(&headers, "cache-control"),
            "public, max-age=3600, stale-while-revalidate=86400"
        );
        assert_eq!(header_str(&headers, "x-og-variant"), variant, "{uri}");
        assert!(header_str(&headers, "etag").starts_with('"'));
        assert!(!header_str(&headers, "x-request-id").is_empty());

        let img = image::load_from_memory(&body).expect("decode png");
        assert_eq!((img.width(), img.height()), (1200, 630), "{uri}");
    }
}

#[tokio::test]
async fn output_is_deterministic_without_cache() {
    let uri = "/og?username=octo&name=Octo&description=Builds%20things&projects=1&achievements=7";
    let (_, h1, a) = get(build_app(false), uri).await;
    let (_, h2, b) = get(build_app(false), uri).await;
    assert_eq!(a, b);
    assert_eq!(h1.get(header::ETAG), h2.get(header::ETAG));
}

#[tokio::test]
async fn alternate_formats_use_matching_content_type() {
    for (fmt, ct, expected) in [
        ("jpeg", "image/jpeg", Some(image::ImageFormat::Jpeg)),
        ("jpg", "image/jpeg", Some(image::ImageFormat::Jpeg)),
        ("webp", "image/webp", Some(image::ImageFormat::WebP)),
        ("svg", "image/svg+xml; charset=utf-8", None),
        ("gif", "image/png", Some(image::ImageFormat::Png)),
    ] {
        let (status, headers, body) = get(build_app(false), &format!("/og?format={fmt}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(header_str(&headers, "content-type"), ct, "{fmt}");
        match expected {
            Some(f) => assert_eq!(image::guess_format(&body).expect("guess"), f),
            None => assert!(String::from_utf8(body).expect("utf8").starts_with("<svg")),
        }
    }
}

#[tokio::test]
async fn stat_line_pluralizes_only_literal_one() {
    let (_, _, body) = get(
        build_app(false),
        "/og?username=octo&name=Octo&projects=1&achievements=1&format=svg",
    )
    .await;
    let svg = String::from_utf8(body).expect("utf8");
    assert!(svg.contains("1 project · 1 achievements"), "{svg}");

    let (_, _, body) = get(build_app(false), "/og?username=octo&name=Octo&format=svg").await;
    let svg = String::from_utf8(body).expect("utf8");
    assert!(svg.contains("0 projects · 0 achievements"));
}

#[tokio::test]
async fn hostile_text_is_escaped() {
    let (status, _, body) = get(
        build_app(false),
        "/og?title=%3Cscript%3Ealert(1)%3C%2Fscript%3E&format=svg",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let svg = String::from_utf8(body).expect("utf8");
    assert!(!svg.contains("<script>"));
    assert!(svg.contains("&lt;script&gt;"));
}

#[tokio::test]
async fn failing_avatar_still_renders_profile() {
    let (status, headers, body) = get(
        build_app(true),
        "/og?username=octo&name=Octo&avatar=http%3A%2F%2F127.0.0.1%3A9%2Fa.png",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header_str(&headers, "x-og-variant"), "profile");
    let img = image::load_from_memory(&body).expect("decode");
    assert_eq!((img.width(), img.height()), (1200, 630));
}

#[tokio::test]
async fn unsupported_avatar_scheme_is_ignored() {
    let (status, headers, body) = get(
        build_app(false),
        "/og?username=octo&name=Octo&avatar=file%3A%2F%2F%2Fetc%2Fpasswd&format=svg",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header_str(&headers, "x-og-variant"), "profile");
    let svg = String::from_utf8(body).expect("utf8");
    assert!(!svg.contains("<image"));
}

#[tokio::test]
async fn malformed_query_never_fails() {
    for uri in [
        "/og?%zz=%zz",
        "/og?title=%E0%A4%A",
        "/og?&&&=&title",
        "/og?format=%00&username=%FF",
    ] {
        let (status, headers, body) = get(build_app(false), uri).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        assert!(!header_str(&headers, "x-og-variant").is_empty(), "{uri}");
        assert!(image::load_from_memory(&body).is_ok(), "{uri}");
    }

    let (_, headers, _) = get(build_app(false), "/og?username=&name=&title=").await;
    assert_eq!(header_str(&headers, "x-og-variant"), "default");
}

#[tokio::test]
async fn title_without_identity_wins_over_partial_profile() {
    let (_, headers, _) = get(build_app(false), "/og?username=octo&title=Docs").await;
    assert_eq!(header_str(&headers, "x-og-variant"), "custom");
    let (_, headers, _) = get(build_app(false), "/og?name=Octo").await;
    assert_eq!(header_str(&headers, "x-og-variant"), "default");
}

#[tokio::test]
async fn health_reports_service() {
    let (status, _, body) = get(build_app(true), "/health").await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "devimpact-og");
}

#[tokio::test]
async fn fallback_image_is_valid_for_every_raster_format() {
    let renderer = OgRenderer::new(BrandingConfig::default(), image_cfg(false));
    for format in [
        devimpact_og::OutputFormat::Png,
        devimpact_og::OutputFormat::Jpeg,
        devimpact_og::OutputFormat::Webp,
    ] {
        let img = renderer.fallback_for(
            format,
            &devimpact_og::AppError::ImageRendererError("forced".into()),
        );
        assert!(img.fallback);
        assert_eq!(img.variant, "fallback");
        let decoded = image::load_from_memory(&img.bytes).expect("decode fallback");
        assert_eq!((decoded.width(), decoded.height()), (1200, 630));
    }
}

/// 在回环地址上提供一张合法 PNG 头像
async fn serve_avatar() -> std::net::SocketAddr {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut png = Vec::new();
    image::DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
        32,
        32,
        image::Rgba([10, 200, 10, 255]),
    ))
    .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
    .expect("encode png");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let png = png.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    png.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&png).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

#[tokio::test]
async fn loopback_avatar_is_not_embedded_by_default() {
    let addr = serve_avatar().await;
    let uri = format!(
        "/og?username=octo&name=Octo&format=svg&avatar=http%3A%2F%2F{}%3A{}%2Fa.png",
        addr.ip(),
        addr.port()
    );

    let (status, headers, body) = get(build_app(false), &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header_str(&headers, "x-og-variant"), "profile");
    let svg = String::from_utf8(body).expect("utf8");
    assert!(!svg.contains("<image"), "loopback avatar leaked into output");

    // 显式放开后同一地址可用，说明上面的省略来自地址校验
    let state = AppState::new(OgRenderer::new(
        BrandingConfig::default(),
        ImageRenderConfig {
            avatar_allow_private_hosts: true,
            ..image_cfg(false)
        },
    ));
    let (_, _, body) = get(devimpact_og::build_app(state, "/api"), &uri).await;
    let svg = String::from_utf8(body).expect("utf8");
    assert!(svg.contains("<image"));
}
