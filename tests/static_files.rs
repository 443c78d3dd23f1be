//! Static file serving: ranges, conditional requests, path safety.

use std::fs;

use h1_wire::config::RouteKind;
use h1_wire::ServerConfig;

mod common;

struct Site {
    _dir: tempfile::TempDir,
    server: common::TestServer,
}

async fn site() -> Site {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
    fs::write(dir.path().join("digits.txt"), "0123456789").unwrap();
    fs::create_dir(dir.path().join("docs")).unwrap();
    fs::write(dir.path().join("docs").join("read me.txt"), "spaced").unwrap();

    let mut config = ServerConfig::default();
    let root = dir.path().to_str().unwrap();
    config.routes = vec![common::route("files", Some("/static"), RouteKind::Static, Some(root))];
    let server = common::start_server(config).await;
    Site { _dir: dir, server }
}

#[tokio::test]
async fn serves_files_and_index() {
    let site = site().await;
    let client = common::client();

    let res = client.get(site.server.url("/static/digits.txt")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["content-type"], "text/plain; charset=utf-8");
    assert_eq!(res.headers()["accept-ranges"], "bytes");
    assert_eq!(res.text().await.unwrap(), "0123456789");

    let res = client.get(site.server.url("/static/")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["content-type"], "text/html; charset=utf-8");
    assert_eq!(res.text().await.unwrap(), "<h1>home</h1>");

    let res = client.get(site.server.url("/static/docs/read%20me.txt")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "spaced");

    let res = client.get(site.server.url("/static/docs/")).send().await.unwrap();
    assert_eq!(res.status(), 404);

    site.server.stop().await;
}

#[tokio::test]
async fn head_reports_length_without_body() {
    let site = site().await;

    let out = common::raw_exchange(
        site.server.addr,
        b"HEAD /static/digits.txt HTTP/1.1\r\nHost: t\r\n\r\n",
    )
    .await;
    assert!(out.starts_with("HTTP/1.1 200 OK\r\n"), "{out}");
    assert!(out.contains("Content-Length: 10\r\n"));
    assert!(out.ends_with("\r\n\r\n"));

    site.server.stop().await;
}

#[tokio::test]
async fn single_range_gets_206() {
    let site = site().await;
    let client = common::client();
    let url = site.server.url("/static/digits.txt");

    let res = client.get(&url).header("Range", "bytes=2-5").send().await.unwrap();
    assert_eq!(res.status(), 206);
    assert_eq!(res.headers()["content-range"], "bytes 2-5/10");
    assert_eq!(res.text().await.unwrap(), "2345");

    let res = client.get(&url).header("Range", "bytes=-3").send().await.unwrap();
    assert_eq!(res.status(), 206);
    assert_eq!(res.text().await.unwrap(), "789");

    let res = client.get(&url).header("Range", "bytes=20-").send().await.unwrap();
    assert_eq!(res.status(), 416);
    assert_eq!(res.headers()["content-range"], "bytes */10");

    let res = client.get(&url).header("Range", "bytes=0-1,4-5").send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "0123456789");

    site.server.stop().await;
}

#[tokio::test]
async fn matching_etag_gets_304() {
    let site = site().await;
    let client = common::client();
    let url = site.server.url("/static/digits.txt");

    let res = client.get(&url).send().await.unwrap();
    let etag = res.headers()["etag"].to_str().unwrap().to_string();

    let res = client.get(&url).header("If-None-Match", &etag).send().await.unwrap();
    assert_eq!(res.status(), 304);
    assert_eq!(res.headers()["etag"], etag.as_str());
    assert!(res.bytes().await.unwrap().is_empty());

    let res = client.get(&url).header("If-None-Match", "\"other\"").send().await.unwrap();
    assert_eq!(res.status(), 200);

    site.server.stop().await;
}

#[tokio::test]
async fn rejects_traversal_and_other_methods() {
    let site = site().await;

    let out = common::raw_exchange(
        site.server.addr,
        b"GET /static/%2e%2e/secret HTTP/1.1\r\nHost: t\r\n\r\n\
          GET /static/a%00b HTTP/1.1\r\nHost: t\r\n\r\n\
          DELETE /static/digits.txt HTTP/1.1\r\nHost: t\r\n\r\n",
    )
    .await;
    let statuses: Vec<&str> = out
        .lines()
        .filter(|line| line.starts_with("HTTP/1.1 "))
        .collect();
    assert_eq!(
        statuses,
        ["HTTP/1.1 403 Forbidden", "HTTP/1.1 403 Forbidden", "HTTP/1.1 405 Method Not Allowed"]
    );
    assert!(out.contains("Allow: GET, HEAD\r\n"));

    site.server.stop().await;
}
