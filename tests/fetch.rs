mod support;

use anyhow::Result;
use planscrape::error::{ErrorKind, FetchError};
use planscrape::fetch::{DEFAULT_USER_AGENT, FetchOptions, Fetcher};
use std::collections::BTreeMap;
use std::time::Duration;
use support::{RESET_CONNECTION, TestServer};

fn quick_options(max_retries: u32) -> FetchOptions {
    FetchOptions {
        timeout: Duration::from_secs(5),
        max_retries,
        base_delay: Duration::from_millis(1),
        headers: BTreeMap::new(),
    }
}

#[tokio::test]
async fn success_returns_body() -> Result<()> {
    let server = TestServer::start().await?;
    server.route("/day/1", &[(200, "<p>hello</p>")]);

    let fetcher = Fetcher::new(quick_options(5))?;
    let body = fetcher.fetch(&server.url("/day/1")).await?;

    assert_eq!(body, "<p>hello</p>");
    assert_eq!(server.hits("/day/1"), 1);
    Ok(())
}

#[tokio::test]
async fn not_found_is_terminal_after_one_request() -> Result<()> {
    let server = TestServer::start().await?;
    server.route("/missing", &[(404, "gone")]);

    let fetcher = Fetcher::new(quick_options(5))?;
    let err = fetcher
        .fetch(&server.url("/missing"))
        .await
        .expect_err("404 must fail");

    assert!(matches!(err, FetchError::TerminalStatus { status: 404, .. }));
    assert_eq!(err.kind(), ErrorKind::TerminalHttp);
    assert_eq!(server.hits("/missing"), 1);
    Ok(())
}

#[tokio::test]
async fn service_unavailable_is_retried_until_success() -> Result<()> {
    let server = TestServer::start().await?;
    server.route("/flaky", &[(503, ""), (503, ""), (200, "done")]);

    let fetcher = Fetcher::new(quick_options(5))?;
    let body = fetcher.fetch(&server.url("/flaky")).await?;

    assert_eq!(body, "done");
    assert_eq!(server.hits("/flaky"), 3);
    Ok(())
}

#[tokio::test]
async fn rate_limit_is_retried() -> Result<()> {
    let server = TestServer::start().await?;
    server.route("/busy", &[(429, ""), (200, "ok")]);

    let fetcher = Fetcher::new(quick_options(1))?;
    assert_eq!(fetcher.fetch(&server.url("/busy")).await?, "ok");
    assert_eq!(server.hits("/busy"), 2);
    Ok(())
}

#[tokio::test]
async fn exhausted_retries_report_transient_failure() -> Result<()> {
    let server = TestServer::start().await?;
    server.route("/down", &[(500, "")]);

    let fetcher = Fetcher::new(quick_options(2))?;
    let err = fetcher
        .fetch(&server.url("/down"))
        .await
        .expect_err("persistent 500 must fail");

    match &err {
        FetchError::Transient {
            attempts, status, ..
        } => {
            assert_eq!(*attempts, 3);
            assert_eq!(*status, Some(500));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.kind(), ErrorKind::TransientNetwork);
    assert_eq!(server.hits("/down"), 3);
    Ok(())
}

#[tokio::test]
async fn slow_response_times_out_as_transient() -> Result<()> {
    let server = TestServer::start().await?;
    server.route_delayed("/slow", Duration::from_millis(500), &[(200, "late")]);

    let fetcher = Fetcher::new(FetchOptions {
        timeout: Duration::from_millis(50),
        ..quick_options(0)
    })?;
    let err = fetcher
        .fetch(&server.url("/slow"))
        .await
        .expect_err("timeout must fail");

    assert!(matches!(err, FetchError::Transient { attempts: 1, .. }));
    Ok(())
}

#[tokio::test]
async fn refused_connection_is_transient() -> Result<()> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);

    let fetcher = Fetcher::new(quick_options(1))?;
    let err = fetcher
        .fetch(&format!("http://{addr}/day/1"))
        .await
        .expect_err("nothing is listening");

    assert!(matches!(err, FetchError::Transient { attempts: 2, .. }));
    Ok(())
}

#[tokio::test]
async fn connection_reset_is_retried() -> Result<()> {
    let server = TestServer::start().await?;
    server.route(
        "/day/1",
        &[(RESET_CONNECTION, ""), (RESET_CONNECTION, ""), (200, "<p>back</p>")],
    );

    let fetcher = Fetcher::new(quick_options(5))?;
    let body = fetcher.fetch(&server.url("/day/1")).await?;

    assert_eq!(body, "<p>back</p>");
    assert_eq!(server.hits("/day/1"), 3);
    Ok(())
}

#[tokio::test]
async fn repeated_connection_resets_are_transient() -> Result<()> {
    let server = TestServer::start().await?;
    server.route("/day/1", &[(RESET_CONNECTION, "")]);

    let fetcher = Fetcher::new(quick_options(1))?;
    let err = fetcher
        .fetch(&server.url("/day/1"))
        .await
        .expect_err("every attempt is reset");

    assert!(matches!(err, FetchError::Transient { attempts: 2, .. }));
    assert_eq!(err.kind(), ErrorKind::TransientNetwork);
    assert_eq!(server.hits("/day/1"), 2);
    Ok(())
}

#[tokio::test]
async fn default_and_custom_headers_are_sent() -> Result<()> {
    let server = TestServer::start().await?;
    server.route("/headers", &[(200, "ok")]);

    let mut options = quick_options(0);
    options
        .headers
        .insert("Accept-Language".to_string(), "en-US".to_string());
    Fetcher::new(options)?
        .fetch(&server.url("/headers"))
        .await?;

    let request = server
        .last_request("/headers")
        .unwrap_or_default()
        .to_ascii_lowercase();
    assert!(request.contains(&format!("user-agent: {}", DEFAULT_USER_AGENT.to_ascii_lowercase())));
    assert!(request.contains("accept-language: en-us"));
    assert!(request.contains("accept: text/html"));
    Ok(())
}
