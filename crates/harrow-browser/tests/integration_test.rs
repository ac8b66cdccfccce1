use harrow_browser::{BrowserEngine, Cookie, PageDriver};
use harrow_core::BrowserConfig;
use std::collections::BTreeMap;
use std::time::Duration;

#[tokio::test]
#[ignore] // Requires Chrome/Chromium installed
async fn test_browser_engine_launch_and_close() {
    let engine = BrowserEngine::launch(&BrowserConfig::default()).await;
    assert!(engine.is_ok(), "Failed to launch browser engine");
    engine.unwrap().close().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Chrome/Chromium installed
async fn test_navigation_and_extraction() {
    let engine = BrowserEngine::launch(&BrowserConfig::default()).await.unwrap();

    engine.navigate("https://example.com").await.unwrap();
    engine
        .wait_for("h1", Duration::from_secs(10))
        .await
        .expect("heading should render");

    let heading = engine.extract_text("h1").await.unwrap();
    assert_eq!(heading.as_deref(), Some("Example Domain"));
    assert!(engine.current_url().await.unwrap().starts_with("https://example.com"));

    engine.close().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Chrome/Chromium installed
async fn test_cookie_and_storage_round_trip() {
    let engine = BrowserEngine::launch(&BrowserConfig::default()).await.unwrap();
    engine.navigate("https://example.com").await.unwrap();

    engine
        .set_cookies(&[Cookie::new("harrow_test", "1", "example.com")])
        .await
        .unwrap();
    let cookies = engine.cookies().await.unwrap();
    assert!(cookies.iter().any(|c| c.name == "harrow_test" && c.value == "1"));

    let entries = BTreeMap::from([("k".to_string(), "v".to_string())]);
    engine.set_local_storage(&entries).await.unwrap();
    assert_eq!(engine.local_storage().await.unwrap().get("k").map(String::as_str), Some("v"));

    engine.close().await.unwrap();
}
