use harrow_browser::{Cookie, PageDriver, ScriptedDriver, ScriptedPage};
use harrow_core::{AuthConfig, ErrorKind};
use harrow_session::{
    apply_session, AuthMode, AuthenticationController, Credentials, Session, SessionStore,
};
use std::collections::BTreeMap;
use std::time::Duration;

const LOGIN: &str = "https://www.linkedin.com/login";
const FEED: &str = "https://www.linkedin.com/feed/";
const AUTHWALL: &str = "https://www.linkedin.com/authwall";

fn login_page() -> ScriptedPage {
    ScriptedPage::new()
        .with_element("#username")
        .with_element("#password")
        .with_element("button[type=\"submit\"]")
}

fn auth_cookie(value: &str) -> Cookie {
    Cookie::new("li_at", value, ".linkedin.com")
}

/// Feed is reachable only with the expected auth cookie; otherwise the authwall is shown.
fn feed_gate(expected: &'static str) -> ScriptedDriver {
    ScriptedDriver::new()
        .page(LOGIN, login_page())
        .page(FEED, ScriptedPage::new().with_element("main"))
        .on_navigate(FEED, move |ctx| {
            (ctx.cookie("li_at") != Some(expected)).then(|| AUTHWALL.to_string())
        })
}

#[tokio::test]
async fn test_credential_login_produces_session() {
    let driver = ScriptedDriver::new()
        .page(LOGIN, login_page())
        .page(FEED, ScriptedPage::new().with_element("main"))
        .issue_cookie(FEED, auth_cookie("AQEDAR-fresh"))
        .on_click("button[type=\"submit\"]", |ctx| {
            (ctx.field("#username") == Some("me@example.com")
                && ctx.field("#password") == Some("correct horse"))
            .then(|| FEED.to_string())
        });
    let config = AuthConfig::default();
    let controller = AuthenticationController::new(&driver, &config);

    let session = controller
        .authenticate(AuthMode::Credentials(Credentials::new(
            "me@example.com",
            "correct horse",
        )))
        .await
        .expect("login should succeed");

    assert_eq!(session.cookie("li_at"), Some("AQEDAR-fresh"));
    assert_eq!(driver.filled("#username").as_deref(), Some("me@example.com"));
}

#[tokio::test(start_paused = true)]
async fn test_credential_login_reports_error_indicator() {
    let driver = ScriptedDriver::new()
        .page(LOGIN, login_page())
        .page(
            "https://www.linkedin.com/checkpoint/lg/login-submit",
            login_page().with_text("#error-for-password", " Wrong email or password. "),
        )
        .on_click("button[type=\"submit\"]", |_| {
            Some("https://www.linkedin.com/checkpoint/lg/login-submit".to_string())
        });
    let config = AuthConfig::default();

    let err = AuthenticationController::new(&driver, &config)
        .authenticate(AuthMode::Credentials(Credentials::new("me@example.com", "nope")))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidCredentials);
    assert!(err.to_string().contains("Wrong email or password."));
}

#[tokio::test(start_paused = true)]
async fn test_credential_login_times_out_without_indicator() {
    // Submit does nothing; no error is shown either (e.g. a captcha interstitial)
    let driver = ScriptedDriver::new().page(LOGIN, login_page());
    let config = AuthConfig::default();

    let err = AuthenticationController::new(&driver, &config)
        .authenticate(AuthMode::Credentials(Credentials::new("me@example.com", "pw")))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AuthenticationTimeout);
}

#[tokio::test(start_paused = true)]
async fn test_manual_login_times_out() {
    let driver = ScriptedDriver::new().page(LOGIN, login_page());
    let config = AuthConfig::default();

    let started = tokio::time::Instant::now();
    let err = AuthenticationController::new(&driver, &config)
        .with_poll_interval(Duration::from_secs(1))
        .authenticate(AuthMode::Manual {
            timeout: Some(Duration::from_secs(10)),
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AuthenticationTimeout);
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert!(started.elapsed() < Duration::from_secs(12));
}

#[tokio::test(start_paused = true)]
async fn test_manual_login_detects_authenticated_area() {
    let driver = std::sync::Arc::new(
        ScriptedDriver::new()
            .page(LOGIN, login_page())
            .page(FEED, ScriptedPage::new().with_element("main"))
            .issue_cookie(FEED, auth_cookie("AQEDAR-human")),
    );
    let config = AuthConfig::default();

    // The "human" finishes logging in a few seconds after the page opens
    let human = {
        let driver = driver.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            driver.navigate(FEED).await.unwrap();
        })
    };

    let session = AuthenticationController::new(driver.as_ref(), &config)
        .with_poll_interval(Duration::from_millis(200))
        .authenticate(AuthMode::Manual {
            timeout: Some(Duration::from_secs(60)),
        })
        .await
        .expect("manual login should be detected");
    human.await.unwrap();

    assert_eq!(session.cookie("li_at"), Some("AQEDAR-human"));
}

#[tokio::test]
async fn test_cookie_injection_success() {
    let driver = feed_gate("AQEDAR-valid");
    let config = AuthConfig::default();

    let session = AuthenticationController::new(&driver, &config)
        .authenticate(AuthMode::cookie("AQEDAR-valid"))
        .await
        .expect("valid cookie should authenticate");

    assert_eq!(session.cookie("li_at"), Some("AQEDAR-valid"));
    assert_eq!(driver.navigations(), vec![FEED.to_string()]);
}

#[tokio::test]
async fn test_cookie_injection_rejected() {
    let driver = feed_gate("AQEDAR-valid");
    let config = AuthConfig::default();

    let err = AuthenticationController::new(&driver, &config)
        .authenticate(AuthMode::cookie("AQEDAR-expired"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidCredentials);
    assert!(driver.cookies().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rejected_cookie_leaves_other_cookies_alone() {
    let driver = feed_gate("AQEDAR-valid");
    let config = AuthConfig::default();
    let consent = Cookie::new("li_gc", "consent", ".linkedin.com");
    driver.set_cookies(&[consent.clone()]).await.unwrap();

    let err = AuthenticationController::new(&driver, &config)
        .authenticate(AuthMode::cookie("AQEDAR-expired"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidCredentials);
    assert_eq!(driver.cookies().await.unwrap(), vec![consent]);
}

#[tokio::test]
async fn test_stored_session_restores_access() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = SessionStore::new(tmp.path().join("session.json"));
    let config = AuthConfig::default();

    let first = feed_gate("AQEDAR-valid");
    let session = AuthenticationController::new(&first, &config)
        .authenticate(AuthMode::cookie("AQEDAR-valid"))
        .await
        .unwrap();
    store.save(&session).unwrap();

    // A brand-new context is anonymous until the stored session is applied
    let second = feed_gate("AQEDAR-valid");
    let controller = AuthenticationController::new(&second, &config);
    assert!(!controller.is_authenticated().await.unwrap());

    let restored = store.load().unwrap();
    apply_session(&second, &restored, FEED).await.unwrap();
    assert!(controller.is_authenticated().await.unwrap());
}

#[tokio::test]
async fn test_apply_session_writes_storage() {
    let driver = ScriptedDriver::new();
    let session = Session::new(
        vec![auth_cookie("v")],
        BTreeMap::from([("theme".to_string(), "dark".to_string())]),
    );

    apply_session(&driver, &session, FEED).await.unwrap();

    assert_eq!(
        driver.local_storage().await.unwrap().get("theme").map(String::as_str),
        Some("dark")
    );
    assert_eq!(driver.cookies().await.unwrap().len(), 1);
}
