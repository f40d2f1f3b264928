//! Router-level scenarios for login, bootstrap, session verification and
//! password reset, run against the in-memory stores.

use super::{AuthConfig, AuthState, BootstrapMode, ManualClock, TokenPurpose, TokenService};
use crate::{
    api::{app, email::MemoryEmailSender, error::ErrorBody, handlers::auth::password::test_hasher},
    blob::MemoryBlobStore,
    store::Stores,
};
use anyhow::{Result, anyhow};
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Response,
};
use secrecy::SecretString;
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};
use tower::ServiceExt;

const START: i64 = 1_760_000_000;
const ADMIN_EMAIL: &str = "owner@studio.test";
const PASSWORD: &str = "correct horse battery";

struct Harness {
    router: Router,
    stores: Stores,
    clock: Arc<ManualClock>,
    email: Arc<MemoryEmailSender>,
    auth_state: Arc<AuthState>,
}

fn harness_with(config: AuthConfig) -> Result<Harness> {
    let stores = Stores::memory();
    let clock = Arc::new(ManualClock::new(START));
    let tokens = TokenService::new(&SecretString::from("test-secret"), clock.clone())?;
    let email = Arc::new(MemoryEmailSender::default());
    let auth_state = Arc::new(AuthState::new(
        config,
        tokens,
        test_hasher(),
        stores.credentials.clone(),
        email.clone(),
    ));
    let router = app(
        stores.clone(),
        auth_state.clone(),
        Arc::new(MemoryBlobStore::default()),
        None,
    )?;
    Ok(Harness {
        router,
        stores,
        clock,
        email,
        auth_state,
    })
}

fn harness() -> Result<Harness> {
    harness_with(AuthConfig::new("http://localhost:3000".to_string()))
}

impl Harness {
    async fn send(&self, request: Request<Body>) -> Result<Response> {
        Ok(self.router.clone().oneshot(request).await?)
    }

    async fn post_json(&self, uri: &str, body: &Value) -> Result<Response> {
        self.send(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))?,
        )
        .await
    }

    async fn login(&self, email: &str, password: &str) -> Result<Response> {
        self.post_json(
            "/api/auth/login",
            &json!({ "email": email, "password": password }),
        )
        .await
    }

    /// Log in and return the session token from the cookie.
    async fn session(&self) -> Result<String> {
        let response = self.login(ADMIN_EMAIL, PASSWORD).await?;
        if response.status() != StatusCode::OK {
            return Err(anyhow!("login failed with {}", response.status()));
        }
        session_from_cookie(&response).ok_or_else(|| anyhow!("no session cookie"))
    }

    async fn verify_cookie(&self, token: &str) -> Result<StatusCode> {
        let response = self
            .send(
                Request::get("/api/auth/verify")
                    .header(header::COOKIE, format!("theme=dark; auth_token={token}"))
                    .body(Body::empty())?,
            )
            .await?;
        Ok(response.status())
    }

    async fn reset_token_from_email(&self) -> Result<String> {
        let message = self
            .email
            .last()
            .await
            .ok_or_else(|| anyhow!("no email sent"))?;
        let start = message
            .html
            .find("token=")
            .ok_or_else(|| anyhow!("no token in email"))?
            + "token=".len();
        let rest = &message.html[start..];
        let end = rest.find('"').unwrap_or(rest.len());
        Ok(rest[..end].to_string())
    }
}

fn session_from_cookie(response: &Response) -> Option<String> {
    let cookie = response.headers().get(header::SET_COOKIE)?.to_str().ok()?;
    let value = cookie.strip_prefix("auth_token=")?;
    let token = value.split(';').next()?;
    (!token.is_empty()).then(|| token.to_string())
}

async fn json_body(response: Response) -> Result<Value> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn error_message(response: Response) -> Result<String> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let body: ErrorBody = serde_json::from_slice(&bytes)?;
    Ok(body.error)
}

#[tokio::test]
async fn first_login_creates_admin() -> Result<()> {
    let h = harness()?;
    let response = h.login(ADMIN_EMAIL, PASSWORD).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Lax"));
    assert!(!cookie.contains("Secure"));

    let body = json_body(response).await?;
    assert_eq!(
        body["message"],
        "Admin account created and logged in successfully"
    );
    assert!(body.get("token").is_none());

    let record = h.stores.credentials.find_admin().await?;
    assert_eq!(record.map(|r| r.email), Some(ADMIN_EMAIL.to_string()));
    Ok(())
}

#[tokio::test]
async fn second_login_is_normal_login() -> Result<()> {
    let h = harness()?;
    h.login(ADMIN_EMAIL, PASSWORD).await?;
    let response = h.login(ADMIN_EMAIL, PASSWORD).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await?["message"], "Login successful");
    Ok(())
}

#[tokio::test]
async fn missing_fields_are_rejected_without_bootstrap() -> Result<()> {
    let h = harness()?;
    for body in [
        json!({ "email": ADMIN_EMAIL }),
        json!({ "password": PASSWORD }),
        json!({ "email": "", "password": PASSWORD }),
        json!({ "email": ADMIN_EMAIL, "password": "" }),
        json!({ "email": null, "password": PASSWORD }),
        json!({}),
    ] {
        let response = h.post_json("/api/auth/login", &body).await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            error_message(response).await?,
            "Email and password are required"
        );
    }

    let response = h
        .send(
            Request::post("/api/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert!(h.stores.credentials.find_admin().await?.is_none());
    Ok(())
}

#[tokio::test]
async fn wrong_email_and_wrong_password_look_identical() -> Result<()> {
    let h = harness()?;
    h.login(ADMIN_EMAIL, PASSWORD).await?;

    let wrong_password = h.login(ADMIN_EMAIL, "not the password").await?;
    let wrong_email = h.login("intruder@studio.test", PASSWORD).await?;

    assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_email.status(), StatusCode::UNAUTHORIZED);
    assert!(wrong_password.headers().get(header::SET_COOKIE).is_none());

    let a = to_bytes(wrong_password.into_body(), usize::MAX).await?;
    let b = to_bytes(wrong_email.into_body(), usize::MAX).await?;
    assert_eq!(a, b);
    assert_eq!(serde_json::from_slice::<Value>(&a)?, json!({ "error": "Invalid credentials" }));
    Ok(())
}

#[tokio::test]
async fn email_must_match_exactly() -> Result<()> {
    let h = harness()?;
    let response = h.login("Owner@Studio.test", PASSWORD).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let record = h.stores.credentials.find_admin().await?;
    assert_eq!(record.map(|r| r.email), Some("Owner@Studio.test".to_string()));

    let wrong_password = h.login("Owner@Studio.test", "not the password").await?;
    assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);
    let expected = to_bytes(wrong_password.into_body(), usize::MAX).await?;

    for email in ["owner@studio.test", " Owner@Studio.test ", "OWNER@STUDIO.TEST"] {
        let response = h.login(email, PASSWORD).await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{email:?}");
        assert!(response.headers().get(header::SET_COOKIE).is_none());
        assert_eq!(to_bytes(response.into_body(), usize::MAX).await?, expected);
    }

    assert_eq!(
        h.login("Owner@Studio.test", PASSWORD).await?.status(),
        StatusCode::OK
    );
    Ok(())
}

#[tokio::test]
async fn plain_identifier_bootstraps_admin() -> Result<()> {
    let h = harness()?;
    let response = h.login("admin", PASSWORD).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await?["message"],
        "Admin account created and logged in successfully"
    );
    let record = h.stores.credentials.find_admin().await?;
    assert_eq!(record.map(|r| r.email), Some("admin".to_string()));
    assert_eq!(h.login("admin", PASSWORD).await?.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn whitespace_password_is_a_password() -> Result<()> {
    let h = harness()?;
    let response = h.login(ADMIN_EMAIL, "   ").await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.login(ADMIN_EMAIL, "   ").await?.status(), StatusCode::OK);

    let response = h.login(ADMIN_EMAIL, " ").await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_message(response).await?, "Invalid credentials");
    Ok(())
}

#[tokio::test]
async fn disabled_bootstrap_refuses_login_on_empty_store() -> Result<()> {
    let h = harness_with(
        AuthConfig::new("http://localhost:3000".to_string())
            .with_bootstrap_mode(BootstrapMode::Disabled),
    )?;
    let response = h.login(ADMIN_EMAIL, PASSWORD).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_message(response).await?, "Invalid credentials");
    assert!(h.stores.credentials.find_admin().await?.is_none());
    Ok(())
}

#[tokio::test]
async fn concurrent_first_logins_create_one_admin() -> Result<()> {
    let h = harness()?;
    let first = ("first@studio.test", PASSWORD);
    let second = ("second@studio.test", "another password");
    let (a, b) = tokio::join!(h.login(first.0, first.1), h.login(second.0, second.1));
    let (a, b) = (a?, b?);

    // The loser falls through to a normal login with credentials that do
    // not match the winner's record.
    let (winner, loser) = match (a.status(), b.status()) {
        (StatusCode::OK, StatusCode::UNAUTHORIZED) => (first, b),
        (StatusCode::UNAUTHORIZED, StatusCode::OK) => (second, a),
        other => return Err(anyhow!("expected one 200 and one 401, got {other:?}")),
    };
    assert!(loser.headers().get(header::SET_COOKIE).is_none());
    assert_eq!(json_body(loser).await?, json!({ "error": "Invalid credentials" }));

    let record = h
        .stores
        .credentials
        .find_admin()
        .await?
        .ok_or_else(|| anyhow!("admin missing"))?;
    assert_eq!(record.email, winner.0);
    assert!(h.auth_state.hasher().verify(&record.password_hash, winner.1).await);
    Ok(())
}

#[tokio::test]
async fn empty_stored_hash_is_account_invalid() -> Result<()> {
    let h = harness()?;
    h.stores.credentials.create(ADMIN_EMAIL, "").await?;
    let response = h.login(ADMIN_EMAIL, PASSWORD).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        error_message(response).await?,
        "User account is invalid. Please contact support."
    );
    Ok(())
}

#[tokio::test]
async fn session_verifies_by_cookie_bearer_and_body() -> Result<()> {
    let h = harness()?;
    let token = h.session().await?;

    assert_eq!(h.verify_cookie(&token).await?, StatusCode::OK);

    let response = h
        .send(
            Request::get("/api/auth/verify")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await?, json!({ "authenticated": true }));

    let response = h
        .post_json("/api/auth/verify", &json!({ "token": token }))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn missing_or_bad_session_is_unauthorized() -> Result<()> {
    let h = harness()?;
    let token = h.session().await?;

    let response = h
        .send(Request::get("/api/auth/verify").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await?, json!({ "error": "Unauthorized" }));

    let mut tampered = token.clone();
    tampered.push('x');
    assert_eq!(h.verify_cookie(&tampered).await?, StatusCode::UNAUTHORIZED);
    assert_eq!(h.verify_cookie("garbage").await?, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn session_expires_after_ttl() -> Result<()> {
    let h = harness()?;
    let token = h.session().await?;

    h.clock.advance(Duration::from_secs(24 * 60 * 60 - 1));
    assert_eq!(h.verify_cookie(&token).await?, StatusCode::OK);

    h.clock.advance(Duration::from_secs(1));
    assert_eq!(h.verify_cookie(&token).await?, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn logout_clears_cookie() -> Result<()> {
    let h = harness()?;
    let response = h
        .send(Request::post("/api/auth/logout").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    assert!(cookie.starts_with("auth_token=;"));
    assert!(cookie.contains("Max-Age=0"));
    Ok(())
}

#[tokio::test]
async fn forgot_password_requires_email_and_admin() -> Result<()> {
    let h = harness()?;

    let response = h
        .post_json("/api/auth/forgot-password", &json!({}))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_message(response).await?, "Email is required");

    let response = h
        .post_json("/api/auth/forgot-password", &json!({ "email": ADMIN_EMAIL }))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_message(response).await?, "No admin user found");
    assert!(h.email.sent().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn reset_link_goes_to_configured_address() -> Result<()> {
    let h = harness_with(
        AuthConfig::new("http://localhost:3000/".to_string())
            .with_admin_email(Some("notify@studio.test".to_string())),
    )?;
    h.session().await?;

    let response = h
        .post_json("/api/auth/forgot-password", &json!({ "email": "anyone@else.test" }))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await?["message"],
        "Password reset link sent to admin email"
    );

    let response = h
        .post_json("/api/auth/resend-reset-email", &json!({ "email": ADMIN_EMAIL }))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await?["message"],
        "Password reset link resent to admin email"
    );

    let sent = h.email.sent().await;
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|m| m.to_email == "notify@studio.test"));
    assert!(sent[0].html.contains("http://localhost:3000/reset-password?token="));
    assert_eq!(sent[1].subject, "Password Reset Link (Resent)");
    Ok(())
}

#[tokio::test]
async fn reset_replaces_password_and_revokes_sessions() -> Result<()> {
    let h = harness()?;
    let old_session = h.session().await?;

    h.post_json("/api/auth/forgot-password", &json!({ "email": ADMIN_EMAIL }))
        .await?;
    let reset_token = h.reset_token_from_email().await?;

    let new_password = "a much better passphrase";
    let request = json!({
        "resetToken": reset_token,
        "newPassword": new_password,
        "confirmPassword": new_password,
    });
    let response = h.post_json("/api/auth/set-new-password", &request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await?["message"],
        "Password reset successful"
    );

    assert_eq!(
        h.login(ADMIN_EMAIL, PASSWORD).await?.status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        h.login(ADMIN_EMAIL, new_password).await?.status(),
        StatusCode::OK
    );
    assert_eq!(h.verify_cookie(&old_session).await?, StatusCode::UNAUTHORIZED);

    // The link is single-use.
    let response = h.post_json("/api/auth/set-new-password", &request).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        error_message(response).await?,
        "Invalid or expired reset token"
    );
    Ok(())
}

#[tokio::test]
async fn expired_reset_token_is_rejected() -> Result<()> {
    let h = harness()?;
    h.session().await?;
    h.post_json("/api/auth/forgot-password", &json!({ "email": ADMIN_EMAIL }))
        .await?;
    let reset_token = h.reset_token_from_email().await?;

    h.clock.advance(Duration::from_secs(15 * 60 + 1));

    let response = h
        .post_json(
            "/api/auth/set-new-password",
            &json!({
                "resetToken": reset_token,
                "newPassword": "new passphrase",
                "confirmPassword": "new passphrase",
            }),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        error_message(response).await?,
        "Invalid or expired reset token"
    );
    assert_eq!(
        h.login(ADMIN_EMAIL, PASSWORD).await?.status(),
        StatusCode::OK
    );
    Ok(())
}

#[tokio::test]
async fn set_new_password_validates_input() -> Result<()> {
    let h = harness()?;
    let session = h.session().await?;

    let response = h
        .post_json(
            "/api/auth/set-new-password",
            &json!({ "resetToken": "x", "newPassword": "a" }),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        error_message(response).await?,
        "Reset token, new password, and confirm password are required"
    );

    let response = h
        .post_json(
            "/api/auth/set-new-password",
            &json!({ "resetToken": "x", "newPassword": "a", "confirmPassword": "b" }),
        )
        .await?;
    assert_eq!(error_message(response).await?, "Passwords do not match");

    let response = h
        .post_json(
            "/api/auth/set-new-password",
            &json!({ "resetToken": "", "newPassword": "a", "confirmPassword": "a" }),
        )
        .await?;
    assert_eq!(
        error_message(response).await?,
        "Reset token, new password, and confirm password are required"
    );

    // A session token is not a reset token.
    let response = h
        .post_json(
            "/api/auth/set-new-password",
            &json!({ "resetToken": session, "newPassword": "a", "confirmPassword": "a" }),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        error_message(response).await?,
        "Invalid or expired reset token"
    );
    Ok(())
}

#[tokio::test]
async fn reset_accepts_whitespace_password() -> Result<()> {
    let h = harness()?;
    h.session().await?;
    h.post_json("/api/auth/forgot-password", &json!({ "email": ADMIN_EMAIL }))
        .await?;
    let reset_token = h.reset_token_from_email().await?;

    let response = h
        .post_json(
            "/api/auth/set-new-password",
            &json!({
                "resetToken": reset_token,
                "newPassword": "    ",
                "confirmPassword": "    ",
            }),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.login(ADMIN_EMAIL, "    ").await?.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn reset_token_cannot_be_used_as_session() -> Result<()> {
    let h = harness()?;
    h.session().await?;
    let record = h
        .stores
        .credentials
        .find_admin()
        .await?
        .ok_or_else(|| anyhow!("admin missing"))?;
    let reset = h.auth_state.tokens().issue(
        record.id,
        record.credential_version,
        TokenPurpose::Reset,
        Duration::from_secs(900),
    )?;
    assert_eq!(h.verify_cookie(&reset).await?, StatusCode::UNAUTHORIZED);
    Ok(())
}
