//! Best-effort credential entry before exploration starts.

use crate::driver::{Element, Page};
use crate::error::{Result, ScanError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Substrings that mark an input as the username field, matched case-insensitively.
pub const USERNAME_KEYWORDS: &[&str] = &[
    "user",
    "user_name",
    "username",
    "account",
    "loginfmt",
    "用户",
    "用户名",
    "账号",
    "账户",
    "email",
    "mail",
    "邮箱",
    "login",
];

const USERNAME_ATTRIBUTES: &[&str] = &["id", "name", "placeholder", "autocomplete"];

#[derive(Debug, Clone)]
pub struct LoginOptions {
    /// How long to wait for the password field to render after submitting the username.
    pub field_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for LoginOptions {
    fn default() -> Self {
        Self {
            field_timeout: Duration::from_secs(3),
            poll_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

pub fn contains_any_keyword(target: &str, keywords: &[&str]) -> bool {
    let target = target.to_lowercase();
    keywords
        .iter()
        .any(|keyword| target.contains(&keyword.to_lowercase()))
}

/// Fill in the login form found on `page`.
///
/// Handles single-page forms as well as flows that ask for the password on a
/// second screen. Returns `false` when either field cannot be found; failures
/// never propagate, the caller simply explores unauthenticated.
pub async fn login<P: Page>(page: &P, credentials: &Credentials, options: &LoginOptions) -> bool {
    match try_login(page, credentials, options).await {
        Ok(()) => {
            info!("Submitted credentials for {}", credentials.username);
            true
        }
        Err(ScanError::LoginFieldNotFound(field)) => {
            info!("No {} field found, continuing unauthenticated", field);
            false
        }
        Err(e) => {
            warn!("Login failed, continuing unauthenticated: {}", e);
            false
        }
    }
}

async fn try_login<P: Page>(
    page: &P,
    credentials: &Credentials,
    options: &LoginOptions,
) -> Result<()> {
    let elements = page.query_all("*").await?;

    let mut username_field = None;
    for element in &elements {
        if is_username_field(element).await {
            username_field = Some(element);
            break;
        }
    }
    let username_field =
        username_field.ok_or_else(|| ScanError::LoginFieldNotFound("username".to_string()))?;

    username_field.input(&credentials.username).await?;
    submit_form(&elements).await;

    let password_field = wait_for_password_field(page, options)
        .await?
        .ok_or_else(|| ScanError::LoginFieldNotFound("password".to_string()))?;
    password_field.input(&credentials.password).await?;

    let elements = page.query_all("*").await?;
    submit_form(&elements).await;
    Ok(())
}

async fn wait_for_password_field<P: Page>(
    page: &P,
    options: &LoginOptions,
) -> Result<Option<P::Element>> {
    let deadline = Instant::now() + options.field_timeout;
    loop {
        for element in page.query_all("*").await? {
            if is_password_field(&element).await {
                return Ok(Some(element));
            }
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(options.poll_interval).await;
    }
}

pub async fn is_username_field<E: Element>(element: &E) -> bool {
    if !is_input_of_type(element, &["text", "email"]).await {
        return false;
    }
    for attribute in USERNAME_ATTRIBUTES {
        if let Ok(Some(value)) = element.attribute(attribute).await
            && contains_any_keyword(&value, USERNAME_KEYWORDS)
        {
            return true;
        }
    }
    false
}

pub async fn is_password_field<E: Element>(element: &E) -> bool {
    is_input_of_type(element, &["password"]).await
}

async fn is_input_of_type<E: Element>(element: &E, types: &[&str]) -> bool {
    match element.class_name().await {
        Ok(name) if name == "HTMLInputElement" => {}
        _ => return false,
    }
    matches!(
        element.attribute("type").await,
        Ok(Some(t)) if types.contains(&t.to_lowercase().as_str())
    )
}

async fn is_submit_control<E: Element>(element: &E) -> bool {
    match element.class_name().await {
        Ok(name) if name == "HTMLButtonElement" || name == "HTMLInputElement" => {}
        _ => return false,
    }
    matches!(element.attribute("type").await, Ok(Some(t)) if t.eq_ignore_ascii_case("submit"))
}

/// Click the first submit control, if any. Returns whether one was clicked.
async fn submit_form<E: Element>(elements: &[E]) -> bool {
    for element in elements {
        if is_submit_control(element).await {
            if let Err(e) = element.click().await {
                warn!("Submit click failed: {}", e);
                return false;
            }
            return true;
        }
    }
    debug!("No submit control found");
    false
}
