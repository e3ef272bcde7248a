use std::path::Path;

use sqlpush_core::SecretRef;
use sqlpush_migrate::AdminClient;

use super::load_config;

fn admin_client(config_path: Option<&Path>, verbose: bool) -> anyhow::Result<AdminClient> {
    let config = load_config(config_path, verbose)?;
    Ok(AdminClient::from_settings(config.require_admin()?)?)
}

pub async fn list(config_path: Option<&Path>, verbose: bool, json: bool) -> anyhow::Result<i32> {
    let client = admin_client(config_path, verbose)?;
    let users = client.list_users().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&users)?);
        return Ok(0);
    }

    println!("{} user(s) on {}:", users.len(), client.base_url());
    println!("  {:<36} {:<40} {:<20} {}", "ID", "EMAIL", "CREATED", "LAST SIGN IN");
    for user in &users {
        let timestamp = |value: &Option<chrono::DateTime<chrono::Utc>>| {
            value
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string())
        };
        println!(
            "  {:<36} {:<40} {:<20} {}",
            user.id,
            user.email.as_deref().unwrap_or("-"),
            timestamp(&user.created_at),
            timestamp(&user.last_sign_in_at)
        );
    }
    Ok(0)
}

/// The new password is read from an environment variable, never argv
pub async fn reset_password(
    config_path: Option<&Path>,
    verbose: bool,
    email: &str,
    password_env: &str,
) -> anyhow::Result<i32> {
    let password = SecretRef::env(password_env).resolve()?;
    let client = admin_client(config_path, verbose)?;

    let user = client.find_user_by_email(email).await?;
    client.update_user_password(&user.id, &password).await?;

    println!("Password updated for {} ({})", email, user.id);
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reset_password_requires_password_variable() {
        let err = reset_password(
            None,
            false,
            "ops@example.co",
            "SQLPUSH_TEST_UNSET_PASSWORD_VARIABLE",
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("SQLPUSH_TEST_UNSET_PASSWORD_VARIABLE"));
    }
}
