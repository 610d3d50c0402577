//! Token command implementation.

use storysync_protocol::UserId;
use storysync_server::{AuthConfig, TokenValidator};

/// Mints a token for `user` signed with `secret`.
pub fn run(user: UserId, secret: &str) -> Result<String, Box<dyn std::error::Error>> {
    if secret.is_empty() {
        return Err("secret must not be empty".into());
    }
    let validator = TokenValidator::new(AuthConfig::new(secret.as_bytes().to_vec()));
    Ok(validator.create_token(user)?)
}
