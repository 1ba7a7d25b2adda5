use serde::{Deserialize, Serialize};

// -- JWT Claims --

/// Session token claims. Tokens are signed with the user's own secret, so
/// `sub` alone is enough to find the verification key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub aud: String,
    pub exp: usize,
    pub iat: usize,
}

// -- Auth redirects --

/// Error codes the login callback redirects back to `/` with.
pub const ERROR_NOT_IN_ORG: &str = "not_in_org";
pub const ERROR_COULD_NOT_CREATE_USER: &str = "could_not_create_user";
