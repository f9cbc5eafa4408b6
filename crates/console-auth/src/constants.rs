//! Backend paths and persisted key names
//!
//! The key names match what earlier browser builds of the console wrote to
//! local storage, so an exported blob can be loaded unchanged.

/// Blob key holding the access token
pub const ACCESS_TOKEN_KEY: &str = "token";

/// Blob key holding the renewal token
pub const RENEWAL_TOKEN_KEY: &str = "refreshToken";

/// Blob key holding the identity snapshot as JSON
pub const IDENTITY_KEY: &str = "user";

/// Login endpoint, relative to the API base URL
pub const LOGIN_PATH: &str = "/auth/login";

/// Renewal endpoint, relative to the API base URL
pub const RENEW_PATH: &str = "/auth/refresh";

/// Current-principal endpoint, relative to the API base URL
pub const ME_PATH: &str = "/auth/me";
