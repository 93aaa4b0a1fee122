//! Application metadata exposed through `apatit_service_info` and the User-Agent header.

pub const NAME: &str = "apatit";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const OWNER: &str = "ostrovok.tech";
pub const LANGUAGE: &str = "rust";

/// User-Agent sent with every upstream request.
pub fn user_agent() -> String {
    format!("{}/{}", NAME, VERSION)
}
