pub mod ops_auth;

pub use ops_auth::{OpsAuth, INTERNAL_API_KEY_HEADER};
