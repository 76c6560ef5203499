//! Token validation only. Accounts and login live in the host application,
//! which signs access tokens with the shared `jwt_secret`.

pub mod jwt;
pub mod middleware;
