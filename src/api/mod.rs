//! Service boundary

pub mod dataselect;

pub use dataselect::{
    Authenticator, Credentials, DataSelectResponse, DataSelectService, PreparedQuery,
    PublicAccess, StaticAuthenticator,
};
