mod error;
pub use error::ApiError;

mod context;
pub use context::ServiceContext;

mod body;
mod extract;

mod http;
pub use http::{HttpApi, SERVICE_VERSION};

pub use axum;
