pub mod error;
pub mod handlers;
pub mod ingest;
pub mod middleware;
pub mod results;
pub mod routes;

pub use error::{ApiError, ErrorResponse};
pub use routes::create_router;
