mod middleware;

pub use middleware::{SessionMiddleware, SessionMiddlewareService};
