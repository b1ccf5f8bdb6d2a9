mod files;
mod handlers;
mod routes;
mod server;

pub use handlers::AppState;
pub use server::HttpServer;
