pub mod health;
pub mod proxy;

pub use health::health_handler;
pub use proxy::proxy_handler;
