pub mod demo;
mod health;

pub use demo::{create_product, echo, list_products, ping, plain_text};
pub use health::{health_check, signature_health};
