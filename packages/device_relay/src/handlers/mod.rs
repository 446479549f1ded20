pub mod device;
pub mod health;
pub mod websocket;

// Re-export all handlers for easy route registration
pub use device::{connect_usb_handler, connect_wifi_handler};
pub use health::{health_handler, metrics_handler};
pub use websocket::relay_websocket_handler;
