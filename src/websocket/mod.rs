pub mod event_bus;
pub mod events;
pub mod handler;
pub mod room_manager;
pub mod router;

pub use event_bus::EventBus;
pub use handler::{broadcast_shutdown_hint, websocket_handler};
pub use room_manager::RoomManager;
