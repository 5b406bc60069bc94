//! Certgate Registry
//!
//! Service/front-end registry adapter (C5) and change watcher (C7): snapshot
//! reads of services and front-ends from an external system, plus a
//! queue-driven watcher that notifies the driver when those snapshots might
//! have changed.

pub mod error;
pub mod queue;
pub mod registry;
pub mod watcher;

pub use error::{RegistryError, Result};
pub use queue::{InMemoryMessageQueue, MessageQueue, QueueMessage};
pub use registry::{
    check_no_duplicate_domains, is_server_container, service_port_from_label,
    FileServiceRegistry, InMemoryServiceRegistry, ServiceRegistry, SERVER_CONTAINER_NAME,
    SERVICE_PORT_LABEL,
};
pub use watcher::{start as start_watcher, stop as stop_watcher, ChangeNotification, ChangesCallback};
