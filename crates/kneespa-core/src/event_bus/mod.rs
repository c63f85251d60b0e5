//! # Event Bus Module
//!
//! Publish/subscribe channel between the session layer and whatever is
//! presenting it (the console binary, a future UI, tests).
//!
//! Handlers filter by category or by protocol run and are called
//! synchronously. Async consumers poll a broadcast receiver instead.
//!
//! There is no global instance. Create a bus and share it as
//! `Arc<EventBus>` with every component that publishes.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kneespa_core::event_bus::{AppEvent, EventBus, EventCategory, EventFilter};
//!
//! let bus = Arc::new(EventBus::new());
//! let subscription = bus.subscribe(
//!     EventFilter::Categories(vec![EventCategory::Protocol]),
//!     |event| println!("{}", event),
//! );
//! bus.unsubscribe(subscription);
//! ```

mod bus;
mod events;

pub use bus::*;
pub use events::*;
