pub mod error;
pub use error::StoreError;

pub mod fsio;

mod heartbeat;
pub use heartbeat::HeartbeatClock;

mod keyed;

mod layout;

pub mod store;
pub use store::MetadataStore;
