pub mod dedup;
pub mod partition;
pub mod tickets;

pub use dedup::SeenSet;
pub use partition::{distribute, partition_for};
pub use tickets::{TicketCache, TicketCacheError, TicketChange};
