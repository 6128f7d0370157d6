// Lease coordination: table, reconciliation, manager and expiry sweeper.

pub mod events;
pub mod manager;
pub mod reconcile;
pub mod sweeper;
pub mod sync;
pub mod table;

pub use events::{spawn_event_logger, LeaseEvent};
pub use manager::{LeaseError, LeaseManager, ManagerConfig};
pub use sweeper::{spawn_sweeper, ExpirySweeper, SweepReport};
pub use sync::spawn_reconcile_loop;
pub use table::LeaseTable;
