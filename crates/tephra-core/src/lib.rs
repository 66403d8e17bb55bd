//! Engine assembly: transaction manager, background processor, and the
//! storage lifecycle that wires the catalog, WAL, and index layers
//! together.

pub mod background;
pub mod storage;
pub mod txn;

pub use background::BackgroundProcessor;
pub use storage::Storage;
pub use txn::{Txn, TxnManager};
