//! Context-selection algorithms.

mod fifo;

pub use fifo::FifoAlgorithm;
pub use memex_traits::HistoryAlgorithm;
