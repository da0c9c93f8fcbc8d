//! Domain entities persisted by the trade store.

mod position;

pub use position::{Direction, Position, PositionStatus};
