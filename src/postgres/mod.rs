//! Connectivity, binary COPY serialization, staging and hydration.
mod connect;
mod hydrate;
mod row;
mod stage;

pub use connect::*;
pub use hydrate::*;
pub use row::*;
pub use stage::*;
