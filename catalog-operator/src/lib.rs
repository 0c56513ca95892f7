//! The Catalog Operator's five reconciling components (`spec.md` §2),
//! the keyed work-queue substrate they share (§5), and the external
//! `Resolver` contract (§1, §4.4).

pub mod catalogsource;
pub mod ensure;
pub mod installplan;
pub mod queue;
pub mod resolve;
pub mod resolver;
pub mod source_store;
pub mod util;
