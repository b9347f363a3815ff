//! Stubs: ordered predicate/response pairs and the store that resolves them.
//!
//! # Module Structure
//!
//! - `types` - Stub, response and proxy definitions plus per-stub state
//! - `cycler` - Lock-free response cursor with repeat support
//! - `store` - Copy-on-write stub list, command application, first-match resolution

mod cycler;
mod store;
mod types;

pub use cycler::ResponseCycler;
pub use store::{StoreChange, StubCommand, StubMatch, StubStore};
pub use types::{
    LiteralResponse, MatchRecord, PredicateGenerator, ProxyMode, ProxyTarget, ResponseSpec, Stub,
    StubDefinition, StubId, StubState, StubStats,
};
