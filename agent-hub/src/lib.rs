//! Agent Hub (spec §4.6): session bookkeeping and wire protocol for the
//! control plane's connections to mesh agents. Grounded on innernet's
//! `server`/`shared` split between "what goes over the wire" and
//! "what the server tracks per connection" - here kept in one crate since
//! neither half is large enough to warrant its own.

pub mod hub;
pub mod protocol;
pub mod testing;

pub use hub::{AgentHub, ConnectOutcome, SessionState, DEFAULT_QUEUE_CAPACITY};
pub use protocol::{AgentMessage, DnsRecord, Payload, ServerMessage, Welcome};
pub use testing::FakeAgent;
