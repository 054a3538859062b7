//! Pipeline engine core: elements connected by bounded multi-lane queues, a channel
//! manager multiplexing input streams onto internal slots, and a rule-based
//! distributor fanning records out to branches.

pub mod channel;
pub mod connector;
pub mod decoder;
pub mod distributor;
pub mod element;
pub mod error;
pub mod frame;
pub mod graph;
pub mod sink;
pub mod source;
pub mod transform;
pub mod worker;

pub use error::{Error, Result};
pub use graph::{Collaborators, Engine, GraphConfig};
