//! Shared domain types for devboard.
//!
//! Upstream records are typed at the client boundary and reused everywhere
//! else: the cache stores them, the linking engine joins them and the HTTP
//! layer serializes them back out in the same shape the issue tracker and
//! code host produce.

pub mod job;
pub mod linked;
pub mod pull_request;
pub mod ticket;

pub use job::{Job, JobKind, JobStatus};
pub use linked::{PrWithTicket, TicketWithPr};
pub use pull_request::{IdentityRef, ProjectRef, PullRequest, RepositoryRef, Reviewer};
pub use ticket::{AdfNode, Ticket, TicketFields};
