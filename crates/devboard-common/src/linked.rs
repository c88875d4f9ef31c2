use serde::{Deserialize, Serialize};

use crate::pull_request::PullRequest;
use crate::ticket::Ticket;

/// A ticket together with the pull request that references it, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketWithPr {
    #[serde(flatten)]
    pub ticket: Ticket,
    #[serde(rename = "linkedPR")]
    pub linked_pr: Option<PullRequest>,
}

/// A pull request together with the ticket it references, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrWithTicket {
    #[serde(flatten)]
    pub pull_request: PullRequest,
    #[serde(rename = "linkedTicket")]
    pub linked_ticket: Option<Ticket>,
}
