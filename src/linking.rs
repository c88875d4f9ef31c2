//! Ticket ↔ pull request linking.
//!
//! A pull request references a ticket when its title (or, failing that, its
//! source branch) contains a key like `ABC-123`. Links are derived on every
//! call and never stored.

use std::collections::HashMap;
use std::future::Future;
use std::sync::LazyLock;

use devboard_common::{PrWithTicket, PullRequest, Ticket, TicketWithPr};
use futures::future::join_all;
use regex::Regex;
use tracing::debug;

// Compile once
static TICKET_KEY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Z]+-\d+").unwrap());

/// First ticket key in `text`, if any.
pub fn extract_ticket_key(text: &str) -> Option<String> {
    TICKET_KEY_REGEX.find(text).map(|m| m.as_str().to_string())
}

/// Ticket key referenced by a pull request: title first, then source branch.
pub fn extract_ticket_key_from_pr(pr: &PullRequest) -> Option<String> {
    extract_ticket_key(&pr.title).or_else(|| extract_ticket_key(pr.source_branch()))
}

/// Attach to each ticket the pull request that references it.
///
/// When several pull requests reference the same key the one appearing last in
/// `prs` wins.
pub fn join_tickets_with_prs(tickets: Vec<Ticket>, prs: &[PullRequest]) -> Vec<TicketWithPr> {
    let mut by_key: HashMap<String, &PullRequest> = HashMap::new();
    for pr in prs {
        if let Some(key) = extract_ticket_key_from_pr(pr) {
            by_key.insert(key, pr);
        }
    }

    tickets
        .into_iter()
        .map(|ticket| {
            let linked_pr = by_key.get(&ticket.key).map(|pr| (*pr).clone());
            TicketWithPr { ticket, linked_pr }
        })
        .collect()
}

/// Attach to each pull request the ticket it references, fetching every
/// distinct key once and concurrently. A failed fetch leaves only the pull
/// requests carrying that key unlinked.
pub async fn join_prs_with_tickets<F, Fut, E>(prs: Vec<PullRequest>, fetch: F) -> Vec<PrWithTicket>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<Ticket, E>>,
    E: std::fmt::Display,
{
    let keys: Vec<Option<String>> = prs.iter().map(extract_ticket_key_from_pr).collect();

    let mut unique: Vec<String> = keys.iter().flatten().cloned().collect();
    unique.sort();
    unique.dedup();

    let results = join_all(unique.iter().map(|key| fetch(key.clone()))).await;
    let tickets: HashMap<String, Ticket> = unique
        .into_iter()
        .zip(results)
        .filter_map(|(key, result)| match result {
            Ok(ticket) => Some((key, ticket)),
            Err(e) => {
                debug!(key = %key, error = %e, "linked ticket fetch failed");
                None
            }
        })
        .collect();

    prs.into_iter()
        .zip(keys)
        .map(|(pull_request, key)| {
            let linked_ticket = key.and_then(|k| tickets.get(&k).cloned());
            PrWithTicket {
                pull_request,
                linked_ticket,
            }
        })
        .collect()
}
