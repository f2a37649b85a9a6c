use super::{Ticket, TicketRequest, TicketService};

use crate::error::StdError;
use crate::utils::{lock, unix_now};

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::time::Instant;
use uuid::Uuid;

#[derive(Default)]
struct Pool {
    size: u32,
    /// Pending tickets and their lifetime
    issued: HashMap<Uuid, std::time::Duration>,
    /// Tickets holding a slot and when the slot frees itself
    holders: HashMap<Uuid, Instant>,
}

impl Pool {
    fn expire(&mut self, now: Instant) {
        self.holders.retain(|_, deadline| *deadline > now);
    }
}

/// In-process [`TicketService`]
///
/// Exchanges run under one lock, so two requests can never both take the last
/// slot of a pool.
#[derive(Default)]
pub struct MemoryTicketService {
    pools: Mutex<HashMap<String, Pool>>,
}

impl std::fmt::Debug for MemoryTicketService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTicketService").finish_non_exhaustive()
    }
}

impl MemoryTicketService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Slots currently held in `pool`
    #[must_use]
    pub fn in_use(&self, pool: &str) -> usize {
        let now = Instant::now();
        let mut pools = lock(&self.pools);
        match pools.get_mut(pool) {
            Some(p) => {
                p.expire(now);
                p.holders.len()
            }
            None => 0,
        }
    }

    /// Tickets issued by `pool` that hold no slot yet
    #[must_use]
    pub fn pending(&self, pool: &str) -> usize {
        lock(&self.pools).get(pool).map_or(0, |p| p.issued.len())
    }
}

#[async_trait::async_trait]
impl TicketService for MemoryTicketService {
    async fn create_pool(&self, pool: &str, size: u32) -> Result<(), StdError> {
        lock(&self.pools).entry(pool.to_owned()).or_default().size = size;
        Ok(())
    }

    async fn request_ticket(&self, request: &TicketRequest) -> Result<Ticket, StdError> {
        let mut pools = lock(&self.pools);
        let Some(pool) = pools.get_mut(&request.pool) else {
            return Err(format!("pool {:?} does not exist", request.pool).into());
        };
        let id = Uuid::new_v4();
        pool.issued.insert(id, request.ttl);
        let ttl = i64::try_from(request.ttl.as_secs()).unwrap_or(i64::MAX);
        Ok(Ticket {
            id,
            pool: request.pool.clone(),
            holder: request.holder.clone(),
            won: false,
            expires_at: unix_now().saturating_add(ttl),
        })
    }

    async fn exchange_ticket(&self, ticket: &Ticket) -> Result<Ticket, StdError> {
        let now = Instant::now();
        let mut pools = lock(&self.pools);
        let Some(pool) = pools.get_mut(&ticket.pool) else {
            return Err(format!("pool {:?} does not exist", ticket.pool).into());
        };
        pool.expire(now);

        let mut ticket = ticket.clone();
        if pool.holders.contains_key(&ticket.id) {
            ticket.won = true;
            return Ok(ticket);
        }
        let Some(ttl) = pool.issued.get(&ticket.id).copied() else {
            return Err(format!("ticket {} was not issued by pool {:?}", ticket.id, ticket.pool).into());
        };

        let size = usize::try_from(pool.size).unwrap_or(usize::MAX);
        ticket.won = pool.holders.len() < size;
        if ticket.won {
            pool.issued.remove(&ticket.id);
            pool.holders.insert(ticket.id, now + ttl);
        }
        Ok(ticket)
    }

    async fn release_ticket(&self, ticket: &Ticket) -> Result<(), StdError> {
        if let Some(pool) = lock(&self.pools).get_mut(&ticket.pool) {
            pool.holders.remove(&ticket.id);
            pool.issued.remove(&ticket.id);
        }
        Ok(())
    }
}
