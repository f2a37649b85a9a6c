//! Admission control
//!
//! Bounds concurrent chunked uploads per identity. A [`TicketService`] keeps one
//! pool of slots per identity; a new upload requests a ticket, exchanges it and
//! proceeds only if the ticket won a slot.

mod memory;
pub use self::memory::MemoryTicketService;

use crate::error::*;
use crate::session::Identity;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Ticket request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketRequest {
    pub pool: String,
    pub holder: String,
    /// The slot is freed after this long even if never released.
    pub ttl: Duration,
}

/// Admission grant
///
/// Serializable, so it can be kept in an upload session and released later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub pool: String,
    pub holder: String,
    /// Whether the ticket holds a slot
    pub won: bool,
    /// Unix timestamp (seconds) after which the slot frees itself
    pub expires_at: i64,
}

/// Bounded-concurrency ticket service
#[async_trait::async_trait]
pub trait TicketService: Send + Sync + 'static {
    /// Creates a pool of `size` slots, or resizes an existing one.
    async fn create_pool(&self, pool: &str, size: u32) -> Result<(), StdError>;

    /// Issues a ticket that does not hold a slot yet.
    async fn request_ticket(&self, request: &TicketRequest) -> Result<Ticket, StdError>;

    /// Tries to take a slot for `ticket`.
    ///
    /// Must be atomic with respect to other exchanges on the same pool.
    async fn exchange_ticket(&self, ticket: &Ticket) -> Result<Ticket, StdError>;

    /// Returns the slot of `ticket`; releasing an unknown ticket succeeds.
    async fn release_ticket(&self, ticket: &Ticket) -> Result<(), StdError>;
}

/// Per-identity admission policy over a [`TicketService`]
#[derive(Clone)]
pub struct Admission {
    service: std::sync::Arc<dyn TicketService>,
    max_concurrency: u32,
    ttl: Duration,
}

impl std::fmt::Debug for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admission")
            .field("max_concurrency", &self.max_concurrency)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

fn pool_name(identity: &Identity) -> String {
    format!("uploads:{}", identity.id())
}

fn upstream(source: StdError, op: &'static str) -> UploadError {
    error!(error = %source, op, "ticket service failed");
    upload_error!(source, Session, "ticket service: {} failed", op)
}

impl Admission {
    pub fn new(service: std::sync::Arc<dyn TicketService>, max_concurrency: u32, ttl: Duration) -> Self {
        Self {
            service,
            max_concurrency,
            ttl,
        }
    }

    #[must_use]
    pub fn max_concurrency(&self) -> u32 {
        self.max_concurrency
    }

    /// Takes a slot for a new upload of `identity`.
    ///
    /// # Errors
    /// Returns `AdmissionDenied` if every slot of the identity is taken, or
    /// `Session` if the ticket service fails.
    pub async fn acquire(&self, identity: &Identity) -> UploadResult<Ticket> {
        let pool = pool_name(identity);
        self.service
            .create_pool(&pool, self.max_concurrency)
            .await
            .map_err(|e| upstream(e, "create_pool"))?;

        let request = TicketRequest {
            pool,
            holder: identity.id().to_owned(),
            ttl: self.ttl,
        };
        let ticket = self
            .service
            .request_ticket(&request)
            .await
            .map_err(|e| upstream(e, "request_ticket"))?;
        let ticket = self
            .service
            .exchange_ticket(&ticket)
            .await
            .map_err(|e| upstream(e, "exchange_ticket"))?;

        if !ticket.won {
            warn!(identity = %identity, max = self.max_concurrency, "admission denied");
            // a losing ticket is discarded, not kept pending
            if let Err(e) = self.service.release_ticket(&ticket).await {
                warn!(ticket = %ticket.id, error = %e, "failed to discard losing ticket");
            }
            return Err(upload_error!(
                AdmissionDenied,
                "{} concurrent uploads already in progress",
                self.max_concurrency
            ));
        }
        debug!(identity = %identity, ticket = %ticket.id, "admitted upload");
        Ok(ticket)
    }

    /// Returns the slot of a ticket.
    ///
    /// # Errors
    /// Returns `Session` if the ticket service fails.
    pub async fn release(&self, ticket: &Ticket) -> UploadResult {
        self.service
            .release_ticket(ticket)
            .await
            .map_err(|e| upstream(e, "release_ticket"))?;
        debug!(ticket = %ticket.id, "released admission ticket");
        Ok(())
    }
}
