//! Redis-based ticket registry implementation.
//!
//! This module provides a distributed ticket registry shared by every node
//! of a cluster, with TTL-based eviction driven by each ticket's expiration
//! policy.
//!
//! # Architecture
//!
//! Tickets are stored in Redis with:
//! - **Primary keys**: `{prefix}:tgt:{id}` and `{prefix}:st:{id}` → bincode-serialized [`Ticket`]
//! - **Ordered index**: `{prefix}:index:{tgt|st}` (Sorted Set, score = creation millis)
//! - **Children**: `{prefix}:children:{id}` (Set) → ids granted by a ticket-granting ticket,
//!   expiring with its parent
//! - **Consumption marker**: `{prefix}:consumed:{id}` claimed with `SET NX`
//! - **TTL**: remaining lifetime reported by the ticket's expiration policy
//!
//! Keys evicted by their TTL leave stale index members behind; batch
//! retrieval prunes them, together with the child set of an evicted
//! ticket-granting ticket, so pages stay dense.
//!
//! Grants go through a compare-and-set script: the parent is rewritten
//! only if it is byte-for-byte what the grant was computed from, and the
//! child is written in the same step.
//!
//! # Example
//!
//! ```no_run
//! use sso_ticket_registry::config::RedisRegistryConfig;
//! use sso_ticket_registry::stores::RedisTicketRegistry;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = RedisTicketRegistry::new(&RedisRegistryConfig::new("redis://127.0.0.1:6379")).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RedisRegistryConfig;
use crate::constants::{GRANT_MAX_ATTEMPTS, SNAPSHOT_PAGE_SIZE, redis_keys};
use crate::error::{Result, TicketError};
use crate::providers::TicketRegistry;
use crate::providers::registry::{RemovedTickets, validate_child, validate_ticket};
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use sso_ticket_core::{
    Clock, ServiceTicket, SystemClock, Ticket, TicketGrantingTicket, TicketId, TicketKind,
};
use std::time::Duration;

/// Rewrites a parent and stores its new child, unless the parent changed.
///
/// KEYS: parent, child, child index, parent's child set.
/// ARGV: parent as read, parent as granted, parent TTL, child, child TTL,
/// child score, child id. A TTL of 0 means no expiry.
const GRANT_SCRIPT: &str = r"
    if redis.call('GET', KEYS[1]) ~= ARGV[1] then
        return 0
    end
    local parent_ttl = tonumber(ARGV[3])
    if parent_ttl > 0 then
        redis.call('SET', KEYS[1], ARGV[2], 'EX', parent_ttl)
    else
        redis.call('SET', KEYS[1], ARGV[2])
    end
    local child_ttl = tonumber(ARGV[5])
    if child_ttl > 0 then
        redis.call('SET', KEYS[2], ARGV[4], 'EX', child_ttl)
    else
        redis.call('SET', KEYS[2], ARGV[4])
    end
    redis.call('ZADD', KEYS[3], ARGV[6], ARGV[7])
    redis.call('SADD', KEYS[4], ARGV[7])
    if parent_ttl > 0 then
        redis.call('EXPIRE', KEYS[4], parent_ttl)
    else
        redis.call('PERSIST', KEYS[4])
    end
    return 1
";

/// Redis-based ticket registry.
///
/// Provides:
/// - Ticket storage with policy-driven expiration
/// - Ordered paging for the cleaner
/// - Cascade deletion through per-ticket child sets
/// - Atomic single-use consumption of service tickets
/// - Connection pooling via `ConnectionManager`
#[derive(Clone)]
pub struct RedisTicketRegistry<C = SystemClock> {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,

    /// Prefix for every key.
    key_prefix: String,

    /// Time source for TTL computation.
    clock: C,
}

impl RedisTicketRegistry<SystemClock> {
    /// Create a new Redis ticket registry.
    ///
    /// # Errors
    ///
    /// Returns error if connection to Redis fails.
    pub async fn new(config: &RedisRegistryConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| TicketError::storage("Failed to create Redis client", e))?;

        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| TicketError::storage("Failed to create Redis connection manager", e))?;

        Ok(Self::from_connection_manager(conn_manager, config.key_prefix.clone()))
    }

    /// Create a registry over an existing connection manager.
    #[must_use]
    pub const fn from_connection_manager(conn_manager: ConnectionManager, key_prefix: String) -> Self {
        Self {
            conn_manager,
            key_prefix,
            clock: SystemClock,
        }
    }
}

impl<C: Clock> RedisTicketRegistry<C> {
    /// Use a different time source for TTL computation.
    #[must_use]
    pub fn with_clock<C2: Clock>(self, clock: C2) -> RedisTicketRegistry<C2> {
        RedisTicketRegistry {
            conn_manager: self.conn_manager,
            key_prefix: self.key_prefix,
            clock,
        }
    }

    const fn segment(kind: TicketKind) -> &'static str {
        match kind {
            TicketKind::TicketGranting => redis_keys::TICKET_GRANTING,
            TicketKind::Service => redis_keys::SERVICE,
        }
    }

    /// Primary key, or `None` for ids with an unknown prefix.
    fn ticket_key(&self, id: &TicketId) -> Option<String> {
        TicketKind::from_id(id)
            .map(|kind| format!("{}:{}:{id}", self.key_prefix, Self::segment(kind)))
    }

    fn index_key(&self, kind: TicketKind) -> String {
        format!("{}:{}:{}", self.key_prefix, redis_keys::INDEX, Self::segment(kind))
    }

    fn children_key(&self, id: &TicketId) -> String {
        format!("{}:{}:{id}", self.key_prefix, redis_keys::CHILDREN)
    }

    fn consumed_key(&self, id: &TicketId) -> String {
        format!("{}:{}:{id}", self.key_prefix, redis_keys::CONSUMED)
    }

    fn encode(ticket: &Ticket) -> Result<Vec<u8>> {
        bincode::serialize(ticket).map_err(TicketError::serialization)
    }

    fn decode(bytes: &[u8]) -> Result<Ticket> {
        bincode::deserialize(bytes).map_err(TicketError::serialization)
    }

    /// `EX` seconds derived from the ticket's policy, `None` if it never expires.
    fn expiry_seconds(&self, ticket: &Ticket) -> Option<u64> {
        ticket
            .remaining_time_to_live(self.clock.now())
            .map(ttl_seconds)
    }

    /// `SET` for a ticket, with `EX` derived from its policy.
    fn set_command(&self, key: &str, bytes: Vec<u8>, ticket: &Ticket) -> redis::Cmd {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(bytes);
        if let Some(seconds) = self.expiry_seconds(ticket) {
            cmd.arg("EX").arg(seconds);
        }
        cmd
    }

    /// Keep a ticket-granting ticket's child set alive exactly as long as it.
    fn expire_children(&self, pipe: &mut redis::Pipeline, ticket: &Ticket) {
        if ticket.kind() != TicketKind::TicketGranting {
            return;
        }
        let children_key = self.children_key(ticket.id());
        match self.expiry_seconds(ticket) {
            Some(seconds) => pipe.cmd("EXPIRE").arg(children_key).arg(seconds).ignore(),
            None => pipe.cmd("PERSIST").arg(children_key).ignore(),
        };
    }

    /// One page of `kind`, pruning index members whose key is gone.
    async fn fetch_page(&self, kind: TicketKind, offset: usize, count: usize) -> Result<Vec<Ticket>> {
        let mut conn = self.conn_manager.clone();
        let index_key = self.index_key(kind);
        let mut page = Vec::with_capacity(count);
        let mut start = offset;

        while page.len() < count {
            let needed = count - page.len();
            let stop = start + needed - 1;
            let ids: Vec<String> = conn
                .zrange(&index_key, to_index(start)?, to_index(stop)?)
                .await
                .map_err(|e| TicketError::storage("Failed to read ticket index", e))?;
            if ids.is_empty() {
                break;
            }

            let keys: Vec<String> = ids
                .iter()
                .map(|id| format!("{}:{}:{id}", self.key_prefix, Self::segment(kind)))
                .collect();
            let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
                .arg(&keys)
                .query_async(&mut conn)
                .await
                .map_err(|e| TicketError::storage("Failed to fetch tickets", e))?;

            let mut stale = Vec::new();
            for (id, value) in ids.iter().zip(values) {
                match value {
                    Some(bytes) => page.push(Self::decode(&bytes)?),
                    None => stale.push(id.clone()),
                }
            }

            let exhausted = ids.len() < needed;
            start += ids.len() - stale.len();

            if !stale.is_empty() {
                tracing::debug!(
                    kind = %kind,
                    pruned = stale.len(),
                    "Pruning evicted tickets from index"
                );
                let mut prune = redis::pipe();
                prune.atomic().zrem(&index_key, &stale).ignore();
                if kind == TicketKind::TicketGranting {
                    for id in &stale {
                        prune.del(self.children_key(&TicketId::from(id.as_str()))).ignore();
                    }
                }
                let _: () = prune
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| TicketError::storage("Failed to prune ticket index", e))?;
            }
            if exhausted {
                break;
            }
        }

        Ok(page)
    }

    async fn fetch_all(&self, kind: TicketKind) -> Result<Vec<Ticket>> {
        let mut all = Vec::new();
        loop {
            let page = self.fetch_page(kind, all.len(), SNAPSHOT_PAGE_SIZE).await?;
            let done = page.len() < SNAPSHOT_PAGE_SIZE;
            all.extend(page);
            if done {
                return Ok(all);
            }
        }
    }
}

impl<C: Clock> TicketRegistry for RedisTicketRegistry<C> {
    async fn add_ticket(&self, ticket: Ticket) -> Result<()> {
        validate_ticket(&ticket)?;
        let mut conn = self.conn_manager.clone();
        let id = ticket.id();
        let key = self
            .ticket_key(id)
            .ok_or_else(|| TicketError::InvalidArgument(format!("unknown ticket prefix: {id}")))?;
        let bytes = Self::encode(&ticket)?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .add_command(self.set_command(&key, bytes, &ticket))
            .ignore()
            .zadd(
                self.index_key(ticket.kind()),
                id.as_str(),
                ticket.state().created_at.timestamp_millis(),
            )
            .ignore();
        if let Some(parent) = ticket.parent_id() {
            pipe.sadd(self.children_key(parent), id.as_str()).ignore();
        }
        self.expire_children(&mut pipe, &ticket);
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| TicketError::storage("Failed to add ticket", e))?;

        tracing::debug!(ticket_id = %id, kind = %ticket.kind(), "Added ticket to Redis");
        Ok(())
    }

    async fn get_ticket(&self, id: &TicketId) -> Result<Option<Ticket>> {
        let Some(key) = self.ticket_key(id) else {
            return Ok(None);
        };
        let mut conn = self.conn_manager.clone();

        let bytes: Option<Vec<u8>> = conn
            .get(&key)
            .await
            .map_err(|e| TicketError::storage("Failed to get ticket from Redis", e))?;

        bytes.map(|bytes| Self::decode(&bytes)).transpose()
    }

    async fn update_ticket(&self, ticket: Ticket) -> Result<()> {
        validate_ticket(&ticket)?;
        let mut conn = self.conn_manager.clone();
        let id = ticket.id();
        let key = self
            .ticket_key(id)
            .ok_or_else(|| TicketError::InvalidArgument(format!("unknown ticket prefix: {id}")))?;
        let bytes = Self::encode(&ticket)?;

        // XX: never resurrect a ticket deleted or evicted since it was read
        let mut cmd = self.set_command(&key, bytes, &ticket);
        cmd.arg("XX");
        let mut pipe = redis::pipe();
        pipe.atomic().add_command(cmd);
        self.expire_children(&mut pipe, &ticket);
        let (written,): (Option<String>,) = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| TicketError::storage("Failed to update ticket", e))?;

        if written.is_none() {
            return Err(TicketError::InvalidTicket { id: id.clone() });
        }
        Ok(())
    }

    async fn grant_ticket<T, F>(&self, parent_id: &TicketId, mut grant: F) -> Result<Option<T>>
    where
        T: Into<Ticket> + Clone + Send,
        F: FnMut(&mut TicketGrantingTicket) -> Result<T> + Send,
    {
        let Some(parent_key) = self.ticket_key(parent_id) else {
            return Ok(None);
        };
        let mut conn = self.conn_manager.clone();
        let script = redis::Script::new(GRANT_SCRIPT);

        for attempt in 1..=GRANT_MAX_ATTEMPTS {
            let current: Option<Vec<u8>> = conn
                .get(&parent_key)
                .await
                .map_err(|e| TicketError::storage("Failed to read parent ticket", e))?;
            let Some(current) = current else {
                return Ok(None);
            };
            let mut parent = match Self::decode(&current)? {
                Ticket::Granting(tgt) => tgt,
                Ticket::Service(_) => {
                    return Err(TicketError::TypeMismatch {
                        id: parent_id.clone(),
                        expected: TicketKind::TicketGranting,
                        actual: TicketKind::Service,
                    });
                }
            };

            let child = grant(&mut parent)?;
            let stored: Ticket = child.clone().into();
            validate_child(parent_id, &stored)?;
            let child_key = self.ticket_key(stored.id()).ok_or_else(|| {
                TicketError::InvalidArgument(format!("unknown ticket prefix: {}", stored.id()))
            })?;
            let parent = Ticket::Granting(parent);

            let written: i64 = script
                .key(&parent_key)
                .key(&child_key)
                .key(self.index_key(stored.kind()))
                .key(self.children_key(parent_id))
                .arg(current)
                .arg(Self::encode(&parent)?)
                .arg(self.expiry_seconds(&parent).unwrap_or(0))
                .arg(Self::encode(&stored)?)
                .arg(self.expiry_seconds(&stored).unwrap_or(0))
                .arg(stored.state().created_at.timestamp_millis())
                .arg(stored.id().as_str())
                .invoke_async(&mut conn)
                .await
                .map_err(|e| TicketError::storage("Failed to grant ticket", e))?;

            if written == 1 {
                tracing::debug!(ticket_id = %stored.id(), parent_id = %parent_id, "Granted ticket in Redis");
                return Ok(Some(child));
            }
            tracing::debug!(parent_id = %parent_id, attempt, "Parent ticket changed during grant, retrying");
        }

        Err(TicketError::StorageUnavailable(format!(
            "Grant on {parent_id} still contended after {GRANT_MAX_ATTEMPTS} attempts"
        )))
    }

    async fn remove_ticket(&self, id: &TicketId) -> Result<RemovedTickets> {
        // An evicted root still owns its child set
        let root = self.get_ticket(id).await?;
        let mut conn = self.conn_manager.clone();
        let mut pending = vec![id.clone()];
        let mut removed = RemovedTickets::default();

        while let Some(current) = pending.pop() {
            let Some(kind) = TicketKind::from_id(&current) else {
                continue;
            };
            let Some(key) = self.ticket_key(&current) else {
                continue;
            };
            let children_key = self.children_key(&current);

            let children: Vec<String> = conn
                .smembers(&children_key)
                .await
                .map_err(|e| TicketError::storage("Failed to read child tickets", e))?;

            let (deleted,): (usize,) = redis::pipe()
                .atomic()
                .del(&key)
                .zrem(self.index_key(kind), current.as_str())
                .ignore()
                .del(&children_key)
                .ignore()
                .del(self.consumed_key(&current))
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(|e| TicketError::storage("Failed to delete ticket", e))?;

            if deleted > 0 {
                removed.record(kind);
            }
            pending.extend(children.into_iter().map(TicketId::from));
        }

        if let Some(parent) = root.as_ref().and_then(Ticket::parent_id) {
            let _: () = conn
                .srem(self.children_key(parent), id.as_str())
                .await
                .map_err(|e| TicketError::storage("Failed to unlink ticket from parent", e))?;
        }

        if removed.total() > 0 {
            tracing::debug!(
                ticket_id = %id,
                ticket_granting = removed.ticket_granting,
                service = removed.service,
                "Deleted ticket from Redis"
            );
        }
        Ok(removed)
    }

    async fn get_tickets(&self) -> Result<Vec<Ticket>> {
        let mut tickets = self.fetch_all(TicketKind::TicketGranting).await?;
        tickets.extend(self.fetch_all(TicketKind::Service).await?);
        Ok(tickets)
    }

    async fn get_ticket_granting_ticket_batch(
        &self,
        offset: usize,
        count: usize,
    ) -> Result<Vec<TicketGrantingTicket>> {
        Ok(self
            .fetch_page(TicketKind::TicketGranting, offset, count)
            .await?
            .into_iter()
            .filter_map(|ticket| match ticket {
                Ticket::Granting(tgt) => Some(tgt),
                Ticket::Service(_) => None,
            })
            .collect())
    }

    async fn get_service_ticket_batch(
        &self,
        offset: usize,
        count: usize,
    ) -> Result<Vec<ServiceTicket>> {
        Ok(self
            .fetch_page(TicketKind::Service, offset, count)
            .await?
            .into_iter()
            .filter_map(|ticket| match ticket {
                Ticket::Service(st) => Some(st),
                Ticket::Granting(_) => None,
            })
            .collect())
    }

    async fn claim_service_ticket(
        &self,
        id: &TicketId,
        now: DateTime<Utc>,
    ) -> Result<Option<ServiceTicket>> {
        let mut st = match self.get_ticket(id).await? {
            None => return Ok(None),
            Some(Ticket::Granting(_)) => {
                return Err(TicketError::TypeMismatch {
                    id: id.clone(),
                    expected: TicketKind::Service,
                    actual: TicketKind::TicketGranting,
                });
            }
            Some(Ticket::Service(st)) => st,
        };
        if st.is_expired(now) {
            return Ok(None);
        }

        let mut conn = self.conn_manager.clone();

        // Exactly one node wins the marker
        let mut claim = redis::cmd("SET");
        claim.arg(self.consumed_key(id)).arg(1).arg("NX");
        if let Some(ttl) = st.expiration_policy().remaining_time_to_live(st.state(), now) {
            claim.arg("EX").arg(ttl_seconds(ttl));
        }
        let claimed: Option<String> = claim
            .query_async(&mut conn)
            .await
            .map_err(|e| TicketError::storage("Failed to claim service ticket", e))?;
        if claimed.is_none() || !st.try_consume(now) {
            tracing::debug!(ticket_id = %id, "Service ticket already claimed");
            return Ok(None);
        }

        let Some(key) = self.ticket_key(id) else {
            return Ok(None);
        };
        let bytes = Self::encode(&Ticket::Service(st.clone()))?;
        let _: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(bytes)
            .arg("XX")
            .arg("KEEPTTL")
            .query_async(&mut conn)
            .await
            .map_err(|e| TicketError::storage("Failed to store consumed service ticket", e))?;

        Ok(Some(st))
    }

    async fn session_count(&self) -> Result<usize> {
        Ok(self.fetch_all(TicketKind::TicketGranting).await?.len())
    }

    async fn service_ticket_count(&self) -> Result<usize> {
        Ok(self.fetch_all(TicketKind::Service).await?.len())
    }
}

/// Whole seconds for `EX`, rounded up and never zero.
fn ttl_seconds(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis().div_ceil(1000))
        .unwrap_or(u64::MAX)
        .max(1)
}

fn to_index(position: usize) -> Result<isize> {
    isize::try_from(position)
        .map_err(|_| TicketError::InvalidArgument(format!("offset out of range: {position}")))
}
