//! In-memory ticket registry.
//!
//! Single-process backend: every ticket lives in one map guarded by a coarse
//! mutex, alongside a parent → children index used for cascade deletion.
//! The mutex is never held across an `.await`.

use crate::error::{Result, TicketError};
use crate::providers::TicketRegistry;
use crate::providers::registry::{RemovedTickets, batch_order, validate_child, validate_ticket};
use chrono::{DateTime, Utc};
use sso_ticket_core::{ServiceTicket, Ticket, TicketGrantingTicket, TicketId, TicketKind};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Tables {
    tickets: HashMap<TicketId, Ticket>,
    children: HashMap<TicketId, HashSet<TicketId>>,
}

impl Tables {
    fn insert(&mut self, ticket: Ticket) {
        let id = ticket.id().clone();
        let new_parent = ticket.parent_id().cloned();

        if let Some(previous) = self.tickets.insert(id.clone(), ticket) {
            if let Some(old_parent) = previous.parent_id() {
                if Some(old_parent) != new_parent.as_ref() {
                    self.unlink(old_parent, &id);
                }
            }
        }
        if let Some(parent) = new_parent {
            self.children.entry(parent).or_default().insert(id);
        }
    }

    fn unlink(&mut self, parent: &TicketId, child: &TicketId) {
        if let Some(siblings) = self.children.get_mut(parent) {
            siblings.remove(child);
            if siblings.is_empty() {
                self.children.remove(parent);
            }
        }
    }

    /// Remove `id` and every descendant, counting into `removed`.
    fn remove_cascade(&mut self, id: &TicketId, removed: &mut RemovedTickets) {
        let Some(ticket) = self.tickets.remove(id) else {
            return;
        };
        if let Some(parent) = ticket.parent_id() {
            self.unlink(parent, id);
        }

        removed.record(ticket.kind());
        if let Some(children) = self.children.remove(id) {
            for child in children {
                self.remove_cascade(&child, removed);
            }
        }
    }

    fn sorted_of_kind(&self, kind: TicketKind) -> Vec<&Ticket> {
        let mut tickets: Vec<&Ticket> = self
            .tickets
            .values()
            .filter(|ticket| ticket.kind() == kind)
            .collect();
        tickets.sort_by(|a, b| batch_order(a).cmp(&batch_order(b)));
        tickets
    }

    fn count_of_kind(&self, kind: TicketKind) -> usize {
        self.tickets.values().filter(|ticket| ticket.kind() == kind).count()
    }
}

/// In-memory ticket registry.
///
/// Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct DefaultTicketRegistry {
    tables: Arc<Mutex<Tables>>,
}

impl DefaultTicketRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| TicketError::poisoned())
    }
}

impl TicketRegistry for DefaultTicketRegistry {
    async fn add_ticket(&self, ticket: Ticket) -> Result<()> {
        validate_ticket(&ticket)?;
        tracing::debug!(ticket_id = %ticket.id(), kind = %ticket.kind(), "Adding ticket");
        self.tables()?.insert(ticket);
        Ok(())
    }

    async fn get_ticket(&self, id: &TicketId) -> Result<Option<Ticket>> {
        Ok(self.tables()?.tickets.get(id).cloned())
    }

    async fn update_ticket(&self, ticket: Ticket) -> Result<()> {
        validate_ticket(&ticket)?;
        let mut tables = self.tables()?;
        if !tables.tickets.contains_key(ticket.id()) {
            return Err(TicketError::InvalidTicket {
                id: ticket.id().clone(),
            });
        }
        tables.insert(ticket);
        Ok(())
    }

    async fn grant_ticket<T, F>(&self, parent_id: &TicketId, mut grant: F) -> Result<Option<T>>
    where
        T: Into<Ticket> + Clone + Send,
        F: FnMut(&mut TicketGrantingTicket) -> Result<T> + Send,
    {
        let mut tables = self.tables()?;
        let mut parent = match tables.tickets.get(parent_id) {
            None => return Ok(None),
            Some(Ticket::Granting(tgt)) => tgt.clone(),
            Some(Ticket::Service(_)) => {
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

        tracing::debug!(ticket_id = %stored.id(), parent_id = %parent_id, "Granting ticket");
        tables.insert(parent.into());
        tables.insert(stored);
        Ok(Some(child))
    }

    async fn remove_ticket(&self, id: &TicketId) -> Result<RemovedTickets> {
        let mut removed = RemovedTickets::default();
        self.tables()?.remove_cascade(id, &mut removed);
        if removed.total() > 0 {
            tracing::debug!(
                ticket_id = %id,
                ticket_granting = removed.ticket_granting,
                service = removed.service,
                "Deleted ticket"
            );
        }
        Ok(removed)
    }

    async fn get_tickets(&self) -> Result<Vec<Ticket>> {
        Ok(self.tables()?.tickets.values().cloned().collect())
    }

    async fn get_ticket_granting_ticket_batch(
        &self,
        offset: usize,
        count: usize,
    ) -> Result<Vec<TicketGrantingTicket>> {
        let tables = self.tables()?;
        Ok(tables
            .sorted_of_kind(TicketKind::TicketGranting)
            .into_iter()
            .skip(offset)
            .take(count)
            .filter_map(Ticket::as_ticket_granting_ticket)
            .cloned()
            .collect())
    }

    async fn get_service_ticket_batch(
        &self,
        offset: usize,
        count: usize,
    ) -> Result<Vec<ServiceTicket>> {
        let tables = self.tables()?;
        Ok(tables
            .sorted_of_kind(TicketKind::Service)
            .into_iter()
            .skip(offset)
            .take(count)
            .filter_map(Ticket::as_service_ticket)
            .cloned()
            .collect())
    }

    async fn claim_service_ticket(
        &self,
        id: &TicketId,
        now: DateTime<Utc>,
    ) -> Result<Option<ServiceTicket>> {
        let mut tables = self.tables()?;
        match tables.tickets.get_mut(id) {
            None => Ok(None),
            Some(Ticket::Granting(_)) => Err(TicketError::TypeMismatch {
                id: id.clone(),
                expected: TicketKind::Service,
                actual: TicketKind::TicketGranting,
            }),
            Some(Ticket::Service(st)) => {
                if st.try_consume(now) {
                    Ok(Some(st.clone()))
                } else {
                    Ok(None)
                }
            }
        }
    }

    async fn session_count(&self) -> Result<usize> {
        Ok(self.tables()?.count_of_kind(TicketKind::TicketGranting))
    }

    async fn service_ticket_count(&self) -> Result<usize> {
        Ok(self.tables()?.count_of_kind(TicketKind::Service))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use sso_ticket_core::{Clock, ExpirationPolicy};
    use sso_ticket_testing::{MutableClock, fixtures};
    use std::time::Duration;

    #[tokio::test]
    async fn test_add_and_get_round_trip() -> Result<()> {
        let clock = MutableClock::new(fixtures::epoch());
        let registry = DefaultTicketRegistry::new();
        let tgt = fixtures::ticket_granting_ticket("TGT-1-a", &clock);

        registry.add_ticket(tgt.clone().into()).await?;

        assert_eq!(
            registry.get_ticket(tgt.id()).await?,
            Some(Ticket::Granting(tgt))
        );
        assert_eq!(registry.get_ticket(&TicketId::from("TGT-2-a")).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_add_rejects_malformed_ids() {
        let clock = MutableClock::new(fixtures::epoch());
        let registry = DefaultTicketRegistry::new();

        let empty = fixtures::ticket_granting_ticket("", &clock);
        let wrong_prefix = fixtures::ticket_granting_ticket("ST-1-a", &clock);

        assert!(matches!(
            registry.add_ticket(empty.into()).await,
            Err(TicketError::InvalidArgument(_))
        ));
        assert!(matches!(
            registry.add_ticket(wrong_prefix.into()).await,
            Err(TicketError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_re_add_is_last_write_wins() -> Result<()> {
        let clock = MutableClock::new(fixtures::epoch());
        let registry = DefaultTicketRegistry::new();
        let mut tgt = fixtures::ticket_granting_ticket("TGT-1-a", &clock);

        registry.add_ticket(tgt.clone().into()).await?;
        tgt.expire();
        registry.add_ticket(tgt.clone().into()).await?;

        assert_eq!(registry.session_count().await?, 1);
        let stored = registry.get_ticket_granting_ticket(tgt.id()).await?;
        assert!(stored.is_some_and(|t| t.is_expired(clock.now())));
        Ok(())
    }

    #[tokio::test]
    async fn test_kind_mismatch_is_an_error() -> Result<()> {
        let clock = MutableClock::new(fixtures::epoch());
        let registry = DefaultTicketRegistry::new();
        let mut tgt = fixtures::ticket_granting_ticket("TGT-1-a", &clock);
        let st = fixtures::service_ticket(&mut tgt, "ST-1-a", ExpirationPolicy::NeverExpires, &clock);
        registry.add_ticket(tgt.clone().into()).await?;
        registry.add_ticket(st.clone().into()).await?;

        assert!(matches!(
            registry.get_service_ticket(tgt.id()).await,
            Err(TicketError::TypeMismatch { .. })
        ));
        assert!(matches!(
            registry.get_ticket_granting_ticket(st.id()).await,
            Err(TicketError::TypeMismatch { .. })
        ));
        assert_eq!(registry.get_service_ticket(st.id()).await?, Some(st));
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_cascades_to_children() -> Result<()> {
        let clock = MutableClock::new(fixtures::epoch());
        let registry = DefaultTicketRegistry::new();
        let mut tgt = fixtures::ticket_granting_ticket("TGT-1-a", &clock);

        let mut children = Vec::new();
        for i in 0..5 {
            let st = fixtures::service_ticket(
                &mut tgt,
                &format!("ST-{i}-a"),
                ExpirationPolicy::NeverExpires,
                &clock,
            );
            children.push(st);
        }
        let pgt = tgt.grant_proxy_granting_ticket(
            TicketId::from("PGT-1-a"),
            fixtures::service("proxy"),
            fixtures::authentication("https://proxy.example.com", clock.now()),
            ExpirationPolicy::NeverExpires,
            clock.now(),
        );
        let mut pgt_child = pgt.clone();
        let proxied_st =
            fixtures::service_ticket(&mut pgt_child, "ST-9-a", ExpirationPolicy::NeverExpires, &clock);

        registry.add_ticket(tgt.clone().into()).await?;
        for st in children {
            registry.add_ticket(st.into()).await?;
        }
        registry.add_ticket(pgt.into()).await?;
        registry.add_ticket(proxied_st.into()).await?;

        // Root + 5 STs + PGT + the PGT's ST
        assert_eq!(registry.delete_ticket(tgt.id()).await?, 8);
        assert!(registry.get_tickets().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() -> Result<()> {
        let clock = MutableClock::new(fixtures::epoch());
        let registry = DefaultTicketRegistry::new();
        let mut tgt = fixtures::ticket_granting_ticket("TGT-1-a", &clock);
        let st = fixtures::service_ticket(&mut tgt, "ST-1-a", ExpirationPolicy::NeverExpires, &clock);
        registry.add_ticket(tgt.clone().into()).await?;
        registry.add_ticket(st.clone().into()).await?;

        assert_eq!(registry.delete_ticket(st.id()).await?, 1);
        assert_eq!(registry.delete_ticket(st.id()).await?, 0);
        // The deleted ST is no longer counted as a child
        assert_eq!(registry.delete_ticket(tgt.id()).await?, 1);
        assert_eq!(registry.delete_ticket(tgt.id()).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_requires_existing_ticket() -> Result<()> {
        let clock = MutableClock::new(fixtures::epoch());
        let registry = DefaultTicketRegistry::new();
        let mut tgt = fixtures::ticket_granting_ticket("TGT-1-a", &clock);

        assert!(matches!(
            registry.update_ticket(tgt.clone().into()).await,
            Err(TicketError::InvalidTicket { .. })
        ));

        registry.add_ticket(tgt.clone().into()).await?;
        let _ = fixtures::service_ticket(&mut tgt, "ST-1-a", ExpirationPolicy::NeverExpires, &clock);
        registry.update_ticket(tgt.clone().into()).await?;

        let stored = registry.get_ticket_granting_ticket(tgt.id()).await?;
        assert_eq!(stored.map(|t| t.services().len()), Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn test_batches_are_ordered_by_creation() -> Result<()> {
        let clock = MutableClock::new(fixtures::epoch());
        let registry = DefaultTicketRegistry::new();

        for i in (0..10).rev() {
            clock.set(fixtures::epoch() + TimeDelta::seconds(i));
            let tgt = fixtures::ticket_granting_ticket(&format!("TGT-{i}-a"), &clock);
            registry.add_ticket(tgt.into()).await?;
        }

        let first = registry.get_ticket_granting_ticket_batch(0, 4).await?;
        let ids: Vec<&str> = first.iter().map(|t| t.id().as_str()).collect();
        assert_eq!(ids, ["TGT-0-a", "TGT-1-a", "TGT-2-a", "TGT-3-a"]);

        assert_eq!(registry.get_ticket_granting_ticket_batch(8, 4).await?.len(), 2);
        assert!(registry.get_ticket_granting_ticket_batch(10, 4).await?.is_empty());
        assert!(registry.get_service_ticket_batch(0, 4).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_claim_is_single_use() -> Result<()> {
        let clock = MutableClock::new(fixtures::epoch());
        let registry = DefaultTicketRegistry::new();
        let mut tgt = fixtures::ticket_granting_ticket("TGT-1-a", &clock);
        let st = fixtures::service_ticket(&mut tgt, "ST-1-a", ExpirationPolicy::NeverExpires, &clock);
        registry.add_ticket(st.clone().into()).await?;

        let claimed = registry.claim_service_ticket(st.id(), clock.now()).await?;
        assert!(claimed.is_some_and(|c| c.is_consumed()));
        assert_eq!(registry.claim_service_ticket(st.id(), clock.now()).await?, None);

        // Consumed tickets stay retrievable but report expired
        let stored = registry.get_service_ticket(st.id()).await?;
        assert!(stored.is_some_and(|s| s.is_expired(clock.now())));
        Ok(())
    }

    #[tokio::test]
    async fn test_claim_rejects_expired_ticket() -> Result<()> {
        let clock = MutableClock::new(fixtures::epoch());
        let registry = DefaultTicketRegistry::new();
        let mut tgt = fixtures::ticket_granting_ticket("TGT-1-a", &clock);
        let st = fixtures::service_ticket(
            &mut tgt,
            "ST-1-a",
            ExpirationPolicy::multi_time_use(1, Duration::from_secs(10)),
            &clock,
        );
        registry.add_ticket(st.clone().into()).await?;

        clock.advance(TimeDelta::seconds(11));
        assert_eq!(registry.claim_service_ticket(st.id(), clock.now()).await?, None);
        assert_eq!(registry.claim_service_ticket(&TicketId::from("ST-2-a"), clock.now()).await?, None);

        registry.add_ticket(tgt.clone().into()).await?;
        assert!(matches!(
            registry.claim_service_ticket(tgt.id(), clock.now()).await,
            Err(TicketError::TypeMismatch { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() -> Result<()> {
        let clock = MutableClock::new(fixtures::epoch());
        let registry = DefaultTicketRegistry::new();
        let mut tgt = fixtures::ticket_granting_ticket("TGT-1-a", &clock);
        let st = fixtures::service_ticket(&mut tgt, "ST-1-a", ExpirationPolicy::NeverExpires, &clock);
        registry.add_ticket(st.clone().into()).await?;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            let id = st.id().clone();
            let now = clock.now();
            handles.push(tokio::spawn(async move {
                registry.claim_service_ticket(&id, now).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle
                .await
                .map_err(|e| TicketError::Internal(e.to_string()))??
                .is_some()
            {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_counts() -> Result<()> {
        let clock = MutableClock::new(fixtures::epoch());
        let registry = DefaultTicketRegistry::new();
        let mut tgt = fixtures::ticket_granting_ticket("TGT-1-a", &clock);
        let st1 = fixtures::service_ticket(&mut tgt, "ST-1-a", ExpirationPolicy::NeverExpires, &clock);
        let st2 = fixtures::service_ticket(&mut tgt, "ST-2-a", ExpirationPolicy::NeverExpires, &clock);
        registry.add_ticket(tgt.into()).await?;
        registry.add_ticket(st1.into()).await?;
        registry.add_ticket(st2.into()).await?;

        assert_eq!(registry.session_count().await?, 1);
        assert_eq!(registry.service_ticket_count().await?, 2);
        assert_eq!(registry.get_tickets().await?.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_remove_counts_each_keyspace() -> Result<()> {
        let clock = MutableClock::new(fixtures::epoch());
        let registry = DefaultTicketRegistry::new();
        let mut tgt = fixtures::ticket_granting_ticket("TGT-1-a", &clock);
        let st = fixtures::service_ticket(&mut tgt, "ST-1-a", ExpirationPolicy::NeverExpires, &clock);
        let pgt = tgt.grant_proxy_granting_ticket(
            TicketId::from("PGT-1-a"),
            fixtures::service("proxy"),
            fixtures::authentication("https://proxy.example.com", clock.now()),
            ExpirationPolicy::NeverExpires,
            clock.now(),
        );
        registry.add_ticket(tgt.clone().into()).await?;
        registry.add_ticket(st.into()).await?;
        registry.add_ticket(pgt.into()).await?;

        let removed = registry.remove_ticket(tgt.id()).await?;
        assert_eq!(removed, RemovedTickets { ticket_granting: 2, service: 1 });
        assert_eq!(registry.remove_ticket(tgt.id()).await?, RemovedTickets::default());
        Ok(())
    }

    #[tokio::test]
    async fn test_grant_writes_parent_and_child_together() -> Result<()> {
        let clock = MutableClock::new(fixtures::epoch());
        let registry = DefaultTicketRegistry::new();
        let tgt = fixtures::ticket_granting_ticket("TGT-1-a", &clock);
        registry.add_ticket(tgt.clone().into()).await?;

        let st = registry
            .grant_ticket(tgt.id(), |parent| {
                Ok(fixtures::service_ticket(parent, "ST-1-a", ExpirationPolicy::NeverExpires, &clock))
            })
            .await?;
        assert!(st.is_some_and(|st| st.ticket_granting_ticket_id() == tgt.id()));

        let stored = registry.get_ticket_granting_ticket(tgt.id()).await?;
        assert!(stored.is_some_and(|t| t.services().len() == 1 && t.state().use_count == 1));
        assert_eq!(registry.service_ticket_count().await?, 1);

        // Cascade sees the granted child
        assert_eq!(registry.delete_ticket(tgt.id()).await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_grant_on_missing_parent_stores_nothing() -> Result<()> {
        let clock = MutableClock::new(fixtures::epoch());
        let registry = DefaultTicketRegistry::new();

        let granted = registry
            .grant_ticket(&TicketId::from("TGT-1-a"), |parent| {
                Ok(fixtures::service_ticket(parent, "ST-1-a", ExpirationPolicy::NeverExpires, &clock))
            })
            .await?;

        assert_eq!(granted, None);
        assert!(registry.get_tickets().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_grant_rejects_foreign_child_and_failed_grants() -> Result<()> {
        let clock = MutableClock::new(fixtures::epoch());
        let registry = DefaultTicketRegistry::new();
        let tgt = fixtures::ticket_granting_ticket("TGT-1-a", &clock);
        let mut other = fixtures::ticket_granting_ticket("TGT-2-a", &clock);
        registry.add_ticket(tgt.clone().into()).await?;

        let foreign = registry
            .grant_ticket(tgt.id(), |_| {
                Ok(fixtures::service_ticket(&mut other, "ST-1-a", ExpirationPolicy::NeverExpires, &clock))
            })
            .await;
        assert!(matches!(foreign, Err(TicketError::InvalidArgument(_))));

        let refused: Result<Option<ServiceTicket>> = registry
            .grant_ticket(tgt.id(), |parent| {
                Err(TicketError::TicketExpired { id: parent.id().clone() })
            })
            .await;
        assert!(matches!(refused, Err(TicketError::TicketExpired { .. })));

        // Neither attempt touched the stored parent
        assert_eq!(registry.get_ticket_granting_ticket(tgt.id()).await?, Some(tgt));
        assert_eq!(registry.service_ticket_count().await?, 0);
        Ok(())
    }
}
