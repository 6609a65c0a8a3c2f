/// Support tickets opened when the assistant cannot resolve a request.
///
/// Identifiers come from a monotonic counter, so two tickets never share an id
/// even when their descriptions are identical.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::TicketError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Ticket {
    pub id: String,
    pub description: String,
    pub created_at_unix: u64,
}

impl Ticket {
    pub fn confirmation(&self) -> String {
        format!(
            "Тикет {} создан. Специалист свяжется в течение 24 часов.",
            self.id
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct TicketRegistry {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    next: AtomicU64,
    tickets: RwLock<HashMap<String, Ticket>>,
}

impl TicketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, description: &str) -> Result<Ticket, TicketError> {
        let description = description.trim();
        if description.is_empty() {
            return Err(TicketError::EmptyDescription);
        }

        let seq = self.inner.next.fetch_add(1, Ordering::Relaxed) + 1;
        let ticket = Ticket {
            id: format!("TICKET-{seq:06}"),
            description: description.to_string(),
            created_at_unix: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        };

        let mut tickets = match self.inner.tickets.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tickets.insert(ticket.id.clone(), ticket.clone());
        info!(ticket_id = %ticket.id, "support ticket created");
        Ok(ticket)
    }

    pub fn get(&self, id: &str) -> Option<Ticket> {
        let tickets = match self.inner.tickets.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tickets.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        match self.inner.tickets.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
