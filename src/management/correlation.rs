//! Correlation tables for both request directions
//!
//! The outbound table holds device-initiated requests until the controller
//! answers on `iotdm-1/response`. The inbound table holds controller-initiated
//! actions until the application accepts or rejects them. The two tables are
//! independent namespaces: the same id may appear in both.
//!
//! Inbound entries from management topics that carry no action are never
//! announced to the application, so nobody will acknowledge them. Those are
//! the only inbound entries that expire.

use super::envelope::CorrelationId;
use super::error::ManagementError;
use super::request::RequestKind;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Device-initiated request awaiting a response
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub correlation_id: CorrelationId,
    pub kind: RequestKind,
    /// Serialized envelope as published, kept for diagnostics
    pub payload: String,
    pub registered_at: Instant,
}

impl OutboundRequest {
    pub fn topic(&self) -> &'static str {
        self.kind.topic()
    }
}

/// Controller-initiated action awaiting the application's decision
#[derive(Debug, Clone)]
pub struct InboundActionRequest {
    pub correlation_id: CorrelationId,
    pub topic: String,
    pub body: Option<Value>,
    /// The application was told about this entry and owns its acknowledgment
    pub announced: bool,
    pub registered_at: Instant,
}

#[derive(Debug, Default)]
pub struct OutboundTable {
    pending: HashMap<CorrelationId, OutboundRequest>,
}

impl OutboundTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, request: OutboundRequest) -> Result<(), ManagementError> {
        if self.pending.contains_key(&request.correlation_id) {
            return Err(ManagementError::DuplicateCorrelationId(
                request.correlation_id,
            ));
        }
        self.pending.insert(request.correlation_id.clone(), request);
        Ok(())
    }

    /// Removes and returns the entry; an unknown id leaves the table untouched
    pub fn resolve(
        &mut self,
        correlation_id: &CorrelationId,
    ) -> Result<OutboundRequest, ManagementError> {
        self.pending
            .remove(correlation_id)
            .ok_or_else(|| ManagementError::UnknownCorrelationId(correlation_id.clone()))
    }

    /// Drops every entry registered at least `max_age` before `now`
    pub fn expire(&mut self, now: Instant, max_age: Duration) -> Vec<OutboundRequest> {
        let expired: Vec<CorrelationId> = self
            .pending
            .values()
            .filter(|request| now.saturating_duration_since(request.registered_at) >= max_age)
            .map(|request| request.correlation_id.clone())
            .collect();

        expired
            .iter()
            .filter_map(|id| self.pending.remove(id))
            .collect()
    }

    pub fn contains(&self, correlation_id: &CorrelationId) -> bool {
        self.pending.contains_key(correlation_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct InboundTable {
    pending: HashMap<CorrelationId, InboundActionRequest>,
}

impl InboundTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last write wins: the controller may reuse an id after a finished exchange
    pub fn register(&mut self, request: InboundActionRequest) -> Option<InboundActionRequest> {
        self.pending.insert(request.correlation_id.clone(), request)
    }

    /// Drops unannounced entries registered at least `max_age` before `now`
    pub fn expire_unannounced(
        &mut self,
        now: Instant,
        max_age: Duration,
    ) -> Vec<InboundActionRequest> {
        let expired: Vec<CorrelationId> = self
            .pending
            .values()
            .filter(|request| {
                !request.announced
                    && now.saturating_duration_since(request.registered_at) >= max_age
            })
            .map(|request| request.correlation_id.clone())
            .collect();

        expired
            .iter()
            .filter_map(|id| self.pending.remove(id))
            .collect()
    }

    pub fn take_for_ack(
        &mut self,
        correlation_id: &CorrelationId,
    ) -> Result<InboundActionRequest, ManagementError> {
        self.pending
            .remove(correlation_id)
            .ok_or_else(|| ManagementError::UnknownCorrelationId(correlation_id.clone()))
    }

    pub fn contains(&self, correlation_id: &CorrelationId) -> bool {
        self.pending.contains_key(correlation_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbound(id: &str, registered_at: Instant) -> OutboundRequest {
        OutboundRequest {
            correlation_id: CorrelationId::from(id),
            kind: RequestKind::Manage,
            payload: format!("{{\"reqId\":\"{}\"}}", id),
            registered_at,
        }
    }

    fn inbound(id: &str, topic: &str) -> InboundActionRequest {
        InboundActionRequest {
            correlation_id: CorrelationId::from(id),
            topic: topic.to_string(),
            body: None,
            announced: true,
            registered_at: Instant::now(),
        }
    }

    #[test]
    fn test_outbound_register_and_resolve() {
        let mut table = OutboundTable::new();
        table.register(outbound("a", Instant::now())).unwrap();
        table.register(outbound("b", Instant::now())).unwrap();
        assert_eq!(table.len(), 2);

        let resolved = table.resolve(&CorrelationId::from("a")).unwrap();
        assert_eq!(resolved.topic(), "iotdevice-1/mgmt/manage");
        assert!(!table.contains(&CorrelationId::from("a")));
        assert!(table.contains(&CorrelationId::from("b")));
    }

    #[test]
    fn test_outbound_duplicate_is_rejected() {
        let mut table = OutboundTable::new();
        table.register(outbound("a", Instant::now())).unwrap();

        let err = table.register(outbound("a", Instant::now())).unwrap_err();
        assert!(matches!(err, ManagementError::DuplicateCorrelationId(id) if id.as_str() == "a"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_outbound_unknown_id_leaves_table_alone() {
        let mut table = OutboundTable::new();
        table.register(outbound("a", Instant::now())).unwrap();

        let err = table.resolve(&CorrelationId::from("zzz")).unwrap_err();
        assert!(matches!(err, ManagementError::UnknownCorrelationId(_)));
        assert_eq!(table.len(), 1);

        table.resolve(&CorrelationId::from("a")).unwrap();
        assert!(matches!(
            table.resolve(&CorrelationId::from("a")),
            Err(ManagementError::UnknownCorrelationId(_))
        ));
    }

    #[test]
    fn test_outbound_expiry() {
        let start = Instant::now();
        let mut table = OutboundTable::new();
        table.register(outbound("old", start)).unwrap();
        table
            .register(outbound("new", start + Duration::from_secs(50)))
            .unwrap();

        let expired = table.expire(start + Duration::from_secs(60), Duration::from_secs(30));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].correlation_id.as_str(), "old");
        assert!(table.contains(&CorrelationId::from("new")));
    }

    #[test]
    fn test_inbound_expiry_spares_announced_actions() {
        let start = Instant::now();
        let mut table = InboundTable::new();
        table.register(InboundActionRequest {
            registered_at: start,
            ..inbound("reboot-1", "iotdm-1/mgmt/initiate/device/reboot")
        });
        table.register(InboundActionRequest {
            announced: false,
            registered_at: start,
            ..inbound("obs-1", "iotdm-1/observe")
        });

        let expired = table.expire_unannounced(start + Duration::from_secs(60), Duration::from_secs(30));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].correlation_id.as_str(), "obs-1");
        assert!(table.contains(&CorrelationId::from("reboot-1")));
    }

    #[test]
    fn test_inbound_overwrites_and_takes_once() {
        let mut table = InboundTable::new();
        assert!(table
            .register(inbound("abc", "iotdm-1/mgmt/initiate/device/reboot"))
            .is_none());
        let previous = table
            .register(inbound("abc", "iotdm-1/mgmt/initiate/device/factory_reset"))
            .unwrap();
        assert_eq!(previous.topic, "iotdm-1/mgmt/initiate/device/reboot");
        assert_eq!(table.len(), 1);

        let taken = table.take_for_ack(&CorrelationId::from("abc")).unwrap();
        assert_eq!(taken.topic, "iotdm-1/mgmt/initiate/device/factory_reset");
        assert!(table.is_empty());
        assert!(matches!(
            table.take_for_ack(&CorrelationId::from("abc")),
            Err(ManagementError::UnknownCorrelationId(_))
        ));
    }
}
