//! Request lifecycle tracker.
//!
//! Per-subject pending-request state preventing duplicate or overlapping
//! score requests. The state machine per subject is a cycle:
//!
//! ```text
//! NoRequest --open--> Pending --score write--> NoRequest
//! ```
//!
//! Never more than one `Pending` at a time: a second submitter observably
//! fails with `AlreadyPending` rather than queuing. Payment confirmation
//! (the second phase of the settlement protocol) marks a request paid but
//! does not close it; only a matching score write does. A request once
//! opened stays open indefinitely; there is no expiry or timeout.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::identity::AgentId;

/// Domain separator for request ID derivation.
const REQUEST_ID_DOMAIN: &[u8] = b"merit.request_id.v1";

/// Derives the opaque request handle from the opening parameters.
///
/// Length-prefix framing for the variable fields keeps the preimage
/// unambiguous.
#[must_use]
pub fn derive_request_id(subject: &AgentId, requester: &AgentId, opened_at: u64) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(REQUEST_ID_DOMAIN);
    hasher.update(&(subject.as_str().len() as u64).to_le_bytes());
    hasher.update(subject.as_str().as_bytes());
    hasher.update(&(requester.as_str().len() as u64).to_le_bytes());
    hasher.update(requester.as_str().as_bytes());
    hasher.update(&opened_at.to_le_bytes());
    hex::encode(hasher.finalize().as_bytes())
}

/// Invoice details recorded by a payment confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAck {
    /// Invoice identifier supplied by the settlement caller.
    pub invoice_id: String,
    /// Amount confirmed as paid.
    pub amount: u64,
    /// Unix seconds when the payment was confirmed.
    pub confirmed_at: u64,
}

/// A live (or just-completed) analysis request for one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    /// Opaque handle for payment confirmation lookups.
    pub request_id: String,
    /// The subject whose reputation is to be analyzed.
    pub subject: AgentId,
    /// Who opened the request (the subject itself, or a marketplace agent
    /// acting on its behalf).
    pub requester: AgentId,
    /// Unix seconds when the request was opened.
    pub opened_at: u64,
    /// Maximum payment the requester committed to, if opened via settlement.
    pub payment_cap: Option<u64>,
    /// Whether payment is settled. Self-service requests start paid.
    pub paid: bool,
    /// Invoice recorded by `confirm_payment`, if any.
    pub payment: Option<PaymentAck>,
    /// Set exactly once, when a matching score write closes the request.
    pub completed: bool,
}

/// Tracks at most one live pending request per subject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTracker {
    pending: BTreeMap<AgentId, PendingRequest>,
    /// Request-id index into `pending`, for payment confirmation.
    by_id: BTreeMap<String, AgentId>,
}

impl RequestTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `subject` has an open, incomplete request.
    #[must_use]
    pub fn has_pending(&self, subject: &AgentId) -> bool {
        self.pending.contains_key(subject)
    }

    /// Returns the open request for `subject`, if any.
    #[must_use]
    pub fn get(&self, subject: &AgentId) -> Option<&PendingRequest> {
        self.pending.get(subject)
    }

    /// Returns the number of open requests.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.pending.len()
    }

    /// Opens a pending request for `subject`.
    ///
    /// Self-service requests pass `payment_cap = None` and start paid;
    /// settlement-phase requests pass a cap and start unpaid.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyPending`] if the subject already has an
    /// open, incomplete request.
    pub fn open(
        &mut self,
        subject: AgentId,
        requester: AgentId,
        opened_at: u64,
        payment_cap: Option<u64>,
    ) -> Result<&PendingRequest, EngineError> {
        if self.pending.contains_key(&subject) {
            return Err(EngineError::AlreadyPending { subject });
        }

        let request_id = derive_request_id(&subject, &requester, opened_at);
        let request = PendingRequest {
            request_id: request_id.clone(),
            subject: subject.clone(),
            requester,
            opened_at,
            paid: payment_cap.is_none(),
            payment_cap,
            payment: None,
            completed: false,
        };
        self.by_id.insert(request_id, subject.clone());
        self.pending.insert(subject.clone(), request);
        Ok(&self.pending[&subject])
    }

    /// Marks the request identified by `request_id` as paid.
    ///
    /// Does not close the request; only a score write does that.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoSuchRequest`] if no open request matches,
    /// or [`EngineError::CapExceeded`] if `amount` exceeds the cap recorded
    /// when the request was opened.
    pub fn confirm_payment(
        &mut self,
        request_id: &str,
        invoice_id: String,
        amount: u64,
        now: u64,
    ) -> Result<&PendingRequest, EngineError> {
        let subject = self
            .by_id
            .get(request_id)
            .ok_or_else(|| EngineError::NoSuchRequest {
                request_id: request_id.to_string(),
            })?
            .clone();

        // The index only ever points at live entries, so the lookup holds.
        let request = self
            .pending
            .get_mut(&subject)
            .ok_or_else(|| EngineError::NoSuchRequest {
                request_id: request_id.to_string(),
            })?;

        if let Some(cap) = request.payment_cap {
            if amount > cap {
                return Err(EngineError::CapExceeded { amount, cap });
            }
        }

        request.paid = true;
        request.payment = Some(PaymentAck {
            invoice_id,
            amount,
            confirmed_at: now,
        });
        Ok(&self.pending[&subject])
    }

    /// Closes the open request for `subject` as a side effect of a score
    /// write, returning the completed record.
    ///
    /// Returns `None` when the subject has no open request: a write with no
    /// matching request is an out-of-band update, not an error.
    pub fn complete(&mut self, subject: &AgentId) -> Option<PendingRequest> {
        let mut request = self.pending.remove(subject)?;
        self.by_id.remove(&request.request_id);
        request.completed = true;
        Some(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject() -> AgentId {
        AgentId::from("wallet-1")
    }

    #[test]
    fn open_then_open_again_is_already_pending() {
        let mut tracker = RequestTracker::new();
        tracker
            .open(subject(), subject(), 100, None)
            .unwrap();

        let err = tracker.open(subject(), subject(), 101, None).unwrap_err();
        assert!(matches!(err, EngineError::AlreadyPending { .. }));
        assert_eq!(tracker.open_count(), 1);
    }

    #[test]
    fn self_service_request_starts_paid() {
        let mut tracker = RequestTracker::new();
        let request = tracker.open(subject(), subject(), 100, None).unwrap();
        assert!(request.paid);
        assert_eq!(request.payment_cap, None);
        assert!(!request.completed);
    }

    #[test]
    fn settlement_request_starts_unpaid_with_cap() {
        let mut tracker = RequestTracker::new();
        let market = AgentId::from("market-1");
        let request = tracker
            .open(subject(), market.clone(), 100, Some(10))
            .unwrap();
        assert!(!request.paid);
        assert_eq!(request.payment_cap, Some(10));
        assert_eq!(request.requester, market);
    }

    #[test]
    fn confirm_payment_enforces_cap_and_keeps_request_open() {
        let mut tracker = RequestTracker::new();
        let market = AgentId::from("market-1");
        let request_id = tracker
            .open(subject(), market, 100, Some(10))
            .unwrap()
            .request_id
            .clone();

        let err = tracker
            .confirm_payment(&request_id, "inv-1".to_string(), 15, 101)
            .unwrap_err();
        assert_eq!(err, EngineError::CapExceeded { amount: 15, cap: 10 });
        assert!(!tracker.get(&subject()).unwrap().paid);

        let request = tracker
            .confirm_payment(&request_id, "inv-1".to_string(), 5, 102)
            .unwrap();
        assert!(request.paid);
        assert_eq!(
            request.payment,
            Some(PaymentAck {
                invoice_id: "inv-1".to_string(),
                amount: 5,
                confirmed_at: 102,
            })
        );

        // Payment does not close the request.
        assert!(tracker.has_pending(&subject()));
    }

    #[test]
    fn confirm_payment_unknown_id_fails() {
        let mut tracker = RequestTracker::new();
        let err = tracker
            .confirm_payment("deadbeef", "inv-1".to_string(), 1, 100)
            .unwrap_err();
        assert!(matches!(err, EngineError::NoSuchRequest { .. }));
    }

    #[test]
    fn complete_consumes_exactly_once_and_reopens_slot() {
        let mut tracker = RequestTracker::new();
        tracker.open(subject(), subject(), 100, None).unwrap();

        let completed = tracker.complete(&subject()).unwrap();
        assert!(completed.completed);
        assert!(!tracker.has_pending(&subject()));
        assert!(tracker.complete(&subject()).is_none());

        // The slot is free again.
        tracker.open(subject(), subject(), 200, None).unwrap();
    }

    #[test]
    fn complete_without_request_is_none() {
        let mut tracker = RequestTracker::new();
        assert!(tracker.complete(&subject()).is_none());
    }

    #[test]
    fn request_ids_are_deterministic_and_distinct() {
        let a = derive_request_id(&subject(), &subject(), 100);
        let b = derive_request_id(&subject(), &subject(), 100);
        let c = derive_request_id(&subject(), &subject(), 101);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
