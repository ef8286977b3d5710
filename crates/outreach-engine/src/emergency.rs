//! Emergency dispatch matcher.
//!
//! ```text
//! inbound text ──keyword──▶ Detected ──▶ Searching ──┬─▶ Dispatched        (pro + customer notified)
//!                                                    └─▶ ManualEscalation  (customer gets a holding message)
//! ```
//!
//! Every transition is persisted so escalations can be listed by an
//! operator. Both sends bypass the delivery gate and the dedup ledger.

use std::sync::Arc;

use outreach_core::config::{EmergencyConfig, TieBreak};
use outreach_core::traits::{EmergencyLog, ProviderPool};
use outreach_core::types::{
    Category, DispatchState, EmergencyDispatchRequest, GeoPoint, OutboundMessage, ProCandidate, Recipient,
};
use outreach_core::Clock;
use rand::seq::SliceRandom;

use crate::gate::Urgency;
use crate::outbox::Outbox;
use crate::templates::{self, Fields, excerpt};

/// Case-insensitive substring match; returns the first keyword hit.
pub fn detect<'k>(text: &str, keywords: &'k [String]) -> Option<&'k str> {
    let haystack = text.to_lowercase();
    keywords
        .iter()
        .map(String::as_str)
        .find(|k| !k.is_empty() && haystack.contains(&k.to_lowercase()))
}

/// Pick one candidate according to the tie-break policy.
pub fn select(candidates: &[ProCandidate], origin: Option<GeoPoint>, tie_break: TieBreak) -> Option<ProCandidate> {
    match tie_break {
        TieBreak::Nearest => {
            let Some(origin) = origin else {
                return candidates.first().cloned();
            };
            let distance = |c: &ProCandidate| {
                c.location
                    .map(|p| origin.distance_km(&p))
                    .unwrap_or(f64::INFINITY)
            };
            candidates
                .iter()
                .min_by(|a, b| distance(a).total_cmp(&distance(b)))
                .cloned()
        }
        TieBreak::HighestRated => {
            let rating = |c: &ProCandidate| c.rating.unwrap_or(f64::NEG_INFINITY);
            // min_by on the reversed order keeps the first of equals
            candidates
                .iter()
                .min_by(|a, b| rating(b).total_cmp(&rating(a)))
                .cloned()
        }
        TieBreak::Arbitrary => candidates.choose(&mut rand::thread_rng()).cloned(),
    }
}

pub struct EmergencyMatcher {
    config: EmergencyConfig,
    pros: Arc<dyn ProviderPool>,
    log: Arc<dyn EmergencyLog>,
    outbox: Arc<Outbox>,
    clock: Arc<dyn Clock>,
}

impl EmergencyMatcher {
    pub fn new(
        config: EmergencyConfig,
        pros: Arc<dyn ProviderPool>,
        log: Arc<dyn EmergencyLog>,
        outbox: Arc<Outbox>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            pros,
            log,
            outbox,
            clock,
        }
    }

    pub fn keywords(&self) -> &[String] {
        &self.config.keywords
    }

    /// Run the state machine for one detected emergency.
    pub async fn handle(
        &self,
        requester: &Recipient,
        raw_message: &str,
        location_hint: Option<&str>,
    ) -> EmergencyDispatchRequest {
        let mut request = self.open_request(&requester.id, raw_message, location_hint).await;

        self.transition(&mut request, DispatchState::Searching).await;
        let candidates = match self.pros.emergency_candidates(self.config.candidate_limit).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("⚠️ Emergency candidate search failed: {e}");
                Vec::new()
            }
        };
        // A pro we cannot text cannot be dispatched.
        request.candidates = candidates.into_iter().filter(|c| c.phone.is_some()).collect();

        match select(&request.candidates, requester.location, self.config.tie_break) {
            Some(pro) => self.dispatch(&mut request, requester, pro).await,
            None => self.escalate(&mut request, requester).await,
        }
        request
    }

    /// Record an emergency from a sender the directory could not resolve.
    /// Nobody can be texted back, so it goes straight to a human.
    pub async fn escalate_unresolved(
        &self,
        requester_id: &str,
        raw_message: &str,
        location_hint: Option<&str>,
    ) -> EmergencyDispatchRequest {
        let mut request = self.open_request(requester_id, raw_message, location_hint).await;
        self.transition(&mut request, DispatchState::ManualEscalation).await;
        tracing::warn!(
            "🚨 Emergency sender {requester_id} is unknown ({}), manual dispatch required",
            request.id
        );
        request
    }

    async fn open_request(
        &self,
        requester_id: &str,
        raw_message: &str,
        location_hint: Option<&str>,
    ) -> EmergencyDispatchRequest {
        let now = self.clock.now();
        let request = EmergencyDispatchRequest {
            id: uuid::Uuid::new_v4().to_string(),
            requester_id: requester_id.to_string(),
            raw_message: raw_message.to_string(),
            location_hint: location_hint.map(str::to_string),
            candidates: Vec::new(),
            selected: None,
            eta_minutes: None,
            state: DispatchState::Detected,
            created_at: now,
            updated_at: now,
        };
        tracing::warn!("🚨 Emergency detected for {requester_id} ({})", request.id);
        self.persist(&request).await;
        request
    }

    async fn dispatch(&self, request: &mut EmergencyDispatchRequest, requester: &Recipient, pro: ProCandidate) {
        let eta = self.config.eta_minutes;
        request.selected = Some(pro.clone());
        request.eta_minutes = Some(eta);
        self.transition(request, DispatchState::Dispatched).await;
        tracing::info!("🚑 Emergency {} dispatched to {} (ETA {eta} min)", request.id, pro.name);

        let location = request
            .location_hint
            .as_deref()
            .map(|l| format!(" at {l}"))
            .unwrap_or_default();
        let (_, pro_body) = Fields::new()
            .with("customer", requester.greeting_name())
            .with("excerpt", excerpt(&request.raw_message, self.config.excerpt_chars))
            .with("location", location)
            .with("eta_minutes", eta)
            .render(templates::EMERGENCY_PRO);
        if let Some(phone) = pro.phone.as_deref() {
            let outcome = self.outbox.dispatcher().sms(phone, &pro_body).await;
            if !outcome.is_sent() {
                tracing::warn!("⚠️ Emergency job text to pro {} failed: {outcome:?}", pro.id);
            }
        }

        let (subject, body) = Fields::new()
            .with("name", requester.greeting_name())
            .with("pro_name", &pro.name)
            .with("eta_minutes", eta)
            .render(templates::EMERGENCY_CUSTOMER);
        self.outbox
            .send(
                requester,
                Urgency::Emergency,
                &OutboundMessage::new(Category::EmergencyDispatch, subject, body),
            )
            .await;
    }

    async fn escalate(&self, request: &mut EmergencyDispatchRequest, requester: &Recipient) {
        self.transition(request, DispatchState::ManualEscalation).await;
        tracing::warn!(
            "🚨 No emergency pro available for {} ({}), manual dispatch required",
            requester.id,
            request.id
        );
        let (subject, body) = Fields::new()
            .with("name", requester.greeting_name())
            .render(templates::EMERGENCY_HOLDING);
        self.outbox
            .send(
                requester,
                Urgency::Emergency,
                &OutboundMessage::new(Category::EmergencyHolding, subject, body),
            )
            .await;
    }

    async fn transition(&self, request: &mut EmergencyDispatchRequest, state: DispatchState) {
        request.state = state;
        request.updated_at = self.clock.now();
        self.persist(request).await;
    }

    async fn persist(&self, request: &EmergencyDispatchRequest) {
        if let Err(e) = self.log.save_request(request).await {
            tracing::warn!("⚠️ Failed to persist emergency {} ({}): {e}", request.id, request.state.as_str());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::gate::DeliveryGate;
    use crate::persistence::{OutreachDb, ProProfile};
    use crate::rate_limit::MemoryRateLimiter;
    use crate::testing::RecordingTransport;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use outreach_core::config::GateConfig;
    use outreach_core::types::RecipientRole;
    use outreach_core::{ManualClock, OutreachError};

    struct BrokenPool;

    #[async_trait]
    impl ProviderPool for BrokenPool {
        async fn emergency_candidates(&self, _limit: u32) -> outreach_core::Result<Vec<ProCandidate>> {
            Err(OutreachError::Store("pool offline".into()))
        }
    }

    fn candidate(id: &str, rating: Option<f64>, location: Option<(f64, f64)>) -> ProCandidate {
        ProCandidate {
            id: id.into(),
            name: format!("Pro {id}"),
            phone: Some(format!("+1999{id}")),
            rating,
            location: location.map(|(lat, lon)| GeoPoint { lat, lon }),
        }
    }

    fn keywords() -> Vec<String> {
        EmergencyConfig::default().keywords
    }

    fn requester() -> Recipient {
        let mut r = Recipient::customer("c1");
        r.first_name = Some("Dana".into());
        r.phone = Some("+15550100".into());
        r.location = Some(GeoPoint { lat: 47.61, lon: -122.33 });
        r
    }

    // Quiet hours at 06:00 UTC (23:00 PDT) to prove the gate is bypassed.
    fn matcher(db: Arc<OutreachDb>, pool: Arc<dyn ProviderPool>, transport: Arc<RecordingTransport>) -> EmergencyMatcher {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at(Utc.with_ymd_and_hms(2026, 6, 15, 6, 0, 0).unwrap()));
        let gate = DeliveryGate::from_config(&GateConfig::default(), Arc::new(MemoryRateLimiter::new()), clock.clone())
            .unwrap();
        let outbox = Arc::new(Outbox::new(
            Arc::new(gate),
            Arc::new(Dispatcher::new(transport, std::time::Duration::from_secs(5))),
        ));
        EmergencyMatcher::new(EmergencyConfig::default(), pool, db, outbox, clock)
    }

    fn seed_pro(db: &OutreachDb, id: &str, available: bool) {
        let mut r = Recipient::customer(id);
        r.role = RecipientRole::Pro;
        r.phone = Some(format!("+1999{id}"));
        db.upsert_recipient(&r).unwrap();
        db.upsert_pro_profile(&ProProfile {
            recipient_id: id.into(),
            display_name: format!("Pro {id}"),
            available,
            can_accept_jobs: true,
            background_cleared: true,
            rating: Some(4.8),
            certification_count: 2,
        })
        .unwrap();
    }

    #[test]
    fn test_detect_keywords() {
        let kw = keywords();
        assert_eq!(detect("HELP we have a BURST PIPE in the kitchen", &kw), Some("burst pipe"));
        assert_eq!(detect("basement is flooding!!", &kw), Some("flooding"));
        assert_eq!(detect("I smell gas smell near the stove", &kw), Some("gas smell"));
        assert_eq!(detect("can I book a cleaning for Friday?", &kw), None);
        assert_eq!(detect("", &kw), None);
    }

    #[test]
    fn test_select_nearest() {
        let origin = Some(GeoPoint { lat: 47.61, lon: -122.33 });
        let pool = vec![
            candidate("far", Some(5.0), Some((47.25, -122.44))),
            candidate("unknown", Some(5.0), None),
            candidate("near", Some(3.0), Some((47.62, -122.32))),
        ];
        assert_eq!(select(&pool, origin, TieBreak::Nearest).unwrap().id, "near");
        // without a requester location, the first candidate
        assert_eq!(select(&pool, None, TieBreak::Nearest).unwrap().id, "far");
    }

    #[test]
    fn test_select_highest_rated() {
        let pool = vec![
            candidate("a", Some(4.5), None),
            candidate("b", None, None),
            candidate("c", Some(4.9), None),
            candidate("d", Some(4.9), None),
        ];
        assert_eq!(select(&pool, None, TieBreak::HighestRated).unwrap().id, "c");
    }

    #[test]
    fn test_select_arbitrary_and_empty() {
        let pool = vec![candidate("a", None, None), candidate("b", None, None)];
        let picked = select(&pool, None, TieBreak::Arbitrary).unwrap();
        assert!(pool.contains(&picked));
        assert!(select(&[], None, TieBreak::Nearest).is_none());
        assert!(select(&[], None, TieBreak::Arbitrary).is_none());
    }

    #[tokio::test]
    async fn test_empty_pool_escalates_with_one_holding_message() {
        let db = Arc::new(OutreachDb::open_in_memory().unwrap());
        seed_pro(&db, "p1", false);
        let transport = Arc::new(RecordingTransport::new());
        let m = matcher(db.clone(), db.clone(), transport.clone());

        let request = m.handle(&requester(), "burst pipe in the basement", None).await;
        assert_eq!(request.state, DispatchState::ManualEscalation);
        assert!(request.selected.is_none());

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "+15550100");
        assert!(sent[0].body.contains("team member will call"));

        let escalations = db.manual_escalations(10).await.unwrap();
        assert_eq!(escalations.len(), 1);
        assert_eq!(escalations[0].id, request.id);
    }

    #[tokio::test]
    async fn test_search_error_collapses_to_escalation() {
        let db = Arc::new(OutreachDb::open_in_memory().unwrap());
        let transport = Arc::new(RecordingTransport::new());
        let m = matcher(db, Arc::new(BrokenPool), transport.clone());
        let request = m.handle(&requester(), "flooding", None).await;
        assert_eq!(request.state, DispatchState::ManualEscalation);
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_unresolved_sender_is_queued_for_a_human_without_messages() {
        let db = Arc::new(OutreachDb::open_in_memory().unwrap());
        seed_pro(&db, "p1", true);
        let transport = Arc::new(RecordingTransport::new());
        let m = matcher(db.clone(), db.clone(), transport.clone());

        let request = m.escalate_unresolved("ghost", "gas leak in the kitchen", Some("4 Oak Ave")).await;
        assert_eq!(request.state, DispatchState::ManualEscalation);
        assert!(request.selected.is_none());
        assert!(transport.sent().is_empty());

        let escalations = db.manual_escalations(10).await.unwrap();
        assert_eq!(escalations.len(), 1);
        assert_eq!(escalations[0].id, request.id);
        assert_eq!(escalations[0].requester_id, "ghost");
        assert_eq!(escalations[0].location_hint.as_deref(), Some("4 Oak Ave"));
    }

    #[tokio::test]
    async fn test_dispatch_notifies_pro_and_customer_once_each() {
        let db = Arc::new(OutreachDb::open_in_memory().unwrap());
        seed_pro(&db, "p1", true);
        let transport = Arc::new(RecordingTransport::new());
        let m = matcher(db.clone(), db.clone(), transport.clone());

        let long_message = format!("fallen tree on the roof {}", "x".repeat(300));
        let request = m.handle(&requester(), &long_message, Some("12 Elm St")).await;
        assert_eq!(request.state, DispatchState::Dispatched);
        assert_eq!(request.eta_minutes, Some(45));
        assert_eq!(request.selected.as_ref().unwrap().id, "p1");

        let to_pro = transport.sent_to("+1999p1");
        assert_eq!(to_pro.len(), 1);
        assert!(to_pro[0].body.contains("at 12 Elm St"));
        assert!(to_pro[0].body.contains("ETA 45 min"));
        assert!(to_pro[0].body.len() < long_message.len());

        let to_customer = transport.sent_to("+15550100");
        assert_eq!(to_customer.len(), 1);
        assert!(to_customer[0].body.contains("Pro p1"));
        assert!(to_customer[0].body.contains("45 min"));

        assert!(db.manual_escalations(10).await.unwrap().is_empty());
    }
}
