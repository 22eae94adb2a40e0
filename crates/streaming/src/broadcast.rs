use runtime::metrics::{Counter, SharedMetrics};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::filter::{FilterPredicate, FilterSet};
use crate::protocol::{Envelope, FilterSetPayload, MessageKind};

pub const DEFAULT_SINK_CAPACITY: usize = 256;

/// What an inbound envelope did to the filter set.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundOutcome {
    /// Other channel, own echo, or a type this engine does not consume.
    Ignored,
    /// Accepted but left the filter set as it was.
    Unchanged,
    /// The filter set changed; the current view must be re-queried.
    FilterChanged,
    Invalid(String),
}

impl InboundOutcome {
    pub fn requires_requery(&self) -> bool {
        matches!(self, InboundOutcome::FilterChanged)
    }
}

/// Fan-out of envelopes to every subscribed sink, plus the inbound side of
/// the filter protocol.
///
/// Publishing never waits: sinks that lag behind lose the oldest envelopes
/// and a publish with no sinks is dropped.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    channel: String,
    component_id: String,
    tx: broadcast::Sender<Envelope>,
    metrics: SharedMetrics,
}

impl Broadcaster {
    pub fn new(
        channel: impl Into<String>,
        component_id: impl Into<String>,
        capacity: usize,
        metrics: SharedMetrics,
    ) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            channel: channel.into(),
            component_id: component_id.into(),
            tx,
            metrics,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn component_id(&self) -> &str {
        &self.component_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    pub fn sink_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Sends `payload` to every sink; returns how many received it.
    pub fn publish<T: Serialize>(&self, kind: MessageKind, payload: &T) -> usize {
        let payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                warn!(?kind, error = %e, "payload not serializable, dropped");
                return 0;
            }
        };
        let envelope = Envelope::new(kind, &self.channel, &self.component_id, payload);
        self.metrics.inc(Counter::EnvelopesPublished);
        match self.tx.send(envelope) {
            Ok(n) => n,
            Err(_) => {
                debug!(?kind, "no sinks subscribed");
                0
            }
        }
    }

    /// Whether `envelope` is addressed to this component.
    pub fn accepts(&self, envelope: &Envelope) -> bool {
        envelope.channel == self.channel && envelope.from_component != self.component_id
    }

    /// Records `source`'s predicate; `true` when the set changed.
    pub fn on_filter(
        &self,
        filters: &mut FilterSet,
        source: &str,
        predicate: FilterPredicate,
    ) -> Result<bool, crate::filter::FilterError> {
        let changed = filters.set(source, predicate)?;
        debug!(source, changed, "filter set");
        Ok(changed)
    }

    /// Drops `source`'s predicate; `false` when it had none.
    pub fn on_clear_filter(&self, filters: &mut FilterSet, source: &str) -> bool {
        let changed = filters.clear(source);
        debug!(source, changed, "filter cleared");
        changed
    }

    pub fn handle_inbound(&self, envelope: &Envelope, filters: &mut FilterSet) -> InboundOutcome {
        if !self.accepts(envelope) {
            self.metrics.inc(Counter::EnvelopesIgnored);
            return InboundOutcome::Ignored;
        }
        let source = envelope.from_component.as_str();
        match envelope.kind {
            MessageKind::FilterSet => {
                let predicate = match parse_predicate(&envelope.payload) {
                    Ok(p) => p,
                    Err(e) => return InboundOutcome::Invalid(e),
                };
                match self.on_filter(filters, source, predicate) {
                    Ok(true) => InboundOutcome::FilterChanged,
                    Ok(false) => InboundOutcome::Unchanged,
                    Err(e) => InboundOutcome::Invalid(e.to_string()),
                }
            }
            MessageKind::FilterClear => {
                if self.on_clear_filter(filters, source) {
                    InboundOutcome::FilterChanged
                } else {
                    InboundOutcome::Unchanged
                }
            }
            _ => {
                self.metrics.inc(Counter::EnvelopesIgnored);
                InboundOutcome::Ignored
            }
        }
    }
}

/// Accepts either `{predicate: {...}}` or the bare predicate object.
fn parse_predicate(payload: &Value) -> Result<FilterPredicate, String> {
    if payload.get("predicate").is_some() {
        serde_json::from_value::<FilterSetPayload>(payload.clone())
            .map(|p| p.predicate)
            .map_err(|e| format!("invalid filter payload: {e}"))
    } else {
        serde_json::from_value(payload.clone()).map_err(|e| format!("invalid filter payload: {e}"))
    }
}
