//! Poll-and-diff subscriptions
//!
//! [`ApicSubscriber`] re-queries every subscription at a fixed interval,
//! compares the result against what it saw last time and emits
//! `Updated`/`Deleted` events on a channel. The first poll reports every
//! existing object as `Updated`.

use crate::apic_trait::ApicClientTrait;
use crate::models::ApicObject;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What to watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subscription {
    /// Every object of a class
    Class(String),
    /// Objects of the given classes below a DN
    DnSubtree { dn: String, classes: Vec<String> },
}

impl Subscription {
    pub fn class(class: &str) -> Self {
        Self::Class(class.to_string())
    }

    pub fn dn_subtree(dn: &str, classes: &[&str]) -> Self {
        Self::DnSubtree {
            dn: dn.to_string(),
            classes: classes.iter().map(|c| (*c).to_string()).collect(),
        }
    }
}

/// A change seen on one subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionChange {
    Updated(ApicObject),
    Deleted(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionEvent {
    pub subscription: Subscription,
    pub change: SubscriptionChange,
}

/// Polls subscriptions and diffs the results
pub struct ApicSubscriber {
    client: Arc<dyn ApicClientTrait>,
    subscriptions: Vec<Subscription>,
    refresh: Duration,
    // per subscription: dn -> last seen object
    known: Vec<BTreeMap<String, ApicObject>>,
}

impl ApicSubscriber {
    pub fn new(client: Arc<dyn ApicClientTrait>, refresh: Duration) -> Self {
        Self {
            client,
            subscriptions: Vec::new(),
            refresh,
            known: Vec::new(),
        }
    }

    pub fn subscribe(mut self, subscription: Subscription) -> Self {
        self.subscriptions.push(subscription);
        self.known.push(BTreeMap::new());
        self
    }

    /// Query every subscription once and return the changes since the last poll.
    ///
    /// A failed query produces no events for that subscription; its previous
    /// view is kept so a transient error never looks like mass deletion.
    pub async fn poll_once(&mut self) -> Vec<SubscriptionEvent> {
        let mut events = Vec::new();
        for (idx, subscription) in self.subscriptions.iter().enumerate() {
            let result = match subscription {
                Subscription::Class(class) => self.client.query_class(class).await,
                Subscription::DnSubtree { dn, classes } => self.client.query_dn_subtree(dn, classes).await,
            };
            let objects = match result {
                Ok(objects) => objects,
                Err(e) => {
                    warn!("Subscription {:?} query failed: {}", subscription, e);
                    continue;
                }
            };

            let current: BTreeMap<String, ApicObject> = objects
                .into_iter()
                .filter(|o| !o.dn().is_empty())
                .map(|o| (o.dn().to_string(), o))
                .collect();
            let known = &mut self.known[idx];

            for (dn, obj) in &current {
                if known.get(dn) != Some(obj) {
                    events.push(SubscriptionEvent {
                        subscription: subscription.clone(),
                        change: SubscriptionChange::Updated(obj.clone()),
                    });
                }
            }
            for dn in known.keys() {
                if !current.contains_key(dn) {
                    events.push(SubscriptionEvent {
                        subscription: subscription.clone(),
                        change: SubscriptionChange::Deleted(dn.clone()),
                    });
                }
            }
            *known = current;
        }
        events
    }

    /// Poll until cancelled, forwarding events to `tx`
    pub async fn run(mut self, tx: mpsc::Sender<SubscriptionEvent>, token: CancellationToken) {
        info!(
            "Starting APIC subscriber with {} subscription(s), refresh {:?}",
            self.subscriptions.len(),
            self.refresh
        );
        let mut interval = tokio::time::interval(self.refresh);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("APIC subscriber stopping");
                    return;
                }
                _ = interval.tick() => {
                    let events = self.poll_once().await;
                    if !events.is_empty() {
                        debug!("Subscriber poll produced {} event(s)", events.len());
                    }
                    for event in events {
                        tokio::select! {
                            _ = token.cancelled() => {
                                info!("APIC subscriber stopping with undelivered events");
                                return;
                            }
                            sent = tx.send(event) => {
                                if sent.is_err() {
                                    debug!("Subscription receiver dropped");
                                    return;
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}
