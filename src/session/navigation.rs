use std::future::Future;

use tokio::sync::watch;
use tracing::debug;

use crate::types::RoutingDecision;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationOutcome {
    Applied(RoutingDecision),
    /// A newer navigation started before this one resolved
    Discarded,
}

/// Hands out one ticket per navigation; starting a navigation supersedes all
/// earlier tickets from the same navigator. Each client (tab, connection)
/// owns its own navigator so one user's navigation never cancels another's.
#[derive(Debug)]
pub struct Navigator {
    generation: watch::Sender<u64>,
}

impl Navigator {
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self { generation }
    }

    pub fn begin(&self, target: impl Into<String>) -> NavigationTicket {
        let mut id = 0;
        self.generation.send_modify(|current| {
            *current += 1;
            id = *current;
        });
        NavigationTicket {
            id,
            target: target.into(),
            watcher: self.generation.subscribe(),
        }
    }
}

impl Default for Navigator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct NavigationTicket {
    id: u64,
    target: String,
    watcher: watch::Receiver<u64>,
}

impl NavigationTicket {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_current(&self) -> bool {
        *self.watcher.borrow() == self.id
    }

    /// Drive `resolution` unless this navigation is superseded first. A decision
    /// that arrives after a newer navigation began is dropped.
    pub async fn run<F>(self, resolution: F) -> NavigationOutcome
    where
        F: Future<Output = RoutingDecision>,
    {
        let mut watcher = self.watcher.clone();
        let outcome = tokio::select! {
            decision = resolution => {
                if self.is_current() {
                    NavigationOutcome::Applied(decision)
                } else {
                    NavigationOutcome::Discarded
                }
            }
            _ = superseded(&mut watcher, self.id) => NavigationOutcome::Discarded,
        };

        if outcome == NavigationOutcome::Discarded {
            debug!("Navigation #{} to {} superseded", self.id, self.target);
        }
        outcome
    }
}

async fn superseded(watcher: &mut watch::Receiver<u64>, id: u64) {
    loop {
        if *watcher.borrow_and_update() != id {
            return;
        }
        if watcher.changed().await.is_err() {
            // Navigator gone; nothing can supersede us any more
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn newer_ticket_supersedes_older() {
        let navigator = Navigator::new();
        let first = navigator.begin("/seller-dashboard");
        assert!(first.is_current());

        let second = navigator.begin("/buyer-dashboard");
        assert!(!first.is_current());
        assert!(second.is_current());
        assert_eq!(second.target(), "/buyer-dashboard");
    }

    #[tokio::test]
    async fn in_flight_resolution_is_dropped_when_superseded() {
        let navigator = Navigator::new();
        let ticket = navigator.begin("/admin-dashboard");

        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            RoutingDecision::Render
        };
        let interrupt = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            navigator.begin("/login")
        };

        let (outcome, newer) = tokio::join!(ticket.run(slow), interrupt);

        assert_eq!(outcome, NavigationOutcome::Discarded);
        assert!(newer.is_current());
    }

    #[test]
    fn separate_navigators_do_not_supersede_each_other() {
        let mine = Navigator::new();
        let theirs = Navigator::new();
        let ticket = mine.begin("/buyer-dashboard");

        theirs.begin("/seller-dashboard");
        theirs.begin("/admin-dashboard");
        assert!(ticket.is_current());
    }

    #[tokio::test]
    async fn current_ticket_applies_decision() {
        let navigator = Navigator::new();
        let outcome = navigator
            .begin("/choose-role")
            .run(async { RoutingDecision::redirect("/choose-role") })
            .await;
        assert_eq!(
            outcome,
            NavigationOutcome::Applied(RoutingDecision::redirect("/choose-role"))
        );
    }
}
