//! Command channel: publishes command envelopes and correlates responses.
//!
//! Responses arrive on one shared topic without a request id, so the channel
//! keeps at most one pending entry per [`CommandScope`] and matches a response
//! to the oldest pending entry with the same command name (and camera, when
//! the response names one). Entries that never get a response expire after
//! the response window; delete/reset commands often have no completion
//! message at all.

use std::time::{Duration, Instant};

use crate::command::{Command, CommandKind, CommandResponse, CommandScope};
use crate::error::ConsoleError;
use crate::transport::{BrokerLink, Topics};

/// Broker-side receipt of a publish. Says nothing about remote execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ack {
    pub command: CommandKind,
    pub topic: String,
    pub issued_at: Instant,
}

#[derive(Clone, Debug)]
pub struct PendingCommand {
    pub scope: CommandScope,
    pub issued_at: Instant,
}

/// A parsed response plus whether it matched a pending request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandOutcome {
    pub response: CommandResponse,
    pub scope: Option<CommandScope>,
}

pub struct CommandChannel {
    link: Box<dyn BrokerLink>,
    topics: Topics,
    pending: Vec<PendingCommand>,
    response_window: Duration,
}

impl CommandChannel {
    pub fn new(link: Box<dyn BrokerLink>, topics: Topics, response_window: Duration) -> Self {
        Self {
            link,
            topics,
            pending: Vec::new(),
            response_window,
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn send(&mut self, command: &Command, now: Instant) -> Result<Ack, ConsoleError> {
        self.expire(now);
        let scope = command.scope();
        if self.is_pending(&scope) {
            return Err(ConsoleError::CommandInFlight {
                scope: scope.to_string(),
            });
        }

        let kind = command.kind();
        let payload = command
            .to_json()
            .map_err(|e| ConsoleError::transport(kind.as_str(), e))?;
        let topic = self.topics.command_request();
        self.link
            .publish(&topic, payload)
            .map_err(|e| ConsoleError::transport(kind.as_str(), e))?;

        log::info!("sent {} to {}", scope, topic);
        self.pending.push(PendingCommand {
            scope,
            issued_at: now,
        });
        Ok(Ack {
            command: kind,
            topic,
            issued_at: now,
        })
    }

    pub fn subscribe(&mut self, topic: &str) -> Result<(), ConsoleError> {
        self.link
            .subscribe(topic)
            .map_err(|e| ConsoleError::transport(format!("subscribe {}", topic), e))
    }

    pub fn unsubscribe(&mut self, topic: &str) -> Result<(), ConsoleError> {
        self.link
            .unsubscribe(topic)
            .map_err(|e| ConsoleError::transport(format!("unsubscribe {}", topic), e))
    }

    /// Broker subscriptions do not survive a reconnect; rebuild all of them.
    /// Keeps going past individual failures and reports the first one.
    pub fn resubscribe_all(&mut self, camera_slots: &[String]) -> Result<usize, ConsoleError> {
        let mut first_err = None;
        let mut count = 0;
        for topic in self.topics.subscription_set(camera_slots) {
            match self.subscribe(&topic) {
                Ok(()) => count += 1,
                Err(e) => {
                    log::warn!("{}", e);
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(count),
        }
    }

    pub fn is_pending(&self, scope: &CommandScope) -> bool {
        self.pending.iter().any(|p| &p.scope == scope)
    }

    pub fn pending(&self) -> &[PendingCommand] {
        &self.pending
    }

    /// Drop a pending scope without a response (snapshot resolved, timed out).
    pub fn release(&mut self, scope: &CommandScope) {
        self.pending.retain(|p| &p.scope != scope);
    }

    pub fn expire(&mut self, now: Instant) {
        let window = self.response_window;
        self.pending.retain(|p| {
            let alive = now.saturating_duration_since(p.issued_at) < window;
            if !alive {
                log::debug!("no response for {} within {:?}", p.scope, window);
            }
            alive
        });
    }

    pub fn resolve_response(&mut self, payload: &[u8]) -> anyhow::Result<CommandOutcome> {
        let response = CommandResponse::parse(payload)?;
        let index = response.kind.and_then(|kind| {
            self.pending
                .iter()
                .enumerate()
                .filter(|(_, p)| p.scope.kind == kind)
                .filter(|(_, p)| match (&response.camera_id, &p.scope.camera_id) {
                    (Some(resp_cam), Some(cam)) => resp_cam == cam,
                    _ => true,
                })
                .min_by_key(|(_, p)| p.issued_at)
                .map(|(i, _)| i)
        });
        let scope = index.map(|i| self.pending.remove(i).scope);
        if scope.is_none() {
            log::debug!("uncorrelated response for {}", response.command);
        }
        Ok(CommandOutcome { response, scope })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ResponseStatus;
    use crate::transport::InMemoryLink;

    fn channel() -> (CommandChannel, InMemoryLink) {
        let link = InMemoryLink::new();
        let topics = Topics::new("edge-01").unwrap();
        let channel = CommandChannel::new(Box::new(link.clone()), topics, Duration::from_secs(30));
        (channel, link)
    }

    fn delete_zone(zone: u8) -> Command {
        Command::DeleteZone {
            camera_id: "cam1".to_string(),
            zone,
        }
    }

    #[test]
    fn publishes_envelope_on_request_topic() {
        let (mut channel, link) = channel();
        let ack = channel.send(&delete_zone(1), Instant::now()).unwrap();
        assert_eq!(ack.command, CommandKind::DeleteZone);
        let sent = link.published_to("vision/edge-01/command/request");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["command"], "delete_zone");
        assert_eq!(sent[0]["payload"]["zone"], 1);
    }

    #[test]
    fn same_scope_is_single_flight_until_response() {
        let (mut channel, link) = channel();
        let now = Instant::now();
        channel.send(&delete_zone(1), now).unwrap();
        let err = channel.send(&delete_zone(1), now).unwrap_err();
        assert!(matches!(err, ConsoleError::CommandInFlight { .. }));
        channel.send(&delete_zone(2), now).unwrap();
        assert_eq!(link.log().published.len(), 2);

        let outcome = channel
            .resolve_response(br#"{"command":"delete_zone","status":"success","camera_id":"cam1"}"#)
            .unwrap();
        assert_eq!(outcome.response.status, ResponseStatus::Success);
        assert_eq!(outcome.scope, Some(delete_zone(1).scope()));
        channel.send(&delete_zone(1), now).unwrap();
    }

    #[test]
    fn pending_entries_expire() {
        let (mut channel, _link) = channel();
        let now = Instant::now();
        channel.send(&delete_zone(1), now).unwrap();
        assert!(channel
            .send(&delete_zone(1), now + Duration::from_secs(31))
            .is_ok());
    }

    #[test]
    fn failed_publish_leaves_nothing_pending() {
        let (mut channel, link) = channel();
        link.fail_publishes(1);
        let err = channel.send(&delete_zone(1), Instant::now()).unwrap_err();
        assert_eq!(err.to_string(), "delete_zone failed: broker unavailable");
        assert!(channel.pending().is_empty());
    }

    #[test]
    fn resubscribe_covers_full_set() {
        let (mut channel, link) = channel();
        let slots = vec!["cam1".to_string(), "cam2".to_string()];
        assert_eq!(channel.resubscribe_all(&slots).unwrap(), 7);
        let active = link.log().active_subscriptions();
        assert!(active.contains(&"vision/edge-01/cam2/snapshot/response".to_string()));
        assert!(active.contains(&"vision/edge-01/command/response".to_string()));
    }

    #[test]
    fn uncorrelated_response_still_parses() {
        let (mut channel, _link) = channel();
        let outcome = channel
            .resolve_response(br#"{"command":"set_line","status":"error","message":"bad"}"#)
            .unwrap();
        assert_eq!(outcome.scope, None);
        assert_eq!(outcome.response.status, ResponseStatus::Error);
    }
}
