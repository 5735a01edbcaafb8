//! Topic layout for one edge device.
//!
//! ```text
//! vision/{device}/command/request            out
//! vision/{device}/command/response           in
//! vision/{device}/cameras/active_list        in
//! vision/{device}/{camera}/counts/update     in
//! vision/{device}/{camera}/zones/full_data   in
//! vision/{device}/{camera}/lines/full_data   in
//! vision/{device}/{camera}/snapshot/response in
//! ```

use std::sync::OnceLock;

use crate::error::ConsoleError;

const ROOT: &str = "vision";

/// Device and camera ids are embedded in topics, so they may not contain
/// separators or wildcards.
pub fn validate_segment(id: &str) -> Result<(), ConsoleError> {
    static SEGMENT_RE: OnceLock<Option<regex::Regex>> = OnceLock::new();
    let re = SEGMENT_RE.get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9_.-]{1,64}$").ok());
    match re {
        Some(re) if re.is_match(id) => Ok(()),
        _ => Err(ConsoleError::InvalidIdentifier(id.to_string())),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundTopic {
    CommandResponse,
    Roster,
    Counts(String),
    ZonesFullSync(String),
    LinesFullSync(String),
    Snapshot(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topics {
    device_id: String,
}

impl Topics {
    pub fn new(device_id: &str) -> Result<Self, ConsoleError> {
        validate_segment(device_id)?;
        Ok(Self {
            device_id: device_id.to_string(),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn command_request(&self) -> String {
        format!("{}/{}/command/request", ROOT, self.device_id)
    }

    pub fn command_response(&self) -> String {
        format!("{}/{}/command/response", ROOT, self.device_id)
    }

    pub fn roster(&self) -> String {
        format!("{}/{}/cameras/active_list", ROOT, self.device_id)
    }

    pub fn counts(&self, camera: &str) -> String {
        self.camera_topic(camera, "counts/update")
    }

    pub fn zones_full_sync(&self, camera: &str) -> String {
        self.camera_topic(camera, "zones/full_data")
    }

    pub fn lines_full_sync(&self, camera: &str) -> String {
        self.camera_topic(camera, "lines/full_data")
    }

    pub fn snapshot_response(&self, camera: &str) -> String {
        self.camera_topic(camera, "snapshot/response")
    }

    fn camera_topic(&self, camera: &str, suffix: &str) -> String {
        format!("{}/{}/{}/{}", ROOT, self.device_id, camera, suffix)
    }

    /// Standing subscriptions. Counts and full-sync topics use a single-level
    /// wildcard; snapshot responses are subscribed per slot because sessions
    /// unsubscribe and resubscribe them individually.
    pub fn subscription_set(&self, camera_slots: &[String]) -> Vec<String> {
        let mut topics = vec![
            self.command_response(),
            self.roster(),
            self.counts("+"),
            self.zones_full_sync("+"),
            self.lines_full_sync("+"),
        ];
        topics.extend(camera_slots.iter().map(|slot| self.snapshot_response(slot)));
        topics
    }

    pub fn classify(&self, topic: &str) -> Option<InboundTopic> {
        let parts: Vec<&str> = topic.split('/').collect();
        if parts.len() < 4 || parts[0] != ROOT || parts[1] != self.device_id {
            return None;
        }
        match parts[2..] {
            ["command", "response"] => Some(InboundTopic::CommandResponse),
            ["cameras", "active_list"] => Some(InboundTopic::Roster),
            [camera, "counts", "update"] => Some(InboundTopic::Counts(camera.to_string())),
            [camera, "zones", "full_data"] => {
                Some(InboundTopic::ZonesFullSync(camera.to_string()))
            }
            [camera, "lines", "full_data"] => {
                Some(InboundTopic::LinesFullSync(camera.to_string()))
            }
            [camera, "snapshot", "response"] => Some(InboundTopic::Snapshot(camera.to_string())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_templated_topics() {
        let topics = Topics::new("edge-01").unwrap();
        assert_eq!(topics.command_request(), "vision/edge-01/command/request");
        assert_eq!(topics.counts("cam2"), "vision/edge-01/cam2/counts/update");
        assert_eq!(
            topics.snapshot_response("cam1"),
            "vision/edge-01/cam1/snapshot/response"
        );
    }

    #[test]
    fn subscription_set_covers_every_slot() {
        let topics = Topics::new("edge-01").unwrap();
        let slots = vec!["cam1".to_string(), "cam2".to_string(), "cam3".to_string()];
        let set = topics.subscription_set(&slots);
        assert_eq!(set.len(), 8);
        assert!(set.contains(&"vision/edge-01/+/counts/update".to_string()));
        for slot in &slots {
            assert!(set.contains(&topics.snapshot_response(slot)));
        }
    }

    #[test]
    fn classifies_inbound_topics() {
        let topics = Topics::new("edge-01").unwrap();
        assert_eq!(
            topics.classify("vision/edge-01/command/response"),
            Some(InboundTopic::CommandResponse)
        );
        assert_eq!(
            topics.classify("vision/edge-01/cameras/active_list"),
            Some(InboundTopic::Roster)
        );
        assert_eq!(
            topics.classify("vision/edge-01/cam4/lines/full_data"),
            Some(InboundTopic::LinesFullSync("cam4".to_string()))
        );
        assert_eq!(topics.classify("vision/edge-02/command/response"), None);
        assert_eq!(topics.classify("vision/edge-01/cam1/counts"), None);
    }

    #[test]
    fn rejects_wildcards_in_ids() {
        assert!(Topics::new("edge/01").is_err());
        assert!(validate_segment("cam+").is_err());
        assert!(validate_segment("").is_err());
        assert!(validate_segment("front_door.2").is_ok());
    }
}
