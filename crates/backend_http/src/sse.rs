use backend_api::PushEvent;
use tracing::debug;

/// Incremental parser for the push-subscription SSE stream.
///
/// Frames are `data:` payloads separated by blank lines. Payloads that do
/// not match the push wire contract are dropped rather than surfaced; a
/// malformed frame must never tear down the subscription.
#[derive(Debug, Default)]
pub struct SseStreamParser {
    buffer: String,
}

impl SseStreamParser {
    /// Feed arbitrary bytes into the parser and drain complete events.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<PushEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
        let mut events = Vec::new();

        while let Some(split) = self.buffer.find("\n\n") {
            let frame = self.buffer[..split].to_string();
            self.buffer.drain(0..split + 2);

            if let Some(payload) = extract_data_payload(&frame) {
                if payload == "[DONE]" || payload.is_empty() {
                    continue;
                }

                match serde_json::from_str::<PushEvent>(&payload) {
                    Ok(event) => events.push(event),
                    Err(error) => {
                        debug!(%error, "dropping unrecognized push frame");
                    }
                }
            }
        }

        events
    }

    /// Parse a complete SSE payload string in one shot.
    pub fn parse_frames(input: &str) -> Vec<PushEvent> {
        let mut parser = Self::default();
        parser.feed(input.as_bytes())
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.trim().is_empty()
    }
}

fn extract_data_payload(frame: &str) -> Option<String> {
    let data_lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .collect();

    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use backend_api::PushEvent;

    use super::SseStreamParser;

    #[test]
    fn parse_push_frames_incrementally() {
        let mut parser = SseStreamParser::default();
        let mut events = Vec::new();

        let frame = concat!(
            "data: {\"type\":\"notification\",",
            "\"payload\":{\"text\":\"scheduler picked up a task\"}}\n\n",
        );
        events.extend(parser.feed(frame.as_bytes()));
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], PushEvent::Notification(_)));

        events.extend(parser.feed(b"data: [DONE]\n\n"));
        assert_eq!(events.len(), 1);
        assert!(parser.is_empty_buffer());
    }

    #[test]
    fn frame_split_across_chunks_is_reassembled() {
        let mut parser = SseStreamParser::default();

        let empty = parser.feed(b"data: {\"type\":\"notification\",");
        assert!(empty.is_empty());

        let events = parser.feed(b"\"payload\":{\"text\":\"hi\"}}\n\n");
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn malformed_frames_are_dropped_without_stalling() {
        let frames = concat!(
            "data: {not json}\n\n",
            "data: {\"type\":\"notification\",\"payload\":{\"text\":\"ok\"}}\n\n",
        );
        let events = SseStreamParser::parse_frames(frames);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn status_snapshot_frames_carry_full_tables() {
        let frame = concat!(
            "data: {\"type\":\"agent_status\",\"payload\":{",
            "\"agents\":[{\"agentId\":\"triage\",\"status\":\"active\"}],",
            "\"activeAgents\":1,\"totalAgents\":1,\"systemStatus\":\"operational\"}}\n\n",
        );
        let events = SseStreamParser::parse_frames(frame);

        match &events[..] {
            [PushEvent::AgentStatus(snapshot)] => {
                assert_eq!(snapshot.agents.len(), 1);
                assert_eq!(snapshot.agents[0].agent_id, "triage");
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }
}
