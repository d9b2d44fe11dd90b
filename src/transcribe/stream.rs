use serde_json::Value;

const DATA_PREFIX: &str = "data:";
const DONE_MARKER: &str = "[DONE]";

/// One meaningful line of a server-sent event stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// Incremental text
    Delta(String),
    /// Termination sentinel
    Done,
}

/// Incremental decoder for `data: {json}` streams.
///
/// Works on bytes so that a multi-byte character split across two reads is
/// decoded only once its line is complete.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network read, returning frames for every completed line
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            if let Some(frame) = parse_line(&String::from_utf8_lossy(&line)) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush a final line that was not newline-terminated
    pub fn finish(&mut self) -> Vec<SseFrame> {
        if self.pending.is_empty() {
            return Vec::new();
        }
        let line = std::mem::take(&mut self.pending);
        parse_line(&String::from_utf8_lossy(&line)).into_iter().collect()
    }
}

fn parse_line(line: &str) -> Option<SseFrame> {
    let line = line.trim_end_matches(['\n', '\r']);
    let payload = line.strip_prefix(DATA_PREFIX)?.trim_start();

    if payload == DONE_MARKER {
        return Some(SseFrame::Done);
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(event) => extract_delta(&event).map(SseFrame::Delta),
        Err(e) => {
            tracing::debug!("Skipping malformed stream payload: {}", e);
            None
        }
    }
}

/// Text delta of a chat completion chunk.
///
/// `content` is either a string or a list of `{ "text": ... }` parts.
fn extract_delta(event: &Value) -> Option<String> {
    if let Some(error) = event.get("error") {
        tracing::warn!("Transcription stream reported an error: {}", error);
        return None;
    }

    let content = event.pointer("/choices/0/delta/content")?;
    let text = match content {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect(),
        _ => return None,
    };

    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(text: &str) -> String {
        format!(
            "data: {}\n",
            serde_json::json!({ "choices": [ { "delta": { "content": text } } ] })
        )
    }

    #[test]
    fn test_lines_split_across_reads() {
        let stream = format!("{}{}data: [DONE]\n", delta("hello"), delta(" world"));
        let bytes = stream.as_bytes();

        let mut decoder = SseDecoder::new();
        let mut frames = Vec::new();
        for piece in bytes.chunks(7) {
            frames.extend(decoder.push(piece));
        }

        assert_eq!(
            frames,
            vec![
                SseFrame::Delta("hello".to_string()),
                SseFrame::Delta(" world".to_string()),
                SseFrame::Done,
            ]
        );
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_multibyte_character_split_across_reads() {
        let stream = delta("你好");
        let bytes = stream.as_bytes();
        let split = stream.find('你').unwrap() + 1;

        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&bytes[..split]).is_empty());
        assert_eq!(decoder.push(&bytes[split..]), vec![SseFrame::Delta("你好".to_string())]);
    }

    #[test]
    fn test_ignores_comments_roles_and_garbage() {
        let mut decoder = SseDecoder::new();
        let input = concat!(
            ": keep-alive\n",
            "\n",
            "event: message\n",
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n",
            "data: not json\n",
            "data: {\"error\":{\"message\":\"overloaded\"}}\n",
            "data:{\"choices\":[{\"delta\":{\"content\":[{\"text\":\"a\"},{\"text\":\"b\"}]}}]}\r\n",
        );

        assert_eq!(decoder.push(input.as_bytes()), vec![SseFrame::Delta("ab".to_string())]);
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut decoder = SseDecoder::new();
        let line = delta("tail");
        let unterminated = line.trim_end();

        assert!(decoder.push(unterminated.as_bytes()).is_empty());
        assert_eq!(decoder.finish(), vec![SseFrame::Delta("tail".to_string())]);
    }
}
