//! Streaming JSON-object splitter (spec §4.C9 "Parser").
//!
//! Grounded on the teacher's `OpenAiProvider::stream` rolling-buffer scan
//! (`crates/agents/src/providers/openai.rs`), generalized from newline-delimited
//! SSE `data:` lines to brace-depth tracking, since the upstream here elides
//! framing entirely and concatenates JSON objects directly (`}{`).
//!
//! The buffer is raw bytes, not `String` — a chunk boundary can land in the
//! middle of a multi-byte UTF-8 sequence, and re-validating partial bytes as
//! UTF-8 on every `feed()` would be both wrong and wasteful. Depth tracking
//! only ever compares against ASCII delimiter bytes (`{`, `}`, `"`, `\`),
//! which can never appear as a continuation byte of a multi-byte character,
//! so scanning raw bytes is safe regardless of where chunks are split.

#[derive(Debug, Default)]
pub struct JsonObjectSplitter {
    buffer: Vec<u8>,
}

impl JsonObjectSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of arbitrary size and return every complete JSON object
    /// it completes, in order. Partial trailing bytes remain buffered for
    /// the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<serde_json::Value> {
        self.buffer.extend_from_slice(chunk);

        let mut out = Vec::new();
        while let Some(value) = self.extract_one() {
            out.push(value);
        }
        out
    }

    fn extract_one(&mut self) -> Option<serde_json::Value> {
        let mut depth = 0i32;
        let mut in_string = false;
        let mut escape = false;
        let mut start = None;

        for (i, &b) in self.buffer.iter().enumerate() {
            // `s` is the object-start index, bound as soon as the first `{`
            // is seen and carried (not re-wrapped in `Option`) for every
            // byte after that, so there's nothing to assert once depth
            // returns to zero below.
            let s = match start {
                Some(s) => s,
                None if b == b'{' => {
                    start = Some(i);
                    i
                }
                None => continue,
            };

            if in_string {
                if escape {
                    escape = false;
                } else if b == b'\\' {
                    escape = true;
                } else if b == b'"' {
                    in_string = false;
                }
                continue;
            }

            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        let object_bytes = self.buffer[s..=i].to_vec();
                        self.buffer.drain(..=i);
                        return serde_json::from_slice(&object_bytes).ok();
                    }
                }
                _ => {}
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_objects_regardless_of_chunk_boundaries() {
        let payload =
            br#"{"event":"token","data":"A"}{"event":"token","data":"B"}{"event":"end","data":"[DONE]"}"#;
        for split_sizes in [vec![5, 3, 50, 1], vec![payload.len()], vec![1; payload.len()]] {
            let mut splitter = JsonObjectSplitter::new();
            let mut events = Vec::new();
            let mut offset = 0;
            for size in &split_sizes {
                let end = (offset + size).min(payload.len());
                events.extend(splitter.feed(&payload[offset..end]));
                offset = end;
            }
            events.extend(splitter.feed(&payload[offset..]));

            assert_eq!(events.len(), 3, "split plan {:?}", split_sizes);
            assert_eq!(events[0]["data"], "A");
            assert_eq!(events[1]["data"], "B");
            assert_eq!(events[2]["data"], "[DONE]");
        }
    }

    #[test]
    fn tolerates_whitespace_between_objects() {
        let mut splitter = JsonObjectSplitter::new();
        let events = splitter.feed(b"  {\"event\":\"start\",\"data\":null}  \n  {\"event\":\"end\",\"data\":null}");
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn handles_braces_inside_string_values() {
        let mut splitter = JsonObjectSplitter::new();
        let events = splitter.feed(br#"{"event":"token","data":"a{b}c\"}\""}"#);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["data"], "a{b}c\"}\"");
    }

    #[test]
    fn partial_object_is_not_emitted_until_complete() {
        let mut splitter = JsonObjectSplitter::new();
        assert!(splitter.feed(br#"{"event":"token","#).is_empty());
        let events = splitter.feed(br#""data":"x"}"#);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn split_across_utf8_multibyte_boundary_is_not_corrupted() {
        let payload = r#"{"event":"token","data":"héllo"}"#.as_bytes();
        // split right after the 'h' + first byte of 'é' to force a chunk
        // boundary inside the multi-byte sequence.
        let split_at = payload.iter().position(|&b| b == b'h').unwrap() + 2;
        let mut splitter = JsonObjectSplitter::new();
        let mut events = splitter.feed(&payload[..split_at]);
        events.extend(splitter.feed(&payload[split_at..]));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["data"], "héllo");
    }
}
