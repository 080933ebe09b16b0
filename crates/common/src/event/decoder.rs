/// Incremental decoder for event-stream framing.
///
/// Bytes arrive in arbitrary chunks. Lines end with `\n` (a preceding `\r`
/// is dropped), `data:` lines accumulate and a blank line completes one
/// payload. Comments and the `event`, `id` and `retry` fields are skipped.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Vec<u8>,
    data: Vec<String>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every payload it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(idx) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=idx).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(payload) = self.line(&line) {
                out.push(payload);
            }
        }
        out
    }

    /// Bytes still waiting for a line terminator or a blank line
    pub fn has_partial(&self) -> bool {
        !self.pending.is_empty() || !self.data.is_empty()
    }

    fn line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            if self.data.is_empty() {
                return None;
            }
            let payload = self.data.join("\n");
            self.data.clear();
            return Some(payload);
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data.push(value.to_string());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_across_chunks() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"data: {\"pa").is_empty());
        assert!(decoder.push(b"th\":\"a\"}\r\n").is_empty());
        assert_eq!(decoder.push(b"\r\n"), vec!["{\"path\":\"a\"}".to_string()]);
        assert!(!decoder.has_partial());
    }

    #[test]
    fn test_multiline_and_ignored_fields() {
        let mut decoder = FrameDecoder::new();
        let out = decoder.push(b": keepalive\nevent: sync\nid: 4\nretry: 100\ndata:one\ndata: two\n\n\n");
        assert_eq!(out, vec!["one\ntwo".to_string()]);
    }

    #[test]
    fn test_several_events_in_one_chunk() {
        let mut decoder = FrameDecoder::new();
        let out = decoder.push(b"data: a\n\ndata: b\n\ndata: c");
        assert_eq!(out, vec!["a".to_string(), "b".to_string()]);
        assert!(decoder.has_partial());
    }
}
