//! Reassembly of JSON array documents from arbitrarily split text fragments.
//!
//! The upstream streams one top-level array whose elements are records:
//! `[{"header":…},\n{"row":…},\n…]`. The bridge forwards whatever bytes the
//! HTTP body delivered, so a fragment can start or stop anywhere. Each fragment
//! (plus whatever was left over) is patched into a standalone array and parsed;
//! if that fails the text is kept and retried with the next fragment.

use serde_json::Value;

/// Stateless reassembly step.
///
/// Returns the decoded records, if the combined text parsed, and the text to
/// carry into the next call.
pub fn reassemble(fragment: &str, pending: &str) -> (Option<Vec<Value>>, String) {
    let mut combined = String::with_capacity(pending.len() + fragment.len());
    combined.push_str(pending);
    combined.push_str(fragment);
    combined.retain(|c| c != '\r' && c != '\n');

    if combined.is_empty() {
        return (None, String::new());
    }
    let carried = combined.strip_prefix(',').unwrap_or(&combined);

    let mut candidate = String::with_capacity(carried.len() + 2);
    if !carried.starts_with('[') {
        candidate.push('[');
    }
    let closed = carried.strip_suffix(",]").or_else(|| carried.strip_suffix(','));
    match closed {
        Some(body) => {
            candidate.push_str(body);
            candidate.push(']');
        }
        None => {
            candidate.push_str(carried);
            if !carried.ends_with(']') {
                candidate.push(']');
            }
        }
    }

    match serde_json::from_str::<Vec<Value>>(&candidate) {
        Ok(records) => (Some(records), String::new()),
        Err(_) => (None, carried.to_string()),
    }
}

/// Carries the unparsed tail of the stream between fragments.
#[derive(Debug, Default)]
pub struct ChunkReassembler {
    pending: String,
}

impl ChunkReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment. Returns a decoded document once the accumulated
    /// text forms one.
    pub fn feed(&mut self, fragment: &str) -> Option<Vec<Value>> {
        if fragment.chars().all(|c| c == '\r' || c == '\n') {
            return None;
        }
        let (records, pending) = reassemble(fragment, &self.pending);
        if records.is_none() {
            tracing::debug!(pending_bytes = pending.len(), "retaining partial chunk");
        }
        self.pending = pending;
        records
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn whole_array_in_one_fragment() {
        let mut r = ChunkReassembler::new();
        let doc = r.feed(r#"[{"a":1},{"b":2}]"#).unwrap();
        assert_eq!(doc, vec![json!({"a": 1}), json!({"b": 2})]);
        assert!(r.pending().is_empty());
    }

    #[test]
    fn streamed_elements_with_line_breaks() {
        let mut r = ChunkReassembler::new();
        let first = r.feed("[{\"header\":{\"schema\":\"`A` INT\"}},\r\n").unwrap();
        assert_eq!(first.len(), 1);
        let second = r.feed("{\"row\":{\"columns\":[1]}},\n").unwrap();
        assert_eq!(second, vec![json!({"row": {"columns": [1]}})]);
        let last = r.feed("]").unwrap();
        assert!(last.is_empty());
    }

    #[test]
    fn trailing_delimiter_before_close_is_dropped() {
        let mut r = ChunkReassembler::new();
        let doc = r.feed("[{\"a\":1},\n{\"b\":2},\n]\n").unwrap();
        assert_eq!(doc, vec![json!({"a": 1}), json!({"b": 2})]);
    }

    #[test]
    fn leading_delimiter_is_dropped() {
        let mut r = ChunkReassembler::new();
        let doc = r.feed(r#",{"b":2}"#).unwrap();
        assert_eq!(doc, vec![json!({"b": 2})]);
    }

    #[test]
    fn split_mid_object_is_retained_then_completed() {
        let mut r = ChunkReassembler::new();
        assert!(r.feed(r#"[{"row":{"colu"#).is_none());
        assert_eq!(r.pending(), r#"[{"row":{"colu"#);
        let doc = r.feed(r#"mns":[1,2]}}]"#).unwrap();
        assert_eq!(doc, vec![json!({"row": {"columns": [1, 2]}})]);
        assert!(r.pending().is_empty());
    }

    #[test]
    fn split_inside_string_containing_comma() {
        let mut r = ChunkReassembler::new();
        assert!(r.feed(r#"[{"name":"a,"#).is_none());
        let doc = r.feed(r#"b"}]"#).unwrap();
        assert_eq!(doc, vec![json!({"name": "a,b"})]);
    }

    #[test]
    fn empty_fragment_changes_nothing() {
        let mut r = ChunkReassembler::new();
        assert!(r.feed(r#"[{"a":"#).is_none());
        let before = r.pending().to_string();
        assert!(r.feed("").is_none());
        assert!(r.feed("\r\n").is_none());
        assert_eq!(r.pending(), before);
    }

    #[test]
    fn stateless_form_reports_carry() {
        let (doc, pending) = reassemble(r#"{"a":"#, "");
        assert!(doc.is_none());
        assert_eq!(pending, r#"{"a":"#);
        let (doc, pending) = reassemble("3}", &pending);
        assert_eq!(doc, Some(vec![json!({"a": 3})]));
        assert!(pending.is_empty());
    }

    #[test]
    fn clear_drops_pending() {
        let mut r = ChunkReassembler::new();
        assert!(r.feed("[{").is_none());
        r.clear();
        assert!(r.pending().is_empty());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn record() -> impl Strategy<Value = serde_json::Value> {
            prop_oneof![
                "[a-z ,\\[\\]{}:]{0,8}".prop_map(|name| json!({"row": {"columns": [1000, name, 20.5]}})),
                (0i64..10_000).prop_map(|t| json!({"row": {"columns": [t]}})),
                Just(json!({"header": {"schema": "`WINDOWSTART` BIGINT,`TEMP` DOUBLE"}})),
            ]
        }

        fn decode_split(text: &str, at: usize) -> Vec<serde_json::Value> {
            let mut r = ChunkReassembler::new();
            let mut out = Vec::new();
            for part in [&text[..at], &text[at..]] {
                if let Some(doc) = r.feed(part) {
                    out.extend(doc);
                }
            }
            out
        }

        proptest! {
            #[test]
            fn any_two_way_split_decodes_the_same(records in proptest::collection::vec(record(), 1..6)) {
                let text = serde_json::to_string(&records).unwrap();
                for at in 0..=text.len() {
                    if !text.is_char_boundary(at) {
                        continue;
                    }
                    prop_assert_eq!(decode_split(&text, at), records.clone(), "split at {}", at);
                }
            }
        }
    }
}
