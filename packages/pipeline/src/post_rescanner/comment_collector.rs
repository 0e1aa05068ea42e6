use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommentKind {
    Raw,
    More,
    Continue,
}

/// Stack-based traversal over a post-comments API response, ported
/// from `lib.util.comment_collector.CommentIterator`.
///
/// The response carries three maps keyed by comment id — `comments`
/// (actual comment bodies), `moreComments` (a "show more" stub) and
/// `continueThreads` (a "continue this thread" stub). Each comment may
/// carry a `next.id` pointing into any of the three maps; walking
/// `next` links depth-first (via an explicit stack, not recursion)
/// reaches every comment reachable from the first one found.
///
/// If a `next.id` doesn't resolve to any known comment, traversal
/// simply stops there rather than erroring — the original's lookup
/// silently returned nothing in this case too, so a malformed or
/// truncated API response degrades to "fewer comments found", not a
/// failed rescan.
pub struct CommentCollector {
    sections: [(CommentKind, Map<String, Value>); 3],
    stack: Vec<(CommentKind, Value)>,
}

impl CommentCollector {
    pub fn new(api_response: &Value) -> Self {
        let raw = extract_section(api_response, "comments");
        let more = extract_section(api_response, "moreComments");
        let cont = extract_section(api_response, "continueThreads");

        let sections = [
            (CommentKind::Raw, raw),
            (CommentKind::More, more),
            (CommentKind::Continue, cont),
        ];

        let stack = first_comment(&sections).into_iter().collect();

        Self { sections, stack }
    }

    pub fn collect_comments(mut self) -> (Vec<Value>, Vec<Value>, Vec<Value>) {
        let mut raw_comments = Vec::new();
        let mut more_comments = Vec::new();
        let mut continue_threads = Vec::new();

        while let Some((kind, comment)) = self.advance() {
            match kind {
                CommentKind::Raw => raw_comments.push(comment),
                CommentKind::More => more_comments.push(comment),
                CommentKind::Continue => continue_threads.push(comment),
            }
        }

        (raw_comments, more_comments, continue_threads)
    }

    fn advance(&mut self) -> Option<(CommentKind, Value)> {
        let (kind, comment) = self.stack.pop()?;

        if let Some(next_id) = comment
            .get("next")
            .and_then(|n| n.get("id"))
            .and_then(Value::as_str)
        {
            if let Some(next) = find_comment_by_id(&self.sections, next_id) {
                self.stack.push(next);
            }
        }

        Some((kind, comment))
    }
}

fn extract_section(api_response: &Value, key: &str) -> Map<String, Value> {
    api_response
        .get(key)
        .and_then(Value::as_object)
        .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

fn first_comment(
    sections: &[(CommentKind, Map<String, Value>); 3],
) -> Option<(CommentKind, Value)> {
    for (kind, comments) in sections {
        if let Some((_, first)) = comments.iter().next() {
            return Some((*kind, first.clone()));
        }
    }
    None
}

fn find_comment_by_id(
    sections: &[(CommentKind, Map<String, Value>); 3],
    id: &str,
) -> Option<(CommentKind, Value)> {
    for (kind, comments) in sections {
        if let Some(comment) = comments.get(id) {
            return Some((*kind, comment.clone()));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collects_raw_comments_with_no_nesting() {
        let response = json!({
            "comments": {
                "c1": {"id": "c1", "parentId": null}
            },
            "moreComments": {},
            "continueThreads": {}
        });

        let (raw, more, cont) = CommentCollector::new(&response).collect_comments();
        assert_eq!(raw.len(), 1);
        assert!(more.is_empty());
        assert!(cont.is_empty());
    }

    #[test]
    fn follows_next_link_across_sections() {
        let response = json!({
            "comments": {
                "c1": {"id": "c1", "next": {"id": "m1"}}
            },
            "moreComments": {
                "m1": {"id": "m1", "postId": "p1", "token": "tok"}
            },
            "continueThreads": {}
        });

        let (raw, more, cont) = CommentCollector::new(&response).collect_comments();
        assert_eq!(raw.len(), 1);
        assert_eq!(more.len(), 1);
        assert!(cont.is_empty());
    }

    #[test]
    fn unresolvable_next_id_terminates_traversal_silently() {
        let response = json!({
            "comments": {
                "c1": {"id": "c1", "next": {"id": "does-not-exist"}}
            },
            "moreComments": {},
            "continueThreads": {}
        });

        let (raw, more, cont) = CommentCollector::new(&response).collect_comments();
        assert_eq!(raw.len(), 1);
        assert!(more.is_empty());
        assert!(cont.is_empty());
    }

    #[test]
    fn empty_response_yields_no_comments() {
        let response = json!({"comments": {}, "moreComments": {}, "continueThreads": {}});
        let (raw, more, cont) = CommentCollector::new(&response).collect_comments();
        assert!(raw.is_empty() && more.is_empty() && cont.is_empty());
    }

    #[test]
    fn seeds_stack_from_first_inserted_comment_not_alphabetically_first() {
        // "z1" is inserted before "a1"; the seed must be "z1", since the
        // original walks insertion order, not key order.
        let response = json!({
            "comments": {
                "z1": {"id": "z1"},
                "a1": {"id": "a1"}
            },
            "moreComments": {},
            "continueThreads": {}
        });

        let (raw, _, _) = CommentCollector::new(&response).collect_comments();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0]["id"], "z1");
    }
}
