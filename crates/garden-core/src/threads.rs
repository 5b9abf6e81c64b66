use crate::conversation::Message;
use crate::IntelligenceError;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThreadView {
    pub anchor: Message,
    /// Root first, ending with the anchor's immediate parent.
    pub ancestors: Vec<Message>,
    /// Pre-order below the anchor, bounded by `max_depth`.
    pub descendants: Vec<Message>,
}

struct ThreadIndex<'a> {
    by_id: HashMap<&'a str, &'a Message>,
    children: HashMap<Option<&'a str>, Vec<&'a Message>>,
}

impl<'a> ThreadIndex<'a> {
    fn new(messages: &'a [Message]) -> Self {
        // Duplicate ids: the first occurrence wins, both content and position.
        let mut by_id: HashMap<&str, &Message> = HashMap::with_capacity(messages.len());
        let mut unique = Vec::with_capacity(messages.len());
        for message in messages {
            if let Entry::Vacant(slot) = by_id.entry(message.msg_id.as_str()) {
                slot.insert(message);
                unique.push(message);
            }
        }

        let mut children: HashMap<Option<&str>, Vec<&Message>> = HashMap::new();
        for message in unique {
            children
                .entry(message.parent_id.as_deref())
                .or_default()
                .push(message);
        }
        // Stable sort: equal timestamps keep the supplied order.
        for siblings in children.values_mut() {
            siblings.sort_by(|left, right| left.ts.cmp(&right.ts));
        }

        Self { by_id, children }
    }

    fn ancestors(&self, anchor: &'a Message) -> Vec<Message> {
        let mut visited = HashSet::from([anchor.msg_id.as_str()]);
        let mut chain = Vec::new();
        let mut current = anchor.parent_id.as_deref();

        while let Some(parent_id) = current {
            // A missing parent truncates the chain; a revisited one is a cycle.
            let Some(parent) = self.by_id.get(parent_id) else {
                break;
            };
            if !visited.insert(parent.msg_id.as_str()) {
                break;
            }
            chain.push((*parent).clone());
            current = parent.parent_id.as_deref();
        }

        chain.reverse();
        chain
    }

    fn descendants(&self, anchor: &'a Message, max_depth: usize) -> Vec<Message> {
        let mut emitted = HashSet::from([anchor.msg_id.as_str()]);
        let mut out = Vec::new();
        self.gather(anchor.msg_id.as_str(), 0, max_depth, &mut emitted, &mut out);
        out
    }

    fn gather(
        &self,
        node_id: &'a str,
        depth: usize,
        max_depth: usize,
        emitted: &mut HashSet<&'a str>,
        out: &mut Vec<Message>,
    ) {
        if depth >= max_depth {
            return;
        }
        let Some(children) = self.children.get(&Some(node_id)) else {
            return;
        };
        for child in children {
            if !emitted.insert(child.msg_id.as_str()) {
                continue;
            }
            out.push((*child).clone());
            self.gather(child.msg_id.as_str(), depth + 1, max_depth, emitted, out);
        }
    }
}

/// Reconstructs the thread around `anchor_id` from one conversation's
/// messages.
///
/// `max_depth` counts levels below the anchor (the anchor is depth 0); a node
/// deeper than `max_depth` is excluded along with its subtree. Parents that
/// are not in `messages` end the ancestor chain without error, and each
/// message appears at most once even if the parent pointers form a cycle.
pub fn build_thread(
    messages: &[Message],
    anchor_id: &str,
    max_depth: usize,
) -> Result<ThreadView, IntelligenceError> {
    let index = ThreadIndex::new(messages);
    let anchor = *index
        .by_id
        .get(anchor_id)
        .ok_or_else(|| IntelligenceError::NotFound {
            msg_id: anchor_id.to_string(),
        })?;

    Ok(ThreadView {
        anchor: anchor.clone(),
        ancestors: index.ancestors(anchor),
        descendants: index.descendants(anchor, max_depth),
    })
}
