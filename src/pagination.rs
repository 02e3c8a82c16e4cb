//! Resumable nested pagination
//!
//! A sync pass over datasets has to range over every project and, within
//! each project, every page of datasets. The orchestrator only ever hands
//! back a single opaque string, so all of that position is folded into a
//! [`Bag`]: a stack of page frames serialized to JSON. The bottom frame
//! tracks the project search cursor; a frame above it tracks the dataset
//! cursor within one project. Popping the bag empty means the whole
//! enumeration is exhausted.
//!
//! The bag stores cursors verbatim and never interprets them.

use crate::sync::ResourceKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One level of a nested enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageFrame {
    /// Which resource kind this frame enumerates
    pub kind: ResourceKind,
    /// Parent resource the enumeration is scoped to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// Opaque remote cursor for the current page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

impl PageFrame {
    /// Frame for an unscoped enumeration starting at the first page
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            resource_id: None,
            cursor: None,
        }
    }

    /// Frame scoped under a parent resource
    pub fn scoped(kind: ResourceKind, resource_id: impl Into<String>) -> Self {
        Self {
            kind,
            resource_id: Some(resource_id.into()),
            cursor: None,
        }
    }
}

/// Stack of page frames behind one opaque page token
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bag {
    frames: Vec<PageFrame>,
}

impl Bag {
    /// Decode a caller-supplied page token. The empty token is the empty bag.
    pub fn unmarshal(token: &str) -> Result<Self> {
        if token.is_empty() {
            return Ok(Self::default());
        }

        let frames: Vec<PageFrame> =
            serde_json::from_str(token).context("malformed page token")?;
        Ok(Self { frames })
    }

    /// Encode the bag back into an opaque token. The empty bag encodes to
    /// the empty string, which tells the orchestrator the crawl is done.
    pub fn marshal(&self) -> Result<String> {
        if self.frames.is_empty() {
            return Ok(String::new());
        }

        serde_json::to_string(&self.frames).context("failed to encode page token")
    }

    pub fn push(&mut self, frame: PageFrame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<PageFrame> {
        self.frames.pop()
    }

    /// The frame currently being enumerated (top of the stack)
    pub fn current(&self) -> Option<&PageFrame> {
        self.frames.last()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Remote cursor for the current frame, `""` on the first page
    pub fn page_token(&self) -> &str {
        self.current()
            .and_then(|f| f.cursor.as_deref())
            .unwrap_or("")
    }

    /// Advance the current frame to `cursor`. A `None` or empty cursor means
    /// the remote iterator is exhausted, so the frame is popped and
    /// enumeration resumes at the parent level (or terminates when the bag
    /// runs empty).
    pub fn next(&mut self, cursor: Option<String>) {
        match cursor.filter(|c| !c.is_empty()) {
            Some(cursor) => {
                if let Some(frame) = self.frames.last_mut() {
                    frame.cursor = Some(cursor);
                }
            }
            None => {
                self.frames.pop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_token_decodes_to_empty_bag() {
        let bag = Bag::unmarshal("").unwrap();
        assert!(bag.is_empty());
        assert_eq!(bag.page_token(), "");
        assert_eq!(bag.marshal().unwrap(), "");
    }

    #[test]
    fn test_malformed_token_is_an_error() {
        assert!(Bag::unmarshal("not json").is_err());
        assert!(Bag::unmarshal("{\"frames\":").is_err());
    }

    #[test]
    fn test_round_trip_preserves_stack() {
        let mut bag = Bag::default();
        bag.push(PageFrame::new(ResourceKind::Project));
        bag.next(Some("proj-page-2".to_string()));
        bag.push(PageFrame::scoped(ResourceKind::Dataset, "proj-a"));
        bag.next(Some("ds-page-3".to_string()));

        let token = bag.marshal().unwrap();
        let decoded = Bag::unmarshal(&token).unwrap();
        assert_eq!(decoded, bag);
        assert_eq!(decoded.page_token(), "ds-page-3");
        assert_eq!(
            decoded.current().unwrap().resource_id.as_deref(),
            Some("proj-a")
        );
    }

    #[test]
    fn test_exhausted_cursor_pops_to_parent() {
        let mut bag = Bag::default();
        bag.push(PageFrame::new(ResourceKind::Project));
        bag.next(Some("p2".to_string()));
        bag.push(PageFrame::scoped(ResourceKind::Dataset, "proj-a"));

        bag.next(None);
        assert_eq!(bag.current().unwrap().kind, ResourceKind::Project);
        assert_eq!(bag.page_token(), "p2");

        bag.next(Some(String::new()));
        assert!(bag.is_empty());
    }

    #[test]
    fn test_next_on_empty_bag_is_a_noop() {
        let mut bag = Bag::default();
        bag.next(Some("tok".to_string()));
        assert!(bag.is_empty());
    }
}
