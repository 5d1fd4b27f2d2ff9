//! VOEvent 2.0 handling
//!
//! Validation, field extraction, and classification of raw notice payloads.
//! Everything here is synchronous and side-effect free.

pub mod notice_type;
pub mod parser;
pub mod tags;
pub mod validator;

pub use notice_type::NoticeType;
pub use parser::{parse, ParsedNotice};
pub use tags::classify;
pub use validator::{validate, VOEVENT_NAMESPACE};

use roxmltree::{Document, Node};

/// A notice that passed structural validation
///
/// Borrows the payload it was parsed from.
pub struct VoEvent<'input> {
    doc: Document<'input>,
}

impl<'input> VoEvent<'input> {
    pub(crate) fn new(doc: Document<'input>) -> Self {
        Self { doc }
    }

    /// The `VOEvent` root element
    pub fn root(&self) -> Node<'_, 'input> {
        self.doc.root_element()
    }

    /// `ivorn` attribute of the root element
    pub fn ivorn(&self) -> Option<&str> {
        self.root().attribute("ivorn")
    }

    /// `role` attribute of the root element
    pub fn role(&self) -> Option<&str> {
        self.root().attribute("role")
    }

    /// Follow a chain of unqualified child element names from the root
    pub fn path(&self, segments: &[&str]) -> Option<Node<'_, 'input>> {
        let mut node = self.root();
        for segment in segments {
            node = child_element(node, segment)?;
        }
        Some(node)
    }

    /// Trimmed, non-empty text of the element at `segments`
    pub fn text_at(&self, segments: &[&str]) -> Option<&str> {
        self.path(segments)
            .and_then(|n| n.text())
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// First `Param` anywhere in the document with the given `name`
    pub fn param(&self, name: &str) -> Option<Node<'_, 'input>> {
        self.root()
            .descendants()
            .find(|n| is_named(*n, "Param") && n.attribute("name") == Some(name))
    }

    /// `value` attribute of the first `Param` named `name`
    pub fn param_value(&self, name: &str) -> Option<&str> {
        self.param(name)
            .and_then(|n| n.attribute("value"))
            .map(str::trim)
    }

    /// `value` attribute of a `Param` directly under `What`
    pub fn what_param_value(&self, name: &str) -> Option<&str> {
        let what = self.path(&["What"])?;
        what.children()
            .find(|n| is_named(*n, "Param") && n.attribute("name") == Some(name))
            .and_then(|n| n.attribute("value"))
            .map(str::trim)
    }

    /// First `Group` anywhere in the document with the given `type`
    pub fn group(&self, group_type: &str) -> Option<Node<'_, 'input>> {
        self.root()
            .descendants()
            .find(|n| is_named(*n, "Group") && n.attribute("type") == Some(group_type))
    }

    /// All `Group` elements with the given `type`
    pub fn groups<'a>(&'a self, group_type: &'a str) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
        self.root()
            .descendants()
            .filter(move |n| is_named(*n, "Group") && n.attribute("type") == Some(group_type))
    }
}

/// Element with an unqualified local name
pub(crate) fn is_named(node: Node<'_, '_>, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

/// First child element with the given local name
pub(crate) fn child_element<'a, 'input>(
    node: Node<'a, 'input>,
    name: &str,
) -> Option<Node<'a, 'input>> {
    node.children().find(|n| is_named(*n, name))
}

/// `Param` child of `node` with the given `name`
pub fn child_param<'a, 'input>(
    node: Node<'a, 'input>,
    name: &str,
) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| is_named(*n, "Param") && n.attribute("name") == Some(name))
}
