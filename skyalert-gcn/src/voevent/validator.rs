//! Structural validation against the VOEvent 2.0 schema
//!
//! Checks the rules of the published VOEvent 2.0 XSD that matter for
//! ingestion: namespace, required root attributes, element order and
//! multiplicity, and the allowed content of each top-level section.
//! Element names below the root are unqualified, as the schema requires.

use roxmltree::{Document, Node, ParsingOptions};

use super::{is_named, VoEvent};
use crate::error::{GcnError, GcnResult};

/// Namespace of the `VOEvent` root element
pub const VOEVENT_NAMESPACE: &str = "http://www.ivoa.net/xml/VOEvent/v2.0";

const ROLES: [&str; 4] = ["observation", "prediction", "utility", "test"];
const CITE_KINDS: [&str; 3] = ["followup", "supersedes", "retraction"];

/// Top-level children in schema order, with whether they may repeat
const ROOT_SEQUENCE: [(&str, bool); 8] = [
    ("Who", false),
    ("What", false),
    ("WhereWhen", false),
    ("How", false),
    ("Why", false),
    ("Citations", false),
    ("Description", true),
    ("Reference", true),
];

/// Validate a raw payload and return the parsed document
///
/// Accepts anything byte-like (`&[u8]`, `&str`, `Vec<u8>`). Text must be UTF-8;
/// any other encoding is rejected along with malformed XML.
pub fn validate<P>(payload: &P) -> GcnResult<VoEvent<'_>>
where
    P: AsRef<[u8]> + ?Sized,
{
    let text = std::str::from_utf8(payload.as_ref())
        .map_err(|e| GcnError::SchemaValidation(format!("payload is not UTF-8: {}", e)))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let doc = Document::parse_with_options(
        text,
        ParsingOptions {
            allow_dtd: false,
            ..ParsingOptions::default()
        },
    )
    .map_err(|e| GcnError::SchemaValidation(format!("malformed XML: {}", e)))?;

    check_root(doc.root_element())?;
    Ok(VoEvent::new(doc))
}

fn invalid(message: impl Into<String>) -> GcnError {
    GcnError::SchemaValidation(message.into())
}

fn check_root(root: Node<'_, '_>) -> GcnResult<()> {
    let tag = root.tag_name();
    if tag.name() != "VOEvent" {
        return Err(invalid(format!("root element is <{}>, expected <VOEvent>", tag.name())));
    }
    if tag.namespace() != Some(VOEVENT_NAMESPACE) {
        return Err(invalid(format!(
            "root element namespace {:?} is not {}",
            tag.namespace(),
            VOEVENT_NAMESPACE
        )));
    }

    match root.attribute("version") {
        Some("2.0") => {}
        Some(other) => return Err(invalid(format!("unsupported VOEvent version {}", other))),
        None => return Err(invalid("missing version attribute")),
    }

    let ivorn = root
        .attribute("ivorn")
        .ok_or_else(|| invalid("missing ivorn attribute"))?;
    check_ivorn(ivorn)?;

    let role = root.attribute("role").unwrap_or("observation");
    if !ROLES.contains(&role) {
        return Err(invalid(format!("unknown role {}", role)));
    }

    check_sequence(root)?;

    for child in root.children().filter(Node::is_element) {
        match child.tag_name().name() {
            "Who" => check_who(child)?,
            "What" => check_what(child)?,
            "WhereWhen" => check_allowed(child, &["ObsDataLocation", "Description", "Reference"])?,
            "How" => check_allowed(child, &["Description", "Reference"])?,
            "Why" => check_why(child)?,
            "Citations" => check_citations(child)?,
            "Reference" => check_reference(child)?,
            _ => {}
        }
    }

    Ok(())
}

fn check_ivorn(ivorn: &str) -> GcnResult<()> {
    let rest = ivorn
        .strip_prefix("ivo://")
        .ok_or_else(|| invalid(format!("ivorn {} does not start with ivo://", ivorn)))?;
    if rest.is_empty() || rest.starts_with('/') {
        return Err(invalid(format!("ivorn {} has no authority", ivorn)));
    }
    Ok(())
}

fn check_sequence(root: Node<'_, '_>) -> GcnResult<()> {
    let mut last_rank = 0;
    let mut last_name = "";

    for child in root.children().filter(Node::is_element) {
        let tag = child.tag_name();
        if tag.namespace().is_some() {
            return Err(invalid(format!("<{}> must be unqualified", tag.name())));
        }
        let (rank, repeatable) = ROOT_SEQUENCE
            .iter()
            .position(|(name, _)| *name == tag.name())
            .map(|i| (i, ROOT_SEQUENCE[i].1))
            .ok_or_else(|| invalid(format!("unexpected element <{}> in VOEvent", tag.name())))?;

        if rank < last_rank {
            return Err(invalid(format!("<{}> appears after <{}>", tag.name(), last_name)));
        }
        if rank == last_rank && last_name == tag.name() && !repeatable {
            return Err(invalid(format!("<{}> appears more than once", tag.name())));
        }
        last_rank = rank;
        last_name = tag.name();
    }

    Ok(())
}

fn check_allowed(node: Node<'_, '_>, allowed: &[&str]) -> GcnResult<()> {
    for child in node.children().filter(Node::is_element) {
        let name = child.tag_name().name();
        if child.tag_name().namespace().is_some() || !allowed.contains(&name) {
            return Err(invalid(format!(
                "unexpected element <{}> in <{}>",
                name,
                node.tag_name().name()
            )));
        }
        if name == "Reference" {
            check_reference(child)?;
        }
    }
    Ok(())
}

fn check_who(who: Node<'_, '_>) -> GcnResult<()> {
    check_allowed(who, &["AuthorIVORN", "Date", "Description", "Reference", "Author"])
}

fn check_what(what: Node<'_, '_>) -> GcnResult<()> {
    check_allowed(what, &["Param", "Group", "Table", "Description", "Reference"])?;

    for child in what.children().filter(Node::is_element) {
        match child.tag_name().name() {
            "Param" => check_param(child)?,
            "Group" => {
                check_allowed(child, &["Param", "Description", "Reference"])?;
                for param in child.children().filter(|n| is_named(*n, "Param")) {
                    check_param(param)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_param(param: Node<'_, '_>) -> GcnResult<()> {
    check_allowed(param, &["Description", "Reference", "Value"])
}

fn check_why(why: Node<'_, '_>) -> GcnResult<()> {
    check_allowed(why, &["Name", "Concept", "Inference", "Description", "Reference"])?;

    if let Some(importance) = why.attribute("importance") {
        let value: f64 = importance
            .trim()
            .parse()
            .map_err(|_| invalid(format!("Why importance {} is not a number", importance)))?;
        if !(0.0..=1.0).contains(&value) {
            return Err(invalid(format!("Why importance {} outside [0, 1]", value)));
        }
    }

    for inference in why.children().filter(|n| is_named(*n, "Inference")) {
        check_allowed(inference, &["Name", "Concept", "Description", "Reference"])?;
    }
    Ok(())
}

fn check_citations(citations: Node<'_, '_>) -> GcnResult<()> {
    check_allowed(citations, &["EventIVORN", "Description"])?;

    let mut cited = 0;
    for event in citations.children().filter(|n| is_named(*n, "EventIVORN")) {
        let cite = event
            .attribute("cite")
            .ok_or_else(|| invalid("EventIVORN missing cite attribute"))?;
        if !CITE_KINDS.contains(&cite) {
            return Err(invalid(format!("unknown cite kind {}", cite)));
        }
        cited += 1;
    }
    if cited == 0 {
        return Err(invalid("Citations without EventIVORN"));
    }
    Ok(())
}

fn check_reference(reference: Node<'_, '_>) -> GcnResult<()> {
    if reference.attribute("uri").is_none() {
        return Err(invalid("Reference missing uri attribute"));
    }
    Ok(())
}
