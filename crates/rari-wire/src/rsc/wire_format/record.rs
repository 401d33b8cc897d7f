use serde_json::{Value as JsonValue, json};

use super::escape::{escape_rsc_string, is_marker, unescape_rsc_string};
use super::row::{format_slot_ref, parse_slot_ref};
use crate::error::RscError;
use crate::rsc::components::ClientReference;
use crate::rsc::types::Props;

pub const ELEMENT_MARKER: &str = "$";
pub const ASYNC_MARKER: &str = "$A";
pub const CLIENT_REFERENCE_MARKER: &str = "$C";
pub const RAW_MARKER: &str = "$R";

pub const FRAGMENT_TAG: &str = "$Fragment";
pub const SUSPENSE_TAG: &str = "$Suspense";
pub const ERROR_BOUNDARY_TAG: &str = "$ErrorBoundary";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementKind {
    Tag(String),
    Fragment,
    Suspense,
    ErrorBoundary,
}

impl ElementKind {
    fn wire_tag(&self) -> &str {
        match self {
            Self::Tag(tag) => tag,
            Self::Fragment => FRAGMENT_TAG,
            Self::Suspense => SUSPENSE_TAG,
            Self::ErrorBoundary => ERROR_BOUNDARY_TAG,
        }
    }

    fn from_wire_tag(tag: &str) -> Result<Self, RscError> {
        match tag {
            FRAGMENT_TAG => Ok(Self::Fragment),
            SUSPENSE_TAG => Ok(Self::Suspense),
            ERROR_BOUNDARY_TAG => Ok(Self::ErrorBoundary),
            other if other.starts_with('$') => {
                Err(RscError::decoding(format!("Unknown element tag '{other}'")))
            }
            other => Ok(Self::Tag(other.to_string())),
        }
    }

    fn has_fallback(&self) -> bool {
        matches!(self, Self::Suspense | Self::ErrorBoundary)
    }
}

/// Host element names the encoder accepts. Only the leading `$` is reserved.
pub fn is_valid_tag(tag: &str) -> bool {
    !tag.starts_with('$')
}

#[derive(Debug, Clone, PartialEq)]
pub enum AsyncPayload {
    Inline(Box<WireNode>),
    Slot(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarkupPayload {
    Ready(Option<String>),
    Slot(u32),
}

/// One node of a row payload, independent of how it was produced or will be
/// reconstructed.
#[derive(Debug, Clone, PartialEq)]
pub enum WireNode {
    Empty,
    Text(String),
    List(Vec<WireNode>),
    Element {
        kind: ElementKind,
        key: Option<String>,
        props: Props,
        children: Vec<WireNode>,
        fallback: Option<Box<WireNode>>,
    },
    Async(AsyncPayload),
    ClientReference {
        reference: ClientReference,
        key: Option<String>,
        props: Props,
        children: Vec<WireNode>,
    },
    Raw {
        html: String,
        outputs: Vec<MarkupPayload>,
    },
}

impl WireNode {
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Empty => JsonValue::Null,
            Self::Text(text) => JsonValue::String(escape_rsc_string(text)),
            Self::List(items) => JsonValue::Array(items.iter().map(Self::to_json).collect()),
            Self::Element { kind, key, props, children, fallback } => {
                let mut record = vec![
                    json!(ELEMENT_MARKER),
                    json!(kind.wire_tag()),
                    json!(key),
                    JsonValue::Object(props.clone()),
                    children_to_json(children),
                ];
                if let Some(fallback) = fallback {
                    record.push(fallback.to_json());
                }
                JsonValue::Array(record)
            }
            Self::Async(AsyncPayload::Inline(node)) => json!([ASYNC_MARKER, node.to_json()]),
            Self::Async(AsyncPayload::Slot(id)) => json!([ASYNC_MARKER, format_slot_ref(*id)]),
            Self::ClientReference { reference, key, props, children } => json!([
                CLIENT_REFERENCE_MARKER,
                reference.id,
                reference.export_name,
                key,
                JsonValue::Object(props.clone()),
                children_to_json(children),
            ]),
            Self::Raw { html, outputs } => {
                let mut record = vec![json!(RAW_MARKER), json!(html)];
                record.extend(outputs.iter().map(|output| match output {
                    MarkupPayload::Ready(None) => JsonValue::Null,
                    MarkupPayload::Ready(Some(html)) => JsonValue::String(escape_rsc_string(html)),
                    MarkupPayload::Slot(id) => JsonValue::String(format_slot_ref(*id)),
                }));
                JsonValue::Array(record)
            }
        }
    }

    pub fn from_json(value: &JsonValue) -> Result<Self, RscError> {
        match value {
            JsonValue::Null => Ok(Self::Empty),
            JsonValue::Bool(_) => Ok(Self::Empty),
            JsonValue::Number(number) => Ok(Self::Text(number.to_string())),
            JsonValue::String(text) => {
                if is_marker(text) {
                    return Err(RscError::decoding(format!(
                        "Unexpected marker '{text}' in node position"
                    )));
                }
                Ok(Self::Text(unescape_rsc_string(text)))
            }
            JsonValue::Object(_) => {
                Err(RscError::decoding("Unexpected object in node position".to_string()))
            }
            JsonValue::Array(items) => match items.first() {
                Some(JsonValue::String(marker)) if is_marker(marker) => {
                    parse_record(marker, items)
                }
                _ => Ok(Self::List(items.iter().map(Self::from_json).collect::<Result<_, _>>()?)),
            },
        }
    }
}

fn children_to_json(children: &[WireNode]) -> JsonValue {
    JsonValue::Array(children.iter().map(WireNode::to_json).collect())
}

fn parse_record(marker: &str, items: &[JsonValue]) -> Result<WireNode, RscError> {
    match marker {
        ELEMENT_MARKER => parse_element(items),
        ASYNC_MARKER => parse_async(items),
        CLIENT_REFERENCE_MARKER => parse_client_reference(items),
        RAW_MARKER => parse_raw(items),
        other => Err(RscError::decoding(format!("Unknown record tag '{other}'"))),
    }
}

fn parse_element(items: &[JsonValue]) -> Result<WireNode, RscError> {
    if items.len() < 5 {
        return Err(RscError::decoding(format!(
            "Element record needs at least 5 fields, got {}",
            items.len()
        )));
    }

    let tag = items[1]
        .as_str()
        .ok_or_else(|| RscError::decoding("Element tag must be a string".to_string()))?;
    let kind = ElementKind::from_wire_tag(tag)?;
    let key = parse_key(&items[2])?;
    let props = parse_props(&items[3])?;
    let children = parse_children(&items[4])?;

    let fallback = if kind.has_fallback() {
        let fallback = items.get(5).ok_or_else(|| {
            RscError::decoding(format!("{} record is missing its fallback", kind.wire_tag()))
        })?;
        Some(Box::new(WireNode::from_json(fallback)?))
    } else {
        None
    };

    Ok(WireNode::Element { kind, key, props, children, fallback })
}

fn parse_async(items: &[JsonValue]) -> Result<WireNode, RscError> {
    let [_, payload] = items else {
        return Err(RscError::decoding("Async record needs exactly 2 fields".to_string()));
    };

    if let JsonValue::String(value) = payload
        && is_marker(value)
    {
        let id = parse_slot_ref(value)
            .ok_or_else(|| RscError::decoding(format!("Invalid slot reference '{value}'")))?;
        return Ok(WireNode::Async(AsyncPayload::Slot(id)));
    }

    Ok(WireNode::Async(AsyncPayload::Inline(Box::new(WireNode::from_json(payload)?))))
}

fn parse_client_reference(items: &[JsonValue]) -> Result<WireNode, RscError> {
    let [_, id, export_name, key, props, children] = items else {
        return Err(RscError::decoding(
            "Client reference record needs exactly 6 fields".to_string(),
        ));
    };

    let (Some(id), Some(export_name)) = (id.as_str(), export_name.as_str()) else {
        return Err(RscError::decoding(
            "Client reference id and export name must be strings".to_string(),
        ));
    };

    Ok(WireNode::ClientReference {
        reference: ClientReference::new(id, export_name),
        key: parse_key(key)?,
        props: parse_props(props)?,
        children: parse_children(children)?,
    })
}

fn parse_raw(items: &[JsonValue]) -> Result<WireNode, RscError> {
    let html = items
        .get(1)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| RscError::decoding("Raw record needs an html string".to_string()))?;

    let outputs = items[2..]
        .iter()
        .map(|output| match output {
            JsonValue::Null => Ok(MarkupPayload::Ready(None)),
            JsonValue::String(value) if is_marker(value) => parse_slot_ref(value)
                .map(MarkupPayload::Slot)
                .ok_or_else(|| RscError::decoding(format!("Invalid slot reference '{value}'"))),
            JsonValue::String(value) => Ok(MarkupPayload::Ready(Some(unescape_rsc_string(value)))),
            other => Err(RscError::decoding(format!("Invalid raw markup output: {other}"))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(WireNode::Raw { html: html.to_string(), outputs })
}

fn parse_key(value: &JsonValue) -> Result<Option<String>, RscError> {
    match value {
        JsonValue::Null => Ok(None),
        JsonValue::String(key) => Ok(Some(key.clone())),
        JsonValue::Number(key) => Ok(Some(key.to_string())),
        other => Err(RscError::decoding(format!("Invalid key: {other}"))),
    }
}

fn parse_props(value: &JsonValue) -> Result<Props, RscError> {
    match value {
        JsonValue::Object(props) => Ok(props.clone()),
        JsonValue::Null => Ok(Props::new()),
        other => Err(RscError::decoding(format!("Props must be an object, got {other}"))),
    }
}

fn parse_children(value: &JsonValue) -> Result<Vec<WireNode>, RscError> {
    match value {
        JsonValue::Array(children) => children.iter().map(WireNode::from_json).collect(),
        JsonValue::Null => Ok(Vec::new()),
        other => Err(RscError::decoding(format!("Children must be an array, got {other}"))),
    }
}
