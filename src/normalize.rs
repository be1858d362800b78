//! MathML fragment repair
//!
//! A fragment cut out of its document loses two things a standalone parser
//! needs: the doctype that defines named entities such as `&alpha;`, and
//! the namespace declaration for a prefixed root such as `<m:math>`. This
//! module puts back whichever one is missing, then checks the result.
//!
//! Fragments are also re-indented first, so markup that differs only in
//! layout ends up under the same image digest.

use std::sync::LazyLock;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::{NsReader, Reader};
use quick_xml::writer::Writer;
use regex::{Captures, Regex};

use crate::error::ParseError;

/// The MathML namespace URI
pub const MATHML_NAMESPACE: &str = "http://www.w3.org/1998/Math/MathML";

/// Doctype used when the enclosing document does not provide one
pub const MATHML_DOCTYPE: &str = "<!DOCTYPE math PUBLIC \"-//W3C//DTD MathML 2.0//EN\" \"http://www.w3.org/Math/DTD/mathml2/mathml2.dtd\">\n";

static NAMED_ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&[^#]").expect("valid entity pattern"));

static ROOT_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([a-z]+):math").expect("valid prefix pattern"));

/// What the enclosing document tells us about a fragment
#[derive(Debug, Clone, Default)]
pub struct NormalizeContext {
    /// System identifier of the enclosing document
    pub system_id: String,
    /// Serialized doctype of the enclosing document
    pub doctype: Option<String>,
}

impl NormalizeContext {
    pub fn new(system_id: impl Into<String>, doctype: Option<String>) -> Self {
        Self {
            system_id: system_id.into(),
            doctype,
        }
    }
}

/// Repair `xml` so that it parses without its enclosing document
pub fn normalize(xml: &str, ctx: &NormalizeContext) -> String {
    if contains_named_entities(xml) {
        let doctype = ctx.doctype.as_deref().unwrap_or(MATHML_DOCTYPE);
        return format!("{}{}", doctype, xml);
    }

    if declares_mathml_namespace(xml) {
        return xml.to_string();
    }

    match detect_namespace_prefix(xml) {
        Some(prefix) => add_namespace_prefix_mapping(xml, prefix),
        None => xml.to_string(),
    }
}

/// Format, normalize, then reject anything that is still not well-formed
pub fn prepare(xml: &str, ctx: &NormalizeContext) -> Result<String, ParseError> {
    let normalized = normalize(&format_fragment(xml), ctx);
    check_well_formed(&normalized).map_err(|e| {
        tracing::debug!(system_id = %ctx.system_id, error = %e, "Fragment is not well-formed");
        e
    })?;
    Ok(normalized)
}

/// Re-indent `xml` with two spaces per level
///
/// Whitespace-only text between tags is dropped and text content is
/// trimmed. Markup that does not parse is returned unchanged.
pub fn format_fragment(xml: &str) -> String {
    match pretty_print(xml) {
        Ok(formatted) => formatted,
        Err(e) => {
            tracing::debug!(error = %e, "Content not in XML format, left as is");
            xml.to_string()
        }
    }
}

fn pretty_print(xml: &str) -> Result<String, String> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Eof => break,
            event => writer.write_event(event).map_err(|e| e.to_string())?,
        }
    }

    String::from_utf8(writer.into_inner()).map_err(|e| e.to_string())
}

/// True if the text may contain a named (non-numeric) entity reference
pub fn contains_named_entities(xml: &str) -> bool {
    NAMED_ENTITY.is_match(xml)
}

/// True if the MathML namespace URI already appears in the text
pub fn declares_mathml_namespace(xml: &str) -> bool {
    xml.contains(MATHML_NAMESPACE)
}

/// Prefix of the `math` root element, if it has one
pub fn detect_namespace_prefix(xml: &str) -> Option<&str> {
    ROOT_PREFIX
        .captures(xml)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Declare `prefix` as the MathML namespace on the first `<prefix:math` tag
pub fn add_namespace_prefix_mapping(xml: &str, prefix: &str) -> String {
    let open_tag = match Regex::new(&format!(r"<{}:math(/|\s|>)", regex::escape(prefix))) {
        Ok(re) => re,
        Err(_) => return xml.to_string(),
    };

    open_tag
        .replacen(xml, 1, |caps: &Captures| {
            format!(
                "<{p}:math xmlns:{p}=\"{ns}\"{delim}",
                p = prefix,
                ns = MATHML_NAMESPACE,
                delim = &caps[1]
            )
        })
        .into_owned()
}

/// Namespace-aware well-formedness check
///
/// Doctypes are accepted without validation and entity references are not
/// expanded.
pub fn check_well_formed(xml: &str) -> Result<(), ParseError> {
    let mut reader = NsReader::from_str(xml);
    let mut open: Vec<String> = Vec::new();
    let mut seen_root = false;

    loop {
        let position = reader.buffer_position() as usize;
        let (resolved, event) = reader
            .read_resolved_event()
            .map_err(|e| ParseError::Malformed {
                position,
                message: e.to_string(),
            })?;
        let unbound = match resolved {
            ResolveResult::Unknown(prefix) => Some(prefix),
            _ => None,
        };

        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                if let Some(prefix) = unbound {
                    return Err(ParseError::UnboundPrefix(
                        String::from_utf8_lossy(&prefix).into_owned(),
                    ));
                }
                check_attributes(&reader, e, position)?;
                if open.is_empty() && seen_root {
                    return Err(ParseError::Malformed {
                        position,
                        message: "multiple root elements".to_string(),
                    });
                }
                seen_root = true;
                if matches!(event, Event::Start(_)) {
                    open.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                }
            }
            Event::End(ref e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match open.pop() {
                    Some(expected) if expected == name => {}
                    Some(expected) => {
                        return Err(ParseError::Malformed {
                            position,
                            message: format!("expected </{}>, found </{}>", expected, name),
                        });
                    }
                    None => {
                        return Err(ParseError::Malformed {
                            position,
                            message: format!("closing tag </{}> without opening tag", name),
                        });
                    }
                }
            }
            Event::Text(ref text) if open.is_empty() => {
                if !text.iter().all(u8::is_ascii_whitespace) {
                    return Err(ParseError::Malformed {
                        position,
                        message: "text outside the root element".to_string(),
                    });
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(name) = open.pop() {
        return Err(ParseError::Unclosed(name));
    }
    if !seen_root {
        return Err(ParseError::NoRootElement);
    }
    Ok(())
}

/// Attribute syntax, duplicates and prefixes of one start tag
fn check_attributes(
    reader: &NsReader<&[u8]>,
    start: &BytesStart,
    position: usize,
) -> Result<(), ParseError> {
    for attr in start.attributes().with_checks(true) {
        let attr = attr.map_err(|e| ParseError::Malformed {
            position,
            message: e.to_string(),
        })?;

        let raw = attr.key.as_ref();
        if raw == b"xmlns" || raw.starts_with(b"xmlns:") || raw.starts_with(b"xml:") {
            continue;
        }
        if let (ResolveResult::Unknown(prefix), _) = reader.resolve_attribute(attr.key) {
            return Err(ParseError::UnboundPrefix(
                String::from_utf8_lossy(&prefix).into_owned(),
            ));
        }
    }
    Ok(())
}
