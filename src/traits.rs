//! Host-facing traits
//!
//! The editor that owns the document and the rasterizer that turns MathML
//! into pixels both live outside this crate. They plug in here.

use crate::error::{RenderError, SerializationError};

/// Access to one open document in the host editor
pub trait DocumentController: Send + Sync {
    /// Node type handed out by the host, shared as `Arc<Self::Node>`
    type Node: Send + Sync;

    /// Serialize an immutable copy of the node's subtree to XML
    fn serialize_subtree(&self, node: &Self::Node) -> Result<String, SerializationError>;

    /// Serialized doctype of the enclosing document, if it has one
    fn current_doctype(&self) -> Option<String>;

    /// System identifier (location) of the enclosing document
    fn system_id(&self) -> String;
}

/// Rasterizer for well-formed MathML
pub trait Renderer: Send + Sync {
    /// Render the markup to PNG bytes
    fn render(&self, xml: &str) -> Result<Vec<u8>, RenderError>;
}

impl<F> Renderer for F
where
    F: Fn(&str) -> Result<Vec<u8>, RenderError> + Send + Sync,
{
    fn render(&self, xml: &str) -> Result<Vec<u8>, RenderError> {
        self(xml)
    }
}
