//! Equation display and fetch flows
//!
//! ```text
//!  display:  node ──freeze──▶ handle ──render──▶ <img src="…?docId&elemId&xmlHash">
//!  fetch:    docId ──registry──▶ session ──lookup(elemId)──▶ xml
//!                  ──normalize──▶ digest ──image cache / renderer──▶ PNG
//! ```

use std::fmt::Write as _;
use std::sync::Arc;

use crate::config::{Config, HttpConfig};
use crate::error::{Result, SerializationError};
use crate::identity::FragmentHandle;
use crate::image_cache::{RenderedImage, RenderedImageCache};
use crate::normalize;
use crate::session::{ensure_initialized, DocumentSession, SessionRegistry, SessionToken};
use crate::traits::{DocumentController, Renderer};

/// Result of an image fetch
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Found(RenderedImage),
    /// Unknown or closed session, or a handle with no frozen fragment
    NotFound,
}

/// Markup produced for one displayed equation
#[derive(Debug, Clone)]
pub struct EquationMarkup {
    pub token: SessionToken,
    pub handle: FragmentHandle,
    pub image: RenderedImage,
    pub html: String,
}

/// Host-wide entry point: one per editor process, shared by `Arc`
pub struct EquationService<C: DocumentController> {
    registry: SessionRegistry<DocumentSession<C>>,
    images: RenderedImageCache,
    renderer: Arc<dyn Renderer>,
    http: HttpConfig,
}

impl<C: DocumentController> EquationService<C> {
    pub fn new(config: &Config, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            registry: SessionRegistry::new(),
            images: RenderedImageCache::new(&config.cache),
            renderer,
            http: config.http.clone(),
        }
    }

    pub fn registry(&self) -> &SessionRegistry<DocumentSession<C>> {
        &self.registry
    }

    pub fn images(&self) -> &RenderedImageCache {
        &self.images
    }

    /// Token of `session`, registering it on first use
    pub fn open_document(&self, session: &Arc<DocumentSession<C>>) -> Result<SessionToken> {
        Ok(ensure_initialized(&self.registry, session)?)
    }

    /// Repair `xml` in the context of its document and render it, reusing
    /// any image already stored for the same markup
    pub fn render_fragment(&self, session: &DocumentSession<C>, xml: &str) -> Result<RenderedImage> {
        let normalized = normalize::prepare(xml, &session.normalize_context())?;
        self.images
            .get_or_render(&normalized, |markup| self.renderer.render(markup))
    }

    /// Image for the fragment `handle` of the document behind `token`
    pub fn fetch(&self, token: &SessionToken, handle: FragmentHandle) -> Result<FetchOutcome> {
        let Some(session) = self.registry.resolve(token) else {
            return Ok(FetchOutcome::NotFound);
        };
        let Some(xml) = session.equations().lookup(handle) else {
            tracing::debug!(handle = handle, "No frozen fragment for handle");
            return Ok(FetchOutcome::NotFound);
        };

        let image = self.render_fragment(&session, &xml)?;
        Ok(FetchOutcome::Found(image))
    }

    /// Previously rendered image, by digest only
    pub fn fetch_by_digest(&self, digest: &str) -> Result<FetchOutcome> {
        Ok(match self.images.get(digest)? {
            Some(bytes) => FetchOutcome::Found(RenderedImage {
                digest: digest.to_string(),
                bytes,
            }),
            None => FetchOutcome::NotFound,
        })
    }

    /// Freeze `node`, render it and build the `<img>` that displays it
    pub fn render_control(
        &self,
        session: &Arc<DocumentSession<C>>,
        node: &Arc<C::Node>,
    ) -> Result<EquationMarkup> {
        let token = self.open_document(session)?;
        let handle = session.equations().freeze(node)?;
        let xml = session
            .equations()
            .lookup(handle)
            .ok_or_else(|| SerializationError::new(format!("fragment {} was evicted", handle)))?;

        let image = self.render_fragment(session, &xml)?;
        let html = image_html(
            &self.http.url_base,
            image_dimensions(&image.bytes),
            &token,
            handle,
            &image.digest,
            &normalize::format_fragment(&xml),
        );

        Ok(EquationMarkup {
            token,
            handle,
            image,
            html,
        })
    }

    /// Like [`render_control`](Self::render_control), falling back to an
    /// inline error marker
    pub fn display_html(&self, session: &Arc<DocumentSession<C>>, node: &Arc<C::Node>) -> String {
        match self.render_control(session, node) {
            Ok(markup) => markup.html,
            Err(e) => {
                tracing::error!(error = %e, "Error rendering MathML");
                error_html().to_string()
            }
        }
    }
}

/// Pixel size of a PNG, if the bytes decode as one
pub fn image_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    image::load_from_memory_with_format(bytes, image::ImageFormat::Png)
        .ok()
        .map(|img| (img.width(), img.height()))
}

/// `<img>` pointing at the fetch endpoint
///
/// Width and height are set so the page does not reflow once the image
/// loads. The source XML goes into `alt` for the client-side editor.
pub fn image_html(
    url_base: &str,
    dimensions: Option<(u32, u32)>,
    token: &SessionToken,
    handle: FragmentHandle,
    digest: &str,
    xml: &str,
) -> String {
    let src = format!(
        "{}/mathml?docId={}&elemId={}&xmlHash={}",
        url_base,
        urlencoding::encode(token.as_str()),
        handle,
        urlencoding::encode(digest)
    );

    let mut html = String::from("<img ");
    if let Some((width, height)) = dimensions {
        let _ = write!(html, "width=\"{}\" height=\"{}\" ", width, height);
    }
    let _ = write!(
        html,
        "class=\"mathml-image\" src=\"{}\" alt=\"{}\"></img>",
        html_escape::encode_double_quoted_attribute(&src),
        html_escape::encode_double_quoted_attribute(xml)
    );
    html
}

pub fn error_html() -> &'static str {
    "<span style=\"color: red\">Error rendering MathML</span>"
}
