//! Bounded-depth DOM serialization.
//!
//! The whole walk happens in one scripted evaluation so the tree is a
//! consistent snapshot of a single moment. Depth is counted from the
//! traversal root (depth 0); children beyond `max_depth` are omitted
//! entirely. Embedded documents (iframes and friends) are never entered:
//! they come back as leaves carrying a marker attribute so callers can tell
//! a boundary from a genuinely childless element.

use cdp_driver::Driver;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ToolError, ToolResult};

/// Marker attribute attached to iframe/embedded-document boundary leaves.
pub const EMBEDDED_DOC_MARKER: &str = "data-embedded-document";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DomAttribute {
    pub name: String,
    pub value: String,
}

/// One serialized element. `attributes` preserves source order; `text` is
/// the element's own direct text, not descendant text.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DomNode {
    pub tag: String,
    #[serde(default)]
    pub attributes: Vec<DomAttribute>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub children: Vec<DomNode>,
    pub depth: u32,
}

impl DomNode {
    /// Total nodes in this subtree, itself included.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(DomNode::node_count).sum::<usize>()
    }

    pub fn is_embedded_boundary(&self) -> bool {
        self.attributes
            .iter()
            .any(|a| a.name == EMBEDDED_DOC_MARKER)
    }
}

/// Serialize the subtree rooted at `selector`'s first match, or at the
/// document element when no selector is given.
pub async fn explore(
    driver: &Driver,
    selector: Option<&str>,
    max_depth: u32,
) -> ToolResult<DomNode> {
    let root_expr = match selector {
        Some(sel) => {
            let literal = serde_json::to_string(sel)
                .map_err(|err| ToolError::Unknown(err.to_string()))?;
            format!("document.querySelector({literal})")
        }
        None => "document.documentElement".to_string(),
    };

    let expression = format!(
        r#"(() => {{
    const MAX_DEPTH = {max_depth};
    const walk = (el, depth) => {{
        const attributes = [];
        for (const attr of el.attributes) {{
            attributes.push({{ name: attr.name, value: attr.value }});
        }}
        let text = '';
        for (const node of el.childNodes) {{
            if (node.nodeType === Node.TEXT_NODE) {{ text += node.textContent; }}
        }}
        text = text.trim();
        const out = {{
            tag: el.tagName.toLowerCase(),
            attributes,
            text: text.length ? text : null,
            children: [],
            depth,
        }};
        const tag = el.tagName;
        if (tag === 'IFRAME' || tag === 'FRAME'
            || ((tag === 'OBJECT' || tag === 'EMBED') && el.contentDocument)) {{
            out.attributes.push({{ name: '{marker}', value: 'true' }});
            return out;
        }}
        if (depth < MAX_DEPTH) {{
            for (const child of el.children) {{
                out.children.push(walk(child, depth + 1));
            }}
        }}
        return out;
    }};
    let root;
    try {{
        root = {root_expr};
    }} catch (err) {{
        return {{ error: String(err) }};
    }}
    if (!root) {{ return null; }}
    return walk(root, 0);
}})()"#,
        max_depth = max_depth,
        marker = EMBEDDED_DOC_MARKER,
        root_expr = root_expr,
    );

    let outcome = driver.evaluate(&expression).await?;
    if let Some(exception) = outcome.exception {
        return Err(ToolError::Unknown(format!("dom walk failed: {exception}")));
    }
    let value = outcome.value.unwrap_or(Value::Null);
    if value.is_null() {
        return match selector {
            Some(sel) => Err(ToolError::ElementNotFound(sel.to_string())),
            None => Err(ToolError::Unknown("document has no root element".into())),
        };
    }
    if let Some(err) = value.get("error").and_then(|v| v.as_str()) {
        return Err(ToolError::Validation(format!(
            "invalid selector for dom exploration: {err}"
        )));
    }

    serde_json::from_value(value)
        .map_err(|err| ToolError::Unknown(format!("malformed dom snapshot: {err}")))
}
