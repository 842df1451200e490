//! Selector resolution against the live page.
//!
//! Resolution is a pure query: one scripted `querySelectorAll` round trip
//! returning lightweight descriptors in document order. Handles are never
//! held across tool calls; an element is always re-identified by its
//! selector and match index.

use cdp_driver::Driver;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ToolError, ToolResult};

const TEXT_PREVIEW_LEN: usize = 80;

/// One resolved element. `selector` + `index` is the only identity that
/// survives the current tool call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ElementDescriptor {
    #[serde(default)]
    pub selector: String,
    pub index: usize,
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub visible: bool,
}

/// Resolve a selector to descriptors for every match, in document order.
/// Zero matches is a successful empty result; callers decide whether that
/// is acceptable.
pub async fn resolve(driver: &Driver, selector: &str) -> ToolResult<Vec<ElementDescriptor>> {
    let literal = serde_json::to_string(selector)
        .map_err(|err| ToolError::Unknown(err.to_string()))?;
    let expression = format!(
        r#"(() => {{
    let nodes;
    try {{
        nodes = document.querySelectorAll({literal});
    }} catch (err) {{
        return {{ error: String(err) }};
    }}
    const list = [];
    nodes.forEach((el, index) => {{
        const rect = el.getBoundingClientRect();
        const style = window.getComputedStyle(el);
        const visible = rect.width > 0 && rect.height > 0
            && style.visibility !== 'hidden' && style.display !== 'none';
        let text = (el.innerText || el.textContent || '').trim();
        if (text.length > {preview}) {{
            text = text.slice(0, {preview_cut}) + '...';
        }}
        list.push({{
            index,
            tag: el.tagName.toLowerCase(),
            id: el.id || null,
            classes: (typeof el.className === 'string' && el.className.trim().length)
                ? el.className.trim().split(/\s+/) : [],
            text: text.length ? text : null,
            visible,
        }});
    }});
    return {{ elements: list }};
}})()"#,
        literal = literal,
        preview = TEXT_PREVIEW_LEN,
        preview_cut = TEXT_PREVIEW_LEN - 3,
    );

    let outcome = driver.evaluate(&expression).await?;
    if let Some(exception) = outcome.exception {
        return Err(ToolError::Unknown(format!(
            "selector resolution failed: {exception}"
        )));
    }
    let value = outcome.value.unwrap_or(Value::Null);
    if let Some(err) = value.get("error").and_then(|v| v.as_str()) {
        return Err(ToolError::Validation(format!(
            "invalid selector '{selector}': {err}"
        )));
    }

    let raw = value
        .get("elements")
        .cloned()
        .ok_or_else(|| ToolError::Unknown("selector query returned no element list".into()))?;
    let mut descriptors: Vec<ElementDescriptor> = serde_json::from_value(raw)
        .map_err(|err| ToolError::Unknown(format!("malformed element descriptors: {err}")))?;
    for descriptor in &mut descriptors {
        descriptor.selector = selector.to_string();
    }
    Ok(descriptors)
}

/// Scroll the `index`-th match into view and return its viewport center.
pub async fn center_of(driver: &Driver, selector: &str, index: usize) -> ToolResult<(f64, f64)> {
    let literal = serde_json::to_string(selector)
        .map_err(|err| ToolError::Unknown(err.to_string()))?;
    let expression = format!(
        r#"(() => {{
    let nodes;
    try {{
        nodes = document.querySelectorAll({literal});
    }} catch (err) {{
        return null;
    }}
    if (nodes.length <= {index}) {{ return null; }}
    const el = nodes[{index}];
    el.scrollIntoView({{ block: 'center', inline: 'center' }});
    const rect = el.getBoundingClientRect();
    return {{
        x: rect.left + rect.width / 2,
        y: rect.top + rect.height / 2,
    }};
}})()"#,
        literal = literal,
        index = index,
    );

    let outcome = driver.evaluate(&expression).await?;
    let value = outcome.value.unwrap_or(Value::Null);
    if value.is_null() {
        return Err(ToolError::ElementNotFound(selector.to_string()));
    }
    let x = value.get("x").and_then(|v| v.as_f64());
    let y = value.get("y").and_then(|v| v.as_f64());
    match (x, y) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => Err(ToolError::Unknown("element center query returned no coordinates".into())),
    }
}
