//! Arbitrary script evaluation across the serialization boundary.
//!
//! Results must be representable as JSON values: primitives, arrays and
//! string-keyed objects. Anything else (functions, cyclic structures, live
//! node handles) is a `SerializationError`; a throw inside the evaluated
//! code is a `ScriptError` carrying the page's own message. The two are
//! never conflated.

use cdp_driver::{Driver, DriverErrorKind};
use serde_json::Value;

use crate::errors::{ToolError, ToolResult};

/// Evaluate `code` in the page. With arguments, `code` must be a function
/// expression; the arguments are bound positionally.
pub async fn evaluate(driver: &Driver, code: &str, args: &[Value]) -> ToolResult<Value> {
    let expression = if args.is_empty() {
        code.to_string()
    } else {
        let bound = serde_json::to_string(args)
            .map_err(|err| ToolError::Validation(format!("arguments not serializable: {err}")))?;
        format!("({code}).apply(undefined, {bound})")
    };

    let outcome = driver.evaluate(&expression).await.map_err(|err| {
        if err.kind == DriverErrorKind::Protocol && is_serialization_failure(err.message()) {
            ToolError::Serialization(err.message().to_string())
        } else {
            ToolError::from(err)
        }
    })?;

    if let Some(exception) = outcome.exception {
        return Err(ToolError::Script(exception));
    }

    let object_type = outcome.object_type.as_deref().unwrap_or("undefined");
    if matches!(object_type, "function" | "symbol") {
        return Err(ToolError::Serialization(format!(
            "script returned a {object_type}, which cannot cross the serialization boundary"
        )));
    }
    if outcome.unserializable {
        return Err(ToolError::Serialization(
            "script result could not be returned by value (cyclic structure or live handle)"
                .to_string(),
        ));
    }

    Ok(outcome.value.unwrap_or(Value::Null))
}

/// Protocol messages Chromium emits when `returnByValue` marshalling fails.
fn is_serialization_failure(message: &str) -> bool {
    message.contains("Object reference chain is too long")
        || message.contains("couldn't be returned by value")
        || message.contains("Object couldn't be serialized")
}
