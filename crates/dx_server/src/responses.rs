//! Success envelopes in the `{type, title, results|detail}` shape.

use serde_json::{json, Value};

use dx_core::error::Reason;

/// Returned instead of a fresh key when the owner's credential already
/// exists; the key is only ever handed out on registration or reset.
pub const API_KEY_MESSAGE: &str =
    "Use the apiKey returned on registration; if lost, use the /user/resetPassword API";

pub fn success(results: Value) -> Value {
    json!({
        "type": Reason::Success.urn(),
        "title": Reason::Success.title(),
        "results": results,
    })
}

pub fn success_detail(detail: &str) -> Value {
    json!({
        "type": Reason::Success.urn(),
        "title": Reason::Success.title(),
        "detail": detail,
    })
}
