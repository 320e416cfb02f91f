//! Outbound request rewriting
//!
//! Applies the resolved variant to the client's JSON payload before it is
//! forwarded: system-prompt prepend, weak-default merge, weak logit-bias
//! merge, end-of-prompt injection. Client-supplied values always win over
//! configured ones. Every step is best-effort: a step that cannot apply is
//! skipped, never the request.

use serde_json::{json, Map, Value};

use crate::variants::{ResolvedModel, Variant};

/// Rewrite `payload` in place per the resolved variant. Returns whether the
/// client asked for a streamed response (`stream`, default false), which
/// selects the response rewriter downstream.
pub fn rewrite_request(payload: &mut Value, resolved: &ResolvedModel) -> bool {
    if !payload.is_object() {
        return false;
    }

    // The @label suffix never reaches the upstream
    if payload.get("model").is_some() {
        payload["model"] = Value::String(resolved.upstream_model.clone());
    }

    let variant = resolved.variant.as_ref();
    inject_system_prompt(payload, variant);
    merge_weak_defaults(payload, variant);
    merge_weak_logit_bias(payload, variant);
    inject_at_end(payload, variant);

    payload
        .get("stream")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Prepend the variant's system prompt file to the message list: merged into
/// an existing leading system message, otherwise inserted at the front.
fn inject_system_prompt(payload: &mut Value, variant: &Variant) {
    let Some(path) = &variant.system_prompt_file else {
        return;
    };
    if path.as_os_str().is_empty() {
        return;
    }

    let prompt = match std::fs::read_to_string(path) {
        Ok(prompt) => prompt,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "System prompt file unreadable, skipping injection"
            );
            return;
        }
    };

    let Some(obj) = payload.as_object_mut() else {
        return;
    };
    let messages = obj
        .entry("messages")
        .or_insert_with(|| Value::Array(Vec::new()));
    let Some(list) = messages.as_array_mut() else {
        tracing::warn!("'messages' is not an array, skipping system prompt injection");
        return;
    };

    match list.first_mut() {
        Some(first) if first.get("role").and_then(Value::as_str) == Some("system") => {
            let existing = first.get("content").and_then(Value::as_str).unwrap_or("");
            first["content"] = Value::String(format!("{}\n\n{}", prompt, existing));
            tracing::debug!("Prepended system prompt to existing system message");
        }
        _ => {
            list.insert(0, json!({"role": "system", "content": prompt}));
            tracing::debug!("Prepended system prompt to messages");
        }
    }
}

/// Set each configured default the client did not already supply.
fn merge_weak_defaults(payload: &mut Value, variant: &Variant) {
    let Some(obj) = payload.as_object_mut() else {
        return;
    };
    for (key, value) in &variant.weak_defaults {
        if !obj.contains_key(key) {
            obj.insert(key.clone(), value.clone());
        }
    }
}

/// Add each configured logit-bias entry whose token the client did not bias.
fn merge_weak_logit_bias(payload: &mut Value, variant: &Variant) {
    if variant.weak_logit_bias.is_empty() {
        return;
    }
    let Some(obj) = payload.as_object_mut() else {
        return;
    };
    let bias = obj
        .entry("logit_bias")
        .or_insert_with(|| Value::Object(Map::new()));
    let Some(bias) = bias.as_object_mut() else {
        tracing::warn!("'logit_bias' is not an object, skipping weak logit bias merge");
        return;
    };
    for entry in &variant.weak_logit_bias {
        if !bias.contains_key(&entry.token) {
            bias.insert(entry.token.clone(), json!(entry.bias));
        }
    }
}

/// Append the variant's fixed suffix to the last message's content.
fn inject_at_end(payload: &mut Value, variant: &Variant) {
    if variant.inject_at_end.is_empty() {
        return;
    }
    let Some(last) = payload
        .get_mut("messages")
        .and_then(Value::as_array_mut)
        .and_then(|list| list.last_mut())
    else {
        return;
    };
    match last.get_mut("content") {
        Some(Value::String(content)) => content.push_str(&variant.inject_at_end),
        _ => tracing::debug!("Last message has no string content, skipping end injection"),
    }
}
