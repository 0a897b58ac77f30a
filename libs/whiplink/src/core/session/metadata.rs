// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value};
use url::Url;

use crate::core::config::StreamConfig;

/// JSON document sent once per connection over the "meta" channel:
/// `{"name", "rtsp", "ts", ...meta}`. Keys from `meta` win on collision.
pub fn build_meta_payload(stream: &StreamConfig, now: SystemTime) -> String {
    let ts = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default();

    let mut payload = Map::new();
    payload.insert("name".into(), Value::String(stream.name.clone()));
    payload.insert("rtsp".into(), Value::String(redact_credentials(&stream.rtsp)));
    payload.insert("ts".into(), Value::from(ts));
    for (key, value) in &stream.meta {
        payload.insert(key.clone(), value.clone());
    }

    Value::Object(payload).to_string()
}

/// Drops `user:pass@` from a URL. Unparseable input is returned unchanged.
pub fn redact_credentials(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) if !parsed.username().is_empty() || parsed.password().is_some() => {
            let _ = parsed.set_username("");
            let _ = parsed.set_password(None);
            parsed.to_string()
        }
        _ => url.to_owned(),
    }
}
