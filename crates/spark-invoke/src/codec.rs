//! # codec 模块说明
//!
//! ## 角色定位（Why）
//! - 默认的参数解析器与返回值转换器共享同一组负载编解码助手，集中在此处避免各自判断 MIME；
//! - 负责 `content-type` 与 `accept` 头的最小语义：只比较 MIME 本体（`type/subtype`），忽略参数。
//!
//! ## 设计要求（What）
//! - 缺失 `content-type` 视为 JSON；`application/*+json` 同样视为 JSON；
//! - 缺失 `accept` 视为接受一切；`*/*` 与 `type/*` 通配均被识别。

use bytes::Bytes;
use serde_json::Value;

use crate::error::{InvokeError, Result};

/// JSON 负载。
pub const APPLICATION_JSON: &str = "application/json";
/// UTF-8 纯文本负载。
pub const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// 提取 MIME 本体并转为小写，例如 `Text/Plain; charset=utf-8` → `text/plain`。
pub fn essence(media_type: &str) -> String {
    media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// 判断 `content-type` 是否表示 JSON。
pub fn is_json(content_type: Option<&str>) -> bool {
    match content_type {
        None => true,
        Some(raw) => {
            let essence = essence(raw);
            essence == APPLICATION_JSON
                || (essence.starts_with("application/") && essence.ends_with("+json"))
        }
    }
}

/// 判断 `accept` 头是否接受给定媒体类型。
///
/// # 契约说明（What）
/// - `accept` 缺失或为空白时返回 `true`；
/// - 逐项比较本体，支持 `*/*` 与 `type/*`；质量参数（`q=`）被忽略。
pub fn accepts(accept: Option<&str>, media_type: &str) -> bool {
    let Some(accept) = accept.filter(|raw| !raw.trim().is_empty()) else {
        return true;
    };
    let wanted = essence(media_type);
    let wanted_type = wanted.split('/').next().unwrap_or_default();
    accept.split(',').map(essence).any(|candidate| {
        candidate == "*/*"
            || candidate == wanted
            || candidate
                .strip_suffix("/*")
                .is_some_and(|prefix| prefix == wanted_type)
    })
}

/// 将 JSON 值编码为负载。
pub fn encode_json(value: &Value) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}

/// 解码 JSON 负载，空负载返回 `None`。
pub fn decode_json(payload: &[u8]) -> Result<Option<Value>> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    Ok(Some(serde_json::from_slice(payload)?))
}

/// 将字符串值编码为纯文本负载。
pub fn encode_text(value: &Value) -> Result<Bytes> {
    match value {
        Value::String(text) => Ok(Bytes::from(text.clone())),
        other => Err(InvokeError::Codec {
            detail: format!("text payload requires a string, got `{other}`"),
        }),
    }
}

/// 将纯文本负载解码为字符串值。
pub fn decode_text(payload: &[u8]) -> Result<Value> {
    std::str::from_utf8(payload)
        .map(|text| Value::String(text.to_owned()))
        .map_err(|err| InvokeError::Codec {
            detail: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_detection_ignores_parameters_and_case() {
        assert!(is_json(None));
        assert!(is_json(Some("Application/JSON; charset=utf-8")));
        assert!(is_json(Some("application/problem+json")));
        assert!(!is_json(Some(TEXT_PLAIN)));
    }

    #[test]
    fn accept_matching_handles_wildcards() {
        assert!(accepts(None, APPLICATION_JSON));
        assert!(accepts(Some("text/html, */*;q=0.1"), APPLICATION_JSON));
        assert!(accepts(Some("application/*"), APPLICATION_JSON));
        assert!(!accepts(Some("text/plain"), APPLICATION_JSON));
        assert!(accepts(Some("text/plain"), TEXT_PLAIN));
    }

    #[test]
    fn empty_payload_decodes_to_none() {
        assert_eq!(decode_json(b"").expect("empty"), None);
        assert_eq!(decode_json(b"  \n").expect("blank"), None);
        assert_eq!(decode_json(b"[1]").expect("array"), Some(json!([1])));
        assert!(matches!(decode_json(b"{"), Err(InvokeError::Codec { .. })));
    }

    #[test]
    fn text_codec_only_accepts_strings() {
        assert_eq!(encode_text(&json!("hi")).expect("string"), Bytes::from_static(b"hi"));
        assert!(encode_text(&json!(1)).is_err());
        assert_eq!(decode_text(b"hi").expect("utf8"), json!("hi"));
    }
}
