use std::collections::HashMap;

use spin_sdk::http::Request;

/// Parse query parameters from a URI string
///
/// Handles URL decoding and returns a HashMap of parameter key-value pairs.
/// Multiple values for the same key are not supported (only the last is kept).
///
/// # Example
/// ```
/// use codr::core::query_params::parse_query_params;
///
/// let params = parse_query_params("/explore?user=john&page=2");
/// assert_eq!(params.get("user"), Some(&"john".to_string()));
/// assert_eq!(params.get("page"), Some(&"2".to_string()));
/// ```
pub fn parse_query_params(uri: &str) -> HashMap<String, String> {
    match uri.find('?') {
        Some(query_start) => parse_urlencoded(&uri[query_start + 1..]),
        None => HashMap::new(),
    }
}

/// Decode an `application/x-www-form-urlencoded` string.
pub fn parse_urlencoded(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    for param in input.split('&').filter(|p| !p.is_empty()) {
        if let Some(eq_idx) = param.find('=') {
            let key = decode_component(&param[..eq_idx]);
            let value = decode_component(&param[eq_idx + 1..]);
            params.insert(key, value);
        } else {
            // Flag parameter without value
            params.insert(decode_component(param), String::new());
        }
    }

    params
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

/// Read submitted fields from a form-encoded or JSON request body.
pub fn parse_body(req: &Request) -> HashMap<String, String> {
    let is_json = req
        .header("content-type")
        .and_then(|h| h.as_str())
        .map(|ct| ct.starts_with("application/json"))
        .unwrap_or(false);

    if is_json {
        let value: serde_json::Value = serde_json::from_slice(req.body()).unwrap_or_default();
        let mut fields = HashMap::new();
        if let Some(object) = value.as_object() {
            for (key, value) in object {
                let text = match value {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Null => continue,
                    other => other.to_string(),
                };
                fields.insert(key.clone(), text);
            }
        }
        fields
    } else {
        parse_urlencoded(&String::from_utf8_lossy(req.body()))
    }
}

/// Get a string parameter from parsed query params with optional default
pub fn get_string(params: &HashMap<String, String>, key: &str, default: Option<&str>) -> Option<String> {
    params
        .get(key)
        .cloned()
        .or_else(|| default.map(|d| d.to_string()))
}

/// Get a boolean flag parameter (e.g., ?remember_me=true or a checked box)
pub fn get_bool_flag(params: &HashMap<String, String>, key: &str) -> bool {
    params
        .get(key)
        .map(|v| matches!(v.as_str(), "true" | "on" | "1" | "y"))
        .unwrap_or(false)
}

/// Get an integer parameter with validation and default
pub fn get_int(params: &HashMap<String, String>, key: &str, default: usize) -> usize {
    params
        .get(key)
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(default)
        .max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_without_params_is_empty() {
        assert!(parse_query_params("/feed").is_empty());
    }

    #[test]
    fn form_bodies_decode_plus_and_percent() {
        let params = parse_urlencoded("post=hello+world%21&remember_me=on&flag");
        assert_eq!(params["post"], "hello world!");
        assert!(get_bool_flag(&params, "remember_me"));
        assert_eq!(params["flag"], "");
    }

    #[test]
    fn page_defaults_and_clamps() {
        let params = parse_query_params("/explore?page=0");
        assert_eq!(get_int(&params, "page", 1), 1);
        let params = parse_query_params("/explore?page=abc");
        assert_eq!(get_int(&params, "page", 1), 1);
        let params = parse_query_params("/explore?page=3");
        assert_eq!(get_int(&params, "page", 1), 3);
    }

    #[test]
    fn json_bodies_are_flattened() {
        let req = Request::builder()
            .method(spin_sdk::http::Method::Post)
            .uri("/login")
            .header("content-type", "application/json")
            .body(br#"{"username":"alice","password":"pw","remember_me":true}"#.to_vec())
            .build();
        let fields = parse_body(&req);
        assert_eq!(fields["username"], "alice");
        assert_eq!(fields["remember_me"], "true");
        assert_eq!(get_string(&fields, "missing", Some("x")), Some("x".to_string()));
    }
}
