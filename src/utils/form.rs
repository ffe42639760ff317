//! Form-urlencoded helpers shared by the endpoint handlers.

use std::collections::HashMap;

/// Parse a form-urlencoded body or query string into a parameter map.
///
/// Later occurrences of a key overwrite earlier ones. Malformed
/// percent-escapes are kept verbatim rather than rejected, so that schema
/// validation can report the offending parameter instead of the transport
/// layer.
pub fn parse_form_urlencoded(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for pair in input.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode_component(key);
        if key.is_empty() {
            continue;
        }
        params.insert(key, decode_component(value));
    }
    params
}

fn decode_component(raw: &str) -> String {
    let plus_decoded = raw.replace('+', " ");
    match urlencoding::decode(&plus_decoded) {
        Ok(value) => value.into_owned(),
        Err(_) => plus_decoded,
    }
}

/// Append url-encoded parameters to a base URL, either as the fragment or as
/// (additional) query parameters.
pub fn append_params(base: &str, params: &[(&str, String)], fragment: bool) -> String {
    let encoded = params
        .iter()
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&");
    let separator = if fragment {
        "#"
    } else if base.contains('?') {
        "&"
    } else {
        "?"
    };
    format!("{base}{separator}{encoded}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_pairs() {
        let params = parse_form_urlencoded("response_type=code&client_id=c1&scope=openid");
        assert_eq!(params.get("response_type").unwrap(), "code");
        assert_eq!(params.get("client_id").unwrap(), "c1");
        assert_eq!(params.get("scope").unwrap(), "openid");
    }

    #[test]
    fn test_parse_percent_and_plus_decoding() {
        let params = parse_form_urlencoded("redirect_uri=https%3A%2F%2Frp%2Fcb&scope=openid+profile");
        assert_eq!(params.get("redirect_uri").unwrap(), "https://rp/cb");
        assert_eq!(params.get("scope").unwrap(), "openid profile");
    }

    #[test]
    fn test_parse_skips_empty_segments() {
        let params = parse_form_urlencoded("&a=1&&b=2&");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_parse_value_less_pair() {
        let params = parse_form_urlencoded("state");
        assert_eq!(params.get("state").unwrap(), "");
    }

    #[test]
    fn test_append_query_params() {
        let url = append_params("https://rp/cb", &[("code", "abc".to_owned()), ("state", "x y".to_owned())], false);
        assert_eq!(url, "https://rp/cb?code=abc&state=x%20y");
    }

    #[test]
    fn test_append_query_params_to_url_with_query() {
        let url = append_params("https://rp/cb?keep=1", &[("code", "abc".to_owned())], false);
        assert_eq!(url, "https://rp/cb?keep=1&code=abc");
    }

    #[test]
    fn test_append_fragment_params() {
        let url = append_params("https://rp/cb", &[("id_token", "jwt".to_owned())], true);
        assert_eq!(url, "https://rp/cb#id_token=jwt");
    }
}
