use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use super::utils::{base_n_table, decode_base_n};
use crate::download::get_page_text;
use crate::error::DecodeError;

/// Kwik link behind a listed option link.
///
/// Links already on kwik are returned unchanged without a request. Anything
/// else is fetched as an intermediate redirect page and decoded.
pub async fn redirect_url(link: &str, token: &CancellationToken) -> Result<String, anyhow::Error> {
    if is_kwik_url(link) {
        return Ok(link.to_owned());
    }

    let source = get_page_text(None, link, None, token).await?;

    resolve_redirect(&source).context("failed to resolve kwik redirect page")
}

fn is_kwik_url(url: &str) -> bool {
    url::Url::parse(url)
        .map(|url| {
            let has_path = !url.path().trim_start_matches('/').is_empty();
            let is_kwik_host = url
                .host_str()
                .map(|host| host.to_ascii_lowercase().contains("kwik"))
                .unwrap_or(false);

            matches!(url.scheme(), "http" | "https") && is_kwik_host && has_path
        })
        .unwrap_or(false)
}

/// Recovers the kwik link from the HTML of an intermediate redirect page.
///
/// A plainly visible `/f/` link wins. Otherwise the page has to carry the
/// packed call `("<payload>",<n>,"<alphabet>",<offset>,<base>,<n>)`, whose
/// decoded text contains the link. A `/d/` link is rewritten to `/f/`.
pub fn resolve_redirect(html: &str) -> Result<String, DecodeError> {
    static DIRECT_LINK_REGEX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r#"https?://(?:[\w-]+\.)*kwik[\w.-]*/f/[^"'\s<>]+"#).unwrap());
    static CALL_REGEX: Lazy<Regex> = Lazy::new(|| {
        Regex::new(
            r#"\(\s*["']([^"']+)["']\s*,\s*(\d+)\s*,\s*["']([^"']+)["']\s*,\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)\s*\)"#,
        )
        .unwrap()
    });
    static DECODED_LINK_REGEX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r#"(https?://(?:[\w-]+\.)*kwik[\w.-]*)/([df])/([^"'\s<>]+)"#).unwrap());

    if let Some(direct_link) = DIRECT_LINK_REGEX.find(html) {
        return Ok(direct_link.as_str().to_owned());
    }

    let captures = CALL_REGEX.captures(html).ok_or(DecodeError::PatternNotFound)?;
    let payload = &captures[1];
    let alphabet = &captures[3];
    let offset = captures[4].parse::<u64>().map_err(|_| DecodeError::PatternNotFound)?;
    let base = captures[5].parse::<u32>().map_err(|_| DecodeError::PatternNotFound)?;

    let decoded = decode_cipher(payload, alphabet, offset, base)?;
    log::trace!("Decoded redirect page script: {}", decoded);

    let link = DECODED_LINK_REGEX
        .captures(&decoded)
        .ok_or(DecodeError::PatternNotFound)?;

    Ok(format!("{}/f/{}", &link[1], &link[3]))
}

/// Decodes the numeral-substitution cipher of kwik redirect pages.
///
/// The payload is split on `alphabet[base]`. In every segment each alphabet
/// character becomes its index, the result is read as a base-`base` numeral
/// and `offset` is subtracted, giving one byte. The bytes are UTF-8 text.
pub fn decode_cipher(payload: &str, alphabet: &str, offset: u64, base: u32) -> Result<String, DecodeError> {
    if base_n_table(base).is_none() {
        return Err(DecodeError::UnsupportedBase(base));
    }

    let alphabet = alphabet.chars().collect::<Vec<_>>();
    let segments = match alphabet.get(base as usize) {
        Some(delimiter) => payload.split(*delimiter).collect::<Vec<_>>(),
        None => vec![payload],
    };

    let mut bytes = Vec::with_capacity(segments.len());

    for segment in segments.into_iter().filter(|segment| !segment.is_empty()) {
        let mut numeral = String::with_capacity(segment.len());

        for c in segment.chars() {
            match alphabet.iter().position(|symbol| *symbol == c) {
                Some(index) => numeral.push_str(&index.to_string()),
                None => numeral.push(c),
            }
        }

        let value = decode_base_n(&numeral, base).ok_or_else(|| DecodeError::InvalidNumeral {
            segment: segment.to_owned(),
            base,
        })?;
        let byte = value
            .checked_sub(offset)
            .and_then(|code_point| u8::try_from(code_point).ok())
            .ok_or(DecodeError::InvalidCodePoint { value, offset })?;

        bytes.push(byte);
    }

    String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{decode_cipher, redirect_url, resolve_redirect};
    use crate::error::{is_cancelled, DecodeError};

    const FORM_PAYLOAD: &str = "NQxbQNmbQQNbxWWWbQQWbxmmbQxmbQNWbxWWNbQmxbQQNbQQxbNQNbxQWbQmWbxWWNbxWWNbQQmbxWWxbNmQbNxmbNxmbQmmbxWxWbQmxbQmmbNxNbQNWbxWxxbNxmbQNxbNxmbmQQbQQQbNmmbmmmbxWWNbNNxbmNNbQQWbQWxbQmmbxQWbxmmbQQWbQNNbxWWNbQmWbQQNbQNxbNQNbxQWbmmxbmmWbmmQbmQWbxQWbNQmbNQxbQmxbQQxbQQmbxWWmbxWWNbxmmbxWWNbxWxNbQQmbQNNbNQNbxQWbQmWbQmxbQNxbQNxbQNNbQQxbxQWbxmmbQQxbQxmbQQWbQNNbNQNbxQWbQxxbxWWNbQQNbQmmbQNNbQQxbxQWbxmmbxWWQbQxmbQmQbxWWmbQNNbNQNbxQWbxWWNbNxQbQmmbNNNbQQxbxQWbNQmbNQxbNxmbQNmbQQNbxWWWbQQWbNQmb";
    const ANCHOR_PAYLOAD: &str = "IOIuhIOuIOhuvZvuvOvuhZIuOhkukOvuIOIuIhZuhIOuIOhuIOIuvOvuIZhuhZhuhvIuhZZuhZIuIOvuIZOuhZhuhvhuhvhuhIOuhvvuIkOuIhZuIhZuhIZuhhZuhZkuhIZuIvOuvOkuhhIuIhZuhZIuIhZuvZZuvOhuIhvuIhhuvZvuvOOuIZOuIOhuhhIuIOIuIhZuvOvuIOhu";

    fn redirect_page(payload: &str, alphabet: &str, offset: u32, base: u32, quote: char) -> String {
        format!(
            r#"<html><head><title>Redirecting...</title></head><body><script>var _0x1a=["\x72"];eval(function(h,u,n,t,e,r){{r="";for(var i=0,len=h.length;i<len;i++){{}}return decodeURIComponent(escape(r))}}({quote}{payload}{quote},38,{quote}{alphabet}{quote},{offset},{base},31))</script></body></html>"#
        )
    }

    #[test]
    fn test_decode_form_page() {
        let html = redirect_page(FORM_PAYLOAD, "WxNmQbe", 11, 5, '"');
        assert_eq!(resolve_redirect(&html).unwrap(), "https://kwik.cx/f/Xq9Rt2LmZk");
    }

    #[test]
    fn test_decode_single_quoted_page_with_utf8() {
        let html = redirect_page(ANCHOR_PAYLOAD, "ZIvhkOuy", 7, 6, '\'');
        assert_eq!(resolve_redirect(&html).unwrap(), "https://kwik.cx/f/Ab12Cd");

        let decoded = decode_cipher(ANCHOR_PAYLOAD, "ZIvhkOuy", 7, 6).unwrap();
        assert_eq!(decoded, r#"<p>Café</p><a href="https://kwik.cx/f/Ab12Cd">x</a>"#);
    }

    #[test]
    fn test_decode_is_deterministic() {
        let html = redirect_page(FORM_PAYLOAD, "WxNmQbe", 11, 5, '"');
        let first = resolve_redirect(&html);

        for _ in 0..5 {
            assert_eq!(resolve_redirect(&html), first);
        }
    }

    #[test]
    fn test_decode_without_delimiter() {
        // "a1b2" -> "0213" in base 4 = 39, minus 5 = '"'
        assert_eq!(decode_cipher("a1b2", "ab12", 5, 4).unwrap(), "\"");
    }

    #[test]
    fn test_direct_link_wins() {
        let html = format!(
            r#"<a class="redirect" href="https://kwik.cx/f/Zz9yY8">Continue</a>{}"#,
            redirect_page(FORM_PAYLOAD, "WxNmQbe", 11, 5, '"')
        );
        assert_eq!(resolve_redirect(&html).unwrap(), "https://kwik.cx/f/Zz9yY8");
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            resolve_redirect("<html><body>Nothing here</body></html>"),
            Err(DecodeError::PatternNotFound)
        );
        assert_eq!(decode_cipher("abc", "abc", 0, 1), Err(DecodeError::UnsupportedBase(1)));
        assert_eq!(
            decode_cipher("a9", "abcd", 0, 3),
            Err(DecodeError::InvalidNumeral {
                segment: "a9".to_string(),
                base: 3,
            })
        );
        assert_eq!(
            decode_cipher("b", "abcd", 5, 3),
            Err(DecodeError::InvalidCodePoint { value: 1, offset: 5 })
        );

        // Decodes fine but carries no kwik link
        let html = redirect_page("a1b2", "ab12", 5, 4, '"');
        assert_eq!(resolve_redirect(&html), Err(DecodeError::PatternNotFound));
    }

    #[tokio::test]
    async fn test_redirect_page_is_fetched_and_decoded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/AbCd"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(redirect_page(FORM_PAYLOAD, "WxNmQbe", 11, 5, '"')),
            )
            .expect(1)
            .mount(&server)
            .await;

        let token = CancellationToken::new();
        let url = redirect_url(&format!("{}/AbCd", server.uri()), &token).await.unwrap();
        assert_eq!(url, "https://kwik.cx/f/Xq9Rt2LmZk");

        token.cancel();
        let err = redirect_url(&format!("{}/AbCd", server.uri()), &token).await.unwrap_err();
        assert!(is_cancelled(&err));
    }

    #[tokio::test]
    async fn test_kwik_links_are_not_fetched() {
        let token = CancellationToken::new();
        token.cancel();

        let url = redirect_url("https://kwik.cx/f/Xq9Rt2LmZk", &token).await.unwrap();
        assert_eq!(url, "https://kwik.cx/f/Xq9Rt2LmZk");
    }
}
