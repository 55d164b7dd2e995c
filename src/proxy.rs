use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::Serialize;
use url::Url;

pub const DEFAULT_PROXY: &str = "https://dl.gst-hunter.workers.dev/";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StreamTarget<'a> {
    direct_url: &'a str,
    referer: &'a str,
}

/// Streaming proxy that fetches a direct url with the `Referer` the media
/// host expects.
#[derive(Debug, Clone)]
pub struct StreamProxy {
    base: Url,
}

impl StreamProxy {
    pub fn new(base: Url) -> Self {
        StreamProxy { base }
    }

    /// `<base>/stream/<base64url(JSON {directUrl, referer})>`, without padding.
    pub fn stream_url(&self, direct_url: &str, referer: &str) -> String {
        let target = StreamTarget { direct_url, referer };
        // Serializing two string fields cannot fail
        let json = serde_json::to_vec(&target).unwrap_or_default();

        format!(
            "{}/stream/{}",
            self.base.as_str().trim_end_matches('/'),
            URL_SAFE_NO_PAD.encode(json)
        )
    }
}
