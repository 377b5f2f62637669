//! Viewer-request path rewriting
//!
//! Each content bucket is published under `/<bucket>/` on the distribution
//! but stores its objects at the root, so the edge strips the prefix before
//! the request reaches the origin.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Runtime the edge function is published for
pub const FUNCTION_RUNTIME: &str = "cloudfront-js-1.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRewrite {
    bucket: String,
}

impl PathRewrite {
    pub fn strip_bucket_prefix(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
        }
    }

    /// `/<bucket>/`
    pub fn prefix(&self) -> String {
        format!("/{}/", self.bucket)
    }

    /// Strip one leading `/<bucket>/`, keeping the slash. Paths without the
    /// prefix pass through unchanged.
    pub fn rewrite<'a>(&self, uri: &'a str) -> Cow<'a, str> {
        match uri.strip_prefix(self.prefix().as_str()) {
            Some(rest) => Cow::Owned(format!("/{}", rest)),
            None => Cow::Borrowed(uri),
        }
    }

    /// Source of the edge function doing the same rewrite
    pub fn function_code(&self) -> String {
        format!(
            r#"function handler(event) {{
    var request = event.request;
    request.uri = request.uri.replace(/^\/{}\//, '/');
    return request;
}}
"#,
            escape_regex(&self.bucket)
        )
    }
}

/// Escape for a JavaScript regex literal, where `/` is also a delimiter
fn escape_regex(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if "\\^$.|?*+()[]{}/".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_bucket_prefix() {
        let rewrite = PathRewrite::strip_bucket_prefix("nft-media");
        assert_eq!(rewrite.rewrite("/nft-media/foo"), "/foo");
        assert_eq!(rewrite.rewrite("/nft-media/a/b.png"), "/a/b.png");
        assert_eq!(rewrite.rewrite("/nft-media/"), "/");
    }

    #[test]
    fn test_idempotent_on_rewritten_paths() {
        let rewrite = PathRewrite::strip_bucket_prefix("nft-media");
        let once = rewrite.rewrite("/nft-media/foo").into_owned();
        assert_eq!(rewrite.rewrite(&once), once);
        assert_eq!(rewrite.rewrite("/foo"), "/foo");
        // prefix match is anchored and needs the trailing slash
        assert_eq!(rewrite.rewrite("/nft-media"), "/nft-media");
        assert_eq!(rewrite.rewrite("/x/nft-media/foo"), "/x/nft-media/foo");
        assert!(matches!(rewrite.rewrite("/foo"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_function_code_escapes_bucket() {
        let code = PathRewrite::strip_bucket_prefix("nft-media").function_code();
        assert!(code.contains(r"replace(/^\/nft-media\//, '/')"));

        let dotted = PathRewrite::strip_bucket_prefix("media.v2").function_code();
        assert!(dotted.contains(r"/^\/media\.v2\//"));
    }
}
