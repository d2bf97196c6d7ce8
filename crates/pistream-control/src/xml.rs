//! Reader for the host's flat XML responses.
//!
//! Every response is `<root status_code=".." status_message="..">` with
//! leaf elements and, for the app list, one level of `<App>` blocks. That is
//! all this understands.

use pistream_core::ControlError;

#[derive(Debug, Clone)]
pub struct XmlResponse {
    pub status_code: u32,
    pub status_message: String,
    pub root: Element,
}

/// Body of one element.
#[derive(Debug, Clone, Default)]
pub struct Element {
    body: String,
}

impl XmlResponse {
    pub fn parse(text: &str) -> Result<Self, ControlError> {
        let mut rest = text.trim_start();
        // prolog and comments
        while rest.starts_with("<?") || rest.starts_with("<!--") {
            let close = if rest.starts_with("<?") { "?>" } else { "-->" };
            let end = rest
                .find(close)
                .ok_or_else(|| ControlError::protocol("unterminated XML prolog"))?;
            rest = rest[end + close.len()..].trim_start();
        }

        let open_end = rest
            .find('>')
            .ok_or_else(|| ControlError::protocol("missing root element"))?;
        let open = rest
            .strip_prefix('<')
            .map(|r| &r[..open_end - 1])
            .ok_or_else(|| ControlError::protocol("missing root element"))?;
        let name = open.split_whitespace().next().unwrap_or_default().trim_end_matches('/');
        if name != "root" {
            return Err(ControlError::protocol(format!("unexpected root <{name}>")));
        }

        let status_code = attribute(open, "status_code")
            .ok_or_else(|| ControlError::protocol("root has no status_code"))?
            .parse()
            .map_err(|_| ControlError::protocol("status_code is not a number"))?;
        let status_message = attribute(open, "status_message").map(unescape).unwrap_or_default();

        let body = if open.ends_with('/') {
            String::new()
        } else {
            let inner = &rest[open_end + 1..];
            let end = inner.rfind("</root>").unwrap_or(inner.len());
            inner[..end].to_owned()
        };

        Ok(Self { status_code, status_message, root: Element { body } })
    }

    /// Text of the first `<name>` anywhere in the document.
    pub fn tag(&self, name: &str) -> Option<String> {
        self.root.tag(name)
    }
}

impl Element {
    pub fn tag(&self, name: &str) -> Option<String> {
        let (start, end) = find_element(&self.body, name, 0)?;
        Some(unescape(self.body[start..end].trim()))
    }

    /// Every `<name>` block at any depth, in document order.
    pub fn children(&self, name: &str) -> Vec<Element> {
        let mut out = Vec::new();
        let mut from = 0;
        while let Some((start, end)) = find_element(&self.body, name, from) {
            out.push(Element { body: self.body[start..end].to_owned() });
            from = end;
        }
        out
    }
}

/// Byte range of the contents of the next `<name>..</name>` at or after `from`.
fn find_element(body: &str, name: &str, from: usize) -> Option<(usize, usize)> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");
    let start = body[from..].find(&open)? + from + open.len();
    let end = body[start..].find(&close)? + start;
    Some((start, end))
}

fn attribute<'a>(open_tag: &'a str, name: &str) -> Option<&'a str> {
    let key = format!("{name}=");
    let mut search = open_tag;
    loop {
        let idx = search.find(&key)?;
        // must be a whole attribute name
        let preceded_ok = idx == 0 || search.as_bytes()[idx - 1].is_ascii_whitespace();
        let after = &search[idx + key.len()..];
        if preceded_ok {
            let quote = after.chars().next()?;
            if quote != '"' && quote != '\'' {
                return None;
            }
            let value = &after[1..];
            let end = value.find(quote)?;
            return Some(&value[..end]);
        }
        search = after;
    }
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
