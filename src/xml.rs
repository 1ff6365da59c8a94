//! Find-based XML extraction helpers.
//!
//! The DMSvr responses are small and flat; tag prefixes vary between
//! bindings (`<resultCode>`, `<a:resultCode>`, ...), so every helper here
//! matches on the *local* tag name regardless of namespace prefix.

/// Escape a string for embedding in XML text or attribute content.
pub fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Find the next opening tag with the given local name starting at `from`.
/// Returns (tag_start, name_end, full_tag_name) where `full_tag_name`
/// includes any prefix.
fn find_open(xml: &str, local: &str, from: usize) -> Option<(usize, usize, String)> {
    let bytes = xml.as_bytes();
    let mut pos = from;
    while let Some(rel) = xml[pos..].find('<') {
        let start = pos + rel;
        let name_start = start + 1;
        if bytes.get(name_start) == Some(&b'/') || bytes.get(name_start) == Some(&b'?') {
            pos = name_start;
            continue;
        }
        let mut end = name_start;
        while end < xml.len() {
            let c = bytes[end];
            if c == b' ' || c == b'>' || c == b'/' || c == b'\t' || c == b'\r' || c == b'\n' {
                break;
            }
            end += 1;
        }
        let name = &xml[name_start..end];
        let matches = name == local
            || name
                .rsplit_once(':')
                .map(|(_, l)| l == local)
                .unwrap_or(false);
        if matches {
            return Some((start, end, name.to_string()));
        }
        pos = name_start;
    }
    None
}

/// Extract the text content of the first element with the given local name.
/// Missing elements yield `None`; self-closing ones an empty string.
pub fn xml_text(xml: &str, local: &str) -> Option<String> {
    xml_text_from(xml, local, 0).map(|(text, _)| text)
}

fn xml_text_from(xml: &str, local: &str, from: usize) -> Option<(String, usize)> {
    let (start, name_end, name) = find_open(xml, local, from)?;
    let gt = xml[name_end..].find('>').map(|p| name_end + p)?;
    if xml.as_bytes().get(gt.wrapping_sub(1)) == Some(&b'/') {
        // Self-closing: no content; report empty and keep scanning possible.
        return Some((String::new(), gt + 1));
    }
    let content_start = gt + 1;
    let close = format!("</{}>", name);
    let end = xml[content_start..].find(&close).map(|p| content_start + p)?;
    let _ = start;
    Some((xml[content_start..end].to_string(), end + close.len()))
}

/// Extract the text content of every element with the given local name.
pub fn xml_text_all(xml: &str, local: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut pos = 0;
    while let Some((text, next)) = xml_text_from(xml, local, pos) {
        out.push(text);
        pos = next;
    }
    out
}

/// Extract a whole element block (tags included) for the first element with
/// the given local name.
pub fn xml_block(xml: &str, local: &str) -> Option<String> {
    xml_block_from(xml, local, 0).map(|(block, _)| block)
}

fn xml_block_from(xml: &str, local: &str, from: usize) -> Option<(String, usize)> {
    let (start, name_end, name) = find_open(xml, local, from)?;
    let gt = xml[name_end..].find('>').map(|p| name_end + p)?;
    if xml.as_bytes().get(gt.wrapping_sub(1)) == Some(&b'/') {
        return Some((xml[start..gt + 1].to_string(), gt + 1));
    }
    let close = format!("</{}>", name);
    let end = xml[gt..].find(&close).map(|p| gt + p + close.len())?;
    Some((xml[start..end].to_string(), end))
}

/// Extract every element block with the given local name.
pub fn xml_blocks(xml: &str, local: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut pos = 0;
    while let Some((block, next)) = xml_block_from(xml, local, pos) {
        out.push(block);
        pos = next;
    }
    out
}

/// Extract an attribute value from an element block's opening tag.
pub fn xml_attr(block: &str, attr: &str) -> Option<String> {
    let tag_end = block.find('>')?;
    let tag = &block[..tag_end];
    let needle = format!("{}=\"", attr);
    let start = tag.find(&needle)? + needle.len();
    let end = tag[start..].find('"')? + start;
    Some(tag[start..end].to_string())
}

/// Undo the escaping applied by [`xml_escape`].
pub fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
