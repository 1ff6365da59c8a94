//! Decoder for opaque binary result buffers.
//!
//! Older server builds answer folder queries with a packed binary buffer
//! instead of row data. The layout is undocumented; this decoder recovers
//! items structurally: optional zlib body, UTF-16LE text, then a token
//! scan where long all-digit runs delimit one item from the next.

use std::borrow::Cow;
use std::io::Read;

use flate2::read::ZlibDecoder;
use lazy_static::lazy_static;
use log::{debug, trace};
use regex::Regex;

use crate::types::{MediaType, TreeItem};

/// Tokens of at least this many digits are treated as item identifiers.
/// Document numbers in practice are seven digits or longer; shorter digit
/// runs occur inside names and dates.
const MIN_ID_DIGITS: usize = 7;

/// Application names the server uses for container objects.
const FOLDER_APPS: [&str; 3] = ["FOLDER", "DEF_PROF", "SAVED_SEARCHES"];

lazy_static! {
    /// Everything outside word characters, whitespace, dots and dashes is
    /// binary residue from the packed layout.
    static ref RESIDUE: Regex = Regex::new(r"[^\w\s\.\-]").unwrap();
}

/// Decode a raw result buffer into tree items.
///
/// Never fails: a buffer that yields no recognisable items decodes to an
/// empty list.
pub fn decode(raw: &[u8]) -> Vec<TreeItem> {
    if raw.is_empty() {
        return Vec::new();
    }
    let body = inflate_if_compressed(raw);
    let text = decode_text(&body);
    let cleaned = RESIDUE.replace_all(&text, " ");

    let mut items = Vec::new();
    let mut chunk: Vec<&str> = Vec::new();
    for token in cleaned.split_whitespace() {
        if is_item_id(token) {
            if let Some(item) = classify_chunk(&chunk) {
                items.push(item);
            }
            chunk.clear();
        } else if chunk.is_empty() {
            // Residue before the first identifier carries no item.
            continue;
        }
        chunk.push(token);
    }
    if let Some(item) = classify_chunk(&chunk) {
        items.push(item);
    }
    debug!("decoded {} items from a {}-byte buffer", items.len(), raw.len());
    items
}

/// Zlib magic sits at byte offsets 8-9 when the body is compressed; the
/// first eight bytes are an uncompressed header.
fn inflate_if_compressed(raw: &[u8]) -> Cow<'_, [u8]> {
    if raw.len() > 9 && raw[8] == 0x78 && raw[9] == 0x9c {
        let mut out = Vec::new();
        match ZlibDecoder::new(&raw[8..]).read_to_end(&mut out) {
            Ok(_) => return Cow::Owned(out),
            Err(e) => trace!("zlib inflate failed, using raw bytes: {e}"),
        }
    }
    Cow::Borrowed(raw)
}

/// UTF-16LE first; buffers that fail strict decoding fall back to lossy
/// UTF-8.
fn decode_text(body: &[u8]) -> String {
    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    match String::from_utf16(&units) {
        Ok(text) => text,
        Err(_) => String::from_utf8_lossy(body).into_owned(),
    }
}

fn is_item_id(token: &str) -> bool {
    token.len() >= MIN_ID_DIGITS && token.bytes().all(|b| b.is_ascii_digit())
}

fn is_flag(token: &str) -> bool {
    matches!(token, "N" | "D" | "F")
}

fn is_folder_app(token: &str) -> bool {
    FOLDER_APPS.contains(&token)
}

fn extension_of(token: &str) -> Option<&str> {
    let (stem, ext) = token.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || !ext.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext)
}

pub(crate) fn media_for_extension(ext: &str) -> MediaType {
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" | "png" | "gif" | "bmp" | "tif" | "tiff" | "webp" => MediaType::Image,
        "mp4" | "mov" | "avi" | "wmv" | "mkv" | "webm" => MediaType::Video,
        "pdf" | "doc" | "docx" | "txt" | "xls" | "xlsx" | "ppt" | "pptx" => MediaType::Pdf,
        _ => MediaType::Pending,
    }
}

/// Turn one `[id, token...]` chunk into an item, or `None` when it does
/// not look like one.
fn classify_chunk(chunk: &[&str]) -> Option<TreeItem> {
    let (id, rest) = chunk.split_first()?;
    if !is_item_id(id) {
        return None;
    }

    let has_folder_flag = rest.iter().any(|t| *t == "F");
    let has_file_flag = rest.iter().any(|t| *t == "N");
    let has_folder_app = rest.iter().any(|t| is_folder_app(t));
    let extension = rest.iter().rev().find_map(|t| extension_of(t));

    let name = rest
        .iter()
        .filter(|t| !is_flag(t) && !is_folder_app(t))
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    if name.is_empty() {
        return None;
    }

    // Flag precedence: explicit folder, explicit file, then the container
    // application names, then a file extension; unmarked names are folders.
    if has_folder_flag || (!has_file_flag && has_folder_app) {
        return Some(TreeItem::folder(id.to_string(), name));
    }
    if has_file_flag || extension.is_some() {
        let media = extension.map(media_for_extension).unwrap_or(MediaType::Pending);
        return Some(TreeItem::file(id.to_string(), name, media));
    }
    Some(TreeItem::folder(id.to_string(), name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ItemKind;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn utf16le(text: &str) -> Vec<u8> {
        text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    #[test]
    fn splits_items_on_long_digit_runs() {
        let items = decode(&utf16le("17712345 MyDocument.pdf N 17712399 OtherFolder F"));
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "17712345");
        assert_eq!(items[0].name, "MyDocument.pdf");
        assert_eq!(items[0].kind, ItemKind::File);
        assert_eq!(items[0].media_type, Some(MediaType::Pdf));
        assert_eq!(items[1].id, "17712399");
        assert_eq!(items[1].name, "OtherFolder");
        assert_eq!(items[1].kind, ItemKind::Folder);
    }

    #[test]
    fn short_digit_runs_stay_in_names() {
        let items = decode(&utf16le("17712345 Budget 2024 Q3.xlsx N"));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Budget 2024 Q3.xlsx");
        assert_eq!(items[0].media_type, Some(MediaType::Pdf));
    }

    #[test]
    fn folder_app_names_mark_folders() {
        let items = decode(&utf16le("17710001 Contracts FOLDER 17710002 holiday.jpg"));
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].kind, ItemKind::Folder);
        assert_eq!(items[0].name, "Contracts");
        assert_eq!(items[1].kind, ItemKind::File);
        assert_eq!(items[1].media_type, Some(MediaType::Image));
    }

    #[test]
    fn unknown_extensions_stay_pending() {
        let items = decode(&utf16le("17710003 model.dwg N"));
        assert_eq!(items[0].media_type, Some(MediaType::Pending));
    }

    #[test]
    fn residue_before_first_id_is_dropped() {
        let items = decode(&utf16le("x02 hdr 17710004 Plans F"));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Plans");
    }

    #[test]
    fn binary_residue_is_cleaned() {
        let items = decode(&utf16le("17710005 Report\u{1}\u{2}*final.pdf N"));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Report final.pdf");
        assert_eq!(items[0].media_type, Some(MediaType::Pdf));
    }

    #[test]
    fn chunks_without_names_are_skipped() {
        let items = decode(&utf16le("17710006 N F 17710007 Real.mp4 N"));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Real.mp4");
        assert_eq!(items[0].media_type, Some(MediaType::Video));
    }

    #[test]
    fn zlib_bodies_are_inflated() {
        let payload = utf16le("17710008 Archive.webm N");
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&payload).unwrap();
        let compressed = enc.finish().unwrap();
        let mut raw = vec![0u8; 8];
        raw.extend_from_slice(&compressed);
        let items = decode(&raw);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Archive.webm");
        assert_eq!(items[0].media_type, Some(MediaType::Video));
    }

    #[test]
    fn empty_and_garbage_buffers_decode_to_nothing() {
        assert!(decode(&[]).is_empty());
        assert!(decode(&[0xff, 0xfe, 0x00]).is_empty());
        assert!(decode(&utf16le("no identifiers here")).is_empty());
    }
}
