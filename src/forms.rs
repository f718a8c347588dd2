//! Form Readback - filled field values from a returned PDF
//!
//! Values come off the widget annotations of each page, keyed by `/T`.
//! Choice values may be names rather than strings.

use lopdf::{Dictionary, Document, Object};
use std::collections::BTreeMap;

use crate::pagedata::Field;
use crate::pdftext::TextError;

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

/// PDF text strings are either UTF-16BE with a byte order mark or a
/// single-byte encoding, read here as Latin-1.
pub fn decode_text_string(bytes: &[u8]) -> String {
    match bytes {
        [0xfe, 0xff, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

fn text_of(obj: &Object) -> Option<String> {
    match obj {
        Object::String(bytes, _) => Some(decode_text_string(bytes)),
        Object::Name(name) => Some(String::from_utf8_lossy(name).into_owned()),
        _ => None,
    }
}

fn widget_field(doc: &Document, annot: &Dictionary) -> Option<Field> {
    let key = annot.get(b"T").ok().and_then(|t| resolve(doc, t)).and_then(text_of)?;
    let value = annot
        .get(b"V")
        .ok()
        .and_then(|v| resolve(doc, v))
        .and_then(text_of)
        .unwrap_or_default();
    Some(Field { key, value })
}

/// Named field values per page (1-based), in annotation order.
pub fn read_document_fields(doc: &Document) -> BTreeMap<u32, Vec<Field>> {
    let mut pages = BTreeMap::new();
    for (number, page_id) in doc.get_pages() {
        let mut fields = Vec::new();
        let annots = doc
            .get_dictionary(page_id)
            .ok()
            .and_then(|page| page.get(b"Annots").ok())
            .and_then(|a| resolve(doc, a))
            .and_then(|a| a.as_array().ok());
        for annot in annots.into_iter().flatten() {
            let dict = resolve(doc, annot).and_then(|a| a.as_dict().ok());
            if let Some(field) = dict.and_then(|d| widget_field(doc, d)) {
                fields.push(field);
            }
        }
        pages.insert(number, fields);
    }
    pages
}

pub fn read_fields(bytes: &[u8]) -> Result<BTreeMap<u32, Vec<Field>>, TextError> {
    let doc = Document::load_mem(bytes).map_err(TextError::Load)?;
    Ok(read_document_fields(&doc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf16_text_string() {
        assert_eq!(decode_text_string(&[0xfe, 0xff, 0x00, 0x41, 0x00, 0xe9]), "A\u{e9}");
    }

    #[test]
    fn test_single_byte_text_string() {
        assert_eq!(decode_text_string(b"page-ok"), "page-ok");
        assert_eq!(decode_text_string(&[0x41, 0xe9]), "A\u{e9}");
    }

    #[test]
    fn test_name_values_are_read() {
        assert_eq!(text_of(&Object::Name(b"B".to_vec())), Some("B".into()));
        assert_eq!(text_of(&Object::Integer(3)), None);
    }
}
