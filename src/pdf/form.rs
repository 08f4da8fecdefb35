//! AcroForm field discovery and filling
//!
//! Templates are read with lopdf. A field is any page annotation that
//! carries a `/T` name, either on the widget itself or on its `/Parent`.
//! Filling writes `/V` on whichever dictionary holds the name.

use crate::error::{Error, Result};
use crate::source::resolve_template;
use lopdf::{Document, Object, ObjectId, StringFormat};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;

/// Field name to value mapping used when filling a template.
/// `None` is an unset value and fills as an empty string.
pub type FieldValues = HashMap<String, Option<String>>;

/// A named field occurrence on a page
#[derive(Debug, Clone)]
struct FieldSlot {
    /// Object that carries `/T` (the widget or its parent field)
    holder: ObjectId,
    name: String,
}

/// Result of filling a template
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FillSummary {
    /// Number of distinct fields whose value was set
    pub fields_filled: u32,
    /// Fields present in the template but absent from the value mapping
    pub fields_untouched: BTreeSet<String>,
}

/// A filled document ready to be persisted
#[derive(Debug, Clone)]
pub struct FilledForm {
    pub data: Vec<u8>,
    pub summary: FillSummary,
}

/// A parsed fillable PDF template
pub struct FormTemplate {
    source_name: String,
    document: Document,
    slots: Vec<FieldSlot>,
}

impl FormTemplate {
    /// Open a template from a file path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let resolved = resolve_template(path)?;
        Self::load(&resolved.data, resolved.source_name)
    }

    /// Parse a template from bytes
    pub fn load(data: &[u8], source_name: impl Into<String>) -> Result<Self> {
        let source_name = source_name.into();

        if data.len() < 4 || &data[0..4] != b"%PDF" {
            return Err(Error::TemplateMalformed {
                path: source_name,
                reason: "Not a valid PDF file".to_string(),
            });
        }

        let document = Document::load_mem(data).map_err(|e| Error::TemplateMalformed {
            path: source_name.clone(),
            reason: e.to_string(),
        })?;

        if document.get_pages().is_empty() {
            return Err(Error::TemplateMalformed {
                path: source_name,
                reason: "PDF has no pages".to_string(),
            });
        }

        let slots = collect_slots(&document);

        Ok(Self {
            source_name,
            document,
            slots,
        })
    }

    /// Distinct field names exposed by the template
    pub fn field_names(&self) -> BTreeSet<String> {
        self.slots.iter().map(|s| s.name.clone()).collect()
    }

    /// Set every field named in `values` and serialize the document.
    /// Fields absent from `values` keep whatever value they had.
    pub fn fill(mut self, values: &FieldValues) -> Result<FilledForm> {
        let mut filled: HashSet<ObjectId> = HashSet::new();
        let mut names_filled: HashSet<&str> = HashSet::new();
        let mut untouched = BTreeSet::new();

        for slot in &self.slots {
            let Some(value) = values.get(&slot.name) else {
                untouched.insert(slot.name.clone());
                continue;
            };

            names_filled.insert(&slot.name);
            if !filled.insert(slot.holder) {
                continue;
            }

            let text = value.as_deref().unwrap_or("");
            let holder = self
                .document
                .get_object_mut(slot.holder)
                .and_then(Object::as_dict_mut)
                .map_err(|e| Error::TemplateMalformed {
                    path: self.source_name.clone(),
                    reason: format!("Field {} is not a dictionary: {}", slot.name, e),
                })?;
            holder.set("V", encode_text_string(text));
        }

        if !filled.is_empty() {
            mark_need_appearances(&mut self.document);
        }

        let mut data = Vec::new();
        self.document
            .save_to(&mut data)
            .map_err(|e| Error::WriteFailed {
                path: self.source_name.clone(),
                reason: format!("Failed to serialize filled PDF: {}", e),
            })?;

        Ok(FilledForm {
            data,
            summary: FillSummary {
                fields_filled: names_filled.len() as u32,
                fields_untouched: untouched,
            },
        })
    }
}

/// Return the set of field names a template exposes
pub fn extract_fields<P: AsRef<Path>>(template_path: P) -> Result<BTreeSet<String>> {
    Ok(FormTemplate::open(template_path)?.field_names())
}

/// Fill a template on disk and return the filled document bytes
pub fn fill_form<P: AsRef<Path>>(template_path: P, values: &FieldValues) -> Result<FilledForm> {
    FormTemplate::open(template_path)?.fill(values)
}

/// Read the current `/V` of every named field in a PDF
pub fn extract_field_values(data: &[u8]) -> Result<BTreeMap<String, String>> {
    let template = FormTemplate::load(data, "<memory>")?;
    let doc = &template.document;

    let mut values = BTreeMap::new();
    for slot in &template.slots {
        let value = doc
            .get_dictionary(slot.holder)
            .and_then(|d| d.get(b"V"))
            .ok()
            .and_then(|v| doc.dereference(v).ok())
            .and_then(|(_, v)| match v {
                Object::String(bytes, _) => Some(decode_text_string(bytes)),
                Object::Name(name) => Some(String::from_utf8_lossy(name).into_owned()),
                _ => None,
            });
        if let Some(value) = value {
            values.insert(slot.name.clone(), value);
        }
    }

    Ok(values)
}

fn collect_slots(doc: &Document) -> Vec<FieldSlot> {
    let mut slots = Vec::new();

    for page_id in doc.get_pages().into_values() {
        let Ok(page) = doc.get_dictionary(page_id) else {
            continue;
        };
        let annots = match page.get(b"Annots").and_then(|a| doc.dereference(a)) {
            Ok((_, Object::Array(annots))) => annots,
            _ => continue,
        };

        for entry in annots {
            // Widget annotations are always indirect objects
            let Ok(annot_id) = entry.as_reference() else {
                continue;
            };
            if let Some((holder, name)) = field_name_of(doc, annot_id) {
                slots.push(FieldSlot { holder, name });
            }
        }
    }

    slots
}

fn field_name_of(doc: &Document, annot_id: ObjectId) -> Option<(ObjectId, String)> {
    let annot = doc.get_dictionary(annot_id).ok()?;

    if let Ok(raw) = annot.get(b"T") {
        return decode_name(doc, raw).map(|name| (annot_id, name));
    }

    let parent_id = annot.get(b"Parent").and_then(Object::as_reference).ok()?;
    let parent = doc.get_dictionary(parent_id).ok()?;
    let raw = parent.get(b"T").ok()?;
    decode_name(doc, raw).map(|name| (parent_id, name))
}

/// lopdf hands back string contents with the `( )` / `< >` delimiters
/// already removed; only the text-string encoding remains to undo.
fn decode_name(doc: &Document, raw: &Object) -> Option<String> {
    let (_, obj) = doc.dereference(raw).ok()?;
    let name = match obj {
        Object::String(bytes, _) => decode_text_string(bytes),
        _ => return None,
    };
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Decode a PDF text string: UTF-16BE with BOM, else UTF-8, else Latin-1
fn decode_text_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn encode_text_string(value: &str) -> Object {
    if value.is_ascii() {
        return Object::String(value.as_bytes().to_vec(), StringFormat::Literal);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in value.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

/// Ask viewers to regenerate field appearances from the new values
fn mark_need_appearances(doc: &mut Document) {
    let Ok(root_id) = doc.trailer.get(b"Root").and_then(Object::as_reference) else {
        return;
    };
    let acroform = match doc.get_dictionary(root_id).and_then(|c| c.get(b"AcroForm")) {
        Ok(obj) => obj.clone(),
        Err(_) => return,
    };

    match acroform {
        Object::Reference(id) => {
            if let Ok(form) = doc.get_object_mut(id).and_then(Object::as_dict_mut) {
                form.set("NeedAppearances", true);
            }
        }
        Object::Dictionary(_) => {
            if let Ok(form) = doc
                .get_object_mut(root_id)
                .and_then(Object::as_dict_mut)
                .and_then(|c| c.get_mut(b"AcroForm"))
                .and_then(Object::as_dict_mut)
            {
                form.set("NeedAppearances", true);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    /// Build a PDF whose pages carry text widgets with the given names and values
    fn build_form_pdf(pages: &[&[(&str, Option<&str>)]]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids: Vec<Object> = Vec::new();
        let mut fields: Vec<Object> = Vec::new();

        for page_fields in pages {
            let page_id = doc.new_object_id();
            let mut annots: Vec<Object> = Vec::new();
            for (i, (name, value)) in page_fields.iter().enumerate() {
                let y = 700 - (i as i64) * 40;
                let mut widget = dictionary! {
                    "Type" => "Annot",
                    "Subtype" => "Widget",
                    "FT" => "Tx",
                    "T" => Object::string_literal(*name),
                    "Rect" => vec![50.into(), y.into(), 300.into(), (y + 20).into()],
                    "P" => page_id,
                };
                if let Some(v) = value {
                    widget.set("V", Object::string_literal(*v));
                }
                let id = doc.add_object(widget);
                annots.push(id.into());
                fields.push(id.into());
            }
            doc.objects.insert(
                page_id,
                Object::Dictionary(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
                    "Annots" => annots,
                }),
            );
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let acroform_id = doc.add_object(dictionary! { "Fields" => fields });
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
            "AcroForm" => acroform_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).expect("failed to save test PDF");
        buf
    }

    fn values(pairs: &[(&str, Option<&str>)]) -> FieldValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(|s| s.to_string())))
            .collect()
    }

    #[test]
    fn test_invalid_pdf_detection() {
        let result = FormTemplate::load(b"not a pdf", "x.pdf");
        assert!(matches!(result, Err(Error::TemplateMalformed { .. })));
    }

    #[test]
    fn test_truncated_pdf_is_malformed() {
        let result = FormTemplate::load(b"%PDF-1.5\n%garbage", "x.pdf");
        assert!(matches!(result, Err(Error::TemplateMalformed { .. })));
    }

    #[test]
    fn test_field_names_across_pages() {
        let pdf = build_form_pdf(&[&[("Name", None), ("Street", None)], &[("City", None)]]);
        let template = FormTemplate::load(&pdf, "t.pdf").unwrap();

        let names: Vec<String> = template.field_names().into_iter().collect();
        assert_eq!(names, vec!["City", "Name", "Street"]);
    }

    #[test]
    fn test_empty_names_are_ignored() {
        let pdf = build_form_pdf(&[&[("", None), ("Name", None)]]);
        let template = FormTemplate::load(&pdf, "t.pdf").unwrap();
        assert_eq!(template.field_names().len(), 1);
    }

    #[test]
    fn test_page_without_fields_has_no_names() {
        let pdf = build_form_pdf(&[&[]]);
        let template = FormTemplate::load(&pdf, "t.pdf").unwrap();
        assert!(template.field_names().is_empty());
    }

    #[test]
    fn test_fill_sets_mapped_and_keeps_unmapped() {
        let pdf = build_form_pdf(&[&[("Name", None), ("Note", Some("keep me"))]]);
        let template = FormTemplate::load(&pdf, "t.pdf").unwrap();

        let filled = template.fill(&values(&[("Name", Some("Acme"))])).unwrap();
        assert_eq!(filled.summary.fields_filled, 1);
        assert!(filled.summary.fields_untouched.contains("Note"));

        let read_back = extract_field_values(&filled.data).unwrap();
        assert_eq!(read_back.get("Name").map(String::as_str), Some("Acme"));
        assert_eq!(read_back.get("Note").map(String::as_str), Some("keep me"));
    }

    #[test]
    fn test_repeated_widget_name_counts_once() {
        let pdf = build_form_pdf(&[&[("Name", None)], &[("Name", None), ("Note", None)]]);
        let template = FormTemplate::load(&pdf, "t.pdf").unwrap();
        assert_eq!(template.field_names().len(), 2);

        let filled = template.fill(&values(&[("Name", Some("Acme"))])).unwrap();
        assert_eq!(filled.summary.fields_filled, 1);

        let doc = Document::load_mem(&filled.data).unwrap();
        let written = doc
            .objects
            .values()
            .filter_map(|o| o.as_dict().ok())
            .filter(|d| matches!(d.get(b"V"), Ok(Object::String(v, _)) if v == b"Acme"))
            .count();
        assert_eq!(written, 2);
    }

    #[test]
    fn test_unset_value_fills_empty_string() {
        let pdf = build_form_pdf(&[&[("Name", Some("old"))]]);
        let template = FormTemplate::load(&pdf, "t.pdf").unwrap();

        let filled = template.fill(&values(&[("Name", None)])).unwrap();
        let read_back = extract_field_values(&filled.data).unwrap();
        assert_eq!(read_back.get("Name").map(String::as_str), Some(""));
    }

    #[test]
    fn test_non_ascii_round_trip() {
        let pdf = build_form_pdf(&[&[("Straße", None)]]);
        let template = FormTemplate::load(&pdf, "t.pdf").unwrap();
        assert!(template.field_names().contains("Straße"));

        let filled = template
            .fill(&values(&[("Straße", Some("Müllerweg 3"))]))
            .unwrap();
        let read_back = extract_field_values(&filled.data).unwrap();
        assert_eq!(read_back.get("Straße").map(String::as_str), Some("Müllerweg 3"));
    }

    #[test]
    fn test_fill_preserves_page_count() {
        let pdf = build_form_pdf(&[&[("A", None)], &[], &[("B", None)]]);
        let template = FormTemplate::load(&pdf, "t.pdf").unwrap();
        let filled = template.fill(&values(&[("A", Some("1"))])).unwrap();

        let doc = Document::load_mem(&filled.data).unwrap();
        assert_eq!(doc.get_pages().len(), 3);
    }

    #[test]
    fn test_fill_marks_need_appearances() {
        let pdf = build_form_pdf(&[&[("A", None)]]);
        let filled = FormTemplate::load(&pdf, "t.pdf")
            .unwrap()
            .fill(&values(&[("A", Some("1"))]))
            .unwrap();

        let doc = Document::load_mem(&filled.data).unwrap();
        let root = doc.trailer.get(b"Root").and_then(Object::as_reference).unwrap();
        let acroform_id = doc
            .get_dictionary(root)
            .and_then(|c| c.get(b"AcroForm"))
            .and_then(Object::as_reference)
            .unwrap();
        let flag = doc
            .get_dictionary(acroform_id)
            .and_then(|f| f.get(b"NeedAppearances"))
            .and_then(Object::as_bool)
            .unwrap();
        assert!(flag);
    }

    #[test]
    fn test_kid_widget_inherits_parent_name() {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let page_id = doc.new_object_id();
        let parent_id = doc.add_object(dictionary! {
            "FT" => "Tx",
            "T" => Object::string_literal("Company"),
        });
        let widget_id = doc.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Widget",
            "Parent" => parent_id,
            "Rect" => vec![0.into(), 0.into(), 10.into(), 10.into()],
        });
        doc.objects.insert(
            page_id,
            Object::Dictionary(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
                "Annots" => vec![Object::from(widget_id)],
            }),
        );
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::from(page_id)],
                "Count" => 1i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        let mut pdf = Vec::new();
        doc.save_to(&mut pdf).unwrap();

        let template = FormTemplate::load(&pdf, "t.pdf").unwrap();
        assert!(template.field_names().contains("Company"));

        let filled = template.fill(&values(&[("Company", Some("Acme"))])).unwrap();
        let read_back = extract_field_values(&filled.data).unwrap();
        assert_eq!(read_back.get("Company").map(String::as_str), Some("Acme"));
    }

    #[test]
    fn test_extract_fields_missing_file() {
        let result = extract_fields("/nonexistent/template.pdf");
        assert!(matches!(result, Err(Error::TemplateNotFound { .. })));
    }

    #[test]
    fn test_decode_text_string_utf16() {
        let bytes = [0xFE, 0xFF, 0x00, 0x47, 0x00, 0xE4];
        assert_eq!(decode_text_string(&bytes), "Gä");
    }
}
