//! Getting record lists out of raw API responses.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use serde_json::Value;

use crate::cell::Cell;
use crate::error::{HousekeepingError, Result};

/// Child elements that always form a list, even when only one is present.
///
/// The JSON flavour of the REST API always sends these as arrays; keeping the
/// XML flavour in step gives both the same flattened columns and row counts.
pub const LIST_ELEMENTS: &[&str] = &[
    "capability",
    "tag",
    "view",
    "connection",
    "granteeCapabilities",
];

/// Descends through single-key objects until the record list is reached.
///
/// GraphQL answers `{"data": {"databaseServers": [...]}}`, so two levels are
/// skipped there. Anything with more than one key at some level (usually
/// `data` next to `errors`) is rejected.
pub fn unpack_response(response: Value) -> Result<Vec<Value>> {
    let mut current = response;
    loop {
        match current {
            Value::Array(items) => return Ok(items),
            Value::Object(mut map) if map.len() == 1 => {
                let key = map.keys().next().cloned().unwrap_or_default();
                current = map.remove(&key).unwrap_or(Value::Null);
                if !current.is_object() && !current.is_array() {
                    return Err(HousekeepingError::UnexpectedResponse(format!(
                        "'{key}' holds {} instead of records",
                        Cell::from(current).kind()
                    )));
                }
            }
            Value::Object(map) => {
                let errors = map.get("errors").map(Value::to_string).unwrap_or_default();
                let keys: Vec<&str> = map.keys().map(String::as_str).collect();
                return Err(HousekeepingError::UnexpectedResponse(format!(
                    "response contained multiple messages: {errors} (keys: {})",
                    keys.join(", ")
                )));
            }
            other => {
                return Err(HousekeepingError::UnexpectedResponse(format!(
                    "expected an object or a list, got {}",
                    Cell::from(other).kind()
                )))
            }
        }
    }
}

/// Picks `{plural: {singular: [...]}}` out of a REST listing page.
pub fn listing_items(page: &Value, plural: &str, singular: &str) -> Vec<Value> {
    match page.get(plural).and_then(|p| p.get(singular)) {
        Some(Value::Array(items)) => items.clone(),
        Some(single @ Value::Object(_)) => vec![single.clone()],
        _ => Vec::new(),
    }
}

struct Frame {
    name: String,
    fields: Vec<(String, Cell)>,
    text: String,
}

impl Frame {
    fn open(start: &BytesStart<'_>) -> Result<Self> {
        let name = utf8(start.local_name().as_ref())?.to_string();
        let mut fields = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(xml_error)?;
            if attr.key.as_ref().starts_with(b"xmlns") {
                continue;
            }
            let key = utf8(attr.key.local_name().as_ref())?.to_string();
            let value = attr.unescape_value().map_err(xml_error)?.into_owned();
            fields.push((key, Cell::Text(value)));
        }
        Ok(Self {
            name,
            fields,
            text: String::new(),
        })
    }

    fn close(self) -> (String, Cell) {
        let text = self.text.trim().to_string();
        let cell = if self.fields.is_empty() && !text.is_empty() {
            Cell::Text(text)
        } else {
            let mut fields = self.fields;
            if !text.is_empty() {
                fields.push(("text".to_string(), Cell::Text(text)));
            }
            Cell::Map(fields)
        };
        (self.name, cell)
    }

    fn attach(&mut self, name: String, cell: Cell) {
        let always_list = LIST_ELEMENTS.contains(&name.as_str());
        match self.fields.iter_mut().find(|(k, _)| *k == name) {
            Some((_, Cell::List(items))) => items.push(cell),
            Some((_, existing)) => {
                let first = std::mem::take(existing);
                *existing = Cell::List(vec![first, cell]);
            }
            None if always_list => self.fields.push((name, Cell::List(vec![cell]))),
            None => self.fields.push((name, cell)),
        }
    }
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(xml_error)
}

fn xml_error(err: impl std::fmt::Display) -> HousekeepingError {
    HousekeepingError::Xml(err.to_string())
}

/// Collects every `record_element` of a REST XML response as a mapping.
///
/// Attributes become text cells, child elements nested mappings; repeated
/// children and the names in [`LIST_ELEMENTS`] become lists.
pub fn records_from_xml(xml: &str, record_element: &str) -> Result<Vec<Cell>> {
    // Element text is trimmed in Frame::close.
    let mut reader = Reader::from_str(xml);

    let mut records = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) => {
                let inside = !stack.is_empty();
                if inside || e.local_name().as_ref() == record_element.as_bytes() {
                    stack.push(Frame::open(&e)?);
                }
            }
            Event::Empty(e) => {
                let inside = !stack.is_empty();
                if inside || e.local_name().as_ref() == record_element.as_bytes() {
                    let (name, cell) = Frame::open(&e)?.close();
                    finish(&mut stack, &mut records, name, cell);
                }
            }
            Event::Text(e) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&e.decode().map_err(xml_error)?);
                }
            }
            Event::CData(e) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(utf8(&e)?);
                }
            }
            Event::GeneralRef(e) => {
                if let Some(frame) = stack.last_mut() {
                    match e.resolve_char_ref().map_err(xml_error)? {
                        Some(ch) => frame.text.push(ch),
                        None => {
                            let name = e.decode().map_err(xml_error)?;
                            let resolved = quick_xml::escape::resolve_predefined_entity(&name)
                                .unwrap_or_default();
                            frame.text.push_str(resolved);
                        }
                    }
                }
            }
            Event::End(_) => {
                if let Some(frame) = stack.pop() {
                    let (name, cell) = frame.close();
                    finish(&mut stack, &mut records, name, cell);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(HousekeepingError::Xml(format!(
            "document ended inside <{}>",
            stack.last().map(|f| f.name.as_str()).unwrap_or_default()
        )));
    }
    Ok(records)
}

fn finish(stack: &mut [Frame], records: &mut Vec<Cell>, name: String, cell: Cell) {
    match stack.last_mut() {
        Some(parent) => parent.attach(name, cell),
        None => records.push(cell),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flattener::flatten;
    use crate::table::Table;
    use serde_json::json;

    #[test]
    fn graphql_envelope_is_unwrapped() {
        let items = unpack_response(json!({"data": {"databaseServers": [{"id": 1}, {"id": 2}]}})).unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn errors_next_to_data_are_rejected() {
        let err = unpack_response(json!({"data": null, "errors": [{"message": "boom"}]})).unwrap_err();
        match err {
            HousekeepingError::UnexpectedResponse(msg) => {
                assert!(msg.contains("boom"));
                assert!(msg.contains("errors"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn scalar_leaf_is_rejected() {
        assert!(unpack_response(json!({"data": {"count": 3}})).is_err());
    }

    #[test]
    fn listing_pages_are_read_by_plural_and_singular() {
        let page = json!({
            "pagination": {"pageNumber": "1", "pageSize": "100", "totalAvailable": "2"},
            "projects": {"project": [{"id": "a"}, {"id": "b"}]}
        });
        assert_eq!(listing_items(&page, "projects", "project").len(), 2);
        assert!(listing_items(&page, "workbooks", "workbook").is_empty());
    }

    #[test]
    fn rest_xml_projects_become_records() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
            <tsResponse xmlns="http://tableau.com/api">
              <pagination pageNumber="1" pageSize="100" totalAvailable="2"/>
              <projects>
                <project id="A" name="Finance &amp; Risk" contentPermissions="LockedToProject">
                  <owner id="u1"/>
                </project>
                <project id="B" name="Reports" parentProjectId="A" contentPermissions="ManagedByOwner">
                  <owner id="u2"/>
                </project>
              </projects>
            </tsResponse>"#;
        let records = records_from_xml(xml, "project").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("name"), Some(&Cell::from("Finance & Risk")));
        assert_eq!(records[1].get("parentProjectId"), Some(&Cell::from("A")));

        let t = flatten(Table::from_records(records).unwrap()).unwrap();
        assert_eq!(t.get(1, "owner_id"), Some(&Cell::from("u2")));
    }

    #[test]
    fn grantee_capabilities_match_the_json_shape() {
        let xml = r#"<tsResponse><permissions>
              <granteeCapabilities>
                <group id="g1"/>
                <capabilities><capability name="Read" mode="Allow"/></capabilities>
              </granteeCapabilities>
              <granteeCapabilities>
                <user id="u1"/>
                <capabilities>
                  <capability name="Read" mode="Allow"/>
                  <capability name="Write" mode="Deny"/>
                </capabilities>
              </granteeCapabilities>
            </permissions></tsResponse>"#;
        let records = records_from_xml(xml, "granteeCapabilities").unwrap();
        let t = flatten(Table::from_records(records).unwrap()).unwrap();
        assert_eq!(t.len(), 3);
        assert!(t.has_column("capabilities_capability_name"));
        assert!(t.has_column("group_id"));
        assert!(t.has_column("user_id"));
    }

    #[test]
    fn truncated_documents_fail() {
        assert!(records_from_xml("<projects><project id=\"a\">", "project").is_err());
    }
}
