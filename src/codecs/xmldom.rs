//! Minimal attribute-ordered XML element tree over quick-xml. The library
//! format is attribute-heavy and deeply nested, so both codec directions
//! work on this tree instead of juggling raw events.

use crate::errors::{CodecError, Result};
use indexmap::IndexMap;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub name: String,
    pub attrs: IndexMap<String, String>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn attr(&self, name: &str) -> &str {
        self.attrs.get(name).map(String::as_str).unwrap_or("")
    }

    pub fn set_attr(&mut self, name: &str, value: &str) -> &mut Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    /// Direct child with the given name, created on demand.
    pub fn ensure_child(&mut self, name: &str) -> &mut Element {
        let idx = match self.children.iter().position(|c| c.name == name) {
            Some(idx) => idx,
            None => {
                self.children.push(Element::new(name));
                self.children.len() - 1
            }
        };
        &mut self.children[idx]
    }

    pub fn push(&mut self, child: Element) -> &mut Self {
        self.children.push(child);
        self
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Every descendant (any depth) with the given name, document order.
    pub fn descendants<'a>(&'a self, name: &str, out: &mut Vec<&'a Element>) {
        for child in &self.children {
            if child.name == name {
                out.push(child);
            }
            child.descendants(name, out);
        }
    }

    pub fn find_descendants(&self, name: &str) -> Vec<&Element> {
        let mut out = Vec::new();
        self.descendants(name, &mut out);
        out
    }

    /// Direct child with the given name carrying attr == value.
    pub fn child_by_attr(&self, name: &str, attr: &str, value: &str) -> Option<&Element> {
        self.children
            .iter()
            .filter(|c| c.name == name)
            .find(|c| c.attr(attr) == value)
    }

    pub fn child_by_attr_mut(&mut self, name: &str, attr: &str, value: &str) -> Option<&mut Element> {
        self.children
            .iter_mut()
            .filter(|c| c.name == name)
            .find(|c| c.attr(attr) == value)
    }

    pub fn retain_children<F: FnMut(&Element) -> bool>(&mut self, f: F) {
        self.children.retain(f);
    }

    /// Parse one document into its root element.
    pub fn parse(xml: &str) -> Result<Element> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    stack.push(element_from_start(&e)?);
                }
                Ok(Event::Empty(e)) => {
                    let elem = element_from_start(&e)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(elem),
                        None => root = Some(elem),
                    }
                }
                Ok(Event::Text(e)) => {
                    if let Some(current) = stack.last_mut() {
                        let text = e.unescape().map_err(|e| parse_error(e.to_string()))?;
                        current.text.push_str(&text);
                    }
                }
                Ok(Event::CData(e)) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&String::from_utf8_lossy(&e));
                    }
                }
                Ok(Event::End(_)) => {
                    let finished = match stack.pop() {
                        Some(elem) => elem,
                        None => return Err(parse_error("unbalanced end tag".to_string())),
                    };
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(finished),
                        None => root = Some(finished),
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(parse_error(e.to_string())),
            }
        }

        root.ok_or_else(|| parse_error("document has no root element".to_string()))
    }

    /// Serialize with declaration and two-space indentation.
    pub fn to_xml_string(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(|e| write_error(e.to_string()))?;
        write_element(&mut writer, self)?;
        let bytes = writer.into_inner();
        String::from_utf8(bytes).map_err(|e| write_error(e.to_string()))
    }
}

fn element_from_start(e: &BytesStart<'_>) -> Result<Element> {
    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
    let mut elem = Element::new(&name);
    for attr in e.attributes() {
        let attr = attr.map_err(|e| parse_error(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| parse_error(e.to_string()))?
            .to_string();
        elem.attrs.insert(key, value);
    }
    Ok(elem)
}

fn write_element(writer: &mut Writer<Vec<u8>>, elem: &Element) -> Result<()> {
    let mut start = BytesStart::new(elem.name.as_str());
    for (k, v) in &elem.attrs {
        start.push_attribute((k.as_str(), v.as_str()));
    }

    if elem.children.is_empty() && elem.text.is_empty() {
        writer
            .write_event(Event::Empty(start))
            .map_err(|e| write_error(e.to_string()))?;
        return Ok(());
    }

    writer
        .write_event(Event::Start(start))
        .map_err(|e| write_error(e.to_string()))?;
    if !elem.text.is_empty() {
        writer
            .write_event(Event::Text(BytesText::new(&elem.text)))
            .map_err(|e| write_error(e.to_string()))?;
    }
    for child in &elem.children {
        write_element(writer, child)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(elem.name.as_str())))
        .map_err(|e| write_error(e.to_string()))?;
    Ok(())
}

fn parse_error(message: String) -> crate::errors::ThreatsmithError {
    CodecError::Parse {
        format: "xml".to_string(),
        message,
    }
    .into()
}

fn write_error(message: String) -> crate::errors::ThreatsmithError {
    CodecError::Write {
        format: "xml".to_string(),
        message,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_document() {
        let xml = r#"<library ref="lib" revision="3"><desc>Hello</desc><riskPatterns><riskPattern ref="RP"/></riskPatterns></library>"#;
        let root = Element::parse(xml).expect("parse");
        assert_eq!(root.name, "library");
        assert_eq!(root.attr("revision"), "3");
        assert_eq!(root.child("desc").expect("desc").text, "Hello");
        let rps = root.child("riskPatterns").expect("riskPatterns");
        assert_eq!(rps.children_named("riskPattern").count(), 1);
    }

    #[test]
    fn test_attributes_are_unescaped() {
        let xml = r#"<a value="x &amp; y"/>"#;
        let root = Element::parse(xml).expect("parse");
        assert_eq!(root.attr("value"), "x & y");
    }

    #[test]
    fn test_round_trip_escapes() {
        let mut root = Element::new("library");
        root.set_attr("name", "a & b <c>");
        root.ensure_child("desc").text = "ampersand & angle <".to_string();
        let xml = root.to_xml_string().expect("serialize");
        let back = Element::parse(&xml).expect("reparse");
        assert_eq!(back.attr("name"), "a & b <c>");
        assert_eq!(back.child("desc").expect("desc").text, "ampersand & angle <");
    }

    #[test]
    fn test_find_descendants_document_order() {
        let xml = r#"<r><a><x ref="1"/></a><x ref="2"/><b><c><x ref="3"/></c></b></r>"#;
        let root = Element::parse(xml).expect("parse");
        let found = root.find_descendants("x");
        let refs: Vec<&str> = found.iter().map(|e| e.attr("ref")).collect();
        assert_eq!(refs, ["1", "2", "3"]);
    }

    #[test]
    fn test_child_by_attr() {
        let xml = r#"<r><item ref="a"/><item ref="b"/></r>"#;
        let root = Element::parse(xml).expect("parse");
        assert!(root.child_by_attr("item", "ref", "b").is_some());
        assert!(root.child_by_attr("item", "ref", "z").is_none());
    }

    #[test]
    fn test_ensure_child_is_idempotent() {
        let mut root = Element::new("r");
        root.ensure_child("list");
        root.ensure_child("list");
        assert_eq!(root.children.len(), 1);
    }

    #[test]
    fn test_parse_error_on_garbage() {
        assert!(Element::parse("<unclosed").is_err());
        assert!(Element::parse("").is_err());
    }

    #[test]
    fn test_serializes_with_declaration() {
        let root = Element::new("library");
        let xml = root.to_xml_string().expect("serialize");
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<library/>"));
    }
}
