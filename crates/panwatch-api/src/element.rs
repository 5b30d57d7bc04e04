// ── Structured API results ──
//
// The appliance answers every call with an XML document. `ApiElement` is
// the owned tree handed to decoders: element name, attributes, direct text
// and children, with DOM-like lookup helpers.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::Error;

/// One element of a parsed API response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiElement {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<ApiElement>,
}

impl ApiElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builder: append direct text content.
    pub fn with_text(mut self, text: impl AsRef<str>) -> Self {
        self.text.push_str(text.as_ref());
        self
    }

    /// Builder: set an attribute.
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// Builder: append a child element.
    pub fn with_child(mut self, child: ApiElement) -> Self {
        self.children.push(child);
        self
    }

    /// Builder: append `<name>text</name>`.
    pub fn with_leaf(self, name: impl Into<String>, text: impl AsRef<str>) -> Self {
        self.with_child(ApiElement::new(name).with_text(text))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn children(&self) -> &[ApiElement] {
        &self.children
    }

    /// Direct child with the given name.
    pub fn child(&self, name: &str) -> Option<&ApiElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Consume `self`, returning the first direct child with the given name.
    pub fn into_child(self, name: &str) -> Option<ApiElement> {
        self.children.into_iter().find(|c| c.name == name)
    }

    /// First descendant (document order, excluding `self`) with the given name.
    pub fn find(&self, name: &str) -> Option<&ApiElement> {
        for child in &self.children {
            if child.name == name {
                return Some(child);
            }
            if let Some(found) = child.find(name) {
                return Some(found);
            }
        }
        None
    }

    /// All descendants (document order, excluding `self`) with the given name.
    pub fn find_all(&self, name: &str) -> Vec<&ApiElement> {
        let mut out = Vec::new();
        self.collect(name, &mut out);
        out
    }

    fn collect<'a>(&'a self, name: &str, out: &mut Vec<&'a ApiElement>) {
        for child in &self.children {
            if child.name == name {
                out.push(child);
            }
            child.collect(name, out);
        }
    }

    /// Text directly inside this element (not including children).
    pub fn own_text(&self) -> &str {
        &self.text
    }

    /// Concatenated text of this element and all descendants.
    pub fn text_content(&self) -> String {
        let mut out = self.text.clone();
        for child in &self.children {
            out.push_str(&child.text_content());
        }
        out
    }

    /// Trimmed text of the first descendant named `name`, if non-empty.
    pub fn find_text(&self, name: &str) -> Option<String> {
        self.find(name)
            .map(|e| e.text_content().trim().to_owned())
            .filter(|t| !t.is_empty())
    }

    /// Parse an XML document and return its root element.
    pub fn parse(xml: &str) -> Result<Self, Error> {
        let xml_err = |message: String| Error::Xml {
            message,
            body: xml.to_owned(),
        };

        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<ApiElement> = Vec::new();
        let mut root: Option<ApiElement> = None;

        loop {
            match reader.read_event().map_err(|e| xml_err(e.to_string()))? {
                Event::Start(start) => {
                    stack.push(element_from_start(&start).map_err(xml_err)?);
                }
                Event::Empty(start) => {
                    let element = element_from_start(&start).map_err(xml_err)?;
                    attach(&mut stack, &mut root, element);
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| xml_err("unbalanced closing tag".into()))?;
                    attach(&mut stack, &mut root, element);
                }
                Event::Text(text) => {
                    if let Some(top) = stack.last_mut() {
                        let unescaped = text.unescape().map_err(|e| xml_err(e.to_string()))?;
                        top.text.push_str(&unescaped);
                    }
                }
                Event::CData(data) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(xml_err("unexpected end of document".into()));
        }
        root.ok_or_else(|| xml_err("document has no root element".into()))
    }
}

fn element_from_start(start: &BytesStart<'_>) -> Result<ApiElement, String> {
    let mut element = ApiElement::new(String::from_utf8_lossy(start.name().as_ref()));
    for attr in start.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|e| e.to_string())?.into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn attach(stack: &mut [ApiElement], root: &mut Option<ApiElement>, element: ApiElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}
