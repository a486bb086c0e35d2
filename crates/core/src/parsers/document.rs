use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;
use xml::reader::{EventReader, XmlEvent};

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{}: malformed XML: {source}", path.display())]
    Malformed {
        path: PathBuf,
        source: xml::reader::Error,
    },
    #[error("{}: document has no root element", path.display())]
    Empty { path: PathBuf },
}

/// An element of a parsed XML document.
///
/// Only the structure needed to walk a profile is kept: the local tag
/// name, attributes in document order, and element children. Text, comments
/// and processing instructions are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    pub tag: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn children(&self) -> &[XmlElement] {
        &self.children
    }

    pub fn children_with_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.tag == tag)
    }

    /// Every element below and including `self` with the given tag, in
    /// document order.
    pub fn descendants_with_tag<'a>(
        &'a self,
        tag: &'a str,
    ) -> impl Iterator<Item = &'a XmlElement> {
        Descendants { stack: vec![self] }.filter(move |e| e.tag == tag)
    }
}

struct Descendants<'a> {
    stack: Vec<&'a XmlElement>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a XmlElement;

    fn next(&mut self) -> Option<Self::Item> {
        let element = self.stack.pop()?;
        self.stack.extend(element.children.iter().rev());
        Some(element)
    }
}

/// A parsed XML document together with where it came from, so that later
/// stages can name the file in their errors.
#[derive(Debug, Clone)]
pub struct XmlDocument {
    pub path: PathBuf,
    pub root: XmlElement,
}

impl XmlDocument {
    pub fn from_path(path: &Path) -> Result<Self, XmlError> {
        let file = File::open(path).map_err(|source| XmlError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(file, path)
    }

    /// Parse a document from any reader; `path` is only used for messages.
    pub fn from_reader<R: Read>(reader: R, path: &Path) -> Result<Self, XmlError> {
        let parser = EventReader::new(BufReader::new(reader));

        // Elements whose start tag has been seen but not their end tag.
        let mut open: Vec<XmlElement> = Vec::new();
        let mut root = None;

        for event in parser {
            let event = event.map_err(|source| XmlError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;
            match event {
                XmlEvent::StartElement {
                    name, attributes, ..
                } => {
                    open.push(XmlElement {
                        tag: name.local_name,
                        attributes: attributes
                            .into_iter()
                            .map(|a| (a.name.local_name, a.value))
                            .collect(),
                        children: Vec::new(),
                    });
                }
                XmlEvent::EndElement { .. } => {
                    let Some(done) = open.pop() else {
                        continue;
                    };
                    match open.last_mut() {
                        Some(parent) => parent.children.push(done),
                        None => root = Some(done),
                    }
                }
                XmlEvent::EndDocument => break,
                _ => {}
            }
        }

        let root = root.ok_or_else(|| XmlError::Empty {
            path: path.to_path_buf(),
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            root,
        })
    }

    pub fn parse_str(text: &str) -> Result<Self, XmlError> {
        Self::from_reader(text.as_bytes(), Path::new("<memory>"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_element_tree() {
        let doc = XmlDocument::parse_str(
            r#"<?xml version="1.0"?>
            <A x="1">
                text is dropped
                <B i="2"><C/></B>
                <B i="3"/>
            </A>"#,
        )
        .unwrap();

        assert_eq!(doc.root.tag, "A");
        assert_eq!(doc.root.attr("x"), Some("1"));
        assert_eq!(doc.root.children().len(), 2);
        let ids: Vec<_> = doc.root.children_with_tag("B").map(|b| b.attr("i")).collect();
        assert_eq!(ids, vec![Some("2"), Some("3")]);
        assert_eq!(doc.root.descendants_with_tag("C").count(), 1);
    }

    #[test]
    fn unescapes_attribute_values() {
        let doc = XmlDocument::parse_str(r#"<F n="&lt;unknown file&gt;"/>"#).unwrap();
        assert_eq!(doc.root.attr("n"), Some("<unknown file>"));
    }

    #[test]
    fn malformed_document_names_its_origin() {
        let err = XmlDocument::from_reader("<A><B></A>".as_bytes(), Path::new("db/experiment.xml"))
            .unwrap_err();
        assert!(matches!(err, XmlError::Malformed { .. }));
        assert!(err.to_string().contains("db/experiment.xml"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = XmlDocument::from_path(Path::new("/nonexistent/experiment.xml")).unwrap_err();
        assert!(matches!(err, XmlError::Io { .. }));
    }
}
