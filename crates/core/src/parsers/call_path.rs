use cctree_model::{CCNode, ElementKind, NameTable, NodeKind, ProcedureInfo};
use thiserror::Error;
use tracing::trace;

use super::document::XmlElement;
use super::metric_db::AggregateMatrix;
use super::tables::MetadataTables;

/// Inline per-node metric values; never part of the tree.
pub const METRIC_VALUE_TAG: &str = "M";

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("<{tag}> element (id {id:?}) is missing attribute `{attr}`")]
    MissingAttribute {
        tag: String,
        id: Option<u32>,
        attr: &'static str,
    },
    #[error("<{tag}> element has invalid `{attr}` value {value:?}")]
    InvalidAttribute {
        tag: String,
        attr: &'static str,
        value: String,
    },
    #[error("<{tag} i=\"{id}\"> is outside the metric database ({num_nodes} nodes)")]
    IdOutOfRange {
        tag: String,
        id: u32,
        num_nodes: usize,
    },
    #[error("unrecognized call-path element <{tag}>")]
    UnknownElement { tag: String },
    #[error("call-path root must be a <PF> element, found {found}")]
    BadRoot { found: String },
    #[error("<{tag} i=\"{id}\"> references {table} id {key}, which is not defined")]
    Lookup {
        tag: String,
        id: u32,
        table: &'static str,
        key: u32,
    },
}

/// Context inherited from the enclosing scope during the walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkContext {
    /// Source file set by the nearest enclosing frame, procedure or loop.
    pub file_id: Option<u32>,
}

/// Result of building one element: either a node, or (for elided
/// elements) the already-built children to splice into the parent.
#[derive(Debug)]
pub enum Built {
    Node(CCNode),
    Spliced(Vec<CCNode>),
}

/// Builds a calling context tree from a `<SecCallPathProfileData>` section.
#[derive(Debug, Clone, Copy)]
pub struct CallPathTreeBuilder<'a> {
    tables: &'a MetadataTables,
    metrics: &'a AggregateMatrix,
}

impl<'a> CallPathTreeBuilder<'a> {
    pub fn new(tables: &'a MetadataTables, metrics: &'a AggregateMatrix) -> Self {
        Self { tables, metrics }
    }

    /// Build the tree rooted at the section's first procedure frame.
    pub fn build(&self, call_path: &XmlElement) -> Result<CCNode, BuildError> {
        let root = call_path
            .children()
            .iter()
            .find(|c| c.tag != METRIC_VALUE_TAG)
            .ok_or_else(|| BuildError::BadRoot {
                found: "no element".to_string(),
            })?;
        if ElementKind::from_tag(&root.tag) != Some(ElementKind::ProcedureFrame) {
            return Err(BuildError::BadRoot {
                found: format!("<{}>", root.tag),
            });
        }

        match self.build_element(root, WalkContext::default())? {
            Built::Node(node) => Ok(node),
            Built::Spliced(_) => Err(BuildError::BadRoot {
                found: format!("<{}> that was elided", root.tag),
            }),
        }
    }

    /// Build every child of `element` except inline metric values, splicing
    /// the children of elided elements in place.
    pub fn build_children(
        &self,
        element: &XmlElement,
        ctx: WalkContext,
    ) -> Result<Vec<CCNode>, BuildError> {
        let mut nodes = Vec::new();
        for child in element.children() {
            if child.tag == METRIC_VALUE_TAG {
                continue;
            }
            match self.build_element(child, ctx)? {
                Built::Node(node) => nodes.push(node),
                Built::Spliced(spliced) => nodes.extend(spliced),
            }
        }
        Ok(nodes)
    }

    pub fn build_element(
        &self,
        element: &XmlElement,
        ctx: WalkContext,
    ) -> Result<Built, BuildError> {
        let kind =
            ElementKind::from_tag(&element.tag).ok_or_else(|| BuildError::UnknownElement {
                tag: element.tag.clone(),
            })?;
        let id = self.node_id(element)?;

        let (node_kind, child_ctx) = match kind {
            ElementKind::CallSite => {
                trace!(id, "eliding call site");
                return Ok(Built::Spliced(self.build_children(element, ctx)?));
            }
            ElementKind::ProcedureFrame | ElementKind::Procedure => {
                let procedure_id = required_id(element, Some(id), "n")?;
                let name = lookup(
                    &self.tables.procedure_names,
                    "procedure",
                    element,
                    id,
                    procedure_id,
                )?;
                let load_module_id = number_attr(element, "lm")?;
                if let Some(lm) = load_module_id {
                    lookup(&self.tables.load_modules, "load module", element, id, lm)?;
                }
                let own_file = number_attr(element, "f")?;
                if let Some(f) = own_file {
                    lookup(&self.tables.src_files, "file", element, id, f)?;
                }
                let child_ctx = WalkContext {
                    file_id: own_file.or(ctx.file_id),
                };

                if kind == ElementKind::Procedure && name.is_empty() {
                    trace!(id, procedure_id, "eliding unnamed procedure");
                    return Ok(Built::Spliced(self.build_children(element, child_ctx)?));
                }

                let info = ProcedureInfo {
                    name: name.to_string(),
                    procedure_id,
                    load_module_id,
                    file_id: child_ctx.file_id,
                };
                let node_kind = if kind == ElementKind::ProcedureFrame {
                    NodeKind::ProcedureFrame(info)
                } else {
                    NodeKind::Procedure(info)
                };
                (node_kind, child_ctx)
            }
            ElementKind::Loop => {
                let file_id = required_id(element, Some(id), "f")?;
                let file = lookup(&self.tables.src_files, "file", element, id, file_id)?;
                let line = number_attr(element, "l")?.ok_or_else(|| BuildError::MissingAttribute {
                    tag: element.tag.clone(),
                    id: Some(id),
                    attr: "l",
                })?;
                let name = format!("Loop@{}:{line}", basename(file));
                (
                    NodeKind::Loop { name, file_id },
                    WalkContext {
                        file_id: Some(file_id),
                    },
                )
            }
            ElementKind::Statement => (NodeKind::Statement { file_id: ctx.file_id }, ctx),
        };

        let mut node = CCNode::new(
            id,
            number_attr(element, "s")?,
            number_attr(element, "l")?,
            self.metrics.node_metrics(id as usize - 1),
            node_kind,
        );
        for child in self.build_children(element, child_ctx)? {
            node.add_child(child);
        }
        Ok(Built::Node(node))
    }

    /// The element's 1-based `i`, checked against the metric database.
    fn node_id(&self, element: &XmlElement) -> Result<u32, BuildError> {
        let id = required_id(element, None, "i")?;
        if id == 0 {
            return Err(BuildError::InvalidAttribute {
                tag: element.tag.clone(),
                attr: "i",
                value: "0".to_string(),
            });
        }
        let num_nodes = self.metrics.num_nodes();
        if id as usize > num_nodes {
            return Err(BuildError::IdOutOfRange {
                tag: element.tag.clone(),
                id,
                num_nodes,
            });
        }
        Ok(id)
    }
}

fn lookup<'t>(
    table: &'t NameTable,
    table_name: &'static str,
    element: &XmlElement,
    id: u32,
    key: u32,
) -> Result<&'t str, BuildError> {
    table.get(key).ok_or_else(|| BuildError::Lookup {
        tag: element.tag.clone(),
        id,
        table: table_name,
        key,
    })
}

fn required_id(
    element: &XmlElement,
    id: Option<u32>,
    attr: &'static str,
) -> Result<u32, BuildError> {
    number_attr(element, attr)?.ok_or_else(|| BuildError::MissingAttribute {
        tag: element.tag.clone(),
        id,
        attr,
    })
}

fn number_attr(element: &XmlElement, attr: &'static str) -> Result<Option<u32>, BuildError> {
    element
        .attr(attr)
        .map(|raw| {
            raw.trim().parse().map_err(|_| BuildError::InvalidAttribute {
                tag: element.tag.clone(),
                attr,
                value: raw.to_string(),
            })
        })
        .transpose()
}

/// Last `/`-separated segment of a path.
fn basename(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, base)| base)
}
