use std::path::{Path, PathBuf};

use cctree_model::NameTable;
use thiserror::Error;

use super::document::{XmlDocument, XmlElement};

pub const LOAD_MODULE_TABLE: &str = "LoadModuleTable";
pub const FILE_TABLE: &str = "FileTable";
pub const PROCEDURE_TABLE: &str = "ProcedureTable";
pub const CALL_PATH_SECTION: &str = "SecCallPathProfileData";
pub const METRIC_TABLE: &str = "MetricTable";

/// Metric labels used when the document carries no usable metric table.
pub const DEFAULT_METRIC_NAMES: [&str; 2] = ["inclusive", "exclusive"];

#[derive(Debug, Error)]
pub enum TableError {
    #[error("{}: missing <{tag}> section", path.display())]
    MissingSection { path: PathBuf, tag: &'static str },
    #[error("{}: <{tag}> appears {count} times, expected exactly once", path.display())]
    DuplicateSection {
        path: PathBuf,
        tag: &'static str,
        count: usize,
    },
    #[error("{}: <{tag}> entry is missing attribute `{attr}`", path.display())]
    MissingAttribute {
        path: PathBuf,
        tag: &'static str,
        attr: &'static str,
    },
    #[error("{}: <{tag}> entry has invalid id {value:?}", path.display())]
    InvalidId {
        path: PathBuf,
        tag: &'static str,
        value: String,
    },
    #[error("{}: <{tag}> id {id} is defined more than once", path.display())]
    DuplicateId {
        path: PathBuf,
        tag: &'static str,
        id: u32,
    },
}

/// The three id → name tables of an experiment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataTables {
    pub load_modules: NameTable,
    pub src_files: NameTable,
    pub procedure_names: NameTable,
}

/// Everything read from the metadata document ahead of tree construction.
#[derive(Debug, Clone)]
pub struct Metadata<'a> {
    pub tables: MetadataTables,
    /// Labels from `<MetricTable>`, ordered by metric index. Empty when the
    /// document has no metric table.
    pub metric_names: Vec<String>,
    /// The `<SecCallPathProfileData>` element the tree is built from.
    pub call_path: &'a XmlElement,
}

/// Parse the name tables and locate the call-path section.
pub fn parse_metadata(doc: &XmlDocument) -> Result<Metadata<'_>, TableError> {
    let path = doc.path.as_path();
    let load_module_table = unique_section(doc, LOAD_MODULE_TABLE)?;
    let file_table = unique_section(doc, FILE_TABLE)?;
    let procedure_table = unique_section(doc, PROCEDURE_TABLE)?;
    let call_path = unique_section(doc, CALL_PATH_SECTION)?;

    let tables = MetadataTables {
        load_modules: fill_table(path, load_module_table, "LoadModule")?,
        src_files: fill_table(path, file_table, "File")?,
        procedure_names: fill_table(path, procedure_table, "Procedure")?,
    };

    Ok(Metadata {
        tables,
        metric_names: metric_names(doc)?,
        call_path,
    })
}

fn unique_section<'a>(
    doc: &'a XmlDocument,
    tag: &'static str,
) -> Result<&'a XmlElement, TableError> {
    let mut found = doc.root.descendants_with_tag(tag);
    let first = found.next().ok_or_else(|| TableError::MissingSection {
        path: doc.path.clone(),
        tag,
    })?;
    let extra = found.count();
    if extra > 0 {
        return Err(TableError::DuplicateSection {
            path: doc.path.clone(),
            tag,
            count: extra + 1,
        });
    }
    Ok(first)
}

fn fill_table(
    path: &Path,
    section: &XmlElement,
    entry_tag: &'static str,
) -> Result<NameTable, TableError> {
    let mut table = NameTable::new();
    for entry in section.children_with_tag(entry_tag) {
        let (id, name) = id_and_name(path, entry, entry_tag)?;
        if table.insert(id, name).is_some() {
            return Err(TableError::DuplicateId {
                path: path.to_path_buf(),
                tag: entry_tag,
                id,
            });
        }
    }
    Ok(table)
}

fn id_and_name<'e>(
    path: &Path,
    entry: &'e XmlElement,
    tag: &'static str,
) -> Result<(u32, &'e str), TableError> {
    let missing = |attr| TableError::MissingAttribute {
        path: path.to_path_buf(),
        tag,
        attr,
    };
    let raw_id = entry.attr("i").ok_or_else(|| missing("i"))?;
    let name = entry.attr("n").ok_or_else(|| missing("n"))?;
    let id = raw_id.trim().parse().map_err(|_| TableError::InvalidId {
        path: path.to_path_buf(),
        tag,
        value: raw_id.to_string(),
    })?;
    Ok((id, name))
}

fn metric_names(doc: &XmlDocument) -> Result<Vec<String>, TableError> {
    let Some(table) = doc.root.descendants_with_tag(METRIC_TABLE).next() else {
        return Ok(Vec::new());
    };
    let mut metrics = table
        .children_with_tag("Metric")
        .map(|m| id_and_name(&doc.path, m, "Metric"))
        .collect::<Result<Vec<_>, _>>()?;
    metrics.sort_by_key(|(id, _)| *id);
    Ok(metrics.into_iter().map(|(_, name)| name.to_string()).collect())
}
