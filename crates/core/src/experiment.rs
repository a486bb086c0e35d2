use std::path::{Path, PathBuf};

use cctree_model::{CCNode, NameTable, Traverse};
use tracing::{debug, info};

use crate::config::ReaderConfig;
use crate::parsers::tables::{self, DEFAULT_METRIC_NAMES};
use crate::parsers::{
    CallPathTreeBuilder, Error, MetadataTables, MetricDatabase, XmlDocument,
};

/// A fully loaded HPCToolkit database: the calling context tree plus the
/// name tables needed to interpret it.
#[derive(Debug, Clone)]
pub struct Experiment {
    pub dir: PathBuf,
    pub root: CCNode,
    pub tables: MetadataTables,
    pub metric_names: Vec<String>,
    pub num_nodes: usize,
    pub num_metrics: usize,
    pub num_pes: usize,
}

impl Experiment {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, Error> {
        Self::open_with(dir, &ReaderConfig::default())
    }

    /// Read the metadata, aggregate the metric files and build the tree.
    ///
    /// Either every stage succeeds or the first error is returned; a
    /// partially built tree is never exposed.
    pub fn open_with(dir: impl AsRef<Path>, config: &ReaderConfig) -> Result<Self, Error> {
        let dir = dir.as_ref();
        let metadata_path = config.metadata_path(dir);

        let doc = XmlDocument::from_path(&metadata_path)?;
        let metadata = tables::parse_metadata(&doc)?;
        debug!(
            load_modules = metadata.tables.load_modules.len(),
            files = metadata.tables.src_files.len(),
            procedures = metadata.tables.procedure_names.len(),
            "parsed metadata tables"
        );

        let db = MetricDatabase::read(dir, config)?;

        let root = CallPathTreeBuilder::new(&metadata.tables, &db.aggregate)
            .build(metadata.call_path)
            .map_err(|source| Error::Build {
                path: metadata_path.clone(),
                source,
            })?;

        let metric_names = if metadata.metric_names.len() == db.num_metrics() {
            metadata.metric_names
        } else {
            if !metadata.metric_names.is_empty() {
                debug!(
                    declared = metadata.metric_names.len(),
                    stored = db.num_metrics(),
                    "metric table does not match metric files, using default names"
                );
            }
            DEFAULT_METRIC_NAMES.iter().map(ToString::to_string).collect()
        };

        let experiment = Self {
            dir: dir.to_path_buf(),
            root,
            tables: metadata.tables,
            metric_names,
            num_nodes: db.num_nodes(),
            num_metrics: db.num_metrics(),
            num_pes: db.num_pes(),
        };
        info!(
            dir = %dir.display(),
            nodes = experiment.root.node_count(),
            processes = experiment.num_pes,
            "built calling context tree"
        );
        Ok(experiment)
    }

    pub fn root(&self) -> &CCNode {
        &self.root
    }

    pub fn load_modules(&self) -> &NameTable {
        &self.tables.load_modules
    }

    pub fn src_files(&self) -> &NameTable {
        &self.tables.src_files
    }

    pub fn procedure_names(&self) -> &NameTable {
        &self.tables.procedure_names
    }

    pub fn metric_names(&self) -> &[String] {
        &self.metric_names
    }

    /// Pre-order traversal of the whole tree.
    pub fn traverse(&self) -> Traverse<'_> {
        self.root.iter()
    }

    /// Resolved source file name of a node, if it has one.
    pub fn file_name(&self, node: &CCNode) -> Option<&str> {
        node.file_id().and_then(|id| self.tables.src_files.get(id))
    }

    /// Resolved load module name of a node, if it has one.
    pub fn load_module_name(&self, node: &CCNode) -> Option<&str> {
        node.load_module_id()
            .and_then(|id| self.tables.load_modules.get(id))
    }
}
