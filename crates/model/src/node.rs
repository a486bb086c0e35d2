use serde::{Deserialize, Serialize};

use crate::kind::{ElementKind, NodeKind};

/// Column of a node's metric table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricStat {
    Min,
    Avg,
    Max,
}

impl MetricStat {
    pub const ALL: [MetricStat; 3] = [Self::Min, Self::Avg, Self::Max];

    pub fn index(self) -> usize {
        match self {
            Self::Min => 0,
            Self::Avg => 1,
            Self::Max => 2,
        }
    }
}

/// One program location in the calling context tree.
///
/// `id` shares the id space of the profile's XML `i` attributes; metric
/// rows hold min/avg/max across processes, one row per metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CCNode {
    pub id: u32,
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
    pub metrics: Vec<[f64; 3]>,
    pub kind: NodeKind,
    pub children: Vec<CCNode>,
}

impl CCNode {
    pub fn new(
        id: u32,
        start_line: Option<u32>,
        end_line: Option<u32>,
        metrics: Vec<[f64; 3]>,
        kind: NodeKind,
    ) -> Self {
        Self {
            id,
            start_line,
            end_line,
            metrics,
            kind,
            children: Vec::new(),
        }
    }

    pub fn add_child(&mut self, child: CCNode) {
        self.children.push(child);
    }

    pub fn name(&self) -> Option<&str> {
        self.kind.name()
    }

    pub fn file_id(&self) -> Option<u32> {
        self.kind.file_id()
    }

    pub fn load_module_id(&self) -> Option<u32> {
        self.kind.load_module_id()
    }

    pub fn element_kind(&self) -> ElementKind {
        self.kind.element_kind()
    }

    /// A single aggregated value, or `None` if `metric` is out of range.
    pub fn metric(&self, metric: usize, stat: MetricStat) -> Option<f64> {
        self.metrics.get(metric).map(|row| row[stat.index()])
    }

    /// Pre-order traversal: a node is yielded before its children, and
    /// siblings in document order.
    pub fn iter(&self) -> Traverse<'_> {
        Traverse { stack: vec![self] }
    }

    pub fn node_count(&self) -> usize {
        self.iter().count()
    }

    /// Number of nodes on the longest root-to-leaf path.
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(CCNode::depth).max().unwrap_or(0)
    }
}

/// Iterator returned by [`CCNode::iter`].
#[derive(Debug)]
pub struct Traverse<'a> {
    stack: Vec<&'a CCNode>,
}

impl<'a> Iterator for Traverse<'a> {
    type Item = &'a CCNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

impl<'a> IntoIterator for &'a CCNode {
    type Item = &'a CCNode;
    type IntoIter = Traverse<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stmt(id: u32) -> CCNode {
        CCNode::new(
            id,
            Some(id),
            Some(10),
            vec![[1.0, 2.0, 3.0]],
            NodeKind::Statement { file_id: None },
        )
    }

    #[test]
    fn traversal_is_preorder_in_document_order() {
        let mut root = stmt(1);
        let mut a = stmt(2);
        a.add_child(stmt(3));
        root.add_child(a);
        root.add_child(stmt(4));

        let ids: Vec<u32> = root.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(root.node_count(), 4);
        assert_eq!(root.depth(), 3);
    }

    #[test]
    fn metric_lookup_by_stat() {
        let node = stmt(1);
        assert_eq!(node.metric(0, MetricStat::Min), Some(1.0));
        assert_eq!(node.metric(0, MetricStat::Max), Some(3.0));
        assert_eq!(node.metric(1, MetricStat::Avg), None);
    }
}
