//! The nested schema of a read and the per-level information decoding is driven by.
//!
//! A [`Schema`] is built from the file's schema tree of [`SchemaNode`]s and flattened into an
//! arena of [`ColumnNode`]s, one per output node. Every leaf of the file schema becomes a
//! [`LeafColumn`] (an input column) that knows the path of output nodes from its top-level column
//! down to itself. That path is the leaf's nesting depth: a flat column has depth 1, a
//! `list<int>` has depth 2, a `struct<list<string>>` has depth 3.
//!
//! The definition level at which each node becomes valid, and the repetition level that starts a
//! new entry of each list, are derived here once. The preprocessor and decoder only compare
//! levels against them.

use std::fmt::{Display, Formatter};

use itertools::Itertools;
use strata_error::{StrataResult, strata_bail, strata_err};

use crate::PhysicalType;

/// Repetition of a field in the file schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repetition {
    Required,
    Optional,
    Repeated,
}

/// Logical annotation on a group that changes how it maps to output columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupAnnotation {
    None,
    List,
    Map,
}

/// Logical annotation on a primitive that changes how its values are presented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PrimitiveAnnotation {
    #[default]
    None,
    /// Byte arrays holding text (`STRING`, `UTF8`, `ENUM` or `JSON` in the file).
    String,
}

/// A node of the file schema as described by the file footer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaNode {
    pub name: String,
    pub repetition: Repetition,
    pub kind: SchemaNodeKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaNodeKind {
    Primitive {
        physical_type: PhysicalType,
        annotation: PrimitiveAnnotation,
    },
    Group {
        annotation: GroupAnnotation,
        children: Vec<SchemaNode>,
    },
}

impl SchemaNode {
    pub fn primitive(
        name: impl Into<String>,
        repetition: Repetition,
        physical_type: PhysicalType,
    ) -> Self {
        Self {
            name: name.into(),
            repetition,
            kind: SchemaNodeKind::Primitive {
                physical_type,
                annotation: PrimitiveAnnotation::None,
            },
        }
    }

    /// A byte array leaf annotated as text.
    pub fn string(name: impl Into<String>, repetition: Repetition) -> Self {
        Self {
            name: name.into(),
            repetition,
            kind: SchemaNodeKind::Primitive {
                physical_type: PhysicalType::ByteArray,
                annotation: PrimitiveAnnotation::String,
            },
        }
    }

    pub fn group(
        name: impl Into<String>,
        repetition: Repetition,
        annotation: GroupAnnotation,
        children: Vec<SchemaNode>,
    ) -> Self {
        Self {
            name: name.into(),
            repetition,
            kind: SchemaNodeKind::Group {
                annotation,
                children,
            },
        }
    }

    /// A list in the standard three-level layout:
    /// `<repetition> group <name> (LIST) { repeated group list { <element> } }`.
    pub fn list(name: impl Into<String>, repetition: Repetition, element: SchemaNode) -> Self {
        Self::group(
            name,
            repetition,
            GroupAnnotation::List,
            vec![Self::group(
                "list",
                Repetition::Repeated,
                GroupAnnotation::None,
                vec![element],
            )],
        )
    }

    fn num_leaves(&self) -> usize {
        match &self.kind {
            SchemaNodeKind::Primitive { .. } => 1,
            SchemaNodeKind::Group { children, .. } => {
                children.iter().map(SchemaNode::num_leaves).sum()
            }
        }
    }
}

/// The shape of an output node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Struct,
    List,
    Leaf(PhysicalType),
}

/// One node of the output column tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnNode {
    pub name: String,
    pub kind: NodeKind,
    pub nullable: bool,
    /// Definition level at or above which an entry of this node is non-null.
    pub def_valid: u16,
    /// For lists, the repetition level that starts a new element of this list.
    pub rep_level: u16,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// Set on leaves only.
    pub annotation: PrimitiveAnnotation,
    /// The input column that writes this node's offsets and validity. Other leaves below a shared
    /// struct or list only cross-check its sizes.
    pub owner: usize,
}

/// An input column: one leaf of the file schema and the output nodes above it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafColumn {
    /// Position of this leaf's chunk within a row group.
    pub chunk_index: usize,
    pub physical_type: PhysicalType,
    pub max_def: u16,
    pub max_rep: u16,
    /// Output node index per nesting depth, from the top-level column down to the leaf.
    pub path: Vec<usize>,
}

impl LeafColumn {
    pub fn depth(&self) -> usize {
        self.path.len()
    }

    pub fn has_lists(&self) -> bool {
        self.max_rep > 0
    }
}

/// The output column tree of a read, with its input columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<SchemaNode>,
    nodes: Vec<ColumnNode>,
    roots: Vec<usize>,
    leaves: Vec<LeafColumn>,
    num_file_leaves: usize,
}

impl Schema {
    /// Build the schema of a file from its top-level fields.
    pub fn try_new(fields: Vec<SchemaNode>) -> StrataResult<Self> {
        let num_file_leaves = fields.iter().map(SchemaNode::num_leaves).sum();
        let selected = (0..fields.len()).collect_vec();
        Self::build(fields, &selected, num_file_leaves)
    }

    fn build(
        fields: Vec<SchemaNode>,
        selected: &[usize],
        num_file_leaves: usize,
    ) -> StrataResult<Self> {
        let leaf_offsets = fields
            .iter()
            .scan(0, |acc, field| {
                let start = *acc;
                *acc += field.num_leaves();
                Some(start)
            })
            .collect_vec();

        let mut builder = Builder::default();
        for &idx in selected {
            builder.next_chunk = leaf_offsets[idx];
            let field = &fields[idx];
            let root = builder.visit(field, field.repetition, None, 0, 0, &mut Vec::new())?;
            builder.roots.push(root);
        }

        let Builder {
            mut nodes,
            roots,
            leaves,
            ..
        } = builder;

        // A shared node is owned by the first leaf below it.
        for (leaf_idx, leaf) in leaves.iter().enumerate().rev() {
            for &node in &leaf.path {
                nodes[node].owner = leaf_idx;
            }
        }

        log::trace!(
            "schema with {} output nodes, {} input columns",
            nodes.len(),
            leaves.len()
        );

        Ok(Self {
            fields,
            nodes,
            roots,
            leaves,
            num_file_leaves,
        })
    }

    /// Restrict the schema to the named top-level columns, in the given order.
    pub fn project<S: AsRef<str>>(&self, names: &[S]) -> StrataResult<Self> {
        let selected = names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                self.fields
                    .iter()
                    .position(|f| f.name == name)
                    .ok_or_else(|| strata_err!("no top-level column named {name:?}"))
            })
            .collect::<StrataResult<Vec<_>>>()?;
        Self::build(self.fields.clone(), &selected, self.num_file_leaves)
    }

    /// Present every unannotated byte array leaf as text.
    ///
    /// Applies to this schema only; a later [`project`][Self::project] starts again from the
    /// annotations of the file.
    pub fn with_binary_as_strings(mut self) -> Self {
        for node in &mut self.nodes {
            if node.kind == NodeKind::Leaf(PhysicalType::ByteArray) {
                node.annotation = PrimitiveAnnotation::String;
            }
        }
        self
    }

    /// The top-level fields of the file schema this schema was built from.
    pub fn fields(&self) -> &[SchemaNode] {
        &self.fields
    }

    pub fn nodes(&self) -> &[ColumnNode] {
        &self.nodes
    }

    pub fn node(&self, idx: usize) -> &ColumnNode {
        &self.nodes[idx]
    }

    /// Output node index of each top-level column.
    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn leaves(&self) -> &[LeafColumn] {
        &self.leaves
    }

    /// Number of column chunks each row group of the file holds.
    pub fn num_file_leaves(&self) -> usize {
        self.num_file_leaves
    }

    pub fn column_names(&self) -> Vec<String> {
        self.roots
            .iter()
            .map(|r| self.nodes[*r].name.clone())
            .collect()
    }

    /// The deepest nesting of any input column.
    pub fn max_depth(&self) -> usize {
        self.leaves.iter().map(LeafColumn::depth).max().unwrap_or(0)
    }

    pub fn has_lists(&self) -> bool {
        self.leaves.iter().any(LeafColumn::has_lists)
    }

    /// The shallowest depth at which a value with repetition level `rep` adds an entry.
    #[inline]
    pub fn start_depth(&self, leaf: &LeafColumn, rep: u16) -> usize {
        if rep == 0 {
            return 0;
        }
        leaf.path
            .iter()
            .position(|n| {
                let node = &self.nodes[*n];
                node.kind == NodeKind::List && node.rep_level == rep
            })
            .map_or(leaf.depth(), |d| d + 1)
    }

    /// The deepest depth at which a value with definition level `def` has an entry.
    ///
    /// Children of structs always have an entry, possibly null. Children of lists only have one
    /// when the list is present and non-empty.
    #[inline]
    pub fn end_depth(&self, leaf: &LeafColumn, def: u16) -> usize {
        let last = leaf.depth() - 1;
        for (d, n) in leaf.path[..last].iter().enumerate() {
            let node = &self.nodes[*n];
            if node.kind == NodeKind::List && def < node.def_valid + 1 {
                return d;
            }
        }
        last
    }
}

#[derive(Default)]
struct Builder {
    nodes: Vec<ColumnNode>,
    roots: Vec<usize>,
    leaves: Vec<LeafColumn>,
    next_chunk: usize,
}

impl Builder {
    fn push_node(
        &mut self,
        name: &str,
        kind: NodeKind,
        nullable: bool,
        def_valid: u16,
        rep_level: u16,
        parent: Option<usize>,
    ) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(ColumnNode {
            name: name.to_string(),
            kind,
            nullable,
            def_valid,
            rep_level,
            parent,
            children: Vec::new(),
            annotation: PrimitiveAnnotation::None,
            owner: 0,
        });
        if let Some(parent) = parent {
            self.nodes[parent].children.push(idx);
        }
        idx
    }

    /// Visit `node` as if it had `repetition`, with `def`/`rep` the levels of its parent.
    fn visit(
        &mut self,
        node: &SchemaNode,
        repetition: Repetition,
        parent: Option<usize>,
        def: u16,
        rep: u16,
        path: &mut Vec<usize>,
    ) -> StrataResult<usize> {
        if repetition == Repetition::Repeated {
            // An unannotated repeated field is a required list of required elements.
            let list = self.push_node(&node.name, NodeKind::List, false, def, rep + 1, parent);
            path.push(list);
            self.visit(node, Repetition::Required, Some(list), def + 1, rep + 1, path)?;
            path.pop();
            return Ok(list);
        }

        let nullable = repetition == Repetition::Optional;
        let def = def + u16::from(nullable);

        match &node.kind {
            SchemaNodeKind::Primitive {
                physical_type,
                annotation,
            } => {
                let leaf = self.push_node(
                    &node.name,
                    NodeKind::Leaf(*physical_type),
                    nullable,
                    def,
                    rep,
                    parent,
                );
                self.nodes[leaf].annotation = *annotation;
                path.push(leaf);
                self.leaves.push(LeafColumn {
                    chunk_index: self.next_chunk,
                    physical_type: *physical_type,
                    max_def: def,
                    max_rep: rep,
                    path: path.clone(),
                });
                self.next_chunk += 1;
                path.pop();
                Ok(leaf)
            }
            SchemaNodeKind::Group {
                annotation: annotation @ (GroupAnnotation::List | GroupAnnotation::Map),
                children,
            } => {
                let [repeated] = children.as_slice() else {
                    strata_bail!(
                        InvalidSerde: "{:?} group {:?} must have exactly one child, found {}",
                        annotation,
                        node.name,
                        children.len()
                    );
                };
                if repeated.repetition != Repetition::Repeated {
                    strata_bail!(
                        InvalidSerde: "child {:?} of {:?} group {:?} must be repeated",
                        repeated.name,
                        annotation,
                        node.name
                    );
                }

                let list = self.push_node(&node.name, NodeKind::List, nullable, def, rep + 1, parent);
                path.push(list);
                let element_def = def + 1;
                let element_rep = rep + 1;
                match &repeated.kind {
                    SchemaNodeKind::Group {
                        children: grandchildren,
                        ..
                    } if *annotation == GroupAnnotation::List
                        && grandchildren.len() == 1
                        && repeated.name != "array"
                        && repeated.name != format!("{}_tuple", node.name) =>
                    {
                        // Three-level layout, the element is the single child of the repeated group.
                        let element = &grandchildren[0];
                        self.visit(
                            element,
                            element.repetition,
                            Some(list),
                            element_def,
                            element_rep,
                            path,
                        )?;
                    }
                    _ => {
                        // Two-level layout and maps, the repeated field itself is the element.
                        self.visit(
                            repeated,
                            Repetition::Required,
                            Some(list),
                            element_def,
                            element_rep,
                            path,
                        )?;
                    }
                }
                path.pop();
                Ok(list)
            }
            SchemaNodeKind::Group { children, .. } => {
                if children.is_empty() {
                    strata_bail!(InvalidSerde: "group {:?} has no children", node.name);
                }
                let group = self.push_node(&node.name, NodeKind::Struct, nullable, def, rep, parent);
                path.push(group);
                for child in children {
                    self.visit(child, child.repetition, Some(group), def, rep, path)?;
                }
                path.pop();
                Ok(group)
            }
        }
    }
}

/// The logical type of a top-level or nested output column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Primitive(PhysicalType),
    /// Byte arrays presented as text.
    String,
    List(Box<Field>),
    Struct(Vec<Field>),
}

/// A named, possibly nullable column type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub nullable: bool,
    pub dtype: ColumnType,
}

impl Field {
    /// The type of the output subtree rooted at `node`.
    pub fn from_node(schema: &Schema, node: usize) -> Self {
        let n = schema.node(node);
        let dtype = match n.kind {
            NodeKind::Leaf(PhysicalType::ByteArray)
                if n.annotation == PrimitiveAnnotation::String =>
            {
                ColumnType::String
            }
            NodeKind::Leaf(physical_type) => ColumnType::Primitive(physical_type),
            NodeKind::List => {
                ColumnType::List(Box::new(Field::from_node(schema, n.children[0])))
            }
            NodeKind::Struct => ColumnType::Struct(
                n.children
                    .iter()
                    .map(|c| Field::from_node(schema, *c))
                    .collect(),
            ),
        };
        Self {
            name: n.name.clone(),
            nullable: n.nullable,
            dtype,
        }
    }
}

impl Display for ColumnType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primitive(p) => write!(f, "{p}"),
            Self::String => write!(f, "string"),
            Self::List(element) => write!(f, "list<{}>", element.dtype),
            Self::Struct(fields) => write!(
                f,
                "struct<{}>",
                fields
                    .iter()
                    .map(|field| format!("{}: {}", field.name, field.dtype))
                    .join(", ")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PhysicalType::*;
    use crate::schema::Repetition::*;

    fn nested_schema() -> Schema {
        Schema::try_new(vec![
            SchemaNode::primitive("id", Required, Int64),
            SchemaNode::list(
                "tags",
                Optional,
                SchemaNode::primitive("element", Optional, ByteArray),
            ),
            SchemaNode::group(
                "point",
                Optional,
                GroupAnnotation::None,
                vec![
                    SchemaNode::primitive("x", Required, Double),
                    SchemaNode::primitive("y", Optional, Double),
                ],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn levels_of_nested_leaves() {
        let schema = nested_schema();
        let leaves = schema.leaves();
        assert_eq!(leaves.len(), 4);

        assert_eq!((leaves[0].max_def, leaves[0].max_rep), (0, 0));
        assert_eq!((leaves[1].max_def, leaves[1].max_rep), (3, 1));
        assert_eq!((leaves[2].max_def, leaves[2].max_rep), (1, 0));
        assert_eq!((leaves[3].max_def, leaves[3].max_rep), (2, 0));
        assert_eq!(
            leaves.iter().map(|l| l.chunk_index).collect_vec(),
            vec![0, 1, 2, 3]
        );

        let list = schema.node(leaves[1].path[0]);
        assert_eq!(list.kind, NodeKind::List);
        assert_eq!((list.def_valid, list.rep_level), (1, 1));
        assert!(list.nullable);

        // The struct is shared by x and y and owned by x.
        let point = schema.node(leaves[2].path[0]);
        assert_eq!(point.kind, NodeKind::Struct);
        assert_eq!(point.owner, 2);
        assert_eq!(leaves[3].path[0], leaves[2].path[0]);
    }

    #[test]
    fn depth_bounds_of_a_list() {
        let schema = nested_schema();
        let tags = &schema.leaves()[1];
        // null list, empty list, null element, element
        assert_eq!(schema.end_depth(tags, 0), 0);
        assert_eq!(schema.end_depth(tags, 1), 0);
        assert_eq!(schema.end_depth(tags, 2), 1);
        assert_eq!(schema.end_depth(tags, 3), 1);
        assert_eq!(schema.start_depth(tags, 0), 0);
        assert_eq!(schema.start_depth(tags, 1), 1);
    }

    #[test]
    fn legacy_list_layouts() {
        let schema = Schema::try_new(vec![
            // two-level list of required ints
            SchemaNode::group(
                "a",
                Optional,
                GroupAnnotation::List,
                vec![SchemaNode::primitive("element", Repeated, Int32)],
            ),
            // bare repeated field
            SchemaNode::primitive("b", Repeated, Int32),
            // map<int, int>
            SchemaNode::group(
                "m",
                Optional,
                GroupAnnotation::Map,
                vec![SchemaNode::group(
                    "key_value",
                    Repeated,
                    GroupAnnotation::None,
                    vec![
                        SchemaNode::primitive("key", Required, Int32),
                        SchemaNode::primitive("value", Optional, Int32),
                    ],
                )],
            ),
        ])
        .unwrap();
        let leaves = schema.leaves();
        assert_eq!((leaves[0].max_def, leaves[0].max_rep, leaves[0].depth()), (2, 1, 2));
        assert_eq!((leaves[1].max_def, leaves[1].max_rep, leaves[1].depth()), (1, 1, 2));
        assert!(!schema.node(leaves[1].path[0]).nullable);
        // map -> list<struct<key, value>>
        assert_eq!(leaves[2].depth(), 3);
        assert_eq!((leaves[3].max_def, leaves[3].max_rep), (3, 1));
        assert_eq!(
            Field::from_node(&schema, schema.roots()[2]).dtype.to_string(),
            "list<struct<key: int32, value: int32>>"
        );
    }

    #[test]
    fn malformed_list_is_rejected() {
        let err = Schema::try_new(vec![SchemaNode::group(
            "bad",
            Optional,
            GroupAnnotation::List,
            vec![SchemaNode::primitive("element", Optional, Int32)],
        )])
        .unwrap_err();
        assert_eq!(err.kind(), strata_error::ErrorKind::Format);
    }

    #[test]
    fn projection_keeps_chunk_positions() {
        let schema = nested_schema();
        let projected = schema.project(&["point", "id"]).unwrap();
        assert_eq!(projected.column_names(), vec!["point", "id"]);
        assert_eq!(
            projected.leaves().iter().map(|l| l.chunk_index).collect_vec(),
            vec![2, 3, 0]
        );
        assert_eq!(projected.num_file_leaves(), 4);
        assert!(schema.project(&["missing"]).is_err());
    }

    #[test]
    fn text_and_binary_leaves() {
        let schema = Schema::try_new(vec![
            SchemaNode::string("name", Optional),
            SchemaNode::primitive("blob", Optional, ByteArray),
            SchemaNode::primitive("id", Required, Int32),
        ])
        .unwrap();
        let dtypes = |schema: &Schema| {
            schema
                .roots()
                .iter()
                .map(|r| Field::from_node(schema, *r).dtype)
                .collect_vec()
        };
        assert_eq!(
            dtypes(&schema),
            vec![
                ColumnType::String,
                ColumnType::Primitive(ByteArray),
                ColumnType::Primitive(Int32)
            ]
        );

        let forced = schema.clone().with_binary_as_strings();
        assert_eq!(
            dtypes(&forced),
            vec![
                ColumnType::String,
                ColumnType::String,
                ColumnType::Primitive(Int32)
            ]
        );
        // Projection starts again from the file's annotations.
        assert_eq!(dtypes(&forced.project(&["blob"]).unwrap()), vec![
            ColumnType::Primitive(ByteArray)
        ]);
    }
}
