//! Computation graph model and builder.
//!
//! A conversion renders a tokenizer into a flat list of nodes over typed tensors.
//! Nodes are descriptions only: a node kind with its attributes, the tensors it consumes
//! and the tensors it produces. Execution is left to an external graph runtime.
//!
//! Batches of variable-length data are carried as ragged groups of tensors:
//! `[begins, ends, data]` for one ragged dimension, with `begins` and `ends` holding
//! half-open offsets into the shared flat `data` buffer, and
//! `[outer_begins, outer_ends, inner_begins, inner_ends, data]` for two.
//! String constants are flat `u8` tensors; string list constants are ragged triples.

use alloc::string::String;
use alloc::vec::Vec;

#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

/// Tensor element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[cfg_attr(feature = "serialization", derive(Deserialize, Serialize))]
pub enum ElementType {
    /// Raw bytes, including UTF-8 string data.
    U8,
    /// 32-bit signed integers.
    I32,
    /// 64-bit signed integers.
    I64,
    /// 32-bit floats.
    F32,
    /// Booleans.
    Bool,
    /// Opaque string tensors at the graph boundary.
    Str,
}

/// Unicode normalization form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[cfg_attr(feature = "serialization", derive(Deserialize, Serialize))]
pub enum UnicodeForm {
    Nfc,
    Nfd,
    Nfkc,
    Nfkd,
}
impl UnicodeForm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nfc => "NFC",
            Self::Nfd => "NFD",
            Self::Nfkc => "NFKC",
            Self::Nfkd => "NFKD",
        }
    }
}

/// Behavior of a regex split on a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[cfg_attr(feature = "serialization", derive(Deserialize, Serialize))]
pub enum SplitBehavior {
    /// Discard the matching parts, keep the parts between.
    Remove,
    /// Keep the matching parts as their own pieces.
    Isolate,
    /// Append the matching part to the preceding piece.
    MergeWithPrevious,
    /// Prepend the matching part to the following piece.
    MergeWithNext,
    /// Merge runs of consecutive matches into one piece.
    Contiguous,
}
impl SplitBehavior {
    /// The attribute value presented to the graph runtime.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Remove => "remove",
            Self::Isolate => "isolate",
            Self::MergeWithPrevious => "merge_with_previous",
            Self::MergeWithNext => "merge_with_next",
            Self::Contiguous => "contiguous",
        }
    }
}

/// Handle to a tensor within a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialization", derive(Deserialize, Serialize))]
pub struct TensorId(pub u32);

/// Handle to a node within a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialization", derive(Deserialize, Serialize))]
pub struct NodeId(pub u32);

/// Tensor shape. `-1` marks a dynamic dimension.
pub type Shape = Vec<i64>;

/// Errors from wiring ragged tensor groups.
#[non_exhaustive]
#[derive(Debug)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum GraphError {
    /// A ragged group with a tensor count other than 3 or 5.
    #[cfg_attr(feature = "std", error("invalid ragged group of {0} tensors, expected 3 or 5"))]
    InvalidGroup(usize),
    /// A ragged group with a nesting depth the operation does not accept.
    #[cfg_attr(
        feature = "std",
        error("ragged group of {0} tensors has the wrong nesting depth for this operation")
    )]
    UnexpectedNesting(usize),
    /// An input list that does not decompose into ragged groups.
    #[cfg_attr(feature = "std", error("input list of {0} tensors does not form ragged groups"))]
    InvalidGroupList(usize),
    /// A combine template naming a different number of sequences than provided.
    #[cfg_attr(
        feature = "std",
        error("combine template names {0} sequences but {1} were provided")
    )]
    SequenceMismatch(usize, usize),
}

/// Splits a ragged group into its leading outer tensors and the innermost
/// `[begins, ends, data]` triple.
///
/// A group of 3 has no outer tensors; a group of 5 carries one outer
/// `(begins, ends)` pair. Any other length is invalid.
pub fn split_ragged(group: &[TensorId]) -> Result<(&[TensorId], [TensorId; 3]), GraphError> {
    match group.len() {
        3 => Ok((&group[.. 0], [group[0], group[1], group[2]])),
        5 => Ok((&group[.. 2], [group[2], group[3], group[4]])),
        n => Err(GraphError::InvalidGroup(n)),
    }
}

/// Constant tensor payload.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Deserialize, Serialize))]
pub enum ConstantData {
    U8(Vec<u8>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    Bool(Vec<bool>),
}
impl ConstantData {
    pub fn len(&self) -> usize {
        match self {
            Self::U8(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::I64(v) => v.len(),
            Self::F32(v) => v.len(),
            Self::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            Self::U8(_) => ElementType::U8,
            Self::I32(_) => ElementType::I32,
            Self::I64(_) => ElementType::I64,
            Self::F32(_) => ElementType::F32,
            Self::Bool(_) => ElementType::Bool,
        }
    }
}

/// Node kind with its attributes.
///
/// Variable data like patterns, vocabularies and replacement tables is wired in as
/// constant tensor inputs rather than attributes, keeping attributes small and typed.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Deserialize, Serialize))]
pub enum Op {
    /// Graph input.
    Parameter { ty: ElementType, shape: Shape },
    /// Constant tensor.
    Constant { data: ConstantData, shape: Shape },
    /// Opaque string batch to `(begins, ends, bytes)`.
    StringUnpack,
    /// `(begins, ends, bytes)` to an opaque string batch.
    StringPack,
    /// Integer range `[start, stop)` with the given step.
    Range,
    /// Shape of a tensor as an `i32` vector.
    ShapeOf,
    /// Elementwise selection between two tensors by a boolean condition.
    Select,
    Equal,
    Greater,
    Add,
    Subtract,
    Multiply,
    Divide,
    Mod,
    Minimum,
    Maximum,
    /// Maximum over the axes given by the second input.
    ReduceMax,
    /// Concatenation along an axis.
    Concat { axis: i64 },
    /// Slice `(data, start, stop, step)` along the first axis.
    Slice,
    /// Broadcast to the shape given by the second input.
    Broadcast,
    /// Remove the axes given by the second input.
    Squeeze,
    /// Elementwise type conversion.
    Convert { to: ElementType },
    /// Runtime-mutable state cell, read once per inference.
    ReadValue { variable: String, default: i32 },
    /// Top-k selection along an axis; outputs values and indices.
    TopK { k: i64, axis: i64 },
    /// Case folding. Byte-level unless `utf8` is set.
    CaseFold { utf8: bool },
    /// Unicode normalization to a canonical form.
    NormalizeUnicode { form: UnicodeForm },
    /// Regex search and replace over string data.
    /// Inputs carry `(pattern, replacement)` constant pairs after the ragged group.
    RegexNormalization { global: bool },
    /// Precompiled character-map normalization with SentencePiece-style flags.
    CharsMapNormalization {
        add_dummy_prefix:          bool,
        remove_extra_whitespaces:  bool,
        escape_whitespaces:        bool,
        case_fold:                 bool,
        nmt:                       bool,
        form:                      Option<UnicodeForm>,
    },
    /// Regex split of string data into pieces, adding one ragged dimension
    /// on first use. An optional protected-string ragged triple follows the pattern.
    RegexSplit {
        behavior:   SplitBehavior,
        invert:     bool,
        max_splits: i32,
    },
    /// Byte to printable-character remapping for byte-level tokenization.
    BytesToChars,
    /// Greedy longest-prefix subword tokenization.
    WordpieceTokenizer {
        suffix_indicator:   String,
        max_bytes_per_word: u32,
    },
    /// Ranked pairwise-merge subword tokenization.
    BpeTokenizer {
        unk_token:        String,
        fuse_unk:         bool,
        suffix_indicator: String,
        end_suffix:       String,
        byte_fallback:    bool,
        cache_capacity:   u32,
    },
    /// Optimal-segmentation subword tokenization over scored pieces.
    UnigramTokenizer {
        unk_token_id:  i32,
        byte_fallback: bool,
    },
    /// Exact-match token lookup with a default id.
    VocabEncoder,
    /// Exact-match token lookup over a dense gap-filled vocabulary.
    TrieTokenizer,
    /// Interleaves ragged sequences and literal token groups into one example;
    /// outputs an id triple and a segment-id triple.
    CombineSegments,
    /// Ragged to dense padding; outputs the dense tensor and a boolean mask.
    RaggedToDense {
        pad_right:      bool,
        pad_max_length: bool,
    },
    /// Token-id to token-bytes lookup; outputs a nested ragged string batch.
    /// A trailing skip-id input decodes the listed ids to empty strings.
    VocabDecoder,
    /// Collapses the inner ragged dimension; outputs fused begins and ends.
    FuseRagged,
    /// Inverse byte-level remapping back to raw bytes.
    CharsToBytes,
    /// UTF-8 validation; replaces invalid sequences when `replace_mode` is set,
    /// drops them otherwise.
    Utf8Validate { replace_mode: bool },
    /// Expands `<0xNN>` byte tokens into raw bytes.
    ByteFallback,
}

impl Op {
    /// The node-type name presented to the graph runtime.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Parameter { .. } => "Parameter",
            Self::Constant { .. } => "Constant",
            Self::StringUnpack => "StringTensorUnpack",
            Self::StringPack => "StringTensorPack",
            Self::Range => "Range",
            Self::ShapeOf => "ShapeOf",
            Self::Select => "Select",
            Self::Equal => "Equal",
            Self::Greater => "Greater",
            Self::Add => "Add",
            Self::Subtract => "Subtract",
            Self::Multiply => "Multiply",
            Self::Divide => "Divide",
            Self::Mod => "Mod",
            Self::Minimum => "Minimum",
            Self::Maximum => "Maximum",
            Self::ReduceMax => "ReduceMax",
            Self::Concat { .. } => "Concat",
            Self::Slice => "Slice",
            Self::Broadcast => "Broadcast",
            Self::Squeeze => "Squeeze",
            Self::Convert { .. } => "Convert",
            Self::ReadValue { .. } => "ReadValue",
            Self::TopK { .. } => "TopK",
            Self::CaseFold { .. } => "CaseFold",
            Self::NormalizeUnicode { .. } => "NormalizeUnicode",
            Self::RegexNormalization { .. } => "RegexNormalization",
            Self::CharsMapNormalization { .. } => "CharsMapNormalization",
            Self::RegexSplit { .. } => "RegexSplit",
            Self::BytesToChars => "BytesToChars",
            Self::WordpieceTokenizer { .. } => "WordpieceTokenizer",
            Self::BpeTokenizer { .. } => "BPETokenizer",
            Self::UnigramTokenizer { .. } => "UnigramTokenizer",
            Self::VocabEncoder => "VocabEncoder",
            Self::TrieTokenizer => "TrieTokenizer",
            Self::CombineSegments => "CombineSegments",
            Self::RaggedToDense { .. } => "RaggedToDense",
            Self::VocabDecoder => "VocabDecoder",
            // the runtime registers this kind under its historical misspelling
            Self::FuseRagged => "FuzeRagged",
            Self::CharsToBytes => "CharsToBytes",
            Self::Utf8Validate { .. } => "UTF8Validate",
            Self::ByteFallback => "ByteFallback",
        }
    }
}

/// A node: one kind with its input and output tensors.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Deserialize, Serialize))]
pub struct Node {
    pub op:      Op,
    pub inputs:  Vec<TensorId>,
    pub outputs: Vec<TensorId>,
}

/// Tensor metadata.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Deserialize, Serialize))]
pub struct Tensor {
    /// The element type.
    pub ty:       ElementType,
    /// The node producing this tensor.
    pub producer: NodeId,
}

/// A named graph output.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Deserialize, Serialize))]
pub struct Output {
    pub tensor: TensorId,
    pub name:   String,
}

/// A built computation graph.
///
/// Nodes are stored in emission order. Order is not semantic: the data-flow edges
/// through tensor ids define the topology.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Deserialize, Serialize))]
pub struct Graph {
    pub name:    String,
    pub nodes:   Vec<Node>,
    pub tensors: Vec<Tensor>,
    /// Parameter tensors in declaration order.
    pub inputs:  Vec<TensorId>,
    pub outputs: Vec<Output>,
}

impl Graph {
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn tensor(&self, id: TensorId) -> &Tensor {
        &self.tensors[id.0 as usize]
    }

    /// The node producing the given tensor.
    pub fn producer(&self, id: TensorId) -> &Node {
        self.node(self.tensor(id).producer)
    }

    /// The tensor behind a named output, if present.
    pub fn output_named(&self, name: &str) -> Option<TensorId> {
        self.outputs.iter().find(|output| output.name == name).map(|output| output.tensor)
    }

    /// Iterates all nodes in emission order.
    pub fn ops(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Counts nodes with the given node-type name.
    pub fn count_ops(&self, name: &str) -> usize {
        self.nodes.iter().filter(|node| node.op.name() == name).count()
    }

    pub(crate) fn replace_input(&mut self, node: NodeId, index: usize, tensor: TensorId) {
        self.nodes[node.0 as usize].inputs[index] = tensor;
    }

    pub(crate) fn rename_output(&mut self, from: &str, to: &str) {
        for output in self.outputs.iter_mut() {
            if output.name == from {
                output.name = String::from(to);
            }
        }
    }
}

/// Incrementally builds a [`Graph`].
///
/// Also resumes finished graphs for restructuring: [`GraphBuilder::resume`] wraps an
/// existing graph so transformation passes can append nodes and rewire inputs in place.
#[derive(Debug)]
pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            graph: Graph {
                name:    name.into(),
                nodes:   Vec::new(),
                tensors: Vec::new(),
                inputs:  Vec::new(),
                outputs: Vec::new(),
            },
        }
    }

    /// Wraps an existing graph for further construction.
    pub fn resume(graph: Graph) -> Self {
        Self { graph }
    }

    /// The graph as built so far.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    fn push_tensor(&mut self, ty: ElementType, producer: NodeId) -> TensorId {
        let id = TensorId(self.graph.tensors.len() as u32);
        self.graph.tensors.push(Tensor { ty, producer });
        id
    }

    /// Appends a node, allocating one output tensor per element type given.
    pub fn apply(&mut self, op: Op, inputs: &[TensorId], outputs: &[ElementType]) -> Vec<TensorId> {
        let id = NodeId(self.graph.nodes.len() as u32);
        let outputs = outputs.iter().map(|&ty| self.push_tensor(ty, id)).collect::<Vec<_>>();
        self.graph.nodes.push(Node {
            op,
            inputs: inputs.into(),
            outputs: outputs.clone(),
        });
        outputs
    }

    /// Appends a single-output node.
    pub fn apply1(&mut self, op: Op, inputs: &[TensorId], output: ElementType) -> TensorId {
        self.apply(op, inputs, &[output])[0]
    }

    /// Declares a graph input.
    pub fn parameter(&mut self, ty: ElementType, shape: Shape) -> TensorId {
        let tensor = self.apply1(Op::Parameter { ty, shape }, &[], ty);
        self.graph.inputs.push(tensor);
        tensor
    }

    /// Appends a one-dimensional constant.
    pub fn constant(&mut self, data: ConstantData) -> TensorId {
        let shape = Vec::from([data.len() as i64]);
        self.constant_shaped(data, shape)
    }

    /// Appends a constant with an explicit shape.
    pub fn constant_shaped(&mut self, data: ConstantData, shape: Shape) -> TensorId {
        let ty = data.element_type();
        self.apply1(Op::Constant { data, shape }, &[], ty)
    }

    /// Appends a scalar `i32` constant.
    pub fn scalar_i32(&mut self, value: i32) -> TensorId {
        self.constant_shaped(ConstantData::I32(Vec::from([value])), Vec::new())
    }

    /// Appends a scalar boolean constant.
    pub fn scalar_bool(&mut self, value: bool) -> TensorId {
        self.constant_shaped(ConstantData::Bool(Vec::from([value])), Vec::new())
    }

    /// Appends a string constant as flat bytes.
    pub fn string_constant(&mut self, bytes: &[u8]) -> TensorId {
        self.constant(ConstantData::U8(bytes.into()))
    }

    /// Appends a string list constant as a ragged `(begins, ends, bytes)` triple.
    pub fn ragged_string_constant(&mut self, items: &[Vec<u8>]) -> [TensorId; 3] {
        let mut begins = Vec::with_capacity(items.len());
        let mut ends = Vec::with_capacity(items.len());
        let mut bytes = Vec::new();
        for item in items {
            begins.push(bytes.len() as i32);
            bytes.extend_from_slice(item);
            ends.push(bytes.len() as i32);
        }
        [
            self.constant(ConstantData::I32(begins)),
            self.constant(ConstantData::I32(ends)),
            self.constant(ConstantData::U8(bytes)),
        ]
    }

    /// Declares a named graph output.
    pub fn output(&mut self, tensor: TensorId, name: impl Into<String>) {
        self.graph.outputs.push(Output {
            tensor,
            name: name.into(),
        });
    }

    /// The element type of a tensor already added to the graph.
    pub fn tensor_type(&self, tensor: TensorId) -> ElementType {
        self.graph.tensors[tensor.0 as usize].ty
    }

    /// The id the next appended node will receive.
    pub fn next_node(&self) -> NodeId {
        NodeId(self.graph.nodes.len() as u32)
    }

    /// All `(node, input slot)` pairs consuming the given tensor.
    pub fn consumers_of(&self, tensor: TensorId) -> Vec<(NodeId, usize)> {
        let mut consumers = Vec::new();
        for (index, node) in self.graph.nodes.iter().enumerate() {
            for (slot, input) in node.inputs.iter().enumerate() {
                if *input == tensor {
                    consumers.push((NodeId(index as u32), slot));
                }
            }
        }
        consumers
    }

    pub(crate) fn replace_input(&mut self, node: NodeId, index: usize, tensor: TensorId) {
        self.graph.replace_input(node, index, tensor);
    }

    pub(crate) fn replace_inputs(&mut self, node: NodeId, inputs: Vec<TensorId>) {
        self.graph.nodes[node.0 as usize].inputs = inputs;
    }

    /// Redirects every consumer of `from` to read `to` instead.
    pub(crate) fn redirect(&mut self, from: TensorId, to: TensorId) {
        for (node, slot) in self.consumers_of(from) {
            self.replace_input(node, slot, to);
        }
    }

    pub(crate) fn rebind_output(&mut self, name: &str, tensor: TensorId) {
        for output in self.graph.outputs.iter_mut() {
            if output.name == name {
                output.tensor = tensor;
            }
        }
    }

    pub(crate) fn rename_output(&mut self, from: &str, to: &str) {
        self.graph.rename_output(from, to);
    }

    /// Changes the declared element type of an existing parameter.
    pub(crate) fn retype_parameter(&mut self, tensor: TensorId, to: ElementType) {
        let producer = self.graph.tensors[tensor.0 as usize].producer;
        if let Op::Parameter { ty, .. } = &mut self.graph.nodes[producer.0 as usize].op {
            *ty = to;
        }
        self.graph.tensors[tensor.0 as usize].ty = to;
    }

    /// Prepends a trivial ragged dimension over a flat `[begins, ends, data]` group,
    /// one element per batch item.
    pub fn add_ragged_dimension(&mut self, group: [TensorId; 3]) -> [TensorId; 5] {
        let shape = self.apply1(Op::ShapeOf, &[group[0]], ElementType::I32);
        let axes = self.constant(ConstantData::I32(Vec::from([0])));
        let batch = self.apply1(Op::Squeeze, &[shape, axes], ElementType::I32);
        let zero = self.scalar_i32(0);
        let one = self.scalar_i32(1);
        let stop = self.apply1(Op::Add, &[batch, one], ElementType::I32);
        let begins = self.apply1(Op::Range, &[zero, batch, one], ElementType::I32);
        let ends = self.apply1(Op::Range, &[one, stop, one], ElementType::I32);
        [begins, ends, group[0], group[1], group[2]]
    }

    pub fn finish(self) -> Graph {
        self.graph
    }
}
