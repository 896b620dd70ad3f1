//! Post-build graph transformations.
//!
//! These passes restructure finished graphs rather than pipeline steps:
//! widening a single-input tokenizer to accept sequence pairs, rewriting the
//! recorded toggle constants into runtime-settable state, attaching greedy
//! decoding to a generation graph and changing boundary tensor types. All of
//! them locate their targets through the [`ExtensionPoints`] recorded at build
//! time instead of pattern-matching node structure.
//!
//! [`ExtensionPoints`]: crate::artifacts::ExtensionPoints

use alloc::string::String;
use alloc::vec::Vec;

use crate::artifacts::{Artifacts, TogglePoint};
use crate::config::OutputType;
use crate::graph::{ConstantData, ElementType, Graph, GraphBuilder, Op};
use crate::steps::processing::TemplateGroup;

/// Variable id of the tokenizer's special-token insertion switch.
pub const ADD_SPECIAL_TOKENS_VARIABLE: &str = "add_special_tokens";
/// Variable id of the detokenizer's special-token skip switch.
pub const SKIP_SPECIAL_TOKENS_VARIABLE: &str = "skip_special_tokens";
/// Output name of the token ids produced by greedy decoding.
pub const TOKEN_IDS_NAME: &str = "token_ids";

/// Errors from post-build graph transformations.
#[non_exhaustive]
#[derive(Debug)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum TransformError {
    /// Widening expects a tokenizer with exactly one string input.
    #[cfg_attr(feature = "std", error("expected a single-input tokenizer, found {0} inputs"))]
    UnexpectedInputs(usize),
    /// The artifacts record no extension point of the named kind.
    #[cfg_attr(feature = "std", error("the artifacts record no {0} extension point"))]
    MissingPoint(&'static str),
    /// The metadata carries no pair combine template to widen with.
    #[cfg_attr(feature = "std", error("the tokenizer metadata has no pair combine template"))]
    MissingPairTemplate,
    /// The pair template does not extend the single-sequence template.
    #[cfg_attr(
        feature = "std",
        error("the pair combine template does not extend the single-sequence template")
    )]
    TemplateMismatch,
    /// A pair template token was never resolved against the vocabulary.
    #[cfg_attr(feature = "std", error("pair template token {0:?} has no resolved id"))]
    MissingToken(String),
    /// The graph has no output with the requested name.
    #[cfg_attr(feature = "std", error("the graph has no output named {0:?}"))]
    MissingOutput(String),
}

/// Reopens a graph for in-place restructuring, leaving a placeholder behind.
fn edit(graph: &mut Graph) -> GraphBuilder {
    let placeholder = Graph {
        name:    String::new(),
        nodes:   Vec::new(),
        tensors: Vec::new(),
        inputs:  Vec::new(),
        outputs: Vec::new(),
    };
    GraphBuilder::resume(core::mem::replace(graph, placeholder))
}

fn element_type(output: OutputType) -> ElementType {
    match output {
        OutputType::I32 => ElementType::I32,
        OutputType::I64 => ElementType::I64,
    }
}

/// Widens a single-input tokenizer into a two-input one for sequence pairs.
///
/// The second string input is concatenated into the existing unpack so the
/// whole front of the pipeline runs over both sequences as one batch; the
/// tokenized rows are then sliced back apart by the input row counts and fed
/// to the combine node per the pair template. The pair template must repeat
/// the single template's groups as a prefix; only its extra groups append new
/// combine inputs.
///
/// An absent second input still produces valid output: its rows slice to
/// empty, and the extra template tokens are multiplied by a presence flag so
/// they only materialize when a second sequence exists. Each such multiply is
/// recorded as a toggle point alongside the existing ones.
pub fn widen_to_pair(artifacts: &mut Artifacts) -> Result<(), TransformError> {
    let unpack = artifacts.points.unpack.ok_or(TransformError::MissingPoint("string unpack"))?;
    let combine = artifacts.points.combine.ok_or(TransformError::MissingPoint("combine"))?;
    let sequence = artifacts.points.sequence.ok_or(TransformError::MissingPoint("sequence"))?;
    let truncation = artifacts.points.truncation;
    if artifacts.tokenizer.inputs.len() != 1 {
        return Err(TransformError::UnexpectedInputs(artifacts.tokenizer.inputs.len()));
    }

    let single = artifacts.metadata.single.as_ref().ok_or(TransformError::MissingPairTemplate)?;
    let pair = artifacts.metadata.pair.as_ref().ok_or(TransformError::MissingPairTemplate)?;
    if single.sequence_count() != 1 || pair.sequence_count() != 2 {
        return Err(TransformError::TemplateMismatch);
    }
    let extension_added = pair.added_count().saturating_sub(single.added_count()) as i32;
    let single_groups = single.groups();
    let pair_groups = pair.groups();
    if pair_groups.len() <= single_groups.len() || pair_groups[.. single_groups.len()] != single_groups[..] {
        return Err(TransformError::TemplateMismatch);
    }

    let first = artifacts.tokenizer.inputs[0];
    let mut inputs = artifacts.tokenizer.node(combine).inputs.clone();
    if inputs.len() != 3 * single_groups.len() + 1 {
        return Err(TransformError::TemplateMismatch);
    }
    inputs.pop();

    let mut builder = edit(&mut artifacts.tokenizer);
    let second = builder.parameter(ElementType::Str, Vec::from([-1]));
    let joined = builder.apply1(Op::Concat { axis: 0 }, &[first, second], ElementType::Str);
    builder.replace_input(unpack, 0, joined);

    // Row counts of each batch part, recovered from the input shapes.
    let [begins, ends, data] = sequence;
    let first_size = builder.apply1(Op::ShapeOf, &[first], ElementType::I32);
    let second_size = builder.apply1(Op::ShapeOf, &[second], ElementType::I32);
    let total = builder.apply1(Op::ShapeOf, &[begins], ElementType::I32);

    let zero = builder.constant(ConstantData::I32(Vec::from([0])));
    let one = builder.constant(ConstantData::I32(Vec::from([1])));

    let begins_1 = builder.apply1(Op::Slice, &[begins, zero, first_size, one], ElementType::I32);
    let ends_1 = builder.apply1(Op::Slice, &[ends, zero, first_size, one], ElementType::I32);

    // An empty second input still has to slice at least one row so the shapes
    // stay broadcastable; the selects below zero it back out.
    let from_end = builder.apply1(Op::Subtract, &[total, second_size], ElementType::I32);
    let last = builder.apply1(Op::Subtract, &[total, one], ElementType::I32);
    let second_start = builder.apply1(Op::Minimum, &[from_end, last], ElementType::I32);
    let begins_2 = builder.apply1(Op::Slice, &[begins, second_start, total, one], ElementType::I32);
    let ends_2 = builder.apply1(Op::Slice, &[ends, second_start, total, one], ElementType::I32);
    let missing = builder.apply1(Op::Equal, &[second_size, zero], ElementType::Bool);
    let begins_2 = builder.apply1(Op::Select, &[missing, zero, begins_2], ElementType::I32);
    let ends_2 = builder.apply1(Op::Select, &[missing, zero, ends_2], ElementType::I32);

    // Both halves broadcast to a common row count so a lone first sequence
    // still pairs up with an empty second row.
    let rows = builder.apply1(Op::Maximum, &[first_size, second_size], ElementType::I32);
    let begins_1 = builder.apply1(Op::Broadcast, &[begins_1, rows], ElementType::I32);
    let ends_1 = builder.apply1(Op::Broadcast, &[ends_1, rows], ElementType::I32);
    let begins_2 = builder.apply1(Op::Broadcast, &[begins_2, rows], ElementType::I32);
    let ends_2 = builder.apply1(Op::Broadcast, &[ends_2, rows], ElementType::I32);

    let mut first_half = [begins_1, ends_1, data];
    let mut second_half = [begins_2, ends_2, data];

    // The single-sequence truncation upstream no longer applies; the length
    // budget is re-derived here, split across both halves, minus the extra
    // tokens the pair template inserts.
    if let Some(truncation) = truncation {
        let budget = truncation.max_length.saturating_sub(extension_added);
        let caps = [budget - budget / 2, budget / 2];
        let length_1 = builder.apply1(Op::Subtract, &[first_half[1], first_half[0]], ElementType::I32);
        let length_2 = builder.apply1(Op::Subtract, &[second_half[1], second_half[0]], ElementType::I32);
        let combined = builder.apply1(Op::Add, &[length_1, length_2], ElementType::I32);
        let limit = builder.constant(ConstantData::I32(Vec::from([budget])));
        let over = builder.apply1(Op::Greater, &[combined, limit], ElementType::Bool);
        for (half, length, cap) in [(&mut first_half, length_1, caps[0]), (&mut second_half, length_2, caps[1])] {
            let cap = builder.constant(ConstantData::I32(Vec::from([cap])));
            let cap = builder.apply1(Op::Select, &[over, cap, length], ElementType::I32);
            let length = builder.apply1(Op::Minimum, &[length, cap], ElementType::I32);
            if truncation.right {
                half[1] = builder.apply1(Op::Add, &[half[0], length], ElementType::I32);
            } else {
                half[0] = builder.apply1(Op::Subtract, &[half[1], length], ElementType::I32);
            }
        }
    }

    // Rebuild the combine inputs: the single template's groups stay in place
    // with the sequence slots swapped for the first half, the pair template's
    // extra groups append after, then the new segment ids close the list.
    let mut segment_ids = Vec::new();
    for (index, group) in single_groups.iter().enumerate() {
        match group {
            TemplateGroup::Sequence { segment } => {
                inputs[3 * index] = first_half[0];
                inputs[3 * index + 1] = first_half[1];
                inputs[3 * index + 2] = first_half[2];
                segment_ids.push(*segment);
            }
            TemplateGroup::Tokens { segment, .. } => segment_ids.push(*segment),
        }
    }
    let present = builder.apply1(Op::Select, &[missing, zero, one], ElementType::I32);
    for group in &pair_groups[single_groups.len() ..] {
        match group {
            TemplateGroup::Sequence { segment } => {
                inputs.extend(second_half);
                segment_ids.push(*segment);
            }
            TemplateGroup::Tokens { tokens, segment, enabled } => {
                let ids = tokens
                    .iter()
                    .map(|(content, id)| {
                        id.map(|id| id as i32).ok_or_else(|| TransformError::MissingToken(content.clone()))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let count = ids.len() as i32;
                inputs.push(builder.scalar_i32(0));
                let flag = builder.scalar_bool(*enabled);
                let count_const = builder.scalar_i32(count);
                let none = builder.scalar_i32(0);
                let gated = builder.apply1(Op::Select, &[flag, count_const, none], ElementType::I32);
                let toggle = builder.next_node();
                let lengths = builder.apply1(Op::Multiply, &[gated, present], ElementType::I32);
                artifacts.points.special_ends.push(TogglePoint {
                    node:  toggle,
                    slot:  0,
                    value: count,
                });
                inputs.push(lengths);
                inputs.push(builder.constant(ConstantData::I32(ids)));
                segment_ids.push(*segment);
            }
        }
    }
    inputs.push(builder.constant(ConstantData::I32(segment_ids)));
    builder.replace_inputs(combine, inputs);

    artifacts.tokenizer = builder.finish();
    Ok(())
}

/// Rewrites the recorded toggle constants into runtime-settable state reads.
///
/// Each toggled slot becomes its count multiplied by a `ReadValue` over a
/// named variable, defaulting to the flag the pipeline was converted with, so
/// a runtime that never writes the variable keeps the converted behavior.
/// Special-token insertion gates share one variable on the tokenizer side and
/// the skip bound reads another on the detokenizer side.
pub fn make_stateful(artifacts: &mut Artifacts) {
    if !artifacts.points.special_ends.is_empty() {
        let default = artifacts.metadata.configuration.add_special_tokens as i32;
        let mut builder = edit(&mut artifacts.tokenizer);
        let state = builder.apply1(
            Op::ReadValue {
                variable: String::from(ADD_SPECIAL_TOKENS_VARIABLE),
                default,
            },
            &[],
            ElementType::I32,
        );
        for point in &artifacts.points.special_ends {
            let count = builder.scalar_i32(point.value);
            let gated = builder.apply1(Op::Multiply, &[count, state], ElementType::I32);
            builder.replace_input(point.node, point.slot, gated);
        }
        artifacts.tokenizer = builder.finish();
    }
    if let (Some(skip), Some(detokenizer)) = (artifacts.points.skip, artifacts.detokenizer.as_mut()) {
        let default = artifacts.metadata.configuration.skip_special_tokens as i32;
        let mut builder = edit(detokenizer);
        let state = builder.apply1(
            Op::ReadValue {
                variable: String::from(SKIP_SPECIAL_TOKENS_VARIABLE),
                default,
            },
            &[],
            ElementType::I32,
        );
        let bound = builder.constant(ConstantData::I32(Vec::from([skip.value])));
        let gated = builder.apply1(Op::Multiply, &[bound, state], ElementType::I32);
        builder.replace_input(skip.node, skip.slot, gated);
        *detokenizer = builder.finish();
    }
}

/// Appends an argmax over the last axis of a generation model's logits and
/// exposes the picked ids under [`TOKEN_IDS_NAME`] in place of the original
/// output.
pub fn add_greedy_decoding(graph: &mut Graph, logits_output: &str, output: OutputType) -> Result<(), TransformError> {
    let logits = graph
        .output_named(logits_output)
        .ok_or_else(|| TransformError::MissingOutput(String::from(logits_output)))?;
    let mut builder = edit(graph);
    let ty = builder.tensor_type(logits);
    let picked = builder.apply(Op::TopK { k: 1, axis: -1 }, &[logits], &[ty, ElementType::I32]);
    let axes = builder.constant(ConstantData::I32(Vec::from([-1])));
    let mut ids = builder.apply1(Op::Squeeze, &[picked[1], axes], ElementType::I32);
    if output == OutputType::I64 {
        ids = builder.apply1(Op::Convert { to: ElementType::I64 }, &[ids], ElementType::I64);
    }
    builder.rebind_output(logits_output, ids);
    builder.rename_output(logits_output, TOKEN_IDS_NAME);
    *graph = builder.finish();
    Ok(())
}

/// Converts every integer output of the graph to the requested element type.
///
/// String outputs pass through untouched; a graph already producing the
/// requested type is left unchanged.
pub fn change_outputs_type(graph: &mut Graph, to: OutputType) {
    let target = element_type(to);
    let outputs = graph.outputs.clone();
    let mut builder = edit(graph);
    for output in outputs {
        let ty = builder.tensor_type(output.tensor);
        if ty == target || !matches!(ty, ElementType::I32 | ElementType::I64) {
            continue;
        }
        let converted = builder.apply1(Op::Convert { to: target }, &[output.tensor], target);
        builder.rebind_output(&output.name, converted);
    }
    *graph = builder.finish();
}

/// Retypes every integer parameter to the requested element type, converting
/// back right at the boundary so the interior keeps its original wiring.
pub fn change_inputs_type(graph: &mut Graph, to: OutputType) {
    let target = element_type(to);
    let inputs = graph.inputs.clone();
    let mut builder = edit(graph);
    for input in inputs {
        let ty = builder.tensor_type(input);
        if ty == target || !matches!(ty, ElementType::I32 | ElementType::I64) {
            continue;
        }
        let consumers = builder.consumers_of(input);
        builder.retype_parameter(input, target);
        let converted = builder.apply1(Op::Convert { to: ty }, &[input], ty);
        for (node, slot) in consumers {
            builder.replace_input(node, slot, converted);
        }
    }
    *graph = builder.finish();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Configuration, Side};
    use crate::pipeline::PipelineBuilder;
    use crate::steps::{
        BuildError, Combine, Decoding, Model, PreTokenization, Split, TemplateElement, Truncation,
    };
    use crate::vocab::Vocab;

    fn single_template() -> Combine {
        Combine::new(Vec::from([
            TemplateElement::token("[CLS]", 0, true),
            TemplateElement::Sequence { segment: 0 },
            TemplateElement::token("[SEP]", 0, true),
        ]))
    }

    fn pair_template() -> Combine {
        Combine::new(Vec::from([
            TemplateElement::token("[CLS]", 0, true),
            TemplateElement::Sequence { segment: 0 },
            TemplateElement::token("[SEP]", 0, true),
            TemplateElement::Sequence { segment: 1 },
            TemplateElement::token("[SEP]", 1, true),
        ]))
    }

    fn pair_builder() -> PipelineBuilder {
        let mut builder = PipelineBuilder::new(Configuration {
            tokenizer_output_type: OutputType::I32,
            detokenizer_input_type: OutputType::I32,
            number_of_inputs: 2,
            ..Configuration::default()
        });
        builder.vocab = Vocab::from_iter([
            Vec::from(*b"[UNK]"),
            Vec::from(*b"[CLS]"),
            Vec::from(*b"[SEP]"),
            Vec::from(*b"hello"),
            Vec::from(*b"##llo"),
        ]);
        builder.push_pre_tokenization(PreTokenization::Split(Split::bert_whitespace()));
        builder.model = Some(Model::WordPiece {
            unk_token:          String::from("[UNK]"),
            suffix_indicator:   String::from("##"),
            max_bytes_per_word: 100,
        });
        builder.combine = Some(single_template());
        builder.pair_combine = Some(pair_template());
        builder
    }

    fn constant_i32(graph: &Graph, tensor: crate::graph::TensorId) -> Vec<i32> {
        match &graph.producer(tensor).op {
            Op::Constant {
                data: ConstantData::I32(v),
                ..
            } => v.clone(),
            other => panic!("unexpected op {other:?}"),
        }
    }

    fn has_i32_constant(graph: &Graph, values: &[i32]) -> bool {
        graph.nodes.iter().any(|node| {
            matches!(&node.op, Op::Constant { data: ConstantData::I32(v), .. } if v == values)
        })
    }

    #[test]
    fn test_widen_pair_inputs_and_combine() {
        let pipeline = pair_builder().finalize().unwrap();
        let artifacts = pipeline.build().unwrap();
        let graph = &artifacts.tokenizer;
        assert_eq!(graph.inputs.len(), 2);
        assert_eq!(graph.count_ops("Concat"), 1);
        assert_eq!(graph.count_ops("StringTensorUnpack"), 1);
        assert_eq!(graph.count_ops("Broadcast"), 4);
        assert_eq!(graph.count_ops("Equal"), 1);
        assert_eq!(graph.count_ops("Slice"), 4);
        assert!(graph.output_named("input_ids").is_some());
        assert!(graph.output_named("token_type_ids").is_some());

        let combine = artifacts.points.combine.unwrap();
        let inputs = &graph.node(combine).inputs;
        assert_eq!(inputs.len(), 16);
        assert_eq!(constant_i32(graph, inputs[15]), Vec::from([0, 0, 0, 1, 1]));

        assert_eq!(artifacts.points.special_ends.len(), 3);
        let extension = artifacts.points.special_ends[2];
        assert_eq!(graph.node(extension.node).op.name(), "Multiply");
        assert_eq!(extension.value, 1);
    }

    #[test]
    fn test_widen_keeps_prefix_toggle_points() {
        let pipeline = pair_builder().finalize().unwrap();
        let artifacts = pipeline.build().unwrap();
        let graph = &artifacts.tokenizer;
        let combine = artifacts.points.combine.unwrap();
        for point in &artifacts.points.special_ends[.. 2] {
            assert_eq!(point.node, combine);
            let gate = graph.node(point.node).inputs[point.slot];
            assert_eq!(graph.producer(gate).op.name(), "Select");
        }
    }

    #[test]
    fn test_widen_splits_truncation_budget() {
        let mut builder = pair_builder();
        builder.truncation = Some(Truncation {
            max_length: 8,
            side:       Side::Right,
        });
        let pipeline = builder.finalize().unwrap();
        let artifacts = pipeline.build().unwrap();
        let graph = &artifacts.tokenizer;
        assert_eq!(graph.count_ops("Greater"), 1);
        // 8 minus the extra [SEP] leaves 7, split 4 against 3
        assert!(has_i32_constant(graph, &[7]));
        assert!(has_i32_constant(graph, &[4]));
        assert!(has_i32_constant(graph, &[3]));
        assert_eq!(graph.count_ops("Minimum"), 4);
    }

    #[test]
    fn test_widen_requires_pair_template() {
        let mut builder = pair_builder();
        builder.pair_combine = None;
        let pipeline = builder.finalize().unwrap();
        assert!(matches!(
            pipeline.build(),
            Err(BuildError::Transform(TransformError::MissingPairTemplate))
        ));
    }

    #[test]
    fn test_widen_requires_combine_point() {
        let mut builder = pair_builder();
        builder.combine = None;
        builder.pair_combine = None;
        let pipeline = builder.finalize().unwrap();
        assert!(matches!(
            pipeline.build(),
            Err(BuildError::Transform(TransformError::MissingPoint("combine")))
        ));
    }

    #[test]
    fn test_widen_rejects_non_extending_pair() {
        let mut builder = pair_builder();
        builder.pair_combine = Some(Combine::new(Vec::from([
            TemplateElement::Sequence { segment: 0 },
            TemplateElement::Sequence { segment: 1 },
        ])));
        let pipeline = builder.finalize().unwrap();
        assert!(matches!(
            pipeline.build(),
            Err(BuildError::Transform(TransformError::TemplateMismatch))
        ));
    }

    #[test]
    fn test_make_stateful_rewires_toggle_points() {
        let mut builder = pair_builder();
        builder.configuration.number_of_inputs = 1;
        builder.configuration.with_detokenizer = true;
        builder.pair_combine = None;
        builder.push_decoding(Decoding::VocabDecode {
            skip_tokens: Vec::from([0, 1, 2]),
            skip:        true,
        });
        let pipeline = builder.finalize().unwrap();
        let mut artifacts = pipeline.build().unwrap();
        make_stateful(&mut artifacts);

        let graph = &artifacts.tokenizer;
        assert_eq!(graph.count_ops("ReadValue"), 1);
        for point in &artifacts.points.special_ends {
            let gate = graph.node(point.node).inputs[point.slot];
            assert_eq!(graph.producer(gate).op.name(), "Multiply");
        }
        let state = graph.nodes.iter().find_map(|node| match &node.op {
            Op::ReadValue { variable, default } => Some((variable.clone(), *default)),
            _ => None,
        });
        assert_eq!(state, Some((String::from(ADD_SPECIAL_TOKENS_VARIABLE), 1)));

        let detokenizer = artifacts.detokenizer.as_ref().unwrap();
        assert_eq!(detokenizer.count_ops("ReadValue"), 1);
        let skip = artifacts.points.skip.unwrap();
        let bound = detokenizer.node(skip.node).inputs[skip.slot];
        assert_eq!(detokenizer.producer(bound).op.name(), "Multiply");
    }

    #[test]
    fn test_greedy_decoding_replaces_logits() {
        let mut builder = GraphBuilder::new("generator");
        let logits = builder.parameter(ElementType::F32, Vec::from([-1, -1]));
        builder.output(logits, "logits");
        let mut graph = builder.finish();
        add_greedy_decoding(&mut graph, "logits", OutputType::I64).unwrap();
        assert!(graph.output_named("logits").is_none());
        let ids = graph.output_named(TOKEN_IDS_NAME).unwrap();
        assert_eq!(graph.tensor(ids).ty, ElementType::I64);
        assert_eq!(graph.count_ops("TopK"), 1);
        assert_eq!(graph.producer(ids).op.name(), "Convert");

        let mut empty = GraphBuilder::new("generator").finish();
        assert!(matches!(
            add_greedy_decoding(&mut empty, "logits", OutputType::I64),
            Err(TransformError::MissingOutput(_))
        ));
    }

    #[test]
    fn test_change_outputs_type_converts_integers() {
        let mut builder = GraphBuilder::new("tokenizer");
        let ids = builder.scalar_i32(7);
        builder.output(ids, "input_ids");
        let text = builder.parameter(ElementType::Str, Vec::from([-1]));
        builder.output(text, "string_output");
        let mut graph = builder.finish();

        change_outputs_type(&mut graph, OutputType::I32);
        assert_eq!(graph.count_ops("Convert"), 0);

        change_outputs_type(&mut graph, OutputType::I64);
        assert_eq!(graph.count_ops("Convert"), 1);
        let ids = graph.output_named("input_ids").unwrap();
        assert_eq!(graph.tensor(ids).ty, ElementType::I64);
        let text = graph.output_named("string_output").unwrap();
        assert_eq!(graph.tensor(text).ty, ElementType::Str);
    }

    #[test]
    fn test_change_inputs_type_keeps_interior_i32() {
        let mut builder = GraphBuilder::new("detokenizer");
        let ids = builder.parameter(ElementType::I32, Vec::from([-1, -1]));
        let one = builder.scalar_i32(1);
        let sum = builder.apply1(Op::Add, &[ids, one], ElementType::I32);
        builder.output(sum, "tokens");
        let mut graph = builder.finish();

        change_inputs_type(&mut graph, OutputType::I64);
        assert_eq!(graph.tensor(graph.inputs[0]).ty, ElementType::I64);
        assert_eq!(graph.count_ops("Convert"), 1);
        let add = graph.nodes.iter().find(|node| node.op.name() == "Add").unwrap();
        assert_eq!(graph.producer(add.inputs[0]).op.name(), "Convert");
    }
}
