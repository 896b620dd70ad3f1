#![allow(dead_code)]

use std::sync::Once;

use console::style;

use ragtoken::{Artifacts, Graph};

static INIT_ENV: Once = Once::new();

pub fn init_env() {
    INIT_ENV.call_once(|| {
        simple_logger::SimpleLogger::new()
            .with_level(log::Level::Debug.to_level_filter())
            .env()
            .init()
            .unwrap();
    });
}

/// Node-type names of a graph in emission order.
pub fn op_names(graph: &Graph) -> Vec<&'static str> {
    graph.ops().map(|node| node.op.name()).collect()
}

pub fn test_graphs_same(name: &str, left: &Graph, right: &Graph) {
    let sep = style(":").dim();
    assert_eq!(left.nodes.len(), right.nodes.len(), "{name} node counts are equal");
    if left.nodes != right.nodes {
        let diff_at =
            left.nodes.iter().zip(right.nodes.iter()).position(|(a, b)| a != b).unwrap();
        let line = style(format!("{name} node mismatch at index {diff_at}")).on_red();
        eprintln!(
            "{}{}\n\t{}{} {:?}\n\t{}{} {:?}",
            line,
            sep,
            style("left").bold().magenta(),
            sep,
            &left.nodes[diff_at],
            style("right").bold().magenta(),
            sep,
            &right.nodes[diff_at]
        );
    }
    assert_eq!(left, right, "{name} graphs are equal");
}

pub fn test_artifacts_same(left: &Artifacts, right: &Artifacts) {
    assert_eq!(left.metadata, right.metadata, "metadata is equal");
    assert_eq!(left.points, right.points, "extension points are equal");
    test_graphs_same("tokenizer", &left.tokenizer, &right.tokenizer);
    match (&left.detokenizer, &right.detokenizer) {
        (Some(left), Some(right)) => test_graphs_same("detokenizer", left, right),
        (None, None) => {}
        (left, right) => panic!(
            "detokenizer presence differs: left {}, right {}",
            left.is_some(),
            right.is_some()
        ),
    }
}

pub const PIECE_NORMAL: u64 = 1;
pub const PIECE_UNKNOWN: u64 = 2;
pub const PIECE_CONTROL: u64 = 3;
pub const PIECE_BYTE: u64 = 6;

fn varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

fn proto_varint(out: &mut Vec<u8>, field: u64, value: u64) {
    varint(out, field << 3);
    varint(out, value);
}

fn proto_f32(out: &mut Vec<u8>, field: u64, value: f32) {
    varint(out, (field << 3) | 5);
    out.extend_from_slice(&value.to_le_bytes());
}

fn proto_bytes(out: &mut Vec<u8>, field: u64, value: &[u8]) {
    varint(out, (field << 3) | 2);
    varint(out, value.len() as u64);
    out.extend_from_slice(value);
}

pub fn sentence_piece(text: &str, score: f32, kind: u64) -> Vec<u8> {
    let mut out = Vec::new();
    proto_bytes(&mut out, 1, text.as_bytes());
    proto_f32(&mut out, 2, score);
    proto_varint(&mut out, 3, kind);
    out
}

/// Assembles a SentencePiece model from pieces and the two spec messages.
///
/// `model_type` is the trainer enum value, 1 for unigram and 2 for BPE.
pub fn sentencepiece_model(pieces: &[Vec<u8>], model_type: u64, normalizer_name: &str) -> Vec<u8> {
    let mut trainer = Vec::new();
    proto_varint(&mut trainer, 3, model_type);
    proto_varint(&mut trainer, 40, 0);
    let mut normalizer = Vec::new();
    proto_bytes(&mut normalizer, 1, normalizer_name.as_bytes());
    proto_varint(&mut normalizer, 3, 1);
    proto_varint(&mut normalizer, 4, 0);
    proto_varint(&mut normalizer, 5, 1);
    let mut out = Vec::new();
    for piece in pieces {
        proto_bytes(&mut out, 1, piece);
    }
    proto_bytes(&mut out, 2, &trainer);
    proto_bytes(&mut out, 3, &normalizer);
    out
}

/// A small unigram SentencePiece model with the usual control pieces.
pub fn sentencepiece_unigram() -> Vec<u8> {
    sentencepiece_model(
        &[
            sentence_piece("<unk>", 0.0, PIECE_UNKNOWN),
            sentence_piece("<s>", 0.0, PIECE_CONTROL),
            sentence_piece("</s>", 0.0, PIECE_CONTROL),
            sentence_piece("\u{2581}the", -1.0, PIECE_NORMAL),
            sentence_piece("\u{2581}", -2.0, PIECE_NORMAL),
            sentence_piece("th", -3.0, PIECE_NORMAL),
            sentence_piece("e", -4.0, PIECE_NORMAL),
        ],
        1,
        "nmt_nfkc",
    )
}

/// A byte-level BPE tokenizers description with templates, truncation and padding.
pub fn tokenizers_bpe_json() -> String {
    r#"{
        "version": "1.0",
        "added_tokens": [
            { "id": 0, "content": "<s>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true },
            { "id": 1, "content": "</s>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true },
            { "id": 2, "content": "<pad>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true }
        ],
        "normalizer": { "type": "NFC" },
        "pre_tokenizer": { "type": "ByteLevel", "add_prefix_space": false, "trim_offsets": true, "use_regex": true },
        "model": {
            "type": "BPE",
            "dropout": null,
            "unk_token": null,
            "continuing_subword_prefix": null,
            "end_of_word_suffix": null,
            "fuse_unk": false,
            "byte_fallback": false,
            "vocab": { "<s>": 0, "</s>": 1, "<pad>": 2, "h": 3, "i": 4, "hi": 5, "Ġ": 6, "Ġhi": 7 },
            "merges": ["h i", "Ġ hi"]
        },
        "post_processor": {
            "type": "TemplateProcessing",
            "single": [
                { "SpecialToken": { "id": "<s>", "type_id": 0 } },
                { "Sequence": { "id": "A", "type_id": 0 } },
                { "SpecialToken": { "id": "</s>", "type_id": 0 } }
            ],
            "pair": [
                { "SpecialToken": { "id": "<s>", "type_id": 0 } },
                { "Sequence": { "id": "A", "type_id": 0 } },
                { "SpecialToken": { "id": "</s>", "type_id": 0 } },
                { "Sequence": { "id": "B", "type_id": 1 } },
                { "SpecialToken": { "id": "</s>", "type_id": 1 } }
            ]
        },
        "decoder": { "type": "ByteLevel", "add_prefix_space": true, "trim_offsets": true },
        "truncation": { "direction": "Right", "max_length": 16, "strategy": "LongestFirst", "stride": 0 },
        "padding": {
            "strategy": "BatchLongest",
            "direction": "Right",
            "pad_to_multiple_of": null,
            "pad_id": 2,
            "pad_type_id": 0,
            "pad_token": "<pad>"
        }
    }"#
    .to_string()
}

/// A small tiktoken rank table where every multi-byte token reduces to a merge.
pub fn tiktoken_ranks() -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    let tokens: &[&[u8]] = &[b"t", b"h", b"e", b" ", b"th", b"the", b" the"];
    let mut out = String::new();
    for (rank, token) in tokens.iter().enumerate() {
        out.push_str(&STANDARD.encode(token));
        out.push(' ');
        out.push_str(&rank.to_string());
        out.push('\n');
    }
    out
}
