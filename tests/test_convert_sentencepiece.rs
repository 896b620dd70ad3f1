//! Tests for converting binary SentencePiece models into graphs.

mod util;
use util::*;

use ragtoken::convert::{convert_sentencepiece, convert_sentencepiece_with_vocab};
use ragtoken::{
    AddedToken, Artifacts, CharsMap, Configuration, Decoding, Model, Normalization, Source,
    UnicodeForm, Vocab,
};

#[test]
fn test_unigram_description() {
    init_env();

    let pipeline = convert_sentencepiece(sentencepiece_unigram(), Configuration::default()).unwrap();

    assert_eq!(pipeline.vocab().len(), 7);
    assert_eq!(pipeline.vocab().token(3), Some("\u{2581}the".as_bytes()));
    assert_eq!(pipeline.specials().unk, Some(0));
    assert_eq!(pipeline.specials().bos, Some(1));
    assert_eq!(pipeline.specials().eos, Some(2));
    assert_eq!(pipeline.specials().pad, None);
    assert_eq!(pipeline.added().len(), 2);

    let mut map = CharsMap::default();
    map.form = Some(UnicodeForm::Nfkc);
    map.nmt = true;
    map.add_dummy_prefix = true;
    map.escape_whitespaces = true;
    assert_eq!(pipeline.normalization(), Vec::from([Normalization::CharsMap(map)]));
    // only the special-token splitter
    assert_eq!(pipeline.pre_tokenization().len(), 1);

    match pipeline.model() {
        Model::Unigram {
            scores,
            unk_token_id,
            byte_fallback,
        } => {
            assert_eq!(scores.len(), 7);
            assert_eq!(scores[3], -1.0);
            assert_eq!(*unk_token_id, 0);
            assert!(!*byte_fallback);
        }
        other => panic!("unexpected model {other:?}"),
    }

    assert_eq!(pipeline.decoding(), Vec::from([
        Decoding::VocabDecode {
            skip_tokens: Vec::from([1, 2]),
            skip:        true,
        },
        Decoding::Fuse,
        Decoding::strip_forward_space(),
    ]));
}

#[test]
fn test_unigram_graphs() {
    init_env();

    let configuration = Configuration {
        with_detokenizer: true,
        ..Configuration::default()
    };
    let pipeline = convert_sentencepiece(sentencepiece_unigram(), configuration).unwrap();
    let artifacts = pipeline.build().unwrap();

    assert_eq!(artifacts.metadata.source, Source::SentencePiece);
    assert!(artifacts.metadata.single.is_none());

    let tokenizer = &artifacts.tokenizer;
    log::debug!("tokenizer ops: {:?}", op_names(tokenizer));
    assert_eq!(tokenizer.count_ops("StringTensorUnpack"), 1);
    assert_eq!(tokenizer.count_ops("CharsMapNormalization"), 1);
    assert_eq!(tokenizer.count_ops("RegexSplit"), 1);
    assert_eq!(tokenizer.count_ops("UnigramTokenizer"), 1);
    assert_eq!(tokenizer.count_ops("CombineSegments"), 0);
    assert_eq!(tokenizer.count_ops("RaggedToDense"), 1);
    assert!(tokenizer.output_named("input_ids").is_some());
    assert!(tokenizer.output_named("attention_mask").is_some());
    assert!(tokenizer.output_named("token_type_ids").is_none());
    assert!(artifacts.points.special_ends.is_empty());
    assert!(artifacts.points.truncation.is_none());

    let detokenizer = artifacts.detokenizer.as_ref().unwrap();
    log::debug!("detokenizer ops: {:?}", op_names(detokenizer));
    assert_eq!(detokenizer.count_ops("VocabDecoder"), 1);
    assert_eq!(detokenizer.count_ops("FuzeRagged"), 1);
    assert_eq!(detokenizer.count_ops("RegexNormalization"), 1);
    assert_eq!(detokenizer.count_ops("StringTensorPack"), 1);
    assert!(detokenizer.output_named("string_output").is_some());

    let skip = artifacts.points.skip.unwrap();
    assert_eq!(skip.slot, 2);
    assert_eq!(skip.value, 2);
}

#[test]
fn test_reference_vocabulary_alignment() {
    init_env();

    let reference = ["<unk>", "<s>", "</s>", "\u{2581}the", "\u{2581}", "th", "e", "<mask>"]
        .into_iter()
        .map(|token| Vec::from(token.as_bytes()))
        .collect::<Vocab>();
    let added = Vec::from([AddedToken::new(*b"<mask>").with_id(7).special()]);
    let pipeline = convert_sentencepiece_with_vocab(
        sentencepiece_unigram(),
        reference,
        added,
        Configuration::default(),
    )
    .unwrap();

    assert_eq!(pipeline.vocab().len(), 8);
    assert_eq!(pipeline.vocab().token(7), Some(b"<mask>".as_slice()));
    assert_eq!(pipeline.added().len(), 3);
    assert_eq!(pipeline.specials().bos, Some(1));
    assert_eq!(pipeline.specials().eos, Some(2));

    match pipeline.model() {
        Model::Unigram { scores, .. } => {
            assert_eq!(scores.len(), 8);
            assert_eq!(scores[7], 0.0);
        }
        other => panic!("unexpected model {other:?}"),
    }

    // the relabeled control piece joins the skip list
    assert_eq!(pipeline.decoding()[0], Decoding::VocabDecode {
        skip_tokens: Vec::from([1, 2, 7]),
        skip:        true,
    });
}

#[test]
fn test_bpe_model_merges() {
    init_env();

    let data = sentencepiece_model(
        &[
            sentence_piece("<unk>", 0.0, PIECE_UNKNOWN),
            sentence_piece("a", -1.0, PIECE_NORMAL),
            sentence_piece("b", -2.0, PIECE_NORMAL),
            sentence_piece("ab", -0.5, PIECE_NORMAL),
        ],
        2,
        "identity",
    );
    let pipeline = convert_sentencepiece(data, Configuration::default()).unwrap();

    match pipeline.model() {
        Model::Bpe {
            merges,
            unk_token,
            fuse_unk,
            ..
        } => {
            assert_eq!(merges, &Vec::from([(Vec::from(*b"a"), Vec::from(*b"b"))]));
            assert_eq!(unk_token, "<unk>");
            assert!(*fuse_unk);
        }
        other => panic!("unexpected model {other:?}"),
    }

    let artifacts = pipeline.build().unwrap();
    assert_eq!(artifacts.tokenizer.count_ops("BPETokenizer"), 1);
    assert_eq!(artifacts.tokenizer.count_ops("UnigramTokenizer"), 0);
}

#[test]
fn test_serialization_round_trip() {
    init_env();

    let configuration = Configuration {
        with_detokenizer: true,
        ..Configuration::default()
    };
    let pipeline = convert_sentencepiece(sentencepiece_unigram(), configuration).unwrap();
    let artifacts = pipeline.build().unwrap();

    let data = artifacts.to_vec();
    let restored = Artifacts::from_slice(&data).unwrap();
    test_artifacts_same(&artifacts, &restored);
}
