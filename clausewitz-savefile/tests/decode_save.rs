use std::io::{Cursor, Write};
use std::sync::Arc;

use clausewitz_codec::{tokens, Decoder, KeyFilter, TokenTable, Value};
use clausewitz_savefile::archive::{self, SaveDecoder};
use clausewitz_savefile::{SaveOptions, ShardRegion, ShardedDecoder};

const TABLE: &str = "\
    2d01 foo\n\
    2e01 bar\n\
    2f01 name\n\
    3101 countries\n\
    3201 active_advisors\n\
    3301 provinces\n";

fn table() -> TokenTable {
    TokenTable::parse(TABLE.as_bytes(), &["countries", "provinces"]).unwrap()
}

fn op(code: u16) -> Vec<u8> {
    code.to_le_bytes().to_vec()
}

fn int(value: i32) -> Vec<u8> {
    [op(tokens::INT), value.to_le_bytes().to_vec()].concat()
}

fn string(text: &str) -> Vec<u8> {
    [
        op(tokens::STRING),
        (text.len() as u16).to_le_bytes().to_vec(),
        text.as_bytes().to_vec(),
    ]
    .concat()
}

fn assignment(key: u16, value: Vec<u8>) -> Vec<u8> {
    [op(key), op(tokens::EQUALS), value].concat()
}

/// `TAG={foo=<value>}`
fn tag_entry(tag: &str, value: i32) -> Vec<u8> {
    [
        string(tag),
        op(tokens::EQUALS),
        op(tokens::OPEN),
        assignment(0x2d01, int(value)),
        op(tokens::CLOSE),
    ]
    .concat()
}

/// `<id>={foo=<value>}`
fn index_entry(id: i32, value: i32) -> Vec<u8> {
    [
        int(id),
        op(tokens::EQUALS),
        op(tokens::OPEN),
        assignment(0x2d01, int(value)),
        op(tokens::CLOSE),
    ]
    .concat()
}

/// `<key>={ <body> }` spelled out for a bulk region.
fn bulk_object(key: u16, body: Vec<u8>) -> Vec<u8> {
    [
        op(key),
        op(tokens::EQUALS),
        op(tokens::OPEN),
        body,
        op(tokens::CLOSE),
    ]
    .concat()
}

fn decode_sharded(stream: &[u8], table: &Arc<TokenTable>, chunks: usize) -> Value {
    let options = SaveOptions {
        chunks,
        regions: ShardRegion::defaults(),
    };
    let delegate = ShardedDecoder::new(Arc::clone(table), None, &options).unwrap();

    let mut decoder = Decoder::new(stream, table).with_delegate(&delegate);
    decoder.run().unwrap();
    decoder.finish()
}

fn decode_sequential(stream: &[u8], table: &TokenTable) -> Value {
    let mut decoder = Decoder::new(stream, table);
    decoder.run().unwrap();
    decoder.finish()
}

fn countries_gamestate(entries: usize) -> Vec<u8> {
    let body: Vec<u8> = (1..=entries)
        .flat_map(|n| tag_entry(&format!("C{n:02}"), n as i32))
        .collect();

    [
        bulk_object(0x3101, body),
        bulk_object(0x3201, assignment(0x2d01, int(99))),
    ]
    .concat()
}

#[test]
fn seventeen_entries_across_four_workers() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let table = Arc::new(table());
    let tree = decode_sharded(&countries_gamestate(17), &table, 4);

    let countries = tree.get("countries").unwrap().as_object().unwrap();
    assert_eq!(countries.len(), 17);
    for (index, (key, value)) in countries.iter().enumerate() {
        assert_eq!(key, &format!("C{:02}", index + 1));
        assert_eq!(value.get("foo").unwrap(), &Value::Int(index as i64 + 1));
    }

    assert_eq!(
        tree.get("active_advisors").unwrap().get("foo").unwrap(),
        &Value::Int(99)
    );
}

#[test]
fn chunk_count_does_not_change_the_tree() {
    let table = Arc::new(table());
    let stream = countries_gamestate(17);

    let reference = decode_sequential(&stream, &table);
    for chunks in [1, 2, 4, 17, 32] {
        assert_eq!(decode_sharded(&stream, &table, chunks), reference);
    }
}

#[test]
fn provinces_and_countries_decode_back_to_back() {
    let table = Arc::new(table());

    let provinces: Vec<u8> = [index_entry(-1, 1), index_entry(-2, 2), index_entry(-3, 3)].concat();
    let countries: Vec<u8> = [tag_entry("SWE", 10), tag_entry("DAN", 20)].concat();
    let stream = [
        bulk_object(0x3301, provinces),
        bulk_object(0x3101, countries),
        bulk_object(0x3201, assignment(0x2d01, int(1))),
    ]
    .concat();

    let tree = decode_sharded(&stream, &table, 2);
    assert_eq!(tree, decode_sequential(&stream, &table));

    let provinces = tree.get("provinces").unwrap();
    assert_eq!(provinces.get("-1").unwrap().get("foo").unwrap(), &Value::Int(1));
    assert_eq!(provinces.get("-3").unwrap().get("foo").unwrap(), &Value::Int(3));

    let countries = tree.get("countries").unwrap();
    assert_eq!(countries.get("SWE").unwrap().get("foo").unwrap(), &Value::Int(10));
    assert_eq!(countries.get("DAN").unwrap().get("foo").unwrap(), &Value::Int(20));
}

#[test]
fn truncated_entry_fails_the_whole_decode() {
    let table = Arc::new(table());

    // the last entry declares an int payload but the body ends after two bytes
    let truncated = [
        string("SWE"),
        op(tokens::EQUALS),
        op(tokens::OPEN),
        op(0x2d01),
        op(tokens::EQUALS),
        op(tokens::INT),
        vec![0x2a, 0x00],
    ]
    .concat();
    let body = [tag_entry("DAN", 1), truncated].concat();
    let stream = [
        bulk_object(0x3101, body),
        bulk_object(0x3201, assignment(0x2d01, int(1))),
    ]
    .concat();

    let options = SaveOptions::default();
    let delegate = ShardedDecoder::new(Arc::clone(&table), None, &options).unwrap();
    let mut decoder = Decoder::new(&stream, &table).with_delegate(&delegate);

    assert!(matches!(
        decoder.run(),
        Err(clausewitz_codec::decode::Error::Bulk { .. })
    ));
}

#[test]
fn missing_terminator_fails_the_whole_decode() {
    let table = Arc::new(table());

    // countries body with no active_advisors sibling anywhere after it
    let stream = bulk_object(0x3101, tag_entry("SWE", 1));

    let options = SaveOptions::default();
    let delegate = ShardedDecoder::new(Arc::clone(&table), None, &options).unwrap();
    let mut decoder = Decoder::new(&stream, &table).with_delegate(&delegate);

    assert!(decoder.run().is_err());
}

fn build_archive(meta: &[u8], gamestate: &[u8]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);

    zip.start_file("meta", options).unwrap();
    zip.write_all(meta).unwrap();
    zip.start_file("gamestate", options).unwrap();
    zip.write_all(gamestate).unwrap();

    zip.finish().unwrap().into_inner()
}

fn sample_meta() -> Vec<u8> {
    [
        b"EU4bin".to_vec(),
        assignment(0x2f01, string("Kalmar Union")),
        assignment(0x2e01, int(7)),
    ]
    .concat()
}

fn sample_gamestate() -> Vec<u8> {
    // bar is not whitelisted and must vanish; the country entry keeps foo
    // and loses bar
    let entry = [
        string("SWE"),
        op(tokens::EQUALS),
        op(tokens::OPEN),
        assignment(0x2d01, int(10)),
        assignment(0x2e01, int(11)),
        op(tokens::CLOSE),
    ]
    .concat();

    [
        assignment(0x2d01, int(1)),
        assignment(0x2e01, int(2)),
        bulk_object(0x3101, entry),
        bulk_object(0x3201, assignment(0x2d01, int(3))),
    ]
    .concat()
}

fn sample_decoder() -> SaveDecoder {
    let filter = KeyFilter::parse("foo\nname\nactive_advisors\n".as_bytes()).unwrap();
    SaveDecoder::new(table(), filter, SaveOptions::default())
}

#[test]
fn decodes_a_whole_archive_with_the_whitelist() {
    let archive = build_archive(&sample_meta(), &sample_gamestate());
    let tree = sample_decoder().decode_archive(Cursor::new(archive)).unwrap();

    // meta decodes without the whitelist, so bar survives there
    let meta = tree.get("meta").unwrap();
    assert_eq!(
        meta.get("name").unwrap(),
        &Value::String("Kalmar Union".into())
    );
    assert_eq!(meta.get("bar").unwrap(), &Value::Int(7));

    let gamestate = tree.get("gamestate").unwrap();
    assert_eq!(gamestate.get("foo").unwrap(), &Value::Int(1));
    assert_eq!(gamestate.get("bar"), None);

    let sweden = gamestate.get("countries").unwrap().get("SWE").unwrap();
    assert_eq!(sweden.get("foo").unwrap(), &Value::Int(10));
    assert_eq!(sweden.get("bar"), None);

    assert_eq!(
        gamestate.get("active_advisors").unwrap().get("foo").unwrap(),
        &Value::Int(3)
    );
}

#[test]
fn decodes_an_archive_from_disk() {
    let archive = build_archive(&sample_meta(), &sample_gamestate());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("campaign.eu4");
    std::fs::write(&path, archive).unwrap();

    let tree = sample_decoder().decode_path(&path).unwrap();
    assert!(tree.get("meta").is_some());
    assert!(tree.get("gamestate").is_some());
}

#[test]
fn meta_without_the_magic_is_fatal() {
    let archive = build_archive(b"EU4txtgarbage", &sample_gamestate());

    assert!(matches!(
        sample_decoder().decode_archive(Cursor::new(archive)),
        Err(archive::Error::Decode(
            clausewitz_codec::decode::Error::BadMagic(_)
        ))
    ));
}

#[test]
fn archives_without_both_streams_are_rejected() {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    zip.start_file("meta", options).unwrap();
    zip.write_all(&sample_meta()).unwrap();
    let bytes = zip.finish().unwrap().into_inner();

    assert!(matches!(
        sample_decoder().decode_archive(Cursor::new(bytes)),
        Err(archive::Error::Archive(_))
    ));
}
