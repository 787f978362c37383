use historian_forwarder::config::naming::NamingScheme;
use historian_forwarder::domain::{Sample, TagCatalog, TagKind, TagMeta, TagValue, WebIdMap};
use historian_forwarder::payload::{
    BatchLimits, LegacyEncoder, OmfEncoder, PayloadAccumulator, ProtocolEncoder,
};
use serde_json::Value;

fn catalog() -> TagCatalog {
    TagCatalog::new(vec![
        TagMeta {
            id: 1,
            name: "temperature".into(),
            kind: TagKind::Float,
        },
        TagMeta {
            id: 2,
            name: "running".into(),
            kind: TagKind::Boolean,
        },
        TagMeta {
            id: 3,
            name: "cycles".into(),
            kind: TagKind::Integer,
        },
    ])
    .unwrap()
}

fn sample(id: u32, name: &str, kind: TagKind, value: TagValue, timestamp: i64) -> Sample {
    Sample {
        tag_id: id,
        tag_name: name.into(),
        kind,
        value,
        timestamp,
    }
}

fn omf_accumulator(catalog: &TagCatalog, limits: BatchLimits) -> PayloadAccumulator {
    let encoder = ProtocolEncoder::Omf(OmfEncoder::new(
        NamingScheme::parse("default").unwrap(),
        "sn42",
    ));
    PayloadAccumulator::new(encoder, catalog, limits)
}

fn legacy_accumulator(catalog: &TagCatalog, limits: BatchLimits) -> PayloadAccumulator {
    let mut web_ids = WebIdMap::new(catalog);
    web_ids.set(1, "W-TEMP".into());
    web_ids.set(2, "W-RUN".into());
    web_ids.set(3, "W-CYC".into());
    let encoder = ProtocolEncoder::Legacy(LegacyEncoder::new(
        "https://pi.example.com",
        "dXNlcjpwdw==",
        web_ids,
    ));
    PayloadAccumulator::new(encoder, catalog, limits)
}

#[test]
fn two_hundred_samples_complete_one_batch_within_the_window() {
    let catalog = catalog();
    let mut acc = omf_accumulator(&catalog, BatchLimits::default());

    for i in 0..201u32 {
        acc.admit(&sample(
            1,
            "temperature",
            TagKind::Float,
            TagValue::Float(f64::from(i)),
            1_700_000_000 + i64::from(i % 5),
        ));
    }

    let batch = acc.take_completed().expect("batch after 200 samples");
    assert_eq!(batch.sample_count(), 200);
    // The 201st sample landed in the next batch.
    assert_eq!(acc.sample_count(), 1);
    assert!(!acc.is_complete());

    let parsed: Value = serde_json::from_str(batch.payload()).unwrap();
    let containers = parsed.as_array().unwrap();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0]["values"].as_array().unwrap().len(), 200);
}

#[test]
fn omf_payload_groups_by_container_and_renders_native_booleans() {
    let catalog = catalog();
    let mut acc = omf_accumulator(
        &catalog,
        BatchLimits {
            max_samples: 4,
            time_window_secs: 10,
        },
    );

    acc.admit(&sample(
        1,
        "temperature",
        TagKind::Float,
        TagValue::Float(21.5),
        1_700_000_000,
    ));
    acc.admit(&sample(
        2,
        "running",
        TagKind::Boolean,
        TagValue::Bool(true),
        1_700_000_000,
    ));
    acc.admit(&sample(
        1,
        "temperature",
        TagKind::Float,
        TagValue::Float(21.7),
        1_700_000_001,
    ));
    acc.admit(&sample(
        2,
        "running",
        TagKind::Boolean,
        TagValue::Bool(false),
        1_700_000_001,
    ));

    let batch = acc.take_completed().unwrap();
    let parsed: Value = serde_json::from_str(batch.payload()).unwrap();
    let containers = parsed.as_array().unwrap();
    assert_eq!(containers.len(), 2);

    assert_eq!(containers[0]["containerid"], "temperature-sn42-number");
    let temp_values = containers[0]["values"].as_array().unwrap();
    assert_eq!(temp_values.len(), 2);
    assert_eq!(temp_values[0]["tagValue"], 21.5);
    assert!(
        temp_values[0]["timestamp"]
            .as_str()
            .unwrap()
            .ends_with(".000Z")
    );

    assert_eq!(containers[1]["containerid"], "running-sn42-boolean");
    let run_values = containers[1]["values"].as_array().unwrap();
    assert_eq!(run_values[0]["tagValue"], Value::Bool(true));
    assert_eq!(run_values[1]["tagValue"], Value::Bool(false));
}

#[test]
fn legacy_payload_is_a_batch_envelope_of_post_entries() {
    let catalog = catalog();
    let mut acc = legacy_accumulator(
        &catalog,
        BatchLimits {
            max_samples: 3,
            time_window_secs: 10,
        },
    );

    acc.admit(&sample(
        1,
        "temperature",
        TagKind::Float,
        TagValue::Float(20.0),
        1_700_000_000,
    ));
    acc.admit(&sample(
        2,
        "running",
        TagKind::Boolean,
        TagValue::Bool(true),
        1_700_000_000,
    ));
    acc.admit(&sample(
        3,
        "cycles",
        TagKind::Integer,
        TagValue::Int(42),
        1_700_000_001,
    ));

    let batch = acc.take_completed().unwrap();
    let parsed: Value = serde_json::from_str(batch.payload()).unwrap();
    let envelope = parsed.as_object().unwrap();
    assert_eq!(envelope.len(), 3);

    for entry in envelope.values() {
        assert_eq!(entry["Method"], "POST");
        assert_eq!(entry["Headers"]["Authorization"], "Basic dXNlcjpwdw==");
    }

    let temp = &envelope["0"];
    assert_eq!(
        temp["Resource"],
        "https://pi.example.com/piwebapi/streams/W-TEMP/Value"
    );
    let content: Value = serde_json::from_str(temp["Content"].as_str().unwrap()).unwrap();
    assert_eq!(content["Value"], 20.0);
    assert_eq!(content["Good"], Value::Bool(true));
    assert_eq!(content["Questionable"], Value::Bool(false));
    assert_eq!(content["UnitsAbbreviation"], "");

    // Legacy booleans go out as raw 0/1.
    let run: Value = serde_json::from_str(envelope["1"]["Content"].as_str().unwrap()).unwrap();
    assert_eq!(run["Value"], 1);

    let cycles: Value = serde_json::from_str(envelope["2"]["Content"].as_str().unwrap()).unwrap();
    assert_eq!(cycles["Value"], 42);
}

#[test]
fn legacy_accumulator_skips_unresolved_tags() {
    let catalog = catalog();
    let mut web_ids = WebIdMap::new(&catalog);
    web_ids.set(1, "W-TEMP".into());
    let encoder = ProtocolEncoder::Legacy(LegacyEncoder::new(
        "https://pi.example.com",
        "dXNlcjpwdw==",
        web_ids,
    ));
    let mut acc = PayloadAccumulator::new(
        encoder,
        &catalog,
        BatchLimits {
            max_samples: 2,
            time_window_secs: 10,
        },
    );

    // No WebId for "running": the sample is skipped and does not count.
    acc.admit(&sample(
        2,
        "running",
        TagKind::Boolean,
        TagValue::Bool(true),
        1_700_000_000,
    ));
    assert_eq!(acc.sample_count(), 0);

    acc.admit(&sample(
        1,
        "temperature",
        TagKind::Float,
        TagValue::Float(1.0),
        1_700_000_000,
    ));
    acc.admit(&sample(
        1,
        "temperature",
        TagKind::Float,
        TagValue::Float(2.0),
        1_700_000_001,
    ));

    let batch = acc.take_completed().unwrap();
    assert_eq!(batch.sample_count(), 2);
    let parsed: Value = serde_json::from_str(batch.payload()).unwrap();
    assert_eq!(parsed.as_object().unwrap().len(), 2);
}

#[test]
fn time_window_cuts_a_slow_batch() {
    let catalog = catalog();
    let mut acc = omf_accumulator(&catalog, BatchLimits::default());

    for i in 0..12i64 {
        acc.admit(&sample(
            1,
            "temperature",
            TagKind::Float,
            TagValue::Float(i as f64),
            1_700_000_000 + i,
        ));
    }

    // Sample at +11s exceeds the 10s window measured from the first sample.
    let batch = acc.take_completed().expect("time-bounded batch");
    assert_eq!(batch.sample_count(), 12);
}
